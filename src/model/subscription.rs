//! Upstream event subscriptions and the hosts they are registered for.

use anyhow::{bail, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionState {
    Active,
    /// The subscription lapsed; no notifications arrive until it is recreated.
    Expired,
}

impl SubscriptionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(Self::Active),
            "expired" => Ok(Self::Expired),
            _ => bail!("Invalid subscription state: {}", s),
        }
    }
}

/// One time-bounded registration with the upstream platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    /// Resource the subscription watches, e.g. `/users/{id}/events`. Primary key.
    pub resource_scope: String,
    /// Upstream subscription id, absent until first created.
    pub upstream_ref: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub renewal_lead_seconds: i64,
    pub state: SubscriptionState,
    pub attempt_count: u32,
    pub next_attempt_not_before: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: i64,
}

impl SubscriptionRecord {
    /// A record for a resource that has never been subscribed; due immediately.
    pub fn unregistered(resource_scope: String, renewal_lead: Duration, now: DateTime<Utc>) -> Self {
        Self {
            resource_scope,
            upstream_ref: None,
            expires_at: now,
            renewal_lead_seconds: renewal_lead.num_seconds(),
            state: SubscriptionState::Active,
            attempt_count: 0,
            next_attempt_not_before: None,
            last_error: None,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    pub fn renewal_lead(&self) -> Duration {
        Duration::seconds(self.renewal_lead_seconds)
    }

    /// `expires_at - renewal_lead <= now`.
    pub fn needs_renewal(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - self.renewal_lead() <= now
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.needs_renewal(now) && self.next_attempt_not_before.map_or(true, |at| at <= now)
    }

    pub fn has_lapsed(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// A registered subscription past its expiry. A record that was never
    /// created upstream has nothing to lapse.
    pub fn registration_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.upstream_ref.is_some() && self.has_lapsed(now)
    }

    pub fn renewed(&self, upstream_ref: String, expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            upstream_ref: Some(upstream_ref),
            expires_at,
            state: SubscriptionState::Active,
            attempt_count: 0,
            next_attempt_not_before: None,
            last_error: None,
            updated_at: now,
            ..self.clone()
        }
    }

    /// Record a lapse noticed while the next retry is still pending.
    pub fn mark_expired(&self, now: DateTime<Utc>) -> Self {
        Self {
            state: SubscriptionState::Expired,
            updated_at: now,
            ..self.clone()
        }
    }

    pub fn renewal_failed(
        &self,
        now: DateTime<Utc>,
        next_attempt: DateTime<Utc>,
        error: &str,
    ) -> Self {
        let state = if self.registration_lapsed(now) {
            SubscriptionState::Expired
        } else {
            self.state
        };
        Self {
            state,
            attempt_count: self.attempt_count.saturating_add(1),
            next_attempt_not_before: Some(next_attempt),
            last_error: Some(error.to_string()),
            updated_at: now,
            ..self.clone()
        }
    }
}

/// A directory user and whether their licence lets them host meetings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostUser {
    pub user_id: String,
    pub email: String,
    pub can_host: bool,
}

impl HostUser {
    pub fn events_resource(&self) -> String {
        format!("/users/{}/events", self.user_id)
    }
}
