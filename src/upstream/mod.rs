//! Capability contract for the upstream meeting platform.
//!
//! The engine only sees [`UpstreamClient`]. Every failure comes back as a
//! classified [`CallError`]; "the transcript is not there yet" is an ordinary
//! [`TranscriptFetch::NotReady`] result.

pub mod graph;

pub use graph::GraphClient;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CallError;
use crate::model::{HostUser, MeetingDescriptor, MeetingRecord, SubscriptionRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// `[now - lookback, now]`.
    pub fn lookback(now: DateTime<Utc>, lookback: chrono::Duration) -> Self {
        Self {
            start: now - lookback,
            end: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptFetch {
    Ready(Vec<u8>),
    /// The meeting has no transcript yet. Expected for hours after it ends.
    NotReady,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenewedSubscription {
    pub upstream_ref: String,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Meeting occurrences of the configured organizers starting inside `range`.
    async fn list_meetings(&self, range: TimeRange) -> Result<Vec<MeetingDescriptor>, CallError>;

    async fn fetch_transcript(&self, meeting: &MeetingRecord) -> Result<TranscriptFetch, CallError>;

    /// Extend the subscription, or create it when it has no upstream id yet or
    /// the upstream no longer knows it.
    async fn renew_subscription(
        &self,
        subscription: &SubscriptionRecord,
        requested_expiry: DateTime<Utc>,
    ) -> Result<RenewedSubscription, CallError>;

    /// Look up a calendar event named by a change notification. `None` when
    /// the event is gone or is not an online meeting.
    async fn resolve_event(
        &self,
        user_id: &str,
        event_id: &str,
    ) -> Result<Option<MeetingDescriptor>, CallError>;

    async fn list_hosts(&self) -> Result<Vec<HostUser>, CallError>;
}
