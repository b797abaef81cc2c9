//! Keeps upstream event subscriptions from lapsing.
//!
//! A lapsed subscription stops producing change notifications without any
//! error anywhere else, so every lapse is raised on [`ALERT_TARGET`].

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use super::backoff::BackoffPolicy;
use super::summary::{HostSyncSummary, RenewalSummary};
use super::{run_bounded, EngineRuntime, ALERT_TARGET};
use crate::db::{CasOutcome, MetadataStore};
use crate::error::ReconcileError;
use crate::model::{SubscriptionRecord, SubscriptionState};
use crate::upstream::UpstreamClient;

#[derive(Debug, Clone)]
pub struct RenewalSettings {
    /// Expiry requested from the upstream on each renewal.
    pub subscription_lifetime: chrono::Duration,
    pub renewal_lead: chrono::Duration,
    pub backoff: BackoffPolicy,
    pub max_concurrency: usize,
    pub invocation_budget: Duration,
    /// Only hosts whose e-mail ends in this domain get a subscription.
    pub host_domain: Option<String>,
}

impl Default for RenewalSettings {
    fn default() -> Self {
        Self {
            subscription_lifetime: chrono::Duration::hours(70),
            renewal_lead: chrono::Duration::minutes(120),
            backoff: BackoffPolicy::new(
                Duration::from_secs(60),
                Duration::from_secs(3600),
                Duration::from_secs(30),
            ),
            max_concurrency: 4,
            invocation_budget: Duration::from_secs(540),
            host_domain: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RenewalOutcome {
    Renewed,
    Skipped,
    Deferred,
    Superseded,
}

#[derive(Clone)]
pub struct SubscriptionRenewalCoordinator {
    store: Arc<dyn MetadataStore>,
    upstream: Arc<dyn UpstreamClient>,
    runtime: EngineRuntime,
    settings: RenewalSettings,
}

impl SubscriptionRenewalCoordinator {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        upstream: Arc<dyn UpstreamClient>,
        runtime: EngineRuntime,
        settings: RenewalSettings,
    ) -> Self {
        Self {
            store,
            upstream,
            runtime,
            settings,
        }
    }

    /// Renew every subscription inside its lead window.
    pub async fn ensure_fresh(&self, now: DateTime<Utc>) -> Result<RenewalSummary, ReconcileError> {
        let subscriptions = self.store.list_subscriptions().await?;
        let mut summary = RenewalSummary::default();

        let mut due = Vec::new();
        for sub in subscriptions {
            if !sub.needs_renewal(now) {
                summary.skipped += 1;
                continue;
            }
            if sub.registration_lapsed(now) {
                summary.lapsed += 1;
            }
            if sub.is_due(now) {
                due.push(sub);
                continue;
            }
            // Waiting out a backoff. A lapse noticed meanwhile still has to be
            // recorded and raised.
            if sub.registration_lapsed(now) && sub.state == SubscriptionState::Active {
                match self.mark_expired(&sub, now).await? {
                    RenewalOutcome::Superseded => summary.superseded += 1,
                    _ => summary.deferred += 1,
                }
            } else {
                summary.skipped += 1;
            }
        }

        let coordinator = self.clone();
        let run = run_bounded(
            due,
            self.settings.max_concurrency,
            self.settings.invocation_budget,
            move |sub| {
                let coordinator = coordinator.clone();
                async move { coordinator.renew_one(sub, now).await }
            },
        )
        .await?;

        for outcome in run.results {
            match outcome {
                RenewalOutcome::Renewed => summary.renewed += 1,
                RenewalOutcome::Skipped => summary.skipped += 1,
                RenewalOutcome::Deferred => summary.deferred += 1,
                RenewalOutcome::Superseded => summary.superseded += 1,
            }
        }
        summary.deferred += run.unfinished;

        info!(
            "Renewal pass: {} renewed, {} deferred, {} lapsed, {} skipped",
            summary.renewed, summary.deferred, summary.lapsed, summary.skipped
        );
        Ok(summary)
    }

    /// Create a subscription record for every eligible host that has none.
    pub async fn sync_hosts(&self) -> Result<HostSyncSummary, ReconcileError> {
        let hosts = match self.upstream.list_hosts().await {
            Ok(hosts) => hosts,
            Err(err) => {
                warn!("Host sync skipped: {}", err);
                return Ok(HostSyncSummary {
                    upstream_error: Some(err.to_string()),
                    ..HostSyncSummary::default()
                });
            }
        };

        let now = self.runtime.clock.now();
        let mut summary = HostSyncSummary {
            hosts_seen: hosts.len(),
            ..HostSyncSummary::default()
        };
        for host in hosts {
            if !host.can_host || !self.in_host_domain(&host.email) {
                continue;
            }
            summary.eligible += 1;
            let record = SubscriptionRecord::unregistered(
                host.events_resource(),
                self.settings.renewal_lead,
                now,
            );
            if self.store.insert_subscription_if_absent(&record).await? {
                info!("Tracking subscription for host {}", host.email);
                summary.created += 1;
            }
        }
        Ok(summary)
    }

    fn in_host_domain(&self, email: &str) -> bool {
        match &self.settings.host_domain {
            None => true,
            Some(domain) => email
                .rsplit_once('@')
                .is_some_and(|(_, d)| d.eq_ignore_ascii_case(domain.trim_start_matches('@'))),
        }
    }

    async fn renew_one(
        &self,
        sub: SubscriptionRecord,
        now: DateTime<Utc>,
    ) -> Result<RenewalOutcome, ReconcileError> {
        let requested = now + self.settings.subscription_lifetime;
        let result = self.upstream.renew_subscription(&sub, requested).await;
        let written_at = self.runtime.clock.now();

        let next = match &result {
            Ok(renewed) => sub.renewed(renewed.upstream_ref.clone(), renewed.expires_at, written_at),
            Err(err) => {
                // Scheduled from the pass time, so a saturated backoff still
                // lands before the next pass however long the call took.
                let delay = self.settings.backoff.delay_chrono(
                    sub.attempt_count.saturating_add(1),
                    self.runtime.jitter.as_ref(),
                );
                sub.renewal_failed(written_at, now + delay, &err.to_string())
            }
        };

        match self
            .store
            .compare_and_swap_subscription(&sub.resource_scope, sub.version, &next)
            .await?
        {
            CasOutcome::Conflict => {
                debug!(
                    resource = %sub.resource_scope,
                    "Subscription changed concurrently, leaving it to the other writer"
                );
                return Ok(RenewalOutcome::Superseded);
            }
            CasOutcome::Swapped { .. } => {}
        }

        match result {
            Ok(renewed) => {
                if sub.state == SubscriptionState::Expired {
                    info!(
                        target: ALERT_TARGET,
                        resource = %sub.resource_scope,
                        "Subscription restored, expires {}",
                        renewed.expires_at
                    );
                } else {
                    info!(
                        resource = %sub.resource_scope,
                        "Subscription renewed until {}",
                        renewed.expires_at
                    );
                }
                Ok(RenewalOutcome::Renewed)
            }
            Err(err) => {
                if sub.state == SubscriptionState::Active && next.state == SubscriptionState::Expired {
                    self.raise_lapse(&next);
                } else if sub.upstream_ref.is_none() {
                    warn!(
                        resource = %sub.resource_scope,
                        "Subscription creation failed (attempt {}): {}",
                        next.attempt_count,
                        err
                    );
                } else {
                    warn!(
                        resource = %sub.resource_scope,
                        "Subscription renewal failed (attempt {}): {}",
                        next.attempt_count,
                        err
                    );
                }
                Ok(RenewalOutcome::Deferred)
            }
        }
    }

    async fn mark_expired(
        &self,
        sub: &SubscriptionRecord,
        now: DateTime<Utc>,
    ) -> Result<RenewalOutcome, ReconcileError> {
        let next = sub.mark_expired(now);
        match self
            .store
            .compare_and_swap_subscription(&sub.resource_scope, sub.version, &next)
            .await?
        {
            CasOutcome::Swapped { .. } => {
                self.raise_lapse(&next);
                Ok(RenewalOutcome::Deferred)
            }
            CasOutcome::Conflict => Ok(RenewalOutcome::Superseded),
        }
    }

    fn raise_lapse(&self, sub: &SubscriptionRecord) {
        error!(
            target: ALERT_TARGET,
            resource = %sub.resource_scope,
            "Subscription lapsed at {}; no notifications arrive until it is renewed (last error: {})",
            sub.expires_at,
            sub.last_error.as_deref().unwrap_or("none")
        );
    }
}
