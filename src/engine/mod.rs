//! The reconciliation engine.
//!
//! Every entry point reads state from the [`MetadataStore`], takes at most one
//! external-effect step per record, and writes the result back through the
//! version guard. Invocations share nothing in memory, so any number of them
//! may overlap. Business failures become record state; only
//! [`ReconcileError`] escapes.

pub mod backoff;
pub mod clock;
pub mod renewal;
pub mod summary;
pub mod transition;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

pub use backoff::{BackoffPolicy, FixedJitter, Jitter, RandomJitter};
pub use clock::{Clock, ManualClock, SystemClock};
pub use renewal::{RenewalSettings, SubscriptionRenewalCoordinator};
pub use summary::{
    AdvanceSummary, DiscoverSummary, HostSyncSummary, RenewalSummary, ReplayOutcome,
    TransitionOutcome,
};

use crate::artifacts::{self, ArtifactStore};
use crate::db::{CasOutcome, MetadataStore};
use crate::error::{CallError, ReconcileError};
use crate::model::{LifecycleState, MeetingDescriptor, MeetingId, MeetingRecord};
use crate::summarizer::{MeetingNotes, Summarizer};
use crate::upstream::{TimeRange, TranscriptFetch, UpstreamClient};
use transition::{Step, classify, is_legal_write, on_failure, on_not_ready, plan};

/// Log target for conditions an operator must act on.
pub const ALERT_TARGET: &str = "scribeline::alert";

/// Re-reads attempted after a version conflict before giving the record up.
const MAX_CONFLICT_RETRIES: usize = 3;

/// Tunables the engine consumes, already converted from configuration.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub backoff: BackoffPolicy,
    /// Transient failures tolerated per phase before a record fails.
    pub max_attempts: u32,
    pub not_ready_recheck: chrono::Duration,
    pub max_not_ready_checks: u32,
    pub stale_pending_alert_checks: u32,
    pub max_concurrency: usize,
    pub invocation_budget: Duration,
    pub summarize_lease: chrono::Duration,
    pub discovery_lookback: chrono::Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            backoff: BackoffPolicy::new(
                Duration::from_secs(60),
                Duration::from_secs(3600),
                Duration::from_secs(30),
            ),
            max_attempts: 8,
            not_ready_recheck: chrono::Duration::minutes(15),
            max_not_ready_checks: 96,
            stale_pending_alert_checks: 16,
            max_concurrency: 4,
            invocation_budget: Duration::from_secs(540),
            summarize_lease: chrono::Duration::minutes(10),
            discovery_lookback: chrono::Duration::hours(24),
        }
    }
}

/// Collaborators the engine drives.
#[derive(Clone)]
pub struct EnginePorts {
    pub store: Arc<dyn MetadataStore>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub upstream: Arc<dyn UpstreamClient>,
    pub summarizer: Arc<dyn Summarizer>,
}

/// Time and randomness, injectable for tests.
#[derive(Clone)]
pub struct EngineRuntime {
    pub clock: Arc<dyn Clock>,
    pub jitter: Arc<dyn Jitter>,
}

impl Default for EngineRuntime {
    fn default() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            jitter: Arc::new(RandomJitter),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    All,
    Single(MeetingId),
}

pub(crate) struct BoundedRun<T> {
    pub results: Vec<T>,
    pub unfinished: usize,
}

/// Run `work` over `items` with at most `limit` in flight, giving up on
/// whatever is still running when `budget` elapses. Aborted work leaves no
/// trace: each unit only persists through its own final version-guarded write.
pub(crate) async fn run_bounded<I, T, F, Fut>(
    items: Vec<I>,
    limit: usize,
    budget: Duration,
    work: F,
) -> Result<BoundedRun<T>, ReconcileError>
where
    I: Send + 'static,
    T: Send + 'static,
    F: Fn(I) -> Fut,
    Fut: Future<Output = Result<T, ReconcileError>> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(limit.max(1)));
    let mut tasks = JoinSet::new();
    for item in items {
        let semaphore = Arc::clone(&semaphore);
        let fut = work(item);
        tasks.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|e| ReconcileError::Configuration(format!("worker pool closed: {e}")))?;
            fut.await
        });
    }

    let deadline = tokio::time::Instant::now() + budget;
    let mut run = BoundedRun {
        results: Vec::new(),
        unfinished: 0,
    };
    loop {
        match tokio::time::timeout_at(deadline, tasks.join_next()).await {
            Ok(Some(Ok(Ok(result)))) => run.results.push(result),
            Ok(Some(Ok(Err(fatal)))) => {
                tasks.abort_all();
                return Err(fatal);
            }
            Ok(Some(Err(join_error))) => {
                error!("Reconciliation task aborted: {}", join_error);
                run.unfinished += 1;
            }
            Ok(None) => break,
            Err(_) => {
                run.unfinished += tasks.len();
                warn!(
                    "Invocation budget of {:?} exhausted, leaving {} records for the next pass",
                    budget,
                    tasks.len()
                );
                tasks.abort_all();
                break;
            }
        }
    }
    Ok(run)
}

#[derive(Clone)]
pub struct ReconciliationEngine {
    ports: EnginePorts,
    runtime: EngineRuntime,
    settings: EngineSettings,
}

impl ReconciliationEngine {
    pub fn new(ports: EnginePorts, runtime: EngineRuntime, settings: EngineSettings) -> Self {
        Self {
            ports,
            runtime,
            settings,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn MetadataStore> {
        &self.ports.store
    }

    pub fn upstream(&self) -> &Arc<dyn UpstreamClient> {
        &self.ports.upstream
    }

    /// Coordinator sharing this engine's store, upstream client and runtime.
    pub fn renewal_coordinator(&self, settings: RenewalSettings) -> SubscriptionRenewalCoordinator {
        SubscriptionRenewalCoordinator::new(
            Arc::clone(&self.ports.store),
            Arc::clone(&self.ports.upstream),
            self.runtime.clone(),
            settings,
        )
    }

    /// Insert a `Discovered` record for every descriptor whose id is new.
    pub async fn discover(
        &self,
        candidates: &[MeetingDescriptor],
    ) -> Result<DiscoverSummary, ReconcileError> {
        let now = self.runtime.clock.now();
        let mut summary = DiscoverSummary::default();
        for descriptor in candidates {
            let record = MeetingRecord::discovered(descriptor, now);
            if self.ports.store.upsert_if_absent(&record).await? {
                info!(
                    meeting_id = %record.id,
                    "Discovered meeting '{}' starting {}",
                    record.subject,
                    record.start_time
                );
                summary.created += 1;
            } else {
                summary.already_known += 1;
            }
        }
        Ok(summary)
    }

    /// List upstream meetings over `[now - lookback, now]` and discover them.
    /// A failed listing is reported in the summary and leaves the store alone.
    pub async fn discover_upstream(
        &self,
        lookback: chrono::Duration,
    ) -> Result<DiscoverSummary, ReconcileError> {
        let range = TimeRange::lookback(self.runtime.clock.now(), lookback);
        match self.ports.upstream.list_meetings(range).await {
            Ok(candidates) => {
                debug!("Upstream listed {} meetings", candidates.len());
                self.discover(&candidates).await
            }
            Err(err) => {
                warn!("Meeting discovery skipped: {}", err);
                Ok(DiscoverSummary {
                    upstream_error: Some(err.to_string()),
                    ..DiscoverSummary::default()
                })
            }
        }
    }

    /// Take the next due step for every actionable record in `scope`.
    pub async fn advance(&self, scope: Scope) -> Result<AdvanceSummary, ReconcileError> {
        let records = match scope {
            Scope::All => self.ports.store.list_actionable().await?,
            Scope::Single(id) => self.ports.store.get(&id).await?.into_iter().collect(),
        };

        let engine = self.clone();
        let run = run_bounded(
            records,
            self.settings.max_concurrency,
            self.settings.invocation_budget,
            move |record| {
                let engine = engine.clone();
                async move { engine.advance_record(record).await }
            },
        )
        .await?;

        let mut summary = AdvanceSummary {
            unfinished: run.unfinished,
            ..AdvanceSummary::default()
        };
        for outcome in run.results {
            summary.record(outcome);
        }
        info!(
            "Advance pass: {} transitioned, {} deferred, {} failed, {} skipped, {} superseded, {} unfinished",
            summary.transitioned,
            summary.deferred,
            summary.failed,
            summary.skipped,
            summary.superseded,
            summary.unfinished
        );
        Ok(summary)
    }

    /// Explicit replay: `Failed -> TranscriptPending` with a clean slate.
    pub async fn replay(&self, id: &MeetingId) -> Result<ReplayOutcome, ReconcileError> {
        for _ in 0..MAX_CONFLICT_RETRIES {
            let Some(record) = self.ports.store.get(id).await? else {
                return Ok(ReplayOutcome::NotFound);
            };
            if record.lifecycle_state != LifecycleState::Failed {
                return Ok(ReplayOutcome::NotEligible);
            }
            let rearmed = record.rearm(self.runtime.clock.now());
            match self
                .ports
                .store
                .compare_and_swap(id, record.version, &rearmed)
                .await?
            {
                CasOutcome::Swapped { .. } => {
                    info!(meeting_id = %id, "Replay requested, record re-armed to transcript_pending");
                    return Ok(ReplayOutcome::Replayed);
                }
                CasOutcome::Conflict => continue,
            }
        }
        warn!(meeting_id = %id, "Replay gave up after {} version conflicts", MAX_CONFLICT_RETRIES);
        Ok(ReplayOutcome::Contended)
    }

    async fn advance_record(&self, record: MeetingRecord) -> Result<TransitionOutcome, ReconcileError> {
        let now = self.runtime.clock.now();
        match plan(&record, now) {
            Step::Skip(reason) => {
                debug!(meeting_id = %record.id, "Skipping: {}", reason.as_str());
                Ok(TransitionOutcome::Skipped)
            }
            Step::MarkTranscriptPending => {
                let Some(pending) = self
                    .commit(&record, |fresh| is_still_due(fresh, &record, now), |fresh| {
                        fresh.mark_transcript_pending(now)
                    })
                    .await?
                else {
                    return Ok(TransitionOutcome::Superseded);
                };
                match self.fetch_transcript(pending).await? {
                    TransitionOutcome::Superseded => Ok(TransitionOutcome::Transitioned),
                    outcome => Ok(outcome),
                }
            }
            Step::FetchTranscript => self.fetch_transcript(record).await,
            Step::Summarize => self.summarize(record).await,
        }
    }

    async fn fetch_transcript(&self, record: MeetingRecord) -> Result<TransitionOutcome, ReconcileError> {
        let fetched = self.ports.upstream.fetch_transcript(&record).await;
        let now = self.runtime.clock.now();
        let started = record.clone();
        let guard = move |fresh: &MeetingRecord| is_still_due(fresh, &started, now);

        let bytes = match fetched {
            Ok(TranscriptFetch::Ready(bytes)) => bytes,
            Ok(TranscriptFetch::NotReady) => {
                let settings = &self.settings;
                let written = self
                    .commit(&record, guard, |fresh| on_not_ready(fresh, now, settings))
                    .await?;
                return Ok(match written {
                    Some(next) => {
                        self.log_not_ready(&next);
                        classify(&record, &next)
                    }
                    None => TransitionOutcome::Superseded,
                });
            }
            Err(err) => return self.record_failure(&record, guard, err).await,
        };

        let path = artifacts::transcript_path(&record);
        let reference = match self.ports.artifacts.put(&path, &bytes).await {
            Ok(reference) => reference,
            Err(err) => return self.record_failure(&record, guard, err).await,
        };

        let written = self
            .commit(&record, guard, |fresh| {
                fresh.record_transcript(reference.clone(), now)
            })
            .await?;
        Ok(match written {
            Some(next) => {
                info!(
                    meeting_id = %next.id,
                    "transcript_pending -> transcript_fetched ({} bytes, {} earlier checks)",
                    bytes.len(),
                    next.attempt_count
                );
                TransitionOutcome::Transitioned
            }
            None => TransitionOutcome::Superseded,
        })
    }

    async fn summarize(&self, record: MeetingRecord) -> Result<TransitionOutcome, ReconcileError> {
        let now = self.runtime.clock.now();
        let lease = self.settings.summarize_lease;
        let Some(claimed) = self
            .commit(&record, |fresh| is_still_due(fresh, &record, now), |fresh| {
                fresh.claim_summarization(now, lease)
            })
            .await?
        else {
            return Ok(TransitionOutcome::Superseded);
        };
        debug!(meeting_id = %claimed.id, "Claimed for summarization");

        // Later writes only land while our lease is still the current one.
        let lease_mark = claimed.next_attempt_not_before;
        let lease_guard = move |fresh: &MeetingRecord| {
            fresh.lifecycle_state == LifecycleState::SummarizationPending
                && fresh.next_attempt_not_before == lease_mark
        };

        let notes = match self.generate_notes(&claimed).await {
            Ok(notes) => notes,
            Err(err) => return self.record_failure(&claimed, lease_guard, err).await,
        };

        let path = artifacts::notes_path(&claimed);
        let reference = match self
            .ports
            .artifacts
            .put(&path, notes.render().as_bytes())
            .await
        {
            Ok(reference) => reference,
            Err(err) => return self.record_failure(&claimed, lease_guard, err).await,
        };

        let done_at = self.runtime.clock.now();
        let written = self
            .commit(&claimed, lease_guard, |fresh| {
                fresh.complete(reference.clone(), done_at)
            })
            .await?;
        Ok(match written {
            Some(next) => {
                info!(
                    meeting_id = %next.id,
                    "{} -> completed ({} speakers)",
                    record.lifecycle_state,
                    notes.speaker_count
                );
                TransitionOutcome::Transitioned
            }
            None => TransitionOutcome::Superseded,
        })
    }

    async fn generate_notes(&self, claimed: &MeetingRecord) -> Result<MeetingNotes, CallError> {
        let Some(transcript_ref) = &claimed.transcript_ref else {
            return Err(CallError::permanent("record has no transcript reference"));
        };
        let bytes = self.ports.artifacts.get(transcript_ref).await?;
        let transcript = String::from_utf8_lossy(&bytes);
        let body = self.ports.summarizer.summarize(&transcript).await?;
        Ok(MeetingNotes::new(claimed, &transcript, body))
    }

    async fn record_failure<G>(
        &self,
        record: &MeetingRecord,
        guard: G,
        err: CallError,
    ) -> Result<TransitionOutcome, ReconcileError>
    where
        G: Fn(&MeetingRecord) -> bool,
    {
        let now = self.runtime.clock.now();
        let settings = &self.settings;
        let jitter = self.runtime.jitter.as_ref();
        let written = self
            .commit(record, guard, |fresh| {
                on_failure(fresh, &err, now, settings, jitter)
            })
            .await?;
        let Some(next) = written else {
            return Ok(TransitionOutcome::Superseded);
        };

        let outcome = classify(record, &next);
        if outcome == TransitionOutcome::Failed {
            warn!(
                meeting_id = %next.id,
                "{} -> failed: {}",
                record.lifecycle_state,
                next.last_error.as_deref().unwrap_or_default()
            );
        } else {
            debug!(
                meeting_id = %next.id,
                "Deferred after {} error (failure {} of {}): {}",
                err.class,
                next.failure_count(),
                settings.max_attempts,
                err.message
            );
        }
        Ok(outcome)
    }

    fn log_not_ready(&self, next: &MeetingRecord) {
        if next.lifecycle_state == LifecycleState::Failed {
            warn!(
                meeting_id = %next.id,
                "transcript_pending -> failed: {}",
                next.last_error.as_deref().unwrap_or_default()
            );
        } else if next.deferral_count >= self.settings.stale_pending_alert_checks {
            warn!(
                target: ALERT_TARGET,
                meeting_id = %next.id,
                "Transcript for '{}' still not available after {} checks",
                next.subject,
                next.deferral_count
            );
        } else {
            debug!(
                meeting_id = %next.id,
                "Transcript not ready (check {}), next at {:?}",
                next.deferral_count,
                next.next_attempt_not_before
            );
        }
    }

    /// Version-guarded write of `build(current)`.
    ///
    /// On conflict the record is re-read; while `still_applies` holds for the
    /// fresh copy the successor is rebuilt from it and written again. Returns
    /// the stored successor, or `None` when another writer got there first.
    async fn commit<G, B>(
        &self,
        record: &MeetingRecord,
        still_applies: G,
        build: B,
    ) -> Result<Option<MeetingRecord>, ReconcileError>
    where
        G: Fn(&MeetingRecord) -> bool,
        B: Fn(&MeetingRecord) -> MeetingRecord,
    {
        let mut current = record.clone();
        for _ in 0..MAX_CONFLICT_RETRIES {
            let next = build(&current);
            if !is_legal_write(&current, &next) {
                error!(
                    meeting_id = %current.id,
                    "Refusing illegal write {} -> {}",
                    current.lifecycle_state,
                    next.lifecycle_state
                );
                return Ok(None);
            }

            match self
                .ports
                .store
                .compare_and_swap(&current.id, current.version, &next)
                .await?
            {
                CasOutcome::Swapped { version } => {
                    return Ok(Some(MeetingRecord { version, ..next }));
                }
                CasOutcome::Conflict => {
                    debug!(meeting_id = %current.id, "Version conflict, re-reading");
                    match self.ports.store.get(&current.id).await? {
                        Some(fresh) if still_applies(&fresh) => current = fresh,
                        _ => return Ok(None),
                    }
                }
            }
        }
        Ok(None)
    }
}

/// A concurrent write is harmless to re-apply over only if the record still
/// sits in the state the attempt started from and nobody rescheduled it.
fn is_still_due(fresh: &MeetingRecord, started: &MeetingRecord, now: chrono::DateTime<chrono::Utc>) -> bool {
    fresh.lifecycle_state == started.lifecycle_state && fresh.is_due(now)
}
