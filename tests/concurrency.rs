mod common;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{ended, FakeUpstream, Harness};
use scribeline::db::{CasOutcome, MeetingFilter, MetadataStore, SqliteMetadataStore, StateCount};
use scribeline::engine::{
    EnginePorts, EngineSettings, ReconciliationEngine, ReplayOutcome, Scope,
};
use scribeline::error::{CallError, StoreError};
use scribeline::model::{
    HostUser, LifecycleState, MeetingDescriptor, MeetingId, MeetingRecord, SubscriptionRecord,
};
use scribeline::upstream::{RenewedSubscription, TimeRange, TranscriptFetch, UpstreamClient};
use tokio::sync::{Barrier, Notify};

#[tokio::test]
async fn concurrent_advances_transition_once() {
    let h = Harness::new();
    let meeting = ended("m-1");
    let pending = MeetingRecord::discovered(&meeting, h.now()).mark_transcript_pending(h.now());
    h.store.upsert_if_absent(&pending).await.unwrap();
    h.upstream
        .script_transcript("m-1", vec![FakeUpstream::ready(), FakeUpstream::ready()]);
    // Both passes must have read the record before either writes.
    *h.upstream.fetch_barrier.lock().unwrap() = Some(Arc::new(Barrier::new(2)));

    let (a, b) = tokio::join!(h.engine.advance(Scope::All), h.engine.advance(Scope::All));
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.transitioned + b.transitioned, 1);
    assert_eq!(a.superseded + b.superseded, 1);
    assert_eq!(h.upstream.fetches(), 2);

    let record = h.store.get(&meeting.id()).await.unwrap().unwrap();
    assert_eq!(record.lifecycle_state, LifecycleState::TranscriptFetched);
    assert_eq!(record.version, 1);

    // The loser's write went to the same path: one artifact, two writes.
    assert_eq!(h.puts(), 2);
    let dir = h
        .artifact_root()
        .join(record.transcript_ref.unwrap().as_str())
        .parent()
        .unwrap()
        .to_path_buf();
    assert_eq!(std::fs::read_dir(dir).unwrap().count(), 1);
}

#[tokio::test]
async fn summarization_lease_keeps_overlapping_passes_out() {
    let h = Harness::new();
    let meeting = ended("m-2");
    h.upstream.script_transcript("m-2", vec![FakeUpstream::ready()]);
    h.engine.discover(&[meeting.clone()]).await.unwrap();
    h.engine.advance(Scope::All).await.unwrap();

    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    *h.summarizer.gate.lock().unwrap() = Some((entered.clone(), release.clone()));

    let engine = h.engine.clone();
    let first = tokio::spawn(async move { engine.advance(Scope::All).await });
    entered.notified().await;

    // The first pass holds the claim; an overlapping pass must not summarize.
    let overlapping = h.engine.advance(Scope::All).await.unwrap();
    assert_eq!(overlapping.skipped, 1);
    let claimed = h.store.get(&meeting.id()).await.unwrap().unwrap();
    assert_eq!(claimed.lifecycle_state, LifecycleState::SummarizationPending);

    release.notify_one();
    let summary = first.await.unwrap().unwrap();
    assert_eq!(summary.transitioned, 1);
    assert_eq!(h.summarizer.count(), 1);

    let done = h.store.get(&meeting.id()).await.unwrap().unwrap();
    assert_eq!(done.lifecycle_state, LifecycleState::Completed);
}

#[tokio::test]
async fn stale_write_is_rejected_by_version() {
    let h = Harness::new();
    let meeting = ended("m-3");
    h.engine.discover(&[meeting.clone()]).await.unwrap();
    let read_a = h.store.get(&meeting.id()).await.unwrap().unwrap();
    let read_b = read_a.clone();

    let now = h.now();
    let outcome = h
        .store
        .compare_and_swap(&read_a.id, read_a.version, &read_a.mark_transcript_pending(now))
        .await
        .unwrap();
    assert_eq!(outcome, CasOutcome::Swapped { version: 1 });

    let stale = h
        .store
        .compare_and_swap(&read_b.id, read_b.version, &read_b.fail(now, "late writer"))
        .await
        .unwrap();
    assert_eq!(stale, CasOutcome::Conflict);
    let stored = h.store.get(&meeting.id()).await.unwrap().unwrap();
    assert_eq!(stored.lifecycle_state, LifecycleState::TranscriptPending);
}

/// Upstream whose transcript fetch never finishes.
struct HangingUpstream;

#[async_trait]
impl UpstreamClient for HangingUpstream {
    async fn list_meetings(&self, _range: TimeRange) -> Result<Vec<MeetingDescriptor>, CallError> {
        Ok(Vec::new())
    }

    async fn fetch_transcript(&self, _meeting: &MeetingRecord) -> Result<TranscriptFetch, CallError> {
        tokio::time::sleep(StdDuration::from_secs(3600)).await;
        Ok(TranscriptFetch::NotReady)
    }

    async fn renew_subscription(
        &self,
        _subscription: &SubscriptionRecord,
        requested_expiry: DateTime<Utc>,
    ) -> Result<RenewedSubscription, CallError> {
        Ok(RenewedSubscription {
            upstream_ref: "sub".to_string(),
            expires_at: requested_expiry,
        })
    }

    async fn resolve_event(
        &self,
        _user_id: &str,
        _event_id: &str,
    ) -> Result<Option<MeetingDescriptor>, CallError> {
        Ok(None)
    }

    async fn list_hosts(&self) -> Result<Vec<HostUser>, CallError> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn work_past_the_budget_is_left_for_the_next_pass() {
    let h = Harness::new();
    let settings = EngineSettings {
        invocation_budget: StdDuration::from_millis(100),
        max_concurrency: 2,
        ..EngineSettings::default()
    };
    let engine = ReconciliationEngine::new(
        EnginePorts {
            store: Arc::new(h.store.clone()),
            artifacts: h.artifacts.clone(),
            upstream: Arc::new(HangingUpstream),
            summarizer: h.summarizer.clone(),
        },
        h.runtime.clone(),
        settings,
    );

    let now = h.now();
    let meetings = [ended("m-a"), ended("m-b"), ended("m-c")];
    for meeting in &meetings {
        let pending = MeetingRecord::discovered(meeting, now).mark_transcript_pending(now);
        h.store.upsert_if_absent(&pending).await.unwrap();
    }

    let summary = engine.advance(Scope::All).await.unwrap();
    assert_eq!(summary.unfinished, 3);
    assert_eq!(summary.total(), 3);

    // Nothing partial was persisted.
    for meeting in &meetings {
        let record = h.store.get(&meeting.id()).await.unwrap().unwrap();
        assert_eq!(record.version, 0);
        assert_eq!(record.attempt_count, 0);
    }
}

/// Store where some other writer always wins the meeting version race.
struct ContendedStore(SqliteMetadataStore);

#[async_trait]
impl MetadataStore for ContendedStore {
    async fn get(&self, id: &MeetingId) -> Result<Option<MeetingRecord>, StoreError> {
        self.0.get(id).await
    }

    async fn upsert_if_absent(&self, record: &MeetingRecord) -> Result<bool, StoreError> {
        self.0.upsert_if_absent(record).await
    }

    async fn compare_and_swap(
        &self,
        _id: &MeetingId,
        _expected_version: i64,
        _record: &MeetingRecord,
    ) -> Result<CasOutcome, StoreError> {
        Ok(CasOutcome::Conflict)
    }

    async fn list_actionable(&self) -> Result<Vec<MeetingRecord>, StoreError> {
        self.0.list_actionable().await
    }

    async fn list_meetings(&self, filter: &MeetingFilter) -> Result<Vec<MeetingRecord>, StoreError> {
        self.0.list_meetings(filter).await
    }

    async fn count_by_state(&self) -> Result<Vec<StateCount>, StoreError> {
        self.0.count_by_state().await
    }

    async fn get_subscription(
        &self,
        resource_scope: &str,
    ) -> Result<Option<SubscriptionRecord>, StoreError> {
        self.0.get_subscription(resource_scope).await
    }

    async fn insert_subscription_if_absent(
        &self,
        record: &SubscriptionRecord,
    ) -> Result<bool, StoreError> {
        self.0.insert_subscription_if_absent(record).await
    }

    async fn compare_and_swap_subscription(
        &self,
        resource_scope: &str,
        expected_version: i64,
        record: &SubscriptionRecord,
    ) -> Result<CasOutcome, StoreError> {
        self.0
            .compare_and_swap_subscription(resource_scope, expected_version, record)
            .await
    }

    async fn list_subscriptions(&self) -> Result<Vec<SubscriptionRecord>, StoreError> {
        self.0.list_subscriptions().await
    }
}

#[tokio::test]
async fn replay_that_keeps_losing_races_is_contended_not_ineligible() {
    let h = Harness::new();
    let meeting = ended("m-9");
    let now = h.now();
    let failed = MeetingRecord::discovered(&meeting, now)
        .mark_transcript_pending(now)
        .fail(now, "HTTP 404: meeting not found");
    h.store.upsert_if_absent(&failed).await.unwrap();

    let engine = ReconciliationEngine::new(
        EnginePorts {
            store: Arc::new(ContendedStore(h.store.clone())),
            artifacts: h.artifacts.clone(),
            upstream: h.upstream.clone(),
            summarizer: h.summarizer.clone(),
        },
        h.runtime.clone(),
        EngineSettings::default(),
    );

    assert_eq!(
        engine.replay(&meeting.id()).await.unwrap(),
        ReplayOutcome::Contended
    );
    let stored = h.store.get(&meeting.id()).await.unwrap().unwrap();
    assert_eq!(stored.lifecycle_state, LifecycleState::Failed);

    // Without contention the same record replays.
    assert_eq!(
        h.engine.replay(&meeting.id()).await.unwrap(),
        ReplayOutcome::Replayed
    );
}
