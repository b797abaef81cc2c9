//! Scripted collaborators and a wired engine for integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use scribeline::artifacts::{ArtifactStore, FsArtifactStore};
use scribeline::db::SqliteMetadataStore;
use scribeline::engine::{
    EnginePorts, EngineRuntime, EngineSettings, FixedJitter, ManualClock, ReconciliationEngine,
};
use scribeline::error::CallError;
use scribeline::model::{
    ArtifactRef, HostUser, MeetingDescriptor, MeetingRecord, SubscriptionRecord,
};
use scribeline::summarizer::Summarizer;
use scribeline::upstream::{RenewedSubscription, TimeRange, TranscriptFetch, UpstreamClient};
use tempfile::TempDir;
use tokio::sync::{Barrier, Notify};

pub const TRANSCRIPT: &str = "WEBVTT\n\n00:00:01.000 --> 00:00:04.000\n<v Ann Lee>Let's ship it.</v>\n\n00:00:05.000 --> 00:00:07.000\n<v Bo Chen>Agreed, I'll write the release notes.</v>\n";

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap()
}

pub fn descriptor(meeting: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> MeetingDescriptor {
    MeetingDescriptor {
        organizer_id: "org-1".to_string(),
        organizer_email: Some("ann@corp.example".to_string()),
        upstream_meeting_id: meeting.to_string(),
        subject: format!("Sync {meeting}"),
        start_time: start,
        end_time: end,
        join_url: Some(format!("https://teams.example/join/{meeting}")),
        series_id: None,
        is_recurring_parent: false,
    }
}

/// A meeting that ended an hour before `t0()`.
pub fn ended(meeting: &str) -> MeetingDescriptor {
    descriptor(meeting, t0() - Duration::hours(2), t0() - Duration::hours(1))
}

#[derive(Default)]
pub struct FakeUpstream {
    pub listed: Mutex<Vec<MeetingDescriptor>>,
    pub list_error: Mutex<Option<CallError>>,
    /// Per upstream meeting id; an exhausted script answers `NotReady`.
    pub transcripts: Mutex<HashMap<String, VecDeque<Result<TranscriptFetch, CallError>>>>,
    pub fetch_calls: AtomicUsize,
    /// When set, every fetch waits here before answering.
    pub fetch_barrier: Mutex<Option<Arc<Barrier>>>,
    pub renew_failures: Mutex<VecDeque<CallError>>,
    pub renew_calls: AtomicUsize,
    /// When set, every renewal call moves this clock forward.
    pub renew_latency: Mutex<Option<(Arc<ManualClock>, Duration)>>,
    pub events: Mutex<HashMap<(String, String), MeetingDescriptor>>,
    pub resolve_calls: AtomicUsize,
    pub hosts: Mutex<Vec<HostUser>>,
}

impl FakeUpstream {
    pub fn script_transcript(&self, meeting: &str, answers: Vec<Result<TranscriptFetch, CallError>>) {
        self.transcripts
            .lock()
            .unwrap()
            .insert(meeting.to_string(), answers.into());
    }

    pub fn ready() -> Result<TranscriptFetch, CallError> {
        Ok(TranscriptFetch::Ready(TRANSCRIPT.as_bytes().to_vec()))
    }

    pub fn not_ready() -> Result<TranscriptFetch, CallError> {
        Ok(TranscriptFetch::NotReady)
    }

    pub fn fetches(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UpstreamClient for FakeUpstream {
    async fn list_meetings(&self, range: TimeRange) -> Result<Vec<MeetingDescriptor>, CallError> {
        if let Some(err) = self.list_error.lock().unwrap().clone() {
            return Err(err);
        }
        Ok(self
            .listed
            .lock()
            .unwrap()
            .iter()
            .filter(|d| d.start_time >= range.start && d.start_time <= range.end)
            .cloned()
            .collect())
    }

    async fn fetch_transcript(&self, meeting: &MeetingRecord) -> Result<TranscriptFetch, CallError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let barrier = self.fetch_barrier.lock().unwrap().clone();
        if let Some(barrier) = barrier {
            barrier.wait().await;
        }
        let answer = self
            .transcripts
            .lock()
            .unwrap()
            .get_mut(&meeting.upstream_meeting_id)
            .and_then(|script| script.pop_front());
        answer.unwrap_or(Ok(TranscriptFetch::NotReady))
    }

    async fn renew_subscription(
        &self,
        subscription: &SubscriptionRecord,
        requested_expiry: DateTime<Utc>,
    ) -> Result<RenewedSubscription, CallError> {
        self.renew_calls.fetch_add(1, Ordering::SeqCst);
        if let Some((clock, latency)) = self.renew_latency.lock().unwrap().as_ref() {
            clock.advance(*latency);
        }
        if let Some(err) = self.renew_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(RenewedSubscription {
            upstream_ref: subscription
                .upstream_ref
                .clone()
                .unwrap_or_else(|| format!("sub-{}", subscription.resource_scope)),
            expires_at: requested_expiry,
        })
    }

    async fn resolve_event(
        &self,
        user_id: &str,
        event_id: &str,
    ) -> Result<Option<MeetingDescriptor>, CallError> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .events
            .lock()
            .unwrap()
            .get(&(user_id.to_string(), event_id.to_string()))
            .cloned())
    }

    async fn list_hosts(&self) -> Result<Vec<HostUser>, CallError> {
        Ok(self.hosts.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub struct FakeSummarizer {
    /// An exhausted script answers with fixed notes.
    pub answers: Mutex<VecDeque<Result<String, CallError>>>,
    pub calls: AtomicUsize,
    /// When set, `entered` is signalled and the call waits for `release`.
    pub gate: Mutex<Option<(Arc<Notify>, Arc<Notify>)>>,
}

impl FakeSummarizer {
    pub fn script(&self, answers: Vec<Result<String, CallError>>) {
        *self.answers.lock().unwrap() = answers.into();
    }

    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Summarizer for FakeSummarizer {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn summarize(&self, transcript: &str) -> Result<String, CallError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().clone();
        if let Some((entered, release)) = gate {
            entered.notify_one();
            release.notified().await;
        }
        let answer = self.answers.lock().unwrap().pop_front();
        answer.unwrap_or_else(|| {
            Ok(format!(
                "## Topics\n- Release plan (owner: Ann Lee)\n\n## Follow-ups\n- Release notes: Bo Chen\n\n<!-- {} bytes -->",
                transcript.len()
            ))
        })
    }
}

/// Filesystem artifacts that count writes.
pub struct CountingArtifacts {
    pub inner: FsArtifactStore,
    pub puts: AtomicUsize,
}

#[async_trait]
impl ArtifactStore for CountingArtifacts {
    async fn put(&self, path: &str, bytes: &[u8]) -> Result<ArtifactRef, CallError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put(path, bytes).await
    }

    async fn get(&self, artifact: &ArtifactRef) -> Result<Vec<u8>, CallError> {
        self.inner.get(artifact).await
    }
}

pub struct Harness {
    pub engine: ReconciliationEngine,
    pub store: SqliteMetadataStore,
    pub upstream: Arc<FakeUpstream>,
    pub summarizer: Arc<FakeSummarizer>,
    pub artifacts: Arc<CountingArtifacts>,
    pub clock: Arc<ManualClock>,
    pub runtime: EngineRuntime,
    pub dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(EngineSettings::default())
    }

    pub fn with_settings(settings: EngineSettings) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteMetadataStore::open_in_memory().unwrap();
        let upstream = Arc::new(FakeUpstream::default());
        let summarizer = Arc::new(FakeSummarizer::default());
        let artifacts = Arc::new(CountingArtifacts {
            inner: FsArtifactStore::new(dir.path().join("artifacts")),
            puts: AtomicUsize::new(0),
        });
        let clock = Arc::new(ManualClock::new(t0()));
        let runtime = EngineRuntime {
            clock: clock.clone(),
            jitter: Arc::new(FixedJitter::none()),
        };
        let engine = ReconciliationEngine::new(
            EnginePorts {
                store: Arc::new(store.clone()),
                artifacts: artifacts.clone(),
                upstream: upstream.clone(),
                summarizer: summarizer.clone(),
            },
            runtime.clone(),
            settings,
        );
        Self {
            engine,
            store,
            upstream,
            summarizer,
            artifacts,
            clock,
            runtime,
            dir,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        use scribeline::engine::Clock;
        self.clock.now()
    }

    pub fn artifact_root(&self) -> std::path::PathBuf {
        self.dir.path().join("artifacts")
    }

    pub fn puts(&self) -> usize {
        self.artifacts.puts.load(Ordering::SeqCst)
    }
}
