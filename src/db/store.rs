use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::Connection;

use super::meetings::MeetingRepository;
use super::subscriptions::SubscriptionRepository;
use super::{CasOutcome, MeetingFilter, MetadataStore, StateCount};
use crate::error::StoreError;
use crate::model::{LifecycleState, MeetingId, MeetingRecord, SubscriptionRecord};

/// [`MetadataStore`] backed by one SQLite connection.
///
/// Queries run on the blocking pool. Other processes (CLI, a second service)
/// may share the file; the version guard keeps their writes consistent.
#[derive(Clone)]
pub struct SqliteMetadataStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteMetadataStore {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = super::init::open_db(path)?;
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        super::init::migrate(&conn)?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| StoreError::Unavailable("connection lock poisoned".to_string()))?;
            f(&guard).map_err(StoreError::from)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("store task failed: {e}")))?
    }
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn get(&self, id: &MeetingId) -> Result<Option<MeetingRecord>, StoreError> {
        let id = id.clone();
        self.with_conn(move |conn| MeetingRepository::get(conn, &id))
            .await
    }

    async fn upsert_if_absent(&self, record: &MeetingRecord) -> Result<bool, StoreError> {
        let record = record.clone();
        self.with_conn(move |conn| MeetingRepository::insert_if_absent(conn, &record))
            .await
    }

    async fn compare_and_swap(
        &self,
        id: &MeetingId,
        expected_version: i64,
        record: &MeetingRecord,
    ) -> Result<CasOutcome, StoreError> {
        let id = id.clone();
        let record = record.clone();
        self.with_conn(move |conn| {
            MeetingRepository::compare_and_swap(conn, &id, expected_version, &record)
        })
        .await
        .map(CasOutcome::from_swap)
    }

    async fn list_actionable(&self) -> Result<Vec<MeetingRecord>, StoreError> {
        self.with_conn(MeetingRepository::list_actionable).await
    }

    async fn list_meetings(&self, filter: &MeetingFilter) -> Result<Vec<MeetingRecord>, StoreError> {
        let state = filter.state;
        let limit = filter.effective_limit();
        self.with_conn(move |conn| MeetingRepository::list(conn, state, limit))
            .await
    }

    async fn count_by_state(&self) -> Result<Vec<StateCount>, StoreError> {
        let rows = self.with_conn(MeetingRepository::count_by_state).await?;
        rows.into_iter()
            .map(|(state, count)| {
                LifecycleState::parse(&state)
                    .map(|state| StateCount { state, count })
                    .map_err(|e| StoreError::Corrupt(e.to_string()))
            })
            .collect()
    }

    async fn get_subscription(
        &self,
        resource_scope: &str,
    ) -> Result<Option<SubscriptionRecord>, StoreError> {
        let scope = resource_scope.to_string();
        self.with_conn(move |conn| SubscriptionRepository::get(conn, &scope))
            .await
    }

    async fn insert_subscription_if_absent(
        &self,
        record: &SubscriptionRecord,
    ) -> Result<bool, StoreError> {
        let record = record.clone();
        self.with_conn(move |conn| SubscriptionRepository::insert_if_absent(conn, &record))
            .await
    }

    async fn compare_and_swap_subscription(
        &self,
        resource_scope: &str,
        expected_version: i64,
        record: &SubscriptionRecord,
    ) -> Result<CasOutcome, StoreError> {
        let scope = resource_scope.to_string();
        let record = record.clone();
        self.with_conn(move |conn| {
            SubscriptionRepository::compare_and_swap(conn, &scope, expected_version, &record)
        })
        .await
        .map(CasOutcome::from_swap)
    }

    async fn list_subscriptions(&self) -> Result<Vec<SubscriptionRecord>, StoreError> {
        self.with_conn(SubscriptionRepository::list).await
    }
}
