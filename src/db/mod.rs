//! Durable lifecycle state.
//!
//! The engine only talks to [`MetadataStore`]; `SqliteMetadataStore` is the
//! production implementation on top of the raw-SQL repositories.

pub mod init;
pub mod meetings;
pub mod schemas;
pub mod store;
pub mod subscriptions;


use async_trait::async_trait;
use serde::Serialize;

use crate::error::StoreError;
use crate::model::{LifecycleState, MeetingId, MeetingRecord, SubscriptionRecord};

pub use init::{migrate, open_db};
pub use store::SqliteMetadataStore;

/// Result of a version-guarded write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// Written; the stored record now carries `version`.
    Swapped { version: i64 },
    /// Stored version differed from the expected one. Nothing was written.
    Conflict,
}

impl CasOutcome {
    fn from_swap(result: Option<i64>) -> Self {
        match result {
            Some(version) => Self::Swapped { version },
            None => Self::Conflict,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MeetingFilter {
    pub state: Option<LifecycleState>,
    pub limit: Option<usize>,
}

impl MeetingFilter {
    pub const DEFAULT_LIMIT: usize = 50;

    pub fn effective_limit(&self) -> usize {
        self.limit.unwrap_or(Self::DEFAULT_LIMIT)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StateCount {
    pub state: LifecycleState,
    pub count: i64,
}

#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn get(&self, id: &MeetingId) -> Result<Option<MeetingRecord>, StoreError>;

    /// Insert unless the id exists. `Ok(false)` means it already did.
    async fn upsert_if_absent(&self, record: &MeetingRecord) -> Result<bool, StoreError>;

    async fn compare_and_swap(
        &self,
        id: &MeetingId,
        expected_version: i64,
        record: &MeetingRecord,
    ) -> Result<CasOutcome, StoreError>;

    /// Non-terminal records, oldest meeting first.
    async fn list_actionable(&self) -> Result<Vec<MeetingRecord>, StoreError>;

    async fn list_meetings(&self, filter: &MeetingFilter) -> Result<Vec<MeetingRecord>, StoreError>;

    async fn count_by_state(&self) -> Result<Vec<StateCount>, StoreError>;

    async fn get_subscription(
        &self,
        resource_scope: &str,
    ) -> Result<Option<SubscriptionRecord>, StoreError>;

    async fn insert_subscription_if_absent(
        &self,
        record: &SubscriptionRecord,
    ) -> Result<bool, StoreError>;

    async fn compare_and_swap_subscription(
        &self,
        resource_scope: &str,
        expected_version: i64,
        record: &SubscriptionRecord,
    ) -> Result<CasOutcome, StoreError>;

    async fn list_subscriptions(&self) -> Result<Vec<SubscriptionRecord>, StoreError>;
}
