//! Remote record store interface.
//!
//! The sync engine never talks to the network directly; it consumes this
//! trait. Production wires in a client for the hosted record database, the
//! CLI wires in [`crate::jsonl_store::JsonlStore`], and tests use
//! [`crate::memory_store::MemoryStore`] with injected failures.

use crate::{AccountStatus, AggregateSnapshot, StoreResult, WorkoutRecord};
use async_trait::async_trait;
use uuid::Uuid;

/// Cursor-based page request for workout queries
#[derive(Clone, Debug)]
pub struct PageRequest {
    /// Maximum records to return
    pub limit: usize,
    /// Opaque continuation token from the previous page, if any
    pub cursor: Option<String>,
}

impl PageRequest {
    pub fn first(limit: usize) -> Self {
        Self {
            limit,
            cursor: None,
        }
    }

    pub fn next(limit: usize, cursor: String) -> Self {
        Self {
            limit,
            cursor: Some(cursor),
        }
    }
}

/// One page of workout records
#[derive(Clone, Debug)]
pub struct WorkoutPage {
    pub records: Vec<WorkoutRecord>,
    /// Present when more records remain
    pub next_cursor: Option<String>,
}

/// Typed access to the authoritative, eventually-consistent record store.
///
/// Every method surfaces [`crate::StoreError`] with a retryability
/// classification; callers compose retry behaviour on top, they never get it
/// from the store itself.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Persist a new workout record; returns the stored record
    async fn save_workout(&self, record: &WorkoutRecord) -> StoreResult<WorkoutRecord>;

    /// Fetch a single workout by id
    async fn fetch_workout(&self, id: Uuid) -> StoreResult<WorkoutRecord>;

    /// Page through the user's workout records in stable order
    async fn query_workouts(&self, page: PageRequest) -> StoreResult<WorkoutPage>;

    /// Delete a workout record (account-deletion flow only)
    async fn delete_workout(&self, id: Uuid) -> StoreResult<()>;

    /// Load the durable aggregate record, if one has been written
    async fn load_aggregate(&self) -> StoreResult<Option<AggregateSnapshot>>;

    /// Overwrite the durable aggregate record
    async fn save_aggregate(&self, snapshot: &AggregateSnapshot) -> StoreResult<()>;

    /// Current remote account availability
    async fn account_status(&self) -> StoreResult<AccountStatus>;
}
