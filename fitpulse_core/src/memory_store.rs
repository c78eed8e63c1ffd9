//! In-memory [`RecordStore`] used by tests and local development.
//!
//! Supports fault injection: queued errors are returned by the next store
//! calls before normal behaviour resumes, which is how the retry and queue
//! tests simulate flaky networks and rate limits.

use crate::store::{PageRequest, RecordStore, WorkoutPage};
use crate::{AccountStatus, AggregateSnapshot, StoreError, StoreResult, WorkoutRecord};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use uuid::Uuid;

struct Inner {
    /// Insertion-ordered record log. May contain duplicate ids on purpose:
    /// a retried write that partially succeeded leaves duplicates in the
    /// real store too, and reconciliation must tolerate them.
    workouts: Vec<WorkoutRecord>,
    aggregate: Option<AggregateSnapshot>,
    account: AccountStatus,
    fail_queue: VecDeque<StoreError>,
    calls: u64,
}

/// In-memory record store with fault injection
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                workouts: Vec::new(),
                aggregate: None,
                account: AccountStatus::Available,
                fail_queue: VecDeque::new(),
                calls: 0,
            }),
        }
    }

    /// Queue an error to be returned by the next store call
    pub fn fail_next(&self, error: StoreError) {
        self.inner.lock().unwrap().fail_queue.push_back(error);
    }

    /// Queue the same error for the next `n` store calls
    pub fn fail_next_n(&self, n: usize, error: StoreError) {
        let mut inner = self.inner.lock().unwrap();
        for _ in 0..n {
            inner.fail_queue.push_back(error.clone());
        }
    }

    /// Insert a record without going through `save_workout`, simulating a
    /// write from another device or a duplicate left by a partial retry
    pub fn insert_out_of_band(&self, record: WorkoutRecord) {
        self.inner.lock().unwrap().workouts.push(record);
    }

    /// Drop every workout record (simulates the bulk-delete flow)
    pub fn clear_workouts(&self) {
        self.inner.lock().unwrap().workouts.clear();
    }

    pub fn set_account_status(&self, status: AccountStatus) {
        self.inner.lock().unwrap().account = status;
    }

    /// The durable aggregate as last written, for assertions
    pub fn saved_aggregate(&self) -> Option<AggregateSnapshot> {
        self.inner.lock().unwrap().aggregate.clone()
    }

    pub fn record_count(&self) -> usize {
        self.inner.lock().unwrap().workouts.len()
    }

    /// Total store calls observed (diagnostic for attempt-count assertions)
    pub fn call_count(&self) -> u64 {
        self.inner.lock().unwrap().calls
    }

    fn check(&self) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls += 1;
        match inner.fail_queue.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn save_workout(&self, record: &WorkoutRecord) -> StoreResult<WorkoutRecord> {
        self.check()?;
        let mut inner = self.inner.lock().unwrap();
        // Saves are idempotent by id so a retried write cannot double-count
        if !inner.workouts.iter().any(|r| r.id == record.id) {
            inner.workouts.push(record.clone());
        }
        Ok(record.clone())
    }

    async fn fetch_workout(&self, id: Uuid) -> StoreResult<WorkoutRecord> {
        self.check()?;
        let inner = self.inner.lock().unwrap();
        inner
            .workouts
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| StoreError::not_found(format!("workout {}", id)))
    }

    async fn query_workouts(&self, page: PageRequest) -> StoreResult<WorkoutPage> {
        self.check()?;
        let inner = self.inner.lock().unwrap();

        let offset = match page.cursor.as_deref() {
            Some(cursor) => cursor.parse::<usize>().map_err(|_| {
                StoreError::new(
                    crate::StoreErrorKind::BadRequest,
                    format!("malformed cursor '{}'", cursor),
                )
            })?,
            None => 0,
        };

        let end = (offset + page.limit).min(inner.workouts.len());
        let records = inner.workouts[offset.min(end)..end].to_vec();
        let next_cursor = if end < inner.workouts.len() {
            Some(end.to_string())
        } else {
            None
        };

        Ok(WorkoutPage {
            records,
            next_cursor,
        })
    }

    async fn delete_workout(&self, id: Uuid) -> StoreResult<()> {
        self.check()?;
        let mut inner = self.inner.lock().unwrap();
        let before = inner.workouts.len();
        inner.workouts.retain(|r| r.id != id);
        if inner.workouts.len() == before {
            return Err(StoreError::not_found(format!("workout {}", id)));
        }
        Ok(())
    }

    async fn load_aggregate(&self) -> StoreResult<Option<AggregateSnapshot>> {
        self.check()?;
        Ok(self.inner.lock().unwrap().aggregate.clone())
    }

    async fn save_aggregate(&self, snapshot: &AggregateSnapshot) -> StoreResult<()> {
        self.check()?;
        self.inner.lock().unwrap().aggregate = Some(snapshot.clone());
        Ok(())
    }

    async fn account_status(&self) -> StoreResult<AccountStatus> {
        self.check()?;
        Ok(self.inner.lock().unwrap().account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StoreErrorKind;
    use chrono::Utc;

    fn test_record() -> WorkoutRecord {
        WorkoutRecord {
            id: Uuid::new_v4(),
            workout_type: crate::WorkoutType::Run,
            started_at: Utc::now() - chrono::Duration::minutes(20),
            ended_at: Utc::now(),
            duration_seconds: 1200,
            energy_burned_kcal: 180.0,
            distance_meters: Some(3200.0),
            avg_heart_rate: Some(152),
            xp_earned: Some(30),
            source: crate::RecordSource::Watch,
        }
    }

    #[tokio::test]
    async fn test_save_and_fetch() {
        let store = MemoryStore::new();
        let record = test_record();

        store.save_workout(&record).await.unwrap();
        let fetched = store.fetch_workout(record.id).await.unwrap();
        assert_eq!(fetched.id, record.id);
    }

    #[tokio::test]
    async fn test_save_is_idempotent_by_id() {
        let store = MemoryStore::new();
        let record = test_record();

        store.save_workout(&record).await.unwrap();
        store.save_workout(&record).await.unwrap();
        assert_eq!(store.record_count(), 1);
    }

    #[tokio::test]
    async fn test_pagination_walks_all_records() {
        let store = MemoryStore::new();
        for _ in 0..7 {
            store.save_workout(&test_record()).await.unwrap();
        }

        let mut seen = 0;
        let mut cursor = None;
        loop {
            let page = store
                .query_workouts(PageRequest {
                    limit: 3,
                    cursor: cursor.clone(),
                })
                .await
                .unwrap();
            seen += page.records.len();
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        assert_eq!(seen, 7);
    }

    #[tokio::test]
    async fn test_fault_injection_order() {
        let store = MemoryStore::new();
        store.fail_next(StoreError::new(StoreErrorKind::NetworkFailure, "boom"));

        let err = store.load_aggregate().await.unwrap_err();
        assert_eq!(err.kind, StoreErrorKind::NetworkFailure);

        // Next call succeeds
        assert!(store.load_aggregate().await.is_ok());
    }
}
