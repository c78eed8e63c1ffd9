//! Remote client: the explicit composition of queue and retry.
//!
//! Every store call is wrapped in the retry executor *before* admission to
//! the operation queue, so there is exactly one place where rate limiting and
//! backoff compose. The queue's own rate-limit pause on a surfaced error is
//! defense in depth on top of the executor's backoff, not a substitute.

use crate::queue::{OperationQueue, QueueStats};
use crate::retry::{RetryConfig, RetryExecutor, RetryMetrics};
use crate::store::{PageRequest, RecordStore, WorkoutPage};
use crate::{AccountStatus, AggregateSnapshot, Priority, StoreResult, WorkoutRecord};
use std::sync::Arc;
use uuid::Uuid;

/// Scheduled, retried access to the remote record store
pub struct RemoteClient {
    store: Arc<dyn RecordStore>,
    queue: Arc<OperationQueue>,
    retry: Arc<RetryExecutor>,
    retry_config: RetryConfig,
}

impl RemoteClient {
    pub fn new(
        store: Arc<dyn RecordStore>,
        queue: Arc<OperationQueue>,
        retry_config: RetryConfig,
    ) -> Self {
        Self {
            store,
            queue,
            retry: Arc::new(RetryExecutor::new()),
            retry_config,
        }
    }

    /// Queue statistics for diagnostics
    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    /// Retry executor metrics for diagnostics
    pub fn retry_metrics(&self) -> RetryMetrics {
        self.retry.metrics()
    }

    pub async fn save_workout(
        &self,
        record: &WorkoutRecord,
        priority: Priority,
    ) -> StoreResult<WorkoutRecord> {
        let description = format!("save_workout {}", record.id);
        let store = self.store.clone();
        let retry = self.retry.clone();
        let config = self.retry_config.clone();
        let record = record.clone();

        self.queue
            .submit(priority, description, move || async move {
                retry
                    .execute("save_workout", &config, || {
                        let store = store.clone();
                        let record = record.clone();
                        async move { store.save_workout(&record).await }
                    })
                    .await
            })
            .await
    }

    pub async fn fetch_workout(&self, id: Uuid, priority: Priority) -> StoreResult<WorkoutRecord> {
        let store = self.store.clone();
        let retry = self.retry.clone();
        let config = self.retry_config.clone();

        self.queue
            .submit(priority, format!("fetch_workout {}", id), move || async move {
                retry
                    .execute("fetch_workout", &config, || {
                        let store = store.clone();
                        async move { store.fetch_workout(id).await }
                    })
                    .await
            })
            .await
    }

    pub async fn query_workouts(
        &self,
        page: PageRequest,
        priority: Priority,
    ) -> StoreResult<WorkoutPage> {
        let store = self.store.clone();
        let retry = self.retry.clone();
        let config = self.retry_config.clone();

        self.queue
            .submit(priority, "query_workouts", move || async move {
                retry
                    .execute("query_workouts", &config, || {
                        let store = store.clone();
                        let page = page.clone();
                        async move { store.query_workouts(page).await }
                    })
                    .await
            })
            .await
    }

    pub async fn delete_workout(&self, id: Uuid, priority: Priority) -> StoreResult<()> {
        let store = self.store.clone();
        let retry = self.retry.clone();
        let config = self.retry_config.clone();

        self.queue
            .submit(priority, format!("delete_workout {}", id), move || async move {
                retry
                    .execute("delete_workout", &config, || {
                        let store = store.clone();
                        async move { store.delete_workout(id).await }
                    })
                    .await
            })
            .await
    }

    pub async fn load_aggregate(
        &self,
        priority: Priority,
    ) -> StoreResult<Option<AggregateSnapshot>> {
        let store = self.store.clone();
        let retry = self.retry.clone();
        let config = self.retry_config.clone();

        self.queue
            .submit(priority, "load_aggregate", move || async move {
                retry
                    .execute("load_aggregate", &config, || {
                        let store = store.clone();
                        async move { store.load_aggregate().await }
                    })
                    .await
            })
            .await
    }

    pub async fn save_aggregate(
        &self,
        snapshot: &AggregateSnapshot,
        priority: Priority,
    ) -> StoreResult<()> {
        let store = self.store.clone();
        let retry = self.retry.clone();
        let config = self.retry_config.clone();
        let snapshot = snapshot.clone();

        self.queue
            .submit(priority, "save_aggregate", move || async move {
                retry
                    .execute("save_aggregate", &config, || {
                        let store = store.clone();
                        let snapshot = snapshot.clone();
                        async move { store.save_aggregate(&snapshot).await }
                    })
                    .await
            })
            .await
    }

    pub async fn account_status(&self, priority: Priority) -> StoreResult<AccountStatus> {
        let store = self.store.clone();
        let retry = self.retry.clone();
        let config = self.retry_config.clone();

        self.queue
            .submit(priority, "account_status", move || async move {
                retry
                    .execute("account_status", &config, || {
                        let store = store.clone();
                        async move { store.account_status().await }
                    })
                    .await
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;
    use crate::{RecordSource, StoreError, StoreErrorKind, WorkoutType};
    use chrono::Utc;
    use std::time::Duration;

    fn test_client(store: Arc<MemoryStore>) -> RemoteClient {
        let queue = Arc::new(OperationQueue::new(3, Duration::from_millis(1)));
        let config = RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2.0,
            jitter: 0.0,
        };
        RemoteClient::new(store, queue, config)
    }

    fn test_record() -> WorkoutRecord {
        WorkoutRecord {
            id: Uuid::new_v4(),
            workout_type: WorkoutType::Strength,
            started_at: Utc::now() - chrono::Duration::minutes(40),
            ended_at: Utc::now(),
            duration_seconds: 2400,
            energy_burned_kcal: 300.0,
            distance_meters: None,
            avg_heart_rate: Some(130),
            xp_earned: Some(45),
            source: RecordSource::Manual,
        }
    }

    #[tokio::test]
    async fn test_save_recovers_from_transient_failures() {
        let store = Arc::new(MemoryStore::new());
        store.fail_next_n(2, StoreError::new(StoreErrorKind::ServiceUnavailable, "busy"));

        let client = test_client(store.clone());
        client
            .save_workout(&test_record(), Priority::High)
            .await
            .unwrap();

        assert_eq!(store.record_count(), 1);
        assert_eq!(client.retry_metrics().recovered, 1);
        // One queued operation despite three store attempts
        assert_eq!(client.queue_stats().succeeded, 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_last_error() {
        let store = Arc::new(MemoryStore::new());
        store.fail_next_n(5, StoreError::new(StoreErrorKind::NetworkFailure, "down"));

        let client = test_client(store.clone());
        let err = client
            .save_workout(&test_record(), Priority::High)
            .await
            .unwrap_err();

        assert_eq!(err.kind, StoreErrorKind::NetworkFailure);
        assert_eq!(client.queue_stats().failed, 1);
    }

    #[tokio::test]
    async fn test_fatal_error_passes_straight_through() {
        let store = Arc::new(MemoryStore::new());
        store.fail_next(StoreError::new(StoreErrorKind::AuthRequired, "sign in"));

        let client = test_client(store.clone());
        let err = client.load_aggregate(Priority::Medium).await.unwrap_err();

        assert_eq!(err.kind, StoreErrorKind::AuthRequired);
        // No retries happened
        assert_eq!(store.call_count(), 1);
    }
}
