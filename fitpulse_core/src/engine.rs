//! Sync engine facade.
//!
//! Wires the queue, retry executor, state manager, aggregate cache, and
//! reconciliation engine together behind the three commands the rest of the
//! app issues: initialize, record a workout, reconcile. Owned by the
//! dependency-injection root; the presentation layer only ever sees the
//! cache subscription and these methods.

use crate::cache::{AggregateCache, AggregateView};
use crate::client::RemoteClient;
use crate::config::Config;
use crate::queue::{OperationQueue, QueueStats};
use crate::reconcile::{ReconcileEngine, ReconcileOutcome};
use crate::retry::{RetryConfig, RetryMetrics};
use crate::state::{InitGate, InitState, StateManager};
use crate::store::RecordStore;
use crate::{AccountStatus, Error, Priority, Result, WorkoutRecord};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

const OP_INITIALIZE: &str = "initialize";
const OP_RECONCILE: &str = "reconcile";

/// The remote-sync reconciliation engine.
///
/// Cheap to clone; all state is behind shared handles.
#[derive(Clone)]
pub struct SyncEngine {
    client: Arc<RemoteClient>,
    cache: Arc<AggregateCache>,
    state: Arc<StateManager>,
    reconciler: Arc<ReconcileEngine>,
}

impl SyncEngine {
    /// Build the engine against a record store using the loaded configuration
    pub fn new(store: Arc<dyn RecordStore>, config: &Config) -> Self {
        let queue = Arc::new(OperationQueue::new(
            config.queue.max_concurrent,
            config.queue.rate_limit_delay(),
        ));
        let client = Arc::new(RemoteClient::new(
            store,
            queue,
            RetryConfig::from_settings(&config.retry),
        ));
        let cache = Arc::new(AggregateCache::new());
        let state = Arc::new(StateManager::new(config.retry.max_retry_attempts));
        let reconciler = Arc::new(ReconcileEngine::new(
            client.clone(),
            cache.clone(),
            config.data.data_dir.join("reconcile_checkpoint.json"),
            config.reconcile.interval(),
            config.reconcile.page_size,
        ));

        Self {
            client,
            cache,
            state,
            reconciler,
        }
    }

    /// The published aggregate observable
    pub fn cache(&self) -> &AggregateCache {
        &self.cache
    }

    /// Subscribe to published aggregate values
    pub fn subscribe(&self) -> watch::Receiver<AggregateView> {
        self.cache.subscribe()
    }

    /// Current initialization state
    pub fn init_state(&self) -> InitState {
        self.state.init_state()
    }

    // ------------------------------------------------------------------
    // Initialization
    // ------------------------------------------------------------------

    /// Initialize the engine: verify the remote account and seed the cache
    /// from the durable aggregate.
    ///
    /// Safe to call concurrently: exactly one attempt runs, and every other
    /// caller awaits its outcome. A failed attempt draws on the state
    /// manager's retry budget for this operation type; while budget remains,
    /// a delayed re-attempt is scheduled in the background.
    ///
    /// Boxed because the scheduled re-attempt recurses into this method.
    pub fn initialize(&self) -> BoxFuture<'static, Result<InitState>> {
        let engine = self.clone();
        Box::pin(async move { engine.initialize_attempt().await })
    }

    async fn initialize_attempt(&self) -> Result<InitState> {
        match self.state.begin_initialization().await {
            InitGate::AlreadyCompleted => Ok(InitState::Completed),
            InitGate::InFlight(rx) => self.await_initialization(rx).await,
            InitGate::Proceed => match self.run_initialization().await {
                Ok(outcome) => {
                    self.state.finish_initialization(outcome.clone()).await;
                    // Success decays the retry budget for the next failure
                    self.state.complete_operation(OP_INITIALIZE).await;
                    Ok(outcome)
                }
                Err(error) => {
                    self.state
                        .finish_initialization(InitState::Failed(error.to_string()))
                        .await;
                    self.cache.set_error(error.to_string());
                    self.schedule_init_reattempt(&error).await;
                    Err(error)
                }
            },
        }
    }

    /// Consult the retry budget and, if an attempt remains, spawn a delayed
    /// re-attempt of initialization.
    ///
    /// An exhausted budget or a non-retryable error leaves the machine in
    /// `Failed` until someone calls [`SyncEngine::initialize`] again.
    async fn schedule_init_reattempt(&self, error: &Error) {
        let store_error = match error {
            Error::Store(e) => e.clone(),
            _ => return,
        };

        if !self
            .state
            .should_retry_operation(OP_INITIALIZE, &store_error)
            .await
        {
            tracing::warn!(
                "No initialization re-attempt scheduled ({}); waiting for an explicit retry",
                store_error
            );
            return;
        }

        let attempt = self.state.retry_attempts(OP_INITIALIZE).await;
        let delay = self.state.retry_delay(OP_INITIALIZE).await;
        tracing::info!(
            "Scheduling initialization re-attempt {} in {:?}",
            attempt,
            delay
        );

        let engine = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match engine.initialize().await {
                Ok(outcome) => {
                    tracing::info!("Initialization re-attempt finished: {:?}", outcome)
                }
                Err(e) => tracing::warn!("Initialization re-attempt failed: {}", e),
            }
        });
    }

    async fn await_initialization(
        &self,
        mut rx: watch::Receiver<InitState>,
    ) -> Result<InitState> {
        loop {
            let current = rx.borrow_and_update().clone();
            match current {
                InitState::Completed => return Ok(InitState::Completed),
                InitState::WaitingForAccount => return Ok(InitState::WaitingForAccount),
                InitState::Failed(reason) => return Err(Error::State(reason)),
                InitState::NotStarted | InitState::InProgress => {
                    if rx.changed().await.is_err() {
                        return Err(Error::State("initialization attempt vanished".into()));
                    }
                }
            }
        }
    }

    async fn run_initialization(&self) -> Result<InitState> {
        tracing::info!("Initializing sync engine");

        let status = self.client.account_status(Priority::Critical).await?;
        self.state.set_account_status(status).await;

        if status != AccountStatus::Available {
            tracing::warn!(
                "Remote account unavailable ({:?}), parking initialization",
                status
            );
            return Ok(InitState::WaitingForAccount);
        }

        if let Some(snapshot) = self.client.load_aggregate(Priority::Critical).await? {
            tracing::info!(
                "Seeded cache from durable aggregate: {} workouts, {} XP",
                snapshot.total_workouts,
                snapshot.total_xp
            );
            self.cache.replace(snapshot);
        } else {
            tracing::info!("No durable aggregate yet, starting from zero");
        }

        Ok(InitState::Completed)
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// Record a finished workout.
    ///
    /// The cache is incremented optimistically before the durable write so
    /// the UI updates immediately; the periodic reconciliation pass corrects
    /// any drift a failed write leaves behind. On terminal failure the error
    /// is published on the cache and surfaced to the caller.
    pub async fn record_workout(&self, record: WorkoutRecord) -> Result<()> {
        if let Err(reason) = record.validate() {
            return Err(Error::Other(format!(
                "refusing to record invalid workout {}: {}",
                record.id, reason
            )));
        }

        self.cache.apply_workout(&record);

        let persisted = async {
            self.client.save_workout(&record, Priority::High).await?;
            // Persist the incremented counters so other devices converge
            // without waiting for a full reconciliation
            let snapshot = self.cache.snapshot();
            self.client.save_aggregate(&snapshot, Priority::High).await
        }
        .await;

        match persisted {
            Ok(()) => {
                tracing::info!("Workout {} persisted durably", record.id);
                Ok(())
            }
            Err(error) => {
                tracing::warn!(
                    "Workout {} not persisted ({}); reconciliation will correct",
                    record.id,
                    error
                );
                self.cache.set_error(error.to_string());
                Err(error.into())
            }
        }
    }

    /// Run a full reconciliation pass, bypassing the cadence check
    pub async fn force_reconcile(&self) -> Result<ReconcileOutcome> {
        self.reconcile(true).await
    }

    /// Run a reconciliation pass if the cadence has elapsed
    pub async fn reconcile_if_due(&self) -> Result<ReconcileOutcome> {
        self.reconcile(false).await
    }

    async fn reconcile(&self, force: bool) -> Result<ReconcileOutcome> {
        if !self.state.start_operation(OP_RECONCILE).await {
            return Err(Error::State("reconciliation already in progress".into()));
        }

        let result = self.reconciler.reconcile(force).await;

        match &result {
            Ok(_) => self.state.complete_operation(OP_RECONCILE).await,
            Err(Error::Store(store_error)) => {
                self.state.fail_operation(OP_RECONCILE, store_error).await
            }
            Err(_) => self.state.complete_operation(OP_RECONCILE).await,
        }

        result
    }

    // ------------------------------------------------------------------
    // Background schedule
    // ------------------------------------------------------------------

    /// Spawn the periodic reconciliation task.
    ///
    /// In-flight operations are never cancelled; stopping the scheduler only
    /// prevents new passes from starting.
    pub fn start_scheduler(&self, check_period: Duration) -> SchedulerHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let engine = self.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(check_period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match engine.reconcile_if_due().await {
                            Ok(ReconcileOutcome::NotDue) => {}
                            Ok(outcome) => {
                                tracing::debug!("Scheduled reconciliation finished: {:?}", outcome)
                            }
                            Err(e) => {
                                tracing::warn!("Scheduled reconciliation failed: {}", e)
                            }
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            tracing::debug!("Reconciliation scheduler stopped");
        });

        SchedulerHandle {
            shutdown: shutdown_tx,
            handle,
        }
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    /// Operation queue statistics (observability only)
    pub fn queue_stats(&self) -> QueueStats {
        self.client.queue_stats()
    }

    /// Retry executor metrics (observability only)
    pub fn retry_metrics(&self) -> RetryMetrics {
        self.client.retry_metrics()
    }
}

/// Handle to the background reconciliation task
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop the scheduler and wait for it to exit
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}
