//! Sync state manager.
//!
//! Single authority for cached account availability, de-duplication of
//! concurrent attempts at the same named operation, per-operation-type retry
//! counters, and the global initialization state machine. All mutable state
//! lives behind one async mutex, so concurrent callers never observe a torn
//! update.
//!
//! Retry counters are keyed by operation *type*, not instance: two concurrent
//! operations of the same type share a budget. This bounds memory but means a
//! fast-failing operation can throttle an unrelated sibling of the same type;
//! callers that need isolation should use distinct type names.

use crate::{AccountStatus, StoreError};
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::{watch, Mutex};

/// Global initialization progress
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InitState {
    NotStarted,
    InProgress,
    Completed,
    Failed(String),
    /// Remote account unavailable; returns to `NotStarted` when it appears
    WaitingForAccount,
}

impl InitState {
    /// True once initialization can no longer be awaited
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InitState::Completed | InitState::Failed(_) | InitState::WaitingForAccount
        )
    }
}

/// Outcome of asking to start initialization
pub enum InitGate {
    /// Caller owns the attempt and must report the outcome
    Proceed,
    /// Initialization already finished successfully
    AlreadyCompleted,
    /// Another caller's attempt is in flight; await the receiver instead of
    /// starting a second attempt
    InFlight(watch::Receiver<InitState>),
}

#[derive(Default)]
struct RetryCounter {
    attempts: u32,
    last_error: Option<String>,
}

struct Inner {
    active_ops: HashSet<String>,
    retry: HashMap<String, RetryCounter>,
    account: AccountStatus,
}

/// Single-writer coordinator for sync bookkeeping
pub struct StateManager {
    inner: Mutex<Inner>,
    init_tx: watch::Sender<InitState>,
    // Keeps the watch channel open so `send` always stores the new state
    // even when no external subscriber is alive
    _init_rx: watch::Receiver<InitState>,
    max_retry_attempts: u32,
}

impl StateManager {
    pub fn new(max_retry_attempts: u32) -> Self {
        let (init_tx, _init_rx) = watch::channel(InitState::NotStarted);
        Self {
            inner: Mutex::new(Inner {
                active_ops: HashSet::new(),
                retry: HashMap::new(),
                account: AccountStatus::NoAccount,
            }),
            init_tx,
            _init_rx,
            max_retry_attempts,
        }
    }

    // ------------------------------------------------------------------
    // Single-flight operation guard
    // ------------------------------------------------------------------

    /// Try to claim the named operation type.
    ///
    /// Returns false when an operation of this type is already active; the
    /// caller must back off rather than double-submit.
    pub async fn start_operation(&self, op_type: &str) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.active_ops.contains(op_type) {
            tracing::debug!("'{}' already in flight, refusing duplicate", op_type);
            return false;
        }
        inner.active_ops.insert(op_type.to_string());
        true
    }

    /// Release the operation type and reset its retry counter
    pub async fn complete_operation(&self, op_type: &str) {
        let mut inner = self.inner.lock().await;
        inner.active_ops.remove(op_type);
        inner.retry.remove(op_type);
    }

    /// Release the operation type after a failure, keeping the retry counter
    pub async fn fail_operation(&self, op_type: &str, error: &StoreError) {
        let mut inner = self.inner.lock().await;
        inner.active_ops.remove(op_type);
        inner
            .retry
            .entry(op_type.to_string())
            .or_default()
            .last_error = Some(error.to_string());
    }

    // ------------------------------------------------------------------
    // Retry budget
    // ------------------------------------------------------------------

    /// Whether this operation type may be attempted again after `error`.
    ///
    /// Fatal errors and exhausted budgets return false; otherwise the shared
    /// counter is incremented and the caller may retry.
    pub async fn should_retry_operation(&self, op_type: &str, error: &StoreError) -> bool {
        if !error.is_retryable() {
            return false;
        }

        let mut inner = self.inner.lock().await;
        let counter = inner.retry.entry(op_type.to_string()).or_default();
        if counter.attempts >= self.max_retry_attempts {
            tracing::warn!(
                "'{}' exhausted its retry budget ({} attempts), last error: {}",
                op_type,
                counter.attempts,
                error
            );
            return false;
        }

        counter.attempts += 1;
        counter.last_error = Some(error.to_string());
        true
    }

    /// Backoff before the next attempt of this operation type: `2^attempts`
    /// seconds (capped at one minute) plus random jitter in `[0,1)` seconds
    /// so separate app instances do not retry in lockstep
    pub async fn retry_delay(&self, op_type: &str) -> Duration {
        let attempts = {
            let inner = self.inner.lock().await;
            inner.retry.get(op_type).map(|c| c.attempts).unwrap_or(0)
        };

        let base_secs = 2u64.saturating_pow(attempts.min(6)).min(60);
        let jitter_ms = rand::thread_rng().gen_range(0..1000);
        Duration::from_secs(base_secs) + Duration::from_millis(jitter_ms)
    }

    /// Attempts recorded so far for an operation type
    pub async fn retry_attempts(&self, op_type: &str) -> u32 {
        let inner = self.inner.lock().await;
        inner.retry.get(op_type).map(|c| c.attempts).unwrap_or(0)
    }

    // ------------------------------------------------------------------
    // Account availability
    // ------------------------------------------------------------------

    pub async fn account_status(&self) -> AccountStatus {
        self.inner.lock().await.account
    }

    /// Record the latest account status.
    ///
    /// When the account becomes available while initialization was parked in
    /// `WaitingForAccount`, the machine returns to `NotStarted` so the next
    /// caller can initialize.
    pub async fn set_account_status(&self, status: AccountStatus) {
        let mut inner = self.inner.lock().await;
        inner.account = status;

        if status == AccountStatus::Available
            && *self.init_tx.borrow() == InitState::WaitingForAccount
        {
            tracing::info!("Account became available, initialization can be retried");
            let _ = self.init_tx.send(InitState::NotStarted);
        }
    }

    // ------------------------------------------------------------------
    // Initialization state machine
    // ------------------------------------------------------------------

    /// Ask to start initialization.
    ///
    /// Exactly one attempt may be in flight: the first caller gets
    /// [`InitGate::Proceed`], concurrent callers get a receiver to await the
    /// attempt's outcome. A previous `Failed` or `WaitingForAccount` state
    /// allows a fresh attempt.
    pub async fn begin_initialization(&self) -> InitGate {
        // The inner lock serializes the read-modify-write on the watch value
        let _guard = self.inner.lock().await;
        let current = self.init_tx.borrow().clone();
        match current {
            InitState::Completed => InitGate::AlreadyCompleted,
            InitState::InProgress => InitGate::InFlight(self.init_tx.subscribe()),
            InitState::NotStarted | InitState::Failed(_) | InitState::WaitingForAccount => {
                let _ = self.init_tx.send(InitState::InProgress);
                InitGate::Proceed
            }
        }
    }

    /// Report the outcome of an initialization attempt
    pub async fn finish_initialization(&self, outcome: InitState) {
        debug_assert!(outcome.is_terminal(), "initialization outcome must be terminal");
        let _guard = self.inner.lock().await;
        let _ = self.init_tx.send(outcome);
    }

    /// Current initialization state
    pub fn init_state(&self) -> InitState {
        self.init_tx.borrow().clone()
    }

    /// Observe initialization transitions
    pub fn subscribe_init(&self) -> watch::Receiver<InitState> {
        self.init_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StoreErrorKind;
    use std::sync::Arc;

    fn transient() -> StoreError {
        StoreError::new(StoreErrorKind::NetworkFailure, "flaky")
    }

    #[tokio::test]
    async fn test_single_flight_guard() {
        let state = StateManager::new(3);

        assert!(state.start_operation("user_record_fetch").await);
        assert!(!state.start_operation("user_record_fetch").await);

        // A different type is unaffected
        assert!(state.start_operation("aggregate_save").await);

        state.complete_operation("user_record_fetch").await;
        assert!(state.start_operation("user_record_fetch").await);
    }

    #[tokio::test]
    async fn test_single_flight_under_concurrency() {
        let state = Arc::new(StateManager::new(3));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let state = state.clone();
            tasks.push(tokio::spawn(
                async move { state.start_operation("fetch").await },
            ));
        }

        let mut admitted = 0;
        for task in tasks {
            if task.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1, "exactly one caller may proceed");
    }

    #[tokio::test]
    async fn test_retry_budget_exhaustion() {
        let state = StateManager::new(2);
        let err = transient();

        assert!(state.should_retry_operation("save", &err).await);
        assert!(state.should_retry_operation("save", &err).await);
        assert!(!state.should_retry_operation("save", &err).await);
        assert_eq!(state.retry_attempts("save").await, 2);
    }

    #[tokio::test]
    async fn test_fatal_error_never_retried() {
        let state = StateManager::new(3);
        let err = StoreError::new(StoreErrorKind::PermissionDenied, "nope");
        assert!(!state.should_retry_operation("save", &err).await);
        assert_eq!(state.retry_attempts("save").await, 0);
    }

    #[tokio::test]
    async fn test_completion_resets_budget() {
        let state = StateManager::new(2);
        let err = transient();

        assert!(state.start_operation("save").await);
        assert!(state.should_retry_operation("save", &err).await);
        state.complete_operation("save").await;

        assert_eq!(state.retry_attempts("save").await, 0);
    }

    #[tokio::test]
    async fn test_retry_delay_grows_with_attempts() {
        let state = StateManager::new(10);
        let err = transient();

        let d0 = state.retry_delay("op").await;
        assert!(d0 >= Duration::from_secs(1) && d0 < Duration::from_secs(2));

        state.should_retry_operation("op", &err).await;
        state.should_retry_operation("op", &err).await;

        let d2 = state.retry_delay("op").await;
        assert!(d2 >= Duration::from_secs(4) && d2 < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_init_machine_happy_path() {
        let state = StateManager::new(3);
        assert_eq!(state.init_state(), InitState::NotStarted);

        assert!(matches!(state.begin_initialization().await, InitGate::Proceed));
        assert_eq!(state.init_state(), InitState::InProgress);

        // Concurrent caller must wait, not start a second attempt
        assert!(matches!(
            state.begin_initialization().await,
            InitGate::InFlight(_)
        ));

        state.finish_initialization(InitState::Completed).await;
        assert!(matches!(
            state.begin_initialization().await,
            InitGate::AlreadyCompleted
        ));
    }

    #[tokio::test]
    async fn test_init_failure_allows_reattempt() {
        let state = StateManager::new(3);

        assert!(matches!(state.begin_initialization().await, InitGate::Proceed));
        state
            .finish_initialization(InitState::Failed("boom".into()))
            .await;

        assert!(matches!(state.begin_initialization().await, InitGate::Proceed));
    }

    #[tokio::test]
    async fn test_waiting_for_account_resets_when_available() {
        let state = StateManager::new(3);

        assert!(matches!(state.begin_initialization().await, InitGate::Proceed));
        state
            .finish_initialization(InitState::WaitingForAccount)
            .await;
        assert_eq!(state.init_state(), InitState::WaitingForAccount);

        state.set_account_status(AccountStatus::Available).await;
        assert_eq!(state.init_state(), InitState::NotStarted);
        assert!(matches!(state.begin_initialization().await, InitGate::Proceed));
    }

    #[tokio::test]
    async fn test_inflight_receiver_sees_outcome() {
        let state = Arc::new(StateManager::new(3));

        assert!(matches!(state.begin_initialization().await, InitGate::Proceed));
        let gate = state.begin_initialization().await;
        let mut rx = match gate {
            InitGate::InFlight(rx) => rx,
            _ => panic!("expected in-flight gate"),
        };

        let waiter = tokio::spawn(async move {
            loop {
                if rx.borrow_and_update().is_terminal() {
                    return rx.borrow().clone();
                }
                if rx.changed().await.is_err() {
                    panic!("state manager dropped");
                }
            }
        });

        state.finish_initialization(InitState::Completed).await;
        assert_eq!(waiter.await.unwrap(), InitState::Completed);
    }
}
