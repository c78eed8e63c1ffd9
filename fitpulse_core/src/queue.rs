//! Priority-ordered, rate-limited operation queue.
//!
//! All outbound remote traffic funnels through this queue so the client never
//! exceeds the record store's request budget. A single worker task owns the
//! pending heap and all counters; callers interact only through channel
//! messages, so no two writers ever race on queue state.
//!
//! The queue does not retry: callers enqueue retry-wrapped actions (see
//! [`crate::client::RemoteClient`]) and the queue faithfully delivers each
//! operation's final result.

use crate::{Priority, StoreError, StoreErrorKind, StoreResult};
use futures::future::BoxFuture;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

type QueuedAction = BoxFuture<'static, Result<(), StoreError>>;

/// A pending unit of work, owned by the queue until dispatch
struct QueuedOperation {
    priority: Priority,
    /// Monotonic sequence for FIFO order within a priority tier
    seq: u64,
    description: String,
    action: QueuedAction,
}

impl PartialEq for QueuedOperation {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedOperation {}

impl PartialOrd for QueuedOperation {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedOperation {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority first, then lower sequence (older) first
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct StatsInner {
    succeeded: u64,
    failed: u64,
    total_duration: Duration,
}

/// Read-only queue statistics for diagnostics dashboards.
///
/// Observability only; nothing in the control path reads these.
#[derive(Clone, Debug, Default)]
pub struct QueueStats {
    pub succeeded: u64,
    pub failed: u64,
    pub average_duration: Duration,
    pub success_rate: f64,
}

/// Awaitable result of an enqueued operation.
///
/// Resolves with the operation's own success or failure once it has run;
/// the queue never swallows an outcome.
pub struct QueueHandle<T> {
    rx: oneshot::Receiver<StoreResult<T>>,
}

impl<T> Future for QueueHandle<T> {
    type Output = StoreResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(StoreError::new(
                StoreErrorKind::Internal,
                "operation queue shut down before the operation ran",
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Priority-ordered, rate-limited, bounded-concurrency scheduler
pub struct OperationQueue {
    tx: mpsc::UnboundedSender<QueuedOperation>,
    stats: Arc<Mutex<StatsInner>>,
    seq: AtomicU64,
}

impl OperationQueue {
    /// Start the worker task.
    ///
    /// `max_concurrent` operations may execute at once; consecutive dispatches
    /// are separated by at least `rate_limit_delay`.
    pub fn new(max_concurrent: usize, rate_limit_delay: Duration) -> Self {
        assert!(max_concurrent > 0, "max_concurrent must be at least 1");

        let (tx, rx) = mpsc::unbounded_channel();
        let stats = Arc::new(Mutex::new(StatsInner::default()));

        tokio::spawn(worker(rx, max_concurrent, rate_limit_delay, stats.clone()));

        Self {
            tx,
            stats,
            seq: AtomicU64::new(0),
        }
    }

    /// Insert an operation without blocking; returns an awaitable handle.
    ///
    /// The operation runs ahead of all strictly-lower-priority work already
    /// queued, FIFO within its own tier.
    pub fn enqueue<T, F, Fut>(
        &self,
        priority: Priority,
        description: impl Into<String>,
        operation: F,
    ) -> QueueHandle<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = StoreResult<T>> + Send + 'static,
    {
        let description = description.into();
        let (result_tx, result_rx) = oneshot::channel();

        let action: QueuedAction = Box::pin(async move {
            let result = operation().await;
            let outcome = result.as_ref().err().cloned();
            // Receiver may be gone; the outcome still feeds queue stats
            let _ = result_tx.send(result);
            match outcome {
                Some(error) => Err(error),
                None => Ok(()),
            }
        });

        let op = QueuedOperation {
            priority,
            seq: self.seq.fetch_add(1, AtomicOrdering::Relaxed),
            description,
            action,
        };

        if let Err(rejected) = self.tx.send(op) {
            tracing::warn!(
                "Operation queue is shut down, dropping '{}'",
                rejected.0.description
            );
            // Dropping the action drops result_tx; the handle resolves with
            // the shutdown error
        }

        QueueHandle { rx: result_rx }
    }

    /// Enqueue and await the result in one call
    pub async fn submit<T, F, Fut>(
        &self,
        priority: Priority,
        description: impl Into<String>,
        operation: F,
    ) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = StoreResult<T>> + Send + 'static,
    {
        self.enqueue(priority, description, operation).await
    }

    /// Snapshot of queue statistics
    pub fn stats(&self) -> QueueStats {
        let inner = self.stats.lock().unwrap();
        let completed = inner.succeeded + inner.failed;
        QueueStats {
            succeeded: inner.succeeded,
            failed: inner.failed,
            average_duration: if completed > 0 {
                inner.total_duration / completed as u32
            } else {
                Duration::ZERO
            },
            success_rate: if completed > 0 {
                inner.succeeded as f64 / completed as f64
            } else {
                1.0
            },
        }
    }
}

/// Completion report from a dispatched operation's task
struct Finished {
    description: String,
    duration: Duration,
    result: Result<(), StoreError>,
}

async fn worker(
    mut rx: mpsc::UnboundedReceiver<QueuedOperation>,
    max_concurrent: usize,
    rate_limit_delay: Duration,
    stats: Arc<Mutex<StatsInner>>,
) {
    let mut heap: BinaryHeap<QueuedOperation> = BinaryHeap::new();
    let mut active = 0usize;
    let mut next_dispatch = Instant::now();
    let mut closed = false;

    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Finished>();

    loop {
        // Ingest everything already waiting before choosing what to dispatch,
        // so a burst of enqueues is ordered by priority rather than arrival
        loop {
            match rx.try_recv() {
                Ok(op) => heap.push(op),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    closed = true;
                    break;
                }
            }
        }

        // Drain the heap into execution slots
        while active < max_concurrent && !heap.is_empty() && Instant::now() >= next_dispatch {
            let op = heap.pop().expect("heap is non-empty");
            active += 1;
            next_dispatch = Instant::now() + rate_limit_delay;

            tracing::debug!(
                "Dispatching '{}' (priority {}, {} pending, {} active)",
                op.description,
                op.priority,
                heap.len(),
                active
            );

            let done_tx = done_tx.clone();
            tokio::spawn(async move {
                let started = Instant::now();
                let result = op.action.await;
                let _ = done_tx.send(Finished {
                    description: op.description,
                    duration: started.elapsed(),
                    result,
                });
            });
        }

        if closed && active == 0 && heap.is_empty() {
            break;
        }

        let awaiting_slot = active < max_concurrent && !heap.is_empty();

        tokio::select! {
            op = rx.recv(), if !closed => match op {
                Some(op) => heap.push(op),
                None => closed = true,
            },
            Some(finished) = done_rx.recv() => {
                active -= 1;

                {
                    let mut inner = stats.lock().unwrap();
                    inner.total_duration += finished.duration;
                    match finished.result {
                        Ok(()) => inner.succeeded += 1,
                        Err(_) => inner.failed += 1,
                    }
                }

                // Honor a server-reported rate limit before dispatching more,
                // independent of any executor-level backoff
                if let Err(error) = &finished.result {
                    if let Some(retry_after) = error.retry_after {
                        let resume = Instant::now() + retry_after;
                        if resume > next_dispatch {
                            tracing::warn!(
                                "'{}' was rate limited, pausing dispatch for {:?}",
                                finished.description,
                                retry_after
                            );
                            next_dispatch = resume;
                        }
                    }
                }
            },
            _ = tokio::time::sleep_until(next_dispatch), if awaiting_slot => {}
        }
    }

    tracing::debug!("Operation queue worker exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn quick_queue() -> OperationQueue {
        OperationQueue::new(3, Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_delivers_success_and_failure() {
        let queue = quick_queue();

        let ok = queue
            .submit(Priority::Medium, "ok", || async { Ok(7) })
            .await;
        assert_eq!(ok.unwrap(), 7);

        let err: StoreResult<()> = queue
            .submit(Priority::Medium, "err", || async {
                Err(StoreError::new(StoreErrorKind::NetworkFailure, "down"))
            })
            .await;
        assert_eq!(err.unwrap_err().kind, StoreErrorKind::NetworkFailure);

        let stats = queue.stats();
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.failed, 1);
        assert!((stats.success_rate - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_priority_order_over_arrival_order() {
        // current_thread runtime: the worker cannot run until we first await,
        // so all four operations are enqueued before the first dispatch
        let queue = OperationQueue::new(1, Duration::from_millis(1));
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for (priority, name) in [
            (Priority::Low, "low"),
            (Priority::High, "high"),
            (Priority::Medium, "medium"),
            (Priority::Critical, "critical"),
        ] {
            let order = order.clone();
            handles.push(queue.enqueue(priority, name, move || async move {
                order.lock().unwrap().push(name);
                Ok(())
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(
            *order.lock().unwrap(),
            vec!["critical", "high", "medium", "low"]
        );
    }

    #[tokio::test]
    async fn test_fifo_within_same_priority() {
        let queue = OperationQueue::new(1, Duration::from_millis(1));
        let order = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for name in ["first", "second", "third"] {
            let order = order.clone();
            handles.push(queue.enqueue(Priority::Medium, name, move || async move {
                order.lock().unwrap().push(name);
                Ok(())
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_concurrency_bound_respected() {
        let queue = OperationQueue::new(2, Duration::from_millis(1));
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for i in 0..6 {
            let current = current.clone();
            let peak = peak.clone();
            handles.push(
                queue.enqueue(Priority::Medium, format!("op{}", i), move || async move {
                    let now = current.fetch_add(1, AtomicOrdering::SeqCst) + 1;
                    peak.fetch_max(now, AtomicOrdering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    current.fetch_sub(1, AtomicOrdering::SeqCst);
                    Ok(())
                }),
            );
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert!(
            peak.load(AtomicOrdering::SeqCst) <= 2,
            "more than 2 operations ran concurrently"
        );
    }

    #[tokio::test]
    async fn test_rate_limit_delay_between_dispatches() {
        let queue = OperationQueue::new(3, Duration::from_millis(50));
        let started = Instant::now();

        let mut handles = Vec::new();
        for i in 0..3 {
            handles.push(queue.enqueue(Priority::Medium, format!("op{}", i), || async {
                Ok(())
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // Second dispatch at +50ms, third at +100ms
        assert!(
            started.elapsed() >= Duration::from_millis(100),
            "dispatches were not rate limited: {:?}",
            started.elapsed()
        );
    }

    #[tokio::test]
    async fn test_rate_limited_error_pauses_dispatch() {
        let queue = OperationQueue::new(1, Duration::from_millis(1));

        let first: StoreResult<()> = queue
            .submit(Priority::High, "limited", || async {
                Err(StoreError::rate_limited(Duration::from_millis(120)))
            })
            .await;
        assert!(first.is_err());

        let resumed = Instant::now();
        queue
            .submit(Priority::High, "after", || async { Ok(()) })
            .await
            .unwrap();

        assert!(
            resumed.elapsed() >= Duration::from_millis(100),
            "dispatch resumed too early: {:?}",
            resumed.elapsed()
        );
    }
}
