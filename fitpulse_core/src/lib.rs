#![forbid(unsafe_code)]

//! Remote-sync reconciliation engine for the FitPulse fitness tracker.
//!
//! This crate provides:
//! - Domain types (workout records, aggregate counters, priorities)
//! - Operation queue with priority ordering, bounded concurrency and rate limiting
//! - Retry executor with exponential backoff and error classification
//! - Sync state manager (single-flight guard, retry budgets, init machine)
//! - Observable aggregate cache
//! - Stats reconciliation engine with durable checkpointing
//! - Remote record store abstraction plus JSONL and in-memory backends

pub mod types;
pub mod error;
pub mod config;
pub mod logging;
pub mod store;
pub mod memory_store;
pub mod jsonl_store;
pub mod retry;
pub mod queue;
pub mod state;
pub mod cache;
pub mod checkpoint;
pub mod client;
pub mod reconcile;
pub mod engine;

// Re-export commonly used types
pub use error::{Error, Result, RetryClass, StoreError, StoreErrorKind, StoreResult};
pub use types::*;
pub use cache::{AggregateCache, AggregateView};
pub use client::RemoteClient;
pub use config::Config;
pub use engine::{SchedulerHandle, SyncEngine};
pub use jsonl_store::JsonlStore;
pub use memory_store::MemoryStore;
pub use queue::{OperationQueue, QueueStats};
pub use reconcile::{ReconcileEngine, ReconcileOutcome};
pub use retry::{RetryConfig, RetryExecutor, RetryMetrics};
pub use state::{InitGate, InitState, StateManager};
pub use store::{PageRequest, RecordStore, WorkoutPage};
