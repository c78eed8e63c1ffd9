//! Published aggregate cache.
//!
//! Holds the in-memory counters the presentation layer observes. The cache is
//! an explicit object owned by whoever wires the engine together and is
//! handed around by reference; it is never a process-wide singleton.
//!
//! Only two paths mutate it: the optimistic increment after a newly finished
//! workout, and the reconciliation engine's authoritative overwrite. Both go
//! through `send_modify` on a watch channel, so every published value is a
//! complete snapshot; readers never see a half-applied update.

use crate::{AggregateSnapshot, WorkoutRecord};
use tokio::sync::watch;

/// What subscribers observe: the current counters plus the most recent
/// user-visible sync error, if any
#[derive(Clone, Debug, Default)]
pub struct AggregateView {
    pub snapshot: AggregateSnapshot,
    pub last_error: Option<String>,
}

/// Observable cache of the user's aggregate counters
pub struct AggregateCache {
    tx: watch::Sender<AggregateView>,
}

impl Default for AggregateCache {
    fn default() -> Self {
        Self::new()
    }
}

impl AggregateCache {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(AggregateView::default());
        Self { tx }
    }

    /// Subscribe to published values (presentation layer entry point)
    pub fn subscribe(&self) -> watch::Receiver<AggregateView> {
        self.tx.subscribe()
    }

    /// The currently published view
    pub fn current(&self) -> AggregateView {
        self.tx.borrow().clone()
    }

    /// Convenience accessor for the counters alone
    pub fn snapshot(&self) -> AggregateSnapshot {
        self.tx.borrow().snapshot.clone()
    }

    /// Optimistic fast path: fold one new workout into the counters.
    ///
    /// All fields change in a single publish; a successful workout also
    /// clears any stale error.
    pub fn apply_workout(&self, record: &WorkoutRecord) {
        self.tx.send_modify(|view| {
            view.snapshot.apply_workout(record);
            view.last_error = None;
        });
        let view = self.tx.borrow();
        tracing::debug!(
            "Cache after workout {}: {} workouts, {} XP, streak {}",
            record.id,
            view.snapshot.total_workouts,
            view.snapshot.total_xp,
            view.snapshot.current_streak
        );
    }

    /// Authoritative overwrite from reconciliation (last writer wins)
    pub fn replace(&self, snapshot: AggregateSnapshot) {
        self.tx.send_modify(|view| {
            view.snapshot = snapshot;
            view.last_error = None;
        });
    }

    /// Publish a user-visible sync error without touching the counters
    pub fn set_error(&self, message: impl Into<String>) {
        let message = message.into();
        self.tx.send_modify(|view| {
            view.last_error = Some(message);
        });
    }

    pub fn clear_error(&self) {
        self.tx.send_modify(|view| {
            view.last_error = None;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RecordSource, WorkoutType};
    use chrono::Utc;
    use uuid::Uuid;

    fn test_record(xp: u32) -> WorkoutRecord {
        WorkoutRecord {
            id: Uuid::new_v4(),
            workout_type: WorkoutType::Hiit,
            started_at: Utc::now() - chrono::Duration::minutes(10),
            ended_at: Utc::now(),
            duration_seconds: 600,
            energy_burned_kcal: 90.0,
            distance_meters: None,
            avg_heart_rate: Some(160),
            xp_earned: Some(xp),
            source: RecordSource::Manual,
        }
    }

    #[tokio::test]
    async fn test_apply_workout_publishes_complete_snapshot() {
        let cache = AggregateCache::new();
        let mut rx = cache.subscribe();

        cache.apply_workout(&test_record(25));

        rx.changed().await.unwrap();
        let view = rx.borrow().clone();
        assert_eq!(view.snapshot.total_workouts, 1);
        assert_eq!(view.snapshot.total_xp, 25);
        assert!(view.last_error.is_none());
    }

    #[tokio::test]
    async fn test_replace_overwrites_everything() {
        let cache = AggregateCache::new();
        cache.apply_workout(&test_record(25));

        let authoritative = AggregateSnapshot {
            total_xp: 620,
            total_workouts: 12,
            current_streak: 2,
            last_workout_at: Some(Utc::now()),
        };
        cache.replace(authoritative.clone());

        assert_eq!(cache.snapshot(), authoritative);
    }

    #[tokio::test]
    async fn test_error_publishing_leaves_counters_alone() {
        let cache = AggregateCache::new();
        cache.apply_workout(&test_record(25));

        cache.set_error("network unreachable");
        let view = cache.current();
        assert_eq!(view.last_error.as_deref(), Some("network unreachable"));
        assert_eq!(view.snapshot.total_xp, 25);

        // The next successful workout clears the error
        cache.apply_workout(&test_record(5));
        assert!(cache.current().last_error.is_none());
    }
}
