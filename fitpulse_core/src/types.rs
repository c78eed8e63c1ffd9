//! Core domain types for the FitPulse sync engine.
//!
//! This module defines the fundamental types used throughout the system:
//! - Workout records as produced by the capture layer
//! - The aggregate snapshot of per-user counters
//! - Operation priorities for the scheduling queue

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Workout Record Types
// ============================================================================

/// Type of workout activity
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkoutType {
    Run,
    Ride,
    Swim,
    Walk,
    Strength,
    Hiit,
    Yoga,
    Other,
}

/// Where a workout record originated
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecordSource {
    Watch,
    Phone,
    Manual,
    Import,
}

/// A finished workout as emitted by the capture layer.
///
/// Immutable once persisted; the only tolerated mutation is a correction to
/// the derived XP field through the owning user's own tools. Legacy records
/// predate the XP field, so `xp_earned` is optional and
/// [`WorkoutRecord::xp_contribution`] documents the fallback.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkoutRecord {
    pub id: Uuid,
    pub workout_type: WorkoutType,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_seconds: u32,
    pub energy_burned_kcal: f64,
    pub distance_meters: Option<f64>,
    pub avg_heart_rate: Option<u16>,
    pub xp_earned: Option<u32>,
    pub source: RecordSource,
}

impl WorkoutRecord {
    /// XP this record contributes to the aggregate.
    ///
    /// Uses `xp_earned` when present. Legacy records saved before the XP
    /// field existed fall back to 1 XP per 10 kcal of energy burned
    /// (rounded down), so old history still counts toward the total.
    pub fn xp_contribution(&self) -> u64 {
        match self.xp_earned {
            Some(xp) => u64::from(xp),
            None => (self.energy_burned_kcal / 10.0).max(0.0) as u64,
        }
    }

    /// Check the internal consistency required for a record to be counted.
    ///
    /// Returns a human-readable reason when the record is unusable.
    /// Reconciliation skips (and logs) such records rather than aborting.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.ended_at < self.started_at {
            return Err(format!(
                "ends before it starts ({} < {})",
                self.ended_at, self.started_at
            ));
        }
        if self.duration_seconds == 0 {
            return Err("zero duration".into());
        }
        if !self.energy_burned_kcal.is_finite() || self.energy_burned_kcal < 0.0 {
            return Err(format!("invalid energy value {}", self.energy_burned_kcal));
        }
        Ok(())
    }
}

// ============================================================================
// Aggregate Snapshot
// ============================================================================

/// The per-user summary counters published to the presentation layer.
///
/// Invariant: after any completed reconciliation pass, `total_xp` and
/// `total_workouts` equal the sum/count derived from all non-deleted workout
/// records. Between passes, optimistic increments may run ahead of the
/// durable write; that transient drift is tolerated and corrected.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct AggregateSnapshot {
    pub total_xp: u64,
    pub total_workouts: u64,
    pub current_streak: u32,
    pub last_workout_at: Option<DateTime<Utc>>,
}

impl AggregateSnapshot {
    /// Apply one new workout to the counters (the optimistic fast path).
    ///
    /// Streak rules, by UTC day of `ended_at`:
    /// - same day as the last workout: streak unchanged
    /// - the day after the last workout: streak + 1
    /// - any gap (or first workout ever): streak resets to 1
    pub fn apply_workout(&mut self, record: &WorkoutRecord) {
        self.total_xp += record.xp_contribution();
        self.total_workouts += 1;

        let day = record.ended_at.date_naive();
        self.current_streak = match self.last_workout_at {
            Some(last) => {
                let last_day = last.date_naive();
                if day == last_day {
                    self.current_streak.max(1)
                } else if day == last_day.succ_opt().unwrap_or(last_day) {
                    self.current_streak + 1
                } else if day > last_day {
                    1
                } else {
                    // Out-of-order arrival; leave the streak for reconciliation
                    self.current_streak.max(1)
                }
            }
            None => 1,
        };

        if self
            .last_workout_at
            .map(|last| record.ended_at > last)
            .unwrap_or(true)
        {
            self.last_workout_at = Some(record.ended_at);
        }
    }

    /// Recompute the whole snapshot from a full, deduplicated record set.
    ///
    /// This is the authoritative calculation used by reconciliation. An empty
    /// record set produces an all-zero snapshot, never a stale one.
    pub fn from_records<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a WorkoutRecord>,
    {
        let mut total_xp = 0u64;
        let mut total_workouts = 0u64;
        let mut last_workout_at: Option<DateTime<Utc>> = None;
        let mut days: Vec<chrono::NaiveDate> = Vec::new();

        for record in records {
            total_xp += record.xp_contribution();
            total_workouts += 1;
            if last_workout_at.map(|last| record.ended_at > last).unwrap_or(true) {
                last_workout_at = Some(record.ended_at);
            }
            days.push(record.ended_at.date_naive());
        }

        days.sort_unstable();
        days.dedup();

        // Walk backwards from the most recent workout day counting
        // consecutive calendar days.
        let mut current_streak = 0u32;
        let mut expected = days.last().copied();
        for day in days.iter().rev() {
            match expected {
                Some(e) if *day == e => {
                    current_streak += 1;
                    expected = day.pred_opt();
                }
                _ => break,
            }
        }

        Self {
            total_xp,
            total_workouts,
            current_streak,
            last_workout_at,
        }
    }

    /// True when the countable fields match (streak and timestamp are derived
    /// and follow whichever side is authoritative)
    pub fn counters_match(&self, other: &AggregateSnapshot) -> bool {
        self.total_xp == other.total_xp && self.total_workouts == other.total_workouts
    }
}

// ============================================================================
// Scheduling Priority
// ============================================================================

/// Dispatch priority for queued remote operations.
///
/// Ordered so that `Critical > High > Medium > Low`; the queue always picks
/// the highest-priority pending operation for the next dispatch slot.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Remote account availability as reported by the record store
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccountStatus {
    /// Account reachable and usable
    Available,
    /// No account is signed in on this device
    NoAccount,
    /// Account exists but access is restricted (e.g. parental controls)
    Restricted,
}
