//! Stats reconciliation engine.
//!
//! Recomputes the aggregate counters from the full workout record set and
//! corrects any drift between the published cache and ground truth. Runs on a
//! cool-down cadence (default 24h) or on demand. Drift is not an error: it is
//! corrected silently and logged at info with before/after values.

use crate::cache::AggregateCache;
use crate::checkpoint::ReconcileCheckpoint;
use crate::client::RemoteClient;
use crate::store::PageRequest;
use crate::{AggregateSnapshot, Priority, Result};
use chrono::Utc;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

/// Result of a reconciliation request
#[derive(Clone, Debug, PartialEq)]
pub enum ReconcileOutcome {
    /// The cadence has not elapsed and the pass was not forced
    NotDue,
    /// Ground truth matched the cache; nothing was written
    Clean(AggregateSnapshot),
    /// Drift was detected and corrected
    Corrected {
        before: AggregateSnapshot,
        after: AggregateSnapshot,
    },
}

/// Periodic authoritative recomputation of the aggregate counters
pub struct ReconcileEngine {
    client: Arc<RemoteClient>,
    cache: Arc<AggregateCache>,
    checkpoint_path: PathBuf,
    interval: chrono::Duration,
    page_size: usize,
}

impl ReconcileEngine {
    pub fn new(
        client: Arc<RemoteClient>,
        cache: Arc<AggregateCache>,
        checkpoint_path: PathBuf,
        interval: chrono::Duration,
        page_size: usize,
    ) -> Self {
        Self {
            client,
            cache,
            checkpoint_path,
            interval,
            page_size,
        }
    }

    /// Whether the cadence has elapsed since the last completed pass
    pub fn is_due(&self) -> Result<bool> {
        let checkpoint = ReconcileCheckpoint::load(&self.checkpoint_path)?;
        Ok(checkpoint.is_due(self.interval, Utc::now()))
    }

    /// Run a full reconciliation pass.
    ///
    /// Unless `force` is set, the pass is skipped when the cadence has not
    /// elapsed. A completed pass always records the checkpoint timestamp,
    /// whether or not a correction was needed.
    pub async fn reconcile(&self, force: bool) -> Result<ReconcileOutcome> {
        let now = Utc::now();
        let mut checkpoint = ReconcileCheckpoint::load(&self.checkpoint_path)?;

        if !force && !checkpoint.is_due(self.interval, now) {
            tracing::debug!(
                "Reconciliation not due (last run {:?}), skipping",
                checkpoint.last_reconciled_at
            );
            return Ok(ReconcileOutcome::NotDue);
        }

        let actual = self.compute_ground_truth().await?;
        let cached = self.cache.snapshot();

        let drift_workouts = cached.total_workouts.abs_diff(actual.total_workouts);
        let drift_xp = cached.total_xp.abs_diff(actual.total_xp);

        let outcome = if cached == actual {
            tracing::info!(
                "Reconciliation clean: {} workouts, {} XP (no write needed)",
                actual.total_workouts,
                actual.total_xp
            );
            ReconcileOutcome::Clean(actual)
        } else {
            tracing::info!(
                "Correcting drift: workouts {} -> {} (drift {}), XP {} -> {} (drift {})",
                cached.total_workouts,
                actual.total_workouts,
                drift_workouts,
                cached.total_xp,
                actual.total_xp,
                drift_xp
            );

            // Durable write first, then the cache, so a crash between the two
            // leaves the durable side authoritative
            self.client
                .save_aggregate(&actual, Priority::Medium)
                .await?;
            self.cache.replace(actual.clone());

            ReconcileOutcome::Corrected {
                before: cached,
                after: actual,
            }
        };

        checkpoint.last_reconciled_at = Some(now);
        checkpoint.save(&self.checkpoint_path)?;

        Ok(outcome)
    }

    /// Page through every workout record and recompute the counters.
    ///
    /// Duplicate ids (left behind by partially successful write retries) are
    /// counted once. Records that fail validation are skipped and logged, and
    /// never abort the pass. Zero records produce an all-zero snapshot.
    async fn compute_ground_truth(&self) -> Result<AggregateSnapshot> {
        let mut seen: HashSet<uuid::Uuid> = HashSet::new();
        let mut records = Vec::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0usize;
        let mut skipped = 0usize;
        let mut duplicates = 0usize;

        loop {
            let request = PageRequest {
                limit: self.page_size,
                cursor: cursor.clone(),
            };
            let page = self.client.query_workouts(request, Priority::Low).await?;
            pages += 1;

            for record in page.records {
                if !seen.insert(record.id) {
                    duplicates += 1;
                    tracing::debug!("Skipping duplicate workout record {}", record.id);
                    continue;
                }
                if let Err(reason) = record.validate() {
                    skipped += 1;
                    tracing::warn!("Skipping unusable workout record {}: {}", record.id, reason);
                    continue;
                }
                records.push(record);
            }

            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        tracing::debug!(
            "Ground truth from {} records across {} pages ({} duplicates, {} skipped)",
            records.len(),
            pages,
            duplicates,
            skipped
        );

        Ok(AggregateSnapshot::from_records(records.iter()))
    }
}
