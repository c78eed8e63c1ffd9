//! Reconciliation checkpoint persistence.
//!
//! The only durable local state the engine keeps beyond the cache itself is
//! the timestamp of the last completed reconciliation pass, used to gate the
//! next due check. Saved atomically (temp file + rename) with file locking so
//! concurrent processes cannot tear it.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Durable marker for the reconciliation schedule
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ReconcileCheckpoint {
    pub last_reconciled_at: Option<DateTime<Utc>>,
}

impl ReconcileCheckpoint {
    /// Load the checkpoint with shared locking.
    ///
    /// A missing or corrupted file yields the default (never reconciled);
    /// the worst outcome is an early reconciliation pass, which is harmless.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No reconcile checkpoint found, treating as never run");
            return Ok(Self::default());
        }

        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(
                    "Unable to open checkpoint {:?}: {}. Treating as never run.",
                    path,
                    e
                );
                return Ok(Self::default());
            }
        };

        if let Err(e) = file.lock_shared() {
            tracing::warn!(
                "Unable to lock checkpoint {:?}: {}. Treating as never run.",
                path,
                e
            );
            return Ok(Self::default());
        }

        let mut contents = String::new();
        let mut reader = std::io::BufReader::new(&file);
        if let Err(e) = reader.read_to_string(&mut contents) {
            let _ = file.unlock();
            tracing::warn!(
                "Failed to read checkpoint {:?}: {}. Treating as never run.",
                path,
                e
            );
            return Ok(Self::default());
        }

        file.unlock()?;

        match serde_json::from_str::<ReconcileCheckpoint>(&contents) {
            Ok(checkpoint) => Ok(checkpoint),
            Err(e) => {
                tracing::warn!(
                    "Failed to parse checkpoint {:?}: {}. Treating as never run.",
                    path,
                    e
                );
                Ok(Self::default())
            }
        }
    }

    /// Save the checkpoint atomically:
    /// 1. Write to a locked temp file in the same directory
    /// 2. Sync to disk
    /// 3. Rename over the original
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let temp = NamedTempFile::new_in(path.parent().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::Other, "checkpoint path missing parent")
        })?)?;

        temp.as_file().lock_exclusive()?;

        {
            let mut writer = std::io::BufWriter::new(temp.as_file());
            let contents = serde_json::to_string(self)?;
            writer.write_all(contents.as_bytes())?;
            writer.flush()?;
        }

        temp.as_file().sync_all()?;
        temp.as_file().unlock()?;
        temp.persist(path).map_err(|e| Error::Io(e.error))?;

        tracing::debug!("Saved reconcile checkpoint to {:?}", path);
        Ok(())
    }

    /// Whether a full reconciliation pass is due at `now`
    pub fn is_due(&self, interval: chrono::Duration, now: DateTime<Utc>) -> bool {
        match self.last_reconciled_at {
            Some(last) => now - last >= interval,
            None => true,
        }
    }
}
