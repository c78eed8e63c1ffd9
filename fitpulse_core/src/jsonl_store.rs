//! File-backed [`RecordStore`] for local development and the CLI.
//!
//! Workout records are appended to a JSONL (JSON Lines) log and the durable
//! aggregate lives in a separate JSON file, both guarded by file locks so
//! concurrent CLI invocations cannot corrupt each other.

use crate::store::{PageRequest, RecordStore, WorkoutPage};
use crate::{
    AccountStatus, AggregateSnapshot, StoreError, StoreErrorKind, StoreResult, WorkoutRecord,
};
use async_trait::async_trait;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use uuid::Uuid;

/// JSONL-based record store rooted at a data directory
pub struct JsonlStore {
    log_path: PathBuf,
    aggregate_path: PathBuf,
}

impl JsonlStore {
    /// Create a store rooted at `data_dir` (`workouts.jsonl` + `aggregate.json`)
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        let data_dir = data_dir.as_ref();
        Self {
            log_path: data_dir.join("workouts.jsonl"),
            aggregate_path: data_dir.join("aggregate.json"),
        }
    }

    fn io_error(context: &str, err: std::io::Error) -> StoreError {
        StoreError::new(StoreErrorKind::Internal, format!("{}: {}", context, err))
    }

    fn ensure_parent_dir(path: &Path) -> StoreResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Self::io_error("create data dir", e))?;
        }
        Ok(())
    }

    /// Read every parseable record from the log under a shared lock.
    ///
    /// Unparseable lines are logged and skipped; a half-written line from a
    /// crashed writer must not take the whole history with it.
    fn read_all(&self) -> StoreResult<Vec<WorkoutRecord>> {
        if !self.log_path.exists() {
            return Ok(Vec::new());
        }

        let file =
            File::open(&self.log_path).map_err(|e| Self::io_error("open workout log", e))?;
        file.lock_shared()
            .map_err(|e| Self::io_error("lock workout log", e))?;

        let reader = BufReader::new(&file);
        let mut records = Vec::new();

        for (line_num, line_result) in reader.lines().enumerate() {
            let line = line_result.map_err(|e| Self::io_error("read workout log", e))?;
            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<WorkoutRecord>(&line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!("Failed to parse workout at line {}: {}", line_num + 1, e);
                }
            }
        }

        file.unlock()
            .map_err(|e| Self::io_error("unlock workout log", e))?;
        Ok(records)
    }

    fn append(&self, record: &WorkoutRecord) -> StoreResult<()> {
        Self::ensure_parent_dir(&self.log_path)?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .map_err(|e| Self::io_error("open workout log", e))?;

        file.lock_exclusive()
            .map_err(|e| Self::io_error("lock workout log", e))?;

        let mut writer = std::io::BufWriter::new(&file);
        let line = serde_json::to_string(record)
            .map_err(|e| StoreError::new(StoreErrorKind::Internal, e.to_string()))?;
        writer
            .write_all(line.as_bytes())
            .and_then(|_| writer.write_all(b"\n"))
            .and_then(|_| writer.flush())
            .map_err(|e| Self::io_error("append workout", e))?;
        drop(writer);

        file.unlock()
            .map_err(|e| Self::io_error("unlock workout log", e))?;

        tracing::debug!("Appended workout {} to log", record.id);
        Ok(())
    }
}

#[async_trait]
impl RecordStore for JsonlStore {
    async fn save_workout(&self, record: &WorkoutRecord) -> StoreResult<WorkoutRecord> {
        // Idempotent by id: a retried save must not duplicate the record
        if self.read_all()?.iter().any(|r| r.id == record.id) {
            tracing::debug!("Workout {} already persisted, skipping append", record.id);
            return Ok(record.clone());
        }
        self.append(record)?;
        Ok(record.clone())
    }

    async fn fetch_workout(&self, id: Uuid) -> StoreResult<WorkoutRecord> {
        self.read_all()?
            .into_iter()
            .find(|r| r.id == id)
            .ok_or_else(|| StoreError::not_found(format!("workout {}", id)))
    }

    async fn query_workouts(&self, page: PageRequest) -> StoreResult<WorkoutPage> {
        let records = self.read_all()?;

        let offset = match page.cursor.as_deref() {
            Some(cursor) => cursor.parse::<usize>().map_err(|_| {
                StoreError::new(
                    StoreErrorKind::BadRequest,
                    format!("malformed cursor '{}'", cursor),
                )
            })?,
            None => 0,
        };

        let end = (offset + page.limit).min(records.len());
        let next_cursor = if end < records.len() {
            Some(end.to_string())
        } else {
            None
        };

        Ok(WorkoutPage {
            records: records[offset.min(end)..end].to_vec(),
            next_cursor,
        })
    }

    async fn delete_workout(&self, id: Uuid) -> StoreResult<()> {
        let mut records = self.read_all()?;
        let before = records.len();
        records.retain(|r| r.id != id);
        if records.len() == before {
            return Err(StoreError::not_found(format!("workout {}", id)));
        }

        // Rewrite the log atomically via temp file + rename
        Self::ensure_parent_dir(&self.log_path)?;
        let parent = self.log_path.parent().ok_or_else(|| {
            StoreError::new(StoreErrorKind::Internal, "log path missing parent")
        })?;
        let temp =
            NamedTempFile::new_in(parent).map_err(|e| Self::io_error("create temp log", e))?;
        {
            let mut writer = std::io::BufWriter::new(temp.as_file());
            for record in &records {
                let line = serde_json::to_string(record)
                    .map_err(|e| StoreError::new(StoreErrorKind::Internal, e.to_string()))?;
                writer
                    .write_all(line.as_bytes())
                    .and_then(|_| writer.write_all(b"\n"))
                    .map_err(|e| Self::io_error("rewrite workout log", e))?;
            }
            writer
                .flush()
                .map_err(|e| Self::io_error("flush workout log", e))?;
        }
        temp.persist(&self.log_path)
            .map_err(|e| Self::io_error("replace workout log", e.error))?;
        Ok(())
    }

    async fn load_aggregate(&self) -> StoreResult<Option<AggregateSnapshot>> {
        if !self.aggregate_path.exists() {
            return Ok(None);
        }

        let file = File::open(&self.aggregate_path)
            .map_err(|e| Self::io_error("open aggregate", e))?;
        file.lock_shared()
            .map_err(|e| Self::io_error("lock aggregate", e))?;

        let mut contents = String::new();
        let mut reader = BufReader::new(&file);
        reader
            .read_to_string(&mut contents)
            .map_err(|e| Self::io_error("read aggregate", e))?;
        file.unlock()
            .map_err(|e| Self::io_error("unlock aggregate", e))?;

        match serde_json::from_str::<AggregateSnapshot>(&contents) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(e) => {
                tracing::warn!(
                    "Failed to parse aggregate file {:?}: {}. Treating as absent.",
                    self.aggregate_path,
                    e
                );
                Ok(None)
            }
        }
    }

    async fn save_aggregate(&self, snapshot: &AggregateSnapshot) -> StoreResult<()> {
        Self::ensure_parent_dir(&self.aggregate_path)?;
        let parent = self.aggregate_path.parent().ok_or_else(|| {
            StoreError::new(StoreErrorKind::Internal, "aggregate path missing parent")
        })?;

        let temp = NamedTempFile::new_in(parent)
            .map_err(|e| Self::io_error("create temp aggregate", e))?;
        temp.as_file()
            .lock_exclusive()
            .map_err(|e| Self::io_error("lock temp aggregate", e))?;

        {
            let mut writer = std::io::BufWriter::new(temp.as_file());
            let contents = serde_json::to_string(snapshot)
                .map_err(|e| StoreError::new(StoreErrorKind::Internal, e.to_string()))?;
            writer
                .write_all(contents.as_bytes())
                .and_then(|_| writer.flush())
                .map_err(|e| Self::io_error("write aggregate", e))?;
        }

        temp.as_file()
            .sync_all()
            .map_err(|e| Self::io_error("sync aggregate", e))?;
        temp.as_file()
            .unlock()
            .map_err(|e| Self::io_error("unlock temp aggregate", e))?;
        temp.persist(&self.aggregate_path)
            .map_err(|e| Self::io_error("replace aggregate", e.error))?;

        tracing::debug!("Saved aggregate to {:?}", self.aggregate_path);
        Ok(())
    }

    async fn account_status(&self) -> StoreResult<AccountStatus> {
        // The local backend has no account concept; always available
        Ok(AccountStatus::Available)
    }
}
