//! Core data model for a processing run.
//!
//! This module defines the main data structures shared by the stages:
//! - FileRecord: a file or directory observed on disk
//! - IndexEntry: one manifest line
//! - Stage, ItemOutcome: enums describing what a stage did
//! - StageReport, RunSummary: per-stage and per-run accounting

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::fs_ops;

/// A file or directory observed during a traversal.
///
/// Records are transient: they are rebuilt from the filesystem on every run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Full path on disk
    pub path: PathBuf,

    /// Path relative to the traversal root, always `/`-separated
    pub relative: String,

    /// Size in bytes (0 for directories)
    pub size: u64,

    /// Last modification time
    pub modified: SystemTime,

    /// True if this record represents a directory
    pub is_dir: bool,
}

impl FileRecord {
    /// Build a record from a path and its already-fetched metadata.
    pub fn from_metadata(path: PathBuf, relative: String, metadata: &std::fs::Metadata) -> Self {
        FileRecord {
            path,
            relative,
            size: if metadata.is_dir() { 0 } else { metadata.len() },
            modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            is_dir: metadata.is_dir(),
        }
    }

    /// File name component of the record.
    pub fn file_name(&self) -> &str {
        self.relative.rsplit('/').next().unwrap_or(&self.relative)
    }

    /// Modification time as milliseconds since the Unix epoch.
    pub fn modified_millis(&self) -> i64 {
        fs_ops::epoch_millis(self.modified)
    }

    /// Destination path of this record under another root.
    pub fn mirrored_under(&self, root: &Path) -> PathBuf {
        fs_ops::join_relative(root, &self.relative)
    }
}

/// One line of the index manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexEntry {
    pub relative: String,
    pub modified_millis: i64,
    pub size: u64,
    /// Size of the same path in the unprocessed tree, when it exists there
    pub original_size: Option<u64>,
}

impl fmt::Display for IndexEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}\t{}", self.relative, self.modified_millis, self.size)?;
        if let Some(original) = self.original_size {
            write!(f, "\t{}", original)?;
        }
        Ok(())
    }
}

/// The pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    IndexBefore,
    Encrypt,
    IndexAfterEncrypt,
    Archive,
    IndexAfterArchive,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::IndexBefore => write!(f, "index-before"),
            Stage::Encrypt => write!(f, "encrypt"),
            Stage::IndexAfterEncrypt => write!(f, "index-after-encrypt"),
            Stage::Archive => write!(f, "archive"),
            Stage::IndexAfterArchive => write!(f, "index-after-archive"),
        }
    }
}

/// What a stage did with a single item (file, directory, or index line).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Output was (re)written
    Processed,
    /// Output was up to date, or the item was filtered out
    Skipped,
}

/// Accounting for one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    pub processed: usize,
    pub skipped: usize,
    /// Bytes read from inputs of processed items
    pub bytes_read: u64,
}

impl StageReport {
    pub fn new(stage: Stage) -> Self {
        StageReport {
            stage,
            processed: 0,
            skipped: 0,
            bytes_read: 0,
        }
    }

    pub(crate) fn record(&mut self, outcome: ItemOutcome, bytes: u64) {
        match outcome {
            ItemOutcome::Processed => {
                self.processed += 1;
                self.bytes_read += bytes;
            }
            ItemOutcome::Skipped => self.skipped += 1,
        }
    }
}

/// Result of a full processing run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// Unique identifier for this run (appears in log spans)
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Reports of the stages that ran, in execution order
    pub stages: Vec<StageReport>,
}

impl RunSummary {
    pub(crate) fn start() -> Self {
        RunSummary {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            stages: Vec::new(),
        }
    }

    /// Report of a given stage, if it ran.
    pub fn stage(&self, stage: Stage) -> Option<&StageReport> {
        self.stages.iter().find(|r| r.stage == stage)
    }

    pub fn total_processed(&self) -> usize {
        self.stages.iter().map(|r| r.processed).sum()
    }

    pub fn total_skipped(&self) -> usize {
        self.stages.iter().map(|r| r.skipped).sum()
    }
}
