//! Index stage: scan a tree and write one manifest line per selected file.
//!
//! Unlike encryption and archiving, the indexer does not use the directory
//! walker; files directly under the root are indexed too.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{EngineError, EngineResult};
use crate::filter::PathFilter;
use crate::fs_ops;
use crate::model::{FileRecord, IndexEntry, ItemOutcome, Stage, StageReport};
use crate::progress::ProgressCallback;

/// Default manifest file name.
pub const DEFAULT_INDEX_FILE: &str = "index.dat";

/// How the manifest file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    #[default]
    Truncate,
    Append,
}

#[derive(Default)]
struct Scan {
    entries: Vec<IndexEntry>,
    skipped: usize,
}

pub struct Indexer {
    root: PathBuf,
    output: PathBuf,
    filter: PathFilter,
    unprocessed_root: Option<PathBuf>,
    mode: OutputMode,
    stage: Stage,
}

impl Indexer {
    pub fn new(root: impl Into<PathBuf>, output: impl Into<PathBuf>, filter: PathFilter) -> Self {
        Indexer {
            root: root.into(),
            output: output.into(),
            filter,
            unprocessed_root: None,
            mode: OutputMode::Truncate,
            stage: Stage::IndexBefore,
        }
    }

    /// Report the size of each path under `root` as a fourth column.
    pub fn with_unprocessed_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.unprocessed_root = Some(root.into());
        self
    }

    pub fn with_mode(mut self, mode: OutputMode) -> Self {
        self.mode = mode;
        self
    }

    /// Stage reported to progress callbacks.
    pub fn for_stage(mut self, stage: Stage) -> Self {
        self.stage = stage;
        self
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn run(&self, progress: &dyn ProgressCallback) -> EngineResult<StageReport> {
        tracing::info!(
            root = %self.root.display(),
            output = %self.output.display(),
            mode = ?self.mode,
            "indexing"
        );

        let found = self.scan_root(progress)?;
        self.write(&found.entries)?;

        let mut report = StageReport::new(self.stage);
        report.processed = found.entries.len();
        report.skipped = found.skipped;
        report.bytes_read = found.entries.iter().map(|e| e.size).sum();
        Ok(report)
    }

    /// Scan the root and return the entries that would be written.
    pub fn collect(&self, progress: &dyn ProgressCallback) -> EngineResult<Vec<IndexEntry>> {
        Ok(self.scan_root(progress)?.entries)
    }

    fn scan_root(&self, progress: &dyn ProgressCallback) -> EngineResult<Scan> {
        let output = canonical_or_self(&self.output);
        let mut found = Scan::default();
        self.scan(&self.root, "", &output, progress, &mut found)?;
        Ok(found)
    }

    fn scan(
        &self,
        dir: &Path,
        relative: &str,
        output: &Path,
        progress: &dyn ProgressCallback,
        found: &mut Scan,
    ) -> EngineResult<()> {
        for child in fs_ops::list_children(dir, relative)? {
            if child.is_dir {
                self.scan(&child.path, &child.relative, output, progress, found)?;
                continue;
            }

            if self.is_output(&child, output) {
                tracing::debug!(path = %child.relative, "skipping index output");
                continue;
            }

            if !self.filter.is_selected(&child.relative) {
                found.skipped += 1;
                progress.on_item_completed(self.stage, &child, ItemOutcome::Skipped);
                continue;
            }

            found.entries.push(IndexEntry {
                relative: child.relative.clone(),
                modified_millis: child.modified_millis(),
                size: child.size,
                original_size: self.original_size(&child.relative)?,
            });
            progress.on_item_completed(self.stage, &child, ItemOutcome::Processed);
        }
        Ok(())
    }

    fn is_output(&self, file: &FileRecord, output: &Path) -> bool {
        if file.path.file_name() != self.output.file_name() {
            return false;
        }
        canonical_or_self(&file.path) == output
    }

    fn original_size(&self, relative: &str) -> EngineResult<Option<u64>> {
        let Some(root) = &self.unprocessed_root else {
            return Ok(None);
        };
        let path = fs_ops::join_relative(root, relative);
        match fs::metadata(&path) {
            Ok(metadata) if metadata.is_file() => Ok(Some(metadata.len())),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(EngineError::ReadError { path, source: e }),
        }
    }

    fn write(&self, entries: &[IndexEntry]) -> EngineResult<()> {
        fs_ops::ensure_parent_dir_exists(&self.output)?;

        let write_error = |e| EngineError::WriteError {
            path: self.output.clone(),
            source: e,
        };

        let file = match self.mode {
            OutputMode::Truncate => File::create(&self.output),
            OutputMode::Append => OpenOptions::new().create(true).append(true).open(&self.output),
        }
        .map_err(write_error)?;

        let mut writer = BufWriter::new(file);
        for entry in entries {
            writeln!(writer, "{}", entry).map_err(write_error)?;
        }
        writer.flush().map_err(write_error)
    }
}

fn canonical_or_self(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use filetime::FileTime;

    fn read_lines(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .expect("Failed to read index")
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_lines_are_tab_separated() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let root = temp_dir.path().join("root");
        fs::create_dir_all(root.join("art")).unwrap();
        fs::write(root.join("top.txt"), b"12345").unwrap();
        fs::write(root.join("art").join("a.png"), b"png").unwrap();
        filetime::set_file_mtime(root.join("top.txt"), FileTime::from_unix_time(1_600_000_000, 0)).unwrap();

        let output = temp_dir.path().join("index.dat");
        let report = Indexer::new(&root, &output, PathFilter::allow_all())
            .run(&NoProgress)
            .expect("Indexing failed");

        assert_eq!(report.processed, 2);
        let lines = read_lines(&output);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("art/a.png\t"));
        assert_eq!(lines[1], "top.txt\t1600000000000\t5");
    }

    #[test]
    fn test_prior_index_is_not_listed() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let root = temp_dir.path();
        fs::write(root.join("a.txt"), b"a").unwrap();
        fs::write(root.join(DEFAULT_INDEX_FILE), b"stale\t0\t0\n").unwrap();

        let output = root.join(DEFAULT_INDEX_FILE);
        Indexer::new(root, &output, PathFilter::allow_all())
            .run(&NoProgress)
            .unwrap();

        let lines = read_lines(&output);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("a.txt\t"));
    }

    #[test]
    fn test_same_name_elsewhere_is_listed() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let root = temp_dir.path();
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::write(root.join("sub").join(DEFAULT_INDEX_FILE), b"data").unwrap();

        let output = root.join(DEFAULT_INDEX_FILE);
        Indexer::new(root, &output, PathFilter::allow_all())
            .run(&NoProgress)
            .unwrap();

        let lines = read_lines(&output);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("sub/index.dat\t"));
    }

    #[test]
    fn test_filter_applies_to_relative_paths() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let root = temp_dir.path().join("root");
        fs::create_dir_all(root.join("tmp")).unwrap();
        fs::create_dir_all(root.join("art")).unwrap();
        fs::write(root.join("tmp").join("a.png"), b"1").unwrap();
        fs::write(root.join("art").join("a.png"), b"2").unwrap();
        fs::write(root.join("art").join("a.txt"), b"3").unwrap();

        let filter = PathFilter::new(&["*.png"], &["tmp/**"]).unwrap();
        let output = temp_dir.path().join("index.dat");
        let report = Indexer::new(&root, &output, filter).run(&NoProgress).unwrap();

        assert_eq!(report.processed, 1);
        assert_eq!(report.skipped, 2);
        let lines = read_lines(&output);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("art/a.png\t"));
    }

    #[test]
    fn test_original_size_column() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let plain = temp_dir.path().join("plain");
        let processed = temp_dir.path().join("processed");
        fs::create_dir_all(plain.join("d")).unwrap();
        fs::create_dir_all(processed.join("d")).unwrap();
        fs::write(plain.join("d").join("f.bin"), vec![0u8; 10]).unwrap();
        fs::write(processed.join("d").join("f.bin"), vec![0u8; 48]).unwrap();
        fs::write(processed.join("d").join("extra.bin"), vec![0u8; 4]).unwrap();

        let output = temp_dir.path().join("index.dat");
        Indexer::new(&processed, &output, PathFilter::allow_all())
            .with_unprocessed_root(&plain)
            .run(&NoProgress)
            .unwrap();

        let lines = read_lines(&output);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].split('\t').count(), 3, "extra.bin has no original");
        let fields: Vec<&str> = lines[1].split('\t').collect();
        assert_eq!(fields[0], "d/f.bin");
        assert_eq!(fields[2], "48");
        assert_eq!(fields[3], "10");
    }

    #[test]
    fn test_append_keeps_existing_lines() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let root = temp_dir.path().join("root");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("b.txt"), b"b").unwrap();

        let output = temp_dir.path().join("index.dat");
        fs::write(&output, "a.txt\t0\t1\n").unwrap();

        Indexer::new(&root, &output, PathFilter::allow_all())
            .with_mode(OutputMode::Append)
            .run(&NoProgress)
            .unwrap();

        let lines = read_lines(&output);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "a.txt\t0\t1");
        assert!(lines[1].starts_with("b.txt\t"));
    }

    #[test]
    fn test_missing_root_fails() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let result = Indexer::new(
            temp_dir.path().join("absent"),
            temp_dir.path().join("index.dat"),
            PathFilter::allow_all(),
        )
        .run(&NoProgress);
        assert!(matches!(result, Err(EngineError::SourceNotFound { .. })));
    }
}
