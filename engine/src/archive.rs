//! Archive stage: bundle the immediate files of each directory into one zip
//! container (`<dir>.jar`) next to where the directory would be mirrored.
//!
//! Containers are never nested. A subdirectory holding files gets its own
//! archive; a directory with no immediate files gets none.

use std::borrow::Cow;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{Datelike, Local, Timelike};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::encrypt::IncrementalOptions;
use crate::error::{EngineError, EngineResult};
use crate::fs_ops::{self, AtomicOutput};
use crate::model::{FileRecord, ItemOutcome, Stage, StageReport};
use crate::progress::ProgressCallback;
use crate::walker::{walk_dirs, DirVisit};

/// Suffix appended to a directory's relative path to name its archive.
pub const ARCHIVE_SUFFIX: &str = ".jar";

const MANIFEST_ENTRY: &str = "META-INF/MANIFEST.MF";
const INDEX_LIST_ENTRY: &str = "META-INF/INDEX.LIST";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArchiveOptions {
    /// Write a jar manifest and `META-INF/INDEX.LIST` ahead of the files
    pub embed_manifest: bool,
}

pub struct ArchiveBuilder {
    source_root: PathBuf,
    destination_root: PathBuf,
    incremental: IncrementalOptions,
    options: ArchiveOptions,
}

impl ArchiveBuilder {
    pub fn new(
        source_root: impl Into<PathBuf>,
        destination_root: impl Into<PathBuf>,
        incremental: IncrementalOptions,
        options: ArchiveOptions,
    ) -> Self {
        ArchiveBuilder {
            source_root: source_root.into(),
            destination_root: destination_root.into(),
            incremental,
            options,
        }
    }

    /// Where the archive for the directory at `relative` is written.
    pub fn archive_path(&self, relative: &str) -> PathBuf {
        let mut path = fs_ops::join_relative(&self.destination_root, relative).into_os_string();
        path.push(ARCHIVE_SUFFIX);
        PathBuf::from(path)
    }

    pub fn run(&self, progress: &dyn ProgressCallback) -> EngineResult<StageReport> {
        tracing::info!(
            source = %self.source_root.display(),
            destination = %self.destination_root.display(),
            "archiving"
        );

        // Set when archives land somewhere inside the tree being archived
        let nested = fs_ops::relative_within(&self.source_root, &self.destination_root);
        let mut report = StageReport::new(Stage::Archive);
        walk_dirs(&self.source_root, |visit| {
            let files: Cow<'_, [FileRecord]> = match nested.as_deref() {
                None => Cow::Borrowed(visit.files),
                Some(prefix) if !prefix.is_empty() && is_within(&visit.dir.relative, prefix) => {
                    tracing::debug!(dir = %visit.dir.relative, "skipping archive output directory");
                    return Ok(());
                }
                Some(_) => Cow::Owned(
                    visit
                        .files
                        .iter()
                        .filter(|f| !f.relative.ends_with(ARCHIVE_SUFFIX))
                        .cloned()
                        .collect(),
                ),
            };
            if files.is_empty() {
                return Ok(());
            }

            let outcome = self.archive_dir(&DirVisit {
                dir: visit.dir,
                files: &files,
            })?;
            let bytes: u64 = files.iter().map(|f| f.size).sum();
            report.record(outcome, bytes);
            progress.on_item_completed(Stage::Archive, visit.dir, outcome);
            Ok(())
        })?;
        Ok(report)
    }

    /// Build (or skip) the archive for one directory.
    pub fn archive_dir(&self, visit: &DirVisit<'_>) -> EngineResult<ItemOutcome> {
        let destination = self.archive_path(&visit.dir.relative);

        // Compared against the directory, not its files: adding or removing
        // a file must bump the directory mtime for a rebuild to happen.
        if self.incremental.incremental {
            if let Some(existing) = fs_ops::modified_if_exists(&destination)? {
                if fs_ops::same_bucket(existing, visit.modified(), self.incremental.granularity) {
                    tracing::debug!(dir = %visit.dir.relative, "archive up to date, skipping");
                    return Ok(ItemOutcome::Skipped);
                }
            }
        }

        tracing::info!(
            dir = %visit.dir.relative,
            files = visit.files.len(),
            "archiving directory"
        );

        let zip_error = |e: zip::result::ZipError| EngineError::Archive {
            path: destination.clone(),
            source: e,
        };

        let mut output = AtomicOutput::create(&destination)?;
        {
            let mut zip = ZipWriter::new(output.file());

            if self.options.embed_manifest {
                self.write_manifest(&mut zip, visit, &destination)
                    .map_err(zip_error)?;
            }

            for file in visit.files {
                let options = SimpleFileOptions::default()
                    .compression_method(CompressionMethod::Deflated)
                    .last_modified_time(dos_time(file.modified))
                    .large_file(file.size >= u32::MAX as u64);
                zip.start_file(file.file_name(), options).map_err(zip_error)?;

                let mut input = File::open(&file.path).map_err(|e| EngineError::ReadError {
                    path: file.path.clone(),
                    source: e,
                })?;
                io::copy(&mut input, &mut zip).map_err(|e| zip_error(e.into()))?;
            }

            zip.finish().map_err(zip_error)?;
        }
        output.commit(visit.modified())?;

        Ok(ItemOutcome::Processed)
    }

    fn write_manifest<W: Write + io::Seek>(
        &self,
        zip: &mut ZipWriter<W>,
        visit: &DirVisit<'_>,
        destination: &Path,
    ) -> zip::result::ZipResult<()> {
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        zip.start_file(MANIFEST_ENTRY, options.clone())?;
        let mut manifest = String::from("Manifest-Version: 1.0\r\n\r\n");
        for file in visit.files {
            manifest.push_str(&format!("Name: {}\r\n\r\n", file.file_name()));
        }
        zip.write_all(manifest.as_bytes())?;

        let archive_name = destination
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        zip.start_file(INDEX_LIST_ENTRY, options)?;
        zip.write_all(format!("JarIndex-Version: 1.0\n\n{}\n", archive_name).as_bytes())?;
        Ok(())
    }
}

/// True when `relative` is `prefix` or lies below it.
fn is_within(relative: &str, prefix: &str) -> bool {
    relative
        .strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

/// Convert a filesystem timestamp to a zip (local, DOS) timestamp.
///
/// Times outside the DOS range (before 1980 or after 2107) fall back to the
/// zip epoch.
pub fn dos_time(time: SystemTime) -> zip::DateTime {
    let local: chrono::DateTime<Local> = time.into();
    zip::DateTime::from_date_and_time(
        local.year().clamp(0, u16::MAX as i32) as u16,
        local.month() as u8,
        local.day() as u8,
        local.hour() as u8,
        local.minute() as u8,
        local.second() as u8,
    )
    .unwrap_or_default()
}
