//! Filesystem operations module.
//!
//! This module provides low-level operations shared by the stages:
//! - Listing a directory's immediate children as FileRecords
//! - Building `/`-separated relative paths and mapping them onto other roots
//! - Comparing modification times at a configurable granularity
//! - Writing outputs through a temporary file that is renamed into place

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use filetime::FileTime;
use tempfile::NamedTempFile;

use crate::error::{EngineError, EngineResult};
use crate::model::FileRecord;

/// Default timestamp granularity for incremental checks.
pub const DEFAULT_GRANULARITY: Duration = Duration::from_secs(60);

/// List the immediate children of `dir`, sorted by name.
///
/// Only regular files and directories are returned; symlinks are followed.
/// Dangling links are ignored, every other error aborts.
pub fn list_children(dir: &Path, dir_relative: &str) -> EngineResult<Vec<FileRecord>> {
    let entries = fs::read_dir(dir).map_err(|e| enumeration_error(dir, e))?;

    let mut children = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| enumeration_error(dir, e))?;
        let entry_path = entry.path();

        let metadata = match fs::metadata(&entry_path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %entry_path.display(), "skipping dangling link");
                continue;
            }
            Err(e) => return Err(enumeration_error(dir, e)),
        };
        if !metadata.is_file() && !metadata.is_dir() {
            continue;
        }

        let name = entry.file_name().to_string_lossy().into_owned();
        let relative = child_relative(dir_relative, &name);
        children.push(FileRecord::from_metadata(entry_path, relative, &metadata));
    }

    children.sort_by(|a, b| a.relative.cmp(&b.relative));
    Ok(children)
}

fn enumeration_error(dir: &Path, source: io::Error) -> EngineError {
    if source.kind() == io::ErrorKind::NotFound {
        EngineError::SourceNotFound {
            path: dir.to_path_buf(),
        }
    } else {
        EngineError::EnumerationFailed {
            path: dir.to_path_buf(),
            source,
        }
    }
}

/// Append a path segment to a `/`-separated relative path.
pub fn child_relative(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", parent, name)
    }
}

/// Map a `/`-separated relative path onto `root` using host separators.
pub fn join_relative(root: &Path, relative: &str) -> PathBuf {
    relative
        .split('/')
        .filter(|segment| !segment.is_empty())
        .fold(root.to_path_buf(), |path, segment| path.join(segment))
}

/// Position of `path` inside `root` as a `/`-separated relative path.
///
/// Both sides are resolved through the filesystem as far as they exist, so
/// `out`, `./out` and `out/sub/..` all name the same place. Returns `None`
/// when `path` is outside `root` and `Some("")` when they are the same.
pub fn relative_within(root: &Path, path: &Path) -> Option<String> {
    let root = resolve(root);
    let path = resolve(path);
    let rest = path.strip_prefix(&root).ok()?;
    let segments: Vec<String> = rest
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(segments.join("/"))
}

/// Canonicalize the longest existing prefix of `path` and re-append the rest.
fn resolve(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut existing = absolute.as_path();
    let mut missing = Vec::new();
    loop {
        if let Ok(canonical) = fs::canonicalize(existing) {
            return missing.iter().rev().fold(canonical, |p, name| p.join(name));
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                existing = parent;
            }
            _ => return absolute,
        }
    }
}

/// Milliseconds since the Unix epoch (negative before it).
pub fn epoch_millis(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => after.as_millis() as i64,
        Err(before) => -(before.duration().as_millis() as i64),
    }
}

/// True when both times fall into the same `granularity`-sized bucket.
///
/// Buckets are `floor(millis / granularity)`, so with the default one-minute
/// granularity 12:00:59 and 12:00:01 match while 12:00:59 and 12:01:00 don't.
pub fn same_bucket(a: SystemTime, b: SystemTime, granularity: Duration) -> bool {
    let step = (granularity.as_millis() as i64).max(1);
    epoch_millis(a).div_euclid(step) == epoch_millis(b).div_euclid(step)
}

/// Modification time of `path`, or `None` when it does not exist.
pub fn modified_if_exists(path: &Path) -> EngineResult<Option<SystemTime>> {
    match fs::metadata(path) {
        Ok(metadata) => metadata
            .modified()
            .map(Some)
            .map_err(|e| EngineError::ReadError {
                path: path.to_path_buf(),
                source: e,
            }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(EngineError::ReadError {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// An output file being written next to its final location.
///
/// Nothing appears at the target path until `commit` succeeds; dropping an
/// uncommitted output removes the temporary file.
pub struct AtomicOutput {
    target: PathBuf,
    temp: NamedTempFile,
}

impl AtomicOutput {
    /// Create the temporary file in the target's directory, creating parents.
    pub fn create(target: &Path) -> EngineResult<Self> {
        ensure_parent_dir_exists(target)?;
        let dir = match target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let temp = tempfile::Builder::new()
            .prefix(".assetforge-")
            .tempfile_in(dir)
            .map_err(|e| EngineError::WriteError {
                path: target.to_path_buf(),
                source: e,
            })?;

        Ok(AtomicOutput {
            target: target.to_path_buf(),
            temp,
        })
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn file(&mut self) -> &mut fs::File {
        self.temp.as_file_mut()
    }

    /// Stamp the output with `modified` and move it over the target path.
    pub fn commit(mut self, modified: SystemTime) -> EngineResult<()> {
        let target = self.target;
        let write_error = |e: io::Error| EngineError::WriteError {
            path: target.clone(),
            source: e,
        };

        self.temp.as_file_mut().flush().map_err(write_error)?;
        filetime::set_file_mtime(self.temp.path(), FileTime::from_system_time(modified))
            .map_err(write_error)?;
        self.temp.persist(&target).map_err(|e| write_error(e.error))?;
        Ok(())
    }
}

/// Ensure the parent directory of a path exists, creating it if necessary.
///
/// # Errors
/// Returns EngineError if directory creation fails or the parent is a file
pub fn ensure_parent_dir_exists(path: &Path) -> EngineResult<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    ensure_dir_exists(parent)
}

/// Ensure `dir` exists as a directory, creating it recursively if needed.
pub fn ensure_dir_exists(dir: &Path) -> EngineResult<()> {
    match fs::metadata(dir) {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(EngineError::DirectoryCreationFailed {
            path: dir.to_path_buf(),
            source: io::Error::new(
                io::ErrorKind::InvalidInput,
                "path exists but is not a directory",
            ),
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(dir).map_err(|e| EngineError::DirectoryCreationFailed {
                path: dir.to_path_buf(),
                source: e,
            })
        }
        Err(e) => Err(EngineError::DirectoryCreationFailed {
            path: dir.to_path_buf(),
            source: e,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn test_relative_within_resolves_spelling() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let root = temp_dir.path().join("out");
        fs::create_dir_all(root.join("sub")).expect("Failed to create dirs");

        assert_eq!(relative_within(&root, &root.join("sub").join("..")), Some(String::new()));
        assert_eq!(relative_within(&root, &root.join("jars").join("deep")), Some("jars/deep".to_string()));
        assert_eq!(relative_within(&root, &root.join(".").join("sub")), Some("sub".to_string()));
        assert_eq!(relative_within(&root.join("sub"), &root), None);
        assert_eq!(relative_within(&root, &temp_dir.path().join("other")), None);
    }

    #[test]
    fn test_list_children_sorted_with_relative_paths() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let root = temp_dir.path();
        fs::write(root.join("b.txt"), b"bb").expect("Failed to write b");
        fs::write(root.join("a.txt"), b"a").expect("Failed to write a");
        fs::create_dir(root.join("sub")).expect("Failed to create sub");

        let children = list_children(root, "art").expect("Failed to list");
        let names: Vec<_> = children.iter().map(|c| c.relative.as_str()).collect();
        assert_eq!(names, vec!["art/a.txt", "art/b.txt", "art/sub"]);
        assert_eq!(children[1].size, 2);
        assert!(children[2].is_dir);
    }

    #[test]
    fn test_list_children_of_missing_directory() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let result = list_children(&temp_dir.path().join("missing"), "");
        assert!(matches!(result, Err(EngineError::SourceNotFound { .. })));
    }

    #[test]
    fn test_same_bucket_minute_granularity() {
        assert!(same_bucket(at(120), at(179), DEFAULT_GRANULARITY));
        assert!(!same_bucket(at(179), at(180), DEFAULT_GRANULARITY));
        assert!(!same_bucket(at(120), at(121), Duration::from_secs(1)));
    }

    #[test]
    fn test_join_relative_uses_host_separators() {
        let joined = join_relative(Path::new("out"), "a/b/c.txt");
        assert_eq!(joined, Path::new("out").join("a").join("b").join("c.txt"));
        assert_eq!(child_relative("", "x"), "x");
        assert_eq!(child_relative("a/b", "x"), "a/b/x");
    }

    #[test]
    fn test_atomic_output_commit_sets_mtime() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let target = temp_dir.path().join("nested").join("out.bin");

        let mut output = AtomicOutput::create(&target).expect("Failed to create output");
        output.file().write_all(b"payload").expect("Failed to write");
        assert!(!target.exists(), "target must not appear before commit");
        output.commit(at(1_000_000)).expect("Failed to commit");

        assert_eq!(fs::read(&target).expect("Failed to read"), b"payload");
        let mtime = fs::metadata(&target).unwrap().modified().unwrap();
        assert_eq!(epoch_millis(mtime), 1_000_000_000);
    }

    #[test]
    fn test_atomic_output_dropped_leaves_nothing() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let target = temp_dir.path().join("out.bin");
        {
            let mut output = AtomicOutput::create(&target).expect("Failed to create output");
            output.file().write_all(b"partial").expect("Failed to write");
        }
        assert!(!target.exists());
        assert_eq!(fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_ensure_parent_dir_exists() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("subdir").join("file.txt");

        ensure_parent_dir_exists(&path).expect("Failed to create parent");
        assert!(path.parent().unwrap().exists());
    }

    #[test]
    fn test_ensure_parent_dir_rejects_file_parent() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let blocker = temp_dir.path().join("blocker");
        fs::write(&blocker, b"x").expect("Failed to write");

        let result = ensure_parent_dir_exists(&blocker.join("child.txt"));
        assert!(matches!(result, Err(EngineError::DirectoryCreationFailed { .. })));
    }
}
