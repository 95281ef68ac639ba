//! Recursive directory walk shared by the encrypt and archive stages.

use std::path::Path;
use std::time::SystemTime;

use crate::error::{EngineError, EngineResult};
use crate::fs_ops;
use crate::model::FileRecord;

/// A directory handed to a walk action.
#[derive(Debug)]
pub struct DirVisit<'a> {
    /// The directory itself (never the walk root)
    pub dir: &'a FileRecord,
    /// Immediate regular files of the directory, sorted by name
    pub files: &'a [FileRecord],
}

impl DirVisit<'_> {
    pub fn modified(&self) -> SystemTime {
        self.dir.modified
    }
}

/// Visit every directory under `root` depth first.
///
/// `action` runs for each directory that holds at least one immediate file,
/// except `root` itself. Subdirectories are always descended into, whether or
/// not the action ran for their parent. The first error from the filesystem
/// or from `action` ends the walk.
pub fn walk_dirs<F>(root: &Path, mut action: F) -> EngineResult<()>
where
    F: FnMut(&DirVisit<'_>) -> EngineResult<()>,
{
    let metadata = std::fs::metadata(root).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            EngineError::SourceNotFound {
                path: root.to_path_buf(),
            }
        } else {
            EngineError::EnumerationFailed {
                path: root.to_path_buf(),
                source: e,
            }
        }
    })?;
    if !metadata.is_dir() {
        return Err(EngineError::EnumerationFailed {
            path: root.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a directory"),
        });
    }

    let root_record = FileRecord::from_metadata(root.to_path_buf(), String::new(), &metadata);
    visit(&root_record, true, &mut action)
}

fn visit<F>(dir: &FileRecord, is_root: bool, action: &mut F) -> EngineResult<()>
where
    F: FnMut(&DirVisit<'_>) -> EngineResult<()>,
{
    let (subdirs, files): (Vec<FileRecord>, Vec<FileRecord>) =
        fs_ops::list_children(&dir.path, &dir.relative)?
            .into_iter()
            .partition(|child| child.is_dir);

    if !files.is_empty() && !is_root {
        action(&DirVisit { dir, files: &files })?;
    }

    for subdir in &subdirs {
        visit(subdir, false, action)?;
    }
    Ok(())
}
