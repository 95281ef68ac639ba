//! Error types for the asset pipeline.
//!
//! Every failure is fatal for the run: there is no per-file error isolation.
//! Stage-level failures are wrapped in `EngineError::Stage` so the caller
//! learns which stage failed and which roots it was working on.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::model::Stage;

/// Convenience alias used throughout the engine.
pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid or contradictory configuration, detected before any work starts
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Source directory does not exist
    #[error("source directory not found: {}", path.display())]
    SourceNotFound { path: PathBuf },

    /// Failed to enumerate a directory
    #[error("failed to enumerate directory {}: {source}", path.display())]
    EnumerationFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failed to read from a source file
    #[error("failed to read {}: {source}", path.display())]
    ReadError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failed to write a destination file
    #[error("failed to write {}: {source}", path.display())]
    WriteError {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failed to create a directory
    #[error("failed to create directory {}: {source}", path.display())]
    DirectoryCreationFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Unknown cipher transform, bad key material, or key derivation failure
    #[error("cipher error: {0}")]
    Cipher(String),

    /// The zip writer rejected an entry or failed to finish the container
    #[error("failed to build archive {}: {source}", path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    /// An encrypted file does not start with a well-formed header
    #[error("invalid encryption header: {0}")]
    InvalidHeader(String),

    /// A stage aborted; `source` holds the underlying failure
    #[error("{stage} stage failed ({} -> {}): {source}", source_root.display(), destination.display())]
    Stage {
        stage: Stage,
        source_root: PathBuf,
        destination: PathBuf,
        #[source]
        source: Box<EngineError>,
    },
}

impl EngineError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Wrap this error with the stage and roots it occurred in.
    pub(crate) fn in_stage(
        self,
        stage: Stage,
        source_root: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
    ) -> Self {
        Self::Stage {
            stage,
            source_root: source_root.into(),
            destination: destination.into(),
            source: Box::new(self),
        }
    }

    /// The stage this error was raised in, if it has been wrapped.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Extract the OS error code from this error, if available.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::EnumerationFailed { source, .. }
            | Self::ReadError { source, .. }
            | Self::WriteError { source, .. }
            | Self::DirectoryCreationFailed { source, .. } => source.raw_os_error(),
            Self::Stage { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }
}
