//! # assetforge engine - asset preparation library
//!
//! Turns a tree of plain asset files into the artifacts a runtime loader
//! reads: encrypted per-file copies, per-directory `.jar` archives, and a
//! TAB-separated `index.dat` manifest.
//!
//! ## Overview
//!
//! The engine provides:
//! - Streaming encryption with a fixed header (magic, plaintext length, IV)
//! - One archive per directory holding files, never nested
//! - A glob-filtered index with optional original sizes
//! - Incremental runs driven by output modification times
//! - Progress reporting via callbacks (decoupled from UI technology)
//!
//! ## Basic Usage
//!
//! ```no_run
//! use engine::{NoProgress, ProcessorConfig, ResourceProcessor};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut config = ProcessorConfig::default();
//! config.source = "assets".into();
//! config.destination = "target/enc_assets".into();
//! config.encryption.simple_password = Some("secret".to_string());
//! config.encryption.simple_salt = Some("salt".to_string());
//!
//! let processor = ResourceProcessor::new(config)?;
//! let summary = processor.run(&NoProgress)?;
//! println!("processed {} items", summary.total_processed());
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - **model**: Core data structures (FileRecord, IndexEntry, reports)
//! - **error**: Error types and handling
//! - **fs_ops**: Low-level filesystem operations
//! - **walker**: Per-directory traversal shared by encrypt and archive
//! - **context**, **cipher**, **header**, **encrypt**: Encryption stage
//! - **archive**: Archive stage
//! - **filter**, **index**: Index stages
//! - **config**: TOML configuration
//! - **processor**: Stage orchestration
//! - **progress**: Progress callback trait

pub mod archive;
pub mod cipher;
pub mod config;
pub mod context;
pub mod encrypt;
pub mod error;
pub mod filter;
pub mod fs_ops;
pub mod header;
pub mod index;
pub mod model;
pub mod processor;
pub mod progress;
pub mod walker;

// Re-export main types and functions
pub use archive::{ArchiveBuilder, ArchiveOptions};
pub use cipher::CipherTransform;
pub use config::ProcessorConfig;
pub use context::{EncryptionContext, SecretKey, SimpleContext};
pub use encrypt::{EncryptionEngine, IncrementalOptions};
pub use error::{EngineError, EngineResult};
pub use filter::{PathFilter, Selection};
pub use header::EncryptionHeader;
pub use index::{Indexer, OutputMode};
pub use model::{FileRecord, IndexEntry, ItemOutcome, RunSummary, Stage, StageReport};
pub use processor::ResourceProcessor;
pub use progress::{NoProgress, ProgressCallback};
pub use walker::{walk_dirs, DirVisit};
