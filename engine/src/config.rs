use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::archive::ArchiveOptions;
use crate::context::ContextSource;
use crate::encrypt::IncrementalOptions;
use crate::error::{EngineError, EngineResult};
use crate::index::DEFAULT_INDEX_FILE;

/// Top-level pipeline configuration (loaded from assetforge.toml)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    /// Tree of plain assets
    pub source: PathBuf,
    /// Root for encrypted files and the index (default: target/enc_assets)
    pub destination: PathBuf,
    /// Root for archives (default: same as `destination`)
    pub archive_destination: Option<PathBuf>,
    /// Skip outputs whose mtime already matches the input
    pub incremental: bool,
    /// Bucket size for mtime comparison, in seconds (default: 60)
    pub granularity_secs: u64,
    pub stages: StagesConfig,
    pub encryption: EncryptionConfig,
    pub index: IndexConfig,
    pub archive: ArchiveConfig,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            source: PathBuf::from("assets"),
            destination: PathBuf::from("target/enc_assets"),
            archive_destination: None,
            incremental: true,
            granularity_secs: 60,
            stages: StagesConfig::default(),
            encryption: EncryptionConfig::default(),
            index: IndexConfig::default(),
            archive: ArchiveConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StagesConfig {
    pub index_before: bool,
    pub encrypt: bool,
    pub index_after_encrypt: bool,
    pub archive: bool,
    pub index_after_archive: bool,
}

impl Default for StagesConfig {
    fn default() -> Self {
        Self {
            index_before: false,
            encrypt: true,
            index_after_encrypt: true,
            archive: false,
            index_after_archive: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionConfig {
    pub simple_password: Option<String>,
    pub simple_salt: Option<String>,
    /// Format-identifying prefix of every encrypted file (default: ICEENC)
    pub magic: Option<String>,
    /// Cipher transform name (default: AES/CBC/PKCS5Padding)
    pub cipher: Option<String>,
}

impl EncryptionConfig {
    pub(crate) fn to_context_source(&self) -> ContextSource {
        ContextSource {
            simple_password: self.simple_password.clone(),
            simple_salt: self.simple_salt.clone(),
            magic: self.magic.clone(),
            cipher: self.cipher.clone(),
            custom: None,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.simple_password.is_some() || self.simple_salt.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Manifest file name, created inside the destination roots
    pub file_name: String,
    /// Glob patterns a path must match to be indexed (empty: everything)
    pub includes: Vec<String>,
    /// Glob patterns that keep a path out of the index
    pub excludes: Vec<String>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            file_name: DEFAULT_INDEX_FILE.to_string(),
            includes: Vec::new(),
            excludes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Write META-INF/MANIFEST.MF and META-INF/INDEX.LIST into each archive
    pub embed_manifest: bool,
}

impl ProcessorConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> EngineResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| EngineError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
            .map_err(|e| EngineError::config(format!("{}: {}", path.display(), e)))
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> EngineResult<Self> {
        toml::from_str(content).map_err(|e| EngineError::config(e.to_string()))
    }

    /// Where archives are written.
    pub fn archive_root(&self) -> &Path {
        self.archive_destination.as_deref().unwrap_or(&self.destination)
    }

    pub fn incremental_options(&self) -> IncrementalOptions {
        IncrementalOptions {
            incremental: self.incremental,
            granularity: Duration::from_secs(self.granularity_secs),
        }
    }

    pub fn archive_options(&self) -> ArchiveOptions {
        ArchiveOptions {
            embed_manifest: self.archive.embed_manifest,
        }
    }
}
