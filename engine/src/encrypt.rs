//! Encryption stage: mirror the source tree as streaming-encrypted files.
//!
//! Each output file is the `EncryptionHeader` followed by ciphertext, stamped
//! with the source's modification time so the next incremental run can skip
//! it.

use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cipher::{CipherTransform, BLOCK_SIZE};
use crate::context::{EncryptionContext, SecretKey};
use crate::error::{EngineError, EngineResult};
use crate::fs_ops::{self, AtomicOutput};
use crate::header::EncryptionHeader;
use crate::model::{FileRecord, ItemOutcome, Stage, StageReport};
use crate::progress::ProgressCallback;
use crate::walker::walk_dirs;

const CHUNK_SIZE: usize = 64 * 1024;

/// Options shared by the incremental stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncrementalOptions {
    /// Skip items whose output is already up to date
    pub incremental: bool,
    /// Timestamps in the same bucket of this size count as equal
    pub granularity: Duration,
}

impl Default for IncrementalOptions {
    fn default() -> Self {
        IncrementalOptions {
            incremental: true,
            granularity: fs_ops::DEFAULT_GRANULARITY,
        }
    }
}

pub struct EncryptionEngine {
    source_root: PathBuf,
    destination_root: PathBuf,
    key: SecretKey,
    magic: Vec<u8>,
    transform: CipherTransform,
    options: IncrementalOptions,
}

impl EncryptionEngine {
    /// Build an engine bound to one context.
    ///
    /// The key is derived and the cipher transform validated here, so a bad
    /// context fails before any file is touched.
    pub fn new(
        source_root: impl Into<PathBuf>,
        destination_root: impl Into<PathBuf>,
        context: &dyn EncryptionContext,
        options: IncrementalOptions,
    ) -> EngineResult<Self> {
        let transform: CipherTransform = context.cipher().parse()?;
        let key = context.create_key()?;
        transform.check_key(&key)?;

        if context.magic().is_empty() {
            return Err(EngineError::config("encryption magic must not be empty"));
        }

        Ok(EncryptionEngine {
            source_root: source_root.into(),
            destination_root: destination_root.into(),
            key,
            magic: context.magic().to_vec(),
            transform,
            options,
        })
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    pub fn destination_root(&self) -> &Path {
        &self.destination_root
    }

    pub fn transform(&self) -> CipherTransform {
        self.transform
    }

    /// Encrypt every file the walker hands out.
    pub fn run(&self, progress: &dyn ProgressCallback) -> EngineResult<StageReport> {
        tracing::info!(
            source = %self.source_root.display(),
            destination = %self.destination_root.display(),
            cipher = %self.transform,
            "encrypting"
        );

        let mut report = StageReport::new(Stage::Encrypt);
        walk_dirs(&self.source_root, |visit| {
            for file in visit.files {
                let outcome = self.encrypt_file(file)?;
                report.record(outcome, file.size);
                progress.on_item_completed(Stage::Encrypt, file, outcome);
            }
            Ok(())
        })?;
        Ok(report)
    }

    /// Encrypt one file into its mirrored destination, unless it is current.
    pub fn encrypt_file(&self, file: &FileRecord) -> EngineResult<ItemOutcome> {
        let destination = file.mirrored_under(&self.destination_root);

        if self.options.incremental {
            if let Some(existing) = fs_ops::modified_if_exists(&destination)? {
                if fs_ops::same_bucket(existing, file.modified, self.options.granularity) {
                    tracing::debug!(file = %file.relative, "up to date, skipping");
                    return Ok(ItemOutcome::Skipped);
                }
            }
        }

        tracing::info!(file = %file.relative, "encrypting file");

        let read_error = |e: io::Error| EngineError::ReadError {
            path: file.path.clone(),
            source: e,
        };
        let write_error = |e: io::Error| EngineError::WriteError {
            path: destination.clone(),
            source: e,
        };

        let mut input = File::open(&file.path).map_err(read_error)?;
        let plaintext_len = input.metadata().map_err(read_error)?.len();

        let mut encryptor = self.transform.encryptor(&self.key)?;
        let header = EncryptionHeader::new(&self.magic, plaintext_len, encryptor.iv())?;

        let mut output = AtomicOutput::create(&destination)?;
        {
            let mut writer = BufWriter::new(output.file());
            header.write_to(&mut writer).map_err(write_error)?;

            let mut buffer = vec![0u8; CHUNK_SIZE];
            let mut ciphertext = Vec::with_capacity(CHUNK_SIZE + BLOCK_SIZE);
            let mut copied = 0u64;
            loop {
                let n = match input.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(read_error(e)),
                };
                copied += n as u64;
                ciphertext.clear();
                encryptor.update(&buffer[..n], &mut ciphertext);
                writer.write_all(&ciphertext).map_err(write_error)?;
            }

            if copied != plaintext_len {
                return Err(read_error(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("file changed while encrypting ({} of {} bytes)", copied, plaintext_len),
                )));
            }

            ciphertext.clear();
            encryptor.finish(&mut ciphertext);
            writer.write_all(&ciphertext).map_err(write_error)?;
            writer.flush().map_err(write_error)?;
        }
        output.commit(file.modified)?;

        Ok(ItemOutcome::Processed)
    }
}
