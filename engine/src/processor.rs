//! Run orchestration.
//!
//! `ResourceProcessor` validates a `ProcessorConfig` eagerly, then runs the
//! enabled stages in a fixed order, threading each stage's output root into
//! the next:
//!
//! 1. index-before: index `source` into `destination/<index>`
//! 2. encrypt: `source` -> `destination`
//! 3. index-after-encrypt: index `destination` into `destination/<index>`,
//!    with original sizes looked up under `source`
//! 4. archive: the encrypted tree (or `source` when encryption is off) ->
//!    `archive_destination`
//! 5. index-after-archive: copy `destination/<index>` next to the archives,
//!    then append one line per archive
//!
//! Any failure aborts the run and is reported with the stage and its roots.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::archive::{ArchiveBuilder, ARCHIVE_SUFFIX};
use crate::config::ProcessorConfig;
use crate::context::EncryptionContext;
use crate::encrypt::EncryptionEngine;
use crate::error::{EngineError, EngineResult};
use crate::filter::PathFilter;
use crate::fs_ops;
use crate::index::{Indexer, OutputMode};
use crate::model::{RunSummary, Stage, StageReport};
use crate::progress::ProgressCallback;

pub struct ResourceProcessor {
    config: ProcessorConfig,
    filter: PathFilter,
    encryption: Option<EncryptionEngine>,
}

impl ResourceProcessor {
    /// Validate `config` and prepare a run using its simple password/salt.
    ///
    /// # Errors
    /// Returns `EngineError::Config` for contradictory or incomplete
    /// settings, and `EngineError::Cipher` for an unusable cipher or key.
    /// Nothing is read or written before these checks pass.
    pub fn new(config: ProcessorConfig) -> EngineResult<Self> {
        Self::create(config, None)
    }

    /// Like `new`, but encrypting with a caller-supplied context.
    ///
    /// The config must not also carry a simple password or salt.
    pub fn with_context(
        config: ProcessorConfig,
        context: Box<dyn EncryptionContext>,
    ) -> EngineResult<Self> {
        Self::create(config, Some(context))
    }

    fn create(
        config: ProcessorConfig,
        custom: Option<Box<dyn EncryptionContext>>,
    ) -> EngineResult<Self> {
        let index_name = &config.index.file_name;
        if index_name.is_empty() || index_name.contains(['/', '\\']) {
            return Err(EngineError::config(format!(
                "index file name '{}' must be a plain file name",
                index_name
            )));
        }

        let filter = PathFilter::new(config.index.includes.as_slice(), config.index.excludes.as_slice())?;

        let mut source = config.encryption.to_context_source();
        let has_context = custom.is_some() || config.encryption.is_configured();
        source.custom = custom;

        let encryption = if config.stages.encrypt || has_context {
            let context = source.resolve()?;
            if config.stages.encrypt {
                Some(EncryptionEngine::new(
                    &config.source,
                    &config.destination,
                    context.as_ref(),
                    config.incremental_options(),
                )?)
            } else {
                tracing::debug!("encryption context configured but encrypt stage is disabled");
                None
            }
        } else {
            None
        };

        Ok(ResourceProcessor {
            config,
            filter,
            encryption,
        })
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Stages that will run, in execution order.
    pub fn enabled_stages(&self) -> Vec<Stage> {
        let stages = &self.config.stages;
        [
            (Stage::IndexBefore, stages.index_before),
            (Stage::Encrypt, stages.encrypt),
            (Stage::IndexAfterEncrypt, stages.index_after_encrypt),
            (Stage::Archive, stages.archive),
            (Stage::IndexAfterArchive, stages.index_after_archive),
        ]
        .into_iter()
        .filter_map(|(stage, enabled)| enabled.then_some(stage))
        .collect()
    }

    /// Path of the index file written next to the encrypted tree.
    pub fn index_path(&self) -> PathBuf {
        self.config.destination.join(&self.config.index.file_name)
    }

    /// Path of the index file written next to the archives.
    pub fn archive_index_path(&self) -> PathBuf {
        self.config.archive_root().join(&self.config.index.file_name)
    }

    /// Run every enabled stage.
    ///
    /// # Errors
    /// The first failure aborts the run and is returned as
    /// `EngineError::Stage`. Outputs of earlier stages stay on disk.
    pub fn run(&self, progress: &dyn ProgressCallback) -> EngineResult<RunSummary> {
        let mut summary = RunSummary::start();
        let span = tracing::info_span!("run", run_id = %summary.run_id);
        let _guard = span.enter();

        tracing::info!(stages = ?self.enabled_stages(), "starting run");

        for stage in self.enabled_stages() {
            progress.on_stage_started(stage);
            let report = self.run_stage(stage, progress).map_err(|e| {
                let (source_root, destination) = self.stage_roots(stage);
                tracing::error!(%stage, error = %e, "stage failed");
                e.in_stage(stage, source_root, destination)
            })?;

            tracing::info!(
                %stage,
                processed = report.processed,
                skipped = report.skipped,
                "stage finished"
            );
            progress.on_stage_completed(&report);
            summary.stages.push(report);
        }

        summary.finished_at = Some(Utc::now());
        progress.on_run_completed(&summary);
        Ok(summary)
    }

    fn run_stage(&self, stage: Stage, progress: &dyn ProgressCallback) -> EngineResult<StageReport> {
        let config = &self.config;
        match stage {
            Stage::IndexBefore => {
                Indexer::new(&config.source, self.index_path(), self.filter.clone())
                    .for_stage(stage)
                    .run(progress)
            }
            Stage::Encrypt => match &self.encryption {
                Some(engine) => engine.run(progress),
                None => Err(EngineError::config("encrypt stage has no encryption context")),
            },
            Stage::IndexAfterEncrypt => {
                let mut indexer =
                    Indexer::new(self.encrypted_root(), self.index_path(), self.encrypted_filter()?)
                        .for_stage(stage);
                if config.stages.encrypt {
                    indexer = indexer.with_unprocessed_root(&config.source);
                }
                indexer.run(progress)
            }
            Stage::Archive => ArchiveBuilder::new(
                self.encrypted_root(),
                config.archive_root(),
                config.incremental_options(),
                config.archive_options(),
            )
            .run(progress),
            Stage::IndexAfterArchive => self.index_archives(progress),
        }
    }

    fn index_archives(&self, progress: &dyn ProgressCallback) -> EngineResult<StageReport> {
        let prior = self.index_path();
        let output = self.archive_index_path();

        if prior != output {
            fs_ops::ensure_parent_dir_exists(&output)?;
            match fs::copy(&prior, &output) {
                Ok(_) => tracing::debug!(from = %prior.display(), to = %output.display(), "copied prior index"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    fs::write(&output, b"").map_err(|e| EngineError::WriteError {
                        path: output.clone(),
                        source: e,
                    })?;
                }
                Err(e) => {
                    return Err(EngineError::WriteError {
                        path: output,
                        source: e,
                    })
                }
            }
        }

        // Only archives: anything else under the archive root is either
        // already in the copied index or not an output of this run.
        let archive_glob = format!("*{}", ARCHIVE_SUFFIX);
        let filter = PathFilter::new(std::slice::from_ref(&archive_glob), self.config.index.excludes.as_slice())?;

        Indexer::new(self.config.archive_root(), output, filter)
            .with_mode(OutputMode::Append)
            .for_stage(Stage::IndexAfterArchive)
            .run(progress)
    }

    /// Index filter for the encrypted tree.
    ///
    /// Archives written into that tree are outputs of a later stage and are
    /// listed by index-after-archive, so they are excluded here.
    fn encrypted_filter(&self) -> EngineResult<PathFilter> {
        let stages = &self.config.stages;
        if !stages.archive && !stages.index_after_archive {
            return Ok(self.filter.clone());
        }
        let Some(prefix) = fs_ops::relative_within(self.encrypted_root(), self.config.archive_root())
        else {
            return Ok(self.filter.clone());
        };

        let archive_outputs = if prefix.is_empty() {
            format!("**/*{}", ARCHIVE_SUFFIX)
        } else {
            format!("{}/**", globset::escape(&prefix))
        };
        let mut excludes = self.config.index.excludes.clone();
        excludes.push(archive_outputs);
        PathFilter::new(self.config.index.includes.as_slice(), excludes.as_slice())
    }

    /// Root holding the tree that follows encryption.
    fn encrypted_root(&self) -> &Path {
        if self.config.stages.encrypt {
            &self.config.destination
        } else {
            &self.config.source
        }
    }

    fn stage_roots(&self, stage: Stage) -> (PathBuf, PathBuf) {
        let config = &self.config;
        match stage {
            Stage::IndexBefore => (config.source.clone(), self.index_path()),
            Stage::Encrypt => (config.source.clone(), config.destination.clone()),
            Stage::IndexAfterEncrypt => (self.encrypted_root().to_path_buf(), self.index_path()),
            Stage::Archive => (
                self.encrypted_root().to_path_buf(),
                config.archive_root().to_path_buf(),
            ),
            Stage::IndexAfterArchive => (
                config.archive_root().to_path_buf(),
                self.archive_index_path(),
            ),
        }
    }
}
