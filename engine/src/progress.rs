//! Progress reporting trait.
//!
//! This module defines the ProgressCallback trait, which allows decoupling
//! the pipeline from any specific UI. The engine logs through `tracing`
//! regardless; callbacks are for front ends that want structured events.
//!
//! Callbacks are informational only and cannot influence control flow.

use crate::model::{FileRecord, ItemOutcome, RunSummary, Stage, StageReport};

/// Trait for receiving progress updates from a processing run.
///
/// All methods are called synchronously, on the thread running the stages.
/// Every method has an empty default so implementors pick what they need.
pub trait ProgressCallback {
    /// Called when a stage starts.
    fn on_stage_started(&self, _stage: Stage) {}

    /// Called after a stage handled one file (or, for archives, one directory).
    fn on_item_completed(&self, _stage: Stage, _item: &FileRecord, _outcome: ItemOutcome) {}

    /// Called when a stage finished successfully.
    fn on_stage_completed(&self, _report: &StageReport) {}

    /// Called once every enabled stage has finished.
    fn on_run_completed(&self, _summary: &RunSummary) {}
}

/// Callback that ignores every event.
pub struct NoProgress;

impl ProgressCallback for NoProgress {}
