//! Progress-observer trait for pipeline events.
//!
//! Inject an [`Arc<dyn PipelineProgress>`] through
//! [`crate::convert::ConversionPipelineBuilder::progress`] to receive events
//! as jobs move through their stages. The trait is `Send + Sync` because
//! several workers run jobs at once and region events fire from concurrent
//! inference tasks.
//!
//! # Example
//!
//! ```rust
//! use pdf2md_server::{PipelineProgress, JobId, Stage};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! #[derive(Default)]
//! struct StageCounter(AtomicUsize);
//!
//! impl PipelineProgress for StageCounter {
//!     fn on_stage_complete(&self, _job: JobId, _stage: Stage) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//! ```

use crate::job::JobId;
use crate::pipeline::Stage;
use std::sync::Arc;

/// Called by the conversion pipeline as jobs progress.
///
/// All methods have default no-op implementations so observers only
/// override what they care about. Calls for different jobs may interleave.
pub trait PipelineProgress: Send + Sync {
    /// A worker picked up the job.
    fn on_job_start(&self, job: JobId) {
        let _ = job;
    }

    /// A stage is about to run.
    fn on_stage_start(&self, job: JobId, stage: Stage) {
        let _ = (job, stage);
    }

    /// A stage finished without error.
    fn on_stage_complete(&self, job: JobId, stage: Stage) {
        let _ = (job, stage);
    }

    /// One region's inference finished.
    ///
    /// * `page`: 0-indexed page
    /// * `region`: detection index
    /// * `degraded`: every attempt failed and an empty cell was emitted
    fn on_region_complete(&self, job: JobId, page: usize, region: usize, degraded: bool) {
        let _ = (job, page, region, degraded);
    }

    /// A page was fully transcribed.
    ///
    /// * `page`: 0-indexed page
    /// * `total`: pages in the document
    /// * `cells`: cells produced for the page
    fn on_page_complete(&self, job: JobId, page: usize, total: usize, cells: usize) {
        let _ = (job, page, total, cells);
    }

    /// The job reached a terminal state.
    fn on_job_complete(&self, job: JobId, success: bool) {
        let _ = (job, success);
    }
}

/// The default observer.
pub struct NoopProgress;

impl PipelineProgress for NoopProgress {}

pub type ProgressHandle = Arc<dyn PipelineProgress>;
