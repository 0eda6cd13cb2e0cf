//! Region OCR: detect, fan out, retry, merge.
//!
//! ## Retry Strategy
//!
//! Every backend-side failure is retried up to `max_retries` times with
//! exponential backoff (`retry_backoff_ms * 2^(attempt-1)`): 500 ms → 1 s →
//! 2 s by default. Once a region has used up its retries it becomes an
//! empty, zero-confidence cell and its siblings carry on. A page never fails
//! because one region could not be read.
//!
//! ## Ordering
//!
//! Regions complete in whatever order the backend answers. The merged
//! result is sorted by detection index, so output is identical for any
//! completion order.

use crate::document::{PageRegion, TextCell};
use crate::error::{RegionError, ServiceError};
use crate::job::JobId;
use crate::pipeline::detect::RegionDetector;
use crate::pipeline::encode::encode_region;
use crate::pipeline::inference::InferenceBackend;
use crate::pipeline::render::PageImage;
use crate::progress::{NoopProgress, ProgressHandle};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

/// Per-call context for progress reporting.
#[derive(Clone)]
pub struct PageContext {
    pub job: JobId,
    pub progress: ProgressHandle,
}

impl PageContext {
    pub fn new(job: JobId, progress: ProgressHandle) -> Self {
        Self { job, progress }
    }

    /// A context that reports nowhere.
    pub fn detached() -> Self {
        Self {
            job: JobId::nil(),
            progress: Arc::new(NoopProgress),
        }
    }
}

/// Region-level OCR over one detector and one backend.
#[derive(Clone)]
pub struct RegionOcr {
    detector: Arc<dyn RegionDetector>,
    backend: Arc<dyn InferenceBackend>,
    concurrency: usize,
    max_retries: u32,
    retry_backoff_ms: u64,
}

impl RegionOcr {
    pub fn new(detector: Arc<dyn RegionDetector>, backend: Arc<dyn InferenceBackend>) -> Self {
        Self {
            detector,
            backend,
            concurrency: 4,
            max_retries: 3,
            retry_backoff_ms: 500,
        }
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.retry_backoff_ms = ms;
        self
    }

    pub fn detector_name(&self) -> &str {
        self.detector.name()
    }

    /// Detect regions and index them in detector order, dropping
    /// zero-area boxes. Indices are assigned before filtering, so they
    /// stay tied to the detector's own output positions.
    pub async fn regions(&self, page: &PageImage) -> Result<Vec<PageRegion>, ServiceError> {
        let boxes = self.detector.detect(page).await?;
        let detected = boxes.len();
        let regions: Vec<PageRegion> = boxes
            .into_iter()
            .enumerate()
            .filter(|(_, b)| !b.bbox.is_empty())
            .map(|(index, b)| PageRegion {
                page: page.index,
                bbox: b.bbox,
                index,
                label: b.label,
                score: b.score,
            })
            .collect();
        if regions.len() < detected {
            debug!(
                "Page {}: dropped {} zero-area boxes",
                page.index + 1,
                detected - regions.len()
            );
        }
        Ok(regions)
    }

    /// Transcribe every region of `page`. Cells come back sorted by
    /// detection index.
    pub async fn ocr_page(
        &self,
        page: &PageImage,
        ctx: &PageContext,
    ) -> Result<Vec<TextCell>, ServiceError> {
        let regions = self.regions(page).await?;
        if regions.is_empty() {
            debug!("Page {}: no regions detected", page.index + 1);
            return Ok(Vec::new());
        }
        debug!(
            "Page {}: {} regions, concurrency {}",
            page.index + 1,
            regions.len(),
            self.concurrency
        );

        let tasks: Vec<_> = regions
            .into_iter()
            .map(|region| {
                let ctx = ctx.clone();
                async move {
                    let cell = self.ocr_region(page, &region).await;
                    ctx.progress.on_region_complete(
                        ctx.job,
                        page.index,
                        region.index,
                        cell.is_degraded(),
                    );
                    cell
                }
            })
            .collect();

        let mut cells: Vec<TextCell> = stream::iter(tasks)
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        cells.sort_by_key(|c| c.index);
        Ok(cells)
    }

    /// One region with retries. Never fails: exhausted regions degrade.
    async fn ocr_region(&self, page: &PageImage, region: &PageRegion) -> TextCell {
        let image = match encode_region(page, &region.bbox).await {
            Ok(img) => img,
            Err(e) => {
                warn!(
                    "Page {} region {}: {}; emitting empty cell",
                    page.index + 1,
                    region.index,
                    e
                );
                return TextCell::degraded(region);
            }
        };

        let mut last_err: Option<RegionError> = None;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = backoff_ms(self.retry_backoff_ms, attempt);
                warn!(
                    "Page {} region {}: retry {}/{} after {}ms",
                    page.index + 1,
                    region.index,
                    attempt,
                    self.max_retries,
                    backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            match self.backend.transcribe(&image).await {
                Ok(t) => {
                    return TextCell {
                        index: region.index,
                        text: t.text,
                        confidence: 1.0,
                        bbox: region.bbox,
                        from_ocr: true,
                        metadata: t.metadata,
                    };
                }
                Err(e) => {
                    let retryable = e.is_retryable();
                    warn!(
                        "Page {} region {}: attempt {} failed: {}",
                        page.index + 1,
                        region.index,
                        attempt + 1,
                        e
                    );
                    last_err = Some(e);
                    if !retryable {
                        break;
                    }
                }
            }
        }

        warn!(
            "Page {} region {}: giving up ({}); emitting empty cell",
            page.index + 1,
            region.index,
            last_err.map(|e| e.to_string()).unwrap_or_default()
        );
        TextCell::degraded(region)
    }
}

/// Delay before retry `attempt` (1-based): `base * 2^(attempt-1)`, saturating.
fn backoff_ms(base: u64, attempt: u32) -> u64 {
    base.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
}
