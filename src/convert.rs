//! The conversion pipeline: one job from remote input to published artifacts.
//!
//! Stages run strictly in order and the first failure aborts the rest:
//!
//! ```text
//! Resolve ─▶ Lock ─▶ Fetch ─▶ Convert ─▶ Export ─▶ Publish
//! ```
//!
//! Every stage boundary (and every page inside Convert) checks the job's
//! cancellation token. Errors leave the pipeline tagged with the stage
//! that raised them. The path-lock guard is held from Lock until the
//! function returns, covering Fetch through Publish.

use crate::config::{PageSeparator, ServiceConfig};
use crate::dispatcher::{JobContext, JobRunner};
use crate::document::{Document, Page};
use crate::error::ServiceError;
use crate::locks::PathLockManager;
use crate::output::{ConversionOutput, ConversionStats};
use crate::path::ResourcePath;
use crate::pipeline::engine::OcrEngine;
use crate::pipeline::export;
use crate::pipeline::regions::PageContext;
use crate::pipeline::render::Rasterizer;
use crate::pipeline::staging;
use crate::pipeline::Stage;
use crate::progress::{NoopProgress, ProgressHandle};
use crate::store::{RemoteStore, StoreError, StoreOp, StoreRegistry};
use async_trait::async_trait;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Stores resolved for a job's two paths.
struct Resolved {
    input_store: Arc<dyn RemoteStore>,
    output_store: Arc<dyn RemoteStore>,
}

pub struct ConversionPipeline {
    stores: StoreRegistry,
    locks: Arc<PathLockManager>,
    rasterizer: Arc<dyn Rasterizer>,
    engine: Arc<dyn OcrEngine>,
    input_root: PathBuf,
    output_root: PathBuf,
    upscale: f32,
    separator: PageSeparator,
    progress: ProgressHandle,
}

impl ConversionPipeline {
    pub fn builder(
        stores: StoreRegistry,
        rasterizer: Arc<dyn Rasterizer>,
        engine: Arc<dyn OcrEngine>,
    ) -> ConversionPipelineBuilder {
        ConversionPipelineBuilder {
            pipeline: ConversionPipeline {
                stores,
                locks: Arc::new(PathLockManager::new()),
                rasterizer,
                engine,
                input_root: PathBuf::from("./input"),
                output_root: PathBuf::from("./output"),
                upscale: 3.0,
                separator: PageSeparator::default(),
                progress: Arc::new(NoopProgress),
            },
        }
    }

    pub fn locks(&self) -> &Arc<PathLockManager> {
        &self.locks
    }

    /// Run one job end to end.
    pub async fn run_job(&self, job: JobContext) -> Result<ConversionOutput, ServiceError> {
        self.progress.on_job_start(job.id);
        let result = self.execute(&job).await;
        self.progress.on_job_complete(job.id, result.is_ok());
        result
    }

    async fn execute(&self, job: &JobContext) -> Result<ConversionOutput, ServiceError> {
        let total_start = Instant::now();
        let mut stats = ConversionStats::default();

        // ── Stage 1: Resolve ─────────────────────────────────────────────
        let resolved = self
            .stage(job, Stage::Resolve, async {
                self.resolve(&job.input, &job.output)
            })
            .await?;

        // ── Stage 2: Lock ────────────────────────────────────────────────
        let _locks = self
            .stage(
                job,
                Stage::Lock,
                self.locks.acquire_pair(&job.input, &job.output, &job.cancel),
            )
            .await?;

        // ── Stage 3: Fetch ───────────────────────────────────────────────
        let fetch_start = Instant::now();
        let local_input = staging::input_path(&self.input_root, &job.input);
        self.stage(job, Stage::Fetch, async {
            staging::ensure_parent(&local_input).await?;
            resolved
                .input_store
                .download(job.input.bucket(), job.input.key(), &local_input)
                .await
                .map_err(|e| store_error(StoreOp::Download, &job.input, e))
        })
        .await?;
        stats.fetch_duration_ms = fetch_start.elapsed().as_millis() as u64;

        // ── Stage 4: Convert ─────────────────────────────────────────────
        let convert_start = Instant::now();
        let document = self
            .stage(
                job,
                Stage::Convert,
                self.convert_document(job, &local_input),
            )
            .await?;
        stats.convert_duration_ms = convert_start.elapsed().as_millis() as u64;
        stats.total_pages = document.pages.len();
        stats.total_regions = document.cell_count();
        stats.degraded_regions = document.degraded_count();

        // ── Stage 5: Export ──────────────────────────────────────────────
        let (local_md, local_json) = staging::artifact_paths(&self.output_root, &job.output);
        let markdown = self
            .stage(
                job,
                Stage::Export,
                export::write_artifacts(&document, &self.separator, &local_md, &local_json),
            )
            .await?;

        // ── Stage 6: Publish ─────────────────────────────────────────────
        let publish_start = Instant::now();
        let markdown_path = job.output.with_key_suffix(".md");
        let json_path = job.output.with_key_suffix(".json");
        self.stage(job, Stage::Publish, async {
            upload(&*resolved.output_store, &markdown_path, &local_md).await?;
            upload(&*resolved.output_store, &json_path, &local_json).await
        })
        .await?;
        stats.publish_duration_ms = publish_start.elapsed().as_millis() as u64;
        stats.total_duration_ms = total_start.elapsed().as_millis() as u64;

        Ok(ConversionOutput {
            job_id: job.id,
            markdown,
            output_path: job.output.clone(),
            markdown_path,
            json_path,
            stats,
        })
    }

    /// Run one stage: cancellation check, progress events, error tagging.
    async fn stage<T, F>(&self, job: &JobContext, stage: Stage, work: F) -> Result<T, ServiceError>
    where
        F: Future<Output = Result<T, ServiceError>>,
    {
        if job.cancel.is_cancelled() {
            return Err(ServiceError::Cancelled.at(stage));
        }
        self.progress.on_stage_start(job.id, stage);
        let started = Instant::now();
        debug!("Job {}: {} stage started", job.id, stage);

        let out = work.await.map_err(|e| e.at(stage))?;

        info!(
            "Job {}: {} stage done in {}ms",
            job.id,
            stage,
            started.elapsed().as_millis()
        );
        self.progress.on_stage_complete(job.id, stage);
        Ok(out)
    }

    /// Look up a store for each path's scheme, independently.
    fn resolve(&self, input: &ResourcePath, output: &ResourcePath) -> Result<Resolved, ServiceError> {
        let lookup = |path: &ResourcePath| {
            self.stores
                .get(path.scheme())
                .ok_or_else(|| ServiceError::UnsupportedScheme {
                    scheme: path.scheme().to_string(),
                    path: path.to_string(),
                })
        };
        Ok(Resolved {
            input_store: lookup(input)?,
            output_store: lookup(output)?,
        })
    }

    /// Rasterise and OCR every page of a staged document, one page at a time.
    async fn convert_document(
        &self,
        job: &JobContext,
        local_input: &Path,
    ) -> Result<Document, ServiceError> {
        let total = self.rasterizer.page_count(local_input).await?;
        if total == 0 {
            return Err(ServiceError::Conversion(format!(
                "{} has no pages",
                job.input
            )));
        }
        info!(
            "Job {}: {} pages, engine '{}', upscale {}×",
            job.id,
            total,
            self.engine.name(),
            self.upscale
        );

        let ctx = PageContext::new(job.id, Arc::clone(&self.progress));
        let mut document = Document::new(job.input.key());

        for index in 0..total {
            if job.cancel.is_cancelled() {
                return Err(ServiceError::Cancelled);
            }
            let image = self
                .rasterizer
                .render_page(local_input, index, self.upscale)
                .await?;
            let cells = self.engine.ocr_page(&image, &ctx).await?;
            debug!(
                "Job {}: page {}/{} → {} cells",
                job.id,
                index + 1,
                total,
                cells.len()
            );
            self.progress
                .on_page_complete(job.id, index, total, cells.len());
            document.pages.push(Page {
                index,
                size: image.size,
                cells,
            });
        }

        Ok(document)
    }
}

fn store_error(op: StoreOp, path: &ResourcePath, err: StoreError) -> ServiceError {
    ServiceError::RemoteStore {
        op,
        path: path.to_string(),
        kind: err.kind,
        detail: err.detail,
    }
}

async fn upload(store: &dyn RemoteStore, remote: &ResourcePath, local: &Path) -> Result<(), ServiceError> {
    store
        .upload(remote.bucket(), remote.key(), local)
        .await
        .map_err(|e| store_error(StoreOp::Upload, remote, e))?;
    info!("Published {}", remote);
    Ok(())
}

#[async_trait]
impl JobRunner for ConversionPipeline {
    async fn run(&self, job: JobContext) -> Result<ConversionOutput, ServiceError> {
        self.run_job(job).await
    }
}

/// Builder for [`ConversionPipeline`].
pub struct ConversionPipelineBuilder {
    pipeline: ConversionPipeline,
}

impl ConversionPipelineBuilder {
    /// Take staging roots, upscale and page separator from `config`.
    pub fn config(self, config: &ServiceConfig) -> Self {
        self.input_root(config.input_root.clone())
            .output_root(config.output_root.clone())
            .upscale(config.upscale)
            .page_separator(config.page_separator.clone())
    }

    /// Share a lock manager with other pipelines.
    pub fn locks(mut self, locks: Arc<PathLockManager>) -> Self {
        self.pipeline.locks = locks;
        self
    }

    pub fn input_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.pipeline.input_root = root.into();
        self
    }

    pub fn output_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.pipeline.output_root = root.into();
        self
    }

    pub fn upscale(mut self, factor: f32) -> Self {
        self.pipeline.upscale = factor.clamp(1.0, 6.0);
        self
    }

    pub fn page_separator(mut self, sep: PageSeparator) -> Self {
        self.pipeline.separator = sep;
        self
    }

    pub fn progress(mut self, progress: ProgressHandle) -> Self {
        self.pipeline.progress = progress;
        self
    }

    pub fn build(self) -> ConversionPipeline {
        self.pipeline
    }
}
