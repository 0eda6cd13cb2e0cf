//! # pdf2md-server
//!
//! An HTTP service that converts PDF objects held in remote stores into
//! Markdown and structured JSON using a vision-language OCR backend.
//!
//! ## Why this crate?
//!
//! Scanned and heavily laid-out PDFs defeat text extraction. This crate
//! rasterises every page, splits it into layout regions, and asks a VLM to
//! transcribe each region, then stitches the transcriptions back together
//! in reading order. Documents live in object storage (`s3://`, `oss://`,
//! `file://`), so the service downloads, converts, and publishes without a
//! caller ever touching the filesystem.
//!
//! ## Job Lifecycle
//!
//! ```text
//! POST /ocr
//!  │
//!  ├─ Dispatcher   queue → bounded worker pool → bounded wait (408)
//!  │
//!  ├─ 1. Resolve   pick a store for each path's scheme
//!  ├─ 2. Lock      per-path mutexes, acquired in sorted order
//!  ├─ 3. Fetch     download into the staging mirror
//!  ├─ 4. Convert   render → detect → OCR regions concurrently → merge
//!  ├─ 5. Export    <key>.md and <key>.json written atomically
//!  └─ 6. Publish   upload both artifacts next to the output key
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf2md_server::server::{build_state, serve};
//! use pdf2md_server::{ServiceConfig, StoreRegistry};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServiceConfig::builder()
//!         .inference_endpoint("http://localhost:8000")
//!         .build()?;
//!     let stores = StoreRegistry::from_env().await;
//!     let state = build_state(&config, stores)?;
//!     let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
//!     serve(listener, state, async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2md-server` binary (clap + anyhow + tracing-subscriber + dotenvy) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod dispatcher;
pub mod document;
pub mod error;
pub mod job;
pub mod locks;
pub mod output;
pub mod path;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod server;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{PageSeparator, ServiceConfig, ServiceConfigBuilder};
pub use convert::{ConversionPipeline, ConversionPipelineBuilder};
pub use dispatcher::{Dispatcher, JobContext, JobHandle, JobRunner};
pub use document::{BoundingBox, Document, Page, TextCell};
pub use error::{ErrorKind, RegionError, ServiceError};
pub use job::{ConversionJob, JobId, JobState};
pub use locks::PathLockManager;
pub use output::{ConversionOutput, ConversionStats};
pub use path::ResourcePath;
pub use pipeline::Stage;
pub use progress::{NoopProgress, PipelineProgress, ProgressHandle};
pub use store::{RemoteStore, StoreError, StoreErrorKind, StoreRegistry};
