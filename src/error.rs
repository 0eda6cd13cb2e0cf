//! Error types for the pdf2md-server library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ServiceError`] is **fatal**: the job cannot proceed (bad path,
//!   download failed, document could not be rendered). Returned as
//!   `Err(ServiceError)` from the pipeline and surfaced to the waiting
//!   caller. Errors raised inside the pipeline carry the [`Stage`] that
//!   produced them.
//!
//! * [`RegionError`] is **non-fatal**: a single region's inference call
//!   failed. It is retried and, once retries are exhausted, the region
//!   degrades to an empty cell. It never crosses the page boundary.
//!
//! [`ErrorKind`] is the coarse taxonomy the HTTP layer translates into
//! status codes.

use crate::pipeline::Stage;
use crate::store::{StoreErrorKind, StoreOp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Coarse error category, stable across variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed or missing path input.
    Validation,
    /// Download or upload failure.
    RemoteStore,
    /// Detection, rendering or export failure.
    Conversion,
    /// Malformed response from an external model service.
    Protocol,
    /// The caller's wait budget elapsed.
    Timeout,
    /// The job was cancelled before it finished.
    Cancelled,
    /// Anything else (worker panic, closed dispatcher).
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::RemoteStore => "remote_store",
            ErrorKind::Conversion => "conversion",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// All fatal errors returned by the library.
///
/// Region-level failures use [`RegionError`] and are absorbed by the
/// OCR orchestrator rather than propagated here.
#[derive(Debug, Error)]
pub enum ServiceError {
    // ── Validation ────────────────────────────────────────────────────────
    /// A required request field was absent or blank.
    #[error("Missing required field '{0}'")]
    MissingField(&'static str),

    /// The string is not a `scheme://bucket/key` path.
    #[error("Invalid resource path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    /// The path is well formed but no store handles its scheme.
    #[error("Unsupported storage scheme '{scheme}' in '{path}'")]
    UnsupportedScheme { scheme: String, path: String },

    // ── Remote store ──────────────────────────────────────────────────────
    /// Download or upload failed.
    #[error("Failed to {op} '{path}' ({kind}): {detail}")]
    RemoteStore {
        op: StoreOp,
        path: String,
        kind: StoreErrorKind,
        detail: String,
    },

    // ── Conversion ────────────────────────────────────────────────────────
    /// pdfium could not open the staged document.
    #[error("Cannot open document '{path}': {detail}")]
    DocumentUnreadable { path: PathBuf, detail: String },

    /// pdfium returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// Layout detection failed for a page.
    #[error("Region detection failed for page {page}: {detail}")]
    DetectionFailed { page: usize, detail: String },

    /// Generic conversion failure.
    #[error("Conversion failed: {0}")]
    Conversion(String),

    /// Could not write a local artifact.
    #[error("Failed to write artifact '{path}': {source}")]
    ArtifactWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Protocol ──────────────────────────────────────────────────────────
    /// A model service answered with an unexpected shape.
    #[error("Malformed response from {service}: {detail}")]
    Protocol { service: String, detail: String },

    // ── Lifecycle ─────────────────────────────────────────────────────────
    /// The caller stopped waiting.
    #[error("OCR task did not finish within {budget_ms}ms")]
    Timeout { budget_ms: u64 },

    /// The job's cancellation token fired.
    #[error("Job was cancelled")]
    Cancelled,

    // ── Config ────────────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Stage wrapper ─────────────────────────────────────────────────────
    /// An error raised while running a pipeline stage.
    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<ServiceError>,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Tag the error with the stage it was raised in.
    ///
    /// Already-tagged errors keep their original stage.
    pub fn at(self, stage: Stage) -> Self {
        match self {
            tagged @ ServiceError::Stage { .. } => tagged,
            other => ServiceError::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// The stage that produced this error, if raised inside the pipeline.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            ServiceError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// The error with any stage wrapper removed.
    pub fn root(&self) -> &ServiceError {
        match self {
            ServiceError::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self.root() {
            ServiceError::MissingField(_)
            | ServiceError::InvalidPath { .. }
            | ServiceError::UnsupportedScheme { .. } => ErrorKind::Validation,
            ServiceError::RemoteStore { .. } => ErrorKind::RemoteStore,
            ServiceError::DocumentUnreadable { .. }
            | ServiceError::RasterisationFailed { .. }
            | ServiceError::DetectionFailed { .. }
            | ServiceError::Conversion(_)
            | ServiceError::ArtifactWrite { .. } => ErrorKind::Conversion,
            ServiceError::Protocol { .. } => ErrorKind::Protocol,
            ServiceError::Timeout { .. } => ErrorKind::Timeout,
            ServiceError::Cancelled => ErrorKind::Cancelled,
            ServiceError::InvalidConfig(_)
            | ServiceError::Internal(_)
            | ServiceError::Stage { .. } => ErrorKind::Internal,
        }
    }
}

/// A non-fatal error for a single region's inference call.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq)]
pub enum RegionError {
    /// The region could not be cropped or encoded.
    #[error("region encoding failed: {0}")]
    Encode(String),

    /// Connection refused, reset, DNS failure.
    #[error("inference request failed: {0}")]
    Network(String),

    /// The inference call exceeded its deadline.
    #[error("inference request timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The backend answered with a non-success status.
    #[error("inference backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The response did not carry a JSON transcription.
    #[error("malformed inference response: {0}")]
    Protocol(String),
}

impl RegionError {
    /// Whether another attempt could plausibly succeed.
    ///
    /// Encoding is deterministic; every backend-side failure is retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, RegionError::Encode(_))
    }
}
