//! Pipeline building blocks for one conversion job.
//!
//! The job runner in [`crate::convert`] sequences six stages; the modules
//! here implement the work inside them.
//!
//! ## Data Flow
//!
//! ```text
//! staging ──▶ render ──▶ detect ──▶ encode ──▶ inference ──▶ export
//! (local     (pdfium)   (layout)   (crop +    (VLM per      (md + json)
//!  mirror)                          base64)    region)
//! ```
//!
//! 1. [`staging`]: map remote paths onto the local input/output roots
//! 2. [`render`]: rasterise one page at the upscale factor; runs in
//!    `spawn_blocking` because pdfium is not async-safe
//! 3. [`detect`]: find the regions of a page that need OCR
//! 4. [`encode`]: crop a region out of the page and PNG/base64 it
//! 5. [`inference`]: the chat-completions call for one region
//! 6. [`regions`]: fan regions out with bounded concurrency and retry,
//!    merge them back in detection order
//! 7. [`engine`]: named OCR strategies built from the pieces above
//! 8. [`export`]: text cleanup, markdown/JSON rendering, atomic writes

pub mod detect;
pub mod encode;
pub mod engine;
pub mod export;
pub mod inference;
pub mod regions;
pub mod render;
pub mod staging;

use serde::{Deserialize, Serialize};
use std::fmt;

/// The six stages of a conversion job, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Parse both paths and look up a store for each scheme.
    Resolve,
    /// Acquire the input/output path locks.
    Lock,
    /// Download the input object into the staging area.
    Fetch,
    /// Rasterise and OCR every page.
    Convert,
    /// Write markdown and JSON artifacts locally.
    Export,
    /// Upload both artifacts.
    Publish,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Resolve,
        Stage::Lock,
        Stage::Fetch,
        Stage::Convert,
        Stage::Export,
        Stage::Publish,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Resolve => "resolve",
            Stage::Lock => "lock",
            Stage::Fetch => "fetch",
            Stage::Convert => "convert",
            Stage::Export => "export",
            Stage::Publish => "publish",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
