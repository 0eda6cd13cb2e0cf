//! Result types returned by a finished conversion job.

use crate::job::JobId;
use crate::path::ResourcePath;
use serde::{Deserialize, Serialize};

/// What a successful job hands back to its caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionOutput {
    pub job_id: JobId,
    /// The assembled markdown document.
    pub markdown: String,
    /// Output path as requested.
    pub output_path: ResourcePath,
    /// Where the markdown artifact was published.
    pub markdown_path: ResourcePath,
    /// Where the JSON artifact was published.
    pub json_path: ResourcePath,
    pub stats: ConversionStats,
}

/// Counters and timings for one job.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConversionStats {
    pub total_pages: usize,
    pub total_regions: usize,
    /// Regions that failed every retry and were emitted empty.
    pub degraded_regions: usize,
    pub fetch_duration_ms: u64,
    pub convert_duration_ms: u64,
    pub publish_duration_ms: u64,
    pub total_duration_ms: u64,
}
