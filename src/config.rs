//! Service configuration.
//!
//! Every knob lives in [`ServiceConfig`], built via [`ServiceConfigBuilder`].
//! The binary maps command-line flags and environment variables onto the
//! builder; tests set only what they need and rely on the defaults below.

use crate::error::ServiceError;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Configuration for the conversion service.
///
/// # Example
/// ```rust
/// use pdf2md_server::ServiceConfig;
///
/// let config = ServiceConfig::builder()
///     .workers(8)
///     .upscale(2.0)
///     .inference_endpoint("http://localhost:8000")
///     .build()
///     .unwrap();
/// assert_eq!(config.workers, 8);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// HTTP listen address. Default: `0.0.0.0:6008`.
    pub listen_addr: SocketAddr,

    /// Worker tasks, i.e. jobs converted at once. Default: 4.
    pub workers: usize,

    /// How long `POST /ocr` waits for its job before answering 408. Default: 300.
    pub wait_timeout_secs: u64,

    /// Cancel a job when its caller stops waiting. Default: true.
    ///
    /// When false the job runs to completion and publishes its artifacts
    /// even though nobody receives the response.
    pub cancel_on_timeout: bool,

    /// Staging root for downloaded inputs. Default: `./input`.
    pub input_root: PathBuf,

    /// Staging root for local artifacts. Default: `./output`.
    pub output_root: PathBuf,

    /// Render scale relative to 72 DPI. Range: 1.0–6.0. Default: 3.0.
    pub upscale: f32,

    /// Concurrent inference calls per page. Default: 4.
    pub region_concurrency: usize,

    /// Retries per region after the first attempt. Range: 0–10. Default: 3.
    pub max_retries: u32,

    /// Initial backoff, doubled per retry. Default: 500.
    pub retry_backoff_ms: u64,

    /// Base URL of the chat-completions service. Default: `http://olmocr-7b:6008`.
    pub inference_endpoint: String,

    /// Model name sent with every request. Default: `olmOCR-7B`.
    pub model: String,

    /// Default: 4096.
    pub max_tokens: usize,

    /// Default: 0.0.
    pub temperature: f32,

    /// Per-inference-call timeout. Default: 120.
    pub api_timeout_secs: u64,

    /// Connect timeout for `GET /health` probes. Default: 2000.
    pub health_connect_timeout_ms: u64,

    /// Total timeout for `GET /health` probes. Default: 5000.
    pub health_timeout_ms: u64,

    /// OCR engine name (`region-vlm` or `page-vlm`). Default: `region-vlm`.
    pub engine: String,

    /// Layout-detection service URL. When unset, `region-vlm` treats each
    /// page as one region.
    pub layout_endpoint: Option<String>,

    /// Separator between pages in the markdown artifact. Default: None.
    pub page_separator: PageSeparator,

    /// Directory containing the pdfium shared library. Default: system search path.
    pub pdfium_lib_path: Option<PathBuf>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 6008)),
            workers: 4,
            wait_timeout_secs: 300,
            cancel_on_timeout: true,
            input_root: PathBuf::from("./input"),
            output_root: PathBuf::from("./output"),
            upscale: 3.0,
            region_concurrency: 4,
            max_retries: 3,
            retry_backoff_ms: 500,
            inference_endpoint: "http://olmocr-7b:6008".to_string(),
            model: "olmOCR-7B".to_string(),
            max_tokens: 4096,
            temperature: 0.0,
            api_timeout_secs: 120,
            health_connect_timeout_ms: 2000,
            health_timeout_ms: 5000,
            engine: "region-vlm".to_string(),
            layout_endpoint: None,
            page_separator: PageSeparator::default(),
            pdfium_lib_path: None,
        }
    }
}

impl ServiceConfig {
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn listen_addr(mut self, addr: SocketAddr) -> Self {
        self.config.listen_addr = addr;
        self
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.config.workers = n.max(1);
        self
    }

    pub fn wait_timeout_secs(mut self, secs: u64) -> Self {
        self.config.wait_timeout_secs = secs;
        self
    }

    pub fn cancel_on_timeout(mut self, v: bool) -> Self {
        self.config.cancel_on_timeout = v;
        self
    }

    pub fn input_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.input_root = root.into();
        self
    }

    pub fn output_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.output_root = root.into();
        self
    }

    pub fn upscale(mut self, factor: f32) -> Self {
        self.config.upscale = factor.clamp(1.0, 6.0);
        self
    }

    pub fn region_concurrency(mut self, n: usize) -> Self {
        self.config.region_concurrency = n.max(1);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n.min(10);
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn inference_endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.inference_endpoint = url.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs.max(1);
        self
    }

    pub fn health_connect_timeout_ms(mut self, ms: u64) -> Self {
        self.config.health_connect_timeout_ms = ms.max(1);
        self
    }

    pub fn health_timeout_ms(mut self, ms: u64) -> Self {
        self.config.health_timeout_ms = ms.max(1);
        self
    }

    pub fn engine(mut self, name: impl Into<String>) -> Self {
        self.config.engine = name.into();
        self
    }

    pub fn layout_endpoint(mut self, url: Option<String>) -> Self {
        self.config.layout_endpoint = url.filter(|u| !u.is_empty());
        self
    }

    pub fn page_separator(mut self, sep: PageSeparator) -> Self {
        self.config.page_separator = sep;
        self
    }

    pub fn pdfium_lib_path(mut self, path: Option<PathBuf>) -> Self {
        self.config.pdfium_lib_path = path;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ServiceConfig, ServiceError> {
        let c = &self.config;
        if !(1.0..=6.0).contains(&c.upscale) {
            return Err(ServiceError::InvalidConfig(format!(
                "upscale must be 1.0–6.0, got {}",
                c.upscale
            )));
        }
        if c.workers == 0 || c.region_concurrency == 0 {
            return Err(ServiceError::InvalidConfig(
                "workers and region concurrency must be ≥ 1".into(),
            ));
        }
        if c.wait_timeout_secs == 0 {
            return Err(ServiceError::InvalidConfig(
                "wait timeout must be at least one second".into(),
            ));
        }
        if !c.inference_endpoint.starts_with("http://")
            && !c.inference_endpoint.starts_with("https://")
        {
            return Err(ServiceError::InvalidConfig(format!(
                "inference endpoint must be an http(s) URL, got '{}'",
                c.inference_endpoint
            )));
        }
        if c.engine.trim().is_empty() {
            return Err(ServiceError::InvalidConfig("engine name is empty".into()));
        }
        Ok(self.config)
    }
}

/// How to separate pages in the markdown artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum PageSeparator {
    /// Blank line only. (default)
    #[default]
    None,
    /// `---`
    HorizontalRule,
    /// `<!-- page N -->`
    Comment,
    /// Custom string between pages.
    Custom(String),
}

impl PageSeparator {
    /// The separator placed before page `page_num` (1-indexed).
    pub fn render(&self, page_num: usize) -> String {
        match self {
            PageSeparator::None => "\n\n".to_string(),
            PageSeparator::HorizontalRule => "\n\n---\n\n".to_string(),
            PageSeparator::Comment => format!("\n\n<!-- page {} -->\n\n", page_num),
            PageSeparator::Custom(s) => format!("\n\n{}\n\n", s),
        }
    }
}

impl std::str::FromStr for PageSeparator {
    type Err = ServiceError;

    /// `none`, `hr`, `comment`, or anything else as a custom string.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "" | "none" => PageSeparator::None,
            "hr" | "rule" => PageSeparator::HorizontalRule,
            "comment" => PageSeparator::Comment,
            other => PageSeparator::Custom(other.to_string()),
        })
    }
}
