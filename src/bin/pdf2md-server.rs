//! Server binary for pdf2md-server.
//!
//! A thin shim over the library crate that maps CLI flags and environment
//! variables to `ServiceConfig`, wires the object stores, and serves HTTP
//! until Ctrl+C or SIGTERM.

use anyhow::{Context, Result};
use clap::Parser;
use pdf2md_server::pipeline::render::PdfiumRasterizer;
use pdf2md_server::server::{build_state, serve};
use pdf2md_server::{PageSeparator, ServiceConfig, StoreRegistry};
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"EXAMPLES:
  # Serve with defaults (port 6008, 4 workers)
  pdf2md-server

  # Point at a local inference server and a layout detector
  pdf2md-server --inference-endpoint http://localhost:8000 \
                --layout-endpoint http://localhost:8010/detect

  # Convert a document
  curl -X POST localhost:6008/ocr \
       -d input_path=s3://docs/report.pdf -d output_path=s3://docs/out/report

ENVIRONMENT VARIABLES:
  AWS_*                   Standard AWS credential chain for s3:// paths
  OSS_ENDPOINT            S3-compatible endpoint for oss:// paths
  OSS_ACCESS_KEY_ID       OSS access key
  OSS_ACCESS_KEY_SECRET   OSS secret key
  OSS_REGION              OSS region (default us-east-1)
  FILE_STORE_ROOT         Directory backing file:// paths
  RUST_LOG                Log filter (default info)

A .env file in the working directory is loaded before flags are parsed.
"#;

/// Serve PDF-to-Markdown OCR conversions over HTTP.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2md-server",
    version,
    about = "Serve PDF-to-Markdown OCR conversions over HTTP",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Address to listen on.
    #[arg(long, env = "PDF2MD_LISTEN", default_value = "0.0.0.0:6008")]
    listen: SocketAddr,

    /// Concurrent conversion jobs.
    #[arg(short, long, env = "PDF2MD_WORKERS", default_value_t = 4)]
    workers: usize,

    /// Seconds a request waits for its job before answering 408.
    #[arg(long, env = "PDF2MD_WAIT_TIMEOUT", default_value_t = 300)]
    wait_timeout: u64,

    /// Let jobs finish after their caller has timed out.
    #[arg(long, env = "PDF2MD_KEEP_ABANDONED")]
    keep_abandoned: bool,

    /// Staging directory for downloaded inputs.
    #[arg(long, env = "PDF2MD_INPUT_ROOT", default_value = "./input")]
    input_root: PathBuf,

    /// Staging directory for local artifacts.
    #[arg(long, env = "PDF2MD_OUTPUT_ROOT", default_value = "./output")]
    output_root: PathBuf,

    /// Render scale relative to 72 DPI (1.0–6.0).
    #[arg(long, env = "PDF2MD_UPSCALE", default_value_t = 3.0)]
    upscale: f32,

    /// Concurrent inference calls per page.
    #[arg(short, long, env = "PDF2MD_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Retries per region on inference failure.
    #[arg(long, env = "PDF2MD_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Initial retry backoff in milliseconds.
    #[arg(long, env = "PDF2MD_RETRY_BACKOFF_MS", default_value_t = 500)]
    retry_backoff_ms: u64,

    /// Base URL of the chat-completions inference service.
    #[arg(long, env = "PDF2MD_INFERENCE_ENDPOINT", default_value = "http://olmocr-7b:6008")]
    inference_endpoint: String,

    /// Model name sent with each inference request.
    #[arg(long, env = "PDF2MD_MODEL", default_value = "olmOCR-7B")]
    model: String,

    /// Max output tokens per region.
    #[arg(long, env = "PDF2MD_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// Sampling temperature (0.0–2.0).
    #[arg(long, env = "PDF2MD_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// Per-inference-call timeout in seconds.
    #[arg(long, env = "PDF2MD_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// OCR engine: region-vlm or page-vlm.
    #[arg(long, env = "PDF2MD_ENGINE", default_value = "region-vlm")]
    engine: String,

    /// Layout-detection service URL (region-vlm only).
    #[arg(long, env = "PDF2MD_LAYOUT_ENDPOINT")]
    layout_endpoint: Option<String>,

    /// Page separator: none, hr, comment, or custom string.
    #[arg(long, env = "PDF2MD_SEPARATOR", default_value = "none")]
    separator: String,

    /// Directory containing libpdfium. Defaults to the system search path.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib_path: Option<PathBuf>,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2MD_VERBOSE")]
    verbose: bool,
}

fn build_config(cli: &Cli) -> Result<ServiceConfig> {
    let separator: PageSeparator = cli.separator.parse()?;

    ServiceConfig::builder()
        .listen_addr(cli.listen)
        .workers(cli.workers)
        .wait_timeout_secs(cli.wait_timeout)
        .cancel_on_timeout(!cli.keep_abandoned)
        .input_root(&cli.input_root)
        .output_root(&cli.output_root)
        .upscale(cli.upscale)
        .region_concurrency(cli.concurrency)
        .max_retries(cli.max_retries)
        .retry_backoff_ms(cli.retry_backoff_ms)
        .inference_endpoint(&cli.inference_endpoint)
        .model(&cli.model)
        .max_tokens(cli.max_tokens)
        .temperature(cli.temperature)
        .api_timeout_secs(cli.api_timeout)
        .engine(&cli.engine)
        .layout_endpoint(cli.layout_endpoint.clone())
        .page_separator(separator)
        .pdfium_lib_path(cli.pdfium_lib_path.clone())
        .build()
        .context("Invalid configuration")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is normal in production.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let config = build_config(&cli)?;

    // ── Probe pdfium up front so a missing library fails at startup ─────
    PdfiumRasterizer::new(config.pdfium_lib_path.clone())
        .probe()
        .context("Failed to load the PDFium library")?;

    // ── Object stores ────────────────────────────────────────────────────
    let stores = StoreRegistry::from_env().await;
    info!("Registered stores: {}", stores.schemes().join(", "));
    if config.layout_endpoint.is_none() && config.engine == "region-vlm" {
        warn!("No layout endpoint configured; every page is OCR'd as a single region");
    }

    let state = build_state(&config, stores).context("Failed to initialise the service")?;
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;

    info!(
        "pdf2md-server: {} workers, engine '{}', backend {}",
        config.workers, config.engine, config.inference_endpoint
    );

    serve(listener, state, shutdown_signal())
        .await
        .context("Server error")?;
    Ok(())
}
