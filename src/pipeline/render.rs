//! PDF rasterisation: render one page at a time via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which is not safe to call
//! from async contexts. Every pdfium call runs on tokio's blocking pool so
//! the runtime's worker threads keep serving requests while a page renders.
//!
//! ## One page at a time
//!
//! The Convert stage renders a page, OCRs its regions, then drops the
//! bitmap before rendering the next one. At the default 3× upscale an A4
//! page is roughly 1800 × 2500 px; keeping only one alive per job bounds
//! memory regardless of document length.

use crate::document::PageSize;
use crate::error::ServiceError;
use async_trait::async_trait;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// A rendered page.
#[derive(Debug, Clone)]
pub struct PageImage {
    /// 0-indexed page.
    pub index: usize,
    pub image: Arc<DynamicImage>,
    /// Pixels per page point actually used. May be below the requested
    /// upscale when the pixel cap kicked in.
    pub scale: f64,
    /// Page size in points.
    pub size: PageSize,
}

impl PageImage {
    pub fn new(index: usize, image: DynamicImage, size: PageSize) -> Self {
        let scale = if size.width > 0.0 {
            image.width() as f64 / size.width
        } else {
            1.0
        };
        Self {
            index,
            image: Arc::new(image),
            scale,
            size,
        }
    }
}

/// Turns a staged document into page bitmaps.
#[async_trait]
pub trait Rasterizer: Send + Sync {
    async fn page_count(&self, path: &Path) -> Result<usize, ServiceError>;

    /// Render page `index` (0-based) at `scale` pixels per point.
    async fn render_page(
        &self,
        path: &Path,
        index: usize,
        scale: f32,
    ) -> Result<PageImage, ServiceError>;
}

/// The pdfium-backed rasterizer.
#[derive(Debug, Clone, Default)]
pub struct PdfiumRasterizer {
    /// Directory holding the pdfium shared library. `None` uses the
    /// system library search path.
    lib_path: Option<PathBuf>,
    /// Cap on either rendered dimension.
    max_edge_px: i32,
}

const DEFAULT_MAX_EDGE_PX: i32 = 8000;

impl PdfiumRasterizer {
    pub fn new(lib_path: Option<PathBuf>) -> Self {
        Self {
            lib_path,
            max_edge_px: DEFAULT_MAX_EDGE_PX,
        }
    }

    pub fn with_max_edge(mut self, px: u32) -> Self {
        self.max_edge_px = px.clamp(256, 20_000) as i32;
        self
    }

    /// Check that the library can be loaded.
    pub fn probe(&self) -> Result<(), ServiceError> {
        bind(self.lib_path.as_deref()).map(|_| ())
    }
}

fn bind(lib_path: Option<&Path>) -> Result<Pdfium, ServiceError> {
    let bindings = match lib_path {
        Some(dir) => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir)),
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| ServiceError::InvalidConfig(format!("cannot load pdfium: {e:?}")))?;
    Ok(Pdfium::new(bindings))
}

fn open_error(path: &Path, e: PdfiumError) -> ServiceError {
    ServiceError::DocumentUnreadable {
        path: path.to_path_buf(),
        detail: format!("{e:?}"),
    }
}

#[async_trait]
impl Rasterizer for PdfiumRasterizer {
    async fn page_count(&self, path: &Path) -> Result<usize, ServiceError> {
        let path = path.to_path_buf();
        let lib = self.lib_path.clone();
        tokio::task::spawn_blocking(move || {
            let pdfium = bind(lib.as_deref())?;
            let document = pdfium
                .load_pdf_from_file(&path, None)
                .map_err(|e| open_error(&path, e))?;
            Ok(document.pages().len() as usize)
        })
        .await
        .map_err(|e| ServiceError::Internal(format!("page-count task panicked: {e}")))?
    }

    async fn render_page(
        &self,
        path: &Path,
        index: usize,
        scale: f32,
    ) -> Result<PageImage, ServiceError> {
        let path = path.to_path_buf();
        let lib = self.lib_path.clone();
        let max_edge = self.max_edge_px;

        tokio::task::spawn_blocking(move || {
            let pdfium = bind(lib.as_deref())?;
            let document = pdfium
                .load_pdf_from_file(&path, None)
                .map_err(|e| open_error(&path, e))?;

            let rasterisation = |e: PdfiumError| ServiceError::RasterisationFailed {
                page: index + 1,
                detail: format!("{e:?}"),
            };

            let page = document
                .pages()
                .get(index as u16)
                .map_err(rasterisation)?;
            let size = PageSize {
                width: page.width().value as f64,
                height: page.height().value as f64,
            };

            let config = PdfRenderConfig::new()
                .scale_page_by_factor(scale)
                .set_maximum_width(max_edge)
                .set_maximum_height(max_edge);
            let image = page
                .render_with_config(&config)
                .map_err(rasterisation)?
                .as_image();

            debug!(
                "Rendered page {} ({:.0}×{:.0} pt) → {}×{} px",
                index + 1,
                size.width,
                size.height,
                image.width(),
                image.height()
            );

            Ok(PageImage::new(index, image, size))
        })
        .await
        .map_err(|e| ServiceError::Internal(format!("render task panicked: {e}")))?
    }
}
