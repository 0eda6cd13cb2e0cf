//! Named OCR strategies selectable from configuration.
//!
//! | Name         | Detector                                   |
//! |--------------|--------------------------------------------|
//! | `region-vlm` | HTTP layout service if configured, else full page |
//! | `page-vlm`   | always full page                           |
//!
//! Both use the same recognition backend and retry policy.

use crate::config::ServiceConfig;
use crate::document::TextCell;
use crate::error::ServiceError;
use crate::pipeline::detect::{FullPageDetector, HttpLayoutDetector, RegionDetector};
use crate::pipeline::inference::InferenceBackend;
use crate::pipeline::regions::{PageContext, RegionOcr};
use crate::pipeline::render::PageImage;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

#[async_trait]
pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Cells for one page, ordered by detection index.
    async fn ocr_page(
        &self,
        page: &PageImage,
        ctx: &PageContext,
    ) -> Result<Vec<TextCell>, ServiceError>;
}

/// An engine backed by [`RegionOcr`].
pub struct VlmEngine {
    name: String,
    ocr: RegionOcr,
}

impl VlmEngine {
    pub fn new(name: impl Into<String>, ocr: RegionOcr) -> Self {
        Self {
            name: name.into(),
            ocr,
        }
    }
}

#[async_trait]
impl OcrEngine for VlmEngine {
    fn name(&self) -> &str {
        &self.name
    }

    async fn ocr_page(
        &self,
        page: &PageImage,
        ctx: &PageContext,
    ) -> Result<Vec<TextCell>, ServiceError> {
        self.ocr.ocr_page(page, ctx).await
    }
}

#[derive(Default, Clone)]
pub struct EngineRegistry {
    engines: BTreeMap<String, Arc<dyn OcrEngine>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, engine: Arc<dyn OcrEngine>) {
        self.engines.insert(engine.name().to_string(), engine);
    }

    /// The built-in engines wired to `backend`.
    pub fn builtin(
        config: &ServiceConfig,
        backend: Arc<dyn InferenceBackend>,
    ) -> Result<Self, ServiceError> {
        let tune = |ocr: RegionOcr| {
            ocr.concurrency(config.region_concurrency)
                .max_retries(config.max_retries)
                .retry_backoff_ms(config.retry_backoff_ms)
        };

        let layout: Arc<dyn RegionDetector> = match &config.layout_endpoint {
            Some(url) => Arc::new(HttpLayoutDetector::new(
                url.clone(),
                Duration::from_secs(config.api_timeout_secs),
            )?),
            None => Arc::new(FullPageDetector),
        };

        let mut registry = Self::new();
        registry.register(Arc::new(VlmEngine::new(
            "region-vlm",
            tune(RegionOcr::new(layout, Arc::clone(&backend))),
        )));
        registry.register(Arc::new(VlmEngine::new(
            "page-vlm",
            tune(RegionOcr::new(Arc::new(FullPageDetector), backend)),
        )));
        Ok(registry)
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn OcrEngine>, ServiceError> {
        self.engines.get(name).cloned().ok_or_else(|| {
            ServiceError::InvalidConfig(format!(
                "unknown OCR engine '{}' (available: {})",
                name,
                self.names().join(", ")
            ))
        })
    }

    pub fn names(&self) -> Vec<String> {
        self.engines.keys().cloned().collect()
    }
}
