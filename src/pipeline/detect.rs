//! Layout detection: which parts of a page need their own OCR call.
//!
//! Detectors return boxes in page points, in their own output order. The
//! orchestrator assigns detection indices from that order, so a detector
//! must be deterministic for a given page.

use crate::document::BoundingBox;
use crate::error::ServiceError;
use crate::pipeline::encode::encode_page;
use crate::pipeline::render::PageImage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// One box reported by a detector.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedBox {
    pub bbox: BoundingBox,
    pub label: Option<String>,
    pub score: Option<f32>,
}

#[async_trait]
pub trait RegionDetector: Send + Sync {
    fn name(&self) -> &str;

    async fn detect(&self, page: &PageImage) -> Result<Vec<DetectedBox>, ServiceError>;
}

/// Treats the whole page as a single region.
#[derive(Debug, Clone, Copy, Default)]
pub struct FullPageDetector;

#[async_trait]
impl RegionDetector for FullPageDetector {
    fn name(&self) -> &str {
        "full-page"
    }

    async fn detect(&self, page: &PageImage) -> Result<Vec<DetectedBox>, ServiceError> {
        Ok(vec![DetectedBox {
            bbox: BoundingBox::new(0.0, 0.0, page.size.width, page.size.height),
            label: Some("page".to_string()),
            score: None,
        }])
    }
}

/// Client for an HTTP layout-detection service.
///
/// Request: `POST {endpoint}` with `{"image": "<base64 png>"}`.
/// Response: `{"boxes": [{"coordinate": [x0, y0, x1, y1], "label": "...",
/// "score": 0.97}, ...]}` in rendered-pixel coordinates.
#[derive(Debug, Clone)]
pub struct HttpLayoutDetector {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Serialize)]
struct LayoutRequest<'a> {
    image: &'a str,
}

#[derive(Deserialize)]
struct LayoutResponse {
    boxes: Vec<LayoutBox>,
}

#[derive(Deserialize)]
struct LayoutBox {
    coordinate: [f64; 4],
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    score: Option<f32>,
}

impl HttpLayoutDetector {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::InvalidConfig(format!("layout client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl RegionDetector for HttpLayoutDetector {
    fn name(&self) -> &str {
        "http-layout"
    }

    async fn detect(&self, page: &PageImage) -> Result<Vec<DetectedBox>, ServiceError> {
        let failed = |detail: String| ServiceError::DetectionFailed {
            page: page.index + 1,
            detail,
        };

        let encoded = encode_page(page).await.map_err(|e| failed(e.to_string()))?;

        let resp = self
            .client
            .post(&self.endpoint)
            .json(&LayoutRequest {
                image: &encoded.data,
            })
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(failed(format!("HTTP {status}: {body}")));
        }

        let parsed: LayoutResponse = resp.json().await.map_err(|e| ServiceError::Protocol {
            service: "layout detector".into(),
            detail: e.to_string(),
        })?;

        // Pixel coordinates back to page points.
        let scale = if page.scale > 0.0 { page.scale } else { 1.0 };
        let boxes: Vec<DetectedBox> = parsed
            .boxes
            .into_iter()
            .map(|b| {
                let [x0, y0, x1, y1] = b.coordinate;
                DetectedBox {
                    bbox: BoundingBox::new(x0 / scale, y0 / scale, x1 / scale, y1 / scale),
                    label: b.label,
                    score: b.score,
                }
            })
            .collect();

        debug!("Page {}: layout service returned {} boxes", page.index + 1, boxes.len());
        Ok(boxes)
    }
}
