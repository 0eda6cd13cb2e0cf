//! Region cropping and image encoding for the inference request body.
//!
//! PNG is used throughout: it is lossless, and JPEG artefacts around glyph
//! edges hurt recognition far more than the larger payload costs.

use crate::document::BoundingBox;
use crate::error::RegionError;
use crate::pipeline::render::PageImage;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// A base64-encoded image ready to inline in a JSON request.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedImage {
    pub data: String,
    pub mime_type: &'static str,
    pub width: u32,
    pub height: u32,
}

impl EncodedImage {
    /// `data:<mime>;base64,<data>`
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}

/// Pixel rectangle `(x, y, w, h)` for a page-point bbox on a rendered page.
///
/// Edges are rounded outwards and clamped to the bitmap. `None` when
/// nothing remains after clamping.
pub fn pixel_rect(page: &PageImage, bbox: &BoundingBox) -> Option<(u32, u32, u32, u32)> {
    let px = bbox.scaled(page.scale);
    let max_w = page.image.width() as f64;
    let max_h = page.image.height() as f64;

    let l = px.l.floor().clamp(0.0, max_w);
    let t = px.t.floor().clamp(0.0, max_h);
    let r = px.r.ceil().clamp(0.0, max_w);
    let b = px.b.ceil().clamp(0.0, max_h);

    let w = (r - l) as u32;
    let h = (b - t) as u32;
    if w == 0 || h == 0 {
        return None;
    }
    Some((l as u32, t as u32, w, h))
}

/// PNG-encode and base64-wrap an image.
pub fn encode_png(img: &DynamicImage) -> Result<EncodedImage, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    let data = STANDARD.encode(&buf);
    debug!(
        "Encoded {}×{} image → {} bytes base64",
        img.width(),
        img.height(),
        data.len()
    );
    Ok(EncodedImage {
        data,
        mime_type: "image/png",
        width: img.width(),
        height: img.height(),
    })
}

/// Crop `bbox` out of `page` and encode it. Runs on the blocking pool.
pub async fn encode_region(page: &PageImage, bbox: &BoundingBox) -> Result<EncodedImage, RegionError> {
    let (x, y, w, h) = pixel_rect(page, bbox).ok_or_else(|| {
        RegionError::Encode(format!("region {bbox:?} lies outside the rendered page"))
    })?;
    let image = page.image.clone();

    tokio::task::spawn_blocking(move || {
        let crop = image.crop_imm(x, y, w, h);
        encode_png(&crop).map_err(|e| RegionError::Encode(e.to_string()))
    })
    .await
    .map_err(|e| RegionError::Encode(format!("encode task panicked: {e}")))?
}

/// Encode a whole page (used by the layout detector).
pub async fn encode_page(page: &PageImage) -> Result<EncodedImage, image::ImageError> {
    let image = page.image.clone();
    match tokio::task::spawn_blocking(move || encode_png(&image)).await {
        Ok(result) => result,
        Err(e) => Err(image::ImageError::IoError(std::io::Error::other(format!(
            "encode task panicked: {e}"
        )))),
    }
}
