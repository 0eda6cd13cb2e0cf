//! Document model produced by the Convert stage.
//!
//! Geometry is in page points (72 DPI) with the origin at the top-left,
//! independent of the render scale used for OCR.

use serde::{Deserialize, Serialize};

/// Axis-aligned rectangle: left, top, right, bottom.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub l: f64,
    pub t: f64,
    pub r: f64,
    pub b: f64,
}

impl BoundingBox {
    pub fn new(l: f64, t: f64, r: f64, b: f64) -> Self {
        Self { l, t, r, b }
    }

    pub fn width(&self) -> f64 {
        (self.r - self.l).max(0.0)
    }

    pub fn height(&self) -> f64 {
        (self.b - self.t).max(0.0)
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    /// True for degenerate boxes (zero or negative extent on either axis).
    pub fn is_empty(&self) -> bool {
        self.area() <= 0.0
    }

    /// Multiply every coordinate by `factor`.
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            l: self.l * factor,
            t: self.t * factor,
            r: self.r * factor,
            b: self.b * factor,
        }
    }
}

/// A region of a page that needs its own OCR call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRegion {
    /// 0-indexed page.
    pub page: usize,
    pub bbox: BoundingBox,
    /// Position in detector output; the merge key.
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

/// Front-matter fields the recognition model reports alongside the text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OcrMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_rotation_valid: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotation_correction: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_table: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_diagram: Option<bool>,
}

impl OcrMetadata {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Smallest unit of transcribed text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextCell {
    pub index: usize,
    pub text: String,
    /// 0.0–1.0. Degraded cells carry 0.0.
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub from_ocr: bool,
    #[serde(default, skip_serializing_if = "OcrMetadata::is_empty")]
    pub metadata: OcrMetadata,
}

impl TextCell {
    /// A cell for a region whose inference failed every attempt.
    pub fn degraded(region: &PageRegion) -> Self {
        Self {
            index: region.index,
            text: String::new(),
            confidence: 0.0,
            bbox: region.bbox,
            from_ocr: true,
            metadata: OcrMetadata::default(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.confidence == 0.0 && self.text.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageSize {
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    /// 0-indexed.
    pub index: usize,
    pub size: PageSize,
    /// Sorted by `TextCell::index`.
    pub cells: Vec<TextCell>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Source object name (the input key).
    pub name: String,
    pub pages: Vec<Page>,
}

impl Document {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pages: Vec::new(),
        }
    }

    pub fn cell_count(&self) -> usize {
        self.pages.iter().map(|p| p.cells.len()).sum()
    }

    pub fn degraded_count(&self) -> usize {
        self.pages
            .iter()
            .flat_map(|p| &p.cells)
            .filter(|c| c.is_degraded())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degenerate_boxes_have_no_area() {
        assert!(BoundingBox::new(10.0, 10.0, 10.0, 50.0).is_empty());
        assert!(BoundingBox::new(10.0, 50.0, 40.0, 10.0).is_empty());
        assert!(!BoundingBox::new(0.0, 0.0, 1.0, 1.0).is_empty());
        assert_eq!(BoundingBox::new(0.0, 0.0, 4.0, 2.5).area(), 10.0);
    }

    #[test]
    fn scaling_multiplies_all_edges() {
        let b = BoundingBox::new(1.0, 2.0, 3.0, 4.0).scaled(3.0);
        assert_eq!(b, BoundingBox::new(3.0, 6.0, 9.0, 12.0));
    }

    #[test]
    fn degraded_cell_keeps_geometry() {
        let region = PageRegion {
            page: 0,
            bbox: BoundingBox::new(0.0, 0.0, 10.0, 10.0),
            index: 7,
            label: Some("table".into()),
            score: Some(0.9),
        };
        let cell = TextCell::degraded(&region);
        assert_eq!(cell.index, 7);
        assert_eq!(cell.bbox, region.bbox);
        assert!(cell.is_degraded());
    }

    #[test]
    fn empty_metadata_is_not_serialised() {
        let cell = TextCell {
            index: 0,
            text: "hi".into(),
            confidence: 1.0,
            bbox: BoundingBox::default(),
            from_ocr: true,
            metadata: OcrMetadata::default(),
        };
        let v = serde_json::to_value(&cell).unwrap();
        assert!(v.get("metadata").is_none());
    }
}
