//! Bounding boxes and the `coords` attribute mini-format.
//!
//! GROBID annotates every element it can locate with a `coords` attribute:
//!
//! ```text
//! coords   := segment (';' segment)*
//! segment  := page ',' x ',' y ',' width ',' height
//! ```
//!
//! `page` is 1-based; the other four fields are PDF points measured from the
//! top-left corner of the page. Whitespace around either delimiter is ignored.
//! A figure that wraps across columns or pages produces several segments;
//! [`CoordinateSet`] folds them into one enclosing box per page.
//!
//! Segments that fail to parse are dropped with a [`GeometryError`] recorded
//! on the set. An attribute where every segment is bad yields an empty set,
//! never an error.

use crate::error::GeometryError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// An axis-aligned region on one PDF page, in points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// 1-based page number.
    pub page: u32,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    /// `true` when the box has no area to crop.
    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }

    /// Smallest box on the same page covering both `self` and `other`.
    fn union(&self, other: &BoundingBox) -> BoundingBox {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        BoundingBox {
            page: self.page,
            x,
            y,
            width: self.right().max(other.right()) - x,
            height: self.bottom().max(other.bottom()) - y,
        }
    }

    /// Parse one `page,x,y,w,h` segment.
    pub fn parse_segment(segment: &str) -> Result<BoundingBox, GeometryError> {
        let segment = segment.trim();
        let fields: Vec<&str> = segment.split(',').map(str::trim).collect();
        if fields.len() != 5 {
            return Err(GeometryError::FieldCount {
                segment: segment.to_string(),
                found: fields.len(),
            });
        }

        let mut values = [0f64; 5];
        for (i, field) in fields.iter().enumerate() {
            values[i] = field
                .parse::<f64>()
                .map_err(|_| GeometryError::NotANumber {
                    segment: segment.to_string(),
                    field: i,
                })?;
        }

        let [page, x, y, width, height] = values;
        if !page.is_finite() || page < 1.0 || page.fract() != 0.0 || page > u32::MAX as f64 {
            return Err(GeometryError::InvalidPage {
                segment: segment.to_string(),
            });
        }
        if [x, y, width, height]
            .iter()
            .any(|v| !v.is_finite() || *v < 0.0)
        {
            return Err(GeometryError::NegativeGeometry {
                segment: segment.to_string(),
            });
        }

        Ok(BoundingBox {
            page: page as u32,
            x,
            y,
            width,
            height,
        })
    }
}

/// All regions attached to one TEI element, reconciled per page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoordinateSet {
    /// Every segment that parsed, in attribute order.
    segments: Vec<BoundingBox>,
    /// One enclosing box per page, keyed by page number.
    by_page: BTreeMap<u32, BoundingBox>,
    /// Segments that were discarded.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    warnings: Vec<GeometryError>,
}

impl CoordinateSet {
    /// Parse a raw `coords` attribute value.
    pub fn parse(raw: &str) -> CoordinateSet {
        let mut set = CoordinateSet::default();
        for segment in raw.split(';') {
            if segment.trim().is_empty() {
                continue;
            }
            match BoundingBox::parse_segment(segment) {
                Ok(bbox) => set.push(bbox),
                Err(e) => {
                    warn!("Discarding coordinate segment: {}", e);
                    set.warnings.push(e);
                }
            }
        }
        set
    }

    fn push(&mut self, bbox: BoundingBox) {
        self.segments.push(bbox);
        self.by_page
            .entry(bbox.page)
            .and_modify(|acc| *acc = acc.union(&bbox))
            .or_insert(bbox);
    }

    /// The crop target: the reconciled box on the lowest page number present.
    pub fn primary_box(&self) -> Option<BoundingBox> {
        self.by_page.values().next().copied()
    }

    /// The reconciled box for every page, in page order.
    pub fn boxes_by_page(&self) -> &BTreeMap<u32, BoundingBox> {
        &self.by_page
    }

    pub fn segments(&self) -> &[BoundingBox] {
        &self.segments
    }

    pub fn warnings(&self) -> &[GeometryError] {
        &self.warnings
    }

    pub fn is_empty(&self) -> bool {
        self.by_page.is_empty()
    }

    pub fn spans_pages(&self) -> bool {
        self.by_page.len() > 1
    }
}
