//! Region cropping: map a PDF-point bounding box onto a rendered page.
//!
//! TEI coordinates are in PDF points with a top-left origin per page, the
//! same orientation as the raster produced by pdfium, so the mapping is a
//! pure scale. The start edge is floored and the end edge ceiled so a crop
//! never loses a partially covered pixel row, then both are clamped to the
//! canvas. A box that hangs off the page is clipped rather than rejected.

use crate::error::CropError;
use crate::geometry::{BoundingBox, CoordinateSet};
use image::DynamicImage;
use std::collections::HashMap;
use tracing::{debug, warn};

/// A rendered page and the factor that maps PDF points onto its pixels.
#[derive(Debug, Clone)]
pub struct PageRaster {
    /// 1-based page number.
    pub page: u32,
    pub image: DynamicImage,
    pub points_to_pixels: f64,
}

/// A crop rectangle in pixel space, always inside the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Scale `bbox` into pixel space and clip it to `width` × `height`.
pub fn pixel_rect(
    bbox: &BoundingBox,
    points_to_pixels: f64,
    width: u32,
    height: u32,
) -> Result<PixelRect, CropError> {
    let left = (bbox.x * points_to_pixels).floor().max(0.0);
    let top = (bbox.y * points_to_pixels).floor().max(0.0);
    let right = (bbox.right() * points_to_pixels).ceil().min(width as f64);
    let bottom = (bbox.bottom() * points_to_pixels).ceil().min(height as f64);

    if right <= left || bottom <= top {
        return Err(CropError::OutsidePage { page: bbox.page });
    }

    Ok(PixelRect {
        x: left as u32,
        y: top as u32,
        width: (right - left) as u32,
        height: (bottom - top) as u32,
    })
}

/// Crops regions out of the rendered pages of one document.
///
/// Each document gets its own cropper; nothing is shared across documents.
#[derive(Debug, Default)]
pub struct RegionCropper {
    page_count: usize,
    pages: HashMap<u32, PageRaster>,
}

impl RegionCropper {
    /// A cropper for a document with `page_count` pages and no rasters yet.
    pub fn new(page_count: usize) -> Self {
        Self {
            page_count,
            pages: HashMap::new(),
        }
    }

    pub fn with_pages(page_count: usize, rasters: impl IntoIterator<Item = PageRaster>) -> Self {
        let mut cropper = Self::new(page_count);
        for raster in rasters {
            cropper.insert(raster);
        }
        cropper
    }

    pub fn insert(&mut self, raster: PageRaster) {
        self.pages.insert(raster.page, raster);
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// Crop one box.
    ///
    /// # Errors
    /// A [`CropError`] for this box only; the caller skips it and moves on.
    pub fn crop(&self, bbox: &BoundingBox) -> Result<DynamicImage, CropError> {
        if bbox.is_empty() {
            return Err(CropError::EmptyBox { page: bbox.page });
        }
        if bbox.page as usize > self.page_count {
            return Err(CropError::PageOutOfRange {
                page: bbox.page,
                total: self.page_count,
            });
        }
        let raster = self
            .pages
            .get(&bbox.page)
            .ok_or(CropError::PageNotRendered { page: bbox.page })?;

        let rect = pixel_rect(
            bbox,
            raster.points_to_pixels,
            raster.image.width(),
            raster.image.height(),
        )?;
        debug!(
            "Crop page {}: ({}, {}) {}x{} px",
            bbox.page, rect.x, rect.y, rect.width, rect.height
        );
        Ok(raster.image.crop_imm(rect.x, rect.y, rect.width, rect.height))
    }

    /// Crop the primary box of `coords`, or every page's box when
    /// `all_pages` is set. Each entry is the page number and its image.
    pub fn crop_set(
        &self,
        coords: &CoordinateSet,
        all_pages: bool,
    ) -> Vec<Result<(u32, DynamicImage), CropError>> {
        if coords.is_empty() {
            return vec![Err(CropError::NoGeometry)];
        }

        let boxes: Vec<BoundingBox> = if all_pages {
            coords.boxes_by_page().values().copied().collect()
        } else {
            coords.primary_box().into_iter().collect()
        };

        boxes
            .iter()
            .map(|bbox| {
                self.crop(bbox).map(|img| (bbox.page, img)).inspect_err(|e| {
                    warn!("Skipping crop on page {}: {}", bbox.page, e);
                })
            })
            .collect()
    }

    /// Pages the given coordinate sets need rendered, sorted.
    pub fn pages_needed<'a>(
        sets: impl IntoIterator<Item = &'a CoordinateSet>,
        all_pages: bool,
    ) -> Vec<u32> {
        let mut pages: Vec<u32> = sets
            .into_iter()
            .flat_map(|set| -> Vec<u32> {
                if all_pages {
                    set.boxes_by_page().keys().copied().collect()
                } else {
                    set.primary_box().map(|b| b.page).into_iter().collect()
                }
            })
            .collect();
        pages.sort_unstable();
        pages.dedup();
        pages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GenericImageView;

    fn bbox(page: u32, x: f64, y: f64, width: f64, height: f64) -> BoundingBox {
        BoundingBox {
            page,
            x,
            y,
            width,
            height,
        }
    }

    fn cropper() -> RegionCropper {
        RegionCropper::with_pages(
            3,
            [
                PageRaster {
                    page: 1,
                    image: DynamicImage::new_rgb8(200, 300),
                    points_to_pixels: 2.0,
                },
                PageRaster {
                    page: 2,
                    image: DynamicImage::new_rgb8(200, 300),
                    points_to_pixels: 2.0,
                },
            ],
        )
    }

    #[test]
    fn scales_points_to_pixels() {
        let img = cropper().crop(&bbox(1, 10.0, 20.0, 30.0, 40.0)).unwrap();
        assert_eq!(img.dimensions(), (60, 80));
    }

    #[test]
    fn fractional_edges_round_outward() {
        let rect = pixel_rect(&bbox(1, 10.3, 5.2, 4.4, 2.1), 1.0, 100, 100).unwrap();
        assert_eq!(rect, PixelRect { x: 10, y: 5, width: 5, height: 3 });
    }

    #[test]
    fn box_beyond_page_is_clipped() {
        // 80..120 pt wide on a 100 pt (200 px) page.
        let img = cropper().crop(&bbox(1, 80.0, 140.0, 40.0, 50.0)).unwrap();
        assert_eq!(img.dimensions(), (40, 20));
    }

    #[test]
    fn box_entirely_off_page() {
        let err = cropper().crop(&bbox(1, 500.0, 10.0, 5.0, 5.0)).unwrap_err();
        assert_eq!(err, CropError::OutsidePage { page: 1 });
    }

    #[test]
    fn empty_box_is_error() {
        let err = cropper().crop(&bbox(1, 10.0, 10.0, 0.0, 5.0)).unwrap_err();
        assert_eq!(err, CropError::EmptyBox { page: 1 });
    }

    #[test]
    fn page_out_of_range() {
        let err = cropper().crop(&bbox(7, 1.0, 1.0, 5.0, 5.0)).unwrap_err();
        assert_eq!(err, CropError::PageOutOfRange { page: 7, total: 3 });
    }

    #[test]
    fn page_not_rendered() {
        let err = cropper().crop(&bbox(3, 1.0, 1.0, 5.0, 5.0)).unwrap_err();
        assert_eq!(err, CropError::PageNotRendered { page: 3 });
    }

    #[test]
    fn crop_set_primary_and_all_pages() {
        let coords = CoordinateSet::parse("2,0,0,10,10;1,0,0,20,20");
        let c = cropper();

        let primary = c.crop_set(&coords, false);
        assert_eq!(primary.len(), 1);
        assert_eq!(primary[0].as_ref().unwrap().0, 1);

        let all = c.crop_set(&coords, true);
        let pages: Vec<u32> = all.iter().map(|r| r.as_ref().unwrap().0).collect();
        assert_eq!(pages, vec![1, 2]);
    }

    #[test]
    fn crop_set_without_geometry() {
        let results = cropper().crop_set(&CoordinateSet::parse(""), false);
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(CropError::NoGeometry)));
    }

    #[test]
    fn pages_needed_deduplicates() {
        let a = CoordinateSet::parse("3,0,0,1,1;1,0,0,1,1");
        let b = CoordinateSet::parse("1,5,5,1,1");
        assert_eq!(RegionCropper::pages_needed([&a, &b], false), vec![1]);
        assert_eq!(RegionCropper::pages_needed([&a, &b], true), vec![1, 3]);
    }
}
