//! PDF rasterisation via pdfium, at a fixed points → pixels scale.
//!
//! Cropping needs to know exactly how PDF points map onto pixels, so pages
//! are rendered with `scale_page_by_factor` rather than a pixel target, and
//! the effective factor is measured back from the rendered width.
//!
//! pdfium keeps thread-local state and is CPU-bound, so all calls run under
//! `tokio::task::spawn_blocking`.

use crate::error::Tei2MdError;
use crate::pipeline::crop::PageRaster;
use pdfium_render::prelude::*;
use std::path::Path;
use tracing::{debug, info, warn};

/// Pages rendered from one PDF.
#[derive(Debug)]
pub struct RenderedPages {
    pub page_count: usize,
    pub rasters: Vec<PageRaster>,
}

/// Render the given 1-based pages. Pages beyond the document are skipped
/// with a warning; the cropper reports them per element.
pub async fn render_pages(
    pdf_path: &Path,
    pages: &[u32],
    scale: f32,
) -> Result<RenderedPages, Tei2MdError> {
    let path = pdf_path.to_path_buf();
    let pages = pages.to_vec();

    tokio::task::spawn_blocking(move || render_pages_blocking(&path, &pages, scale))
        .await
        .map_err(|e| Tei2MdError::Internal(format!("Render task panicked: {}", e)))?
}

fn load_error(path: &Path, e: PdfiumError) -> Tei2MdError {
    Tei2MdError::CorruptPdf {
        path: path.to_path_buf(),
        detail: format!("{:?}", e),
    }
}

fn render_pages_blocking(
    pdf_path: &Path,
    pages: &[u32],
    scale: f32,
) -> Result<RenderedPages, Tei2MdError> {
    if !pdf_path.exists() {
        return Err(Tei2MdError::FileNotFound {
            path: pdf_path.to_path_buf(),
        });
    }

    let pdfium = Pdfium::default();
    let document = pdfium
        .load_pdf_from_file(pdf_path, None)
        .map_err(|e| load_error(pdf_path, e))?;

    let doc_pages = document.pages();
    let page_count = doc_pages.len() as usize;
    info!("PDF loaded: {} pages, rendering {}", page_count, pages.len());

    let render_config = PdfRenderConfig::new().scale_page_by_factor(scale);
    let mut rasters = Vec::with_capacity(pages.len());

    for &page in pages {
        if page == 0 || page as usize > page_count {
            warn!("Skipping page {} (out of range, total={})", page, page_count);
            continue;
        }

        let pdf_page = doc_pages
            .get((page - 1) as u16)
            .map_err(|e| Tei2MdError::RasterisationFailed {
                page,
                detail: format!("{:?}", e),
            })?;
        let width_points = pdf_page.width().value as f64;

        let bitmap = pdf_page
            .render_with_config(&render_config)
            .map_err(|e| Tei2MdError::RasterisationFailed {
                page,
                detail: format!("{:?}", e),
            })?;
        let image = bitmap.as_image();

        let points_to_pixels = if width_points > 0.0 {
            image.width() as f64 / width_points
        } else {
            scale as f64
        };
        debug!(
            "Rendered page {} → {}x{} px ({:.3} px/pt)",
            page,
            image.width(),
            image.height(),
            points_to_pixels
        );

        rasters.push(PageRaster {
            page,
            image,
            points_to_pixels,
        });
    }

    Ok(RenderedPages {
        page_count,
        rasters,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_pdf_is_file_not_found() {
        let err = render_pages(Path::new("/nonexistent/paper.pdf"), &[1], 2.0)
            .await
            .unwrap_err();
        assert!(matches!(err, Tei2MdError::FileNotFound { .. }));
    }
}
