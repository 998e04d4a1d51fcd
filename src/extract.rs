//! Document-level orchestration: TEI → content → crops → files.
//!
//! ```text
//!  PDF ──▶ GROBID ──▶ TEI ──▶ walker ──▶ DocumentContent ──▶ markdown
//!   │                                         │
//!   └──────────── render (pdfium) ──▶ crop ◀──┘ ──▶ PNG files
//! ```
//!
//! Every entry point works on one document at a time with fresh component
//! instances; [`process_batch`] fans documents out over a bounded pool.

use crate::analyze;
use crate::config::{AnalysisConfig, ExtractionConfig, GrobidConfig};
use crate::document::{DocumentContent, ElementType};
use crate::error::{CropError, Tei2MdError};
use crate::geometry::CoordinateSet;
use crate::grobid::GrobidClient;
use crate::output::{
    create_dir, document_stem, image_file_name, write_atomic, write_json, CropFailure,
    CroppedImage, DocumentReport, ExtractionOutput, ExtractionStats, OutputPaths,
};
use crate::pipeline::crop::RegionCropper;
use crate::pipeline::markdown::MarkdownRenderer;
use crate::pipeline::render;
use crate::progress::ProgressCallback;
use crate::tei::{read_tei, walker, TeiDocument};
use futures::stream::{self, StreamExt};
use image::{DynamicImage, ImageFormat};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// One cropped region held in memory, before it is written out.
#[derive(Debug, Clone)]
pub struct RegionImage {
    pub element_id: String,
    pub element_type: ElementType,
    pub caption: Option<String>,
    pub page: u32,
    pub image: DynamicImage,
}

/// An element selected for cropping.
struct CropTarget<'a> {
    id: &'a str,
    kind: ElementType,
    caption: Option<&'a str>,
    coords: &'a CoordinateSet,
}

fn crop_targets<'a>(content: &'a DocumentContent, config: &ExtractionConfig) -> Vec<CropTarget<'a>> {
    let mut targets = Vec::new();
    if config.crop_figures {
        targets.extend(content.figures.iter().map(|f| CropTarget {
            id: &f.id,
            kind: f.kind,
            caption: f.caption.as_deref(),
            coords: &f.coordinates,
        }));
    }
    if config.crop_graphics {
        targets.extend(content.graphics.iter().map(|g| CropTarget {
            id: &g.id,
            kind: ElementType::Graphic,
            caption: g.parent_caption.as_deref(),
            coords: &g.coordinates,
        }));
    }
    targets
}

// ── Content ──────────────────────────────────────────────────────────────

/// Parse TEI text and walk it into a [`DocumentContent`].
///
/// # Errors
/// [`Tei2MdError::MalformedXml`] or [`Tei2MdError::NoTeiRoot`]; every
/// other irregularity is recorded in `content.warnings`.
pub fn extract_content(tei_xml: &str) -> Result<DocumentContent, Tei2MdError> {
    let doc = TeiDocument::parse(tei_xml)?;
    let content = walker::walk(&doc);
    for w in &content.warnings {
        warn!("{}", w);
    }
    Ok(content)
}

/// Content and Markdown only, nothing written and nothing cropped.
pub fn extract(tei_xml: &str, config: &ExtractionConfig) -> Result<ExtractionOutput, Tei2MdError> {
    let start = Instant::now();
    let content = extract_content(tei_xml)?;
    let markdown = MarkdownRenderer::new(config).render(&content, &[]);
    let mut stats = ExtractionStats::for_content(&content);
    stats.duration_ms = start.elapsed().as_millis() as u64;
    Ok(ExtractionOutput {
        markdown,
        content,
        images: Vec::new(),
        crop_failures: Vec::new(),
        stats,
        paths: None,
    })
}

// ── Cropping ─────────────────────────────────────────────────────────────

/// Crop every selected element from already-rendered pages.
///
/// Each element is independent: a failure is recorded and the next
/// element is tried.
pub fn crop_elements(
    content: &DocumentContent,
    cropper: &RegionCropper,
    config: &ExtractionConfig,
) -> (Vec<RegionImage>, Vec<CropFailure>) {
    let mut regions = Vec::new();
    let mut failures = Vec::new();

    for target in crop_targets(content, config) {
        for result in cropper.crop_set(target.coords, config.crop_all_pages) {
            match result {
                Ok((page, image)) => regions.push(RegionImage {
                    element_id: target.id.to_string(),
                    element_type: target.kind,
                    caption: target.caption.map(str::to_string),
                    page,
                    image,
                }),
                Err(error) => {
                    debug!("No crop for {} {}: {}", target.kind, target.id, error);
                    failures.push(CropFailure {
                        element_id: target.id.to_string(),
                        element_type: target.kind,
                        error,
                    });
                }
            }
        }
    }
    (regions, failures)
}

/// Render the pages the document's elements sit on and crop them.
///
/// A PDF that cannot be opened or rendered does not fail the document:
/// every element gets a [`CropError::RenderUnavailable`] instead.
pub async fn crop_from_pdf(
    content: &DocumentContent,
    pdf_path: &Path,
    config: &ExtractionConfig,
) -> (Vec<RegionImage>, Vec<CropFailure>) {
    let targets = crop_targets(content, config);
    if targets.is_empty() {
        return (Vec::new(), Vec::new());
    }
    let pages = RegionCropper::pages_needed(targets.iter().map(|t| t.coords), config.crop_all_pages);

    match render::render_pages(pdf_path, &pages, config.render_scale).await {
        Ok(rendered) => {
            let cropper = RegionCropper::with_pages(rendered.page_count, rendered.rasters);
            crop_elements(content, &cropper, config)
        }
        Err(e) => {
            warn!("Cannot render {}: {}; skipping all crops", pdf_path.display(), e);
            let failures = targets
                .iter()
                .map(|t| CropFailure {
                    element_id: t.id.to_string(),
                    element_type: t.kind,
                    error: CropError::RenderUnavailable {
                        detail: e.to_string(),
                    },
                })
                .collect();
            (Vec::new(), failures)
        }
    }
}

/// Write regions as PNGs under `out_dir/figures` and `out_dir/graphics`.
///
/// Indices are 1-based per directory, in element order. An element that
/// produced more than one crop gets its page in each file name.
pub fn write_images(regions: &[RegionImage], out_dir: &Path) -> Result<Vec<CroppedImage>, Tei2MdError> {
    let mut per_element: HashMap<&str, usize> = HashMap::new();
    for r in regions {
        *per_element.entry(r.element_id.as_str()).or_default() += 1;
    }

    let mut figure_index = 0;
    let mut graphic_index = 0;
    let mut previous: Option<&str> = None;
    let mut written = Vec::with_capacity(regions.len());

    for region in regions {
        let is_graphic = region.element_type == ElementType::Graphic;
        if previous != Some(region.element_id.as_str()) {
            if is_graphic {
                graphic_index += 1;
            } else {
                figure_index += 1;
            }
            previous = Some(region.element_id.as_str());
        }
        let (dir, index) = if is_graphic {
            ("graphics", graphic_index)
        } else {
            ("figures", figure_index)
        };
        let page = (per_element.get(region.element_id.as_str()).copied().unwrap_or(1) > 1)
            .then_some(region.page);
        let name = image_file_name(region.element_type, index, region.caption.as_deref(), page);
        let path = out_dir.join(dir).join(&name);

        let mut png = Vec::new();
        region
            .image
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|e| Tei2MdError::Internal(format!("PNG encoding for {}: {}", region.element_id, e)))?;
        write_atomic(&path, &png)?;
        debug!("Wrote {}", path.display());

        written.push(CroppedImage {
            element_id: region.element_id.clone(),
            element_type: region.element_type,
            page: region.page,
            path,
            relative_path: format!("{}/{}", dir, name),
            width: region.image.width(),
            height: region.image.height(),
        });
    }
    Ok(written)
}

// ── File output ──────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ContentFile<'a> {
    content: &'a DocumentContent,
    images: &'a [CroppedImage],
    crop_failures: &'a [CropFailure],
    stats: &'a ExtractionStats,
}

/// Extract a TEI file into `out_dir`, cropping from `pdf` when given.
///
/// # Errors
/// Fatal for this document only: unreadable or malformed TEI, or an
/// output file that cannot be written.
pub async fn extract_to_dir(
    tei_path: &Path,
    pdf: Option<&Path>,
    out_dir: &Path,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, Tei2MdError> {
    let tei_xml = read_tei(tei_path)?;
    let stem = document_stem(tei_path);
    extract_xml_to_dir(&tei_xml, &stem, pdf, out_dir, config).await
}

/// Same as [`extract_to_dir`] for TEI text already in memory.
pub async fn extract_xml_to_dir(
    tei_xml: &str,
    stem: &str,
    pdf: Option<&Path>,
    out_dir: &Path,
    config: &ExtractionConfig,
) -> Result<ExtractionOutput, Tei2MdError> {
    let start = Instant::now();
    let content = extract_content(tei_xml)?;
    create_dir(out_dir)?;

    let (images, crop_failures) = match pdf {
        Some(pdf) if config.crops_enabled() => {
            let (regions, failures) = crop_from_pdf(&content, pdf, config).await;
            (write_images(&regions, out_dir)?, failures)
        }
        _ => (Vec::new(), Vec::new()),
    };

    let markdown = MarkdownRenderer::new(config).render(&content, &images);
    let paths = OutputPaths::new(out_dir, stem);
    write_atomic(&paths.markdown, markdown.as_bytes())?;

    let mut stats = ExtractionStats::for_content(&content);
    stats.images_written = images.len();
    stats.crop_failures = crop_failures.len();
    stats.duration_ms = start.elapsed().as_millis() as u64;

    write_json(
        &paths.content_json,
        &ContentFile {
            content: &content,
            images: &images,
            crop_failures: &crop_failures,
            stats: &stats,
        },
    )?;

    info!(
        "Extracted {}: {} sections, {} figures, {} tables, {} graphics, {} images ({} crop failures) in {}ms",
        stem,
        stats.sections,
        stats.figures,
        stats.tables,
        stats.graphics,
        stats.images_written,
        stats.crop_failures,
        stats.duration_ms
    );

    Ok(ExtractionOutput {
        markdown,
        content,
        images,
        crop_failures,
        stats,
        paths: Some(paths),
    })
}

// ── Full pipeline ────────────────────────────────────────────────────────

/// PDF → GROBID → extraction → optional analysis, all written to `out_dir`.
pub async fn process_pdf(
    pdf_path: &Path,
    out_dir: &Path,
    grobid: &GrobidConfig,
    extraction: &ExtractionConfig,
    analysis: Option<&AnalysisConfig>,
) -> Result<DocumentReport, Tei2MdError> {
    info!("Processing {}", pdf_path.display());
    let client = GrobidClient::new(grobid)?;
    let tei_xml = client.process_fulltext(pdf_path).await?;
    process_tei_xml(&tei_xml, Some(pdf_path), out_dir, extraction, analysis).await
}

/// Everything after GROBID: save the TEI as `<stem>.tei.xml`, extract, and
/// optionally analyse.
///
/// `source` names the outputs and, when it exists, supplies page rasters.
/// Analysis failures are stored in [`DocumentReport::analysis_error`]; the
/// extracted files stay on disk and the document still counts as processed.
pub async fn process_tei_xml(
    tei_xml: &str,
    source: Option<&Path>,
    out_dir: &Path,
    extraction: &ExtractionConfig,
    analysis: Option<&AnalysisConfig>,
) -> Result<DocumentReport, Tei2MdError> {
    let stem = source.map(document_stem).unwrap_or_else(|| "document".to_string());
    create_dir(out_dir)?;
    let tei_path = out_dir.join(format!("{}.tei.xml", stem));
    write_atomic(&tei_path, tei_xml.as_bytes())?;

    let mut extraction_out = extract_xml_to_dir(tei_xml, &stem, source, out_dir, extraction).await?;
    if let Some(paths) = extraction_out.paths.as_mut() {
        paths.tei = Some(tei_path);
    }

    let mut analysis_out = None;
    let mut analysis_error = None;
    if let Some(config) = analysis {
        match analyze::analyze_paper(&extraction_out.markdown, Some(tei_xml), config).await {
            Ok(outcome) => {
                let path = OutputPaths::analysis_path(out_dir, &stem);
                write_json(&path, &outcome)?;
                if let Some(paths) = extraction_out.paths.as_mut() {
                    paths.analysis_json = Some(path);
                }
                analysis_out = Some(outcome);
            }
            Err(e) => {
                warn!("Analysis of {} failed, keeping extraction: {}", stem, e);
                analysis_error = Some(e.to_string());
            }
        }
    }

    Ok(DocumentReport {
        source: source.map(Path::to_path_buf).unwrap_or_default(),
        extraction: extraction_out,
        analysis: analysis_out,
        analysis_error,
    })
}

/// Options for [`process_batch`].
#[derive(Clone)]
pub struct BatchOptions {
    /// Documents in flight at once. Default: 2.
    pub concurrency: usize,
    /// Checked before each document starts; a set flag cancels the rest.
    pub cancel: Option<Arc<AtomicBool>>,
    pub progress: Option<ProgressCallback>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            concurrency: 2,
            cancel: None,
            progress: None,
        }
    }
}

impl fmt::Debug for BatchOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchOptions")
            .field("concurrency", &self.concurrency)
            .field("cancel", &self.cancel)
            .field("progress", &self.progress.as_ref().map(|_| "<callback>"))
            .finish()
    }
}

/// Process many PDFs, each into `out_root/<stem>/`.
///
/// Results come back in submission order. One document's failure never
/// affects the others.
pub async fn process_batch(
    pdfs: Vec<PathBuf>,
    out_root: &Path,
    grobid: &GrobidConfig,
    extraction: &ExtractionConfig,
    analysis: Option<&AnalysisConfig>,
    options: &BatchOptions,
) -> Vec<(PathBuf, Result<DocumentReport, Tei2MdError>)> {
    let total = pdfs.len();
    let progress = options.progress.as_ref();
    if let Some(cb) = progress {
        cb.on_batch_start(total);
    }
    info!("Batch of {} documents, concurrency {}", total, options.concurrency.max(1));

    let mut results: Vec<(usize, PathBuf, Result<DocumentReport, Tei2MdError>)> =
        stream::iter(pdfs.into_iter().enumerate().map(|(index, pdf)| async move {
            let cancelled = options
                .cancel
                .as_ref()
                .is_some_and(|flag| flag.load(Ordering::SeqCst));
            let result = if cancelled {
                Err(Tei2MdError::Cancelled(format!(
                    "{} was not started",
                    pdf.display()
                )))
            } else {
                if let Some(cb) = progress {
                    cb.on_document_start(index, total, &pdf);
                }
                let out_dir = out_root.join(document_stem(&pdf));
                process_pdf(&pdf, &out_dir, grobid, extraction, analysis).await
            };

            match &result {
                Ok(_) => {
                    if let Some(cb) = progress {
                        cb.on_document_complete(index, total, &pdf);
                    }
                }
                Err(e) => {
                    warn!("{} failed: {}", pdf.display(), e);
                    if let Some(cb) = progress {
                        cb.on_document_error(index, total, &pdf, &e.to_string());
                    }
                }
            }
            (index, pdf, result)
        }))
        .buffer_unordered(options.concurrency.max(1))
        .collect()
        .await;

    results.sort_by_key(|(index, _, _)| *index);
    let succeeded = results.iter().filter(|(_, _, r)| r.is_ok()).count();
    if let Some(cb) = progress {
        cb.on_batch_complete(total, succeeded);
    }
    info!("Batch complete: {}/{} succeeded", succeeded, total);

    results
        .into_iter()
        .map(|(_, pdf, result)| (pdf, result))
        .collect()
}
