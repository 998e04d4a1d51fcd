//! Output records and the on-disk layout.
//!
//! ```text
//! <out>/<stem>.tei.xml            (process only)
//! <out>/<stem>_sections.md
//! <out>/<stem>_content.json
//! <out>/<stem>_analysis.json      (when analysis ran)
//! <out>/figures/<kind>_<i>_<caption>.png
//! <out>/graphics/graphic_<i>_<caption>.png
//! ```

use crate::document::{DocumentContent, ElementType};
use crate::error::{CropError, ParseError, Tei2MdError};
use crate::pipeline::response::AnalysisResult;
use crate::references::{Reference, ReferenceSource};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

/// A region written to disk as a PNG.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CroppedImage {
    pub element_id: String,
    pub element_type: ElementType,
    pub page: u32,
    pub path: PathBuf,
    /// Path relative to the Markdown file, with `/` separators.
    pub relative_path: String,
    pub width: u32,
    pub height: u32,
}

/// A region that could not be cropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CropFailure {
    pub element_id: String,
    pub element_type: ElementType,
    pub error: CropError,
}

/// Counts for one extracted document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionStats {
    /// All sections, including nested ones.
    pub sections: usize,
    pub figures: usize,
    pub tables: usize,
    pub graphics: usize,
    pub images_written: usize,
    pub crop_failures: usize,
    pub geometry_warnings: usize,
    pub structure_warnings: usize,
    pub duration_ms: u64,
}

impl ExtractionStats {
    pub fn for_content(content: &DocumentContent) -> Self {
        Self {
            sections: content.all_sections().count(),
            figures: content.count_kind(ElementType::Figure),
            tables: content.count_kind(ElementType::Table),
            graphics: content.count_kind(ElementType::Graphic),
            geometry_warnings: content.geometry_warning_count(),
            structure_warnings: content.warnings.len(),
            ..Default::default()
        }
    }
}

/// Files written for one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputPaths {
    pub markdown: PathBuf,
    pub content_json: PathBuf,
    pub figures_dir: PathBuf,
    pub graphics_dir: PathBuf,
    pub tei: Option<PathBuf>,
    pub analysis_json: Option<PathBuf>,
}

impl OutputPaths {
    pub fn new(out_dir: &Path, stem: &str) -> Self {
        Self {
            markdown: out_dir.join(format!("{}_sections.md", stem)),
            content_json: out_dir.join(format!("{}_content.json", stem)),
            figures_dir: out_dir.join("figures"),
            graphics_dir: out_dir.join("graphics"),
            tei: None,
            analysis_json: None,
        }
    }

    pub fn analysis_path(out_dir: &Path, stem: &str) -> PathBuf {
        out_dir.join(format!("{}_analysis.json", stem))
    }
}

/// The result of extracting one TEI document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionOutput {
    pub markdown: String,
    pub content: DocumentContent,
    pub images: Vec<CroppedImage>,
    pub crop_failures: Vec<CropFailure>,
    pub stats: ExtractionStats,
    /// Set when the output was written to disk.
    pub paths: Option<OutputPaths>,
}

/// The result of one analysis call.
///
/// References are always present even when the LLM reply could not be
/// parsed; in that case `analysis` is `None` and `parse_error` says why.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisOutcome {
    pub references: Vec<Reference>,
    pub reference_source: ReferenceSource,
    pub analysis: Option<AnalysisResult>,
    pub parse_error: Option<ParseError>,
    pub raw_response: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub retries: u32,
    pub duration_ms: u64,
}

/// Everything produced for one PDF by the full pipeline.
#[derive(Debug, Clone)]
pub struct DocumentReport {
    pub source: PathBuf,
    pub extraction: ExtractionOutput,
    pub analysis: Option<AnalysisOutcome>,
    /// Set when analysis was requested and failed; extraction outputs are kept.
    pub analysis_error: Option<String>,
}

// ── File naming ──────────────────────────────────────────────────────────

/// First 30 characters of a caption, keeping alphanumerics, spaces, and
/// hyphens, with spaces turned into underscores.
pub fn safe_caption(caption: &str) -> String {
    caption
        .chars()
        .take(30)
        .filter(|c| c.is_alphanumeric() || *c == ' ' || *c == '-')
        .collect::<String>()
        .trim()
        .replace(' ', "_")
}

/// `<kind>_<index>[_<caption>].png`, index 1-based.
pub fn image_file_name(kind: ElementType, index: usize, caption: Option<&str>, page: Option<u32>) -> String {
    let mut name = format!("{}_{}", kind, index);
    if let Some(p) = page {
        name.push_str(&format!("_p{}", p));
    }
    if let Some(safe) = caption.map(safe_caption).filter(|s| !s.is_empty()) {
        name.push('_');
        name.push_str(&safe);
    }
    name.push_str(".png");
    name
}

/// Stem of an input path with `.tei` / `.xml` style suffixes removed.
pub fn document_stem(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    let lower = name.to_lowercase();
    for suffix in [".grobid.tei.xml", ".tei.xml", ".xml", ".pdf", ".md"] {
        if lower.ends_with(suffix) && lower.len() > suffix.len() {
            return name[..name.len() - suffix.len()].to_string();
        }
    }
    name
}

// ── Writing ──────────────────────────────────────────────────────────────

pub(crate) fn create_dir(path: &Path) -> Result<(), Tei2MdError> {
    std::fs::create_dir_all(path).map_err(|e| Tei2MdError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Write `contents` to `path` atomically: a temp file in the same
/// directory is written, then renamed over the target.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), Tei2MdError> {
    let write_err = |source: std::io::Error| Tei2MdError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    create_dir(&dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(write_err)?;
    tmp.write_all(contents).map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}

/// Pretty-printed JSON, written atomically.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), Tei2MdError> {
    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| Tei2MdError::Internal(format!("JSON serialisation failed: {}", e)))?;
    write_atomic(path, &json)
}
