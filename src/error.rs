//! Error types for the tei2md library.
//!
//! Two tiers of failure exist:
//!
//! * [`Tei2MdError`]: **fatal for one document**: the TEI input is missing
//!   or has no `TEI` root, GROBID refused the PDF, the LLM provider is not
//!   configured, or an output file cannot be written. Returned as
//!   `Err(Tei2MdError)` from the top-level entry points. In a batch, only the
//!   offending document is lost.
//!
//! * Element-level taxonomy: **non-fatal**: one coordinate segment is
//!   garbage ([`GeometryError`]), one figure cannot be cropped
//!   ([`CropError`]), the TEI has an unexpected shape ([`StructureWarning`]),
//!   or the LLM reply holds nothing recoverable ([`ParseError`]). These are
//!   recorded in the outputs and logged; processing of the rest of the
//!   document continues.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the tei2md library.
#[derive(Debug, Error)]
pub enum Tei2MdError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("File not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// The file exists but could not be read.
    #[error("Failed to read '{path}': {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TEI text is not well-formed XML.
    #[error("TEI XML is malformed at byte {position}: {detail}")]
    MalformedXml { position: u64, detail: String },

    /// The document contains no `TEI` root element at all.
    #[error("No TEI root element found (got {found})")]
    NoTeiRoot { found: String },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF could not be opened by pdfium.
    #[error("PDF '{path}' could not be opened: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// pdfium returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: u32, detail: String },

    // ── GROBID errors ─────────────────────────────────────────────────────
    /// GROBID could not be reached.
    #[error("Cannot reach GROBID at '{url}': {reason}\nIs the server running?")]
    GrobidUnavailable { url: String, reason: String },

    /// GROBID answered with a non-success status.
    #[error("GROBID returned HTTP {status} for '{path}': {body}")]
    GrobidFailed {
        path: PathBuf,
        status: u16,
        body: String,
    },

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The LLM API failed after all retries.
    #[error("LLM API error after {retries} retries: {message}")]
    LlmApiError { retries: u32, message: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The batch was cancelled before this document started.
    #[error("Cancelled before processing '{0}'")]
    Cancelled(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A coordinate segment that could not be turned into a bounding box.
///
/// The segment is discarded; the remaining segments of the same attribute
/// still reconcile.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum GeometryError {
    #[error("segment '{segment}' has {found} fields, expected 5")]
    FieldCount { segment: String, found: usize },

    #[error("segment '{segment}': field {field} is not a number")]
    NotANumber { segment: String, field: usize },

    #[error("segment '{segment}': page must be a positive integer")]
    InvalidPage { segment: String },

    #[error("segment '{segment}': negative or non-finite geometry")]
    NegativeGeometry { segment: String },
}

/// A single figure/graphic region that could not be cropped.
///
/// Callers skip the element and continue with the next one.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum CropError {
    /// The element carries no usable coordinates.
    #[error("element has no resolvable coordinates")]
    NoGeometry,

    /// The reconciled box has zero width or height.
    #[error("bounding box on page {page} is empty")]
    EmptyBox { page: u32 },

    /// The box references a page the document does not have.
    #[error("page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: u32, total: usize },

    /// The page exists but was not rasterised.
    #[error("page {page} was not rendered")]
    PageNotRendered { page: u32 },

    /// After clipping to the page, nothing is left.
    #[error("bounding box lies entirely outside page {page}")]
    OutsidePage { page: u32 },

    /// The PDF could not be loaded or rendered at all.
    #[error("page rendering unavailable: {detail}")]
    RenderUnavailable { detail: String },
}

/// The LLM response contained nothing any recovery tier could use.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum ParseError {
    #[error("LLM response is empty")]
    EmptyResponse,

    #[error("no analysis fields recoverable from a {len}-byte response")]
    NothingRecoverable { len: usize },
}

/// An unexpected TEI shape, logged and skipped during traversal.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("<{element}> in <{parent}>: {message}")]
pub struct StructureWarning {
    pub element: String,
    pub parent: String,
    pub message: String,
}

impl StructureWarning {
    pub fn new(element: &str, parent: &str, message: impl Into<String>) -> Self {
        Self {
            element: element.to_string(),
            parent: parent.to_string(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_tei_root_display() {
        let e = Tei2MdError::NoTeiRoot {
            found: "<html>".into(),
        };
        assert!(e.to_string().contains("<html>"), "got: {e}");
    }

    #[test]
    fn geometry_error_names_segment() {
        let e = GeometryError::FieldCount {
            segment: "1,2,3".into(),
            found: 3,
        };
        let msg = e.to_string();
        assert!(msg.contains("1,2,3"));
        assert!(msg.contains("3 fields"));
    }

    #[test]
    fn crop_error_page_out_of_range_display() {
        let e = CropError::PageOutOfRange { page: 9, total: 4 };
        assert!(e.to_string().contains("page 9"));
        assert!(e.to_string().contains("4 pages"));
    }

    #[test]
    fn structure_warning_display() {
        let w = StructureWarning::new("foo", "div", "unexpected child");
        assert_eq!(w.to_string(), "<foo> in <div>: unexpected child");
    }

    #[test]
    fn non_fatal_errors_serialise() {
        let json = serde_json::to_string(&CropError::EmptyBox { page: 2 }).unwrap();
        assert!(json.contains("EmptyBox"));
    }
}
