//! # tei2md
//!
//! Turn GROBID TEI-XML of academic papers into heading-nested Markdown,
//! cropped figure/table images, and an LLM "heritage" analysis of the
//! references a paper builds on.
//!
//! ## Why this crate?
//!
//! GROBID already knows a paper's structure: sections, captions, the
//! bibliography, and where every figure sits on the page. What it produces
//! is TEI-XML, which is awkward to read and awkward to feed to an LLM.
//! This crate walks that TEI once, keeps the structure, maps figure
//! coordinates back onto rendered PDF pages, and writes plain files.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. GROBID    POST /api/processFulltextDocument → TEI-XML
//!  ├─ 2. Walk      sections, figures, tables, graphics + coords
//!  ├─ 3. Render    rasterise only the pages with figures (pdfium)
//!  ├─ 4. Crop      PDF points → pixels, one PNG per region
//!  ├─ 5. Markdown  heading depth = section depth
//!  └─ 6. Analyse   references + content → LLM → tolerant JSON parse
//! ```
//!
//! Steps 2–5 work without a network: give [`extract_to_dir`] a TEI file
//! (and optionally the PDF) you already have.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tei2md::{extract_to_dir, ExtractionConfig};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ExtractionConfig::default();
//!     let output = extract_to_dir(
//!         Path::new("paper.tei.xml"),
//!         Some(Path::new("paper.pdf")),
//!         Path::new("out"),
//!         &config,
//!     )
//!     .await?;
//!     eprintln!(
//!         "{} sections, {} images, {} crop failures",
//!         output.stats.sections, output.stats.images_written, output.stats.crop_failures
//!     );
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `tei2md` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! tei2md = { version = "0.1", default-features = false }
//! ```
//!
//! ## Failure Model
//!
//! A [`Tei2MdError`] loses one document and nothing else. A bad coordinate
//! segment, an uncroppable figure, an odd TEI shape, or an unparseable LLM
//! reply is recorded in the output and logged; the document still completes.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod analyze;
pub mod config;
pub mod document;
pub mod error;
pub mod extract;
pub mod geometry;
pub mod grobid;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod references;
pub mod tei;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use analyze::{analyze_files, analyze_paper, resolve_provider};
pub use config::{
    AnalysisConfig, AnalysisConfigBuilder, ExtractionConfig, ExtractionConfigBuilder, GrobidConfig,
    GrobidConfigBuilder,
};
pub use document::{DocumentContent, ElementType, FigureTable, Graphic, Section};
pub use error::{CropError, GeometryError, ParseError, StructureWarning, Tei2MdError};
pub use extract::{
    extract, extract_content, extract_to_dir, process_batch, process_pdf, process_tei_xml,
    BatchOptions,
};
pub use geometry::{BoundingBox, CoordinateSet};
pub use grobid::GrobidClient;
pub use output::{
    AnalysisOutcome, CropFailure, CroppedImage, DocumentReport, ExtractionOutput, ExtractionStats,
    OutputPaths,
};
pub use pipeline::crop::RegionCropper;
pub use pipeline::markdown::MarkdownRenderer;
pub use pipeline::response::{AnalysisResult, ResponseParser};
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
pub use references::{extract_references, Reference, ReferenceSet, ReferenceSource};
pub use tei::walker::TeiStructureWalker;
pub use tei::TeiDocument;
