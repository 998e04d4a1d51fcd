//! Pipeline stages downstream of TEI traversal.
//!
//! Each submodule implements exactly one transformation step and is
//! testable on its own.
//!
//! ## Data Flow
//!
//! ```text
//!  content ──▶ render ──▶ crop ──▶ PNG files
//!  (walker)    (pdfium)   (pixel rects)
//!
//!  content ──▶ markdown ──▶ postprocess ──▶ _sections.md
//!
//!  prompt ──▶ llm ──▶ response ──▶ AnalysisResult
//! ```
//!
//! 1. [`render`]: rasterise the pages that carry figures; runs in
//!    `spawn_blocking` because pdfium is not async-safe
//! 2. [`crop`]: map PDF-point boxes onto page pixels and cut regions
//! 3. [`markdown`]: heading-nested Markdown from the section tree
//! 4. [`postprocess`]: deterministic whitespace and invisible-char cleanup
//! 5. [`llm`]: one completion with timeout/retry/backoff
//! 6. [`response`]: tolerant three-tier parsing of the reply

pub mod crop;
pub mod llm;
pub mod markdown;
pub mod postprocess;
pub mod render;
pub mod response;
