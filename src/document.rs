//! Records produced by walking a TEI document.
//!
//! All records are built once during traversal and never mutated afterwards.
//! Geometry is carried as both the raw `coords` attribute (for auditing) and
//! the parsed [`CoordinateSet`].

use crate::error::StructureWarning;
use crate::geometry::CoordinateSet;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A document section with its paragraphs and nested subsections.
///
/// `level` is 0 for top-level sections; every child's level is exactly one
/// more than its parent's.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub id: String,
    /// Section number from the heading's `n` attribute, e.g. `"3.2"`.
    pub number: Option<String>,
    pub heading: String,
    pub level: usize,
    pub paragraphs: Vec<String>,
    pub children: Vec<Section>,
}

impl Section {
    /// Heading as shown in Markdown: number and title.
    pub fn display_heading(&self) -> String {
        match &self.number {
            Some(n) if !self.heading.is_empty() => format!("{} {}", n, self.heading),
            Some(n) => n.clone(),
            None => self.heading.clone(),
        }
    }

    /// This section followed by all descendants, depth first.
    pub fn iter(&self) -> SectionIter<'_> {
        SectionIter { stack: vec![self] }
    }
}

/// Depth-first iterator over a section tree.
pub struct SectionIter<'a> {
    stack: Vec<&'a Section>,
}

impl<'a> Iterator for SectionIter<'a> {
    type Item = &'a Section;

    fn next(&mut self) -> Option<Self::Item> {
        let next = self.stack.pop()?;
        self.stack.extend(next.children.iter().rev());
        Some(next)
    }
}

/// Kind tag shared by figure, table, and graphic records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    Figure,
    Table,
    Graphic,
}

impl ElementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementType::Figure => "figure",
            ElementType::Table => "table",
            ElementType::Graphic => "graphic",
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `figure` (or table) element with its caption and region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FigureTable {
    pub id: String,
    pub kind: ElementType,
    pub label: Option<String>,
    pub caption: Option<String>,
    pub raw_coords: String,
    pub coordinates: CoordinateSet,
}

/// A `graphic` element, usually nested inside a figure.
///
/// The parent's identifier and caption are kept for association; the
/// parent's region is not inherited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Graphic {
    pub id: String,
    /// The `type` attribute (`bitmap`, `vector`, …), `unknown` when absent.
    pub graphic_type: String,
    pub raw_coords: String,
    pub coordinates: CoordinateSet,
    pub parent_id: Option<String>,
    pub parent_caption: Option<String>,
}

/// Everything extracted from one TEI document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentContent {
    pub title: Option<String>,
    pub abstract_paragraphs: Vec<String>,
    /// Body text that precedes the first headed section.
    pub preamble: Vec<String>,
    pub sections: Vec<Section>,
    pub figures: Vec<FigureTable>,
    pub graphics: Vec<Graphic>,
    pub warnings: Vec<StructureWarning>,
}

impl DocumentContent {
    /// All sections in document order, depth first.
    pub fn all_sections(&self) -> impl Iterator<Item = &Section> {
        self.sections.iter().flat_map(Section::iter)
    }

    pub fn count_kind(&self, kind: ElementType) -> usize {
        match kind {
            ElementType::Graphic => self.graphics.len(),
            _ => self.figures.iter().filter(|f| f.kind == kind).count(),
        }
    }

    /// Total discarded coordinate segments across all elements.
    pub fn geometry_warning_count(&self) -> usize {
        self.figures
            .iter()
            .map(|f| f.coordinates.warnings().len())
            .chain(self.graphics.iter().map(|g| g.coordinates.warnings().len()))
            .sum()
    }
}
