//! Single-pass traversal of a TEI tree into sections, figures, and graphics.
//!
//! Every element is classified once through [`DISPATCH`], a table keyed by
//! local tag name. Unknown tags map to [`ElementKind::Unknown`], which is a
//! no-op that records a [`StructureWarning`]; nothing about the document's
//! shape is fatal once [`TeiDocument`] has validated the root.
//!
//! ## Nesting
//!
//! Section levels come from `div` nesting depth only. A `div` without a
//! `head` is transparent: its paragraphs join the enclosing section (or the
//! document preamble) and its child `div`s nest at the enclosing level, so
//! the level invariant `child.level == parent.level + 1` always holds.

use crate::document::{DocumentContent, ElementType, FigureTable, Graphic, Section};
use crate::error::StructureWarning;
use crate::geometry::CoordinateSet;
use crate::tei::xml::Element;
use crate::tei::TeiDocument;
use tracing::{debug, warn};

/// What the walker does with an element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    /// Descend without creating a record (`text`, `body`, `back`, …).
    Container,
    /// A `div`: becomes a [`Section`] when it has a heading.
    Section,
    Heading,
    /// Block text kept as a paragraph.
    Paragraph,
    Formula,
    FigureTable,
    Graphic,
    /// Known but irrelevant to section/figure extraction.
    Ignored,
    /// Not in the table; skipped with a warning.
    Unknown,
}

/// Tag → kind dispatch table.
pub const DISPATCH: &[(&str, ElementKind)] = &[
    ("text", ElementKind::Container),
    ("front", ElementKind::Container),
    ("body", ElementKind::Container),
    ("back", ElementKind::Container),
    ("group", ElementKind::Container),
    ("div", ElementKind::Section),
    ("div1", ElementKind::Section),
    ("div2", ElementKind::Section),
    ("div3", ElementKind::Section),
    ("head", ElementKind::Heading),
    ("p", ElementKind::Paragraph),
    ("ab", ElementKind::Paragraph),
    ("note", ElementKind::Paragraph),
    ("list", ElementKind::Paragraph),
    ("quote", ElementKind::Paragraph),
    ("formula", ElementKind::Formula),
    ("figure", ElementKind::FigureTable),
    ("table", ElementKind::FigureTable),
    ("graphic", ElementKind::Graphic),
    ("listBibl", ElementKind::Ignored),
    ("label", ElementKind::Ignored),
    ("figDesc", ElementKind::Ignored),
    ("pb", ElementKind::Ignored),
    ("lb", ElementKind::Ignored),
    ("docTitle", ElementKind::Ignored),
    ("byline", ElementKind::Ignored),
    ("titlePage", ElementKind::Ignored),
];

/// Look up an element's kind by local name.
pub fn classify(tag: &str) -> ElementKind {
    DISPATCH
        .iter()
        .find(|(name, _)| *name == tag)
        .map(|(_, kind)| *kind)
        .unwrap_or(ElementKind::Unknown)
}

/// Result of visiting one `div`.
enum DivContent {
    Section(Section),
    /// A headless div: its pieces are spliced into the enclosing scope.
    Loose {
        paragraphs: Vec<String>,
        sections: Vec<Section>,
    },
}

/// Walks one document. Create a fresh walker per document.
#[derive(Debug, Default)]
pub struct TeiStructureWalker {
    content: DocumentContent,
    section_count: usize,
    figure_count: usize,
    table_count: usize,
    graphic_count: usize,
}

impl TeiStructureWalker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extract sections, figures/tables, and graphics from `doc`.
    pub fn walk(mut self, doc: &TeiDocument) -> DocumentContent {
        self.content.title = doc.title();
        self.content.abstract_paragraphs = doc.abstract_paragraphs();

        match doc.text() {
            Some(text) => self.walk_container(text),
            None => self.warn(StructureWarning::new("text", "TEI", "document has no <text> element")),
        }

        debug!(
            "Walked TEI: {} top-level sections, {} figures/tables, {} graphics, {} warnings",
            self.content.sections.len(),
            self.content.figures.len(),
            self.content.graphics.len(),
            self.content.warnings.len()
        );
        self.content
    }

    fn warn(&mut self, warning: StructureWarning) {
        warn!("Unexpected TEI structure: {}", warning);
        self.content.warnings.push(warning);
    }

    fn walk_container(&mut self, container: &Element) {
        for child in container.elements() {
            match classify(&child.name) {
                ElementKind::Container => self.walk_container(child),
                ElementKind::Section => {
                    if is_reference_div(child) {
                        continue;
                    }
                    match self.walk_div(child, 0) {
                        DivContent::Section(section) => self.content.sections.push(section),
                        DivContent::Loose {
                            paragraphs,
                            sections,
                        } => {
                            if self.content.sections.is_empty() {
                                self.content.preamble.extend(paragraphs);
                            } else if !paragraphs.is_empty() {
                                debug!("Headless div after sections; appending to last section");
                                if let Some(last) = self.content.sections.last_mut() {
                                    last.paragraphs.extend(paragraphs);
                                }
                            }
                            self.content.sections.extend(sections);
                        }
                    }
                }
                ElementKind::Paragraph | ElementKind::Formula => {
                    let text = child.text();
                    if !text.is_empty() {
                        self.content.preamble.push(text);
                    }
                }
                ElementKind::FigureTable => self.visit_figure(child),
                ElementKind::Graphic => self.visit_graphic(child, None),
                ElementKind::Ignored => {}
                ElementKind::Heading => self.warn(StructureWarning::new(
                    "head",
                    &container.name,
                    "heading outside any div",
                )),
                ElementKind::Unknown => self.warn(StructureWarning::new(
                    &child.name,
                    &container.name,
                    "unexpected element skipped",
                )),
            }
        }
    }

    /// Visit a `div` that would sit at `level` if it has a heading.
    fn walk_div(&mut self, div: &Element, level: usize) -> DivContent {
        let head = div.child("head");
        let (number, heading) = head.map(split_heading).unwrap_or((None, String::new()));
        let is_section = number.is_some() || !heading.is_empty();
        if head.is_some() && !is_section {
            self.warn(StructureWarning::new("head", &div.name, "empty heading; div treated as untitled"));
        }

        let child_level = if is_section { level + 1 } else { level };
        let mut paragraphs = Vec::new();
        let mut sections = Vec::new();
        let mut seen_head = false;

        for child in div.elements() {
            match classify(&child.name) {
                ElementKind::Heading => {
                    if seen_head {
                        // Repeated heads are usually run-in titles; keep the text.
                        push_text(&mut paragraphs, child);
                    }
                    seen_head = true;
                }
                ElementKind::Paragraph | ElementKind::Formula => push_text(&mut paragraphs, child),
                ElementKind::Section => {
                    if is_reference_div(child) {
                        continue;
                    }
                    match self.walk_div(child, child_level) {
                        DivContent::Section(s) => sections.push(s),
                        DivContent::Loose {
                            paragraphs: p,
                            sections: s,
                        } => {
                            paragraphs.extend(p);
                            sections.extend(s);
                        }
                    }
                }
                ElementKind::FigureTable => self.visit_figure(child),
                ElementKind::Graphic => self.visit_graphic(child, None),
                ElementKind::Container => {
                    self.warn(StructureWarning::new(&child.name, &div.name, "container nested in div skipped"))
                }
                ElementKind::Ignored => {}
                ElementKind::Unknown => self.warn(StructureWarning::new(
                    &child.name,
                    &div.name,
                    "unexpected element skipped",
                )),
            }
        }

        if !is_section {
            return DivContent::Loose {
                paragraphs,
                sections,
            };
        }

        self.section_count += 1;
        let id = div
            .id()
            .map(str::to_string)
            .unwrap_or_else(|| format!("section_{}", self.section_count));
        DivContent::Section(Section {
            id,
            number,
            heading,
            level,
            paragraphs,
            children: sections,
        })
    }

    fn visit_figure(&mut self, el: &Element) {
        let kind = if el.name == "table" || el.attr("type") == Some("table") {
            ElementType::Table
        } else {
            ElementType::Figure
        };
        let id = match el.id() {
            Some(id) => id.to_string(),
            None => match kind {
                ElementType::Table => {
                    self.table_count += 1;
                    format!("table_auto_{}", self.table_count)
                }
                _ => {
                    self.figure_count += 1;
                    format!("figure_auto_{}", self.figure_count)
                }
            },
        };

        let label = el.child("label").map(Element::text).filter(|t| !t.is_empty());
        let caption = join_caption(
            el.child("head").map(Element::text),
            el.child("figDesc").map(Element::text),
        );
        let raw_coords = el.attr("coords").unwrap_or_default().trim().to_string();
        let coordinates = CoordinateSet::parse(&raw_coords);
        if coordinates.is_empty() {
            debug!("{} {} has no usable coordinates; metadata kept", kind, id);
        }

        let figure = FigureTable {
            id,
            kind,
            label,
            caption,
            raw_coords,
            coordinates,
        };

        for child in el.elements() {
            match child.name.as_str() {
                "graphic" => self.visit_graphic(child, Some(&figure)),
                "head" | "label" | "figDesc" | "table" | "note" | "p" | "row" => {}
                other => self.warn(StructureWarning::new(other, &el.name, "unexpected element in figure skipped")),
            }
        }

        self.content.figures.push(figure);
    }

    fn visit_graphic(&mut self, el: &Element, parent: Option<&FigureTable>) {
        self.graphic_count += 1;
        let id = el
            .id()
            .map(str::to_string)
            .unwrap_or_else(|| format!("graphic_{}", self.graphic_count));
        let raw_coords = el.attr("coords").unwrap_or_default().trim().to_string();
        let coordinates = CoordinateSet::parse(&raw_coords);

        self.content.graphics.push(Graphic {
            id,
            graphic_type: el.attr("type").unwrap_or("unknown").to_string(),
            raw_coords,
            coordinates,
            parent_id: parent.map(|f| f.id.clone()),
            parent_caption: parent.and_then(|f| f.caption.clone()),
        });
    }
}

/// Convenience: walk a parsed document with a fresh walker.
pub fn walk(doc: &TeiDocument) -> DocumentContent {
    TeiStructureWalker::new().walk(doc)
}

fn is_reference_div(div: &Element) -> bool {
    div.attr("type") == Some("references") || div.child("listBibl").is_some()
}

fn push_text(out: &mut Vec<String>, el: &Element) {
    let text = el.text();
    if !text.is_empty() {
        out.push(text);
    }
}

/// Split a `head` into its `n` attribute and the title text without it.
fn split_heading(head: &Element) -> (Option<String>, String) {
    let number = head
        .attr("n")
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string);
    let text = head.text();
    let title = match &number {
        Some(n) => text
            .strip_prefix(n.as_str())
            .map(|rest| rest.trim_start_matches(['.', ' ']).to_string())
            .unwrap_or(text),
        None => text,
    };
    (number, title)
}

fn join_caption(head: Option<String>, desc: Option<String>) -> Option<String> {
    let parts: Vec<String> = [head, desc]
        .into_iter()
        .flatten()
        .filter(|p| !p.is_empty())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}
