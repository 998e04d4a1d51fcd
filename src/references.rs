//! Bibliography recovery.
//!
//! Two mutually exclusive paths:
//!
//! 1. **TEI**: walk every `biblStruct` and read the structured fields.
//! 2. **Markdown fallback**: only when the TEI is absent, unparseable, or
//!    has no `biblStruct`. Numbered entries under a *References* heading are
//!    split into author/year/title/venue; without such a list, inline
//!    `[n]` markers and `(Author, 2020)` parentheticals become raw-text
//!    records.
//!
//! Results from the two paths are never merged.

use crate::tei::xml::Element;
use crate::tei::TeiDocument;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use tracing::{debug, warn};

/// One bibliography entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub id: String,
    pub authors: Vec<String>,
    pub title: Option<String>,
    pub year: Option<i32>,
    pub venue: Option<String>,
    /// Citation text as it appeared in the source, when available.
    pub raw_text: Option<String>,
    /// `Authors (year). Title. In Venue.` built from the structured fields,
    /// or the raw text when there are none.
    pub full_text: String,
}

impl Reference {
    fn new(
        id: String,
        authors: Vec<String>,
        title: Option<String>,
        year: Option<i32>,
        venue: Option<String>,
        raw_text: Option<String>,
    ) -> Self {
        let full_text = format_citation(&authors, title.as_deref(), year, venue.as_deref())
            .or_else(|| raw_text.clone())
            .unwrap_or_default();
        Self {
            id,
            authors,
            title,
            year,
            venue,
            raw_text,
            full_text,
        }
    }

    /// True when at least one structured field was separated out.
    pub fn is_structured(&self) -> bool {
        !self.authors.is_empty() || self.title.is_some() || self.year.is_some()
    }
}

/// Which path produced a [`ReferenceSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceSource {
    Tei,
    Markdown,
    None,
}

impl fmt::Display for ReferenceSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ReferenceSource::Tei => "tei",
            ReferenceSource::Markdown => "markdown",
            ReferenceSource::None => "none",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceSet {
    pub references: Vec<Reference>,
    pub source: ReferenceSource,
}

/// Extract references, preferring the TEI bibliography.
///
/// A TEI string that fails to parse is treated the same as a missing one.
pub fn extract_references(tei_xml: Option<&str>, markdown: &str) -> ReferenceSet {
    if let Some(xml) = tei_xml {
        match TeiDocument::parse(xml) {
            Ok(doc) => {
                let references = from_tei(&doc);
                if !references.is_empty() {
                    debug!("Extracted {} references from TEI", references.len());
                    return ReferenceSet {
                        references,
                        source: ReferenceSource::Tei,
                    };
                }
                debug!("TEI has no biblStruct entries; falling back to markdown");
            }
            Err(e) => warn!("TEI unusable for references, falling back to markdown: {}", e),
        }
    }

    let references = from_markdown(markdown);
    let source = if references.is_empty() {
        ReferenceSource::None
    } else {
        ReferenceSource::Markdown
    };
    debug!("Extracted {} references from markdown", references.len());
    ReferenceSet { references, source }
}

// ── TEI path ─────────────────────────────────────────────────────────────

/// All `biblStruct` entries of a parsed document, in order.
pub fn from_tei(doc: &TeiDocument) -> Vec<Reference> {
    doc.bibl_structs()
        .into_iter()
        .enumerate()
        .map(|(i, bibl)| bibl_to_reference(bibl, i + 1))
        .collect()
}

fn bibl_to_reference(bibl: &Element, ordinal: usize) -> Reference {
    let analytic = bibl.child("analytic");
    let monogr = bibl.child("monogr");

    let analytic_title = analytic.and_then(first_title);
    let monogr_title = monogr.and_then(first_title);
    let (title, venue) = match analytic_title {
        Some(t) => (Some(t), monogr_title),
        None => (monogr_title, None),
    };

    let mut authors = analytic.map(authors_of).unwrap_or_default();
    if authors.is_empty() {
        authors = monogr.map(authors_of).unwrap_or_default();
    }

    let year = bibl.descendants("date").into_iter().find_map(|date| {
        date.attr("when")
            .and_then(parse_year)
            .or_else(|| parse_year(&date.text()))
    });

    let raw_text = bibl
        .children_named("note")
        .find(|n| n.attr("type") == Some("raw_reference"))
        .map(Element::text)
        .filter(|t| !t.is_empty());

    let id = bibl
        .id()
        .map(str::to_string)
        .unwrap_or_else(|| format!("ref_{}", ordinal));

    Reference::new(id, authors, title, year, venue, raw_text)
}

fn first_title(el: &Element) -> Option<String> {
    el.children_named("title")
        .map(Element::text)
        .find(|t| !t.is_empty())
}

fn authors_of(el: &Element) -> Vec<String> {
    el.children_named("author")
        .filter_map(|author| match author.child("persName") {
            Some(pers) => {
                let mut parts: Vec<String> = pers
                    .children_named("forename")
                    .map(Element::text)
                    .collect();
                parts.extend(pers.children_named("surname").map(Element::text));
                parts.retain(|p| !p.is_empty());
                if parts.is_empty() {
                    Some(pers.text())
                } else {
                    Some(parts.join(" "))
                }
            }
            None => Some(author.text()),
        })
        .filter(|name| !name.is_empty())
        .collect()
}

static RE_YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(1[5-9]\d{2}|20\d{2})\b").unwrap());

fn parse_year(s: &str) -> Option<i32> {
    RE_YEAR.captures(s).and_then(|c| c[1].parse().ok())
}

// ── Markdown fallback ────────────────────────────────────────────────────

static RE_REF_HEADING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^#{1,6}\s*(?:[\dIVX]+\.?\s+)?(references|bibliography|works cited|literature cited)\s*$")
        .unwrap()
});

static RE_ENTRY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*\[(\d+)\]\s*(.*)$").unwrap());

static RE_AUTHOR_YEAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<authors>.+?)\s*\((?P<year>\d{4})[a-z]?\)\.?\s*(?P<rest>.*)$").unwrap()
});

static RE_INITIALS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:[A-Z]\.?(?:\s*-\s*|\s+)?)+$").unwrap());

static RE_INLINE_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[(\d+(?:\s*[,;–-]\s*\d+)*)\]").unwrap());

static RE_INLINE_AUTHOR_YEAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\((?P<author>[A-Z][A-Za-z'\-]+(?: et al\.)?(?: (?:and|&) [A-Z][A-Za-z'\-]+)?),? (?P<year>\d{4})[a-z]?\)",
    )
    .unwrap()
});

/// Recover references from Markdown or plain text.
pub fn from_markdown(text: &str) -> Vec<Reference> {
    let entries = reference_list_entries(text);
    if !entries.is_empty() {
        return entries
            .into_iter()
            .map(|(n, body)| parse_entry(&format!("ref_{}", n), &body))
            .collect();
    }
    inline_citations(text)
}

/// Numbered `[n] …` entries with wrapped continuation lines joined.
///
/// Below a references heading the list runs to the next heading. Without
/// one, any line that starts with `[n]` and carries text is an entry, and
/// a blank line ends its continuation.
fn reference_list_entries(text: &str) -> Vec<(String, String)> {
    let lines: Vec<&str> = text.lines().map(str::trim).collect();
    let heading = lines.iter().position(|l| RE_REF_HEADING.is_match(l));
    let under_heading = heading.is_some();
    let start = heading.map_or(0, |i| i + 1);

    let mut entries: Vec<(String, String)> = Vec::new();
    let mut open = false;
    for line in &lines[start..] {
        if line.starts_with('#') {
            if under_heading {
                break;
            }
            open = false;
            continue;
        }
        match RE_ENTRY.captures(line) {
            Some(caps) if under_heading || !caps[2].trim().is_empty() => {
                entries.push((caps[1].to_string(), caps[2].trim().to_string()));
                open = true;
            }
            _ if line.is_empty() => open = under_heading && open,
            _ if open => {
                if let Some((_, body)) = entries.last_mut() {
                    body.push(' ');
                    body.push_str(line);
                }
            }
            _ => {}
        }
    }
    entries
}

fn parse_entry(id: &str, body: &str) -> Reference {
    let raw = Some(body.to_string());
    let Some(caps) = RE_AUTHOR_YEAR.captures(body) else {
        return Reference::new(id.to_string(), Vec::new(), None, None, None, raw);
    };

    let authors = split_authors(&caps["authors"]);
    let year = caps["year"].parse().ok();
    let rest = caps["rest"].trim();
    let (title, venue) = match rest.split_once(". ") {
        Some((t, v)) => (clean_field(t), clean_field(v)),
        None => (clean_field(rest), None),
    };
    Reference::new(id.to_string(), authors, title, year, venue, raw)
}

fn clean_field(s: &str) -> Option<String> {
    let s = s.trim().trim_end_matches('.').trim();
    (!s.is_empty()).then(|| s.to_string())
}

/// Split an author string, pairing `Surname, Initials` tokens back up.
fn split_authors(s: &str) -> Vec<String> {
    let normalised = s
        .trim()
        .trim_end_matches(',')
        .replace(", and ", ", ")
        .replace(" and ", ", ")
        .replace(" & ", ", ");
    let tokens: Vec<&str> = normalised
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty() && !t.eq_ignore_ascii_case("et al.") && !t.eq_ignore_ascii_case("et al"))
        .collect();

    let mut authors = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        let token = tokens[i];
        match tokens.get(i + 1) {
            Some(next) if RE_INITIALS.is_match(next) && !RE_INITIALS.is_match(token) => {
                authors.push(format!("{}, {}", token, next));
                i += 2;
            }
            _ => {
                authors.push(token.to_string());
                i += 1;
            }
        }
    }
    authors
}

fn inline_citations(text: &str) -> Vec<Reference> {
    let mut references = Vec::new();
    let mut seen = HashSet::new();

    for caps in RE_INLINE_MARKER.captures_iter(text) {
        for n in expand_marker(&caps[1]) {
            if seen.insert(format!("n{}", n)) {
                references.push(Reference::new(
                    format!("ref_{}", n),
                    Vec::new(),
                    None,
                    None,
                    None,
                    Some(format!("[{}]", n)),
                ));
            }
        }
    }

    for caps in RE_INLINE_AUTHOR_YEAR.captures_iter(text) {
        let raw = caps[0].to_string();
        if !seen.insert(raw.clone()) {
            continue;
        }
        let id = format!("cite_{}", references.len() + 1);
        references.push(Reference::new(
            id,
            vec![caps["author"].to_string()],
            None,
            caps["year"].parse().ok(),
            None,
            Some(raw),
        ));
    }

    references
}

/// `1, 3-5` → `[1, 3, 4, 5]`. Ranges wider than 50 are taken as noise.
fn expand_marker(marker: &str) -> Vec<u32> {
    let mut numbers = Vec::new();
    for part in marker.split([',', ';']) {
        let part = part.trim();
        let bounds: Vec<u32> = part
            .split(['-', '–'])
            .filter_map(|n| n.trim().parse().ok())
            .collect();
        match bounds.as_slice() {
            [single] => numbers.push(*single),
            [lo, hi] if lo <= hi && hi - lo <= 50 => numbers.extend(*lo..=*hi),
            _ => {}
        }
    }
    numbers
}

fn format_citation(
    authors: &[String],
    title: Option<&str>,
    year: Option<i32>,
    venue: Option<&str>,
) -> Option<String> {
    let mut head = authors.join(", ");
    if let Some(y) = year {
        if head.is_empty() {
            head = format!("({})", y);
        } else {
            head = format!("{} ({})", head, y);
        }
    }

    let mut parts: Vec<String> = Vec::new();
    if !head.is_empty() {
        parts.push(head);
    }
    if let Some(t) = title {
        parts.push(t.to_string());
    }
    if let Some(v) = venue {
        parts.push(format!("In {}", v));
    }
    if parts.is_empty() {
        None
    } else {
        Some(format!("{}.", parts.join(". ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEI_BIBL: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<TEI xmlns="http://www.tei-c.org/ns/1.0"><text><back><div type="references"><listBibl>
  <biblStruct xml:id="b0">
    <analytic>
      <title level="a" type="main">Deep Learning for Object Detection</title>
      <author><persName><forename type="first">John</forename><surname>Smith</surname></persName></author>
    </analytic>
    <monogr>
      <title level="j">Computer Vision Journal</title>
      <imprint><date type="published" when="2020-03"/></imprint>
    </monogr>
    <note type="raw_reference">J. Smith. Deep learning for object detection. CVJ, 2020.</note>
  </biblStruct>
  <biblStruct>
    <monogr>
      <title level="m">Pattern Recognition</title>
      <author><persName><forename>C</forename><forename>M</forename><surname>Bishop</surname></persName></author>
      <imprint><date>2006</date></imprint>
    </monogr>
  </biblStruct>
</listBibl></div></back></text></TEI>"#;

    const MARKDOWN: &str = "# Test Paper\n\n## Introduction\nDeep learning [1] works [2].\n\n## References\n[1] Smith, J. (2020). Deep Learning for Object Detection.\n[2] Doe, J., and Roe, R. (2021). Another Paper. Conference\nProceedings.\n";

    #[test]
    fn tei_structured_fields() {
        let set = extract_references(Some(TEI_BIBL), "");
        assert_eq!(set.source, ReferenceSource::Tei);
        assert_eq!(set.references.len(), 2);

        let r = &set.references[0];
        assert_eq!(r.id, "b0");
        assert_eq!(r.authors, vec!["John Smith"]);
        assert_eq!(r.title.as_deref(), Some("Deep Learning for Object Detection"));
        assert_eq!(r.year, Some(2020));
        assert_eq!(r.venue.as_deref(), Some("Computer Vision Journal"));
        assert!(r.raw_text.as_deref().unwrap().starts_with("J. Smith."));
        assert!(r.full_text.contains("John Smith (2020)"));
        assert!(r.full_text.ends_with("In Computer Vision Journal."));
    }

    #[test]
    fn tei_monograph_only() {
        let set = extract_references(Some(TEI_BIBL), "");
        let r = &set.references[1];
        assert_eq!(r.id, "ref_2");
        assert_eq!(r.title.as_deref(), Some("Pattern Recognition"));
        assert_eq!(r.authors, vec!["C M Bishop"]);
        assert_eq!(r.year, Some(2006));
        assert_eq!(r.venue, None);
    }

    #[test]
    fn fallback_on_empty_tei_bibliography() {
        let tei = r#"<TEI><text><back><div type="references"><listBibl/></div></back></text></TEI>"#;
        let md = "## References\n[1] Smith, J. (2020). Title. Venue.\n";
        let set = extract_references(Some(tei), md);
        assert_eq!(set.source, ReferenceSource::Markdown);
        assert_eq!(set.references.len(), 1);

        let r = &set.references[0];
        assert_eq!(r.id, "ref_1");
        assert_eq!(r.authors, vec!["Smith, J."]);
        assert_eq!(r.year, Some(2020));
        assert_eq!(r.title.as_deref(), Some("Title"));
        assert_eq!(r.venue.as_deref(), Some("Venue"));
        assert_eq!(r.raw_text.as_deref(), Some("Smith, J. (2020). Title. Venue."));
    }

    #[test]
    fn numbered_entries_without_heading() {
        let tei = r#"<TEI><text><back><div type="references"><listBibl/></div></back></text></TEI>"#;
        let set = extract_references(Some(tei), "[1] Smith, J. (2020). Title. Venue.");
        assert_eq!(set.source, ReferenceSource::Markdown);
        assert_eq!(set.references.len(), 1);

        let r = &set.references[0];
        assert_eq!(r.id, "ref_1");
        assert_eq!(r.authors, vec!["Smith, J."]);
        assert_eq!(r.year, Some(2020));
        assert_eq!(r.title.as_deref(), Some("Title"));
        assert_eq!(r.raw_text.as_deref(), Some("Smith, J. (2020). Title. Venue."));
    }

    #[test]
    fn headingless_entries_stop_at_blank_line() {
        let md = "Body cites [2].\n\n[1] Smith, J. (2020). Title.\nVenue.\n\nMore body text.\n[2] Doe, A. (2019). Other.\n";
        let refs = from_markdown(md);
        let ids: Vec<_> = refs.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["ref_1", "ref_2"]);
        assert_eq!(refs[0].raw_text.as_deref(), Some("Smith, J. (2020). Title. Venue."));
        assert_eq!(refs[1].raw_text.as_deref(), Some("Doe, A. (2019). Other."));
    }

    #[test]
    fn fallback_on_malformed_tei() {
        let set = extract_references(Some("<TEI><text>"), MARKDOWN);
        assert_eq!(set.source, ReferenceSource::Markdown);
        assert_eq!(set.references.len(), 2);
    }

    #[test]
    fn markdown_entries_with_wrapped_lines() {
        let refs = from_markdown(MARKDOWN);
        let ids: Vec<_> = refs.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["ref_1", "ref_2"]);
        assert_eq!(refs[1].authors, vec!["Doe, J.", "Roe, R."]);
        assert_eq!(refs[1].title.as_deref(), Some("Another Paper"));
        assert_eq!(refs[1].venue.as_deref(), Some("Conference Proceedings"));
    }

    #[test]
    fn unstructured_entry_keeps_raw_text() {
        let refs = from_markdown("## Bibliography\n[7] Some odd citation without a year\n");
        assert_eq!(refs.len(), 1);
        assert!(!refs[0].is_structured());
        assert_eq!(refs[0].full_text, "Some odd citation without a year");
    }

    #[test]
    fn inline_markers_without_reference_list() {
        let refs = from_markdown("Prior work [1, 3-4] and [1] and (Vaswani et al., 2017) shows it.");
        let ids: Vec<_> = refs.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["ref_1", "ref_3", "ref_4", "cite_4"]);
        let cite = &refs[3];
        assert_eq!(cite.authors, vec!["Vaswani et al."]);
        assert_eq!(cite.year, Some(2017));
    }

    #[test]
    fn no_citations_yields_none() {
        let set = extract_references(None, "# Paper\n\nThis paper has no citations.");
        assert!(set.references.is_empty());
        assert_eq!(set.source, ReferenceSource::None);
    }

    #[test]
    fn author_splitting() {
        assert_eq!(split_authors("Smith, J."), vec!["Smith, J."]);
        assert_eq!(
            split_authors("Smith, J. K., Doe, A., & Lee, K.-M."),
            vec!["Smith, J. K.", "Doe, A.", "Lee, K.-M."]
        );
        assert_eq!(split_authors("John Smith and Jane Doe"), vec!["John Smith", "Jane Doe"]);
    }
}
