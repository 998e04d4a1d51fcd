//! TEI-XML input: parsing, root validation, and header metadata.
//!
//! A [`TeiDocument`] is the only fatal gate in extraction: the XML must be
//! well-formed and must have a `TEI` root (a `teiCorpus` wrapper is accepted
//! and its first `TEI` member used). Everything below the root is handled
//! tolerantly by [`walker`].

pub mod walker;
pub mod xml;

use crate::error::Tei2MdError;
use std::path::Path;
use tracing::debug;
use xml::Element;

/// A parsed TEI document.
#[derive(Debug, Clone)]
pub struct TeiDocument {
    root: Element,
}

impl TeiDocument {
    /// Parse TEI text.
    ///
    /// # Errors
    /// [`Tei2MdError::MalformedXml`] for syntax errors and
    /// [`Tei2MdError::NoTeiRoot`] when there is no `TEI` element at the top.
    pub fn parse(input: &str) -> Result<TeiDocument, Tei2MdError> {
        let input = input.strip_prefix('\u{FEFF}').unwrap_or(input);
        let root = xml::parse(input)?.ok_or_else(|| Tei2MdError::NoTeiRoot {
            found: "no element".to_string(),
        })?;

        let root = match root.name.as_str() {
            "TEI" => root,
            "teiCorpus" => root
                .children_named("TEI")
                .next()
                .cloned()
                .ok_or_else(|| Tei2MdError::NoTeiRoot {
                    found: "<teiCorpus> without <TEI>".to_string(),
                })?,
            other => {
                return Err(Tei2MdError::NoTeiRoot {
                    found: format!("<{}>", other),
                })
            }
        };

        debug!("Parsed TEI document ({} top-level children)", root.children.len());
        Ok(TeiDocument { root })
    }

    /// Read and parse a TEI file.
    pub fn from_path(path: &Path) -> Result<TeiDocument, Tei2MdError> {
        let text = read_tei(path)?;
        TeiDocument::parse(&text)
    }

    pub fn root(&self) -> &Element {
        &self.root
    }

    /// The `text` element holding `front`, `body`, and `back`.
    pub fn text(&self) -> Option<&Element> {
        self.root.child("text")
    }

    /// Paper title from the header's title statement.
    pub fn title(&self) -> Option<String> {
        let stmt = self
            .root
            .find_path(&["teiHeader", "fileDesc", "titleStmt"])?;
        let title = stmt
            .children_named("title")
            .find(|t| t.attr("type").is_none_or(|ty| ty == "main"))
            .or_else(|| stmt.child("title"))?
            .text();
        (!title.is_empty()).then_some(title)
    }

    /// Abstract paragraphs from the profile description.
    pub fn abstract_paragraphs(&self) -> Vec<String> {
        let Some(abstract_el) = self
            .root
            .find_path(&["teiHeader", "profileDesc", "abstract"])
        else {
            return Vec::new();
        };
        let paragraphs: Vec<String> = abstract_el
            .descendants("p")
            .into_iter()
            .map(Element::text)
            .filter(|t| !t.is_empty())
            .collect();
        if paragraphs.is_empty() {
            let text = abstract_el.text();
            if text.is_empty() {
                Vec::new()
            } else {
                vec![text]
            }
        } else {
            paragraphs
        }
    }

    /// Every `biblStruct` in the bibliography, in document order.
    pub fn bibl_structs(&self) -> Vec<&Element> {
        let Some(text) = self.text() else {
            return Vec::new();
        };
        text.descendants("listBibl")
            .into_iter()
            .flat_map(|list| list.children_named("biblStruct"))
            .collect()
    }
}

/// Read a TEI file, mapping I/O failures onto [`Tei2MdError`].
pub fn read_tei(path: &Path) -> Result<String, Tei2MdError> {
    std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Tei2MdError::FileNotFound {
                path: path.to_path_buf(),
            }
        } else {
            Tei2MdError::ReadFailed {
                path: path.to_path_buf(),
                source: e,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = r#"<TEI xmlns="http://www.tei-c.org/ns/1.0">
  <teiHeader>
    <fileDesc><titleStmt><title level="a" type="main">Sparse Detection</title></titleStmt></fileDesc>
    <profileDesc><abstract><div><p>We detect  things.</p><p>Fast.</p></div></abstract></profileDesc>
  </teiHeader>
  <text><body/></text>
</TEI>"#;

    #[test]
    fn parses_title_and_abstract() {
        let doc = TeiDocument::parse(HEADER).unwrap();
        assert_eq!(doc.title().as_deref(), Some("Sparse Detection"));
        assert_eq!(doc.abstract_paragraphs(), vec!["We detect things.", "Fast."]);
    }

    #[test]
    fn rejects_non_tei_root() {
        let err = TeiDocument::parse("<html><body/></html>").unwrap_err();
        match err {
            Tei2MdError::NoTeiRoot { found } => assert_eq!(found, "<html>"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rejects_empty_input() {
        assert!(matches!(
            TeiDocument::parse("   ").unwrap_err(),
            Tei2MdError::NoTeiRoot { .. }
        ));
    }

    #[test]
    fn accepts_tei_corpus_wrapper() {
        let doc = TeiDocument::parse("<teiCorpus><TEI><text/></TEI></teiCorpus>").unwrap();
        assert_eq!(doc.root().name, "TEI");
        assert!(doc.text().is_some());
    }

    #[test]
    fn missing_file_is_file_not_found() {
        let err = TeiDocument::from_path(Path::new("/nonexistent/paper.tei.xml")).unwrap_err();
        assert!(matches!(err, Tei2MdError::FileNotFound { .. }));
    }

    #[test]
    fn bom_is_ignored() {
        assert!(TeiDocument::parse("\u{FEFF}<TEI/>").is_ok());
    }
}
