//! Markdown rendering of an extracted document.
//!
//! Section depth maps directly onto heading depth: a section at `level`
//! gets `heading_base_level + level` hashes, so counting hashes and
//! subtracting the base recovers the tree exactly.

use crate::config::ExtractionConfig;
use crate::document::{DocumentContent, ElementType, FigureTable, Section};
use crate::output::CroppedImage;
use crate::pipeline::postprocess::clean_markdown;

/// Renders [`DocumentContent`] as heading-nested Markdown.
#[derive(Debug, Clone, Copy)]
pub struct MarkdownRenderer {
    heading_base_level: usize,
    include_title: bool,
    include_figure_captions: bool,
}

impl Default for MarkdownRenderer {
    fn default() -> Self {
        Self::new(&ExtractionConfig::default())
    }
}

impl MarkdownRenderer {
    pub fn new(config: &ExtractionConfig) -> Self {
        Self {
            heading_base_level: config.heading_base_level,
            include_title: config.include_title,
            include_figure_captions: config.include_figure_captions,
        }
    }

    /// The full document: title, abstract, preamble, sections, and the
    /// figure list with links to any cropped images.
    pub fn render(&self, content: &DocumentContent, images: &[CroppedImage]) -> String {
        let mut out = String::new();

        if self.include_title {
            if let Some(title) = &content.title {
                out.push_str(&format!("# {}\n\n", title));
            }
            if !content.abstract_paragraphs.is_empty() {
                out.push_str(&format!("{} Abstract\n\n", self.hashes(0)));
                push_paragraphs(&mut out, &content.abstract_paragraphs);
            }
        }

        push_paragraphs(&mut out, &content.preamble);
        out.push_str(&self.render_sections(&content.sections));

        if self.include_figure_captions {
            out.push_str(&self.render_figures(content, images));
        }

        clean_markdown(&out)
    }

    /// Sections only, depth first.
    pub fn render_sections(&self, sections: &[Section]) -> String {
        let mut out = String::new();
        for section in sections {
            self.render_section(section, &mut out);
        }
        out
    }

    fn render_section(&self, section: &Section, out: &mut String) {
        let heading = section.display_heading();
        out.push_str(&format!("{} {}\n\n", self.hashes(section.level), heading));
        push_paragraphs(out, &section.paragraphs);
        for child in &section.children {
            self.render_section(child, out);
        }
    }

    fn hashes(&self, level: usize) -> String {
        "#".repeat(self.heading_base_level + level)
    }

    fn render_figures(&self, content: &DocumentContent, images: &[CroppedImage]) -> String {
        if content.figures.is_empty() && images.is_empty() {
            return String::new();
        }

        let mut out = format!("{} Figures and Tables\n\n", self.hashes(0));
        for figure in &content.figures {
            out.push_str(&format!("**{}**", figure_label(figure)));
            if let Some(caption) = &figure.caption {
                out.push_str(&format!(": {}", caption));
            }
            out.push_str("\n\n");

            let own = images.iter().filter(|img| img.element_id == figure.id);
            let nested = content
                .graphics
                .iter()
                .filter(|g| g.parent_id.as_deref() == Some(figure.id.as_str()))
                .flat_map(|g| images.iter().filter(move |img| img.element_id == g.id));
            for image in own.chain(nested) {
                push_image(&mut out, &figure.id, image);
            }
        }

        let loose: Vec<&CroppedImage> = images
            .iter()
            .filter(|img| img.element_type == ElementType::Graphic)
            .filter(|img| {
                content
                    .graphics
                    .iter()
                    .find(|g| g.id == img.element_id)
                    .is_none_or(|g| g.parent_id.is_none())
            })
            .collect();
        for image in loose {
            push_image(&mut out, &image.element_id, image);
        }
        out
    }
}

fn push_paragraphs(out: &mut String, paragraphs: &[String]) {
    for p in paragraphs {
        for (i, line) in p.lines().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            out.push_str(&escape_heading_marker(line));
        }
        out.push_str("\n\n");
    }
}

/// Body text must never open a heading: a leading `#` becomes `\#`.
fn escape_heading_marker(line: &str) -> std::borrow::Cow<'_, str> {
    let body = line.trim_start();
    if body.starts_with('#') {
        let indent = &line[..line.len() - body.len()];
        format!("{}\\{}", indent, body).into()
    } else {
        line.into()
    }
}

fn push_image(out: &mut String, alt: &str, image: &CroppedImage) {
    out.push_str(&format!("![{}]({})\n\n", alt, image.relative_path));
}

fn figure_label(figure: &FigureTable) -> String {
    let kind = match figure.kind {
        ElementType::Table => "Table",
        _ => "Figure",
    };
    match &figure.label {
        Some(label) => format!("{} {}", kind, label),
        None => format!("{} {}", kind, figure.id),
    }
}

/// Heading depths of every ATX heading, relative to `base`.
///
/// Lines inside fenced code blocks are ignored.
pub fn heading_levels(markdown: &str, base: usize) -> Vec<usize> {
    let mut levels = Vec::new();
    let mut in_fence = false;
    for line in markdown.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        let hashes = line.chars().take_while(|c| *c == '#').count();
        if hashes >= base && hashes > 0 && line[hashes..].starts_with(' ') {
            levels.push(hashes - base);
        }
    }
    levels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::CoordinateSet;
    use std::path::PathBuf;

    fn section(heading: &str, level: usize, children: Vec<Section>) -> Section {
        Section {
            id: heading.to_lowercase(),
            number: None,
            heading: heading.into(),
            level,
            paragraphs: vec![format!("{} body.", heading)],
            children,
        }
    }

    fn tree() -> Vec<Section> {
        vec![
            section(
                "Intro",
                0,
                vec![
                    section("Background", 1, vec![section("Deep", 2, vec![section("Deeper", 3, vec![])])]),
                    section("Scope", 1, vec![]),
                ],
            ),
            section("Method", 0, vec![]),
        ]
    }

    #[test]
    fn heading_depth_round_trips() {
        for base in 1..=5 {
            let config = ExtractionConfig {
                heading_base_level: base,
                ..Default::default()
            };
            let md = MarkdownRenderer::new(&config).render_sections(&tree());
            let expected: Vec<usize> = tree()
                .iter()
                .flat_map(Section::iter)
                .map(|s| s.level)
                .collect();
            assert_eq!(heading_levels(&md, base), expected, "base {base}");
        }
    }

    #[test]
    fn full_document_layout() {
        let mut intro = section("Introduction", 0, vec![]);
        intro.number = Some("1".into());
        let content = DocumentContent {
            title: Some("Sparse Detection".into()),
            abstract_paragraphs: vec!["We detect.".into()],
            preamble: vec!["Lead text.".into()],
            sections: vec![intro],
            figures: vec![FigureTable {
                id: "fig_0".into(),
                kind: ElementType::Figure,
                label: Some("1".into()),
                caption: Some("Overview.".into()),
                raw_coords: "1,0,0,10,10".into(),
                coordinates: CoordinateSet::parse("1,0,0,10,10"),
            }],
            ..Default::default()
        };
        let images = vec![CroppedImage {
            element_id: "fig_0".into(),
            element_type: ElementType::Figure,
            page: 1,
            path: PathBuf::from("/out/figures/figure_1_Overview.png"),
            relative_path: "figures/figure_1_Overview.png".into(),
            width: 20,
            height: 20,
        }];

        let md = MarkdownRenderer::default().render(&content, &images);
        assert!(md.starts_with("# Sparse Detection\n\n## Abstract\n\nWe detect.\n\nLead text.\n\n## 1 Introduction\n"));
        assert!(md.contains("## Figures and Tables\n\n**Figure 1**: Overview.\n\n![fig_0](figures/figure_1_Overview.png)\n"));
        assert!(md.ends_with(")\n"));
    }

    #[test]
    fn title_and_captions_can_be_disabled() {
        let config = ExtractionConfig {
            include_title: false,
            include_figure_captions: false,
            ..Default::default()
        };
        let content = DocumentContent {
            title: Some("T".into()),
            sections: vec![section("A", 0, vec![])],
            ..Default::default()
        };
        let md = MarkdownRenderer::new(&config).render(&content, &[]);
        assert_eq!(md, "## A\n\nA body.\n");
    }

    #[test]
    fn paragraph_hash_is_not_a_heading() {
        let mut s = section("Setup", 0, vec![]);
        s.paragraphs = vec!["# of params is large.".into(), "Plain text.\n  ## still body".into()];
        for base in [1, 2] {
            let config = ExtractionConfig {
                heading_base_level: base,
                ..Default::default()
            };
            let md = MarkdownRenderer::new(&config).render_sections(std::slice::from_ref(&s));
            assert!(md.contains("\\# of params is large."), "{md}");
            assert!(md.contains("  \\## still body"), "{md}");
            assert_eq!(heading_levels(&md, base), vec![0], "base {base}");
        }
    }

    #[test]
    fn heading_levels_skips_code_fences() {
        let md = "## A\n\n```\n# not a heading\n```\n### B\n#hashtag\n";
        assert_eq!(heading_levels(md, 2), vec![0, 1]);
    }
}
