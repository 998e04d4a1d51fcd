//! Integration tests over inline TEI fixtures.
//!
//! No pdfium and no network: page rasters are built in memory with `image`
//! and every LLM reply is a literal string.
//!
//! Run with:
//!   cargo test --test extraction

use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, LLMResponse, LlmError};
use image::{DynamicImage, GenericImageView};
use std::sync::Arc;
use tei2md::extract::crop_elements;
use tei2md::pipeline::crop::PageRaster;
use tei2md::pipeline::markdown::heading_levels;
use tei2md::pipeline::response::ParseStrategy;
use tei2md::{
    extract, extract_content, extract_references, extract_to_dir, process_tei_xml, AnalysisConfig,
    CropError, ExtractionConfig, ReferenceSource, RegionCropper, ResponseParser,
};

const PAPER: &str = r##"<?xml version="1.0" encoding="UTF-8"?>
<TEI xmlns="http://www.tei-c.org/ns/1.0" xmlns:xlink="http://www.w3.org/1999/xlink">
  <teiHeader>
    <fileDesc>
      <titleStmt><title level="a" type="main">Sparse Attention for Long Documents</title></titleStmt>
    </fileDesc>
    <profileDesc>
      <abstract><div><p>We make attention sparse.</p></div></abstract>
    </profileDesc>
  </teiHeader>
  <text>
    <body>
      <div><head n="1">Introduction</head>
        <p>Transformers <ref type="bibr" target="#b0">[1]</ref> are quadratic.</p>
        <div><head n="1.1">Motivation</head><p>Long inputs matter.</p></div>
      </div>
      <div><head n="2">Method</head>
        <p>We keep a window of tokens.</p>
        <figure xml:id="fig_0" coords="2,72.0,100.5,200.0,150.0 ; 2,72.0,250.5,200.0,20.0">
          <head>Figure 1</head><label>1</label><figDesc>Sparsity pattern.</figDesc>
          <graphic coords="2,80,110,180,130" type="bitmap"/>
        </figure>
        <figure type="table" xml:id="tab_0" coords="3,60,60,300,80;4,60,40,300,60">
          <head>Table 1</head><figDesc>Results on long-range benchmarks.</figDesc>
        </figure>
        <figure xml:id="fig_1" coords="2,abc,1,2,3"><head>Figure 2</head></figure>
      </div>
    </body>
    <back>
      <div type="references">
        <listBibl>
          <biblStruct xml:id="b0">
            <analytic>
              <title level="a" type="main">Attention is all you need</title>
              <author><persName><forename type="first">Ashish</forename><surname>Vaswani</surname></persName></author>
            </analytic>
            <monogr>
              <title level="m">NeurIPS</title>
              <imprint><date type="published" when="2017"/></imprint>
            </monogr>
          </biblStruct>
          <biblStruct xml:id="b1">
            <analytic>
              <title level="a" type="main">Longformer</title>
              <author><persName><forename>Iz</forename><surname>Beltagy</surname></persName></author>
            </analytic>
            <monogr><title level="j">arXiv</title><imprint><date when="2020"/></imprint></monogr>
          </biblStruct>
        </listBibl>
      </div>
    </back>
  </text>
</TEI>"##;

fn blank_pages(count: u32, scale: f64) -> RegionCropper {
    // US Letter at `scale` pixels per point.
    let (w, h) = ((612.0 * scale) as u32, (792.0 * scale) as u32);
    RegionCropper::with_pages(
        count as usize,
        (1..=count).map(|page| PageRaster {
            page,
            image: DynamicImage::new_rgb8(w, h),
            points_to_pixels: scale,
        }),
    )
}

/// Provider whose every call fails, as an unreachable API would.
struct DownProvider;

#[async_trait]
impl LLMProvider for DownProvider {
    fn name(&self) -> &str {
        "down"
    }

    fn model(&self) -> &str {
        "down-model"
    }

    fn max_context_length(&self) -> usize {
        4096
    }

    async fn complete(&self, _prompt: &str) -> edgequake_llm::Result<LLMResponse> {
        Err(LlmError::NetworkError("connection refused".to_string()))
    }

    async fn complete_with_options(
        &self,
        prompt: &str,
        _options: &CompletionOptions,
    ) -> edgequake_llm::Result<LLMResponse> {
        self.complete(prompt).await
    }

    async fn chat(
        &self,
        _messages: &[ChatMessage],
        _options: Option<&CompletionOptions>,
    ) -> edgequake_llm::Result<LLMResponse> {
        self.complete("").await
    }
}

// ── Structure ────────────────────────────────────────────────────────────────

#[test]
fn markdown_heading_depth_matches_section_depth() {
    let config = ExtractionConfig::builder()
        .include_title(false)
        .include_figure_captions(false)
        .build()
        .unwrap();
    let out = extract(PAPER, &config).unwrap();

    let expected: Vec<usize> = out.content.all_sections().map(|s| s.level).collect();
    assert_eq!(expected, vec![0, 1, 0]);
    assert_eq!(heading_levels(&out.markdown, config.heading_base_level), expected);
    assert!(out.markdown.contains("## 1 Introduction"));
    assert!(out.markdown.contains("### 1.1 Motivation"));
}

#[test]
fn title_abstract_and_captions_are_rendered() {
    let out = extract(PAPER, &ExtractionConfig::default()).unwrap();
    assert!(out.markdown.starts_with("# Sparse Attention for Long Documents\n"));
    assert!(out.markdown.contains("## Abstract\n\nWe make attention sparse."));
    assert!(out.markdown.contains("**Figure 1**: Figure 1 Sparsity pattern."));
    assert!(out.markdown.contains("**Table tab_0**: Table 1 Results on long-range benchmarks."));
    assert!(!out.markdown.contains("Attention is all you need"));
}

#[test]
fn figures_tables_and_graphics_are_collected() {
    let content = extract_content(PAPER).unwrap();
    assert_eq!(content.figures.len(), 3);
    assert_eq!(content.graphics.len(), 1);

    let graphic = &content.graphics[0];
    assert_eq!(graphic.parent_id.as_deref(), Some("fig_0"));
    assert_eq!(graphic.graphic_type, "bitmap");

    let fig = &content.figures[0];
    let primary = fig.coordinates.primary_box().unwrap();
    assert_eq!(primary.page, 2);
    assert_eq!(primary.x, 72.0);
    assert_eq!(primary.y, 100.5);
    assert_eq!(primary.width, 200.0);
    assert_eq!(primary.height, 170.0);

    // The malformed segment is dropped but the figure stays.
    let bad = &content.figures[2];
    assert!(bad.coordinates.is_empty());
    assert_eq!(bad.coordinates.warnings().len(), 1);
    assert_eq!(bad.raw_coords, "2,abc,1,2,3");
}

// ── Cropping ─────────────────────────────────────────────────────────────────

#[test]
fn crops_use_the_page_scale() {
    let content = extract_content(PAPER).unwrap();
    let config = ExtractionConfig::default();
    let (regions, failures) = crop_elements(&content, &blank_pages(4, 2.0), &config);

    let fig = regions.iter().find(|r| r.element_id == "fig_0").unwrap();
    assert_eq!(fig.page, 2);
    assert_eq!(fig.image.dimensions(), (400, 340));

    let table = regions.iter().find(|r| r.element_id == "tab_0").unwrap();
    assert_eq!(table.page, 3);

    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].element_id, "fig_1");
    assert_eq!(failures[0].error, CropError::NoGeometry);
}

#[test]
fn missing_pages_fail_only_their_elements() {
    let content = extract_content(PAPER).unwrap();
    let config = ExtractionConfig::builder().crop_all_pages(true).build().unwrap();
    // A 3-page document: the table's second half on page 4 is out of range.
    let (regions, failures) = crop_elements(&content, &blank_pages(3, 1.0), &config);

    assert!(regions.iter().any(|r| r.element_id == "tab_0" && r.page == 3));
    assert!(failures.iter().any(|f| f.element_id == "tab_0"
        && f.error == CropError::PageOutOfRange { page: 4, total: 3 }));
    assert!(regions.iter().any(|r| r.element_id == "fig_0"));
}

// ── Files ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn extract_to_dir_writes_markdown_and_content_json() {
    let dir = tempfile::tempdir().unwrap();
    let tei = dir.path().join("sparse.tei.xml");
    std::fs::write(&tei, PAPER).unwrap();
    let out_dir = dir.path().join("out");

    let output = extract_to_dir(&tei, None, &out_dir, &ExtractionConfig::default())
        .await
        .unwrap();

    let md = std::fs::read_to_string(out_dir.join("sparse_sections.md")).unwrap();
    assert_eq!(md, output.markdown);

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(out_dir.join("sparse_content.json")).unwrap())
            .unwrap();
    assert_eq!(json["stats"]["sections"], 3);
    assert_eq!(json["stats"]["tables"], 1);
    assert_eq!(json["content"]["figures"][0]["id"], "fig_0");
}

#[tokio::test]
async fn non_tei_input_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("page.xml");
    std::fs::write(&path, "<html><body/></html>").unwrap();
    let err = extract_to_dir(&path, None, dir.path(), &ExtractionConfig::default())
        .await
        .unwrap_err();
    assert!(matches!(err, tei2md::Tei2MdError::NoTeiRoot { .. }));
}

#[tokio::test]
async fn failed_analysis_keeps_the_extracted_document() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("sparse.pdf");
    let analysis = AnalysisConfig::builder()
        .provider(Arc::new(DownProvider))
        .max_retries(0)
        .build()
        .unwrap();

    let extraction = ExtractionConfig::builder()
        .crop_figures(false)
        .crop_graphics(false)
        .build()
        .unwrap();

    let report = process_tei_xml(
        PAPER,
        Some(&source),
        dir.path(),
        &extraction,
        Some(&analysis),
    )
    .await
    .expect("analysis failure must not fail the document");

    assert!(report.analysis.is_none());
    let err = report.analysis_error.as_deref().unwrap();
    assert!(err.contains("connection refused"), "{err}");
    assert_eq!(report.extraction.stats.sections, 3);

    let paths = report.extraction.paths.as_ref().unwrap();
    assert!(paths.markdown.exists());
    assert!(paths.content_json.exists());
    assert!(paths.tei.as_ref().is_some_and(|p| p.exists()));
    assert!(paths.analysis_json.is_none());
}

// ── References ───────────────────────────────────────────────────────────────

#[test]
fn references_prefer_tei() {
    let set = extract_references(Some(PAPER), "");
    assert_eq!(set.source, ReferenceSource::Tei);
    assert_eq!(set.references.len(), 2);
    let first = &set.references[0];
    assert_eq!(first.id, "b0");
    assert_eq!(first.authors, vec!["Ashish Vaswani"]);
    assert_eq!(first.year, Some(2017));
    assert_eq!(first.title.as_deref(), Some("Attention is all you need"));
    assert_eq!(first.venue.as_deref(), Some("NeurIPS"));
}

#[test]
fn references_fall_back_to_markdown() {
    let markdown = "## References\n\n\
        [1] Vaswani, A., Shazeer, N. (2017). Attention is all you need. NeurIPS.\n\
        [2] Beltagy, I. (2020). Longformer. arXiv.\n";
    let empty_tei = r#"<TEI><text><body><div><p>x</p></div></body></text></TEI>"#;
    let set = extract_references(Some(empty_tei), markdown);
    assert_eq!(set.source, ReferenceSource::Markdown);
    assert_eq!(set.references.len(), 2);
    assert_eq!(set.references[1].id, "ref_2");
    assert_eq!(set.references[1].year, Some(2020));
}

// ── LLM replies ──────────────────────────────────────────────────────────────

#[test]
fn chatty_reply_with_fenced_json() {
    let raw = "Sure! Here is the analysis you asked for.\n\n```json\n{\n  \"paper_title\": \"Sparse Attention\",\n  \"relevant_papers\": [\n    {\"reference\": \"[b0] Vaswani (2017)\", \"similarity_reasoning\": \"Base architecture\", \"relevance_score\": \"High\"},\n    {\"reference\": \"[b1] Beltagy (2020)\", \"similarity_reasoning\": \"Windowed attention\"}\n  ],\n  \"heritage_analysis\": \"Extends dense attention.\",\n  \"key_contributions\": [\"Sparse pattern\"],\n  \"research_gaps\": [\"Quadratic cost\"]\n}\n```\nLet me know if you need more.";
    let result = ResponseParser::new(1).parse(raw).unwrap();
    assert_eq!(result.strategy, ParseStrategy::FencedJson);
    assert_eq!(result.relevant_references.len(), 1);
    assert_eq!(result.relevant_references[0].reference, "[b0] Vaswani (2017)");
    assert_eq!(result.key_contributions, vec!["Sparse pattern"]);
    assert!(result.omissions.iter().any(|o| o.contains("methodology")));
    assert_eq!(result.raw_response, raw);
}

#[test]
fn truncated_reply_is_salvaged() {
    let raw = "{\"paper_title\": \"Sparse Attention\", \"heritage_analysis\": \"Extends dense attention.\", \"key_contributions\": [\"Sparse pat";
    let result = ResponseParser::default().parse(raw).unwrap();
    assert_eq!(result.paper_title.as_deref(), Some("Sparse Attention"));
    assert_eq!(result.heritage_analysis.as_deref(), Some("Extends dense attention."));
}
