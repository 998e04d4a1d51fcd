//! Configuration values passed to each component at construction time.
//!
//! There are no process-wide defaults: every entry point takes the config it
//! needs by reference. Each struct has a `Default` and a consuming builder
//! whose `build()` validates ranges.
//!
//! - [`GrobidConfig`] for the PDF → TEI service
//! - [`ExtractionConfig`] for TEI → Markdown + cropped images
//! - [`AnalysisConfig`] for the LLM analysis call

use crate::error::Tei2MdError;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::sync::Arc;

// ── GROBID ───────────────────────────────────────────────────────────────

/// Elements GROBID is asked to annotate with `coords`.
pub const DEFAULT_COORDINATE_ELEMENTS: &[&str] =
    &["persName", "figure", "ref", "biblStruct", "formula", "s"];

/// Connection and request options for the GROBID service.
#[derive(Debug, Clone, PartialEq)]
pub struct GrobidConfig {
    /// Base URL, e.g. `http://localhost:8070`. Default: `http://localhost:8070`.
    pub server_url: String,

    /// Whole-request timeout in seconds. Default: 120.
    ///
    /// Full-text processing of a long paper routinely takes 30–60 s on a
    /// CPU-only GROBID instance.
    pub timeout_secs: u64,

    /// TEI elements to request coordinates for (`teiCoordinates`).
    pub coordinate_elements: Vec<String>,

    pub consolidate_header: bool,
    pub consolidate_citations: bool,
    pub generate_ids: bool,
    /// Default: false. Sentence segmentation wraps every sentence in `<s>`.
    pub segment_sentences: bool,
}

impl Default for GrobidConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8070".to_string(),
            timeout_secs: 120,
            coordinate_elements: DEFAULT_COORDINATE_ELEMENTS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            consolidate_header: true,
            consolidate_citations: true,
            generate_ids: true,
            segment_sentences: false,
        }
    }
}

impl GrobidConfig {
    pub fn builder() -> GrobidConfigBuilder {
        GrobidConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`GrobidConfig`].
#[derive(Debug)]
pub struct GrobidConfigBuilder {
    config: GrobidConfig,
}

impl GrobidConfigBuilder {
    pub fn server_url(mut self, url: impl Into<String>) -> Self {
        self.config.server_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.config.timeout_secs = secs;
        self
    }

    pub fn coordinate_elements<I, S>(mut self, elements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.coordinate_elements = elements.into_iter().map(Into::into).collect();
        self
    }

    pub fn consolidate_header(mut self, v: bool) -> Self {
        self.config.consolidate_header = v;
        self
    }

    pub fn consolidate_citations(mut self, v: bool) -> Self {
        self.config.consolidate_citations = v;
        self
    }

    pub fn generate_ids(mut self, v: bool) -> Self {
        self.config.generate_ids = v;
        self
    }

    pub fn segment_sentences(mut self, v: bool) -> Self {
        self.config.segment_sentences = v;
        self
    }

    pub fn build(self) -> Result<GrobidConfig, Tei2MdError> {
        let c = &self.config;
        if !(c.server_url.starts_with("http://") || c.server_url.starts_with("https://")) {
            return Err(Tei2MdError::InvalidConfig(format!(
                "GROBID URL must start with http:// or https://, got '{}'",
                c.server_url
            )));
        }
        if c.timeout_secs == 0 {
            return Err(Tei2MdError::InvalidConfig(
                "GROBID timeout must be ≥ 1 second".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Extraction ───────────────────────────────────────────────────────────

/// Options for turning a TEI document into Markdown and cropped images.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionConfig {
    /// Points → pixels factor used when rasterising pages. Range: 0.5–8.0.
    /// Default: 2.0 (144 DPI).
    ///
    /// Figures are usually a fraction of the page, so crops need more
    /// resolution than a full-page preview would.
    pub render_scale: f32,

    /// Crop every page a multi-page element touches, not only its primary
    /// page. Default: false.
    pub crop_all_pages: bool,

    /// Crop `figure` / `table` regions. Default: true.
    pub crop_figures: bool,

    /// Crop `graphic` regions. Default: true.
    pub crop_graphics: bool,

    /// Number of `#` for level-0 sections. Range: 1–5. Default: 2, leaving
    /// `#` for the paper title.
    pub heading_base_level: usize,

    /// Start the Markdown with `# <title>` and the abstract. Default: true.
    pub include_title: bool,

    /// Append a figure/table caption list with image links. Default: true.
    pub include_figure_captions: bool,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            render_scale: 2.0,
            crop_all_pages: false,
            crop_figures: true,
            crop_graphics: true,
            heading_base_level: 2,
            include_title: true,
            include_figure_captions: true,
        }
    }
}

impl ExtractionConfig {
    pub fn builder() -> ExtractionConfigBuilder {
        ExtractionConfigBuilder {
            config: Self::default(),
        }
    }

    /// True when any kind of crop is enabled.
    pub fn crops_enabled(&self) -> bool {
        self.crop_figures || self.crop_graphics
    }
}

/// Builder for [`ExtractionConfig`].
#[derive(Debug)]
pub struct ExtractionConfigBuilder {
    config: ExtractionConfig,
}

impl ExtractionConfigBuilder {
    pub fn render_scale(mut self, scale: f32) -> Self {
        self.config.render_scale = scale;
        self
    }

    pub fn crop_all_pages(mut self, v: bool) -> Self {
        self.config.crop_all_pages = v;
        self
    }

    pub fn crop_figures(mut self, v: bool) -> Self {
        self.config.crop_figures = v;
        self
    }

    pub fn crop_graphics(mut self, v: bool) -> Self {
        self.config.crop_graphics = v;
        self
    }

    pub fn heading_base_level(mut self, level: usize) -> Self {
        self.config.heading_base_level = level;
        self
    }

    pub fn include_title(mut self, v: bool) -> Self {
        self.config.include_title = v;
        self
    }

    pub fn include_figure_captions(mut self, v: bool) -> Self {
        self.config.include_figure_captions = v;
        self
    }

    pub fn build(self) -> Result<ExtractionConfig, Tei2MdError> {
        let c = &self.config;
        if !(0.5..=8.0).contains(&c.render_scale) {
            return Err(Tei2MdError::InvalidConfig(format!(
                "Render scale must be 0.5–8.0, got {}",
                c.render_scale
            )));
        }
        if !(1..=5).contains(&c.heading_base_level) {
            return Err(Tei2MdError::InvalidConfig(format!(
                "Heading base level must be 1–5, got {}",
                c.heading_base_level
            )));
        }
        Ok(self.config)
    }
}

// ── Analysis ─────────────────────────────────────────────────────────────

/// Options for the LLM analysis call.
#[derive(Clone)]
pub struct AnalysisConfig {
    /// How many relevant references to keep. Default: 3.
    pub top_n: usize,

    /// LLM model identifier. If None, the provider default is used.
    pub model: Option<String>,

    /// Provider name (`openai`, `anthropic`, `ollama`, …).
    /// If None along with `provider`, the environment decides.
    pub provider_name: Option<String>,

    /// Pre-constructed provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.2.
    pub temperature: f32,

    /// Completion budget. Default: 2000.
    pub max_tokens: usize,

    /// Retries on a failed call. Default: 3.
    pub max_retries: u32,

    /// Initial backoff, doubled after each retry. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-call timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Paper content included in the prompt, in characters. Default: 50 000.
    pub max_content_chars: usize,

    /// Custom system prompt. If None, the built-in one is used.
    pub system_prompt: Option<String>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            top_n: 3,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.2,
            max_tokens: 2000,
            max_retries: 3,
            retry_backoff_ms: 500,
            api_timeout_secs: 120,
            max_content_chars: 50_000,
            system_prompt: None,
        }
    }
}

impl fmt::Debug for AnalysisConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisConfig")
            .field("top_n", &self.top_n)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("max_content_chars", &self.max_content_chars)
            .finish()
    }
}

impl AnalysisConfig {
    pub fn builder() -> AnalysisConfigBuilder {
        AnalysisConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`AnalysisConfig`].
#[derive(Debug)]
pub struct AnalysisConfigBuilder {
    config: AnalysisConfig,
}

impl AnalysisConfigBuilder {
    pub fn top_n(mut self, n: usize) -> Self {
        self.config.top_n = n;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn max_content_chars(mut self, n: usize) -> Self {
        self.config.max_content_chars = n;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn build(self) -> Result<AnalysisConfig, Tei2MdError> {
        let c = &self.config;
        if c.top_n == 0 {
            return Err(Tei2MdError::InvalidConfig("top_n must be ≥ 1".into()));
        }
        if c.max_tokens == 0 {
            return Err(Tei2MdError::InvalidConfig("max_tokens must be ≥ 1".into()));
        }
        if c.max_content_chars < 1000 {
            return Err(Tei2MdError::InvalidConfig(format!(
                "max_content_chars must be ≥ 1000, got {}",
                c.max_content_chars
            )));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grobid_defaults() {
        let c = GrobidConfig::default();
        assert_eq!(c.server_url, "http://localhost:8070");
        assert_eq!(c.coordinate_elements.len(), 6);
        assert!(c.consolidate_header && c.generate_ids);
        assert!(!c.segment_sentences);
    }

    #[test]
    fn grobid_url_trailing_slash_and_validation() {
        let c = GrobidConfig::builder()
            .server_url("http://grobid:8070/")
            .build()
            .unwrap();
        assert_eq!(c.server_url, "http://grobid:8070");
        assert!(GrobidConfig::builder().server_url("grobid:8070").build().is_err());
    }

    #[test]
    fn extraction_ranges() {
        assert!(ExtractionConfig::builder().render_scale(0.1).build().is_err());
        assert!(ExtractionConfig::builder().heading_base_level(6).build().is_err());
        let c = ExtractionConfig::builder()
            .render_scale(3.0)
            .heading_base_level(1)
            .crop_graphics(false)
            .build()
            .unwrap();
        assert_eq!(c.render_scale, 3.0);
        assert!(c.crops_enabled());
    }

    #[test]
    fn analysis_validation() {
        assert!(AnalysisConfig::builder().top_n(0).build().is_err());
        let c = AnalysisConfig::builder().top_n(5).temperature(9.0).build().unwrap();
        assert_eq!(c.top_n, 5);
        assert_eq!(c.temperature, 2.0);
    }

    #[test]
    fn analysis_debug_hides_provider() {
        let dbg = format!("{:?}", AnalysisConfig::default());
        assert!(dbg.contains("top_n: 3"));
        assert!(dbg.contains("provider: None"));
    }
}
