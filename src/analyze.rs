//! Heritage analysis: references + paper content → one LLM call → parsed
//! [`AnalysisResult`](crate::pipeline::response::AnalysisResult).
//!
//! The network call is the only impure step. [`prepare_analysis`] and
//! [`finish_analysis`] are plain functions so the prompt and the outcome
//! can be checked without a provider.

use crate::config::AnalysisConfig;
use crate::error::Tei2MdError;
use crate::output::AnalysisOutcome;
use crate::pipeline::llm::{self, LlmReply};
use crate::pipeline::response::ResponseParser;
use crate::prompts::{build_analysis_prompt, ANALYSIS_SYSTEM_PROMPT};
use crate::references::{extract_references, ReferenceSet};
use crate::tei::TeiDocument;
use edgequake_llm::{LLMProvider, ProviderFactory};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// Everything needed for the call, built without touching the network.
#[derive(Debug, Clone)]
pub struct PreparedAnalysis {
    pub references: ReferenceSet,
    pub title: String,
    pub user_prompt: String,
}

/// Collect references, pick the title, and build the user prompt.
pub fn prepare_analysis(markdown: &str, tei_xml: Option<&str>, config: &AnalysisConfig) -> PreparedAnalysis {
    let references = extract_references(tei_xml, markdown);
    let title = tei_xml
        .and_then(|xml| TeiDocument::parse(xml).ok())
        .and_then(|doc| doc.title())
        .or_else(|| markdown_title(markdown))
        .unwrap_or_else(|| "Unknown title".to_string());

    let user_prompt = build_analysis_prompt(
        &title,
        markdown,
        &references.references,
        config.top_n,
        config.max_content_chars,
    );
    PreparedAnalysis {
        references,
        title,
        user_prompt,
    }
}

fn markdown_title(markdown: &str) -> Option<String> {
    markdown
        .lines()
        .find_map(|l| l.strip_prefix("# "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Parse the reply. An unparseable reply is not an error: the references
/// and raw text are kept and `parse_error` says what went wrong.
pub fn finish_analysis(references: ReferenceSet, reply: LlmReply, top_n: usize) -> AnalysisOutcome {
    let (analysis, parse_error) = match ResponseParser::new(top_n).parse(&reply.content) {
        Ok(result) => {
            if !result.omissions.is_empty() {
                warn!("Analysis reply is missing: {}", result.omissions.join(", "));
            }
            (Some(result), None)
        }
        Err(e) => {
            warn!("Analysis reply unusable: {}", e);
            (None, Some(e))
        }
    };

    AnalysisOutcome {
        references: references.references,
        reference_source: references.source,
        analysis,
        parse_error,
        raw_response: reply.content,
        prompt_tokens: reply.prompt_tokens,
        completion_tokens: reply.completion_tokens,
        retries: reply.retries,
        duration_ms: reply.duration_ms,
    }
}

/// Analyse a paper given its Markdown and, when available, its TEI.
///
/// # Errors
/// [`Tei2MdError::ProviderNotConfigured`] when no provider can be
/// resolved, [`Tei2MdError::LlmApiError`] when every attempt fails.
pub async fn analyze_paper(
    markdown: &str,
    tei_xml: Option<&str>,
    config: &AnalysisConfig,
) -> Result<AnalysisOutcome, Tei2MdError> {
    let provider = resolve_provider(config)?;
    let prepared = prepare_analysis(markdown, tei_xml, config);
    info!(
        "Analysing '{}' with {} references ({:?})",
        prepared.title,
        prepared.references.references.len(),
        prepared.references.source
    );

    let system_prompt = config
        .system_prompt
        .as_deref()
        .unwrap_or(ANALYSIS_SYSTEM_PROMPT);
    let reply = llm::complete(&provider, system_prompt, &prepared.user_prompt, config).await?;
    info!(
        "Analysis reply: {} input tokens, {} output tokens, {} retries, {}ms",
        reply.prompt_tokens, reply.completion_tokens, reply.retries, reply.duration_ms
    );
    Ok(finish_analysis(prepared.references, reply, config.top_n))
}

/// Analyse a Markdown file, using its TEI for references when given.
///
/// A TEI file that cannot be read is logged and ignored; the Markdown
/// citations are used instead.
pub async fn analyze_files(
    markdown_path: &Path,
    tei_path: Option<&Path>,
    config: &AnalysisConfig,
) -> Result<AnalysisOutcome, Tei2MdError> {
    let markdown = read_text(markdown_path).await?;
    let tei_xml = match tei_path {
        Some(path) => match read_text(path).await {
            Ok(xml) => Some(xml),
            Err(e) => {
                warn!("Ignoring TEI {}: {}", path.display(), e);
                None
            }
        },
        None => None,
    };
    analyze_paper(&markdown, tei_xml.as_deref(), config).await
}

async fn read_text(path: &Path) -> Result<String, Tei2MdError> {
    tokio::fs::read_to_string(path).await.map_err(|e| {
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

// ── Provider resolution ──────────────────────────────────────────────────

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, Tei2MdError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        Tei2MdError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, most specific first:
///
/// 1. `config.provider`, used as-is
/// 2. `config.provider_name` with `config.model` (or the default model)
/// 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL` when both are set
/// 4. OpenAI when `OPENAI_API_KEY` is set
/// 5. [`ProviderFactory::from_env`] auto-detection
pub fn resolve_provider(config: &AnalysisConfig) -> Result<Arc<dyn LLMProvider>, Tei2MdError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_provider(&prov, &model);
        }
    }

    if std::env::var("OPENAI_API_KEY").is_ok_and(|k| !k.is_empty()) {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_provider("openai", model);
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| Tei2MdError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or pass --provider.\n\
                Error: {}",
                e
            ),
        })?;
    Ok(llm_provider)
}
