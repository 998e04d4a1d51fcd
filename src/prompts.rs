//! Prompts for the paper-analysis call.
//!
//! Callers can override the system prompt via
//! [`crate::config::AnalysisConfig::system_prompt`]; the user prompt is
//! always built by [`build_analysis_prompt`].

use crate::references::Reference;

/// Default system prompt for heritage analysis.
///
/// The key names match what [`crate::pipeline::response::ResponseParser`]
/// looks for first; the parser also accepts several aliases.
pub const ANALYSIS_SYSTEM_PROMPT: &str = r#"You are an expert research analyst. You read an academic paper and identify the prior work it builds on most directly.

Respond with a single JSON object and nothing else, using exactly these keys:

{
  "paper_title": "title of the analysed paper",
  "relevant_papers": [
    {
      "reference": "the reference exactly as listed in AVAILABLE REFERENCES",
      "similarity_reasoning": "why this work is a direct ancestor of the paper",
      "relevance_score": "High | Medium | Low"
    }
  ],
  "heritage_analysis": "how the paper's contributions extend the selected references",
  "key_contributions": ["contribution", "..."],
  "research_gaps": ["gap in prior work this paper addresses", "..."],
  "methodology_insights": "methods and techniques inherited or adapted"
}

Rules:
- Choose references only from AVAILABLE REFERENCES when that list is given
- Order relevant_papers from most to least relevant
- Do NOT wrap the JSON in markdown fences
- Do NOT add commentary before or after the JSON"#;

/// Longest bibliography listed in the prompt.
pub const MAX_PROMPT_REFERENCES: usize = 150;

/// Build the user prompt: task, paper title, truncated content, and the
/// available references.
pub fn build_analysis_prompt(
    title: &str,
    content: &str,
    references: &[Reference],
    top_n: usize,
    max_content_chars: usize,
) -> String {
    let (content, truncated) = truncate_chars(content, max_content_chars);

    let mut prompt = format!(
        "Analyse the following paper and identify the TOP {} most relevant references \
         that this paper builds upon.\n\nPAPER TITLE: {}\n\nPAPER CONTENT:\n{}\n",
        top_n, title, content
    );
    if truncated {
        prompt.push_str("\n[... content truncated ...]\n");
    }

    if references.is_empty() {
        prompt.push_str(
            "\nNo structured references were available. Identify the most relevant prior \
             work from citations in the paper content itself.\n",
        );
    } else {
        prompt.push_str("\nAVAILABLE REFERENCES:\n");
        for r in references.iter().take(MAX_PROMPT_REFERENCES) {
            prompt.push_str(&format!("[{}] {}\n", r.id, r.full_text));
        }
        if references.len() > MAX_PROMPT_REFERENCES {
            prompt.push_str(&format!(
                "(… {} more references omitted)\n",
                references.len() - MAX_PROMPT_REFERENCES
            ));
        }
    }

    prompt.push_str(&format!(
        "\nReturn the JSON object with the {} most relevant papers.",
        top_n
    ));
    prompt
}

/// At most `max` characters of `s`, cut on a char boundary.
fn truncate_chars(s: &str, max: usize) -> (&str, bool) {
    match s.char_indices().nth(max) {
        Some((idx, _)) => (&s[..idx], true),
        None => (s, false),
    }
}
