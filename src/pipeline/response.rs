//! Tolerant recovery of structured analysis from free-form LLM output.
//!
//! Models asked for JSON return it wrapped in fences, prefixed with
//! "Here you go:", cut off at the token limit, or not at all. Three
//! independent tiers are tried in order and the first one that yields at
//! least one known field wins:
//!
//! 1. [`ParseStrategy::FencedJson`]: strip the first fenced block (or take
//!    the whole text when there is none) and parse it strictly.
//! 2. [`ParseStrategy::BraceScan`]: find a balanced `{…}` object and parse
//!    it. An object cut off mid-way is closed (open string, arrays, objects)
//!    and retried.
//! 3. [`ParseStrategy::FieldExtraction`]: pull individual `"key": value`
//!    pairs out with regexes, then fill anything still missing from prose
//!    sections such as `Heritage Analysis:` followed by text or bullets.
//!
//! Fields a tier could not recover stay empty and are listed in
//! [`AnalysisResult::omissions`]. Only a response with nothing recoverable
//! is a [`ParseError`]. The raw text is kept on every result.

use crate::error::ParseError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::Write as _;
use tracing::{debug, warn};

/// Which tier produced the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseStrategy {
    FencedJson,
    BraceScan,
    FieldExtraction,
}

/// One of the top-N references the model picked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelevantReference {
    pub reference: String,
    pub rationale: Option<String>,
    pub relevance_score: Option<String>,
}

/// Structured analysis of one paper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub paper_title: Option<String>,
    pub relevant_references: Vec<RelevantReference>,
    pub heritage_analysis: Option<String>,
    pub key_contributions: Vec<String>,
    pub research_gaps: Vec<String>,
    pub methodology_insights: Option<String>,
    pub strategy: ParseStrategy,
    /// Names of fields no tier could recover.
    pub omissions: Vec<String>,
    pub raw_response: String,
}

impl AnalysisResult {
    /// Plain-text report for terminals.
    pub fn summary(&self, top_n: usize) -> String {
        let rule = "=".repeat(80);
        let mut out = String::new();
        let title = self.paper_title.as_deref().unwrap_or("Unknown");
        let _ = writeln!(out, "{rule}\nPAPER ANALYSIS: {title}\n{rule}\n");

        let _ = writeln!(out, "TOP {} RELEVANT PAPERS:", top_n);
        if self.relevant_references.is_empty() {
            let _ = writeln!(out, "  (none identified)");
        }
        for (i, r) in self.relevant_references.iter().enumerate() {
            let _ = writeln!(out, "{}. {}", i + 1, r.reference);
            if let Some(score) = &r.relevance_score {
                let _ = writeln!(out, "   Relevance: {}", score);
            }
            if let Some(why) = &r.rationale {
                let _ = writeln!(out, "   Reasoning: {}", why);
            }
        }

        let _ = writeln!(
            out,
            "\nHERITAGE ANALYSIS:\n{}\n",
            self.heritage_analysis.as_deref().unwrap_or("(not available)")
        );

        for (heading, items) in [
            ("KEY CONTRIBUTIONS:", &self.key_contributions),
            ("RESEARCH GAPS ADDRESSED:", &self.research_gaps),
        ] {
            let _ = writeln!(out, "{}", heading);
            if items.is_empty() {
                let _ = writeln!(out, "  (not available)");
            }
            for item in items {
                let _ = writeln!(out, "  • {}", item);
            }
            out.push('\n');
        }

        let _ = writeln!(
            out,
            "METHODOLOGY INSIGHTS:\n{}",
            self.methodology_insights.as_deref().unwrap_or("(not available)")
        );
        out
    }
}

/// Parses raw LLM responses into [`AnalysisResult`]s.
#[derive(Debug, Clone, Copy)]
pub struct ResponseParser {
    top_n: usize,
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new(3)
    }
}

impl ResponseParser {
    /// `top_n` caps the relevant-reference list; order is preserved.
    pub fn new(top_n: usize) -> Self {
        Self {
            top_n: top_n.max(1),
        }
    }

    pub fn parse(&self, raw: &str) -> Result<AnalysisResult, ParseError> {
        if raw.trim().is_empty() {
            return Err(ParseError::EmptyResponse);
        }

        let tiers: [(ParseStrategy, fn(&str) -> Option<Recovered>); 3] = [
            (ParseStrategy::FencedJson, fenced_json),
            (ParseStrategy::BraceScan, brace_scan),
            (ParseStrategy::FieldExtraction, field_extraction),
        ];

        for (strategy, tier) in tiers {
            match tier(raw) {
                Some(recovered) if recovered.field_count() > 0 => {
                    debug!(
                        "Response parsed via {:?} ({} fields)",
                        strategy,
                        recovered.field_count()
                    );
                    return Ok(recovered.into_result(strategy, raw, self.top_n));
                }
                _ => debug!("Response tier {:?} recovered nothing", strategy),
            }
        }

        warn!("No analysis fields recoverable from {}-byte response", raw.len());
        Err(ParseError::NothingRecoverable { len: raw.len() })
    }
}

// ── Field model ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    References,
    Heritage,
    Contributions,
    Gaps,
    Methodology,
}

const FIELD_ALIASES: &[(&str, Field)] = &[
    ("paper_title", Field::Title),
    ("relevant_papers", Field::References),
    ("relevant_references", Field::References),
    ("top_references", Field::References),
    ("top_relevant_papers", Field::References),
    ("references", Field::References),
    ("heritage_analysis", Field::Heritage),
    ("heritage", Field::Heritage),
    ("key_contributions", Field::Contributions),
    ("contributions", Field::Contributions),
    ("research_gaps", Field::Gaps),
    ("research_gaps_addressed", Field::Gaps),
    ("gaps", Field::Gaps),
    ("methodology_insights", Field::Methodology),
    ("methodology", Field::Methodology),
];

const REFERENCE_KEYS: &[&str] = &["reference", "title", "paper", "citation", "name"];
const RATIONALE_KEYS: &[&str] = &[
    "similarity_reasoning",
    "rationale",
    "reasoning",
    "reason",
    "justification",
];
const SCORE_KEYS: &[&str] = &["relevance_score", "score", "relevance"];
const ITEM_KEYS: &[&str] = &["text", "description", "contribution", "gap", "title", "name"];

/// Map a JSON key or prose label onto a field.
fn field_for(key: &str) -> Option<Field> {
    let normalised: String = key
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    let normalised = normalised.trim_matches('_');
    if normalised.starts_with("top_") && normalised.contains("relevant") {
        return Some(Field::References);
    }
    FIELD_ALIASES
        .iter()
        .find(|(alias, _)| *alias == normalised)
        .map(|(_, f)| *f)
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Recovered {
    paper_title: Option<String>,
    references: Option<Vec<RelevantReference>>,
    heritage: Option<String>,
    contributions: Option<Vec<String>>,
    gaps: Option<Vec<String>>,
    methodology: Option<String>,
}

impl Recovered {
    fn field_count(&self) -> usize {
        [
            self.paper_title.is_some(),
            self.references.is_some(),
            self.heritage.is_some(),
            self.contributions.is_some(),
            self.gaps.is_some(),
            self.methodology.is_some(),
        ]
        .iter()
        .filter(|present| **present)
        .count()
    }

    fn has(&self, field: Field) -> bool {
        match field {
            Field::Title => self.paper_title.is_some(),
            Field::References => self.references.is_some(),
            Field::Heritage => self.heritage.is_some(),
            Field::Contributions => self.contributions.is_some(),
            Field::Gaps => self.gaps.is_some(),
            Field::Methodology => self.methodology.is_some(),
        }
    }

    /// Set `field` from a JSON value unless it is already set.
    fn set_value(&mut self, field: Field, value: &Value) {
        if self.has(field) {
            return;
        }
        match field {
            Field::Title => self.paper_title = value_text(value),
            Field::Heritage => self.heritage = value_text(value),
            Field::Methodology => self.methodology = value_text(value),
            Field::Contributions => self.contributions = value_list(value),
            Field::Gaps => self.gaps = value_list(value),
            Field::References => self.references = value_references(value),
        }
    }

    fn from_object(map: &Map<String, Value>) -> Recovered {
        let mut rec = Recovered::default();
        for (key, value) in map {
            if let Some(field) = field_for(key) {
                rec.set_value(field, value);
            }
        }
        if rec.field_count() == 0 {
            // Some models wrap everything in {"analysis": {...}}.
            for value in map.values() {
                if let Value::Object(inner) = value {
                    let nested = Recovered::from_object(inner);
                    if nested.field_count() > 0 {
                        return nested;
                    }
                }
            }
        }
        rec
    }

    fn from_json(text: &str) -> Option<Recovered> {
        match serde_json::from_str::<Value>(text.trim()) {
            Ok(Value::Object(map)) => Some(Recovered::from_object(&map)),
            Ok(_) => None,
            Err(e) => {
                debug!("Strict JSON parse failed: {}", e);
                None
            }
        }
    }

    fn fill_missing(&mut self, other: Recovered) {
        self.paper_title = self.paper_title.take().or(other.paper_title);
        self.references = self.references.take().or(other.references);
        self.heritage = self.heritage.take().or(other.heritage);
        self.contributions = self.contributions.take().or(other.contributions);
        self.gaps = self.gaps.take().or(other.gaps);
        self.methodology = self.methodology.take().or(other.methodology);
    }

    fn into_result(self, strategy: ParseStrategy, raw: &str, top_n: usize) -> AnalysisResult {
        let mut omissions = Vec::new();
        for (name, present) in [
            ("paper_title", self.paper_title.is_some()),
            ("relevant_references", self.references.is_some()),
            ("heritage_analysis", self.heritage.is_some()),
            ("key_contributions", self.contributions.is_some()),
            ("research_gaps", self.gaps.is_some()),
            ("methodology_insights", self.methodology.is_some()),
        ] {
            if !present {
                omissions.push(name.to_string());
            }
        }

        let mut references = self.references.unwrap_or_default();
        if references.len() > top_n {
            debug!("Truncating {} relevant references to {}", references.len(), top_n);
            references.truncate(top_n);
        }

        AnalysisResult {
            paper_title: self.paper_title,
            relevant_references: references,
            heritage_analysis: self.heritage,
            key_contributions: self.contributions.unwrap_or_default(),
            research_gaps: self.gaps.unwrap_or_default(),
            methodology_insights: self.methodology,
            strategy,
            omissions,
            raw_response: raw.to_string(),
        }
    }
}

// ── Value conversion ─────────────────────────────────────────────────────

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => non_empty(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(value_text).collect();
            (!parts.is_empty()).then(|| parts.join(" "))
        }
        Value::Object(map) => first_text(map, ITEM_KEYS),
        Value::Null => None,
    }
}

fn first_text(map: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| map.get(*k))
        .find_map(value_text)
}

fn value_list(value: &Value) -> Option<Vec<String>> {
    match value {
        Value::Array(items) => Some(items.iter().filter_map(value_text).collect()),
        Value::String(s) => Some(
            s.lines()
                .map(strip_bullet)
                .filter_map(non_empty)
                .collect(),
        ),
        Value::Null => None,
        other => value_text(other).map(|t| vec![t]),
    }
}

fn value_references(value: &Value) -> Option<Vec<RelevantReference>> {
    let items = match value {
        Value::Array(items) => items,
        Value::String(_) => {
            return value_list(value).map(|lines| {
                lines
                    .into_iter()
                    .map(|reference| RelevantReference {
                        reference,
                        rationale: None,
                        relevance_score: None,
                    })
                    .collect()
            })
        }
        _ => return None,
    };

    Some(
        items
            .iter()
            .filter_map(|item| match item {
                Value::Object(map) => Some(RelevantReference {
                    reference: first_text(map, REFERENCE_KEYS)
                        .or_else(|| first_text(map, &["id"]))?,
                    rationale: first_text(map, RATIONALE_KEYS),
                    relevance_score: first_text(map, SCORE_KEYS),
                }),
                other => value_text(other).map(|reference| RelevantReference {
                    reference,
                    rationale: None,
                    relevance_score: None,
                }),
            })
            .collect(),
    )
}

static RE_BULLET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:[-*•+]|\d{1,2}[.)])\s+").unwrap());

fn strip_bullet(line: &str) -> &str {
    match RE_BULLET.find(line) {
        Some(m) => &line[m.end()..],
        None => line,
    }
}

fn is_bullet(line: &str) -> bool {
    RE_BULLET.is_match(line)
}

// ── Tier 1: fenced / whole-text JSON ─────────────────────────────────────

static RE_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```[ \t]*[A-Za-z0-9_+-]*[ \t]*\r?\n(.*?)\r?\n?[ \t]*```").unwrap()
});

fn fenced_json(raw: &str) -> Option<Recovered> {
    let body = match RE_FENCE.captures(raw) {
        Some(caps) => caps.get(1).map_or("", |m| m.as_str()),
        None => raw,
    };
    Recovered::from_json(body)
}

// ── Tier 2: balanced-brace scan with truncation repair ───────────────────

/// Byte offset one past the bracket that closes the one at `start`.
fn balanced_end(text: &str, start: usize, open: char, close: char) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        if c == '"' {
            in_string = true;
        } else if c == open {
            depth += 1;
        } else if c == close {
            depth = depth.checked_sub(1)?;
            if depth == 0 {
                return Some(start + i + c.len_utf8());
            }
        }
    }
    None
}

/// Close whatever a truncated JSON fragment left open. `None` when the
/// fragment is already balanced or its brackets are mismatched.
fn close_truncated(fragment: &str) -> Option<String> {
    let mut closers = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    for c in fragment.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => closers.push('}'),
            '[' => closers.push(']'),
            '}' | ']' => {
                if closers.pop() != Some(c) {
                    return None;
                }
            }
            _ => {}
        }
    }
    if closers.is_empty() && !in_string {
        return None;
    }

    let mut repaired = fragment.to_string();
    if escaped {
        repaired.pop();
    }
    if in_string {
        repaired.push('"');
    }
    let len = repaired.trim_end().len();
    repaired.truncate(len);
    if repaired.ends_with(',') {
        repaired.pop();
    } else if repaired.ends_with(':') {
        repaired.push_str(" null");
    }
    while let Some(c) = closers.pop() {
        repaired.push(c);
    }
    Some(repaired)
}

const MAX_BRACE_CANDIDATES: usize = 8;

fn brace_scan(raw: &str) -> Option<Recovered> {
    let starts = raw
        .char_indices()
        .filter(|(_, c)| *c == '{')
        .map(|(i, _)| i)
        .take(MAX_BRACE_CANDIDATES);

    for start in starts {
        let recovered = match balanced_end(raw, start, '{', '}') {
            Some(end) => Recovered::from_json(&raw[start..end]),
            None => close_truncated(&raw[start..]).and_then(|fixed| {
                debug!("Retrying truncated JSON object after closing it");
                Recovered::from_json(&fixed)
            }),
        };
        if let Some(rec) = recovered {
            if rec.field_count() > 0 {
                return Some(rec);
            }
        }
    }
    None
}

// ── Tier 3: per-field extraction ─────────────────────────────────────────

static RE_QUOTED_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""(?P<key>[A-Za-z][A-Za-z0-9_ -]*)"\s*:\s*"(?P<val>(?:[^"\\]|\\.)*)""#).unwrap()
});

static RE_ARRAY_FIELD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""(?P<key>[A-Za-z][A-Za-z0-9_ -]*)"\s*:\s*\["#).unwrap());

static RE_QUOTED_STRING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""((?:[^"\\]|\\.)*)""#).unwrap());

static RE_OBJECT_CHUNK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\{[^{}]*\}").unwrap());

static RE_COLON_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:#{1,6}\s*)?(?:\*\*)?(?P<label>[A-Za-z][A-Za-z0-9 _-]{2,40}?)(?:\*\*)?\s*:(?:\*\*)?\s*(?P<rest>.*)$")
        .unwrap()
});

static RE_HEADING_LABEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:#{1,6}\s*(?P<h>[A-Za-z][A-Za-z0-9 _-]{2,40}?)|\*\*(?P<b>[A-Za-z][A-Za-z0-9 _-]{2,40}?)\*\*)\s*$")
        .unwrap()
});

fn unescape_json_string(s: &str) -> String {
    serde_json::from_str::<String>(&format!("\"{}\"", s)).unwrap_or_else(|_| s.to_string())
}

fn field_extraction(raw: &str) -> Option<Recovered> {
    let mut rec = json_fields(raw);
    rec.fill_missing(prose_fields(raw));
    (rec.field_count() > 0).then_some(rec)
}

/// `"key": "value"` and `"key": [ … ]` pairs anywhere in the text.
fn json_fields(raw: &str) -> Recovered {
    let mut rec = Recovered::default();

    for caps in RE_QUOTED_FIELD.captures_iter(raw) {
        if let Some(field) = field_for(&caps["key"]) {
            let value = Value::String(unescape_json_string(&caps["val"]));
            rec.set_value(field, &value);
        }
    }

    for caps in RE_ARRAY_FIELD.captures_iter(raw) {
        let Some(field) = field_for(&caps["key"]) else {
            continue;
        };
        if rec.has(field) {
            continue;
        }
        let Some(whole) = caps.get(0) else {
            continue;
        };
        let open = whole.end() - 1;
        let body = match balanced_end(raw, open, '[', ']') {
            Some(end) => &raw[open + 1..end - 1],
            None => &raw[open + 1..],
        };
        rec.set_value(field, &array_value(body));
    }

    rec
}

/// Best-effort JSON array from the inside of `[ … ]`.
fn array_value(body: &str) -> Value {
    if let Ok(v @ Value::Array(_)) = serde_json::from_str::<Value>(&format!("[{}]", body)) {
        return v;
    }
    if body.contains('{') {
        let objects: Vec<Value> = RE_OBJECT_CHUNK
            .find_iter(body)
            .filter_map(|m| serde_json::from_str::<Value>(m.as_str()).ok())
            .collect();
        if !objects.is_empty() {
            return Value::Array(objects);
        }
    }
    Value::Array(
        RE_QUOTED_STRING
            .captures_iter(body)
            .map(|c| Value::String(unescape_json_string(&c[1])))
            .collect(),
    )
}

/// Label line: the field it opens and any text after the colon.
fn label_line(line: &str) -> Option<(Field, String)> {
    if let Some(caps) = RE_HEADING_LABEL.captures(line) {
        let label = caps.name("h").or_else(|| caps.name("b"))?.as_str();
        return field_for(label).map(|f| (f, String::new()));
    }
    let caps = RE_COLON_LABEL.captures(line)?;
    let field = field_for(&caps["label"])?;
    Some((field, caps["rest"].trim().to_string()))
}

/// Sections of prose introduced by a recognised label.
fn prose_fields(raw: &str) -> Recovered {
    let mut blocks: Vec<(Field, Vec<String>)> = Vec::new();
    for line in raw.lines() {
        if let Some((field, rest)) = label_line(line) {
            let mut lines = Vec::new();
            if !rest.is_empty() {
                lines.push(rest);
            }
            blocks.push((field, lines));
        } else if let Some((_, lines)) = blocks.last_mut() {
            if !line.trim().is_empty() {
                lines.push(line.to_string());
            }
        }
    }

    let mut rec = Recovered::default();
    for (field, lines) in blocks {
        if rec.has(field) || lines.is_empty() {
            continue;
        }
        match field {
            Field::Title => rec.paper_title = Some(join_prose(&lines)),
            Field::Heritage => rec.heritage = Some(join_prose(&lines)),
            Field::Methodology => rec.methodology = Some(join_prose(&lines)),
            Field::Contributions => rec.contributions = Some(prose_list(&lines)),
            Field::Gaps => rec.gaps = Some(prose_list(&lines)),
            Field::References => rec.references = Some(prose_references(&lines)),
        }
    }
    rec
}

fn join_prose(lines: &[String]) -> String {
    lines
        .iter()
        .map(|l| strip_bullet(l).trim())
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Bullet items, with non-bullet lines continuing the previous item.
fn prose_list(lines: &[String]) -> Vec<String> {
    let mut items: Vec<String> = Vec::new();
    for line in lines {
        let text = strip_bullet(line).trim();
        if text.is_empty() {
            continue;
        }
        match items.last_mut() {
            Some(last) if !is_bullet(line) => {
                last.push(' ');
                last.push_str(text);
            }
            _ => items.push(text.to_string()),
        }
    }
    items
}

fn prose_references(lines: &[String]) -> Vec<RelevantReference> {
    let mut refs: Vec<RelevantReference> = Vec::new();
    for line in lines {
        let text = strip_bullet(line).trim();
        if text.is_empty() {
            continue;
        }
        if !is_bullet(line) {
            if let Some(last) = refs.last_mut() {
                if let Some((key, value)) = text.split_once(':') {
                    let key = key.to_lowercase();
                    let value = value.trim().to_string();
                    if key.contains("reason") || key.contains("rationale") {
                        last.rationale = Some(value);
                        continue;
                    }
                    if key.contains("relevance") || key.contains("score") {
                        last.relevance_score = Some(value);
                        continue;
                    }
                }
                continue;
            }
        }
        refs.push(RelevantReference {
            reference: text.to_string(),
            rationale: None,
            relevance_score: None,
        });
    }
    refs
}
