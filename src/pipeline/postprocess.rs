//! Post-processing: deterministic cleanup of TEI text and rendered Markdown.
//!
//! TEI text nodes carry the indentation and line breaks of the XML
//! serialisation, plus whatever invisible characters the PDF text layer
//! contained (soft hyphens from justified columns, zero-width joiners from
//! ligature extraction). Two entry points handle the two shapes of text:
//!
//! - [`normalise_whitespace`] for single text blocks pulled out of the tree
//! - [`clean_markdown`] for the assembled document
//!
//! Each rule is a pure `&str → String` function and is tested on its own.

use once_cell::sync::Lazy;
use regex::Regex;

/// Collapse every whitespace run to one space, strip invisible characters,
/// and trim both ends.
pub fn normalise_whitespace(input: &str) -> String {
    let cleaned = remove_invisible_chars(input);
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Apply all Markdown cleanup rules, in order:
///
/// 1. Normalise line endings (CRLF → LF)
/// 2. Trim trailing whitespace per line
/// 3. Collapse 3+ consecutive blank lines down to 2
/// 4. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 5. Ensure the file ends with exactly one newline
pub fn clean_markdown(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    let s = remove_invisible_chars(&s);
    ensure_final_newline(&s)
}

// ── Rule 1: Normalise line endings ───────────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 2: Trim trailing whitespace per line ────────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 3: Collapse excessive blank lines ───────────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{4,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n\n").to_string()
}

// ── Rule 4: Remove invisible Unicode characters ─────────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 5: Ensure file ends with single newline ─────────────────────────────

fn ensure_final_newline(input: &str) -> String {
    let trimmed = input.trim_end();
    if trimmed.is_empty() {
        String::from("\n")
    } else {
        format!("{}\n", trimmed)
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalise_whitespace() {
        assert_eq!(
            normalise_whitespace("\n    Deep\tlearning \n  works.  "),
            "Deep learning works."
        );
        assert_eq!(normalise_whitespace("   "), "");
    }

    #[test]
    fn test_normalise_whitespace_drops_soft_hyphen() {
        assert_eq!(normalise_whitespace("detec\u{00AD}tion"), "detection");
    }

    #[test]
    fn test_normalise_line_endings() {
        assert_eq!(normalise_line_endings("a\r\nb\rc"), "a\nb\nc");
    }

    #[test]
    fn test_trim_trailing_whitespace() {
        assert_eq!(
            trim_trailing_whitespace("  hello   \nworld  "),
            "  hello\nworld"
        );
    }

    #[test]
    fn test_collapse_blank_lines() {
        let input = "a\n\n\n\n\n\nb";
        assert_eq!(collapse_blank_lines(input), "a\n\n\nb");
    }

    #[test]
    fn test_remove_invisible() {
        let input = "hello\u{200B}world\u{FEFF}foo\u{00AD}bar";
        assert_eq!(remove_invisible_chars(input), "helloworldfoobar");
    }

    #[test]
    fn test_ensure_final_newline() {
        assert_eq!(ensure_final_newline("hello"), "hello\n");
        assert_eq!(ensure_final_newline("hello\n\n\n"), "hello\n");
        assert_eq!(ensure_final_newline(""), "\n");
    }

    #[test]
    fn test_clean_markdown_full_pipeline() {
        let input = "## 1 Intro\r\n\r\nSome text   \n\n\n\n\n\n## 2 Method\u{200B}";
        let result = clean_markdown(input);
        assert!(result.starts_with("## 1 Intro\n\nSome text\n"));
        assert!(result.ends_with("## 2 Method\n"));
        assert!(!result.contains("\n\n\n\n"));
    }
}
