//! Text normalisation: deterministic cleanup of OCR output.
//!
//! Tesseract output is correct text wrapped in engine noise: a trailing
//! form feed per page, stray carriage returns, space-padded lines and runs
//! of empty lines where the layout had whitespace. These rules remove the
//! noise without touching words.
//!
//! ## Rule Order
//!
//! Form feeds and line endings are normalised first so the per-line rules
//! see clean `\n`-separated input; blank-line collapsing runs after
//! trailing whitespace is trimmed, otherwise lines holding only spaces
//! would survive it.

use once_cell::sync::Lazy;
use regex::Regex;

/// Apply all normalisation rules to raw OCR text.
///
/// Rules (applied in order):
/// 1. Replace form feeds with line breaks
/// 2. Normalise line endings (CRLF / CR → LF)
/// 3. Trim trailing whitespace per line
/// 4. Collapse 2+ consecutive blank lines down to 1
/// 5. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens, etc.)
/// 6. Trim leading and trailing blank lines
pub fn clean_text(input: &str) -> String {
    let s = replace_form_feeds(input);
    let s = normalise_line_endings(&s);
    let s = trim_trailing_whitespace(&s);
    let s = collapse_blank_lines(&s);
    let s = remove_invisible_chars(&s);
    trim_blank_edges(&s)
}

/// Count of non-whitespace characters; the unit OCR yield is judged by.
pub fn significant_chars(text: &str) -> usize {
    text.chars().filter(|c| !c.is_whitespace()).count()
}

// ── Rule 1: Form feeds ───────────────────────────────────────────────────

fn replace_form_feeds(input: &str) -> String {
    input.replace('\u{000C}', "\n")
}

// ── Rule 2: Normalise line endings ───────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 3: Trim trailing whitespace per line ────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 4: Collapse excessive blank lines ───────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n").to_string()
}

// ── Rule 5: Remove invisible Unicode characters ──────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 6: Trim blank edges ─────────────────────────────────────────────

fn trim_blank_edges(input: &str) -> String {
    input.trim_matches('\n').trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn form_feed_removed() {
        assert_eq!(clean_text("Hello world\n\u{000C}"), "Hello world");
    }

    #[test]
    fn crlf_normalised() {
        assert_eq!(clean_text("a\r\nb\rc"), "a\nb\nc");
    }

    #[test]
    fn trailing_spaces_trimmed() {
        assert_eq!(clean_text("line one   \nline two\t"), "line one\nline two");
    }

    #[test]
    fn blank_runs_collapse_to_one() {
        assert_eq!(clean_text("a\n\n\n\n\nb"), "a\n\nb");
        assert_eq!(clean_text("a\n  \n \n\nb"), "a\n\nb");
    }

    #[test]
    fn single_blank_line_kept() {
        assert_eq!(clean_text("para one\n\npara two"), "para one\n\npara two");
    }

    #[test]
    fn invisible_chars_removed() {
        assert_eq!(clean_text("\u{FEFF}in\u{200B}voice\u{00AD}"), "invoice");
    }

    #[test]
    fn leading_indentation_survives() {
        assert_eq!(clean_text("\n\n   indented\n"), "   indented");
    }

    #[test]
    fn whitespace_only_becomes_empty() {
        assert_eq!(clean_text(" \n\t\n\u{000C}"), "");
    }

    #[test]
    fn significant_chars_ignores_whitespace() {
        assert_eq!(significant_chars(" a b\nc\t"), 3);
    }
}
