//! Markdown-subset renderer for assistant responses.
//!
//! Maps line-oriented text with light markdown markers (headings, emphasis,
//! inline code) to an HTML fragment. Pure and total.

use regex::Regex;
use std::sync::LazyLock;

/// Returned in place of HTML when there is nothing to render.
pub const EMPTY_RESPONSE_MESSAGE: &str = "Error: Received an empty response from the server.";

/// Heading prefixes, longest first so `#` never shadows `###`.
const HEADING_PREFIXES: [(u8, &str); 6] = [
    (6, "###### "),
    (5, "##### "),
    (4, "#### "),
    (3, "### "),
    (2, "## "),
    (1, "# "),
];

struct InlinePatterns {
    label: Regex,
    bold: Regex,
    italic: Regex,
    code: Regex,
}

static PATTERNS: LazyLock<InlinePatterns> = LazyLock::new(|| InlinePatterns {
    label: Regex::new(r"^[A-Za-z ]+:$").expect("Invalid label regex"),
    bold: Regex::new(r"\*\*(.*?)\*\*").expect("Invalid bold regex"),
    italic: Regex::new(r"\*(.*?)\*").expect("Invalid italic regex"),
    code: Regex::new(r"`(.*?)`").expect("Invalid code regex"),
});

/// Render `text` to an HTML fragment.
///
/// `None` or an empty string yields [`EMPTY_RESPONSE_MESSAGE`] instead of
/// failing.
pub fn render(text: Option<&str>) -> String {
    let text = match text {
        Some(t) if !t.is_empty() => t,
        _ => {
            tracing::warn!("Received null or empty response to render");
            return EMPTY_RESPONSE_MESSAGE.to_string();
        }
    };

    let lines: Vec<&str> = text.split('\n').collect();
    let last = lines.len() - 1;
    lines
        .iter()
        .enumerate()
        .map(|(index, line)| render_line(line, index < last))
        .collect()
}

fn render_line(line: &str, has_next: bool) -> String {
    if let Some((level, rest)) = split_heading(line) {
        return format!("<h{level}>{}</h{level}>", render_inline(rest));
    }

    // Emphasis label: "Benefits:" on a line of its own. Misfires on any
    // letters-and-spaces sentence that ends in a colon.
    if PATTERNS.label.is_match(line) {
        return format!("<br><b>{}</b>", line);
    }

    let mut out = render_inline(line);
    if has_next {
        out.push_str("<br>");
    }
    out
}

fn split_heading(line: &str) -> Option<(u8, &str)> {
    HEADING_PREFIXES
        .iter()
        .find_map(|(level, prefix)| line.strip_prefix(prefix).map(|rest| (*level, rest)))
}

fn render_inline(text: &str) -> String {
    let bolded = PATTERNS.bold.replace_all(text, "<b>$1</b>");
    let italicized = PATTERNS.italic.replace_all(&bolded, "<i>$1</i>");
    let stripped = italicized.replace('*', "");
    PATTERNS
        .code
        .replace_all(&stripped, "<code>$1</code>")
        .into_owned()
}
