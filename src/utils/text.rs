// src/utils/text.rs
// Content sanitation helpers shared by the sync pipelines

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref TAG_RE: Regex = Regex::new(r"(?s)<[^>]+>").unwrap();
    static ref SCRIPT_RE: Regex =
        Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>").unwrap();
    static ref BLANK_RE: Regex = Regex::new(r"\n{3,}").unwrap();
}

/// Strip Unicode control characters (keeps \n and \t)
pub fn strip_unicode_control(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}

/// Convert HTML to plain text: drop script/style blocks, strip tags,
/// decode entities, collapse blank runs.
pub fn strip_html(text: &str) -> String {
    let without_scripts = SCRIPT_RE.replace_all(text, " ");
    let without_tags = TAG_RE.replace_all(&without_scripts, " ");
    let decoded = html_escape::decode_html_entities(without_tags.as_ref()).to_string();
    BLANK_RE.replace_all(decoded.trim(), "\n\n").to_string()
}

/// Sanitize raw message/email content for embedding.
///
/// Strips control characters and HTML, caps consecutive reply-quote lines
/// at `max_quote_lines`, and removes everything after a signature marker.
pub fn sanitize_content(raw: &str, signature_markers: &[&str], max_quote_lines: usize) -> String {
    if raw.is_empty() {
        return String::new();
    }

    let mut text = strip_unicode_control(raw);
    if text.contains('<') && text.contains('>') {
        text = strip_html(&text);
    }

    let mut cleaned: Vec<String> = Vec::new();
    let mut consecutive_quoted = 0usize;

    'lines: for line in text.lines() {
        let stripped = line.trim();

        for marker in signature_markers {
            if stripped == *marker {
                break 'lines;
            }
        }

        if stripped.starts_with('>') {
            consecutive_quoted += 1;
            // Keep the first few quoted lines for context, drop the rest
            if consecutive_quoted <= max_quote_lines {
                cleaned.push(stripped.trim_start_matches(['>', ' ']).to_string());
            }
        } else {
            consecutive_quoted = 0;
            cleaned.push(stripped.to_string());
        }
    }

    let joined = cleaned.join("\n");
    BLANK_RE.replace_all(joined.trim(), "\n\n").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_html_tags_and_entities() {
        let out = strip_html("<p>Hello &amp; <b>world</b></p><script>alert(1)</script>");
        assert!(out.contains("Hello & "));
        assert!(!out.contains("alert"));
        assert!(!out.contains('<'));
    }

    #[test]
    fn caps_reply_quotes() {
        let raw = "reply\n> one\n> two\n> three\n> four\n> five\nend";
        let out = sanitize_content(raw, &["--"], 3);
        assert!(out.contains("one"));
        assert!(out.contains("three"));
        assert!(!out.contains("four"));
        assert!(out.contains("end"));
    }

    #[test]
    fn cuts_signature() {
        let raw = "body text\n--\nJohn Doe\n+972-50-0000000";
        let out = sanitize_content(raw, &["--"], 3);
        assert!(out.contains("body text"));
        assert!(!out.contains("John Doe"));
    }

    #[test]
    fn keeps_control_free_text() {
        let out = strip_unicode_control("a\u{0007}b\nc");
        assert_eq!(out, "ab\nc");
    }
}
