// src/rag/chunker.rs
// Character-window chunking with boundary preference

/// Default chunk window. Keeps chunks well under embedding token limits
/// even for base64-heavy content (~1 char/token worst case).
pub const MAX_CHUNK_CHARS: usize = 6000;

/// Overlap applied when a chunk ends on a hard split (mid-sentence)
pub const CHUNK_OVERLAP_CHARS: usize = 200;

/// Minimum characters for content to be worth indexing
pub const MIN_CONTENT_CHARS: usize = 50;

/// Truncation limit for the embedding safeguard retry. The 8191-token
/// embedding limit maps to ~7000 chars in the worst case.
pub const EMBEDDING_MAX_CHARS: usize = 7000;

/// Split text into chunks of at most `max_chars` characters.
///
/// Within each window a paragraph boundary (double newline) is preferred,
/// then a sentence boundary (". "), else the text is hard-split. Overlap
/// is applied only after hard splits so boundary splits stay clean.
pub fn split_text(text: &str, max_chars: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_chars {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < chars.len() {
        let remaining = chars.len() - start;
        if remaining <= max_chars {
            chunks.push(chars[start..].iter().collect());
            break;
        }

        let window_end = start + max_chars;
        let window: String = chars[start..window_end].iter().collect();

        // Prefer a paragraph boundary, then a sentence boundary. Only
        // accept boundaries past the midpoint so chunks stay substantial.
        let midpoint = max_chars / 2;
        let boundary = find_boundary(&window, "\n\n", midpoint)
            .or_else(|| find_boundary(&window, ". ", midpoint));

        match boundary {
            Some(cut) => {
                chunks.push(chars[start..start + cut].iter().collect::<String>().trim().to_string());
                start += cut;
            }
            None => {
                // Hard split: back up by the overlap on the next window
                chunks.push(window);
                start = window_end.saturating_sub(overlap).max(start + 1);
            }
        }
    }

    chunks.into_iter().filter(|c| !c.is_empty()).collect()
}

/// Last occurrence of `needle` within the window, in char offsets,
/// ignoring matches before `min_pos`.
fn find_boundary(window: &str, needle: &str, min_pos: usize) -> Option<usize> {
    let byte_pos = window.rfind(needle)?;
    let char_pos = window[..byte_pos].chars().count() + needle.chars().count();
    if char_pos > min_pos {
        Some(char_pos)
    } else {
        None
    }
}

/// Quality filter: reject chunks too short to carry meaning
pub fn is_quality_chunk(chunk: &str) -> bool {
    chunk.trim().chars().count() >= MIN_CONTENT_CHARS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_chunk() {
        let text = "hello world";
        assert_eq!(split_text(text, 6000, 200), vec![text.to_string()]);
    }

    #[test]
    fn exact_max_is_one_chunk() {
        let text = "a".repeat(100);
        assert_eq!(split_text(&text, 100, 20).len(), 1);
    }

    #[test]
    fn max_plus_one_is_two_chunks() {
        let text = "a".repeat(101);
        let chunks = split_text(&text, 100, 20);
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn prefers_paragraph_boundary() {
        let mut text = "a".repeat(80);
        text.push_str("\n\n");
        text.push_str(&"b".repeat(80));
        let chunks = split_text(&text, 100, 20);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].chars().all(|c| c == 'a'));
        assert!(chunks[1].chars().all(|c| c == 'b'));
    }

    #[test]
    fn falls_back_to_sentence_boundary() {
        let mut text = "a".repeat(80);
        text.push_str(". ");
        text.push_str(&"b".repeat(80));
        let chunks = split_text(&text, 100, 20);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].ends_with('.'));
    }

    #[test]
    fn overlap_applies_only_on_hard_splits() {
        // No boundaries at all: hard split with overlap
        let text = "a".repeat(100) + &"b".repeat(100);
        let chunks = split_text(&text, 100, 20);
        assert!(chunks.len() >= 2);
        // Second chunk starts 20 chars before the first window's end
        assert!(chunks[1].starts_with(&"a".repeat(20)));

        // Clean paragraph boundary: no overlap
        let mut text = "a".repeat(80);
        text.push_str("\n\n");
        text.push_str(&"b".repeat(80));
        let chunks = split_text(&text, 100, 20);
        assert!(!chunks[1].contains('a'));
    }

    #[test]
    fn handles_multibyte_text() {
        let text = "שלום עולם ".repeat(50);
        let chunks = split_text(&text, 100, 20);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 100);
        }
    }

    #[test]
    fn quality_filter_rejects_short_chunks() {
        assert!(!is_quality_chunk("hi"));
        assert!(is_quality_chunk(&"long enough content ".repeat(5)));
    }
}
