// src/rag/tokenize.rs
// Query tokenization and Hebrew morphology expansion for the lexical leg

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;

lazy_static! {
    static ref WORD_RE: Regex = Regex::new(r"[\w]{3,}").unwrap();
}

/// Hebrew prefix letters that attach directly to words:
/// ה (the), ב (in), ל (to), מ (from), ש (that), כ (like), ו (and)
const HEBREW_PREFIXES: [char; 7] = ['ה', 'ב', 'ל', 'מ', 'ש', 'כ', 'ו'];

/// Verb conjugation suffixes, longest first
const VERB_SUFFIXES: [&str; 8] = ["תי", "נו", "תם", "תן", "ת", "ה", "ו", "י"];

/// Noun suffixes covering Piel/Pual patterns with י/ו infix
const NOUN_SUFFIXES: [&str; 6] = ["ושין", "ושים", "ין", "ים", "ות", "ה"];

fn has_hebrew(token: &str) -> bool {
    token.chars().any(|c| ('\u{0590}'..='\u{05FF}').contains(&c))
}

fn char_count(s: &str) -> usize {
    s.chars().count()
}

fn strip_chars_front(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((idx, _)) => &s[idx..],
        None => "",
    }
}

fn strip_suffix_str<'a>(s: &'a str, suffix: &str) -> Option<&'a str> {
    s.strip_suffix(suffix)
}

/// Tokenize a query into words for full-text search.
///
/// Language-agnostic: unicode word characters, length ≥ 3, de-duplicated
/// case-insensitively while preserving order. Hebrew tokens are then
/// expanded with morphological variants.
pub fn tokenize_query(query: &str) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut tokens: Vec<String> = Vec::new();

    for m in WORD_RE.find_iter(query) {
        let token = m.as_str();
        let low = token.to_lowercase();
        if seen.insert(low) {
            tokens.push(token.to_string());
        }
    }

    expand_hebrew_tokens(tokens)
}

/// Expand Hebrew tokens by stripping prefixes and verb/noun patterns.
///
/// Hebrew is morphologically rich: prefixes attach directly to words and
/// conjugation changes the form significantly.
/// "התגרשתי" (I got divorced) yields root "גרש", which also matches
/// "גירושין" (divorce); "שהתגרשתי" first loses the ש prefix.
/// Variants are generated pattern-wise, with no Hebrew NLP runtime.
pub fn expand_hebrew_tokens(tokens: Vec<String>) -> Vec<String> {
    let mut expanded: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    let push = |seen: &mut HashSet<String>, out: &mut Vec<String>, s: &str, min_len: usize| {
        if char_count(s) >= min_len && seen.insert(s.to_lowercase()) {
            out.push(s.to_string());
        }
    };

    for token in tokens {
        let low = token.to_lowercase();
        if seen.contains(&low) {
            continue;
        }
        seen.insert(low);
        expanded.push(token.clone());

        if !has_hebrew(&token) {
            continue;
        }

        // Strip up to two leading prefix letters when the remainder
        // stays ≥ 3 chars. Keep the variants: the Hitpael check below
        // applies to them too (e.g. שהתגרשתי → התגרשתי → root).
        let mut prefix_variants: Vec<String> = Vec::new();
        let mut word = token.as_str();
        for _ in 0..2 {
            let Some(first) = word.chars().next() else { break };
            if char_count(word) > 3 && HEBREW_PREFIXES.contains(&first) {
                let stripped = strip_chars_front(word, 1);
                push(&mut seen, &mut expanded, stripped, 3);
                prefix_variants.push(stripped.to_string());
                word = stripped;
            } else {
                break;
            }
        }

        // Hitpael pattern: הת + root, on the token or a prefix-stripped
        // variant of it
        let hitpael = std::iter::once(token.as_str())
            .chain(prefix_variants.iter().map(|s| s.as_str()))
            .find(|w| char_count(w) >= 5 && w.starts_with("הת"));
        if let Some(w) = hitpael {
            let base = strip_chars_front(w, 2);
            for suffix in VERB_SUFFIXES {
                if char_count(base) > 3 {
                    if let Some(root) = strip_suffix_str(base, suffix) {
                        push(&mut seen, &mut expanded, root, 2);
                        break;
                    }
                }
            }
            // Also the base without הת
            push(&mut seen, &mut expanded, base, 3);
        }

        // Noun suffixes on the original token
        for suffix in NOUN_SUFFIXES {
            if char_count(&token) > char_count(suffix) + 2 {
                if let Some(stem) = strip_suffix_str(&token, suffix) {
                    push(&mut seen, &mut expanded, stem, 2);
                }
            }
        }

        // Verb suffixes on the original token
        for suffix in &VERB_SUFFIXES[..6] {
            if char_count(&token) > char_count(suffix) + 2 {
                if let Some(stem) = strip_suffix_str(&token, suffix) {
                    push(&mut seen, &mut expanded, stem, 3);
                    break;
                }
            }
        }
    }

    expanded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_and_dedups() {
        let tokens = tokenize_query("Hello hello world me");
        assert_eq!(tokens, vec!["Hello".to_string(), "world".to_string()]);
    }

    #[test]
    fn keeps_tokens_of_three_chars_or_more() {
        let tokens = tokenize_query("at the bistro on fri");
        assert!(tokens.contains(&"bistro".to_string()));
        assert!(!tokens.contains(&"at".to_string()));
        assert!(!tokens.contains(&"on".to_string()));
    }

    #[test]
    fn expands_hitpael_verb() {
        // "התגרשתי" → strips הת and the תי suffix to reach root "גרש",
        // plus the base without הת
        let tokens = tokenize_query("התגרשתי");
        assert!(tokens.contains(&"התגרשתי".to_string()));
        assert!(tokens.contains(&"גרש".to_string()));
        assert!(tokens.contains(&"גרשתי".to_string()));
    }

    #[test]
    fn strips_leading_prefix_letters() {
        // "שהתגרשתי" → "התגרשתי" via prefix strip, then Hitpael reaches
        // the root "גרש"
        let tokens = tokenize_query("שהתגרשתי");
        assert!(tokens.contains(&"התגרשתי".to_string()));
        assert!(tokens.contains(&"תגרשתי".to_string()));
        assert!(tokens.contains(&"גרש".to_string()));
    }

    #[test]
    fn expands_noun_suffixes() {
        // "גירושין" → stem "גיר" via the ושין suffix
        let tokens = tokenize_query("גירושין");
        assert!(tokens.contains(&"גירושין".to_string()));
        assert!(tokens.contains(&"גיר".to_string()));
    }

    #[test]
    fn latin_tokens_not_expanded() {
        let tokens = tokenize_query("divorce");
        assert_eq!(tokens, vec!["divorce".to_string()]);
    }

    #[test]
    fn variants_are_at_least_two_chars() {
        for token in tokenize_query("שהתגרשתי גירושין בבית") {
            assert!(token.chars().count() >= 2, "short variant: {}", token);
        }
    }
}
