// src/entity/script.rs
// Script detection, name validity, phone normalization and bilingual
// display-name synthesis. All pure functions.

use super::types::{Alias, Script};

/// Hebrew code block
fn is_hebrew_char(c: char) -> bool {
    ('\u{0590}'..='\u{05FF}').contains(&c)
}

fn has_hebrew(text: &str) -> bool {
    text.chars().any(is_hebrew_char)
}

fn has_latin(text: &str) -> bool {
    text.chars().any(|c| c.is_ascii_alphabetic())
}

/// Detect the primary script of a text string
pub fn detect_script(text: &str) -> Script {
    let hebrew = has_hebrew(text);
    let latin = has_latin(text);
    match (hebrew, latin) {
        (true, true) => Script::Mixed,
        (true, false) => Script::Hebrew,
        (false, true) => Script::Latin,
        (false, false) => {
            if is_numeric_alias(text) {
                Script::Numeric
            } else {
                Script::Unknown
            }
        }
    }
}

/// True when the text is a phone-like numeric alias
pub fn is_numeric_alias(text: &str) -> bool {
    let cleaned: String = text
        .chars()
        .filter(|c| !matches!(c, '+' | '-' | ' ' | '(' | ')'))
        .collect();
    !cleaned.is_empty() && cleaned.chars().all(|c| c.is_ascii_digit())
}

/// Check if a name is a valid person/contact name.
///
/// Filters out punctuation-only strings, pure digits, single characters,
/// paren-wrapped fragments, star-prefixed short codes and pure emoji —
/// garbage that messaging contact lists sometimes carry.
pub fn is_valid_person_name(name: &str) -> bool {
    let stripped = name.trim();
    if stripped.chars().count() < 2 {
        return false;
    }

    // Pure digits
    if stripped.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    // Wrapped in parens like ('')
    if stripped.starts_with('(') && stripped.ends_with(')') {
        return false;
    }
    // Star-prefixed short codes like *K
    if stripped.starts_with('*') && stripped.chars().count() <= 3 {
        return false;
    }
    // Must contain at least one letter in any script
    if !stripped.chars().any(|c| c.is_alphabetic()) {
        return false;
    }

    true
}

/// Normalize a phone number for comparison.
///
/// Strips whitespace, dashes, parens, the leading `+` and leading zeros.
/// "+972-50-123-4567" and "0501234567" normalize to comparable forms.
pub fn normalize_phone(phone: &str) -> String {
    let cleaned: String = phone
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '+'))
        .collect();
    cleaned.trim_start_matches('0').to_string()
}

/// Build a bilingual display name from a person's aliases.
///
/// If the canonical name already mixes scripts it stands. Otherwise, when
/// both a Hebrew and a Latin non-numeric alias exist, the longest of each
/// is combined as "Latin / Hebrew". Returns None when no change is needed.
pub fn build_display_name(canonical_name: &str, aliases: &[Alias]) -> Option<String> {
    if detect_script(canonical_name) == Script::Mixed {
        return None;
    }

    let mut hebrew_names: Vec<&str> = Vec::new();
    let mut latin_names: Vec<&str> = Vec::new();

    for alias in aliases {
        if is_numeric_alias(&alias.alias) {
            continue;
        }
        match alias.script.as_str() {
            "hebrew" => hebrew_names.push(&alias.alias),
            "latin" => latin_names.push(&alias.alias),
            _ => {}
        }
    }

    let best_hebrew = hebrew_names.into_iter().max_by_key(|n| n.chars().count())?;
    let best_latin = latin_names.into_iter().max_by_key(|n| n.chars().count())?;

    Some(format!("{} / {}", best_latin, best_hebrew))
}

/// Compute the display name for read paths: bilingual synthesis when
/// possible, canonical name otherwise.
pub fn compute_display_name(canonical_name: &str, aliases: &[Alias]) -> String {
    build_display_name(canonical_name, aliases).unwrap_or_else(|| canonical_name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alias(text: &str) -> Alias {
        Alias {
            id: 0,
            alias: text.to_string(),
            script: detect_script(text).as_str().to_string(),
            source: "auto".to_string(),
        }
    }

    #[test]
    fn detects_scripts() {
        assert_eq!(detect_script("שירן"), Script::Hebrew);
        assert_eq!(detect_script("Shiran"), Script::Latin);
        assert_eq!(detect_script("Shiran שירן"), Script::Mixed);
        assert_eq!(detect_script("+972-50-1234567"), Script::Numeric);
        assert_eq!(detect_script("!!!"), Script::Unknown);
    }

    #[test]
    fn rejects_garbage_names() {
        assert!(!is_valid_person_name("12345"));
        assert!(!is_valid_person_name("x"));
        assert!(!is_valid_person_name("(')"));
        assert!(!is_valid_person_name("*K"));
        assert!(!is_valid_person_name("!!!"));
        assert!(is_valid_person_name("David Cohen"));
        assert!(is_valid_person_name("שירן ויינטרוב"));
    }

    #[test]
    fn normalizes_phones() {
        assert_eq!(normalize_phone("+972-50-123-4567"), "972501234567");
        assert_eq!(normalize_phone("0501234567"), "501234567");
        assert_eq!(normalize_phone("(050) 123 4567"), "501234567");
    }

    #[test]
    fn builds_bilingual_display_name() {
        let aliases = vec![
            alias("Shiran Waintrob"),
            alias("Shiran"),
            alias("שירן ויינטרוב"),
            alias("שירן"),
        ];
        let name = build_display_name("Shiran Waintrob", &aliases).unwrap();
        assert_eq!(name, "Shiran Waintrob / שירן ויינטרוב");
    }

    #[test]
    fn no_display_name_without_both_scripts() {
        let aliases = vec![alias("Shiran Waintrob"), alias("Shiran")];
        assert!(build_display_name("Shiran Waintrob", &aliases).is_none());
    }

    #[test]
    fn mixed_canonical_name_stands() {
        let aliases = vec![alias("Shiran"), alias("שירן")];
        assert!(build_display_name("Shiran / שירן", &aliases).is_none());
    }

    #[test]
    fn numeric_aliases_ignored_for_display_name() {
        let aliases = vec![alias("0501234567"), alias("שירן")];
        assert!(build_display_name("0501234567", &aliases).is_none());
    }
}
