// src/vector/filters.rs
// Condition helpers for the Qdrant filter DSL

use qdrant_client::qdrant::{Condition, Range};

/// Exact keyword match on a payload field
pub fn match_keyword(field: &str, value: &str) -> Condition {
    Condition::matches(field, value.to_string())
}

/// Full-text match on a text-indexed payload field
pub fn match_text(field: &str, text: &str) -> Condition {
    Condition::matches_text(field, text)
}

/// timestamp >= gte (and optionally <= lte)
pub fn timestamp_range(gte: Option<i64>, lte: Option<i64>) -> Condition {
    Condition::range(
        "timestamp",
        Range {
            gte: gte.map(|v| v as f64),
            lte: lte.map(|v| v as f64),
            ..Default::default()
        },
    )
}

/// timestamp > value (used to exclude the timestamp-0 conversation chunks)
pub fn timestamp_gt(value: i64) -> Condition {
    Condition::range(
        "timestamp",
        Range {
            gt: Some(value as f64),
            ..Default::default()
        },
    )
}
