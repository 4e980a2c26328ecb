use crate::types::normalize_title;
use std::collections::HashSet;

/// Requested titles partitioned by whether the store has ever recorded them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TitleSplit {
    pub known: Vec<String>,
    pub unknown: Vec<String>,
}

/// Partitions `requested` against the known-titles index.
///
/// Both halves keep the relative order of `requested`; duplicates pass through.
pub fn split_titles(requested: &[String], existing: &[String]) -> TitleSplit {
    let index: HashSet<&str> = existing.iter().map(String::as_str).collect();

    let mut split = TitleSplit::default();
    for title in requested {
        if index.contains(title.as_str()) {
            split.known.push(title.clone());
        } else {
            split.unknown.push(title.clone());
        }
    }

    split
}

/// Parses a `titles` query value such as `btc, eth`.
///
/// Items are trimmed and uppercased; empty items are dropped.
pub fn parse_titles(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(normalize_title)
        .filter(|title| !title.is_empty())
        .collect()
}
