//! Word splitting shared by relevance scoring and keyword patterns.

use std::collections::HashSet;

const STOP_WORDS: &[&str] = &[
    "about", "after", "again", "also", "been", "before", "being", "both", "could", "does",
    "doing", "down", "each", "from", "have", "having", "here", "into", "just", "like", "more",
    "most", "much", "only", "other", "over", "same", "should", "some", "such", "than", "that",
    "their", "them", "then", "there", "these", "they", "this", "those", "through", "very",
    "want", "were", "what", "when", "where", "which", "while", "will", "with", "would", "your",
];

/// Lower-cased alphanumeric words, in order, duplicates kept.
pub(crate) fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Distinct query terms worth matching on (single letters dropped).
pub(crate) fn query_terms(query: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    words(query)
        .into_iter()
        .filter(|w| w.chars().count() > 1)
        .filter(|w| seen.insert(w.clone()))
        .collect()
}

/// Distinct keywords of at least four characters, stop-words removed.
pub(crate) fn keywords(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    words(text)
        .into_iter()
        .filter(|w| w.chars().count() >= 4)
        .filter(|w| !w.chars().all(|c| c.is_ascii_digit()))
        .filter(|w| !STOP_WORDS.contains(&w.as_str()))
        .filter(|w| seen.insert(w.clone()))
        .collect()
}

/// Relevance of `text` to `terms`.
///
/// The fraction of query terms present as words of `text`; a verbatim
/// occurrence of the whole query scores 1.0. No terms means a neutral 0.5.
pub(crate) fn overlap_score(terms: &[String], query: &str, text: &str) -> f64 {
    if terms.is_empty() {
        return 0.5;
    }
    let lower = text.to_lowercase();
    let phrase = query.trim().to_lowercase();
    if terms.len() > 1 && !phrase.is_empty() && lower.contains(&phrase) {
        return 1.0;
    }
    let present: HashSet<String> = words(&lower).into_iter().collect();
    let hits = terms.iter().filter(|t| present.contains(*t)).count();
    hits as f64 / terms.len() as f64
}
