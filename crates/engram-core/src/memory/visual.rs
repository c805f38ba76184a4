//! Screenshot captioning helpers for the visual memory path.
//!
//! The service asks a [`Captioner`](super::caption::Captioner) for a caption
//! and falls back to a template built from the user's query when there is no
//! captioner, no image, or the captioner fails. The result is never empty.

use chrono::{DateTime, Utc};
use engram_types::envelope::{
    EpisodicContent, MemoryEnvelope, PrivacyCheck, StructuredCaption, WorkingContent,
};
use engram_types::visual::{CaptionMode, VisualMemoryRequest};
use uuid::Uuid;

/// Token budget handed to the captioner per mode.
pub fn max_tokens(mode: CaptionMode) -> u32 {
    match mode {
        CaptionMode::Descriptive => 120,
        CaptionMode::Concise => 60,
    }
}

/// Instruction sent with the image.
pub fn caption_prompt(mode: CaptionMode, query: Option<&str>) -> String {
    let mut prompt = match mode {
        CaptionMode::Descriptive => format!(
            "Describe this screenshot in detail in at most {} characters. \
             Mention the application, the visible content and anything the user appears to be working on.",
            mode.max_chars()
        ),
        CaptionMode::Concise => format!(
            "Caption this screenshot in at most {} characters. Name the application and the main content.",
            mode.max_chars()
        ),
    };
    if let Some(q) = query.filter(|q| !q.trim().is_empty()) {
        prompt.push_str(&format!(" The user asked: \"{}\".", q.trim()));
    }
    prompt.push_str(" Reply with the caption only.");
    prompt
}

/// Deterministic caption used when captioning is unavailable.
pub fn fallback_caption(mode: CaptionMode, query: Option<&str>, context: Option<&str>) -> String {
    let query = query.map(str::trim).filter(|q| !q.is_empty());
    let context = context.map(str::trim).filter(|c| !c.is_empty());

    let caption = match (query, context, mode) {
        (Some(q), _, CaptionMode::Descriptive) => {
            format!("Screenshot captured while the user asked: {q}")
        }
        (Some(q), _, CaptionMode::Concise) => format!("Screenshot: {q}"),
        (None, Some(c), CaptionMode::Descriptive) => format!("Screenshot captured showing: {c}"),
        (None, Some(c), CaptionMode::Concise) => format!("Screenshot: {c}"),
        (None, None, _) => "Screenshot captured".to_string(),
    };
    truncate_chars(&caption, mode.max_chars())
}

/// Clean up a model caption. Returns `None` when nothing usable is left.
pub fn normalize_caption(raw: &str, mode: CaptionMode) -> Option<String> {
    let trimmed = raw
        .trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .trim();
    let single_line = trimmed.split_whitespace().collect::<Vec<_>>().join(" ");
    if single_line.is_empty() {
        return None;
    }
    Some(truncate_chars(&single_line, mode.max_chars()))
}

/// Truncate to at most `max` characters, never splitting a code point.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

const CREDENTIAL_WORDS: &[&str] = &[
    "password",
    "passwd",
    "api key",
    "api_key",
    "secret",
    "token",
    "private key",
];

/// Local scan of caption and query for content that should not be kept
/// verbatim. Flags are stable identifiers.
pub fn scan_privacy(caption: &str, query: Option<&str>) -> PrivacyCheck {
    let text = match query {
        Some(q) => format!("{caption} {q}"),
        None => caption.to_string(),
    };
    let lower = text.to_lowercase();
    let mut flags = Vec::new();

    if text.split_whitespace().any(looks_like_email) {
        flags.push("email_address".to_string());
    }
    if longest_digit_run(&text) >= 9 {
        flags.push("long_number".to_string());
    }
    if CREDENTIAL_WORDS.iter().any(|w| lower.contains(w)) {
        flags.push("credential_keyword".to_string());
    }

    PrivacyCheck {
        contains_sensitive: !flags.is_empty(),
        flags,
    }
}

fn looks_like_email(word: &str) -> bool {
    let word = word.trim_matches(|c: char| !c.is_alphanumeric());
    match word.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
        }
        None => false,
    }
}

/// Longest run of digits, ignoring single spaces and dashes between them.
fn longest_digit_run(text: &str) -> usize {
    let mut best = 0;
    let mut current = 0;
    let mut prev_sep = false;
    for c in text.chars() {
        if c.is_ascii_digit() {
            current += 1;
            prev_sep = false;
        } else if (c == ' ' || c == '-') && current > 0 && !prev_sep {
            prev_sep = true;
        } else {
            current = 0;
            prev_sep = false;
        }
        best = best.max(current);
    }
    best
}

/// Working-memory marker for a screenshot.
pub fn working_envelope(caption: &str, request: &VisualMemoryRequest) -> MemoryEnvelope {
    MemoryEnvelope::Working(WorkingContent::VisualContext {
        caption: caption.to_string(),
        has_screenshot: true,
        user_query: request.query.clone(),
        is_temporary: true,
    })
}

/// Full episodic record of a screenshot.
pub fn episodic_envelope(
    caption: &str,
    request: &VisualMemoryRequest,
    now: DateTime<Utc>,
) -> MemoryEnvelope {
    MemoryEnvelope::Episodic(EpisodicContent::VisualEpisode {
        caption: caption.to_string(),
        structured_caption: StructuredCaption {
            user_query: request.query.clone(),
            caption: caption.to_string(),
            timestamp: now,
            image_width: request.metadata.width,
            image_height: request.metadata.height,
        },
        privacy: scan_privacy(caption, request.query.as_deref()),
    })
}

/// Weak working-memory pointer to a stored episode.
pub fn back_reference(
    episodic_memory_id: Uuid,
    caption: &str,
    request: &VisualMemoryRequest,
) -> MemoryEnvelope {
    MemoryEnvelope::Working(WorkingContent::EpisodicReference {
        episodic_memory_id,
        caption: caption.to_string(),
        user_query: request.query.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_prefers_query_then_context() {
        assert_eq!(
            fallback_caption(CaptionMode::Concise, Some("what is this error"), Some("IDE")),
            "Screenshot: what is this error"
        );
        assert_eq!(
            fallback_caption(CaptionMode::Descriptive, Some("what is this error"), None),
            "Screenshot captured while the user asked: what is this error"
        );
        assert_eq!(
            fallback_caption(CaptionMode::Concise, Some("  "), Some("terminal")),
            "Screenshot: terminal"
        );
        assert_eq!(
            fallback_caption(CaptionMode::Concise, None, None),
            "Screenshot captured"
        );
    }

    #[test]
    fn fallback_respects_concise_limit() {
        let query = "é".repeat(300);
        let caption = fallback_caption(CaptionMode::Concise, Some(&query), None);
        assert_eq!(caption.chars().count(), 100);
        assert!(caption.starts_with("Screenshot: "));
    }

    #[test]
    fn normalize_strips_quotes_and_truncates() {
        assert_eq!(
            normalize_caption("  \"A terminal\nwith logs\"  ", CaptionMode::Concise).as_deref(),
            Some("A terminal with logs")
        );
        assert!(normalize_caption(" \"\" ", CaptionMode::Concise).is_none());

        let long = "x".repeat(500);
        assert_eq!(
            normalize_caption(&long, CaptionMode::Descriptive)
                .unwrap()
                .len(),
            200
        );
    }

    #[test]
    fn prompt_mentions_limit_and_query() {
        let prompt = caption_prompt(CaptionMode::Concise, Some("why red"));
        assert!(prompt.contains("100 characters"));
        assert!(prompt.contains("why red"));
        assert!(!caption_prompt(CaptionMode::Descriptive, None).contains("asked"));
    }

    #[test]
    fn privacy_scan_flags_sensitive_content() {
        let clean = scan_privacy("A code editor showing main.rs", None);
        assert!(!clean.contains_sensitive);

        let check = scan_privacy(
            "Login form for jane.doe@example.com",
            Some("card 4111 1111 1111 1111, what is my password"),
        );
        assert!(check.contains_sensitive);
        assert_eq!(
            check.flags,
            vec!["email_address", "long_number", "credential_keyword"]
        );
    }

    #[test]
    fn short_numbers_are_not_flagged() {
        assert!(!scan_privacy("Version 1.2.3 released 2024-05-01", None).contains_sensitive);
    }
}
