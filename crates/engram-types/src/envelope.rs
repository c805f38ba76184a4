//! Typed content envelopes, one family per memory type.
//!
//! Every write to a memory store carries a [`MemoryEnvelope`] whose variant
//! matches the target store. Stores persist the envelope as JSON and score
//! against [`MemoryEnvelope::summary_text`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::memory::MemoryType;

/// Content written to one memory store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "memory_type", rename_all = "lowercase")]
pub enum MemoryEnvelope {
    Working(WorkingContent),
    Episodic(EpisodicContent),
    Semantic(SemanticContent),
    Procedural(ProceduralContent),
}

/// Working memory: short-lived context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkingContent {
    Context {
        payload: Value,
    },
    VisualContext {
        caption: String,
        has_screenshot: bool,
        user_query: Option<String>,
        is_temporary: bool,
    },
    /// Weak pointer to an episodic record. Deleting the episode leaves this intact.
    EpisodicReference {
        episodic_memory_id: Uuid,
        caption: String,
        user_query: Option<String>,
    },
}

/// Episodic memory: session-scoped events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EpisodicContent {
    Interaction {
        payload: Value,
    },
    VisualEpisode {
        caption: String,
        structured_caption: StructuredCaption,
        privacy: PrivacyCheck,
    },
}

/// Semantic memory: long-lived knowledge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticContent {
    pub payload: Value,
}

/// Procedural memory: learned behaviours and patterns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProceduralContent {
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern_type: Option<String>,
}

/// Caption of a screenshot together with what prompted it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredCaption {
    pub user_query: Option<String>,
    pub caption: String,
    pub timestamp: DateTime<Utc>,
    pub image_width: Option<u32>,
    pub image_height: Option<u32>,
}

/// Outcome of the local sensitive-content scan on a visual memory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PrivacyCheck {
    pub contains_sensitive: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,
}

impl MemoryEnvelope {
    /// Wrap caller content for `memory_type`.
    pub fn from_payload(memory_type: MemoryType, payload: Value, pattern_type: Option<String>) -> Self {
        match memory_type {
            MemoryType::Working => MemoryEnvelope::Working(WorkingContent::Context { payload }),
            MemoryType::Episodic => MemoryEnvelope::Episodic(EpisodicContent::Interaction { payload }),
            MemoryType::Semantic => MemoryEnvelope::Semantic(SemanticContent { payload }),
            MemoryType::Procedural => MemoryEnvelope::Procedural(ProceduralContent {
                payload,
                pattern_type,
            }),
        }
    }

    pub fn memory_type(&self) -> MemoryType {
        match self {
            MemoryEnvelope::Working(_) => MemoryType::Working,
            MemoryEnvelope::Episodic(_) => MemoryType::Episodic,
            MemoryEnvelope::Semantic(_) => MemoryType::Semantic,
            MemoryEnvelope::Procedural(_) => MemoryType::Procedural,
        }
    }

    /// Plain text used for relevance scoring and pattern analysis.
    pub fn summary_text(&self) -> String {
        match self {
            MemoryEnvelope::Working(WorkingContent::Context { payload })
            | MemoryEnvelope::Episodic(EpisodicContent::Interaction { payload })
            | MemoryEnvelope::Semantic(SemanticContent { payload })
            | MemoryEnvelope::Procedural(ProceduralContent { payload, .. }) => payload_text(payload),
            MemoryEnvelope::Working(WorkingContent::VisualContext {
                caption, user_query, ..
            })
            | MemoryEnvelope::Working(WorkingContent::EpisodicReference {
                caption, user_query, ..
            }) => with_query(caption, user_query.as_deref()),
            MemoryEnvelope::Episodic(EpisodicContent::VisualEpisode {
                caption,
                structured_caption,
                ..
            }) => with_query(caption, structured_caption.user_query.as_deref()),
        }
    }
}

fn with_query(caption: &str, query: Option<&str>) -> String {
    match query {
        Some(q) if !q.trim().is_empty() => format!("{caption} {q}"),
        _ => caption.to_string(),
    }
}

/// Best-effort text of an arbitrary JSON payload.
///
/// Strings are used as-is; objects prefer a `text`, `content`, `message`
/// or `caption` string field; anything else falls back to compact JSON.
pub fn payload_text(payload: &Value) -> String {
    match payload {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Object(map) => ["text", "content", "message", "caption"]
            .iter()
            .find_map(|field| map.get(*field).and_then(Value::as_str))
            .map(str::to_string)
            .unwrap_or_else(|| payload.to_string()),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_tagging() {
        let env = MemoryEnvelope::from_payload(MemoryType::Semantic, json!({"text": "fact"}), None);
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(value["memory_type"], "semantic");
        assert_eq!(value["payload"]["text"], "fact");
        assert_eq!(env.memory_type(), MemoryType::Semantic);
    }

    #[test]
    fn test_working_variant_tagging() {
        let env = MemoryEnvelope::Working(WorkingContent::VisualContext {
            caption: "A code editor".to_string(),
            has_screenshot: true,
            user_query: None,
            is_temporary: true,
        });
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(value["memory_type"], "working");
        assert_eq!(value["kind"], "visual_context");
        let parsed: MemoryEnvelope = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, env);
    }

    #[test]
    fn test_payload_text_prefers_text_fields() {
        assert_eq!(payload_text(&json!("hello")), "hello");
        assert_eq!(payload_text(&json!({"text": "a", "content": "b"})), "a");
        assert_eq!(payload_text(&json!({"message": "m"})), "m");
        assert_eq!(payload_text(&json!({"n": 1})), r#"{"n":1}"#);
        assert_eq!(payload_text(&Value::Null), "");
    }

    #[test]
    fn test_summary_text_includes_query() {
        let env = MemoryEnvelope::Working(WorkingContent::EpisodicReference {
            episodic_memory_id: Uuid::now_v7(),
            caption: "Terminal with failing test".to_string(),
            user_query: Some("why does it fail".to_string()),
        });
        assert_eq!(env.summary_text(), "Terminal with failing test why does it fail");
    }
}
