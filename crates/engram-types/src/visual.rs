//! Request and response shapes for screenshot-backed memories.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::memory::MemoryType;

/// Hard upper bound on a descriptive caption, in characters.
pub const DESCRIPTIVE_CAPTION_MAX_CHARS: usize = 200;

/// Hard upper bound on a concise caption, in characters.
pub const CONCISE_CAPTION_MAX_CHARS: usize = 100;

/// Screenshot payload handed to the visual memory pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VisualMemoryRequest {
    /// What the user asked while the screenshot was taken.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    /// Base64 image bytes, optionally as a `data:` URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_data: Option<String>,
    /// Request a longer, detailed caption.
    #[serde(default)]
    pub is_descriptive: bool,
    #[serde(default)]
    pub metadata: VisualMetadata,
}

/// Metadata of a screenshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VisualMetadata {
    /// Free-text description of what was on screen; feeds the fallback caption.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Caption length mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptionMode {
    Descriptive,
    Concise,
}

impl CaptionMode {
    pub fn from_descriptive(is_descriptive: bool) -> Self {
        if is_descriptive {
            CaptionMode::Descriptive
        } else {
            CaptionMode::Concise
        }
    }

    pub fn max_chars(&self) -> usize {
        match self {
            CaptionMode::Descriptive => DESCRIPTIVE_CAPTION_MAX_CHARS,
            CaptionMode::Concise => CONCISE_CAPTION_MAX_CHARS,
        }
    }
}

/// Result of a visual memory store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualMemoryResponse {
    pub success: bool,
    pub memory_type: MemoryType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_id: Option<Uuid>,
    /// Always present, even when captioning failed.
    pub caption: String,
    /// Whether `caption` came from the fallback template.
    pub caption_fallback: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_id: Option<Uuid>,
    pub response_time_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
