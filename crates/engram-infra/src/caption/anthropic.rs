//! AnthropicCaptioner -- [`Captioner`] backed by the Anthropic Messages API.
//!
//! Sends one user message holding the screenshot as a base64 image block
//! followed by the caption prompt, and returns the concatenated text blocks
//! of the reply.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use engram_core::memory::caption::Captioner;
use engram_types::config::CaptionConfig;
use engram_types::error::CaptionError;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

const SUPPORTED_MEDIA_TYPES: &[&str] = &["image/png", "image/jpeg", "image/gif", "image/webp"];

/// Screenshot captioner using Claude vision models.
///
/// Not `Debug`: the struct holds the API key.
pub struct AnthropicCaptioner {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    model: String,
}

impl AnthropicCaptioner {
    const API_VERSION: &'static str = "2023-06-01";

    pub fn new(api_key: SecretString, config: &CaptionConfig) -> Result<Self, CaptionError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| CaptionError::Provider(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct CaptionRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<CaptionMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct CaptionMessage<'a> {
    role: &'static str,
    content: Vec<ContentPart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Image { source: ImageSource<'a> },
    Text { text: &'a str },
}

#[derive(Debug, Serialize)]
struct ImageSource<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    media_type: &'a str,
    data: &'a str,
}

#[derive(Debug, Deserialize)]
struct CaptionResponse {
    content: Vec<ResponseBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text { text: String },
    #[serde(other)]
    Other,
}

// ---------------------------------------------------------------------------
// Image handling
// ---------------------------------------------------------------------------

/// Split `image` (raw base64 or a `data:` URL) into media type and payload.
fn split_image(image: &str) -> Result<(String, &str), CaptionError> {
    let image = image.trim();
    if image.is_empty() {
        return Err(CaptionError::EmptyImage);
    }

    let (media_type, data) = match image.strip_prefix("data:") {
        Some(rest) => {
            let (header, data) = rest
                .split_once(',')
                .ok_or_else(|| CaptionError::Provider("malformed data URL".to_string()))?;
            let media_type = header.split(';').next().unwrap_or_default().trim();
            let media_type = if media_type.is_empty() {
                sniff_media_type(data)
            } else {
                media_type.to_lowercase()
            };
            (media_type, data.trim())
        }
        None => (sniff_media_type(image), image),
    };

    if data.is_empty() {
        return Err(CaptionError::EmptyImage);
    }
    if !SUPPORTED_MEDIA_TYPES.contains(&media_type.as_str()) {
        return Err(CaptionError::Provider(format!(
            "unsupported image type: {media_type}"
        )));
    }
    Ok((media_type, data))
}

/// Media type from the magic bytes of base64 `data`; PNG when unknown.
fn sniff_media_type(data: &str) -> String {
    // 16 base64 characters decode to the 12 bytes WEBP needs.
    let prefix: String = data
        .chars()
        .filter(|c| c.is_ascii() && !c.is_ascii_whitespace())
        .take(16)
        .collect();
    let usable = prefix.len() - prefix.len() % 4;
    let bytes = STANDARD.decode(&prefix[..usable]).unwrap_or_default();

    let media_type = if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        "image/png"
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "image/jpeg"
    } else if bytes.starts_with(b"GIF8") {
        "image/gif"
    } else if bytes.len() >= 12 && bytes.starts_with(b"RIFF") && &bytes[8..12] == b"WEBP" {
        "image/webp"
    } else {
        "image/png"
    };
    media_type.to_string()
}

fn status_error(status: StatusCode, body: &str) -> CaptionError {
    match status.as_u16() {
        401 | 403 => CaptionError::Provider("authentication failed".to_string()),
        429 => CaptionError::Provider("rate limited".to_string()),
        529 => CaptionError::Provider(format!("provider overloaded: {body}")),
        _ => CaptionError::Provider(format!("HTTP {status}: {body}")),
    }
}

impl Captioner for AnthropicCaptioner {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn caption(
        &self,
        image_base64: &str,
        prompt: &str,
        max_tokens: u32,
    ) -> Result<String, CaptionError> {
        let (media_type, data) = split_image(image_base64)?;
        let body = CaptionRequest {
            model: &self.model,
            max_tokens,
            messages: vec![CaptionMessage {
                role: "user",
                content: vec![
                    ContentPart::Image {
                        source: ImageSource {
                            kind: "base64",
                            media_type: &media_type,
                            data,
                        },
                    },
                    ContentPart::Text { text: prompt },
                ],
            }],
        };

        let response = self
            .client
            .post(self.url("/v1/messages"))
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", Self::API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| CaptionError::Provider(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &error_body));
        }

        let parsed: CaptionResponse = response
            .json()
            .await
            .map_err(|e| CaptionError::Deserialization(format!("failed to parse response: {e}")))?;

        let text = parsed
            .content
            .into_iter()
            .filter_map(|block| match block {
                ResponseBlock::Text { text } => Some(text),
                ResponseBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("");

        tracing::debug!(model = %self.model, chars = text.chars().count(), "caption received");
        Ok(text)
    }
}
