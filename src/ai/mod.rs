mod gemini;
mod huggingface;
pub mod normalize;
mod openrouter;

pub use gemini::GeminiProvider;
pub use huggingface::HuggingFaceProvider;
pub use normalize::{AnalysisResult, CaptionResult, ImageAnalysis, Normalized, normalize};
pub use openrouter::OpenRouterProvider;

use reqwest::RequestBuilder;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::payload::ImagePayload;

/// Longest `raw` diagnostic kept on a single [`ProviderErrorRecord`].
pub const MAX_ERROR_RAW_CHARS: usize = 1000;

/// Gemini key header. The key never goes in the query string, so it cannot
/// show up in URLs quoted by transport errors.
pub(crate) const GEMINI_API_KEY_HEADER: &str = "x-goog-api-key";

/// The three vision vendors, in the order the fallback chain tries them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Gemini,
    OpenRouter,
    HuggingFace,
}

impl Provider {
    /// Fixed priority order.
    pub const ALL: [Provider; 3] = [Provider::Gemini, Provider::OpenRouter, Provider::HuggingFace];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::OpenRouter => "openrouter",
            Self::HuggingFace => "huggingface",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the caller wants back for an image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMode {
    /// Title, description, caption and tags.
    #[default]
    Analyze,
    /// A single fresh caption.
    RegenerateCaption,
}

/// Prompt text plus the mode it was built for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub mode: AnalysisMode,
    pub text: String,
}

/// Raw output of the first provider that produced non-empty text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderAttemptResult {
    pub provider: Provider,
    pub model: String,
    /// Uncleaned provider output; see [`normalize`].
    pub text: String,
}

/// One failed model/provider attempt within a single request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderErrorRecord {
    pub provider: Provider,
    pub model: String,
    /// HTTP status, or `0` when no response was received.
    pub status: u16,
    pub raw: String,
}

impl ProviderErrorRecord {
    pub fn new(provider: Provider, model: impl Into<String>, status: u16, raw: impl AsRef<str>) -> Self {
        Self {
            provider,
            model: model.into(),
            status,
            raw: truncate_chars(raw.as_ref(), MAX_ERROR_RAW_CHARS),
        }
    }
}

/// Trait for vision provider adapters.
///
/// Adapters never fail: every transport error, non-2xx response, unreadable
/// body or empty content is pushed onto `errors` and reported as `None`, so the
/// fallback chain sees one uniform "no result" signal.
#[async_trait::async_trait]
pub trait VisionProvider: Send + Sync {
    /// Which vendor this adapter talks to.
    fn provider(&self) -> Provider;

    /// Ask the provider about one image.
    async fn attempt(
        &self,
        payload: &ImagePayload,
        prompt: &Prompt,
        errors: &mut Vec<ProviderErrorRecord>,
    ) -> Option<ProviderAttemptResult>;
}

/// Build the prompt for the given mode.
///
/// The analyze prompt asks for a bare JSON object with `title`,
/// `description`, `caption` and `tags`; the caption prompt asks for one line
/// of plain text.
pub fn build_prompt(mode: AnalysisMode) -> Prompt {
    let text = match mode {
        AnalysisMode::Analyze => r#"Analyze this image and return a JSON object with the following fields:

{
  "title": "A short, descriptive title for this image (max 60 characters)",
  "description": "One or two sentences describing the scene, subject, mood and colors",
  "caption": "A single engaging caption suitable for sharing the image",
  "tags": ["tag1", "tag2", "tag3", "tag4", "tag5"]
}

Rules:
- "tags": 5-10 lowercase keywords relevant to the image.
- Do not invent people's names or locations you cannot see.

Return ONLY the JSON object, no markdown formatting, no code blocks, no extra text."#,
        AnalysisMode::RegenerateCaption => {
            "Write one fresh, engaging caption for this image. Return only the caption text, with no quotes, labels or markdown."
        }
    };

    Prompt {
        mode,
        text: text.to_string(),
    }
}

/// Truncate to at most `max` characters without splitting a code point.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

/// Why a provider request produced no usable JSON body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RequestFailure {
    pub status: u16,
    pub raw: String,
}

impl RequestFailure {
    pub(crate) fn into_record(self, provider: Provider, model: &str) -> ProviderErrorRecord {
        ProviderErrorRecord::new(provider, model, self.status, self.raw)
    }
}

/// Send a request and decode a successful JSON body.
pub(crate) async fn fetch_json(request: RequestBuilder) -> Result<serde_json::Value, RequestFailure> {
    let resp = request.send().await.map_err(|e| RequestFailure {
        status: e.status().map(|s| s.as_u16()).unwrap_or(0),
        raw: format!("request failed: {}", e.without_url()),
    })?;

    let status = resp.status();
    let text = resp.text().await.map_err(|e| RequestFailure {
        status: status.as_u16(),
        raw: format!("failed to read response body: {}", e.without_url()),
    })?;

    if !status.is_success() {
        return Err(RequestFailure {
            status: status.as_u16(),
            raw: text,
        });
    }

    serde_json::from_str(&text).map_err(|e| RequestFailure {
        status: status.as_u16(),
        raw: format!("invalid JSON ({e}): {text}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── build_prompt ─────────────────────────────────────────────────

    #[test]
    fn analyze_prompt_asks_for_json_fields() {
        let prompt = build_prompt(AnalysisMode::Analyze);
        assert_eq!(prompt.mode, AnalysisMode::Analyze);
        for field in ["title", "description", "caption", "tags", "JSON"] {
            assert!(prompt.text.contains(field), "missing {field}");
        }
    }

    #[test]
    fn caption_prompt_is_plain_text() {
        let prompt = build_prompt(AnalysisMode::RegenerateCaption);
        assert!(prompt.text.contains("caption"));
        assert!(!prompt.text.contains("\"tags\""));
    }

    // ── AnalysisMode / Provider serde ────────────────────────────────

    #[test]
    fn mode_wire_names() {
        let mode: AnalysisMode = serde_json::from_str(r#""regenerate_caption""#).unwrap();
        assert_eq!(mode, AnalysisMode::RegenerateCaption);
        let mode: AnalysisMode = serde_json::from_str(r#""analyze""#).unwrap();
        assert_eq!(mode, AnalysisMode::Analyze);
        assert_eq!(AnalysisMode::default(), AnalysisMode::Analyze);
    }

    #[test]
    fn provider_wire_names() {
        assert_eq!(serde_json::to_string(&Provider::OpenRouter).unwrap(), r#""openrouter""#);
        assert_eq!(serde_json::to_string(&Provider::HuggingFace).unwrap(), r#""huggingface""#);
        assert_eq!(Provider::Gemini.to_string(), "gemini");
    }

    // ── truncate_chars ───────────────────────────────────────────────

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("", 3), "");
    }

    #[test]
    fn error_record_raw_is_bounded() {
        let record = ProviderErrorRecord::new(Provider::Gemini, "m", 500, "x".repeat(5000));
        assert_eq!(record.raw.chars().count(), MAX_ERROR_RAW_CHARS);
    }
}
