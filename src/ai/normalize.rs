//! Turning raw provider text into the caller-facing result.

use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

use super::AnalysisMode;

static LEADING_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^```(?:json)?[ \t]*\r?\n?").expect("fence pattern is valid"));
static TRAILING_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\r?\n?[ \t]*```$").expect("fence pattern is valid"));

/// Caption shown when no provider could be reached.
pub const OFFLINE_CAPTION: &str = "AI analysis is temporarily unavailable.";
/// Title shown when no provider could be reached.
pub const OFFLINE_TITLE: &str = "Untitled image";

/// Title/description/caption/tags as returned to the frontend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageAnalysis {
    pub title: String,
    pub description: String,
    pub caption: String,
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub fallback: bool,
}

/// Result of a `regenerate_caption` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaptionResult {
    pub caption: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub fallback: bool,
}

/// Everything `/analyze-image` can answer with.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AnalysisResult {
    Analysis(ImageAnalysis),
    Caption(CaptionResult),
    /// Provider JSON passed through untouched.
    Provider(serde_json::Value),
}

impl AnalysisResult {
    /// Static answer used when every provider failed.
    pub fn offline(mode: AnalysisMode) -> Self {
        match mode {
            AnalysisMode::Analyze => Self::Analysis(ImageAnalysis {
                title: OFFLINE_TITLE.to_string(),
                description: OFFLINE_CAPTION.to_string(),
                caption: OFFLINE_CAPTION.to_string(),
                tags: Vec::new(),
                fallback: true,
            }),
            AnalysisMode::RegenerateCaption => Self::Caption(CaptionResult {
                caption: OFFLINE_CAPTION.to_string(),
                fallback: true,
            }),
        }
    }

    pub fn is_fallback(&self) -> bool {
        match self {
            Self::Analysis(a) => a.fallback,
            Self::Caption(c) => c.fallback,
            Self::Provider(_) => false,
        }
    }
}

/// Outcome of [`normalize`].
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    /// Clean result, straight from the provider.
    Ready(AnalysisResult),
    /// Analyze text was not JSON; a synthetic analysis was built from it.
    Degraded {
        result: AnalysisResult,
        parse_error: String,
    },
    /// Nothing left after stripping code fences.
    Empty,
}

/// Strip leading/trailing markdown code fences (```` ``` ```` or ```` ```json ````).
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    let without_leading = LEADING_FENCE.replace(trimmed, "");
    let without_trailing = TRAILING_FENCE.replace(&without_leading, "");
    without_trailing.trim().to_string()
}

/// Clean provider text and shape it for the requested mode.
///
/// Analyze mode trusts any JSON the provider produced; no schema is enforced.
pub fn normalize(text: &str, mode: AnalysisMode) -> Normalized {
    let cleaned = strip_code_fences(text);
    if cleaned.is_empty() {
        return Normalized::Empty;
    }

    match mode {
        AnalysisMode::RegenerateCaption => Normalized::Ready(AnalysisResult::Caption(CaptionResult {
            caption: cleaned,
            fallback: false,
        })),
        AnalysisMode::Analyze => match serde_json::from_str::<serde_json::Value>(&cleaned) {
            Ok(value) => Normalized::Ready(AnalysisResult::Provider(value)),
            Err(e) => Normalized::Degraded {
                result: AnalysisResult::Analysis(degraded_analysis(&cleaned)),
                parse_error: e.to_string(),
            },
        },
    }
}

fn degraded_analysis(text: &str) -> ImageAnalysis {
    // Verbatim up to the first period; `text` is already trimmed at both ends.
    let first_sentence = text.split('.').next().unwrap_or_default();
    ImageAnalysis {
        title: "Image".to_string(),
        description: text.to_string(),
        caption: format!("{first_sentence}."),
        tags: vec!["image".to_string()],
        fallback: false,
    }
}
