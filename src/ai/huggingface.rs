use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use serde_json::{Value, json};

use super::{AnalysisMode, Prompt, Provider, ProviderAttemptResult, ProviderErrorRecord, VisionProvider, fetch_json};
use crate::payload::ImagePayload;

const DEFAULT_BASE_URL: &str = "https://api-inference.huggingface.co/models";

/// Caption payload shapes, most specific first.
const CAPTION_SHAPES: &[fn(&Value) -> Option<String>] = &[
    generated_text_in_array,
    generated_text_in_object,
    string_in_array,
];

/// HuggingFace Inference API adapter for image-captioning models.
///
/// Sends the raw image bytes rather than JSON. The model only captions, so in
/// analyze mode the caption is wrapped into a minimal analysis object.
pub struct HuggingFaceProvider {
    api_key: String,
    model: String,
    base_url: String,
    client: Client,
}

impl HuggingFaceProvider {
    pub fn new(client: Client, api_key: String, model: String) -> Self {
        Self {
            api_key,
            model,
            base_url: DEFAULT_BASE_URL.to_string(),
            client,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[async_trait::async_trait]
impl VisionProvider for HuggingFaceProvider {
    fn provider(&self) -> Provider {
        Provider::HuggingFace
    }

    async fn attempt(
        &self,
        payload: &ImagePayload,
        prompt: &Prompt,
        errors: &mut Vec<ProviderErrorRecord>,
    ) -> Option<ProviderAttemptResult> {
        let bytes = match decode_image(&payload.data) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("HuggingFace: image is not valid base64: {e}");
                errors.push(ProviderErrorRecord::new(
                    Provider::HuggingFace,
                    self.model.as_str(),
                    0,
                    format!("invalid base64 image data: {e}"),
                ));
                return None;
            }
        };

        let request = self
            .client
            .post(format!("{}/{}", self.base_url, self.model))
            .bearer_auth(&self.api_key)
            .header(CONTENT_TYPE, payload.mime_type.as_str())
            .body(bytes);

        let json = match fetch_json(request).await {
            Ok(json) => json,
            Err(failure) => {
                log::warn!("HuggingFace {} failed ({}): {}", self.model, failure.status, failure.raw);
                errors.push(failure.into_record(Provider::HuggingFace, &self.model));
                return None;
            }
        };

        let Some(caption) = extract_caption(&json) else {
            log::warn!("HuggingFace {} returned no caption", self.model);
            errors.push(ProviderErrorRecord::new(
                Provider::HuggingFace,
                self.model.as_str(),
                200,
                format!("empty response: {json}"),
            ));
            return None;
        };

        let text = match prompt.mode {
            AnalysisMode::Analyze => caption_as_analysis(&caption),
            AnalysisMode::RegenerateCaption => caption,
        };

        Some(ProviderAttemptResult {
            provider: Provider::HuggingFace,
            model: self.model.clone(),
            text,
        })
    }
}

fn decode_image(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let compact: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD.decode(compact)
}

/// First non-empty caption across the known response shapes.
fn extract_caption(json: &Value) -> Option<String> {
    CAPTION_SHAPES
        .iter()
        .filter_map(|shape| shape(json))
        .map(|caption| caption.trim().to_string())
        .find(|caption| !caption.is_empty())
}

/// `[{"generated_text": "..."}]`
fn generated_text_in_array(json: &Value) -> Option<String> {
    json.as_array()?
        .iter()
        .find_map(|item| item.get("generated_text")?.as_str())
        .map(str::to_string)
}

/// `{"generated_text": "..."}`
fn generated_text_in_object(json: &Value) -> Option<String> {
    json.as_object()?
        .get("generated_text")?
        .as_str()
        .map(str::to_string)
}

/// `["..."]`
fn string_in_array(json: &Value) -> Option<String> {
    json.as_array()?
        .iter()
        .find_map(Value::as_str)
        .map(str::to_string)
}

fn caption_as_analysis(caption: &str) -> String {
    json!({
        "title": "Image",
        "description": caption,
        "caption": caption,
        "tags": ["image", "caption"]
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caption_from_array_of_objects() {
        let json = json!([{ "generated_text": "a cat sitting on a couch" }]);
        assert_eq!(extract_caption(&json).as_deref(), Some("a cat sitting on a couch"));
    }

    #[test]
    fn caption_from_single_object() {
        let json = json!({ "generated_text": " a red bicycle " });
        assert_eq!(extract_caption(&json).as_deref(), Some("a red bicycle"));
    }

    #[test]
    fn caption_from_array_of_strings() {
        let json = json!(["a mountain lake", "second"]);
        assert_eq!(extract_caption(&json).as_deref(), Some("a mountain lake"));
    }

    #[test]
    fn empty_object_caption_falls_through_to_nothing() {
        assert_eq!(extract_caption(&json!([{ "generated_text": "" }])), None);
        assert_eq!(extract_caption(&json!({ "error": "Model is loading" })), None);
        assert_eq!(extract_caption(&json!([])), None);
    }

    #[test]
    fn analysis_wrapper_is_json() {
        let text = caption_as_analysis("a \"quoted\" dog");
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["title"], "Image");
        assert_eq!(value["caption"], "a \"quoted\" dog");
        assert_eq!(value["description"], "a \"quoted\" dog");
        assert_eq!(value["tags"], json!(["image", "caption"]));
    }

    #[test]
    fn decode_ignores_line_breaks() {
        assert_eq!(decode_image("aGVs\nbG8=").unwrap(), b"hello");
        assert!(decode_image("not base64!").is_err());
    }
}
