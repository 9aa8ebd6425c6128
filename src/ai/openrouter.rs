use reqwest::Client;
use serde_json::{Value, json};

use super::{Prompt, Provider, ProviderAttemptResult, ProviderErrorRecord, VisionProvider, fetch_json};
use crate::payload::ImagePayload;

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

const SYSTEM_PROMPT: &str = "You are an image analysis assistant for a photo library. Follow the user's output format exactly. When JSON is requested, respond with valid JSON only: no markdown, no code blocks, no extra text.";

/// OpenRouter chat-completions adapter. One call, one model.
pub struct OpenRouterProvider {
    api_key: String,
    model: String,
    base_url: String,
    app_title: Option<String>,
    client: Client,
}

impl OpenRouterProvider {
    pub fn new(client: Client, api_key: String, model: String) -> Self {
        Self {
            api_key,
            model,
            base_url: DEFAULT_BASE_URL.to_string(),
            app_title: None,
            client,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_app_title(mut self, title: impl Into<String>) -> Self {
        let title = title.into();
        self.app_title = (!title.trim().is_empty()).then_some(title);
        self
    }
}

#[async_trait::async_trait]
impl VisionProvider for OpenRouterProvider {
    fn provider(&self) -> Provider {
        Provider::OpenRouter
    }

    async fn attempt(
        &self,
        payload: &ImagePayload,
        prompt: &Prompt,
        errors: &mut Vec<ProviderErrorRecord>,
    ) -> Option<ProviderAttemptResult> {
        let body = json!({
            "model": self.model,
            "messages": [
                {
                    "role": "system",
                    "content": SYSTEM_PROMPT
                },
                {
                    "role": "user",
                    "content": [
                        {
                            "type": "text",
                            "text": prompt.text
                        },
                        {
                            "type": "image_url",
                            "image_url": {
                                "url": payload.to_data_uri()
                            }
                        }
                    ]
                }
            ],
            "max_tokens": 1000
        });

        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body);
        if let Some(title) = &self.app_title {
            request = request.header("X-Title", title);
        }

        let json = match fetch_json(request).await {
            Ok(json) => json,
            Err(failure) => {
                log::warn!("OpenRouter {} failed ({}): {}", self.model, failure.status, failure.raw);
                errors.push(failure.into_record(Provider::OpenRouter, &self.model));
                return None;
            }
        };

        let text = message_text(&json["choices"][0]["message"]["content"]);
        if text.is_empty() {
            log::warn!("OpenRouter {} returned no content", self.model);
            errors.push(ProviderErrorRecord::new(
                Provider::OpenRouter,
                self.model.as_str(),
                200,
                format!("empty response: {json}"),
            ));
            return None;
        }

        Some(ProviderAttemptResult {
            provider: Provider::OpenRouter,
            model: self.model.clone(),
            text,
        })
    }
}

/// Flatten chat message content.
///
/// A string is trimmed; an array has its string parts and `{text}` parts
/// joined with newlines. Anything else is empty.
fn message_text(content: &Value) -> String {
    match content {
        Value::String(text) => text.trim().to_string(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|part| match part {
                Value::String(text) => Some(text.as_str()),
                Value::Object(obj) => obj.get("text").and_then(Value::as_str),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_content_is_trimmed() {
        assert_eq!(message_text(&json!("  A dog on a beach.\n")), "A dog on a beach.");
    }

    #[test]
    fn array_content_joins_text_parts() {
        let content = json!([
            { "type": "text", "text": "first" },
            "second",
            { "type": "image_url", "image_url": { "url": "x" } },
            42,
            { "type": "text", "text": "third " }
        ]);
        assert_eq!(message_text(&content), "first\nsecond\nthird");
    }

    #[test]
    fn null_or_empty_content_is_empty() {
        assert_eq!(message_text(&Value::Null), "");
        assert_eq!(message_text(&json!([])), "");
        assert_eq!(message_text(&json!("   ")), "");
    }
}
