use reqwest::Client;
use serde_json::{Value, json};

use super::{
    GEMINI_API_KEY_HEADER, Prompt, Provider, ProviderAttemptResult, ProviderErrorRecord, VisionProvider, fetch_json,
};
use crate::payload::ImagePayload;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Google Gemini adapter.
///
/// Walks its model list in order and returns on the first model that yields
/// text; a failed or empty model is recorded and the next one is tried.
pub struct GeminiProvider {
    api_key: String,
    models: Vec<String>,
    base_url: String,
    client: Client,
}

impl GeminiProvider {
    pub fn new(client: Client, api_key: String, models: Vec<String>) -> Self {
        Self {
            api_key,
            models,
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
impl VisionProvider for GeminiProvider {
    fn provider(&self) -> Provider {
        Provider::Gemini
    }

    async fn attempt(
        &self,
        payload: &ImagePayload,
        prompt: &Prompt,
        errors: &mut Vec<ProviderErrorRecord>,
    ) -> Option<ProviderAttemptResult> {
        let body = json!({
            "contents": [
                {
                    "parts": [
                        { "text": prompt.text },
                        {
                            "inline_data": {
                                "mime_type": payload.mime_type,
                                "data": payload.data
                            }
                        }
                    ]
                }
            ],
            "generationConfig": {
                "maxOutputTokens": 1000
            }
        });

        for model in &self.models {
            let url = format!("{}/v1beta/models/{}:generateContent", self.base_url, model);
            log::debug!("Gemini: trying model {model}");

            let request = self
                .client
                .post(&url)
                .header(GEMINI_API_KEY_HEADER, &self.api_key)
                .json(&body);

            let json = match fetch_json(request).await {
                Ok(json) => json,
                Err(failure) => {
                    log::warn!("Gemini {model} failed ({}): {}", failure.status, failure.raw);
                    errors.push(failure.into_record(Provider::Gemini, model));
                    continue;
                }
            };

            let text = candidate_text(&json);
            if text.is_empty() {
                log::warn!("Gemini {model} returned no text");
                errors.push(ProviderErrorRecord::new(
                    Provider::Gemini,
                    model.as_str(),
                    200,
                    format!("empty response: {json}"),
                ));
                continue;
            }

            return Some(ProviderAttemptResult {
                provider: Provider::Gemini,
                model: model.clone(),
                text,
            });
        }

        None
    }
}

/// Concatenated text of every part of the first candidate, trimmed.
fn candidate_text(json: &Value) -> String {
    json["candidates"][0]["content"]["parts"]
        .as_array()
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part["text"].as_str())
                .collect::<String>()
        })
        .unwrap_or_default()
        .trim()
        .to_string()
}
