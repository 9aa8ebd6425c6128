//! `/ai/providers` status probe.
//!
//! Display only: nothing here feeds back into the fallback chain.

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Serialize;
use serde_json::Value;
use std::time::{Duration, Instant};

use crate::ai::{GEMINI_API_KEY_HEADER, Provider, truncate_chars};
use crate::config::{Config, ProviderKeys};

/// Most models reported per provider.
pub const MAX_REPORTED_MODELS: usize = 10;

const MAX_DETAIL_CHARS: usize = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Ok,
    Unauthorized,
    RateLimited,
    ProviderError,
    RequestFailed,
    MissingApiKey,
}

impl HealthStatus {
    /// Map an HTTP status onto a health status.
    pub fn from_http(status: StatusCode) -> Self {
        match status.as_u16() {
            200..=299 => Self::Ok,
            401 | 403 => Self::Unauthorized,
            429 => Self::RateLimited,
            500..=599 => Self::ProviderError,
            _ => Self::RequestFailed,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderHealth {
    pub provider: Provider,
    pub enabled: bool,
    pub status: HealthStatus,
    pub http_status: Option<u16>,
    pub latency_ms: Option<u64>,
    pub models: Vec<String>,
    pub detail: String,
}

impl ProviderHealth {
    fn missing_key(provider: Provider) -> Self {
        Self {
            provider,
            enabled: false,
            status: HealthStatus::MissingApiKey,
            http_status: None,
            latency_ms: None,
            models: Vec::new(),
            detail: "No API key configured".to_string(),
        }
    }
}

/// Probe all three providers concurrently.
///
/// Providers without a key report `missing_api_key` without any network call.
/// Each probe is aborted after `timeouts.provider_check_ms`.
pub async fn check_providers(client: &Client, config: &Config, keys: &ProviderKeys) -> Vec<ProviderHealth> {
    let timeout = Duration::from_millis(config.timeouts.provider_check_ms);

    let (gemini, openrouter, huggingface) = tokio::join!(
        check_gemini(client, config, keys.gemini.as_deref(), timeout),
        check_openrouter(client, config, keys.openrouter.as_deref(), timeout),
        check_huggingface(client, config, keys.huggingface.as_deref(), timeout),
    );

    vec![gemini, openrouter, huggingface]
}

async fn check_gemini(client: &Client, config: &Config, key: Option<&str>, timeout: Duration) -> ProviderHealth {
    let Some(key) = key else {
        return ProviderHealth::missing_key(Provider::Gemini);
    };

    let request = client
        .get(format!(
            "{}/v1beta/models",
            config.providers.gemini.base_url.trim_end_matches('/')
        ))
        .header(GEMINI_API_KEY_HEADER, key);

    probe(Provider::Gemini, request, timeout, |json| {
        let models = json["models"]
            .as_array()
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m["name"].as_str())
                    .map(|name| name.trim_start_matches("models/").to_string())
                    .collect()
            })
            .unwrap_or_default();
        (models, "Gemini API reachable".to_string())
    })
    .await
}

async fn check_openrouter(client: &Client, config: &Config, key: Option<&str>, timeout: Duration) -> ProviderHealth {
    let Some(key) = key else {
        return ProviderHealth::missing_key(Provider::OpenRouter);
    };

    let request = client
        .get(format!(
            "{}/models",
            config.providers.openrouter.base_url.trim_end_matches('/')
        ))
        .bearer_auth(key);

    let configured = config.providers.openrouter.model.clone();
    probe(Provider::OpenRouter, request, timeout, move |json| {
        let models = json["data"]
            .as_array()
            .map(|models| {
                models
                    .iter()
                    .filter_map(|m| m["id"].as_str())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        (models, format!("OpenRouter reachable; using {configured}"))
    })
    .await
}

async fn check_huggingface(client: &Client, config: &Config, key: Option<&str>, timeout: Duration) -> ProviderHealth {
    let Some(key) = key else {
        return ProviderHealth::missing_key(Provider::HuggingFace);
    };

    let request = client
        .get(format!(
            "{}/api/whoami-v2",
            config.providers.huggingface.hub_base_url.trim_end_matches('/')
        ))
        .bearer_auth(key);

    let model = config.providers.huggingface.model.clone();
    probe(Provider::HuggingFace, request, timeout, move |json| {
        let detail = match json["name"].as_str() {
            Some(name) => format!("Authenticated as {name}"),
            None => "Token accepted".to_string(),
        };
        (vec![model], detail)
    })
    .await
}

/// Send one bounded request and classify the outcome.
///
/// `describe` turns a successful JSON body into `(models, detail)`.
async fn probe<F>(provider: Provider, request: RequestBuilder, timeout: Duration, describe: F) -> ProviderHealth
where
    F: FnOnce(&Value) -> (Vec<String>, String),
{
    let started = Instant::now();
    let response = request.timeout(timeout).send().await;
    let latency_ms = Some(started.elapsed().as_millis() as u64);

    let resp = match response {
        Ok(resp) => resp,
        Err(e) => {
            let detail = if e.is_timeout() {
                format!("Timed out after {} ms", timeout.as_millis())
            } else {
                format!("Request failed: {}", e.without_url())
            };
            log::warn!("{provider} health check failed: {detail}");
            return ProviderHealth {
                provider,
                enabled: true,
                status: HealthStatus::RequestFailed,
                http_status: None,
                latency_ms,
                models: Vec::new(),
                detail,
            };
        }
    };

    let http_status = resp.status();
    let status = HealthStatus::from_http(http_status);
    let body = resp.text().await.unwrap_or_default();

    let (models, detail) = if status == HealthStatus::Ok {
        let json = serde_json::from_str::<Value>(&body).unwrap_or(Value::Null);
        let (mut models, detail) = describe(&json);
        models.truncate(MAX_REPORTED_MODELS);
        (models, detail)
    } else {
        log::warn!("{provider} health check returned {http_status}");
        let detail = if body.trim().is_empty() {
            http_status.to_string()
        } else {
            format!("{http_status}: {}", truncate_chars(body.trim(), MAX_DETAIL_CHARS))
        };
        (Vec::new(), detail)
    };

    ProviderHealth {
        provider,
        enabled: true,
        status,
        http_status: Some(http_status.as_u16()),
        latency_ms,
        models,
        detail,
    }
}
