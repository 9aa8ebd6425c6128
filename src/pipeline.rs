use reqwest::Client;
use thiserror::Error;

use crate::ai::{
    self, AnalysisMode, AnalysisResult, GeminiProvider, HuggingFaceProvider, Normalized,
    OpenRouterProvider, Prompt, Provider, ProviderAttemptResult, ProviderErrorRecord,
    VisionProvider,
};
use crate::config::{Config, ProviderKeys};
use crate::payload::{self, ImagePayload};
use crate::store::{AiLogStore, LogKind, NewAiLog};

/// Status recorded on the log row when no provider ever answered.
const EXHAUSTED_STATUS: u16 = 503;

/// One `/analyze-image` call.
#[derive(Debug, Clone)]
pub struct AnalyzeRequest {
    /// Data URI or bare base64.
    pub image: String,
    pub mode: AnalysisMode,
    /// Owner of the resulting log rows, if the caller is authenticated.
    pub user_id: Option<i64>,
}

/// What the fallback chain produced for one request.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub result: Option<ProviderAttemptResult>,
    /// Every failed attempt, in the order it happened.
    pub errors: Vec<ProviderErrorRecord>,
}

/// The answer to an analysis request plus where it came from.
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub result: AnalysisResult,
    /// `None` when the offline payload was served.
    pub provider: Option<Provider>,
    pub model: Option<String>,
}

#[derive(Debug, Error)]
pub enum AnalyzeError {
    #[error("Invalid image data")]
    InvalidImage,
    #[error("AI provider {provider} ({model}) returned an empty response")]
    EmptyResponse { provider: Provider, model: String },
}

/// Build the provider chain for one request.
///
/// Order is fixed: Gemini, OpenRouter, HuggingFace. A provider without a
/// resolved key is left out entirely, so it is never contacted and never
/// produces an error record.
///
/// # Example
///
/// ```rust,no_run
/// use image_muse::config::{Config, ProviderKeys};
/// use image_muse::pipeline::build_provider_chain;
///
/// let config = Config::default();
/// let keys = ProviderKeys::resolve(|_| None, &config);
/// let chain = build_provider_chain(&config, &keys, &reqwest::Client::new());
/// assert!(chain.is_empty());
/// ```
pub fn build_provider_chain(
    config: &Config,
    keys: &ProviderKeys,
    client: &Client,
) -> Vec<Box<dyn VisionProvider>> {
    let mut chain: Vec<Box<dyn VisionProvider>> = Vec::new();
    let providers = &config.providers;

    if let Some(key) = &keys.gemini {
        if providers.gemini.models.is_empty() {
            log::warn!("Gemini key configured but no models listed");
        } else {
            chain.push(Box::new(
                GeminiProvider::new(client.clone(), key.clone(), providers.gemini.models.clone())
                    .with_base_url(&providers.gemini.base_url),
            ));
        }
    }
    if let Some(key) = &keys.openrouter {
        chain.push(Box::new(
            OpenRouterProvider::new(client.clone(), key.clone(), providers.openrouter.model.clone())
                .with_base_url(&providers.openrouter.base_url)
                .with_app_title(&providers.openrouter.app_title),
        ));
    }
    if let Some(key) = &keys.huggingface {
        chain.push(Box::new(
            HuggingFaceProvider::new(client.clone(), key.clone(), providers.huggingface.model.clone())
                .with_base_url(&providers.huggingface.inference_base_url),
        ));
    }

    chain
}

/// Try each provider in order and stop at the first one that answers.
///
/// Providers run one after another, never concurrently. The same call is never
/// retried; "retry" only means moving on to the next model or provider.
pub async fn resolve(
    chain: &[Box<dyn VisionProvider>],
    payload: &ImagePayload,
    prompt: &Prompt,
) -> Resolution {
    let mut errors = Vec::new();

    for provider in chain {
        log::info!("Trying {}...", provider.provider());
        if let Some(result) = provider.attempt(payload, prompt, &mut errors).await {
            log::info!("{} ({}) succeeded", result.provider, result.model);
            return Resolution {
                result: Some(result),
                errors,
            };
        }
    }

    if chain.is_empty() {
        log::warn!("No AI providers configured");
    } else {
        log::warn!("All {} AI providers failed", chain.len());
    }

    Resolution {
        result: None,
        errors,
    }
}

/// Analyze one image end to end.
///
/// Parse the payload, run the fallback chain, normalize the text, and write a
/// diagnostic log row for every fallback or degraded answer. The caller always
/// gets a usable result unless the image is unusable or a provider returned
/// text that was empty after cleaning.
pub async fn analyze_image(
    chain: &[Box<dyn VisionProvider>],
    logs: &dyn AiLogStore,
    request: AnalyzeRequest,
) -> Result<AnalysisOutcome, AnalyzeError> {
    let payload = payload::parse(&request.image);
    if payload.is_empty() {
        return Err(AnalyzeError::InvalidImage);
    }

    let prompt = ai::build_prompt(request.mode);
    let resolution = resolve(chain, &payload, &prompt).await;

    let Some(attempt) = resolution.result else {
        let status = resolution
            .errors
            .last()
            .map(|e| e.status)
            .filter(|&s| s != 0)
            .unwrap_or(EXHAUSTED_STATUS);
        let message = if chain.is_empty() {
            "No AI providers configured; served offline fallback".to_string()
        } else {
            format!(
                "All AI providers failed ({} attempts); served offline fallback",
                resolution.errors.len()
            )
        };
        let raw = serde_json::to_string(&resolution.errors).unwrap_or_default();
        record_diagnostic(
            logs,
            NewAiLog::new(request.user_id, LogKind::AnalyzeFallback, status, message, raw),
        )
        .await;

        return Ok(AnalysisOutcome {
            result: AnalysisResult::offline(request.mode),
            provider: None,
            model: None,
        });
    };

    match ai::normalize(&attempt.text, request.mode) {
        Normalized::Ready(result) => Ok(AnalysisOutcome {
            result,
            provider: Some(attempt.provider),
            model: Some(attempt.model),
        }),
        Normalized::Degraded {
            result,
            parse_error,
        } => {
            log::warn!(
                "{} ({}) returned non-JSON analysis: {parse_error}",
                attempt.provider,
                attempt.model
            );
            record_diagnostic(
                logs,
                NewAiLog::new(
                    request.user_id,
                    LogKind::ParseFallback,
                    200,
                    format!(
                        "{} ({}) returned non-JSON analysis: {parse_error}",
                        attempt.provider, attempt.model
                    ),
                    &attempt.text,
                ),
            )
            .await;
            Ok(AnalysisOutcome {
                result,
                provider: Some(attempt.provider),
                model: Some(attempt.model),
            })
        }
        Normalized::Empty => {
            let err = AnalyzeError::EmptyResponse {
                provider: attempt.provider,
                model: attempt.model,
            };
            log::error!("{err}");
            record_diagnostic(
                logs,
                NewAiLog::new(
                    request.user_id,
                    LogKind::EmptyResponse,
                    502,
                    err.to_string(),
                    &attempt.text,
                ),
            )
            .await;
            Err(err)
        }
    }
}

/// Write a log row; a failing store never fails the request.
async fn record_diagnostic(logs: &dyn AiLogStore, entry: NewAiLog) {
    let kind = entry.kind;
    if let Err(e) = logs.record(entry).await {
        log::warn!("Failed to write {} diagnostic log: {e:#}", kind.as_str());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{AiLog, MemoryAiLogStore};
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Provider double that either answers with fixed text or fails.
    struct FakeProvider {
        provider: Provider,
        reply: Option<&'static str>,
        calls: Arc<AtomicUsize>,
    }

    impl FakeProvider {
        fn boxed(provider: Provider, reply: Option<&'static str>) -> (Box<dyn VisionProvider>, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            let fake = FakeProvider {
                provider,
                reply,
                calls: calls.clone(),
            };
            (Box::new(fake), calls)
        }
    }

    #[async_trait::async_trait]
    impl VisionProvider for FakeProvider {
        fn provider(&self) -> Provider {
            self.provider
        }

        async fn attempt(
            &self,
            _payload: &ImagePayload,
            _prompt: &Prompt,
            errors: &mut Vec<ProviderErrorRecord>,
        ) -> Option<ProviderAttemptResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.reply {
                Some(text) => Some(ProviderAttemptResult {
                    provider: self.provider,
                    model: format!("{}-model", self.provider),
                    text: text.to_string(),
                }),
                None => {
                    errors.push(ProviderErrorRecord::new(self.provider, "fake", 500, "boom"));
                    None
                }
            }
        }
    }

    /// Store whose writes always fail.
    struct BrokenStore;

    #[async_trait::async_trait]
    impl AiLogStore for BrokenStore {
        async fn record(&self, _entry: NewAiLog) -> anyhow::Result<()> {
            anyhow::bail!("disk full")
        }

        async fn recent(&self, _limit: u32) -> anyhow::Result<Vec<AiLog>> {
            Ok(Vec::new())
        }
    }

    fn request(mode: AnalysisMode) -> AnalyzeRequest {
        AnalyzeRequest {
            image: "data:image/png;base64,iVBORw0KGgo=".to_string(),
            mode,
            user_id: Some(42),
        }
    }

    const GOOD_JSON: &str = r#"{"title":"T","description":"D","caption":"C","tags":["a"]}"#;

    // ── resolve ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn first_provider_wins_and_others_are_not_called() {
        let (gemini, gemini_calls) = FakeProvider::boxed(Provider::Gemini, Some("gemini says"));
        let (openrouter, or_calls) = FakeProvider::boxed(Provider::OpenRouter, Some("or says"));
        let (hf, hf_calls) = FakeProvider::boxed(Provider::HuggingFace, Some("hf says"));
        let chain = vec![gemini, openrouter, hf];

        let payload = payload::parse("AAAA");
        let resolution = resolve(&chain, &payload, &ai::build_prompt(AnalysisMode::Analyze)).await;

        assert_eq!(resolution.result.unwrap().text, "gemini says");
        assert!(resolution.errors.is_empty());
        assert_eq!(gemini_calls.load(Ordering::SeqCst), 1);
        assert_eq!(or_calls.load(Ordering::SeqCst), 0);
        assert_eq!(hf_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn falls_through_to_next_provider_in_order() {
        let (gemini, _) = FakeProvider::boxed(Provider::Gemini, None);
        let (openrouter, or_calls) = FakeProvider::boxed(Provider::OpenRouter, Some("or says"));
        let (hf, hf_calls) = FakeProvider::boxed(Provider::HuggingFace, Some("hf says"));
        let chain = vec![gemini, openrouter, hf];

        let payload = payload::parse("AAAA");
        let resolution = resolve(&chain, &payload, &ai::build_prompt(AnalysisMode::Analyze)).await;

        let result = resolution.result.unwrap();
        assert_eq!(result.provider, Provider::OpenRouter);
        assert_eq!(result.text, "or says");
        assert_eq!(resolution.errors.len(), 1);
        assert_eq!(resolution.errors[0].provider, Provider::Gemini);
        assert_eq!(or_calls.load(Ordering::SeqCst), 1);
        assert_eq!(hf_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_chain_resolves_to_nothing() {
        let resolution = resolve(&[], &payload::parse("AAAA"), &ai::build_prompt(AnalysisMode::Analyze)).await;
        assert!(resolution.result.is_none());
        assert!(resolution.errors.is_empty());
    }

    // ── analyze_image ────────────────────────────────────────────────

    #[tokio::test]
    async fn empty_image_is_rejected_before_any_provider() {
        let (gemini, calls) = FakeProvider::boxed(Provider::Gemini, Some(GOOD_JSON));
        let chain = vec![gemini];
        let logs = MemoryAiLogStore::new();

        for image in ["", "   ", "data:image/png;base64,"] {
            let req = AnalyzeRequest {
                image: image.to_string(),
                mode: AnalysisMode::Analyze,
                user_id: None,
            };
            let err = analyze_image(&chain, &logs, req).await.unwrap_err();
            assert!(matches!(err, AnalyzeError::InvalidImage));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(logs.is_empty());
    }

    #[tokio::test]
    async fn exhaustion_serves_offline_payload_and_logs() {
        let (gemini, _) = FakeProvider::boxed(Provider::Gemini, None);
        let (openrouter, _) = FakeProvider::boxed(Provider::OpenRouter, None);
        let (hf, _) = FakeProvider::boxed(Provider::HuggingFace, None);
        let chain = vec![gemini, openrouter, hf];
        let logs = MemoryAiLogStore::new();

        let outcome = analyze_image(&chain, &logs, request(AnalysisMode::Analyze)).await.unwrap();
        assert_eq!(outcome.result, AnalysisResult::offline(AnalysisMode::Analyze));
        assert!(outcome.result.is_fallback());
        assert_eq!(outcome.provider, None);

        let rows = logs.recent(10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].kind, "analyze_fallback");
        assert_eq!(rows[0].user_id, Some(42));
        assert_eq!(rows[0].status_code, 500);
        let raw: serde_json::Value = serde_json::from_str(&rows[0].raw).unwrap();
        assert_eq!(raw.as_array().unwrap().len(), 3);
        assert_eq!(raw[0]["provider"], "gemini");
        assert_eq!(raw[2]["provider"], "huggingface");
    }

    #[tokio::test]
    async fn no_providers_serves_caption_fallback() {
        let logs = MemoryAiLogStore::new();
        let outcome = analyze_image(&[], &logs, request(AnalysisMode::RegenerateCaption))
            .await
            .unwrap();
        assert_eq!(outcome.result, AnalysisResult::offline(AnalysisMode::RegenerateCaption));

        let rows = logs.recent(10).await.unwrap();
        assert_eq!(rows[0].status_code, i64::from(EXHAUSTED_STATUS));
        assert_eq!(rows[0].raw, "[]");
    }

    #[tokio::test]
    async fn provider_json_passes_through() {
        let (gemini, _) = FakeProvider::boxed(Provider::Gemini, Some(GOOD_JSON));
        let logs = MemoryAiLogStore::new();

        let outcome = analyze_image(&[gemini], &logs, request(AnalysisMode::Analyze)).await.unwrap();
        assert_eq!(
            serde_json::to_value(&outcome.result).unwrap(),
            json!({"title": "T", "description": "D", "caption": "C", "tags": ["a"]})
        );
        assert_eq!(outcome.provider, Some(Provider::Gemini));
        assert_eq!(outcome.model.as_deref(), Some("gemini-model"));
        assert!(logs.is_empty());
    }

    #[tokio::test]
    async fn prose_is_degraded_and_logged_with_200() {
        let (openrouter, _) =
            FakeProvider::boxed(Provider::OpenRouter, Some("A lovely sunset over the bay. Warm colors."));
        let logs = MemoryAiLogStore::new();

        let outcome = analyze_image(&[openrouter], &logs, request(AnalysisMode::Analyze))
            .await
            .unwrap();
        assert_eq!(
            serde_json::to_value(&outcome.result).unwrap(),
            json!({
                "title": "Image",
                "description": "A lovely sunset over the bay. Warm colors.",
                "caption": "A lovely sunset over the bay.",
                "tags": ["image"]
            })
        );

        let rows = logs.recent(10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].kind, "analyze_parse_fallback");
        assert_eq!(rows[0].status_code, 200);
    }

    #[tokio::test]
    async fn fence_only_text_is_an_empty_response_error() {
        let (gemini, _) = FakeProvider::boxed(Provider::Gemini, Some("```json\n```"));
        let (openrouter, or_calls) = FakeProvider::boxed(Provider::OpenRouter, Some(GOOD_JSON));
        let logs = MemoryAiLogStore::new();

        let err = analyze_image(&[gemini, openrouter], &logs, request(AnalysisMode::Analyze))
            .await
            .unwrap_err();
        assert!(matches!(err, AnalyzeError::EmptyResponse { provider: Provider::Gemini, .. }));
        assert_eq!(or_calls.load(Ordering::SeqCst), 0);
        assert_eq!(logs.recent(1).await.unwrap()[0].kind, "analyze_empty_response");
    }

    #[tokio::test]
    async fn log_write_failure_does_not_fail_request() {
        let outcome = analyze_image(&[], &BrokenStore, request(AnalysisMode::Analyze))
            .await
            .unwrap();
        assert!(outcome.result.is_fallback());
    }

    // ── build_provider_chain ─────────────────────────────────────────

    #[test]
    fn chain_skips_providers_without_keys() {
        let config = Config::default();
        let keys = ProviderKeys {
            gemini: None,
            openrouter: Some("or".into()),
            huggingface: Some("hf".into()),
        };
        let chain = build_provider_chain(&config, &keys, &Client::new());
        let order: Vec<Provider> = chain.iter().map(|p| p.provider()).collect();
        assert_eq!(order, vec![Provider::OpenRouter, Provider::HuggingFace]);
    }

    #[test]
    fn chain_keeps_fixed_order() {
        let config = Config::default();
        let keys = ProviderKeys {
            gemini: Some("g".into()),
            openrouter: Some("or".into()),
            huggingface: Some("hf".into()),
        };
        let chain = build_provider_chain(&config, &keys, &Client::new());
        let order: Vec<Provider> = chain.iter().map(|p| p.provider()).collect();
        assert_eq!(order, Provider::ALL.to_vec());
    }

    #[test]
    fn gemini_without_models_is_skipped() {
        let mut config = Config::default();
        config.providers.gemini.models.clear();
        let keys = ProviderKeys {
            gemini: Some("g".into()),
            ..ProviderKeys::default()
        };
        assert!(build_provider_chain(&config, &keys, &Client::new()).is_empty());
    }
}
