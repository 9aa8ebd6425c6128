use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Request header carrying a per-request Gemini key.
pub const GEMINI_KEY_HEADER: &str = "x-gemini-key";
/// Request header carrying a per-request OpenRouter key.
pub const OPENROUTER_KEY_HEADER: &str = "x-openrouter-key";
/// Request header carrying a per-request HuggingFace key.
pub const HUGGINGFACE_KEY_HEADER: &str = "x-huggingface-key";

/// Top-level configuration for the Image Muse AI service.
///
/// Built once at start-up and shared read-only with the request handlers,
/// the fallback chain and the health checker.
///
/// # Loading
///
/// ```rust,no_run
/// use image_muse::config::Config;
///
/// // From a JSON file, then let environment variables win
/// let mut config = Config::load(Some("config.json".as_ref())).unwrap();
/// config.apply_env();
///
/// // Or use defaults and customize
/// let mut config = Config::default();
/// config.providers.gemini.api_key = "AIza...".into();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listener, database and body-size settings.
    pub server: ServerConfig,
    /// Vision providers, in fixed priority order Gemini → OpenRouter → HuggingFace.
    pub providers: ProvidersConfig,
    /// Outbound request bounds.
    pub timeouts: TimeoutConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub database_path: String,
    /// Maximum accepted request body. Base64 images are large.
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub gemini: GeminiConfig,
    pub openrouter: OpenRouterConfig,
    pub huggingface: HuggingFaceConfig,
}

/// Google Gemini configuration. `models` is tried in order on every request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeminiConfig {
    pub api_key: String,
    pub models: Vec<String>,
    pub base_url: String,
}

/// OpenRouter chat-completions configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenRouterConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    /// Sent as `X-Title` so requests show up under this name in OpenRouter.
    pub app_title: String,
}

/// HuggingFace Inference API (captioning model) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HuggingFaceConfig {
    pub api_key: String,
    pub model: String,
    pub inference_base_url: String,
    /// Hub API, used only by the health check (`whoami-v2`).
    pub hub_base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Hard bound on each `/ai/providers` probe.
    pub provider_check_ms: u64,
    /// Bound on each analysis-path provider call. `None` leaves the client default.
    pub analysis_ms: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:5001".to_string(),
            database_path: "data/image-muse.db".to_string(),
            max_body_bytes: 25 * 1024 * 1024,
        }
    }
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            models: vec![
                "gemini-2.5-flash".to_string(),
                "gemini-2.0-flash".to_string(),
            ],
            base_url: "https://generativelanguage.googleapis.com".to_string(),
        }
    }
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "openai/gpt-4o-mini".to_string(),
            base_url: "https://openrouter.ai/api/v1".to_string(),
            app_title: "Image Muse".to_string(),
        }
    }
}

impl Default for HuggingFaceConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "Salesforce/blip-image-captioning-large".to_string(),
            inference_base_url: "https://api-inference.huggingface.co/models".to_string(),
            hub_base_url: "https://huggingface.co".to_string(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            provider_check_ms: 8000,
            analysis_ms: Some(60_000),
        }
    }
}

impl Config {
    /// Resolve the config file path (same directory as the executable).
    pub fn config_path() -> Result<PathBuf> {
        let exe_path = std::env::current_exe().context("Failed to get executable path")?;
        let exe_dir = exe_path
            .parent()
            .context("Failed to get executable directory")?;
        Ok(exe_dir.join("config.json"))
    }

    /// Load config from the given path, or from the default location.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        if !config_path.exists() {
            log::warn!(
                "Config file not found at {}. Using defaults.",
                config_path.display()
            );
            return Ok(Self::default());
        }

        let contents =
            std::fs::read_to_string(&config_path).context("Failed to read config file")?;
        let config: Config =
            serde_json::from_str(&contents).context("Failed to parse config file")?;
        Ok(config)
    }

    /// Save config to the given path, or to the default location.
    pub fn save(&self, path: Option<&Path>) -> Result<()> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&config_path, contents).context("Failed to write config file")?;
        log::info!("Config saved to {}", config_path.display());
        Ok(())
    }

    /// Overlay values from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|name| std::env::var(name).ok());
    }

    /// Overlay values from an arbitrary variable lookup. Empty values are ignored.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(v) = var("GEMINI_API_KEY") {
            self.providers.gemini.api_key = v;
        }
        if let Some(v) = var("GEMINI_MODELS") {
            let models: Vec<String> = v
                .split(',')
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty())
                .collect();
            if !models.is_empty() {
                self.providers.gemini.models = models;
            }
        }
        if let Some(v) = var("OPENROUTER_API_KEY") {
            self.providers.openrouter.api_key = v;
        }
        if let Some(v) = var("OPENROUTER_MODEL") {
            self.providers.openrouter.model = v;
        }
        if let Some(v) = var("HUGGINGFACE_API_KEY") {
            self.providers.huggingface.api_key = v;
        }
        if let Some(v) = var("HUGGINGFACE_MODEL") {
            self.providers.huggingface.model = v;
        }
        if let Some(v) = var("AI_PROVIDER_TIMEOUT_MS") {
            match v.parse() {
                Ok(ms) => self.timeouts.provider_check_ms = ms,
                Err(_) => log::warn!("Ignoring invalid AI_PROVIDER_TIMEOUT_MS: {v}"),
            }
        }
        if let Some(v) = var("AI_ANALYSIS_TIMEOUT_MS") {
            match v.parse::<u64>() {
                Ok(0) => self.timeouts.analysis_ms = None,
                Ok(ms) => self.timeouts.analysis_ms = Some(ms),
                Err(_) => log::warn!("Ignoring invalid AI_ANALYSIS_TIMEOUT_MS: {v}"),
            }
        }
        if let Some(v) = var("PORT") {
            match v.parse::<u16>() {
                Ok(port) => {
                    let host = self
                        .server
                        .bind
                        .rsplit_once(':')
                        .map(|(host, _)| host.to_string())
                        .unwrap_or_else(|| "0.0.0.0".to_string());
                    self.server.bind = format!("{host}:{port}");
                }
                Err(_) => log::warn!("Ignoring invalid PORT: {v}"),
            }
        }
        if let Some(v) = var("DATABASE_PATH") {
            self.server.database_path = v;
        }
    }

    /// Names of the providers with a configured server-side key, in chain order.
    pub fn enabled_providers(&self) -> Vec<&'static str> {
        let keys = ProviderKeys::resolve(|_| None, self);
        let mut names = Vec::new();
        if keys.gemini.is_some() {
            names.push("gemini");
        }
        if keys.openrouter.is_some() {
            names.push("openrouter");
        }
        if keys.huggingface.is_some() {
            names.push("huggingface");
        }
        names
    }
}

/// API keys resolved for one request.
///
/// A provider is enabled solely by having a non-empty key here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderKeys {
    pub gemini: Option<String>,
    pub openrouter: Option<String>,
    pub huggingface: Option<String>,
}

impl ProviderKeys {
    /// Header value first, then the configured key.
    pub fn resolve(header: impl Fn(&str) -> Option<String>, config: &Config) -> Self {
        let pick = |name: &str, configured: &str| {
            header(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .or_else(|| {
                    let configured = configured.trim();
                    (!configured.is_empty()).then(|| configured.to_string())
                })
        };

        Self {
            gemini: pick(GEMINI_KEY_HEADER, &config.providers.gemini.api_key),
            openrouter: pick(OPENROUTER_KEY_HEADER, &config.providers.openrouter.api_key),
            huggingface: pick(HUGGINGFACE_KEY_HEADER, &config.providers.huggingface.api_key),
        }
    }
}
