//! # image-muse
//!
//! Backend core of Image Muse: AI-generated titles, descriptions, captions and
//! tags for uploaded images, using vision models from Google Gemini,
//! OpenRouter and HuggingFace with a fixed-order fallback chain.
//!
//! ## Quick Start
//!
//! The server binary wires everything together, but the pieces are usable on
//! their own:
//!
//! ```rust,no_run
//! use image_muse::ai::AnalysisMode;
//! use image_muse::config::{Config, ProviderKeys};
//! use image_muse::pipeline::{analyze_image, build_provider_chain, AnalyzeRequest};
//! use image_muse::store::MemoryAiLogStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = Config::load(Some("config.json".as_ref()))?;
//!     config.apply_env();
//!
//!     // Keys come from request headers in the server; here only from config.
//!     let keys = ProviderKeys::resolve(|_| None, &config);
//!     let chain = build_provider_chain(&config, &keys, &reqwest::Client::new());
//!     let logs = MemoryAiLogStore::new();
//!
//!     let request = AnalyzeRequest {
//!         image: "data:image/jpeg;base64,/9j/4AAQSkZJRg...".to_string(),
//!         mode: AnalysisMode::Analyze,
//!         user_id: None,
//!     };
//!     let outcome = analyze_image(&chain, &logs, request).await?;
//!     println!("{}", serde_json::to_string_pretty(&outcome.result)?);
//!     Ok(())
//! }
//! ```
//!
//! ## Fallback behavior
//!
//! | Situation | Caller sees |
//! |-----------|-------------|
//! | Missing or empty image | `400` |
//! | First provider with text | its result (JSON passed through in analyze mode) |
//! | Non-JSON analyze text | synthetic analysis, logged |
//! | Every provider failed / none configured | offline payload with `fallback: true`, logged |
//! | Provider text empty after removing code fences | `502`, logged |
//!
//! ## Modules
//!
//! - [`ai`]: provider adapters, prompts and response normalization
//! - [`config`]: configuration loading and per-request key resolution
//! - [`health`]: concurrent provider health probe
//! - [`payload`]: data-URI / base64 image parsing
//! - [`pipeline`]: the fallback chain and end-to-end analysis
//! - [`server`]: axum router and handlers
//! - [`store`]: diagnostic log storage

pub mod ai;
pub mod config;
pub mod health;
pub mod payload;
pub mod pipeline;
pub mod server;
pub mod store;
