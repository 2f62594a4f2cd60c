//! Google Gemini integration.
//!
//! Implements `RaceAnalyst` over the `generateContent` endpoint. Handles
//! request construction, JSON response mode, token tracking and retry with
//! exponential backoff on rate limits and server errors.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::prompt::{build_prompt, parse_analysis, SYSTEM_PROMPT};
use super::{AiAnalysis, AnalysisRequest, RaceAnalyst};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";
const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 2048;
const DEFAULT_TEMPERATURE: f32 = 0.4;

/// Maximum retries on rate limit / server errors.
const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff (ms).
const BASE_BACKOFF_MS: u64 = 1000;

// ---------------------------------------------------------------------------
// API types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    system_instruction: Content,
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
    response_mime_type: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Content,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    total_token_count: u32,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct GeminiClient {
    http: Client,
    api_key: SecretString,
    base_url: String,
    model: String,
    max_output_tokens: u32,
    temperature: f32,
    backoff_ms: u64,
    total_tokens: AtomicU64,
    total_calls: AtomicU64,
}

impl GeminiClient {
    pub fn new(api_key: SecretString, model: Option<String>, max_output_tokens: Option<u32>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(90))
            .build()
            .context("Failed to build Gemini HTTP client")?;

        Ok(Self {
            http,
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            max_output_tokens: max_output_tokens.unwrap_or(DEFAULT_MAX_OUTPUT_TOKENS),
            temperature: DEFAULT_TEMPERATURE,
            backoff_ms: BASE_BACKOFF_MS,
            total_tokens: AtomicU64::new(0),
            total_calls: AtomicU64::new(0),
        })
    }

    /// Point the client at another endpoint (proxies, tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_backoff_ms(mut self, backoff_ms: u64) -> Self {
        self.backoff_ms = backoff_ms;
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }

    /// Send a generateContent request with retry + backoff.
    async fn call_api(&self, system: &str, user_message: &str) -> Result<(String, u32)> {
        let request = GenerateRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part {
                    text: Some(system.to_string()),
                }],
            },
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: Some(user_message.to_string()),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_output_tokens,
                response_mime_type: "application/json",
            },
        };

        let url = self.endpoint();
        let mut last_error = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let delay = self.backoff_ms * 2u64.pow(attempt - 1);
                debug!(attempt, delay_ms = delay, "Retrying Gemini API call");
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            let resp = self
                .http
                .post(&url)
                .header("x-goog-api-key", self.api_key.expose_secret())
                .json(&request)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let body: GenerateResponse = response
                            .json()
                            .await
                            .context("Failed to parse Gemini response")?;

                        let candidate = body
                            .candidates
                            .into_iter()
                            .next()
                            .context("Gemini returned no candidates")?;
                        if let Some(reason) = candidate.finish_reason.as_deref() {
                            if reason != "STOP" {
                                warn!(finish_reason = reason, "Gemini response did not finish cleanly");
                            }
                        }

                        let text = candidate
                            .content
                            .parts
                            .iter()
                            .filter_map(|p| p.text.as_deref())
                            .collect::<Vec<_>>()
                            .join("");
                        let tokens = body.usage_metadata.map(|u| u.total_token_count).unwrap_or(0);

                        self.total_tokens.fetch_add(u64::from(tokens), Ordering::Relaxed);
                        self.total_calls.fetch_add(1, Ordering::Relaxed);

                        return Ok((text, tokens));
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let error_text = response.text().await.unwrap_or_default();
                        warn!(status = %status, attempt, error = %error_text, "Retryable Gemini API error");
                        last_error = Some(format!("HTTP {status}: {error_text}"));
                        continue;
                    }

                    let error_text = response.text().await.unwrap_or_default();
                    anyhow::bail!("Gemini API error {status}: {error_text}");
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Gemini request failed");
                    last_error = Some(format!("Request error: {e}"));
                    continue;
                }
            }
        }

        anyhow::bail!(
            "Gemini API failed after {} retries: {}",
            MAX_RETRIES,
            last_error.unwrap_or_default()
        )
    }

    /// Total tokens reported across all calls.
    pub fn total_tokens(&self) -> u64 {
        self.total_tokens.load(Ordering::Relaxed)
    }

    /// Total number of successful API calls.
    pub fn total_calls(&self) -> u64 {
        self.total_calls.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// RaceAnalyst implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl RaceAnalyst for GeminiClient {
    async fn analyze(&self, request: &AnalysisRequest<'_>) -> Result<AiAnalysis> {
        let user_msg = build_prompt(request);

        debug!(
            race_id = %request.race.id,
            model = %self.model,
            prompt_chars = user_msg.len(),
            "Requesting race analysis"
        );

        let (text, tokens) = self
            .call_api(SYSTEM_PROMPT, &user_msg)
            .await
            .context("Gemini API call failed")?;

        let (summary, proposals) =
            parse_analysis(&text, request.race).context("Failed to parse Gemini analysis")?;

        info!(
            race_id = %request.race.id,
            proposals = proposals.len(),
            tokens,
            model = %self.model,
            "Analysis complete"
        );

        Ok(AiAnalysis {
            summary,
            proposals,
            model: self.model.clone(),
            tokens_used: tokens,
            generated_at: Utc::now(),
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::probability::normalize;
    use crate::strategy::tests::{sample_board, sample_inputs};
    use crate::types::{Race, RiskRatio};
    use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
    use rust_decimal_macros::dec;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn key() -> SecretString {
        SecretString::new("test-key".to_string())
    }

    /// Serve `generateContent` locally, failing the first `failures` calls.
    async fn mock_server(failures: usize, reply: serde_json::Value) -> (String, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let state = (hits.clone(), failures, reply);
        let app = Router::new()
            .route(
                "/models/:model",
                post(
                    |State((hits, failures, reply)): State<(Arc<AtomicUsize>, usize, serde_json::Value)>| async move {
                        let n = hits.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                        if n < failures {
                            (StatusCode::SERVICE_UNAVAILABLE, Json(serde_json::json!({"error": "busy"})))
                        } else {
                            (StatusCode::OK, Json(reply))
                        }
                    },
                ),
            )
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), hits)
    }

    fn reply_with(text: &str) -> serde_json::Value {
        serde_json::json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": text}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 300, "candidatesTokenCount": 120, "totalTokenCount": 420}
        })
    }

    #[test]
    fn test_request_serializes_camel_case() {
        let req = GenerateRequest {
            system_instruction: Content {
                role: None,
                parts: vec![Part { text: Some("sys".into()) }],
            },
            contents: vec![],
            generation_config: GenerationConfig {
                temperature: 0.4,
                max_output_tokens: 100,
                response_mime_type: "application/json",
            },
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("systemInstruction"));
        assert!(json.contains("maxOutputTokens"));
        assert!(json.contains("responseMimeType"));
        assert!(!json.contains("\"role\":null"));
    }

    #[test]
    fn test_endpoint() {
        let client = GeminiClient::new(key(), None, None)
            .unwrap()
            .with_base_url("http://localhost:9999/");
        assert_eq!(
            client.endpoint(),
            format!("http://localhost:9999/models/{DEFAULT_MODEL}:generateContent")
        );
        assert_eq!(client.model_name(), DEFAULT_MODEL);
    }

    #[tokio::test]
    async fn test_analyze_retries_then_succeeds() {
        let text = r#"{"summary": "Back the favourite", "proposals": [{"bet_type": "win", "horses": [1], "confidence": 0.7, "reason": "Best form"}]}"#;
        let (base, hits) = mock_server(1, reply_with(text)).await;
        let client = GeminiClient::new(key(), None, None)
            .unwrap()
            .with_base_url(base)
            .with_backoff_ms(5);

        let race = Race::sample(8);
        let odds = sample_board(&race);
        let probs = normalize(&sample_inputs(), &race).unwrap();
        let request = AnalysisRequest {
            race: &race,
            odds: &odds,
            probabilities: &probs,
            budget: dec!(3000),
            risk_ratio: RiskRatio::default(),
            top_options: &[],
        };

        let analysis = client.analyze(&request).await.unwrap();
        assert_eq!(analysis.summary, "Back the favourite");
        assert_eq!(analysis.proposals.len(), 1);
        assert_eq!(analysis.tokens_used, 420);
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert_eq!(client.total_calls(), 1);
        assert_eq!(client.total_tokens(), 420);
    }

    #[tokio::test]
    async fn test_analyze_gives_up_after_retries() {
        let (base, hits) = mock_server(usize::MAX, reply_with("{}")).await;
        let client = GeminiClient::new(key(), None, None)
            .unwrap()
            .with_base_url(base)
            .with_backoff_ms(1);

        let race = Race::sample(5);
        let odds = sample_board(&race);
        let probs = normalize(&[], &race).unwrap();
        let request = AnalysisRequest {
            race: &race,
            odds: &odds,
            probabilities: &probs,
            budget: dec!(1000),
            risk_ratio: RiskRatio::default(),
            top_options: &[],
        };

        let err = client.analyze(&request).await.unwrap_err();
        assert!(format!("{err:#}").contains("retries"));
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), MAX_RETRIES as usize + 1);
        assert_eq!(client.total_calls(), 0);
    }
}
