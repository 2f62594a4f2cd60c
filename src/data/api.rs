//! REST race-data client.
//!
//! Endpoints (JSON):
//!   GET {base}/races?date=YYYY-MM-DD
//!   GET {base}/races/{id}
//!   GET {base}/races/{id}/odds
//!
//! Retries 429 and 5xx with exponential backoff; 404 maps to a not-found
//! error rather than a transport failure.

use anyhow::Context;
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};

use super::{sort_summaries, RaceDataSource, RaceSummary};
use crate::types::{AdvisorError, OddsBoard, Race};

const SOURCE_NAME: &str = "api";

/// Maximum retries on rate limit / server errors.
const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff (ms).
const BASE_BACKOFF_MS: u64 = 500;

/// Outcome of one GET.
enum Fetch<T> {
    Found(T),
    NotFound,
}

pub struct ApiSource {
    http: Client,
    base_url: String,
    backoff_ms: u64,
}

impl ApiSource {
    pub fn new(base_url: &str, timeout_secs: u64) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(concat!("paddock/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build race API HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            backoff_ms: BASE_BACKOFF_MS,
        })
    }

    pub fn with_backoff_ms(mut self, backoff_ms: u64) -> Self {
        self.backoff_ms = backoff_ms;
        self
    }

    fn race_url(&self, race_id: &str) -> String {
        format!("{}/races/{}", self.base_url, urlencoding::encode(race_id))
    }

    fn error(message: impl Into<String>) -> AdvisorError {
        AdvisorError::DataSource {
            source_name: SOURCE_NAME.to_string(),
            message: message.into(),
        }
    }

    /// GET `url` and decode JSON, with retry + backoff.
    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<Fetch<T>, AdvisorError> {
        let mut last_error = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let delay = self.backoff_ms * 2u64.pow(attempt - 1);
                debug!(attempt, delay_ms = delay, url, "Retrying race API call");
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            match self.http.get(url).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let body = response
                            .json::<T>()
                            .await
                            .map_err(|e| Self::error(format!("Malformed response from {url}: {e}")))?;
                        return Ok(Fetch::Found(body));
                    }
                    if status == StatusCode::NOT_FOUND {
                        return Ok(Fetch::NotFound);
                    }
                    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                        warn!(status = %status, attempt, url, "Retryable race API error");
                        last_error = Some(format!("HTTP {status}"));
                        continue;
                    }
                    let text = response.text().await.unwrap_or_default();
                    return Err(Self::error(format!("HTTP {status} from {url}: {text}")));
                }
                Err(e) => {
                    warn!(attempt, error = %e, url, "Race API request failed");
                    last_error = Some(format!("Request error: {e}"));
                }
            }
        }

        Err(Self::error(format!(
            "{url} failed after {MAX_RETRIES} retries: {}",
            last_error.unwrap_or_default()
        )))
    }
}

#[async_trait]
impl RaceDataSource for ApiSource {
    async fn list_races(&self, date: Option<NaiveDate>) -> Result<Vec<RaceSummary>, AdvisorError> {
        let url = match date {
            Some(date) => format!("{}/races?date={}", self.base_url, date.format("%Y-%m-%d")),
            None => format!("{}/races", self.base_url),
        };
        match self.get_json::<Vec<RaceSummary>>(&url).await? {
            Fetch::Found(mut races) => {
                sort_summaries(&mut races);
                Ok(races)
            }
            Fetch::NotFound => Ok(Vec::new()),
        }
    }

    async fn fetch_race(&self, race_id: &str) -> Result<Race, AdvisorError> {
        match self.get_json::<Race>(&self.race_url(race_id)).await? {
            Fetch::Found(race) => Ok(race),
            Fetch::NotFound => Err(AdvisorError::RaceNotFound(race_id.to_string())),
        }
    }

    async fn fetch_odds(&self, race_id: &str) -> Result<OddsBoard, AdvisorError> {
        let url = format!("{}/odds", self.race_url(race_id));
        match self.get_json::<OddsBoard>(&url).await? {
            Fetch::Found(board) if !board.entries.is_empty() => Ok(board),
            _ => Err(AdvisorError::OddsUnavailable(race_id.to_string())),
        }
    }

    fn name(&self) -> &'static str {
        SOURCE_NAME
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
