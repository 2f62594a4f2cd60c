//! AI race analysis.
//!
//! Defines the `RaceAnalyst` trait, a Gemini implementation, and an offline
//! heuristic used when no API key is configured.

pub mod gemini;
pub mod heuristic;
pub mod prompt;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::strategy::evaluation::BetOption;
use crate::strategy::probability::NormalizedProbabilities;
use crate::types::{OddsBoard, Race, RiskRatio, Ticket};

/// Everything an analyst sees about one race.
#[derive(Debug, Clone, Copy)]
pub struct AnalysisRequest<'a> {
    pub race: &'a Race,
    pub odds: &'a OddsBoard,
    pub probabilities: &'a NormalizedProbabilities,
    pub budget: Decimal,
    pub risk_ratio: RiskRatio,
    /// Best-scored options, for context.
    pub top_options: &'a [BetOption],
}

/// A ticket the analyst recommends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiProposal {
    pub ticket: Ticket,
    /// 0..=1.
    pub confidence: f64,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiAnalysis {
    pub summary: String,
    pub proposals: Vec<AiProposal>,
    pub model: String,
    #[serde(default)]
    pub tokens_used: u32,
    pub generated_at: DateTime<Utc>,
}

/// Abstraction over race analysts.
///
/// Implementors read the race, odds and the user's normalized estimates and
/// return a short commentary plus recommended tickets.
#[async_trait]
pub trait RaceAnalyst: Send + Sync {
    async fn analyze(&self, request: &AnalysisRequest<'_>) -> Result<AiAnalysis>;

    /// Model identifier string.
    fn model_name(&self) -> &str;
}
