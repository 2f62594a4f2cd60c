//! Offline analyst.
//!
//! Recommends the best-scored options without calling a model. Used when no
//! API key is configured and as the fallback when the remote analyst fails.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;

use super::{AiAnalysis, AiProposal, AnalysisRequest, RaceAnalyst};
use crate::types::BetType;

pub const MODEL_NAME: &str = "heuristic";

pub struct HeuristicAnalyst {
    max_proposals: usize,
}

impl HeuristicAnalyst {
    pub fn new(max_proposals: usize) -> Self {
        Self {
            max_proposals: max_proposals.max(1),
        }
    }

    /// Pick proposals: positive-edge options by score, at most one ticket
    /// per bet type first, then fill with the remaining positive options.
    fn pick(&self, request: &AnalysisRequest<'_>) -> Vec<AiProposal> {
        let positive: Vec<_> = request.top_options.iter().filter(|o| o.edge > 0.0).collect();
        let mut picked = Vec::new();
        let mut types: HashSet<BetType> = HashSet::new();

        for option in &positive {
            if picked.len() >= self.max_proposals {
                break;
            }
            if types.insert(option.ticket.bet_type) {
                picked.push(*option);
            }
        }
        for option in &positive {
            if picked.len() >= self.max_proposals {
                break;
            }
            if !picked.iter().any(|p| p.id == option.id) {
                picked.push(*option);
            }
        }

        picked
            .into_iter()
            .map(|o| AiProposal {
                ticket: o.ticket.clone(),
                confidence: (0.5 + o.score / 2.0).clamp(0.05, 0.95),
                reason: format!(
                    "{:.1}% to hit at {:.1}x, expected value {:.2}",
                    o.probability * 100.0,
                    o.odds,
                    o.expected_value
                ),
            })
            .collect()
    }

    fn summary(request: &AnalysisRequest<'_>, proposals: usize) -> String {
        let probs = request.probabilities;
        let positive = request.top_options.iter().filter(|o| o.edge > 0.0).count();
        let favourite = probs
            .favourite()
            .map(|(h, p)| {
                let name = request.race.horse(h).map(|x| x.name.as_str()).unwrap_or("?");
                let market = request
                    .odds
                    .implied_win_probabilities()
                    .into_iter()
                    .find(|(m, _)| *m == h)
                    .map(|(_, q)| format!(" against {:.1}% implied by the odds", q * 100.0))
                    .unwrap_or_default();
                format!("Your top pick is #{h} {name} at {:.1}%{market}. ", p * 100.0)
            })
            .unwrap_or_default();

        if positive == 0 {
            format!("{favourite}No ticket on the board beats its price at your estimates.")
        } else {
            format!(
                "{favourite}{positive} ticket(s) show positive expected value; {proposals} recommended at risk ratio {}.",
                request.risk_ratio
            )
        }
    }
}

impl Default for HeuristicAnalyst {
    fn default() -> Self {
        Self::new(5)
    }
}

#[async_trait]
impl RaceAnalyst for HeuristicAnalyst {
    async fn analyze(&self, request: &AnalysisRequest<'_>) -> Result<AiAnalysis> {
        let proposals = self.pick(request);
        Ok(AiAnalysis {
            summary: Self::summary(request, proposals.len()),
            proposals,
            model: MODEL_NAME.to_string(),
            tokens_used: 0,
            generated_at: Utc::now(),
        })
    }

    fn model_name(&self) -> &str {
        MODEL_NAME
    }
}
