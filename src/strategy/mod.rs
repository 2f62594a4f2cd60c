//! Betting strategy: normalization, evaluation, Kelly sizing and
//! portfolio optimization.

pub mod evaluation;
pub mod kelly;
pub mod model;
pub mod portfolio;
pub mod probability;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use crate::llm::AiAnalysis;
use crate::types::{
    round_down_to_unit, AdvisorError, OddsBoard, ProbabilityInput, Race, RiskRatio, MAX_BUDGET, TICKET_UNIT,
};
use evaluation::{enumerate_options, evaluate, sort_options, BetOption, EvaluationConfig, OptionSource};
use kelly::KellyCalculator;
use model::FinishModel;
use portfolio::{optimize, Portfolio, PortfolioConfig};
use probability::{normalize, NormalizedProbabilities};

// ---------------------------------------------------------------------------
// Analysis result
// ---------------------------------------------------------------------------

/// Outcome of analysing one race for one set of user inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub race_id: String,
    pub probabilities: NormalizedProbabilities,
    /// Best first.
    pub options: Vec<BetOption>,
    #[serde(default)]
    pub ai: Option<AiAnalysis>,
    pub budget: Decimal,
    pub risk_ratio: RiskRatio,
    /// Board entries evaluated / dropped.
    pub evaluated: usize,
    pub skipped: usize,
    pub created_at: DateTime<Utc>,
}

impl AnalysisResult {
    pub fn has_options(&self) -> bool {
        !self.options.is_empty()
    }

    pub fn option(&self, id: &str) -> Option<&BetOption> {
        self.options.iter().find(|o| o.id == id)
    }

    pub fn recommended(&self) -> impl Iterator<Item = &BetOption> {
        self.options.iter().filter(|o| o.recommended)
    }

    pub fn positive_ev_count(&self) -> usize {
        self.options.iter().filter(|o| o.is_positive_ev()).count()
    }
}

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

/// Pipelines normalization → finish model → option evaluation, and later
/// the selected options → portfolio.
pub struct BettingStrategy {
    evaluation: EvaluationConfig,
    kelly: KellyCalculator,
    portfolio: PortfolioConfig,
}

impl BettingStrategy {
    pub fn new(evaluation: EvaluationConfig, kelly: KellyCalculator, portfolio: PortfolioConfig) -> Self {
        Self {
            evaluation,
            kelly,
            portfolio,
        }
    }

    pub fn kelly(&self) -> &KellyCalculator {
        &self.kelly
    }

    /// Evaluate every ticket on the board for the user's estimates.
    ///
    /// `focus` narrows options to tickets including one of those horses.
    pub fn analyze(
        &self,
        race: &Race,
        odds: &OddsBoard,
        inputs: &[ProbabilityInput],
        budget: Decimal,
        risk_ratio: RiskRatio,
        focus: &BTreeSet<u8>,
    ) -> Result<AnalysisResult, AdvisorError> {
        if odds.race_id != race.id {
            return Err(AdvisorError::Validation(format!(
                "Odds board is for race {}, not {}",
                odds.race_id, race.id
            )));
        }
        if round_down_to_unit(budget) < TICKET_UNIT {
            return Err(AdvisorError::Validation(format!(
                "Budget must be at least {TICKET_UNIT} yen"
            )));
        }
        if budget > MAX_BUDGET {
            return Err(AdvisorError::Validation(format!(
                "Budget must be at most {MAX_BUDGET} yen"
            )));
        }
        if let Some(h) = focus.iter().find(|h| !race.has_runner(**h)) {
            return Err(AdvisorError::Validation(format!(
                "Horse {h} is not a starter in race {}",
                race.id
            )));
        }

        let probabilities = normalize(inputs, race)?;
        let model = FinishModel::from_probabilities(&probabilities);
        let scan = enumerate_options(odds, &probabilities, &model, risk_ratio, focus, &self.evaluation);

        let result = AnalysisResult {
            race_id: race.id.clone(),
            probabilities,
            options: scan.options,
            ai: None,
            budget: round_down_to_unit(budget),
            risk_ratio,
            evaluated: scan.evaluated,
            skipped: scan.skipped,
            created_at: Utc::now(),
        };

        info!(
            race_id = %race.id,
            runners = race.runner_count(),
            options = result.options.len(),
            positive_ev = result.positive_ev_count(),
            skipped = result.skipped,
            risk_ratio = %risk_ratio,
            "Race analysed"
        );

        Ok(result)
    }

    /// Fold an analyst's proposals into the options.
    ///
    /// Proposals matching an existing option mark it recommended. Proposals
    /// for tickets priced on the board but not yet listed are evaluated and
    /// appended if they pass the same filters as the board scan (bet type,
    /// `focus`, minimum probability). Anything else is dropped.
    pub fn merge_analysis(
        &self,
        result: &mut AnalysisResult,
        odds: &OddsBoard,
        focus: &BTreeSet<u8>,
        ai: AiAnalysis,
    ) {
        let model = FinishModel::from_probabilities(&result.probabilities);
        let mut merged = 0usize;
        let mut added = 0usize;
        let mut dropped = 0usize;

        for proposal in &ai.proposals {
            let id = proposal.ticket.key();
            if let Some(option) = result.options.iter_mut().find(|o| o.id == id) {
                option.recommended = true;
                option.analyst_confidence = Some(proposal.confidence);
                option.rationale = Some(proposal.reason.clone());
                merged += 1;
                continue;
            }

            if !self.evaluation.admits(&proposal.ticket, focus) {
                debug!(ticket = %proposal.ticket, "Analyst proposal outside the enabled bet types or focus");
                dropped += 1;
                continue;
            }
            let priced = odds
                .odds_for(&proposal.ticket)
                .and_then(|o| evaluate(&proposal.ticket, o, &result.probabilities, &model, result.risk_ratio))
                .filter(|option| self.evaluation.keeps(option));
            match priced {
                Some(mut option) => {
                    option.source = OptionSource::Analyst;
                    option.recommended = true;
                    option.analyst_confidence = Some(proposal.confidence);
                    option.rationale = Some(proposal.reason.clone());
                    result.options.push(option);
                    added += 1;
                }
                None => {
                    debug!(ticket = %proposal.ticket, "Analyst proposal has no usable odds or is too unlikely");
                    dropped += 1;
                }
            }
        }

        sort_options(&mut result.options);
        if dropped > 0 {
            warn!(race_id = %result.race_id, dropped, model = %ai.model, "Analyst proposals dropped");
        }
        info!(
            race_id = %result.race_id,
            merged,
            added,
            model = %ai.model,
            "Analyst proposals merged"
        );
        result.ai = Some(ai);
    }

    /// Build a portfolio from options picked out of `analysis`.
    pub fn build_portfolio(
        &self,
        analysis: &AnalysisResult,
        selected_ids: &[String],
    ) -> Result<Portfolio, AdvisorError> {
        let mut selected = Vec::with_capacity(selected_ids.len());
        for id in selected_ids {
            let option = analysis.option(id).ok_or_else(|| {
                AdvisorError::Validation(format!("Bet {id} is not one of the analysed options"))
            })?;
            selected.push(option.clone());
        }

        let model = FinishModel::from_probabilities(&analysis.probabilities);
        optimize(
            &analysis.race_id,
            &selected,
            analysis.budget,
            analysis.risk_ratio,
            &model,
            &self.kelly,
            &self.portfolio,
        )
    }
}

impl Default for BettingStrategy {
    fn default() -> Self {
        Self::new(
            EvaluationConfig::default(),
            KellyCalculator::default(),
            PortfolioConfig::default(),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
