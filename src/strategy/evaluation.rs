//! Bet evaluation.
//!
//! Scores every ticket on the odds board against the user's normalized
//! probabilities: hit probability, expected value, risk and a
//! risk-adjusted score that the risk ratio trades off.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

use super::kelly::kelly_fraction;
use super::model::FinishModel;
use super::probability::NormalizedProbabilities;
use crate::types::{d, BetType, OddsBoard, RiskRatio, Ticket};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EvaluationConfig {
    /// Tickets less likely than this are not offered.
    pub min_probability: f64,
    /// Maximum options returned, best score first.
    pub max_options: usize,
    /// Bet types considered.
    pub bet_types: Vec<BetType>,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            min_probability: 0.002,
            max_options: 40,
            bet_types: BetType::ALL.to_vec(),
        }
    }
}

impl EvaluationConfig {
    /// Whether a ticket's bet type is enabled and, with a non-empty
    /// `focus`, whether it includes one of the focus horses.
    pub fn admits(&self, ticket: &Ticket, focus: &BTreeSet<u8>) -> bool {
        self.bet_types.contains(&ticket.bet_type)
            && (focus.is_empty() || ticket.horses.iter().any(|h| focus.contains(h)))
    }

    /// Whether an evaluated option is likely enough to offer.
    pub fn keeps(&self, option: &BetOption) -> bool {
        option.probability >= self.min_probability
    }
}

// ---------------------------------------------------------------------------
// Bet option
// ---------------------------------------------------------------------------

/// Where an option came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionSource {
    /// Found by scanning the odds board.
    Model,
    /// Proposed by the race analyst and evaluated afterwards.
    Analyst,
}

/// A candidate ticket with its evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BetOption {
    /// Stable id (`Ticket::key`).
    pub id: String,
    pub ticket: Ticket,
    pub odds: f64,
    /// Hit probability.
    pub probability: f64,
    /// `probability × odds`; above 1.0 is a positive-expectation ticket.
    pub expected_value: f64,
    /// `expected_value − 1`.
    pub edge: f64,
    /// Standard deviation of the return per yen staked.
    pub risk: f64,
    /// `edge − risk / risk_ratio`.
    pub score: f64,
    pub kelly_fraction: f64,
    pub source: OptionSource,
    /// Whether the analyst recommended this ticket.
    #[serde(default)]
    pub recommended: bool,
    #[serde(default)]
    pub analyst_confidence: Option<f64>,
    #[serde(default)]
    pub rationale: Option<String>,
}

impl BetOption {
    /// Payout if the ticket hits.
    pub fn payout(&self, stake: Decimal) -> Decimal {
        (stake * d(self.odds)).round_dp(0)
    }

    /// Probability-weighted return of `stake`.
    pub fn expected_return(&self, stake: Decimal) -> Decimal {
        (stake * d(self.expected_value)).round_dp(0)
    }

    pub fn is_positive_ev(&self) -> bool {
        self.edge > 0.0
    }
}

/// Hit probability for a ticket. Win and place read the user's normalized
/// estimates directly; combination tickets come from the finish model.
pub fn ticket_probability(
    ticket: &Ticket,
    probs: &NormalizedProbabilities,
    model: &FinishModel,
) -> f64 {
    match ticket.bet_type {
        BetType::Win => probs.win(ticket.horses[0]),
        BetType::Place if probs.paid_places > 0 => probs.place(ticket.horses[0]),
        BetType::Place => 0.0,
        _ => model.hit_probability(ticket),
    }
}

/// Evaluate one ticket at the given odds. `None` for unusable odds or a
/// ticket that can't pay in this race.
pub fn evaluate(
    ticket: &Ticket,
    odds: f64,
    probs: &NormalizedProbabilities,
    model: &FinishModel,
    risk_ratio: RiskRatio,
) -> Option<BetOption> {
    if !odds.is_finite() || odds < 1.0 {
        return None;
    }
    if !model.supports(ticket) || !ticket.horses.iter().all(|h| probs.horses.contains(h)) {
        return None;
    }

    let probability = ticket_probability(ticket, probs, model).clamp(0.0, 1.0);
    let expected_value = probability * odds;
    let edge = expected_value - 1.0;
    let risk = odds * (probability * (1.0 - probability)).sqrt();
    let score = edge - risk / risk_ratio.value();

    Some(BetOption {
        id: ticket.key(),
        ticket: ticket.clone(),
        odds,
        probability,
        expected_value,
        edge,
        risk,
        score,
        kelly_fraction: kelly_fraction(probability, odds),
        source: OptionSource::Model,
        recommended: false,
        analyst_confidence: None,
        rationale: None,
    })
}

/// Result of scanning an odds board.
#[derive(Debug, Clone)]
pub struct OptionScan {
    pub options: Vec<BetOption>,
    /// Tickets on the board that were evaluated.
    pub evaluated: usize,
    /// Tickets dropped (unusable odds, filtered type, unlikely, off-focus).
    pub skipped: usize,
}

/// Evaluate every ticket on the board and keep the best `max_options`.
///
/// A non-empty `focus` keeps only tickets that include at least one of the
/// focus horses.
pub fn enumerate_options(
    odds: &OddsBoard,
    probs: &NormalizedProbabilities,
    model: &FinishModel,
    risk_ratio: RiskRatio,
    focus: &BTreeSet<u8>,
    config: &EvaluationConfig,
) -> OptionScan {
    let mut options = Vec::new();
    let mut skipped = 0usize;

    for entry in &odds.entries {
        let ticket = &entry.ticket;
        if !config.admits(ticket, focus) {
            skipped += 1;
            continue;
        }
        match evaluate(ticket, entry.odds, probs, model, risk_ratio) {
            Some(option) if config.keeps(&option) => options.push(option),
            _ => skipped += 1,
        }
    }

    let evaluated = options.len();
    sort_options(&mut options);
    options.truncate(config.max_options);

    debug!(
        race_id = %odds.race_id,
        board = odds.entries.len(),
        evaluated,
        skipped,
        kept = options.len(),
        "Odds board evaluated"
    );

    OptionScan {
        options,
        evaluated,
        skipped,
    }
}

/// Best score first; ties by expected value, then id.
pub fn sort_options(options: &mut [BetOption]) {
    options.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.expected_value
                    .partial_cmp(&a.expected_value)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.id.cmp(&b.id))
    });
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::strategy::probability::normalize;
    use crate::types::{OddsEntry, ProbabilityInput, Race};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    /// A bare option with the given probability and odds.
    pub(crate) fn option_with(probability: f64, odds: f64) -> BetOption {
        BetOption {
            id: "win:1".into(),
            ticket: Ticket::win(1),
            odds,
            probability,
            expected_value: probability * odds,
            edge: probability * odds - 1.0,
            risk: odds * (probability * (1.0 - probability)).sqrt(),
            score: 0.0,
            kelly_fraction: kelly_fraction(probability, odds),
            source: OptionSource::Model,
            recommended: false,
            analyst_confidence: None,
            rationale: None,
        }
    }

    fn setup(runners: u8, wins: &[f64]) -> (Race, NormalizedProbabilities, FinishModel) {
        let race = Race::sample(runners);
        let inputs: Vec<_> = wins
            .iter()
            .enumerate()
            .map(|(i, &w)| ProbabilityInput {
                horse: i as u8 + 1,
                win_pct: w,
                place_pct: w * 2.5,
            })
            .collect();
        let probs = normalize(&inputs, &race).unwrap();
        let model = FinishModel::from_probabilities(&probs);
        (race, probs, model)
    }

    fn board(entries: Vec<(Ticket, f64)>) -> OddsBoard {
        OddsBoard {
            race_id: "r1".into(),
            updated_at: Utc::now(),
            entries: entries
                .into_iter()
                .map(|(ticket, odds)| OddsEntry { ticket, odds })
                .collect(),
        }
    }

    #[test]
    fn test_evaluate_win() {
        let (_, probs, model) = setup(8, &[30.0, 20.0, 15.0, 10.0, 10.0, 8.0, 5.0, 2.0]);
        let opt = evaluate(&Ticket::win(1), 4.0, &probs, &model, RiskRatio::default()).unwrap();
        assert_eq!(opt.id, "win:1");
        assert!((opt.probability - 0.30).abs() < 1e-9);
        assert!((opt.expected_value - 1.2).abs() < 1e-9);
        assert!((opt.edge - 0.2).abs() < 1e-9);
        let sigma = 4.0 * (0.3f64 * 0.7).sqrt();
        assert!((opt.risk - sigma).abs() < 1e-9);
        assert!((opt.score - (0.2 - sigma / 2.0)).abs() < 1e-9);
        assert!(opt.is_positive_ev());
    }

    #[test]
    fn test_place_uses_user_estimate() {
        let (_, probs, model) = setup(8, &[30.0, 20.0, 15.0, 10.0, 10.0, 8.0, 5.0, 2.0]);
        let opt = evaluate(&Ticket::place(1), 1.5, &probs, &model, RiskRatio::default()).unwrap();
        assert!((opt.probability - probs.place(1)).abs() < 1e-12);
    }

    #[test]
    fn test_combination_uses_model() {
        let (_, probs, model) = setup(6, &[40.0, 20.0, 15.0, 10.0, 10.0, 5.0]);
        let ticket = Ticket::new(BetType::Exacta, vec![1, 2]).unwrap();
        let opt = evaluate(&ticket, 8.0, &probs, &model, RiskRatio::default()).unwrap();
        assert!((opt.probability - model.hit_probability(&ticket)).abs() < 1e-12);
    }

    #[test]
    fn test_evaluate_rejects_bad_odds_and_unsupported() {
        let (_, probs, model) = setup(4, &[40.0, 30.0, 20.0, 10.0]);
        let r = RiskRatio::default();
        assert!(evaluate(&Ticket::win(1), 0.9, &probs, &model, r).is_none());
        assert!(evaluate(&Ticket::win(1), f64::INFINITY, &probs, &model, r).is_none());
        // No place pool in a 4-runner race
        assert!(evaluate(&Ticket::place(1), 1.2, &probs, &model, r).is_none());
        // Non-runner
        assert!(evaluate(&Ticket::win(9), 5.0, &probs, &model, r).is_none());
    }

    #[test]
    fn test_higher_risk_ratio_penalises_less() {
        let (_, probs, model) = setup(8, &[30.0, 20.0, 15.0, 10.0, 10.0, 8.0, 5.0, 2.0]);
        let ticket = Ticket::win(7);
        let cautious = evaluate(&ticket, 25.0, &probs, &model, RiskRatio::new(1.0).unwrap()).unwrap();
        let bold = evaluate(&ticket, 25.0, &probs, &model, RiskRatio::new(10.0).unwrap()).unwrap();
        assert!(bold.score > cautious.score);
        assert_eq!(bold.expected_value, cautious.expected_value);
    }

    #[test]
    fn test_enumerate_sorted_and_truncated() {
        let (_, probs, model) = setup(8, &[30.0, 20.0, 15.0, 10.0, 10.0, 8.0, 5.0, 2.0]);
        let odds = board((1..=8).map(|h| (Ticket::win(h), 3.0 + h as f64)).collect());
        let config = EvaluationConfig {
            max_options: 3,
            ..EvaluationConfig::default()
        };
        let scan = enumerate_options(&odds, &probs, &model, RiskRatio::default(), &BTreeSet::new(), &config);
        assert_eq!(scan.options.len(), 3);
        assert_eq!(scan.evaluated, 8);
        assert!(scan.options.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn test_enumerate_filters() {
        let (_, probs, model) = setup(8, &[30.0, 20.0, 15.0, 10.0, 10.0, 8.0, 5.0, 2.0]);
        let odds = board(vec![
            (Ticket::win(1), 4.0),
            (Ticket::win(2), 0.5),
            (Ticket::place(3), 2.0),
            (Ticket::new(BetType::Quinella, vec![1, 2]).unwrap(), 9.0),
        ]);
        let config = EvaluationConfig {
            bet_types: vec![BetType::Win, BetType::Quinella],
            ..EvaluationConfig::default()
        };
        let focus: BTreeSet<u8> = [1].into_iter().collect();
        let scan = enumerate_options(&odds, &probs, &model, RiskRatio::default(), &focus, &config);
        let ids: Vec<_> = scan.options.iter().map(|o| o.id.as_str()).collect();
        assert!(ids.contains(&"win:1"));
        assert!(ids.contains(&"quinella:1-2"));
        assert_eq!(ids.len(), 2);
        assert_eq!(scan.skipped, 2);
    }

    #[test]
    fn test_min_probability_filter() {
        let (_, probs, model) = setup(8, &[30.0, 20.0, 15.0, 10.0, 10.0, 8.0, 5.0, 2.0]);
        let odds = board(vec![(Ticket::new(BetType::Trifecta, vec![8, 7, 6]).unwrap(), 9000.0)]);
        let config = EvaluationConfig {
            min_probability: 0.01,
            ..EvaluationConfig::default()
        };
        let scan = enumerate_options(&odds, &probs, &model, RiskRatio::default(), &BTreeSet::new(), &config);
        assert!(scan.options.is_empty());
        assert_eq!(scan.skipped, 1);
    }

    #[test]
    fn test_payout_and_expected_return() {
        let opt = option_with(0.25, 5.0);
        assert_eq!(opt.payout(dec!(300)), dec!(1500));
        assert_eq!(opt.expected_return(dec!(400)), dec!(500));
    }
}
