//! Portfolio optimization.
//!
//! Spreads a budget over the selected tickets in 100-yen units. Tickets on
//! the same race are correlated (a win ticket and an exacta on the same
//! horse tend to hit together; two win tickets never do), so the allocator
//! works with the full covariance of per-yen returns:
//!
//!   cov(a, b) = o_a · o_b · (P(a ∧ b) − P(a) · P(b))
//!
//! and greedily adds the unit with the best marginal gain in
//!
//!   U = E[profit] − Var[profit] / (2 · risk_ratio · budget)
//!
//! until the budget runs out or no unit improves U.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::evaluation::BetOption;
use super::kelly::KellyCalculator;
use super::model::FinishModel;
use crate::types::{d, round_down_to_unit, to_f64, AdvisorError, RiskRatio, MAX_BUDGET, TICKET_UNIT};

/// Unit size as a float, for the optimizer's arithmetic.
const UNIT: f64 = 100.0;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PortfolioConfig {
    /// A ticket may take at most this many times its Kelly stake.
    pub kelly_cap_multiplier: f64,
}

impl Default for PortfolioConfig {
    fn default() -> Self {
        Self {
            kelly_cap_multiplier: 2.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Portfolio
// ---------------------------------------------------------------------------

/// Stake placed on one ticket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Allocation {
    pub option: BetOption,
    /// Yen, whole tickets.
    pub stake: Decimal,
    pub expected_return: Decimal,
    /// Share of the total stake.
    pub weight: f64,
}

impl Allocation {
    /// Payout if this ticket hits.
    pub fn payout(&self) -> Decimal {
        self.option.payout(self.stake)
    }
}

/// Finalized allocation of a budget across tickets on one race.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
    pub id: Uuid,
    pub race_id: String,
    pub budget: Decimal,
    pub allocations: Vec<Allocation>,
    pub total_stake: Decimal,
    pub expected_return: Decimal,
    pub expected_profit: Decimal,
    /// Standard deviation of the profit, yen.
    pub std_dev: Decimal,
    /// Probability that at least one ticket pays, under the finish model.
    pub hit_probability: f64,
    /// Best-case payout over all finishes.
    pub max_payout: Decimal,
    pub unallocated: Decimal,
    pub risk_ratio: RiskRatio,
    pub created_at: DateTime<Utc>,
}

impl Portfolio {
    pub fn is_empty(&self) -> bool {
        self.allocations.is_empty()
    }

    pub fn ticket_count(&self) -> usize {
        self.allocations.len()
    }

    /// Expected return per yen staked (0 for an empty portfolio).
    pub fn return_ratio(&self) -> f64 {
        if self.total_stake.is_zero() {
            return 0.0;
        }
        to_f64(self.expected_return / self.total_stake)
    }
}

// ---------------------------------------------------------------------------
// Optimizer
// ---------------------------------------------------------------------------

/// Allocate `budget` across `selected`.
///
/// Fails when nothing is selected or the budget can't buy a single ticket.
/// A selection with no unit worth buying yields an empty portfolio.
pub fn optimize(
    race_id: &str,
    selected: &[BetOption],
    budget: Decimal,
    risk_ratio: RiskRatio,
    model: &FinishModel,
    kelly: &KellyCalculator,
    config: &PortfolioConfig,
) -> Result<Portfolio, AdvisorError> {
    if selected.is_empty() {
        return Err(AdvisorError::Validation("No bets selected".into()));
    }
    let budget = round_down_to_unit(budget);
    if budget < TICKET_UNIT {
        return Err(AdvisorError::Validation(format!(
            "Budget must be at least {TICKET_UNIT} yen"
        )));
    }
    if budget > MAX_BUDGET {
        return Err(AdvisorError::Validation(format!(
            "Budget must be at most {MAX_BUDGET} yen"
        )));
    }

    let mut seen = HashSet::new();
    let options: Vec<&BetOption> = selected
        .iter()
        .filter(|o| seen.insert(o.id.clone()))
        .collect();
    let n = options.len();

    let cov = covariance(&options, model);
    let caps: Vec<u64> = options
        .iter()
        .map(|o| {
            let cap = kelly.stake_cap(o, budget, config.kelly_cap_multiplier);
            to_f64(cap / TICKET_UNIT).max(0.0) as u64
        })
        .collect();

    let total_units = to_f64(budget / TICKET_UNIT) as u64;
    let penalty = 1.0 / (2.0 * risk_ratio.value() * to_f64(budget));

    let mut stakes = vec![0.0f64; n];
    let mut units = vec![0u64; n];
    let mut spent = 0u64;
    // cross[i] = Σ_j stakes[j] · cov[i][j], kept current as units land.
    let mut cross = vec![0.0f64; n];

    while spent < total_units {
        let mut best: Option<(usize, f64)> = None;
        for i in 0..n {
            if units[i] >= caps[i] {
                continue;
            }
            let gain = UNIT * options[i].edge - penalty * (2.0 * UNIT * cross[i] + UNIT * UNIT * cov[i][i]);
            if gain > 0.0 && best.map_or(true, |(_, g)| gain > g) {
                best = Some((i, gain));
            }
        }
        let Some((k, _)) = best else { break };
        units[k] += 1;
        stakes[k] += UNIT;
        spent += 1;
        for (i, c) in cross.iter_mut().enumerate() {
            *c += UNIT * cov[i][k];
        }
    }

    let variance: f64 = (0..n)
        .flat_map(|i| (0..n).map(move |j| (i, j)))
        .map(|(i, j)| stakes[i] * stakes[j] * cov[i][j])
        .sum();

    let total_stake = Decimal::from(spent) * TICKET_UNIT;
    let mut allocations = Vec::new();
    for (i, option) in options.iter().enumerate() {
        if units[i] == 0 {
            continue;
        }
        let stake = Decimal::from(units[i]) * TICKET_UNIT;
        allocations.push(Allocation {
            option: (*option).clone(),
            stake,
            expected_return: option.expected_return(stake),
            weight: to_f64(stake / total_stake),
        });
    }
    allocations.sort_by(|a, b| b.stake.cmp(&a.stake).then_with(|| a.option.id.cmp(&b.option.id)));

    let expected_return: Decimal = allocations.iter().map(|a| a.expected_return).sum();
    let tickets: Vec<_> = allocations.iter().map(|a| &a.option.ticket).collect();
    let hit_probability = model.any_hit_probability(&tickets);
    let max_payout = max_payout(&allocations, model);

    if allocations.is_empty() {
        warn!(race_id, selected = n, "No selected ticket improves the portfolio");
    }

    debug!(
        race_id,
        selected = n,
        units = spent,
        variance,
        "Greedy allocation finished"
    );
    info!(
        race_id,
        tickets = allocations.len(),
        stake = %total_stake,
        budget = %budget,
        expected_return = %expected_return,
        risk_ratio = %risk_ratio,
        "Portfolio built"
    );

    Ok(Portfolio {
        id: Uuid::new_v4(),
        race_id: race_id.to_string(),
        budget,
        total_stake,
        expected_profit: expected_return - total_stake,
        expected_return,
        std_dev: d(variance.max(0.0).sqrt()).round_dp(0),
        hit_probability,
        max_payout,
        unallocated: budget - total_stake,
        allocations,
        risk_ratio,
        created_at: Utc::now(),
    })
}

/// Covariance of per-yen returns. The diagonal uses each option's own hit
/// probability; off-diagonal terms come from the finish model so joint and
/// marginal probabilities agree.
fn covariance(options: &[&BetOption], model: &FinishModel) -> Vec<Vec<f64>> {
    let n = options.len();
    let hits: Vec<Vec<bool>> = options.iter().map(|o| model.hit_vector(&o.ticket)).collect();
    let probs: Vec<f64> = model.outcome_probabilities().collect();
    let marginal: Vec<f64> = hits.iter().map(|h| masked_sum(&probs, h, h)).collect();

    let mut cov = vec![vec![0.0; n]; n];
    for i in 0..n {
        let p = options[i].probability;
        cov[i][i] = options[i].odds * options[i].odds * p * (1.0 - p);
        for j in (i + 1)..n {
            let joint = masked_sum(&probs, &hits[i], &hits[j]);
            let c = options[i].odds * options[j].odds * (joint - marginal[i] * marginal[j]);
            cov[i][j] = c;
            cov[j][i] = c;
        }
    }
    cov
}

fn masked_sum(probs: &[f64], a: &[bool], b: &[bool]) -> f64 {
    probs
        .iter()
        .zip(a.iter().zip(b))
        .filter(|(_, (x, y))| **x && **y)
        .map(|(p, _)| p)
        .sum()
}

/// Largest total payout over every modelled finish.
fn max_payout(allocations: &[Allocation], model: &FinishModel) -> Decimal {
    if allocations.is_empty() {
        return Decimal::ZERO;
    }
    let hits: Vec<Vec<bool>> = allocations
        .iter()
        .map(|a| model.hit_vector(&a.option.ticket))
        .collect();
    let payouts: Vec<Decimal> = allocations.iter().map(|a| a.payout()).collect();

    (0..model.outcome_count())
        .map(|k| {
            hits.iter()
                .zip(&payouts)
                .filter(|(h, _)| h[k])
                .map(|(_, p)| *p)
                .sum::<Decimal>()
        })
        .max()
        .unwrap_or(Decimal::ZERO)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
