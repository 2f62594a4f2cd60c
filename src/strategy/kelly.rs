//! Kelly criterion stake sizing.
//!
//! Kelly formula for decimal odds `o` and hit probability `p`:
//!
//!   f* = (p·o − 1) / (o − 1)
//!
//! The raw fraction is scaled by a fractional-Kelly multiplier, capped at a
//! share of the budget and rounded down to whole 100-yen tickets.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::evaluation::BetOption;
use crate::types::{d, round_down_to_unit, TICKET_UNIT};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Kelly sizing configuration.
#[derive(Debug, Clone)]
pub struct KellyConfig {
    /// Fractional Kelly multiplier (0.25 = quarter-Kelly).
    pub multiplier: f64,
    /// Maximum stake on one ticket as a fraction of the budget.
    pub max_stake_pct: f64,
    /// Minimum stake in yen (below this, don't bother).
    pub min_stake: Decimal,
}

impl Default for KellyConfig {
    fn default() -> Self {
        Self {
            multiplier: 0.25,
            max_stake_pct: 0.25,
            min_stake: TICKET_UNIT,
        }
    }
}

// ---------------------------------------------------------------------------
// Kelly calculator
// ---------------------------------------------------------------------------

/// Raw Kelly fraction. Zero when the odds can't return a profit.
pub fn kelly_fraction(probability: f64, odds: f64) -> f64 {
    if odds <= 1.0 {
        return 0.0;
    }
    (probability * odds - 1.0) / (odds - 1.0)
}

/// Kelly-sized stake for one option.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizedTicket {
    pub option_id: String,
    /// Raw Kelly fraction.
    pub kelly_fraction: f64,
    /// After multiplier and cap.
    pub stake_fraction: f64,
    /// Yen, whole tickets.
    pub stake: Decimal,
    /// Edge × stake.
    pub expected_profit: Decimal,
}

pub struct KellyCalculator {
    config: KellyConfig,
}

impl KellyCalculator {
    pub fn new(config: KellyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &KellyConfig {
        &self.config
    }

    /// Size an option against `budget`. `None` when Kelly says no bet or the
    /// stake rounds below the minimum.
    pub fn size(&self, option: &BetOption, budget: Decimal) -> Option<SizedTicket> {
        if budget < TICKET_UNIT {
            return None;
        }

        let kelly = kelly_fraction(option.probability, option.odds);
        if kelly <= 0.0 {
            debug!(option = %option.id, kelly, "Negative Kelly, no stake");
            return None;
        }

        let fraction = (kelly * self.config.multiplier).min(self.config.max_stake_pct);
        let stake = round_down_to_unit(budget * d(fraction));

        if stake < self.config.min_stake.max(TICKET_UNIT) {
            debug!(
                option = %option.id,
                stake = %stake,
                min = %self.config.min_stake,
                "Stake below minimum"
            );
            return None;
        }

        Some(SizedTicket {
            option_id: option.id.clone(),
            kelly_fraction: kelly,
            stake_fraction: fraction,
            stake,
            expected_profit: (stake * d(option.edge)).round_dp(0),
        })
    }

    /// Largest stake the portfolio optimizer may put on `option`:
    /// `cap_multiplier` × the Kelly stake (at least one ticket), bounded by
    /// the per-ticket budget share.
    pub fn stake_cap(&self, option: &BetOption, budget: Decimal, cap_multiplier: f64) -> Decimal {
        let kelly_stake = self
            .size(option, budget)
            .map(|s| s.stake)
            .unwrap_or(Decimal::ZERO)
            .max(TICKET_UNIT);
        let by_kelly = round_down_to_unit(kelly_stake * d(cap_multiplier.max(1.0)));
        let by_share = round_down_to_unit(budget * d(self.config.max_stake_pct));
        by_kelly.min(by_share.max(TICKET_UNIT)).min(round_down_to_unit(budget))
    }
}

impl Default for KellyCalculator {
    fn default() -> Self {
        Self::new(KellyConfig::default())
    }
}

/// Stakes are always whole tickets.
pub fn is_whole_tickets(stake: Decimal) -> bool {
    stake >= Decimal::ZERO && (stake % TICKET_UNIT) == dec!(0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
