//! Betting wizard state.
//!
//! A session walks three steps:
//!
//! | Step      | Leave forward when                   | Next      |
//! |-----------|--------------------------------------|-----------|
//! | ANALYSIS  | the analysis produced an option      | SELECTION |
//! | SELECTION | a bet is selected and a portfolio is computed | PORTFOLIO |
//! | PORTFOLIO | never (terminal)                     |           |
//!
//! Moving back is always allowed. Leaving PORTFOLIO backwards discards the
//! portfolio; `back` at ANALYSIS stays put.

pub mod store;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

use crate::strategy::portfolio::Portfolio;
use crate::strategy::AnalysisResult;
use crate::types::{AdvisorError, ProbabilityInput, RiskRatio};

pub use store::{SessionEvent, SessionStore};

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BettingStep {
    Analysis,
    Selection,
    Portfolio,
}

impl BettingStep {
    pub fn next(self) -> Option<BettingStep> {
        match self {
            BettingStep::Analysis => Some(BettingStep::Selection),
            BettingStep::Selection => Some(BettingStep::Portfolio),
            BettingStep::Portfolio => None,
        }
    }

    pub fn previous(self) -> Option<BettingStep> {
        match self {
            BettingStep::Analysis => None,
            BettingStep::Selection => Some(BettingStep::Analysis),
            BettingStep::Portfolio => Some(BettingStep::Selection),
        }
    }

    pub fn is_terminal(self) -> bool {
        self.next().is_none()
    }
}

impl fmt::Display for BettingStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BettingStep::Analysis => write!(f, "ANALYSIS"),
            BettingStep::Selection => write!(f, "SELECTION"),
            BettingStep::Portfolio => write!(f, "PORTFOLIO"),
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// What the user typed on the analysis step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisInputs {
    pub probabilities: Vec<ProbabilityInput>,
    pub budget: Decimal,
    pub risk_ratio: RiskRatio,
}

/// One user's pass through the wizard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BettingSession {
    pub id: Uuid,
    pub step: BettingStep,
    pub race_id: Option<String>,
    /// Horses the analysis should focus on (empty means all).
    #[serde(default)]
    pub selected_horses: BTreeSet<u8>,
    #[serde(default)]
    pub inputs: Option<AnalysisInputs>,
    #[serde(default)]
    pub analysis: Option<AnalysisResult>,
    /// Option ids, in selection order.
    #[serde(default)]
    pub selected_bets: Vec<String>,
    #[serde(default)]
    pub portfolio: Option<Portfolio>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BettingSession {
    pub fn new(race_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            step: BettingStep::Analysis,
            race_id,
            selected_horses: BTreeSet::new(),
            inputs: None,
            analysis: None,
            selected_bets: Vec::new(),
            portfolio: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    fn require(&self, expected: BettingStep) -> Result<(), AdvisorError> {
        if self.step != expected {
            return Err(AdvisorError::WrongStep {
                expected,
                actual: self.step,
            });
        }
        Ok(())
    }

    /// Pick (or change) the race. Changing races drops everything derived
    /// from the old one.
    pub fn select_race(&mut self, race_id: &str) -> Result<(), AdvisorError> {
        self.require(BettingStep::Analysis)?;
        if self.race_id.as_deref() != Some(race_id) {
            self.race_id = Some(race_id.to_string());
            self.selected_horses.clear();
            self.inputs = None;
            self.analysis = None;
            self.selected_bets.clear();
            self.portfolio = None;
        }
        self.touch();
        Ok(())
    }

    /// Set the focus horses for the next analysis.
    pub fn select_horses(&mut self, horses: impl IntoIterator<Item = u8>) -> Result<(), AdvisorError> {
        self.require(BettingStep::Analysis)?;
        self.selected_horses = horses.into_iter().collect();
        self.touch();
        Ok(())
    }

    /// Store a fresh analysis. Selected bets that are no longer options are
    /// dropped and any portfolio is discarded.
    pub fn record_analysis(&mut self, inputs: AnalysisInputs, analysis: AnalysisResult) -> Result<(), AdvisorError> {
        self.require(BettingStep::Analysis)?;
        match self.race_id.as_deref() {
            Some(id) if id != analysis.race_id => {
                return Err(AdvisorError::Validation(format!(
                    "Analysis is for race {}, session is on race {id}",
                    analysis.race_id
                )));
            }
            Some(_) => {}
            None => self.race_id = Some(analysis.race_id.clone()),
        }

        self.selected_bets.retain(|id| analysis.option(id).is_some());
        self.portfolio = None;
        self.inputs = Some(inputs);
        self.analysis = Some(analysis);
        self.touch();
        Ok(())
    }

    fn known_option(&self, id: &str) -> Result<(), AdvisorError> {
        let found = self.analysis.as_ref().is_some_and(|a| a.option(id).is_some());
        if !found {
            return Err(AdvisorError::Validation(format!("Unknown bet option: {id}")));
        }
        Ok(())
    }

    /// Flip one bet in or out of the selection. Returns whether it is now
    /// selected.
    pub fn toggle_bet(&mut self, option_id: &str) -> Result<bool, AdvisorError> {
        self.require(BettingStep::Selection)?;
        self.known_option(option_id)?;
        let selected = match self.selected_bets.iter().position(|id| id == option_id) {
            Some(idx) => {
                self.selected_bets.remove(idx);
                false
            }
            None => {
                self.selected_bets.push(option_id.to_string());
                true
            }
        };
        self.touch();
        Ok(selected)
    }

    /// Replace the whole selection. Duplicates are collapsed.
    pub fn set_bets(&mut self, option_ids: &[String]) -> Result<(), AdvisorError> {
        self.require(BettingStep::Selection)?;
        let mut bets: Vec<String> = Vec::with_capacity(option_ids.len());
        for id in option_ids {
            self.known_option(id)?;
            if !bets.contains(id) {
                bets.push(id.clone());
            }
        }
        if bets != self.selected_bets {
            self.portfolio = None;
        }
        self.selected_bets = bets;
        self.touch();
        Ok(())
    }

    /// Attach the portfolio computed for the current selection.
    pub fn set_portfolio(&mut self, portfolio: Portfolio) -> Result<(), AdvisorError> {
        self.require(BettingStep::Selection)?;
        if self.race_id.as_deref() != Some(portfolio.race_id.as_str()) {
            return Err(AdvisorError::Validation(format!(
                "Portfolio is for race {}, not this session's race",
                portfolio.race_id
            )));
        }
        self.portfolio = Some(portfolio);
        self.touch();
        Ok(())
    }

    /// Check the exit guard of the current step.
    pub fn can_advance(&self) -> Result<(), AdvisorError> {
        let reason = match self.step {
            BettingStep::Analysis if !self.analysis.as_ref().is_some_and(|a| a.has_options()) => {
                "no betting options have been computed"
            }
            BettingStep::Selection if self.selected_bets.is_empty() => "no bets are selected",
            BettingStep::Selection if self.portfolio.is_none() => "the portfolio has not been computed",
            BettingStep::Portfolio => "the portfolio step is final",
            _ => return Ok(()),
        };
        Err(AdvisorError::Transition {
            from: self.step,
            reason: reason.to_string(),
        })
    }

    /// Move forward if the current step's guard holds.
    pub fn advance(&mut self) -> Result<BettingStep, AdvisorError> {
        self.can_advance()?;
        if let Some(next) = self.step.next() {
            self.step = next;
        }
        self.touch();
        Ok(self.step)
    }

    /// Move back one step. Always succeeds.
    pub fn back(&mut self) -> BettingStep {
        if let Some(previous) = self.step.previous() {
            if self.step == BettingStep::Portfolio {
                self.portfolio = None;
            }
            self.step = previous;
        }
        self.touch();
        self.step
    }

    /// Start over on the same session id.
    pub fn reset(&mut self) {
        let id = self.id;
        let created_at = self.created_at;
        *self = BettingSession::new(None);
        self.id = id;
        self.created_at = created_at;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
