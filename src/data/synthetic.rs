//! Synthetic odds generation.
//!
//! Expands a win-only odds board into every bet type. Market win
//! probabilities are read from the win odds, combination probabilities come
//! from the Harville finish model, and each pool's takeout is applied:
//!
//!   odds = (1 − takeout) / P(hit), rounded to 0.1, at least 1.0

use chrono::Utc;
use tracing::debug;

use crate::strategy::model::FinishModel;
use crate::strategy::probability::normalize;
use crate::types::{AdvisorError, BetType, OddsBoard, OddsEntry, ProbabilityInput, Race, Ticket};

/// Hit probabilities below this get no price.
const MIN_PRICED_PROBABILITY: f64 = 1e-6;

/// JRA pool takeout per bet type.
pub fn takeout(bet_type: BetType) -> f64 {
    match bet_type {
        BetType::Win | BetType::Place => 0.20,
        BetType::Quinella | BetType::Wide => 0.225,
        BetType::Exacta | BetType::Trio => 0.25,
        BetType::Trifecta => 0.275,
    }
}

/// Every ticket of `bet_type` over `horses`.
pub fn all_tickets(bet_type: BetType, horses: &[u8]) -> Vec<Ticket> {
    let k = bet_type.selection_size();
    let mut out = Vec::new();
    let mut current = Vec::with_capacity(k);
    collect(bet_type, horses, k, 0, &mut current, &mut out);
    out
}

fn collect(bet_type: BetType, horses: &[u8], k: usize, start: usize, current: &mut Vec<u8>, out: &mut Vec<Ticket>) {
    if current.len() == k {
        if let Ok(ticket) = Ticket::new(bet_type, current.clone()) {
            out.push(ticket);
        }
        return;
    }
    // Ordered types take every permutation, unordered only ascending picks.
    let from = if bet_type.is_ordered() { 0 } else { start };
    for i in from..horses.len() {
        if current.contains(&horses[i]) {
            continue;
        }
        current.push(horses[i]);
        collect(bet_type, horses, k, i + 1, current, out);
        current.pop();
    }
}

fn price(probability: f64, bet_type: BetType) -> Option<f64> {
    if probability < MIN_PRICED_PROBABILITY {
        return None;
    }
    let odds = (1.0 - takeout(bet_type)) / probability;
    Some(((odds * 10.0).round() / 10.0).max(1.0))
}

/// Whether a board only prices win tickets.
pub fn is_win_only(board: &OddsBoard) -> bool {
    !board.entries.is_empty() && board.entries.iter().all(|e| e.ticket.bet_type == BetType::Win)
}

/// Price every bet type from the board's win odds. The win entries are kept
/// as given.
pub fn expand_board(race: &Race, board: &OddsBoard) -> Result<OddsBoard, AdvisorError> {
    let inputs: Vec<ProbabilityInput> = board
        .implied_win_probabilities()
        .into_iter()
        .filter(|(h, _)| race.has_runner(*h))
        .map(|(horse, p)| ProbabilityInput {
            horse,
            win_pct: p * 100.0,
            place_pct: 0.0,
        })
        .collect();
    if inputs.is_empty() {
        return Err(AdvisorError::OddsUnavailable(race.id.clone()));
    }

    let probs = normalize(&inputs, race)?;
    let model = FinishModel::from_probabilities(&probs);

    let mut entries: Vec<OddsEntry> = board.entries.clone();
    for &bet_type in BetType::ALL.iter().filter(|t| **t != BetType::Win) {
        for ticket in all_tickets(bet_type, &probs.horses) {
            if !model.supports(&ticket) {
                continue;
            }
            if let Some(odds) = price(model.hit_probability(&ticket), bet_type) {
                entries.push(OddsEntry { ticket, odds });
            }
        }
    }

    debug!(race_id = %race.id, entries = entries.len(), "Synthetic odds board built");

    Ok(OddsBoard {
        race_id: board.race_id.clone(),
        updated_at: Utc::now(),
        entries,
    })
}
