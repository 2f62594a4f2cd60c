//! Finish-order model.
//!
//! Derives a distribution over ordered top-three finishes from normalized
//! win probabilities using the Harville model:
//!
//!   P(i 1st, j 2nd, k 3rd) = p_i · p_j / (1 − p_i) · p_k / (1 − p_i − p_j)
//!
//! Every ticket's payout condition is a predicate over the finish, so hit
//! probabilities and joint hit probabilities (for correlation) come from the
//! same enumeration.

use super::probability::NormalizedProbabilities;
use crate::types::{BetType, Ticket};

/// Below this remaining mass the conditional step is treated as uniform.
const MASS_EPSILON: f64 = 1e-12;

/// Distribution over ordered finishes.
///
/// Each outcome is `[first, second, third]`; `third` is 0 in two-runner
/// races.
#[derive(Debug, Clone)]
pub struct FinishModel {
    runners: usize,
    paid_places: usize,
    outcomes: Vec<([u8; 3], f64)>,
}

impl FinishModel {
    /// Build the model from normalized probabilities.
    pub fn from_probabilities(probs: &NormalizedProbabilities) -> Self {
        let horses = &probs.horses;
        let win = &probs.win;
        let n = horses.len();
        let mut outcomes = Vec::with_capacity(n * n.saturating_sub(1) * n.saturating_sub(2).max(1));

        for i in 0..n {
            let p1 = win[i];
            if p1 <= 0.0 {
                continue;
            }
            let rem1 = 1.0 - win[i];

            for j in 0..n {
                if j == i {
                    continue;
                }
                let p2 = conditional(win[j], rem1, n - 1);
                if p2 <= 0.0 {
                    continue;
                }

                if n == 2 {
                    outcomes.push(([horses[i], horses[j], 0], p1 * p2));
                    continue;
                }

                let rem2 = rem1 - win[j];
                for k in 0..n {
                    if k == i || k == j {
                        continue;
                    }
                    let p3 = conditional(win[k], rem2, n - 2);
                    if p3 <= 0.0 {
                        continue;
                    }
                    outcomes.push(([horses[i], horses[j], horses[k]], p1 * p2 * p3));
                }
            }
        }

        Self {
            runners: n,
            paid_places: probs.paid_places,
            outcomes,
        }
    }

    pub fn runners(&self) -> usize {
        self.runners
    }

    pub fn paid_places(&self) -> usize {
        self.paid_places
    }

    /// Number of finishes with non-zero probability.
    pub fn outcome_count(&self) -> usize {
        self.outcomes.len()
    }

    /// Total probability mass (1.0 up to rounding).
    pub fn total_mass(&self) -> f64 {
        self.outcomes.iter().map(|(_, p)| p).sum()
    }

    /// Whether the ticket can pay at all in this race.
    pub fn supports(&self, ticket: &Ticket) -> bool {
        let needed = ticket.bet_type.selection_size();
        if self.runners < needed.max(2) {
            return false;
        }
        match ticket.bet_type {
            BetType::Place | BetType::Wide => self.paid_places > 0,
            BetType::Trio | BetType::Trifecta => self.runners >= 3,
            _ => true,
        }
    }

    /// Whether `ticket` pays on `finish`.
    fn hits(&self, ticket: &Ticket, finish: &[u8; 3]) -> bool {
        let h = &ticket.horses;
        match ticket.bet_type {
            BetType::Win => finish[0] == h[0],
            BetType::Place => finish[..self.paid_places].contains(&h[0]),
            BetType::Quinella => {
                (finish[0] == h[0] && finish[1] == h[1]) || (finish[0] == h[1] && finish[1] == h[0])
            }
            BetType::Exacta => finish[0] == h[0] && finish[1] == h[1],
            BetType::Wide => {
                let top = &finish[..self.paid_places];
                top.contains(&h[0]) && top.contains(&h[1])
            }
            BetType::Trio => h.iter().all(|x| finish.contains(x)) && finish[2] != 0,
            BetType::Trifecta => finish[0] == h[0] && finish[1] == h[1] && finish[2] == h[2],
        }
    }

    /// Per-outcome hit flags, aligned with the internal outcome order.
    pub fn hit_vector(&self, ticket: &Ticket) -> Vec<bool> {
        if !self.supports(ticket) {
            return vec![false; self.outcomes.len()];
        }
        self.outcomes
            .iter()
            .map(|(finish, _)| self.hits(ticket, finish))
            .collect()
    }

    /// Probability of each outcome, aligned with `hit_vector`.
    pub fn outcome_probabilities(&self) -> impl Iterator<Item = f64> + '_ {
        self.outcomes.iter().map(|(_, p)| *p)
    }

    /// Probability that `ticket` pays.
    pub fn hit_probability(&self, ticket: &Ticket) -> f64 {
        if !self.supports(ticket) {
            return 0.0;
        }
        self.outcomes
            .iter()
            .filter(|(finish, _)| self.hits(ticket, finish))
            .map(|(_, p)| p)
            .sum()
    }

    /// Probability that both tickets pay.
    pub fn joint_hit_probability(&self, a: &Ticket, b: &Ticket) -> f64 {
        if !self.supports(a) || !self.supports(b) {
            return 0.0;
        }
        self.outcomes
            .iter()
            .filter(|(finish, _)| self.hits(a, finish) && self.hits(b, finish))
            .map(|(_, p)| p)
            .sum()
    }

    /// Probability that at least one ticket pays.
    pub fn any_hit_probability(&self, tickets: &[&Ticket]) -> f64 {
        let supported: Vec<&&Ticket> = tickets.iter().filter(|t| self.supports(t)).collect();
        self.outcomes
            .iter()
            .filter(|(finish, _)| supported.iter().any(|t| self.hits(t, finish)))
            .map(|(_, p)| p)
            .sum()
    }
}

/// `p / remaining`, or uniform over `count` when no mass remains.
fn conditional(p: f64, remaining: f64, count: usize) -> f64 {
    if remaining > MASS_EPSILON {
        (p / remaining).clamp(0.0, 1.0)
    } else if count > 0 {
        1.0 / count as f64
    } else {
        0.0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
