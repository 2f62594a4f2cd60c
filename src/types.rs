//! Shared types for the PADDOCK betting assistant.
//!
//! These types form the data model used across all modules: race cards,
//! odds boards, betting tickets, user probability inputs and the
//! domain error type. Money is `Decimal` yen; probabilities and odds
//! are `f64`.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::wizard::BettingStep;

// ---------------------------------------------------------------------------
// Money helpers
// ---------------------------------------------------------------------------

/// Smallest purchasable stake in yen. Every stake is a multiple of this.
pub const TICKET_UNIT: Decimal = dec!(100);

/// Largest budget accepted for one race (one million tickets).
pub const MAX_BUDGET: Decimal = dec!(100000000);

/// Convert an `f64` into a `Decimal`, falling back to zero for NaN/inf.
pub fn d(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or(Decimal::ZERO)
}

/// Convert a `Decimal` into an `f64` for numeric work.
pub fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

/// Round an amount down to a whole number of ticket units.
///
/// Rounds to 6 dp first so float-derived amounts like 999.9999999 count
/// as 1000.
pub fn round_down_to_unit(amount: Decimal) -> Decimal {
    if amount <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    (amount.round_dp(6) / TICKET_UNIT).floor() * TICKET_UNIT
}

// ---------------------------------------------------------------------------
// Race card
// ---------------------------------------------------------------------------

/// Track surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Surface {
    Turf,
    Dirt,
    Jump,
}

impl fmt::Display for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Surface::Turf => write!(f, "Turf"),
            Surface::Dirt => write!(f, "Dirt"),
            Surface::Jump => write!(f, "Jump"),
        }
    }
}

/// A horse entered in a race.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Horse {
    /// Saddle-cloth number, unique within the race (1-based).
    pub number: u8,
    pub name: String,
    /// Draw / frame number (waku).
    #[serde(default)]
    pub frame: u8,
    #[serde(default)]
    pub jockey: String,
    #[serde(default)]
    pub weight_kg: Option<f64>,
    /// Withdrawn horses stay on the card but do not run.
    #[serde(default)]
    pub scratched: bool,
}

/// A single race with its card.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Race {
    pub id: String,
    pub name: String,
    pub venue: String,
    pub date: NaiveDate,
    pub race_number: u8,
    pub distance_m: u32,
    pub surface: Surface,
    #[serde(default)]
    pub post_time: Option<DateTime<Utc>>,
    pub horses: Vec<Horse>,
}

impl fmt::Display for Race {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} R{} {} ({} {}m, {} runners)",
            self.date,
            self.venue,
            self.race_number,
            self.name,
            self.surface,
            self.distance_m,
            self.runner_count(),
        )
    }
}

impl Race {
    /// Horses that will actually start.
    pub fn runners(&self) -> impl Iterator<Item = &Horse> {
        self.horses.iter().filter(|h| !h.scratched)
    }

    pub fn runner_count(&self) -> usize {
        self.runners().count()
    }

    /// Whether `number` is a starter in this race.
    pub fn has_runner(&self, number: u8) -> bool {
        self.runners().any(|h| h.number == number)
    }

    pub fn horse(&self, number: u8) -> Option<&Horse> {
        self.horses.iter().find(|h| h.number == number)
    }

    /// Build a sample race with `runners` starters numbered 1..=runners.
    #[cfg(test)]
    pub fn sample(runners: u8) -> Self {
        Race {
            id: "2026-tokyo-11".to_string(),
            name: "Sample Stakes".to_string(),
            venue: "Tokyo".to_string(),
            date: NaiveDate::from_ymd_opt(2026, 10, 18).unwrap(),
            race_number: 11,
            distance_m: 2000,
            surface: Surface::Turf,
            post_time: None,
            horses: (1..=runners)
                .map(|n| Horse {
                    number: n,
                    name: format!("Horse {n}"),
                    frame: n.div_ceil(2),
                    jockey: format!("Jockey {n}"),
                    weight_kg: Some(57.0),
                    scratched: false,
                })
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Bet types & tickets
// ---------------------------------------------------------------------------

/// Pari-mutuel bet types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BetType {
    /// Horse finishes first.
    Win,
    /// Horse finishes within the paid places.
    Place,
    /// Two horses finish 1st and 2nd in either order.
    Quinella,
    /// Two horses both finish within the top three.
    Wide,
    /// Two horses finish 1st and 2nd in exact order.
    Exacta,
    /// Three horses finish 1st-3rd in any order.
    Trio,
    /// Three horses finish 1st-3rd in exact order.
    Trifecta,
}

impl BetType {
    pub const ALL: &'static [BetType] = &[
        BetType::Win,
        BetType::Place,
        BetType::Quinella,
        BetType::Wide,
        BetType::Exacta,
        BetType::Trio,
        BetType::Trifecta,
    ];

    /// Number of horses a ticket of this type names.
    pub fn selection_size(&self) -> usize {
        match self {
            BetType::Win | BetType::Place => 1,
            BetType::Quinella | BetType::Wide | BetType::Exacta => 2,
            BetType::Trio | BetType::Trifecta => 3,
        }
    }

    /// Whether the order of the selected horses matters.
    pub fn is_ordered(&self) -> bool {
        matches!(self, BetType::Exacta | BetType::Trifecta)
    }
}

impl fmt::Display for BetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BetType::Win => "win",
            BetType::Place => "place",
            BetType::Quinella => "quinella",
            BetType::Wide => "wide",
            BetType::Exacta => "exacta",
            BetType::Trio => "trio",
            BetType::Trifecta => "trifecta",
        };
        write!(f, "{s}")
    }
}

/// Parse a bet type (case-insensitive, English or JRA romanised name).
impl std::str::FromStr for BetType {
    type Err = AdvisorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "win" | "tansho" => Ok(BetType::Win),
            "place" | "show" | "fukusho" => Ok(BetType::Place),
            "quinella" | "umaren" => Ok(BetType::Quinella),
            "wide" | "quinella_place" | "quinella-place" => Ok(BetType::Wide),
            "exacta" | "umatan" => Ok(BetType::Exacta),
            "trio" | "sanrenpuku" => Ok(BetType::Trio),
            "trifecta" | "sanrentan" => Ok(BetType::Trifecta),
            _ => Err(AdvisorError::Validation(format!("Unknown bet type: {s}"))),
        }
    }
}

#[derive(Deserialize)]
struct TicketRepr {
    bet_type: BetType,
    horses: Vec<u8>,
}

impl TryFrom<TicketRepr> for Ticket {
    type Error = AdvisorError;

    fn try_from(repr: TicketRepr) -> Result<Self, Self::Error> {
        Ticket::new(repr.bet_type, repr.horses)
    }
}

/// A betting ticket: a bet type and the horses it names.
///
/// Unordered bet types keep their horses sorted so that equal tickets
/// compare and hash equal regardless of input order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "TicketRepr")]
pub struct Ticket {
    pub bet_type: BetType,
    pub horses: Vec<u8>,
}

impl Ticket {
    pub fn new(bet_type: BetType, mut horses: Vec<u8>) -> Result<Self, AdvisorError> {
        if horses.len() != bet_type.selection_size() {
            return Err(AdvisorError::Validation(format!(
                "{bet_type} ticket needs {} horse(s), got {}",
                bet_type.selection_size(),
                horses.len()
            )));
        }
        if horses.contains(&0) {
            return Err(AdvisorError::Validation("Horse numbers start at 1".into()));
        }
        for (i, h) in horses.iter().enumerate() {
            if horses[..i].contains(h) {
                return Err(AdvisorError::Validation(format!(
                    "Horse {h} appears twice in a {bet_type} ticket"
                )));
            }
        }
        if !bet_type.is_ordered() {
            horses.sort_unstable();
        }
        Ok(Self { bet_type, horses })
    }

    pub fn win(horse: u8) -> Self {
        Self { bet_type: BetType::Win, horses: vec![horse] }
    }

    pub fn place(horse: u8) -> Self {
        Self { bet_type: BetType::Place, horses: vec![horse] }
    }

    /// Stable identifier, e.g. `trifecta:3-5-1`.
    pub fn key(&self) -> String {
        format!("{}:{}", self.bet_type, self.horse_list())
    }

    /// Horses joined with `-` in ticket order.
    pub fn horse_list(&self) -> String {
        self.horses
            .iter()
            .map(|h| h.to_string())
            .collect::<Vec<_>>()
            .join("-")
    }

    pub fn contains(&self, horse: u8) -> bool {
        self.horses.contains(&horse)
    }
}

impl fmt::Display for Ticket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sep = if self.bet_type.is_ordered() { ">" } else { "-" };
        let horses = self
            .horses
            .iter()
            .map(|h| h.to_string())
            .collect::<Vec<_>>()
            .join(sep);
        write!(f, "{} {}", self.bet_type, horses)
    }
}

/// Parse a ticket key such as `trifecta:3-5-1`.
impl std::str::FromStr for Ticket {
    type Err = AdvisorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, horses) = s
            .split_once(':')
            .ok_or_else(|| AdvisorError::Validation(format!("Malformed ticket key: {s}")))?;
        let bet_type: BetType = kind.parse()?;
        let horses = horses
            .split(['-', '>'])
            .map(|h| {
                h.trim()
                    .parse::<u8>()
                    .map_err(|_| AdvisorError::Validation(format!("Bad horse number in {s}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ticket::new(bet_type, horses)
    }
}

// ---------------------------------------------------------------------------
// Odds
// ---------------------------------------------------------------------------

/// Decimal odds for one ticket: yen returned per yen staked on a hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OddsEntry {
    pub ticket: Ticket,
    pub odds: f64,
}

/// All odds currently offered for a race.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OddsBoard {
    pub race_id: String,
    pub updated_at: DateTime<Utc>,
    pub entries: Vec<OddsEntry>,
}

impl OddsBoard {
    pub fn odds_for(&self, ticket: &Ticket) -> Option<f64> {
        self.entries
            .iter()
            .find(|e| &e.ticket == ticket)
            .map(|e| e.odds)
    }

    pub fn win_odds(&self, horse: u8) -> Option<f64> {
        self.odds_for(&Ticket::win(horse))
    }

    pub fn entries_of(&self, bet_type: BetType) -> impl Iterator<Item = &OddsEntry> {
        self.entries.iter().filter(move |e| e.ticket.bet_type == bet_type)
    }

    /// Market-implied win probabilities (1/odds, normalised), keyed by horse.
    pub fn implied_win_probabilities(&self) -> Vec<(u8, f64)> {
        let raw: Vec<(u8, f64)> = self
            .entries_of(BetType::Win)
            .filter(|e| e.odds > 0.0)
            .map(|e| (e.ticket.horses[0], 1.0 / e.odds))
            .collect();
        let total: f64 = raw.iter().map(|(_, p)| p).sum();
        if total <= 0.0 {
            return Vec::new();
        }
        raw.into_iter().map(|(h, p)| (h, p / total)).collect()
    }
}

// ---------------------------------------------------------------------------
// User inputs
// ---------------------------------------------------------------------------

/// A user's probability estimate for one horse, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProbabilityInput {
    pub horse: u8,
    pub win_pct: f64,
    pub place_pct: f64,
}

/// Desired return relative to risk. Higher accepts more variance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct RiskRatio(f64);

impl RiskRatio {
    pub const MIN: f64 = 0.5;
    pub const MAX: f64 = 20.0;

    pub fn new(value: f64) -> Result<Self, AdvisorError> {
        if !value.is_finite() || !(Self::MIN..=Self::MAX).contains(&value) {
            return Err(AdvisorError::Validation(format!(
                "Risk ratio must be between {} and {}, got {value}",
                Self::MIN,
                Self::MAX
            )));
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

impl Default for RiskRatio {
    fn default() -> Self {
        Self(2.0)
    }
}

impl TryFrom<f64> for RiskRatio {
    type Error = AdvisorError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        RiskRatio::new(value)
    }
}

impl From<RiskRatio> for f64 {
    fn from(r: RiskRatio) -> f64 {
        r.0
    }
}

impl fmt::Display for RiskRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "x{:.1}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for PADDOCK.
#[derive(Debug, thiserror::Error)]
pub enum AdvisorError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Race not found: {0}")]
    RaceNotFound(String),

    #[error("Odds unavailable for race {0}")]
    OddsUnavailable(String),

    #[error("Session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("Cannot leave {from}: {reason}")]
    Transition { from: BettingStep, reason: String },

    #[error("Operation requires the {expected} step, session is at {actual}")]
    WrongStep { expected: BettingStep, actual: BettingStep },

    #[error("Analysis error ({model}): {message}")]
    Analysis { model: String, message: String },

    #[error("Data source error ({source_name}): {message}")]
    DataSource { source_name: String, message: String },

    #[error("Storage error: {0}")]
    Storage(String),
}

impl AdvisorError {
    /// Short machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            AdvisorError::Validation(_) => "validation_error",
            AdvisorError::RaceNotFound(_) => "race_not_found",
            AdvisorError::OddsUnavailable(_) => "odds_unavailable",
            AdvisorError::SessionNotFound(_) => "session_not_found",
            AdvisorError::Transition { .. } => "invalid_transition",
            AdvisorError::WrongStep { .. } => "wrong_step",
            AdvisorError::Analysis { .. } => "analysis_error",
            AdvisorError::DataSource { .. } => "data_source_error",
            AdvisorError::Storage(_) => "storage_error",
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
