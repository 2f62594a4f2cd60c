//! Local race data.
//!
//! Serves races and odds from memory, loaded from a JSON file of the form
//! `{"races": [...], "odds": [...]}`. Win-only boards can be expanded to
//! every bet type with synthetic odds.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::info;

use super::synthetic::{expand_board, is_win_only};
use super::{sort_summaries, RaceDataSource, RaceSummary};
use crate::types::{AdvisorError, OddsBoard, Race};

#[derive(Debug, Deserialize)]
struct FixtureFile {
    races: Vec<Race>,
    #[serde(default)]
    odds: Vec<OddsBoard>,
}

pub struct FixtureSource {
    races: HashMap<String, Race>,
    odds: HashMap<String, OddsBoard>,
}

impl FixtureSource {
    /// Build from in-memory data. With `synthesize`, win-only boards are
    /// expanded once up front.
    pub fn new(races: Vec<Race>, odds: Vec<OddsBoard>, synthesize: bool) -> Result<Self, AdvisorError> {
        let races: HashMap<String, Race> = races.into_iter().map(|r| (r.id.clone(), r)).collect();
        let mut boards = HashMap::with_capacity(odds.len());

        for board in odds {
            let board = match races.get(&board.race_id) {
                Some(race) if synthesize && is_win_only(&board) => expand_board(race, &board)?,
                _ => board,
            };
            boards.insert(board.race_id.clone(), board);
        }

        Ok(Self { races, odds: boards })
    }

    /// Load a fixture file.
    pub fn from_file(path: &str, synthesize: bool) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read race fixture {path}"))?;
        let file: FixtureFile = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse race fixture {path}"))?;

        let source = Self::new(file.races, file.odds, synthesize)
            .with_context(|| format!("Invalid odds in race fixture {path}"))?;
        info!(
            path,
            races = source.races.len(),
            boards = source.odds.len(),
            synthesize,
            "Race fixture loaded"
        );
        Ok(source)
    }

    pub fn race_count(&self) -> usize {
        self.races.len()
    }
}

#[async_trait]
impl RaceDataSource for FixtureSource {
    async fn list_races(&self, date: Option<NaiveDate>) -> Result<Vec<RaceSummary>, AdvisorError> {
        let mut races: Vec<RaceSummary> = self
            .races
            .values()
            .filter(|r| date.map_or(true, |d| r.date == d))
            .map(RaceSummary::from)
            .collect();
        sort_summaries(&mut races);
        Ok(races)
    }

    async fn fetch_race(&self, race_id: &str) -> Result<Race, AdvisorError> {
        self.races
            .get(race_id)
            .cloned()
            .ok_or_else(|| AdvisorError::RaceNotFound(race_id.to_string()))
    }

    async fn fetch_odds(&self, race_id: &str) -> Result<OddsBoard, AdvisorError> {
        if !self.races.contains_key(race_id) {
            return Err(AdvisorError::RaceNotFound(race_id.to_string()));
        }
        self.odds
            .get(race_id)
            .cloned()
            .ok_or_else(|| AdvisorError::OddsUnavailable(race_id.to_string()))
    }

    fn name(&self) -> &'static str {
        "fixture"
    }
}
