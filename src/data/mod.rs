//! Race data access.
//!
//! Defines the `RaceDataSource` trait and provides a REST client, a JSON
//! fixture source and a TTL cache that wraps either.

pub mod api;
pub mod cache;
pub mod fixture;
pub mod synthetic;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AdvisorError, OddsBoard, Race};

/// Race listing entry (card without horses).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceSummary {
    pub id: String,
    pub name: String,
    pub venue: String,
    pub date: NaiveDate,
    pub race_number: u8,
    #[serde(default)]
    pub post_time: Option<DateTime<Utc>>,
    pub runners: usize,
}

impl From<&Race> for RaceSummary {
    fn from(race: &Race) -> Self {
        Self {
            id: race.id.clone(),
            name: race.name.clone(),
            venue: race.venue.clone(),
            date: race.date,
            race_number: race.race_number,
            post_time: race.post_time,
            runners: race.runner_count(),
        }
    }
}

/// Read-only source of race cards and odds.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RaceDataSource: Send + Sync {
    /// Races on `date`, or every known race when `None`.
    async fn list_races(&self, date: Option<NaiveDate>) -> Result<Vec<RaceSummary>, AdvisorError>;

    async fn fetch_race(&self, race_id: &str) -> Result<Race, AdvisorError>;

    async fn fetch_odds(&self, race_id: &str) -> Result<OddsBoard, AdvisorError>;

    /// Short identifier for logs and errors.
    fn name(&self) -> &'static str;
}

/// Listing order: date, venue, race number.
pub(crate) fn sort_summaries(races: &mut [RaceSummary]) {
    races.sort_by(|a, b| {
        a.date
            .cmp(&b.date)
            .then_with(|| a.venue.cmp(&b.venue))
            .then_with(|| a.race_number.cmp(&b.race_number))
    });
}
