//! TTL query cache in front of any race source.
//!
//! Race cards change rarely and odds often, so each kind has its own stale
//! time. Errors are never cached and there is no retry here; the wrapped
//! source owns that.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

use super::{RaceDataSource, RaceSummary};
use crate::types::{AdvisorError, OddsBoard, Race};

/// Stale times per query kind.
#[derive(Debug, Clone, Copy)]
pub struct CacheTtl {
    pub races: Duration,
    pub odds: Duration,
}

impl Default for CacheTtl {
    fn default() -> Self {
        Self {
            races: Duration::from_secs(600),
            odds: Duration::from_secs(60),
        }
    }
}

struct Entry<T> {
    value: T,
    fetched_at: Instant,
}

/// A map of values that go stale after `ttl`.
struct TtlMap<K, T> {
    ttl: Duration,
    entries: RwLock<HashMap<K, Entry<T>>>,
}

impl<K: Eq + Hash, T: Clone> TtlMap<K, T> {
    fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    async fn get(&self, key: &K) -> Option<T> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|e| e.fetched_at.elapsed() < self.ttl)
            .map(|e| e.value.clone())
    }

    /// Insert `value`, dropping entries that have gone stale.
    async fn put(&self, key: K, value: T) {
        let mut entries = self.entries.write().await;
        entries.retain(|_, e| e.fetched_at.elapsed() < self.ttl);
        entries.insert(
            key,
            Entry {
                value,
                fetched_at: Instant::now(),
            },
        );
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    async fn remove(&self, key: &K) {
        self.entries.write().await.remove(key);
    }

    async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

pub struct CachedSource<S> {
    inner: S,
    listings: TtlMap<Option<NaiveDate>, Vec<RaceSummary>>,
    races: TtlMap<String, Race>,
    odds: TtlMap<String, OddsBoard>,
}

impl<S: RaceDataSource> CachedSource<S> {
    pub fn new(inner: S, ttl: CacheTtl) -> Self {
        Self {
            inner,
            listings: TtlMap::new(ttl.races),
            races: TtlMap::new(ttl.races),
            odds: TtlMap::new(ttl.odds),
        }
    }

    /// Drop everything cached for one race.
    pub async fn invalidate(&self, race_id: &str) {
        let key = race_id.to_string();
        self.races.remove(&key).await;
        self.odds.remove(&key).await;
        self.listings.clear().await;
        debug!(race_id, "Race cache invalidated");
    }

    pub async fn clear(&self) {
        self.listings.clear().await;
        self.races.clear().await;
        self.odds.clear().await;
    }
}

#[async_trait]
impl<S: RaceDataSource> RaceDataSource for CachedSource<S> {
    async fn list_races(&self, date: Option<NaiveDate>) -> Result<Vec<RaceSummary>, AdvisorError> {
        if let Some(hit) = self.listings.get(&date).await {
            return Ok(hit);
        }
        let races = self.inner.list_races(date).await?;
        self.listings.put(date, races.clone()).await;
        Ok(races)
    }

    async fn fetch_race(&self, race_id: &str) -> Result<Race, AdvisorError> {
        let key = race_id.to_string();
        if let Some(hit) = self.races.get(&key).await {
            debug!(race_id, "Race card cache hit");
            return Ok(hit);
        }
        let race = self.inner.fetch_race(race_id).await?;
        self.races.put(key, race.clone()).await;
        Ok(race)
    }

    async fn fetch_odds(&self, race_id: &str) -> Result<OddsBoard, AdvisorError> {
        let key = race_id.to_string();
        if let Some(hit) = self.odds.get(&key).await {
            debug!(race_id, "Odds cache hit");
            return Ok(hit);
        }
        let board = self.inner.fetch_odds(race_id).await?;
        self.odds.put(key, board.clone()).await;
        Ok(board)
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}
