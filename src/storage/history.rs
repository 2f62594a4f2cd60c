//! Portfolio history in SQLite.
//!
//! Every computed portfolio is appended with a few summary columns for
//! querying and the full portfolio as a JSON payload.

use anyhow::{Context, Result};
use chrono::SecondsFormat;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

use crate::strategy::portfolio::Portfolio;
use crate::types::to_f64;

pub struct PortfolioHistory {
    pool: SqlitePool,
}

impl PortfolioHistory {
    /// Open (creating if needed) the database at `url`, e.g.
    /// `sqlite://paddock.db` or `sqlite::memory:`.
    pub async fn open(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("Invalid history database url {url}"))?
            .create_if_missing(true);
        // In-memory databases live and die with their one connection.
        let pool_options = if url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(4)
        };
        let pool = pool_options
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open history database {url}"))?;

        let history = Self { pool };
        history.migrate().await?;
        info!(url, "Portfolio history opened");
        Ok(history)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS portfolios (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                race_id TEXT NOT NULL,
                budget TEXT NOT NULL,
                total_stake TEXT NOT NULL,
                expected_return REAL NOT NULL,
                hit_probability REAL NOT NULL,
                tickets INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                payload TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create portfolios table")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_portfolios_race ON portfolios(race_id, created_at)")
            .execute(&self.pool)
            .await
            .context("Failed to create portfolios index")?;
        Ok(())
    }

    /// Append a portfolio. Recording the same portfolio twice is a no-op.
    pub async fn record(&self, session_id: Uuid, portfolio: &Portfolio) -> Result<()> {
        let payload = serde_json::to_string(portfolio).context("Failed to serialise portfolio")?;
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO portfolios (
                id, session_id, race_id, budget, total_stake,
                expected_return, hit_probability, tickets, created_at, payload
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(portfolio.id.to_string())
        .bind(session_id.to_string())
        .bind(&portfolio.race_id)
        .bind(portfolio.budget.to_string())
        .bind(portfolio.total_stake.to_string())
        .bind(to_f64(portfolio.expected_return))
        .bind(portfolio.hit_probability)
        .bind(portfolio.ticket_count() as i64)
        .bind(portfolio.created_at.to_rfc3339_opts(SecondsFormat::Micros, true))
        .bind(payload)
        .execute(&self.pool)
        .await
        .context("Failed to record portfolio")?;

        debug!(portfolio_id = %portfolio.id, race_id = %portfolio.race_id, "Portfolio recorded");
        Ok(())
    }

    /// Most recent portfolios first, optionally for one race.
    pub async fn recent(&self, race_id: Option<&str>, limit: usize) -> Result<Vec<Portfolio>> {
        let payloads = match race_id {
            Some(race_id) => {
                sqlx::query_scalar::<_, String>(
                    "SELECT payload FROM portfolios WHERE race_id = ? ORDER BY created_at DESC, rowid DESC LIMIT ?",
                )
                .bind(race_id)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_scalar::<_, String>(
                    "SELECT payload FROM portfolios ORDER BY created_at DESC, rowid DESC LIMIT ?",
                )
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
            }
        }
        .context("Failed to query portfolio history")?;

        payloads
            .iter()
            .map(|p| serde_json::from_str(p).context("Corrupt portfolio payload"))
            .collect()
    }

    pub async fn count(&self) -> Result<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM portfolios")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count portfolios")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::tests::{sample_board, sample_inputs};
    use crate::strategy::BettingStrategy;
    use crate::types::{Race, RiskRatio};
    use rust_decimal_macros::dec;
    use std::collections::BTreeSet;

    fn portfolio(race: &Race) -> Portfolio {
        let strategy = BettingStrategy::default();
        let analysis = strategy
            .analyze(race, &sample_board(race), &sample_inputs(), dec!(5000), RiskRatio::default(), &BTreeSet::new())
            .unwrap();
        let ids: Vec<String> = analysis.options.iter().take(3).map(|o| o.id.clone()).collect();
        strategy.build_portfolio(&analysis, &ids).unwrap()
    }

    #[tokio::test]
    async fn test_record_and_recent() {
        let history = PortfolioHistory::open("sqlite::memory:").await.unwrap();
        let race = Race::sample(8);
        let first = portfolio(&race);
        let second = portfolio(&race);

        history.record(Uuid::new_v4(), &first).await.unwrap();
        history.record(Uuid::new_v4(), &second).await.unwrap();
        // Duplicate insert ignored.
        history.record(Uuid::new_v4(), &second).await.unwrap();
        assert_eq!(history.count().await.unwrap(), 2);

        let recent = history.recent(None, 10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, second.id);
        assert_eq!(recent[0].total_stake, second.total_stake);

        assert_eq!(history.recent(None, 1).await.unwrap().len(), 1);
        assert_eq!(history.recent(Some(&race.id), 10).await.unwrap().len(), 2);
        assert!(history.recent(Some("other"), 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_open_file_database() {
        let path = std::env::temp_dir().join(format!("paddock_history_{}.db", Uuid::new_v4()));
        let url = format!("sqlite://{}", path.display());
        {
            let history = PortfolioHistory::open(&url).await.unwrap();
            history.record(Uuid::new_v4(), &portfolio(&Race::sample(8))).await.unwrap();
        }
        let reopened = PortfolioHistory::open(&url).await.unwrap();
        assert_eq!(reopened.count().await.unwrap(), 1);
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_unreachable_path() {
        assert!(PortfolioHistory::open("sqlite:///nonexistent-paddock-dir/sub/history.db").await.is_err());
    }
}
