//! Advisor pipeline: race data → analysis → analyst → wizard session.
//!
//! The HTTP layer only talks to [`Advisor`]; it owns the data source, the
//! strategy, the analysts and the session store, and records finished
//! portfolios to history.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::data::{RaceDataSource, RaceSummary};
use crate::llm::heuristic::HeuristicAnalyst;
use crate::llm::{AiAnalysis, AnalysisRequest, RaceAnalyst};
use crate::storage::PortfolioHistory;
use crate::strategy::portfolio::Portfolio;
use crate::strategy::{AnalysisResult, BettingStrategy};
use crate::types::{AdvisorError, OddsBoard, ProbabilityInput, Race, RiskRatio};
use crate::wizard::{AnalysisInputs, BettingSession, BettingStep, SessionStore};

/// Default time allowed for the remote analyst.
const DEFAULT_ANALYST_TIMEOUT: Duration = Duration::from_secs(30);

/// Options shown to the analyst as context.
const DEFAULT_TOP_OPTIONS: usize = 15;

/// Body of an analysis run.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisCommand {
    /// Defaults to the session's race.
    #[serde(default)]
    pub race_id: Option<String>,
    pub probabilities: Vec<ProbabilityInput>,
    pub budget: Decimal,
    /// Defaults to the configured risk ratio.
    #[serde(default)]
    pub risk_ratio: Option<RiskRatio>,
    /// Focus horses. Defaults to the session's selection.
    #[serde(default)]
    pub horses: Option<Vec<u8>>,
}

pub struct Advisor {
    source: Arc<dyn RaceDataSource>,
    strategy: Arc<BettingStrategy>,
    analyst: Arc<dyn RaceAnalyst>,
    fallback: HeuristicAnalyst,
    store: Arc<SessionStore>,
    history: Option<Arc<PortfolioHistory>>,
    analyst_timeout: Duration,
    top_options: usize,
    default_risk_ratio: RiskRatio,
}

impl Advisor {
    pub fn new(
        source: Arc<dyn RaceDataSource>,
        strategy: BettingStrategy,
        analyst: Arc<dyn RaceAnalyst>,
        store: Arc<SessionStore>,
        history: Option<Arc<PortfolioHistory>>,
    ) -> Self {
        Self {
            source,
            strategy: Arc::new(strategy),
            analyst,
            fallback: HeuristicAnalyst::default(),
            store,
            history,
            analyst_timeout: DEFAULT_ANALYST_TIMEOUT,
            top_options: DEFAULT_TOP_OPTIONS,
            default_risk_ratio: RiskRatio::default(),
        }
    }

    pub fn with_analyst_timeout(mut self, timeout: Duration) -> Self {
        self.analyst_timeout = timeout;
        self
    }

    pub fn with_top_options(mut self, top_options: usize) -> Self {
        self.top_options = top_options.max(1);
        self
    }

    pub fn with_default_risk_ratio(mut self, risk_ratio: RiskRatio) -> Self {
        self.default_risk_ratio = risk_ratio;
        self
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn source_name(&self) -> &'static str {
        self.source.name()
    }

    pub fn analyst_name(&self) -> &str {
        self.analyst.model_name()
    }

    // -- Race data ----------------------------------------------------------

    pub async fn list_races(&self, date: Option<NaiveDate>) -> Result<Vec<RaceSummary>, AdvisorError> {
        self.source.list_races(date).await
    }

    pub async fn race(&self, race_id: &str) -> Result<Race, AdvisorError> {
        self.source.fetch_race(race_id).await
    }

    pub async fn odds(&self, race_id: &str) -> Result<OddsBoard, AdvisorError> {
        self.source.fetch_odds(race_id).await
    }

    // -- Sessions -----------------------------------------------------------

    /// Open a session, checking the race exists first.
    pub async fn create_session(&self, race_id: Option<String>) -> Result<BettingSession, AdvisorError> {
        if let Some(id) = &race_id {
            self.source.fetch_race(id).await?;
        }
        Ok(self.store.create(race_id).await)
    }

    pub async fn session(&self, id: Uuid) -> Result<BettingSession, AdvisorError> {
        self.store.get(id).await
    }

    pub async fn remove_session(&self, id: Uuid) -> Result<(), AdvisorError> {
        self.store.remove(id).await
    }

    /// Analyse the session's race with the given estimates and store the
    /// result on the session.
    pub async fn run_analysis(&self, id: Uuid, command: AnalysisCommand) -> Result<BettingSession, AdvisorError> {
        let session = self.store.get(id).await?;
        if session.step != BettingStep::Analysis {
            return Err(AdvisorError::WrongStep {
                expected: BettingStep::Analysis,
                actual: session.step,
            });
        }
        let race_id = command
            .race_id
            .clone()
            .or_else(|| session.race_id.clone())
            .ok_or_else(|| AdvisorError::Validation("No race selected".into()))?;

        let (race, odds) = futures::try_join!(self.source.fetch_race(&race_id), self.source.fetch_odds(&race_id))?;

        // A different race drops the old focus.
        let focus: BTreeSet<u8> = match (&command.horses, session.race_id.as_deref() == Some(race_id.as_str())) {
            (Some(horses), _) => horses.iter().copied().collect(),
            (None, true) => session.selected_horses.clone(),
            (None, false) => BTreeSet::new(),
        };

        let risk_ratio = command.risk_ratio.unwrap_or(self.default_risk_ratio);
        let mut analysis = self.strategy.analyze(
            &race,
            &odds,
            &command.probabilities,
            command.budget,
            risk_ratio,
            &focus,
        )?;

        if let Some(ai) = self.consult_analyst(&race, &odds, &analysis).await {
            self.strategy.merge_analysis(&mut analysis, &odds, &focus, ai);
        }

        let inputs = AnalysisInputs {
            probabilities: command.probabilities,
            budget: analysis.budget,
            risk_ratio,
        };
        let (_, session) = self
            .store
            .update(id, |s| {
                s.select_race(&race_id)?;
                s.select_horses(focus)?;
                s.record_analysis(inputs, analysis)
            })
            .await?;

        info!(
            session_id = %id,
            race_id = %race_id,
            options = session.analysis.as_ref().map_or(0, |a| a.options.len()),
            "Analysis recorded"
        );
        Ok(session)
    }

    /// Ask the configured analyst, falling back to the heuristic on failure
    /// or timeout. `None` only if both fail.
    async fn consult_analyst(&self, race: &Race, odds: &OddsBoard, analysis: &AnalysisResult) -> Option<AiAnalysis> {
        let top = analysis.options.len().min(self.top_options);
        let request = AnalysisRequest {
            race,
            odds,
            probabilities: &analysis.probabilities,
            budget: analysis.budget,
            risk_ratio: analysis.risk_ratio,
            top_options: &analysis.options[..top],
        };

        match tokio::time::timeout(self.analyst_timeout, self.analyst.analyze(&request)).await {
            Ok(Ok(ai)) => return Some(ai),
            Ok(Err(e)) => warn!(
                race_id = %race.id,
                model = self.analyst.model_name(),
                error = %e,
                "Analyst failed, using heuristic"
            ),
            Err(_) => warn!(
                race_id = %race.id,
                model = self.analyst.model_name(),
                timeout_secs = self.analyst_timeout.as_secs(),
                "Analyst timed out, using heuristic"
            ),
        }

        match self.fallback.analyze(&request).await {
            Ok(ai) => Some(ai),
            Err(e) => {
                warn!(race_id = %race.id, error = %e, "Heuristic analyst failed");
                None
            }
        }
    }

    /// Flip one bet in the session's selection.
    pub async fn toggle_bet(&self, id: Uuid, option_id: &str) -> Result<(bool, BettingSession), AdvisorError> {
        self.store.update(id, |s| s.toggle_bet(option_id)).await
    }

    /// Replace the session's selection.
    pub async fn set_selection(&self, id: Uuid, option_ids: &[String]) -> Result<BettingSession, AdvisorError> {
        let (_, session) = self.store.update(id, |s| s.set_bets(option_ids)).await?;
        Ok(session)
    }

    /// Step forward. Leaving SELECTION computes the portfolio for the
    /// selected bets and records it to history.
    ///
    /// The optimizer runs on a blocking thread against a snapshot of the
    /// session, outside the store lock. The result is only committed if the
    /// selection and analysis are unchanged by then.
    pub async fn advance(&self, id: Uuid) -> Result<BettingSession, AdvisorError> {
        let snapshot = self.store.get(id).await?;
        let computed = if snapshot.step == BettingStep::Selection && !snapshot.selected_bets.is_empty() {
            let analysis = snapshot.analysis.clone().ok_or_else(|| AdvisorError::Transition {
                from: snapshot.step,
                reason: "no analysis recorded".into(),
            })?;
            let bets = snapshot.selected_bets.clone();
            let strategy = Arc::clone(&self.strategy);
            let portfolio = tokio::task::spawn_blocking(move || strategy.build_portfolio(&analysis, &bets))
                .await
                .map_err(|e| AdvisorError::Analysis {
                    model: "portfolio".into(),
                    message: format!("optimizer task failed: {e}"),
                })??;
            Some(portfolio)
        } else {
            None
        };

        let analysed_at = snapshot.analysis.as_ref().map(|a| a.created_at);
        let (_, session) = self
            .store
            .update(id, |s| {
                if let Some(portfolio) = &computed {
                    let unchanged = s.step == BettingStep::Selection
                        && s.selected_bets == snapshot.selected_bets
                        && s.analysis.as_ref().map(|a| a.created_at) == analysed_at;
                    if !unchanged {
                        return Err(AdvisorError::Transition {
                            from: s.step,
                            reason: "the session changed while the portfolio was computed".into(),
                        });
                    }
                    s.set_portfolio(portfolio.clone())?;
                }
                s.advance()
            })
            .await?;

        if let Some(portfolio) = computed {
            info!(
                session_id = %id,
                race_id = %portfolio.race_id,
                tickets = portfolio.ticket_count(),
                total_stake = %portfolio.total_stake,
                expected_return = %portfolio.expected_return,
                "Portfolio finalized"
            );
            self.record(id, &portfolio).await;
        }
        Ok(session)
    }

    pub async fn back(&self, id: Uuid) -> Result<BettingSession, AdvisorError> {
        let (_, session) = self.store.update(id, |s| Ok(s.back())).await?;
        Ok(session)
    }

    pub async fn reset(&self, id: Uuid) -> Result<BettingSession, AdvisorError> {
        let (_, session) = self.store.update(id, |s| {
            s.reset();
            Ok(())
        })
        .await?;
        Ok(session)
    }

    async fn record(&self, session_id: Uuid, portfolio: &Portfolio) {
        if let Some(history) = &self.history {
            if let Err(e) = history.record(session_id, portfolio).await {
                warn!(session_id = %session_id, error = %e, "Failed to record portfolio");
            }
        }
    }

    /// Recent finalized portfolios, newest first.
    pub async fn recent_portfolios(&self, race_id: Option<&str>, limit: usize) -> Result<Vec<Portfolio>, AdvisorError> {
        match &self.history {
            Some(history) => history
                .recent(race_id, limit)
                .await
                .map_err(|e| AdvisorError::Storage(e.to_string())),
            None => Ok(Vec::new()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
