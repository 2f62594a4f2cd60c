//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` (or the file named by `PADDOCK_CONFIG`) and
//! deserializes into strongly-typed structs. Every section has defaults, so a
//! missing key falls back to a working local setup. Secrets (API keys) are
//! referenced by env-var name and resolved at runtime.

use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::time::Duration;

use crate::data::cache::CacheTtl;
use crate::strategy::evaluation::EvaluationConfig;
use crate::strategy::kelly::{KellyCalculator, KellyConfig};
use crate::strategy::portfolio::PortfolioConfig;
use crate::strategy::BettingStrategy;
use crate::types::{BetType, RiskRatio, TICKET_UNIT};

/// Default config file path.
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Env var overriding the config file path.
pub const CONFIG_PATH_ENV: &str = "PADDOCK_CONFIG";

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub assistant: AssistantConfig,
    pub data: DataConfig,
    pub llm: LlmConfig,
    pub strategy: StrategyConfig,
    pub server: ServerConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AssistantConfig {
    pub name: String,
    /// Sessions untouched this long are dropped.
    pub session_idle_minutes: i64,
    /// How often idle sessions are swept.
    pub purge_interval_secs: u64,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            name: "PADDOCK".into(),
            session_idle_minutes: 180,
            purge_interval_secs: 300,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Api,
    Fixture,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DataConfig {
    pub source: SourceKind,
    pub base_url: String,
    pub fixture_path: String,
    /// Price every bet type from win odds when a board only has win odds.
    pub synthesize_odds: bool,
    pub timeout_secs: u64,
    pub race_ttl_secs: u64,
    pub odds_ttl_secs: u64,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            source: SourceKind::Fixture,
            base_url: "http://localhost:8080/v1".into(),
            fixture_path: "data/races.json".into(),
            synthesize_odds: true,
            timeout_secs: 15,
            race_ttl_secs: 600,
            odds_ttl_secs: 60,
        }
    }
}

impl DataConfig {
    pub fn cache_ttl(&self) -> CacheTtl {
        CacheTtl {
            races: Duration::from_secs(self.race_ttl_secs),
            odds: Duration::from_secs(self.odds_ttl_secs),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    pub api_key_env: String,
    #[serde(default)]
    pub base_url: Option<String>,
    pub max_output_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,
    /// Best-scored options included in the prompt.
    pub top_options: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "gemini".into(),
            model: "gemini-2.0-flash".into(),
            api_key_env: "GEMINI_API_KEY".into(),
            base_url: None,
            max_output_tokens: 2048,
            temperature: 0.4,
            timeout_secs: 30,
            top_options: 15,
        }
    }
}

impl LlmConfig {
    /// The API key, if its env var is set and non-empty.
    pub fn api_key(&self) -> Option<SecretString> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .map(SecretString::new)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StrategyConfig {
    pub kelly_multiplier: f64,
    pub max_stake_pct: f64,
    pub min_stake: Decimal,
    pub min_probability: f64,
    pub max_options: usize,
    pub bet_types: Vec<BetType>,
    pub kelly_cap_multiplier: f64,
    pub default_risk_ratio: f64,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        let evaluation = EvaluationConfig::default();
        let kelly = KellyConfig::default();
        Self {
            kelly_multiplier: kelly.multiplier,
            max_stake_pct: kelly.max_stake_pct,
            min_stake: kelly.min_stake,
            min_probability: evaluation.min_probability,
            max_options: evaluation.max_options,
            bet_types: evaluation.bet_types,
            kelly_cap_multiplier: PortfolioConfig::default().kelly_cap_multiplier,
            default_risk_ratio: 2.0,
        }
    }
}

impl StrategyConfig {
    /// Check ranges and build the strategy.
    pub fn build(&self) -> Result<BettingStrategy> {
        if !(0.0..=1.0).contains(&self.kelly_multiplier) || self.kelly_multiplier == 0.0 {
            bail!("strategy.kelly_multiplier must be in (0, 1], got {}", self.kelly_multiplier);
        }
        if !(0.0..=1.0).contains(&self.max_stake_pct) || self.max_stake_pct == 0.0 {
            bail!("strategy.max_stake_pct must be in (0, 1], got {}", self.max_stake_pct);
        }
        if self.min_stake < TICKET_UNIT {
            bail!("strategy.min_stake must be at least {TICKET_UNIT}");
        }
        if self.bet_types.is_empty() {
            bail!("strategy.bet_types must name at least one bet type");
        }
        if self.kelly_cap_multiplier <= 0.0 {
            bail!("strategy.kelly_cap_multiplier must be positive");
        }
        self.risk_ratio()?;

        Ok(BettingStrategy::new(
            EvaluationConfig {
                min_probability: self.min_probability,
                max_options: self.max_options.max(1),
                bet_types: self.bet_types.clone(),
            },
            KellyCalculator::new(KellyConfig {
                multiplier: self.kelly_multiplier,
                max_stake_pct: self.max_stake_pct,
                min_stake: self.min_stake,
            }),
            PortfolioConfig {
                kelly_cap_multiplier: self.kelly_cap_multiplier,
            },
        ))
    }

    pub fn risk_ratio(&self) -> Result<RiskRatio> {
        RiskRatio::new(self.default_risk_ratio).context("Invalid strategy.default_risk_ratio")
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 3000,
        }
    }
}

impl ServerConfig {
    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid server address {}:{}", self.host, self.port))
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite url for portfolio history. Empty disables history.
    pub history_url: String,
    pub session_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            history_url: "sqlite://paddock.db".into(),
            session_file: "paddock_sessions.json".into(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        Ok(config)
    }

    /// Config path from `PADDOCK_CONFIG`, else `config.toml`.
    pub fn path_from_env() -> String {
        std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name).with_context(|| format!("Environment variable not set: {env_name}"))
    }
}
