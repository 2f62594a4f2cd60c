//! Persistence layer.
//!
//! Wizard sessions are snapshotted to a JSON file on shutdown and restored on
//! start. Computed portfolios go to SQLite (see [`history`]).

pub mod history;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use crate::wizard::BettingSession;

pub use history::PortfolioHistory;

/// Default snapshot file path.
const DEFAULT_SESSION_FILE: &str = "paddock_sessions.json";

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub saved_at: DateTime<Utc>,
    pub sessions: Vec<BettingSession>,
}

/// Save sessions to a JSON file.
pub fn save_sessions(sessions: &[BettingSession], path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_SESSION_FILE);
    let snapshot = SessionSnapshot {
        saved_at: Utc::now(),
        sessions: sessions.to_vec(),
    };
    let json = serde_json::to_string_pretty(&snapshot).context("Failed to serialise sessions")?;

    std::fs::write(path, &json).context(format!("Failed to write sessions to {path}"))?;

    debug!(path, sessions = sessions.len(), "Sessions saved");
    Ok(())
}

/// Load sessions from a JSON file.
/// Returns an empty list if the file doesn't exist (fresh start).
pub fn load_sessions(path: Option<&str>) -> Result<Vec<BettingSession>> {
    let path = path.unwrap_or(DEFAULT_SESSION_FILE);

    if !Path::new(path).exists() {
        info!(path, "No saved sessions found, starting fresh");
        return Ok(Vec::new());
    }

    let json = std::fs::read_to_string(path).context(format!("Failed to read sessions from {path}"))?;

    let snapshot: SessionSnapshot =
        serde_json::from_str(&json).context(format!("Failed to parse sessions from {path}"))?;

    info!(
        path,
        sessions = snapshot.sessions.len(),
        saved_at = %snapshot.saved_at,
        "Sessions loaded from disk"
    );

    Ok(snapshot.sessions)
}

/// Delete the snapshot file.
pub fn delete_sessions(path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_SESSION_FILE);
    if Path::new(path).exists() {
        std::fs::remove_file(path).context(format!("Failed to delete session file {path}"))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
