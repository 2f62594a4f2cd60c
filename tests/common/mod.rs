//! Shared helpers for integration tests.

#![allow(dead_code)]

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use paddock::data::fixture::FixtureSource;
use paddock::data::RaceDataSource;
use paddock::engine::Advisor;
use paddock::llm::heuristic::HeuristicAnalyst;
use paddock::llm::RaceAnalyst;
use paddock::storage::PortfolioHistory;
use paddock::strategy::BettingStrategy;
use paddock::wizard::SessionStore;

pub const TOKYO: &str = "2026-10-18-tokyo-11";
pub const KYOTO: &str = "2026-10-18-kyoto-11";
pub const NIIGATA: &str = "2026-10-19-niigata-1";

pub fn fixture_source() -> Arc<dyn RaceDataSource> {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/data/races.json");
    Arc::new(FixtureSource::from_file(path, true).unwrap())
}

pub async fn advisor(analyst: Arc<dyn RaceAnalyst>) -> Arc<Advisor> {
    let history = PortfolioHistory::open("sqlite::memory:").await.unwrap();
    Arc::new(Advisor::new(
        fixture_source(),
        BettingStrategy::default(),
        analyst,
        Arc::new(SessionStore::new()),
        Some(Arc::new(history)),
    ))
}

pub async fn heuristic_advisor() -> Arc<Advisor> {
    advisor(Arc::new(HeuristicAnalyst::default())).await
}

/// Estimates for the ten-runner Tokyo race. Horses 3 and 5 are rated
/// well above their market price.
pub fn tokyo_estimates() -> Value {
    let win = [22.0, 16.0, 24.0, 8.0, 10.0, 6.0, 5.0, 4.0, 3.0, 2.0];
    let probabilities: Vec<Value> = win
        .iter()
        .enumerate()
        .map(|(i, w)| json!({"horse": i + 1, "win_pct": w, "place_pct": w * 2.5}))
        .collect();
    json!({"probabilities": probabilities, "budget": 10000, "risk_ratio": 3.0})
}

/// Send one request through the router and decode the JSON body.
pub async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };
    let resp = app.clone().oneshot(request).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), 50_000_000).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}
