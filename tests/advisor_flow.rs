//! End-to-end wizard flows over the HTTP API, backed by the bundled race
//! fixture with synthesized odds.

mod common;

use axum::http::StatusCode;
use axum::{routing::post, Json, Router};
use rust_decimal::Decimal;
use secrecy::SecretString;
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::Arc;

use common::{call, heuristic_advisor, tokyo_estimates, KYOTO, NIIGATA, TOKYO};
use paddock::llm::gemini::GeminiClient;
use paddock::server::build_router;
use paddock::storage;
use paddock::wizard::{BettingSession, BettingStep, SessionStore};

fn decimal(v: &Value) -> Decimal {
    Decimal::from_str(&v.to_string()).unwrap()
}

async fn new_session(app: &Router, race_id: &str) -> String {
    let (status, session) = call(app, "POST", "/api/sessions", Some(json!({"race_id": race_id}))).await;
    assert_eq!(status, StatusCode::CREATED);
    session["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_full_wizard_produces_valid_portfolio() {
    let app = build_router(heuristic_advisor().await);

    let (_, races) = call(&app, "GET", "/api/races?date=2026-10-18", None).await;
    let ids: Vec<&str> = races.as_array().unwrap().iter().map(|r| r["id"].as_str().unwrap()).collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&TOKYO));

    let id = new_session(&app, TOKYO).await;
    let (status, session) = call(&app, "POST", &format!("/api/sessions/{id}/analysis"), Some(tokyo_estimates())).await;
    assert_eq!(status, StatusCode::OK);

    // Win probabilities are normalized to one, place to the paid places.
    let probs = &session["analysis"]["probabilities"];
    let win_total: f64 = probs["win"].as_array().unwrap().iter().map(|p| p.as_f64().unwrap()).sum();
    let place_total: f64 = probs["place"].as_array().unwrap().iter().map(|p| p.as_f64().unwrap()).sum();
    assert!((win_total - 1.0).abs() < 1e-9);
    assert!((place_total - 3.0).abs() < 1e-6);

    let options = session["analysis"]["options"].as_array().unwrap().clone();
    assert!(!options.is_empty());
    let recommended: Vec<String> = options
        .iter()
        .filter(|o| o["recommended"].as_bool().unwrap())
        .map(|o| o["id"].as_str().unwrap().to_string())
        .collect();
    assert!(!recommended.is_empty());

    let (_, session) = call(&app, "POST", &format!("/api/sessions/{id}/advance"), None).await;
    assert_eq!(session["step"], "SELECTION");

    let (status, _) = call(
        &app,
        "PUT",
        &format!("/api/sessions/{id}/selection"),
        Some(json!({"bets": recommended})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, session) = call(&app, "POST", &format!("/api/sessions/{id}/advance"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(session["step"], "PORTFOLIO");

    let portfolio = &session["portfolio"];
    let budget = decimal(&portfolio["budget"]);
    let total = decimal(&portfolio["total_stake"]);
    assert_eq!(budget, Decimal::from(10000));
    assert!(total <= budget);
    assert_eq!(total + decimal(&portfolio["unallocated"]), budget);

    let mut sum = Decimal::ZERO;
    for allocation in portfolio["allocations"].as_array().unwrap() {
        let stake = decimal(&allocation["stake"]);
        assert!(stake > Decimal::ZERO);
        assert_eq!(stake % Decimal::from(100), Decimal::ZERO);
        assert!(recommended.contains(&allocation["option"]["id"].as_str().unwrap().to_string()));
        sum += stake;
    }
    assert_eq!(sum, total);

    let (_, history) = call(&app, "GET", &format!("/api/portfolios?race_id={TOKYO}"), None).await;
    assert_eq!(history.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_back_navigation_keeps_inputs() {
    let app = build_router(heuristic_advisor().await);
    let id = new_session(&app, TOKYO).await;
    call(&app, "POST", &format!("/api/sessions/{id}/analysis"), Some(tokyo_estimates())).await;
    call(&app, "POST", &format!("/api/sessions/{id}/advance"), None).await;

    let (_, session) = call(&app, "POST", &format!("/api/sessions/{id}/back"), None).await;
    assert_eq!(session["step"], "ANALYSIS");
    assert!(session["analysis"].is_object());
    assert_eq!(session["inputs"]["budget"].as_f64().unwrap(), 10000.0);

    // Back at the first step is a no-op rather than an error.
    let (status, session) = call(&app, "POST", &format!("/api/sessions/{id}/back"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(session["step"], "ANALYSIS");
}

#[tokio::test]
async fn test_scratched_horse_rejected() {
    let app = build_router(heuristic_advisor().await);
    let id = new_session(&app, KYOTO).await;

    let body = json!({
        "probabilities": [
            {"horse": 1, "win_pct": 40.0, "place_pct": 70.0},
            {"horse": 6, "win_pct": 20.0, "place_pct": 40.0}
        ],
        "budget": 5000
    });
    let (status, err) = call(&app, "POST", &format!("/api/sessions/{id}/analysis"), Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["error"], "validation_error");
}

#[tokio::test]
async fn test_race_without_odds() {
    let app = build_router(heuristic_advisor().await);
    let (status, err) = call(&app, "GET", &format!("/api/races/{NIIGATA}/odds"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(err["error"], "odds_unavailable");

    let id = new_session(&app, NIIGATA).await;
    let body = json!({
        "probabilities": [{"horse": 1, "win_pct": 50.0, "place_pct": 0.0}],
        "budget": 1000
    });
    let (status, _) = call(&app, "POST", &format!("/api/sessions/{id}/analysis"), Some(body)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_gemini_proposals_are_merged() {
    let text = r#"```json
{"summary": "Pace favours the leaders.",
 "proposals": [
   {"bet_type": "trifecta", "horses": [1, 2, 3], "confidence": 65, "reason": "Front-runners"},
   {"bet_type": "win", "horses": [42], "confidence": 0.9, "reason": "Not in the race"}
 ]}
```"#;
    let reply = json!({
        "candidates": [{"content": {"role": "model", "parts": [{"text": text}]}, "finishReason": "STOP"}],
        "usageMetadata": {"totalTokenCount": 512}
    });
    let app = Router::new().route("/models/:model", post(move || async move { Json(reply) }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let gemini = GeminiClient::new(SecretString::new("test-key".into()), None, None)
        .unwrap()
        .with_base_url(format!("http://{addr}"))
        .with_backoff_ms(1);
    let api = build_router(common::advisor(Arc::new(gemini)).await);

    let id = new_session(&api, TOKYO).await;
    let (status, session) = call(&api, "POST", &format!("/api/sessions/{id}/analysis"), Some(tokyo_estimates())).await;
    assert_eq!(status, StatusCode::OK);

    let ai = &session["analysis"]["ai"];
    assert_eq!(ai["model"], "gemini-2.0-flash");
    assert_eq!(ai["summary"], "Pace favours the leaders.");
    assert_eq!(ai["tokens_used"], 512);

    let options = session["analysis"]["options"].as_array().unwrap();
    let trifecta = options.iter().find(|o| o["id"] == "trifecta:1-2-3").unwrap();
    assert_eq!(trifecta["recommended"], true);
    assert!((trifecta["analyst_confidence"].as_f64().unwrap() - 0.65).abs() < 1e-9);
}

#[tokio::test]
async fn test_sessions_survive_snapshot() {
    let advisor = heuristic_advisor().await;
    let app = build_router(advisor.clone());
    let id = new_session(&app, TOKYO).await;
    call(&app, "POST", &format!("/api/sessions/{id}/analysis"), Some(tokyo_estimates())).await;
    call(&app, "POST", &format!("/api/sessions/{id}/advance"), None).await;

    let path = std::env::temp_dir().join(format!("paddock_it_sessions_{id}.json"));
    let path = path.to_str().unwrap();
    storage::save_sessions(&advisor.store().snapshot().await, Some(path)).unwrap();

    let restored = SessionStore::new();
    restored.restore(storage::load_sessions(Some(path)).unwrap()).await;
    storage::delete_sessions(Some(path)).unwrap();

    let session: BettingSession = restored.get(id.parse().unwrap()).await.unwrap();
    assert_eq!(session.step, BettingStep::Selection);
    assert!(session.analysis.unwrap().has_options());
}
