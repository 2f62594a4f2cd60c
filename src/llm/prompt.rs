//! Prompt construction and response parsing for race analysis.
//!
//! The model is asked for a single JSON object. Parsing is tolerant: code
//! fences and surrounding prose are stripped, bet types accept JRA names,
//! horse lists may be arrays or strings like `"3-5-1"`, and invalid
//! proposals are skipped rather than failing the whole response.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt::Write as _;
use tracing::debug;

use super::{AiProposal, AnalysisRequest};
use crate::types::{BetType, Race, Ticket};

/// Proposals kept from one response.
pub const MAX_PROPOSALS: usize = 10;

/// Options listed in the prompt.
const PROMPT_OPTIONS: usize = 15;

/// Longest reason kept per proposal.
const MAX_REASON_CHARS: usize = 400;

pub const SYSTEM_PROMPT: &str = "You are an experienced Japanese horse-racing analyst. \
You help a bettor turn their own win and place estimates into a small set of \
betting tickets.\n\n\
RULES:\n\
1. Use the bettor's probabilities as the primary signal; the odds show what the market thinks.\n\
2. Prefer tickets with expected value above 1.0, but explain when a longer shot is worth it.\n\
3. Respect the risk ratio: a low ratio wants steady tickets, a high ratio tolerates long odds.\n\
4. Only propose horses that are running and bet types from this list: \
win, place, quinella, wide, exacta, trio, trifecta.\n\
5. Respond with ONE JSON object and nothing else, in exactly this shape:\n\
{\"summary\": \"...\", \"proposals\": [{\"bet_type\": \"exacta\", \"horses\": [3, 5], \
\"confidence\": 0.6, \"reason\": \"...\"}]}\n\
6. Horses in exacta and trifecta are in finishing order. Confidence is between 0 and 1.\n\
7. Propose at most 8 tickets.";

/// Build the user prompt for one race.
pub fn build_prompt(request: &AnalysisRequest<'_>) -> String {
    let race = request.race;
    let probs = request.probabilities;
    let mut prompt = String::with_capacity(3000);

    let _ = writeln!(
        prompt,
        "RACE: {} at {} R{} ({} {}m {})",
        race.name, race.venue, race.race_number, race.date, race.distance_m, race.surface
    );
    let _ = writeln!(prompt, "RUNNERS: {} (place pays top {})", race.runner_count(), probs.paid_places);
    let _ = writeln!(prompt, "BUDGET: {} yen", request.budget);
    let _ = writeln!(prompt, "RISK RATIO: {}", request.risk_ratio);

    prompt.push_str("\nFIELD (no | name | jockey | win odds | bettor win% | bettor place%):\n");
    for horse in race.runners() {
        let odds = request
            .odds
            .win_odds(horse.number)
            .map(|o| format!("{o:.1}"))
            .unwrap_or_else(|| "-".into());
        let _ = writeln!(
            prompt,
            "{} | {} | {} | {} | {:.1}% | {:.1}%",
            horse.number,
            horse.name,
            horse.jockey,
            odds,
            probs.win(horse.number) * 100.0,
            probs.place(horse.number) * 100.0,
        );
    }

    if !request.top_options.is_empty() {
        prompt.push_str("\nBEST-SCORED TICKETS (ticket | odds | hit% | EV):\n");
        for option in request.top_options.iter().take(PROMPT_OPTIONS) {
            let _ = writeln!(
                prompt,
                "{} | {:.1} | {:.1}% | {:.2}",
                option.ticket,
                option.odds,
                option.probability * 100.0,
                option.expected_value
            );
        }
    }

    prompt.push_str("\nAnalyse the race and reply with the JSON object only.\n");
    prompt
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawAnalysis {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    proposals: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RawProposal {
    #[serde(alias = "type", alias = "betType")]
    bet_type: String,
    #[serde(alias = "selection", alias = "numbers")]
    horses: serde_json::Value,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default, alias = "rationale")]
    reason: String,
}

/// Parse the model's reply into a summary and validated proposals.
pub fn parse_analysis(text: &str, race: &Race) -> Result<(String, Vec<AiProposal>)> {
    let json = extract_json(text).context("No JSON object in analyst response")?;
    let raw: RawAnalysis =
        serde_json::from_str(json).context("Analyst response is not valid analysis JSON")?;

    let mut by_key: HashMap<String, AiProposal> = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    let mut skipped = 0usize;

    for value in raw.proposals {
        match parse_proposal(value, race) {
            Some(proposal) => {
                let key = proposal.ticket.key();
                match by_key.get_mut(&key) {
                    Some(existing) if existing.confidence >= proposal.confidence => {}
                    Some(existing) => *existing = proposal,
                    None => {
                        order.push(key.clone());
                        by_key.insert(key, proposal);
                    }
                }
            }
            None => skipped += 1,
        }
    }

    let proposals: Vec<AiProposal> = order
        .into_iter()
        .filter_map(|k| by_key.remove(&k))
        .take(MAX_PROPOSALS)
        .collect();

    if skipped > 0 {
        debug!(skipped, kept = proposals.len(), "Invalid analyst proposals skipped");
    }

    Ok((raw.summary.trim().to_string(), proposals))
}

fn parse_proposal(value: serde_json::Value, race: &Race) -> Option<AiProposal> {
    let raw: RawProposal = serde_json::from_value(value).ok()?;
    let bet_type: BetType = raw.bet_type.parse().ok()?;
    let horses = horse_numbers(&raw.horses)?;
    if !horses.iter().all(|h| race.has_runner(*h)) {
        return None;
    }
    let ticket = Ticket::new(bet_type, horses).ok()?;

    Some(AiProposal {
        ticket,
        confidence: normalize_confidence(raw.confidence),
        reason: truncate(raw.reason.trim(), MAX_REASON_CHARS),
    })
}

/// `[3, 5, 1]`, `["3", "5"]` or `"3-5-1"` / `"3>5>1"` / `"3,5"`.
fn horse_numbers(value: &serde_json::Value) -> Option<Vec<u8>> {
    match value {
        serde_json::Value::Array(items) => items
            .iter()
            .map(|v| match v {
                serde_json::Value::Number(n) => n.as_u64().and_then(|n| u8::try_from(n).ok()),
                serde_json::Value::String(s) => s.trim().parse().ok(),
                _ => None,
            })
            .collect(),
        serde_json::Value::String(s) => s
            .split(|c: char| c == '-' || c == '>' || c == ',' || c.is_whitespace())
            .filter(|p| !p.is_empty())
            .map(|p| p.parse().ok())
            .collect(),
        serde_json::Value::Number(n) => n.as_u64().and_then(|n| u8::try_from(n).ok()).map(|n| vec![n]),
        _ => None,
    }
}

/// Clamp to `[0, 1]`; values in `(1, 100]` are read as percentages.
fn normalize_confidence(value: Option<f64>) -> f64 {
    match value {
        Some(c) if c.is_finite() && c > 1.0 && c <= 100.0 => c / 100.0,
        Some(c) if c.is_finite() => c.clamp(0.0, 1.0),
        _ => 0.5,
    }
}

/// Strip code fences and surrounding prose down to the outermost object.
fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::evaluation::tests::option_with;
    use crate::strategy::probability::normalize;
    use crate::strategy::tests::{sample_board, sample_inputs};
    use crate::types::RiskRatio;
    use rust_decimal_macros::dec;

    #[test]
    fn test_system_prompt_describes_format() {
        assert!(SYSTEM_PROMPT.contains("\"proposals\""));
        assert!(SYSTEM_PROMPT.contains("trifecta"));
        assert!(SYSTEM_PROMPT.contains("risk ratio"));
    }

    #[test]
    fn test_build_prompt() {
        let race = Race::sample(8);
        let odds = sample_board(&race);
        let probs = normalize(&sample_inputs(), &race).unwrap();
        let options = vec![option_with(0.34, 3.2)];
        let request = AnalysisRequest {
            race: &race,
            odds: &odds,
            probabilities: &probs,
            budget: dec!(5000),
            risk_ratio: RiskRatio::default(),
            top_options: &options,
        };

        let prompt = build_prompt(&request);
        assert!(prompt.contains(&race.name));
        assert!(prompt.contains("BUDGET: 5000 yen"));
        assert!(prompt.contains("x2.0"));
        assert!(prompt.contains("34.0%"));
        assert!(prompt.contains("3.2"));
        assert!(prompt.contains("BEST-SCORED"));
        assert!(prompt.contains("place pays top 3"));
    }

    #[test]
    fn test_parse_plain_json() {
        let race = Race::sample(8);
        let text = r#"{"summary": "Strong favourite", "proposals": [
            {"bet_type": "win", "horses": [1], "confidence": 0.8, "reason": "Class edge"},
            {"bet_type": "exacta", "horses": [1, 3], "confidence": 0.4, "reason": "Pace"}
        ]}"#;
        let (summary, proposals) = parse_analysis(text, &race).unwrap();
        assert_eq!(summary, "Strong favourite");
        assert_eq!(proposals.len(), 2);
        assert_eq!(proposals[0].ticket, Ticket::win(1));
        assert_eq!(proposals[1].ticket.key(), "exacta:1-3");
        assert_eq!(proposals[0].reason, "Class edge");
    }

    #[test]
    fn test_parse_fenced_with_prose() {
        let race = Race::sample(8);
        let text = "Here is my analysis:\n```json\n{\"summary\": \"ok\", \"proposals\": [{\"bet_type\": \"umaren\", \"horses\": \"5-2\", \"confidence\": 65, \"reason\": \"x\"}]}\n```\nGood luck!";
        let (_, proposals) = parse_analysis(text, &race).unwrap();
        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0].ticket.key(), "quinella:2-5");
        assert!((proposals[0].confidence - 0.65).abs() < 1e-12);
    }

    #[test]
    fn test_parse_skips_invalid_proposals() {
        let race = Race::sample(6);
        let text = r#"{"summary": "", "proposals": [
            {"bet_type": "win", "horses": [9], "confidence": 0.5, "reason": "not running"},
            {"bet_type": "jackpot", "horses": [1], "confidence": 0.5, "reason": "unknown type"},
            {"bet_type": "trio", "horses": [1, 2], "confidence": 0.5, "reason": "too few"},
            {"bet_type": "exacta", "horses": [2, 2], "confidence": 0.5, "reason": "duplicate"},
            {"horses": [1]},
            {"bet_type": "sanrentan", "horses": ["3", "1", "2"], "confidence": -4, "reason": "ok"}
        ]}"#;
        let (_, proposals) = parse_analysis(text, &race).unwrap();
        assert_eq!(proposals.len(), 1);
        assert_eq!(proposals[0].ticket.key(), "trifecta:3-1-2");
        assert_eq!(proposals[0].confidence, 0.0);
    }

    #[test]
    fn test_parse_dedupes_keeping_highest_confidence() {
        let race = Race::sample(8);
        let text = r#"{"proposals": [
            {"bet_type": "wide", "horses": [1, 4], "confidence": 0.3, "reason": "first"},
            {"bet_type": "wide", "horses": [4, 1], "confidence": 0.6, "reason": "second"},
            {"bet_type": "win", "horses": [4]}
        ]}"#;
        let (summary, proposals) = parse_analysis(text, &race).unwrap();
        assert!(summary.is_empty());
        assert_eq!(proposals.len(), 2);
        assert_eq!(proposals[0].reason, "second");
        // Missing confidence defaults to 0.5
        assert_eq!(proposals[1].confidence, 0.5);
    }

    #[test]
    fn test_parse_caps_proposal_count() {
        let race = Race::sample(16);
        let items: Vec<String> = (1..=16)
            .map(|h| format!(r#"{{"bet_type": "win", "horses": [{h}], "confidence": 0.1, "reason": ""}}"#))
            .collect();
        let text = format!(r#"{{"summary": "s", "proposals": [{}]}}"#, items.join(","));
        let (_, proposals) = parse_analysis(&text, &race).unwrap();
        assert_eq!(proposals.len(), MAX_PROPOSALS);
    }

    #[test]
    fn test_parse_failures() {
        let race = Race::sample(8);
        assert!(parse_analysis("I cannot help with that.", &race).is_err());
        assert!(parse_analysis("{ not json }", &race).is_err());
    }

    #[test]
    fn test_truncate_reason() {
        let long = "あ".repeat(500);
        let t = truncate(&long, 10);
        assert_eq!(t.chars().count(), 11);
        assert_eq!(truncate("short", 10), "short");
    }
}
