//! Mission attempt recording

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::quest::bloom::BloomLevel;
use crate::quest::models::{CardId, Correctness};
use crate::store::{AnswerEntry, AttemptMode, AttemptRow, AttemptStore, CardAnswerRow, PayloadShape, StoreError};

/// Upper bound on seen/correct counts and answers per attempt
pub const MAX_CARDS_PER_ATTEMPT: u32 = 500;

/// Response durations above one hour are clamped
pub const MAX_RESPONSE_DURATION_MS: u32 = 60 * 60 * 1000;

const DURATION_KEYS: [&str; 4] = ["durationMs", "duration_ms", "elapsedMs", "responseTimeMs"];

/// Seen count and summed answer credit for one level of a mission
///
/// `correct` carries partial credit, so two half-right answers add up to 1.0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LevelTally {
    pub seen: i64,
    pub correct: f64,
}

/// One answer as reported by the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerInput {
    pub card_id: CardId,
    pub correct: Correctness,
    /// Raw response payload; a duration is read from it when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<serde_json::Value>,
}

/// A completed mission as reported by the caller, not yet trusted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptInput {
    pub user_id: String,
    pub deck_id: String,
    pub bloom_level: BloomLevel,
    #[serde(default)]
    pub score_pct: f64,
    #[serde(default)]
    pub cards_seen: i64,
    #[serde(default)]
    pub cards_correct: i64,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breakdown: Option<BTreeMap<BloomLevel, LevelTally>>,
    #[serde(default)]
    pub answers: Vec<AnswerInput>,
}

/// Clamped attempt row plus the card answers waiting for their attempt id
#[derive(Debug, Clone, PartialEq)]
pub struct SanitizedAttempt {
    pub row: AttemptRow,
    pub answers: Vec<PendingAnswer>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingAnswer {
    pub card_id: CardId,
    pub correct: f64,
    pub duration_ms: Option<u32>,
}

/// Which client wrote the attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientPath {
    UserScoped,
    Elevated,
}

/// The stores an attempt may be written through, in priority order
#[derive(Clone, Copy, Default)]
pub struct AttemptClients<'a> {
    /// Acts as the learner, so rows are owned by them
    pub user_scoped: Option<&'a dyn AttemptStore>,
    pub elevated: Option<&'a dyn AttemptStore>,
}

impl<'a> AttemptClients<'a> {
    pub fn user_scoped(store: &'a dyn AttemptStore) -> Self {
        Self {
            user_scoped: Some(store),
            elevated: None,
        }
    }

    pub fn with_elevated(mut self, store: &'a dyn AttemptStore) -> Self {
        self.elevated = Some(store);
        self
    }

    fn ordered(&self) -> Vec<(ClientPath, &'a dyn AttemptStore)> {
        let mut clients = Vec::with_capacity(2);
        if let Some(store) = self.user_scoped {
            clients.push((ClientPath::UserScoped, store));
        }
        if let Some(store) = self.elevated {
            clients.push((ClientPath::Elevated, store));
        }
        clients
    }
}

/// Result of [`record_mission_attempt`]; failures are reported, never raised
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptOutcome {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shape: Option<PayloadShape>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<ClientPath>,
    /// Per-card rows written; zero when the fan-out failed
    pub answers_written: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AttemptOutcome {
    pub fn success(attempt_id: i64, shape: PayloadShape, client: ClientPath, answers_written: usize) -> Self {
        Self {
            ok: true,
            attempt_id: Some(attempt_id),
            shape: Some(shape),
            client: Some(client),
            answers_written,
            error: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            ok: false,
            attempt_id: None,
            shape: None,
            client: None,
            answers_written: 0,
            error: Some(message),
        }
    }
}

fn clamp_count(value: i64) -> u32 {
    // bounded by MAX_CARDS_PER_ATTEMPT, so the cast cannot truncate
    value.clamp(0, i64::from(MAX_CARDS_PER_ATTEMPT)) as u32
}

fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 100.0)
    }
}

fn clamp_credit(value: f64, seen: u32) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, f64::from(seen))
    }
}

/// Read a response duration in milliseconds from a caller payload
///
/// Looks at `durationMs`, `duration_ms`, `elapsedMs` and `responseTimeMs` in
/// that order. Negative or non-numeric values are ignored; values above one
/// hour are clamped.
pub fn extract_response_duration(response: &serde_json::Value) -> Option<u32> {
    let fields = response.as_object()?;
    DURATION_KEYS.iter().find_map(|key| {
        let ms = fields.get(*key)?.as_f64()?;
        if !ms.is_finite() || ms < 0.0 {
            return None;
        }
        Some(ms.round().min(f64::from(MAX_RESPONSE_DURATION_MS)) as u32)
    })
}

/// Clamp counts and percent, filter the mode, and let a breakdown override the flat totals
pub fn sanitize_attempt(input: &AttemptInput) -> SanitizedAttempt {
    let (cards_seen, cards_correct, score_pct, breakdown) = match input.breakdown.as_ref().filter(|b| !b.is_empty()) {
        Some(levels) => {
            let levels: BTreeMap<BloomLevel, LevelTally> = levels
                .iter()
                .map(|(level, tally)| {
                    let seen = clamp_count(tally.seen);
                    let correct = clamp_credit(tally.correct, seen);
                    (
                        *level,
                        LevelTally {
                            seen: i64::from(seen),
                            correct,
                        },
                    )
                })
                .collect();
            let seen = clamp_count(levels.values().map(|t| t.seen).sum());
            let credit = clamp_credit(levels.values().map(|t| t.correct).sum(), seen);
            let score = if seen == 0 { 0.0 } else { credit / f64::from(seen) * 100.0 };
            let breakdown = serde_json::to_value(&levels).ok();
            // whole cards only; partial credit still counts toward the score
            (seen, credit.floor() as u32, score, breakdown)
        }
        None => {
            let seen = clamp_count(input.cards_seen);
            let correct = clamp_count(input.cards_correct).min(seen);
            (seen, correct, clamp_percent(input.score_pct), None)
        }
    };

    let mode = input.mode.as_deref().and_then(|raw| match raw.parse::<AttemptMode>() {
        Ok(mode) => Some(mode),
        Err(_) => {
            log::warn!("Attempt: dropping unrecognised mode {:?}", raw);
            None
        }
    });

    let mut answers: Vec<PendingAnswer> = Vec::new();
    let mut positions: HashMap<CardId, usize> = HashMap::new();
    for answer in &input.answers {
        let pending = PendingAnswer {
            card_id: answer.card_id,
            correct: answer.correct.credit(),
            duration_ms: answer.response.as_ref().and_then(extract_response_duration),
        };
        match positions.get(&answer.card_id) {
            Some(&index) => answers[index] = pending,
            None => {
                if answers.len() >= MAX_CARDS_PER_ATTEMPT as usize {
                    continue;
                }
                positions.insert(answer.card_id, answers.len());
                answers.push(pending);
            }
        }
    }

    let answer_entries = (!answers.is_empty()).then(|| {
        answers
            .iter()
            .map(|a| AnswerEntry {
                card_id: a.card_id,
                correct: a.correct,
            })
            .collect()
    });

    SanitizedAttempt {
        row: AttemptRow {
            user_id: input.user_id.clone(),
            deck_id: input.deck_id.clone(),
            bloom_level: input.bloom_level,
            score_pct,
            cards_seen,
            cards_correct,
            started_at: input.started_at,
            ended_at: input.ended_at.max(input.started_at),
            mode,
            breakdown,
            answers: answer_entries,
        },
        answers,
    }
}

/// Insert `row`, stepping down the payload shapes while the store reports unknown columns
async fn insert_with_fallback(
    store: &dyn AttemptStore,
    row: &AttemptRow,
) -> std::result::Result<(i64, PayloadShape), StoreError> {
    let mut last_error = None;
    for shape in PayloadShape::FALLBACK_ORDER {
        match store.insert_attempt(row, shape).await {
            Ok(id) => return Ok((id, shape)),
            Err(StoreError::UnknownColumn(column)) => {
                log::warn!("Attempt: store rejected {:?} shape (unknown column {})", shape, column);
                last_error = Some(StoreError::UnknownColumn(column));
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_error.unwrap_or_else(|| StoreError::Unavailable("no payload shape accepted".to_string())))
}

async fn fan_out_answers(store: &dyn AttemptStore, attempt_id: i64, attempt: &SanitizedAttempt) -> usize {
    if attempt.answers.is_empty() {
        return 0;
    }
    let rows: Vec<CardAnswerRow> = attempt
        .answers
        .iter()
        .map(|a| CardAnswerRow {
            attempt_id,
            user_id: attempt.row.user_id.clone(),
            deck_id: attempt.row.deck_id.clone(),
            card_id: a.card_id,
            correct: a.correct,
            duration_ms: a.duration_ms,
        })
        .collect();

    match store.insert_card_answers(&rows).await {
        Ok(written) => written,
        Err(e) => {
            log::warn!("Attempt: card answers for attempt {} not written: {}", attempt_id, e);
            0
        }
    }
}

/// Persist one completed mission
///
/// The user-scoped client is tried first and the elevated client only when
/// it is absent or fails. Card answers are written best-effort through the
/// client that stored the attempt.
pub async fn record_mission_attempt(clients: AttemptClients<'_>, input: &AttemptInput) -> AttemptOutcome {
    let attempt = sanitize_attempt(input);
    let ordered = clients.ordered();
    if ordered.is_empty() {
        return AttemptOutcome::error("No attempt store configured".to_string());
    }

    let mut last_error = String::new();
    for (path, store) in ordered {
        match insert_with_fallback(store, &attempt.row).await {
            Ok((attempt_id, shape)) => {
                let answers_written = fan_out_answers(store, attempt_id, &attempt).await;
                log::info!(
                    "Attempt: recorded {} for {}/{} via {:?} ({:?}, {} answers)",
                    attempt_id,
                    attempt.row.user_id,
                    attempt.row.deck_id,
                    path,
                    shape,
                    answers_written
                );
                return AttemptOutcome::success(attempt_id, shape, path, answers_written);
            }
            Err(e) => {
                log::warn!("Attempt: {:?} client failed: {}", path, e);
                last_error = e.to_string();
            }
        }
    }
    AttemptOutcome::error(last_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, OptionalColumn};
    use chrono::Duration;
    use serde_json::json;

    fn input() -> AttemptInput {
        let started = Utc::now();
        AttemptInput {
            user_id: "user-1".to_string(),
            deck_id: "deck-1".to_string(),
            bloom_level: BloomLevel::Apply,
            score_pct: 80.0,
            cards_seen: 10,
            cards_correct: 8,
            started_at: started,
            ended_at: started + Duration::minutes(5),
            mode: Some("quest".to_string()),
            breakdown: None,
            answers: vec![
                AnswerInput {
                    card_id: 1,
                    correct: Correctness::Bool(true),
                    response: Some(json!({"durationMs": 1200})),
                },
                AnswerInput {
                    card_id: 2,
                    correct: Correctness::Fraction(0.5),
                    response: None,
                },
            ],
        }
    }

    #[test]
    fn test_sanitize_clamps_counts_and_percent() {
        let mut raw = input();
        raw.cards_seen = 9_000;
        raw.cards_correct = 10_000;
        raw.score_pct = 140.0;
        let row = sanitize_attempt(&raw).row;
        assert_eq!(row.cards_seen, MAX_CARDS_PER_ATTEMPT);
        assert_eq!(row.cards_correct, MAX_CARDS_PER_ATTEMPT);
        assert_eq!(row.score_pct, 100.0);

        raw.cards_seen = -3;
        raw.score_pct = f64::NAN;
        let row = sanitize_attempt(&raw).row;
        assert_eq!(row.cards_seen, 0);
        assert_eq!(row.cards_correct, 0);
        assert_eq!(row.score_pct, 0.0);
    }

    #[test]
    fn test_sanitize_nulls_unknown_mode() {
        let mut raw = input();
        raw.mode = Some("ranked".to_string());
        assert_eq!(sanitize_attempt(&raw).row.mode, None);
        raw.mode = Some("Remix".to_string());
        assert_eq!(sanitize_attempt(&raw).row.mode, Some(AttemptMode::Remix));
    }

    #[test]
    fn test_breakdown_overrides_flat_totals() {
        let mut raw = input();
        raw.cards_seen = 99;
        raw.cards_correct = 99;
        raw.score_pct = 100.0;
        raw.breakdown = Some(BTreeMap::from([
            (BloomLevel::Apply, LevelTally { seen: 6, correct: 3.0 }),
            (BloomLevel::Remember, LevelTally { seen: 4, correct: 9.0 }),
        ]));
        let row = sanitize_attempt(&raw).row;
        assert_eq!(row.cards_seen, 10);
        // Remember's correct is clamped to its seen
        assert_eq!(row.cards_correct, 7);
        assert!((row.score_pct - 70.0).abs() < 1e-9);
        let breakdown = row.breakdown.unwrap();
        assert_eq!(breakdown["Remember"]["correct"], 4.0);
    }

    #[test]
    fn test_breakdown_keeps_partial_credit() {
        let mut raw = input();
        raw.breakdown = Some(BTreeMap::from([(BloomLevel::Analyze, LevelTally { seen: 2, correct: 1.0 })]));
        raw.answers = vec![
            AnswerInput { card_id: 1, correct: Correctness::Fraction(0.5), response: None },
            AnswerInput { card_id: 2, correct: Correctness::Fraction(0.5), response: None },
        ];
        let attempt = sanitize_attempt(&raw);
        assert_eq!(attempt.row.cards_seen, 2);
        assert_eq!(attempt.row.cards_correct, 1);
        assert!((attempt.row.score_pct - 50.0).abs() < 1e-9);
        assert_eq!(attempt.row.breakdown.unwrap()["Analyze"]["correct"], 1.0);

        raw.breakdown = Some(BTreeMap::from([(BloomLevel::Analyze, LevelTally { seen: 3, correct: 0.5 })]));
        let row = sanitize_attempt(&raw).row;
        assert_eq!(row.cards_correct, 0);
        assert!((row.score_pct - 50.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_answers_dedupe_last_wins() {
        let mut raw = input();
        raw.answers.push(AnswerInput {
            card_id: 1,
            correct: Correctness::Bool(false),
            response: None,
        });
        let attempt = sanitize_attempt(&raw);
        assert_eq!(attempt.answers.len(), 2);
        assert_eq!(attempt.answers[0].card_id, 1);
        assert_eq!(attempt.answers[0].correct, 0.0);
        assert_eq!(attempt.answers[0].duration_ms, None);
    }

    #[test]
    fn test_ended_before_started_is_clamped() {
        let mut raw = input();
        raw.ended_at = raw.started_at - Duration::minutes(1);
        let row = sanitize_attempt(&raw).row;
        assert_eq!(row.ended_at, row.started_at);
    }

    #[test]
    fn test_extract_response_duration() {
        assert_eq!(extract_response_duration(&json!({"durationMs": 850})), Some(850));
        assert_eq!(extract_response_duration(&json!({"elapsedMs": 12.6})), Some(13));
        assert_eq!(extract_response_duration(&json!({"responseTimeMs": 9_999_999})), Some(MAX_RESPONSE_DURATION_MS));
        assert_eq!(extract_response_duration(&json!({"durationMs": -5, "duration_ms": 40})), Some(40));
        assert_eq!(extract_response_duration(&json!({"durationMs": "fast"})), None);
        assert_eq!(extract_response_duration(&json!("text")), None);
    }

    #[tokio::test]
    async fn test_record_full_shape_with_fan_out() {
        let store = MemoryStore::new();
        let outcome = record_mission_attempt(AttemptClients::user_scoped(&store), &input()).await;
        assert!(outcome.ok);
        assert_eq!(outcome.shape, Some(PayloadShape::Full));
        assert_eq!(outcome.client, Some(ClientPath::UserScoped));
        assert_eq!(outcome.answers_written, 2);

        let answers = store.card_answers().await;
        assert_eq!(answers[0].duration_ms, Some(1200));
        assert_eq!(answers[0].attempt_id, outcome.attempt_id.unwrap());
    }

    #[tokio::test]
    async fn test_record_steps_down_shapes() {
        let store = MemoryStore::new().with_columns(&[OptionalColumn::Mode]);
        let outcome = record_mission_attempt(AttemptClients::user_scoped(&store), &input()).await;
        assert!(outcome.ok);
        assert_eq!(outcome.shape, Some(PayloadShape::ModeOnly));
        let stored = store.attempts().await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].row.mode, Some(AttemptMode::Quest));
        assert!(stored[0].row.answers.is_none());
    }

    #[tokio::test]
    async fn test_record_falls_back_to_elevated() {
        let user = MemoryStore::new();
        user.set_unavailable(true);
        let elevated = MemoryStore::new();
        let clients = AttemptClients::user_scoped(&user).with_elevated(&elevated);

        let outcome = record_mission_attempt(clients, &input()).await;
        assert!(outcome.ok);
        assert_eq!(outcome.client, Some(ClientPath::Elevated));
        assert_eq!(elevated.attempts().await.len(), 1);
    }

    #[tokio::test]
    async fn test_fan_out_failure_keeps_attempt() {
        let store = MemoryStore::new();
        store.fail_card_answers(true);
        let outcome = record_mission_attempt(AttemptClients::user_scoped(&store), &input()).await;
        assert!(outcome.ok);
        assert_eq!(outcome.answers_written, 0);
        assert_eq!(store.attempts().await.len(), 1);
    }

    #[tokio::test]
    async fn test_all_clients_failing_is_reported() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        let outcome = record_mission_attempt(AttemptClients::user_scoped(&store), &input()).await;
        assert!(!outcome.ok);
        assert!(outcome.error.unwrap().contains("unavailable"));

        let outcome = record_mission_attempt(AttemptClients::default(), &input()).await;
        assert!(!outcome.ok);
    }
}
