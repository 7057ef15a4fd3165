//! In-memory mission lifecycle: start, resume, answer, restart, score
//!
//! Nothing here touches storage. Callers persist the state and decide what to
//! do when that fails.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::bloom::BloomLevel;
use super::models::{AnswerRecord, CardId, Correctness, MissionComposition, MissionState, PassResult, QuestSettings};
use super::prng::{shuffle, SeedKey, SeedPurpose};

/// Tolerance for the pass comparison, applied before display rounding
const PASS_EPSILON: f64 = 1e-9;

/// Where a mission stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MissionPhase {
    Active,
    Completed,
}

/// What `record_answer` did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecordOutcome {
    /// First answer for this card
    Recorded,
    /// Replaced an earlier, different answer
    Updated,
    /// Same answer as before
    Unchanged,
    /// The card is not part of this mission; state untouched
    NotInMission,
}

impl RecordOutcome {
    pub fn is_applied(self) -> bool {
        !matches!(self, Self::NotInMission)
    }
}

/// Begin a mission over `ids` in the given order
///
/// Duplicate ids are dropped, keeping the first occurrence. Without a seed a
/// random one is generated.
pub fn start_mission(
    deck_id: &str,
    bloom_level: BloomLevel,
    mission_index: usize,
    ids: &[CardId],
    seed: Option<&str>,
) -> MissionState {
    let mut card_order = Vec::with_capacity(ids.len());
    for id in ids {
        if !card_order.contains(id) {
            card_order.push(*id);
        }
    }

    let sequence_seed = seed
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(fresh_seed);

    log::info!(
        "Mission: start deck {} {} #{} with {} cards",
        deck_id,
        bloom_level,
        mission_index,
        card_order.len()
    );

    MissionState {
        deck_id: deck_id.to_string(),
        bloom_level,
        mission_index,
        sequence_seed,
        card_order,
        answered: Vec::new(),
        correct_count: 0.0,
        started_at: Utc::now(),
        resumed_at: None,
    }
}

/// Start from a composed mission, keeping its order and seed
pub fn start_from_composition(
    deck_id: &str,
    bloom_level: BloomLevel,
    mission_index: usize,
    composition: &MissionComposition,
) -> MissionState {
    start_mission(
        deck_id,
        bloom_level,
        mission_index,
        &composition.mission_ids,
        Some(&composition.seed_used),
    )
}

/// Mark a mission as picked up again; order and answers are kept
pub fn resume_mission(state: &mut MissionState) {
    state.resumed_at = Some(Utc::now());
    log::debug!(
        "Mission: resume deck {} {} #{} at {}/{}",
        state.deck_id,
        state.bloom_level,
        state.mission_index,
        state.answered.len(),
        state.card_order.len()
    );
}

/// Upsert the answer for `card_id`, last write wins
pub fn record_answer(
    state: &mut MissionState,
    card_id: CardId,
    correctness: impl Into<Correctness>,
) -> RecordOutcome {
    let correctness = correctness.into();

    if !state.card_order.contains(&card_id) {
        log::warn!(
            "Mission: answer for card {} outside mission deck {} {} #{}",
            card_id,
            state.deck_id,
            state.bloom_level,
            state.mission_index
        );
        return RecordOutcome::NotInMission;
    }

    let outcome = match state.answered.iter_mut().find(|a| a.card_id == card_id) {
        Some(existing) if existing.correctness == correctness => RecordOutcome::Unchanged,
        Some(existing) => {
            existing.correctness = correctness;
            RecordOutcome::Updated
        }
        None => {
            state.answered.push(AnswerRecord { card_id, correctness });
            RecordOutcome::Recorded
        }
    };

    state.correct_count = state.answered.iter().map(|a| a.correctness.credit()).sum();
    outcome
}

/// Same cards, new seed and order, answers cleared
///
/// The seed is the mission's restart key salted with a fresh uuid.
pub fn restart_mission(state: &mut MissionState) {
    let salt = fresh_seed();
    let seed = SeedKey::new(&state.deck_id, state.bloom_level, state.mission_index, SeedPurpose::Restart)
        .with_salt(Some(&salt))
        .to_string();
    restart_mission_with_seed(state, &seed);
}

pub fn restart_mission_with_seed(state: &mut MissionState, seed: &str) {
    state.card_order = shuffle(seed, &state.card_order);
    state.sequence_seed = seed.to_string();
    state.answered.clear();
    state.correct_count = 0.0;
    state.started_at = Utc::now();
    state.resumed_at = None;

    log::info!(
        "Mission: restart deck {} {} #{}",
        state.deck_id,
        state.bloom_level,
        state.mission_index
    );
}

pub fn mission_phase(state: &MissionState) -> MissionPhase {
    let done = state
        .card_order
        .iter()
        .all(|id| state.answered.iter().any(|a| a.card_id == *id));
    if done {
        MissionPhase::Completed
    } else {
        MissionPhase::Active
    }
}

/// Score the mission against `settings.pass_threshold`
///
/// The pass decision uses the unrounded percentage; only `percent` is rounded.
/// An empty mission never passes.
pub fn compute_pass(state: &MissionState, settings: &QuestSettings) -> PassResult {
    let total = state.card_order.len();
    let correct = state.correct_count;
    if total == 0 {
        return PassResult {
            total,
            correct,
            percent: 0.0,
            passed: false,
        };
    }

    let raw = correct / total as f64 * 100.0;
    let passed = raw + PASS_EPSILON >= settings.pass_threshold;

    PassResult {
        total,
        correct,
        percent: (raw * 10.0).round() / 10.0,
        passed,
    }
}

fn fresh_seed() -> String {
    Uuid::new_v4().to_string()
}
