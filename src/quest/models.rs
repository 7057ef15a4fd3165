//! Data models for missions and Bloom-level progression

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::bloom::BloomLevel;

pub type CardId = i64;

/// A flashcard as exposed by the deck catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    pub id: CardId,
    #[serde(default)]
    pub bloom_level: BloomLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
}

impl Card {
    pub fn new(id: CardId, bloom_level: BloomLevel) -> Self {
        Self {
            id,
            bloom_level,
            active: None,
        }
    }

    /// Cards without an explicit flag count as active
    pub fn is_active(&self) -> bool {
        self.active.unwrap_or(true)
    }
}

/// Per-card spaced repetition history
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SrsPerformance {
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub correct: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl SrsPerformance {
    pub fn wrong(&self) -> u32 {
        self.attempts.saturating_sub(self.correct)
    }
}

pub type SrsStats = BTreeMap<CardId, SrsPerformance>;

fn default_settings_version() -> u32 {
    1
}

/// Externally supplied quest policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QuestSettings {
    #[serde(default = "default_settings_version")]
    pub version: u32,
    /// Minimum percent (0-100) for a mission to pass
    pub pass_threshold: f64,
    /// Maximum cards per mission
    pub mission_cap: usize,
    /// Share (0-100) of Primary plus lower-level cards drawn as Blasts
    pub blasts_percent: f64,
    /// Review window as a share (0-100) of the Primary pool
    pub review_percent: f64,
    /// Weighted accuracy (0-100) needed for mastery once every card is completed
    pub mastery_threshold: f64,
    /// Number of recent mission scores kept per level
    pub recent_window: usize,
}

impl Default for QuestSettings {
    fn default() -> Self {
        Self {
            version: default_settings_version(),
            pass_threshold: 60.0,
            mission_cap: 50,
            blasts_percent: 20.0,
            review_percent: 20.0,
            mastery_threshold: 80.0,
            recent_window: 10,
        }
    }
}

/// Answer correctness: a plain boolean or partial credit in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Correctness {
    Bool(bool),
    Fraction(f64),
}

impl Correctness {
    /// Credit clamped to [0, 1]; NaN counts as zero
    pub fn credit(self) -> f64 {
        match self {
            Self::Bool(true) => 1.0,
            Self::Bool(false) => 0.0,
            Self::Fraction(f) if f.is_nan() => 0.0,
            Self::Fraction(f) => f.clamp(0.0, 1.0),
        }
    }
}

impl From<bool> for Correctness {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for Correctness {
    fn from(value: f64) -> Self {
        Self::Fraction(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRecord {
    pub card_id: CardId,
    pub correctness: Correctness,
}

/// A mission in progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissionState {
    pub deck_id: String,
    pub bloom_level: BloomLevel,
    pub mission_index: usize,
    pub sequence_seed: String,
    pub card_order: Vec<CardId>,
    #[serde(default)]
    pub answered: Vec<AnswerRecord>,
    #[serde(default)]
    pub correct_count: f64,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resumed_at: Option<DateTime<Utc>>,
}

/// Cards split by role for one target level
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidatePools {
    pub primary: Vec<CardId>,
    pub blasts: Vec<CardId>,
    pub review: Vec<CardId>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolCounts {
    pub primary: usize,
    pub blasts: usize,
    pub review: usize,
}

impl PoolCounts {
    pub fn total(&self) -> usize {
        self.primary + self.blasts + self.review
    }
}

/// Composition telemetry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositionDebug {
    pub requested: PoolCounts,
    pub chosen: PoolCounts,
    pub trimmed: PoolCounts,
    pub total: usize,
}

/// The cards chosen for one mission and their play order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissionComposition {
    pub primary_ids: Vec<CardId>,
    pub blasts_ids: Vec<CardId>,
    pub review_ids: Vec<CardId>,
    pub mission_ids: Vec<CardId>,
    pub seed_used: String,
    pub debug: CompositionDebug,
}

/// Score summary of a mission
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassResult {
    pub total: usize,
    pub correct: f64,
    /// Rounded to one decimal for display
    pub percent: f64,
    pub passed: bool,
}

/// Progress for a single Bloom level
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BloomProgress {
    pub total_cards: usize,
    pub completed_cards: usize,
    pub missions_completed: u32,
    pub missions_passed: u32,
    pub mastery_percent: f64,
    pub mastered: bool,
    pub commander_granted: bool,
    /// Sum of mission scores (0-100)
    pub accuracy_sum: f64,
    pub accuracy_count: u32,
    pub total_missions: usize,
    /// Recent mission scores (0-100), newest first
    pub recent_attempts: Vec<f64>,
    pub weighted_avg: f64,
    pub cleared: bool,
    /// Cards credited as completed, keyed by mission index
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub credited_by_mission: BTreeMap<usize, usize>,
}

impl BloomProgress {
    /// Unweighted mean of all recorded scores
    pub fn average_accuracy(&self) -> Option<f64> {
        (self.accuracy_count > 0).then(|| self.accuracy_sum / f64::from(self.accuracy_count))
    }
}

/// XP totals per level and for the account-wide commander pool
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct XpLedger {
    pub bloom_xp: BTreeMap<BloomLevel, f64>,
    pub commander_xp: BTreeMap<BloomLevel, f64>,
    pub commander_xp_total: f64,
    pub commander_granted: BTreeMap<BloomLevel, bool>,
}

impl XpLedger {
    pub fn bloom(&self, level: BloomLevel) -> f64 {
        self.bloom_xp.get(&level).copied().unwrap_or(0.0)
    }

    pub fn commander(&self, level: BloomLevel) -> f64 {
        self.commander_xp.get(&level).copied().unwrap_or(0.0)
    }

    pub fn granted(&self, level: BloomLevel) -> bool {
        self.commander_granted.get(&level).copied().unwrap_or(false)
    }

    pub(crate) fn add_commander(&mut self, level: BloomLevel, amount: f64) {
        *self.commander_xp.entry(level).or_insert(0.0) += amount;
        self.commander_xp_total = self.commander_xp.values().sum();
    }
}

/// Stored progression for one learner and deck
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    pub user_id: String,
    pub deck_id: String,
    #[serde(default)]
    pub levels: BTreeMap<BloomLevel, BloomProgress>,
    #[serde(default)]
    pub xp: XpLedger,
    pub updated_at: DateTime<Utc>,
}

impl ProgressRecord {
    pub fn new(user_id: impl Into<String>, deck_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            deck_id: deck_id.into(),
            levels: BTreeMap::new(),
            xp: XpLedger::default(),
            updated_at: Utc::now(),
        }
    }

    pub fn level(&self, level: BloomLevel) -> BloomProgress {
        self.levels.get(&level).cloned().unwrap_or_default()
    }

    pub fn level_mut(&mut self, level: BloomLevel) -> &mut BloomProgress {
        self.levels.entry(level).or_default()
    }
}
