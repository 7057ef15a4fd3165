//! Row types for the attempt store

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::quest::bloom::BloomLevel;
use crate::quest::models::CardId;

/// Recognised attempt modes; anything else is stored as null
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptMode {
    Quest,
    Remix,
    Drill,
    Study,
}

impl AttemptMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Quest => "quest",
            Self::Remix => "remix",
            Self::Drill => "drill",
            Self::Study => "study",
        }
    }
}

impl fmt::Display for AttemptMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttemptMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "quest" => Ok(Self::Quest),
            "remix" => Ok(Self::Remix),
            "drill" => Ok(Self::Drill),
            "study" => Ok(Self::Study),
            other => Err(format!("Unknown attempt mode: {}", other)),
        }
    }
}

/// Per-card entry of the attempt's `answers` column
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerEntry {
    pub card_id: CardId,
    /// Credit in [0, 1]
    pub correct: f64,
}

/// One completed mission, already sanitised
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptRow {
    pub user_id: String,
    pub deck_id: String,
    pub bloom_level: BloomLevel,
    pub score_pct: f64,
    pub cards_seen: u32,
    pub cards_correct: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<AttemptMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breakdown: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answers: Option<Vec<AnswerEntry>>,
}

impl AttemptRow {
    /// Copy with the optional columns outside `shape` nulled
    pub fn restricted_to(&self, shape: PayloadShape) -> Self {
        let mut row = self.clone();
        if !shape.includes(OptionalColumn::Mode) {
            row.mode = None;
        }
        if !shape.includes(OptionalColumn::Breakdown) {
            row.breakdown = None;
        }
        if !shape.includes(OptionalColumn::Answers) {
            row.answers = None;
        }
        row
    }
}

/// Attempt columns that older schemas may lack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionalColumn {
    Mode,
    Breakdown,
    Answers,
}

impl OptionalColumn {
    pub fn name(self) -> &'static str {
        match self {
            Self::Mode => "mode",
            Self::Breakdown => "breakdown",
            Self::Answers => "answers",
        }
    }
}

/// Which optional columns an attempt insert carries
///
/// Compatibility shim for stores whose schema lags the application: inserts
/// step down through [`PayloadShape::FALLBACK_ORDER`] until one is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PayloadShape {
    Full,
    NoAnswers,
    ModeOnly,
    Minimal,
}

impl PayloadShape {
    pub const FALLBACK_ORDER: [PayloadShape; 4] = [
        PayloadShape::Full,
        PayloadShape::NoAnswers,
        PayloadShape::ModeOnly,
        PayloadShape::Minimal,
    ];

    pub fn columns(self) -> &'static [OptionalColumn] {
        match self {
            Self::Full => &[OptionalColumn::Mode, OptionalColumn::Breakdown, OptionalColumn::Answers],
            Self::NoAnswers => &[OptionalColumn::Mode, OptionalColumn::Breakdown],
            Self::ModeOnly => &[OptionalColumn::Mode],
            Self::Minimal => &[],
        }
    }

    pub fn includes(self, column: OptionalColumn) -> bool {
        self.columns().contains(&column)
    }
}

/// One answered card of a stored attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardAnswerRow {
    pub attempt_id: i64,
    pub user_id: String,
    pub deck_id: String,
    pub card_id: CardId,
    pub correct: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u32>,
}

/// An attempt as read back from a store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredAttempt {
    pub id: i64,
    #[serde(flatten)]
    pub row: AttemptRow,
}
