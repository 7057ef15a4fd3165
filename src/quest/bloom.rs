//! Bloom taxonomy levels and the per-level policy table

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One of the six ordered mastery tiers, lowest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub enum BloomLevel {
    #[default]
    Remember,
    Understand,
    Apply,
    Analyze,
    Evaluate,
    Create,
}

impl BloomLevel {
    pub const ALL: [BloomLevel; 6] = [
        BloomLevel::Remember,
        BloomLevel::Understand,
        BloomLevel::Apply,
        BloomLevel::Analyze,
        BloomLevel::Evaluate,
        BloomLevel::Create,
    ];

    pub fn lowest() -> Self {
        Self::Remember
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Remember => "Remember",
            Self::Understand => "Understand",
            Self::Apply => "Apply",
            Self::Analyze => "Analyze",
            Self::Evaluate => "Evaluate",
            Self::Create => "Create",
        }
    }

    /// The level directly below this one, if any
    pub fn previous(self) -> Option<Self> {
        self.index().checked_sub(1).map(|i| Self::ALL[i])
    }

    pub fn next(self) -> Option<Self> {
        Self::ALL.get(self.index() + 1).copied()
    }

    /// All levels strictly below this one, lowest first
    pub fn below(self) -> &'static [BloomLevel] {
        &Self::ALL[..self.index()]
    }
}

impl fmt::Display for BloomLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BloomLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|level| level.as_str().to_lowercase() == wanted)
            .ok_or_else(|| format!("Unknown bloom level: {}", s))
    }
}

/// Per-level tuning: XP economy and which lower tiers feed Blasts/Review
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelPolicy {
    pub level: BloomLevel,
    /// Bloom XP for completing the whole level at 100% accuracy
    pub base_xp: f64,
    /// Applied to accrued bloom XP when mirrored into commander XP
    pub mastery_multiplier: f64,
    /// Supplemental cards come from levels strictly below this one
    pub support_ceiling: BloomLevel,
}

/// Lookup table of [`LevelPolicy`], one entry per level
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyTable {
    entries: [LevelPolicy; 6],
}

impl Default for PolicyTable {
    fn default() -> Self {
        let entry = |level, base_xp, mastery_multiplier| LevelPolicy {
            level,
            base_xp,
            mastery_multiplier,
            support_ceiling: level,
        };
        let mut entries = [
            entry(BloomLevel::Remember, 10.0, 1.0),
            entry(BloomLevel::Understand, 15.0, 1.25),
            entry(BloomLevel::Apply, 20.0, 1.5),
            entry(BloomLevel::Analyze, 25.0, 1.75),
            entry(BloomLevel::Evaluate, 30.0, 2.0),
            entry(BloomLevel::Create, 40.0, 2.5),
        ];
        // Create drills never pull Evaluate cards back in
        entries[BloomLevel::Create.index()].support_ceiling = BloomLevel::Evaluate;
        Self { entries }
    }
}

impl PolicyTable {
    pub fn get(&self, level: BloomLevel) -> &LevelPolicy {
        &self.entries[level.index()]
    }

    /// Replace the entry for `policy.level`
    pub fn set(&mut self, policy: LevelPolicy) {
        self.entries[policy.level.index()] = policy;
    }

    /// Levels whose cards may appear as Blasts or Review for `target`
    pub fn support_levels(&self, target: BloomLevel) -> &'static [BloomLevel] {
        let ceiling = self.get(target).support_ceiling.min(target);
        ceiling.below()
    }
}
