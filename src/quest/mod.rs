//! Mission composition and Bloom-level progression
//!
//! This module provides:
//! - Seeded shuffling for reproducible missions
//! - Primary / Blasts / Review candidate pools per target level
//! - Capped mission composition and the in-memory mission lifecycle
//! - Per-level progression, unlocking and the XP economy

pub mod bloom;
pub mod composer;
pub mod config;
pub mod mission;
pub mod models;
pub mod pools;
pub mod prng;
pub mod progression;

pub use bloom::{BloomLevel, LevelPolicy, PolicyTable};
pub use composer::{compose_mission, ComposeContext};
pub use config::{ConfigError, QuestConfig};
pub use mission::{
    compute_pass, record_answer, restart_mission, resume_mission, start_from_composition, start_mission,
    MissionPhase, RecordOutcome,
};
pub use models::*;
pub use pools::{build_candidate_pools, build_candidate_pools_with, PoolInputs};
pub use progression::{
    apply_mission_completion, apply_mission_xp, fold_mission_completion, is_level_unlocked, unlocked_levels,
    MissionCompletion, ProgressDelta, RecencyWeighting, XpDelta,
};
