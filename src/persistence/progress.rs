//! Stored progress updates: unlock, completion, reset

use serde::{Deserialize, Serialize};

use crate::quest::bloom::{BloomLevel, PolicyTable};
use crate::quest::models::{Card, ProgressRecord, QuestSettings};
use crate::quest::progression::{
    fold_mission_completion, refresh_level_totals, MissionCompletion, ProgressDelta, RecencyWeighting, RECENT_DECAY,
};
use crate::store::{ProgressRepository, Result};

/// Result of [`unlock_next_bloom_level`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockOutcome {
    pub level: BloomLevel,
    /// False when the level was already cleared and nothing was written
    pub changed: bool,
    pub next_level: Option<BloomLevel>,
}

/// The stored row after a completion and what the completion changed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionUpdate {
    pub record: ProgressRecord,
    pub delta: ProgressDelta,
}

/// Stored progress, or a fresh record when the learner has none yet
pub async fn load_progress(repo: &dyn ProgressRepository, user_id: &str, deck_id: &str) -> Result<ProgressRecord> {
    Ok(repo
        .get(user_id, deck_id)
        .await?
        .unwrap_or_else(|| ProgressRecord::new(user_id, deck_id)))
}

/// Mark `level` cleared so the level above it opens
///
/// Idempotent: an already cleared level is left untouched and not rewritten.
pub async fn unlock_next_bloom_level(
    repo: &dyn ProgressRepository,
    user_id: &str,
    deck_id: &str,
    level: BloomLevel,
) -> Result<UnlockOutcome> {
    let mut record = load_progress(repo, user_id, deck_id).await?;
    let next_level = level.next();

    if record.level(level).cleared {
        log::debug!("Progress: {} already cleared for {}/{}", level, user_id, deck_id);
        return Ok(UnlockOutcome {
            level,
            changed: false,
            next_level,
        });
    }

    record.level_mut(level).cleared = true;
    record.updated_at = chrono::Utc::now();
    repo.put(&record).await?;
    log::info!("Progress: cleared {} for {}/{}", level, user_id, deck_id);

    Ok(UnlockOutcome {
        level,
        changed: true,
        next_level,
    })
}

/// Fold a completed mission into the stored row
///
/// Totals are recounted from `cards` first so the row heals from deck edits.
/// The recent-score average uses exponential decay ([`RECENT_DECAY`]).
pub async fn update_quest_progress_on_complete(
    repo: &dyn ProgressRepository,
    user_id: &str,
    deck_id: &str,
    cards: &[Card],
    completion: &MissionCompletion,
    settings: &QuestSettings,
    policies: &PolicyTable,
) -> Result<CompletionUpdate> {
    let mut record = load_progress(repo, user_id, deck_id).await?;
    refresh_level_totals(&mut record, cards, settings.mission_cap);

    let delta = fold_mission_completion(
        &mut record,
        completion,
        settings,
        policies,
        RecencyWeighting::ExponentialDecay(RECENT_DECAY),
    );
    repo.put(&record).await?;

    log::info!(
        "Progress: {}/{} {} scored {:.1}% (+{:.1} XP{}{})",
        user_id,
        deck_id,
        completion.level,
        delta.score_pct,
        delta.xp.bloom_added,
        if delta.cleared_now { ", cleared" } else { "" },
        if delta.mastered_now { ", mastered" } else { "" }
    );

    Ok(CompletionUpdate { record, delta })
}

/// Delete the learner's progress row; returns whether one existed
pub async fn reset_progress(repo: &dyn ProgressRepository, user_id: &str, deck_id: &str) -> Result<bool> {
    let removed = repo.delete(user_id, deck_id).await?;
    if removed {
        log::info!("Progress: reset {}/{}", user_id, deck_id);
    }
    Ok(removed)
}
