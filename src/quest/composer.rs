//! Mission composer
//!
//! Turns candidate pools into one capped, ordered mission. Precedence is
//! Primary > Blasts > Review; overflow is trimmed from the tail of Blasts
//! first, then Review. The Primary slice is never trimmed.

use std::collections::HashSet;

use super::bloom::BloomLevel;
use super::models::{CandidatePools, CardId, CompositionDebug, MissionComposition, PoolCounts, QuestSettings};
use super::prng::{shuffle, SeedKey, SeedPurpose};

/// Identity of the mission being composed
#[derive(Debug, Clone, Copy)]
pub struct ComposeContext<'a> {
    pub deck_id: &'a str,
    pub level: BloomLevel,
    pub mission_index: usize,
    /// Replaces the derived ordering seed when set
    pub seed_override: Option<&'a str>,
}

impl ComposeContext<'_> {
    pub fn order_seed(&self) -> String {
        match self.seed_override {
            Some(seed) if !seed.is_empty() => seed.to_string(),
            _ => SeedKey::new(self.deck_id, self.level, self.mission_index, SeedPurpose::MissionOrder).to_string(),
        }
    }
}

/// Number of missions needed to cover `primary_len` cards
pub fn mission_count(primary_len: usize, mission_cap: usize) -> usize {
    if mission_cap == 0 {
        return 0;
    }
    primary_len.div_ceil(mission_cap)
}

/// The order-preserving Primary chunk for `mission_index`
pub fn primary_chunk(primary: &[CardId], mission_cap: usize, mission_index: usize) -> &[CardId] {
    if mission_cap == 0 {
        return &[];
    }
    primary.chunks(mission_cap).nth(mission_index).unwrap_or(&[])
}

pub fn compose_mission(
    pools: &CandidatePools,
    ctx: &ComposeContext<'_>,
    settings: &QuestSettings,
) -> MissionComposition {
    let cap = settings.mission_cap;
    let primary_ids = dedupe(primary_chunk(&pools.primary, cap, ctx.mission_index), &HashSet::new());

    let mut claimed: HashSet<CardId> = primary_ids.iter().copied().collect();
    let mut blasts_ids = dedupe(&pools.blasts, &claimed);
    claimed.extend(blasts_ids.iter().copied());
    let mut review_ids = dedupe(&pools.review, &claimed);

    let requested = PoolCounts {
        primary: primary_ids.len(),
        blasts: pools.blasts.len(),
        review: pools.review.len(),
    };

    let mut trimmed = PoolCounts::default();
    let mut overflow = (primary_ids.len() + blasts_ids.len() + review_ids.len()).saturating_sub(cap);
    if overflow > 0 {
        let from_blasts = overflow.min(blasts_ids.len());
        blasts_ids.truncate(blasts_ids.len() - from_blasts);
        trimmed.blasts = from_blasts;
        overflow -= from_blasts;
    }
    if overflow > 0 {
        let from_review = overflow.min(review_ids.len());
        review_ids.truncate(review_ids.len() - from_review);
        trimmed.review = from_review;
    }

    let union: Vec<CardId> = primary_ids
        .iter()
        .chain(blasts_ids.iter())
        .chain(review_ids.iter())
        .copied()
        .collect();
    let seed_used = ctx.order_seed();
    let mission_ids = shuffle(&seed_used, &union);

    let chosen = PoolCounts {
        primary: primary_ids.len(),
        blasts: blasts_ids.len(),
        review: review_ids.len(),
    };
    let debug = CompositionDebug {
        requested,
        chosen,
        trimmed,
        total: mission_ids.len(),
    };

    log::debug!(
        "Compose: deck {} {} mission {} -> {} cards (primary {}/{}, blasts {}/{} trimmed {}, review {}/{} trimmed {})",
        ctx.deck_id,
        ctx.level,
        ctx.mission_index,
        debug.total,
        chosen.primary,
        requested.primary,
        chosen.blasts,
        requested.blasts,
        trimmed.blasts,
        chosen.review,
        requested.review,
        trimmed.review,
    );

    MissionComposition {
        primary_ids,
        blasts_ids,
        review_ids,
        mission_ids,
        seed_used,
        debug,
    }
}

/// Keep first occurrences not already in `claimed`
fn dedupe(ids: &[CardId], claimed: &HashSet<CardId>) -> Vec<CardId> {
    let mut seen = HashSet::new();
    ids.iter()
        .copied()
        .filter(|id| !claimed.contains(id) && seen.insert(*id))
        .collect()
}
