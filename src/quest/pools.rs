//! Candidate pool builder
//!
//! Splits a deck into the Primary, Blasts and Review pools for one target
//! level. Pure and infallible; every pool may come back empty.

use std::collections::HashSet;

use super::bloom::{BloomLevel, PolicyTable};
use super::models::{CandidatePools, Card, CardId, QuestSettings, SrsStats};
use super::prng::{fnv1a_32, shuffle, SeedKey, SeedPurpose};

/// Blasts are sampled from this many times their target count of stale cards
const BLASTS_WINDOW_FACTOR: usize = 2;

/// Everything the pool builder looks at
#[derive(Debug, Clone, Copy)]
pub struct PoolInputs<'a> {
    pub deck_id: &'a str,
    pub cards: &'a [Card],
    pub level: BloomLevel,
    pub mission_index: usize,
    pub srs: Option<&'a SrsStats>,
    /// Externally computed low-accuracy card ids; replaces SRS ranking for Review
    pub low_accuracy_ids: Option<&'a [CardId]>,
    pub settings: &'a QuestSettings,
    pub policies: &'a PolicyTable,
    /// Optional caller salt mixed into the Blasts and Review seeds
    pub seed: Option<&'a str>,
}

/// Build pools treating cards as active unless flagged otherwise
pub fn build_candidate_pools(inputs: &PoolInputs<'_>) -> CandidatePools {
    build_candidate_pools_with(inputs, Card::is_active)
}

/// Build pools with an injected activity predicate
pub fn build_candidate_pools_with<F>(inputs: &PoolInputs<'_>, is_active: F) -> CandidatePools
where
    F: Fn(&Card) -> bool,
{
    let support = inputs.policies.support_levels(inputs.level);

    let mut seen = HashSet::new();
    let active: Vec<&Card> = inputs
        .cards
        .iter()
        .filter(|card| is_active(card))
        .filter(|card| seen.insert(card.id))
        .collect();

    let primary: Vec<CardId> = active
        .iter()
        .filter(|card| card.bloom_level == inputs.level)
        .map(|card| card.id)
        .collect();

    let lower: Vec<&Card> = active
        .iter()
        .copied()
        .filter(|card| support.contains(&card.bloom_level))
        .collect();

    let blasts = select_blasts(inputs, primary.len(), &lower);
    let review = if inputs.level == BloomLevel::lowest() {
        Vec::new()
    } else {
        select_review(inputs, primary.len(), &lower)
    };

    CandidatePools {
        primary,
        blasts,
        review,
    }
}

fn select_blasts(inputs: &PoolInputs<'_>, primary_len: usize, lower: &[&Card]) -> Vec<CardId> {
    let percent = inputs.settings.blasts_percent.clamp(0.0, 100.0);
    let wanted = (((primary_len + lower.len()) as f64) * percent / 100.0).round() as usize;
    let count = wanted.min(lower.len());
    if count == 0 {
        return Vec::new();
    }

    // Least recently seen first; never-seen cards sort ahead of everything
    let mut ranked: Vec<(Option<chrono::DateTime<chrono::Utc>>, CardId)> = lower
        .iter()
        .map(|card| {
            let last_seen = inputs
                .srs
                .and_then(|stats| stats.get(&card.id))
                .and_then(|perf| perf.last_seen_at);
            (last_seen, card.id)
        })
        .collect();
    ranked.sort();

    let window: Vec<CardId> = ranked
        .into_iter()
        .take(count.saturating_mul(BLASTS_WINDOW_FACTOR))
        .map(|(_, id)| id)
        .collect();

    let seed = SeedKey::new(inputs.deck_id, inputs.level, inputs.mission_index, SeedPurpose::Blasts)
        .with_salt(inputs.seed)
        .to_string();
    let mut picked = shuffle(&seed, &window);
    picked.truncate(count);
    picked
}

fn select_review(inputs: &PoolInputs<'_>, primary_len: usize, lower: &[&Card]) -> Vec<CardId> {
    if let Some(ids) = inputs.low_accuracy_ids {
        let allowed: HashSet<CardId> = lower.iter().map(|card| card.id).collect();
        let mut seen = HashSet::new();
        return ids
            .iter()
            .copied()
            .filter(|id| allowed.contains(id) && seen.insert(*id))
            .collect();
    }

    let Some(stats) = inputs.srs else {
        return Vec::new();
    };

    let percent = inputs.settings.review_percent.clamp(0.0, 100.0);
    let window = ((primary_len as f64) * percent / 100.0).ceil() as usize;
    if window == 0 {
        return Vec::new();
    }

    // Most wrong answers first, then the least practiced
    let mut ranked: Vec<(u32, u32, CardId)> = lower
        .iter()
        .filter_map(|card| {
            let perf = stats.get(&card.id)?;
            (perf.wrong() > 0).then(|| (perf.wrong(), perf.attempts, card.id))
        })
        .collect();
    if ranked.is_empty() {
        return Vec::new();
    }
    ranked.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));

    let key = SeedKey::new(inputs.deck_id, inputs.level, inputs.mission_index, SeedPurpose::Review)
        .with_salt(inputs.seed)
        .to_string();
    let offset = fnv1a_32(&key) as usize % ranked.len();
    ranked.rotate_left(offset);

    ranked.into_iter().take(window).map(|(_, _, id)| id).collect()
}
