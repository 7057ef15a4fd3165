//! End-to-end mission flows over the public API

use std::collections::HashSet;

use bloomquest_lib::persistence::{
    load_progress, record_mission_attempt, unlock_next_bloom_level, update_quest_progress_on_complete, AttemptClients,
    AttemptInput,
};
use bloomquest_lib::quest::{
    build_candidate_pools, compose_mission, compute_pass, is_level_unlocked, record_answer, restart_mission,
    start_from_composition, BloomLevel, Card, ComposeContext, MissionCompletion, PolicyTable, PoolInputs,
    QuestSettings,
};
use bloomquest_lib::store::{AttemptStore, MemoryStore, PayloadShape, ProgressRepository, SqliteStore};
use chrono::Utc;
use tempfile::TempDir;

fn compose(
    cards: &[Card],
    level: BloomLevel,
    mission_index: usize,
    settings: &QuestSettings,
    policies: &PolicyTable,
) -> bloomquest_lib::quest::MissionComposition {
    let inputs = PoolInputs {
        deck_id: "deck-1",
        cards,
        level,
        mission_index,
        srs: None,
        low_accuracy_ids: None,
        settings,
        policies,
        seed: None,
    };
    let pools = build_candidate_pools(&inputs);
    let ctx = ComposeContext {
        deck_id: "deck-1",
        level,
        mission_index,
        seed_override: None,
    };
    compose_mission(&pools, &ctx, settings)
}

#[test]
fn sixty_cards_split_into_two_missions() {
    let settings = QuestSettings::default();
    let policies = PolicyTable::default();
    let cards: Vec<Card> = (1..=60).map(|id| Card::new(id, BloomLevel::Remember)).collect();

    let first = compose(&cards, BloomLevel::Remember, 0, &settings, &policies);
    let second = compose(&cards, BloomLevel::Remember, 1, &settings, &policies);
    let third = compose(&cards, BloomLevel::Remember, 2, &settings, &policies);

    assert_eq!(first.primary_ids.len(), 50);
    assert_eq!(second.primary_ids.len(), 10);
    assert!(third.primary_ids.is_empty());
    assert!(third.mission_ids.is_empty());

    let covered: HashSet<i64> = first.primary_ids.iter().chain(&second.primary_ids).copied().collect();
    assert_eq!(covered.len(), 60);
}

#[test]
fn composition_is_capped_and_disjoint_with_lower_levels() {
    let settings = QuestSettings { mission_cap: 20, ..QuestSettings::default() };
    let policies = PolicyTable::default();
    let mut cards: Vec<Card> = (1..=30).map(|id| Card::new(id, BloomLevel::Remember)).collect();
    cards.extend((100..120).map(|id| Card::new(id, BloomLevel::Apply)));

    let composition = compose(&cards, BloomLevel::Apply, 0, &settings, &policies);
    assert!(composition.mission_ids.len() <= 20);
    assert_eq!(composition.primary_ids.len(), 20);
    // Primary fills the cap, so every Blast is trimmed
    assert!(composition.blasts_ids.is_empty());
    assert!(composition.debug.trimmed.blasts > 0);

    let mission: HashSet<i64> = composition.mission_ids.iter().copied().collect();
    let union: HashSet<i64> = composition
        .primary_ids
        .iter()
        .chain(&composition.blasts_ids)
        .chain(&composition.review_ids)
        .copied()
        .collect();
    assert_eq!(mission, union);
}

#[test]
fn play_restart_and_score_a_mission() {
    let settings = QuestSettings::default();
    let policies = PolicyTable::default();
    let cards: Vec<Card> = (1..=50).map(|id| Card::new(id, BloomLevel::Understand)).collect();
    let composition = compose(&cards, BloomLevel::Understand, 0, &settings, &policies);

    let mut state = start_from_composition("deck-1", BloomLevel::Understand, 0, &composition);
    let order = state.card_order.clone();
    for (position, id) in order.iter().enumerate() {
        record_answer(&mut state, *id, position < 29);
    }
    let result = compute_pass(&state, &settings);
    assert_eq!(result.percent, 58.0);
    assert!(!result.passed);

    restart_mission(&mut state);
    assert!(state.answered.is_empty());
    assert_eq!(state.correct_count, 0.0);
    let mut restarted = state.card_order.clone();
    restarted.sort_unstable();
    let mut original = order;
    original.sort_unstable();
    assert_eq!(restarted, original);

    for id in state.card_order.clone().iter().take(30) {
        record_answer(&mut state, *id, true);
    }
    let result = compute_pass(&state, &settings);
    assert_eq!(result.percent, 60.0);
    assert!(result.passed);
}

#[tokio::test]
async fn unlock_twice_is_a_noop_the_second_time() {
    let store = MemoryStore::new();
    let first = unlock_next_bloom_level(&store, "user-1", "deck-1", BloomLevel::Apply).await.unwrap();
    let after_first = store.get("user-1", "deck-1").await.unwrap().unwrap();

    let second = unlock_next_bloom_level(&store, "user-1", "deck-1", BloomLevel::Apply).await.unwrap();
    let after_second = store.get("user-1", "deck-1").await.unwrap().unwrap();

    assert!(first.changed);
    assert!(!second.changed);
    assert_eq!(after_first, after_second);
}

#[tokio::test]
async fn completed_mission_flows_into_sqlite() {
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::open(&dir.path().join("quest.db")).unwrap();
    let settings = QuestSettings::default();
    let policies = PolicyTable::default();
    let cards: Vec<Card> = (1..=10).map(|id| Card::new(id, BloomLevel::Remember)).collect();

    let now = Utc::now();
    let input = AttemptInput {
        user_id: "user-1".to_string(),
        deck_id: "deck-1".to_string(),
        bloom_level: BloomLevel::Remember,
        score_pct: 90.0,
        cards_seen: 10,
        cards_correct: 9,
        started_at: now,
        ended_at: now,
        mode: Some("quest".to_string()),
        breakdown: None,
        answers: Vec::new(),
    };
    let outcome = record_mission_attempt(AttemptClients::user_scoped(&store), &input).await;
    assert!(outcome.ok);
    assert_eq!(outcome.shape, Some(PayloadShape::Full));

    let completion = MissionCompletion { level: BloomLevel::Remember, accuracy: 0.9, cards_completed_delta: 10, mission_index: None };
    let update = update_quest_progress_on_complete(&store, "user-1", "deck-1", &cards, &completion, &settings, &policies)
        .await
        .unwrap();
    assert!(update.delta.cleared_now);
    assert!(update.delta.mastered_now);
    // Remember: base 10 * 0.9 * 1.0, mirrored at 1.0x on mastery
    assert!((update.delta.xp.bloom_added - 9.0).abs() < 1e-9);
    assert!((update.delta.xp.commander_added - 9.0).abs() < 1e-9);

    let record = load_progress(&store, "user-1", "deck-1").await.unwrap();
    assert!(is_level_unlocked(&record.levels, BloomLevel::Understand, &settings));
    assert!(!is_level_unlocked(&record.levels, BloomLevel::Apply, &settings));
    assert_eq!(store.list_attempts("user-1", "deck-1").unwrap().len(), 1);
}

#[tokio::test]
async fn lagging_sqlite_schema_still_records() {
    let dir = TempDir::new().unwrap();
    let store = SqliteStore::open_at_version(&dir.path().join("old.db"), 1).unwrap();
    let now = Utc::now();
    let input = AttemptInput {
        user_id: "user-1".to_string(),
        deck_id: "deck-1".to_string(),
        bloom_level: BloomLevel::Apply,
        score_pct: 50.0,
        cards_seen: 4,
        cards_correct: 2,
        started_at: now,
        ended_at: now,
        mode: Some("drill".to_string()),
        breakdown: None,
        answers: Vec::new(),
    };

    let outcome = record_mission_attempt(AttemptClients::user_scoped(&store), &input).await;
    assert!(outcome.ok);
    assert_eq!(outcome.shape, Some(PayloadShape::Minimal));

    // Later inserts at the canonical shape still fail cleanly on the old schema
    let row = bloomquest_lib::persistence::sanitize_attempt(&input).row;
    assert!(store.insert_attempt(&row, PayloadShape::Full).await.is_err());
}
