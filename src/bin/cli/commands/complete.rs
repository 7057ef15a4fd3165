use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::Utc;

use bloomquest_lib::persistence::{
    load_progress, record_mission_attempt, update_quest_progress_on_complete, AnswerInput, AttemptClients,
    AttemptInput, LevelTally,
};
use bloomquest_lib::quest::progression::{meets_threshold, uncredited_cards};
use bloomquest_lib::quest::{
    compute_pass, record_answer, start_from_composition, BloomLevel, CardId, MissionCompletion, RecordOutcome,
};

use crate::app::{load_deck, App};
use crate::commands::compose::compose_for;
use crate::render::terminal::{paint, Color};
use crate::OutputFormat;

pub struct CompleteArgs<'a> {
    pub user: &'a str,
    pub deck_path: &'a Path,
    pub level: BloomLevel,
    pub mission_index: usize,
    pub answers_path: Option<&'a Path>,
    pub seen: Option<i64>,
    pub correct: Option<i64>,
    pub mode: &'a str,
}

/// Scores taken from a replayed answer file or from flat counts
struct Tally {
    seen: i64,
    correct: i64,
    /// Unrounded score; rounding is for display only
    score_pct: f64,
    passed: bool,
    /// Primary cards of this mission that were answered
    answered_primary: usize,
    breakdown: Option<BTreeMap<BloomLevel, LevelTally>>,
    answers: Vec<AnswerInput>,
}

fn read_answers(path: &Path) -> Result<Vec<AnswerInput>> {
    let content = fs::read_to_string(path).with_context(|| format!("Failed to read answers {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse answers {}", path.display()))
}

pub async fn run(app: &App, args: &CompleteArgs<'_>, format: &OutputFormat, use_color: bool) -> Result<()> {
    let deck = load_deck(args.deck_path)?;
    let started_at = Utc::now();
    let composition = compose_for(app, &deck, args.level, args.mission_index, None);

    let tally = match args.answers_path {
        Some(path) => {
            let answers = read_answers(path)?;
            let mut state = start_from_composition(&deck.deck_id, args.level, args.mission_index, &composition);
            let mut kept = Vec::with_capacity(answers.len());
            for answer in answers {
                if record_answer(&mut state, answer.card_id, answer.correct) == RecordOutcome::NotInMission {
                    eprintln!("Skipping card {}: not part of this mission", answer.card_id);
                    continue;
                }
                kept.push(answer);
            }
            let pass = compute_pass(&state, app.settings());
            let score_pct = if pass.total == 0 {
                0.0
            } else {
                pass.correct / pass.total as f64 * 100.0
            };

            let levels: HashMap<CardId, BloomLevel> =
                deck.cards.iter().map(|card| (card.id, card.bloom_level)).collect();
            let primary: HashSet<CardId> = composition.primary_ids.iter().copied().collect();
            let mut breakdown: BTreeMap<BloomLevel, LevelTally> = BTreeMap::new();
            for record in &state.answered {
                let level = levels.get(&record.card_id).copied().unwrap_or(args.level);
                let entry = breakdown.entry(level).or_default();
                entry.seen += 1;
                entry.correct += record.correctness.credit();
            }

            Tally {
                seen: state.answered.len() as i64,
                correct: state.correct_count.floor() as i64,
                score_pct,
                passed: pass.passed,
                answered_primary: state.answered.iter().filter(|r| primary.contains(&r.card_id)).count(),
                breakdown: Some(breakdown),
                answers: kept,
            }
        }
        None => {
            let (Some(seen), Some(correct)) = (args.seen, args.correct) else {
                bail!("Pass --answers, or both --seen and --correct");
            };
            let score_pct = if seen > 0 { correct as f64 / seen as f64 * 100.0 } else { 0.0 };
            Tally {
                seen,
                correct,
                score_pct,
                passed: meets_threshold(score_pct, app.settings().pass_threshold),
                answered_primary: usize::try_from(seen).unwrap_or(0).min(composition.primary_ids.len()),
                breakdown: None,
                answers: Vec::new(),
            }
        }
    };

    // Only answered Primary cards not yet credited for this mission count as completed
    let before = load_progress(&app.store, args.user, &deck.deck_id).await?;
    let cards_completed_delta =
        uncredited_cards(&before.level(args.level), args.mission_index, tally.answered_primary);

    let input = AttemptInput {
        user_id: args.user.to_string(),
        deck_id: deck.deck_id.clone(),
        bloom_level: args.level,
        score_pct: tally.score_pct,
        cards_seen: tally.seen,
        cards_correct: tally.correct,
        started_at,
        ended_at: Utc::now(),
        mode: Some(args.mode.to_string()),
        breakdown: tally.breakdown,
        answers: tally.answers,
    };
    let attempt = record_mission_attempt(AttemptClients::user_scoped(&app.store), &input).await;
    if !attempt.ok {
        log::warn!("Attempt not recorded: {}", attempt.error.as_deref().unwrap_or("unknown error"));
    }

    let completion = MissionCompletion {
        level: args.level,
        accuracy: tally.score_pct / 100.0,
        cards_completed_delta,
        mission_index: Some(args.mission_index),
    };
    let update = update_quest_progress_on_complete(
        &app.store,
        args.user,
        &deck.deck_id,
        &deck.cards,
        &completion,
        app.settings(),
        &app.policies,
    )
    .await
    .context("Failed to update progress")?;

    match format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "attempt": attempt,
                "delta": update.delta,
                "level": update.record.level(args.level),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Plain => {
            let verdict = if tally.passed {
                paint("passed", Color::GREEN, use_color)
            } else {
                paint("failed", Color::RED, use_color)
            };
            println!("{} mission {}: {:.1}% {}", args.level, args.mission_index + 1, update.delta.score_pct, verdict);

            match attempt.attempt_id {
                Some(id) => println!("Attempt #{} saved ({} card answers)", id, attempt.answers_written),
                None => println!("{}", paint("Attempt not saved", Color::YELLOW, use_color)),
            }

            let progress = update.record.level(args.level);
            println!(
                "Cards {}/{}  +{:.1} bloom XP  +{:.1} commander XP",
                progress.completed_cards, progress.total_cards, update.delta.xp.bloom_added, update.delta.xp.commander_added
            );
            if update.delta.cleared_now {
                println!("{}", paint(&format!("{} cleared", args.level), Color::BOLD, use_color));
            }
            if update.delta.mastered_now {
                println!("{}", paint(&format!("{} mastered", args.level), Color::BOLD, use_color));
            }
        }
    }

    Ok(())
}
