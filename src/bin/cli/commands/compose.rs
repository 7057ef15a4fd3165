use std::path::Path;

use anyhow::{bail, Result};

use bloomquest_lib::persistence::load_progress;
use bloomquest_lib::quest::composer::mission_count;
use bloomquest_lib::quest::{
    build_candidate_pools, compose_mission, is_level_unlocked, BloomLevel, ComposeContext, MissionComposition,
    PoolInputs,
};

use crate::app::{load_deck, App, Deck};
use crate::render::terminal::{paint, Color};
use crate::OutputFormat;

pub struct ComposeArgs<'a> {
    pub deck_path: &'a Path,
    pub level: BloomLevel,
    pub mission_index: usize,
    pub seed: Option<&'a str>,
    pub user: Option<&'a str>,
}

/// Build pools and compose mission `mission_index` of `level`
pub fn compose_for(
    app: &App,
    deck: &Deck,
    level: BloomLevel,
    mission_index: usize,
    seed: Option<&str>,
) -> MissionComposition {
    let inputs = PoolInputs {
        deck_id: &deck.deck_id,
        cards: &deck.cards,
        level,
        mission_index,
        srs: deck.srs.as_ref(),
        low_accuracy_ids: deck.low_accuracy_ids.as_deref(),
        settings: app.settings(),
        policies: &app.policies,
        seed,
    };
    let pools = build_candidate_pools(&inputs);
    let ctx = ComposeContext {
        deck_id: &deck.deck_id,
        level,
        mission_index,
        seed_override: seed,
    };
    compose_mission(&pools, &ctx, app.settings())
}

pub async fn run(app: &App, args: &ComposeArgs<'_>, format: &OutputFormat, use_color: bool) -> Result<()> {
    let deck = load_deck(args.deck_path)?;

    if let Some(user) = args.user {
        let record = load_progress(&app.store, user, &deck.deck_id).await?;
        if !is_level_unlocked(&record.levels, args.level, app.settings()) {
            bail!("{} is locked for {} on deck {}", args.level, user, deck.deck_id);
        }
    }

    let composition = compose_for(app, &deck, args.level, args.mission_index, args.seed);
    let primary_total = deck
        .cards
        .iter()
        .filter(|card| card.is_active() && card.bloom_level == args.level)
        .count();
    let missions = mission_count(primary_total, app.settings().mission_cap);

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&composition)?);
        }
        OutputFormat::Plain => {
            let title = format!(
                "{} {} mission {}/{}",
                deck.deck_id,
                args.level,
                args.mission_index + 1,
                missions.max(1)
            );
            println!("{}", paint(&title, Color::BOLD, use_color));
            println!("{}", paint(&format!("seed {}", composition.seed_used), Color::DIM, use_color));

            if composition.mission_ids.is_empty() {
                println!("\nNo cards for this mission.");
                return Ok(());
            }

            let debug = &composition.debug;
            println!(
                "\n{} primary, {} blasts, {} review ({} cards)",
                debug.chosen.primary, debug.chosen.blasts, debug.chosen.review, debug.total
            );
            if debug.trimmed.total() > 0 {
                println!(
                    "{}",
                    paint(
                        &format!("trimmed {} blasts, {} review", debug.trimmed.blasts, debug.trimmed.review),
                        Color::YELLOW,
                        use_color
                    )
                );
            }

            println!();
            for (position, id) in composition.mission_ids.iter().enumerate() {
                let role = if composition.blasts_ids.contains(id) {
                    "blast"
                } else if composition.review_ids.contains(id) {
                    "review"
                } else {
                    "primary"
                };
                println!("{:>4}. card {:<8} {}", position + 1, id, paint(role, Color::DIM, use_color));
            }
        }
    }

    Ok(())
}
