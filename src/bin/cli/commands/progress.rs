use anyhow::Result;

use bloomquest_lib::persistence::load_progress;
use bloomquest_lib::quest::{is_level_unlocked, unlocked_levels, BloomLevel};

use crate::app::App;
use crate::render::terminal::{bar, level_flags, paint, Color};
use crate::OutputFormat;

pub async fn run(app: &App, user: &str, deck: &str, format: &OutputFormat, use_color: bool) -> Result<()> {
    let record = load_progress(&app.store, user, deck).await?;
    let settings = app.settings();

    match format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "progress": record,
                "unlocked": unlocked_levels(&record.levels, settings),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Plain => {
            println!("{}", paint(&format!("{} / {}", user, deck), Color::BOLD, use_color));
            println!();
            println!(
                "{:<11} {:<12} {:>9} {:>8} {:>7} {:>8}  Status",
                "Level", "Completion", "Cards", "Missions", "Avg", "Weighted"
            );
            println!("{}", "\u{2500}".repeat(78));

            for level in BloomLevel::ALL {
                let progress = record.level(level);
                let unlocked = is_level_unlocked(&record.levels, level, settings);
                let average = progress
                    .average_accuracy()
                    .map(|avg| format!("{:.1}", avg))
                    .unwrap_or_else(|| "-".to_string());
                let flags = level_flags(&progress, unlocked);
                let flags = if progress.mastered {
                    paint(&flags, Color::GREEN, use_color)
                } else if !unlocked {
                    paint(&flags, Color::DIM, use_color)
                } else {
                    flags
                };

                println!(
                    "{:<11} {:<12} {:>4}/{:<4} {:>4}/{:<3} {:>7} {:>8.1}  {}",
                    level.as_str(),
                    bar(progress.mastery_percent, 12),
                    progress.completed_cards,
                    progress.total_cards,
                    progress.missions_passed,
                    progress.missions_completed,
                    average,
                    progress.weighted_avg,
                    flags
                );
            }

            let bloom_total: f64 = record.xp.bloom_xp.values().sum();
            println!();
            println!("Bloom XP {:.1}  Commander XP {:.1}", bloom_total, record.xp.commander_xp_total);
        }
    }

    Ok(())
}
