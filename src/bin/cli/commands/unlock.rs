use anyhow::{Context, Result};

use bloomquest_lib::persistence::unlock_next_bloom_level;
use bloomquest_lib::quest::BloomLevel;

use crate::app::App;
use crate::OutputFormat;

pub async fn run(app: &App, user: &str, deck: &str, level: BloomLevel, format: &OutputFormat) -> Result<()> {
    let outcome = unlock_next_bloom_level(&app.store, user, deck, level)
        .await
        .context("Failed to unlock level")?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        OutputFormat::Plain => {
            if !outcome.changed {
                println!("{} was already cleared.", level);
            } else {
                match outcome.next_level {
                    Some(next) => println!("{} cleared, {} unlocked.", level, next),
                    None => println!("{} cleared.", level),
                }
            }
        }
    }

    Ok(())
}
