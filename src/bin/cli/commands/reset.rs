use anyhow::{Context, Result};

use bloomquest_lib::persistence::reset_progress;

use crate::app::App;
use crate::OutputFormat;

pub async fn run(app: &App, user: &str, deck: &str, format: &OutputFormat) -> Result<()> {
    let removed = reset_progress(&app.store, user, deck)
        .await
        .context("Failed to reset progress")?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::json!({ "user": user, "deck": deck, "removed": removed }));
        }
        OutputFormat::Plain => {
            if removed {
                println!("Progress for {} on {} deleted.", user, deck);
            } else {
                println!("No progress stored for {} on {}.", user, deck);
            }
        }
    }

    Ok(())
}
