mod app;
mod commands;
mod render;

use std::io::IsTerminal;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use bloomquest_lib::quest::BloomLevel;

#[derive(Parser)]
#[command(name = "bloomquest-cli", about = "Bloom-level flashcard missions", version)]
struct Cli {
    /// Config file (default: ~/.config/bloomquest/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, default_value = "plain")]
    format: OutputFormat,

    /// Disable ANSI colors
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Plain,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Compose one mission from a deck file
    Compose {
        /// Deck JSON: a card array or {deckId, cards, srs, lowAccuracyIds}
        deck: PathBuf,
        /// Target Bloom level
        #[arg(long, default_value = "Remember")]
        level: BloomLevel,
        /// Zero-based mission index within the level
        #[arg(long, default_value = "0")]
        mission: usize,
        /// Override the ordering seed
        #[arg(long)]
        seed: Option<String>,
        /// Refuse to compose when the level is locked for this user
        #[arg(long)]
        user: Option<String>,
    },

    /// Show stored progress for a user and deck
    Progress {
        user: String,
        deck: String,
    },

    /// Record a finished mission and update progress
    Complete {
        user: String,
        /// Deck JSON used to recount level totals
        deck: PathBuf,
        #[arg(long)]
        level: BloomLevel,
        #[arg(long, default_value = "0")]
        mission: usize,
        /// Answers JSON: [{cardId, correct}], replayed against the composed mission
        #[arg(long, conflicts_with_all = ["seen", "correct"])]
        answers: Option<PathBuf>,
        /// Cards seen (without --answers)
        #[arg(long)]
        seen: Option<i64>,
        /// Cards answered correctly (without --answers)
        #[arg(long)]
        correct: Option<i64>,
        /// quest, remix, drill or study
        #[arg(long, default_value = "quest")]
        mode: String,
    },

    /// Mark a level cleared so the next one opens
    Unlock {
        user: String,
        deck: String,
        #[arg(long)]
        level: BloomLevel,
    },

    /// Delete stored progress for a user and deck
    Reset {
        user: String,
        deck: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let use_color = !cli.no_color && std::io::stdout().is_terminal();
    let app = app::App::new(cli.config.as_deref())?;

    match cli.command {
        Command::Compose { deck, level, mission, seed, user } => {
            let args = commands::compose::ComposeArgs {
                deck_path: &deck,
                level,
                mission_index: mission,
                seed: seed.as_deref(),
                user: user.as_deref(),
            };
            commands::compose::run(&app, &args, &cli.format, use_color).await?;
        }
        Command::Progress { user, deck } => {
            commands::progress::run(&app, &user, &deck, &cli.format, use_color).await?;
        }
        Command::Complete { user, deck, level, mission, answers, seen, correct, mode } => {
            let args = commands::complete::CompleteArgs {
                user: &user,
                deck_path: &deck,
                level,
                mission_index: mission,
                answers_path: answers.as_deref(),
                seen,
                correct,
                mode: &mode,
            };
            commands::complete::run(&app, &args, &cli.format, use_color).await?;
        }
        Command::Unlock { user, deck, level } => {
            commands::unlock::run(&app, &user, &deck, level, &cli.format).await?;
        }
        Command::Reset { user, deck } => {
            commands::reset::run(&app, &user, &deck, &cli.format).await?;
        }
    }

    Ok(())
}
