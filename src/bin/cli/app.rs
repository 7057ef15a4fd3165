use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use bloomquest_lib::quest::{Card, CardId, PolicyTable, QuestConfig, QuestSettings, SrsStats};
use bloomquest_lib::store::SqliteStore;

/// Shared application state for CLI commands
pub struct App {
    pub config: QuestConfig,
    pub policies: PolicyTable,
    pub store: SqliteStore,
}

impl App {
    /// Load config (explicit path or the default location) and open the store
    pub fn new(config_path: Option<&Path>) -> Result<Self> {
        let config = match config_path {
            Some(path) => {
                if !path.exists() {
                    bail!("Config file {} does not exist", path.display());
                }
                QuestConfig::load(path).with_context(|| format!("Failed to load config {}", path.display()))?
            }
            None => match QuestConfig::default_path() {
                Some(path) => QuestConfig::load(&path).context("Failed to load default config")?,
                None => QuestConfig::default(),
            },
        };

        let db_path = config
            .store
            .database_path()
            .context("Failed to resolve database path")?;
        let store = SqliteStore::open(&db_path)
            .with_context(|| format!("Failed to open database {}", db_path.display()))?;
        let policies = config.policy_table();

        Ok(Self {
            config,
            policies,
            store,
        })
    }

    pub fn settings(&self) -> &QuestSettings {
        &self.config.settings
    }
}

/// A deck exported from the catalog
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deck {
    #[serde(default)]
    pub deck_id: String,
    pub cards: Vec<Card>,
    #[serde(default)]
    pub srs: Option<SrsStats>,
    #[serde(default)]
    pub low_accuracy_ids: Option<Vec<CardId>>,
}

/// Deck files are either a bare card array or a full [`Deck`] object
#[derive(Deserialize)]
#[serde(untagged)]
enum DeckFile {
    Cards(Vec<Card>),
    Deck(Deck),
}

/// Read a deck file; the deck id falls back to the file stem
pub fn load_deck(path: &Path) -> Result<Deck> {
    let content = fs::read_to_string(path).with_context(|| format!("Failed to read deck {}", path.display()))?;
    let parsed: DeckFile =
        serde_json::from_str(&content).with_context(|| format!("Failed to parse deck {}", path.display()))?;

    let mut deck = match parsed {
        DeckFile::Cards(cards) => Deck {
            cards,
            ..Deck::default()
        },
        DeckFile::Deck(deck) => deck,
    };
    if deck.deck_id.is_empty() {
        deck.deck_id = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .context("Deck file has no usable name")?
            .to_string();
    }
    Ok(deck)
}
