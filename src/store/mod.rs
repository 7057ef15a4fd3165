//! Progress and mission-attempt storage
//!
//! Callers talk to the [`ProgressRepository`] and [`AttemptStore`] traits.
//! [`MemoryStore`] backs tests; [`SqliteStore`] is the durable backend.

mod memory;
mod models;
mod sqlite;

use async_trait::async_trait;
use thiserror::Error;

use crate::quest::models::ProgressRecord;

pub use memory::MemoryStore;
pub use models::*;
pub use sqlite::{SqliteStore, SCHEMA_VERSION};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The backing schema lacks a column the payload tried to write
    #[error("Unknown column: {0}")]
    UnknownColumn(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Progress rows keyed by (user, deck)
#[async_trait]
pub trait ProgressRepository: Send + Sync {
    async fn get(&self, user_id: &str, deck_id: &str) -> Result<Option<ProgressRecord>>;

    /// Insert or replace the row for `record.user_id` / `record.deck_id`
    async fn put(&self, record: &ProgressRecord) -> Result<()>;

    /// Remove the row; returns whether one existed
    async fn delete(&self, user_id: &str, deck_id: &str) -> Result<bool>;
}

/// Mission attempt rows and their per-card fan-out
#[async_trait]
pub trait AttemptStore: Send + Sync {
    /// Insert `row` writing only the optional columns in `shape`
    async fn insert_attempt(&self, row: &AttemptRow, shape: PayloadShape) -> Result<i64>;

    async fn insert_card_answers(&self, rows: &[CardAnswerRow]) -> Result<usize>;
}
