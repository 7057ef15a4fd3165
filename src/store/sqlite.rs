//! SQLite store
//!
//! The schema is versioned through `PRAGMA user_version` and brought forward
//! by [`MIGRATIONS`]. The canonical attempt insert is [`PayloadShape::Full`];
//! older databases opened with [`SqliteStore::open_at_version`] reject the
//! columns they lack, which surfaces as [`StoreError::UnknownColumn`].

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use super::models::{AttemptRow, CardAnswerRow, OptionalColumn, PayloadShape, StoredAttempt};
use super::{AttemptStore, ProgressRepository, Result, StoreError};
use crate::quest::models::ProgressRecord;

/// Ordered schema steps; entry `i` upgrades version `i` to `i + 1`
const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS quest_progress (
        user_id TEXT NOT NULL,
        deck_id TEXT NOT NULL,
        levels TEXT NOT NULL,
        xp TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (user_id, deck_id)
    );

    CREATE TABLE IF NOT EXISTS mission_attempts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id TEXT NOT NULL,
        deck_id TEXT NOT NULL,
        bloom_level TEXT NOT NULL,
        score_pct REAL NOT NULL,
        cards_seen INTEGER NOT NULL,
        cards_correct INTEGER NOT NULL,
        started_at TEXT NOT NULL,
        ended_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS card_answers (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        attempt_id INTEGER NOT NULL REFERENCES mission_attempts(id) ON DELETE CASCADE,
        user_id TEXT NOT NULL,
        deck_id TEXT NOT NULL,
        card_id INTEGER NOT NULL,
        correct REAL NOT NULL,
        duration_ms INTEGER
    );

    CREATE INDEX IF NOT EXISTS idx_attempts_user_deck ON mission_attempts(user_id, deck_id);
    CREATE INDEX IF NOT EXISTS idx_card_answers_attempt ON card_answers(attempt_id);
    "#,
    "ALTER TABLE mission_attempts ADD COLUMN mode TEXT;",
    "ALTER TABLE mission_attempts ADD COLUMN breakdown TEXT;",
    "ALTER TABLE mission_attempts ADD COLUMN answers TEXT;",
];

/// Latest schema version
pub const SCHEMA_VERSION: u32 = MIGRATIONS.len() as u32;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (creating if needed) and migrate to the latest schema
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_at_version(path, SCHEMA_VERSION)
    }

    /// Open and migrate no further than `version`
    pub fn open_at_version(path: &Path, version: u32) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn, version)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, SCHEMA_VERSION)
    }

    fn from_connection(mut conn: Connection, version: u32) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        migrate(&mut conn, version.min(SCHEMA_VERSION))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn schema_version(&self) -> Result<u32> {
        let conn = self.lock()?;
        user_version(&conn)
    }

    /// Attempts for a user and deck, oldest first
    pub fn list_attempts(&self, user_id: &str, deck_id: &str) -> Result<Vec<StoredAttempt>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM mission_attempts WHERE user_id = ?1 AND deck_id = ?2 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![user_id, deck_id], read_attempt)?;
        let mut attempts = Vec::new();
        for row in rows {
            attempts.push(row??);
        }
        Ok(attempts)
    }

    pub fn list_card_answers(&self, attempt_id: i64) -> Result<Vec<CardAnswerRow>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT attempt_id, user_id, deck_id, card_id, correct, duration_ms
             FROM card_answers WHERE attempt_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![attempt_id], |row| {
            Ok(CardAnswerRow {
                attempt_id: row.get(0)?,
                user_id: row.get(1)?,
                deck_id: row.get(2)?,
                card_id: row.get(3)?,
                correct: row.get(4)?,
                duration_ms: row.get(5)?,
            })
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("SQLite connection lock poisoned".to_string()))
    }
}

fn user_version(conn: &Connection) -> Result<u32> {
    Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
}

fn migrate(conn: &mut Connection, target: u32) -> Result<()> {
    let current = user_version(conn)?;
    if current >= target {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for (index, step) in MIGRATIONS.iter().enumerate().take(target as usize).skip(current as usize) {
        tx.execute_batch(step)?;
        log::info!("Store: applied schema migration {}", index + 1);
    }
    tx.execute_batch(&format!("PRAGMA user_version = {};", target))?;
    tx.commit()?;
    Ok(())
}

/// Map SQLite's missing-column failures to [`StoreError::UnknownColumn`]
fn classify(err: rusqlite::Error) -> StoreError {
    if let rusqlite::Error::SqliteFailure(_, Some(message)) = &err {
        if message.contains("has no column named") || message.contains("no such column") {
            return StoreError::UnknownColumn(message.clone());
        }
    }
    StoreError::Sqlite(err)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp {:?}: {}", raw, e)))
}

fn read_attempt(row: &Row<'_>) -> rusqlite::Result<Result<StoredAttempt>> {
    let bloom_level: String = row.get("bloom_level")?;
    let started_at: String = row.get("started_at")?;
    let ended_at: String = row.get("ended_at")?;
    // Optional columns are absent on older schemas
    let mode = row.get::<_, Option<String>>("mode").ok().flatten();
    let breakdown = row.get::<_, Option<String>>("breakdown").ok().flatten();
    let answers = row.get::<_, Option<String>>("answers").ok().flatten();
    let id: i64 = row.get("id")?;
    let user_id: String = row.get("user_id")?;
    let deck_id: String = row.get("deck_id")?;
    let score_pct: f64 = row.get("score_pct")?;
    let cards_seen: u32 = row.get("cards_seen")?;
    let cards_correct: u32 = row.get("cards_correct")?;

    let build = || -> Result<StoredAttempt> {
        Ok(StoredAttempt {
            id,
            row: AttemptRow {
                user_id,
                deck_id,
                bloom_level: bloom_level.parse().map_err(StoreError::Corrupt)?,
                score_pct,
                cards_seen,
                cards_correct,
                started_at: parse_timestamp(&started_at)?,
                ended_at: parse_timestamp(&ended_at)?,
                mode: mode.and_then(|m| m.parse().ok()),
                breakdown: breakdown.map(|b| serde_json::from_str(&b)).transpose()?,
                answers: answers.map(|a| serde_json::from_str(&a)).transpose()?,
            },
        })
    };
    Ok(build())
}

#[async_trait]
impl ProgressRepository for SqliteStore {
    async fn get(&self, user_id: &str, deck_id: &str) -> Result<Option<ProgressRecord>> {
        let conn = self.lock()?;
        let raw: Option<(String, String, String)> = conn
            .query_row(
                "SELECT levels, xp, updated_at FROM quest_progress WHERE user_id = ?1 AND deck_id = ?2",
                params![user_id, deck_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((levels, xp, updated_at)) = raw else {
            return Ok(None);
        };
        Ok(Some(ProgressRecord {
            user_id: user_id.to_string(),
            deck_id: deck_id.to_string(),
            levels: serde_json::from_str(&levels)?,
            xp: serde_json::from_str(&xp)?,
            updated_at: parse_timestamp(&updated_at)?,
        }))
    }

    async fn put(&self, record: &ProgressRecord) -> Result<()> {
        let levels = serde_json::to_string(&record.levels)?;
        let xp = serde_json::to_string(&record.xp)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO quest_progress (user_id, deck_id, levels, xp, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(user_id, deck_id) DO UPDATE SET
                levels = excluded.levels,
                xp = excluded.xp,
                updated_at = excluded.updated_at",
            params![
                record.user_id,
                record.deck_id,
                levels,
                xp,
                record.updated_at.to_rfc3339()
            ],
        )?;
        Ok(())
    }

    async fn delete(&self, user_id: &str, deck_id: &str) -> Result<bool> {
        let conn = self.lock()?;
        let removed = conn.execute(
            "DELETE FROM quest_progress WHERE user_id = ?1 AND deck_id = ?2",
            params![user_id, deck_id],
        )?;
        Ok(removed > 0)
    }
}

#[async_trait]
impl AttemptStore for SqliteStore {
    async fn insert_attempt(&self, row: &AttemptRow, shape: PayloadShape) -> Result<i64> {
        let mut columns = vec![
            "user_id",
            "deck_id",
            "bloom_level",
            "score_pct",
            "cards_seen",
            "cards_correct",
            "started_at",
            "ended_at",
        ];
        let mut values = vec![
            Value::Text(row.user_id.clone()),
            Value::Text(row.deck_id.clone()),
            Value::Text(row.bloom_level.to_string()),
            Value::Real(row.score_pct),
            Value::Integer(i64::from(row.cards_seen)),
            Value::Integer(i64::from(row.cards_correct)),
            Value::Text(row.started_at.to_rfc3339()),
            Value::Text(row.ended_at.to_rfc3339()),
        ];

        for column in shape.columns() {
            let value = match column {
                OptionalColumn::Mode => row.mode.map(|m| Value::Text(m.to_string())),
                OptionalColumn::Breakdown => row
                    .breakdown
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?
                    .map(Value::Text),
                OptionalColumn::Answers => row
                    .answers
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?
                    .map(Value::Text),
            };
            columns.push(column.name());
            values.push(value.unwrap_or(Value::Null));
        }

        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "INSERT INTO mission_attempts ({}) VALUES ({})",
            columns.join(", "),
            placeholders.join(", ")
        );

        let conn = self.lock()?;
        conn.execute(&sql, params_from_iter(values.iter())).map_err(classify)?;
        Ok(conn.last_insert_rowid())
    }

    async fn insert_card_answers(&self, rows: &[CardAnswerRow]) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO card_answers (attempt_id, user_id, deck_id, card_id, correct, duration_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for row in rows {
                stmt.execute(params![
                    row.attempt_id,
                    row.user_id,
                    row.deck_id,
                    row.card_id,
                    row.correct,
                    row.duration_ms
                ])?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }
}
