//! In-memory store for tests and ephemeral sessions

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::models::{AttemptRow, CardAnswerRow, OptionalColumn, PayloadShape, StoredAttempt};
use super::{AttemptStore, ProgressRepository, Result, StoreError};
use crate::quest::models::ProgressRecord;

/// Keeps every row in memory
///
/// Can emulate a lagging schema (`with_columns`), a failing card-answer
/// table (`fail_card_answers`) and an unreachable backend (`set_unavailable`).
pub struct MemoryStore {
    progress: RwLock<HashMap<(String, String), ProgressRecord>>,
    attempts: RwLock<Vec<StoredAttempt>>,
    card_answers: RwLock<Vec<CardAnswerRow>>,
    supported_columns: Option<Vec<OptionalColumn>>,
    fail_card_answers: AtomicBool,
    unavailable: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            progress: RwLock::new(HashMap::new()),
            attempts: RwLock::new(Vec::new()),
            card_answers: RwLock::new(Vec::new()),
            supported_columns: None,
            fail_card_answers: AtomicBool::new(false),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Only accept attempts whose optional columns are all in `columns`
    pub fn with_columns(mut self, columns: &[OptionalColumn]) -> Self {
        self.supported_columns = Some(columns.to_vec());
        self
    }

    pub fn fail_card_answers(&self, fail: bool) {
        self.fail_card_answers.store(fail, Ordering::SeqCst);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn attempts(&self) -> Vec<StoredAttempt> {
        self.attempts.read().await.clone()
    }

    pub async fn card_answers(&self) -> Vec<CardAnswerRow> {
        self.card_answers.read().await.clone()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ProgressRepository for MemoryStore {
    async fn get(&self, user_id: &str, deck_id: &str) -> Result<Option<ProgressRecord>> {
        self.check_available()?;
        let progress = self.progress.read().await;
        Ok(progress.get(&(user_id.to_string(), deck_id.to_string())).cloned())
    }

    async fn put(&self, record: &ProgressRecord) -> Result<()> {
        self.check_available()?;
        let mut progress = self.progress.write().await;
        progress.insert((record.user_id.clone(), record.deck_id.clone()), record.clone());
        Ok(())
    }

    async fn delete(&self, user_id: &str, deck_id: &str) -> Result<bool> {
        self.check_available()?;
        let mut progress = self.progress.write().await;
        Ok(progress.remove(&(user_id.to_string(), deck_id.to_string())).is_some())
    }
}

#[async_trait]
impl AttemptStore for MemoryStore {
    async fn insert_attempt(&self, row: &AttemptRow, shape: PayloadShape) -> Result<i64> {
        self.check_available()?;
        if let Some(supported) = &self.supported_columns {
            if let Some(missing) = shape.columns().iter().find(|c| !supported.contains(c)) {
                return Err(StoreError::UnknownColumn(missing.name().to_string()));
            }
        }

        let mut attempts = self.attempts.write().await;
        let id = attempts.len() as i64 + 1;
        attempts.push(StoredAttempt {
            id,
            row: row.restricted_to(shape),
        });
        Ok(id)
    }

    async fn insert_card_answers(&self, rows: &[CardAnswerRow]) -> Result<usize> {
        self.check_available()?;
        if self.fail_card_answers.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("card_answers rejected".to_string()));
        }
        let mut answers = self.card_answers.write().await;
        answers.extend_from_slice(rows);
        Ok(rows.len())
    }
}
