//! Server-side persistence of mission results
//!
//! Records completed mission attempts (with the payload-shape fallback for
//! lagging schemas), flips the sticky `cleared` flag on unlock, and folds
//! completions into the stored progress row.

mod attempts;
mod progress;

pub use attempts::{
    extract_response_duration, record_mission_attempt, sanitize_attempt, AnswerInput, AttemptClients,
    AttemptInput, AttemptOutcome, ClientPath, LevelTally, PendingAnswer, SanitizedAttempt, MAX_CARDS_PER_ATTEMPT,
    MAX_RESPONSE_DURATION_MS,
};
pub use progress::{
    load_progress, reset_progress, unlock_next_bloom_level, update_quest_progress_on_complete, CompletionUpdate,
    UnlockOutcome,
};
