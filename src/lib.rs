//! Bloom-level flashcard missions
//!
//! - [`quest`]: deterministic mission composition, the mission lifecycle and
//!   the progression ledger. Pure and synchronous.
//! - [`store`]: repository traits with in-memory and SQLite backends.
//! - [`persistence`]: attempt recording and stored progress updates.

pub mod persistence;
pub mod quest;
pub mod store;
