//! Spaced repetition scheduling, session selection and the XP/goal ledger
//! behind Linguami's vocabulary practice.

pub mod calendar;
pub mod cards;
pub mod config;
pub mod error;
pub mod rewards;
pub mod service;
pub mod storage;

pub use cards::{Card, CardState, Grade, ReviewRecord, ReviewStats, Session, SessionStatus};
pub use config::SrsConfig;
pub use error::{Result, SrsError};
pub use rewards::{LedgerEntry, ProfileSnapshot, UserProfile};
pub use service::{IntervalPreview, ReviewOutcome, SrsService};
pub use storage::{BackupStore, CardStore, LedgerStore, SqliteStore};
