//! Persistence boundary for cards, the review log, the reward ledger and
//! user profiles
//!
//! The scheduler, selector and ledger only talk to the traits below, so any
//! relational backend can sit behind them. `SqliteStore` is the bundled
//! implementation.

pub mod backup;
mod sqlite;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::cards::{Card, ReviewRecord};
use crate::error::Result;
use crate::rewards::{LedgerEntry, LedgerTotals, UserProfile};

pub use backup::{ImportSummary, UserExport};
pub use sqlite::SqliteStore;

/// Card and review log storage
///
/// Writes are compare-and-swap on `Card::version`: a card read at version
/// `v` can only be written back while the stored row is still at `v`.
/// A mismatch fails with `SrsError::Conflict` and writes nothing.
pub trait CardStore: Send + Sync {
    fn get_card(&self, user_id: Uuid, word_id: Uuid) -> Result<Option<Card>>;

    /// Insert (version 0) or update a card; returns it at its new version
    fn upsert_card(&self, card: &Card) -> Result<Card>;

    /// Write a graded card and its review record atomically
    fn commit_review(&self, card: &Card, review: &ReviewRecord) -> Result<Card>;

    /// Non-suspended scheduled cards due at `now`, oldest due date first,
    /// ties by word id
    fn query_due_cards(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<Vec<Card>>;

    /// Non-suspended new cards in creation order
    fn query_new_cards(&self, user_id: Uuid, limit: usize) -> Result<Vec<Card>>;

    /// Every card the user has, suspended included
    fn list_cards(&self, user_id: Uuid) -> Result<Vec<Card>>;

    fn suspend_card(&self, user_id: Uuid, word_id: Uuid, now: DateTime<Utc>) -> Result<Card>;

    fn unsuspend_card(&self, user_id: Uuid, word_id: Uuid, now: DateTime<Utc>) -> Result<Card>;

    /// Remove a card together with its review history
    fn delete_card(&self, user_id: Uuid, word_id: Uuid) -> Result<()>;

    fn append_review(&self, review: &ReviewRecord) -> Result<()>;

    fn list_reviews(&self, user_id: Uuid) -> Result<Vec<ReviewRecord>>;

    fn list_reviews_since(&self, user_id: Uuid, since: DateTime<Utc>) -> Result<Vec<ReviewRecord>>;

    /// Number of cards graded for the first time at or after `since`
    fn count_new_introduced_since(&self, user_id: Uuid, since: DateTime<Utc>) -> Result<usize>;
}

/// Result of a transactional reward write
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    /// The entry was inserted and the profile updated
    Recorded(UserProfile),
    /// An entry with the same source already exists; nothing was written
    Duplicate(LedgerEntry),
}

/// Reward ledger and profile storage
///
/// `source_ref` is unique across the whole ledger. Profile writes are
/// compare-and-swap on `UserProfile::version`.
pub trait LedgerStore: Send + Sync {
    /// Insert an entry; a duplicate `source_ref` fails with `Conflict`
    fn append_ledger_entry(&self, entry: &LedgerEntry) -> Result<LedgerEntry>;

    fn find_ledger_entry(&self, source_ref: &str) -> Result<Option<LedgerEntry>>;

    fn list_ledger_entries(&self, user_id: Uuid) -> Result<Vec<LedgerEntry>>;

    fn sum_ledger(&self, user_id: Uuid) -> Result<LedgerTotals>;

    fn get_user_profile(&self, user_id: Uuid) -> Result<Option<UserProfile>>;

    /// Insert (version 0) or update a profile; returns it at its new version
    fn update_user_profile(&self, profile: &UserProfile) -> Result<UserProfile>;

    /// Insert `entry` and write `profile` in one transaction
    fn record_reward(&self, entry: &LedgerEntry, profile: &UserProfile) -> Result<RecordOutcome>;
}

/// Bulk restore of one user's data
pub trait BackupStore: Send + Sync {
    /// Write a validated export in one transaction
    ///
    /// Rows that already exist are kept and counted as skipped. A review
    /// whose card is neither stored nor exported fails the whole restore.
    /// Afterwards the user's profile totals equal the sum of their ledger
    /// entries; `base_profile` seeds the profile when the user has none.
    fn restore_user(
        &self,
        export: &UserExport,
        base_profile: &UserProfile,
        now: DateTime<Utc>,
    ) -> Result<ImportSummary>;
}
