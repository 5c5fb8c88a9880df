//! XP, gold, level and streak data models

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One immutable reward event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    /// XP awarded
    pub amount: i64,
    pub gold: i64,
    /// Review or exercise that produced the reward, unique across the ledger
    pub source_ref: String,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn new(user_id: Uuid, amount: i64, gold: i64, source_ref: String, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            amount,
            gold,
            source_ref,
            created_at: now,
        }
    }
}

/// Sums over a user's ledger entries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerTotals {
    pub xp: i64,
    pub gold: i64,
    pub entries: usize,
}

/// Running totals derived from the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub user_id: Uuid,
    #[serde(default)]
    pub total_xp: i64,
    #[serde(default)]
    pub total_gold: i64,
    #[serde(default)]
    pub current_level: u32,
    #[serde(default)]
    pub daily_streak: u32,
    #[serde(default)]
    pub longest_streak: u32,
    #[serde(default)]
    pub last_activity_date: Option<NaiveDate>,
    /// XP earned on `daily_xp_date`
    #[serde(default)]
    pub daily_xp: i64,
    #[serde(default)]
    pub daily_xp_date: Option<NaiveDate>,
    pub daily_xp_goal: i64,
    pub updated_at: DateTime<Utc>,
    /// Row version for optimistic concurrency, 0 until first stored
    #[serde(default)]
    pub version: u64,
}

impl UserProfile {
    pub fn new(user_id: Uuid, daily_xp_goal: i64, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            total_xp: 0,
            total_gold: 0,
            current_level: 0,
            daily_streak: 0,
            longest_streak: 0,
            last_activity_date: None,
            daily_xp: 0,
            daily_xp_date: None,
            daily_xp_goal,
            updated_at: now,
            version: 0,
        }
    }
}

/// Where the user sits inside their current level, for progress bars
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelProgress {
    pub level: u32,
    pub xp_in_current_level: i64,
    pub xp_for_next_level: i64,
}

/// Profile plus the derived values the UI displays
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSnapshot {
    pub profile: UserProfile,
    pub level: LevelProgress,
    pub xp_today: i64,
    pub goal_met_today: bool,
}

/// XP and gold for one event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reward {
    pub xp: i64,
    pub gold: i64,
}

/// Outcome of comparing a profile against its ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub user_id: Uuid,
    pub ledger_xp: i64,
    pub ledger_gold: i64,
    pub profile_xp: i64,
    pub profile_gold: i64,
    /// Whether the profile was rewritten to match the ledger
    pub repaired: bool,
}
