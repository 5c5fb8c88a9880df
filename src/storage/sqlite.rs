//! SQLite-backed card and ledger store
//!
//! Schema:
//! ```text
//! cards           one row per (user_id, word_id), versioned
//! reviews         append-only review log, cascades with its card
//! ledger_entries  reward ledger, source_ref UNIQUE
//! user_profiles   one row per user, versioned
//! ```
//!
//! Timestamps are RFC 3339 strings with nanosecond precision in UTC, so
//! text ordering matches time ordering.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, TryLockError};
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use uuid::Uuid;

use super::backup::{ImportSummary, UserExport};
use super::{BackupStore, CardStore, LedgerStore, RecordOutcome};
use crate::cards::{Card, CardState, Grade, ReviewRecord};
use crate::error::{Result, SrsError};
use crate::rewards::{level_for_xp, LedgerEntry, LedgerTotals, UserProfile};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS cards (
        user_id TEXT NOT NULL,
        word_id TEXT NOT NULL,
        card_state TEXT NOT NULL,
        ease_factor REAL NOT NULL,
        interval INTEGER NOT NULL,
        learning_step INTEGER,
        next_review_date TEXT,
        last_review_date TEXT,
        reviews_count INTEGER NOT NULL,
        lapses INTEGER NOT NULL,
        consecutive_lapses INTEGER NOT NULL,
        is_suspended INTEGER NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        version INTEGER NOT NULL,
        PRIMARY KEY (user_id, word_id)
    );

    CREATE TABLE IF NOT EXISTS reviews (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        word_id TEXT NOT NULL,
        grade TEXT NOT NULL,
        state_before TEXT NOT NULL,
        state_after TEXT NOT NULL,
        interval_before INTEGER NOT NULL,
        interval_after INTEGER NOT NULL,
        ease_factor_after REAL NOT NULL,
        reviewed_at TEXT NOT NULL,
        FOREIGN KEY (user_id, word_id) REFERENCES cards(user_id, word_id) ON DELETE CASCADE
    );

    CREATE TABLE IF NOT EXISTS ledger_entries (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        amount INTEGER NOT NULL,
        gold INTEGER NOT NULL,
        source_ref TEXT NOT NULL UNIQUE,
        created_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS user_profiles (
        user_id TEXT PRIMARY KEY,
        total_xp INTEGER NOT NULL,
        total_gold INTEGER NOT NULL,
        current_level INTEGER NOT NULL,
        daily_streak INTEGER NOT NULL,
        longest_streak INTEGER NOT NULL,
        last_activity_date TEXT,
        daily_xp INTEGER NOT NULL,
        daily_xp_date TEXT,
        daily_xp_goal INTEGER NOT NULL,
        updated_at TEXT NOT NULL,
        version INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_cards_due ON cards(user_id, is_suspended, next_review_date);
    CREATE INDEX IF NOT EXISTS idx_reviews_user_time ON reviews(user_id, reviewed_at);
    CREATE INDEX IF NOT EXISTS idx_ledger_user ON ledger_entries(user_id);
"#;

const CARD_COLUMNS: &str = "user_id, word_id, card_state, ease_factor, interval, learning_step, \
     next_review_date, last_review_date, reviews_count, lapses, consecutive_lapses, \
     is_suspended, created_at, updated_at, version";

const REVIEW_COLUMNS: &str = "id, user_id, word_id, grade, state_before, state_after, \
     interval_before, interval_after, ease_factor_after, reviewed_at";

const LEDGER_COLUMNS: &str = "id, user_id, amount, gold, source_ref, created_at";

const PROFILE_COLUMNS: &str = "user_id, total_xp, total_gold, current_level, daily_streak, \
     longest_streak, last_activity_date, daily_xp, daily_xp_date, daily_xp_goal, updated_at, version";

/// Store for cards, reviews, the ledger and profiles in one SQLite database
pub struct SqliteStore {
    conn: Mutex<Connection>,
    timeout: Duration,
}

impl SqliteStore {
    /// Open (or create) a database file
    pub fn open(path: &Path, timeout: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        log::info!("Opened SRS database at {:?}", path);
        Self::init(conn, timeout)
    }

    /// Private database that lives as long as the store
    pub fn open_in_memory(timeout: Duration) -> Result<Self> {
        Self::init(Connection::open_in_memory()?, timeout)
    }

    fn init(conn: Connection, timeout: Duration) -> Result<Self> {
        conn.busy_timeout(timeout)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            timeout,
        })
    }

    /// Acquire the connection, giving up after the configured timeout
    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        let deadline = Instant::now() + self.timeout;
        loop {
            match self.conn.try_lock() {
                Ok(guard) => return Ok(guard),
                Err(TryLockError::Poisoned(_)) => {
                    return Err(SrsError::StorageUnavailable(
                        "connection lock poisoned".to_string(),
                    ))
                }
                Err(TryLockError::WouldBlock) => {
                    if Instant::now() >= deadline {
                        return Err(SrsError::StorageUnavailable(format!(
                            "timed out after {:?} waiting for the database",
                            self.timeout
                        )));
                    }
                    std::thread::sleep(Duration::from_millis(1));
                }
            }
        }
    }
}

// ==================== Column Conversions ====================

fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_ts(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| SrsError::Corrupt(format!("bad timestamp '{}': {}", value, e)))
}

fn parse_opt_ts(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.as_deref().map(parse_ts).transpose()
}

fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| SrsError::Corrupt(format!("bad uuid '{}': {}", value, e)))
}

fn parse_opt_date(value: Option<String>) -> Result<Option<NaiveDate>> {
    value
        .map(|s| {
            NaiveDate::parse_from_str(&s, "%Y-%m-%d")
                .map_err(|e| SrsError::Corrupt(format!("bad date '{}': {}", s, e)))
        })
        .transpose()
}

fn parse_grade(value: &str) -> Result<Grade> {
    value
        .parse()
        .map_err(|_| SrsError::Corrupt(format!("unknown grade '{}'", value)))
}

fn to_version(value: i64) -> u64 {
    value.max(0) as u64
}

/// Raw card columns, converted into a `Card` outside the rusqlite closure
struct CardRow {
    user_id: String,
    word_id: String,
    card_state: String,
    ease_factor: f64,
    interval: u32,
    learning_step: Option<u32>,
    next_review_date: Option<String>,
    last_review_date: Option<String>,
    reviews_count: u32,
    lapses: u32,
    consecutive_lapses: u32,
    is_suspended: bool,
    created_at: String,
    updated_at: String,
    version: i64,
}

impl CardRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            user_id: row.get(0)?,
            word_id: row.get(1)?,
            card_state: row.get(2)?,
            ease_factor: row.get(3)?,
            interval: row.get(4)?,
            learning_step: row.get(5)?,
            next_review_date: row.get(6)?,
            last_review_date: row.get(7)?,
            reviews_count: row.get(8)?,
            lapses: row.get(9)?,
            consecutive_lapses: row.get(10)?,
            is_suspended: row.get(11)?,
            created_at: row.get(12)?,
            updated_at: row.get(13)?,
            version: row.get(14)?,
        })
    }

    fn into_card(self) -> Result<Card> {
        Ok(Card {
            user_id: parse_uuid(&self.user_id)?,
            word_id: parse_uuid(&self.word_id)?,
            card_state: CardState::parse(&self.card_state)?,
            ease_factor: self.ease_factor,
            interval: self.interval,
            learning_step: self.learning_step,
            next_review_date: parse_opt_ts(self.next_review_date)?,
            last_review_date: parse_opt_ts(self.last_review_date)?,
            reviews_count: self.reviews_count,
            lapses: self.lapses,
            consecutive_lapses: self.consecutive_lapses,
            is_suspended: self.is_suspended,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
            version: to_version(self.version),
        })
    }
}

struct ReviewRow {
    id: String,
    user_id: String,
    word_id: String,
    grade: String,
    state_before: String,
    state_after: String,
    interval_before: u32,
    interval_after: u32,
    ease_factor_after: f64,
    reviewed_at: String,
}

impl ReviewRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            word_id: row.get(2)?,
            grade: row.get(3)?,
            state_before: row.get(4)?,
            state_after: row.get(5)?,
            interval_before: row.get(6)?,
            interval_after: row.get(7)?,
            ease_factor_after: row.get(8)?,
            reviewed_at: row.get(9)?,
        })
    }

    fn into_review(self) -> Result<ReviewRecord> {
        Ok(ReviewRecord {
            id: parse_uuid(&self.id)?,
            user_id: parse_uuid(&self.user_id)?,
            word_id: parse_uuid(&self.word_id)?,
            grade: parse_grade(&self.grade)?,
            state_before: CardState::parse(&self.state_before)?,
            state_after: CardState::parse(&self.state_after)?,
            interval_before: self.interval_before,
            interval_after: self.interval_after,
            ease_factor_after: self.ease_factor_after,
            reviewed_at: parse_ts(&self.reviewed_at)?,
        })
    }
}

struct LedgerRow {
    id: String,
    user_id: String,
    amount: i64,
    gold: i64,
    source_ref: String,
    created_at: String,
}

impl LedgerRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            amount: row.get(2)?,
            gold: row.get(3)?,
            source_ref: row.get(4)?,
            created_at: row.get(5)?,
        })
    }

    fn into_entry(self) -> Result<LedgerEntry> {
        Ok(LedgerEntry {
            id: parse_uuid(&self.id)?,
            user_id: parse_uuid(&self.user_id)?,
            amount: self.amount,
            gold: self.gold,
            source_ref: self.source_ref,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

struct ProfileRow {
    user_id: String,
    total_xp: i64,
    total_gold: i64,
    current_level: u32,
    daily_streak: u32,
    longest_streak: u32,
    last_activity_date: Option<String>,
    daily_xp: i64,
    daily_xp_date: Option<String>,
    daily_xp_goal: i64,
    updated_at: String,
    version: i64,
}

impl ProfileRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            user_id: row.get(0)?,
            total_xp: row.get(1)?,
            total_gold: row.get(2)?,
            current_level: row.get(3)?,
            daily_streak: row.get(4)?,
            longest_streak: row.get(5)?,
            last_activity_date: row.get(6)?,
            daily_xp: row.get(7)?,
            daily_xp_date: row.get(8)?,
            daily_xp_goal: row.get(9)?,
            updated_at: row.get(10)?,
            version: row.get(11)?,
        })
    }

    fn into_profile(self) -> Result<UserProfile> {
        Ok(UserProfile {
            user_id: parse_uuid(&self.user_id)?,
            total_xp: self.total_xp,
            total_gold: self.total_gold,
            current_level: self.current_level,
            daily_streak: self.daily_streak,
            longest_streak: self.longest_streak,
            last_activity_date: parse_opt_date(self.last_activity_date)?,
            daily_xp: self.daily_xp,
            daily_xp_date: parse_opt_date(self.daily_xp_date)?,
            daily_xp_goal: self.daily_xp_goal,
            updated_at: parse_ts(&self.updated_at)?,
            version: to_version(self.version),
        })
    }
}

// ==================== Row Helpers ====================

fn select_card(conn: &Connection, user_id: Uuid, word_id: Uuid) -> Result<Option<Card>> {
    let sql = format!(
        "SELECT {} FROM cards WHERE user_id = ?1 AND word_id = ?2",
        CARD_COLUMNS
    );
    conn.query_row(
        &sql,
        params![user_id.to_string(), word_id.to_string()],
        CardRow::from_row,
    )
    .optional()?
    .map(CardRow::into_card)
    .transpose()
}

fn query_cards(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Card>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, CardRow::from_row)?;
    let mut cards = Vec::new();
    for row in rows {
        cards.push(row?.into_card()?);
    }
    Ok(cards)
}

fn query_reviews(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<ReviewRecord>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, ReviewRow::from_row)?;
    let mut reviews = Vec::new();
    for row in rows {
        reviews.push(row?.into_review()?);
    }
    Ok(reviews)
}

/// Compare-and-swap write of a card; the caller owns the transaction
fn write_card(conn: &Connection, card: &Card) -> Result<Card> {
    let stored: Option<i64> = conn
        .query_row(
            "SELECT version FROM cards WHERE user_id = ?1 AND word_id = ?2",
            params![card.user_id.to_string(), card.word_id.to_string()],
            |row| row.get(0),
        )
        .optional()?;

    let new_version = match stored {
        None if card.version == 0 => 1,
        None => {
            return Err(SrsError::Conflict(format!(
                "card for word {} no longer exists",
                card.word_id
            )))
        }
        Some(v) if to_version(v) == card.version => card.version + 1,
        Some(v) => {
            return Err(SrsError::Conflict(format!(
                "card for word {} changed concurrently (expected version {}, found {})",
                card.word_id, card.version, v
            )))
        }
    };

    conn.execute(
        "INSERT INTO cards (user_id, word_id, card_state, ease_factor, interval, learning_step,
             next_review_date, last_review_date, reviews_count, lapses, consecutive_lapses,
             is_suspended, created_at, updated_at, version)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
         ON CONFLICT (user_id, word_id) DO UPDATE SET
             card_state = excluded.card_state,
             ease_factor = excluded.ease_factor,
             interval = excluded.interval,
             learning_step = excluded.learning_step,
             next_review_date = excluded.next_review_date,
             last_review_date = excluded.last_review_date,
             reviews_count = excluded.reviews_count,
             lapses = excluded.lapses,
             consecutive_lapses = excluded.consecutive_lapses,
             is_suspended = excluded.is_suspended,
             updated_at = excluded.updated_at,
             version = excluded.version",
        params![
            card.user_id.to_string(),
            card.word_id.to_string(),
            card.card_state.as_str(),
            card.ease_factor,
            card.interval,
            card.learning_step,
            card.next_review_date.as_ref().map(fmt_ts),
            card.last_review_date.as_ref().map(fmt_ts),
            card.reviews_count,
            card.lapses,
            card.consecutive_lapses,
            card.is_suspended,
            fmt_ts(&card.created_at),
            fmt_ts(&card.updated_at),
            new_version as i64,
        ],
    )?;

    let mut stored = card.clone();
    stored.version = new_version;
    Ok(stored)
}

fn insert_review(conn: &Connection, review: &ReviewRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO reviews (id, user_id, word_id, grade, state_before, state_after,
             interval_before, interval_after, ease_factor_after, reviewed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            review.id.to_string(),
            review.user_id.to_string(),
            review.word_id.to_string(),
            review.grade.as_str(),
            review.state_before.as_str(),
            review.state_after.as_str(),
            review.interval_before,
            review.interval_after,
            review.ease_factor_after,
            fmt_ts(&review.reviewed_at),
        ],
    )?;
    Ok(())
}

fn review_exists(conn: &Connection, id: Uuid) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM reviews WHERE id = ?1",
            params![id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn set_suspended(
    conn: &Connection,
    user_id: Uuid,
    word_id: Uuid,
    suspended: bool,
    now: DateTime<Utc>,
) -> Result<Card> {
    let changed = conn.execute(
        "UPDATE cards SET is_suspended = ?3, updated_at = ?4, version = version + 1
         WHERE user_id = ?1 AND word_id = ?2",
        params![
            user_id.to_string(),
            word_id.to_string(),
            suspended,
            fmt_ts(&now),
        ],
    )?;
    if changed == 0 {
        return Err(SrsError::NotFound(format!("card for word {}", word_id)));
    }
    select_card(conn, user_id, word_id)?
        .ok_or_else(|| SrsError::NotFound(format!("card for word {}", word_id)))
}

fn select_ledger_entry(conn: &Connection, source_ref: &str) -> Result<Option<LedgerEntry>> {
    let sql = format!(
        "SELECT {} FROM ledger_entries WHERE source_ref = ?1",
        LEDGER_COLUMNS
    );
    conn.query_row(&sql, params![source_ref], LedgerRow::from_row)
        .optional()?
        .map(LedgerRow::into_entry)
        .transpose()
}

fn insert_ledger_entry(conn: &Connection, entry: &LedgerEntry) -> Result<()> {
    if select_ledger_entry(conn, &entry.source_ref)?.is_some() {
        return Err(SrsError::Conflict(format!(
            "reward source {} already recorded",
            entry.source_ref
        )));
    }
    conn.execute(
        "INSERT INTO ledger_entries (id, user_id, amount, gold, source_ref, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            entry.id.to_string(),
            entry.user_id.to_string(),
            entry.amount,
            entry.gold,
            entry.source_ref,
            fmt_ts(&entry.created_at),
        ],
    )?;
    Ok(())
}

fn select_profile(conn: &Connection, user_id: Uuid) -> Result<Option<UserProfile>> {
    let sql = format!(
        "SELECT {} FROM user_profiles WHERE user_id = ?1",
        PROFILE_COLUMNS
    );
    conn.query_row(&sql, params![user_id.to_string()], ProfileRow::from_row)
        .optional()?
        .map(ProfileRow::into_profile)
        .transpose()
}

fn ledger_totals(conn: &Connection, user_id: Uuid) -> Result<LedgerTotals> {
    let (xp, gold, entries): (i64, i64, i64) = conn.query_row(
        "SELECT COALESCE(SUM(amount), 0), COALESCE(SUM(gold), 0), COUNT(*)
         FROM ledger_entries WHERE user_id = ?1",
        params![user_id.to_string()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )?;
    Ok(LedgerTotals {
        xp,
        gold,
        entries: entries.max(0) as usize,
    })
}

/// Compare-and-swap write of a profile; the caller owns the transaction
fn write_profile(conn: &Connection, profile: &UserProfile) -> Result<UserProfile> {
    let stored: Option<i64> = conn
        .query_row(
            "SELECT version FROM user_profiles WHERE user_id = ?1",
            params![profile.user_id.to_string()],
            |row| row.get(0),
        )
        .optional()?;

    let new_version = match stored {
        None if profile.version == 0 => 1,
        Some(v) if to_version(v) == profile.version => profile.version + 1,
        found => {
            return Err(SrsError::Conflict(format!(
                "profile of user {} changed concurrently (expected version {}, found {:?})",
                profile.user_id, profile.version, found
            )))
        }
    };

    conn.execute(
        "INSERT INTO user_profiles (user_id, total_xp, total_gold, current_level, daily_streak,
             longest_streak, last_activity_date, daily_xp, daily_xp_date, daily_xp_goal,
             updated_at, version)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
         ON CONFLICT (user_id) DO UPDATE SET
             total_xp = excluded.total_xp,
             total_gold = excluded.total_gold,
             current_level = excluded.current_level,
             daily_streak = excluded.daily_streak,
             longest_streak = excluded.longest_streak,
             last_activity_date = excluded.last_activity_date,
             daily_xp = excluded.daily_xp,
             daily_xp_date = excluded.daily_xp_date,
             daily_xp_goal = excluded.daily_xp_goal,
             updated_at = excluded.updated_at,
             version = excluded.version",
        params![
            profile.user_id.to_string(),
            profile.total_xp,
            profile.total_gold,
            profile.current_level,
            profile.daily_streak,
            profile.longest_streak,
            profile.last_activity_date.map(|d| d.to_string()),
            profile.daily_xp,
            profile.daily_xp_date.map(|d| d.to_string()),
            profile.daily_xp_goal,
            fmt_ts(&profile.updated_at),
            new_version as i64,
        ],
    )?;

    let mut stored = profile.clone();
    stored.version = new_version;
    Ok(stored)
}

// ==================== Card Store ====================

impl CardStore for SqliteStore {
    fn get_card(&self, user_id: Uuid, word_id: Uuid) -> Result<Option<Card>> {
        let conn = self.lock()?;
        select_card(&conn, user_id, word_id)
    }

    fn upsert_card(&self, card: &Card) -> Result<Card> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let stored = write_card(&tx, card)?;
        tx.commit()?;
        Ok(stored)
    }

    fn commit_review(&self, card: &Card, review: &ReviewRecord) -> Result<Card> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let stored = write_card(&tx, card)?;
        insert_review(&tx, review)?;
        tx.commit()?;
        Ok(stored)
    }

    fn query_due_cards(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<Vec<Card>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM cards
             WHERE user_id = ?1 AND is_suspended = 0 AND card_state != 'new'
               AND next_review_date IS NOT NULL AND next_review_date <= ?2
             ORDER BY next_review_date ASC, word_id ASC",
            CARD_COLUMNS
        );
        query_cards(&conn, &sql, params![user_id.to_string(), fmt_ts(&now)])
    }

    fn query_new_cards(&self, user_id: Uuid, limit: usize) -> Result<Vec<Card>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM cards
             WHERE user_id = ?1 AND is_suspended = 0 AND card_state = 'new'
             ORDER BY created_at ASC, word_id ASC
             LIMIT ?2",
            CARD_COLUMNS
        );
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        query_cards(&conn, &sql, params![user_id.to_string(), limit])
    }

    fn list_cards(&self, user_id: Uuid) -> Result<Vec<Card>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM cards WHERE user_id = ?1 ORDER BY created_at ASC, word_id ASC",
            CARD_COLUMNS
        );
        query_cards(&conn, &sql, params![user_id.to_string()])
    }

    fn suspend_card(&self, user_id: Uuid, word_id: Uuid, now: DateTime<Utc>) -> Result<Card> {
        let conn = self.lock()?;
        set_suspended(&conn, user_id, word_id, true, now)
    }

    fn unsuspend_card(&self, user_id: Uuid, word_id: Uuid, now: DateTime<Utc>) -> Result<Card> {
        let conn = self.lock()?;
        set_suspended(&conn, user_id, word_id, false, now)
    }

    fn delete_card(&self, user_id: Uuid, word_id: Uuid) -> Result<()> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM cards WHERE user_id = ?1 AND word_id = ?2",
            params![user_id.to_string(), word_id.to_string()],
        )?;
        if deleted == 0 {
            return Err(SrsError::NotFound(format!("card for word {}", word_id)));
        }
        Ok(())
    }

    fn append_review(&self, review: &ReviewRecord) -> Result<()> {
        let conn = self.lock()?;
        insert_review(&conn, review)
    }

    fn list_reviews(&self, user_id: Uuid) -> Result<Vec<ReviewRecord>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM reviews WHERE user_id = ?1 ORDER BY reviewed_at ASC",
            REVIEW_COLUMNS
        );
        query_reviews(&conn, &sql, params![user_id.to_string()])
    }

    fn list_reviews_since(&self, user_id: Uuid, since: DateTime<Utc>) -> Result<Vec<ReviewRecord>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM reviews WHERE user_id = ?1 AND reviewed_at >= ?2
             ORDER BY reviewed_at ASC",
            REVIEW_COLUMNS
        );
        query_reviews(&conn, &sql, params![user_id.to_string(), fmt_ts(&since)])
    }

    fn count_new_introduced_since(&self, user_id: Uuid, since: DateTime<Utc>) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM reviews
             WHERE user_id = ?1 AND state_before = 'new' AND reviewed_at >= ?2",
            params![user_id.to_string(), fmt_ts(&since)],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as usize)
    }
}

// ==================== Ledger Store ====================

impl LedgerStore for SqliteStore {
    fn append_ledger_entry(&self, entry: &LedgerEntry) -> Result<LedgerEntry> {
        let conn = self.lock()?;
        insert_ledger_entry(&conn, entry)?;
        Ok(entry.clone())
    }

    fn find_ledger_entry(&self, source_ref: &str) -> Result<Option<LedgerEntry>> {
        let conn = self.lock()?;
        select_ledger_entry(&conn, source_ref)
    }

    fn list_ledger_entries(&self, user_id: Uuid) -> Result<Vec<LedgerEntry>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM ledger_entries WHERE user_id = ?1 ORDER BY created_at ASC",
            LEDGER_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![user_id.to_string()], LedgerRow::from_row)?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?.into_entry()?);
        }
        Ok(entries)
    }

    fn sum_ledger(&self, user_id: Uuid) -> Result<LedgerTotals> {
        let conn = self.lock()?;
        ledger_totals(&conn, user_id)
    }

    fn get_user_profile(&self, user_id: Uuid) -> Result<Option<UserProfile>> {
        let conn = self.lock()?;
        select_profile(&conn, user_id)
    }

    fn update_user_profile(&self, profile: &UserProfile) -> Result<UserProfile> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let stored = write_profile(&tx, profile)?;
        tx.commit()?;
        Ok(stored)
    }

    fn record_reward(&self, entry: &LedgerEntry, profile: &UserProfile) -> Result<RecordOutcome> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if let Some(existing) = select_ledger_entry(&tx, &entry.source_ref)? {
            return Ok(RecordOutcome::Duplicate(existing));
        }

        insert_ledger_entry(&tx, entry)?;
        let stored = write_profile(&tx, profile)?;
        tx.commit()?;
        Ok(RecordOutcome::Recorded(stored))
    }
}

// ==================== Backup Store ====================

impl BackupStore for SqliteStore {
    fn restore_user(
        &self,
        export: &UserExport,
        base_profile: &UserProfile,
        now: DateTime<Utc>,
    ) -> Result<ImportSummary> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut summary = ImportSummary::default();

        for card in &export.cards {
            if select_card(&tx, card.user_id, card.word_id)?.is_some() {
                summary.cards_skipped += 1;
                continue;
            }
            write_card(
                &tx,
                &Card {
                    version: 0,
                    ..card.clone()
                },
            )?;
            summary.cards_imported += 1;
        }

        for review in &export.reviews {
            if review_exists(&tx, review.id)? {
                summary.reviews_skipped += 1;
                continue;
            }
            if select_card(&tx, review.user_id, review.word_id)?.is_none() {
                return Err(SrsError::InvalidArgument(format!(
                    "review {} belongs to word {}, which has no card",
                    review.id, review.word_id
                )));
            }
            insert_review(&tx, review)?;
            summary.reviews_imported += 1;
        }

        for entry in &export.ledger {
            if select_ledger_entry(&tx, &entry.source_ref)?.is_some() {
                summary.ledger_skipped += 1;
                continue;
            }
            insert_ledger_entry(&tx, entry)?;
            summary.ledger_imported += 1;
        }

        // The profile always ends up matching the ledger it sits on
        let existing = select_profile(&tx, export.user_id)?;
        if existing.is_some() || export.profile.is_some() || summary.ledger_imported > 0 {
            let totals = ledger_totals(&tx, export.user_id)?;
            let mut profile = existing.clone().unwrap_or_else(|| UserProfile {
                version: 0,
                ..base_profile.clone()
            });
            let drifted = profile.total_xp != totals.xp || profile.total_gold != totals.gold;
            if drifted {
                profile.total_xp = totals.xp;
                profile.total_gold = totals.gold;
                profile.current_level = level_for_xp(totals.xp);
                profile.updated_at = now;
            }
            if drifted || existing.is_none() {
                write_profile(&tx, &profile)?;
            }
            summary.profile_imported = existing.is_none() && export.profile.is_some();
        }

        tx.commit()?;
        Ok(summary)
    }
}
