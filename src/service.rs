//! Entry point tying the scheduler, selector and ledger to their stores

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::calendar::start_of_day;
use crate::cards::algorithm::format_interval_minutes;
use crate::cards::{
    preview_intervals, schedule, select_practice_session, select_session, Card, CardState, Grade,
    ReviewRecord, ReviewStats, Session,
};
use crate::config::SrsConfig;
use crate::error::{Result, SrsError};
use crate::rewards::ledger::{self, review_reward};
use crate::rewards::{ProfileSnapshot, ReconcileReport};
use crate::storage::backup::{self, ImportSummary, UserExport};
use crate::storage::{BackupStore, CardStore, LedgerStore, SqliteStore};

/// Attempts at crediting a review before leaving the reward pending
const REWARD_ATTEMPTS: usize = 3;

/// Delay each rating button would produce
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntervalPreview {
    pub grade: Grade,
    pub minutes: i64,
    pub label: String,
}

/// Result of grading a card and crediting the review
///
/// The grade is always committed when this is returned. `snapshot` is
/// `None` when the reward could not be written; pass `reward_source` to
/// `SrsService::apply_reward` later to credit it without grading again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewOutcome {
    pub card: Card,
    pub review: ReviewRecord,
    pub reward_source: String,
    pub snapshot: Option<ProfileSnapshot>,
}

pub struct SrsService {
    config: SrsConfig,
    cards: Arc<dyn CardStore>,
    ledger: Arc<dyn LedgerStore>,
    backup: Arc<dyn BackupStore>,
}

impl SrsService {
    /// Open the configured database, or an in-memory one when no path is set
    pub fn open(config: SrsConfig) -> Result<Self> {
        config.validate()?;
        let timeout = config.storage.busy_timeout();
        let store = match &config.storage.database_path {
            Some(path) => SqliteStore::open(path, timeout)?,
            None => {
                log::warn!("No database path configured, using an in-memory store");
                SqliteStore::open_in_memory(timeout)?
            }
        };
        let store = Arc::new(store);
        Ok(Self {
            config,
            cards: store.clone(),
            ledger: store.clone(),
            backup: store,
        })
    }

    pub fn with_stores(
        config: SrsConfig,
        cards: Arc<dyn CardStore>,
        ledger: Arc<dyn LedgerStore>,
        backup: Arc<dyn BackupStore>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            cards,
            ledger,
            backup,
        })
    }

    pub fn config(&self) -> &SrsConfig {
        &self.config
    }

    // ==================== Cards ====================

    /// Add a word to the user's dictionary; already-added words are returned
    /// as they are
    pub fn add_word(&self, user_id: Uuid, word_id: Uuid, now: DateTime<Utc>) -> Result<Card> {
        if let Some(existing) = self.cards.get_card(user_id, word_id)? {
            return Ok(existing);
        }
        match self.cards.upsert_card(&Card::new(user_id, word_id, now)) {
            Ok(card) => {
                log::debug!("Added word {} for user {}", word_id, user_id);
                Ok(card)
            }
            // Lost the insert race; the other writer's card stands
            Err(SrsError::Conflict(_)) => self.get_card(user_id, word_id),
            Err(e) => Err(e),
        }
    }

    pub fn get_card(&self, user_id: Uuid, word_id: Uuid) -> Result<Card> {
        self.cards
            .get_card(user_id, word_id)?
            .ok_or_else(|| SrsError::NotFound(format!("card for word {}", word_id)))
    }

    pub fn list_cards(&self, user_id: Uuid) -> Result<Vec<Card>> {
        self.cards.list_cards(user_id)
    }

    /// Grade a card and persist the result with its review record
    ///
    /// A concurrent update of the same card fails with `Conflict`; the
    /// caller decides whether to reload and grade again.
    pub fn grade_card(
        &self,
        user_id: Uuid,
        word_id: Uuid,
        grade: Grade,
        now: DateTime<Utc>,
    ) -> Result<(Card, ReviewRecord)> {
        let card = self.cards.get_card(user_id, word_id)?.ok_or_else(|| {
            SrsError::InvalidState(format!(
                "word {} is not in the dictionary of user {}",
                word_id, user_id
            ))
        })?;

        let next = schedule(&card, grade, now, &self.config.scheduler)?;
        let review = ReviewRecord::between(&card, &next, grade, now);

        match self.cards.commit_review(&next, &review) {
            Ok(stored) => {
                log::debug!(
                    "Graded word {} for user {} as {}: {} -> {}, interval {} -> {}",
                    word_id,
                    user_id,
                    grade,
                    card.card_state,
                    stored.card_state,
                    card.interval,
                    stored.interval
                );
                Ok((stored, review))
            }
            Err(e @ SrsError::Conflict(_)) => {
                log::warn!(
                    "Grading word {} for user {} lost a concurrent update",
                    word_id,
                    user_id
                );
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Grade a card and credit the review's XP and gold
    ///
    /// Once the grade is committed this never fails: a retryable reward
    /// error is retried with the same source reference, which is
    /// idempotent, and anything left over is reported through
    /// `ReviewOutcome::snapshot`.
    pub fn review_card(
        &self,
        user_id: Uuid,
        word_id: Uuid,
        grade: Grade,
        now: DateTime<Utc>,
    ) -> Result<ReviewOutcome> {
        let (card, review) = self.grade_card(user_id, word_id, grade, now)?;
        let reward = review_reward(grade, &self.config.rewards);
        let reward_source = format!("review:{}", review.id);

        let mut attempt = 1;
        let snapshot = loop {
            match self.apply_reward(user_id, reward.xp, reward.gold, &reward_source, now) {
                Ok(snapshot) => break Some(snapshot),
                Err(e) if e.is_retryable() && attempt < REWARD_ATTEMPTS => {
                    log::debug!(
                        "Retrying reward {} after attempt {}: {}",
                        reward_source,
                        attempt,
                        e
                    );
                    attempt += 1;
                }
                Err(e) => {
                    log::warn!(
                        "Review of word {} for user {} is graded but reward {} is pending: {}",
                        word_id,
                        user_id,
                        reward_source,
                        e
                    );
                    break None;
                }
            }
        };

        Ok(ReviewOutcome {
            card,
            review,
            reward_source,
            snapshot,
        })
    }

    pub fn suspend_word(&self, user_id: Uuid, word_id: Uuid, now: DateTime<Utc>) -> Result<Card> {
        let card = self.cards.suspend_card(user_id, word_id, now)?;
        log::info!("Suspended word {} for user {}", word_id, user_id);
        Ok(card)
    }

    pub fn unsuspend_word(&self, user_id: Uuid, word_id: Uuid, now: DateTime<Utc>) -> Result<Card> {
        let card = self.cards.unsuspend_card(user_id, word_id, now)?;
        log::info!("Unsuspended word {} for user {}", word_id, user_id);
        Ok(card)
    }

    pub fn delete_word(&self, user_id: Uuid, word_id: Uuid) -> Result<()> {
        self.cards.delete_card(user_id, word_id)?;
        log::info!("Deleted word {} for user {}", word_id, user_id);
        Ok(())
    }

    pub fn preview(
        &self,
        user_id: Uuid,
        word_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<IntervalPreview>> {
        let card = self.get_card(user_id, word_id)?;
        let minutes = preview_intervals(&card, now, &self.config.scheduler)?;
        Ok(Grade::ALL
            .iter()
            .zip(minutes)
            .map(|(grade, minutes)| IntervalPreview {
                grade: *grade,
                minutes,
                label: format_interval_minutes(minutes),
            })
            .collect())
    }

    // ==================== Sessions ====================

    pub fn select_session(
        &self,
        user_id: Uuid,
        requested_count: i32,
        now: DateTime<Utc>,
    ) -> Result<Session> {
        select_session(
            self.cards.as_ref(),
            user_id,
            requested_count,
            now,
            &self.config.session,
            self.config.rewards.utc_offset_minutes,
        )
    }

    pub fn select_practice_session(
        &self,
        user_id: Uuid,
        requested_count: i32,
        now: DateTime<Utc>,
    ) -> Result<Session> {
        select_practice_session(
            self.cards.as_ref(),
            user_id,
            requested_count,
            now,
            &mut rand::thread_rng(),
            &self.config.session,
            self.config.rewards.utc_offset_minutes,
        )
    }

    pub fn review_stats(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<ReviewStats> {
        let mut stats = ReviewStats::default();
        for card in self.cards.list_cards(user_id)? {
            stats.total_cards += 1;
            if card.is_suspended {
                stats.suspended_cards += 1;
            }
            match card.card_state {
                CardState::New => stats.new_cards += 1,
                CardState::Learning => stats.learning_cards += 1,
                CardState::Review => stats.review_cards += 1,
                CardState::Relearning => stats.relearning_cards += 1,
            }
            if !card.is_suspended && card.card_state != CardState::New && card.is_due(now) {
                stats.due_cards += 1;
            }
        }

        let today = start_of_day(now, self.config.rewards.utc_offset_minutes);
        for review in self.cards.list_reviews_since(user_id, today)? {
            stats.reviews_today += 1;
            if review.grade.is_pass() {
                stats.correct_today += 1;
            }
        }
        Ok(stats)
    }

    // ==================== Rewards ====================

    pub fn apply_reward(
        &self,
        user_id: Uuid,
        xp: i64,
        gold: i64,
        source_ref: &str,
        now: DateTime<Utc>,
    ) -> Result<ProfileSnapshot> {
        ledger::apply_reward(
            self.ledger.as_ref(),
            user_id,
            xp,
            gold,
            source_ref,
            now,
            &self.config.rewards,
        )
    }

    pub fn profile_snapshot(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<ProfileSnapshot> {
        ledger::profile_snapshot(self.ledger.as_ref(), user_id, now, &self.config.rewards)
    }

    pub fn set_daily_goal(
        &self,
        user_id: Uuid,
        daily_xp_goal: i64,
        now: DateTime<Utc>,
    ) -> Result<ProfileSnapshot> {
        ledger::set_daily_goal(
            self.ledger.as_ref(),
            user_id,
            daily_xp_goal,
            now,
            &self.config.rewards,
        )
    }

    pub fn reconcile_profile(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<ReconcileReport> {
        ledger::reconcile_profile(self.ledger.as_ref(), user_id, now, &self.config.rewards)
    }

    // ==================== Backup ====================

    pub fn export_user(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<UserExport> {
        backup::export_user(self.cards.as_ref(), self.ledger.as_ref(), user_id, now)
    }

    pub fn import_user(&self, export: &UserExport, now: DateTime<Utc>) -> Result<ImportSummary> {
        backup::import_user(self.backup.as_ref(), export, now, &self.config.rewards)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rewards::{LedgerEntry, LedgerTotals, UserProfile};
    use crate::storage::RecordOutcome;
    use chrono::Duration;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Ledger whose next `failures` reward writes lose a profile race
    struct ContendedLedger {
        inner: Arc<SqliteStore>,
        failures: AtomicUsize,
    }

    impl LedgerStore for ContendedLedger {
        fn append_ledger_entry(&self, entry: &LedgerEntry) -> Result<LedgerEntry> {
            self.inner.append_ledger_entry(entry)
        }

        fn find_ledger_entry(&self, source_ref: &str) -> Result<Option<LedgerEntry>> {
            self.inner.find_ledger_entry(source_ref)
        }

        fn list_ledger_entries(&self, user_id: Uuid) -> Result<Vec<LedgerEntry>> {
            self.inner.list_ledger_entries(user_id)
        }

        fn sum_ledger(&self, user_id: Uuid) -> Result<LedgerTotals> {
            self.inner.sum_ledger(user_id)
        }

        fn get_user_profile(&self, user_id: Uuid) -> Result<Option<UserProfile>> {
            self.inner.get_user_profile(user_id)
        }

        fn update_user_profile(&self, profile: &UserProfile) -> Result<UserProfile> {
            self.inner.update_user_profile(profile)
        }

        fn record_reward(
            &self,
            entry: &LedgerEntry,
            profile: &UserProfile,
        ) -> Result<RecordOutcome> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(SrsError::Conflict(format!(
                    "profile of user {} changed concurrently",
                    profile.user_id
                )));
            }
            self.inner.record_reward(entry, profile)
        }
    }

    fn contended_service(failures: usize) -> (SrsService, Arc<SqliteStore>, Arc<ContendedLedger>) {
        let store = Arc::new(SqliteStore::open_in_memory(std::time::Duration::from_secs(1)).unwrap());
        let ledger = Arc::new(ContendedLedger {
            inner: Arc::clone(&store),
            failures: AtomicUsize::new(failures),
        });
        let service = SrsService::with_stores(
            SrsConfig::default(),
            store.clone(),
            ledger.clone(),
            store.clone(),
        )
        .unwrap();
        (service, store, ledger)
    }

    fn service() -> SrsService {
        SrsService::open(SrsConfig::default()).unwrap()
    }

    #[test]
    fn test_add_word_is_idempotent() {
        let service = service();
        let user = Uuid::new_v4();
        let word = Uuid::new_v4();
        let now = Utc::now();

        let first = service.add_word(user, word, now).unwrap();
        let second = service.add_word(user, word, now + Duration::hours(1)).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.card_state, CardState::New);
        assert_eq!(service.list_cards(user).unwrap().len(), 1);
    }

    #[test]
    fn test_missing_card_errors() {
        let service = service();
        let user = Uuid::new_v4();
        let word = Uuid::new_v4();
        let now = Utc::now();

        assert!(matches!(
            service.get_card(user, word),
            Err(SrsError::NotFound(_))
        ));
        assert!(matches!(
            service.grade_card(user, word, Grade::Good, now),
            Err(SrsError::InvalidState(_))
        ));
    }

    #[test]
    fn test_review_card_credits_once_per_review() {
        let service = service();
        let user = Uuid::new_v4();
        let word = Uuid::new_v4();
        let now = Utc::now();
        service.add_word(user, word, now).unwrap();

        let outcome = service.review_card(user, word, Grade::Good, now).unwrap();
        assert_eq!(outcome.card.card_state, CardState::Learning);
        assert_eq!(outcome.card.version, 2);
        let snapshot = outcome.snapshot.unwrap();
        assert_eq!(snapshot.profile.total_xp, 10);
        assert_eq!(snapshot.profile.daily_streak, 1);
        assert_eq!(outcome.reward_source, format!("review:{}", outcome.review.id));

        let again = service
            .apply_reward(user, 10, 1, &outcome.reward_source, now)
            .unwrap();
        assert_eq!(again.profile.total_xp, 10);
    }

    #[test]
    fn test_reward_retried_after_profile_conflict() {
        let (service, store, _ledger) = contended_service(REWARD_ATTEMPTS - 1);
        let user = Uuid::new_v4();
        let word = Uuid::new_v4();
        let now = Utc::now();
        service.add_word(user, word, now).unwrap();

        let outcome = service.review_card(user, word, Grade::Good, now).unwrap();

        assert_eq!(outcome.snapshot.unwrap().profile.total_xp, 10);
        assert_eq!(outcome.card.reviews_count, 1);
        assert_eq!(store.list_reviews(user).unwrap().len(), 1);
        assert_eq!(store.sum_ledger(user).unwrap().entries, 1);
    }

    #[test]
    fn test_pending_reward_keeps_grade_and_can_be_credited() {
        let (service, store, ledger) = contended_service(REWARD_ATTEMPTS + 5);
        let user = Uuid::new_v4();
        let word = Uuid::new_v4();
        let now = Utc::now();
        service.add_word(user, word, now).unwrap();

        let outcome = service.review_card(user, word, Grade::Good, now).unwrap();
        assert!(outcome.snapshot.is_none());
        assert_eq!(service.get_card(user, word).unwrap().reviews_count, 1);
        assert!(store.find_ledger_entry(&outcome.reward_source).unwrap().is_none());

        ledger.failures.store(0, Ordering::SeqCst);
        let snapshot = service
            .apply_reward(user, 10, 1, &outcome.reward_source, now)
            .unwrap();
        assert_eq!(snapshot.profile.total_xp, 10);

        // Crediting again is a no-op and the card was graded once
        service
            .apply_reward(user, 10, 1, &outcome.reward_source, now)
            .unwrap();
        assert_eq!(store.sum_ledger(user).unwrap().xp, 10);
        assert_eq!(store.list_reviews(user).unwrap().len(), 1);
    }

    #[test]
    fn test_walks_card_to_review() {
        let service = service();
        let user = Uuid::new_v4();
        let word = Uuid::new_v4();
        let mut now = Utc::now();
        service.add_word(user, word, now).unwrap();

        let mut card = service.get_card(user, word).unwrap();
        while card.card_state != CardState::Review {
            let (next, _) = service.grade_card(user, word, Grade::Good, now).unwrap();
            card = next;
            now = card.next_review_date.unwrap();
        }
        assert_eq!(card.interval, 1);

        let (lapsed, _) = service.grade_card(user, word, Grade::Fail, now).unwrap();
        assert_eq!(lapsed.card_state, CardState::Relearning);
        assert_eq!(lapsed.lapses, 1);
        assert_eq!(service.cards.list_reviews(user).unwrap().len() as u32, lapsed.reviews_count);
    }

    #[test]
    fn test_suspended_card_cannot_be_graded() {
        let service = service();
        let user = Uuid::new_v4();
        let word = Uuid::new_v4();
        let now = Utc::now();
        service.add_word(user, word, now).unwrap();
        service.suspend_word(user, word, now).unwrap();

        assert!(matches!(
            service.grade_card(user, word, Grade::Good, now),
            Err(SrsError::InvalidState(_))
        ));

        service.unsuspend_word(user, word, now).unwrap();
        assert!(service.grade_card(user, word, Grade::Good, now).is_ok());
    }

    #[test]
    fn test_preview_labels() {
        let service = service();
        let user = Uuid::new_v4();
        let word = Uuid::new_v4();
        let now = Utc::now();
        service.add_word(user, word, now).unwrap();

        let preview = service.preview(user, word, now).unwrap();
        assert_eq!(preview.len(), 4);
        assert!(preview.iter().all(|p| p.minutes == 1 && p.label == "1m"));
    }

    #[test]
    fn test_review_stats() {
        let service = service();
        let user = Uuid::new_v4();
        let now = Utc::now();
        let words: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        for word in &words {
            service.add_word(user, *word, now).unwrap();
        }
        service.review_card(user, words[0], Grade::Good, now).unwrap();
        service.review_card(user, words[1], Grade::Fail, now).unwrap();
        service.suspend_word(user, words[3], now).unwrap();

        let stats = service
            .review_stats(user, now + Duration::minutes(2))
            .unwrap();
        assert_eq!(stats.total_cards, 4);
        assert_eq!(stats.new_cards, 2);
        assert_eq!(stats.learning_cards, 2);
        assert_eq!(stats.suspended_cards, 1);
        assert_eq!(stats.due_cards, 2);
        assert_eq!(stats.reviews_today, 2);
        assert_eq!(stats.correct_today, 1);
    }

    #[test]
    fn test_sessions_use_config() {
        let mut config = SrsConfig::default();
        config.session.new_cards_per_day = 2;
        let service = SrsService::open(config).unwrap();
        let user = Uuid::new_v4();
        let now = Utc::now();
        for _ in 0..5 {
            service.add_word(user, Uuid::new_v4(), now).unwrap();
        }

        let session = service.select_session(user, 10, now).unwrap();
        assert_eq!(session.new_count, 2);
        let practice = service.select_practice_session(user, 10, now).unwrap();
        assert_eq!(practice.len(), 2);
    }

    #[test]
    fn test_persistent_service() {
        let temp = TempDir::new().unwrap();
        let mut config = SrsConfig::default();
        config.storage.database_path = Some(temp.path().join("srs.db"));
        let user = Uuid::new_v4();
        let word = Uuid::new_v4();
        let now = Utc::now();

        {
            let service = SrsService::open(config.clone()).unwrap();
            service.add_word(user, word, now).unwrap();
            service.review_card(user, word, Grade::Easy, now).unwrap();
        }

        let service = SrsService::open(config).unwrap();
        assert_eq!(service.get_card(user, word).unwrap().reviews_count, 1);
        let report = service.reconcile_profile(user, now).unwrap();
        assert!(!report.repaired);
        assert_eq!(report.ledger_xp, 12);
    }

    #[test]
    fn test_export_round_trip_between_services() {
        let source = service();
        let user = Uuid::new_v4();
        let word = Uuid::new_v4();
        let now = Utc::now();
        source.add_word(user, word, now).unwrap();
        source.review_card(user, word, Grade::Good, now).unwrap();

        let export = source.export_user(user, now).unwrap();
        let target = service();
        let summary = target.import_user(&export, now).unwrap();
        assert_eq!(summary.cards_imported, 1);
        assert_eq!(target.profile_snapshot(user, now).unwrap().profile.total_xp, 10);
    }
}
