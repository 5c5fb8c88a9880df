//! JSON export and import of one user's study data

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{BackupStore, CardStore, LedgerStore};
use crate::cards::{Card, ReviewRecord};
use crate::config::RewardConfig;
use crate::error::{Result, SrsError};
use crate::rewards::{LedgerEntry, UserProfile};

pub const EXPORT_FORMAT_VERSION: u32 = 1;

/// Everything stored for one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserExport {
    pub format_version: u32,
    pub exported_at: DateTime<Utc>,
    pub user_id: Uuid,
    pub cards: Vec<Card>,
    #[serde(default)]
    pub reviews: Vec<ReviewRecord>,
    #[serde(default)]
    pub ledger: Vec<LedgerEntry>,
    #[serde(default)]
    pub profile: Option<UserProfile>,
}

/// Counts of what an import wrote and what it left alone
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub cards_imported: usize,
    pub cards_skipped: usize,
    pub reviews_imported: usize,
    pub reviews_skipped: usize,
    pub ledger_imported: usize,
    pub ledger_skipped: usize,
    pub profile_imported: bool,
}

pub fn export_user(
    cards: &dyn CardStore,
    ledger: &dyn LedgerStore,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> Result<UserExport> {
    let export = UserExport {
        format_version: EXPORT_FORMAT_VERSION,
        exported_at: now,
        user_id,
        cards: cards.list_cards(user_id)?,
        reviews: cards.list_reviews(user_id)?,
        ledger: ledger.list_ledger_entries(user_id)?,
        profile: ledger.get_user_profile(user_id)?,
    };
    log::info!(
        "Exported user {}: {} cards, {} reviews, {} ledger entries",
        user_id,
        export.cards.len(),
        export.reviews.len(),
        export.ledger.len()
    );
    Ok(export)
}

/// Load an export into the store in one transaction
///
/// Existing cards, reviews, ledger entries and profiles win over the
/// imported copy. Imported rows start a fresh version history. Every row
/// must belong to the exported user.
pub fn import_user(
    store: &dyn BackupStore,
    export: &UserExport,
    now: DateTime<Utc>,
    config: &RewardConfig,
) -> Result<ImportSummary> {
    validate_export(export)?;

    let base_profile = match &export.profile {
        Some(profile) => UserProfile {
            version: 0,
            ..profile.clone()
        },
        None => UserProfile::new(export.user_id, config.daily_xp_goal, now),
    };

    let summary = store.restore_user(export, &base_profile, now)?;
    log::info!("Imported user {}: {:?}", export.user_id, summary);
    Ok(summary)
}

fn foreign_row(export: &UserExport, what: &str, owner: Uuid) -> SrsError {
    SrsError::InvalidArgument(format!(
        "export for user {} contains a {} of user {}",
        export.user_id, what, owner
    ))
}

fn validate_export(export: &UserExport) -> Result<()> {
    if export.format_version > EXPORT_FORMAT_VERSION {
        return Err(SrsError::InvalidArgument(format!(
            "unsupported export format version {}",
            export.format_version
        )));
    }
    if let Some(card) = export.cards.iter().find(|c| c.user_id != export.user_id) {
        return Err(foreign_row(export, "card", card.user_id));
    }
    if let Some(review) = export.reviews.iter().find(|r| r.user_id != export.user_id) {
        return Err(foreign_row(export, "review", review.user_id));
    }
    if let Some(entry) = export.ledger.iter().find(|e| e.user_id != export.user_id) {
        return Err(foreign_row(export, "ledger entry", entry.user_id));
    }
    if let Some(profile) = export.profile.as_ref().filter(|p| p.user_id != export.user_id) {
        return Err(foreign_row(export, "profile", profile.user_id));
    }
    if let Some(entry) = export.ledger.iter().find(|e| e.amount < 0 || e.gold < 0) {
        return Err(SrsError::InvalidArgument(format!(
            "ledger entry {} has a negative amount",
            entry.source_ref
        )));
    }
    Ok(())
}

pub fn write_export(path: &Path, export: &UserExport) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(export)?;
    fs::write(path, json)?;
    Ok(())
}

pub fn read_export(path: &Path) -> Result<UserExport> {
    let content = fs::read_to_string(path)?;
    let export = serde_json::from_str(&content)?;
    Ok(export)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cards::{schedule, Grade};
    use crate::config::SchedulerConfig;
    use crate::rewards::apply_reward;
    use crate::storage::SqliteStore;
    use std::time::Duration;
    use tempfile::TempDir;

    fn store() -> SqliteStore {
        SqliteStore::open_in_memory(Duration::from_secs(1)).unwrap()
    }

    fn seed(store: &SqliteStore, user: Uuid, now: DateTime<Utc>) {
        for _ in 0..3 {
            let card = store.upsert_card(&Card::new(user, Uuid::new_v4(), now)).unwrap();
            let graded = schedule(&card, Grade::Good, now, &SchedulerConfig::default()).unwrap();
            let review = ReviewRecord::between(&card, &graded, Grade::Good, now);
            store.commit_review(&graded, &review).unwrap();
            apply_reward(
                store,
                user,
                10,
                1,
                &format!("review:{}", review.id),
                now,
                &RewardConfig::default(),
            )
            .unwrap();
        }
    }

    fn seeded_export(user: Uuid, now: DateTime<Utc>) -> UserExport {
        let source = store();
        seed(&source, user, now);
        export_user(&source, &source, user, now).unwrap()
    }

    #[test]
    fn test_export_import_through_file() {
        let user = Uuid::new_v4();
        let now = Utc::now();
        let export = seeded_export(user, now);
        assert_eq!(export.cards.len(), 3);
        assert_eq!(export.reviews.len(), 3);
        assert_eq!(export.ledger.len(), 3);

        let temp = TempDir::new().unwrap();
        let path = temp.path().join("exports").join("user.json");
        write_export(&path, &export).unwrap();
        let loaded = read_export(&path).unwrap();
        assert_eq!(loaded, export);

        let target = store();
        let summary = import_user(&target, &loaded, now, &RewardConfig::default()).unwrap();
        assert_eq!(summary.cards_imported, 3);
        assert_eq!(summary.reviews_imported, 3);
        assert_eq!(summary.ledger_imported, 3);
        assert!(summary.profile_imported);

        let profile = target.get_user_profile(user).unwrap().unwrap();
        assert_eq!(profile.total_xp, 30);
        assert_eq!(profile.daily_streak, 1);
        assert_eq!(profile.version, 1);
        assert!(target.list_cards(user).unwrap().iter().all(|c| c.version == 1));
    }

    #[test]
    fn test_reimport_skips_existing() {
        let store = store();
        let user = Uuid::new_v4();
        let now = Utc::now();
        seed(&store, user, now);

        let export = export_user(&store, &store, user, now).unwrap();
        let summary = import_user(&store, &export, now, &RewardConfig::default()).unwrap();

        assert_eq!(summary.cards_imported, 0);
        assert_eq!(summary.cards_skipped, 3);
        assert_eq!(summary.reviews_imported, 0);
        assert_eq!(summary.reviews_skipped, 3);
        assert_eq!(summary.ledger_skipped, 3);
        assert!(!summary.profile_imported);
        assert_eq!(store.sum_ledger(user).unwrap().xp, 30);
        assert_eq!(store.get_user_profile(user).unwrap().unwrap().version, 3);
    }

    #[test]
    fn test_import_into_existing_profile_matches_ledger() {
        let user = Uuid::new_v4();
        let now = Utc::now();
        let config = RewardConfig::default();
        let export = seeded_export(user, now);

        let target = store();
        apply_reward(&target, user, 7, 0, "local:1", now, &config).unwrap();

        let summary = import_user(&target, &export, now, &config).unwrap();
        assert_eq!(summary.ledger_imported, 3);
        assert!(!summary.profile_imported);

        let totals = target.sum_ledger(user).unwrap();
        let profile = target.get_user_profile(user).unwrap().unwrap();
        assert_eq!(totals.xp, 37);
        assert_eq!(profile.total_xp, totals.xp);
        assert_eq!(profile.total_gold, totals.gold);
    }

    #[test]
    fn test_ledger_without_profile_creates_one() {
        let user = Uuid::new_v4();
        let now = Utc::now();
        let mut export = seeded_export(user, now);
        export.profile = None;

        let target = store();
        let summary = import_user(&target, &export, now, &RewardConfig::default()).unwrap();
        assert!(!summary.profile_imported);

        let profile = target.get_user_profile(user).unwrap().unwrap();
        assert_eq!(profile.total_xp, 30);
        assert_eq!(profile.daily_xp_goal, RewardConfig::default().daily_xp_goal);
    }

    #[test]
    fn test_rejects_rows_of_other_users() {
        let user = Uuid::new_v4();
        let victim = Uuid::new_v4();
        let now = Utc::now();
        let store = store();
        let config = RewardConfig::default();
        let base = export_user(&store, &store, user, now).unwrap();

        let mut with_entry = base.clone();
        with_entry
            .ledger
            .push(LedgerEntry::new(victim, 999, 0, "forged:1".to_string(), now));

        let mut with_profile = base.clone();
        with_profile.profile = Some(UserProfile::new(victim, 50, now));

        let mut with_review = seeded_export(user, now);
        with_review.reviews[0].user_id = victim;

        let mut with_card = base.clone();
        with_card.cards.push(Card::new(victim, Uuid::new_v4(), now));

        for export in [with_entry, with_profile, with_review, with_card] {
            assert!(matches!(
                import_user(&store, &export, now, &config),
                Err(SrsError::InvalidArgument(_))
            ));
        }

        assert_eq!(store.sum_ledger(victim).unwrap().xp, 0);
        assert!(store.get_user_profile(victim).unwrap().is_none());
        assert!(store.list_cards(user).unwrap().is_empty());
    }

    #[test]
    fn test_rejects_negative_ledger_amounts() {
        let user = Uuid::new_v4();
        let now = Utc::now();
        let store = store();
        let mut export = export_user(&store, &store, user, now).unwrap();
        export
            .ledger
            .push(LedgerEntry::new(user, -50, 0, "refund:1".to_string(), now));

        assert!(matches!(
            import_user(&store, &export, now, &RewardConfig::default()),
            Err(SrsError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_orphan_review_rolls_back_everything() {
        let user = Uuid::new_v4();
        let now = Utc::now();
        let mut export = seeded_export(user, now);
        export.reviews[2].word_id = Uuid::new_v4();

        let target = store();
        let err = import_user(&target, &export, now, &RewardConfig::default()).unwrap_err();
        assert!(matches!(err, SrsError::InvalidArgument(_)));

        assert!(target.list_cards(user).unwrap().is_empty());
        assert!(target.list_reviews(user).unwrap().is_empty());
        assert!(target.list_ledger_entries(user).unwrap().is_empty());
        assert!(target.get_user_profile(user).unwrap().is_none());
    }

    #[test]
    fn test_rejects_newer_format() {
        let store = store();
        let mut export = export_user(&store, &store, Uuid::new_v4(), Utc::now()).unwrap();
        export.format_version = EXPORT_FORMAT_VERSION + 1;
        assert!(import_user(&store, &export, Utc::now(), &RewardConfig::default()).is_err());
    }
}
