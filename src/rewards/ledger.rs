//! XP ledger: levels, streaks, daily goal and reward application
//!
//! Level `L` is reached once total XP crosses `ceil(100 * L^1.5)`:
//! 0, 100, 283, 520, 800, 1119, ...

use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use super::models::*;
use crate::calendar::local_date;
use crate::cards::Grade;
use crate::config::RewardConfig;
use crate::error::{Result, SrsError};
use crate::storage::{LedgerStore, RecordOutcome};

/// Total XP needed to reach `level`
pub fn level_threshold(level: u32) -> i64 {
    let l = level as f64;
    (100.0 * l * l.sqrt()).ceil() as i64
}

/// Largest level whose threshold `total_xp` has reached
pub fn level_for_xp(total_xp: i64) -> u32 {
    if total_xp <= 0 {
        return 0;
    }

    // Start from the closed-form estimate, then correct for float error
    // (saturates at u32::MAX for absurd totals)
    let mut level = (total_xp as f64 / 100.0).powf(2.0 / 3.0).floor() as u32;
    while level > 0 && level_threshold(level) > total_xp {
        level -= 1;
    }
    while let Some(next) = level.checked_add(1) {
        if level_threshold(next) > total_xp {
            break;
        }
        level = next;
    }
    level
}

pub fn level_progress(total_xp: i64) -> LevelProgress {
    let level = level_for_xp(total_xp);
    let floor = level_threshold(level);
    LevelProgress {
        level,
        xp_in_current_level: total_xp - floor,
        xp_for_next_level: level_threshold(level.saturating_add(1)) - floor,
    }
}

/// Update the daily streak for activity on `today`
pub fn advance_streak(profile: &mut UserProfile, today: NaiveDate) {
    match profile.last_activity_date {
        None => profile.daily_streak = 1,
        Some(last) => {
            let gap = (today - last).num_days();
            if gap == 1 {
                profile.daily_streak += 1;
            } else if gap > 1 {
                profile.daily_streak = 1;
            } else if gap == 0 && profile.daily_streak == 0 {
                profile.daily_streak = 1;
            }
            // Negative gaps (clock skew) leave the streak alone
        }
    }

    if profile.last_activity_date.map_or(true, |last| today > last) {
        profile.last_activity_date = Some(today);
    }
    profile.longest_streak = profile.longest_streak.max(profile.daily_streak);
}

fn checked_total(current: i64, amount: i64, what: &str) -> Result<i64> {
    current.checked_add(amount).ok_or_else(|| {
        SrsError::InvalidArgument(format!(
            "adding {} to {} {} would overflow",
            amount, what, current
        ))
    })
}

/// Add a reward to a profile without touching storage
///
/// Fails with `InvalidArgument` when a total would overflow.
pub fn apply_to_profile(
    profile: &UserProfile,
    xp: i64,
    gold: i64,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> Result<UserProfile> {
    let mut next = profile.clone();

    next.total_xp = checked_total(next.total_xp, xp, "total xp")?;
    next.total_gold = checked_total(next.total_gold, gold, "total gold")?;
    next.current_level = level_for_xp(next.total_xp);

    if next.daily_xp_date == Some(today) {
        next.daily_xp = checked_total(next.daily_xp, xp, "daily xp")?;
    } else if next.daily_xp_date.map_or(true, |date| today > date) {
        next.daily_xp = xp;
        next.daily_xp_date = Some(today);
    }

    advance_streak(&mut next, today);
    next.updated_at = now;
    Ok(next)
}

pub fn snapshot(profile: UserProfile, today: NaiveDate) -> ProfileSnapshot {
    let level = level_progress(profile.total_xp);
    let xp_today = if profile.daily_xp_date == Some(today) {
        profile.daily_xp
    } else {
        0
    };
    let goal_met_today = xp_today >= profile.daily_xp_goal;
    ProfileSnapshot {
        profile,
        level,
        xp_today,
        goal_met_today,
    }
}

/// XP and gold earned by one graded review
pub fn review_reward(grade: Grade, config: &RewardConfig) -> Reward {
    let xp = match grade {
        Grade::Fail => config.xp_fail,
        Grade::Hard => config.xp_hard,
        Grade::Good => config.xp_good,
        Grade::Easy => config.xp_easy,
    };
    let gold = if grade.is_pass() { config.gold_per_pass } else { 0 };
    Reward { xp, gold }
}

fn load_profile(
    store: &dyn LedgerStore,
    user_id: Uuid,
    config: &RewardConfig,
    now: DateTime<Utc>,
) -> Result<UserProfile> {
    Ok(store
        .get_user_profile(user_id)?
        .unwrap_or_else(|| UserProfile::new(user_id, config.daily_xp_goal, now)))
}

/// Apply a reward event to a user's totals
///
/// Applying the same `source_ref` twice counts once; the second call returns
/// the current snapshot unchanged.
pub fn apply_reward(
    store: &dyn LedgerStore,
    user_id: Uuid,
    xp: i64,
    gold: i64,
    source_ref: &str,
    now: DateTime<Utc>,
    config: &RewardConfig,
) -> Result<ProfileSnapshot> {
    if xp < 0 || gold < 0 {
        return Err(SrsError::InvalidArgument(format!(
            "reward amounts must not be negative (xp {}, gold {})",
            xp, gold
        )));
    }
    if source_ref.trim().is_empty() {
        return Err(SrsError::InvalidArgument(
            "reward source reference must not be empty".to_string(),
        ));
    }

    let today = local_date(now, config.utc_offset_minutes);

    if let Some(existing) = store.find_ledger_entry(source_ref)? {
        warn_duplicate(&existing, user_id);
        return Ok(snapshot(load_profile(store, user_id, config, now)?, today));
    }

    let profile = load_profile(store, user_id, config, now)?;
    let updated = apply_to_profile(&profile, xp, gold, today, now)?;
    let entry = LedgerEntry::new(user_id, xp, gold, source_ref.to_string(), now);

    match store.record_reward(&entry, &updated)? {
        RecordOutcome::Recorded(stored) => {
            if stored.current_level > profile.current_level {
                log::info!("User {} reached level {}", user_id, stored.current_level);
            }
            log::info!(
                "Applied reward {} to user {}: +{} xp, +{} gold",
                source_ref,
                user_id,
                xp,
                gold
            );
            Ok(snapshot(stored, today))
        }
        RecordOutcome::Duplicate(existing) => {
            warn_duplicate(&existing, user_id);
            Ok(snapshot(load_profile(store, user_id, config, now)?, today))
        }
    }
}

fn warn_duplicate(existing: &LedgerEntry, user_id: Uuid) {
    if existing.user_id != user_id {
        log::warn!(
            "Reward source {} already belongs to user {}, ignoring for user {}",
            existing.source_ref,
            existing.user_id,
            user_id
        );
    } else {
        log::warn!(
            "Reward source {} already applied to user {}",
            existing.source_ref,
            user_id
        );
    }
}

/// Current snapshot, with an empty profile for users who never earned XP
pub fn profile_snapshot(
    store: &dyn LedgerStore,
    user_id: Uuid,
    now: DateTime<Utc>,
    config: &RewardConfig,
) -> Result<ProfileSnapshot> {
    let profile = load_profile(store, user_id, config, now)?;
    Ok(snapshot(profile, local_date(now, config.utc_offset_minutes)))
}

pub fn set_daily_goal(
    store: &dyn LedgerStore,
    user_id: Uuid,
    daily_xp_goal: i64,
    now: DateTime<Utc>,
    config: &RewardConfig,
) -> Result<ProfileSnapshot> {
    if daily_xp_goal < 0 {
        return Err(SrsError::InvalidArgument(format!(
            "daily goal must not be negative, got {}",
            daily_xp_goal
        )));
    }

    let mut profile = load_profile(store, user_id, config, now)?;
    profile.daily_xp_goal = daily_xp_goal;
    profile.updated_at = now;
    let stored = store.update_user_profile(&profile)?;
    Ok(snapshot(stored, local_date(now, config.utc_offset_minutes)))
}

/// Compare the profile totals against the ledger and repair drift
pub fn reconcile_profile(
    store: &dyn LedgerStore,
    user_id: Uuid,
    now: DateTime<Utc>,
    config: &RewardConfig,
) -> Result<ReconcileReport> {
    let totals = store.sum_ledger(user_id)?;
    let mut profile = load_profile(store, user_id, config, now)?;

    let mut report = ReconcileReport {
        user_id,
        ledger_xp: totals.xp,
        ledger_gold: totals.gold,
        profile_xp: profile.total_xp,
        profile_gold: profile.total_gold,
        repaired: false,
    };

    if totals.xp != profile.total_xp || totals.gold != profile.total_gold {
        log::warn!(
            "Profile of user {} drifted from ledger: xp {} vs {}, gold {} vs {}",
            user_id,
            profile.total_xp,
            totals.xp,
            profile.total_gold,
            totals.gold
        );
        profile.total_xp = totals.xp;
        profile.total_gold = totals.gold;
        profile.current_level = level_for_xp(totals.xp);
        profile.updated_at = now;
        store.update_user_profile(&profile)?;
        report.repaired = true;
    }

    Ok(report)
}
