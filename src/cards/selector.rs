//! Review session selection
//!
//! A session is the ordered list of cards shown in one practice run. Due
//! cards come first (oldest due date first), then new cards fill the
//! remaining slots within the daily new-card budget.

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::models::{Card, CardState};
use crate::calendar::start_of_day;
use crate::config::SessionConfig;
use crate::error::{Result, SrsError};
use crate::storage::CardStore;

/// Whether a session has anything to show
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Ready,
    /// Nothing due and no new cards left. Distinct from an empty dictionary,
    /// which callers check before building a session.
    NoCardsDue,
}

/// Cards selected for one practice run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub cards: Vec<Card>,
    pub due_count: usize,
    pub new_count: usize,
    pub status: SessionStatus,
}

impl Session {
    fn from_parts(due: Vec<Card>, new: Vec<Card>) -> Self {
        let due_count = due.len();
        let new_count = new.len();
        let mut cards = due;
        cards.extend(new);
        Self::new(cards, due_count, new_count)
    }

    fn new(cards: Vec<Card>, due_count: usize, new_count: usize) -> Self {
        let status = if cards.is_empty() {
            SessionStatus::NoCardsDue
        } else {
            SessionStatus::Ready
        };
        Self {
            cards,
            due_count,
            new_count,
            status,
        }
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    pub fn word_ids(&self) -> Vec<Uuid> {
        self.cards.iter().map(|c| c.word_id).collect()
    }
}

fn validate_count(requested_count: i32) -> Result<usize> {
    if requested_count <= 0 {
        return Err(SrsError::InvalidArgument(format!(
            "requested card count must be positive, got {}",
            requested_count
        )));
    }
    Ok(requested_count as usize)
}

/// New cards the user may still start today
fn new_card_budget(
    store: &dyn CardStore,
    user_id: Uuid,
    now: DateTime<Utc>,
    config: &SessionConfig,
    utc_offset_minutes: i32,
) -> Result<usize> {
    let introduced =
        store.count_new_introduced_since(user_id, start_of_day(now, utc_offset_minutes))?;
    Ok((config.new_cards_per_day as usize).saturating_sub(introduced))
}

/// Build the regular review session for `user_id`
pub fn select_session(
    store: &dyn CardStore,
    user_id: Uuid,
    requested_count: i32,
    now: DateTime<Utc>,
    config: &SessionConfig,
    utc_offset_minutes: i32,
) -> Result<Session> {
    let count = validate_count(requested_count)?;

    let mut due: Vec<Card> = store
        .query_due_cards(user_id, now)?
        .into_iter()
        .filter(|c| !c.is_suspended && c.is_due(now))
        .collect();
    due.sort_by(|a, b| {
        a.next_review_date
            .cmp(&b.next_review_date)
            .then_with(|| a.word_id.cmp(&b.word_id))
    });
    due.truncate(count);

    let budget = new_card_budget(store, user_id, now, config, utc_offset_minutes)?;
    let new_limit = (count - due.len()).min(budget);

    let new = if new_limit > 0 {
        let mut new: Vec<Card> = store
            .query_new_cards(user_id, new_limit)?
            .into_iter()
            .filter(|c| !c.is_suspended && c.card_state == CardState::New)
            .collect();
        new.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.word_id.cmp(&b.word_id))
        });
        new.truncate(new_limit);
        new
    } else {
        Vec::new()
    };

    log::debug!(
        "Session for user {}: {} due, {} new (budget {})",
        user_id,
        due.len(),
        new.len(),
        budget
    );

    Ok(Session::from_parts(due, new))
}

/// Build a "practice anyway" session that ignores due dates
///
/// Samples up to `requested_count` non-suspended cards at random. New cards
/// still count against the daily budget.
pub fn select_practice_session<R: Rng + ?Sized>(
    store: &dyn CardStore,
    user_id: Uuid,
    requested_count: i32,
    now: DateTime<Utc>,
    rng: &mut R,
    config: &SessionConfig,
    utc_offset_minutes: i32,
) -> Result<Session> {
    let count = validate_count(requested_count)?;

    let mut pool: Vec<Card> = store
        .list_cards(user_id)?
        .into_iter()
        .filter(|c| !c.is_suspended)
        .collect();
    pool.shuffle(rng);

    let mut new_budget = new_card_budget(store, user_id, now, config, utc_offset_minutes)?;
    let mut cards = Vec::with_capacity(count.min(pool.len()));
    let mut due_count = 0;
    let mut new_count = 0;

    for card in pool {
        if cards.len() == count {
            break;
        }
        if card.card_state == CardState::New {
            if new_budget == 0 {
                continue;
            }
            new_budget -= 1;
            new_count += 1;
        } else {
            due_count += 1;
        }
        cards.push(card);
    }

    log::debug!(
        "Practice session for user {}: {} cards ({} new)",
        user_id,
        cards.len(),
        new_count
    );

    Ok(Session::new(cards, due_count, new_count))
}
