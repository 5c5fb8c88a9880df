//! Data models for word cards and their review history

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, SrsError};

/// Position of a card in the spaced repetition lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CardState {
    /// Saved but never graded
    #[default]
    New,
    /// Walking the learning ladder
    Learning,
    /// Day-scale spaced review
    Review,
    /// Lapsed and walking the relearning ladder
    Relearning,
}

impl CardState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Learning => "learning",
            Self::Review => "review",
            Self::Relearning => "relearning",
        }
    }

    /// Parse the stored column value
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "new" => Ok(Self::New),
            "learning" => Ok(Self::Learning),
            "review" => Ok(Self::Review),
            "relearning" => Ok(Self::Relearning),
            other => Err(SrsError::Corrupt(format!("unknown card state '{}'", other))),
        }
    }

    pub fn is_learning(&self) -> bool {
        matches!(self, Self::Learning | Self::Relearning)
    }
}

impl fmt::Display for CardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome the learner reports for one review
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Grade {
    Fail,
    Hard,
    Good,
    Easy,
}

impl Grade {
    pub const ALL: [Grade; 4] = [Grade::Fail, Grade::Hard, Grade::Good, Grade::Easy];

    /// Map a UI button rating (1-4: Again, Hard, Good, Easy)
    pub fn from_rating(rating: i32) -> Result<Self> {
        match rating {
            1 => Ok(Self::Fail),
            2 => Ok(Self::Hard),
            3 => Ok(Self::Good),
            4 => Ok(Self::Easy),
            other => Err(SrsError::InvalidArgument(format!(
                "rating must be between 1 and 4, got {}",
                other
            ))),
        }
    }

    /// Binary grading: a pass counts as good
    pub fn from_pass(passed: bool) -> Self {
        if passed {
            Self::Good
        } else {
            Self::Fail
        }
    }

    pub fn is_pass(&self) -> bool {
        !matches!(self, Self::Fail)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fail => "fail",
            Self::Hard => "hard",
            Self::Good => "good",
            Self::Easy => "easy",
        }
    }
}

impl FromStr for Grade {
    type Err = SrsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fail" | "again" => Ok(Self::Fail),
            "hard" => Ok(Self::Hard),
            "good" => Ok(Self::Good),
            "easy" => Ok(Self::Easy),
            other => Err(SrsError::InvalidArgument(format!("unknown grade '{}'", other))),
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Spaced repetition state for one word in one user's dictionary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    pub user_id: Uuid,
    pub word_id: Uuid,
    #[serde(default)]
    pub card_state: CardState,
    #[serde(default = "default_ease_factor")]
    pub ease_factor: f64,
    /// Current interval in days
    #[serde(default)]
    pub interval: u32,
    /// Rung of the active ladder while learning or relearning
    #[serde(default)]
    pub learning_step: Option<u32>,
    #[serde(default)]
    pub next_review_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_review_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reviews_count: u32,
    #[serde(default)]
    pub lapses: u32,
    /// Lapses since the last passing review
    #[serde(default)]
    pub consecutive_lapses: u32,
    #[serde(default)]
    pub is_suspended: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Row version for optimistic concurrency, 0 until first stored
    #[serde(default)]
    pub version: u64,
}

fn default_ease_factor() -> f64 {
    2.5
}

impl Card {
    pub fn new(user_id: Uuid, word_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            word_id,
            card_state: CardState::New,
            ease_factor: default_ease_factor(),
            interval: 0,
            learning_step: None,
            next_review_date: None,
            last_review_date: None,
            reviews_count: 0,
            lapses: 0,
            consecutive_lapses: 0,
            is_suspended: false,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// A scheduled card whose review time has come
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.card_state != CardState::New
            && self.next_review_date.map_or(false, |due| due <= now)
    }
}

/// A single grade applied to a card
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub word_id: Uuid,
    pub grade: Grade,
    pub state_before: CardState,
    pub state_after: CardState,
    pub interval_before: u32,
    pub interval_after: u32,
    pub ease_factor_after: f64,
    pub reviewed_at: DateTime<Utc>,
}

impl ReviewRecord {
    /// Describe the transition from `before` to `after`
    pub fn between(before: &Card, after: &Card, grade: Grade, reviewed_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: after.user_id,
            word_id: after.word_id,
            grade,
            state_before: before.card_state,
            state_after: after.card_state,
            interval_before: before.interval,
            interval_after: after.interval,
            ease_factor_after: after.ease_factor,
            reviewed_at,
        }
    }
}

/// Card counts for a user's dictionary
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewStats {
    pub total_cards: usize,
    pub new_cards: usize,
    pub learning_cards: usize,
    pub review_cards: usize,
    pub relearning_cards: usize,
    pub suspended_cards: usize,
    pub due_cards: usize,
    pub reviews_today: usize,
    pub correct_today: usize,
}
