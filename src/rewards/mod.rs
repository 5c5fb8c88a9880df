//! XP, gold, level and streak tracking

pub mod ledger;
pub mod models;

pub use ledger::{apply_reward, level_for_xp, level_progress, level_threshold, review_reward};
pub use models::*;
