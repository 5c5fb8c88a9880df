//! Word cards and the spaced repetition system
//!
//! This module provides:
//! - Card state and review history models
//! - The SM-2 family scheduler
//! - Review session selection

pub mod algorithm;
pub mod models;
pub mod selector;

pub use algorithm::{preview_intervals, schedule};
pub use models::*;
pub use selector::{select_practice_session, select_session, Session, SessionStatus};
