//! SM-2 family scheduler
//!
//! A card moves through four states:
//!
//! - `new`: never graded. Any grade starts the learning ladder.
//! - `learning` / `relearning`: short delays from a fixed ladder. A fail
//!   restarts the ladder; a pass climbs it. Stepping onto the final rung
//!   graduates the card to `review`.
//! - `review`: day-scale intervals grown by the ease factor. A fail is a
//!   lapse and sends the card to `relearning`.
//!
//! Grades map to UI buttons: Again (fail), Hard, Good, Easy.

use chrono::{DateTime, Duration, Utc};

use super::models::{Card, CardState, Grade};
use crate::config::SchedulerConfig;
use crate::error::{Result, SrsError};

/// Compute the next state of `card` after `grade`
///
/// Returns a new card; the input is left untouched. Suspended cards
/// cannot be graded.
pub fn schedule(
    card: &Card,
    grade: Grade,
    now: DateTime<Utc>,
    config: &SchedulerConfig,
) -> Result<Card> {
    if card.is_suspended {
        return Err(SrsError::InvalidState(format!(
            "card for word {} is suspended",
            card.word_id
        )));
    }

    let mut next = card.clone();

    match card.card_state {
        CardState::New => {
            next.ease_factor = config.initial_ease;
            next.card_state = CardState::Learning;
            next.interval = 0;
            next.learning_step = Some(0);
            next.next_review_date = Some(now + step_delay(&config.learning_steps_minutes, 0));
        }
        CardState::Learning | CardState::Relearning => {
            let ladder = if card.card_state == CardState::Learning {
                &config.learning_steps_minutes
            } else {
                &config.relearning_steps_minutes
            };

            if grade.is_pass() {
                let step = card.learning_step.unwrap_or(0) as usize + 1;
                if step + 1 >= ladder.len() {
                    graduate(&mut next, now, config);
                } else {
                    next.learning_step = Some(step as u32);
                    next.next_review_date = Some(now + step_delay(ladder, step));
                }
            } else {
                next.learning_step = Some(0);
                next.next_review_date = Some(now + step_delay(ladder, 0));
            }
        }
        CardState::Review => {
            if grade.is_pass() {
                review_pass(&mut next, grade, now, config);
            } else {
                lapse(&mut next, now, config);
            }
        }
    }

    next.reviews_count += 1;
    next.last_review_date = Some(now);
    next.updated_at = now;

    Ok(next)
}

fn graduate(card: &mut Card, now: DateTime<Utc>, config: &SchedulerConfig) {
    log::info!(
        "Word {} graduated from {} to review",
        card.word_id,
        card.card_state
    );
    card.card_state = CardState::Review;
    card.learning_step = None;
    card.interval = config.graduating_interval_days;
    card.next_review_date = Some(now + Duration::days(card.interval as i64));
}

fn review_pass(card: &mut Card, grade: Grade, now: DateTime<Utc>, config: &SchedulerConfig) {
    let (ease_delta, multiplier) = match grade {
        Grade::Hard => (config.hard_ease_delta, config.hard_interval_multiplier),
        Grade::Easy => (config.easy_ease_delta, config.easy_bonus),
        _ => (0.0, 1.0),
    };

    card.ease_factor = clamp_ease(card.ease_factor + ease_delta, config.min_ease);

    let max_interval = config.max_interval_days;
    let grown = (card.interval.max(1) as f64 * card.ease_factor * multiplier)
        .round()
        .min(max_interval as f64) as u32;

    // Always move forward, but never past the cap
    let interval = grown.max(card.interval + 1).min(max_interval);

    card.interval = interval;
    card.consecutive_lapses = 0;
    card.next_review_date = Some(now + Duration::days(interval as i64));
}

fn lapse(card: &mut Card, now: DateTime<Utc>, config: &SchedulerConfig) {
    card.lapses += 1;
    card.consecutive_lapses += 1;
    card.card_state = CardState::Relearning;
    card.learning_step = Some(0);
    card.interval = 0;
    card.ease_factor = clamp_ease(card.ease_factor - config.lapse_ease_penalty, config.min_ease);
    card.next_review_date = Some(now + step_delay(&config.relearning_steps_minutes, 0));

    log::info!(
        "Word {} lapsed ({} total, ease now {:.2})",
        card.word_id,
        card.lapses,
        card.ease_factor
    );

    if let Some(threshold) = config.leech_threshold {
        if card.consecutive_lapses >= threshold {
            card.is_suspended = true;
            log::info!(
                "Suspended leech word {} after {} consecutive lapses",
                card.word_id,
                card.consecutive_lapses
            );
        }
    }
}

/// Floor the ease and keep it at two decimals so repeated deltas don't drift
fn clamp_ease(ease: f64, min_ease: f64) -> f64 {
    let rounded = (ease * 100.0).round() / 100.0;
    rounded.max(min_ease)
}

/// Delay for a rung; out-of-range steps use the last rung
fn step_delay(ladder: &[u32], step: usize) -> Duration {
    let minutes = ladder
        .get(step)
        .or_else(|| ladder.last())
        .copied()
        .unwrap_or(1);
    Duration::minutes(minutes as i64)
}

/// Delay in minutes each grade would produce, in `Grade::ALL` order
///
/// Used to label the rating buttons.
pub fn preview_intervals(
    card: &Card,
    now: DateTime<Utc>,
    config: &SchedulerConfig,
) -> Result<[i64; 4]> {
    let mut delays = [0i64; 4];
    for (slot, grade) in delays.iter_mut().zip(Grade::ALL) {
        let next = schedule(card, grade, now, config)?;
        *slot = next
            .next_review_date
            .map(|due| (due - now).num_minutes())
            .unwrap_or(0);
    }
    Ok(delays)
}

/// Format a delay in minutes as a short label
pub fn format_interval_minutes(minutes: i64) -> String {
    const HOUR: i64 = 60;
    const DAY: i64 = 24 * HOUR;

    if minutes <= 0 {
        "now".to_string()
    } else if minutes < HOUR {
        format!("{}m", minutes)
    } else if minutes < DAY {
        format!("{}h", minutes / HOUR)
    } else {
        let days = minutes / DAY;
        if days < 7 {
            format!("{}d", days)
        } else if days < 30 {
            format!("{}w", days / 7)
        } else if days < 365 {
            format!("{}mo", days / 30)
        } else {
            format!("{}y", days / 365)
        }
    }
}
