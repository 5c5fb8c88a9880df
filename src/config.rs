//! Runtime configuration for scheduling, session building and rewards
//!
//! Loaded from a TOML file. Every field has a default, so an empty file
//! (or no file at all) yields a working configuration:
//!
//! ```toml
//! [scheduler]
//! learning_steps_minutes = [1, 10, 1440]
//! max_interval_days = 365
//!
//! [session]
//! new_cards_per_day = 20
//!
//! [rewards]
//! daily_xp_goal = 50
//!
//! [storage]
//! busy_timeout_ms = 5000
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SrsError};

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SrsConfig {
    pub scheduler: SchedulerConfig,
    pub session: SessionConfig,
    pub rewards: RewardConfig,
    pub storage: StorageConfig,
}

impl SrsConfig {
    /// Load and validate a config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        log::info!("Loaded SRS config from {:?}", path);
        Ok(config)
    }

    /// Parse and validate TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| SrsError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.scheduler.validate()?;
        self.rewards.validate()?;
        Ok(())
    }
}

/// Parameters of the SM-2 style state machine.
///
/// The numeric defaults are tuning values, not measured ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Ladder used by new cards. The last rung is the graduation rung.
    pub learning_steps_minutes: Vec<u32>,
    /// Ladder used after a lapse. The last rung is the graduation rung.
    pub relearning_steps_minutes: Vec<u32>,
    pub initial_ease: f64,
    pub min_ease: f64,
    pub lapse_ease_penalty: f64,
    pub hard_ease_delta: f64,
    pub easy_ease_delta: f64,
    pub hard_interval_multiplier: f64,
    pub easy_bonus: f64,
    pub graduating_interval_days: u32,
    pub max_interval_days: u32,
    /// Suspend a card after this many lapses in a row. Off when unset.
    pub leech_threshold: Option<u32>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            learning_steps_minutes: vec![1, 10, 1440],
            relearning_steps_minutes: vec![10, 1440],
            initial_ease: 2.5,
            min_ease: 1.3,
            lapse_ease_penalty: 0.2,
            hard_ease_delta: -0.15,
            easy_ease_delta: 0.15,
            hard_interval_multiplier: 1.0,
            easy_bonus: 1.3,
            graduating_interval_days: 1,
            max_interval_days: 365,
            leech_threshold: None,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, ladder) in [
            ("learning_steps_minutes", &self.learning_steps_minutes),
            ("relearning_steps_minutes", &self.relearning_steps_minutes),
        ] {
            if ladder.is_empty() {
                return Err(SrsError::Config(format!("{} must not be empty", name)));
            }
            if ladder.iter().any(|m| *m == 0) {
                return Err(SrsError::Config(format!(
                    "{} must contain positive minutes",
                    name
                )));
            }
        }

        if self.min_ease < 1.0 || self.initial_ease < self.min_ease {
            return Err(SrsError::Config(format!(
                "invalid ease bounds: initial {} min {}",
                self.initial_ease, self.min_ease
            )));
        }
        if self.hard_interval_multiplier <= 0.0 || self.easy_bonus <= 0.0 {
            return Err(SrsError::Config(
                "interval multipliers must be positive".to_string(),
            ));
        }
        if self.graduating_interval_days == 0 || self.max_interval_days == 0 {
            return Err(SrsError::Config(
                "graduating_interval_days and max_interval_days must be at least 1".to_string(),
            ));
        }
        if self.leech_threshold == Some(0) {
            return Err(SrsError::Config("leech_threshold must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Session building limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub new_cards_per_day: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            new_cards_per_day: 20,
        }
    }
}

/// XP and gold awarded per review, plus calendar settings for streaks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardConfig {
    pub xp_fail: i64,
    pub xp_hard: i64,
    pub xp_good: i64,
    pub xp_easy: i64,
    pub gold_per_pass: i64,
    pub daily_xp_goal: i64,
    /// Offset from UTC used to decide where a calendar day starts
    pub utc_offset_minutes: i32,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            xp_fail: 2,
            xp_hard: 5,
            xp_good: 10,
            xp_easy: 12,
            gold_per_pass: 1,
            daily_xp_goal: 50,
            utc_offset_minutes: 0,
        }
    }
}

impl RewardConfig {
    pub fn validate(&self) -> Result<()> {
        let amounts = [
            self.xp_fail,
            self.xp_hard,
            self.xp_good,
            self.xp_easy,
            self.gold_per_pass,
            self.daily_xp_goal,
        ];
        if amounts.iter().any(|a| *a < 0) {
            return Err(SrsError::Config("reward amounts must not be negative".to_string()));
        }
        if self.utc_offset_minutes.abs() >= 24 * 60 {
            return Err(SrsError::Config(format!(
                "utc_offset_minutes out of range: {}",
                self.utc_offset_minutes
            )));
        }
        Ok(())
    }
}

/// Storage backend settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file. In-memory when unset.
    pub database_path: Option<PathBuf>,
    pub busy_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            busy_timeout_ms: 5000,
        }
    }
}

impl StorageConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = SrsConfig::from_toml_str("").unwrap();
        assert_eq!(config, SrsConfig::default());
        assert_eq!(config.scheduler.learning_steps_minutes, vec![1, 10, 1440]);
        assert_eq!(config.session.new_cards_per_day, 20);
    }

    #[test]
    fn test_partial_override() {
        let config = SrsConfig::from_toml_str(
            r#"
            [scheduler]
            max_interval_days = 180
            leech_threshold = 8

            [session]
            new_cards_per_day = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.scheduler.max_interval_days, 180);
        assert_eq!(config.scheduler.leech_threshold, Some(8));
        assert_eq!(config.scheduler.initial_ease, 2.5);
        assert_eq!(config.session.new_cards_per_day, 5);
    }

    #[test]
    fn test_rejects_empty_ladder() {
        let err = SrsConfig::from_toml_str(
            r#"
            [scheduler]
            learning_steps_minutes = []
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, SrsError::Config(_)));
    }

    #[test]
    fn test_rejects_bad_ease_bounds() {
        let err = SrsConfig::from_toml_str(
            r#"
            [scheduler]
            initial_ease = 1.2
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, SrsError::Config(_)));
    }

    #[test]
    fn test_rejects_malformed_toml() {
        let err = SrsConfig::from_toml_str("[scheduler\n").unwrap_err();
        assert!(matches!(err, SrsError::Config(_)));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[rewards]\ndaily_xp_goal = 120\nutc_offset_minutes = 180").unwrap();

        let config = SrsConfig::load(file.path()).unwrap();
        assert_eq!(config.rewards.daily_xp_goal, 120);
        assert_eq!(config.rewards.utc_offset_minutes, 180);
    }
}
