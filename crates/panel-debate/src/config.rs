//! Configuration for debate runs

use serde::{Deserialize, Serialize};

use crate::error::{DebateError, Result};

/// How later rounds see the previous round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebateMode {
    /// Each role sees every other role's previous argument
    #[default]
    Panel,
    /// Each role sees only arguments whose stance opposes its own
    Rebuttal,
}

/// Configuration for a debate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebateConfig {
    /// Upper bound on rounds
    pub max_rounds: u32,
    /// Consensus level above which a debate stops early (from round 2)
    pub early_stop_threshold: f64,
    pub mode: DebateMode,
    /// Argument length (chars) counted as fully substantive
    pub target_argument_length: usize,
}

impl Default for DebateConfig {
    fn default() -> Self {
        Self {
            max_rounds: 3,
            early_stop_threshold: 0.8,
            mode: DebateMode::Panel,
            target_argument_length: 400,
        }
    }
}

impl DebateConfig {
    pub fn with_max_rounds(mut self, rounds: u32) -> Self {
        self.max_rounds = rounds;
        self
    }

    pub fn with_mode(mut self, mode: DebateMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_rounds == 0 {
            return Err(DebateError::Config(
                "max_rounds must be greater than 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.early_stop_threshold) {
            return Err(DebateError::Config(
                "early_stop_threshold must be within [0, 1]".to_string(),
            ));
        }
        if self.target_argument_length == 0 {
            return Err(DebateError::Config(
                "target_argument_length must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
