//! Engine configuration with validation and defaults.
//!
//! Timings mirror the production cadence (150ms ticks, an 8s bet window, 3s
//! between rounds); tests override them wholesale to run rounds in tens of
//! milliseconds.

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level engine configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub timing: TimingConfig,
    pub settlement: SettlementConfig,
    pub overrides: OverrideConfig,
}

/// Fixed timers driving the round lifecycle.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Multiplier broadcast interval while a round runs.
    pub tick_ms: u64,
    /// How long bets are accepted before a round starts.
    pub bet_window_ms: u64,
    /// Poll interval while waiting out in-flight bet writes.
    pub blocking_poll_ms: u64,
    /// Pause between a crash and the next round starting.
    pub post_crash_ms: u64,
    /// Backoff when the next round cannot be created.
    pub create_retry_ms: u64,
    /// Heartbeat interval while a round is stuck settling.
    pub settle_heartbeat_ms: u64,
    /// Backoff between settlement attempts.
    pub settle_retry_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            tick_ms: 150,
            bet_window_ms: 8_000,
            blocking_poll_ms: 100,
            post_crash_ms: 3_000,
            create_retry_ms: 2_000,
            settle_heartbeat_ms: 1_000,
            settle_retry_ms: 1_000,
        }
    }
}

/// Settlement fan-out and retry tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    /// Maximum concurrent per-bet settlement writes.
    pub fan_out: usize,
    /// Retries per transactional store operation on transient failure.
    pub retry_attempts: u32,
    pub retry_backoff_ms: u64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            fan_out: 4,
            retry_attempts: 3,
            retry_backoff_ms: 200,
        }
    }
}

/// Operator overrides; none of these are set in production.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OverrideConfig {
    /// Force every round's crash point (x100). Testing only.
    pub crash_at: Option<u64>,
    /// Crash point used when an administrative finish names a stale round.
    pub fallback_crash_point: u64,
}

impl OverrideConfig {
    pub fn fallback(&self) -> u64 {
        if self.fallback_crash_point == 0 {
            1_000
        } else {
            self.fallback_crash_point
        }
    }
}

/// Stake bounds pushed to clients and enforced at the boundary.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BetLimits {
    pub min_bet: i64,
    pub max_bet: i64,
    pub min_extra_bet: i64,
    pub max_extra_bet: i64,
    pub min_range_bet: i64,
    pub max_range_bet: i64,
}

impl Default for BetLimits {
    fn default() -> Self {
        Self {
            min_bet: 100,
            max_bet: 100_000_000,
            min_extra_bet: 100,
            max_extra_bet: 10_000_000,
            min_range_bet: 100,
            max_range_bet: 10_000_000,
        }
    }
}

impl EngineConfig {
    /// Load from a TOML file and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timing.tick_ms == 0 {
            return Err(ConfigError::Invalid("timing.tick_ms must be nonzero".into()));
        }
        if self.timing.blocking_poll_ms == 0 {
            return Err(ConfigError::Invalid(
                "timing.blocking_poll_ms must be nonzero".into(),
            ));
        }
        if self.settlement.fan_out == 0 {
            return Err(ConfigError::Invalid(
                "settlement.fan_out must be nonzero".into(),
            ));
        }
        if let Some(cp) = self.overrides.crash_at {
            if cp != 0 && cp < 100 {
                return Err(ConfigError::Invalid(
                    "overrides.crash_at must be 0 or at least 100".into(),
                ));
            }
        }
        Ok(())
    }
}
