//! Configuration module
//!
//! Runner configuration plus file and environment loading.

pub mod env;
pub mod file;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::RunnerError;
use crate::models::HookKind;

/// Timeout applied when nothing else is configured
pub const DEFAULT_TIMEOUT_MS: u64 = 2_000;

/// Per-phase timeouts. Unset phases fall back to [`DEFAULT_TIMEOUT_MS`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub it: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before_each: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after_each: Option<u64>,
}

impl TimeoutConfig {
    pub fn hook(&self, kind: HookKind) -> Option<u64> {
        match kind {
            HookKind::Before => self.before,
            HookKind::BeforeEach => self.before_each,
            HookKind::After => self.after,
            HookKind::AfterEach => self.after_each,
        }
    }

    fn values(&self) -> [Option<u64>; 5] {
        [
            self.it,
            self.before,
            self.before_each,
            self.after,
            self.after_each,
        ]
    }
}

/// Either one timeout for every phase or one per phase
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimeoutSetting {
    Uniform(u64),
    PerPhase(TimeoutConfig),
}

impl Default for TimeoutSetting {
    fn default() -> Self {
        TimeoutSetting::Uniform(DEFAULT_TIMEOUT_MS)
    }
}

/// Runner configuration, fixed when the runner is constructed
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Timeout for async test and hook bodies
    #[serde(default)]
    pub timeout_ms: TimeoutSetting,

    /// Stop executing tests after the first failure or timeout
    #[serde(default)]
    pub stop_on_first_fail: bool,
}

impl RunnerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use one timeout for every phase
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = TimeoutSetting::Uniform(timeout_ms);
        self
    }

    /// Use per-phase timeouts
    pub fn with_timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeout_ms = TimeoutSetting::PerPhase(timeouts);
        self
    }

    pub fn with_stop_on_first_fail(mut self, stop: bool) -> Self {
        self.stop_on_first_fail = stop;
        self
    }

    /// Timeout for a test body: per-test override, then `it` phase, then
    /// uniform value, then the default
    pub fn test_timeout_ms(&self, override_ms: Option<u64>) -> u64 {
        override_ms.unwrap_or(match self.timeout_ms {
            TimeoutSetting::Uniform(ms) => ms,
            TimeoutSetting::PerPhase(phases) => phases.it.unwrap_or(DEFAULT_TIMEOUT_MS),
        })
    }

    /// Timeout for a hook body
    pub fn hook_timeout_ms(&self, kind: HookKind) -> u64 {
        match self.timeout_ms {
            TimeoutSetting::Uniform(ms) => ms,
            TimeoutSetting::PerPhase(phases) => phases.hook(kind).unwrap_or(DEFAULT_TIMEOUT_MS),
        }
    }

    /// Reject timeouts of zero
    pub fn validate(&self) -> std::result::Result<(), RunnerError> {
        let has_zero = match self.timeout_ms {
            TimeoutSetting::Uniform(ms) => ms == 0,
            TimeoutSetting::PerPhase(phases) => phases.values().contains(&Some(0)),
        };
        if has_zero {
            return Err(RunnerError::Config(
                "timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = if file::is_yaml_file(path) {
            serde_yaml::from_str(&content).context("Failed to parse YAML config")?
        } else {
            serde_json::from_str(&content).context("Failed to parse JSON config")?
        };

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = if file::is_yaml_file(path) {
            serde_yaml::to_string(self).context("Failed to serialize config")?
        } else {
            serde_json::to_string_pretty(self).context("Failed to serialize config")?
        };

        std::fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }
}
