//! Environment variable configuration
//!
//! Provides environment variable overrides for configuration.

use std::env;

use super::RunnerConfig;

/// Environment variable prefix
const ENV_PREFIX: &str = "NESTRUN";

/// Environment configuration from environment variables
#[derive(Clone, Debug, Default)]
pub struct EnvConfig {
    /// Uniform timeout from NESTRUN_TIMEOUT_MS
    pub timeout_ms: Option<u64>,
    /// Stop flag from NESTRUN_STOP_ON_FIRST_FAIL
    pub stop_on_first_fail: Option<bool>,
    /// Config file from NESTRUN_CONFIG
    pub config_file: Option<String>,
    /// Output format from NESTRUN_FORMAT
    pub format: Option<String>,
    /// Log level from NESTRUN_LOG
    pub log_level: Option<String>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self {
            timeout_ms: get_env_parse("TIMEOUT_MS"),
            stop_on_first_fail: get_env_bool("STOP_ON_FIRST_FAIL"),
            config_file: get_env("CONFIG"),
            format: get_env("FORMAT"),
            log_level: get_env("LOG"),
        }
    }

    /// Check if any environment variables are set
    pub fn has_any(&self) -> bool {
        self.timeout_ms.is_some()
            || self.stop_on_first_fail.is_some()
            || self.config_file.is_some()
            || self.format.is_some()
            || self.log_level.is_some()
    }

    /// Override runner settings that are present in the environment
    pub fn apply_to(&self, config: &mut RunnerConfig) {
        if let Some(timeout_ms) = self.timeout_ms {
            *config = config.clone().with_timeout_ms(timeout_ms);
        }
        if let Some(stop) = self.stop_on_first_fail {
            config.stop_on_first_fail = stop;
        }
    }

    /// Print current environment configuration
    pub fn print_summary(&self) {
        println!("Environment Configuration:");
        println!("  {}_TIMEOUT_MS:          {:?}", ENV_PREFIX, self.timeout_ms);
        println!("  {}_STOP_ON_FIRST_FAIL:  {:?}", ENV_PREFIX, self.stop_on_first_fail);
        println!("  {}_CONFIG:              {:?}", ENV_PREFIX, self.config_file);
        println!("  {}_FORMAT:              {:?}", ENV_PREFIX, self.format);
        println!("  {}_LOG:                 {:?}", ENV_PREFIX, self.log_level);
    }
}

/// Get environment variable with prefix
fn get_env(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{name}")).ok()
}

/// Get environment variable and parse to type
fn get_env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    get_env(name).and_then(|v| v.trim().parse().ok())
}

/// Get environment variable as boolean
fn get_env_bool(name: &str) -> Option<bool> {
    get_env(name).map(|v| {
        matches!(
            v.to_lowercase().as_str(),
            "1" | "true" | "yes" | "on" | "enabled"
        )
    })
}

/// Builder for setting environment variables (useful for testing)
pub struct EnvBuilder {
    vars: Vec<(String, String)>,
}

impl EnvBuilder {
    /// Create a new environment builder
    pub fn new() -> Self {
        Self { vars: Vec::new() }
    }

    /// Set uniform timeout
    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.vars
            .push((format!("{ENV_PREFIX}_TIMEOUT_MS"), timeout_ms.to_string()));
        self
    }

    /// Set stop flag
    pub fn stop_on_first_fail(mut self, stop: bool) -> Self {
        self.vars
            .push((format!("{ENV_PREFIX}_STOP_ON_FIRST_FAIL"), stop.to_string()));
        self
    }

    /// Set config file
    pub fn config_file(mut self, path: impl Into<String>) -> Self {
        self.vars.push((format!("{ENV_PREFIX}_CONFIG"), path.into()));
        self
    }

    /// Set output format
    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.vars.push((format!("{ENV_PREFIX}_FORMAT"), format.into()));
        self
    }

    /// Apply environment variables
    pub fn apply(self) {
        for (key, value) in self.vars {
            env::set_var(key, value);
        }
    }

    /// Apply and return guard that restores on drop
    pub fn apply_scoped(self) -> EnvGuard {
        let previous: Vec<_> = self
            .vars
            .iter()
            .map(|(k, _)| (k.clone(), env::var(k).ok()))
            .collect();

        self.apply();

        EnvGuard { previous }
    }
}

impl Default for EnvBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard that restores environment variables on drop
pub struct EnvGuard {
    previous: Vec<(String, Option<String>)>,
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in &self.previous {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }
    }
}

/// Print all NESTRUN environment variables
pub fn print_env_help() {
    println!("Environment Variables:");
    println!();
    println!("  {ENV_PREFIX}_TIMEOUT_MS          Timeout for async tests and hooks (ms)");
    println!("  {ENV_PREFIX}_STOP_ON_FIRST_FAIL  Stop after the first failure (true/false)");
    println!("  {ENV_PREFIX}_CONFIG              Path to configuration file");
    println!("  {ENV_PREFIX}_FORMAT              Output format (table, json, json-pretty, summary)");
    println!("  {ENV_PREFIX}_LOG                 Log level (trace, debug, info, warn, error)");
    println!();
    println!("Example:");
    println!("  export {ENV_PREFIX}_TIMEOUT_MS=500");
    println!("  nestrun run --with-failures");
}
