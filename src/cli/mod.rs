//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{Parser, Subcommand};

/// Hierarchical describe/it test runner
#[derive(Parser, Debug)]
#[command(name = "nestrun")]
#[command(version)]
#[command(about = "Run nested describe/it suites with hooks, timeouts and cancellation")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the built-in sample suite
    Run(RunArgs),

    /// Configuration management
    Config(ConfigArgs),
}

/// Arguments for run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Timeout for async tests and hooks in milliseconds
    #[arg(short, long)]
    pub timeout_ms: Option<u64>,

    /// Stop after the first failure or timeout
    #[arg(short, long)]
    pub stop_on_first_fail: bool,

    /// Output format (table, json, json-pretty, summary)
    #[arg(short, long)]
    pub format: Option<String>,

    /// Save results to file
    #[arg(short, long)]
    pub output: Option<String>,

    /// Configuration file (defaults to the standard locations)
    #[arg(short, long)]
    pub config: Option<String>,

    /// Add failing tests to the suite
    #[arg(long)]
    pub with_failures: bool,

    /// Add a test that exceeds its timeout
    #[arg(long)]
    pub with_timeout: bool,

    /// Only run the async block of the suite
    #[arg(long)]
    pub only: bool,
}

/// Arguments for config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Write an example configuration file
    Init {
        /// Output path
        #[arg(short, long, default_value = "nestrun.yaml")]
        output: String,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Show the effective configuration file
    Show {
        /// Output format (yaml, json)
        #[arg(short, long, default_value = "yaml")]
        format: String,
    },

    /// Validate a configuration file
    Validate {
        /// Path to configuration file
        file: Option<String>,
    },

    /// List environment variables and their current values
    Env,
}
