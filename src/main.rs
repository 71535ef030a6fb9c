//! nestrun - hierarchical describe/it test runner
//!
//! ## Usage
//!
//! ```bash
//! # Run the sample suite
//! nestrun run
//!
//! # Include failing and timing-out tests, stop at the first failure
//! nestrun run --with-failures --with-timeout --stop-on-first-fail
//!
//! # JSON output saved to a file
//! nestrun run --format json --output results.json
//!
//! # Configuration
//! nestrun config init
//! nestrun config show
//! nestrun config env
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use tracing::{info, warn};

mod cli;

use cli::{Args, ConfigAction, RunArgs};
use nestrun::config::env::{print_env_help, EnvConfig};
use nestrun::config::file::ConfigFile;
use nestrun::output::{write_results, OutputFormat, Reporter, ResultFormatter};
use nestrun::samples::{self, SampleOptions};
use nestrun::utils::{init_logger, LogLevel};
use nestrun::TestRunner;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let env = EnvConfig::load();

    match args.command {
        cli::Command::Run(run_args) => {
            let failed = run_suite(run_args, &env, args.verbose).await?;
            if failed {
                std::process::exit(1);
            }
        }
        cli::Command::Config(config_args) => {
            init_logging(args.verbose, &env, None);
            manage_config(config_args.action, &env)?;
        }
    }

    Ok(())
}

/// Verbose flag, then environment, then config file, then info
fn init_logging(verbose: bool, env: &EnvConfig, file: Option<&ConfigFile>) {
    let level = if verbose {
        LogLevel::Debug
    } else {
        env.log_level
            .as_deref()
            .or_else(|| file.and_then(|f| f.log_level.as_deref()))
            .and_then(LogLevel::from_str)
            .unwrap_or_default()
    };
    init_logger(level);
}

fn load_config_file(path: Option<&str>) -> Result<ConfigFile> {
    match path {
        Some(path) => ConfigFile::load(path)
            .with_context(|| format!("Failed to load configuration from {path}")),
        None => ConfigFile::load_default(),
    }
}

/// Run the sample suite. Returns whether anything failed or timed out.
async fn run_suite(args: RunArgs, env: &EnvConfig, verbose: bool) -> Result<bool> {
    let file = load_config_file(args.config.as_deref().or(env.config_file.as_deref()))?;
    init_logging(verbose, env, Some(&file));

    // CLI > environment > file > defaults
    let mut config = file.runner.clone();
    env.apply_to(&mut config);
    if let Some(timeout_ms) = args.timeout_ms {
        config = config.with_timeout_ms(timeout_ms);
    }
    if args.stop_on_first_fail {
        config.stop_on_first_fail = true;
    }
    config.validate()?;

    let format_name = args
        .format
        .clone()
        .or_else(|| env.format.clone())
        .or_else(|| file.format.clone())
        .unwrap_or_else(|| "table".to_string());
    let format = OutputFormat::from_str(&format_name)
        .ok_or_else(|| anyhow::anyhow!("Unknown output format: {format_name}"))?;

    let runner = TestRunner::new(config);
    let reporter = Reporter::attach(&runner);
    samples::register(
        &runner,
        SampleOptions {
            with_failures: args.with_failures,
            with_timeout: args.with_timeout,
            only: args.only,
        },
    )?;

    let interrupt = {
        let runner = runner.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling run");
                runner.cancel().await;
            }
        })
    };

    let results = runner.run().await?;
    interrupt.abort();
    reporter.detach(&runner);

    println!("{}", ResultFormatter::new(format).format_results(&results));

    if let Some(output) = &args.output {
        write_results(output, &results, OutputFormat::JsonPretty)?;
        info!("Results saved to {}", output);
    }

    Ok(results.has_failures())
}

fn manage_config(action: ConfigAction, env: &EnvConfig) -> Result<()> {
    match action {
        ConfigAction::Init { output, force } => {
            let path = Path::new(&output);
            if path.exists() && !force {
                anyhow::bail!(
                    "Configuration file already exists: {output}. Use --force to overwrite."
                );
            }

            ConfigFile::example().save(path)?;
            println!("✓ Configuration file created: {output}");
            println!("\nEdit the file to customize your settings.");
        }

        ConfigAction::Show { format } => {
            let config = load_config_file(env.config_file.as_deref())?;
            let output = if format == "json" {
                serde_json::to_string_pretty(&config)?
            } else {
                serde_yaml::to_string(&config)?
            };
            println!("{output}");
        }

        ConfigAction::Validate { file } => {
            let path = file
                .or_else(|| env.config_file.clone())
                .or_else(|| ConfigFile::find().map(|p| p.to_string_lossy().to_string()))
                .unwrap_or_else(|| "./nestrun.yaml".to_string());

            match ConfigFile::load(&path) {
                Ok(_) => {
                    println!("✓ Configuration file is valid: {path}");
                }
                Err(e) => {
                    println!("✗ Configuration file is invalid: {path}");
                    println!("  Error: {e:#}");
                    return Err(e);
                }
            }
        }

        ConfigAction::Env => {
            print_env_help();
            println!();
            env.print_summary();
        }
    }

    Ok(())
}
