//! Process-wide runner
//!
//! Free functions registering into a single shared [`TestRunner`], so suites
//! can call `describe`/`it` without passing a handle around. The runner is
//! created on first use with default settings overridden by `NESTRUN_*`
//! environment variables.

use once_cell::sync::Lazy;
use std::path::PathBuf;

use crate::config::env::EnvConfig;
use crate::config::RunnerConfig;
use crate::error::Result;
use crate::executor::TestRunner;
use crate::models::{Body, ItOptions, RunResults, TestInfo};

static RUNNER: Lazy<TestRunner> = Lazy::new(|| {
    let mut config = RunnerConfig::default();
    EnvConfig::load().apply_to(&mut config);
    TestRunner::new(config)
});

/// The shared runner
pub fn runner() -> &'static TestRunner {
    &RUNNER
}

pub fn describe<F>(title: impl Into<String>, body: F) -> Result<()>
where
    F: FnOnce() -> Result<()>,
{
    RUNNER.describe(title, body)
}

pub fn describe_only<F>(title: impl Into<String>, body: F) -> Result<()>
where
    F: FnOnce() -> Result<()>,
{
    RUNNER.describe_only(title, body)
}

pub fn describe_skip<F>(title: impl Into<String>, body: F) -> Result<()>
where
    F: FnOnce() -> Result<()>,
{
    RUNNER.describe_skip(title, body)
}

pub fn it(title: impl Into<String>, body: Body) -> Result<()> {
    RUNNER.it(title, body)
}

pub fn it_with(title: impl Into<String>, options: ItOptions, body: Body) -> Result<()> {
    RUNNER.it_with(title, options, body)
}

pub fn it_only(title: impl Into<String>, body: Body) -> Result<()> {
    RUNNER.it_only(title, body)
}

pub fn it_skip(title: impl Into<String>, body: Body) -> Result<()> {
    RUNNER.it_skip(title, body)
}

pub fn before(body: Body) -> Result<()> {
    RUNNER.before(body)
}

pub fn before_each(body: Body) -> Result<()> {
    RUNNER.before_each(body)
}

pub fn after(body: Body) -> Result<()> {
    RUNNER.after(body)
}

pub fn after_each(body: Body) -> Result<()> {
    RUNNER.after_each(body)
}

pub fn set_current_file(path: impl Into<PathBuf>) {
    RUNNER.set_current_file(path)
}

pub async fn run() -> Result<RunResults> {
    RUNNER.run().await
}

pub async fn cancel() -> RunResults {
    RUNNER.cancel().await
}

pub fn reset() -> Result<()> {
    RUNNER.reset()
}

pub fn current_test_info() -> Result<TestInfo> {
    RUNNER.current_test_info()
}
