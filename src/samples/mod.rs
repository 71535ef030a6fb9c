//! Built-in demonstration suite
//!
//! Registers a small suite exercising every body shape and hook kind. The
//! `nestrun run` command executes it.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::executor::TestRunner;
use crate::models::{Body, Done, ItOptions};

/// Which optional parts of the suite to register
#[derive(Clone, Copy, Debug, Default)]
pub struct SampleOptions {
    /// Add a test failing on an assertion
    pub with_failures: bool,
    /// Add a test exceeding its timeout
    pub with_timeout: bool,
    /// Mark the async describe block `only`
    pub only: bool,
}

/// Register the sample suite on `runner`
pub fn register(runner: &TestRunner, options: SampleOptions) -> Result<()> {
    runner.set_current_file("samples/arithmetic.rs");
    register_arithmetic(runner, options)?;

    runner.set_current_file("samples/async.rs");
    let body = || register_async(runner, options);
    if options.only {
        runner.describe_only("async", body)
    } else {
        runner.describe("async", body)
    }
}

fn register_arithmetic(runner: &TestRunner, options: SampleOptions) -> Result<()> {
    let stack: Arc<Mutex<Vec<i64>>> = Arc::new(Mutex::new(Vec::new()));

    runner.describe("arithmetic", || {
        let s = stack.clone();
        runner.before_each(Body::sync(move || {
            let mut stack = s.lock();
            stack.clear();
            stack.extend([2, 3]);
            Ok(())
        }))?;

        let s = stack.clone();
        runner.it(
            "adds",
            Body::sync(move || {
                let sum: i64 = s.lock().iter().sum();
                anyhow::ensure!(sum == 5, "expected 5, got {sum}");
                Ok(())
            }),
        )?;

        let s = stack.clone();
        runner.it(
            "multiplies",
            Body::sync(move || {
                let product: i64 = s.lock().iter().product();
                assert_eq!(product, 6);
                Ok(())
            }),
        )?;

        if options.with_failures {
            let s = stack.clone();
            runner.it(
                "divides by the empty stack",
                Body::sync(move || {
                    let stack = s.lock();
                    let divisor = stack.get(5).copied().unwrap_or_default();
                    anyhow::ensure!(divisor != 0, "division by zero");
                    Ok(())
                }),
            )?;
        }

        runner.it_skip("exponentiation", Body::noop())?;

        runner.describe("nested", || {
            let s = stack.clone();
            runner.before_each(Body::sync(move || {
                s.lock().push(10);
                Ok(())
            }))?;

            let s = stack.clone();
            runner.it(
                "sees outer setup first",
                Body::sync(move || {
                    anyhow::ensure!(*s.lock() == [2, 3, 10], "unexpected setup order");
                    Ok(())
                }),
            )
        })
    })
}

fn register_async(runner: &TestRunner, options: SampleOptions) -> Result<()> {
    let connected = Arc::new(Mutex::new(false));

    let c = connected.clone();
    runner.before(Body::future(move || {
        let c = c.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            *c.lock() = true;
            Ok(())
        }
    }))?;

    let c = connected.clone();
    runner.after(Body::sync(move || {
        *c.lock() = false;
        Ok(())
    }))?;

    let c = connected.clone();
    runner.it(
        "resolves a future",
        Body::future(move || {
            let c = c.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                anyhow::ensure!(*c.lock(), "not connected");
                Ok(())
            }
        }),
    )?;

    runner.it(
        "signals completion",
        Body::done(|done: Done| {
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                done.ok();
            });
        }),
    )?;

    runner.it(
        "signals before its future settles",
        Body::done_or_future(|done: Done| async move {
            done.ok();
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }),
    )?;

    if options.with_timeout {
        runner.it_with(
            "waits too long",
            ItOptions::timeout_ms(50),
            Body::future(|| async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok(())
            }),
        )?;
    }

    if options.with_failures {
        runner.it(
            "rejects",
            Body::future(|| async { Err(anyhow::anyhow!("connection refused")) }),
        )?;
    }

    Ok(())
}
