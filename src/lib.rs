//! nestrun - hierarchical describe/it test runner
//!
//! Collects nested `describe`/`it` declarations with `before`, `beforeEach`,
//! `after` and `afterEach` hooks, runs them in a fixed depth-first order with
//! per-unit timeouts and cooperative cancellation, and aggregates the
//! outcomes into [`RunResults`].
//!
//! ## Example
//!
//! ```no_run
//! use nestrun::{Body, RunnerConfig, TestRunner};
//!
//! # async fn demo() -> Result<(), nestrun::RunnerError> {
//! let runner = TestRunner::new(RunnerConfig::new().with_timeout_ms(500));
//! let r = runner.clone();
//! runner.describe("math", || {
//!     r.before_each(Body::noop())?;
//!     r.it("adds", Body::sync(|| {
//!         anyhow::ensure!(1 + 1 == 2);
//!         Ok(())
//!     }))
//! })?;
//!
//! let results = runner.run().await?;
//! assert_eq!(results.total_failures, 0);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod executor;
pub mod global;
pub mod models;
pub mod output;
pub mod samples;
pub mod utils;

pub use config::{RunnerConfig, TimeoutConfig, TimeoutSetting, DEFAULT_TIMEOUT_MS};
pub use error::RunnerError;
pub use events::{EventEmitter, EventName, ListenerId, RunnerEvent};
pub use executor::TestRunner;
pub use models::{
    Body, BodyResult, Done, HookKind, ItOptions, Outcome, RunResults, TestError, TestInfo,
    TestRecord,
};
