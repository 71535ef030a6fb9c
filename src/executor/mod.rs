//! Test execution engine
//!
//! Compiles the registered tree into a plan, walks it with the queue stack
//! scheduler and races every hook and body against its deadline.

mod aggregator;
pub mod plan;
mod racer;
mod runner;
mod scheduler;

pub use aggregator::ResultAggregator;
pub use racer::{race, CancelSignal, Settled};
pub use runner::TestRunner;
pub use scheduler::Scheduler;
