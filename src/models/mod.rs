//! Data models for the test engine
//!
//! Bodies, the describe/it tree and result records.

mod body;
mod node;
mod results;

pub use body::{panic_error, Body, BodyResult, Done, DoneSignal, Invocation, TestError};
pub use node::{
    DescribeNode, Hook, HookKind, HookSet, ItOptions, Modifier, Node, TestInfo, TestNode,
};
pub use results::{FailureInfo, Outcome, RunResults, TestRecord, TimeoutInfo};
