//! Describe/it tree
//!
//! Registration builds this tree; a run compiles it into a plan and never
//! touches it again.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use super::body::Body;

/// Role of a hook within its describe scope
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HookKind {
    Before,
    BeforeEach,
    After,
    AfterEach,
}

impl HookKind {
    pub fn name(&self) -> &'static str {
        match self {
            HookKind::Before => "before",
            HookKind::BeforeEach => "beforeEach",
            HookKind::After => "after",
            HookKind::AfterEach => "afterEach",
        }
    }

    /// Title used for result records produced by a failing hook
    pub fn record_title(&self) -> String {
        format!("\"{}\" hook", self.name())
    }

    pub fn all() -> [HookKind; 4] {
        [
            HookKind::Before,
            HookKind::BeforeEach,
            HookKind::After,
            HookKind::AfterEach,
        ]
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Registration-time modifier
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modifier {
    #[default]
    None,
    Only,
    Skip,
}

/// Options accepted by an individual `it`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItOptions {
    /// Overrides every configured timeout for this test
    pub timeout_ms: Option<u64>,
}

impl ItOptions {
    pub fn timeout_ms(ms: u64) -> Self {
        Self {
            timeout_ms: Some(ms),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Hook {
    pub kind: HookKind,
    pub body: Body,
}

/// Ordered hook lists of one describe scope
#[derive(Clone, Debug, Default)]
pub struct HookSet {
    pub before: Vec<Hook>,
    pub before_each: Vec<Hook>,
    pub after_each: Vec<Hook>,
    pub after: Vec<Hook>,
}

impl HookSet {
    pub fn push(&mut self, kind: HookKind, body: Body) {
        let hook = Hook { kind, body };
        match kind {
            HookKind::Before => self.before.push(hook),
            HookKind::BeforeEach => self.before_each.push(hook),
            HookKind::After => self.after.push(hook),
            HookKind::AfterEach => self.after_each.push(hook),
        }
    }

    pub fn of(&self, kind: HookKind) -> &[Hook] {
        match kind {
            HookKind::Before => &self.before,
            HookKind::BeforeEach => &self.before_each,
            HookKind::After => &self.after,
            HookKind::AfterEach => &self.after_each,
        }
    }

    pub fn len(&self) -> usize {
        HookKind::all().iter().map(|kind| self.of(*kind).len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One `it` block
#[derive(Clone, Debug)]
pub struct TestNode {
    pub title: String,
    pub body: Body,
    pub timeout_ms: Option<u64>,
    pub modifier: Modifier,
    /// Source file active when the test was registered
    pub file: Option<PathBuf>,
}

#[derive(Clone, Debug)]
pub enum Node {
    Test(TestNode),
    Describe(DescribeNode),
}

/// One `describe` scope. The implicit root is a describe with an empty title.
#[derive(Clone, Debug, Default)]
pub struct DescribeNode {
    pub title: String,
    pub modifier: Modifier,
    pub hooks: HookSet,
    pub children: Vec<Node>,
}

impl DescribeNode {
    pub fn new(title: impl Into<String>, modifier: Modifier) -> Self {
        Self {
            title: title.into(),
            modifier,
            hooks: HookSet::default(),
            children: Vec::new(),
        }
    }

    pub fn root() -> Self {
        Self::default()
    }

    /// Whether this scope or anything below it is marked `only`
    pub fn contains_only(&self) -> bool {
        self.modifier == Modifier::Only
            || self.children.iter().any(|child| match child {
                Node::Test(test) => test.modifier == Modifier::Only,
                Node::Describe(describe) => describe.contains_only(),
            })
    }

    /// Number of tests registered anywhere below this scope
    pub fn test_count(&self) -> usize {
        self.children
            .iter()
            .map(|child| match child {
                Node::Test(_) => 1,
                Node::Describe(describe) => describe.test_count(),
            })
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty() && self.hooks.is_empty()
    }
}

/// Snapshot of the test currently being evaluated
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TestInfo {
    pub title: String,
    pub describe_chain: Vec<String>,
    pub timeout_ms: u64,
    pub file: Option<PathBuf>,
}
