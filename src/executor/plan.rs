//! Run plan
//!
//! At run start the registration tree is compiled into a plan: `only`
//! selection is applied, tests left out by it are dropped, and every node is
//! marked with whether it will actually execute. The scheduler only ever
//! walks the plan.

use crate::models::{DescribeNode, HookSet, Modifier, Node, TestNode};

/// A test selected for this run
#[derive(Clone, Debug)]
pub struct PlannedTest {
    pub node: TestNode,
    /// Reported as skipped instead of executed
    pub skip: bool,
}

#[derive(Clone, Debug)]
pub enum Item {
    Test(PlannedTest),
    Scope(Scope),
}

/// One describe scope of the plan
#[derive(Clone, Debug)]
pub struct Scope {
    pub title: String,
    /// Titles from the outermost describe down to this one. Empty for the root.
    pub chain: Vec<String>,
    pub hooks: HookSet,
    pub items: Vec<Item>,
    /// Whether any test below this scope will execute
    pub runnable: bool,
    pub is_root: bool,
}

struct Selection {
    only_mode: bool,
}

/// Compile the registration tree rooted at `root`
pub fn compile(root: &DescribeNode) -> Scope {
    let selection = Selection {
        only_mode: root.contains_only(),
    };
    selection
        .scope(root, &[], false, false, true)
        .unwrap_or_else(|| Scope {
            title: root.title.clone(),
            chain: Vec::new(),
            hooks: root.hooks.clone(),
            items: Vec::new(),
            runnable: false,
            is_root: true,
        })
}

impl Selection {
    fn scope(
        &self,
        node: &DescribeNode,
        parent_chain: &[String],
        parent_only: bool,
        parent_skip: bool,
        is_root: bool,
    ) -> Option<Scope> {
        let only = parent_only || node.modifier == Modifier::Only;
        let skip = parent_skip || node.modifier == Modifier::Skip;

        let mut chain = parent_chain.to_vec();
        if !is_root {
            chain.push(node.title.clone());
        }

        let mut items = Vec::new();
        for child in &node.children {
            match child {
                Node::Test(test) => {
                    if self.only_mode && !only && test.modifier != Modifier::Only {
                        continue;
                    }
                    items.push(Item::Test(PlannedTest {
                        node: test.clone(),
                        skip: skip || test.modifier == Modifier::Skip,
                    }));
                }
                Node::Describe(describe) => {
                    if let Some(scope) = self.scope(describe, &chain, only, skip, false) {
                        items.push(Item::Scope(scope));
                    }
                }
            }
        }

        if items.is_empty() && !is_root {
            return None;
        }

        let runnable = items.iter().any(|item| match item {
            Item::Test(test) => !test.skip,
            Item::Scope(scope) => scope.runnable,
        });

        Some(Scope {
            title: node.title.clone(),
            chain,
            hooks: node.hooks.clone(),
            items,
            runnable,
            is_root,
        })
    }
}

impl Scope {
    /// Every test below this scope, depth first, with the chain it lives under
    pub fn descendant_tests(&self) -> Vec<(&[String], &PlannedTest)> {
        let mut tests = Vec::new();
        self.collect_tests(&mut tests);
        tests
    }

    fn collect_tests<'a>(&'a self, tests: &mut Vec<(&'a [String], &'a PlannedTest)>) {
        for item in &self.items {
            match item {
                Item::Test(test) => tests.push((self.chain.as_slice(), test)),
                Item::Scope(scope) => scope.collect_tests(tests),
            }
        }
    }

    /// Number of tests that will execute if nothing fails or cancels
    pub fn runnable_count(&self) -> usize {
        self.descendant_tests()
            .iter()
            .filter(|(_, test)| !test.skip)
            .count()
    }
}
