//! Tree
//!
//! The branchified test tree the engine consumes: an arena of tree nodes
//! addressed by stable indices (cyclic step/declaration references are
//! expressed as indices, never owning pointers), a queue of runnable
//! branches, and the result-recording entry points.

use std::collections::VecDeque;

use serde::Deserialize;

use crate::model::types::{Branch, BranchOutcome, Step, StepOutcome};

/// Stable arena index of a tree node.
pub type StepId = usize;

/// Sentinel parent id for steps synthesized at runtime (debugger injection).
pub const ROOT: StepId = usize::MAX;

/// A node of the original tree. Branch steps keep an `origin` index pointing
/// back here; function-call nodes carry the index of their declaration so
/// error provenance can be rewritten to the declaration's location.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TreeStep {
    pub filename: Option<String>,
    pub line_number: u32,
    pub text: String,
    pub code_block: Option<String>,
    pub function_declaration_text: Option<String>,
    /// Arena index of the function declaration this node calls, if any.
    pub function_declaration: Option<StepId>,
}

impl Default for TreeStep {
    fn default() -> Self {
        Self {
            filename: None,
            line_number: 0,
            text: String::new(),
            code_block: None,
            function_declaration_text: None,
            function_declaration: None,
        }
    }
}

/// The tree: node arena plus the branch queue and completed branches.
#[derive(Debug, Default)]
pub struct Tree {
    nodes: Vec<TreeStep>,
    queue: VecDeque<Branch>,
    pub done: Vec<Branch>,
    total_branches: usize,
}

impl Tree {
    pub fn new(nodes: Vec<TreeStep>, branches: Vec<Branch>) -> Self {
        let total_branches = branches.len();
        Self { nodes, queue: branches.into(), done: Vec::new(), total_branches }
    }

    pub fn node(&self, id: StepId) -> Option<&TreeStep> {
        if id == ROOT {
            return None;
        }
        self.nodes.get(id)
    }

    /// Number of branches the tree was built with. Pausing is only legal for
    /// single-branch trees.
    pub fn total_branches(&self) -> usize {
        self.total_branches
    }

    pub fn is_single_branch(&self) -> bool {
        self.total_branches == 1
    }

    /// Hand out the next runnable branch. Ownership moves to the caller; the
    /// branch comes back through `finish_branch`.
    pub fn next_branch(&mut self) -> Option<Branch> {
        self.queue.pop_front()
    }

    /// Index of the next step of `branch` that has not completed.
    pub fn next_step(&self, branch: &Branch) -> Option<usize> {
        branch.next_incomplete_step()
    }

    /// Record a step outcome. When `finish_branch_now` is set the branch is
    /// marked failed with the step's error, which ends its step loop.
    pub fn mark_step(
        &mut self,
        branch: &mut Branch,
        idx: usize,
        outcome: StepOutcome,
        as_expected: bool,
        finish_branch_now: bool,
    ) {
        let error = outcome.error().cloned();
        {
            let step = &mut branch.steps[idx];
            step.outcome = Some(outcome);
            step.as_expected = Some(as_expected);
        }
        if finish_branch_now {
            branch.mark(BranchOutcome::Failed, error);
        }
    }

    pub fn mark_step_skipped(&mut self, branch: &mut Branch, idx: usize) {
        branch.steps[idx].outcome = Some(StepOutcome::Skipped);
    }

    /// Take a finished branch back and fold it into the run totals.
    pub fn finish_branch(&mut self, branch: Branch) {
        self.done.push(branch);
    }

    /// `(passed, failed, skipped)` over completed branches.
    pub fn counts(&self) -> (usize, usize, usize) {
        let mut passed = 0;
        let mut failed = 0;
        let mut skipped = 0;
        for b in &self.done {
            match b.outcome {
                Some(BranchOutcome::Passed) => passed += 1,
                Some(BranchOutcome::Failed) => failed += 1,
                Some(BranchOutcome::Skipped) => skipped += 1,
                None => {}
            }
        }
        (passed, failed, skipped)
    }

    /// Build a one-step branch for debugger injection. A function-call step
    /// without its own body resolves its code block against declarations
    /// already seen in the run context (`steps_ran`).
    pub fn branchify(&self, mut step: Step, context: &[Step]) -> Branch {
        if step.origin.is_none() {
            step.origin = Some(ROOT);
        }
        if step.is_function_call && step.code_block.is_none() {
            if let Some(decl_text) = step.function_declaration_text.clone() {
                let found = context.iter().find(|s| {
                    s.function_declaration_text.as_deref() == Some(decl_text.as_str())
                        && s.code_block.is_some()
                });
                if let Some(src) = found {
                    step.code_block = src.code_block.clone();
                    step.origin = src.origin.or(Some(ROOT));
                }
            }
        }
        Branch::new(vec![step])
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::errors::RunError;

    #[test]
    fn test_next_branch_order() {
        let mut tree = Tree::new(
            vec![],
            vec![Branch::new(vec![Step::new("a")]), Branch::new(vec![Step::new("b")])],
        );
        assert!(!tree.is_single_branch());
        assert_eq!(tree.next_branch().unwrap().steps[0].text, "a");
        assert_eq!(tree.next_branch().unwrap().steps[0].text, "b");
        assert!(tree.next_branch().is_none());
    }

    #[test]
    fn test_mark_step_finish_branch_now() {
        let mut tree = Tree::new(vec![], vec![]);
        let mut branch = Branch::new(vec![Step::new("a"), Step::new("b")]);
        tree.mark_step(
            &mut branch,
            0,
            StepOutcome::Failed { error: RunError::code_block("boom") },
            false,
            true,
        );
        assert!(branch.steps[0].is_failed());
        assert!(branch.is_failed());
        assert_eq!(branch.error.as_ref().unwrap().message, "boom");
    }

    #[test]
    fn test_mark_step_without_finishing() {
        let mut tree = Tree::new(vec![], vec![]);
        let mut branch = Branch::new(vec![Step::new("a"), Step::new("b")]);
        tree.mark_step(&mut branch, 0, StepOutcome::passed(), true, false);
        assert!(branch.steps[0].is_passed());
        assert!(!branch.is_complete());
        assert_eq!(tree.next_step(&branch), Some(1));
    }

    #[test]
    fn test_counts() {
        let mut tree = Tree::new(vec![], vec![]);
        let mut passed = Branch::new(vec![]);
        passed.mark(BranchOutcome::Passed, None);
        let mut failed = Branch::new(vec![]);
        failed.mark(BranchOutcome::Failed, None);
        tree.finish_branch(passed);
        tree.finish_branch(failed);
        assert_eq!(tree.counts(), (1, 1, 0));
    }

    #[test]
    fn test_branchify_resolves_declaration_from_context() {
        let tree = Tree::new(vec![], vec![]);
        let mut ran = Step::new("Greet 'Ada'");
        ran.is_function_call = true;
        ran.function_declaration_text = Some("Greet {name}".into());
        ran.code_block = Some("log(name)".into());
        ran.origin = Some(3);

        let mut injected = Step::new("Greet 'Bob'");
        injected.is_function_call = true;
        injected.function_declaration_text = Some("Greet {name}".into());

        let branch = tree.branchify(injected, &[ran]);
        assert_eq!(branch.steps.len(), 1);
        assert_eq!(branch.steps[0].code_block.as_deref(), Some("log(name)"));
        assert_eq!(branch.steps[0].origin, Some(3));
    }

    #[test]
    fn test_branchify_plain_step() {
        let tree = Tree::new(vec![], vec![]);
        let branch = tree.branchify(Step::new("just text"), &[]);
        assert_eq!(branch.steps[0].origin, Some(ROOT));
        assert!(branch.steps[0].code_block.is_none());
    }
}
