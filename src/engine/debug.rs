//! Debug Controller
//!
//! Operations on a paused instance: single-step, skip, re-run the previous
//! step, inject an ad-hoc step, and stop. All of them share the paused
//! branch's environment and cursor and are only valid while paused.

use crate::engine::console;
use crate::engine::errors::RunError;
use crate::engine::instance::RunInstance;
use crate::engine::step_runner::HookList;
use crate::model::types::{Branch, Step};

impl RunInstance {
    fn require_paused(&self) -> Result<(), RunError> {
        if !self.is_paused {
            return Err(RunError::engine("the run instance is not paused"));
        }
        Ok(())
    }

    /// Run the next not-yet-complete step with debug gates overridden, then
    /// pause again. Returns true once the branch has no step left (the
    /// branch is then finished off).
    pub async fn run_one_step(&mut self) -> Result<bool, RunError> {
        self.require_paused()?;
        let Some(mut branch) = self.cur_branch.take() else {
            return Ok(true);
        };
        match branch.next_incomplete_step() {
            Some(idx) => {
                self.run_step(&mut branch, idx, true).await;
                self.try_pause();
                self.cur_branch = Some(branch);
                Ok(false)
            }
            None => {
                self.finish_paused_branch(branch).await;
                Ok(true)
            }
        }
    }

    /// Mark the next not-yet-complete step skipped without running it.
    /// Returns true once the branch has no step left.
    pub async fn skip_one_step(&mut self) -> Result<bool, RunError> {
        self.require_paused()?;
        let Some(mut branch) = self.cur_branch.take() else {
            return Ok(true);
        };
        match branch.next_incomplete_step() {
            Some(idx) => {
                self.tree.lock().unwrap().mark_step_skipped(&mut branch, idx);
                self.try_pause();
                self.cur_branch = Some(branch);
                Ok(false)
            }
            None => {
                self.finish_paused_branch(branch).await;
                Ok(true)
            }
        }
    }

    /// Re-run the step just before the cursor with debug gates overridden.
    /// The cursor does not move.
    pub async fn run_last_step(&mut self) -> Result<(), RunError> {
        self.require_paused()?;
        let Some(mut branch) = self.cur_branch.take() else {
            return Err(RunError::engine("no branch to re-run a step of"));
        };
        let idx = match branch.next_incomplete_step() {
            Some(0) => None,
            Some(i) => Some(i - 1),
            None => branch.steps.len().checked_sub(1),
        };
        if let Some(i) = idx {
            self.run_step(&mut branch, i, true).await;
            self.try_pause();
        }
        self.cur_branch = Some(branch);
        Ok(())
    }

    /// Branchify `step` against the steps already ran (so function calls
    /// seen earlier resolve), run the synthesized branch until a step fails
    /// or it finishes, and pause again. Returns the synthesized branch.
    pub async fn inject_step(&mut self, step: Step) -> Result<Branch, RunError> {
        self.require_paused()?;
        let mut synth = self.tree.lock().unwrap().branchify(step, &self.steps_ran);
        for idx in 0..synth.steps.len() {
            self.run_step(&mut synth, idx, true).await;
            if synth.steps[idx].is_failed() {
                break;
            }
        }
        self.try_pause();
        Ok(synth)
    }

    /// Terminal, cooperative stop. The current branch's elapsed is
    /// finalized; nothing further is marked.
    pub fn stop(&mut self) {
        self.is_stopped = true;
        if let Some(branch) = &mut self.cur_branch {
            branch.finalize_time();
        }
    }

    async fn finish_paused_branch(&mut self, mut branch: Branch) {
        for i in 0..branch.after_every_branch.len() {
            self.run_hook_step(&mut branch, HookList::AfterBranch, i, None).await;
            if self.is_stopped {
                break;
            }
        }
        branch.finish_off();
        branch.finalize_time();
        if self.runner.console_output {
            console::print_branch_complete(&branch);
        }
        self.tree.lock().unwrap().finish_branch(branch);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::value_store::Scope;
    use crate::model::types::{Value, VarBeingSet};
    use crate::runner::Runner;
    use crate::tree::Tree;
    use std::sync::{Arc, Mutex};

    fn setter(name: &str, value: &str, is_local: bool) -> VarBeingSet {
        VarBeingSet { name: name.into(), value: value.into(), is_local }
    }

    fn paused_instance(branch: Branch) -> RunInstance {
        let tree = Arc::new(Mutex::new(Tree::new(vec![], vec![branch])));
        let runner = Runner::new().with_pause_on_fail(true);
        RunInstance::new(Arc::new(runner), tree)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_pause_on_fail_then_step_through() {
        // S5: step 1 throws with pause_on_fail; step 2 runs via run_one_step
        let mut a = Step::new("boom");
        a.code_block = Some("throw 'x'".into());
        let b = Step::new("fine");
        let mut inst = paused_instance(Branch::new(vec![a, b]));

        inst.run().await.unwrap();

        assert!(inst.is_paused());
        {
            let branch = inst.cur_branch.as_ref().unwrap();
            assert!(branch.steps[0].is_failed());
            // pause_on_fail means the failure did not finish the branch
            assert!(!branch.is_complete());
            assert!(branch.steps[1].outcome.is_none());
            assert_eq!(branch.elapsed, -1);
        }

        let done = inst.run_one_step().await.unwrap();
        assert!(!done);
        assert!(inst.is_paused());
        assert!(inst.cur_branch.as_ref().unwrap().steps[1].is_passed());

        let done = inst.run_one_step().await.unwrap();
        assert!(done);
        assert_eq!(inst.tree.lock().unwrap().done.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_inject_step() {
        // S6: inject `{{z}}='abc'` into a paused instance
        let mut a = Step::new("~ first");
        a.is_before_debug = true;
        let mut inst = paused_instance(Branch::new(vec![a, Step::new("second")]));

        inst.run().await.unwrap();
        assert!(inst.is_paused());
        let ran_before = inst.steps_ran.len();

        let mut injected = Step::new("{{z}}='abc'");
        injected.vars_being_set.push(setter("z", "'abc'", true));
        let synth = inst.inject_step(injected).await.unwrap();

        assert_eq!(synth.steps.len(), 1);
        assert!(synth.steps[0].is_passed());
        assert_eq!(inst.store.get(Scope::Local, "z"), Some(Value::Str("abc".into())));
        assert!(inst.is_paused());
        assert_eq!(inst.steps_ran.len(), ran_before + 1);
        // The paused branch is untouched
        assert!(inst.cur_branch.as_ref().unwrap().steps[0].outcome.is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_skip_one_step() {
        let mut a = Step::new("~ skip me");
        a.is_before_debug = true;
        let mut b = Step::new("then run me");
        b.code_block = Some("setGlobal('ran', true)".into());
        let mut inst = paused_instance(Branch::new(vec![a, b]));

        inst.run().await.unwrap();
        assert!(inst.is_paused());

        let done = inst.skip_one_step().await.unwrap();
        assert!(!done);
        assert!(inst.cur_branch.as_ref().unwrap().steps[0].is_skipped());

        let done = inst.run_one_step().await.unwrap();
        assert!(!done);
        assert_eq!(inst.store.get(Scope::Global, "ran"), Some(Value::Bool(true)));

        assert!(inst.skip_one_step().await.unwrap());
        let tree = inst.tree.lock().unwrap();
        assert!(tree.done[0].is_passed());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_run_last_step_reruns() {
        let mut a = Step::new("~ counter");
        a.is_before_debug = true;
        a.code_block = Some("setPersistent('n', getPersistent('n') + 1)".into());
        let b = Step::new("after");
        let mut inst = paused_instance(Branch::new(vec![a, b]));
        inst.store.set(Scope::Persistent, "n", Value::Num(0.0));

        inst.run().await.unwrap();
        assert!(inst.is_paused());

        // Step over the debug gate, running the counter once
        inst.run_one_step().await.unwrap();
        assert_eq!(inst.store.get(Scope::Persistent, "n"), Some(Value::Num(1.0)));

        // Re-running the last step runs the counter again; cursor stays
        inst.run_last_step().await.unwrap();
        assert_eq!(inst.store.get(Scope::Persistent, "n"), Some(Value::Num(2.0)));
        assert_eq!(inst.cur_branch.as_ref().unwrap().next_incomplete_step(), Some(1));

        // The re-run appears once more in steps_ran
        let counter_runs =
            inst.steps_ran.iter().filter(|s| s.text == "~ counter").count();
        assert_eq!(counter_runs, 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_debug_ops_require_pause() {
        let mut inst = paused_instance(Branch::new(vec![Step::new("x")]));
        assert!(inst.run_one_step().await.is_err());
        assert!(inst.skip_one_step().await.is_err());
        assert!(inst.run_last_step().await.is_err());
        assert!(inst.inject_step(Step::new("y")).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stop_finalizes_branch_time() {
        let mut a = Step::new("~ gate");
        a.is_before_debug = true;
        let mut inst = paused_instance(Branch::new(vec![a]));
        inst.run().await.unwrap();
        assert!(inst.is_paused());

        inst.stop();
        assert!(inst.is_stopped());
        // A paused branch keeps the -1 sentinel
        assert_eq!(inst.cur_branch.as_ref().unwrap().elapsed, -1);
        assert!(inst.run().await.is_err());
    }
}
