//! Branch Runner
//!
//! Drives branches from the tree through their hooks and steps, honoring
//! pause and stop between steps. One call to `run` either runs every branch
//! the tree hands out, or returns early parked on a pause.

use chrono::Utc;

use crate::engine::console;
use crate::engine::errors::RunError;
use crate::engine::instance::RunInstance;
use crate::engine::step_runner::HookList;
use crate::model::types::Branch;

impl RunInstance {
    /// Run branches until the tree is exhausted, a pause parks the current
    /// branch, or a stop ends the run.
    pub async fn run(&mut self) -> Result<(), RunError> {
        if self.is_stopped {
            return Err(RunError::engine("cannot run a stopped run instance"));
        }

        let mut override_debug = false;
        let mut resuming = false;
        let mut current: Option<Branch>;
        if self.is_paused {
            // Resume where we paused; the next step ignores its debug gates
            self.clear_pause();
            override_debug = true;
            resuming = true;
            current = self.cur_branch.take();
        } else {
            current = self.tree.lock().unwrap().next_branch();
        }

        while let Some(mut branch) = current {
            if !resuming {
                branch.time_started = Some(Utc::now());
                self.store.reset_branch_scope(&self.runner.global_init);
                for i in 0..branch.before_every_branch.len() {
                    let ok = self.run_hook_step(&mut branch, HookList::BeforeBranch, i, None).await;
                    if self.is_stopped {
                        return self.end_stopped(branch);
                    }
                    if !ok {
                        // Branch is marked failed; fall through so the
                        // after-branch hooks still run
                        break;
                    }
                }
            }

            while !branch.is_complete() {
                let Some(idx) = branch.next_incomplete_step() else { break };
                self.run_step(&mut branch, idx, override_debug).await;
                override_debug = false;
                if self.is_stopped {
                    return self.end_stopped(branch);
                }
                if self.is_paused {
                    branch.elapsed = -1;
                    self.cur_branch = Some(branch);
                    return Ok(());
                }
            }

            for i in 0..branch.after_every_branch.len() {
                self.run_hook_step(&mut branch, HookList::AfterBranch, i, None).await;
                if self.is_stopped {
                    return self.end_stopped(branch);
                }
            }

            branch.finish_off();
            branch.finalize_time();
            if self.runner.console_output {
                console::print_branch_complete(&branch);
            }
            self.tree.lock().unwrap().finish_branch(branch);

            current = self.tree.lock().unwrap().next_branch();
            resuming = false;
        }

        Ok(())
    }

    fn end_stopped(&mut self, mut branch: Branch) -> Result<(), RunError> {
        branch.finalize_time();
        self.tree.lock().unwrap().finish_branch(branch);
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
