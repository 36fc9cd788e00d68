//! Run Instance
//!
//! The per-worker test execution state machine. An instance owns its
//! environment, its `steps_ran` record, and the cursor over the branch it is
//! currently running; it shares the persistent namespace (through the
//! Runner) and the tree (behind a mutex, locked only at branch boundaries
//! and result marks) with its siblings.

use std::sync::{Arc, Mutex};

use crate::engine::value_store::ValueStore;
use crate::loader::{ModuleLoader, NullLoader, SyncLoaderAdapter};
use crate::model::types::{Branch, Step};
use crate::runner::Runner;
use crate::tree::Tree;

/// Limits that keep a run from spinning forever.
#[derive(Debug, Clone)]
pub struct RunLimits {
    /// Depth of chained variable resolution before `InfiniteVarLoop`.
    pub max_var_depth: usize,
}

impl Default for RunLimits {
    fn default() -> Self {
        Self { max_var_depth: 100 }
    }
}

pub struct RunInstance {
    pub(crate) runner: Arc<Runner>,
    pub(crate) tree: Arc<Mutex<Tree>>,
    pub(crate) store: ValueStore,
    /// Every step actually executed, in order, hooks and re-runs included.
    pub steps_ran: Vec<Step>,
    /// The branch being run, parked here while the instance is paused.
    pub(crate) cur_branch: Option<Branch>,
    pub(crate) is_paused: bool,
    pub(crate) is_stopped: bool,
    pub(crate) loader: Arc<dyn ModuleLoader>,
    pub(crate) limits: RunLimits,
}

impl RunInstance {
    pub fn new(runner: Arc<Runner>, tree: Arc<Mutex<Tree>>) -> Self {
        Self::with_loader(runner, tree, Arc::new(NullLoader))
    }

    pub fn with_loader(
        runner: Arc<Runner>,
        tree: Arc<Mutex<Tree>>,
        loader: Arc<dyn ModuleLoader>,
    ) -> Self {
        let store = ValueStore::new(runner.persistent.clone());
        Self {
            runner,
            tree,
            store,
            steps_ran: Vec::new(),
            cur_branch: None,
            is_paused: false,
            is_stopped: false,
            loader,
            limits: RunLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: RunLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn is_paused(&self) -> bool {
        self.is_paused
    }

    pub fn is_stopped(&self) -> bool {
        self.is_stopped
    }

    /// The instance's variable environment.
    pub fn store(&self) -> &ValueStore {
        &self.store
    }

    /// Pause if the tree allows it. Only single-branch runs may pause;
    /// anything else stays running.
    pub(crate) fn try_pause(&mut self) -> bool {
        if !self.tree.lock().unwrap().is_single_branch() {
            return false;
        }
        self.is_paused = true;
        self.runner.set_paused(true);
        true
    }

    pub(crate) fn clear_pause(&mut self) {
        self.is_paused = false;
        self.runner.set_paused(false);
    }

    /// Sync view of the module loader for synchronous evaluation paths.
    pub(crate) fn sync_loader(&self) -> SyncLoaderAdapter {
        SyncLoaderAdapter::new(self.loader.clone(), tokio::runtime::Handle::current())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::types::Branch;

    fn instance_with_branches(n: usize) -> RunInstance {
        let branches = (0..n).map(|_| Branch::new(vec![Step::new("x")])).collect();
        let tree = Arc::new(Mutex::new(Tree::new(vec![], branches)));
        RunInstance::new(Arc::new(Runner::new()), tree)
    }

    #[test]
    fn test_pause_only_for_single_branch_tree() {
        let mut single = instance_with_branches(1);
        assert!(single.try_pause());
        assert!(single.is_paused());
        assert!(single.runner.is_paused());

        let mut multi = instance_with_branches(2);
        assert!(!multi.try_pause());
        assert!(!multi.is_paused());
    }

    #[test]
    fn test_clear_pause_clears_mirror() {
        let mut inst = instance_with_branches(1);
        inst.try_pause();
        inst.clear_pause();
        assert!(!inst.is_paused());
        assert!(!inst.runner.is_paused());
    }
}
