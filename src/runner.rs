//! Runner
//!
//! The thin handle a scheduler shares with its run instances: the persistent
//! namespace (shared by reference across instances), the seeds copied into
//! `global` at every branch start, and the run-wide flags.

use std::sync::atomic::{AtomicBool, Ordering};

use indexmap::IndexMap;

use crate::engine::value_store::{shared_namespace, SharedNamespace};
use crate::model::types::Value;

pub struct Runner {
    /// Shared across every instance owned by this runner.
    pub persistent: SharedNamespace,
    /// Copied into each instance's `global` namespace at branch start.
    pub global_init: IndexMap<String, Value>,
    /// Pause instead of ending the branch when a step fails.
    pub pause_on_fail: bool,
    /// Emit per-step console banners.
    pub console_output: bool,
    /// Write-through mirror of the instance pause state, for UIs.
    is_paused: AtomicBool,
}

impl Default for Runner {
    fn default() -> Self {
        Self {
            persistent: shared_namespace(),
            global_init: IndexMap::new(),
            pause_on_fail: false,
            console_output: false,
            is_paused: AtomicBool::new(false),
        }
    }
}

impl Runner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_global_init(mut self, name: impl Into<String>, value: Value) -> Self {
        self.global_init.insert(name.into(), value);
        self
    }

    pub fn with_pause_on_fail(mut self, pause_on_fail: bool) -> Self {
        self.pause_on_fail = pause_on_fail;
        self
    }

    pub fn with_console_output(mut self, console_output: bool) -> Self {
        self.console_output = console_output;
        self
    }

    pub fn is_paused(&self) -> bool {
        self.is_paused.load(Ordering::SeqCst)
    }

    pub(crate) fn set_paused(&self, paused: bool) {
        self.is_paused.store(paused, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pause_mirror() {
        let runner = Runner::new();
        assert!(!runner.is_paused());
        runner.set_paused(true);
        assert!(runner.is_paused());
    }

    #[test]
    fn test_builder_flags() {
        let runner = Runner::new()
            .with_pause_on_fail(true)
            .with_console_output(true)
            .with_global_init("env", Value::Str("staging".into()));
        assert!(runner.pause_on_fail);
        assert!(runner.console_output);
        assert_eq!(runner.global_init.get("env"), Some(&Value::Str("staging".into())));
    }
}
