//! tread - a branch-at-a-time execution engine for natural-language test
//! plans.
//!
//! A plan is parsed and branchified elsewhere into a tree of steps; this
//! crate walks the tree one branch at a time, runs each step (optionally
//! with an embedded expression block), threads variable state across steps,
//! reports pass/fail with precise error provenance, and supports
//! pause/resume/step/skip/inject for debugger-style workflows.

pub mod engine;
pub mod expr;
pub mod loader;
pub mod model;
pub mod runner;
pub mod tree;

pub use engine::{RunError, RunErrorKind, RunInstance, RunLimits, Scope};
pub use loader::{LoadError, ModuleLoader, NullLoader, StaticLoader};
pub use model::plan::{Plan, PlanError};
pub use model::types::{Branch, BranchOutcome, Step, StepOutcome, Value, VarBeingSet};
pub use runner::Runner;
pub use tree::{StepId, Tree, TreeStep};
