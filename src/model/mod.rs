pub mod plan;
pub mod types;

pub use types::{Branch, BranchOutcome, Step, StepOutcome, Value, VarBeingSet};
