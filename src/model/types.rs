//! Core Data Model
//!
//! Steps, branches, and the variable value type threaded through the engine.
//! Steps and branches deserialize from plan files produced by the tree
//! builder; result fields are filled in by the engine and never come from a
//! plan.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer, Visitor};
use serde::Deserialize;

use crate::engine::errors::RunError;
use crate::tree::StepId;

/// A variable value. The test language is untyped beyond scalars; `Module`
/// is the one opaque kind, produced by the module loader and cached in the
/// persistent namespace by `imp`.
#[derive(Clone)]
pub enum Value {
    Str(String),
    Num(f64),
    Bool(bool),
    Module(ModuleHandle),
}

/// Handle to an external module loaded through `imp`.
#[derive(Clone)]
pub struct ModuleHandle {
    pub package: String,
    pub object: Arc<dyn Any + Send + Sync>,
}

impl ModuleHandle {
    pub fn new(package: impl Into<String>, object: Arc<dyn Any + Send + Sync>) -> Self {
        Self { package: package.into(), object }
    }
}

impl Value {
    /// A value is scalar if it can be substituted into step text.
    pub fn is_scalar(&self) -> bool {
        !matches!(self, Value::Module(_))
    }

    /// Human-readable type name, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::Num(_) => "number",
            Value::Bool(_) => "boolean",
            Value::Module(_) => "module",
        }
    }

    /// The string form used for substitution and logging. Whole numbers
    /// render without a trailing `.0` so `5` stays `5`.
    pub fn as_display_string(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            Value::Num(n) => format_num(*n),
            Value::Bool(b) => b.to_string(),
            Value::Module(m) => format!("[module {}]", m.package),
        }
    }

    /// Truthiness for expression-block conditions.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Str(s) => !s.is_empty(),
            Value::Num(n) => *n != 0.0,
            Value::Bool(b) => *b,
            Value::Module(_) => true,
        }
    }
}

fn format_num(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "Str({:?})", s),
            Value::Num(n) => write!(f, "Num({})", n),
            Value::Bool(b) => write!(f, "Bool({})", b),
            Value::Module(m) => write!(f, "Module({})", m.package),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Num(a), Value::Num(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Module(a), Value::Module(b)) => Arc::ptr_eq(&a.object, &b.object),
            _ => false,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Num(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ValueVisitor;

        impl<'de> Visitor<'de> for ValueVisitor {
            type Value = Value;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a string, number, or boolean")
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> Result<Value, E> {
                Ok(Value::Bool(v))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Value, E> {
                Ok(Value::Num(v as f64))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Value, E> {
                Ok(Value::Num(v as f64))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Value, E> {
                Ok(Value::Num(v))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Value, E> {
                Ok(Value::Str(v.to_string()))
            }

            fn visit_string<E: de::Error>(self, v: String) -> Result<Value, E> {
                Ok(Value::Str(v))
            }
        }

        deserializer.deserialize_any(ValueVisitor)
    }
}

/// One variable assignment carried by a step: `{name}='value'` (global) or
/// `{{name}}='value'` (local).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VarBeingSet {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub is_local: bool,
}

/// Outcome of one executed step.
///
/// `Passed` carries the synthesized error for the one case where a step
/// passes while it was expected to fail; every other pass carries `None`.
#[derive(Debug, Clone)]
pub enum StepOutcome {
    Passed { error: Option<RunError> },
    Failed { error: RunError },
    Skipped,
}

impl StepOutcome {
    pub fn passed() -> Self {
        StepOutcome::Passed { error: None }
    }

    /// The error attached to this outcome, if any.
    pub fn error(&self) -> Option<&RunError> {
        match self {
            StepOutcome::Passed { error } => error.as_ref(),
            StepOutcome::Failed { error } => Some(error),
            StepOutcome::Skipped => None,
        }
    }
}

fn default_elapsed() -> i64 {
    -1
}

/// A single unit of execution within a branch.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Step {
    // ---- Identity ----
    pub filename: Option<String>,
    pub line_number: u32,
    /// Raw source line.
    pub line: String,
    /// Canonical step text.
    pub text: String,
    /// Indent depth within the tree.
    pub branch_indents: u32,

    // ---- Classification ----
    pub is_function_call: bool,
    pub is_hook: bool,
    pub is_packaged: bool,
    pub is_before_debug: bool,
    pub is_after_debug: bool,
    pub is_expected_fail: bool,

    // ---- Body ----
    pub code_block: Option<String>,
    pub function_declaration_text: Option<String>,
    /// Arena index of the tree node this branch step was cloned from.
    pub origin: Option<StepId>,
    pub vars_being_set: Vec<VarBeingSet>,

    // ---- Results (engine-owned) ----
    #[serde(skip)]
    pub outcome: Option<StepOutcome>,
    #[serde(skip)]
    pub as_expected: Option<bool>,
    #[serde(skip)]
    pub log: Vec<String>,
    #[serde(skip)]
    pub time_started: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub time_ended: Option<DateTime<Utc>>,
    /// Milliseconds; -1 until the step completes.
    #[serde(skip, default = "default_elapsed")]
    pub elapsed: i64,
}

impl Default for Step {
    fn default() -> Self {
        Self {
            filename: None,
            line_number: 0,
            line: String::new(),
            text: String::new(),
            branch_indents: 0,
            is_function_call: false,
            is_hook: false,
            is_packaged: false,
            is_before_debug: false,
            is_after_debug: false,
            is_expected_fail: false,
            code_block: None,
            function_declaration_text: None,
            origin: None,
            vars_being_set: Vec::new(),
            outcome: None,
            as_expected: None,
            log: Vec::new(),
            time_started: None,
            time_ended: None,
            elapsed: -1,
        }
    }
}

impl Step {
    /// A bare step with the given canonical text.
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        Self { line: text.clone(), text, ..Default::default() }
    }

    pub fn has_code_block(&self) -> bool {
        self.code_block.is_some()
    }

    pub fn is_passed(&self) -> bool {
        matches!(self.outcome, Some(StepOutcome::Passed { .. }))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, Some(StepOutcome::Failed { .. }))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.outcome, Some(StepOutcome::Skipped))
    }

    pub fn is_complete(&self) -> bool {
        self.outcome.is_some()
    }

    /// The error recorded on this step, if any.
    pub fn error(&self) -> Option<&RunError> {
        self.outcome.as_ref().and_then(|o| o.error())
    }
}

/// Outcome of a whole branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchOutcome {
    Passed,
    Failed,
    Skipped,
}

/// A linearized sequence of steps with its hook sequences.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Branch {
    pub steps: Vec<Step>,
    pub before_every_branch: Vec<Step>,
    pub after_every_branch: Vec<Step>,
    pub before_every_step: Vec<Step>,
    pub after_every_step: Vec<Step>,

    // ---- Results (engine-owned) ----
    #[serde(skip)]
    pub outcome: Option<BranchOutcome>,
    #[serde(skip)]
    pub passed_last_time: bool,
    #[serde(skip)]
    pub error: Option<RunError>,
    #[serde(skip)]
    pub log: Vec<String>,
    #[serde(skip)]
    pub time_started: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub time_ended: Option<DateTime<Utc>>,
    /// Milliseconds; -1 once the branch has paused (elapsed is then never
    /// finalized).
    #[serde(skip)]
    pub elapsed: i64,
}

impl Default for Branch {
    fn default() -> Self {
        Self {
            steps: Vec::new(),
            before_every_branch: Vec::new(),
            after_every_branch: Vec::new(),
            before_every_step: Vec::new(),
            after_every_step: Vec::new(),
            outcome: None,
            passed_last_time: false,
            error: None,
            log: Vec::new(),
            time_started: None,
            time_ended: None,
            elapsed: 0,
        }
    }
}

impl Branch {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps, ..Default::default() }
    }

    pub fn is_passed(&self) -> bool {
        matches!(self.outcome, Some(BranchOutcome::Passed))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, Some(BranchOutcome::Failed))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.outcome, Some(BranchOutcome::Skipped))
    }

    /// A branch is complete once exactly one of passed/failed/skipped or
    /// `passed_last_time` is set.
    pub fn is_complete(&self) -> bool {
        self.outcome.is_some() || self.passed_last_time
    }

    /// Index of the next step that has not yet finished, if any.
    pub fn next_incomplete_step(&self) -> Option<usize> {
        self.steps.iter().position(|s| !s.is_complete())
    }

    /// Record an outcome on the branch. The outcome and the error are each
    /// set at most once; the first setter wins.
    pub fn mark(&mut self, outcome: BranchOutcome, error: Option<RunError>) {
        if self.outcome.is_none() {
            self.outcome = Some(outcome);
        }
        if self.error.is_none() {
            self.error = error;
        }
    }

    /// Stamp the end time. Elapsed is finalized only when the branch never
    /// paused (the -1 sentinel marks a pause).
    pub fn finalize_time(&mut self) {
        let ended = Utc::now();
        self.time_ended = Some(ended);
        if self.elapsed != -1 {
            if let Some(started) = self.time_started {
                self.elapsed = ended.signed_duration_since(started).num_milliseconds();
            }
        }
    }

    /// Resolve the branch outcome from its steps, for branches that ran to
    /// the end without being finished early.
    pub fn finish_off(&mut self) {
        if self.is_complete() {
            return;
        }
        let any_failed = self.steps.iter().any(|s| s.is_failed());
        let outcome = if any_failed { BranchOutcome::Failed } else { BranchOutcome::Passed };
        self.mark(outcome, None);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_display_strings() {
        assert_eq!(Value::Str("hi".into()).as_display_string(), "hi");
        assert_eq!(Value::Num(5.0).as_display_string(), "5");
        assert_eq!(Value::Num(5.5).as_display_string(), "5.5");
        assert_eq!(Value::Bool(true).as_display_string(), "true");
    }

    #[test]
    fn test_value_scalar() {
        assert!(Value::Str("x".into()).is_scalar());
        assert!(Value::Num(1.0).is_scalar());
        assert!(Value::Bool(false).is_scalar());
        let m = Value::Module(ModuleHandle::new("pkg", Arc::new(())));
        assert!(!m.is_scalar());
    }

    #[test]
    fn test_value_deserialize() {
        let v: Value = serde_json::from_str("\"hello\"").unwrap();
        assert_eq!(v, Value::Str("hello".into()));
        let v: Value = serde_json::from_str("42").unwrap();
        assert_eq!(v, Value::Num(42.0));
        let v: Value = serde_json::from_str("true").unwrap();
        assert_eq!(v, Value::Bool(true));
    }

    #[test]
    fn test_step_deserialize_defaults() {
        let step: Step = serde_json::from_str(
            r#"{"text": "say hi", "lineNumber": 3, "branchIndents": 1}"#,
        )
        .unwrap();
        assert_eq!(step.text, "say hi");
        assert_eq!(step.line_number, 3);
        assert_eq!(step.branch_indents, 1);
        assert!(!step.is_function_call);
        assert!(step.outcome.is_none());
        assert_eq!(step.elapsed, -1);
    }

    #[test]
    fn test_branch_completeness() {
        let mut branch = Branch::new(vec![Step::new("a"), Step::new("b")]);
        assert!(!branch.is_complete());
        assert_eq!(branch.next_incomplete_step(), Some(0));

        branch.steps[0].outcome = Some(StepOutcome::passed());
        assert_eq!(branch.next_incomplete_step(), Some(1));

        branch.steps[1].outcome = Some(StepOutcome::Skipped);
        assert_eq!(branch.next_incomplete_step(), None);

        branch.finish_off();
        assert!(branch.is_passed());
    }

    #[test]
    fn test_branch_error_first_setter_wins() {
        let mut branch = Branch::new(vec![]);
        branch.mark(BranchOutcome::Failed, Some(RunError::code_block("first")));
        branch.mark(BranchOutcome::Passed, Some(RunError::code_block("second")));
        assert!(branch.is_failed());
        assert_eq!(branch.error.as_ref().unwrap().message, "first");
    }

    #[test]
    fn test_finish_off_failed_when_any_step_failed() {
        let mut branch = Branch::new(vec![Step::new("a"), Step::new("b")]);
        branch.steps[0].outcome = Some(StepOutcome::passed());
        branch.steps[1].outcome = Some(StepOutcome::Failed { error: RunError::code_block("boom") });
        branch.finish_off();
        assert!(branch.is_failed());
    }
}
