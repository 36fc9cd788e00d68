//! Run Errors
//!
//! Error type attached to steps and branches. Every error carries an
//! optional source location and an optional synthesized stack; `continue_`
//! is the attribute a user expression block sets with `throw continue` so a
//! failure does not end the branch.

use std::fmt;

use thiserror::Error;

/// The kind of failure recorded on a step or branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunErrorKind {
    /// A user expression block threw.
    CodeBlock,
    /// A variable was referenced but never assigned.
    VarNotSet,
    /// A variable resolved to a non-scalar value.
    VarTypeError,
    /// Recursive variable resolution exceeded the depth limit.
    InfiniteVarLoop,
    /// The step was expected to fail but passed.
    StepPassedButExpectedToFail,
    /// A hook's expression block threw.
    Hook,
    /// Engine misuse or an internal inconsistency.
    Engine,
}

impl fmt::Display for RunErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunErrorKind::CodeBlock => "code block error",
            RunErrorKind::VarNotSet => "variable not set",
            RunErrorKind::VarTypeError => "variable type error",
            RunErrorKind::InfiniteVarLoop => "infinite variable loop",
            RunErrorKind::StepPassedButExpectedToFail => "step passed but expected to fail",
            RunErrorKind::Hook => "hook error",
            RunErrorKind::Engine => "engine error",
        };
        f.write_str(s)
    }
}

/// An error produced while running a step, hook, or variable resolution.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct RunError {
    pub kind: RunErrorKind,
    pub message: String,
    pub filename: Option<String>,
    pub line_number: Option<u32>,
    /// Synthesized stack, one `    at CodeBlock… (<anonymous>:N)` frame per
    /// line.
    pub stack: Option<String>,
    /// When true, the failure does not end the branch.
    pub continue_: bool,
}

impl RunError {
    pub fn new(kind: RunErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            filename: None,
            line_number: None,
            stack: None,
            continue_: false,
        }
    }

    pub fn code_block(message: impl Into<String>) -> Self {
        Self::new(RunErrorKind::CodeBlock, message)
    }

    pub fn hook(message: impl Into<String>) -> Self {
        Self::new(RunErrorKind::Hook, message)
    }

    pub fn var_not_set(name: &str) -> Self {
        Self::new(
            RunErrorKind::VarNotSet,
            format!("The variable {{{}}} is never set, but is needed for this step", name),
        )
    }

    pub fn var_type(name: &str, type_name: &str) -> Self {
        Self::new(
            RunErrorKind::VarTypeError,
            format!(
                "The variable {{{}}} must be set to a string, number, or boolean, but is a {}",
                name, type_name
            ),
        )
    }

    pub fn infinite_var_loop(name: &str) -> Self {
        Self::new(
            RunErrorKind::InfiniteVarLoop,
            format!("Infinite loop detected amongst variable references involving {{{}}}", name),
        )
    }

    pub fn passed_but_expected_to_fail() -> Self {
        Self::new(
            RunErrorKind::StepPassedButExpectedToFail,
            "This step passed, but it was expected to fail",
        )
    }

    pub fn engine(message: impl Into<String>) -> Self {
        Self::new(RunErrorKind::Engine, message)
    }

    /// Lift an expression-block error. Location fields stay empty here; the
    /// step runner fills them from the step (and the stack frames override
    /// the line, see error filling in the step runner).
    pub fn from_eval(e: crate::expr::EvalError, kind: RunErrorKind) -> Self {
        Self {
            kind,
            message: e.message,
            filename: None,
            line_number: None,
            stack: e.stack,
            continue_: e.continue_,
        }
    }

    pub fn with_location(mut self, filename: Option<String>, line_number: u32) -> Self {
        self.filename = filename;
        self.line_number = Some(line_number);
        self
    }

    pub fn with_continue(mut self) -> Self {
        self.continue_ = true;
        self
    }

    /// `[file:line]`, or whatever part of the location is known.
    pub fn location_string(&self) -> String {
        match (&self.filename, self.line_number) {
            (Some(f), Some(l)) => format!("[{}:{}]", f, l),
            (Some(f), None) => format!("[{}]", f),
            (None, Some(l)) => format!("[line {}]", l),
            (None, None) => String::new(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_is_message() {
        let e = RunError::code_block("something broke");
        assert_eq!(e.to_string(), "something broke");
        assert_eq!(e.kind, RunErrorKind::CodeBlock);
    }

    #[test]
    fn test_var_not_set_message_names_var() {
        let e = RunError::var_not_set("username");
        assert!(e.message.contains("{username}"));
        assert_eq!(e.kind, RunErrorKind::VarNotSet);
    }

    #[test]
    fn test_location_string() {
        let e = RunError::code_block("x").with_location(Some("a.plan".into()), 12);
        assert_eq!(e.location_string(), "[a.plan:12]");
        let e = RunError::code_block("x");
        assert_eq!(e.location_string(), "");
    }

    #[test]
    fn test_with_continue() {
        let e = RunError::code_block("soft").with_continue();
        assert!(e.continue_);
    }
}
