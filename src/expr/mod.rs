//! Expression Blocks
//!
//! The embedded interpreter for user expression blocks attached to steps and
//! hooks. The language is a small statement list: literals, block-local
//! bindings, arithmetic/comparison/logic operators, `return`,
//! `throw [continue]`, and calls into the fixed helper surface (`log`,
//! `getLocal`/`setLocal` and friends, `getStepText`, `imp`).
//!
//! Line numbers are counted from the step's own line in its source file, so
//! any error inside a block reports the line the user actually wrote. Errors
//! carry a synthesized stack whose frames are named after the block
//! (`CodeBlock_for_<name>`), which the step runner's error filling recognizes.

pub mod eval;
pub mod lexer;
pub mod parser;

pub use eval::{evaluate, evaluate_async, CodeBlockCtx};

use thiserror::Error;

/// An error raised while lexing, parsing, or evaluating an expression block.
/// `line` is absolute within the block's source file.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct EvalError {
    pub message: String,
    pub line: u32,
    /// Set by `throw continue`: the failure should not end the branch.
    pub continue_: bool,
    /// Synthesized stack; filled once at the evaluation boundary.
    pub stack: Option<String>,
}

impl EvalError {
    pub fn new(message: impl Into<String>, line: u32) -> Self {
        Self { message: message.into(), line, continue_: false, stack: None }
    }
}

/// `func_name` with whitespace collapsed to `_` and every other
/// non-identifier character removed.
pub fn sanitize_func_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '$')
        .collect()
}

/// The name of the synthesized stack frame for a block.
pub fn frame_name(func_name: Option<&str>) -> String {
    match func_name {
        Some(name) => format!("CodeBlock_for_{}", sanitize_func_name(name)),
        None => "CodeBlock".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_func_name() {
        assert_eq!(sanitize_func_name("Open the   home page"), "Open_the_home_page");
        assert_eq!(sanitize_func_name("Click 'Sign in'"), "Click_Sign_in");
        assert_eq!(sanitize_func_name("Verify {x} > 5"), "Verify_x__5");
    }

    #[test]
    fn test_frame_name() {
        assert_eq!(frame_name(Some("Do thing")), "CodeBlock_for_Do_thing");
        assert_eq!(frame_name(None), "CodeBlock");
    }
}
