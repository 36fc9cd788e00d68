//! Variable Resolver
//!
//! Substitutes `{name}` (global) and `{{name}}` (local) references inside
//! step text. A reference resolves from the environment when already
//! assigned; otherwise the branch is scanned FORWARD from the current step
//! for the first later step that sets it — a later step can set what an
//! earlier one reads, which is a feature of the test language. Local lookups
//! stop scanning at the first step that dedents below the referencing step.

use regex_lite::Regex;

use crate::engine::errors::{RunError, RunErrorKind};
use crate::engine::instance::RunLimits;
use crate::engine::value_store::{canonicalize, Scope, ValueStore};
use crate::expr::eval::{evaluate, CodeBlockCtx};
use crate::loader::SyncModuleLoader;
use crate::model::types::{Step, Value};

lazy_static::lazy_static! {
    /// `{{name}}` (local) or `{name}` (global).
    static ref VAR_RE: Regex = Regex::new(r"\{\{([^{}]+)\}\}|\{([^{}]+)\}").unwrap();
}

/// Everything resolution needs: the environment, the branch's steps for the
/// forward scan, the log of the step being run, and the loader for code-block
/// setters that use `imp`.
pub struct VarCtx<'a> {
    pub store: &'a mut ValueStore,
    pub steps: &'a [Step],
    pub log: &'a mut Vec<String>,
    pub loader: &'a dyn SyncModuleLoader,
    pub limits: &'a RunLimits,
}

/// Replace every variable reference in `text`, resolving against the step at
/// `step_index`.
pub fn replace_vars(ctx: &mut VarCtx<'_>, text: &str, step_index: usize) -> Result<String, RunError> {
    replace_vars_depth(ctx, text, step_index, 0)
}

/// Resolve one variable by name against the step at `step_index`.
pub fn find_var_value(
    ctx: &mut VarCtx<'_>,
    name: &str,
    is_local: bool,
    step_index: usize,
) -> Result<Value, RunError> {
    find_var_value_depth(ctx, name, is_local, step_index, 0)
}

fn replace_vars_depth(
    ctx: &mut VarCtx<'_>,
    text: &str,
    step_index: usize,
    depth: usize,
) -> Result<String, RunError> {
    let mut out = String::new();
    let mut last = 0;
    let owned = text.to_string();
    for caps in VAR_RE.captures_iter(&owned) {
        let whole = caps.get(0).unwrap();
        let (name, is_local) = match (caps.get(1), caps.get(2)) {
            (Some(m), _) => (m.as_str().to_string(), true),
            (_, Some(m)) => (m.as_str().to_string(), false),
            _ => continue,
        };
        let value = find_var_value_depth(ctx, &name, is_local, step_index, depth)?;
        if !value.is_scalar() {
            return Err(RunError::var_type(&name, value.type_name()));
        }
        out.push_str(&owned[last..whole.start()]);
        out.push_str(&value.as_display_string());
        last = whole.end();
    }
    out.push_str(&owned[last..]);
    Ok(out)
}

fn find_var_value_depth(
    ctx: &mut VarCtx<'_>,
    name: &str,
    is_local: bool,
    step_index: usize,
    depth: usize,
) -> Result<Value, RunError> {
    if depth > ctx.limits.max_var_depth {
        return Err(RunError::infinite_var_loop(name));
    }

    // Already assigned in the relevant namespace
    let scope = if is_local { Scope::Local } else { Scope::Global };
    if let Some(value) = ctx.store.get(scope, name) {
        return Ok(value);
    }

    // Forward scan for a later setter
    let steps: &[Step] = ctx.steps;
    let origin_indents = steps[step_index].branch_indents;
    let key = canonicalize(name);
    for s in &steps[step_index..] {
        if is_local && s.branch_indents < origin_indents {
            // Local scope exits here
            break;
        }
        let setter = s
            .vars_being_set
            .iter()
            .find(|v| canonicalize(&v.name) == key && v.is_local == is_local);
        let Some(setter) = setter else { continue };

        let value = if let Some(code) = &s.code_block {
            let func_name = s.function_declaration_text.as_deref().unwrap_or(s.text.as_str());
            let mut cb = CodeBlockCtx {
                store: &mut *ctx.store,
                step_text: &s.text,
                log: &mut *ctx.log,
                loader: ctx.loader,
            };
            evaluate(code, Some(func_name), s.line_number, &mut cb)
                .map_err(|e| RunError::from_eval(e, RunErrorKind::CodeBlock))?
        } else {
            Value::Str(unescape(strip_quotes(&setter.value)))
        };

        // Chained definitions resolve against the original step
        return match value {
            Value::Str(text) => {
                replace_vars_depth(ctx, &text, step_index, depth + 1).map(Value::Str)
            }
            other => Ok(other),
        };
    }

    Err(RunError::var_not_set(name))
}

/// Strip one layer of surrounding `'…'`, `"…"`, or `[…]`.
pub fn strip_quotes(s: &str) -> &str {
    let t = s.trim();
    let bytes = t.as_bytes();
    if t.len() >= 2 {
        let matched = matches!(
            (bytes[0], bytes[t.len() - 1]),
            (b'\'', b'\'') | (b'"', b'"') | (b'[', b']')
        );
        if matched {
            return &t[1..t.len() - 1];
        }
    }
    t
}

/// Apply standard escape sequences.
pub fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('\\') => out.push('\\'),
            Some('\'') => out.push('\''),
            Some('"') => out.push('"'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

// ============================================================================
// Tests
// ============================================================================
