//! Expression Block Evaluator
//!
//! Evaluates a parsed block against the variable environment. Before
//! evaluation, every visible environment variable whose display name is a
//! valid identifier (and not a reserved word) is materialized as a block
//! binding; other names are reachable only through `getLocal`/`getGlobal`/
//! `getPersistent`. Assignments inside a block bind locally and never write
//! the environment.

use std::collections::HashSet;

use indexmap::IndexMap;
use regex_lite::Regex;

use crate::engine::value_store::{display_name, Scope, ValueStore};
use crate::expr::parser::{parse, BinOp, Expr, Stmt, UnOp};
use crate::expr::{frame_name, EvalError};
use crate::loader::SyncModuleLoader;
use crate::model::types::Value;

lazy_static::lazy_static! {
    /// Names that may be materialized as block bindings.
    static ref IDENT_RE: Regex = Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*$").unwrap();

    /// Reserved words that are never materialized as bindings.
    static ref RESERVED_WORDS: HashSet<&'static str> = [
        "do", "if", "in", "for", "let", "new", "try", "var", "case", "else", "enum",
        "eval", "null", "this", "true", "void", "with", "await", "break", "catch",
        "class", "const", "false", "super", "throw", "while", "yield", "delete",
        "export", "import", "public", "return", "static", "switch", "typeof",
        "default", "extends", "finally", "package", "private", "continue",
        "debugger", "function", "arguments", "interface", "protected",
        "implements", "instanceof",
    ]
    .into_iter()
    .collect();
}

/// Everything a block needs from the engine while it runs.
pub struct CodeBlockCtx<'a> {
    pub store: &'a mut ValueStore,
    pub step_text: &'a str,
    pub log: &'a mut Vec<String>,
    pub loader: &'a dyn SyncModuleLoader,
}

/// Evaluate a block synchronously and return its final value.
pub fn evaluate(
    code: &str,
    func_name: Option<&str>,
    line_number: u32,
    ctx: &mut CodeBlockCtx<'_>,
) -> Result<Value, EvalError> {
    evaluate_inner(code, line_number, ctx).map_err(|mut e| {
        if e.stack.is_none() {
            e.stack = Some(format!("    at {} (<anonymous>:{})", frame_name(func_name), e.line));
        }
        e
    })
}

/// Async evaluation; resolves to the same value the sync mode returns. The
/// language itself has no suspension points, but helpers that call back into
/// the engine (such as `imp`) remain safe here.
pub async fn evaluate_async(
    code: &str,
    func_name: Option<&str>,
    line_number: u32,
    ctx: &mut CodeBlockCtx<'_>,
) -> Result<Value, EvalError> {
    evaluate(code, func_name, line_number, ctx)
}

fn evaluate_inner(
    code: &str,
    line_number: u32,
    ctx: &mut CodeBlockCtx<'_>,
) -> Result<Value, EvalError> {
    let stmts = parse(code, line_number)?;
    let mut bindings = materialize_bindings(ctx.store);

    let mut last = Value::Str(String::new());
    for stmt in &stmts {
        match stmt {
            Stmt::Expr(expr) => {
                last = eval_expr(expr, &bindings, ctx)?;
            }
            Stmt::Assign { name, expr } => {
                let value = eval_expr(expr, &bindings, ctx)?;
                bindings.insert(name.clone(), value.clone());
                last = value;
            }
            Stmt::Return { expr } => {
                return eval_expr(expr, &bindings, ctx);
            }
            Stmt::Throw { expr, continue_, line } => {
                let value = eval_expr(expr, &bindings, ctx)?;
                return Err(EvalError {
                    message: value.as_display_string(),
                    line: *line,
                    continue_: *continue_,
                    stack: None,
                });
            }
        }
    }
    Ok(last)
}

/// Bindings visible to the block: every environment variable whose display
/// name passes the identifier whitelist and is not reserved.
fn materialize_bindings(store: &ValueStore) -> IndexMap<String, Value> {
    let mut out = IndexMap::new();
    for (name, value) in store.bindings_snapshot() {
        if IDENT_RE.is_match(&name) && !RESERVED_WORDS.contains(name.as_str()) {
            out.insert(name, value);
        }
    }
    out
}

fn eval_expr(
    expr: &Expr,
    bindings: &IndexMap<String, Value>,
    ctx: &mut CodeBlockCtx<'_>,
) -> Result<Value, EvalError> {
    match expr {
        Expr::Str(s) => Ok(Value::Str(s.clone())),
        Expr::Num(n) => Ok(Value::Num(*n)),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Var { name, line } => bindings
            .get(name)
            .cloned()
            .ok_or_else(|| EvalError::new(format!("{} is not defined", name), *line)),
        Expr::Call { name, args, line } => {
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(eval_expr(arg, bindings, ctx)?);
            }
            call_helper(name, values, *line, ctx)
        }
        Expr::Unary { op, expr, line } => {
            let value = eval_expr(expr, bindings, ctx)?;
            match op {
                UnOp::Not => Ok(Value::Bool(!value.is_truthy())),
                UnOp::Neg => match value {
                    Value::Num(n) => Ok(Value::Num(-n)),
                    other => {
                        Err(EvalError::new(format!("cannot negate a {}", other.type_name()), *line))
                    }
                },
            }
        }
        Expr::Binary { op, lhs, rhs, line } => {
            let l = eval_expr(lhs, bindings, ctx)?;
            // Short-circuit before evaluating the right side
            match op {
                BinOp::And if !l.is_truthy() => return Ok(Value::Bool(false)),
                BinOp::Or if l.is_truthy() => return Ok(Value::Bool(true)),
                _ => {}
            }
            let r = eval_expr(rhs, bindings, ctx)?;
            eval_binary(*op, l, r, *line)
        }
    }
}

fn eval_binary(op: BinOp, l: Value, r: Value, line: u32) -> Result<Value, EvalError> {
    use Value::{Bool, Num, Str};
    match op {
        BinOp::Add => match (&l, &r) {
            (Num(a), Num(b)) => Ok(Num(a + b)),
            (Str(_), _) | (_, Str(_)) => {
                Ok(Str(format!("{}{}", l.as_display_string(), r.as_display_string())))
            }
            _ => Err(EvalError::new(
                format!("cannot add a {} and a {}", l.type_name(), r.type_name()),
                line,
            )),
        },
        BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => match (&l, &r) {
            (Num(a), Num(b)) => {
                let n = match op {
                    BinOp::Sub => a - b,
                    BinOp::Mul => a * b,
                    BinOp::Div => a / b,
                    BinOp::Mod => a % b,
                    _ => unreachable!(),
                };
                Ok(Num(n))
            }
            _ => Err(EvalError::new(
                format!("arithmetic requires numbers, got {} and {}", l.type_name(), r.type_name()),
                line,
            )),
        },
        BinOp::Eq => Ok(Bool(l == r)),
        BinOp::Ne => Ok(Bool(l != r)),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ord = match (&l, &r) {
                (Num(a), Num(b)) => a.partial_cmp(b),
                (Str(a), Str(b)) => Some(a.cmp(b)),
                _ => None,
            };
            let ord = ord.ok_or_else(|| {
                EvalError::new(
                    format!("cannot compare a {} with a {}", l.type_name(), r.type_name()),
                    line,
                )
            })?;
            let result = match op {
                BinOp::Lt => ord.is_lt(),
                BinOp::Le => ord.is_le(),
                BinOp::Gt => ord.is_gt(),
                BinOp::Ge => ord.is_ge(),
                _ => unreachable!(),
            };
            Ok(Bool(result))
        }
        BinOp::And => Ok(Bool(r.is_truthy())),
        BinOp::Or => Ok(Bool(r.is_truthy())),
    }
}

fn call_helper(
    name: &str,
    args: Vec<Value>,
    line: u32,
    ctx: &mut CodeBlockCtx<'_>,
) -> Result<Value, EvalError> {
    match name {
        "log" => {
            let [value] = take_args::<1>(name, args, line)?;
            ctx.log.push(value.as_display_string());
            Ok(value)
        }
        "getStepText" => {
            if !args.is_empty() {
                return Err(EvalError::new("getStepText takes no arguments", line));
            }
            Ok(Value::Str(ctx.step_text.to_string()))
        }
        "getPersistent" => get_var(ctx, Scope::Persistent, name, args, line),
        "getGlobal" => get_var(ctx, Scope::Global, name, args, line),
        "getLocal" => get_var(ctx, Scope::Local, name, args, line),
        "setPersistent" => set_var(ctx, Scope::Persistent, name, args, line),
        "setGlobal" => set_var(ctx, Scope::Global, name, args, line),
        "setLocal" => set_var(ctx, Scope::Local, name, args, line),
        "imp" => imp(ctx, args, line),
        _ => Err(EvalError::new(format!("{} is not a function", name), line)),
    }
}

fn take_args<const N: usize>(
    name: &str,
    args: Vec<Value>,
    line: u32,
) -> Result<[Value; N], EvalError> {
    args.try_into().map_err(|_| EvalError::new(format!("{} takes {} argument(s)", name, N), line))
}

fn arg_str(name: &str, value: &Value, line: u32) -> Result<String, EvalError> {
    match value {
        Value::Str(s) => Ok(s.clone()),
        other => {
            Err(EvalError::new(format!("{} requires a string name, got a {}", name, other.type_name()), line))
        }
    }
}

fn get_var(
    ctx: &mut CodeBlockCtx<'_>,
    scope: Scope,
    helper: &str,
    args: Vec<Value>,
    line: u32,
) -> Result<Value, EvalError> {
    let [name] = take_args::<1>(helper, args, line)?;
    let name = arg_str(helper, &name, line)?;
    ctx.store
        .get(scope, &name)
        .ok_or_else(|| EvalError::new(format!("the variable {{{}}} is not set", name), line))
}

fn set_var(
    ctx: &mut CodeBlockCtx<'_>,
    scope: Scope,
    helper: &str,
    args: Vec<Value>,
    line: u32,
) -> Result<Value, EvalError> {
    let [name, value] = take_args::<2>(helper, args, line)?;
    let name = arg_str(helper, &name, line)?;
    ctx.store.set(scope, &name, value.clone());
    Ok(value)
}

/// `imp(package[, varName])`: resolve an external module, caching it in the
/// persistent namespace. The exclusive lock is held across the
/// check-and-store so loading stays idempotent across instances.
fn imp(ctx: &mut CodeBlockCtx<'_>, args: Vec<Value>, line: u32) -> Result<Value, EvalError> {
    if args.is_empty() || args.len() > 2 {
        return Err(EvalError::new("imp takes 1 or 2 arguments", line));
    }
    let package = arg_str("imp", &args[0], line)?;
    let var_name = match args.get(1) {
        Some(v) => display_name(&arg_str("imp", v, line)?),
        None => derive_module_var_name(&package),
    };

    let mut persistent = ctx.store.persistent.write().unwrap();
    if let Some(value) = persistent.get(&var_name) {
        return Ok(value.clone());
    }
    let value = ctx
        .loader
        .load(&package)
        .map_err(|e| EvalError::new(e.to_string(), line))?;
    persistent.set(&var_name, value.clone());
    Ok(value)
}

/// Default variable name for a package: each `-x` becomes uppercase `X`,
/// remaining hyphens are stripped.
pub fn derive_module_var_name(package: &str) -> String {
    let mut out = String::new();
    let mut upper_next = false;
    for c in package.chars() {
        if c == '-' {
            upper_next = true;
            continue;
        }
        if upper_next {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::value_store::{shared_namespace, ValueStore};
    use crate::loader::StaticLoader;
    use crate::model::types::ModuleHandle;
    use std::sync::Arc;

    fn eval_with(store: &mut ValueStore, code: &str) -> Result<(Value, Vec<String>), EvalError> {
        let loader = StaticLoader::default();
        let mut log = Vec::new();
        let mut ctx =
            CodeBlockCtx { store, step_text: "the step", log: &mut log, loader: &loader };
        let value = evaluate(code, Some("My func"), 1, &mut ctx)?;
        Ok((value, log))
    }

    fn new_store() -> ValueStore {
        ValueStore::new(shared_namespace())
    }

    #[test]
    fn test_last_statement_is_block_value() {
        let mut store = new_store();
        let (v, _) = eval_with(&mut store, "1 + 1\n'done'").unwrap();
        assert_eq!(v, Value::Str("done".into()));
    }

    #[test]
    fn test_return_ends_block() {
        let mut store = new_store();
        let (v, _) = eval_with(&mut store, "return 2 * 21\n'not reached'").unwrap();
        assert_eq!(v, Value::Num(42.0));
    }

    #[test]
    fn test_log_helper() {
        let mut store = new_store();
        let (_, log) = eval_with(&mut store, "log('hello')\nlog(5)").unwrap();
        assert_eq!(log, vec!["hello", "5"]);
    }

    #[test]
    fn test_set_and_get_helpers() {
        let mut store = new_store();
        eval_with(&mut store, "setGlobal('count', 3)\nsetLocal('x', 'y')").unwrap();
        assert_eq!(store.get(Scope::Global, "count"), Some(Value::Num(3.0)));
        assert_eq!(store.get(Scope::Local, "x"), Some(Value::Str("y".into())));

        let (v, _) = eval_with(&mut store, "getGlobal('count') + 1").unwrap();
        assert_eq!(v, Value::Num(4.0));
    }

    #[test]
    fn test_get_step_text() {
        let mut store = new_store();
        let (v, _) = eval_with(&mut store, "getStepText()").unwrap();
        assert_eq!(v, Value::Str("the step".into()));
    }

    #[test]
    fn test_env_vars_materialized_as_bindings() {
        let mut store = new_store();
        store.set(Scope::Global, "userName", Value::Str("ada".into()));
        let (v, _) = eval_with(&mut store, "userName + '!'").unwrap();
        assert_eq!(v, Value::Str("ada!".into()));
    }

    #[test]
    fn test_non_identifier_name_not_materialized() {
        let mut store = new_store();
        store.set(Scope::Global, "user name", Value::Str("ada".into()));
        let err = eval_with(&mut store, "user").unwrap_err();
        assert!(err.message.contains("not defined"));
        // Still reachable through the getter
        let (v, _) = eval_with(&mut store, "getGlobal('user name')").unwrap();
        assert_eq!(v, Value::Str("ada".into()));
    }

    #[test]
    fn test_reserved_word_not_materialized() {
        let mut store = new_store();
        store.set(Scope::Global, "class", Value::Str("x".into()));
        // `class` never becomes a binding; the getter still works
        let (v, _) = eval_with(&mut store, "getGlobal('class')").unwrap();
        assert_eq!(v, Value::Str("x".into()));
    }

    #[test]
    fn test_local_shadows_global_binding() {
        let mut store = new_store();
        store.set(Scope::Global, "x", Value::Num(1.0));
        store.set(Scope::Local, "x", Value::Num(2.0));
        let (v, _) = eval_with(&mut store, "x").unwrap();
        assert_eq!(v, Value::Num(2.0));
    }

    #[test]
    fn test_block_assignment_does_not_write_env() {
        let mut store = new_store();
        store.set(Scope::Global, "x", Value::Num(1.0));
        eval_with(&mut store, "x = 99").unwrap();
        assert_eq!(store.get(Scope::Global, "x"), Some(Value::Num(1.0)));
    }

    #[test]
    fn test_throw_reports_absolute_line_and_stack() {
        let mut store = new_store();
        let loader = StaticLoader::default();
        let mut log = Vec::new();
        let mut ctx =
            CodeBlockCtx { store: &mut store, step_text: "", log: &mut log, loader: &loader };
        let err = evaluate("log('a')\nthrow 'boom'", Some("My func"), 10, &mut ctx).unwrap_err();
        assert_eq!(err.message, "boom");
        assert_eq!(err.line, 11);
        let stack = err.stack.unwrap();
        assert!(stack.contains("at CodeBlock_for_My_func (<anonymous>:11)"), "stack: {}", stack);
        assert!(!err.continue_);
    }

    #[test]
    fn test_throw_continue_sets_flag() {
        let mut store = new_store();
        let err = eval_with(&mut store, "throw continue 'soft'").unwrap_err();
        assert!(err.continue_);
        assert_eq!(err.message, "soft");
    }

    #[test]
    fn test_imp_loads_and_caches() {
        let mut store = new_store();
        let handle = ModuleHandle::new("web-driver", Arc::new(42u32));
        let loader = StaticLoader::default().with_package("web-driver", Value::Module(handle));
        let mut log = Vec::new();

        let mut ctx = CodeBlockCtx {
            store: &mut store,
            step_text: "",
            log: &mut log,
            loader: &loader,
        };
        let v = evaluate("imp('web-driver')", None, 1, &mut ctx).unwrap();
        assert!(matches!(v, Value::Module(_)));
        drop(ctx);

        // Cached under the camel-cased name in persistent
        assert!(store.get(Scope::Persistent, "webDriver").is_some());

        // A second imp returns the cached value even with an empty loader
        let empty = StaticLoader::default();
        let mut log = Vec::new();
        let mut ctx =
            CodeBlockCtx { store: &mut store, step_text: "", log: &mut log, loader: &empty };
        let again = evaluate("imp('web-driver')", None, 1, &mut ctx).unwrap();
        assert!(matches!(again, Value::Module(_)));
    }

    #[test]
    fn test_imp_explicit_var_name() {
        let mut store = new_store();
        let loader = StaticLoader::default().with_package("some-pkg", Value::Str("mod".into()));
        let mut log = Vec::new();
        let mut ctx =
            CodeBlockCtx { store: &mut store, step_text: "", log: &mut log, loader: &loader };
        evaluate("imp('some-pkg', 'myMod')", None, 1, &mut ctx).unwrap();
        drop(ctx);
        assert_eq!(store.get(Scope::Persistent, "myMod"), Some(Value::Str("mod".into())));
    }

    #[test]
    fn test_imp_unknown_package_errors() {
        let mut store = new_store();
        let err = eval_with(&mut store, "imp('nope')").unwrap_err();
        assert!(err.message.contains("nope"));
    }

    #[test]
    fn test_derive_module_var_name() {
        assert_eq!(derive_module_var_name("selenium-webdriver"), "seleniumWebdriver");
        assert_eq!(derive_module_var_name("plain"), "plain");
        assert_eq!(derive_module_var_name("a-b-c"), "aBC");
    }

    #[test]
    fn test_comparison_and_logic() {
        let mut store = new_store();
        let (v, _) = eval_with(&mut store, "1 < 2 && 'a' != 'b'").unwrap();
        assert_eq!(v, Value::Bool(true));
        let (v, _) = eval_with(&mut store, "false || 3 >= 4").unwrap();
        assert_eq!(v, Value::Bool(false));
    }

    #[test]
    fn test_arithmetic_type_error_reports_line() {
        let mut store = new_store();
        let err = eval_with(&mut store, "true * 2").unwrap_err();
        assert_eq!(err.line, 1);
        assert!(err.message.contains("numbers"));
    }
}
