//! Step Runner
//!
//! Executes one step: debug gates, hook chains, the indent-driven scope
//! transition, function-call input binding, variable assignments, the
//! embedded code block, result marking, and error filling with provenance
//! corrections.

use chrono::Utc;
use regex_lite::Regex;

use crate::engine::console;
use crate::engine::errors::{RunError, RunErrorKind};
use crate::engine::instance::RunInstance;
use crate::engine::value_store::Scope;
use crate::engine::var_resolver::{
    find_var_value, replace_vars, strip_quotes, unescape, VarCtx,
};
use crate::expr::eval::{evaluate_async, CodeBlockCtx};
use crate::model::types::{Branch, BranchOutcome, Step, StepOutcome, Value};

lazy_static::lazy_static! {
    /// Parameter tokens of a function declaration: `{name}` or `{{name}}`.
    static ref PARAM_RE: Regex = Regex::new(r"\{\{([^{}]+)\}\}|\{([^{}]+)\}").unwrap();

    /// Argument tokens of a function call: string literals, bracketed
    /// strings, or variable references.
    static ref FUNCTION_INPUT_RE: Regex =
        Regex::new(r#"('[^']*')|("[^"]*")|(\[[^\[\]]*\])|(\{\{[^{}]+\}\})|(\{[^{}]+\})"#).unwrap();

    /// A synthesized code-block stack frame; the captured number is the
    /// absolute source line.
    static ref STACK_LINE_RE: Regex = Regex::new(r"at CodeBlock[^\n]*<anonymous>:(\d+)").unwrap();
}

/// Which hook sequence of a branch to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookList {
    BeforeBranch,
    AfterBranch,
    BeforeStep,
    AfterStep,
}

impl RunInstance {
    /// Run the step at `branch.steps[idx]`. Pause and stop are signaled
    /// through the instance flags; results land on the step and branch.
    pub async fn run_step(&mut self, branch: &mut Branch, idx: usize, override_debug: bool) {
        // Before-debug gate: pause without recording anything
        if branch.steps[idx].is_before_debug && !override_debug && self.try_pause() {
            return;
        }

        {
            let step = &mut branch.steps[idx];
            step.time_started = Some(Utc::now());
            step.time_ended = None;
            step.elapsed = -1;
            step.outcome = None;
            step.as_expected = None;
        }
        if self.runner.console_output {
            console::print_step_start(&branch.steps[idx]);
        }

        // Before-every-step hooks; a failure stops the chain
        for h in 0..branch.before_every_step.len() {
            let ok = self.run_hook_step(branch, HookList::BeforeStep, h, Some(idx)).await;
            if self.is_stopped {
                return;
            }
            if !ok {
                break;
            }
        }

        let hook_failed = branch.steps[idx].is_failed();
        let mut error: Option<RunError> = None;
        let mut in_code_block = false;

        if !hook_failed {
            self.transition_scope(branch, idx);

            if branch.steps[idx].is_function_call {
                error = self.bind_function_inputs(branch, idx);
            }

            if error.is_none() {
                let step = &branch.steps[idx];
                if !step.is_function_call
                    && !step.has_code_block()
                    && !step.vars_being_set.is_empty()
                {
                    error = self.apply_assignments(branch, idx);
                }
            }

            if error.is_none() && branch.steps[idx].has_code_block() {
                if branch.steps[idx].is_function_call {
                    self.store.push_local_frame();
                }
                in_code_block = true;
                let evaluated = self.eval_step_code_block(branch, idx).await;
                if self.is_stopped {
                    return;
                }
                match evaluated {
                    Ok(value) => self.bind_return_value(branch, idx, value),
                    Err(e) => error = Some(e),
                }
            }
        }

        if self.is_stopped {
            return;
        }

        if !hook_failed {
            let mut error = error.map(|e| self.fill_step_error(e, &branch.steps[idx], in_code_block));
            let is_passed = error.is_none();
            {
                let step = &branch.steps[idx];
                if step.is_expected_fail && is_passed {
                    error = Some(
                        RunError::passed_but_expected_to_fail()
                            .with_location(step.filename.clone(), step.line_number),
                    );
                }
            }
            let is_expected_fail = branch.steps[idx].is_expected_fail;
            let as_expected = if is_expected_fail { !is_passed } else { is_passed };
            let finish_branch_now = match &error {
                Some(e) => !(e.continue_ || self.runner.pause_on_fail),
                None => false,
            };
            let outcome = if is_passed {
                StepOutcome::Passed { error }
            } else {
                StepOutcome::Failed { error: error.expect("failed step carries an error") }
            };
            self.tree.lock().unwrap().mark_step(branch, idx, outcome, as_expected, finish_branch_now);
        }

        // After-every-step hooks all run, even after a failure
        for h in 0..branch.after_every_step.len() {
            self.run_hook_step(branch, HookList::AfterStep, h, Some(idx)).await;
            if self.is_stopped {
                return;
            }
        }

        {
            let step = &branch.steps[idx];
            let passed_as_expected = step.is_passed() && step.as_expected == Some(true);
            if self.runner.pause_on_fail && !passed_as_expected {
                self.try_pause();
            }
        }

        {
            let step = &mut branch.steps[idx];
            let ended = Utc::now();
            step.time_ended = Some(ended);
            if let Some(started) = step.time_started {
                step.elapsed = ended.signed_duration_since(started).num_milliseconds();
            }
        }
        if self.runner.console_output {
            console::print_step_end(&branch.steps[idx]);
        }

        if branch.steps[idx].is_after_debug && !override_debug {
            self.try_pause();
        }

        self.steps_ran.push(branch.steps[idx].clone());
    }

    /// Adjust the local frame stack for the indent delta between the
    /// previous step and this one. A code-block function call pushed its own
    /// frame on entry, so stepping into its children must not push again,
    /// and stepping past it at equal indent pops the frame it left behind.
    fn transition_scope(&mut self, branch: &Branch, idx: usize) {
        if let Some(prev) = idx.checked_sub(1).map(|i| &branch.steps[i]) {
            let cur = branch.steps[idx].branch_indents;
            let prev_was_code_block_fn = prev.is_function_call && prev.has_code_block();
            if cur > prev.branch_indents {
                // Indents only ever go up by one; a code-block function call
                // already pushed the frame for this level
                if !prev_was_code_block_fn {
                    self.store.push_local_frame();
                }
            } else {
                // Leaving a code-block function call costs one extra pop for
                // the frame its code block pushed
                let mut pops = (prev.branch_indents - cur) as usize;
                if prev_was_code_block_fn {
                    pops += 1;
                }
                for _ in 0..pops {
                    self.store.pop_local_frame();
                }
            }
        }
        self.store.locals_passed_into_func.clear();
    }

    /// Stage the call's arguments into `locals_passed_into_func`, pairing
    /// them with the declaration's `{param}` tokens.
    fn bind_function_inputs(&mut self, branch: &mut Branch, idx: usize) -> Option<RunError> {
        let Some(decl_text) = branch.steps[idx].function_declaration_text.clone() else {
            return None;
        };
        let step_text = branch.steps[idx].text.clone();

        let params: Vec<String> = PARAM_RE
            .captures_iter(&decl_text)
            .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
            .map(|m| m.as_str().to_string())
            .collect();

        let mut args: Vec<String> =
            FUNCTION_INPUT_RE.find_iter(&step_text).map(|m| m.as_str().to_string()).collect();
        // A leading `{x} =` token belongs to the assignment target, not the call
        if !branch.steps[idx].vars_being_set.is_empty() && !args.is_empty() {
            args.remove(0);
        }

        if params.len() != args.len() {
            debug_assert_eq!(
                params.len(),
                args.len(),
                "function call inputs do not line up with declaration parameters"
            );
            return Some(RunError::engine(format!(
                "step `{}` passes {} input(s) into a function expecting {}",
                step_text.trim(),
                args.len(),
                params.len()
            )));
        }

        let mut log = std::mem::take(&mut branch.steps[idx].log);
        let loader = self.sync_loader();
        let mut failure = None;
        {
            let mut ctx = VarCtx {
                store: &mut self.store,
                steps: &branch.steps,
                log: &mut log,
                loader: &loader,
                limits: &self.limits,
            };
            for (param, arg) in params.iter().zip(&args) {
                match resolve_function_arg(&mut ctx, arg, idx) {
                    Ok(value) => {
                        ctx.log.push(format!(
                            "Function parameter {{{{{}}}}} is \"{}\"",
                            param,
                            value.as_display_string()
                        ));
                        ctx.store.locals_passed_into_func.set(param, value);
                    }
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }
        }
        branch.steps[idx].log = log;
        failure
    }

    /// Apply a pure assignment step's `vars_being_set`.
    fn apply_assignments(&mut self, branch: &mut Branch, idx: usize) -> Option<RunError> {
        let vars = branch.steps[idx].vars_being_set.clone();
        let mut log = std::mem::take(&mut branch.steps[idx].log);
        let loader = self.sync_loader();
        let mut failure = None;
        {
            let mut ctx = VarCtx {
                store: &mut self.store,
                steps: &branch.steps,
                log: &mut log,
                loader: &loader,
                limits: &self.limits,
            };
            for vbs in &vars {
                let stripped = strip_quotes(&vbs.value);
                match replace_vars(&mut ctx, stripped, idx) {
                    Ok(expanded) => {
                        let value = Value::Str(unescape(&expanded));
                        ctx.log.push(format!(
                            "Setting {} to \"{}\"",
                            var_brackets(&vbs.name, vbs.is_local),
                            value.as_display_string()
                        ));
                        let scope = if vbs.is_local { Scope::Local } else { Scope::Global };
                        ctx.store.set(scope, &vbs.name, value);
                    }
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }
        }
        branch.steps[idx].log = log;
        failure
    }

    async fn eval_step_code_block(
        &mut self,
        branch: &mut Branch,
        idx: usize,
    ) -> Result<Value, RunError> {
        let (code, func_name, line_number, step_text) = {
            let step = &branch.steps[idx];
            (
                step.code_block.clone().expect("caller checked has_code_block"),
                step.function_declaration_text.clone().unwrap_or_else(|| step.text.clone()),
                step.line_number,
                step.text.clone(),
            )
        };
        let mut log = std::mem::take(&mut branch.steps[idx].log);
        let loader = self.sync_loader();
        let result = {
            let mut ctx = CodeBlockCtx {
                store: &mut self.store,
                step_text: &step_text,
                log: &mut log,
                loader: &loader,
            };
            evaluate_async(&code, Some(&func_name), line_number, &mut ctx).await
        };
        branch.steps[idx].log = log;
        result.map_err(|e| RunError::from_eval(e, RunErrorKind::CodeBlock))
    }

    /// A code block's return value binds to the step's single assignment
    /// target, when there is exactly one.
    fn bind_return_value(&mut self, branch: &mut Branch, idx: usize, value: Value) {
        if branch.steps[idx].vars_being_set.len() != 1 {
            return;
        }
        let vbs = branch.steps[idx].vars_being_set[0].clone();
        let scope = if vbs.is_local { Scope::Local } else { Scope::Global };
        self.store.set(scope, &vbs.name, value.clone());
        branch.steps[idx].log.push(format!(
            "Setting {} to \"{}\"",
            var_brackets(&vbs.name, vbs.is_local),
            value.as_display_string()
        ));
    }

    /// Run one hook. On failure the error propagates to the target step (if
    /// given) or to the branch, never overwriting an error already recorded.
    /// Returns false on failure or stop.
    pub(crate) async fn run_hook_step(
        &mut self,
        branch: &mut Branch,
        list: HookList,
        hook_idx: usize,
        target_idx: Option<usize>,
    ) -> bool {
        let mut hook = match list {
            HookList::BeforeBranch => branch.before_every_branch[hook_idx].clone(),
            HookList::AfterBranch => branch.after_every_branch[hook_idx].clone(),
            HookList::BeforeStep => branch.before_every_step[hook_idx].clone(),
            HookList::AfterStep => branch.after_every_step[hook_idx].clone(),
        };
        let Some(code) = hook.code_block.clone() else {
            return true;
        };

        hook.time_started = Some(Utc::now());
        let step_text = hook.text.clone();
        let mut log = std::mem::take(&mut hook.log);
        let loader = self.sync_loader();
        let result = {
            let mut ctx = CodeBlockCtx {
                store: &mut self.store,
                step_text: &step_text,
                log: &mut log,
                loader: &loader,
            };
            evaluate_async(&code, Some(&step_text), hook.line_number, &mut ctx).await
        };
        hook.log = log;

        if self.is_stopped {
            // A stop during evaluation suppresses marking entirely
            return false;
        }

        let ok = match result {
            Ok(_) => {
                hook.outcome = Some(StepOutcome::passed());
                hook.as_expected = Some(true);
                true
            }
            Err(e) => {
                let err = RunError::from_eval(e, RunErrorKind::Hook);
                let err = self.fill_step_error(err, &hook, true);
                hook.outcome = Some(StepOutcome::Failed { error: err.clone() });
                hook.as_expected = Some(false);
                match target_idx {
                    Some(t) => {
                        let step = &mut branch.steps[t];
                        if step.error().is_none() {
                            let as_expected = step.is_expected_fail;
                            step.outcome = Some(StepOutcome::Failed { error: err });
                            step.as_expected = Some(as_expected);
                        }
                    }
                    None => branch.mark(BranchOutcome::Failed, Some(err)),
                }
                false
            }
        };

        let ended = Utc::now();
        hook.time_ended = Some(ended);
        if let Some(started) = hook.time_started {
            hook.elapsed = ended.signed_duration_since(started).num_milliseconds();
        }
        self.steps_ran.push(hook);
        ok
    }

    /// Attach provenance to an error. Pre-set locations are honored; a
    /// function-call step failing inside its declaration's code block points
    /// at the declaration; the last synthesized code-block stack frame
    /// overrides the line number.
    pub(crate) fn fill_step_error(
        &self,
        mut err: RunError,
        step: &Step,
        from_code_block: bool,
    ) -> RunError {
        if err.filename.is_none() && err.line_number.is_none() {
            let redirect =
                from_code_block && step.is_function_call && !step.is_hook && !step.is_packaged;
            let mut filled = false;
            if redirect {
                if let Some(origin) = step.origin {
                    let tree = self.tree.lock().unwrap();
                    let decl = tree
                        .node(origin)
                        .and_then(|node| node.function_declaration)
                        .and_then(|id| tree.node(id));
                    if let Some(decl) = decl {
                        err.filename = decl.filename.clone();
                        err.line_number = Some(decl.line_number);
                        filled = true;
                    }
                }
            }
            if !filled {
                err.filename = step.filename.clone();
                err.line_number = Some(step.line_number);
            }
        }

        if let Some(stack) = err.stack.clone() {
            let mut last = None;
            for caps in STACK_LINE_RE.captures_iter(&stack) {
                if let Some(n) = caps.get(1).and_then(|m| m.as_str().parse::<u32>().ok()) {
                    last = Some(n);
                }
            }
            if let Some(n) = last {
                err.line_number = Some(n);
            }
        }
        err
    }
}

fn var_brackets(name: &str, is_local: bool) -> String {
    if is_local {
        format!("{{{{{}}}}}", name)
    } else {
        format!("{{{}}}", name)
    }
}

/// Resolve one function-call argument token: a whole variable reference is
/// looked up, a whole string literal is stripped/expanded/unescaped, and
/// anything else passes through as-is.
fn resolve_function_arg(
    ctx: &mut VarCtx<'_>,
    token: &str,
    step_index: usize,
) -> Result<Value, RunError> {
    let t = token.trim();
    let bytes = t.as_bytes();

    if t.len() >= 4 && t.starts_with("{{") && t.ends_with("}}") {
        return find_var_value(ctx, &t[2..t.len() - 2], true, step_index);
    }
    if t.len() >= 2 && t.starts_with('{') && t.ends_with('}') {
        return find_var_value(ctx, &t[1..t.len() - 1], false, step_index);
    }
    if t.len() >= 2
        && matches!((bytes[0], bytes[t.len() - 1]), (b'\'', b'\'') | (b'"', b'"') | (b'[', b']'))
    {
        let expanded = replace_vars(ctx, strip_quotes(t), step_index)?;
        return Ok(Value::Str(unescape(&expanded)));
    }
    Ok(Value::Str(t.to_string()))
}

// ============================================================================
// Tests
// ============================================================================
