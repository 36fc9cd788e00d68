//! Console Output
//!
//! Per-step and per-branch banners, printed only when the runner has
//! console output enabled. Expected outcomes render green, unexpected ones
//! red; errors print their location and synthesized stack.

use colored::Colorize;

use crate::model::types::{Branch, Step};

pub fn print_step_start(step: &Step) {
    let location = match (&step.filename, step.line_number) {
        (Some(f), n) => format!(" [{}:{}]", f, n),
        (None, _) => String::new(),
    };
    println!("Start:    {}{}", step.text.trim(), location.dimmed());
}

pub fn print_step_end(step: &Step) {
    let text = step.text.trim().to_string();
    let as_expected = step.as_expected == Some(true);
    let (colored_text, suffix) = match (step.is_passed(), as_expected) {
        (true, true) => (text.green(), "passed"),
        (true, false) => (text.red(), "passed not as expected"),
        (false, true) => (text.green(), "failed as expected"),
        (false, false) => (text.red(), "failed"),
    };
    let seconds = if step.elapsed >= 0 {
        format!(" ({:.3} s)", step.elapsed as f64 / 1000.0)
    } else {
        String::new()
    };
    println!("End:      {} ({}){}", colored_text, suffix, seconds);

    if !as_expected {
        if let Some(err) = step.error() {
            print_error(&step.text, &err.message, &err.location_string(), err.stack.as_deref());
        }
    }
}

pub fn print_branch_complete(branch: &Branch) {
    println!("Branch complete");
    if let Some(err) = &branch.error {
        println!("Errors occurred in branch {}", err.location_string());
        println!("{}", err.message);
        if let Some(stack) = &err.stack {
            println!("{}", stack);
        }
    }
}

fn print_error(step_text: &str, message: &str, location: &str, stack: Option<&str>) {
    println!("{}", step_text.trim().red().bold());
    println!("{} {}", message, location);
    if let Some(stack) = stack {
        println!("{}", stack);
    }
}
