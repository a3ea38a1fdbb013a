//! Terminal output helpers for the CLI binary. Severity prefixes keep the
//! output scannable when a run interleaves many lines.

use crate::state::TaskStatus;
use colored::*;

pub fn print_header(text: &str) {
    println!("\n{}", text.bold().underline());
}

pub fn print_success(text: &str) {
    println!("{} {}", "ok".green().bold(), text);
}

pub fn print_error(text: &str) {
    eprintln!("{} {}", "error".red().bold(), text);
}

pub fn print_info(text: &str) {
    println!("{} {}", "info".cyan(), text.dimmed());
}

pub fn print_warning(text: &str) {
    println!("{} {}", "warn".yellow().bold(), text);
}

/// Task status colored by outcome, for per-task and per-participant lines.
pub fn status_badge(status: TaskStatus) -> ColoredString {
    let label = status.to_string();
    match status {
        TaskStatus::Completed => label.green(),
        TaskStatus::Failed => label.red(),
        TaskStatus::Aborted | TaskStatus::HandedOff => label.yellow(),
        _ => label.normal(),
    }
}
