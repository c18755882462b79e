//! Console progress rendering
//!
//! One line per finished step: `✓` green when done, `⚠` yellow with the skip
//! reason, `✗` red with the full error chain. Fan-out phases get a thin header
//! the first time one of their workers starts.

use colored::*;
use multipress_core::Identifier;
use multipress_engine::{Outcome, Reporter};
use std::collections::HashSet;
use std::sync::Mutex;

const DEFAULT_WIDTH: usize = 80;

/// Terminal width taken from `COLUMNS`, 80 otherwise
pub fn terminal_width() -> usize {
    std::env::var("COLUMNS")
        .ok()
        .and_then(|value| value.parse().ok())
        .filter(|width: &usize| *width > 20)
        .unwrap_or(DEFAULT_WIDTH)
}

/// `title` centred in a line of `fill` characters
pub fn separator(title: &str, fill: char, width: usize) -> String {
    if title.is_empty() {
        return fill.to_string().repeat(width);
    }

    let label = format!(" {} ", title);
    let length = label.chars().count();
    let left = width.saturating_sub(length) / 2;
    let right = width.saturating_sub(length + left);

    format!(
        "{}{}{}",
        fill.to_string().repeat(left),
        label,
        fill.to_string().repeat(right)
    )
}

/// Left and right text joined by a rule filling the line
fn full_line(left: &str, right: &str, width: usize) -> String {
    let length = left.chars().count() + right.chars().count();
    if length + 2 >= width {
        return format!("{} {}", left, right);
    }
    format!("{} {} {}", left, "─".repeat(width - length - 2), right)
}

/// Renders the line printed when a step finishes
pub fn render_completion(
    phase: &str,
    identifier: Option<&Identifier>,
    outcome: &Outcome,
    width: usize,
) -> String {
    let label = match identifier {
        Some(id) => format!("{} [{}]", phase, id),
        None => phase.to_string(),
    };

    match outcome {
        Outcome::Success => {
            let line = full_line(&format!("✓ {}", label), "DONE", width);
            line.green().to_string()
        }
        Outcome::Skip { reason } => {
            let line = full_line(&format!("⚠ {}", label), &format!("{} - SKIP", reason), width);
            line.yellow().to_string()
        }
        Outcome::Fail { error } => {
            let line = full_line(
                &format!("✗ {}", label),
                &format!("{:#} - FAIL", error),
                width,
            );
            line.red().to_string()
        }
    }
}

/// Reporter printing progress to the terminal
pub struct ConsoleReporter {
    to_stderr: bool,
    width: usize,
    headed: Mutex<HashSet<String>>,
}

impl ConsoleReporter {
    /// `to_stderr` keeps stdout free for machine-readable output
    pub fn new(to_stderr: bool) -> Self {
        Self {
            to_stderr,
            width: terminal_width(),
            headed: Mutex::new(HashSet::new()),
        }
    }

    fn emit(&self, line: &str) {
        if self.to_stderr {
            eprintln!("{}", line);
        } else {
            println!("{}", line);
        }
    }

    /// Prints a `═` section separator
    pub fn banner(&self, title: &str) {
        self.emit(&separator(title, '═', self.width).bold().to_string());
    }
}

impl Reporter for ConsoleReporter {
    fn section(&self, title: &str) {
        self.banner(title);
    }

    fn announce(&self, phase: &str, identifier: Option<&Identifier>) {
        if identifier.is_none() {
            return;
        }

        let first = match self.headed.lock() {
            Ok(mut headed) => headed.insert(phase.to_string()),
            Err(_) => false,
        };
        if first {
            self.emit(&separator(phase, '─', self.width).dimmed().to_string());
        }
    }

    fn complete(&self, phase: &str, identifier: Option<&Identifier>, outcome: &Outcome) {
        self.emit(&render_completion(phase, identifier, outcome, self.width));
    }

    fn phase_finished(&self, phase: &str, failed: &[Identifier]) {
        if failed.is_empty() {
            return;
        }
        let failed: Vec<&str> = failed.iter().map(Identifier::as_str).collect();
        self.emit(
            &format!("✗ {} failed for {}", phase, failed.join(", "))
                .red()
                .bold()
                .to_string(),
        );
    }
}
