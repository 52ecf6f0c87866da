//! Rendering command results as JSON or for a terminal

use clap::ValueEnum;
use colored::{ColoredString, Colorize};
use ingest_lib::sync::{SkipReason, SyncOutcome};
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Colored text and tables
    #[default]
    Table,
    /// One pretty-printed JSON document on stdout
    Json,
}

impl OutputFormat {
    /// Print `value` as JSON, or run `human` for terminal output
    pub fn render<T: Serialize + ?Sized>(self, value: &T, human: impl FnOnce()) {
        match self {
            OutputFormat::Json => print_json(value),
            OutputFormat::Table => human(),
        }
    }
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("{} failed to encode output: {}", Mark::Failed.symbol(), e),
    }
}

pub fn print_rows<T: Tabled>(rows: &[T]) {
    println!("{}", Table::new(rows).with(Style::rounded()));
}

/// Leading symbol of a one-line report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mark {
    Done,
    Failed,
    Warning,
    Note,
}

impl Mark {
    fn symbol(self) -> ColoredString {
        match self {
            Mark::Done => "✓".green().bold(),
            Mark::Failed => "✗".red().bold(),
            Mark::Warning => "⚠".yellow().bold(),
            Mark::Note => "ℹ".blue().bold(),
        }
    }
}

/// Failures go to stderr, everything else to stdout
pub fn report(mark: Mark, message: &str) {
    if mark == Mark::Failed {
        eprintln!("{} {}", mark.symbol(), message);
    } else {
        println!("{} {}", mark.symbol(), message);
    }
}

pub fn validity_label(valid: bool) -> ColoredString {
    if valid {
        "valid".green()
    } else {
        "invalid".red()
    }
}

/// One line per sync outcome, plus a warning when entries stay queued
pub fn print_sync_outcome(outcome: &SyncOutcome) {
    match outcome {
        SyncOutcome::Committed {
            committed,
            inserted,
            removal_failures,
        } => {
            println!(
                "{} {} entries, {} new rows",
                "committed".green(),
                committed,
                inserted
            );
            if *removal_failures > 0 {
                report(
                    Mark::Warning,
                    &format!("{} entries stay queued and will be replayed", removal_failures),
                );
            }
        }
        SyncOutcome::Skipped(SkipReason::Empty) => {
            println!("{} (nothing pending)", "skipped".yellow())
        }
        SyncOutcome::Failed(kind) => {
            println!("{} ({})", "failed".red(), kind);
            report(Mark::Warning, "The entry stays queued until the next sync");
        }
    }
}
