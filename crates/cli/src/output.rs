//! CLI output formatting utilities.
//!
//! Provides consistent formatting for terminal output: colored status
//! messages, change-set listings and apply reports.

use std::time::Duration;

use anyhow::Context;
use owo_colors::{OwoColorize, Stream};
use serde_json::Value;

use stackflow_lib::execute::ApplyReport;
use stackflow_lib::plan::{ChangeAction, Plan, PlanEntry, render_after};

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const WARNING: &str = "⚠";
  pub const INFO: &str = "•";
  pub const ARROW: &str = "→";
}

pub fn truncate_hash(hash: &str) -> &str {
  let len = hash.len().min(12);
  &hash[..len]
}

pub fn format_duration(duration: Duration) -> String {
  let secs = duration.as_secs();
  let millis = duration.subsec_millis();

  if secs >= 60 {
    let mins = secs / 60;
    let remaining_secs = secs % 60;
    format!("{}m {}s", mins, remaining_secs)
  } else if secs > 0 {
    format!("{}.{:02}s", secs, millis / 10)
  } else {
    format!("{}ms", millis)
  }
}

pub fn print_success(message: &str) {
  println!(
    "{} {}",
    symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
    message
  );
}

pub fn print_error(message: &str) {
  eprintln!(
    "{} {}",
    symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
    message.if_supports_color(Stream::Stderr, |s| s.red())
  );
}

pub fn print_warning(message: &str) {
  eprintln!(
    "{} {}",
    symbols::WARNING.if_supports_color(Stream::Stderr, |s| s.yellow()),
    message.if_supports_color(Stream::Stderr, |s| s.yellow())
  );
}

pub fn print_info(message: &str) {
  println!(
    "{} {}",
    symbols::INFO.if_supports_color(Stream::Stdout, |s| s.blue()),
    message
  );
}

pub fn print_stat(label: &str, value: &str) {
  println!(
    "  {}: {}",
    label.if_supports_color(Stream::Stdout, |s| s.dimmed()),
    value
  );
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{}", json);
  Ok(())
}

fn action_symbol(action: ChangeAction) -> String {
  let symbol = action.symbol();
  match action {
    ChangeAction::Create => symbol.if_supports_color(Stream::Stdout, |s| s.green()).to_string(),
    ChangeAction::Update => symbol.if_supports_color(Stream::Stdout, |s| s.yellow()).to_string(),
    ChangeAction::Replace => symbol.if_supports_color(Stream::Stdout, |s| s.magenta()).to_string(),
    ChangeAction::Delete => symbol.if_supports_color(Stream::Stdout, |s| s.red()).to_string(),
    ChangeAction::NoOp => symbol.to_string(),
  }
}

fn render_value(value: &Value) -> String {
  match value {
    Value::String(s) => format!("{:?}", s),
    other => other.to_string(),
  }
}

fn print_changes(entry: &PlanEntry) {
  for change in &entry.changes {
    let before = change.before.as_ref().map(render_value);
    let after = render_after(&change.after);
    let line = match before {
      Some(before) => format!("{}: {} {} {}", change.key, before, symbols::ARROW, after),
      None => format!("{}: {}", change.key, after),
    };
    if change.forces_replace {
      println!(
        "      {} {}",
        line,
        "# forces replacement".if_supports_color(Stream::Stdout, |s| s.magenta())
      );
    } else {
      println!("      {}", line.if_supports_color(Stream::Stdout, |s| s.dimmed()));
    }
  }
}

/// Print a change-set; `verbose` also lists attribute changes and unchanged resources.
pub fn print_plan(plan: &Plan, verbose: bool) {
  for entry in &plan.entries {
    if entry.is_noop() && !verbose {
      continue;
    }
    println!("  {} {}", action_symbol(entry.action), entry.address);
    if verbose {
      print_changes(entry);
    }
  }
}

/// Print which entries applied, failed and were never attempted.
pub fn print_report(report: &ApplyReport) {
  for entry in &report.succeeded {
    println!(
      "  {} {} {}",
      symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
      entry.action,
      entry.address
    );
  }
  for failed in &report.failed {
    print_error(&failed.error.to_string());
  }
  for entry in &report.not_attempted {
    println!(
      "  {} not attempted: {} {}",
      symbols::INFO.if_supports_color(Stream::Stdout, |s| s.dimmed()),
      entry.action,
      entry.address
    );
  }
  for name in &report.retained {
    print_warning(&format!("bucket {} retained (no longer managed)", name));
  }
}
