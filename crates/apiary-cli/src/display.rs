//! Display formatting for CLI output
//!
//! Provides structured display for:
//! - Resolved apply plans with auto-mode warnings
//! - Run reports with one line per plan entry

use apiary_core::ApplyPlan;
use apiary_kube::{EntryState, RunReport};
use console::style;

pub fn print_warnings(warnings: &[String]) {
    for warning in warnings {
        println!("{} {}", style("⚠").yellow().bold(), style(warning).yellow());
    }
}

/// Print a resolved plan in apply order
pub fn print_plan(plan: &ApplyPlan) {
    print_warnings(&plan.warnings);
    if plan.is_empty() {
        println!("{} Nothing to apply", style("→").blue().bold());
        return;
    }
    println!(
        "{} Apply plan ({} descriptor{})",
        style("→").blue().bold(),
        plan.len(),
        if plan.len() == 1 { "" } else { "s" }
    );
    println!("{}", plan.render());
}

fn state_label(state: EntryState) -> console::StyledObject<String> {
    let label = format!("{:<9}", state.to_string());
    match state {
        EntryState::Done => style(label).green(),
        EntryState::Failed => style(label).red().bold(),
        EntryState::Skipped => style(label).dim(),
        _ => style(label).yellow(),
    }
}

/// Print every entry with its terminal state, then the summary
pub fn print_report(report: &RunReport) {
    print_warnings(&report.warnings);
    println!(
        "{} {} run {}",
        style("→").blue().bold(),
        report.command,
        style(&report.execution_id).dim()
    );

    for entry in &report.entries {
        println!("  {} {}", state_label(entry.state), style(&entry.entry).cyan());
        for resource in &entry.resources {
            println!("      {}", style(resource).dim());
        }
        if let Some(error) = &entry.error {
            println!("      {} {}", style("error:").red(), error);
        }
    }

    let icon = if report.is_success() {
        style("✓").green().bold()
    } else {
        style("✗").red().bold()
    };
    println!("{} {}", icon, report.summary());
}
