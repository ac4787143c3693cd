//! Rendering of plans, apply results and outputs

use crate::ui;
use colored::{ColoredString, Colorize};
use declarative::drift::DriftKind;
use declarative::{
    Action, AttributeChange, DriftReport, ExecuteReport, OutputValue, Plan, ResourceDiff,
    Resolved, StepResult,
};
use serde_json::Value;
use std::collections::BTreeMap;

const KNOWN_AFTER_APPLY: &str = "(known after apply)";

fn action_symbol(action: Action) -> ColoredString {
    match action {
        Action::Create => action.symbol().green().bold(),
        Action::Update => action.symbol().yellow().bold(),
        Action::Replace => action.symbol().magenta().bold(),
        Action::Delete => action.symbol().red().bold(),
    }
}

fn outcome_phrase(action: Action) -> &'static str {
    match action {
        Action::Create => "will be created",
        Action::Update => "will be updated in-place",
        Action::Replace => "must be replaced",
        Action::Delete => "will be destroyed",
    }
}

/// Render a value the way it would be written in a document.
pub fn format_value(value: &Value) -> String {
    match value {
        Value::String(s) => format!("{s:?}"),
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(format_value).collect();
            format!("[{}]", inner.join(", "))
        }
        Value::Object(map) => {
            let inner: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{k} = {}", format_value(v)))
                .collect();
            format!("{{ {} }}", inner.join(", "))
        }
        other => other.to_string(),
    }
}

fn format_after(after: Option<&Resolved>) -> String {
    match after {
        None => "null".to_string(),
        Some(Resolved::Unknown) => KNOWN_AFTER_APPLY.to_string(),
        Some(Resolved::Known(value)) => format_value(value),
    }
}

/// Shorten a rendered value to fit the terminal.
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max || max < 4 {
        return text.to_string();
    }
    let kept: String = text.chars().take(max - 3).collect();
    format!("{kept}...")
}

fn multiline(value: Option<&Value>) -> Option<&str> {
    match value {
        Some(Value::String(s)) if s.contains('\n') => Some(s),
        _ => None,
    }
}

fn print_attribute(change: &AttributeChange, action: Action, width: usize) {
    let before = change.before.as_ref();
    let after_value = match &change.after {
        Some(Resolved::Known(v)) => Some(v),
        _ => None,
    };

    // multi-line strings (scripts, policies) get a line diff
    if let (Some(old), Some(new)) = (multiline(before), multiline(after_value)) {
        println!("      {} = <<", change.name);
        let diff = similar::TextDiff::from_lines(old, new);
        for line in diff.iter_all_changes() {
            match line.tag() {
                similar::ChangeTag::Delete => print!("        {}", format!("- {line}").red()),
                similar::ChangeTag::Insert => print!("        {}", format!("+ {line}").green()),
                similar::ChangeTag::Equal => {}
            }
        }
        return;
    }

    let budget = width.saturating_sub(change.name.len() + 12).max(20);
    let rendered = match action {
        Action::Create => truncate(&format_after(change.after.as_ref()), budget),
        Action::Delete => truncate(&before.map_or_else(|| "null".into(), format_value), budget),
        Action::Update | Action::Replace => format!(
            "{} → {}",
            truncate(&before.map_or_else(|| "null".into(), format_value), budget / 2),
            truncate(&format_after(change.after.as_ref()), budget / 2)
        ),
    };
    let suffix = if change.forces_replacement && action == Action::Replace {
        format!(" {}", "# forces replacement".red())
    } else {
        String::new()
    };
    println!("      {} = {}{}", change.name, rendered, suffix);
}

fn print_diff(diff: &ResourceDiff, width: usize) {
    let reason = diff
        .reason
        .as_ref()
        .map(|r| format!(" ({r})").dimmed().to_string())
        .unwrap_or_default();
    println!(
        "  {} {} {}{}",
        action_symbol(diff.action),
        diff.address.to_string().bold(),
        outcome_phrase(diff.action).dimmed(),
        reason
    );
    for change in &diff.changes {
        print_attribute(change, diff.action, width);
    }
}

pub fn print_drift(drift: &DriftReport) {
    if drift.is_empty() {
        return;
    }
    ui::section("Drift");
    for entry in &drift.entries {
        let symbol = match entry.kind {
            DriftKind::Missing => "!".red(),
            DriftKind::Changed { .. } => "~".yellow(),
        };
        println!("  {symbol} {entry}");
    }
}

pub fn print_plan(plan: &Plan, drift: &DriftReport) {
    print_drift(drift);
    if plan.is_empty() {
        println!();
        ui::success("No changes. Infrastructure matches the document.");
        return;
    }

    let width = ui::width();
    ui::section("Plan");
    for diff in &plan.changes {
        print_diff(diff, width);
    }
    println!();
    println!("  {} {}", "Plan:".bold(), plan.summary());
}

pub fn print_report(report: &ExecuteReport) {
    let failures: Vec<_> = report.failures().collect();
    let blocked: Vec<_> = report
        .outcomes
        .iter()
        .filter(|o| matches!(o.result, StepResult::Blocked { .. }))
        .collect();

    if !failures.is_empty() {
        ui::section("Failures");
        for outcome in failures {
            println!(
                "  {} {} {}: {}",
                "✗".red(),
                outcome.op,
                outcome.address.to_string().bold(),
                match &outcome.result {
                    StepResult::Failed { reason, .. } => reason.as_str(),
                    _ => "",
                }
            );
        }
    }
    if !blocked.is_empty() {
        ui::section("Not attempted");
        for outcome in blocked {
            println!(
                "  {} {} {}",
                "○".dimmed(),
                outcome.address,
                outcome.result.to_string().dimmed()
            );
        }
    }

    println!();
    if report.summary.is_success() {
        ui::success(&format!("Apply complete: {}", report.summary));
    } else {
        ui::warn(&format!("Apply finished with errors: {}", report.summary));
    }
}

pub fn print_outputs(outputs: &BTreeMap<String, OutputValue>) {
    if outputs.is_empty() {
        return;
    }
    ui::section("Outputs");
    for (name, output) in outputs {
        let value = if output.sensitive {
            "(sensitive)".dimmed().to_string()
        } else {
            format_value(&output.value)
        };
        println!("  {} = {}", name.bold(), value);
    }
}
