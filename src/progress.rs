//! Progress reporting for apply and destroy.

use crate::display;
use colored::Colorize;
use declarative::{
    DriftReport, ExecuteSummary, Plan, PlanStep, ProgressCallback, StepOutcome, StepResult,
};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Renders the plan, then a progress bar with one line per finished step.
pub struct ApplyProgress {
    bar: Option<ProgressBar>,
    quiet: bool,
}

impl ApplyProgress {
    pub fn new(quiet: bool) -> Self {
        Self { bar: None, quiet }
    }

    fn println(&self, line: String) {
        match &self.bar {
            Some(bar) => bar.println(line),
            None => println!("{line}"),
        }
    }
}

impl ProgressCallback for ApplyProgress {
    fn on_plan(&mut self, plan: &Plan, drift: &DriftReport) {
        display::print_plan(plan, drift);
        println!();
    }

    fn on_apply_start(&mut self, steps: usize) {
        let bar = ProgressBar::new(steps as u64);
        if self.quiet {
            bar.set_draw_target(ProgressDrawTarget::hidden());
        }
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            bar.set_style(style.progress_chars("=>-"));
        }
        self.bar = Some(bar);
    }

    fn on_step_start(&mut self, step: &PlanStep) {
        if let Some(bar) = &self.bar {
            bar.set_message(format!("{} {}", step.op, step.address));
        }
    }

    fn on_step_complete(&mut self, outcome: &StepOutcome) {
        if let Some(bar) = &self.bar {
            bar.inc(1);
        }
        if self.quiet {
            return;
        }
        let line = match &outcome.result {
            StepResult::Succeeded => {
                format!("  {} {} {}", "✓".green(), outcome.op, outcome.address)
            }
            StepResult::Failed { reason, .. } => format!(
                "  {} {} {}: {}",
                "✗".red(),
                outcome.op,
                outcome.address,
                reason
            ),
            StepResult::Blocked { .. } | StepResult::Cancelled => format!(
                "  {} {} {} ({})",
                "○".dimmed(),
                outcome.op,
                outcome.address,
                outcome.result
            ),
        };
        self.println(line);
    }

    fn on_apply_complete(&mut self, _summary: &ExecuteSummary) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}
