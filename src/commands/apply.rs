//! `strata apply` and `strata destroy`

use super::project::{self, Overrides, Project};
use crate::Context;
use crate::cli::ApplyArgs;
use crate::display;
use crate::progress::ApplyProgress;
use crate::ui::{self, Prompt};
use anyhow::Result;
use declarative::{ApplyReport, PlanOptions};

pub fn apply(ctx: &Context, args: &ApplyArgs) -> Result<()> {
    run(ctx, args, false)
}

pub fn destroy(ctx: &Context, args: &ApplyArgs) -> Result<()> {
    run(ctx, args, true)
}

fn run(ctx: &Context, args: &ApplyArgs, destroy: bool) -> Result<()> {
    let project = Project::open(ctx)?;
    let (doc, path) = project.load_document(&args.doc)?;
    let engine = project.engine(
        &path,
        &Overrides {
            jobs: args.jobs,
            drift: args.drift,
        },
    )?;

    let supplied = project::collect_vars(&doc.variables, &args.vars, &project.dir)?;
    let targets = project::parse_targets(&args.target)?;

    let mut progress = ApplyProgress::new(ctx.quiet);
    let mut prompt = Prompt {
        assume_yes: args.yes,
    };
    let result = if destroy {
        engine.destroy(&doc, &supplied, targets, &mut progress, &mut prompt)
    } else {
        let options = PlanOptions {
            targets,
            destroy: false,
        };
        engine.apply(&doc, &supplied, &options, &mut progress, &mut prompt)
    };
    let report = result.map_err(project::explain)?;

    finish(&report)
}

fn finish(report: &ApplyReport) -> Result<()> {
    if report.declined {
        ui::info("Nothing was changed.");
        return Ok(());
    }
    if let Some(execution) = &report.execution {
        display::print_report(execution);
    }
    display::print_outputs(&report.outputs);

    if !report.is_success() {
        anyhow::bail!("Some resources could not be changed; state holds everything that was");
    }
    Ok(())
}
