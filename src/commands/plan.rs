//! `strata plan`

use super::project::{self, Overrides, Project};
use crate::Context;
use crate::cli::PlanArgs;
use crate::display;
use anyhow::Result;
use declarative::PlanOptions;

pub fn run(ctx: &Context, args: &PlanArgs) -> Result<()> {
    let project = Project::open(ctx)?;
    let (doc, path) = project.load_document(&args.doc)?;
    let engine = project.engine(
        &path,
        &Overrides {
            jobs: None,
            drift: args.drift,
        },
    )?;

    let supplied = project::collect_vars(&doc.variables, &args.vars, &project.dir)?;
    let options = PlanOptions {
        targets: project::parse_targets(&args.target)?,
        destroy: args.destroy,
    };

    let report = engine
        .plan(&doc, &supplied, &options)
        .map_err(project::explain)?;
    display::print_plan(&report.plan, &report.drift);
    Ok(())
}
