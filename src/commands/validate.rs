//! `strata validate`

use super::project::{self, Overrides, Project};
use crate::Context;
use crate::cli::DocArgs;
use crate::ui;
use anyhow::Result;

pub fn run(ctx: &Context, args: &DocArgs) -> Result<()> {
    let project = Project::open(ctx)?;
    let (doc, path) = project.load_document(args)?;
    let engine = project.engine(&path, &Overrides::default())?;

    let graph = engine.validate(&doc).map_err(project::explain)?;

    if !ctx.quiet {
        ui::success(&format!(
            "{} is valid: {}, {}, {} apply {}",
            path.display(),
            ui::plural(graph.len(), "resource"),
            ui::plural(doc.outputs.len(), "output"),
            graph.levels().len(),
            if graph.levels().len() == 1 { "wave" } else { "waves" }
        ));
    }
    if ctx.verbose > 0 {
        for (i, level) in graph.levels().iter().enumerate() {
            let names: Vec<String> = level.iter().map(ToString::to_string).collect();
            ui::dim(&format!("wave {}: {}", i + 1, names.join(", ")));
        }
    }
    Ok(())
}
