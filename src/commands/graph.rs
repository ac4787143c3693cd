//! `strata graph`

use super::project::{self, Overrides, Project};
use crate::Context;
use crate::cli::GraphArgs;
use crate::ui;
use anyhow::Result;
use colored::Colorize;

pub fn run(ctx: &Context, args: &GraphArgs) -> Result<()> {
    let project = Project::open(ctx)?;
    let (doc, path) = project.load_document(&args.doc)?;
    let engine = project.engine(&path, &Overrides::default())?;
    let graph = engine.validate(&doc).map_err(project::explain)?;

    if args.dot {
        print!("{}", graph.to_dot());
        return Ok(());
    }

    ui::header("Apply waves");
    for (i, level) in graph.levels().iter().enumerate() {
        println!("{}", format!("[{}]", i + 1).blue().bold());
        for address in level {
            let deps: Vec<String> = graph
                .dependencies(address)
                .iter()
                .map(ToString::to_string)
                .collect();
            if deps.is_empty() {
                println!("  {address}");
            } else {
                println!("  {address} {}", format!("← {}", deps.join(", ")).dimmed());
            }
        }
    }
    Ok(())
}
