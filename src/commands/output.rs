//! `strata output`

use super::project::{Overrides, Project};
use crate::Context;
use crate::cli::{DocArgs, OutputArgs};
use crate::display;
use anyhow::{Context as _, Result};
use serde_json::Value;

pub fn run(ctx: &Context, args: &OutputArgs) -> Result<()> {
    let project = Project::open(ctx)?;
    let doc_path = project.document_path(&DocArgs {
        file: "main.toml".into(),
    });
    let engine = project.engine(&doc_path, &Overrides::default())?;
    let outputs = engine.outputs()?;

    match &args.name {
        Some(name) => {
            let output = outputs
                .get(name)
                .with_context(|| format!("No output named '{name}'"))?;
            match (&output.value, args.json) {
                (Value::String(s), false) => println!("{s}"),
                (value, _) => println!("{}", serde_json::to_string_pretty(value)?),
            }
        }
        None if args.json => println!("{}", serde_json::to_string_pretty(&outputs)?),
        None if outputs.is_empty() => {
            if !ctx.quiet {
                crate::ui::warn("No outputs recorded. Run `strata apply` first.");
            }
        }
        None => display::print_outputs(&outputs),
    }
    Ok(())
}
