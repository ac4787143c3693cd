//! `strata state`

use super::project::{Overrides, Project};
use crate::Context;
use crate::cli::{DocArgs, StateCommand};
use crate::display;
use crate::ui::{self, Prompt};
use anyhow::{Context as _, Result};
use colored::Colorize;
use declarative::{ConfirmCallback, Engine, ResourceAddress};

pub fn run(ctx: &Context, cmd: StateCommand) -> Result<()> {
    let project = Project::open(ctx)?;
    let doc_path = project.document_path(&DocArgs {
        file: "main.toml".into(),
    });
    let engine = project.engine(&doc_path, &Overrides::default())?;

    match cmd {
        StateCommand::List => list(&engine),
        StateCommand::Show { address } => show(&engine, &address),
        StateCommand::Rm { address, yes } => rm(&engine, &address, yes),
        StateCommand::Unlock { force } => unlock(&engine, force),
    }
}

fn parse(address: &str) -> Result<ResourceAddress> {
    address
        .parse()
        .with_context(|| format!("Invalid resource address '{address}'"))
}

fn list(engine: &Engine) -> Result<()> {
    let records = engine.state_list()?;
    if records.is_empty() {
        ui::info("State is empty.");
        return Ok(());
    }
    for record in records {
        let status = record.status.to_string();
        println!(
            "{:<48} {:<24} {}",
            record.address().to_string(),
            record.id.dimmed(),
            if status == "created" { status.green() } else { status.red() }
        );
    }
    Ok(())
}

fn show(engine: &Engine, address: &str) -> Result<()> {
    let address = parse(address)?;
    let record = engine
        .state_show(&address)?
        .with_context(|| format!("{address} is not in state"))?;

    ui::header(&address.to_string());
    ui::kv("id", &record.id);
    ui::kv("status", &record.status.to_string());
    ui::kv("updated", &record.updated_at.to_rfc3339());
    if !record.dependencies.is_empty() {
        let deps: Vec<String> = record.dependencies.iter().map(ToString::to_string).collect();
        ui::kv("depends on", &deps.join(", "));
    }

    ui::section("Attributes");
    for (name, value) in &record.attributes {
        println!("  {} = {}", name, display::format_value(value));
    }
    if !record.computed.is_empty() {
        ui::section("Computed");
        for (name, value) in &record.computed {
            println!("  {} = {}", name, display::format_value(value));
        }
    }
    Ok(())
}

fn rm(engine: &Engine, address: &str, yes: bool) -> Result<()> {
    let address = parse(address)?;
    let mut prompt = Prompt { assume_yes: yes };
    let confirmed = prompt.confirm(&format!(
        "Forget {address}? The resource itself is left untouched"
    ))?;
    if !confirmed {
        ui::info("Nothing was changed.");
        return Ok(());
    }

    match engine.state_rm(&address)? {
        Some(record) => ui::success(&format!("Removed {address} ({}) from state", record.id)),
        None => ui::warn(&format!("{address} is not in state")),
    }
    Ok(())
}

fn unlock(engine: &Engine, force: bool) -> Result<()> {
    let Some(info) = engine.lock_info()? else {
        ui::info("State is not locked.");
        return Ok(());
    };

    ui::header("State lock");
    ui::kv("id", &info.id);
    ui::kv("operation", &info.operation);
    ui::kv("held by", &info.who);
    ui::kv("since", &info.created.to_rfc3339());

    if !force {
        println!();
        ui::dim("Pass --force to remove it if that process is gone.");
        return Ok(());
    }
    if engine.force_unlock()?.is_some() {
        ui::success("Lock removed.");
    }
    Ok(())
}
