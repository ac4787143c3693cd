//! Shared loading for commands: settings, document, registry, engine, variables

use crate::Context;
use crate::cli::{DocArgs, DriftArg, VarArgs};
use crate::cloud::SimulatedCloud;
use crate::config::Settings;
use crate::paths;
use crate::ui;
use anyhow::{Context as _, Result};
use declarative::{
    Document, DriftPolicy, Engine, EngineOptions, FileStateStore, Providers, SchemaRegistry,
    Target, VariableDecl,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Prefix of environment variables that supply document variables
pub const ENV_VAR_PREFIX: &str = "STRATA_VAR_";

/// Everything a command needs about the project directory.
pub struct Project {
    pub dir: PathBuf,
    pub settings: Settings,
}

/// Per-invocation overrides of the settings file.
#[derive(Default)]
pub struct Overrides {
    pub jobs: Option<usize>,
    pub drift: Option<DriftArg>,
}

impl Project {
    pub fn open(ctx: &Context) -> Result<Self> {
        let dir = paths::project_dir(&ctx.dir)?;
        let settings = Settings::load(&paths::config_file(&dir))?;
        Ok(Self { dir, settings })
    }

    pub fn document_path(&self, args: &DocArgs) -> PathBuf {
        if args.file.is_absolute() {
            args.file.clone()
        } else {
            self.dir.join(&args.file)
        }
    }

    pub fn load_document(&self, args: &DocArgs) -> Result<(Document, PathBuf)> {
        let path = self.document_path(args);
        let doc = Document::load(&path)
            .with_context(|| format!("Could not load document {}", path.display()))?;
        log::info!(
            "Loaded {} resource(s) from {}",
            doc.resources.len(),
            path.display()
        );
        Ok((doc, path))
    }

    /// Built-in kinds plus every configured schema file that exists.
    pub fn registry(&self) -> Result<SchemaRegistry> {
        let mut registry = SchemaRegistry::with_builtins();
        for file in &self.settings.schemas {
            let path = paths::resolve(&self.dir, file);
            if !path.exists() {
                log::debug!("Schema file {} not found, skipping", path.display());
                continue;
            }
            registry
                .load_file(&path)
                .with_context(|| format!("Could not load schemas from {}", path.display()))?;
        }
        Ok(registry)
    }

    pub fn state_dir(&self) -> PathBuf {
        paths::state_dir(&self.dir, self.settings.state_path.as_deref())
    }

    pub fn cloud_path(&self) -> PathBuf {
        match &self.settings.cloud_path {
            Some(path) => paths::resolve(&self.dir, path),
            None => self.state_dir().join(paths::CLOUD_FILE),
        }
    }

    pub fn store(&self) -> Result<FileStateStore> {
        let dir = self.state_dir();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Could not create state directory {}", dir.display()))?;
        Ok(FileStateStore::in_dir(&dir))
    }

    /// Engine for a document at `doc_path`; its directory anchors relative paths.
    pub fn engine(&self, doc_path: &Path, overrides: &Overrides) -> Result<Engine> {
        let registry = self.registry()?;
        let base_dir = doc_path.parent().unwrap_or(&self.dir).to_path_buf();

        let mut providers = Providers::with_builtins(&base_dir);
        let cloud = SimulatedCloud::new(self.cloud_path(), &registry);
        log::debug!("Simulated cloud inventory at {}", cloud.path().display());
        providers.set_default(Arc::new(cloud));

        let options = EngineOptions {
            execute: self.settings.execute_options(overrides.jobs),
            drift: overrides
                .drift
                .map_or(self.settings.drift, DriftPolicy::from),
            base_dir,
        };
        Ok(Engine::new(registry, providers, Arc::new(self.store()?)).with_options(options))
    }
}

pub fn parse_targets(raw: &[String]) -> Result<Vec<Target>> {
    raw.iter()
        .map(|t| {
            t.parse::<Target>()
                .map_err(|e| anyhow::anyhow!("Invalid target '{t}': {e}"))
        })
        .collect()
}

fn read_var_file(path: &Path) -> Result<BTreeMap<String, Value>> {
    let content =
        fs::read_to_string(path).with_context(|| format!("Could not read {}", path.display()))?;
    let is_json = path.extension().is_some_and(|ext| ext == "json");
    if is_json {
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid variables in {}", path.display()))
    } else {
        toml::from_str(&content).with_context(|| format!("Invalid variables in {}", path.display()))
    }
}

/// Merge supplied variables: command line over var files over environment.
///
/// Only declared names are read from the environment; undeclared names
/// given explicitly are left in so resolution can reject them.
pub fn collect_vars(
    decls: &BTreeMap<String, VariableDecl>,
    args: &VarArgs,
    project_dir: &Path,
) -> Result<BTreeMap<String, Value>> {
    let mut supplied = BTreeMap::new();

    for name in decls.keys() {
        if let Ok(value) = std::env::var(format!("{ENV_VAR_PREFIX}{name}")) {
            log::debug!("Variable {name} from environment");
            supplied.insert(name.clone(), Value::String(value));
        }
    }

    for file in &args.var_files {
        let path = if file.is_absolute() {
            file.clone()
        } else {
            project_dir.join(file)
        };
        supplied.extend(read_var_file(&path)?);
    }

    for raw in &args.vars {
        let (name, value) = raw
            .split_once('=')
            .with_context(|| format!("Invalid --var '{raw}', expected NAME=VALUE"))?;
        supplied.insert(name.trim().to_string(), Value::String(value.to_string()));
    }

    Ok(supplied)
}

/// Print schema violations one per line before the error propagates.
pub fn explain(err: declarative::Error) -> anyhow::Error {
    if let declarative::Error::Schema(violations) = &err {
        for violation in violations {
            ui::error(&violation.to_string());
        }
    }
    let category = err.category().description();
    anyhow::Error::new(err).context(category)
}
