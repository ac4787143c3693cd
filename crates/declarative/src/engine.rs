//! The plan-and-apply cycle
//!
//! `Engine` ties the pieces together: lock the state, load it, validate the
//! document, build the graph, refresh, plan, confirm, execute, resolve
//! outputs, persist and unlock.

use crate::address::ResourceAddress;
use crate::context::{ConfirmCallback, ProgressCallback};
use crate::document::Document;
use crate::drift::{self, DriftPolicy, DriftReport};
use crate::error::{Error, Result};
use crate::executor::{self, SnapshotScope};
use crate::expression::{self, Resolved};
use crate::graph::DependencyGraph;
use crate::planner::{self, Plan, PlanOptions, Target};
use crate::provider::Providers;
use crate::schema::SchemaRegistry;
use crate::state::{LockInfo, OutputValue, ResourceRecord, StateLock, StateSnapshot, StateStore};
use crate::types::{ExecuteOptions, ExecuteReport};
use crate::variables::resolve_variables;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Engine-wide options.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub execute: ExecuteOptions,
    pub drift: DriftPolicy,
    /// Directory relative paths in the document resolve against
    pub base_dir: PathBuf,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            execute: ExecuteOptions::default(),
            drift: DriftPolicy::default(),
            base_dir: PathBuf::from("."),
        }
    }
}

/// A plan together with what refresh found.
#[derive(Debug, Clone)]
pub struct PlanReport {
    pub plan: Plan,
    pub drift: DriftReport,
}

/// Result of an apply or destroy.
#[derive(Debug, Clone)]
pub struct ApplyReport {
    pub plan: Plan,
    pub drift: DriftReport,
    /// `None` when there was nothing to do or the user declined
    pub execution: Option<ExecuteReport>,
    pub declined: bool,
    pub outputs: BTreeMap<String, OutputValue>,
}

impl ApplyReport {
    pub fn is_success(&self) -> bool {
        self.execution
            .as_ref()
            .is_none_or(|report| report.summary.is_success())
    }
}

#[derive(Debug)]
pub struct Engine {
    registry: SchemaRegistry,
    providers: Providers,
    store: Arc<dyn StateStore>,
    options: EngineOptions,
}

impl Engine {
    pub fn new(registry: SchemaRegistry, providers: Providers, store: Arc<dyn StateStore>) -> Self {
        Self {
            registry,
            providers,
            store,
            options: EngineOptions::default(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn store(&self) -> &dyn StateStore {
        self.store.as_ref()
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Schema validation plus graph construction; no state or provider access.
    pub fn validate(&self, doc: &Document) -> Result<DependencyGraph> {
        self.registry.validate_document(doc)?;
        DependencyGraph::build(doc)
    }

    /// Compute a plan without changing anything.
    pub fn plan(
        &self,
        doc: &Document,
        supplied: &BTreeMap<String, Value>,
        options: &PlanOptions,
    ) -> Result<PlanReport> {
        let lock = StateLock::acquire(self.store.as_ref(), "plan")?;
        let (_, plan, drift) = self.prepare(doc, supplied, options)?;
        lock.release()?;
        Ok(PlanReport { plan, drift })
    }

    fn prepare(
        &self,
        doc: &Document,
        supplied: &BTreeMap<String, Value>,
        options: &PlanOptions,
    ) -> Result<(StateSnapshot, Plan, DriftReport)> {
        let graph = self.validate(doc)?;
        let variables = resolve_variables(&doc.variables, supplied)?;
        let mut snapshot = self.store.read()?;
        log::debug!(
            "Loaded state serial {} with {} resource(s)",
            snapshot.serial,
            snapshot.resources.len()
        );

        self.providers.configure(&doc.provider)?;
        let drift = drift::refresh(
            &mut snapshot,
            &self.providers,
            self.options.drift,
            &self.options.execute.retry,
        )?;
        let plan = planner::plan(
            doc,
            &graph,
            &self.registry,
            &variables,
            &snapshot,
            options,
            &self.options.base_dir,
        )?;
        Ok((snapshot, plan, drift))
    }

    /// Plan, confirm and execute under one state lock.
    pub fn apply<P, C>(
        &self,
        doc: &Document,
        supplied: &BTreeMap<String, Value>,
        options: &PlanOptions,
        progress: &mut P,
        confirm: &mut C,
    ) -> Result<ApplyReport>
    where
        P: ProgressCallback,
        C: ConfirmCallback + ?Sized,
    {
        let operation = if options.destroy { "destroy" } else { "apply" };
        let lock = StateLock::acquire(self.store.as_ref(), operation)?;
        let (mut snapshot, plan, drift) = self.prepare(doc, supplied, options)?;
        progress.on_plan(&plan, &drift);

        let mut report = ApplyReport {
            plan,
            drift,
            execution: None,
            declined: false,
            outputs: BTreeMap::new(),
        };

        if !report.plan.is_empty() {
            let prompt = format!("{} {}?", capitalize(operation), report.plan.summary());
            let confirmed = confirm
                .confirm(&prompt)
                .map_err(|e| Error::io("read confirmation from", "<terminal>", e))?;
            if !confirmed {
                log::info!("{operation} declined");
                report.declined = true;
                report.outputs = snapshot.outputs.clone();
                lock.release()?;
                return Ok(report);
            }

            report.execution = Some(executor::execute(
                &report.plan,
                &self.providers,
                self.store.as_ref(),
                &mut snapshot,
                &self.options.execute,
                progress,
            )?);
        }

        let outputs = if options.destroy && options.targets.is_empty() {
            BTreeMap::new()
        } else {
            resolve_outputs(doc, &report.plan, &snapshot)
        };
        if outputs != snapshot.outputs || !report.drift.is_empty() {
            snapshot.outputs = outputs;
            self.store.write(&mut snapshot)?;
        }
        report.outputs = snapshot.outputs.clone();

        lock.release()?;
        Ok(report)
    }

    /// Destroy everything in state, or only the targets and their dependents.
    pub fn destroy<P, C>(
        &self,
        doc: &Document,
        supplied: &BTreeMap<String, Value>,
        targets: Vec<Target>,
        progress: &mut P,
        confirm: &mut C,
    ) -> Result<ApplyReport>
    where
        P: ProgressCallback,
        C: ConfirmCallback + ?Sized,
    {
        let options = PlanOptions {
            targets,
            destroy: true,
        };
        self.apply(doc, supplied, &options, progress, confirm)
    }

    /// Outputs recorded by the last apply.
    pub fn outputs(&self) -> Result<BTreeMap<String, OutputValue>> {
        Ok(self.store.read()?.outputs)
    }

    /// Resource records in address order.
    pub fn state_list(&self) -> Result<Vec<ResourceRecord>> {
        Ok(self.store.read()?.resources.into_values().collect())
    }

    pub fn state_show(&self, address: &ResourceAddress) -> Result<Option<ResourceRecord>> {
        Ok(self.store.read()?.get(address).cloned())
    }

    /// Forget a resource without touching the provider.
    pub fn state_rm(&self, address: &ResourceAddress) -> Result<Option<ResourceRecord>> {
        let lock = StateLock::acquire(self.store.as_ref(), "state rm")?;
        let mut snapshot = self.store.read()?;
        let removed = snapshot.remove(address);
        if removed.is_some() {
            self.store.write(&mut snapshot)?;
            log::info!("Removed {address} from state");
        }
        lock.release()?;
        Ok(removed)
    }

    pub fn lock_info(&self) -> Result<Option<LockInfo>> {
        self.store.lock_info()
    }

    pub fn force_unlock(&self) -> Result<Option<LockInfo>> {
        self.store.force_unlock()
    }
}

/// Evaluate document outputs against the applied snapshot.
///
/// Outputs whose references are not in state (say, after a partial apply)
/// are skipped with a warning.
fn resolve_outputs(
    doc: &Document,
    plan: &Plan,
    snapshot: &StateSnapshot,
) -> BTreeMap<String, OutputValue> {
    let scope = SnapshotScope {
        snapshot,
        variables: &plan.variables,
        base_dir: &plan.base_dir,
    };
    let mut outputs = BTreeMap::new();
    for (name, decl) in &doc.outputs {
        let from = format!("output.{name}");
        match expression::evaluate(&decl.value, &scope, &from) {
            Ok(Resolved::Known(value)) => {
                outputs.insert(
                    name.clone(),
                    OutputValue {
                        value,
                        sensitive: decl.sensitive,
                    },
                );
            }
            Ok(Resolved::Unknown) => log::warn!("Output {name} is not known yet"),
            Err(e) => log::warn!("Skipping output {name}: {e}"),
        }
    }
    outputs
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{AutoConfirm, AutoDecline, NoProgress};
    use crate::diff::Action;
    use crate::provider::MemoryProvider;
    use crate::schema::{AttributeSchema, AttributeType, ResourceSchema};
    use crate::state::MemoryStateStore;
    use serde_json::json;

    const DOC: &str = r#"
[variables.cidr]
type = "string"
default = "10.0.0.0/16"

[resources.aws_vpc.main]
cidr_block = "${var.cidr}"

[resources.aws_subnet.a]
vpc_id = "${aws_vpc.main.id}"

[outputs.vpc_arn]
value = "${aws_vpc.main.arn}"

[outputs.subnet]
value = "${aws_subnet.a.id}"
sensitive = true
"#;

    fn engine() -> (Engine, Arc<MemoryProvider>, Arc<MemoryStateStore>) {
        let mut registry = SchemaRegistry::new();
        registry.register(
            ResourceSchema::new("aws_vpc").attribute(
                "cidr_block",
                AttributeSchema::new(AttributeType::String).required().force_new(),
            ),
        );
        registry.register(ResourceSchema::new("aws_subnet").attribute(
            "vpc_id",
            AttributeSchema::new(AttributeType::String).required().force_new(),
        ));
        let provider = Arc::new(MemoryProvider::new());
        let mut providers = Providers::new();
        providers.set_default(provider.clone());
        let store = Arc::new(MemoryStateStore::new());
        let engine = Engine::new(registry, providers, store.clone());
        (engine, provider, store)
    }

    fn doc() -> Document {
        Document::from_toml_str(DOC).unwrap()
    }

    fn apply(engine: &Engine, vars: &BTreeMap<String, Value>) -> ApplyReport {
        engine
            .apply(&doc(), vars, &PlanOptions::default(), &mut NoProgress, &mut AutoConfirm)
            .unwrap()
    }

    #[test]
    fn test_apply_then_noop() {
        let (engine, provider, store) = engine();
        let report = apply(&engine, &BTreeMap::new());
        assert!(report.is_success());
        assert_eq!(report.execution.unwrap().summary.created, 2);
        assert_eq!(
            report.outputs["vpc_arn"].value,
            json!("arn:memory:aws_vpc/aws_vpc-0001")
        );
        assert!(report.outputs["subnet"].sensitive);

        let again = apply(&engine, &BTreeMap::new());
        assert!(again.plan.is_empty());
        assert!(again.execution.is_none());
        assert_eq!(provider.count("create"), 2);
        assert!(store.lock_info().unwrap().is_none());
        assert_eq!(engine.outputs().unwrap().len(), 2);
    }

    #[test]
    fn test_variable_change_replaces_chain() {
        let (engine, _, _) = engine();
        apply(&engine, &BTreeMap::new());
        let vars = BTreeMap::from([("cidr".to_string(), json!("10.1.0.0/16"))]);
        let report = apply(&engine, &vars);
        assert!(report.plan.changes.iter().all(|c| c.action == Action::Replace));
        assert_eq!(report.execution.unwrap().summary.replaced, 2);
    }

    #[test]
    fn test_declined_apply_changes_nothing() {
        let (engine, provider, store) = engine();
        let report = engine
            .apply(
                &doc(),
                &BTreeMap::new(),
                &PlanOptions::default(),
                &mut NoProgress,
                &mut AutoDecline,
            )
            .unwrap();
        assert!(report.declined);
        assert!(provider.calls().is_empty());
        assert_eq!(store.write_count(), 0);
        assert!(store.lock_info().unwrap().is_none());
    }

    #[test]
    fn test_held_lock_blocks_apply() {
        let (engine, provider, store) = engine();
        let _held = StateLock::acquire(store.as_ref(), "apply").unwrap();
        let err = engine
            .apply(
                &doc(),
                &BTreeMap::new(),
                &PlanOptions::default(),
                &mut NoProgress,
                &mut AutoConfirm,
            )
            .unwrap_err();
        assert!(matches!(err, Error::StateLocked { .. }));
        assert!(provider.calls().is_empty());
    }

    #[test]
    fn test_destroy_empties_state() {
        let (engine, provider, _) = engine();
        apply(&engine, &BTreeMap::new());
        let report = engine
            .destroy(
                &doc(),
                &BTreeMap::new(),
                Vec::new(),
                &mut NoProgress,
                &mut AutoConfirm,
            )
            .unwrap();
        assert_eq!(report.execution.unwrap().summary.deleted, 2);
        assert!(engine.state_list().unwrap().is_empty());
        assert!(engine.outputs().unwrap().is_empty());
        assert!(provider.ids().is_empty());
    }

    #[test]
    fn test_state_rm_forgets_resource() {
        let (engine, provider, _) = engine();
        apply(&engine, &BTreeMap::new());
        let subnet: ResourceAddress = "aws_subnet.a".parse().unwrap();
        assert!(engine.state_rm(&subnet).unwrap().is_some());
        assert!(engine.state_show(&subnet).unwrap().is_none());
        assert!(engine.state_rm(&subnet).unwrap().is_none());

        // the next plan creates it again; the provider still has the old one
        let report = engine
            .plan(&doc(), &BTreeMap::new(), &PlanOptions::default())
            .unwrap();
        assert_eq!(report.plan.changes.len(), 1);
        assert_eq!(report.plan.changes[0].action, Action::Create);
        assert_eq!(provider.ids().len(), 2);
    }

    #[test]
    fn test_validation_errors_abort_before_state() {
        let (engine, provider, store) = engine();
        let bad = Document::from_toml_str(
            "[resources.aws_subnet.a]\nvpc_id = \"${aws_vpc.nope.id}\"\n",
        )
            .unwrap();
        let err = engine
            .apply(
                &bad,
                &BTreeMap::new(),
                &PlanOptions::default(),
                &mut NoProgress,
                &mut AutoConfirm,
            )
            .unwrap_err();
        assert!(err.to_string().contains("aws_vpc.nope"));
        assert!(provider.calls().is_empty());
        assert_eq!(store.write_count(), 0);
    }

    const PACKAGED: &str = r#"
[variables.prefix]
type = "string"
default = "app-"

[resources.random_id.suffix]
byte_length = 4
prefix = "${var.prefix}"

[resources.archive_file.lambda]
source_dir = "lambda"
output_path = "build/lambda.zip"

[resources.aws_lambda_function.processor]
source_code_hash = "${archive_file.lambda.output_hash}"
"#;

    fn packaged_engine(dir: &std::path::Path) -> Engine {
        let mut registry = SchemaRegistry::with_builtins();
        registry.register(ResourceSchema::new("aws_lambda_function").attribute(
            "source_code_hash",
            AttributeSchema::new(AttributeType::String).required(),
        ));
        let mut providers = Providers::with_builtins(dir);
        providers.set_default(Arc::new(MemoryProvider::new()));
        Engine::new(registry, providers, Arc::new(MemoryStateStore::new())).with_options(
            EngineOptions {
                base_dir: dir.to_path_buf(),
                ..EngineOptions::default()
            },
        )
    }

    fn apply_doc(engine: &Engine, doc: &Document, vars: &BTreeMap<String, Value>) -> ApplyReport {
        engine
            .apply(doc, vars, &PlanOptions::default(), &mut NoProgress, &mut AutoConfirm)
            .unwrap()
    }

    fn action_of(plan: &Plan, address: &str) -> Option<Action> {
        plan.changes
            .iter()
            .find(|c| c.address.to_string() == address)
            .map(|c| c.action)
    }

    #[test]
    fn test_edited_archive_source_updates_dependents() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("lambda")).unwrap();
        std::fs::write(dir.path().join("lambda/handler.py"), "def handler(e, c): pass\n").unwrap();
        let engine = packaged_engine(dir.path());
        let doc = Document::from_toml_str(PACKAGED).unwrap();

        assert!(apply_doc(&engine, &doc, &BTreeMap::new()).is_success());
        let unchanged = engine.plan(&doc, &BTreeMap::new(), &PlanOptions::default()).unwrap();
        assert!(unchanged.plan.is_empty());

        std::fs::write(
            dir.path().join("lambda/handler.py"),
            "def handler(e, c): return 1\n",
        )
        .unwrap();
        let report = engine.plan(&doc, &BTreeMap::new(), &PlanOptions::default()).unwrap();
        assert_eq!(action_of(&report.plan, "archive_file.lambda"), Some(Action::Create));
        assert_eq!(
            action_of(&report.plan, "aws_lambda_function.processor"),
            Some(Action::Update)
        );

        assert!(apply_doc(&engine, &doc, &BTreeMap::new()).is_success());
        let lambda = engine
            .state_show(&"aws_lambda_function.processor".parse().unwrap())
            .unwrap()
            .unwrap();
        let archive = engine
            .state_show(&"archive_file.lambda".parse().unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(
            lambda.attributes["source_code_hash"],
            archive.computed["output_hash"]
        );
        assert!(
            engine
                .plan(&doc, &BTreeMap::new(), &PlanOptions::default())
                .unwrap()
                .plan
                .is_empty()
        );
    }

    #[test]
    fn test_random_id_prefix_updates_in_place() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("lambda")).unwrap();
        std::fs::write(dir.path().join("lambda/handler.py"), "pass\n").unwrap();
        let engine = packaged_engine(dir.path());
        let doc = Document::from_toml_str(PACKAGED).unwrap();
        let address = "random_id.suffix".parse().unwrap();

        apply_doc(&engine, &doc, &BTreeMap::new());
        let before = engine.state_show(&address).unwrap().unwrap();

        let vars = BTreeMap::from([("prefix".to_string(), json!("web-"))]);
        let report = apply_doc(&engine, &doc, &vars);
        assert_eq!(action_of(&report.plan, "random_id.suffix"), Some(Action::Update));

        let after = engine.state_show(&address).unwrap().unwrap();
        assert_eq!(after.computed["hex"], before.computed["hex"]);
        assert!(after.id.starts_with("web-"));
    }

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize("apply"), "Apply");
        assert_eq!(capitalize(""), "");
    }
}
