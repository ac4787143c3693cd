//! Planner - diff declarations against the prior snapshot and order the steps
//!
//! Resources are visited in dependency order so every reference can be
//! resolved against the prior snapshot, or marked unknown when the target
//! is itself being created or replaced. Each resource diff becomes one or
//! two executable steps (a replace is a destroy followed by a create), and
//! the steps carry explicit ordering edges the executor honours.

use crate::address::ResourceAddress;
use crate::diff::{
    self, Action, DesiredAttributes, DiffSummary, ResourceDiff, creation_changes, removal_changes,
};
use crate::document::{Document, OutputDecl, ResourceDecl};
use crate::error::{Error, Result};
use crate::expression::{self, Lookup, Resolved, Scope};
use crate::graph::DependencyGraph;
use crate::lifecycle::ResourceStatus;
use crate::schema::SchemaRegistry;
use crate::state::StateSnapshot;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Resource filter from `--target kind[.name]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub kind: String,
    pub name: Option<String>,
}

impl Target {
    pub fn matches(&self, address: &ResourceAddress) -> bool {
        self.kind == address.kind && self.name.as_ref().is_none_or(|n| *n == address.name)
    }
}

impl FromStr for Target {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('.') {
            Some(_) => {
                let address: ResourceAddress = s.parse()?;
                Ok(Self {
                    kind: address.kind,
                    name: Some(address.name),
                })
            }
            None if crate::address::is_identifier(s) => Ok(Self {
                kind: s.to_string(),
                name: None,
            }),
            None => Err(Error::InvalidAddress(s.to_string())),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}.{name}", self.kind),
            None => f.write_str(&self.kind),
        }
    }
}

/// Options for planning.
#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    /// Restrict the plan to these resources (and what they need)
    pub targets: Vec<Target>,
    /// Plan the destruction of every managed resource
    pub destroy: bool,
}

/// Provider operation a step performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOp {
    Create,
    Update,
    Destroy,
}

impl fmt::Display for StepOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Destroy => "destroy",
        })
    }
}

/// One executable step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanStep {
    pub address: ResourceAddress,
    pub op: StepOp,
    /// Resource-level action this step belongs to
    pub action: Action,
    /// Indices of steps that must complete first
    pub after: Vec<usize>,
}

/// An ordered action plan.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    /// Resource-level changes
    pub changes: Vec<ResourceDiff>,
    /// Steps in a valid execution order
    pub steps: Vec<PlanStep>,
    /// Declarations of created or updated resources
    pub declarations: BTreeMap<ResourceAddress, ResourceDecl>,
    /// Declared dependencies of created or updated resources
    pub dependencies: BTreeMap<ResourceAddress, Vec<ResourceAddress>>,
    /// Resolved variables used for evaluation at apply time
    pub variables: BTreeMap<String, Value>,
    pub outputs: BTreeMap<String, OutputDecl>,
    /// Directory relative file paths resolve against
    pub base_dir: PathBuf,
}

impl Plan {
    /// No changes at all.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn summary(&self) -> DiffSummary {
        DiffSummary::from_diffs(&self.changes)
    }

    pub fn change(&self, address: &ResourceAddress) -> Option<&ResourceDiff> {
        self.changes.iter().find(|c| &c.address == address)
    }
}

/// How a resource changes, as seen by resources that reference it.
enum Pending {
    /// Created or replaced: every attribute is unknown
    New,
    /// Updated in place: changed inputs take their desired values
    Updated(DesiredAttributes, BTreeSet<String>),
}

struct PlanScope<'a> {
    prior: &'a StateSnapshot,
    pending: &'a HashMap<ResourceAddress, Pending>,
    variables: &'a BTreeMap<String, Value>,
    base_dir: &'a Path,
}

impl Scope for PlanScope<'_> {
    fn resource(&self, address: &ResourceAddress, path: &[String]) -> Lookup {
        match self.pending.get(address) {
            Some(Pending::New) => return Lookup::Unknown,
            Some(Pending::Updated(desired, changed)) if changed.contains(&path[0]) => {
                return match desired.get(&path[0]) {
                    Some(Resolved::Known(v)) => Lookup::Known(
                        expression::lookup_path(v, &path[1..]).unwrap_or(Value::Null),
                    ),
                    Some(Resolved::Unknown) => Lookup::Unknown,
                    None => Lookup::Known(Value::Null),
                };
            }
            _ => {}
        }
        match self.prior.get(address) {
            Some(record) => Lookup::Known(record.attribute(path).unwrap_or(Value::Null)),
            None => Lookup::Missing,
        }
    }

    fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    fn base_dir(&self) -> &Path {
        self.base_dir
    }
}

/// Evaluate every attribute of a declaration on its own, so one unknown
/// reference does not hide the rest.
fn desired_attributes(
    decl: &ResourceDecl,
    scope: &dyn Scope,
) -> Result<DesiredAttributes> {
    let from = decl.address.to_string();
    decl.attributes
        .iter()
        .map(|(name, value)| Ok((name.clone(), expression::evaluate(value, scope, &from)?)))
        .collect()
}

/// Compute the plan.
pub fn plan(
    doc: &Document,
    graph: &DependencyGraph,
    registry: &SchemaRegistry,
    variables: &BTreeMap<String, Value>,
    prior: &StateSnapshot,
    options: &PlanOptions,
    base_dir: &Path,
) -> Result<Plan> {
    let mut out = Plan {
        variables: variables.clone(),
        outputs: doc.outputs.clone(),
        base_dir: base_dir.to_path_buf(),
        ..Plan::default()
    };

    // Declared resources in scope for create/update
    let selected: BTreeSet<&ResourceAddress> = if options.destroy {
        BTreeSet::new()
    } else if options.targets.is_empty() {
        graph.nodes().iter().collect()
    } else {
        let mut set = BTreeSet::new();
        for address in graph.nodes() {
            if options.targets.iter().any(|t| t.matches(address)) {
                set.insert(address);
                set.extend(graph.transitive_dependencies(address));
            }
        }
        set
    };

    let mut pending: HashMap<ResourceAddress, Pending> = HashMap::new();
    let mut forward: Vec<ResourceDiff> = Vec::new();

    for address in graph.topological_order() {
        if !selected.contains(address) {
            continue;
        }
        let Some(decl) = doc.resource(address) else {
            continue;
        };
        let schema = registry.require(&address.kind, &address.to_string())?;

        let desired = {
            let scope = PlanScope {
                prior,
                pending: &pending,
                variables,
                base_dir,
            };
            desired_attributes(decl, &scope)?
        };

        let diff = match prior.get(address) {
            None => {
                pending.insert(address.clone(), Pending::New);
                ResourceDiff {
                    address: address.clone(),
                    action: Action::Create,
                    changes: creation_changes(&desired),
                    reason: None,
                }
            }
            Some(record) if record.status == ResourceStatus::Failed => {
                pending.insert(address.clone(), Pending::New);
                ResourceDiff {
                    address: address.clone(),
                    action: Action::Replace,
                    changes: diff::diff_attributes(Some(schema), &record.attributes, &desired),
                    reason: Some("previous apply failed".to_string()),
                }
            }
            Some(record) => {
                let changes = diff::diff_attributes(Some(schema), &record.attributes, &desired);
                if changes.is_empty() {
                    continue;
                }
                let action = if changes.iter().any(|c| c.forces_replacement) {
                    pending.insert(address.clone(), Pending::New);
                    Action::Replace
                } else {
                    let changed = changes.iter().map(|c| c.name.clone()).collect();
                    pending.insert(address.clone(), Pending::Updated(desired, changed));
                    Action::Update
                };
                ResourceDiff {
                    address: address.clone(),
                    action,
                    changes,
                    reason: None,
                }
            }
        };

        if diff.action == Action::Replace && decl.prevent_destroy {
            return Err(Error::PreventDestroy {
                address: address.to_string(),
                action: "replace".to_string(),
            });
        }

        out.declarations.insert(address.clone(), decl.clone());
        out.dependencies.insert(
            address.clone(),
            graph.dependencies(address).into_iter().cloned().collect(),
        );
        forward.push(diff);
    }

    // Deletes, ordered against the dependencies recorded in state
    let prior_graph = prior.dependency_graph()?;
    let mut doomed: BTreeSet<ResourceAddress> = BTreeSet::new();
    for address in prior_graph.nodes() {
        let orphaned = options.destroy || !graph.contains(address);
        let targeted =
            options.targets.is_empty() || options.targets.iter().any(|t| t.matches(address));
        if orphaned && targeted {
            doomed.insert(address.clone());
            if options.destroy {
                doomed.extend(prior_graph.transitive_dependents(address).into_iter().cloned());
            }
        }
    }

    let mut deletes = Vec::new();
    for address in prior_graph.topological_order().into_iter().rev() {
        if !doomed.contains(address) {
            continue;
        }
        if let Some(decl) = doc.resource(address).filter(|d| d.prevent_destroy) {
            return Err(Error::PreventDestroy {
                address: decl.address.to_string(),
                action: "destroy".to_string(),
            });
        }
        let record = prior.get(address);
        deletes.push(ResourceDiff {
            address: address.clone(),
            action: Action::Delete,
            changes: record.map(|r| removal_changes(&r.attributes)).unwrap_or_default(),
            reason: if options.destroy {
                None
            } else {
                Some("no longer declared".to_string())
            },
        });
    }

    out.steps = order_steps(&forward, &deletes, &out.dependencies, prior)?;

    let mut changes: Vec<ResourceDiff> = Vec::with_capacity(forward.len() + deletes.len());
    for step in &out.steps {
        if changes.iter().any(|c| c.address == step.address) {
            continue;
        }
        if let Some(diff) = forward
            .iter()
            .chain(deletes.iter())
            .find(|d| d.address == step.address)
        {
            changes.push(diff.clone());
        }
    }
    out.changes = changes;

    log::info!("Plan: {}", out.summary());
    Ok(out)
}

/// Split diffs into steps, wire the ordering edges and sort.
fn order_steps(
    forward: &[ResourceDiff],
    deletes: &[ResourceDiff],
    dependencies: &BTreeMap<ResourceAddress, Vec<ResourceAddress>>,
    prior: &StateSnapshot,
) -> Result<Vec<PlanStep>> {
    let mut steps: Vec<PlanStep> = Vec::new();
    let mut destroy_of: HashMap<ResourceAddress, usize> = HashMap::new();
    let mut apply_of: HashMap<ResourceAddress, usize> = HashMap::new();

    let mut push = |address: &ResourceAddress, op, action| {
        steps.push(PlanStep {
            address: address.clone(),
            op,
            action,
            after: Vec::new(),
        });
        steps.len() - 1
    };

    for diff in forward {
        let address = &diff.address;
        match diff.action {
            Action::Create => {
                let idx = push(address, StepOp::Create, diff.action);
                apply_of.insert(address.clone(), idx);
            }
            Action::Update => {
                let idx = push(address, StepOp::Update, diff.action);
                apply_of.insert(address.clone(), idx);
            }
            Action::Replace => {
                let destroy = push(address, StepOp::Destroy, diff.action);
                destroy_of.insert(address.clone(), destroy);
                let create = push(address, StepOp::Create, diff.action);
                apply_of.insert(address.clone(), create);
            }
            Action::Delete => {}
        }
    }
    for diff in deletes {
        destroy_of.insert(diff.address.clone(), push(&diff.address, StepOp::Destroy, diff.action));
    }

    // Prior dependents of each recorded resource
    let mut prior_dependents: HashMap<ResourceAddress, Vec<ResourceAddress>> = HashMap::new();
    for record in prior.resources.values() {
        for dep in &record.dependencies {
            prior_dependents
                .entry(dep.clone())
                .or_default()
                .push(record.address());
        }
    }

    let mut edges: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); steps.len()];
    for (idx, step) in steps.iter().enumerate() {
        match step.op {
            StepOp::Create | StepOp::Update => {
                for dep in dependencies.get(&step.address).into_iter().flatten() {
                    if let Some(&d) = apply_of.get(dep) {
                        edges[idx].insert(d);
                    }
                }
                if let Some(&d) = destroy_of.get(&step.address) {
                    edges[idx].insert(d);
                }
            }
            StepOp::Destroy => {
                for dependent in prior_dependents.get(&step.address).into_iter().flatten() {
                    if let Some(&d) = destroy_of.get(dependent) {
                        edges[idx].insert(d);
                    }
                    // A dependent being rewritten must let go first
                    if step.action == Action::Delete
                        && let Some(&d) = apply_of.get(dependent)
                    {
                        edges[idx].insert(d);
                    }
                }
            }
        }
    }

    // Kahn's algorithm, lowest index first
    let mut pending: Vec<usize> = edges.iter().map(BTreeSet::len).collect();
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); steps.len()];
    for (idx, preds) in edges.iter().enumerate() {
        for &p in preds {
            successors[p].push(idx);
        }
    }
    let mut ready: BinaryHeap<Reverse<usize>> = pending
        .iter()
        .enumerate()
        .filter(|(_, n)| **n == 0)
        .map(|(i, _)| Reverse(i))
        .collect();
    let mut order = Vec::with_capacity(steps.len());
    while let Some(Reverse(idx)) = ready.pop() {
        order.push(idx);
        for &next in &successors[idx] {
            pending[next] -= 1;
            if pending[next] == 0 {
                ready.push(Reverse(next));
            }
        }
    }
    if order.len() != steps.len() {
        return Err(Error::Cycle {
            path: (0..steps.len())
                .filter(|i| pending[*i] > 0)
                .map(|i| format!("{} {}", steps[i].op, steps[i].address))
                .collect(),
        });
    }

    let mut position = vec![0usize; steps.len()];
    for (pos, &idx) in order.iter().enumerate() {
        position[idx] = pos;
    }
    Ok(order
        .iter()
        .map(|&idx| {
            let mut step = steps[idx].clone();
            step.after = edges[idx].iter().map(|p| position[*p]).collect();
            step.after.sort_unstable();
            step
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AttributeSchema, AttributeType, ResourceSchema};
    use crate::state::ResourceRecord;
    use serde_json::json;

    fn registry() -> SchemaRegistry {
        let string = || AttributeSchema::new(AttributeType::String);
        let mut registry = SchemaRegistry::new();
        registry.register(
            ResourceSchema::new("aws_vpc")
                .attribute("cidr_block", string().required().force_new())
                .attribute("tags", AttributeSchema::new(AttributeType::Map))
                .attribute("arn", string().computed()),
        );
        registry.register(
            ResourceSchema::new("aws_subnet")
                .attribute("vpc_id", string().required().force_new())
                .attribute("cidr_block", string().required().force_new())
                .attribute("name", string()),
        );
        registry.register(
            ResourceSchema::new("aws_instance")
                .attribute("subnet_id", string().force_new())
                .attribute("note", string()),
        );
        registry
    }

    const DOC: &str = r#"
[variables.cidr]
default = "10.0.0.0/16"

[resources.aws_vpc.main]
cidr_block = "${var.cidr}"

[resources.aws_subnet.a]
vpc_id = "${aws_vpc.main.id}"
cidr_block = "10.0.1.0/24"
name = "subnet-${aws_vpc.main.arn}"
"#;

    fn vars(doc: &Document) -> BTreeMap<String, Value> {
        crate::variables::resolve_variables(&doc.variables, &BTreeMap::new()).unwrap()
    }

    fn run(doc: &Document, prior: &StateSnapshot, options: &PlanOptions) -> Result<Plan> {
        let graph = DependencyGraph::build(doc)?;
        plan(
            doc,
            &graph,
            &registry(),
            &vars(doc),
            prior,
            options,
            Path::new("."),
        )
    }

    fn record(address: &str, id: &str, attributes: Value, deps: &[&str]) -> ResourceRecord {
        let address: ResourceAddress = address.parse().unwrap();
        ResourceRecord {
            kind: address.kind,
            name: address.name,
            id: id.into(),
            attributes: attributes.as_object().cloned().unwrap(),
            computed: json!({ "arn": format!("arn:{id}") }).as_object().cloned().unwrap(),
            dependencies: deps.iter().map(|d| d.parse().unwrap()).collect(),
            status: ResourceStatus::Created,
            updated_at: chrono::Utc::now(),
        }
    }

    fn converged() -> StateSnapshot {
        let mut state = StateSnapshot::default();
        state.upsert(record(
            "aws_vpc.main",
            "vpc-1",
            json!({ "cidr_block": "10.0.0.0/16" }),
            &[],
        ));
        state.upsert(record(
            "aws_subnet.a",
            "subnet-1",
            json!({ "vpc_id": "vpc-1", "cidr_block": "10.0.1.0/24", "name": "subnet-arn:vpc-1" }),
            &["aws_vpc.main"],
        ));
        state
    }

    fn step_names(plan: &Plan) -> Vec<String> {
        plan.steps
            .iter()
            .map(|s| format!("{} {}", s.op, s.address))
            .collect()
    }

    #[test]
    fn test_initial_plan_creates_in_order() {
        let doc = Document::from_toml_str(DOC).unwrap();
        let plan = run(&doc, &StateSnapshot::default(), &PlanOptions::default()).unwrap();
        assert_eq!(
            step_names(&plan),
            vec!["create aws_vpc.main", "create aws_subnet.a"]
        );
        assert_eq!(plan.steps[1].after, vec![0]);

        let subnet = plan.change(&"aws_subnet.a".parse().unwrap()).unwrap();
        let vpc_id = subnet.changes.iter().find(|c| c.name == "vpc_id").unwrap();
        assert!(vpc_id.is_unknown());
        assert_eq!(plan.summary().additions, 2);
    }

    #[test]
    fn test_converged_state_yields_empty_plan() {
        let doc = Document::from_toml_str(DOC).unwrap();
        let plan = run(&doc, &converged(), &PlanOptions::default()).unwrap();
        assert!(plan.is_empty(), "{:?}", plan.changes);
        assert!(plan.steps.is_empty());
    }

    #[test]
    fn test_force_new_change_cascades_replacement() {
        let doc = Document::from_toml_str(&DOC.replace("10.0.0.0/16", "10.1.0.0/16")).unwrap();
        let plan = run(&doc, &converged(), &PlanOptions::default()).unwrap();

        assert_eq!(plan.changes[0].action, Action::Replace);
        // vpc_id becomes unknown and is force_new
        assert_eq!(plan.change(&"aws_subnet.a".parse().unwrap()).unwrap().action, Action::Replace);

        let names = step_names(&plan);
        let pos = |s: &str| names.iter().position(|n| n == s).unwrap();
        assert!(pos("destroy aws_subnet.a") < pos("destroy aws_vpc.main"));
        assert!(pos("destroy aws_vpc.main") < pos("create aws_vpc.main"));
        assert!(pos("create aws_vpc.main") < pos("create aws_subnet.a"));
    }

    #[test]
    fn test_in_place_update() {
        let doc = Document::from_toml_str(&format!(
            "{DOC}\n[resources.aws_vpc.main.tags]\nName = \"main\"\n"
        ))
        .unwrap();
        let plan = run(&doc, &converged(), &PlanOptions::default()).unwrap();
        assert_eq!(plan.changes.len(), 1);
        assert_eq!(plan.changes[0].action, Action::Update);
        assert_eq!(step_names(&plan), vec!["update aws_vpc.main"]);
    }

    #[test]
    fn test_unknown_on_non_force_new_is_update() {
        let doc = Document::from_toml_str(
            r#"
[resources.aws_vpc.main]
cidr_block = "10.9.0.0/16"

[resources.aws_instance.web]
note = "${aws_vpc.main.arn}"
"#,
        )
        .unwrap();
        let mut prior = StateSnapshot::default();
        prior.upsert(record("aws_vpc.main", "vpc-1", json!({ "cidr_block": "10.0.0.0/16" }), &[]));
        prior.upsert(record(
            "aws_instance.web",
            "i-1",
            json!({ "note": "arn:vpc-1" }),
            &["aws_vpc.main"],
        ));
        let plan = run(&doc, &prior, &PlanOptions::default()).unwrap();
        assert_eq!(
            plan.change(&"aws_instance.web".parse().unwrap()).unwrap().action,
            Action::Update
        );
        let names = step_names(&plan);
        let pos = |s: &str| names.iter().position(|n| n == s).unwrap();
        assert!(pos("create aws_vpc.main") < pos("update aws_instance.web"));
    }

    #[test]
    fn test_removed_declaration_deletes_dependents_first() {
        let doc = Document::default();
        let plan = run(&doc, &converged(), &PlanOptions::default()).unwrap();
        assert_eq!(
            step_names(&plan),
            vec!["destroy aws_subnet.a", "destroy aws_vpc.main"]
        );
        assert_eq!(plan.steps[1].after, vec![0]);
        assert_eq!(plan.summary().removals, 2);
    }

    #[test]
    fn test_delete_waits_for_dependent_update() {
        // subnet drops its reference to the old vpc, which is removed
        let doc = Document::from_toml_str(
            r#"
[resources.aws_subnet.a]
vpc_id = "vpc-1"
cidr_block = "10.0.1.0/24"
name = "standalone"
"#,
        )
        .unwrap();
        let plan = run(&doc, &converged(), &PlanOptions::default()).unwrap();
        assert_eq!(
            step_names(&plan),
            vec!["update aws_subnet.a", "destroy aws_vpc.main"]
        );
    }

    #[test]
    fn test_failed_record_is_replaced() {
        let doc = Document::from_toml_str(DOC).unwrap();
        let mut prior = converged();
        prior.resources.get_mut("aws_subnet.a").unwrap().status = ResourceStatus::Failed;
        let plan = run(&doc, &prior, &PlanOptions::default()).unwrap();
        let change = plan.change(&"aws_subnet.a".parse().unwrap()).unwrap();
        assert_eq!(change.action, Action::Replace);
        assert_eq!(change.reason.as_deref(), Some("previous apply failed"));
    }

    #[test]
    fn test_prevent_destroy_guard() {
        let doc = Document::from_toml_str(&format!(
            "{}\nprevent_destroy = true\n",
            DOC.replace("cidr_block = \"${var.cidr}\"", "cidr_block = \"10.5.0.0/16\"")
                .trim_end()
        ))
        .unwrap();
        // prevent_destroy landed on aws_subnet.a, whose vpc is replaced
        let err = run(&doc, &converged(), &PlanOptions::default()).unwrap_err();
        assert!(matches!(err, Error::PreventDestroy { .. }));

        let err = run(
            &doc,
            &converged(),
            &PlanOptions {
                destroy: true,
                ..PlanOptions::default()
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("destroy"));
    }

    #[test]
    fn test_destroy_plan() {
        let doc = Document::from_toml_str(DOC).unwrap();
        let options = PlanOptions {
            destroy: true,
            ..PlanOptions::default()
        };
        let plan = run(&doc, &converged(), &options).unwrap();
        assert_eq!(
            step_names(&plan),
            vec!["destroy aws_subnet.a", "destroy aws_vpc.main"]
        );
    }

    #[test]
    fn test_target_keeps_dependencies() {
        let doc = Document::from_toml_str(&format!(
            "{DOC}\n[resources.aws_instance.web]\nnote = \"x\"\n"
        ))
        .unwrap();
        let options = PlanOptions {
            targets: vec!["aws_subnet.a".parse().unwrap()],
            ..PlanOptions::default()
        };
        let plan = run(&doc, &StateSnapshot::default(), &options).unwrap();
        assert_eq!(
            step_names(&plan),
            vec!["create aws_vpc.main", "create aws_subnet.a"]
        );
    }

    #[test]
    fn test_target_parsing() {
        let t: Target = "aws_subnet".parse().unwrap();
        assert!(t.matches(&"aws_subnet.b".parse().unwrap()));
        let t: Target = "aws_subnet.a".parse().unwrap();
        assert!(!t.matches(&"aws_subnet.b".parse().unwrap()));
        assert_eq!(t.to_string(), "aws_subnet.a");
        assert!("not a target".parse::<Target>().is_err());
    }
}
