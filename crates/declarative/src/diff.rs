//! Diff computation between recorded and desired attributes

use crate::address::ResourceAddress;
use crate::document::Attributes;
use crate::expression::Resolved;
use crate::schema::ResourceSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Desired attribute values, each possibly unknown until apply.
pub type DesiredAttributes = BTreeMap<String, Resolved>;

/// What the plan does to a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Create,
    Update,
    /// Destroy then create
    Replace,
    Delete,
}

impl Action {
    /// Symbol used in plan output.
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Create => "+",
            Self::Update => "~",
            Self::Replace => "-/+",
            Self::Delete => "-",
        }
    }

    pub fn verb(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "destroy",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())
    }
}

/// Change of a single attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeChange {
    pub name: String,
    /// Recorded value, `None` when newly set
    pub before: Option<Value>,
    /// Desired value, `None` when removed
    pub after: Option<Resolved>,
    /// The schema marks this attribute `force_new`
    pub forces_replacement: bool,
}

impl AttributeChange {
    /// Value is known only after apply.
    pub fn is_unknown(&self) -> bool {
        matches!(self.after, Some(Resolved::Unknown))
    }
}

/// Planned change of one resource.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDiff {
    pub address: ResourceAddress,
    pub action: Action,
    pub changes: Vec<AttributeChange>,
    /// Why the action was chosen, when it is not obvious from the changes
    pub reason: Option<String>,
}

impl ResourceDiff {
    pub fn is_addition(&self) -> bool {
        self.action == Action::Create
    }

    pub fn is_removal(&self) -> bool {
        self.action == Action::Delete
    }

    pub fn is_modification(&self) -> bool {
        matches!(self.action, Action::Update | Action::Replace)
    }

    /// Names of attributes forcing replacement.
    pub fn replacement_causes(&self) -> Vec<&str> {
        self.changes
            .iter()
            .filter(|c| c.forces_replacement)
            .map(|c| c.name.as_str())
            .collect()
    }
}

/// Per-attribute changes between recorded inputs and desired values.
///
/// Unknown desired values always count as a change.
pub fn diff_attributes(
    schema: Option<&ResourceSchema>,
    prior: &Attributes,
    desired: &DesiredAttributes,
) -> Vec<AttributeChange> {
    let names: BTreeSet<&String> = prior.keys().chain(desired.keys()).collect();
    let forces = |name: &str| schema.is_some_and(|s| s.forces_replacement(name));

    names
        .into_iter()
        .filter_map(|name| {
            let before = prior.get(name);
            let after = desired.get(name);
            let changed = match (before, after) {
                (Some(b), Some(Resolved::Known(a))) => a != b,
                (None, Some(Resolved::Known(Value::Null))) => false,
                (Some(Value::Null), None) => false,
                (None, None) => false,
                _ => true,
            };
            changed.then(|| AttributeChange {
                name: name.clone(),
                before: before.cloned(),
                after: after.cloned(),
                forces_replacement: forces(name),
            })
        })
        .collect()
}

/// Changes for a resource that does not exist yet.
pub fn creation_changes(desired: &DesiredAttributes) -> Vec<AttributeChange> {
    desired
        .iter()
        .map(|(name, value)| AttributeChange {
            name: name.clone(),
            before: None,
            after: Some(value.clone()),
            forces_replacement: false,
        })
        .collect()
}

/// Changes for a resource being removed.
pub fn removal_changes(prior: &Attributes) -> Vec<AttributeChange> {
    prior
        .iter()
        .map(|(name, value)| AttributeChange {
            name: name.clone(),
            before: Some(value.clone()),
            after: None,
            forces_replacement: false,
        })
        .collect()
}

/// Diff summary statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub additions: usize,
    pub removals: usize,
    pub modifications: usize,
    pub replacements: usize,
}

impl DiffSummary {
    pub fn from_diffs(diffs: &[ResourceDiff]) -> Self {
        let mut summary = Self::default();
        for diff in diffs {
            match diff.action {
                Action::Create => summary.additions += 1,
                Action::Delete => summary.removals += 1,
                Action::Update => summary.modifications += 1,
                Action::Replace => summary.replacements += 1,
            }
        }
        summary
    }

    /// Total number of changes
    pub fn total(&self) -> usize {
        self.additions + self.removals + self.modifications + self.replacements
    }

    pub fn has_changes(&self) -> bool {
        self.total() > 0
    }
}

impl fmt::Display for DiffSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to add, {} to change, {} to replace, {} to destroy",
            self.additions, self.modifications, self.replacements, self.removals
        )
    }
}

/// Group diffs by resource kind
pub fn group_by_kind(diffs: &[ResourceDiff]) -> BTreeMap<String, Vec<&ResourceDiff>> {
    let mut groups: BTreeMap<String, Vec<&ResourceDiff>> = BTreeMap::new();
    for diff in diffs {
        groups
            .entry(diff.address.kind.clone())
            .or_default()
            .push(diff);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AttributeSchema, AttributeType};
    use serde_json::json;

    fn schema() -> ResourceSchema {
        ResourceSchema::new("aws_subnet")
            .attribute(
                "cidr_block",
                AttributeSchema::new(AttributeType::String).force_new(),
            )
            .attribute("tags", AttributeSchema::new(AttributeType::Map))
    }

    fn prior() -> Attributes {
        json!({ "cidr_block": "10.0.1.0/24", "tags": { "Name": "a" } })
            .as_object()
            .cloned()
            .unwrap()
    }

    fn desired(pairs: &[(&str, Resolved)]) -> DesiredAttributes {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_no_changes() {
        let want = desired(&[
            ("cidr_block", Resolved::Known(json!("10.0.1.0/24"))),
            ("tags", Resolved::Known(json!({ "Name": "a" }))),
        ]);
        assert!(diff_attributes(Some(&schema()), &prior(), &want).is_empty());
    }

    #[test]
    fn test_in_place_and_replacing_changes() {
        let want = desired(&[
            ("cidr_block", Resolved::Known(json!("10.0.9.0/24"))),
            ("tags", Resolved::Known(json!({ "Name": "b" }))),
        ]);
        let changes = diff_attributes(Some(&schema()), &prior(), &want);
        assert_eq!(changes.len(), 2);
        assert!(changes[0].forces_replacement);
        assert_eq!(changes[0].name, "cidr_block");
        assert!(!changes[1].forces_replacement);
    }

    #[test]
    fn test_unknown_is_a_change() {
        let want = desired(&[
            ("cidr_block", Resolved::Known(json!("10.0.1.0/24"))),
            ("tags", Resolved::Unknown),
        ]);
        let changes = diff_attributes(Some(&schema()), &prior(), &want);
        assert_eq!(changes.len(), 1);
        assert!(changes[0].is_unknown());
    }

    #[test]
    fn test_removed_attribute() {
        let want = desired(&[("cidr_block", Resolved::Known(json!("10.0.1.0/24")))]);
        let changes = diff_attributes(Some(&schema()), &prior(), &want);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].after, None);
    }

    #[test]
    fn test_summary_and_grouping() {
        let addr = |s: &str| s.parse::<ResourceAddress>().unwrap();
        let diff = |a: &str, action| ResourceDiff {
            address: addr(a),
            action,
            changes: Vec::new(),
            reason: None,
        };
        let diffs = vec![
            diff("aws_vpc.main", Action::Create),
            diff("aws_subnet.a", Action::Replace),
            diff("aws_subnet.b", Action::Delete),
        ];
        let summary = DiffSummary::from_diffs(&diffs);
        assert_eq!(summary.total(), 3);
        assert_eq!(
            summary.to_string(),
            "1 to add, 0 to change, 1 to replace, 1 to destroy"
        );
        let groups = group_by_kind(&diffs);
        assert_eq!(groups["aws_subnet"].len(), 2);
    }
}
