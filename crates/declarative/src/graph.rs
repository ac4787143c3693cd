//! Dependency graph - references between declarations as a DAG
//!
//! An edge `a -> b` means `a` depends on `b` (it references one of `b`'s
//! attributes or lists it in `depends_on`), so `b` must be created first
//! and destroyed last.

use crate::address::ResourceAddress;
use crate::document::Document;
use crate::error::{Error, Result};
use crate::expression::{self, Expr};
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap};
use std::fmt::Write as _;

/// Directed acyclic graph over resource addresses.
///
/// Node indices follow declaration order, which is also the tie-break for
/// every ordering the graph produces.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: Vec<ResourceAddress>,
    index: HashMap<ResourceAddress, usize>,
    deps: Vec<BTreeSet<usize>>,
    rdeps: Vec<BTreeSet<usize>>,
}

impl DependencyGraph {
    /// Build the graph for a document.
    ///
    /// Fails on duplicate declarations, references to undeclared resources
    /// or variables, malformed expressions and cycles.
    pub fn build(doc: &Document) -> Result<Self> {
        let mut graph = Self::default();
        for decl in &doc.resources {
            if graph.index.contains_key(&decl.address) {
                return Err(Error::DuplicateResource {
                    address: decl.address.to_string(),
                });
            }
            graph.insert_node(decl.address.clone());
        }

        for decl in &doc.resources {
            let from = graph.index[&decl.address];
            let owner = decl.address.to_string();

            let mut raw = Vec::new();
            for value in decl.attributes.values() {
                expression::collect_expressions(value, &mut raw);
            }
            for target in references(&raw, doc, &owner)? {
                let to = graph.index.get(&target).copied().ok_or_else(|| {
                    Error::UnresolvedReference {
                        from: owner.clone(),
                        missing: format!("resource {target}"),
                    }
                })?;
                graph.add_edge(from, to);
            }

            for target in &decl.depends_on {
                let to = graph.index.get(target).copied().ok_or_else(|| {
                    Error::UnresolvedReference {
                        from: owner.clone(),
                        missing: format!("resource {target}"),
                    }
                })?;
                graph.add_edge(from, to);
            }
        }

        for (name, output) in &doc.outputs {
            let owner = format!("output.{name}");
            let mut raw = Vec::new();
            expression::collect_expressions(&output.value, &mut raw);
            if let Some(target) = references(&raw, doc, &owner)?
                .into_iter()
                .find(|t| !graph.contains(t))
            {
                return Err(Error::UnresolvedReference {
                    from: owner,
                    missing: format!("resource {target}"),
                });
            }
        }

        graph.check_acyclic()?;
        log::debug!(
            "Built dependency graph: {} nodes, {} edges",
            graph.len(),
            graph.edge_count()
        );
        Ok(graph)
    }

    /// Build a graph from recorded dependencies (e.g. from the state snapshot).
    ///
    /// Dependencies on addresses that are not nodes are dropped.
    pub fn from_edges<I>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (ResourceAddress, Vec<ResourceAddress>)>,
    {
        let entries: Vec<_> = entries.into_iter().collect();
        let mut graph = Self::default();
        for (address, _) in &entries {
            if !graph.contains(address) {
                graph.insert_node(address.clone());
            }
        }
        for (address, deps) in &entries {
            let from = graph.index[address];
            for dep in deps {
                if let Some(&to) = graph.index.get(dep) {
                    graph.add_edge(from, to);
                }
            }
        }
        graph.check_acyclic()?;
        Ok(graph)
    }

    fn insert_node(&mut self, address: ResourceAddress) -> usize {
        let idx = self.nodes.len();
        self.index.insert(address.clone(), idx);
        self.nodes.push(address);
        self.deps.push(BTreeSet::new());
        self.rdeps.push(BTreeSet::new());
        idx
    }

    fn add_edge(&mut self, from: usize, to: usize) {
        self.deps[from].insert(to);
        self.rdeps[to].insert(from);
    }

    fn edge_count(&self) -> usize {
        self.deps.iter().map(BTreeSet::len).sum()
    }

    /// Kahn's algorithm over indices; ready nodes are taken lowest index first.
    fn order_indices(&self) -> (Vec<usize>, Vec<usize>) {
        let mut pending: Vec<usize> = self.deps.iter().map(BTreeSet::len).collect();
        let mut ready: BinaryHeap<Reverse<usize>> = pending
            .iter()
            .enumerate()
            .filter(|(_, n)| **n == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(Reverse(idx)) = ready.pop() {
            order.push(idx);
            for &dependent in &self.rdeps[idx] {
                pending[dependent] -= 1;
                if pending[dependent] == 0 {
                    ready.push(Reverse(dependent));
                }
            }
        }

        let remaining = (0..self.nodes.len()).filter(|i| pending[*i] > 0).collect();
        (order, remaining)
    }

    fn check_acyclic(&self) -> Result<()> {
        let (_, remaining) = self.order_indices();
        let Some(&start) = remaining.first() else {
            return Ok(());
        };

        // Every remaining node still waits on a remaining dependency, so
        // following those edges must come back to a node already visited.
        let stuck: BTreeSet<usize> = remaining.iter().copied().collect();
        let mut walk = vec![start];
        let mut seen = HashMap::from([(start, 0usize)]);
        let mut current = start;
        loop {
            let Some(&next) = self.deps[current].iter().find(|d| stuck.contains(d)) else {
                break;
            };
            if let Some(&pos) = seen.get(&next) {
                let mut path: Vec<String> =
                    walk[pos..].iter().map(|i| self.nodes[*i].to_string()).collect();
                path.push(self.nodes[next].to_string());
                return Err(Error::Cycle { path });
            }
            seen.insert(next, walk.len());
            walk.push(next);
            current = next;
        }

        Err(Error::Cycle {
            path: remaining.iter().map(|i| self.nodes[*i].to_string()).collect(),
        })
    }

    /// Deterministic topological order: dependencies first, ties broken by
    /// declaration order.
    pub fn topological_order(&self) -> Vec<&ResourceAddress> {
        self.order_indices()
            .0
            .into_iter()
            .map(|i| &self.nodes[i])
            .collect()
    }

    /// Direct dependencies of a node.
    pub fn dependencies(&self, address: &ResourceAddress) -> Vec<&ResourceAddress> {
        self.index
            .get(address)
            .map(|&i| self.deps[i].iter().map(|d| &self.nodes[*d]).collect())
            .unwrap_or_default()
    }

    /// Direct dependents of a node.
    pub fn dependents(&self, address: &ResourceAddress) -> Vec<&ResourceAddress> {
        self.index
            .get(address)
            .map(|&i| self.rdeps[i].iter().map(|d| &self.nodes[*d]).collect())
            .unwrap_or_default()
    }

    fn closure(
        &self,
        address: &ResourceAddress,
        edges: &[BTreeSet<usize>],
    ) -> Vec<&ResourceAddress> {
        let Some(&start) = self.index.get(address) else {
            return Vec::new();
        };
        let mut found = BTreeSet::new();
        let mut stack = vec![start];
        while let Some(idx) = stack.pop() {
            for &next in &edges[idx] {
                if found.insert(next) {
                    stack.push(next);
                }
            }
        }
        found.remove(&start);
        found.into_iter().map(|i| &self.nodes[i]).collect()
    }

    /// Everything that depends on a node, directly or indirectly.
    pub fn transitive_dependents(&self, address: &ResourceAddress) -> Vec<&ResourceAddress> {
        self.closure(address, &self.rdeps)
    }

    /// Everything a node depends on, directly or indirectly.
    pub fn transitive_dependencies(&self, address: &ResourceAddress) -> Vec<&ResourceAddress> {
        self.closure(address, &self.deps)
    }

    /// Parallel waves: every node sits one level above its deepest dependency.
    pub fn levels(&self) -> Vec<Vec<&ResourceAddress>> {
        let mut level = vec![0usize; self.nodes.len()];
        let mut levels: Vec<Vec<&ResourceAddress>> = Vec::new();
        for idx in self.order_indices().0 {
            let depth = self.deps[idx]
                .iter()
                .map(|d| level[*d] + 1)
                .max()
                .unwrap_or(0);
            level[idx] = depth;
            if levels.len() <= depth {
                levels.resize_with(depth + 1, Vec::new);
            }
            levels[depth].push(&self.nodes[idx]);
        }
        levels
    }

    /// Graphviz rendering, edges pointing from dependent to dependency.
    pub fn to_dot(&self) -> String {
        let mut out =
            String::from("digraph strata {\n  rankdir = \"RL\";\n  node [shape = box];\n");
        for node in &self.nodes {
            let _ = writeln!(out, "  \"{node}\";");
        }
        for (from, deps) in self.deps.iter().enumerate() {
            for to in deps {
                let _ = writeln!(out, "  \"{}\" -> \"{}\";", self.nodes[from], self.nodes[*to]);
            }
        }
        out.push_str("}\n");
        out
    }

    pub fn contains(&self, address: &ResourceAddress) -> bool {
        self.index.contains_key(address)
    }

    /// Nodes in declaration order.
    pub fn nodes(&self) -> &[ResourceAddress] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Resource targets of a set of raw expressions; variables must be declared.
fn references(raw: &[String], doc: &Document, owner: &str) -> Result<BTreeSet<ResourceAddress>> {
    let mut targets = BTreeSet::new();
    for text in raw {
        let expr = expression::parse_expr(text).map_err(|message| Error::InvalidExpression {
            from: owner.to_string(),
            expression: text.clone(),
            message,
        })?;
        match expr {
            Expr::Resource { address, .. } => {
                targets.insert(address);
            }
            Expr::Variable { name, .. } if !doc.variables.contains_key(&name) => {
                return Err(Error::UnresolvedReference {
                    from: owner.to_string(),
                    missing: format!("variable {name}"),
                });
            }
            Expr::Variable { .. } | Expr::Function { .. } => {}
        }
    }
    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> ResourceAddress {
        s.parse().unwrap()
    }

    fn names(list: &[&ResourceAddress]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    const NETWORK: &str = r#"
[variables.cidr]
default = "10.0.0.0/16"

[resources.aws_vpc.main]
cidr_block = "${var.cidr}"

[resources.aws_subnet.a]
vpc_id = "${aws_vpc.main.id}"

[resources.aws_subnet.b]
vpc_id = "${aws_vpc.main.id}"

[resources.aws_instance.web]
subnet_id = "${aws_subnet.a.id}"
tags = { Name = "web-${aws_subnet.b.id}" }
"#;

    fn network() -> DependencyGraph {
        DependencyGraph::build(&Document::from_toml_str(NETWORK).unwrap()).unwrap()
    }

    #[test]
    fn test_topological_order_respects_references() {
        let graph = network();
        let order = names(&graph.topological_order());
        let pos = |s: &str| order.iter().position(|o| o == s).unwrap();
        assert_eq!(order.len(), 4);
        assert!(pos("aws_vpc.main") < pos("aws_subnet.a"));
        assert!(pos("aws_subnet.a") < pos("aws_instance.web"));
        assert!(pos("aws_subnet.b") < pos("aws_instance.web"));
    }

    #[test]
    fn test_order_is_deterministic() {
        let first = names(&network().topological_order());
        for _ in 0..5 {
            assert_eq!(names(&network().topological_order()), first);
        }
    }

    #[test]
    fn test_levels_group_parallel_waves() {
        let graph = network();
        let levels: Vec<Vec<String>> = graph.levels().iter().map(|l| names(l)).collect();
        assert_eq!(
            levels,
            vec![
                vec!["aws_vpc.main".to_string()],
                vec!["aws_subnet.a".to_string(), "aws_subnet.b".to_string()],
                vec!["aws_instance.web".to_string()],
            ]
        );
    }

    #[test]
    fn test_dependents_and_closure() {
        let graph = network();
        let vpc = addr("aws_vpc.main");
        assert_eq!(names(&graph.dependents(&vpc)), vec!["aws_subnet.a", "aws_subnet.b"]);
        assert_eq!(graph.transitive_dependents(&vpc).len(), 3);
        assert_eq!(
            names(&graph.dependencies(&addr("aws_instance.web"))),
            vec!["aws_subnet.a", "aws_subnet.b"]
        );
        assert_eq!(
            graph
                .transitive_dependencies(&addr("aws_instance.web"))
                .len(),
            3
        );
    }

    #[test]
    fn test_cycle_is_rejected_with_path() {
        let doc = Document::from_toml_str(
            r#"
[resources.aws_security_group.a]
peer = "${aws_security_group.b.id}"

[resources.aws_security_group.b]
peer = "${aws_security_group.a.id}"

[resources.aws_vpc.main]
cidr_block = "10.0.0.0/16"
"#,
        )
        .unwrap();
        let err = DependencyGraph::build(&doc).unwrap_err();
        let Error::Cycle { path } = err else {
            panic!("expected cycle, got {err}");
        };
        assert_eq!(path.first(), path.last());
        assert!(path.contains(&"aws_security_group.a".to_string()));
        assert!(path.contains(&"aws_security_group.b".to_string()));
        assert!(!path.contains(&"aws_vpc.main".to_string()));
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let doc =
            Document::from_toml_str("[resources.aws_vpc.main]\nname = \"${aws_vpc.main.id}\"\n")
                .unwrap();
        assert!(matches!(
            DependencyGraph::build(&doc),
            Err(Error::Cycle { .. })
        ));
    }

    #[test]
    fn test_dangling_reference_names_target() {
        let doc = Document::from_toml_str(
            "[resources.aws_subnet.a]\nvpc_id = \"${aws_vpc.missing.id}\"\n",
        )
        .unwrap();
        let err = DependencyGraph::build(&doc).unwrap_err();
        assert_eq!(
            err.to_string(),
            "aws_subnet.a references undeclared resource aws_vpc.missing"
        );
    }

    #[test]
    fn test_undeclared_variable_and_output_reference() {
        let doc =
            Document::from_toml_str("[resources.aws_vpc.main]\ncidr_block = \"${var.nope}\"\n")
                .unwrap();
        assert!(
            DependencyGraph::build(&doc)
                .unwrap_err()
                .to_string()
                .contains("variable nope")
        );

        let doc = Document::from_toml_str("[outputs.x]\nvalue = \"${aws_vpc.gone.id}\"\n").unwrap();
        let err = DependencyGraph::build(&doc).unwrap_err();
        assert!(err.to_string().starts_with("output.x references undeclared"));
    }

    #[test]
    fn test_depends_on_adds_edge() {
        let doc = Document::from_toml_str(
            r#"
[resources.aws_iam_role.lambda]
name = "lambda"

[resources.aws_lambda_function.api]
depends_on = ["aws_iam_role.lambda"]
"#,
        )
        .unwrap();
        let graph = DependencyGraph::build(&doc).unwrap();
        assert_eq!(
            names(&graph.dependencies(&addr("aws_lambda_function.api"))),
            vec!["aws_iam_role.lambda"]
        );
    }

    #[test]
    fn test_duplicate_declaration() {
        let mut doc = Document::from_toml_str("[resources.aws_vpc.main]\n").unwrap();
        let dup = doc.resources[0].clone();
        doc.push(dup);
        assert!(matches!(
            DependencyGraph::build(&doc),
            Err(Error::DuplicateResource { .. })
        ));
    }

    #[test]
    fn test_from_edges_ignores_unknown_targets() {
        let graph = DependencyGraph::from_edges([
            (addr("aws_subnet.a"), vec![addr("aws_vpc.main"), addr("aws_vpc.gone")]),
            (addr("aws_vpc.main"), vec![]),
        ])
        .unwrap();
        assert_eq!(names(&graph.topological_order()), vec!["aws_vpc.main", "aws_subnet.a"]);
    }

    #[test]
    fn test_to_dot() {
        let dot = network().to_dot();
        assert!(dot.starts_with("digraph strata {"));
        assert!(dot.contains("\"aws_subnet.a\" -> \"aws_vpc.main\";"));
    }
}
