//! Resource registry - typed schemas per resource kind
//!
//! The registry is a flat map from kind to schema. Schemas are data: they
//! are registered in code (built-in kinds) or loaded from TOML files:
//!
//! ```toml
//! [schemas.aws_subnet]
//! description = "A subnet inside a VPC"
//!
//! [schemas.aws_subnet.attributes]
//! vpc_id = { type = "string", required = true, force_new = true }
//! cidr_block = { type = "string", required = true, force_new = true }
//! map_public_ip_on_launch = { type = "bool" }
//! tags = { type = "map", element = "string" }
//! arn = { type = "string", computed = true }
//! ```
//!
//! Every schema implicitly has a computed `id` attribute holding the
//! provider-assigned identifier.

use crate::document::{Document, ResourceDecl};
use crate::error::{Error, Result, SchemaViolation};
use crate::expression::{self, Expr};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Name of the implicit provider-assigned identifier attribute.
pub const ID_ATTRIBUTE: &str = "id";

/// Type of an attribute value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    String,
    Number,
    Bool,
    /// List of values, optionally typed by `element`
    List,
    /// String-keyed map, optionally typed by `element`
    Map,
    /// Nested block with its own attribute schemas
    Block,
    /// List of nested blocks (e.g. ingress rules)
    BlockList,
    #[default]
    Any,
}

impl AttributeType {
    fn name(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Bool => "bool",
            Self::List => "list",
            Self::Map => "map",
            Self::Block => "block",
            Self::BlockList => "list of blocks",
            Self::Any => "any",
        }
    }

    fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Bool => value.is_boolean(),
            Self::List | Self::BlockList => value.is_array(),
            Self::Map | Self::Block => value.is_object(),
            Self::Any => true,
        }
    }
}

/// Schema of a single attribute.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeSchema {
    #[serde(rename = "type", default)]
    pub ty: AttributeType,
    /// Must be set in every declaration
    #[serde(default)]
    pub required: bool,
    /// Set by the provider; cannot be declared
    #[serde(default)]
    pub computed: bool,
    /// Changing the value requires destroy-and-recreate
    #[serde(default)]
    pub force_new: bool,
    /// Enumeration of accepted literal values
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed: Vec<Value>,
    /// Element type for lists and maps
    #[serde(default)]
    pub element: Option<AttributeType>,
    /// Nested attributes for blocks
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, AttributeSchema>,
    #[serde(default)]
    pub description: Option<String>,
}

impl AttributeSchema {
    pub fn new(ty: AttributeType) -> Self {
        Self {
            ty,
            ..Default::default()
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn computed(mut self) -> Self {
        self.computed = true;
        self
    }

    pub fn force_new(mut self) -> Self {
        self.force_new = true;
        self
    }

    pub fn allowed(mut self, values: impl IntoIterator<Item = Value>) -> Self {
        self.allowed = values.into_iter().collect();
        self
    }

    pub fn element(mut self, ty: AttributeType) -> Self {
        self.element = Some(ty);
        self
    }
}

/// Schema of a resource kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceSchema {
    #[serde(skip)]
    pub kind: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeSchema>,
}

impl ResourceSchema {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Default::default()
        }
    }

    /// Builder-style attribute registration.
    pub fn attribute(mut self, name: impl Into<String>, schema: AttributeSchema) -> Self {
        self.attributes.insert(name.into(), schema);
        self
    }

    /// Whether changing this attribute requires destroy-and-recreate.
    pub fn forces_replacement(&self, name: &str) -> bool {
        self.attributes.get(name).is_some_and(|a| a.force_new)
    }

    /// Whether an attribute (or the implicit `id`) can be referenced.
    pub fn has_attribute(&self, name: &str) -> bool {
        name == ID_ATTRIBUTE || self.attributes.contains_key(name)
    }

    /// Validate one declaration against this schema.
    pub fn validate(&self, decl: &ResourceDecl) -> Vec<SchemaViolation> {
        let mut problems = Vec::new();
        check_block(&self.attributes, &decl.attributes, "", &mut problems);
        problems
            .into_iter()
            .map(|(attribute, message)| SchemaViolation {
                address: decl.address.to_string(),
                attribute,
                message,
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct SchemaFile {
    #[serde(default)]
    schemas: BTreeMap<String, ResourceSchema>,
}

/// Flat registry of resource schemas keyed by kind.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: BTreeMap<String, ResourceSchema>,
}

impl SchemaRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the built-in local kinds.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for schema in crate::builtin::schemas() {
            registry.register(schema);
        }
        registry
    }

    /// Register (or replace) a schema.
    pub fn register(&mut self, schema: ResourceSchema) {
        if self.schemas.contains_key(&schema.kind) {
            log::debug!("Replacing schema for {}", schema.kind);
        }
        self.schemas.insert(schema.kind.clone(), schema);
    }

    /// Parse schemas from TOML and register them. Returns how many were added.
    pub fn extend_from_toml_str(&mut self, content: &str) -> Result<usize> {
        let file: SchemaFile = toml::from_str(content).map_err(|e| Error::Parse {
            path: "<schemas>".to_string(),
            message: e.to_string(),
        })?;
        let count = file.schemas.len();
        for (kind, mut schema) in file.schemas {
            schema.kind = kind;
            self.register(schema);
        }
        Ok(count)
    }

    /// Load a TOML schema file into the registry.
    pub fn load_file(&mut self, path: &Path) -> Result<usize> {
        let content = fs::read_to_string(path).map_err(|e| Error::io("read", path, e))?;
        let count = self.extend_from_toml_str(&content).map_err(|e| match e {
            Error::Parse { message, .. } => Error::Parse {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })?;
        log::debug!("Loaded {} schemas from {}", count, path.display());
        Ok(count)
    }

    pub fn get(&self, kind: &str) -> Option<&ResourceSchema> {
        self.schemas.get(kind)
    }

    /// Schema for a kind, or an error naming the declaration.
    pub fn require(&self, kind: &str, address: &str) -> Result<&ResourceSchema> {
        self.get(kind).ok_or_else(|| Error::UnknownKind {
            address: address.to_string(),
            kind: kind.to_string(),
        })
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.schemas.contains_key(kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Validate every declaration of a document.
    ///
    /// All violations are collected and reported together. References to
    /// attributes of other declared resources are checked against the
    /// target's schema as well.
    pub fn validate_document(&self, doc: &Document) -> Result<()> {
        let mut violations = Vec::new();

        for decl in &doc.resources {
            let Some(schema) = self.get(&decl.address.kind) else {
                violations.push(SchemaViolation {
                    address: decl.address.to_string(),
                    attribute: String::new(),
                    message: format!("unknown resource kind '{}'", decl.address.kind),
                });
                continue;
            };
            violations.extend(schema.validate(decl));

            for (name, value) in &decl.attributes {
                let mut raw = Vec::new();
                expression::collect_expressions(value, &mut raw);
                for expr in raw.iter().filter_map(|r| expression::parse_expr(r).ok()) {
                    let Expr::Resource { address, path } = expr else {
                        continue;
                    };
                    let Some(target) = self.get(&address.kind) else {
                        continue;
                    };
                    if !target.has_attribute(&path[0]) {
                        violations.push(SchemaViolation {
                            address: decl.address.to_string(),
                            attribute: name.clone(),
                            message: format!(
                                "references unknown attribute '{}' of {}",
                                path[0], address
                            ),
                        });
                    }
                }
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(Error::Schema(violations))
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

fn check_block(
    schemas: &BTreeMap<String, AttributeSchema>,
    values: &Map<String, Value>,
    prefix: &str,
    out: &mut Vec<(String, String)>,
) {
    for (name, value) in values {
        let path = join(prefix, name);
        match schemas.get(name) {
            None if name == ID_ATTRIBUTE => {
                out.push((path, "id is assigned by the provider".to_string()));
            }
            None => out.push((path, "unknown attribute".to_string())),
            Some(schema) if schema.computed => {
                out.push((path, "computed attribute cannot be set".to_string()));
            }
            Some(schema) => check_value(schema, value, &path, out),
        }
    }

    for (name, schema) in schemas {
        if schema.required && !values.contains_key(name) {
            out.push((join(prefix, name), "required attribute is missing".to_string()));
        }
    }
}

fn check_value(
    schema: &AttributeSchema,
    value: &Value,
    path: &str,
    out: &mut Vec<(String, String)>,
) {
    // A whole-value reference only gets its type once evaluated.
    if let Value::String(s) = value
        && expression::is_single_expression(s)
    {
        return;
    }

    if !schema.ty.matches(value) {
        out.push((
            path.to_string(),
            format!("expected {}, got {}", schema.ty.name(), type_name(value)),
        ));
        return;
    }

    match (schema.ty, value) {
        (AttributeType::List, Value::Array(items)) => {
            if let Some(element) = schema.element {
                for (i, item) in items.iter().enumerate() {
                    check_element(element, item, &format!("{path}.{i}"), out);
                }
            }
        }
        (AttributeType::Map, Value::Object(map)) => {
            if let Some(element) = schema.element {
                for (key, item) in map {
                    check_element(element, item, &format!("{path}.{key}"), out);
                }
            }
        }
        (AttributeType::Block, Value::Object(map)) => {
            check_block(&schema.attributes, map, path, out);
        }
        (AttributeType::BlockList, Value::Array(items)) => {
            for (i, item) in items.iter().enumerate() {
                match item {
                    Value::Object(map) => {
                        check_block(&schema.attributes, map, &format!("{path}.{i}"), out);
                    }
                    other => out.push((
                        format!("{path}.{i}"),
                        format!("expected block, got {}", type_name(other)),
                    )),
                }
            }
        }
        _ => {}
    }

    if !schema.allowed.is_empty() && !schema.allowed.contains(value) {
        let has_expression = value.as_str().is_some_and(expression::contains_expression);
        if !has_expression {
            let allowed: Vec<String> = schema.allowed.iter().map(Value::to_string).collect();
            out.push((
                path.to_string(),
                format!("value {value} is not one of [{}]", allowed.join(", ")),
            ));
        }
    }
}

fn check_element(ty: AttributeType, value: &Value, path: &str, out: &mut Vec<(String, String)>) {
    if let Value::String(s) = value
        && expression::is_single_expression(s)
    {
        return;
    }
    if !ty.matches(value) {
        out.push((
            path.to_string(),
            format!("expected {}, got {}", ty.name(), type_name(value)),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SCHEMAS: &str = r#"
[schemas.aws_vpc.attributes]
cidr_block = { type = "string", required = true, force_new = true }
tags = { type = "map", element = "string" }
arn = { type = "string", computed = true }

[schemas.aws_security_group.attributes]
vpc_id = { type = "string", required = true, force_new = true }
name = { type = "string" }

[schemas.aws_security_group.attributes.ingress]
type = "block_list"

[schemas.aws_security_group.attributes.ingress.attributes]
from_port = { type = "number", required = true }
to_port = { type = "number", required = true }
protocol = { type = "string", allowed = ["tcp", "udp", "icmp", "-1"] }
cidr_blocks = { type = "list", element = "string" }
"#;

    fn registry() -> SchemaRegistry {
        let mut registry = SchemaRegistry::new();
        assert_eq!(registry.extend_from_toml_str(SCHEMAS).unwrap(), 2);
        registry
    }

    fn violations(doc: &str) -> Vec<SchemaViolation> {
        let doc = Document::from_toml_str(doc).unwrap();
        match registry().validate_document(&doc) {
            Ok(()) => Vec::new(),
            Err(Error::Schema(v)) => v,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_load_schemas_from_toml() {
        let registry = registry();
        let vpc = registry.get("aws_vpc").unwrap();
        assert_eq!(vpc.kind, "aws_vpc");
        assert!(vpc.forces_replacement("cidr_block"));
        assert!(!vpc.forces_replacement("tags"));
        assert!(vpc.has_attribute("id"));
        let sg = registry.get("aws_security_group").unwrap();
        assert_eq!(sg.attributes["ingress"].ty, AttributeType::BlockList);
        assert_eq!(sg.attributes["ingress"].attributes.len(), 4);
    }

    #[test]
    fn test_valid_document_passes() {
        let v = violations(
            r#"
[resources.aws_vpc.main]
cidr_block = "10.0.0.0/16"
tags = { Name = "main" }

[resources.aws_security_group.web]
vpc_id = "${aws_vpc.main.id}"
ingress = [{ from_port = 80, to_port = 80, protocol = "tcp", cidr_blocks = ["0.0.0.0/0"] }]
"#,
        );
        assert!(v.is_empty(), "{v:?}");
    }

    #[test]
    fn test_collects_all_violations() {
        let v = violations(
            r#"
[resources.aws_vpc.main]
tags = { Name = 3 }
arn = "arn:fake"
colour = "blue"

[resources.aws_security_group.web]
vpc_id = "${aws_vpc.main.nope}"
ingress = [{ from_port = "80", to_port = 80, protocol = "sctp" }]

[resources.aws_bogus.x]
a = 1
"#,
        );
        let rendered: Vec<String> = v.iter().map(ToString::to_string).collect();
        let expect = [
            "aws_vpc.main.cidr_block: required attribute is missing",
            "aws_vpc.main.tags.Name: expected string, got number",
            "aws_vpc.main.arn: computed attribute cannot be set",
            "aws_vpc.main.colour: unknown attribute",
            "aws_security_group.web.ingress.0.from_port: expected number, got string",
            "aws_security_group.web.vpc_id: references unknown attribute 'nope' of aws_vpc.main",
            "aws_bogus.x: unknown resource kind 'aws_bogus'",
        ];
        for e in expect {
            assert!(rendered.iter().any(|r| r == e), "missing '{e}' in {rendered:#?}");
        }
        assert!(
            rendered
                .iter()
                .any(|r| r.starts_with("aws_security_group.web.ingress.0.protocol: value \"sctp\""))
        );
    }

    #[test]
    fn test_interpolated_string_is_not_a_number() {
        let mut registry = SchemaRegistry::new();
        registry.register(
            ResourceSchema::new("aws_instance")
                .attribute("count", AttributeSchema::new(AttributeType::Number)),
        );
        let doc = Document::from_toml_str(
            "[resources.aws_instance.a]\ncount = \"${var.n}\"\n\
             [resources.aws_instance.b]\ncount = \"n-${var.n}\"\n",
        )
        .unwrap();
        let Err(Error::Schema(v)) = registry.validate_document(&doc) else {
            panic!("expected schema error");
        };
        assert_eq!(v.len(), 1);
        assert_eq!(v[0].address, "aws_instance.b");
    }

    #[test]
    fn test_builder_api() {
        let schema = ResourceSchema::new("aws_db_instance")
            .attribute(
                "engine",
                AttributeSchema::new(AttributeType::String)
                    .required()
                    .force_new()
                    .allowed([json!("postgres"), json!("mysql")]),
            )
            .attribute("endpoint", AttributeSchema::new(AttributeType::String).computed());
        assert!(schema.forces_replacement("engine"));
        assert!(schema.attributes["endpoint"].computed);
    }
}
