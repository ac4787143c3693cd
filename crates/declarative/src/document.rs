//! Declaration documents
//!
//! A document declares the desired state: provider configuration,
//! variables, resources keyed by `(kind, name)` and outputs. Documents are
//! written in TOML or JSON:
//!
//! ```toml
//! [provider]
//! name = "aws"
//! region = "us-east-1"
//!
//! [variables.vpc_cidr]
//! type = "string"
//! default = "10.0.0.0/16"
//!
//! [resources.aws_vpc.main]
//! cidr_block = "${var.vpc_cidr}"
//!
//! [resources.aws_subnet.public]
//! vpc_id = "${aws_vpc.main.id}"
//! cidr_block = "10.0.1.0/24"
//!
//! [outputs.vpc_id]
//! value = "${aws_vpc.main.id}"
//! ```

use crate::address::ResourceAddress;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// Attribute map of a resource.
pub type Attributes = Map<String, Value>;

/// Meta-attribute listing explicit dependencies.
pub const META_DEPENDS_ON: &str = "depends_on";
/// Meta-attribute refusing plans that delete or replace the resource.
pub const META_PREVENT_DESTROY: &str = "prevent_destroy";

/// Provider configuration block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider name (informational)
    #[serde(default)]
    pub name: Option<String>,
    /// Region the resources live in
    #[serde(default)]
    pub region: Option<String>,
    /// Any further provider-specific settings
    #[serde(flatten)]
    pub settings: Attributes,
}

/// Declared type of a variable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VarType {
    String,
    Number,
    Bool,
    List,
    Map,
    #[default]
    Any,
}

impl VarType {
    /// Whether a value has this type.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Bool => value.is_boolean(),
            Self::List => value.is_array(),
            Self::Map => value.is_object(),
            Self::Any => true,
        }
    }

    /// Convert a raw command-line or environment string into a value.
    pub fn coerce(&self, raw: &str) -> std::result::Result<Value, String> {
        match self {
            Self::String => Ok(Value::String(raw.to_string())),
            Self::Number => raw
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(|n| {
                    if n.fract() == 0.0 && n.abs() < 9.0e15 {
                        Some(Value::from(n as i64))
                    } else {
                        serde_json::Number::from_f64(n).map(Value::Number)
                    }
                })
                .ok_or_else(|| format!("'{raw}' is not a number")),
            Self::Bool => match raw.trim() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                other => Err(format!("'{other}' is not a bool")),
            },
            Self::List | Self::Map => {
                let value: Value =
                    serde_json::from_str(raw).map_err(|e| format!("invalid JSON: {e}"))?;
                if self.accepts(&value) {
                    Ok(value)
                } else {
                    Err(format!("expected a {}", self.name()))
                }
            }
            Self::Any => {
                Ok(serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())))
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Bool => "bool",
            Self::List => "list",
            Self::Map => "map",
            Self::Any => "any",
        }
    }
}

/// A variable declaration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariableDecl {
    #[serde(rename = "type", default)]
    pub ty: VarType,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub sensitive: bool,
}

/// An output declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputDecl {
    /// Source expression, e.g. `${aws_instance.web.public_ip}`
    pub value: Value,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub sensitive: bool,
}

/// A resource declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDecl {
    pub address: ResourceAddress,
    /// Attribute values, literals or expressions (meta-attributes removed)
    pub attributes: Attributes,
    /// Explicit dependencies from `depends_on`
    pub depends_on: Vec<ResourceAddress>,
    /// Refuse plans that delete or replace this resource
    pub prevent_destroy: bool,
}

impl ResourceDecl {
    /// Create a declaration from an attribute map, extracting meta-attributes.
    pub fn new(address: ResourceAddress, mut attributes: Attributes) -> Result<Self> {
        let depends_on = match attributes.remove(META_DEPENDS_ON) {
            None => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .ok_or_else(|| Error::InvalidAddress(item.to_string()))
                        .and_then(str::parse)
                })
                .collect::<Result<Vec<_>>>()?,
            Some(other) => return Err(Error::InvalidAddress(other.to_string())),
        };

        let prevent_destroy = match attributes.remove(META_PREVENT_DESTROY) {
            None => false,
            Some(Value::Bool(b)) => b,
            Some(other) => {
                return Err(Error::Parse {
                    path: address.to_string(),
                    message: format!("{META_PREVENT_DESTROY} must be a bool, got {other}"),
                });
            }
        };

        Ok(Self {
            address,
            attributes,
            depends_on,
            prevent_destroy,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawDocument {
    #[serde(default)]
    provider: ProviderConfig,
    #[serde(default)]
    variables: BTreeMap<String, VariableDecl>,
    #[serde(default)]
    resources: BTreeMap<String, BTreeMap<String, Attributes>>,
    #[serde(default)]
    outputs: BTreeMap<String, OutputDecl>,
}

/// A parsed declaration document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    pub provider: ProviderConfig,
    pub variables: BTreeMap<String, VariableDecl>,
    /// Resource declarations in declaration order (kind, then name)
    pub resources: Vec<ResourceDecl>,
    pub outputs: BTreeMap<String, OutputDecl>,
}

impl Document {
    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let raw: RawDocument = toml::from_str(content).map_err(|e| Error::Parse {
            path: "<toml>".to_string(),
            message: e.to_string(),
        })?;
        Self::from_raw(raw)
    }

    /// Parse a JSON document.
    pub fn from_json_str(content: &str) -> Result<Self> {
        let raw: RawDocument = serde_json::from_str(content).map_err(|e| Error::Parse {
            path: "<json>".to_string(),
            message: e.to_string(),
        })?;
        Self::from_raw(raw)
    }

    /// Load a document, picking the format from the file extension.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| Error::io("read", path, e))?;
        let parsed = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&content),
            _ => Self::from_toml_str(&content),
        };
        parsed.map_err(|e| match e {
            Error::Parse { message, .. } => Error::Parse {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })
    }

    fn from_raw(raw: RawDocument) -> Result<Self> {
        let mut resources = Vec::new();
        for (kind, instances) in raw.resources {
            for (name, attributes) in instances {
                let address = ResourceAddress::new(kind.clone(), name)?;
                resources.push(ResourceDecl::new(address, attributes)?);
            }
        }

        log::debug!(
            "Parsed document: {} resources, {} variables, {} outputs",
            resources.len(),
            raw.variables.len(),
            raw.outputs.len()
        );

        Ok(Self {
            provider: raw.provider,
            variables: raw.variables,
            resources,
            outputs: raw.outputs,
        })
    }

    /// Find a resource declaration by address.
    pub fn resource(&self, address: &ResourceAddress) -> Option<&ResourceDecl> {
        self.resources.iter().find(|r| &r.address == address)
    }

    /// Add a declaration (used when building documents programmatically).
    pub fn push(&mut self, decl: ResourceDecl) {
        self.resources.push(decl);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const DOC: &str = r#"
[provider]
name = "aws"
region = "us-east-1"
profile = "dev"

[variables.vpc_cidr]
type = "string"
default = "10.0.0.0/16"

[variables.db_password]
type = "string"
sensitive = true

[resources.aws_vpc.main]
cidr_block = "${var.vpc_cidr}"
tags = { Name = "main" }

[resources.aws_subnet.public]
vpc_id = "${aws_vpc.main.id}"
cidr_block = "10.0.1.0/24"
depends_on = ["aws_vpc.main"]
prevent_destroy = true

[outputs.vpc_id]
value = "${aws_vpc.main.id}"
"#;

    #[test]
    fn test_parse_toml_document() {
        let doc = Document::from_toml_str(DOC).unwrap();
        assert_eq!(doc.provider.region.as_deref(), Some("us-east-1"));
        assert_eq!(doc.provider.settings.get("profile"), Some(&json!("dev")));
        assert_eq!(doc.resources.len(), 2);
        assert_eq!(doc.variables["vpc_cidr"].ty, VarType::String);
        assert!(doc.variables["db_password"].sensitive);
        assert!(doc.outputs.contains_key("vpc_id"));

        let subnet = doc
            .resource(&"aws_subnet.public".parse::<ResourceAddress>().unwrap())
            .unwrap();
        assert!(subnet.prevent_destroy);
        assert_eq!(
            subnet.depends_on,
            vec!["aws_vpc.main".parse::<ResourceAddress>().unwrap()]
        );
        assert!(!subnet.attributes.contains_key(META_DEPENDS_ON));
    }

    #[test]
    fn test_parse_json_document() {
        let doc = Document::from_json_str(
            r#"{"resources": {"random_id": {"suffix": {"byte_length": 4}}}}"#,
        )
        .unwrap();
        assert_eq!(doc.resources[0].address.to_string(), "random_id.suffix");
        assert_eq!(doc.resources[0].attributes["byte_length"], json!(4));
    }

    #[test]
    fn test_bad_depends_on_is_rejected() {
        let err = Document::from_toml_str(
            "[resources.aws_vpc.main]\ndepends_on = [\"not-an-address\"]\n",
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidAddress(_)));
    }

    #[test]
    fn test_var_type_coercion() {
        assert_eq!(VarType::Number.coerce("3").unwrap(), json!(3));
        assert_eq!(VarType::Number.coerce("2.5").unwrap(), json!(2.5));
        assert_eq!(VarType::Bool.coerce("true").unwrap(), json!(true));
        assert!(VarType::Bool.coerce("yes").is_err());
        assert_eq!(VarType::List.coerce("[1,2]").unwrap(), json!([1, 2]));
        assert!(VarType::Map.coerce("[1,2]").is_err());
        assert_eq!(VarType::Any.coerce("plain").unwrap(), json!("plain"));
    }

    #[test]
    fn test_load_picks_format_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.toml");
        std::fs::write(&path, DOC).unwrap();
        assert_eq!(Document::load(&path).unwrap().resources.len(), 2);

        let bad = dir.path().join("broken.toml");
        std::fs::write(&bad, "[resources").unwrap();
        let err = Document::load(&bad).unwrap_err();
        assert!(err.to_string().contains("broken.toml"));
    }
}
