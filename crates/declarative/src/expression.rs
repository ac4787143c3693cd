//! Reference expressions inside attribute values
//!
//! Strings may embed `${...}` expressions:
//!
//! - `${aws_vpc.main.id}` - attribute of another resource (creates a
//!   dependency edge); further segments descend into maps and lists
//! - `${var.region}` - a declared variable
//! - `${file_hash("lambda")}` - content hash of a file or directory,
//!   relative to the document directory
//! - `${file("user_data.sh")}` - file contents as a string
//!
//! A string that is exactly one expression takes the referenced value with
//! its own type. Otherwise every expression is rendered as text and
//! interpolated.

use crate::address::ResourceAddress;
use crate::builtin::content_hash;
use crate::error::{Error, Result};
use regex::Regex;
use serde_json::Value;
use std::path::Path;
use std::sync::OnceLock;

/// A parsed `${...}` expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    /// Attribute of another resource
    Resource {
        address: ResourceAddress,
        path: Vec<String>,
    },
    /// Declared variable, optionally descending into it
    Variable { name: String, path: Vec<String> },
    /// Built-in function call with string arguments
    Function { name: String, args: Vec<String> },
}

/// A value that may not be known until apply.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    Known(Value),
    /// Depends on a resource that has not been created yet
    Unknown,
}

impl Resolved {
    pub fn is_known(&self) -> bool {
        matches!(self, Self::Known(_))
    }

    pub fn known(&self) -> Option<&Value> {
        match self {
            Self::Known(v) => Some(v),
            Self::Unknown => None,
        }
    }
}

/// Result of looking up a resource attribute in a scope.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    Known(Value),
    Unknown,
    /// The resource is not present in this scope
    Missing,
}

/// Values visible while evaluating expressions.
pub trait Scope {
    /// Look up an attribute path on a resource.
    fn resource(&self, address: &ResourceAddress, path: &[String]) -> Lookup;

    /// Value of a resolved variable.
    fn variable(&self, name: &str) -> Option<&Value>;

    /// Directory that relative file paths resolve against.
    fn base_dir(&self) -> &Path;
}

fn pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{\s*([^}]*?)\s*\}")
            .unwrap_or_else(|e| panic!("invalid expression regex: {e}"))
    })
}

/// Whether a string contains at least one `${...}` expression.
pub fn contains_expression(s: &str) -> bool {
    pattern().is_match(s)
}

/// Whether a string is exactly one expression with nothing around it.
pub fn is_single_expression(s: &str) -> bool {
    pattern()
        .find(s)
        .is_some_and(|m| m.start() == 0 && m.end() == s.len())
}

/// Collect the raw text of every expression inside a value, recursively.
pub fn collect_expressions(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => {
            for caps in pattern().captures_iter(s) {
                if let Some(inner) = caps.get(1) {
                    out.push(inner.as_str().to_string());
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect_expressions(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_expressions(v, out)),
        _ => {}
    }
}

/// Parse the text between `${` and `}`.
pub fn parse_expr(raw: &str) -> std::result::Result<Expr, String> {
    let text = raw.trim();
    if text.is_empty() {
        return Err("empty expression".to_string());
    }

    if let Some(open) = text.find('(') {
        let Some(inner) = text[open + 1..].strip_suffix(')') else {
            return Err("unterminated function call".to_string());
        };
        let name = text[..open].trim().to_string();
        if !matches!(name.as_str(), "file_hash" | "file") {
            return Err(format!("unknown function '{name}'"));
        }
        let args = parse_args(inner)?;
        if args.len() != 1 {
            return Err(format!("{name}() takes exactly one argument"));
        }
        return Ok(Expr::Function { name, args });
    }

    let parts: Vec<&str> = text.split('.').collect();
    if parts.iter().any(|p| p.trim().is_empty()) {
        return Err("empty path segment".to_string());
    }

    if parts[0] == "var" {
        if parts.len() < 2 {
            return Err("variable reference needs a name".to_string());
        }
        return Ok(Expr::Variable {
            name: parts[1].to_string(),
            path: parts[2..].iter().map(|s| (*s).to_string()).collect(),
        });
    }

    if parts.len() < 3 {
        return Err("resource references need kind.name.attribute".to_string());
    }
    let address = ResourceAddress::new(parts[0], parts[1]).map_err(|e| e.to_string())?;
    Ok(Expr::Resource {
        address,
        path: parts[2..].iter().map(|s| (*s).to_string()).collect(),
    })
}

fn parse_args(inner: &str) -> std::result::Result<Vec<String>, String> {
    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }
    inner
        .split(',')
        .map(|arg| {
            let arg = arg.trim();
            arg.strip_prefix('"')
                .and_then(|a| a.strip_suffix('"'))
                .or_else(|| arg.strip_prefix('\'').and_then(|a| a.strip_suffix('\'')))
                .map(str::to_string)
                .ok_or_else(|| format!("argument {arg} must be a quoted string"))
        })
        .collect()
}

/// Descend into a value by map keys and list indices.
pub fn lookup_path(value: &Value, path: &[String]) -> Option<Value> {
    let mut current = value;
    for segment in path {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current.clone())
}

/// Render a value for string interpolation.
pub fn to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(_) | Value::Number(_) => value.to_string(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

/// Evaluate every expression in a value.
///
/// `from` names the resource or output being evaluated, for error messages.
pub fn evaluate(value: &Value, scope: &dyn Scope, from: &str) -> Result<Resolved> {
    match value {
        Value::String(s) => evaluate_str(s, scope, from),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match evaluate(item, scope, from)? {
                    Resolved::Known(v) => out.push(v),
                    Resolved::Unknown => return Ok(Resolved::Unknown),
                }
            }
            Ok(Resolved::Known(Value::Array(out)))
        }
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (key, item) in map {
                match evaluate(item, scope, from)? {
                    Resolved::Known(v) => {
                        out.insert(key.clone(), v);
                    }
                    Resolved::Unknown => return Ok(Resolved::Unknown),
                }
            }
            Ok(Resolved::Known(Value::Object(out)))
        }
        other => Ok(Resolved::Known(other.clone())),
    }
}

fn evaluate_str(s: &str, scope: &dyn Scope, from: &str) -> Result<Resolved> {
    if !contains_expression(s) {
        return Ok(Resolved::Known(Value::String(s.to_string())));
    }

    if is_single_expression(s) {
        let inner = pattern()
            .captures(s)
            .and_then(|caps| caps.get(1))
            .map_or("", |m| m.as_str());
        return resolve_expr(inner, scope, from);
    }

    let mut out = String::with_capacity(s.len());
    let mut last = 0;
    for caps in pattern().captures_iter(s) {
        let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        out.push_str(&s[last..whole.start()]);
        match resolve_expr(inner.as_str(), scope, from)? {
            Resolved::Known(v) => out.push_str(&to_text(&v)),
            Resolved::Unknown => return Ok(Resolved::Unknown),
        }
        last = whole.end();
    }
    out.push_str(&s[last..]);
    Ok(Resolved::Known(Value::String(out)))
}

fn resolve_expr(raw: &str, scope: &dyn Scope, from: &str) -> Result<Resolved> {
    let expr = parse_expr(raw).map_err(|message| Error::InvalidExpression {
        from: from.to_string(),
        expression: raw.to_string(),
        message,
    })?;

    match expr {
        Expr::Resource { address, path } => match scope.resource(&address, &path) {
            Lookup::Known(v) => Ok(Resolved::Known(v)),
            Lookup::Unknown => Ok(Resolved::Unknown),
            Lookup::Missing => Err(Error::UnresolvedReference {
                from: from.to_string(),
                missing: format!("resource {address}"),
            }),
        },
        Expr::Variable { name, path } => {
            let value = scope
                .variable(&name)
                .ok_or_else(|| Error::UnresolvedReference {
                    from: from.to_string(),
                    missing: format!("variable {name}"),
                })?;
            lookup_path(value, &path)
                .map(Resolved::Known)
                .ok_or_else(|| Error::UnresolvedReference {
                    from: from.to_string(),
                    missing: format!("var.{name}.{}", path.join(".")),
                })
        }
        Expr::Function { name, args } => call_function(&name, &args, scope.base_dir()),
    }
}

fn call_function(name: &str, args: &[String], base_dir: &Path) -> Result<Resolved> {
    let path = base_dir.join(&args[0]);
    match name {
        "file_hash" => {
            let hash = content_hash(&path).map_err(|e| Error::io("hash", &path, e))?;
            Ok(Resolved::Known(Value::String(hash)))
        }
        _ => {
            let content =
                std::fs::read_to_string(&path).map_err(|e| Error::io("read", &path, e))?;
            Ok(Resolved::Known(Value::String(content)))
        }
    }
}
