//! Variable resolution
//!
//! Supplied values are merged by the caller (command line over var-file
//! over environment); this module checks them against the declarations
//! and fills in defaults.

use crate::document::{VarType, VariableDecl};
use crate::error::{Error, Result};
use serde_json::Value;
use std::collections::BTreeMap;

/// Resolve every declared variable.
///
/// String values supplied for non-string variables are coerced, so raw
/// command-line and environment values can be passed straight through.
pub fn resolve_variables(
    decls: &BTreeMap<String, VariableDecl>,
    supplied: &BTreeMap<String, Value>,
) -> Result<BTreeMap<String, Value>> {
    if let Some(name) = supplied.keys().find(|k| !decls.contains_key(*k)) {
        return Err(Error::Variable {
            name: name.clone(),
            message: "value supplied for an undeclared variable".to_string(),
        });
    }

    let mut resolved = BTreeMap::new();
    for (name, decl) in decls {
        let value = match supplied.get(name) {
            Some(value) => coerce(name, decl.ty, value)?,
            None => decl.default.clone().ok_or_else(|| Error::Variable {
                name: name.clone(),
                message: "no value supplied and no default".to_string(),
            })?,
        };

        if !decl.ty.accepts(&value) {
            return Err(Error::Variable {
                name: name.clone(),
                message: format!("expected {}, got {value}", decl.ty.name()),
            });
        }
        if decl.sensitive {
            log::debug!("Resolved variable {name} = (sensitive)");
        } else {
            log::debug!("Resolved variable {name} = {value}");
        }
        resolved.insert(name.clone(), value);
    }
    Ok(resolved)
}

fn coerce(name: &str, ty: VarType, value: &Value) -> Result<Value> {
    match (ty, value) {
        (VarType::String | VarType::Any, _) => Ok(value.clone()),
        (_, Value::String(raw)) => ty.coerce(raw).map_err(|message| Error::Variable {
            name: name.to_string(),
            message,
        }),
        _ => Ok(value.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decls() -> BTreeMap<String, VariableDecl> {
        let mut decls = BTreeMap::new();
        decls.insert(
            "region".to_string(),
            VariableDecl {
                ty: VarType::String,
                default: Some(json!("us-east-1")),
                ..Default::default()
            },
        );
        decls.insert(
            "instance_count".to_string(),
            VariableDecl {
                ty: VarType::Number,
                ..Default::default()
            },
        );
        decls
    }

    fn supplied(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_defaults_and_coercion() {
        let vars =
            resolve_variables(&decls(), &supplied(&[("instance_count", json!("3"))])).unwrap();
        assert_eq!(vars["region"], json!("us-east-1"));
        assert_eq!(vars["instance_count"], json!(3));
    }

    #[test]
    fn test_missing_value() {
        let err = resolve_variables(&decls(), &BTreeMap::new()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "variable 'instance_count': no value supplied and no default"
        );
    }

    #[test]
    fn test_wrong_type() {
        let err = resolve_variables(
            &decls(),
            &supplied(&[("instance_count", json!("three"))]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("not a number"));

        let err = resolve_variables(&decls(), &supplied(&[("instance_count", json!(true))]))
            .unwrap_err();
        assert!(err.to_string().contains("expected number"));
    }

    #[test]
    fn test_undeclared_variable() {
        let err = resolve_variables(
            &decls(),
            &supplied(&[("instance_count", json!(1)), ("zone", json!("a"))]),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Variable { name, .. } if name == "zone"));
    }
}
