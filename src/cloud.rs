//! Simulated cloud provider
//!
//! Keeps an inventory of "live" resources in a JSON file so documents can
//! be planned and applied offline. Ids look like `vpc-0000002a`, and every
//! computed attribute a kind's schema declares gets a synthesized value.

use anyhow::{Context, Result};
use declarative::{
    AttributeType, Attributes, Provider, ProviderConfig, ProviderError, ProviderResponse,
    ResourceRecord, SchemaRegistry,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LiveResource {
    kind: String,
    attributes: Attributes,
    computed: Attributes,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Inventory {
    counter: u64,
    resources: BTreeMap<String, LiveResource>,
}

/// File-backed stand-in for a cloud API.
#[derive(Debug)]
pub struct SimulatedCloud {
    path: PathBuf,
    region: Mutex<String>,
    /// Computed attributes per kind, from the schema registry
    computed: BTreeMap<String, Vec<(String, AttributeType)>>,
    lock: Mutex<()>,
}

impl SimulatedCloud {
    pub fn new(path: impl Into<PathBuf>, registry: &SchemaRegistry) -> Self {
        let mut computed = BTreeMap::new();
        for kind in registry.kinds() {
            if let Some(schema) = registry.get(kind) {
                let attrs: Vec<(String, AttributeType)> = schema
                    .attributes
                    .iter()
                    .filter(|(_, a)| a.computed)
                    .map(|(name, a)| (name.clone(), a.ty))
                    .collect();
                computed.insert(kind.to_string(), attrs);
            }
        }
        Self {
            path: path.into(),
            region: Mutex::new("local-1".to_string()),
            computed,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Inventory> {
        if !self.path.exists() {
            return Ok(Inventory::default());
        }
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Could not read {}", self.path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid inventory in {}", self.path.display()))
    }

    fn save(&self, inventory: &Inventory) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(inventory)?;
        fs::write(&self.path, content)
            .with_context(|| format!("Could not write {}", self.path.display()))
    }

    /// Load, mutate and save the inventory under the process-wide lock.
    fn with_inventory<T>(
        &self,
        op: impl FnOnce(&mut Inventory) -> Result<T, ProviderError>,
    ) -> Result<T, ProviderError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut inventory = self.load().map_err(to_provider_error)?;
        let result = op(&mut inventory)?;
        self.save(&inventory).map_err(to_provider_error)?;
        Ok(result)
    }

    fn region(&self) -> String {
        self.region
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn synthesize(&self, kind: &str, id: &str, serial: u64) -> Attributes {
        let region = self.region();
        let mut computed = Attributes::new();
        computed.insert(
            "arn".to_string(),
            Value::String(format!("arn:strata:{region}:{kind}/{id}")),
        );
        for (name, ty) in self.computed.get(kind).into_iter().flatten() {
            let value = match ty {
                _ if name == "arn" => continue,
                AttributeType::Number => Value::from(serial),
                AttributeType::Bool => Value::Bool(false),
                AttributeType::List | AttributeType::BlockList => Value::Array(Vec::new()),
                AttributeType::Map | AttributeType::Block => Value::Object(Attributes::new()),
                _ if name.ends_with("_ip") => Value::String(format!(
                    "10.{}.{}.{}",
                    (serial >> 16) & 0xff,
                    (serial >> 8) & 0xff,
                    (serial & 0xff).max(4)
                )),
                _ => Value::String(format!("{id}.{name}.{region}.strata.internal")),
            };
            computed.insert(name.clone(), value);
        }
        computed
    }
}

fn to_provider_error(e: anyhow::Error) -> ProviderError {
    ProviderError::transient(format!("{e:#}"))
}

/// `aws_db_instance` becomes `db-instance`
fn id_prefix(kind: &str) -> String {
    kind.split_once('_')
        .map_or(kind, |(_, rest)| rest)
        .replace('_', "-")
}

impl Provider for SimulatedCloud {
    fn name(&self) -> &str {
        "simulated"
    }

    fn configure(&self, config: &ProviderConfig) -> Result<(), ProviderError> {
        if let Some(region) = &config.region {
            *self.region.lock().unwrap_or_else(PoisonError::into_inner) = region.clone();
        }
        Ok(())
    }

    fn create(
        &self,
        kind: &str,
        attributes: &Attributes,
    ) -> Result<ProviderResponse, ProviderError> {
        self.with_inventory(|inventory| {
            inventory.counter += 1;
            let id = format!("{}-{:08x}", id_prefix(kind), inventory.counter);
            let computed = self.synthesize(kind, &id, inventory.counter);
            inventory.resources.insert(
                id.clone(),
                LiveResource {
                    kind: kind.to_string(),
                    attributes: attributes.clone(),
                    computed: computed.clone(),
                },
            );
            log::debug!("simulated: created {kind} {id}");
            Ok(ProviderResponse { id, computed })
        })
    }

    fn update(
        &self,
        prior: &ResourceRecord,
        attributes: &Attributes,
    ) -> Result<ProviderResponse, ProviderError> {
        self.with_inventory(|inventory| {
            let live = inventory
                .resources
                .get_mut(&prior.id)
                .ok_or_else(|| ProviderError::not_found(format!("{} does not exist", prior.id)))?;
            live.attributes = attributes.clone();
            Ok(ProviderResponse {
                id: prior.id.clone(),
                computed: live.computed.clone(),
            })
        })
    }

    fn delete(&self, prior: &ResourceRecord) -> Result<(), ProviderError> {
        self.with_inventory(|inventory| {
            inventory
                .resources
                .remove(&prior.id)
                .map(|_| ())
                .ok_or_else(|| ProviderError::not_found(format!("{} does not exist", prior.id)))
        })
    }

    fn read(&self, prior: &ResourceRecord) -> Result<Option<Attributes>, ProviderError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let inventory = self.load().map_err(to_provider_error)?;
        Ok(inventory
            .resources
            .get(&prior.id)
            .filter(|live| live.kind == prior.kind)
            .map(|live| live.attributes.clone()))
    }
}
