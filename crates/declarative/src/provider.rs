//! Provider trait and routing
//!
//! A provider performs the CRUD calls for the kinds it owns. Kinds are
//! routed by their prefix up to the first underscore (`aws_vpc` goes to
//! the provider registered as `aws`), with an optional default provider
//! for everything else.

use crate::address::provider_prefix;
use crate::builtin::LocalProvider;
use crate::document::{Attributes, ProviderConfig};
use crate::error::{Error, ProviderError};
use crate::state::ResourceRecord;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// Result of a successful create or update.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderResponse {
    /// Provider-assigned identifier
    pub id: String,
    /// Attributes only known after the call (arn, endpoint, ...)
    pub computed: Attributes,
}

/// Stability of a resource after a mutating call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stability {
    /// Still converging; poll again
    Pending,
    Ready,
    /// Reached a terminal failure state
    Failed(String),
}

/// Performs provider API calls.
///
/// Implementations must be thread-safe: the executor calls them from
/// worker threads concurrently.
pub trait Provider: Send + Sync + fmt::Debug {
    /// Provider name for logs
    fn name(&self) -> &str;

    /// Apply the document's provider block before any other call.
    fn configure(&self, _config: &ProviderConfig) -> Result<(), ProviderError> {
        Ok(())
    }

    fn create(
        &self,
        kind: &str,
        attributes: &Attributes,
    ) -> Result<ProviderResponse, ProviderError>;

    fn update(
        &self,
        prior: &ResourceRecord,
        attributes: &Attributes,
    ) -> Result<ProviderResponse, ProviderError>;

    fn delete(&self, prior: &ResourceRecord) -> Result<(), ProviderError>;

    /// Live input attributes of a recorded resource, `None` if it is gone.
    fn read(&self, prior: &ResourceRecord) -> Result<Option<Attributes>, ProviderError>;

    /// Stability of a resource after create or update.
    fn status(&self, _kind: &str, _id: &str) -> Result<Stability, ProviderError> {
        Ok(Stability::Ready)
    }
}

/// Providers keyed by kind prefix.
#[derive(Debug, Clone, Default)]
pub struct Providers {
    by_prefix: BTreeMap<String, Arc<dyn Provider>>,
    default: Option<Arc<dyn Provider>>,
}

impl Providers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Router with the built-in local kinds (`archive_*`, `random_*`).
    pub fn with_builtins(base_dir: &Path) -> Self {
        let mut providers = Self::new();
        let local: Arc<dyn Provider> = Arc::new(LocalProvider::new(base_dir));
        providers.register("archive", Arc::clone(&local));
        providers.register("random", local);
        providers
    }

    pub fn register(&mut self, prefix: impl Into<String>, provider: Arc<dyn Provider>) {
        self.by_prefix.insert(prefix.into(), provider);
    }

    /// Provider for kinds no prefix matches.
    pub fn set_default(&mut self, provider: Arc<dyn Provider>) {
        self.default = Some(provider);
    }

    pub fn for_kind(&self, kind: &str) -> crate::Result<Arc<dyn Provider>> {
        self.by_prefix
            .get(provider_prefix(kind))
            .or(self.default.as_ref())
            .cloned()
            .ok_or_else(|| Error::NoProvider {
                kind: kind.to_string(),
            })
    }

    /// Configure every distinct provider once.
    pub fn configure(&self, config: &ProviderConfig) -> crate::Result<()> {
        let mut seen: Vec<*const ()> = Vec::new();
        for provider in self.by_prefix.values().chain(self.default.iter()) {
            let ptr = Arc::as_ptr(provider).cast::<()>();
            if seen.contains(&ptr) {
                continue;
            }
            seen.push(ptr);
            provider.configure(config).map_err(|source| Error::Provider {
                address: format!("provider.{}", provider.name()),
                source,
            })?;
        }
        Ok(())
    }
}

// ============================================================================
// In-memory provider
// ============================================================================

/// Recorded provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub op: &'static str,
    pub kind: String,
    pub id: String,
}

#[derive(Debug, Clone)]
struct Stored {
    kind: String,
    attributes: Attributes,
}

#[derive(Debug, Default)]
struct MemoryInner {
    resources: HashMap<String, Stored>,
    /// Queued failures per kind, consumed one per call
    failures: HashMap<String, Vec<ProviderError>>,
    /// Status polls answering `Pending` before `Ready`, per id
    pending_polls: HashMap<String, usize>,
    pending_per_create: usize,
    calls: Vec<Call>,
}

/// Thread-safe in-memory provider with failure injection.
///
/// Ids are `{kind}-{counter:04}`; every resource gets a computed `arn`.
#[derive(Debug, Default)]
pub struct MemoryProvider {
    inner: Mutex<MemoryInner>,
    counter: AtomicUsize,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue an error for the next call on a kind.
    pub fn fail_next(&self, kind: &str, error: ProviderError) {
        self.inner()
            .failures
            .entry(kind.to_string())
            .or_default()
            .push(error);
    }

    /// Make `status` answer `Pending` this many times after each create.
    pub fn set_pending_polls(&self, polls: usize) {
        self.inner().pending_per_create = polls;
    }

    /// Calls made so far.
    pub fn calls(&self) -> Vec<Call> {
        self.inner().calls.clone()
    }

    /// Number of calls with the given operation name.
    pub fn count(&self, op: &str) -> usize {
        self.inner().calls.iter().filter(|c| c.op == op).count()
    }

    /// Ids of live resources.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner().resources.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Change a live attribute behind the engine's back.
    pub fn drift(&self, id: &str, attribute: &str, value: serde_json::Value) {
        if let Some(stored) = self.inner().resources.get_mut(id) {
            stored.attributes.insert(attribute.to_string(), value);
        }
    }

    /// Remove a live resource behind the engine's back.
    pub fn remove(&self, id: &str) {
        self.inner().resources.remove(id);
    }

    fn take_failure(inner: &mut MemoryInner, kind: &str) -> Option<ProviderError> {
        let queue = inner.failures.get_mut(kind)?;
        if queue.is_empty() {
            return None;
        }
        Some(queue.remove(0))
    }

    fn computed(kind: &str, id: &str) -> Attributes {
        let mut computed = Attributes::new();
        computed.insert("arn".into(), format!("arn:memory:{kind}/{id}").into());
        computed
    }
}

impl Provider for MemoryProvider {
    fn name(&self) -> &str {
        "memory"
    }

    fn create(
        &self,
        kind: &str,
        attributes: &Attributes,
    ) -> Result<ProviderResponse, ProviderError> {
        let mut inner = self.inner();
        if let Some(err) = Self::take_failure(&mut inner, kind) {
            inner.calls.push(Call {
                op: "create",
                kind: kind.to_string(),
                id: String::new(),
            });
            return Err(err);
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("{kind}-{n:04}");
        inner.resources.insert(
            id.clone(),
            Stored {
                kind: kind.to_string(),
                attributes: attributes.clone(),
            },
        );
        let polls = inner.pending_per_create;
        if polls > 0 {
            inner.pending_polls.insert(id.clone(), polls);
        }
        inner.calls.push(Call {
            op: "create",
            kind: kind.to_string(),
            id: id.clone(),
        });
        Ok(ProviderResponse {
            computed: Self::computed(kind, &id),
            id,
        })
    }

    fn update(
        &self,
        prior: &ResourceRecord,
        attributes: &Attributes,
    ) -> Result<ProviderResponse, ProviderError> {
        let mut inner = self.inner();
        inner.calls.push(Call {
            op: "update",
            kind: prior.kind.clone(),
            id: prior.id.clone(),
        });
        if let Some(err) = Self::take_failure(&mut inner, &prior.kind) {
            return Err(err);
        }
        let stored = inner
            .resources
            .get_mut(&prior.id)
            .ok_or_else(|| ProviderError::not_found(format!("{} does not exist", prior.id)))?;
        stored.attributes = attributes.clone();
        Ok(ProviderResponse {
            id: prior.id.clone(),
            computed: Self::computed(&prior.kind, &prior.id),
        })
    }

    fn delete(&self, prior: &ResourceRecord) -> Result<(), ProviderError> {
        let mut inner = self.inner();
        inner.calls.push(Call {
            op: "delete",
            kind: prior.kind.clone(),
            id: prior.id.clone(),
        });
        if let Some(err) = Self::take_failure(&mut inner, &prior.kind) {
            return Err(err);
        }
        inner
            .resources
            .remove(&prior.id)
            .map(|_| ())
            .ok_or_else(|| ProviderError::not_found(format!("{} does not exist", prior.id)))
    }

    fn read(&self, prior: &ResourceRecord) -> Result<Option<Attributes>, ProviderError> {
        let inner = self.inner();
        Ok(inner
            .resources
            .get(&prior.id)
            .filter(|s| s.kind == prior.kind)
            .map(|s| s.attributes.clone()))
    }

    fn status(&self, _kind: &str, id: &str) -> Result<Stability, ProviderError> {
        let mut inner = self.inner();
        match inner.pending_polls.get_mut(id) {
            Some(0) | None => Ok(Stability::Ready),
            Some(left) => {
                *left -= 1;
                Ok(Stability::Pending)
            }
        }
    }
}
