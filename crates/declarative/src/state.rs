//! State store - durable snapshot of managed resources with locking
//!
//! The snapshot maps every managed resource to the provider id, the
//! resolved inputs it was last applied with, the computed attributes the
//! provider returned and the dependencies it had at that time. Deletes are
//! ordered from those recorded dependencies, because by then the
//! declaration is gone.

use crate::address::ResourceAddress;
use crate::document::Attributes;
use crate::error::{Error, Result};
use crate::expression::lookup_path;
use crate::graph::DependencyGraph;
use crate::lifecycle::ResourceStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

/// Snapshot format version written by this crate.
pub const STATE_VERSION: u32 = 1;
/// Default state file name.
pub const STATE_FILE: &str = "strata.state.json";

// ============================================================================
// Snapshot
// ============================================================================

/// A resolved output value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputValue {
    pub value: Value,
    #[serde(default)]
    pub sensitive: bool,
}

fn created() -> ResourceStatus {
    ResourceStatus::Created
}

/// Persisted record of one managed resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub kind: String,
    pub name: String,
    /// Provider-assigned identifier
    pub id: String,
    /// Resolved input attributes from the last successful apply
    #[serde(default)]
    pub attributes: Attributes,
    /// Attributes computed by the provider
    #[serde(default)]
    pub computed: Attributes,
    /// Dependencies at the time of the last apply
    #[serde(default)]
    pub dependencies: Vec<ResourceAddress>,
    #[serde(default = "created")]
    pub status: ResourceStatus,
    pub updated_at: DateTime<Utc>,
}

impl ResourceRecord {
    pub fn address(&self) -> ResourceAddress {
        ResourceAddress {
            kind: self.kind.clone(),
            name: self.name.clone(),
        }
    }

    /// Look up an attribute path: `id`, then computed, then input attributes.
    pub fn attribute(&self, path: &[String]) -> Option<Value> {
        let (head, rest) = path.split_first()?;
        if head == "id" && rest.is_empty() {
            return Some(Value::String(self.id.clone()));
        }
        self.computed
            .get(head)
            .or_else(|| self.attributes.get(head))
            .and_then(|v| lookup_path(v, rest))
    }

    /// Inputs, computed attributes and `id` merged into one map.
    pub fn full_attributes(&self) -> Attributes {
        let mut all = self.attributes.clone();
        all.extend(self.computed.clone());
        all.insert("id".into(), Value::String(self.id.clone()));
        all
    }
}

/// Full state snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub version: u32,
    /// Incremented on every write
    pub serial: u64,
    /// Identity of this state history; writes across lineages are refused
    pub lineage: String,
    /// Records keyed by `kind.name`
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceRecord>,
    #[serde(default)]
    pub outputs: BTreeMap<String, OutputValue>,
    pub last_updated: DateTime<Utc>,
}

impl Default for StateSnapshot {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            serial: 0,
            lineage: uuid::Uuid::new_v4().to_string(),
            resources: BTreeMap::new(),
            outputs: BTreeMap::new(),
            last_updated: Utc::now(),
        }
    }
}

impl StateSnapshot {
    /// Bump the serial and timestamp before a write.
    pub fn touch(&mut self) {
        self.serial += 1;
        self.last_updated = Utc::now();
    }

    pub fn get(&self, address: &ResourceAddress) -> Option<&ResourceRecord> {
        self.resources.get(&address.to_string())
    }

    pub fn get_mut(&mut self, address: &ResourceAddress) -> Option<&mut ResourceRecord> {
        self.resources.get_mut(&address.to_string())
    }

    pub fn upsert(&mut self, record: ResourceRecord) {
        self.resources.insert(record.address().to_string(), record);
    }

    pub fn remove(&mut self, address: &ResourceAddress) -> Option<ResourceRecord> {
        self.resources.remove(&address.to_string())
    }

    /// Addresses of every record.
    pub fn addresses(&self) -> Vec<ResourceAddress> {
        self.resources.values().map(ResourceRecord::address).collect()
    }

    /// Graph of the recorded dependencies.
    pub fn dependency_graph(&self) -> Result<DependencyGraph> {
        DependencyGraph::from_edges(
            self.resources
                .values()
                .map(|r| (r.address(), r.dependencies.clone())),
        )
    }
}

// ============================================================================
// Locking
// ============================================================================

/// Information about a held lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    pub id: String,
    /// Operation holding the lock (`plan`, `apply`, ...)
    pub operation: String,
    /// `user@host (pid N)`
    pub who: String,
    pub created: DateTime<Utc>,
}

impl LockInfo {
    pub fn new(operation: &str) -> Self {
        let user = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "unknown".to_string());
        let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            operation: operation.to_string(),
            who: format!("{user}@{host} (pid {})", std::process::id()),
            created: Utc::now(),
        }
    }

    fn into_locked_error(self) -> Error {
        Error::StateLocked {
            id: self.id,
            holder: self.who,
            operation: self.operation,
            created: self.created.to_rfc3339(),
        }
    }
}

/// Durable storage for the state snapshot.
pub trait StateStore: Send + Sync + fmt::Debug {
    /// Read the full snapshot; a store without state yields an empty one.
    fn read(&self) -> Result<StateSnapshot>;

    /// Write the full snapshot atomically, bumping its serial.
    fn write(&self, snapshot: &mut StateSnapshot) -> Result<()>;

    /// Take the lock, failing with `StateLocked` when someone holds it.
    fn acquire(&self, operation: &str) -> Result<LockInfo>;

    /// Release a lock by id.
    fn unlock(&self, id: &str) -> Result<()>;

    /// Current lock holder, if any.
    fn lock_info(&self) -> Result<Option<LockInfo>>;

    /// Remove whatever lock is held, returning it.
    fn force_unlock(&self) -> Result<Option<LockInfo>>;
}

/// Guard for a held state lock; releases on drop.
#[derive(Debug)]
pub struct StateLock<'a> {
    store: &'a dyn StateStore,
    info: LockInfo,
    released: bool,
}

impl<'a> StateLock<'a> {
    pub fn acquire(store: &'a dyn StateStore, operation: &str) -> Result<Self> {
        let info = store.acquire(operation)?;
        log::debug!("Acquired state lock {} for {}", info.id, operation);
        Ok(Self {
            store,
            info,
            released: false,
        })
    }

    pub fn info(&self) -> &LockInfo {
        &self.info
    }

    /// Release explicitly, surfacing any error.
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.store.unlock(&self.info.id)
    }
}

impl Drop for StateLock<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.store.unlock(&self.info.id) {
            log::warn!("Failed to release state lock {}: {}", self.info.id, e);
        }
    }
}

// ============================================================================
// File store
// ============================================================================

/// JSON state file plus a sibling `.lock` file.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
    lock_path: PathBuf,
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s: OsString = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

impl FileStateStore {
    /// Store at a state file path; the lock lives next to it
    /// (`strata.state.json` locks through `strata.state.lock`).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lock_path = path.with_extension("lock");
        Self { path, lock_path }
    }

    /// Store using the default file name inside a directory.
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(STATE_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    fn ensure_parent(&self) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| Error::io("create directory", dir, e))?;
        }
        Ok(())
    }

    fn read_lock_file(&self) -> Result<Option<LockInfo>> {
        match fs::read_to_string(&self.lock_path) {
            Ok(content) => serde_json::from_str(&content)
                .map(Some)
                .map_err(|e| Error::CorruptState {
                    path: self.lock_path.clone(),
                    message: e.to_string(),
                }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::io("read", &self.lock_path, e)),
        }
    }
}

impl StateStore for FileStateStore {
    fn read(&self) -> Result<StateSnapshot> {
        if !self.path.exists() {
            log::debug!("State file does not exist, using empty state");
            return Ok(StateSnapshot::default());
        }

        let content =
            fs::read_to_string(&self.path).map_err(|e| Error::io("read", &self.path, e))?;
        let snapshot: StateSnapshot =
            serde_json::from_str(&content).map_err(|e| Error::CorruptState {
                path: self.path.clone(),
                message: e.to_string(),
            })?;

        if snapshot.version > STATE_VERSION {
            return Err(Error::CorruptState {
                path: self.path.clone(),
                message: format!(
                    "state version {} is newer than supported version {STATE_VERSION}",
                    snapshot.version
                ),
            });
        }

        log::debug!(
            "Loaded state from {} (serial {}, {} resources)",
            self.path.display(),
            snapshot.serial,
            snapshot.resources.len()
        );
        Ok(snapshot)
    }

    fn write(&self, snapshot: &mut StateSnapshot) -> Result<()> {
        self.ensure_parent()?;

        if self.path.exists() {
            let existing = self.read()?;
            if existing.lineage != snapshot.lineage {
                return Err(Error::LineageMismatch {
                    expected: existing.lineage,
                    found: snapshot.lineage.clone(),
                });
            }
            let backup = with_suffix(&self.path, ".backup");
            fs::copy(&self.path, &backup).map_err(|e| Error::io("back up", &backup, e))?;
        }

        snapshot.touch();
        let content =
            serde_json::to_string_pretty(snapshot).map_err(|e| Error::Serialize(e.to_string()))?;

        let tmp = with_suffix(&self.path, ".tmp");
        {
            let mut file = fs::File::create(&tmp).map_err(|e| Error::io("create", &tmp, e))?;
            file.write_all(content.as_bytes())
                .and_then(|()| file.write_all(b"\n"))
                .and_then(|()| file.sync_all())
                .map_err(|e| Error::io("write", &tmp, e))?;
        }
        fs::rename(&tmp, &self.path).map_err(|e| Error::io("rename", &self.path, e))?;

        log::debug!(
            "Saved state to {} (serial {})",
            self.path.display(),
            snapshot.serial
        );
        Ok(())
    }

    fn acquire(&self, operation: &str) -> Result<LockInfo> {
        self.ensure_parent()?;
        let info = LockInfo::new(operation);

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.lock_path);
        let mut file = match file {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(match self.read_lock_file() {
                    Ok(Some(held)) => held.into_locked_error(),
                    _ => Error::StateLocked {
                        id: "unknown".into(),
                        holder: "unknown".into(),
                        operation: "unknown".into(),
                        created: "unknown".into(),
                    },
                });
            }
            Err(e) => return Err(Error::io("create", &self.lock_path, e)),
        };

        let content =
            serde_json::to_string_pretty(&info).map_err(|e| Error::Serialize(e.to_string()))?;
        file.write_all(content.as_bytes())
            .map_err(|e| Error::io("write", &self.lock_path, e))?;
        Ok(info)
    }

    fn unlock(&self, id: &str) -> Result<()> {
        match self.read_lock_file()? {
            Some(held) if held.id == id => {
                fs::remove_file(&self.lock_path)
                    .map_err(|e| Error::io("remove", &self.lock_path, e))?;
                log::debug!("Released state lock {id}");
                Ok(())
            }
            _ => Err(Error::LockNotHeld(id.to_string())),
        }
    }

    fn lock_info(&self) -> Result<Option<LockInfo>> {
        self.read_lock_file()
    }

    fn force_unlock(&self) -> Result<Option<LockInfo>> {
        let held = self.read_lock_file().unwrap_or(None);
        match fs::remove_file(&self.lock_path) {
            Ok(()) => Ok(held),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::io("remove", &self.lock_path, e)),
        }
    }
}

// ============================================================================
// Memory store
// ============================================================================

/// In-memory store for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    snapshot: Mutex<Option<StateSnapshot>>,
    lock: Mutex<Option<LockInfo>>,
    writes: AtomicUsize,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: StateSnapshot) -> Self {
        Self {
            snapshot: Mutex::new(Some(snapshot)),
            ..Self::default()
        }
    }

    /// Number of successful writes.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Last written snapshot, if any.
    pub fn snapshot(&self) -> Option<StateSnapshot> {
        self.snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl StateStore for MemoryStateStore {
    fn read(&self) -> Result<StateSnapshot> {
        Ok(self.snapshot().unwrap_or_default())
    }

    fn write(&self, snapshot: &mut StateSnapshot) -> Result<()> {
        let mut slot = self.snapshot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = slot.as_ref()
            && existing.lineage != snapshot.lineage
        {
            return Err(Error::LineageMismatch {
                expected: existing.lineage.clone(),
                found: snapshot.lineage.clone(),
            });
        }
        snapshot.touch();
        *slot = Some(snapshot.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn acquire(&self, operation: &str) -> Result<LockInfo> {
        let mut slot = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(held) = slot.as_ref() {
            return Err(held.clone().into_locked_error());
        }
        let info = LockInfo::new(operation);
        *slot = Some(info.clone());
        Ok(info)
    }

    fn unlock(&self, id: &str) -> Result<()> {
        let mut slot = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        match slot.as_ref() {
            Some(held) if held.id == id => {
                *slot = None;
                Ok(())
            }
            _ => Err(Error::LockNotHeld(id.to_string())),
        }
    }

    fn lock_info(&self) -> Result<Option<LockInfo>> {
        Ok(self.lock.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn force_unlock(&self) -> Result<Option<LockInfo>> {
        Ok(self.lock.lock().unwrap_or_else(PoisonError::into_inner).take())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(kind: &str, name: &str, deps: &[&str]) -> ResourceRecord {
        ResourceRecord {
            kind: kind.into(),
            name: name.into(),
            id: format!("{kind}-1"),
            attributes: json!({ "tags": { "Name": name } })
                .as_object()
                .cloned()
                .unwrap(),
            computed: json!({ "arn": format!("arn:{name}") })
                .as_object()
                .cloned()
                .unwrap(),
            dependencies: deps.iter().map(|d| d.parse().unwrap()).collect(),
            status: ResourceStatus::Created,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_record_attribute_lookup() {
        let rec = record("aws_vpc", "main", &[]);
        assert_eq!(rec.attribute(&["id".into()]), Some(json!("aws_vpc-1")));
        assert_eq!(rec.attribute(&["arn".into()]), Some(json!("arn:main")));
        assert_eq!(
            rec.attribute(&["tags".into(), "Name".into()]),
            Some(json!("main"))
        );
        assert_eq!(rec.attribute(&["missing".into()]), None);
        assert_eq!(rec.full_attributes().len(), 3);
    }

    #[test]
    fn test_missing_file_reads_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::in_dir(dir.path());
        let state = store.read().unwrap();
        assert_eq!(state.serial, 0);
        assert!(state.resources.is_empty());
        assert_eq!(
            store.lock_path().file_name().unwrap().to_str(),
            Some("strata.state.lock")
        );
    }

    #[test]
    fn test_write_bumps_serial_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::in_dir(dir.path());
        let mut state = store.read().unwrap();
        state.upsert(record("aws_vpc", "main", &[]));

        store.write(&mut state).unwrap();
        store.write(&mut state).unwrap();
        assert_eq!(state.serial, 2);

        let loaded = store.read().unwrap();
        assert_eq!(loaded, state);
        assert!(dir.path().join("strata.state.json.backup").exists());
        assert!(!dir.path().join("strata.state.json.tmp").exists());
    }

    #[test]
    fn test_lineage_mismatch_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::in_dir(dir.path());
        store.write(&mut StateSnapshot::default()).unwrap();

        let err = store.write(&mut StateSnapshot::default()).unwrap_err();
        assert!(matches!(err, Error::LineageMismatch { .. }));
    }

    #[test]
    fn test_corrupt_state_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::in_dir(dir.path());
        fs::write(store.path(), "{ not json").unwrap();
        assert!(matches!(store.read(), Err(Error::CorruptState { .. })));
    }

    #[test]
    fn test_file_lock_excludes_second_holder() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::in_dir(dir.path());

        let guard = StateLock::acquire(&store, "apply").unwrap();
        let err = StateLock::acquire(&store, "plan").unwrap_err();
        match err {
            Error::StateLocked { operation, id, .. } => {
                assert_eq!(operation, "apply");
                assert_eq!(id, guard.info().id);
            }
            other => panic!("expected StateLocked, got {other}"),
        }

        drop(guard);
        assert!(!store.lock_path().exists());
        StateLock::acquire(&store, "plan").unwrap().release().unwrap();
    }

    #[test]
    fn test_unlock_wrong_id_and_force_unlock() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::in_dir(dir.path());
        let info = store.acquire("apply").unwrap();

        assert!(matches!(store.unlock("other"), Err(Error::LockNotHeld(_))));
        assert_eq!(store.lock_info().unwrap(), Some(info.clone()));
        assert_eq!(store.force_unlock().unwrap(), Some(info));
        assert_eq!(store.force_unlock().unwrap(), None);
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStateStore::new();
        let mut state = store.read().unwrap();
        state.upsert(record("aws_vpc", "main", &[]));
        store.write(&mut state).unwrap();
        assert_eq!(store.write_count(), 1);
        assert_eq!(store.read().unwrap().resources.len(), 1);

        let guard = StateLock::acquire(&store, "apply").unwrap();
        assert!(StateLock::acquire(&store, "apply").is_err());
        drop(guard);
        assert!(store.lock_info().unwrap().is_none());
    }

    #[test]
    fn test_dependency_graph_from_records() {
        let mut state = StateSnapshot::default();
        state.upsert(record("aws_subnet", "a", &["aws_vpc.main"]));
        state.upsert(record("aws_vpc", "main", &[]));
        let graph = state.dependency_graph().unwrap();
        let order: Vec<String> = graph
            .topological_order()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(order, vec!["aws_vpc.main", "aws_subnet.a"]);
    }
}
