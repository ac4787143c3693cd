//! Drift detection
//!
//! Refresh reads every recorded resource back from its provider and
//! compares the live input attributes with the snapshot.

use crate::address::ResourceAddress;
use crate::error::{Error, Result};
use crate::lifecycle::ResourceStatus;
use crate::provider::Providers;
use crate::retry::{LogCallback, with_retry};
use crate::state::StateSnapshot;
use crate::types::RetryConfig;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// What to do when live attributes diverge from the snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriftPolicy {
    /// Abort with a drift error
    #[default]
    Fail,
    /// Take the live values as the baseline so the plan restores the declaration
    Reconcile,
    /// Do not refresh at all
    Ignore,
}

impl FromStr for DriftPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "fail" => Ok(Self::Fail),
            "reconcile" => Ok(Self::Reconcile),
            "ignore" => Ok(Self::Ignore),
            other => Err(format!(
                "unknown drift policy '{other}' (expected fail, reconcile or ignore)"
            )),
        }
    }
}

impl fmt::Display for DriftPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Fail => "fail",
            Self::Reconcile => "reconcile",
            Self::Ignore => "ignore",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriftKind {
    /// Gone from the provider; will be re-created
    Missing,
    /// Live values differ for these attributes
    Changed { attributes: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriftEntry {
    pub address: ResourceAddress,
    pub kind: DriftKind,
}

impl fmt::Display for DriftEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            DriftKind::Missing => write!(f, "{} no longer exists", self.address),
            DriftKind::Changed { attributes } => {
                write!(f, "{} changed ({})", self.address, attributes.join(", "))
            }
        }
    }
}

/// Everything refresh found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriftReport {
    pub entries: Vec<DriftEntry>,
}

impl DriftReport {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn missing(&self) -> impl Iterator<Item = &ResourceAddress> {
        self.entries
            .iter()
            .filter(|e| e.kind == DriftKind::Missing)
            .map(|e| &e.address)
    }
}

/// Attributes whose live value differs from the recorded one.
///
/// Only recorded input attributes are compared; an absent live value
/// matches a recorded null.
fn changed_attributes(
    recorded: &serde_json::Map<String, Value>,
    live: &serde_json::Map<String, Value>,
) -> Vec<String> {
    recorded
        .iter()
        .filter(|(name, value)| live.get(*name).unwrap_or(&Value::Null) != *value)
        .map(|(name, _)| name.clone())
        .collect()
}

/// Refresh the snapshot from the providers according to `policy`.
///
/// Missing resources are dropped from the snapshot so the planner
/// re-creates them. Records left failed by a previous apply are not
/// read; they are replaced anyway.
pub fn refresh(
    snapshot: &mut StateSnapshot,
    providers: &Providers,
    policy: DriftPolicy,
    retry: &RetryConfig,
) -> Result<DriftReport> {
    let mut report = DriftReport::default();
    if policy == DriftPolicy::Ignore {
        log::debug!("Drift policy is ignore; skipping refresh");
        return Ok(report);
    }

    let mut live_values = Vec::new();
    for address in snapshot.addresses() {
        let Some(record) = snapshot.get(&address) else {
            continue;
        };
        if record.status == ResourceStatus::Failed {
            continue;
        }
        let provider = providers.for_kind(&record.kind)?;
        let label = address.to_string();
        let callback = LogCallback { label: &label };
        let live = with_retry(retry, Some(&callback), || provider.read(record)).map_err(
            |source| Error::Provider {
                address: label.clone(),
                source,
            },
        )?;

        match live {
            None => {
                log::warn!("{address} no longer exists and will be re-created");
                report.entries.push(DriftEntry {
                    address,
                    kind: DriftKind::Missing,
                });
            }
            Some(live) => {
                let attributes = changed_attributes(&record.attributes, &live);
                if !attributes.is_empty() {
                    log::warn!("{address} drifted: {}", attributes.join(", "));
                    report.entries.push(DriftEntry {
                        address: address.clone(),
                        kind: DriftKind::Changed { attributes },
                    });
                    live_values.push((address, live));
                }
            }
        }
    }

    if policy == DriftPolicy::Fail {
        let changed: Vec<String> = report
            .entries
            .iter()
            .filter(|e| matches!(e.kind, DriftKind::Changed { .. }))
            .map(ToString::to_string)
            .collect();
        if !changed.is_empty() {
            return Err(Error::Drift { resources: changed });
        }
    }

    for address in report.missing() {
        snapshot.remove(address);
    }
    for (address, live) in live_values {
        if let Some(record) = snapshot.get_mut(&address) {
            let names: Vec<String> = record.attributes.keys().cloned().collect();
            for name in names {
                match live.get(&name) {
                    Some(value) => {
                        record.attributes.insert(name, value.clone());
                    }
                    None => {
                        record.attributes.remove(&name);
                    }
                }
            }
        }
    }

    Ok(report)
}
