//! Per-resource lifecycle state machine
//!
//! ```text
//! absent  --plan_create--> planned_create --begin--> creating --succeed--> created
//! created --plan_update--> planned_update --begin--> updating --succeed--> created
//! created --plan_delete--> planned_delete --begin--> deleting --succeed--> absent
//! creating | updating | deleting --fail--> failed
//! failed  --plan_delete--> planned_delete
//! ```
//!
//! A replace is a delete followed by a create of the same address. Failed
//! resources are never retried automatically; the next plan replaces them.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Lifecycle status of one resource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    #[default]
    Absent,
    PlannedCreate,
    Creating,
    Created,
    PlannedUpdate,
    Updating,
    PlannedDelete,
    Deleting,
    Failed,
}

/// Input to the lifecycle state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    PlanCreate,
    PlanUpdate,
    PlanDelete,
    /// Provider call dispatched
    Begin,
    /// Provider call returned and the resource is stable
    Succeed,
    /// Provider call failed
    Fail,
}

impl ResourceStatus {
    /// Next status for an event, or `None` when the transition is invalid.
    pub fn next(self, event: LifecycleEvent) -> Option<Self> {
        use LifecycleEvent::{Begin, Fail, PlanCreate, PlanDelete, PlanUpdate, Succeed};
        use ResourceStatus::*;

        match (self, event) {
            (Absent, PlanCreate) => Some(PlannedCreate),
            (PlannedCreate, Begin) => Some(Creating),
            (Creating, Succeed) => Some(Created),

            (Created, PlanUpdate) => Some(PlannedUpdate),
            (PlannedUpdate, Begin) => Some(Updating),
            (Updating, Succeed) => Some(Created),

            (Created | Failed, PlanDelete) => Some(PlannedDelete),
            (PlannedDelete, Begin) => Some(Deleting),
            (Deleting, Succeed) => Some(Absent),

            (Creating | Updating | Deleting, Fail) => Some(Failed),
            _ => None,
        }
    }

    /// Apply an event, failing on invalid transitions.
    pub fn transition(self, event: LifecycleEvent) -> std::result::Result<Self, String> {
        self.next(event)
            .ok_or_else(|| format!("cannot apply {event:?} while {self}"))
    }

    /// Events accepted in this status.
    pub fn valid_events(self) -> Vec<LifecycleEvent> {
        use LifecycleEvent::*;
        [PlanCreate, PlanUpdate, PlanDelete, Begin, Succeed, Fail]
            .into_iter()
            .filter(|e| self.next(*e).is_some())
            .collect()
    }

    /// A provider call is in flight.
    pub fn is_in_progress(self) -> bool {
        matches!(self, Self::Creating | Self::Updating | Self::Deleting)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Absent => "absent",
            Self::PlannedCreate => "planned_create",
            Self::Creating => "creating",
            Self::Created => "created",
            Self::PlannedUpdate => "planned_update",
            Self::Updating => "updating",
            Self::PlannedDelete => "planned_delete",
            Self::Deleting => "deleting",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks the status of every resource touched by an apply.
#[derive(Debug, Clone, Default)]
pub struct LifecycleTracker {
    states: BTreeMap<String, ResourceStatus>,
}

impl LifecycleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the starting status of a resource.
    pub fn seed(&mut self, address: &str, status: ResourceStatus) {
        self.states.insert(address.to_string(), status);
    }

    /// Current status; unknown resources are absent.
    pub fn status(&self, address: &str) -> ResourceStatus {
        self.states.get(address).copied().unwrap_or_default()
    }

    /// Advance a resource through an event.
    pub fn advance(&mut self, address: &str, event: LifecycleEvent) -> Result<ResourceStatus> {
        let next = self
            .status(address)
            .transition(event)
            .map_err(|message| Error::Lifecycle {
                address: address.to_string(),
                message,
            })?;
        log::trace!("{address}: {} -> {next}", self.status(address));
        self.states.insert(address.to_string(), next);
        Ok(next)
    }
}
