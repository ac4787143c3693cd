//! Error types for the declarative engine.
//!
//! Errors are grouped into categories that decide when in the
//! plan-and-apply cycle they can surface and whether a retry is worth it.
//! Validation and graph errors always abort before any provider call;
//! provider errors are reported per resource and only halt the subtree
//! that depends on the failed resource.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Categories of engine errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Attribute type/shape mismatch against a resource schema
    Schema,
    /// Dangling, cyclic or duplicate references
    Reference,
    /// Provider rejected or failed a call
    Provider,
    /// Live state diverged from the last-known snapshot
    Drift,
    /// State store could not be read, written or locked
    State,
    /// Plan would violate a guard such as `prevent_destroy`
    Guard,
    /// Document or file could not be read or parsed
    Input,
}

impl ErrorCategory {
    /// Whether errors of this category abort before any mutation.
    pub fn aborts_before_mutation(&self) -> bool {
        matches!(
            self,
            Self::Schema | Self::Reference | Self::Drift | Self::Guard | Self::Input
        )
    }

    /// Short description for user-facing output.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Schema => "Schema validation failed",
            Self::Reference => "Reference resolution failed",
            Self::Provider => "Provider call failed",
            Self::Drift => "Drift detected",
            Self::State => "State store error",
            Self::Guard => "Plan guard violated",
            Self::Input => "Invalid input",
        }
    }
}

/// A single schema violation on one resource attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    /// Address of the offending resource (`kind.name`)
    pub address: String,
    /// Attribute path, empty for resource-level violations
    pub attribute: String,
    /// What is wrong
    pub message: String,
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.attribute.is_empty() {
            write!(f, "{}: {}", self.address, self.message)
        } else {
            write!(f, "{}.{}: {}", self.address, self.attribute, self.message)
        }
    }
}

/// Kind of provider failure, used for retry classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// Temporary failure (network, 5xx)
    Transient,
    /// Throttled by the provider
    RateLimited,
    /// Caller lacks permission
    Permission,
    /// Request was invalid or conflicts with existing resources
    Rejected,
    /// Resource does not exist
    NotFound,
    /// Resource did not reach a stable state in time
    Timeout,
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Transient => "transient error",
            Self::RateLimited => "rate limited",
            Self::Permission => "permission denied",
            Self::Rejected => "rejected",
            Self::NotFound => "not found",
            Self::Timeout => "timed out",
        };
        f.write_str(s)
    }
}

/// Error returned by a [`crate::Provider`] call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct ProviderError {
    /// Failure classification
    pub kind: ProviderErrorKind,
    /// Reason returned by the provider
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Transient, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::RateLimited, message)
    }

    pub fn permission(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Permission, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Rejected, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::NotFound, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Timeout, message)
    }

    /// Transient and rate-limit failures are retried with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind,
            ProviderErrorKind::Transient | ProviderErrorKind::RateLimited
        )
    }
}

/// Errors that can occur while validating, planning or applying.
#[derive(Debug, Error)]
pub enum Error {
    /// One or more attributes violate their resource schema
    #[error("{} schema violation(s):\n{}", .0.len(), format_violations(.0))]
    Schema(Vec<SchemaViolation>),

    /// No schema registered for a resource kind
    #[error("unknown resource kind '{kind}' for {address}")]
    UnknownKind { address: String, kind: String },

    /// Two declarations share the same (kind, name) identity
    #[error("duplicate resource declaration: {address}")]
    DuplicateResource { address: String },

    /// A reference names a resource or variable that is not declared
    #[error("{from} references undeclared {missing}")]
    UnresolvedReference { from: String, missing: String },

    /// A reference expression could not be parsed
    #[error("invalid expression '{expression}' in {from}: {message}")]
    InvalidExpression {
        from: String,
        expression: String,
        message: String,
    },

    /// Dependency cycle between resources
    #[error("dependency cycle: {}", .path.join(" -> "))]
    Cycle { path: Vec<String> },

    /// Invalid resource address syntax
    #[error("invalid resource address '{0}': expected kind.name")]
    InvalidAddress(String),

    /// Variable problems (missing value, wrong type, undeclared)
    #[error("variable '{name}': {message}")]
    Variable { name: String, message: String },

    /// Live state diverged from the last-known snapshot
    #[error("drift detected on {} resource(s): {}", .resources.len(), .resources.join(", "))]
    Drift { resources: Vec<String> },

    /// A resource with `prevent_destroy` would be deleted or replaced
    #[error("{address} has prevent_destroy set but the plan would {action} it")]
    PreventDestroy { address: String, action: String },

    /// A provider call failed outside of the executor (refresh, configure)
    #[error("provider error for {address}: {source}")]
    Provider {
        address: String,
        #[source]
        source: ProviderError,
    },

    /// No provider is registered for a resource kind
    #[error("no provider registered for resource kind '{kind}'")]
    NoProvider { kind: String },

    /// The state store is locked by another operation
    #[error("state is locked by {holder} (lock {id}, operation '{operation}', since {created})")]
    StateLocked {
        id: String,
        holder: String,
        operation: String,
        created: String,
    },

    /// The state file belongs to a different lineage
    #[error("state lineage mismatch: expected {expected}, found {found}")]
    LineageMismatch { expected: String, found: String },

    /// The lock being released is not the one currently held
    #[error("lock {0} is not held")]
    LockNotHeld(String),

    /// State file content could not be parsed
    #[error("corrupt state file {path}: {message}")]
    CorruptState { path: PathBuf, message: String },

    /// Invalid lifecycle transition
    #[error("invalid lifecycle transition for {address}: {message}")]
    Lifecycle { address: String, message: String },

    /// Document parse failure
    #[error("failed to parse {path}: {message}")]
    Parse { path: String, message: String },

    /// File I/O with path context
    #[error("{action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Serialization failure
    #[error("serialization failed: {0}")]
    Serialize(String),

    /// Worker pool could not be created
    #[error("failed to create worker pool: {0}")]
    WorkerPool(String),
}

impl Error {
    /// Category of this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Schema(_) | Self::UnknownKind { .. } | Self::Variable { .. } => {
                ErrorCategory::Schema
            }
            Self::DuplicateResource { .. }
            | Self::UnresolvedReference { .. }
            | Self::InvalidExpression { .. }
            | Self::Cycle { .. }
            | Self::InvalidAddress(_) => ErrorCategory::Reference,
            Self::Drift { .. } => ErrorCategory::Drift,
            Self::PreventDestroy { .. } => ErrorCategory::Guard,
            Self::Provider { .. } | Self::NoProvider { .. } => ErrorCategory::Provider,
            Self::StateLocked { .. }
            | Self::LineageMismatch { .. }
            | Self::LockNotHeld(_)
            | Self::CorruptState { .. }
            | Self::Lifecycle { .. }
            | Self::WorkerPool(_) => ErrorCategory::State,
            Self::Parse { .. } | Self::Io { .. } | Self::Serialize(_) => ErrorCategory::Input,
        }
    }

    pub(crate) fn io(
        action: &'static str,
        path: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        Self::Io {
            action,
            path: path.into(),
            source,
        }
    }
}

fn format_violations(violations: &[SchemaViolation]) -> String {
    violations
        .iter()
        .map(|v| format!("  - {v}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
