//! # Declarative
//!
//! A declarative infrastructure engine.
//!
//! Resources are declared in a document, validated against a registry of
//! kind schemas, linked into a dependency graph through `${...}`
//! references, diffed against a persisted state snapshot and converged by
//! calling providers with bounded parallelism.
//!
//! ## Core Concepts
//!
//! - **Document**: resources, variables, outputs and provider settings
//! - **SchemaRegistry**: typed attribute schemas per resource kind
//! - **DependencyGraph**: the DAG implied by references and `depends_on`
//! - **Plan**: ordered create / update / replace / delete steps
//! - **Executor**: applies steps on a worker pool, persisting after each
//! - **StateStore**: durable snapshot with locking
//!
//! ## Example
//!
//! ```ignore
//! use declarative::{
//!     AutoConfirm, Document, Engine, FileStateStore, NoProgress, PlanOptions,
//!     Providers, SchemaRegistry,
//! };
//! use std::sync::Arc;
//!
//! let doc = Document::load("main.toml".as_ref())?;
//! let mut registry = SchemaRegistry::with_builtins();
//! registry.load_file("schemas.toml".as_ref())?;
//!
//! let mut providers = Providers::with_builtins(".".as_ref());
//! providers.set_default(Arc::new(MyCloud::new()));
//!
//! let store = Arc::new(FileStateStore::in_dir(".".as_ref()));
//! let engine = Engine::new(registry, providers, store);
//!
//! let report = engine.apply(
//!     &doc,
//!     &Default::default(),
//!     &PlanOptions::default(),
//!     &mut NoProgress,
//!     &mut AutoConfirm,
//! )?;
//! println!("{}", report.plan.summary());
//! ```
//!
//! ## Provider Traits
//!
//! - [`Provider`]: create, update, delete, read and status calls for a kind
//! - [`StateStore`]: where the snapshot lives and how it is locked
//! - [`ProgressCallback`]: receives plan and progress updates
//! - [`ConfirmCallback`]: handles user confirmations
//!
//! This allows the crate to be used without hard dependencies on
//! specific UI frameworks or cloud SDKs.

pub mod address;
pub mod builtin;
pub mod context;
pub mod diff;
pub mod document;
pub mod drift;
pub mod engine;
pub mod error;
pub mod executor;
pub mod expression;
pub mod graph;
pub mod lifecycle;
pub mod planner;
pub mod provider;
pub mod retry;
pub mod schema;
pub mod state;
pub mod types;
pub mod variables;

// Re-export main types at crate root
pub use address::ResourceAddress;
pub use context::{
    AutoConfirm, AutoDecline, CancellationToken, ConfirmCallback, NoProgress, ProgressCallback,
};
pub use diff::{Action, AttributeChange, DiffSummary, ResourceDiff};
pub use document::{
    Attributes, Document, OutputDecl, ProviderConfig, ResourceDecl, VarType, VariableDecl,
};
pub use drift::{DriftPolicy, DriftReport};
pub use engine::{ApplyReport, Engine, EngineOptions, PlanReport};
pub use error::{Error, ErrorCategory, ProviderError, ProviderErrorKind, Result, SchemaViolation};
pub use executor::execute;
pub use expression::Resolved;
pub use graph::DependencyGraph;
pub use lifecycle::ResourceStatus;
pub use planner::{Plan, PlanOptions, PlanStep, StepOp, Target};
pub use provider::{MemoryProvider, Provider, ProviderResponse, Providers, Stability};
pub use schema::{AttributeSchema, AttributeType, ResourceSchema, SchemaRegistry};
pub use state::{
    FileStateStore, LockInfo, MemoryStateStore, OutputValue, ResourceRecord, StateSnapshot,
    StateStore,
};
pub use types::{
    ExecuteOptions, ExecuteReport, ExecuteSummary, PollConfig, RetryConfig, StepOutcome,
    StepResult,
};
