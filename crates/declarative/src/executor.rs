//! Execution engine - applies plan steps with bounded parallelism
//!
//! A coordinator on the calling thread owns the state snapshot. It hands
//! ready steps (every predecessor succeeded) to a rayon pool of `jobs`
//! workers and receives their results over a channel. Successful steps
//! are recorded and persisted one by one; a failed step blocks everything
//! reachable from it while independent branches carry on.

use crate::address::ResourceAddress;
use crate::context::ProgressCallback;
use crate::document::{Attributes, ResourceDecl};
use crate::error::{Error, ProviderError, ProviderErrorKind, Result};
use crate::expression::{self, Lookup, Resolved, Scope};
use crate::diff::Action;
use crate::lifecycle::{LifecycleEvent, LifecycleTracker, ResourceStatus};
use crate::planner::{Plan, StepOp};
use crate::provider::{Provider, ProviderResponse, Providers, Stability};
use crate::retry::{LogCallback, with_retry};
use crate::state::{ResourceRecord, StateSnapshot, StateStore};
use crate::types::{
    ExecuteOptions, ExecuteReport, PollConfig, RetryConfig, StepOutcome, StepResult,
};
use chrono::Utc;
use serde_json::Value;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Instant;

/// Expression scope backed by a state snapshot.
///
/// Used at apply time, when every dependency has been applied already,
/// and for evaluating outputs.
pub(crate) struct SnapshotScope<'a> {
    pub snapshot: &'a StateSnapshot,
    pub variables: &'a std::collections::BTreeMap<String, Value>,
    pub base_dir: &'a Path,
}

impl Scope for SnapshotScope<'_> {
    fn resource(&self, address: &ResourceAddress, path: &[String]) -> Lookup {
        self.snapshot.get(address).map_or(Lookup::Missing, |record| {
            Lookup::Known(record.attribute(path).unwrap_or(Value::Null))
        })
    }

    fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    fn base_dir(&self) -> &Path {
        self.base_dir
    }
}

/// Everything a worker needs to run one step.
struct Work {
    op: StepOp,
    kind: String,
    label: String,
    attributes: Attributes,
    prior: Option<ResourceRecord>,
    provider: Arc<dyn Provider>,
    retry: RetryConfig,
    poll: PollConfig,
}

enum WorkResult {
    Applied {
        response: ProviderResponse,
        attributes: Attributes,
    },
    Destroyed,
    Failed {
        error: ProviderError,
        /// Set when the resource exists but never became stable
        response: Option<ProviderResponse>,
    },
}

impl Work {
    fn run(self) -> WorkResult {
        let callback = LogCallback { label: &self.label };
        let provider = self.provider.as_ref();

        let applied = match (self.op, &self.prior) {
            (StepOp::Destroy, None) => return WorkResult::Destroyed,
            (StepOp::Destroy, Some(prior)) => {
                return match with_retry(&self.retry, Some(&callback), || provider.delete(prior)) {
                    Ok(()) => WorkResult::Destroyed,
                    Err(e) if e.kind == ProviderErrorKind::NotFound => {
                        log::info!("{} was already gone", self.label);
                        WorkResult::Destroyed
                    }
                    Err(error) => WorkResult::Failed {
                        error,
                        response: None,
                    },
                };
            }
            (StepOp::Update, Some(prior)) => with_retry(&self.retry, Some(&callback), || {
                provider.update(prior, &self.attributes)
            }),
            (StepOp::Update, None) => Err(ProviderError::not_found(format!(
                "{} has no recorded state",
                self.label
            ))),
            (StepOp::Create, _) => with_retry(&self.retry, Some(&callback), || {
                provider.create(&self.kind, &self.attributes)
            }),
        };

        let response = match applied {
            Ok(response) => response,
            Err(error) => {
                return WorkResult::Failed {
                    error,
                    response: None,
                };
            }
        };

        match self.await_stable(&response.id, &callback) {
            Ok(()) => WorkResult::Applied {
                response,
                attributes: self.attributes,
            },
            Err(error) => WorkResult::Failed {
                error,
                response: Some(response),
            },
        }
    }

    /// Poll `status` until the resource is ready, failed or the timeout hits.
    fn await_stable(
        &self,
        id: &str,
        callback: &LogCallback<'_>,
    ) -> std::result::Result<(), ProviderError> {
        let started = Instant::now();
        loop {
            let status = with_retry(&self.retry, Some(callback), || {
                self.provider.status(&self.kind, id)
            })?;
            match status {
                Stability::Ready => return Ok(()),
                Stability::Failed(reason) => return Err(ProviderError::rejected(reason)),
                Stability::Pending if started.elapsed() >= self.poll.timeout => {
                    return Err(ProviderError::timeout(format!(
                        "{} did not become ready within {:?}",
                        self.label, self.poll.timeout
                    )));
                }
                Stability::Pending => {
                    log::debug!("{} is still converging", self.label);
                    thread::sleep(self.poll.interval);
                }
            }
        }
    }
}

struct Coordinator<'a, P: ProgressCallback> {
    plan: &'a Plan,
    providers: &'a Providers,
    store: &'a dyn StateStore,
    snapshot: &'a mut StateSnapshot,
    options: &'a ExecuteOptions,
    progress: &'a mut P,
    tracker: LifecycleTracker,
    successors: Vec<Vec<usize>>,
    waiting_on: Vec<usize>,
    results: Vec<Option<StepResult>>,
    completed: Vec<StepOutcome>,
    ready: BinaryHeap<Reverse<usize>>,
    fatal: Option<Error>,
}

impl<'a, P: ProgressCallback> Coordinator<'a, P> {
    fn new(
        plan: &'a Plan,
        providers: &'a Providers,
        store: &'a dyn StateStore,
        snapshot: &'a mut StateSnapshot,
        options: &'a ExecuteOptions,
        progress: &'a mut P,
    ) -> Result<Self> {
        let count = plan.steps.len();
        let mut successors = vec![Vec::new(); count];
        let mut waiting_on = vec![0usize; count];
        for (idx, step) in plan.steps.iter().enumerate() {
            waiting_on[idx] = step.after.len();
            for &pred in &step.after {
                successors[pred].push(idx);
            }
        }
        let ready = (0..count)
            .filter(|i| waiting_on[*i] == 0)
            .map(Reverse)
            .collect();

        let mut tracker = LifecycleTracker::new();
        for change in &plan.changes {
            let address = change.address.to_string();
            let status = snapshot
                .get(&change.address)
                .map_or(ResourceStatus::Absent, |r| r.status);
            tracker.seed(&address, status);
            let event = match change.action {
                Action::Create => LifecycleEvent::PlanCreate,
                Action::Update => LifecycleEvent::PlanUpdate,
                Action::Replace | Action::Delete => LifecycleEvent::PlanDelete,
            };
            tracker.advance(&address, event)?;
        }

        Ok(Self {
            plan,
            providers,
            store,
            snapshot,
            options,
            progress,
            tracker,
            successors,
            waiting_on,
            results: vec![None; count],
            completed: Vec::with_capacity(count),
            ready,
            fatal: None,
        })
    }

    fn halted(&self) -> bool {
        self.fatal.is_some() || self.options.cancel.is_cancelled()
    }

    fn run(&mut self, pool: &rayon::ThreadPool) {
        let jobs = self.options.jobs.max(1);
        let (tx, rx) = mpsc::channel::<(usize, WorkResult)>();

        pool.in_place_scope(|scope| {
            let mut in_flight = 0usize;
            loop {
                while in_flight < jobs && !self.halted() {
                    let Some(Reverse(idx)) = self.ready.pop() else {
                        break;
                    };
                    if self.results[idx].is_some() {
                        continue;
                    }
                    let Some(work) = self.dispatch(idx) else {
                        continue;
                    };
                    let tx = tx.clone();
                    in_flight += 1;
                    scope.spawn(move |_| {
                        // only catches with panic = "unwind"; the release profile aborts
                        let result = panic::catch_unwind(AssertUnwindSafe(|| work.run()))
                            .unwrap_or_else(|_| WorkResult::Failed {
                                error: ProviderError::rejected("provider panicked"),
                                response: None,
                            });
                        let _ = tx.send((idx, result));
                    });
                }

                if in_flight == 0 {
                    break;
                }
                let Ok((idx, result)) = rx.recv() else {
                    break;
                };
                in_flight -= 1;
                self.finish(idx, result);
            }
        });
    }

    fn dispatch(&mut self, idx: usize) -> Option<Work> {
        let plan = self.plan;
        let step = &plan.steps[idx];
        let address = step.address.to_string();

        if let Err(e) = self.tracker.advance(&address, LifecycleEvent::Begin) {
            self.fatal = Some(e);
            return None;
        }
        self.progress.on_step_start(step);
        log::info!("{} {}", step.op, address);

        match self.prepare(idx) {
            Ok(work) => Some(work),
            Err(reason) => {
                self.fail(idx, reason, None, None);
                None
            }
        }
    }

    fn prepare(&self, idx: usize) -> std::result::Result<Work, String> {
        let step = &self.plan.steps[idx];
        let provider = self
            .providers
            .for_kind(&step.address.kind)
            .map_err(|e| e.to_string())?;

        let attributes = match step.op {
            StepOp::Destroy => Attributes::new(),
            StepOp::Create | StepOp::Update => {
                let decl = self
                    .plan
                    .declarations
                    .get(&step.address)
                    .ok_or_else(|| format!("no declaration for {}", step.address))?;
                self.resolve(decl)?
            }
        };

        Ok(Work {
            op: step.op,
            kind: step.address.kind.clone(),
            label: step.address.to_string(),
            attributes,
            prior: self.snapshot.get(&step.address).cloned(),
            provider,
            retry: self.options.retry.clone(),
            poll: self.options.poll.clone(),
        })
    }

    /// Resolve a declaration against the live snapshot.
    fn resolve(&self, decl: &ResourceDecl) -> std::result::Result<Attributes, String> {
        let scope = SnapshotScope {
            snapshot: &*self.snapshot,
            variables: &self.plan.variables,
            base_dir: &self.plan.base_dir,
        };
        let from = decl.address.to_string();
        let mut out = Attributes::new();
        for (name, value) in &decl.attributes {
            match expression::evaluate(value, &scope, &from).map_err(|e| e.to_string())? {
                Resolved::Known(v) => {
                    out.insert(name.clone(), v);
                }
                Resolved::Unknown => return Err(format!("{name} is still unknown")),
            }
        }
        Ok(out)
    }

    fn finish(&mut self, idx: usize, result: WorkResult) {
        let plan = self.plan;
        let step = &plan.steps[idx];
        let address = step.address.to_string();

        match result {
            WorkResult::Failed { error, response } => {
                let kind = Some(error.kind);
                self.fail(idx, error.to_string(), kind, response);
                return;
            }
            WorkResult::Destroyed => {
                self.snapshot.remove(&step.address);
            }
            WorkResult::Applied {
                response,
                attributes,
            } => {
                let record = ResourceRecord {
                    kind: step.address.kind.clone(),
                    name: step.address.name.clone(),
                    id: response.id,
                    attributes,
                    computed: response.computed,
                    dependencies: plan
                        .dependencies
                        .get(&step.address)
                        .cloned()
                        .unwrap_or_default(),
                    status: ResourceStatus::Created,
                    updated_at: Utc::now(),
                };
                self.snapshot.upsert(record);
            }
        }

        let mut advanced = self.tracker.advance(&address, LifecycleEvent::Succeed);
        if step.op == StepOp::Destroy && step.action == Action::Replace {
            advanced =
                advanced.and_then(|_| self.tracker.advance(&address, LifecycleEvent::PlanCreate));
        }
        if let Err(e) = advanced {
            self.fatal.get_or_insert(e);
        }

        self.persist();
        self.complete(idx, StepResult::Succeeded);

        for &next in &self.successors[idx] {
            self.waiting_on[next] -= 1;
            if self.waiting_on[next] == 0 && self.results[next].is_none() {
                self.ready.push(Reverse(next));
            }
        }
    }

    fn fail(
        &mut self,
        idx: usize,
        reason: String,
        kind: Option<ProviderErrorKind>,
        response: Option<ProviderResponse>,
    ) {
        let plan = self.plan;
        let step = &plan.steps[idx];
        let address = step.address.to_string();
        log::error!("{} {} failed: {}", step.op, address, reason);

        if let Err(e) = self.tracker.advance(&address, LifecycleEvent::Fail) {
            self.fatal.get_or_insert(e);
        }

        let mut dirty = false;
        match (step.op, response) {
            (StepOp::Create, Some(response)) => {
                self.snapshot.upsert(ResourceRecord {
                    kind: step.address.kind.clone(),
                    name: step.address.name.clone(),
                    id: response.id,
                    attributes: Attributes::new(),
                    computed: response.computed,
                    dependencies: plan
                        .dependencies
                        .get(&step.address)
                        .cloned()
                        .unwrap_or_default(),
                    status: ResourceStatus::Failed,
                    updated_at: Utc::now(),
                });
                dirty = true;
            }
            (StepOp::Create, None) => {}
            (StepOp::Update | StepOp::Destroy, _) => {
                if let Some(record) = self.snapshot.get_mut(&step.address) {
                    record.status = ResourceStatus::Failed;
                    record.updated_at = Utc::now();
                    dirty = true;
                }
            }
        }
        if dirty {
            self.persist();
        }

        self.complete(idx, StepResult::Failed { reason, kind });

        let mut stack = self.successors[idx].clone();
        while let Some(next) = stack.pop() {
            if self.results[next].is_some() {
                continue;
            }
            self.complete(
                next,
                StepResult::Blocked {
                    by: step.address.clone(),
                },
            );
            stack.extend(self.successors[next].iter().copied());
        }
    }

    fn complete(&mut self, idx: usize, result: StepResult) {
        let step = &self.plan.steps[idx];
        let outcome = StepOutcome {
            address: step.address.clone(),
            action: step.action,
            op: step.op,
            result: result.clone(),
        };
        self.results[idx] = Some(result);
        self.progress.on_step_complete(&outcome);
        self.completed.push(outcome);
    }

    fn persist(&mut self) {
        if let Err(e) = self.store.write(self.snapshot) {
            log::error!("Failed to persist state: {e}");
            self.fatal.get_or_insert(e);
        }
    }
}

/// Execute a plan, persisting state after every successful step.
///
/// Returns per-step outcomes. Provider failures do not make this return an
/// error; only state persistence or internal failures do, after in-flight
/// steps have finished.
pub fn execute<P: ProgressCallback>(
    plan: &Plan,
    providers: &Providers,
    store: &dyn StateStore,
    snapshot: &mut StateSnapshot,
    options: &ExecuteOptions,
    progress: &mut P,
) -> Result<ExecuteReport> {
    if plan.steps.is_empty() {
        return Ok(ExecuteReport::default());
    }

    let jobs = options.jobs.max(1);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs)
        .thread_name(|i| format!("strata-worker-{i}"))
        .build()
        .map_err(|e| Error::WorkerPool(e.to_string()))?;

    progress.on_apply_start(plan.steps.len());
    let mut coordinator = Coordinator::new(plan, providers, store, snapshot, options, progress)?;
    coordinator.run(&pool);

    for idx in 0..plan.steps.len() {
        if coordinator.results[idx].is_none() {
            coordinator.complete(idx, StepResult::Cancelled);
        }
    }
    if options.cancel.is_cancelled() {
        log::warn!("Apply cancelled; remaining steps were not started");
    }
    if let Some(e) = coordinator.fatal.take() {
        return Err(e);
    }

    let report = ExecuteReport::new(std::mem::take(&mut coordinator.completed));
    coordinator.progress.on_apply_complete(&report.summary);
    Ok(report)
}
