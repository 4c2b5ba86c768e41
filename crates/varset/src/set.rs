//! The variable set scheduler.
//!
//! Owns the variables, derives the dependency graph at activation, and
//! drives each variable idle -> loading -> completed in dependency order.
//! All entry points funnel into one serialized message pump, so completion
//! handling always observes fully up-to-date state and reentrant completions
//! (a custom variable finishing synchronously inside a start) queue instead
//! of recursing.
//!
//! Reruns use a queued-update model: a changed completion marks every
//! dependent as queued, and a queued variable starts only once it is not
//! mid-flight and no variable it depends on is loading or queued itself.
//! Any number of upstream changes therefore coalesce into a single restart,
//! and a diamond (A feeding both B and C, with C also reading B) reruns C
//! exactly once, after B.
//!
//! Lock ordering: the set's internal lock may acquire a variable's state
//! lock, never the reverse. No lock is held across calls into the fetch
//! collaborator.

use crate::error::{FetchError, SetError};
use crate::graph::DependencyGraph;
use crate::interpolate::interpolate;
use crate::provider::{CompletionSink, OptionsProvider, OptionsRequest, UpdateHandle};
use crate::types::{VariableKey, VariableOption, VariableValue};
use crate::variable::{Variable, VariableKind};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

/// Scheduling status of one variable within the current activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotStatus {
    Idle,
    Loading,
    Completed,
}

struct Slot {
    status: SlotStatus,
    /// Bumped on every start and cancellation; completions carrying a stale
    /// epoch are discarded.
    epoch: u64,
    pending: Option<Box<dyn UpdateHandle>>,
    /// An upstream change requires this variable to run again. Started as
    /// soon as it is not mid-flight and its upstream subgraph is quiescent;
    /// multiple triggers coalesce.
    update_queued: bool,
}

impl Slot {
    fn new() -> Self {
        Self {
            status: SlotStatus::Idle,
            epoch: 0,
            pending: None,
            update_queued: false,
        }
    }
}

enum SchedulerMsg {
    Activate,
    Deactivate,
    FetchDone {
        index: usize,
        epoch: u64,
        issued: String,
        outcome: Result<Vec<VariableOption>, FetchError>,
    },
    ValueEdited {
        index: usize,
    },
}

struct StartJob {
    index: usize,
    epoch: u64,
    issued: String,
    kind: VariableKind,
    variable: Arc<Variable>,
    stale: Option<Box<dyn UpdateHandle>>,
}

struct SetInner {
    variables: Vec<Arc<Variable>>,
    index_by_key: HashMap<VariableKey, usize>,
    graph: DependencyGraph,
    slots: Vec<Slot>,
    queue: VecDeque<SchedulerMsg>,
    draining: bool,
    active: bool,
}

pub(crate) struct SetCore {
    provider: Arc<dyn OptionsProvider>,
    self_handle: OnceCell<Weak<SetCore>>,
    inner: Mutex<SetInner>,
}

/// An activatable collection of interdependent variables.
pub struct VariableSet {
    core: Arc<SetCore>,
}

impl VariableSet {
    /// Build a set from variables in host-supplied order (not necessarily
    /// dependency order) and a fetch collaborator.
    ///
    /// # Errors
    ///
    /// Returns [`SetError::DuplicateName`] when two variables share a name.
    pub fn new(
        variables: Vec<Arc<Variable>>,
        provider: Arc<dyn OptionsProvider>,
    ) -> Result<Self, SetError> {
        let mut seen = BTreeSet::new();
        let mut index_by_key = HashMap::new();
        for (index, variable) in variables.iter().enumerate() {
            if !seen.insert(variable.name().to_string()) {
                return Err(SetError::DuplicateName(variable.name().to_string()));
            }
            index_by_key.insert(variable.key(), index);
        }

        let slots = (0..variables.len()).map(|_| Slot::new()).collect();
        let core = Arc::new(SetCore {
            provider,
            self_handle: OnceCell::new(),
            inner: Mutex::new(SetInner {
                variables: variables.clone(),
                index_by_key,
                graph: DependencyGraph::default(),
                slots,
                queue: VecDeque::new(),
                draining: false,
                active: false,
            }),
        });
        let _ = core.self_handle.set(Arc::downgrade(&core));
        for variable in &variables {
            variable.bind(&core);
        }
        Ok(Self { core })
    }

    /// Compute the dependency graph and start every variable whose
    /// dependencies are all satisfied. Idempotent while active.
    pub fn activate(&self) {
        self.core.submit(SchedulerMsg::Activate);
    }

    /// Cancel all in-flight updates and reset to the pre-activation logical
    /// state. Completed values are not rolled back.
    pub fn deactivate(&self) {
        self.core.submit(SchedulerMsg::Deactivate);
    }

    /// Whether the set is currently active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.core.inner.lock().active
    }

    /// Whether any variable update is in flight.
    #[must_use]
    pub fn is_update_in_progress(&self) -> bool {
        self.core
            .inner
            .lock()
            .slots
            .iter()
            .any(|slot| slot.status == SlotStatus::Loading)
    }

    /// Host edit addressed by name; see [`Variable::change_value_to`].
    ///
    /// # Errors
    ///
    /// Returns [`SetError::UnknownVariable`] when no variable has that name.
    pub fn change_value_to(
        &self,
        name: &str,
        value: impl Into<VariableValue>,
    ) -> Result<(), SetError> {
        let variable = self
            .variable(name)
            .ok_or_else(|| SetError::UnknownVariable(name.to_string()))?;
        variable.change_value_to(value);
        Ok(())
    }

    /// Look up a variable by name.
    #[must_use]
    pub fn variable(&self, name: &str) -> Option<Arc<Variable>> {
        self.core
            .inner
            .lock()
            .variables
            .iter()
            .find(|variable| variable.name() == name)
            .cloned()
    }

    /// All variables, in host-supplied order.
    #[must_use]
    pub fn variables(&self) -> Vec<Arc<Variable>> {
        self.core.inner.lock().variables.clone()
    }
}

impl SetCore {
    fn weak(&self) -> Weak<SetCore> {
        self.self_handle.get().cloned().unwrap_or_else(Weak::new)
    }

    /// Enqueue a message; the first caller in becomes the pump and drains
    /// everything, including messages enqueued while it runs.
    fn submit(&self, msg: SchedulerMsg) {
        {
            let mut inner = self.inner.lock();
            inner.queue.push_back(msg);
            if inner.draining {
                return;
            }
            inner.draining = true;
        }
        self.pump();
    }

    pub(crate) fn submit_fetch_done(
        &self,
        index: usize,
        epoch: u64,
        issued: String,
        outcome: Result<Vec<VariableOption>, FetchError>,
    ) {
        self.submit(SchedulerMsg::FetchDone {
            index,
            epoch,
            issued,
            outcome,
        });
    }

    pub(crate) fn submit_value_edited(&self, key: VariableKey) {
        let index = { self.inner.lock().index_by_key.get(&key).copied() };
        if let Some(index) = index {
            self.submit(SchedulerMsg::ValueEdited { index });
        }
    }

    fn pump(&self) {
        loop {
            let msg = {
                let mut inner = self.inner.lock();
                match inner.queue.pop_front() {
                    Some(msg) => msg,
                    None => {
                        inner.draining = false;
                        return;
                    }
                }
            };
            match msg {
                SchedulerMsg::Activate => self.on_activate(),
                SchedulerMsg::Deactivate => self.on_deactivate(),
                SchedulerMsg::FetchDone {
                    index,
                    epoch,
                    issued,
                    outcome,
                } => self.on_fetch_done(index, epoch, issued, outcome),
                SchedulerMsg::ValueEdited { index } => self.on_value_edited(index),
            }
        }
    }

    fn on_activate(&self) {
        let jobs = {
            let mut inner = self.inner.lock();
            if inner.active {
                debug!("activate on an already active set");
                return;
            }
            inner.active = true;

            let names: Vec<String> = inner
                .variables
                .iter()
                .map(|variable| variable.name().to_string())
                .collect();
            let dependencies: Vec<BTreeSet<String>> = inner
                .variables
                .iter()
                .map(|variable| variable.dependencies())
                .collect();
            inner.graph = DependencyGraph::build(&names, &dependencies);
            if inner.graph.is_cyclic() {
                warn!("variable set contains a dependency cycle; variables inside it never start");
            }

            for slot in &mut inner.slots {
                slot.status = SlotStatus::Idle;
                slot.update_queued = false;
            }

            let mut jobs = Vec::new();
            for index in 0..inner.variables.len() {
                if Self::dependencies_satisfied(&inner, index) {
                    jobs.push(Self::make_start_job(&mut inner, index));
                }
            }
            debug!(
                variables = inner.variables.len(),
                starting = jobs.len(),
                "variable set activated"
            );
            jobs
        };
        self.launch(jobs);
    }

    fn on_deactivate(&self) {
        let (handles, cancelled) = {
            let mut inner = self.inner.lock();
            if !inner.active {
                return;
            }
            inner.active = false;

            let mut handles = Vec::new();
            let mut cancelled_indices = Vec::new();
            for (index, slot) in inner.slots.iter_mut().enumerate() {
                if slot.status == SlotStatus::Loading {
                    slot.epoch += 1;
                    if let Some(handle) = slot.pending.take() {
                        handles.push(handle);
                    }
                    cancelled_indices.push(index);
                }
                slot.status = SlotStatus::Idle;
                slot.update_queued = false;
            }
            let cancelled: Vec<Arc<Variable>> = cancelled_indices
                .iter()
                .map(|&index| Arc::clone(&inner.variables[index]))
                .collect();
            debug!(cancelled = cancelled.len(), "variable set deactivated");
            (handles, cancelled)
        };
        for handle in handles {
            handle.cancel();
        }
        for variable in cancelled {
            variable.cancel_update();
        }
    }

    fn on_fetch_done(
        &self,
        index: usize,
        epoch: u64,
        issued: String,
        outcome: Result<Vec<VariableOption>, FetchError>,
    ) {
        let variable = {
            let mut inner = self.inner.lock();
            if !inner.active {
                trace!(index, "completion after deactivation discarded");
                return;
            }
            let slot = &mut inner.slots[index];
            if slot.epoch != epoch || slot.status != SlotStatus::Loading {
                trace!(index, epoch, "stale completion discarded");
                return;
            }
            slot.pending = None;
            Arc::clone(&inner.variables[index])
        };

        // Apply outside the set lock; the variable takes its own lock and
        // emits its events.
        let value_changed = variable.apply_completion(issued, outcome);
        trace!(
            variable = %variable.name(),
            value_changed,
            "variable update completed"
        );

        let jobs = {
            let mut inner = self.inner.lock();
            if !inner.active || inner.slots[index].epoch != epoch {
                return;
            }
            inner.slots[index].status = SlotStatus::Completed;

            let mut jobs = Vec::new();
            Self::notify_dependents(&mut inner, index, value_changed, &mut jobs);
            Self::drain_update_queue(&mut inner, &mut jobs);
            jobs
        };
        self.launch(jobs);
    }

    fn on_value_edited(&self, index: usize) {
        let (was_loading, stale, variable, jobs) = {
            let mut inner = self.inner.lock();
            if !inner.active {
                return;
            }
            let (was_loading, stale) = {
                let slot = &mut inner.slots[index];
                // A pending rerun would overwrite the edit; the edit wins.
                slot.update_queued = false;
                let was_loading = slot.status == SlotStatus::Loading;
                let stale = if was_loading {
                    slot.epoch += 1;
                    slot.pending.take()
                } else {
                    None
                };
                slot.status = SlotStatus::Completed;
                (was_loading, stale)
            };
            let variable = Arc::clone(&inner.variables[index]);
            let mut jobs = Vec::new();
            Self::notify_dependents(&mut inner, index, true, &mut jobs);
            Self::drain_update_queue(&mut inner, &mut jobs);
            (was_loading, stale, variable, jobs)
        };
        if was_loading {
            if let Some(handle) = stale {
                handle.cancel();
            }
            variable.cancel_update();
        }
        self.launch(jobs);
    }

    /// Apply the completion rules to the direct dependents of `index`: idle
    /// dependents start once all their dependencies are satisfied, everyone
    /// else is queued for a rerun when the value changed.
    fn notify_dependents(
        inner: &mut SetInner,
        index: usize,
        value_changed: bool,
        jobs: &mut Vec<StartJob>,
    ) {
        for dependent in inner.graph.dependents_of(index) {
            match inner.slots[dependent].status {
                SlotStatus::Idle => {
                    if Self::dependencies_satisfied(inner, dependent) {
                        jobs.push(Self::make_start_job(inner, dependent));
                    }
                }
                SlotStatus::Completed | SlotStatus::Loading => {
                    if value_changed {
                        trace!(dependent, "upstream change queued a rerun");
                        inner.slots[dependent].update_queued = true;
                    }
                }
            }
        }
    }

    /// Start every queued variable whose upstream subgraph is quiescent:
    /// nothing it depends on is loading or queued itself. Anything still
    /// blocked is re-examined on the next completion.
    fn drain_update_queue(inner: &mut SetInner, jobs: &mut Vec<StartJob>) {
        for index in 0..inner.slots.len() {
            if !inner.slots[index].update_queued || inner.slots[index].status == SlotStatus::Loading
            {
                continue;
            }
            let blocked = inner.graph.dependencies_of(index).into_iter().any(|dep| {
                inner.slots[dep].status == SlotStatus::Loading || inner.slots[dep].update_queued
            });
            if !blocked && Self::dependencies_satisfied(inner, index) {
                jobs.push(Self::make_start_job(inner, index));
            }
        }
    }

    /// A dependency is satisfied when it completed in this activation or
    /// carries a resolved value (cache restore, host edit, or a completed
    /// run from a prior activation).
    fn dependencies_satisfied(inner: &SetInner, index: usize) -> bool {
        inner.graph.dependencies_of(index).into_iter().all(|dep| {
            inner.slots[dep].status == SlotStatus::Completed
                || inner.variables[dep].has_resolved_value()
        })
    }

    /// Values dependents may interpolate against, captured at the instant an
    /// update is issued.
    fn resolved_values(inner: &SetInner) -> HashMap<String, String> {
        inner
            .variables
            .iter()
            .filter(|variable| variable.has_resolved_value())
            .map(|variable| {
                (
                    variable.name().to_string(),
                    variable.value().as_query_param(),
                )
            })
            .collect()
    }

    fn make_start_job(inner: &mut SetInner, index: usize) -> StartJob {
        let values = Self::resolved_values(inner);
        let variable = Arc::clone(&inner.variables[index]);
        let issued = interpolate(&variable.query_template(), &values);
        let slot = &mut inner.slots[index];
        slot.status = SlotStatus::Loading;
        slot.epoch += 1;
        slot.update_queued = false;
        let stale = slot.pending.take();
        trace!(
            variable = %variable.name(),
            query = %issued,
            epoch = slot.epoch,
            "starting variable update"
        );
        StartJob {
            index,
            epoch: slot.epoch,
            issued,
            kind: variable.kind(),
            variable,
            stale,
        }
    }

    /// Dispatch start jobs without holding the set lock. Synchronous
    /// completions (custom/constant kinds, or an eager provider) re-enter
    /// through the queue and are processed after the current message.
    fn launch(&self, jobs: Vec<StartJob>) {
        for job in jobs {
            if let Some(stale) = job.stale {
                stale.cancel();
            }
            let fresh = {
                let inner = self.inner.lock();
                let slot = &inner.slots[job.index];
                inner.active && slot.epoch == job.epoch && slot.status == SlotStatus::Loading
            };
            if !fresh {
                continue;
            }
            job.variable.begin_update();
            match job.kind {
                VariableKind::Query => {
                    let request = OptionsRequest {
                        variable: job.variable.name().to_string(),
                        query: job.issued.clone(),
                    };
                    let sink =
                        CompletionSink::new(self.weak(), job.index, job.epoch, job.issued.clone());
                    let handle = self.provider.begin_fetch(request, sink);
                    let mut handle = Some(handle);
                    {
                        let mut inner = self.inner.lock();
                        let slot = &mut inner.slots[job.index];
                        if slot.epoch == job.epoch && slot.status == SlotStatus::Loading {
                            slot.pending = handle.take();
                        }
                    }
                    if let Some(stale) = handle {
                        stale.cancel();
                    }
                }
                VariableKind::Custom => {
                    let options = parse_custom_options(&job.issued);
                    self.submit(SchedulerMsg::FetchDone {
                        index: job.index,
                        epoch: job.epoch,
                        issued: job.issued,
                        outcome: Ok(options),
                    });
                }
                VariableKind::Constant => {
                    let options = vec![VariableOption::plain(job.issued.clone())];
                    self.submit(SchedulerMsg::FetchDone {
                        index: job.index,
                        epoch: job.epoch,
                        issued: job.issued,
                        outcome: Ok(options),
                    });
                }
            }
        }
    }
}

/// Comma-separated option list of a custom-kind variable.
fn parse_custom_options(issued: &str) -> Vec<VariableOption> {
    issued
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(VariableOption::plain)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_options_parse_and_trim() {
        let options = parse_custom_options("dev, staging ,prod,");
        let values: Vec<&str> = options.iter().map(|o| o.value.as_str()).collect();
        assert_eq!(values, vec!["dev", "staging", "prod"]);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let a1 = Variable::query("A", "A.*").build();
        let a2 = Variable::query("A", "other.*").build();
        let provider: Arc<dyn OptionsProvider> = Arc::new(RejectingProvider);
        let err = VariableSet::new(vec![a1, a2], provider).err();
        assert_eq!(err, Some(SetError::DuplicateName("A".to_string())));
    }

    struct RejectingProvider;

    impl OptionsProvider for RejectingProvider {
        fn begin_fetch(
            &self,
            _request: OptionsRequest,
            sink: CompletionSink,
        ) -> Box<dyn UpdateHandle> {
            sink.complete(Err(FetchError::query("no fetches expected")));
            Box::new(crate::provider::NoopHandle)
        }
    }
}
