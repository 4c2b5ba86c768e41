//! Variables: named, template-driven values with a change-notification
//! channel.
//!
//! A [`Variable`] is shared between the host and its owning
//! [`VariableSet`](crate::set::VariableSet): the host reads state, subscribes
//! to events and applies edits; the set drives updates. Every observable
//! transition emits exactly one [`VariableEvent`] on the broadcast channel.

use crate::cache::VariableStateCache;
use crate::error::FetchError;
use crate::interpolate::scan_references;
use crate::set::SetCore;
use crate::types::{
    CachedVariableState, LoadingState, VariableEvent, VariableKey, VariableOption, VariableValue,
};
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tracing::{debug, warn};

const EVENT_CAPACITY: usize = 64;

/// How a variable resolves its options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableKind {
    /// Options come from the set's fetch collaborator.
    Query,
    /// Options parsed from the interpolated template as a comma-separated
    /// list; completes without an external fetch.
    Custom,
    /// A single fixed value equal to the interpolated template.
    Constant,
}

/// Observable state of a variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableState {
    /// Name other templates reference this variable by.
    pub name: String,
    /// Query template, possibly referencing other variables.
    pub query: String,
    /// Resolved value.
    pub value: VariableValue,
    /// Display form of the value.
    pub text: VariableValue,
    /// Options the value is validated against.
    pub options: Vec<VariableOption>,
    /// Loading state within the current activation.
    pub loading: LoadingState,
    /// The fully interpolated query of the last completed update.
    pub issued_query: Option<String>,
    /// Cache slot identifier, when state restoration is wanted.
    pub cache_key: Option<String>,
}

/// A single template variable.
pub struct Variable {
    key: VariableKey,
    name: String,
    kind: VariableKind,
    state: RwLock<VariableState>,
    /// Whether dependents can interpolate against this variable's value
    /// before (or while) its own fetch runs.
    resolved: AtomicBool,
    events: broadcast::Sender<VariableEvent>,
    cache: Option<VariableStateCache>,
    set: OnceCell<Weak<SetCore>>,
}

impl Variable {
    /// Builder for a query-kind variable.
    pub fn query(name: impl Into<String>, query: impl Into<String>) -> VariableBuilder {
        VariableBuilder::new(name, query, VariableKind::Query)
    }

    /// Builder for a custom-kind variable; `values` is a comma-separated
    /// template.
    pub fn custom(name: impl Into<String>, values: impl Into<String>) -> VariableBuilder {
        VariableBuilder::new(name, values, VariableKind::Custom)
    }

    /// Builder for a constant-kind variable.
    pub fn constant(name: impl Into<String>, value: impl Into<String>) -> VariableBuilder {
        VariableBuilder::new(name, value, VariableKind::Constant)
    }

    /// Synthetic identity of this instance.
    #[must_use]
    pub fn key(&self) -> VariableKey {
        self.key
    }

    /// Name other templates reference this variable by.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolution kind.
    #[must_use]
    pub fn kind(&self) -> VariableKind {
        self.kind
    }

    /// Snapshot of the current observable state.
    #[must_use]
    pub fn state(&self) -> VariableState {
        self.state.read().clone()
    }

    /// Current loading state.
    #[must_use]
    pub fn loading(&self) -> LoadingState {
        self.state.read().loading
    }

    /// Current value.
    #[must_use]
    pub fn value(&self) -> VariableValue {
        self.state.read().value.clone()
    }

    /// Current query template.
    #[must_use]
    pub fn query_template(&self) -> String {
        self.state.read().query.clone()
    }

    /// Subscribe to observable state transitions.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<VariableEvent> {
        self.events.subscribe()
    }

    /// Names this variable's template references. Duplicates collapse.
    #[must_use]
    pub fn dependencies(&self) -> BTreeSet<String> {
        scan_references(&self.state.read().query)
    }

    /// Whether this variable carries a value dependents can use, from a
    /// completed update, a cache restore, or a host edit.
    #[must_use]
    pub fn has_resolved_value(&self) -> bool {
        self.resolved.load(Ordering::Acquire)
    }

    /// Host-driven edit.
    ///
    /// Applies immediately and notifies the owning set as if an update
    /// completed; this variable's own query is not re-run. An in-flight
    /// update is cancelled, the edit supersedes it. Setting the current
    /// value again is a no-op.
    pub fn change_value_to(&self, value: impl Into<VariableValue>) {
        let value = value.into();
        {
            let mut state = self.state.write();
            if state.value == value {
                return;
            }
            state.value = value.clone();
            state.text = value.clone();
        }
        self.resolved.store(true, Ordering::Release);
        let _ = self.events.send(VariableEvent::ValueChanged {
            value: value.clone(),
            text: value,
        });
        if let Some(core) = self.bound_set() {
            core.submit_value_edited(self.key);
        }
    }

    pub(crate) fn bind(&self, core: &Arc<SetCore>) {
        let _ = self.set.set(Arc::downgrade(core));
    }

    fn bound_set(&self) -> Option<Arc<SetCore>> {
        self.set.get().and_then(Weak::upgrade)
    }

    /// Flip to loading. One observable transition.
    pub(crate) fn begin_update(&self) {
        {
            self.state.write().loading = LoadingState::Loading;
        }
        let _ = self
            .events
            .send(VariableEvent::LoadingChanged(LoadingState::Loading));
    }

    /// Apply a finished update and return whether the value changed.
    ///
    /// A fetch error is normalized into a fallback completion: previous
    /// value and options are kept so dependents proceed instead of stalling.
    pub(crate) fn apply_completion(
        &self,
        issued: String,
        outcome: Result<Vec<VariableOption>, FetchError>,
    ) -> bool {
        let mut emitted = Vec::new();
        let value_changed;
        {
            let mut state = self.state.write();
            match outcome {
                Ok(options) => {
                    if options != state.options {
                        state.options = options;
                        emitted.push(VariableEvent::OptionsChanged {
                            count: state.options.len(),
                        });
                    }
                    let (value, text) = validate_selection(&state.value, &state.options);
                    value_changed = value != state.value;
                    if value_changed || text != state.text {
                        state.value = value;
                        state.text = text;
                        emitted.push(VariableEvent::ValueChanged {
                            value: state.value.clone(),
                            text: state.text.clone(),
                        });
                    }
                }
                Err(error) => {
                    warn!(
                        variable = %state.name,
                        %error,
                        "fetch failed, completing with previous value"
                    );
                    value_changed = false;
                }
            }
            state.loading = LoadingState::Done;
            state.issued_query = Some(issued);
            emitted.push(VariableEvent::LoadingChanged(LoadingState::Done));

            if let (Some(cache_key), Some(cache)) = (&state.cache_key, &self.cache) {
                cache.set(
                    cache_key.clone(),
                    CachedVariableState {
                        name: state.name.clone(),
                        query: state.query.clone(),
                        value: state.value.clone(),
                        text: state.text.clone(),
                        options: state.options.clone(),
                    },
                );
            }
        }
        self.resolved.store(true, Ordering::Release);
        for event in emitted {
            let _ = self.events.send(event);
        }
        value_changed
    }

    /// Cancelled before completing: observable loading drops back to
    /// never-started; values are untouched and no completion will follow.
    pub(crate) fn cancel_update(&self) {
        let was_loading = {
            let mut state = self.state.write();
            if state.loading.is_loading() {
                state.loading = LoadingState::NotStarted;
                true
            } else {
                false
            }
        };
        if was_loading {
            let _ = self
                .events
                .send(VariableEvent::LoadingChanged(LoadingState::NotStarted));
        }
    }
}

/// Keep the current selection when the fresh options still contain it,
/// otherwise fall back to the first option. Lists keep their valid subset.
fn validate_selection(
    current: &VariableValue,
    options: &[VariableOption],
) -> (VariableValue, VariableValue) {
    if options.is_empty() {
        return (current.clone(), current.clone());
    }
    match current {
        VariableValue::Single(value) => {
            match options.iter().find(|option| &option.value == value) {
                Some(option) => (
                    VariableValue::Single(option.value.clone()),
                    VariableValue::Single(option.label.clone()),
                ),
                None => {
                    let first = &options[0];
                    (
                        VariableValue::Single(first.value.clone()),
                        VariableValue::Single(first.label.clone()),
                    )
                }
            }
        }
        VariableValue::Multi(values) => {
            let kept: Vec<&VariableOption> = options
                .iter()
                .filter(|option| values.contains(&option.value))
                .collect();
            if kept.is_empty() {
                let first = &options[0];
                (
                    VariableValue::Multi(vec![first.value.clone()]),
                    VariableValue::Multi(vec![first.label.clone()]),
                )
            } else {
                (
                    VariableValue::Multi(kept.iter().map(|o| o.value.clone()).collect()),
                    VariableValue::Multi(kept.iter().map(|o| o.label.clone()).collect()),
                )
            }
        }
    }
}

/// Builder for [`Variable`] instances.
pub struct VariableBuilder {
    name: String,
    query: String,
    kind: VariableKind,
    value: VariableValue,
    text: Option<VariableValue>,
    options: Vec<VariableOption>,
    cache_key: Option<String>,
    cache: Option<VariableStateCache>,
}

impl VariableBuilder {
    fn new(name: impl Into<String>, query: impl Into<String>, kind: VariableKind) -> Self {
        Self {
            name: name.into(),
            query: query.into(),
            kind,
            value: VariableValue::empty(),
            text: None,
            options: Vec::new(),
            cache_key: None,
            cache: None,
        }
    }

    /// Initial value.
    #[must_use]
    pub fn value(mut self, value: impl Into<VariableValue>) -> Self {
        self.value = value.into();
        self
    }

    /// Initial display form; defaults to the value itself.
    #[must_use]
    pub fn text(mut self, text: impl Into<VariableValue>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Initial options.
    #[must_use]
    pub fn options(mut self, options: Vec<VariableOption>) -> Self {
        self.options = options;
        self
    }

    /// Cache slot identifier.
    #[must_use]
    pub fn cache_key(mut self, cache_key: impl Into<String>) -> Self {
        self.cache_key = Some(cache_key.into());
        self
    }

    /// Attach a cache handle: restores a matching snapshot at build time and
    /// enables write-back on completion.
    #[must_use]
    pub fn cache(mut self, cache: &VariableStateCache) -> Self {
        self.cache = Some(cache.clone());
        self
    }

    /// Construct the variable, restoring cached state when a matching cache
    /// entry exists. Restoration happens synchronously, before any
    /// activation, and only covers business fields; a fresh synthetic key
    /// is always minted.
    #[must_use]
    pub fn build(self) -> Arc<Variable> {
        let mut state = VariableState {
            name: self.name.clone(),
            query: self.query,
            text: self.text.unwrap_or_else(|| self.value.clone()),
            value: self.value,
            options: self.options,
            loading: LoadingState::NotStarted,
            issued_query: None,
            cache_key: self.cache_key,
        };
        let mut resolved = false;
        if let (Some(cache_key), Some(cache)) = (&state.cache_key, &self.cache) {
            if let Some(snapshot) = cache.get(cache_key) {
                debug!(variable = %state.name, cache_key = %cache_key, "restored state from cache");
                state.value = snapshot.value;
                state.text = snapshot.text;
                state.options = snapshot.options;
                resolved = true;
            }
        }
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Variable {
            key: VariableKey::new(),
            name: self.name,
            kind: self.kind,
            state: RwLock::new(state),
            resolved: AtomicBool::new(resolved),
            events,
            cache: self.cache,
            set: OnceCell::new(),
        })
    }
}
