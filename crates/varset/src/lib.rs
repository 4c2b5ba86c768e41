//! Reactive dependency engine for named template variables.
//!
//! A [`VariableSet`] owns a collection of [`Variable`]s whose query templates
//! may reference each other (`$name` / `${name}`). On activation the set
//! derives the dependency graph, starts every variable with no pending
//! upstream dependency, and as each completes starts whatever became
//! satisfiable, restarting the downstream subgraph when an upstream value
//! changes. Hosts subscribe to per-variable broadcast channels to observe
//! state transitions, and may pass a [`VariableStateCache`] handle so
//! reconstructed variables start pre-populated.

pub mod cache;
pub mod error;
pub mod graph;
pub mod interpolate;
pub mod provider;
pub mod set;
pub mod types;
pub mod variable;

pub use cache::VariableStateCache;
pub use error::{FetchError, SetError};
pub use provider::{
    CompletionSink, ExecutorProvider, NoopHandle, OptionsProvider, OptionsRequest, QueryExecutor,
    UpdateHandle,
};
pub use set::VariableSet;
pub use types::{
    CachedVariableState, LoadingState, VariableEvent, VariableKey, VariableOption, VariableValue,
};
pub use variable::{Variable, VariableBuilder, VariableKind, VariableState};
