//! Core value, option and event types shared across the engine.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Synthetic identity of one variable instance.
///
/// Regenerated on every construction; never written to or restored from the
/// state cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VariableKey(pub Uuid);

impl VariableKey {
    /// Mint a fresh key.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for VariableKey {
    fn default() -> Self {
        Self::new()
    }
}

/// Loading state of a variable, scoped to one activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadingState {
    /// Never started in this activation, or cancelled before completing.
    NotStarted,
    /// An update is in flight.
    Loading,
    /// The last issued update completed.
    Done,
}

impl LoadingState {
    /// Whether an update is currently in flight.
    #[must_use]
    pub fn is_loading(self) -> bool {
        matches!(self, LoadingState::Loading)
    }
}

/// A resolved variable value: a single scalar or a list of selections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VariableValue {
    /// One selected value.
    Single(String),
    /// Multiple selected values.
    Multi(Vec<String>),
}

impl VariableValue {
    /// The empty scalar value new variables start with.
    #[must_use]
    pub fn empty() -> Self {
        VariableValue::Single(String::new())
    }

    /// Whether nothing is selected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            VariableValue::Single(value) => value.is_empty(),
            VariableValue::Multi(values) => values.is_empty(),
        }
    }

    /// Form used when this value is substituted into a dependent's template.
    ///
    /// Lists interpolate as comma-joined text.
    #[must_use]
    pub fn as_query_param(&self) -> String {
        match self {
            VariableValue::Single(value) => value.clone(),
            VariableValue::Multi(values) => values.join(","),
        }
    }
}

impl From<&str> for VariableValue {
    fn from(value: &str) -> Self {
        VariableValue::Single(value.to_string())
    }
}

impl From<String> for VariableValue {
    fn from(value: String) -> Self {
        VariableValue::Single(value)
    }
}

impl From<Vec<String>> for VariableValue {
    fn from(values: Vec<String>) -> Self {
        VariableValue::Multi(values)
    }
}

/// One selectable option of a variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableOption {
    /// Display form.
    pub label: String,
    /// Value substituted into dependent templates.
    pub value: String,
}

impl VariableOption {
    /// Option with distinct label and value.
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }

    /// Option whose label equals its value.
    pub fn plain(value: impl Into<String>) -> Self {
        let value = value.into();
        Self {
            label: value.clone(),
            value,
        }
    }
}

/// Snapshot of a variable's business state as stored in the cache.
///
/// Only business fields are cached; the synthetic [`VariableKey`] is never
/// part of a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedVariableState {
    /// Variable name at snapshot time.
    pub name: String,
    /// Query template at snapshot time.
    pub query: String,
    /// Resolved value.
    pub value: VariableValue,
    /// Display form of the value.
    pub text: VariableValue,
    /// Options the value was resolved against.
    pub options: Vec<VariableOption>,
}

/// Notification emitted on a variable's channel, once per observable state
/// transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariableEvent {
    /// The loading state flipped.
    LoadingChanged(LoadingState),
    /// The value (or its display form) changed.
    ValueChanged {
        /// New value.
        value: VariableValue,
        /// New display form.
        text: VariableValue,
    },
    /// The option list was replaced.
    OptionsChanged {
        /// Number of options now available.
        count: usize,
    },
}
