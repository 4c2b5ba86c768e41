//! Manually driven fetch collaborator.
//!
//! Records every fetch the scheduler issues and completes them on command,
//! so tests step through the scheduler deterministically the way a real
//! asynchronous query runner would over time. Each variable has at most one
//! pending fetch, matching the engine's single-flight invariant.

use crate::metric_tree::metric_options;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use varset::{
    CompletionSink, FetchError, OptionsProvider, OptionsRequest, UpdateHandle, VariableOption,
};

/// Provider that holds fetches open until the test completes them.
#[derive(Clone, Default)]
pub struct ManualProvider {
    inner: Arc<Mutex<ManualInner>>,
}

#[derive(Default)]
struct ManualInner {
    next_serial: u64,
    honor_cancel: bool,
    pending: HashMap<String, PendingFetch>,
    fetch_counts: HashMap<String, usize>,
}

struct PendingFetch {
    serial: u64,
    query: String,
    sink: CompletionSink,
}

impl ManualProvider {
    /// Fresh provider with no pending fetches.
    #[must_use]
    pub fn new() -> Self {
        let provider = Self::default();
        provider.inner.lock().honor_cancel = true;
        provider
    }

    /// A provider that ignores cancellation, for exercising the scheduler's
    /// late-completion discard path.
    #[must_use]
    pub fn ignoring_cancel() -> Self {
        Self::default()
    }

    /// Number of fetches issued for `variable` so far.
    #[must_use]
    pub fn fetch_count(&self, variable: &str) -> usize {
        self.inner
            .lock()
            .fetch_counts
            .get(variable)
            .copied()
            .unwrap_or(0)
    }

    /// Whether a fetch for `variable` is currently awaiting completion.
    #[must_use]
    pub fn is_fetching(&self, variable: &str) -> bool {
        self.inner.lock().pending.contains_key(variable)
    }

    /// The interpolated query of the pending fetch for `variable`.
    #[must_use]
    pub fn pending_query(&self, variable: &str) -> Option<String> {
        self.inner
            .lock()
            .pending
            .get(variable)
            .map(|fetch| fetch.query.clone())
    }

    /// Complete the pending fetch with options fabricated from the metric
    /// tree. Returns false when nothing was pending.
    pub fn complete(&self, variable: &str) -> bool {
        let fetch = { self.inner.lock().pending.remove(variable) };
        match fetch {
            Some(fetch) => {
                let options = metric_options(&fetch.query);
                fetch.sink.complete(Ok(options));
                true
            }
            None => false,
        }
    }

    /// Complete the pending fetch with explicit options.
    pub fn complete_with(&self, variable: &str, options: Vec<VariableOption>) -> bool {
        let fetch = { self.inner.lock().pending.remove(variable) };
        match fetch {
            Some(fetch) => {
                fetch.sink.complete(Ok(options));
                true
            }
            None => false,
        }
    }

    /// Fail the pending fetch.
    pub fn fail(&self, variable: &str, error: FetchError) -> bool {
        let fetch = { self.inner.lock().pending.remove(variable) };
        match fetch {
            Some(fetch) => {
                fetch.sink.complete(Err(error));
                true
            }
            None => false,
        }
    }

    /// Names with a pending fetch, sorted for deterministic iteration.
    #[must_use]
    pub fn fetching(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.lock().pending.keys().cloned().collect();
        names.sort();
        names
    }
}

impl OptionsProvider for ManualProvider {
    fn begin_fetch(&self, request: OptionsRequest, sink: CompletionSink) -> Box<dyn UpdateHandle> {
        let mut inner = self.inner.lock();
        inner.next_serial += 1;
        let serial = inner.next_serial;
        *inner.fetch_counts.entry(request.variable.clone()).or_default() += 1;
        inner.pending.insert(
            request.variable.clone(),
            PendingFetch {
                serial,
                query: request.query,
                sink,
            },
        );
        Box::new(ManualHandle {
            inner: Arc::downgrade(&self.inner),
            variable: request.variable,
            serial,
        })
    }
}

struct ManualHandle {
    inner: Weak<Mutex<ManualInner>>,
    variable: String,
    serial: u64,
}

impl UpdateHandle for ManualHandle {
    fn cancel(self: Box<Self>) {
        if let Some(inner) = self.inner.upgrade() {
            let mut inner = inner.lock();
            if !inner.honor_cancel {
                return;
            }
            let current = inner
                .pending
                .get(&self.variable)
                .is_some_and(|fetch| fetch.serial == self.serial);
            if current {
                inner.pending.remove(&self.variable);
            }
        }
    }
}
