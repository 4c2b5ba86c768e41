//! Fetch collaborator boundary.
//!
//! The scheduler hands each interpolated query to an [`OptionsProvider`],
//! which must eventually call the [`CompletionSink`] with options or an
//! error, and must support cancellation with no callback afterward. For
//! async collaborators, [`ExecutorProvider`] adapts an [`async_trait`]
//! [`QueryExecutor`] onto the callback shape by spawning each fetch on a
//! tokio runtime, with abort-based cancellation.

use crate::error::FetchError;
use crate::set::SetCore;
use crate::types::VariableOption;
use std::fmt;
use std::sync::{Arc, Weak};

/// A fetch request for one variable's options.
#[derive(Debug, Clone)]
pub struct OptionsRequest {
    /// Name of the variable being updated.
    pub variable: String,
    /// Fully interpolated query to execute.
    pub query: String,
}

/// One-shot callback delivering the outcome of a fetch.
///
/// Completions arriving after cancellation or deactivation are discarded by
/// the scheduler's epoch check, so delivering late is harmless.
pub struct CompletionSink {
    core: Weak<SetCore>,
    index: usize,
    epoch: u64,
    issued: String,
}

impl CompletionSink {
    pub(crate) fn new(core: Weak<SetCore>, index: usize, epoch: u64, issued: String) -> Self {
        Self {
            core,
            index,
            epoch,
            issued,
        }
    }

    /// Deliver the fetch outcome to the scheduler.
    pub fn complete(self, outcome: Result<Vec<VariableOption>, FetchError>) {
        if let Some(core) = self.core.upgrade() {
            core.submit_fetch_done(self.index, self.epoch, self.issued, outcome);
        }
    }
}

impl fmt::Debug for CompletionSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionSink")
            .field("index", &self.index)
            .field("epoch", &self.epoch)
            .field("issued", &self.issued)
            .finish_non_exhaustive()
    }
}

/// Low-level fetch collaborator.
pub trait OptionsProvider: Send + Sync + 'static {
    /// Begin an asynchronous fetch and return a cancellation handle.
    ///
    /// The provider must eventually call `sink.complete` unless the returned
    /// handle is cancelled first.
    fn begin_fetch(&self, request: OptionsRequest, sink: CompletionSink) -> Box<dyn UpdateHandle>;
}

/// Cancellation handle for one in-flight fetch.
pub trait UpdateHandle: Send {
    /// Tear down the pending fetch. No completion may be delivered afterward.
    fn cancel(self: Box<Self>);
}

/// Handle for fetches with nothing to tear down.
#[derive(Debug, Default)]
pub struct NoopHandle;

impl UpdateHandle for NoopHandle {
    fn cancel(self: Box<Self>) {}
}

/// Async flavor of the fetch collaborator.
#[async_trait::async_trait]
pub trait QueryExecutor: Send + Sync + 'static {
    /// Execute the interpolated query and return the resulting options.
    async fn query_options(
        &self,
        request: &OptionsRequest,
    ) -> Result<Vec<VariableOption>, FetchError>;
}

/// Bridges a [`QueryExecutor`] onto [`OptionsProvider`] by spawning each
/// fetch on a tokio runtime; cancellation aborts the task.
pub struct ExecutorProvider<E> {
    executor: Arc<E>,
    runtime: tokio::runtime::Handle,
}

impl<E: QueryExecutor> ExecutorProvider<E> {
    /// Bridge onto the current runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime context; use
    /// [`ExecutorProvider::with_handle`] to pass one explicitly.
    #[must_use]
    pub fn new(executor: Arc<E>) -> Self {
        Self::with_handle(executor, tokio::runtime::Handle::current())
    }

    /// Bridge onto an explicit runtime handle.
    #[must_use]
    pub fn with_handle(executor: Arc<E>, runtime: tokio::runtime::Handle) -> Self {
        Self { executor, runtime }
    }
}

impl<E: QueryExecutor> OptionsProvider for ExecutorProvider<E> {
    fn begin_fetch(&self, request: OptionsRequest, sink: CompletionSink) -> Box<dyn UpdateHandle> {
        let executor = Arc::clone(&self.executor);
        let task = self.runtime.spawn(async move {
            let outcome = executor.query_options(&request).await;
            sink.complete(outcome);
        });
        Box::new(AbortHandle { task })
    }
}

struct AbortHandle {
    task: tokio::task::JoinHandle<()>,
}

impl UpdateHandle for AbortHandle {
    fn cancel(self: Box<Self>) {
        self.task.abort();
    }
}
