use std::sync::Arc;
use std::time::Duration;
use varset::{
    ExecutorProvider, FetchError, LoadingState, OptionsRequest, QueryExecutor, Variable,
    VariableEvent, VariableOption, VariableSet,
};
use varset_testkit::metric_options;

struct TreeExecutor;

#[async_trait::async_trait]
impl QueryExecutor for TreeExecutor {
    async fn query_options(
        &self,
        request: &OptionsRequest,
    ) -> Result<Vec<VariableOption>, FetchError> {
        Ok(metric_options(&request.query))
    }
}

#[tokio::test]
async fn resolves_dependency_chain_through_async_executor() {
    let a = Variable::query("A", "A.*").build();
    let b = Variable::query("B", "A.$A.*").build();
    let provider = ExecutorProvider::new(Arc::new(TreeExecutor));
    let set =
        VariableSet::new(vec![b.clone(), a.clone()], Arc::new(provider)).expect("unique names");

    let mut events = b.subscribe();
    set.activate();
    loop {
        match events.recv().await {
            Ok(VariableEvent::LoadingChanged(LoadingState::Done)) => break,
            Ok(_) => {}
            Err(error) => panic!("event channel closed: {error}"),
        }
    }

    assert_eq!(a.value().as_query_param(), "AA");
    assert_eq!(b.value().as_query_param(), "AAA");
    assert_eq!(b.state().issued_query.as_deref(), Some("A.AA.*"));
    set.deactivate();
}

#[tokio::test]
async fn deactivation_aborts_in_flight_async_fetches() {
    struct StallExecutor;

    #[async_trait::async_trait]
    impl QueryExecutor for StallExecutor {
        async fn query_options(
            &self,
            _request: &OptionsRequest,
        ) -> Result<Vec<VariableOption>, FetchError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Vec::new())
        }
    }

    let a = Variable::query("A", "A.*").build();
    let provider = ExecutorProvider::new(Arc::new(StallExecutor));
    let set = VariableSet::new(vec![a.clone()], Arc::new(provider)).expect("unique names");

    set.activate();
    assert_eq!(a.loading(), LoadingState::Loading);

    set.deactivate();
    assert_eq!(a.loading(), LoadingState::NotStarted);

    // If the aborted task erroneously survived, give it a chance to run; the
    // variable must stay untouched either way.
    tokio::task::yield_now().await;
    assert_eq!(a.loading(), LoadingState::NotStarted);
}
