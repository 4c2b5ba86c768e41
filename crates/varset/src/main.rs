use anyhow::{bail, Context};
use clap::{value_parser, Arg, Command};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;
use varset::{
    ExecutorProvider, FetchError, LoadingState, OptionsRequest, QueryExecutor, Variable,
    VariableEvent, VariableOption, VariableSet,
};

/// Demo executor: fabricates three child options under the queried path.
struct DemoExecutor {
    latency: Duration,
}

#[async_trait::async_trait]
impl QueryExecutor for DemoExecutor {
    async fn query_options(
        &self,
        request: &OptionsRequest,
    ) -> Result<Vec<VariableOption>, FetchError> {
        tokio::time::sleep(self.latency).await;
        let base = request.query.trim_end_matches(".*");
        Ok((1..=3)
            .map(|n| VariableOption::plain(format!("{base}.{n}")))
            .collect())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Command::new("varset")
        .version("0.1.0")
        .about("Template variable dependency engine")
        .subcommand(
            Command::new("resolve")
                .about("Resolve the built-in demo variable set")
                .arg(
                    Arg::new("latency-ms")
                        .long("latency-ms")
                        .default_value("25")
                        .value_parser(value_parser!(u64))
                        .help("Simulated fetch latency per variable"),
                ),
        );

    let matches = cli.get_matches();
    let latency_ms = matches
        .subcommand_matches("resolve")
        .and_then(|sub| sub.get_one::<u64>("latency-ms"))
        .copied()
        .unwrap_or(25);
    resolve_demo(latency_ms).await
}

async fn resolve_demo(latency_ms: u64) -> anyhow::Result<()> {
    let region = Variable::query("region", "regions.*").build();
    let cluster = Variable::query("cluster", "clusters.$region.*").build();
    let host = Variable::query("host", "hosts.$cluster.*").build();

    let provider = ExecutorProvider::new(Arc::new(DemoExecutor {
        latency: Duration::from_millis(latency_ms),
    }));
    let set = VariableSet::new(
        vec![host.clone(), cluster.clone(), region.clone()],
        Arc::new(provider),
    )
    .context("building demo variable set")?;

    let mut events = host.subscribe();
    set.activate();

    loop {
        match events.recv().await {
            Ok(VariableEvent::LoadingChanged(LoadingState::Done)) => break,
            Ok(_) => {}
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
            Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                bail!("variable event channel closed before resolution finished")
            }
        }
    }

    for variable in set.variables() {
        let state = variable.state();
        info!(
            name = %state.name,
            value = %state.value.as_query_param(),
            issued = state.issued_query.as_deref().unwrap_or("-"),
            "resolved"
        );
    }

    set.deactivate();
    Ok(())
}
