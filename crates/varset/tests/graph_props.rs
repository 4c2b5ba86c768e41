use proptest::prelude::*;
use std::sync::Arc;
use varset::{LoadingState, Variable, VariableOption, VariableSet};
use varset_testkit::ManualProvider;

fn var_name(index: usize) -> String {
    format!("v{index}")
}

proptest! {
    /// Across random DAGs: every variable without dependencies starts
    /// immediately on activation, everything else waits, and driving the set
    /// to quiescence runs each variable exactly once (single-flight, no
    /// double starts).
    #[test]
    fn roots_start_immediately_and_each_variable_runs_once(
        n in 1usize..8,
        edges in proptest::collection::vec(any::<bool>(), 64)
    ) {
        let mut variables = Vec::new();
        let mut dep_lists = Vec::new();
        for i in 0..n {
            let deps: Vec<usize> = (0..i).filter(|&j| edges[i * 8 + j]).collect();
            let query = if deps.is_empty() {
                format!("{}.*", var_name(i))
            } else {
                let refs: Vec<String> = deps.iter().map(|&j| format!("${}", var_name(j))).collect();
                format!("{}.{}.*", var_name(i), refs.join("."))
            };
            variables.push(Variable::query(var_name(i), query).build());
            dep_lists.push(deps);
        }

        let provider = ManualProvider::new();
        let set = VariableSet::new(variables.clone(), Arc::new(provider.clone()))
            .expect("unique names");
        set.activate();

        for (i, deps) in dep_lists.iter().enumerate() {
            if deps.is_empty() {
                prop_assert_eq!(variables[i].loading(), LoadingState::Loading);
            } else {
                prop_assert_eq!(variables[i].loading(), LoadingState::NotStarted);
            }
        }

        // Drive to quiescence, completing pending fetches in name order.
        loop {
            let fetching = provider.fetching();
            if fetching.is_empty() {
                break;
            }
            for name in fetching {
                provider.complete_with(
                    &name,
                    vec![VariableOption::plain(format!("{name}-value"))],
                );
            }
        }

        for i in 0..n {
            prop_assert_eq!(variables[i].loading(), LoadingState::Done);
            prop_assert_eq!(provider.fetch_count(&var_name(i)), 1);
        }
    }
}
