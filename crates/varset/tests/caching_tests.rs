use pretty_assertions::assert_eq;
use std::sync::Arc;
use varset::{
    CachedVariableState, LoadingState, Variable, VariableOption, VariableSet, VariableStateCache,
    VariableValue,
};
use varset_testkit::ManualProvider;

fn single(value: &str) -> VariableValue {
    VariableValue::Single(value.to_string())
}

fn snapshot(value: &str, options: &[&str]) -> CachedVariableState {
    CachedVariableState {
        name: "A".to_string(),
        query: "A.*".to_string(),
        value: single(value),
        text: single(value),
        options: options.iter().copied().map(VariableOption::plain).collect(),
    }
}

#[test]
fn restores_state_from_cache_at_construction() {
    let cache = VariableStateCache::new();
    cache.set("A-cache", snapshot("AA", &["AA", "BB"]));

    let a = Variable::query("A", "A.*")
        .cache_key("A-cache")
        .cache(&cache)
        .build();

    // Restored synchronously, before any activation.
    let state = a.state();
    assert_eq!(state.value, single("AA"));
    assert_eq!(state.text, single("AA"));
    assert_eq!(
        state.options,
        vec![VariableOption::plain("AA"), VariableOption::plain("BB")]
    );
    assert_eq!(state.loading, LoadingState::NotStarted);
    assert!(a.has_resolved_value());
}

#[test]
fn restore_mints_a_fresh_identity_key() {
    let cache = VariableStateCache::new();
    cache.set("A-cache", snapshot("AA", &["AA"]));

    let first = Variable::query("A", "A.*")
        .cache_key("A-cache")
        .cache(&cache)
        .build();
    let second = Variable::query("A", "A.*")
        .cache_key("A-cache")
        .cache(&cache)
        .build();

    assert_ne!(first.key(), second.key());
}

#[test]
fn cached_variable_satisfies_dependents_immediately() {
    let cache = VariableStateCache::new();
    cache.set("A-cache", snapshot("AA", &["AA", "AB", "AC"]));

    let a = Variable::query("A", "A.*")
        .cache_key("A-cache")
        .cache(&cache)
        .build();
    let b = Variable::query("B", "A.$A").build();
    let provider = ManualProvider::new();
    let set = VariableSet::new(vec![a.clone(), b.clone()], Arc::new(provider.clone()))
        .expect("unique names");

    set.activate();

    // B interpolates against the cached value straight away, while A
    // revalidates against live data in parallel.
    assert_eq!(b.loading(), LoadingState::Loading);
    assert_eq!(provider.pending_query("B").as_deref(), Some("A.AA"));
    assert_eq!(a.loading(), LoadingState::Loading);

    // The live options still contain the cached value: no rerun of B.
    provider.complete("A");
    assert_eq!(a.value(), single("AA"));
    provider.complete("B");
    assert_eq!(b.loading(), LoadingState::Done);
    assert_eq!(provider.fetch_count("B"), 1);
}

#[test]
fn invalid_cached_value_corrects_and_propagates_once() {
    let cache = VariableStateCache::new();
    cache.set("A-cache", snapshot("CC", &["CC"]));

    let a = Variable::query("A", "A.*")
        .cache_key("A-cache")
        .cache(&cache)
        .build();
    let b = Variable::query("B", "A.$A").build();
    let provider = ManualProvider::new();
    let set = VariableSet::new(vec![a.clone(), b.clone()], Arc::new(provider.clone()))
        .expect("unique names");

    set.activate();
    assert_eq!(a.value(), single("CC"));
    assert_eq!(provider.pending_query("B").as_deref(), Some("A.CC"));

    // Revalidation finds 'CC' missing from the live options and corrects to
    // the live default.
    provider.complete("A");
    assert_eq!(a.value(), single("AA"));
    assert_eq!(a.loading(), LoadingState::Done);

    // B was mid-flight with the stale value; the correction coalesces into
    // exactly one rerun once that update completes.
    assert_eq!(provider.fetch_count("B"), 1);
    provider.complete("B");
    assert_eq!(provider.fetch_count("B"), 2);
    assert_eq!(provider.pending_query("B").as_deref(), Some("A.AA"));

    provider.complete("B");
    assert_eq!(b.value(), single("AAA"));
    assert_eq!(provider.fetch_count("B"), 2);
}

#[test]
fn completion_writes_the_snapshot_back() {
    let cache = VariableStateCache::new();
    let a = Variable::query("A", "A.*")
        .cache_key("A-cache")
        .cache(&cache)
        .build();
    let provider = ManualProvider::new();
    let set =
        VariableSet::new(vec![a.clone()], Arc::new(provider.clone())).expect("unique names");

    assert!(cache.get("A-cache").is_none());
    set.activate();
    provider.complete("A");

    let stored = cache.get("A-cache").expect("snapshot written on completion");
    assert_eq!(stored.name, "A");
    assert_eq!(stored.query, "A.*");
    assert_eq!(stored.value, single("AA"));
    assert_eq!(stored.options.len(), 3);
}

#[test]
fn unrelated_cache_keys_do_not_restore() {
    let cache = VariableStateCache::new();
    cache.set("other-key", snapshot("AA", &["AA"]));

    let a = Variable::query("A", "A.*")
        .cache_key("A-cache")
        .cache(&cache)
        .build();

    assert_eq!(a.value(), VariableValue::empty());
    assert!(!a.has_resolved_value());
}
