//! Synthetic metric hierarchy for deterministic option fabrication.
//!
//! Roots are `A`, `B`, `C`; each node's children append one of the same
//! letters to its name (`A` -> `AA`, `AB`, `AC`). A query is a dot-separated
//! path, optionally ending in `*`: both `A.AA` and `A.AA.*` list the
//! children of `A.AA` (`AAA`, `AAB`, `AAC`). Invalid paths list nothing,
//! which makes an uninterpolated or malformed query behave like a fetch that
//! found no data.

use varset::VariableOption;

const LETTERS: [char; 3] = ['A', 'B', 'C'];

/// Names of the children under the queried path.
#[must_use]
pub fn query_metric_tree(query: &str) -> Vec<String> {
    if query.trim().is_empty() {
        return Vec::new();
    }
    let mut segments: Vec<&str> = query.split('.').collect();
    if segments.last() == Some(&"*") {
        segments.pop();
    }

    let mut parent: Option<&str> = None;
    for segment in segments {
        let valid = match parent {
            None => segment.len() == 1 && segment.chars().all(|c| LETTERS.contains(&c)),
            Some(p) => is_child_of(p, segment),
        };
        if !valid {
            return Vec::new();
        }
        parent = Some(segment);
    }

    match parent {
        None => LETTERS.iter().map(ToString::to_string).collect(),
        Some(p) => LETTERS.iter().map(|letter| format!("{p}{letter}")).collect(),
    }
}

fn is_child_of(parent: &str, child: &str) -> bool {
    match child.strip_prefix(parent) {
        Some(rest) => rest.len() == 1 && rest.chars().all(|c| LETTERS.contains(&c)),
        None => false,
    }
}

/// Children under the queried path as plain options.
#[must_use]
pub fn metric_options(query: &str) -> Vec<VariableOption> {
    query_metric_tree(query)
        .into_iter()
        .map(VariableOption::plain)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_lists_children() {
        assert_eq!(query_metric_tree("A.*"), vec!["AA", "AB", "AC"]);
        assert_eq!(query_metric_tree("A.AA.*"), vec!["AAA", "AAB", "AAC"]);
        assert_eq!(query_metric_tree("A.AB.*"), vec!["ABA", "ABB", "ABC"]);
    }

    #[test]
    fn bare_path_lists_children_too() {
        assert_eq!(query_metric_tree("A.AA"), vec!["AAA", "AAB", "AAC"]);
    }

    #[test]
    fn star_alone_lists_roots() {
        assert_eq!(query_metric_tree("*"), vec!["A", "B", "C"]);
    }

    #[test]
    fn invalid_paths_list_nothing() {
        assert!(query_metric_tree("A.$A.*").is_empty());
        assert!(query_metric_tree("A.BB.*").is_empty());
        assert!(query_metric_tree("Z.*").is_empty());
        assert!(query_metric_tree("").is_empty());
    }
}
