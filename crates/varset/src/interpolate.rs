//! Template token scanning and interpolation.
//!
//! Both `$name` and `${name}` reference forms are recognized. Interpolation
//! is pure and is evaluated freshly on every variable (re)start; results are
//! never cached across value changes.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::{BTreeSet, HashMap};

static VARIABLE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{(\w+)\}|\$(\w+)").expect("variable pattern compiles"));

fn captured_name<'t>(caps: &Captures<'t>) -> &'t str {
    caps.get(1)
        .or_else(|| caps.get(2))
        .map_or("", |m| m.as_str())
}

/// Collect the names referenced by `template`.
///
/// Duplicate references collapse into a single entry.
#[must_use]
pub fn scan_references(template: &str) -> BTreeSet<String> {
    VARIABLE_PATTERN
        .captures_iter(template)
        .map(|caps| captured_name(&caps).to_string())
        .collect()
}

/// Replace every `$name` / `${name}` reference with its value from `values`.
///
/// Names missing from `values` are left verbatim.
#[must_use]
pub fn interpolate(template: &str, values: &HashMap<String, String>) -> String {
    VARIABLE_PATTERN
        .replace_all(template, |caps: &Captures<'_>| {
            let name = captured_name(caps);
            values
                .get(name)
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}
