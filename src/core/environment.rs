//! Layered environment resolution.
//!
//! Layers are applied lowest first: process defaults, runner-injected
//! variables, pipeline, stage, command. Each layer may reference variables
//! from the layers beneath it with `$NAME` or `${NAME}`; unknown references
//! are left untouched.

use std::collections::BTreeMap;

use crate::pipeline::EnvMap;

/// Snapshot of the current process environment, taken once per run.
pub fn process_snapshot() -> EnvMap {
    std::env::vars().collect()
}

/// Merge `layers` on top of `base`, later layers shadowing earlier ones.
pub fn merge(base: &EnvMap, layers: &[&EnvMap]) -> EnvMap {
    let mut merged: EnvMap = base.clone();

    for layer in layers {
        let expanded: Vec<(String, String)> = layer
            .iter()
            .map(|(key, value)| (key.clone(), expand(value, &merged)))
            .collect();
        merged.extend(expanded);
    }

    merged
}

/// Expand `$NAME` / `${NAME}` references against `env`.
pub fn expand(value: &str, env: &BTreeMap<String, String>) -> String {
    shellexpand::env_with_context_no_errors(value, |name: &str| env.get(name).cloned())
        .into_owned()
}
