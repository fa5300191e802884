//! Run/step enumeration over the bucket's `key=value/` folder layout.

use std::collections::BTreeSet;

use sti_common::StiResult;

use crate::key::RemoteLayout;
use crate::object_store::ObjectStorage;

/// List available runs (`YYYYMMDDHH`), sorted ascending.
pub async fn list_runs(storage: &ObjectStorage, layout: &RemoteLayout) -> StiResult<Vec<String>> {
    let prefixes = storage.list_common_prefixes(&layout.base_prefix).await?;

    let runs: BTreeSet<String> = prefixes
        .iter()
        .filter_map(|p| parse_component(p, "run="))
        .filter(|run| run.len() == 10 && run.bytes().all(|b| b.is_ascii_digit()))
        .map(str::to_string)
        .collect();

    Ok(runs.into_iter().collect())
}

/// List available steps (`XXX`) for a run, sorted ascending.
pub async fn list_steps(
    storage: &ObjectStorage,
    layout: &RemoteLayout,
    run: &str,
) -> StiResult<Vec<String>> {
    let prefix = format!("{}run={}/", layout.base_prefix, run);
    let prefixes = storage.list_common_prefixes(&prefix).await?;

    let steps: BTreeSet<String> = prefixes
        .iter()
        .filter_map(|p| parse_component(p, "step="))
        .filter(|step| step.len() == 3 && step.bytes().all(|b| b.is_ascii_digit()))
        .map(str::to_string)
        .collect();

    Ok(steps.into_iter().collect())
}

/// Extract `<tag><value>` from the last segment of a prefix path.
fn parse_component<'a>(prefix: &'a str, tag: &str) -> Option<&'a str> {
    let last = prefix.trim_end_matches('/').rsplit('/').next()?;
    last.strip_prefix(tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_component() {
        assert_eq!(
            parse_component("indices/sti/run=2025111500/", "run="),
            Some("2025111500")
        );
        assert_eq!(
            parse_component("indices/sti/run=2025111500/step=072", "step="),
            Some("072")
        );
        assert_eq!(parse_component("indices/sti/other", "run="), None);
    }
}
