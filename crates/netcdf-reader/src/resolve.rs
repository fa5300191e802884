//! Payload variable resolution policy.

use tracing::warn;

/// Outcome of resolving the payload variable of a file.
///
/// An explicit tagged result rather than a best-effort lookup: callers
/// must handle the ambiguous/missing case and surface the candidate
/// list to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariableResolution {
    /// The on-disk variable name to read.
    Resolved(String),
    /// No acceptable variable; `candidates` lists what the file has.
    Missing {
        preferred: String,
        candidates: Vec<String>,
    },
}

/// Select the payload variable from a file's data-variable names.
///
/// 1. The preferred name, if present.
/// 2. `var` — the name the index pipeline writes when it forgets to
///    rename its output.
/// 3. A sole remaining data variable.
/// 4. Otherwise fail with the candidate list; more than one
///    non-preferred variable is never guessed at.
pub fn resolve_variable(preferred: &str, candidates: &[String]) -> VariableResolution {
    if candidates.iter().any(|c| c == preferred) {
        return VariableResolution::Resolved(preferred.to_string());
    }

    if candidates.iter().any(|c| c == "var") {
        return VariableResolution::Resolved("var".to_string());
    }

    if candidates.len() == 1 {
        warn!(
            preferred = preferred,
            found = %candidates[0],
            "preferred variable not found, using the only data variable"
        );
        return VariableResolution::Resolved(candidates[0].clone());
    }

    VariableResolution::Missing {
        preferred: preferred.to_string(),
        candidates: candidates.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_preferred_wins() {
        let r = resolve_variable("sti", &names(&["t2m", "sti"]));
        assert_eq!(r, VariableResolution::Resolved("sti".to_string()));
    }

    #[test]
    fn test_var_alias() {
        let r = resolve_variable("sti", &names(&["var", "other"]));
        assert_eq!(r, VariableResolution::Resolved("var".to_string()));
    }

    #[test]
    fn test_sole_variable_fallback() {
        let r = resolve_variable("sti", &names(&["anomaly"]));
        assert_eq!(r, VariableResolution::Resolved("anomaly".to_string()));
    }

    #[test]
    fn test_ambiguous_fails_closed() {
        let r = resolve_variable("sti", &names(&["a", "b"]));
        match r {
            VariableResolution::Missing {
                preferred,
                candidates,
            } => {
                assert_eq!(preferred, "sti");
                assert_eq!(candidates, names(&["a", "b"]));
            }
            other => panic!("expected Missing, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_candidates_fail() {
        assert!(matches!(
            resolve_variable("sti", &[]),
            VariableResolution::Missing { .. }
        ));
    }
}
