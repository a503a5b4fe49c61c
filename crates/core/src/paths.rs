//! Logical work-item addressing.
//!
//! A queue is addressed by a slash-delimited path. Odd segment counts
//! address a collection, even counts address a document. The state
//! document always lives directly under the caller's collection under the
//! reserved name [`STATE_DOCUMENT_NAME`]; the force-run document is either
//! supplied by the caller or derived below the state document.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Reserved document name of the per-queue state (lock) document.
pub const STATE_DOCUMENT_NAME: &str = "$queue";

/// Sub-collection of the state document holding the force-run signal.
pub const FORCE_RUN_COLLECTION: &str = "force";

/// Reserved document name of the force-run signal.
pub const FORCE_RUN_DOCUMENT_NAME: &str = "$run";

/// Prefix marking a document name as reserved for queue bookkeeping.
pub const RESERVED_PREFIX: char = '$';

/// `segment (/segment)*` where the first segment is word characters and the
/// following ones may also carry `$` and `-`.
const PATH_PATTERN: &str = r"^\w+(?:/[\w$\-]+)*$";

static PATH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(PATH_PATTERN).expect("valid regex"));

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// The two document addresses a queue is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPaths {
    pub state_path: String,
    pub force_run_path: String,
}

/// Resolve a raw logical path (and an optional force-run path) into the
/// state and force-run document paths.
///
/// ```
/// use runlatch_core::paths::resolve;
///
/// let paths = resolve("/test/test", None).unwrap();
/// assert_eq!(paths.state_path, "test/$queue");
/// assert_eq!(paths.force_run_path, "test/$queue/force/$run");
/// ```
pub fn resolve(path: &str, force_run_path: Option<&str>) -> Result<ResolvedPaths, CoreError> {
    let state_path = state_path_for(path)?;

    let force_run_path = match force_run_path {
        Some(raw) => {
            let segments = normalize(raw, "forceRunPath")?;
            if segments.len() % 2 != 0 {
                return Err(CoreError::InvalidPath(format!(
                    "The forceRunPath parameter is not a document path: '{raw}'"
                )));
            }
            let force_run_path = segments.join("/");
            check_force_run_placement(&state_path, &force_run_path, raw)?;
            force_run_path
        }
        None => format!("{state_path}/{FORCE_RUN_COLLECTION}/{FORCE_RUN_DOCUMENT_NAME}"),
    };

    Ok(ResolvedPaths {
        state_path,
        force_run_path,
    })
}

/// A caller-supplied force-run document may be neither the state document
/// nor a non-reserved sibling of it (a work item of the queue).
fn check_force_run_placement(
    state_path: &str,
    force_run_path: &str,
    raw: &str,
) -> Result<(), CoreError> {
    if force_run_path == state_path {
        return Err(CoreError::InvalidPath(format!(
            "The forceRunPath parameter addresses the queue state document: '{raw}'"
        )));
    }
    if parent(force_run_path) == parent(state_path) && !is_reserved(force_run_path) {
        return Err(CoreError::InvalidPath(format!(
            "The forceRunPath parameter addresses an item of the queue's collection: '{raw}'"
        )));
    }
    Ok(())
}

/// Derive the state document path for a collection or document path.
///
/// Even segment counts drop the trailing document id first, so the state
/// document always sits in the caller's collection.
pub fn state_path_for(path: &str) -> Result<String, CoreError> {
    let mut segments = normalize(path, "path")?;
    if segments.len() % 2 == 0 {
        segments.pop();
    }
    segments.push(STATE_DOCUMENT_NAME);
    Ok(segments.join("/"))
}

/// Strip one leading slash, validate the grammar, split into segments.
fn normalize<'a>(raw: &'a str, name: &str) -> Result<Vec<&'a str>, CoreError> {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix('/').unwrap_or(trimmed);

    if trimmed.is_empty() {
        return Err(CoreError::InvalidPath(format!(
            "The {name} parameter is empty"
        )));
    }
    if !PATH_RE.is_match(trimmed) {
        return Err(CoreError::InvalidPath(format!(
            "The {name} parameter is invalid: '{raw}'"
        )));
    }

    Ok(trimmed.split('/').collect())
}

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

/// Whether `path` addresses a document (even number of segments).
pub fn is_document_path(path: &str) -> bool {
    !path.is_empty() && path.split('/').count() % 2 == 0
}

/// The collection a document lives in, or `None` for a top-level name.
pub fn parent(path: &str) -> Option<&str> {
    path.rsplit_once('/').map(|(parent, _)| parent)
}

/// Last segment of a path.
pub fn last_segment(path: &str) -> &str {
    path.rsplit_once('/').map_or(path, |(_, last)| last)
}

/// Whether the last segment is a reserved (`$`-prefixed) name.
pub fn is_reserved(path: &str) -> bool {
    last_segment(path).starts_with(RESERVED_PREFIX)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn document_path_drops_last_segment() {
        let paths = resolve("/test/test", None).unwrap();
        assert_eq!(paths.state_path, "test/$queue");
    }

    #[test]
    fn collection_path_appends_directly() {
        let paths = resolve("/test", None).unwrap();
        assert_eq!(paths.state_path, "test/$queue");

        let paths = resolve("users/u1/inbox", None).unwrap();
        assert_eq!(paths.state_path, "users/u1/inbox/$queue");
    }

    #[test]
    fn leading_slash_is_optional() {
        assert_eq!(
            resolve("orders/o1", None).unwrap(),
            resolve("/orders/o1", None).unwrap()
        );
    }

    #[test]
    fn resolving_a_state_path_is_idempotent() {
        let once = state_path_for("jobs").unwrap();
        assert_eq!(state_path_for(&once).unwrap(), once);
    }

    #[test]
    fn derived_force_run_path_is_a_document() {
        let paths = resolve("jobs", None).unwrap();
        assert_eq!(paths.force_run_path, "jobs/$queue/force/$run");
        assert!(is_document_path(&paths.force_run_path));
    }

    #[test]
    fn explicit_force_run_path_is_kept() {
        let paths = resolve("jobs", Some("/signals/jobs")).unwrap();
        assert_eq!(paths.force_run_path, "signals/jobs");
    }

    #[test]
    fn explicit_force_run_path_must_be_a_document() {
        assert_matches!(
            resolve("jobs", Some("signals")),
            Err(CoreError::InvalidPath(msg)) if msg.contains("not a document path")
        );
    }

    #[test]
    fn force_run_path_inside_the_collection_is_rejected() {
        assert_matches!(
            resolve("items", Some("items/force")),
            Err(CoreError::InvalidPath(msg)) if msg.contains("item of the queue's collection")
        );
        assert_matches!(
            resolve("/items/a", Some("/items/$queue")),
            Err(CoreError::InvalidPath(msg)) if msg.contains("state document")
        );

        let paths = resolve("items", Some("items/$signal")).unwrap();
        assert_eq!(paths.force_run_path, "items/$signal");
        let paths = resolve("items", Some("items/a/force/run")).unwrap();
        assert_eq!(paths.force_run_path, "items/a/force/run");
    }

    #[test]
    fn empty_path_is_rejected() {
        assert_matches!(resolve("", None), Err(CoreError::InvalidPath(_)));
        assert_matches!(resolve("/", None), Err(CoreError::InvalidPath(_)));
        assert_matches!(resolve("jobs", Some("")), Err(CoreError::InvalidPath(_)));
    }

    #[test]
    fn trailing_slash_is_rejected() {
        assert_matches!(resolve("/test/test/", None), Err(CoreError::InvalidPath(_)));
    }

    #[test]
    fn malformed_paths_are_rejected() {
        for raw in ["a//b", "a b", "$queue", "a/b?c", "a/b.c", "//a"] {
            assert!(resolve(raw, None).is_err(), "{raw} should be rejected");
        }
    }

    #[test]
    fn symbol_characters_allowed_after_first_segment() {
        let paths = resolve("tasks/nightly-build", None).unwrap();
        assert_eq!(paths.state_path, "tasks/$queue");
    }

    #[test]
    fn helpers() {
        assert!(is_document_path("a/b"));
        assert!(!is_document_path("a/b/c"));
        assert!(!is_document_path(""));
        assert_eq!(parent("a/b/c"), Some("a/b"));
        assert_eq!(parent("a"), None);
        assert_eq!(last_segment("a/b/c"), "c");
        assert!(is_reserved("a/$queue"));
        assert!(!is_reserved("a/item"));
    }
}
