//! Conflict detection and structural merge
//!
//! Pure functions, no I/O. Records are compared through a normalization
//! that strips volatile metadata (creation/update timestamps) so clock-only
//! differences never register as conflicts. Object key order is irrelevant
//! (`serde_json` maps compare as maps); array order matters for equality
//! but not for merging, which uses set semantics.

use std::collections::HashSet;

use serde_json::{Map, Value};

use crate::models::{ConflictItem, ConflictResolution, MergeStrategy};

/// Metadata fields stripped before any comparison
pub const VOLATILE_FIELDS: &[&str] = &["created_at", "updated_at", "createdAt", "updatedAt"];

/// Result of a structural merge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    /// The combined record
    pub merged: Value,
    /// Dotted field paths where both sides changed a primitive value
    pub conflicts: Vec<String>,
}

/// Strip volatile metadata fields, recursively
#[must_use]
pub fn normalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, child) in map {
                if !VOLATILE_FIELDS.contains(&key.as_str()) {
                    out.insert(key.clone(), normalize(child));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(normalize).collect()),
        other => other.clone(),
    }
}

/// Canonical string form of a normalized value.
///
/// `serde_json` maps are `BTreeMap`-backed, so serialization already sorts
/// object keys; this string is a stable identity for set-membership tests.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    serde_json::to_string(&normalize(value)).unwrap_or_default()
}

/// Equality modulo volatile metadata and object key order
#[must_use]
pub fn stable_eq(a: &Value, b: &Value) -> bool {
    normalize(a) == normalize(b)
}

/// True iff both sides changed independently since the last known-common
/// state. Symmetric in `local`/`server`. With no recorded base, any
/// stable difference between the two sides counts as a conflict.
#[must_use]
pub fn detect_conflict(local: &Value, server: &Value, last_synced: Option<&Value>) -> bool {
    if stable_eq(local, server) {
        return false;
    }
    last_synced.map_or(true, |base| {
        !stable_eq(local, base) && !stable_eq(server, base)
    })
}

/// Field-wise structural merge of two record versions.
///
/// - A field present on one side only is kept.
/// - Stable-equal fields keep the server's value.
/// - Arrays union with set semantics: server elements first, then local
///   elements not already present (by canonical identity).
/// - Nested objects recurse per key.
/// - On a primitive (or shape) clash, the side that still matches `base`
///   is taken to be unchanged and the other side wins cleanly; when both
///   moved (or there is no base), the server value wins and the dotted
///   field path is recorded as a conflict.
#[must_use]
pub fn intelligent_merge(local: &Value, server: &Value, base: Option<&Value>) -> MergeOutcome {
    let mut conflicts = Vec::new();
    let merged = merge_values(local, server, base, "", &mut conflicts);
    MergeOutcome { merged, conflicts }
}

fn merge_values(
    local: &Value,
    server: &Value,
    base: Option<&Value>,
    path: &str,
    conflicts: &mut Vec<String>,
) -> Value {
    match (local, server) {
        (Value::Object(local_map), Value::Object(server_map)) => {
            merge_objects(local_map, server_map, base, path, conflicts)
        }
        (Value::Array(local_items), Value::Array(server_items)) => {
            merge_arrays(local_items, server_items)
        }
        _ if stable_eq(local, server) => server.clone(),
        _ => {
            if let Some(base) = base {
                if stable_eq(local, base) {
                    // Local never touched this field; the server's edit
                    // is the only change
                    return server.clone();
                }
                if stable_eq(server, base) {
                    return local.clone();
                }
            }
            conflicts.push(conflict_note(path));
            server.clone()
        }
    }
}

fn merge_objects(
    local: &Map<String, Value>,
    server: &Map<String, Value>,
    base: Option<&Value>,
    path: &str,
    conflicts: &mut Vec<String>,
) -> Value {
    let mut out = Map::new();

    for (key, local_value) in local {
        let child_path = join_path(path, key);
        match server.get(key) {
            Some(server_value) => {
                let child_base = base.and_then(|value| value.get(key));
                out.insert(
                    key.clone(),
                    merge_values(local_value, server_value, child_base, &child_path, conflicts),
                );
            }
            None => {
                out.insert(key.clone(), local_value.clone());
            }
        }
    }

    for (key, server_value) in server {
        if !local.contains_key(key) {
            out.insert(key.clone(), server_value.clone());
        }
    }

    Value::Object(out)
}

/// Union by canonical identity, server elements first
fn merge_arrays(local: &[Value], server: &[Value]) -> Value {
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for item in server.iter().chain(local) {
        if seen.insert(canonical_json(item)) {
            out.push(item.clone());
        }
    }

    Value::Array(out)
}

fn join_path(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn conflict_note(path: &str) -> String {
    let field = if path.is_empty() { "(root)" } else { path };
    format!("Field '{field}' differs")
}

/// Resolve one conflict with the given strategy
#[must_use]
pub fn resolve_conflict(item: &ConflictItem, strategy: MergeStrategy) -> ConflictResolution {
    match strategy {
        MergeStrategy::ServerWins => ConflictResolution {
            id: item.id.clone(),
            strategy,
            resolved: Some(item.server.clone()),
            requires_user_action: false,
            reason: None,
        },
        MergeStrategy::LocalWins => ConflictResolution {
            id: item.id.clone(),
            strategy,
            resolved: Some(item.local.clone()),
            requires_user_action: false,
            reason: None,
        },
        MergeStrategy::Merge => {
            let outcome = intelligent_merge(&item.local, &item.server, item.last_synced.as_ref());
            let requires_user_action = !outcome.conflicts.is_empty();
            let reason = if requires_user_action {
                Some(outcome.conflicts.join("; "))
            } else {
                None
            };
            ConflictResolution {
                id: item.id.clone(),
                strategy,
                resolved: Some(outcome.merged),
                requires_user_action,
                reason,
            }
        }
        MergeStrategy::UserChoice => ConflictResolution {
            id: item.id.clone(),
            strategy,
            resolved: None,
            requires_user_action: true,
            reason: Some(format!(
                "local version: {}, server version: {}",
                item.local, item.server
            )),
        },
    }
}

/// Resolve each conflict independently with the same strategy
#[must_use]
pub fn resolve_batch_conflicts(
    items: &[ConflictItem],
    strategy: MergeStrategy,
) -> Vec<ConflictResolution> {
    items
        .iter()
        .map(|item| resolve_conflict(item, strategy))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn conflict_item(local: Value, server: Value, base: Option<Value>) -> ConflictItem {
        ConflictItem {
            id: "r1".into(),
            table: "tasks".into(),
            local,
            server,
            last_synced: base,
            local_updated_at: 100,
            server_updated_at: 200,
        }
    }

    fn as_set(value: &Value) -> HashSet<String> {
        value
            .as_array()
            .unwrap()
            .iter()
            .map(canonical_json)
            .collect()
    }

    #[test]
    fn test_detect_conflict_requires_both_sides_changed() {
        let base = json!({"a": 1});
        assert!(detect_conflict(
            &json!({"a": 5}),
            &json!({"a": 9}),
            Some(&base)
        ));
        // Server moved, local did not: no conflict
        assert!(!detect_conflict(
            &json!({"a": 1}),
            &json!({"a": 9}),
            Some(&base)
        ));
        // Local moved, server did not: no conflict
        assert!(!detect_conflict(
            &json!({"a": 5}),
            &json!({"a": 1}),
            Some(&base)
        ));
    }

    #[test]
    fn test_detect_conflict_is_symmetric() {
        let x = json!({"a": 5, "b": [1]});
        let y = json!({"a": 9, "b": [2]});
        let z = json!({"a": 1, "b": [1]});
        assert_eq!(
            detect_conflict(&x, &y, Some(&z)),
            detect_conflict(&y, &x, Some(&z))
        );
    }

    #[test]
    fn test_no_false_conflict_on_timestamp_only_differences() {
        let local = json!({"a": 1, "updated_at": 100, "created_at": 50});
        let server = json!({"a": 1, "updated_at": 999, "created_at": 51});
        assert!(!detect_conflict(&local, &server, None));
        assert!(!detect_conflict(
            &local,
            &server,
            Some(&json!({"a": 7}))
        ));
    }

    #[test]
    fn test_no_base_means_any_difference_conflicts() {
        assert!(detect_conflict(&json!({"a": 1}), &json!({"a": 2}), None));
        assert!(!detect_conflict(&json!({"a": 1}), &json!({"a": 1}), None));
    }

    #[test]
    fn test_merge_keeps_one_sided_fields() {
        let outcome = intelligent_merge(
            &json!({"a": 1, "only_local": true}),
            &json!({"a": 1, "only_server": "x"}),
            None,
        );
        assert_eq!(
            outcome.merged,
            json!({"a": 1, "only_local": true, "only_server": "x"})
        );
        assert!(outcome.conflicts.is_empty());
    }

    #[test]
    fn test_merge_array_union_is_order_independent() {
        let left = intelligent_merge(&json!({"b": [1, 2]}), &json!({"b": [2, 3]}), None);
        let right = intelligent_merge(&json!({"b": [2, 3]}), &json!({"b": [1, 2]}), None);

        let expected: HashSet<String> =
            [json!(1), json!(2), json!(3)].iter().map(canonical_json).collect();
        assert_eq!(as_set(&left.merged["b"]), expected);
        assert_eq!(as_set(&right.merged["b"]), expected);
        assert!(left.conflicts.is_empty());
        assert!(right.conflicts.is_empty());
    }

    #[test]
    fn test_merge_recurses_into_nested_objects() {
        let outcome = intelligent_merge(
            &json!({"profile": {"name": "ada", "bio": "local"}}),
            &json!({"profile": {"name": "ada", "bio": "server"}}),
            None,
        );
        assert_eq!(outcome.merged["profile"]["bio"], "server");
        assert_eq!(outcome.conflicts, vec!["Field 'profile.bio' differs"]);
    }

    #[test]
    fn test_scenario_one_sided_scalar_merges_cleanly() {
        // local left `a` alone, server changed it; arrays union
        let local = json!({"a": 1, "b": [1, 2]});
        let server = json!({"a": 2, "b": [2, 3]});
        let base = json!({"a": 1, "b": [1, 2]});

        assert!(detect_conflict(&local, &server, Some(&base)));

        let outcome = intelligent_merge(&local, &server, Some(&base));
        assert_eq!(outcome.merged["a"], 2);
        let expected: HashSet<String> =
            [json!(1), json!(2), json!(3)].iter().map(canonical_json).collect();
        assert_eq!(as_set(&outcome.merged["b"]), expected);
        assert_eq!(outcome.conflicts, Vec::<String>::new());
    }

    #[test]
    fn test_scenario_two_sided_scalar_clash_prefers_server() {
        let item = conflict_item(json!({"a": 5}), json!({"a": 9}), Some(json!({"a": 1})));
        let resolution = resolve_conflict(&item, MergeStrategy::Merge);

        let resolved = resolution.resolved.unwrap();
        assert_eq!(resolved["a"], 9);
        assert!(resolution.requires_user_action);
        assert_eq!(resolution.reason.as_deref(), Some("Field 'a' differs"));
    }

    #[test]
    fn test_local_untouched_scalar_takes_server_without_base_symmetry_loss() {
        // Server never touched the field: local edit survives
        let outcome = intelligent_merge(
            &json!({"a": 5}),
            &json!({"a": 1}),
            Some(&json!({"a": 1})),
        );
        assert_eq!(outcome.merged["a"], 5);
        assert!(outcome.conflicts.is_empty());
    }

    #[test]
    fn test_server_wins_returns_server_verbatim() {
        let item = conflict_item(json!({"a": 5}), json!({"a": 9}), None);
        let resolution = resolve_conflict(&item, MergeStrategy::ServerWins);
        assert_eq!(resolution.resolved, Some(json!({"a": 9})));
        assert!(!resolution.requires_user_action);

        let local = resolve_conflict(&item, MergeStrategy::LocalWins);
        assert_eq!(local.resolved, Some(json!({"a": 5})));
        assert!(!local.requires_user_action);
    }

    #[test]
    fn test_user_choice_surfaces_both_versions() {
        let item = conflict_item(json!({"a": 5}), json!({"a": 9}), None);
        let resolution = resolve_conflict(&item, MergeStrategy::UserChoice);
        assert!(resolution.resolved.is_none());
        assert!(resolution.requires_user_action);
        let reason = resolution.reason.unwrap();
        assert!(reason.contains("\"a\":5"));
        assert!(reason.contains("\"a\":9"));
    }

    #[test]
    fn test_batch_resolves_items_independently() {
        let items = vec![
            conflict_item(json!({"a": 5}), json!({"a": 9}), Some(json!({"a": 1}))),
            conflict_item(json!({"b": 1}), json!({"b": 1}), None),
        ];
        let resolutions = resolve_batch_conflicts(&items, MergeStrategy::Merge);
        assert_eq!(resolutions.len(), 2);
        assert!(resolutions[0].requires_user_action);
        assert!(!resolutions[1].requires_user_action);
    }

    #[test]
    fn test_shape_clash_prefers_server_with_note() {
        let outcome = intelligent_merge(
            &json!({"v": [1, 2]}),
            &json!({"v": {"kind": "object"}}),
            None,
        );
        assert_eq!(outcome.merged["v"], json!({"kind": "object"}));
        assert_eq!(outcome.conflicts, vec!["Field 'v' differs"]);
    }
}
