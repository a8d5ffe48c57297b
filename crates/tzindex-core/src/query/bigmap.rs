//! Big map queries over a [`DiffSource`]: pointer stats, action history,
//! key listing and per-key history.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::bigmap::{reconstruct_pointer, PointerState, ReconstructOptions};
use crate::errors::{EngineError, EngineResult};
use crate::micheline::{format_inline, Node};
use crate::michelson::{TypeKind, TypeNode};
use crate::models::{ActionKind, BigMapState};
use crate::projection::miguel;
use crate::query::guards::{clamp_page_size, truncate_search};
use crate::settle::Settler;
use crate::store::{pointer_log, DiffSource};

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BigMapStats {
    pub ptr: i64,
    pub contract: Option<String>,
    pub total_keys: usize,
    pub active_keys: usize,
    pub lifecycle: PointerState,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HistoryItem {
    pub action: ActionKind,
    pub level: i64,
    pub timestamp: DateTime<Utc>,
    /// Set when another pointer was copied into this one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_ptr: Option<i64>,
    /// Set when this pointer was copied into another one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination_ptr: Option<i64>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BigMapHistory {
    pub ptr: i64,
    pub contract: Option<String>,
    pub items: Vec<HistoryItem>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BigMapItem {
    pub key: Value,
    pub key_hash: String,
    pub key_string: String,
    pub value: Option<Value>,
    pub level: i64,
    pub timestamp: DateTime<Utc>,
    pub active: bool,
    pub count: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DiffItem {
    pub level: i64,
    pub value: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct KeyHistory {
    pub key_hash: String,
    pub key: Value,
    /// Number of diffs of the key, regardless of paging.
    pub total: usize,
    /// Newest first.
    pub values: Vec<DiffItem>,
}

/// Filters for [`keys`]. A `size` of zero means the default page size.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeysRequest {
    pub offset: usize,
    pub size: usize,
    pub min_level: Option<i64>,
    pub max_level: Option<i64>,
    /// Matches the key hash exactly or the readable key as a substring.
    pub search: Option<String>,
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// Total and active key counts of a pointer, and its owner.
pub fn stats<S: DiffSource + ?Sized>(source: &S, ptr: i64) -> EngineResult<BigMapStats> {
    let (diffs, actions) = pointer_log(source, ptr, None)?;
    let pointer = reconstruct_pointer(ptr, &diffs, &actions, &ReconstructOptions::default());
    Ok(BigMapStats {
        ptr,
        contract: pointer.contract.clone(),
        total_keys: pointer.total_keys(),
        active_keys: pointer.active_keys(),
        lifecycle: pointer.lifecycle,
    })
}

/// Alloc, copy and remove actions touching the pointer, oldest first.
pub fn history<S: DiffSource + ?Sized>(source: &S, ptr: i64) -> EngineResult<BigMapHistory> {
    let actions = source.actions_by_ptr(ptr)?;
    let Some(first) = actions.first() else {
        return Ok(BigMapHistory {
            ptr,
            ..BigMapHistory::default()
        });
    };
    let contract = Some(first.contract.clone());
    let items = actions
        .iter()
        .map(|a| {
            let mut item = HistoryItem {
                action: a.kind,
                level: a.level,
                timestamp: a.timestamp,
                source_ptr: None,
                destination_ptr: None,
            };
            if a.ptr != ptr {
                item.destination_ptr = Some(a.ptr);
            } else if let Some(src) = a.source_ptr.filter(|src| *src != ptr) {
                item.source_ptr = Some(src);
            }
            item
        })
        .collect();
    Ok(BigMapHistory {
        ptr,
        contract,
        items,
    })
}

/// Page of keys, most recently updated first.
///
/// `big_map_type` is the `big_map` schema node of the pointer; keys and
/// values are rendered through the display projection.
pub fn keys<S: DiffSource + ?Sized>(
    source: &S,
    big_map_type: &TypeNode,
    ptr: i64,
    request: &KeysRequest,
) -> EngineResult<Vec<BigMapItem>> {
    let (key_ty, value_ty) = key_value_types(big_map_type)?;
    let settler = Settler::default();
    let (diffs, actions) = pointer_log(source, ptr, request.max_level)?;
    let options = ReconstructOptions {
        max_level: request.max_level,
        parallel: false,
    };
    let pointer = reconstruct_pointer(ptr, &diffs, &actions, &options);

    let mut states: Vec<&BigMapState> = pointer
        .states()
        .filter(|s| request.min_level.map_or(true, |min| s.last_update_level >= min))
        .collect();
    states.sort_by(|a, b| {
        b.last_update_level
            .cmp(&a.last_update_level)
            .then_with(|| a.key_hash.cmp(&b.key_hash))
    });

    let search = request
        .search
        .as_deref()
        .map(truncate_search)
        .filter(|s| !s.is_empty());
    let size = clamp_page_size(request.size);
    let mut out = Vec::new();
    let mut skipped = 0usize;
    for state in states {
        let key_node = state.key_node()?;
        let (key, key_string) = render_key(key_ty, &key_node, &settler)?;
        if let Some(query) = &search {
            if state.key_hash != *query && !key_string.contains(query.as_str()) {
                continue;
            }
        }
        if skipped < request.offset {
            skipped += 1;
            continue;
        }
        let value = match state.value_node()? {
            Some(node) => Some(render(value_ty, &node, &settler)?),
            None => None,
        };
        out.push(BigMapItem {
            key,
            key_hash: state.key_hash.clone(),
            key_string,
            value,
            level: state.last_update_level,
            timestamp: state.last_update_time,
            active: state.active,
            count: state.count,
        });
        if out.len() == size {
            break;
        }
    }
    Ok(out)
}

/// Page of one key's diffs, newest first. `None` when the key was never
/// written.
pub fn key_history<S: DiffSource + ?Sized>(
    source: &S,
    big_map_type: &TypeNode,
    ptr: i64,
    key_hash: &str,
    offset: usize,
    size: usize,
) -> EngineResult<Option<KeyHistory>> {
    let (key_ty, value_ty) = key_value_types(big_map_type)?;
    let settler = Settler::default();
    let diffs = source.diffs_by_key(ptr, key_hash)?;
    let Some(latest) = diffs.last() else {
        return Ok(None);
    };
    let (key, _) = render_key(key_ty, &latest.key_node()?, &settler)?;
    let values = diffs
        .iter()
        .rev()
        .skip(offset)
        .take(clamp_page_size(size))
        .map(|d| -> EngineResult<DiffItem> {
            let value = match d.value_node()? {
                Some(node) => Some(render(value_ty, &node, &settler)?),
                None => None,
            };
            Ok(DiffItem {
                level: d.level,
                value,
                timestamp: d.timestamp,
            })
        })
        .collect::<EngineResult<Vec<_>>>()?;
    Ok(Some(KeyHistory {
        key_hash: key_hash.to_string(),
        key,
        total: diffs.len(),
        values,
    }))
}

/// Number of diffs logged for the pointer.
pub fn diff_count<S: DiffSource + ?Sized>(source: &S, ptr: i64) -> EngineResult<usize> {
    source.count_diffs(ptr)
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn key_value_types(big_map_type: &TypeNode) -> EngineResult<(&TypeNode, &TypeNode)> {
    match &big_map_type.kind {
        TypeKind::BigMap(key, value) | TypeKind::Map(key, value) => Ok((&**key, &**value)),
        _ => Err(EngineError::mismatch(
            &big_map_type.path,
            "big_map",
            big_map_type.prim(),
        )),
    }
}

fn render(ty: &TypeNode, node: &Node, settler: &Settler) -> EngineResult<Value> {
    miguel(ty, &settler.settle(ty, node)?)
}

/// Display value of a key plus its one-line string form.
fn render_key(ty: &TypeNode, node: &Node, settler: &Settler) -> EngineResult<(Value, String)> {
    let settled = settler.settle(ty, node)?;
    let key_string = match settled.scalar() {
        Some(scalar) => scalar.display(),
        None => format_inline(&settled.to_node()),
    };
    Ok((miguel(ty, &settled)?, key_string))
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::bigmap::encoded_hash;
    use crate::micheline::{encode, parse_expr};
    use crate::michelson::build;
    use crate::models::{BigMapAction, BigMapDiff};
    use crate::query::guards::DEFAULT_PAGE_SIZE;
    use crate::store::MemoryDiffLog;

    fn ts(level: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_650_000_000 + level * 15, 0).unwrap()
    }

    fn diff(ptr: i64, level: i64, key: &str, value: Option<i64>) -> BigMapDiff {
        let key = encode(&Node::string(key)).unwrap();
        BigMapDiff {
            ptr,
            key_hash: encoded_hash(&key),
            key,
            value: value.map(|v| encode(&Node::int(v)).unwrap()),
            contract: "KT1Ledger".to_string(),
            level,
            operation_index: 0,
            timestamp: ts(level),
        }
    }

    fn action(kind: ActionKind, ptr: i64, source_ptr: Option<i64>, level: i64) -> BigMapAction {
        BigMapAction {
            kind,
            ptr,
            source_ptr,
            contract: "KT1Ledger".to_string(),
            level,
            operation_index: 0,
            timestamp: ts(level),
        }
    }

    fn ledger_type() -> TypeNode {
        build(&parse_expr("big_map address nat").unwrap()).unwrap()
    }

    fn log() -> MemoryDiffLog {
        MemoryDiffLog::from_rows(
            vec![
                diff(3, 2, "tz1KqTpEZ7Yob7QbPE4Hy4Wo8fHG8LhKxZSx", Some(100)),
                diff(3, 3, "KT1BEqzn5Wx8uJrZNvuS9DVHmLvG9td3fDLi", Some(5)),
                diff(3, 4, "tz1KqTpEZ7Yob7QbPE4Hy4Wo8fHG8LhKxZSx", Some(90)),
                diff(3, 5, "KT1BEqzn5Wx8uJrZNvuS9DVHmLvG9td3fDLi", None),
            ],
            vec![
                action(ActionKind::Alloc, 3, None, 1),
                action(ActionKind::Copy, 8, Some(3), 6),
            ],
        )
    }

    #[test]
    fn stats_count_total_and_active_keys() {
        let s = stats(&log(), 3).unwrap();
        assert_eq!(s.total_keys, 2);
        assert_eq!(s.active_keys, 1);
        assert_eq!(s.contract.as_deref(), Some("KT1Ledger"));
        assert_eq!(s.lifecycle, PointerState::Live);

        let copied = stats(&log(), 8).unwrap();
        assert_eq!(copied.total_keys, 1);
        assert_eq!(copied.active_keys, 1);
    }

    #[test]
    fn history_reports_copy_destinations() {
        let h = history(&log(), 3).unwrap();
        assert_eq!(h.items.len(), 2);
        assert_eq!(h.items[0].action, ActionKind::Alloc);
        assert_eq!(h.items[1].destination_ptr, Some(8));
        assert_eq!(h.items[1].source_ptr, None);

        let dest = history(&log(), 8).unwrap();
        assert_eq!(dest.items[0].source_ptr, Some(3));

        let empty = history(&log(), 99).unwrap();
        assert!(empty.items.is_empty());
        assert_eq!(empty.contract, None);
    }

    #[test]
    fn keys_are_newest_first_and_paged() {
        let ty = ledger_type();
        let all = keys(&log(), &ty, 3, &KeysRequest::default()).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].level, 5);
        assert!(!all[0].active);
        assert_eq!(all[0].value, None);
        assert_eq!(all[1].key_string, "tz1KqTpEZ7Yob7QbPE4Hy4Wo8fHG8LhKxZSx");
        assert_eq!(all[1].value, Some(Value::String("90".to_string())));
        assert_eq!(all[1].count, 2);

        let page = keys(
            &log(),
            &ty,
            3,
            &KeysRequest {
                offset: 1,
                size: 1,
                ..KeysRequest::default()
            },
        )
        .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].level, 4);
    }

    #[test]
    fn keys_filter_by_level_and_search() {
        let ty = ledger_type();
        let at_three = keys(
            &log(),
            &ty,
            3,
            &KeysRequest {
                max_level: Some(3),
                ..KeysRequest::default()
            },
        )
        .unwrap();
        assert_eq!(at_three.len(), 2);
        assert!(at_three.iter().all(|item| item.active));

        let recent = keys(
            &log(),
            &ty,
            3,
            &KeysRequest {
                min_level: Some(5),
                ..KeysRequest::default()
            },
        )
        .unwrap();
        assert_eq!(recent.len(), 1);

        let found = keys(
            &log(),
            &ty,
            3,
            &KeysRequest {
                search: Some("  tz1Kq ".to_string()),
                ..KeysRequest::default()
            },
        )
        .unwrap();
        assert_eq!(found.len(), 1);
        let by_hash = keys(
            &log(),
            &ty,
            3,
            &KeysRequest {
                search: Some(found[0].key_hash.clone()),
                ..KeysRequest::default()
            },
        )
        .unwrap();
        assert_eq!(by_hash, found);
    }

    #[test]
    fn key_history_pages_newest_first() {
        let ty = ledger_type();
        let hash = diff(3, 0, "tz1KqTpEZ7Yob7QbPE4Hy4Wo8fHG8LhKxZSx", None).key_hash;
        let h = key_history(&log(), &ty, 3, &hash, 0, 0).unwrap().unwrap();
        assert_eq!(h.total, 2);
        assert_eq!(h.key, Value::String("tz1KqTpEZ7Yob7QbPE4Hy4Wo8fHG8LhKxZSx".to_string()));
        let levels: Vec<i64> = h.values.iter().map(|v| v.level).collect();
        assert_eq!(levels, vec![4, 2]);

        let second = key_history(&log(), &ty, 3, &hash, 1, 1).unwrap().unwrap();
        assert_eq!(second.values.len(), 1);
        assert_eq!(second.values[0].level, 2);

        assert!(key_history(&log(), &ty, 3, "exprMissing", 0, 0).unwrap().is_none());
    }

    #[test]
    fn page_size_is_clamped() {
        let ty = build(&parse_expr("big_map nat nat").unwrap()).unwrap();
        let rows: Vec<BigMapDiff> = (0..30)
            .map(|i| {
                let key = encode(&Node::int(i)).unwrap();
                BigMapDiff {
                    ptr: 1,
                    key_hash: encoded_hash(&key),
                    key,
                    value: Some(encode(&Node::int(i)).unwrap()),
                    contract: "KT1".to_string(),
                    level: i + 1,
                    operation_index: 0,
                    timestamp: ts(i + 1),
                }
            })
            .collect();
        let source = MemoryDiffLog::from_rows(rows, vec![action(ActionKind::Alloc, 1, None, 1)]);
        let page = keys(&source, &ty, 1, &KeysRequest::default()).unwrap();
        assert_eq!(page.len(), DEFAULT_PAGE_SIZE);
        assert_eq!(page[0].key_string, "29");
        assert_eq!(diff_count(&source, 1).unwrap(), 30);
    }

    #[test]
    fn non_big_map_type_is_rejected() {
        let ty = build(&parse_expr("nat").unwrap()).unwrap();
        assert!(matches!(
            keys(&log(), &ty, 3, &KeysRequest::default()),
            Err(EngineError::TypeMismatch { .. })
        ));
    }
}
