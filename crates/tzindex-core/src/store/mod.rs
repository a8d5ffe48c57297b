//! Persistence of the big map log.
//!
//! [`DiffSource`] is the read side the query layer works against. Every
//! method returns rows ordered by `(level, operation index)`.

pub mod database;
pub mod memory;
pub mod schema;

use std::collections::HashSet;

use crate::errors::EngineResult;
use crate::models::{ActionKind, BigMapAction, BigMapDiff};

pub use database::Database;
pub use memory::MemoryDiffLog;

pub trait DiffSource {
    /// Diffs of `ptr`, optionally up to and including `max_level`.
    fn diffs_by_ptr(&self, ptr: i64, max_level: Option<i64>) -> EngineResult<Vec<BigMapDiff>>;

    fn diffs_by_contract(&self, contract: &str) -> EngineResult<Vec<BigMapDiff>>;

    fn diffs_by_key(&self, ptr: i64, key_hash: &str) -> EngineResult<Vec<BigMapDiff>>;

    /// Actions targeting `ptr` or copying from it.
    fn actions_by_ptr(&self, ptr: i64) -> EngineResult<Vec<BigMapAction>>;

    fn count_diffs(&self, ptr: i64) -> EngineResult<usize> {
        Ok(self.diffs_by_ptr(ptr, None)?.len())
    }
}

/// Everything needed to replay `ptr`: its own rows plus, transitively, the
/// rows of every pointer it was copied from.
pub fn pointer_log<S: DiffSource + ?Sized>(
    source: &S,
    ptr: i64,
    max_level: Option<i64>,
) -> EngineResult<(Vec<BigMapDiff>, Vec<BigMapAction>)> {
    let mut diffs = Vec::new();
    let mut actions = Vec::new();
    let mut seen = HashSet::new();
    let mut pending = vec![ptr];
    while let Some(current) = pending.pop() {
        if !seen.insert(current) {
            continue;
        }
        diffs.extend(source.diffs_by_ptr(current, max_level)?);
        for action in source.actions_by_ptr(current)? {
            if max_level.is_some_and(|max| action.level > max) {
                continue;
            }
            if action.ptr == current && action.kind == ActionKind::Copy {
                if let Some(src) = action.source_ptr {
                    pending.push(src);
                }
            }
            if action.ptr == current {
                actions.push(action);
            }
        }
    }
    Ok((diffs, actions))
}

pub(crate) fn sort_by_point<T>(rows: &mut [T], point: impl Fn(&T) -> (i64, i64)) {
    rows.sort_by_key(|row| point(row));
}
