//! In-memory diff log.

use parking_lot::RwLock;

use crate::errors::EngineResult;
use crate::models::{BigMapAction, BigMapDiff};
use crate::store::{sort_by_point, DiffSource};

/// Append-only log held in memory. Rows may arrive out of order; reads
/// always come back sorted by `(level, operation index)`.
#[derive(Debug, Default)]
pub struct MemoryDiffLog {
    diffs: RwLock<Vec<BigMapDiff>>,
    actions: RwLock<Vec<BigMapAction>>,
}

impl MemoryDiffLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rows(diffs: Vec<BigMapDiff>, actions: Vec<BigMapAction>) -> Self {
        Self {
            diffs: RwLock::new(diffs),
            actions: RwLock::new(actions),
        }
    }

    pub fn push_diff(&self, diff: BigMapDiff) {
        self.diffs.write().push(diff);
    }

    pub fn push_action(&self, action: BigMapAction) {
        self.actions.write().push(action);
    }

    pub fn len(&self) -> usize {
        self.diffs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.diffs.read().is_empty()
    }

    fn select_diffs(&self, keep: impl Fn(&BigMapDiff) -> bool) -> Vec<BigMapDiff> {
        let mut rows: Vec<BigMapDiff> = self.diffs.read().iter().filter(|d| keep(d)).cloned().collect();
        sort_by_point(&mut rows, BigMapDiff::point);
        rows
    }
}

impl DiffSource for MemoryDiffLog {
    fn diffs_by_ptr(&self, ptr: i64, max_level: Option<i64>) -> EngineResult<Vec<BigMapDiff>> {
        Ok(self.select_diffs(|d| d.ptr == ptr && max_level.map_or(true, |max| d.level <= max)))
    }

    fn diffs_by_contract(&self, contract: &str) -> EngineResult<Vec<BigMapDiff>> {
        Ok(self.select_diffs(|d| d.contract == contract))
    }

    fn diffs_by_key(&self, ptr: i64, key_hash: &str) -> EngineResult<Vec<BigMapDiff>> {
        Ok(self.select_diffs(|d| d.ptr == ptr && d.key_hash == key_hash))
    }

    fn actions_by_ptr(&self, ptr: i64) -> EngineResult<Vec<BigMapAction>> {
        let mut rows: Vec<BigMapAction> = self.actions.read().iter().filter(|a| a.touches(ptr)).cloned().collect();
        sort_by_point(&mut rows, BigMapAction::point);
        Ok(rows)
    }
}
