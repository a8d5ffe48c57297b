//! Replay of the big map log into per-key state and history.
//!
//! Events of one pointer are ordered by `(level, operation index)`. At the
//! same point, alloc and copy come before diffs and remove comes after them.
//! Each pointer is replayed independently on the rayon pool; a copy replays
//! its source up to the copy point from the same read-only log.

use std::collections::BTreeMap;
use std::time::Instant;

use indexmap::IndexMap;
use rayon::prelude::*;
use tracing::{info, warn};

use crate::bigmap::lifecycle::{Lifecycle, PointerState};
use crate::config::EngineConfig;
use crate::models::{ActionKind, Anomaly, AnomalyKind, BigMapAction, BigMapDiff, BigMapState, LogPoint};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconstructOptions {
    /// Ignore every event above this level.
    pub max_level: Option<i64>,
    pub parallel: bool,
}

impl Default for ReconstructOptions {
    fn default() -> Self {
        Self {
            max_level: None,
            parallel: true,
        }
    }
}

impl ReconstructOptions {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_level: None,
            parallel: config.parallel_reconstruction,
        }
    }

    pub fn at_level(mut self, level: i64) -> Self {
        self.max_level = Some(level);
        self
    }
}

/// Latest state of a key together with every diff that touched it, oldest
/// first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyRecord {
    pub state: BigMapState,
    pub history: Vec<BigMapDiff>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PointerReconstruction {
    pub ptr: i64,
    /// Owner, taken from the first event of the pointer.
    pub contract: Option<String>,
    pub lifecycle: PointerState,
    /// Keyed by key hash, in order of first appearance.
    pub keys: IndexMap<String, KeyRecord>,
    pub anomalies: Vec<Anomaly>,
}

impl PointerReconstruction {
    fn empty(ptr: i64) -> Self {
        Self {
            ptr,
            contract: None,
            lifecycle: PointerState::Unallocated,
            keys: IndexMap::new(),
            anomalies: Vec::new(),
        }
    }

    pub fn states(&self) -> impl Iterator<Item = &BigMapState> {
        self.keys.values().map(|record| &record.state)
    }

    pub fn active_states(&self) -> impl Iterator<Item = &BigMapState> {
        self.states().filter(|state| state.active)
    }

    pub fn key(&self, key_hash: &str) -> Option<&KeyRecord> {
        self.keys.get(key_hash)
    }

    pub fn total_keys(&self) -> usize {
        self.keys.len()
    }

    pub fn active_keys(&self) -> usize {
        self.active_states().count()
    }

    /// Count a diff without touching the key's value. Used once the
    /// pointer is retired; a key first seen then stays inactive.
    fn record(&mut self, diff: BigMapDiff) {
        match self.keys.get_mut(&diff.key_hash) {
            Some(record) => {
                record.state.count += 1;
                record.history.push(diff);
            }
            None => {
                let state = BigMapState {
                    ptr: self.ptr,
                    key: diff.key.clone(),
                    key_hash: diff.key_hash.clone(),
                    value: None,
                    contract: diff.contract.clone(),
                    last_update_level: diff.level,
                    last_update_time: diff.timestamp,
                    active: false,
                    count: 1,
                    copied_from: None,
                };
                self.keys.insert(
                    diff.key_hash.clone(),
                    KeyRecord {
                        state,
                        history: vec![diff],
                    },
                );
            }
        }
    }

    fn apply(&mut self, diff: BigMapDiff, copied_from: Option<i64>) {
        if self.contract.is_none() {
            self.contract = Some(diff.contract.clone());
        }
        match self.keys.get_mut(&diff.key_hash) {
            Some(record) => {
                let state = &mut record.state;
                state.value = diff.value.clone();
                state.active = diff.value.is_some();
                state.last_update_level = diff.level;
                state.last_update_time = diff.timestamp;
                state.count += 1;
                record.history.push(diff);
            }
            None => {
                let state = BigMapState {
                    ptr: self.ptr,
                    key: diff.key.clone(),
                    key_hash: diff.key_hash.clone(),
                    value: diff.value.clone(),
                    contract: diff.contract.clone(),
                    last_update_level: diff.level,
                    last_update_time: diff.timestamp,
                    active: diff.value.is_some(),
                    count: 1,
                    copied_from,
                };
                self.keys.insert(
                    diff.key_hash.clone(),
                    KeyRecord {
                        state,
                        history: vec![diff],
                    },
                );
            }
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Reconstruction {
    /// Sorted by pointer.
    pub pointers: Vec<PointerReconstruction>,
}

impl Reconstruction {
    pub fn pointer(&self, ptr: i64) -> Option<&PointerReconstruction> {
        self.pointers
            .binary_search_by_key(&ptr, |p| p.ptr)
            .ok()
            .map(|idx| &self.pointers[idx])
    }

    pub fn states(&self) -> impl Iterator<Item = &BigMapState> {
        self.pointers.iter().flat_map(PointerReconstruction::states)
    }

    pub fn anomalies(&self) -> impl Iterator<Item = &Anomaly> {
        self.pointers.iter().flat_map(|p| p.anomalies.iter())
    }
}

// ---------------------------------------------------------------------------
// Log index
// ---------------------------------------------------------------------------

#[derive(Default)]
struct PointerLog<'a> {
    diffs: Vec<&'a BigMapDiff>,
    actions: Vec<&'a BigMapAction>,
}

enum Event<'a> {
    Action(&'a BigMapAction),
    Diff(&'a BigMapDiff),
}

impl Event<'_> {
    fn order(&self) -> (i64, i64, u8) {
        match self {
            Event::Action(a) if a.kind == ActionKind::Remove => (a.level, a.operation_index, 2),
            Event::Action(a) => (a.level, a.operation_index, 0),
            Event::Diff(d) => (d.level, d.operation_index, 1),
        }
    }

    fn point(&self) -> LogPoint {
        let (level, op, _) = self.order();
        (level, op)
    }
}

struct LogIndex<'a> {
    by_ptr: BTreeMap<i64, PointerLog<'a>>,
}

impl<'a> LogIndex<'a> {
    fn new(diffs: &'a [BigMapDiff], actions: &'a [BigMapAction], max_level: Option<i64>) -> Self {
        let within = |level: i64| max_level.map_or(true, |max| level <= max);
        let mut by_ptr: BTreeMap<i64, PointerLog<'a>> = BTreeMap::new();
        for diff in diffs.iter().filter(|d| within(d.level)) {
            by_ptr.entry(diff.ptr).or_default().diffs.push(diff);
        }
        for action in actions.iter().filter(|a| within(a.level)) {
            by_ptr.entry(action.ptr).or_default().actions.push(action);
        }
        Self { by_ptr }
    }

    fn pointers(&self) -> Vec<i64> {
        self.by_ptr.keys().copied().collect()
    }

    /// Events of `ptr` strictly before `until`, in replay order. The sort is
    /// stable, so only events sharing a point keep their arrival order.
    fn events(&self, ptr: i64, until: Option<LogPoint>) -> Vec<Event<'a>> {
        let Some(log) = self.by_ptr.get(&ptr) else {
            return Vec::new();
        };
        let mut events: Vec<Event<'a>> = log
            .actions
            .iter()
            .map(|a| Event::Action(*a))
            .chain(log.diffs.iter().map(|d| Event::Diff(*d)))
            .filter(|e| until.map_or(true, |limit| e.point() < limit))
            .collect();
        events.sort_by_key(Event::order);
        events
    }
}

// ---------------------------------------------------------------------------
// Replay
// ---------------------------------------------------------------------------

fn replay(index: &LogIndex<'_>, ptr: i64, until: Option<LogPoint>) -> PointerReconstruction {
    let mut out = PointerReconstruction::empty(ptr);
    let mut lifecycle = Lifecycle::new(ptr);

    for event in index.events(ptr, until) {
        match event {
            Event::Action(action) => {
                if out.contract.is_none() {
                    out.contract = Some(action.contract.clone());
                }
                if lifecycle.apply_action(action) && action.kind == ActionKind::Copy {
                    copy_into(index, &mut out, &mut lifecycle, action);
                }
            }
            Event::Diff(diff) => {
                if lifecycle.admit_diff(diff) {
                    out.apply(diff.clone(), None);
                } else {
                    out.record(diff.clone());
                }
            }
        }
    }

    out.lifecycle = lifecycle.state();
    out.anomalies = lifecycle.into_anomalies();
    out
}

/// Seed the destination with the source's active entries as of the copy
/// point. Copied entries enter the destination history at the copy point.
fn copy_into(
    index: &LogIndex<'_>,
    out: &mut PointerReconstruction,
    lifecycle: &mut Lifecycle,
    action: &BigMapAction,
) {
    let Some(source_ptr) = action.source_ptr.filter(|src| *src != action.ptr) else {
        lifecycle.note(
            AnomalyKind::UnknownCopySource,
            action.point(),
            "copy without a distinct source pointer".to_string(),
        );
        return;
    };
    let source = replay(index, source_ptr, Some(action.point()));
    if source.lifecycle != PointerState::Live {
        lifecycle.note(
            AnomalyKind::UnknownCopySource,
            action.point(),
            format!("copy source {source_ptr} is {}", source.lifecycle.as_str()),
        );
        return;
    }
    for state in source.active_states() {
        let seeded = BigMapDiff {
            ptr: action.ptr,
            key: state.key.clone(),
            key_hash: state.key_hash.clone(),
            value: state.value.clone(),
            contract: action.contract.clone(),
            level: action.level,
            operation_index: action.operation_index,
            timestamp: action.timestamp,
        };
        out.apply(seeded, Some(source_ptr));
    }
}

/// Replay a single pointer.
pub fn reconstruct_pointer(
    ptr: i64,
    diffs: &[BigMapDiff],
    actions: &[BigMapAction],
    options: &ReconstructOptions,
) -> PointerReconstruction {
    let index = LogIndex::new(diffs, actions, options.max_level);
    let out = replay(&index, ptr, None);
    log_anomalies(&out);
    out
}

/// Replay every pointer that appears in the log. The input is never
/// mutated; anomalies are collected per pointer and do not stop the other
/// pointers.
pub fn reconstruct(
    diffs: &[BigMapDiff],
    actions: &[BigMapAction],
    options: &ReconstructOptions,
) -> Reconstruction {
    let started = Instant::now();
    let index = LogIndex::new(diffs, actions, options.max_level);
    let ptrs = index.pointers();

    let pool = if options.parallel && ptrs.len() > 1 {
        rayon::ThreadPoolBuilder::new().build().ok()
    } else {
        None
    };
    let pointers: Vec<PointerReconstruction> = match pool {
        Some(pool) => pool.install(|| ptrs.par_iter().map(|ptr| replay(&index, *ptr, None)).collect()),
        // Sequential when disabled or the pool cannot start
        None => ptrs.iter().map(|ptr| replay(&index, *ptr, None)).collect(),
    };

    let mut keys = 0usize;
    let mut anomalies = 0usize;
    for pointer in &pointers {
        keys += pointer.total_keys();
        anomalies += pointer.anomalies.len();
        log_anomalies(pointer);
    }
    info!(
        pointers = pointers.len(),
        keys,
        anomalies,
        max_level = ?options.max_level,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "big map reconstruction finished"
    );

    Reconstruction { pointers }
}

fn log_anomalies(pointer: &PointerReconstruction) {
    for anomaly in &pointer.anomalies {
        warn!(
            ptr = anomaly.ptr,
            level = anomaly.level,
            operation_index = anomaly.operation_index,
            kind = ?anomaly.kind,
            "big map anomaly: {}",
            anomaly.detail
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    use crate::bigmap::key_hash::encoded_hash;
    use crate::micheline::{encode, Node};

    fn ts(level: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_600_000_000 + level * 30, 0).unwrap()
    }

    fn diff(ptr: i64, level: i64, op: i64, key: &str, value: Option<&str>) -> BigMapDiff {
        let key = encode(&Node::string(key)).unwrap();
        BigMapDiff {
            ptr,
            key_hash: encoded_hash(&key),
            key,
            value: value.map(|v| encode(&Node::string(v)).unwrap()),
            contract: "KT1Owner".to_string(),
            level,
            operation_index: op,
            timestamp: ts(level),
        }
    }

    fn action(kind: ActionKind, ptr: i64, source: Option<i64>, level: i64, op: i64) -> BigMapAction {
        BigMapAction {
            kind,
            ptr,
            source_ptr: source,
            contract: "KT1Owner".to_string(),
            level,
            operation_index: op,
            timestamp: ts(level),
        }
    }

    fn value_of(state: &BigMapState) -> Option<Node> {
        state.value_node().unwrap()
    }

    fn sequential() -> ReconstructOptions {
        ReconstructOptions {
            parallel: false,
            ..ReconstructOptions::default()
        }
    }

    #[test]
    fn latest_diff_wins_and_history_is_ascending() {
        let diffs = vec![
            diff(1, 1, 0, "K", Some("A")),
            diff(1, 2, 0, "K", Some("B")),
            diff(1, 2, 1, "K", None),
        ];
        let actions = vec![action(ActionKind::Alloc, 1, None, 1, 0)];
        let out = reconstruct(&diffs, &actions, &sequential());
        let pointer = out.pointer(1).unwrap();
        let hash = &diffs[0].key_hash;
        let record = pointer.key(hash).unwrap();
        assert!(!record.state.active);
        assert_eq!(record.state.count, 3);
        assert_eq!(record.state.last_update_level, 2);
        let history: Vec<Option<Node>> = record.history.iter().map(|d| d.value_node().unwrap()).collect();
        assert_eq!(history, vec![Some(Node::string("A")), Some(Node::string("B")), None]);
        assert!(pointer.anomalies.is_empty());
    }

    #[test]
    fn same_level_ties_break_on_operation_index() {
        let diffs = vec![
            diff(1, 5, 3, "K", Some("late")),
            diff(1, 5, 1, "K", Some("early")),
            diff(1, 5, 2, "K", Some("middle")),
        ];
        let actions = vec![action(ActionKind::Alloc, 1, None, 4, 0)];
        let out = reconstruct(&diffs, &actions, &sequential());
        let state = out.pointer(1).unwrap().states().next().unwrap().clone();
        assert_eq!(value_of(&state), Some(Node::string("late")));
    }

    #[test]
    fn double_remove_does_not_abort_other_pointers() {
        let diffs = vec![diff(1, 1, 1, "a", Some("x")), diff(2, 1, 2, "b", Some("y"))];
        let actions = vec![
            action(ActionKind::Alloc, 1, None, 1, 0),
            action(ActionKind::Alloc, 2, None, 1, 0),
            action(ActionKind::Remove, 1, None, 2, 0),
            action(ActionKind::Remove, 1, None, 3, 0),
        ];
        let out = reconstruct(&diffs, &actions, &ReconstructOptions::default());
        let first = out.pointer(1).unwrap();
        assert_eq!(first.lifecycle, PointerState::Retired);
        assert_eq!(first.anomalies.len(), 1);
        assert_eq!(first.anomalies[0].kind, AnomalyKind::DuplicateRemove);
        let second = out.pointer(2).unwrap();
        assert_eq!(second.lifecycle, PointerState::Live);
        assert_eq!(second.active_keys(), 1);
        assert_eq!(out.anomalies().count(), 1);
    }

    #[test]
    fn remove_after_diffs_at_same_point() {
        let diffs = vec![diff(1, 3, 0, "a", Some("x"))];
        let actions = vec![
            action(ActionKind::Remove, 1, None, 3, 0),
            action(ActionKind::Alloc, 1, None, 3, 0),
        ];
        let pointer = reconstruct_pointer(1, &diffs, &actions, &sequential());
        assert!(pointer.anomalies.is_empty());
        assert_eq!(pointer.total_keys(), 1);
        assert_eq!(pointer.lifecycle, PointerState::Retired);
    }

    #[test]
    fn diffs_after_remove_still_count() {
        let diffs = vec![
            diff(1, 2, 0, "K", Some("A")),
            diff(1, 4, 0, "K", Some("B")),
            diff(1, 5, 0, "L", Some("C")),
        ];
        let actions = vec![
            action(ActionKind::Alloc, 1, None, 1, 0),
            action(ActionKind::Remove, 1, None, 3, 0),
        ];
        let pointer = reconstruct_pointer(1, &diffs, &actions, &sequential());
        assert_eq!(pointer.lifecycle, PointerState::Retired);

        let k = pointer.states().next().unwrap().clone();
        assert_eq!(k.count, 2);
        assert_eq!(value_of(&k), Some(Node::string("A")));
        assert_eq!(k.last_update_level, 2);
        let history = &pointer.keys[&k.key_hash].history;
        assert_eq!(history.iter().map(|d| d.level).collect::<Vec<_>>(), vec![2, 4]);

        let l = pointer.states().nth(1).unwrap();
        assert_eq!(l.count, 1);
        assert!(!l.active);
        assert!(l.value.is_none());

        let kinds: Vec<_> = pointer.anomalies.iter().map(|a| a.kind).collect();
        assert_eq!(kinds, vec![AnomalyKind::DiffAfterRemove, AnomalyKind::DiffAfterRemove]);
    }

    #[test]
    fn diff_without_alloc_is_applied_with_anomaly() {
        let diffs = vec![diff(9, 1, 0, "a", Some("x"))];
        let pointer = reconstruct_pointer(9, &diffs, &[], &sequential());
        assert_eq!(pointer.active_keys(), 1);
        assert_eq!(pointer.anomalies[0].kind, AnomalyKind::DiffBeforeAlloc);
    }

    #[test]
    fn historical_reconstruction_stops_at_level() {
        let diffs = vec![diff(1, 1, 0, "K", Some("A")), diff(1, 5, 0, "K", Some("B"))];
        let actions = vec![action(ActionKind::Alloc, 1, None, 1, 0)];
        let options = sequential().at_level(4);
        let out = reconstruct(&diffs, &actions, &options);
        let state = out.pointer(1).unwrap().states().next().unwrap().clone();
        assert_eq!(value_of(&state), Some(Node::string("A")));
        assert_eq!(state.count, 1);
    }

    #[test]
    fn copy_seeds_live_entries_of_source() {
        let diffs = vec![
            diff(1, 1, 1, "a", Some("x")),
            diff(1, 1, 2, "b", Some("y")),
            diff(1, 2, 0, "b", None),
            // After the copy; must not leak into the destination.
            diff(1, 4, 0, "c", Some("z")),
            diff(2, 3, 1, "d", Some("w")),
        ];
        let actions = vec![
            action(ActionKind::Alloc, 1, None, 1, 0),
            action(ActionKind::Copy, 2, Some(1), 3, 0),
        ];
        let out = reconstruct(&diffs, &actions, &ReconstructOptions::default());
        let dest = out.pointer(2).unwrap();
        assert_eq!(dest.lifecycle, PointerState::Live);
        assert_eq!(dest.total_keys(), 2);
        let copied = dest.key(&diffs[0].key_hash).unwrap();
        assert_eq!(copied.state.copied_from, Some(1));
        assert_eq!(copied.state.ptr, 2);
        assert_eq!(copied.state.last_update_level, 3);
        assert_eq!(dest.key(&diffs[4].key_hash).unwrap().state.copied_from, None);
        assert!(dest.key(&diffs[3].key_hash).is_none());
        assert!(dest.anomalies.is_empty());
        // The source keeps its own entries.
        assert_eq!(out.pointer(1).unwrap().active_keys(), 2);
    }

    #[test]
    fn copy_from_unknown_source_is_an_anomaly() {
        let actions = vec![action(ActionKind::Copy, 5, Some(4), 2, 0)];
        let pointer = reconstruct_pointer(5, &[], &actions, &sequential());
        assert_eq!(pointer.lifecycle, PointerState::Live);
        assert_eq!(pointer.anomalies[0].kind, AnomalyKind::UnknownCopySource);
        assert_eq!(pointer.total_keys(), 0);
    }

    #[test]
    fn parallel_and_sequential_agree() {
        let mut diffs = Vec::new();
        let mut actions = Vec::new();
        for ptr in 0..8 {
            actions.push(action(ActionKind::Alloc, ptr, None, 1, 0));
            for level in 1..6 {
                let key = format!("k{}", level % 3);
                let value = (level % 4 != 0).then(|| format!("v{ptr}-{level}"));
                diffs.push(diff(ptr, level, 1, &key, value.as_deref()));
            }
        }
        let a = reconstruct(&diffs, &actions, &ReconstructOptions::default());
        let b = reconstruct(&diffs, &actions, &sequential());
        assert_eq!(a.pointers, b.pointers);
        assert_eq!(a.pointers.len(), 8);
    }
}
