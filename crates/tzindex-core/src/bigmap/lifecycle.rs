//! Per-pointer lifecycle: `Unallocated -> Live -> Retired`.

use serde::Serialize;

use crate::models::{ActionKind, Anomaly, AnomalyKind, BigMapAction, BigMapDiff, LogPoint};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PointerState {
    #[default]
    Unallocated,
    Live,
    Retired,
}

impl PointerState {
    pub fn as_str(self) -> &'static str {
        match self {
            PointerState::Unallocated => "unallocated",
            PointerState::Live => "live",
            PointerState::Retired => "retired",
        }
    }
}

/// State machine for one pointer. Every irregular event is recorded as an
/// [`Anomaly`] and replay carries on.
#[derive(Clone, Debug)]
pub struct Lifecycle {
    ptr: i64,
    state: PointerState,
    anomalies: Vec<Anomaly>,
}

impl Lifecycle {
    pub fn new(ptr: i64) -> Self {
        Self {
            ptr,
            state: PointerState::Unallocated,
            anomalies: Vec::new(),
        }
    }

    pub fn state(&self) -> PointerState {
        self.state
    }

    pub fn anomalies(&self) -> &[Anomaly] {
        &self.anomalies
    }

    pub fn into_anomalies(self) -> Vec<Anomaly> {
        self.anomalies
    }

    /// Apply a structural action. Returns `false` when the action was
    /// ignored.
    pub fn apply_action(&mut self, action: &BigMapAction) -> bool {
        match (action.kind, self.state) {
            (ActionKind::Alloc | ActionKind::Copy, PointerState::Unallocated) => {
                self.state = PointerState::Live;
                true
            }
            (ActionKind::Alloc | ActionKind::Copy, state) => {
                self.note(
                    AnomalyKind::DuplicateAlloc,
                    action.point(),
                    format!("{} of a {} pointer", action.kind.as_str(), state.as_str()),
                );
                false
            }
            (ActionKind::Remove, PointerState::Live) => {
                self.state = PointerState::Retired;
                true
            }
            (ActionKind::Remove, PointerState::Retired) => {
                self.note(
                    AnomalyKind::DuplicateRemove,
                    action.point(),
                    "pointer already retired".to_string(),
                );
                false
            }
            (ActionKind::Remove, PointerState::Unallocated) => {
                self.note(
                    AnomalyKind::RemoveBeforeAlloc,
                    action.point(),
                    "remove of a pointer that was never allocated".to_string(),
                );
                self.state = PointerState::Retired;
                true
            }
        }
    }

    /// Decide whether a diff updates the key's value. A diff on an
    /// unallocated pointer allocates it implicitly. A diff on a retired
    /// pointer returns `false`: it still counts toward the key's history but
    /// leaves the frozen value alone.
    pub fn admit_diff(&mut self, diff: &BigMapDiff) -> bool {
        match self.state {
            PointerState::Live => true,
            PointerState::Unallocated => {
                self.note(
                    AnomalyKind::DiffBeforeAlloc,
                    diff.point(),
                    format!("implicit allocation for key {}", diff.key_hash),
                );
                self.state = PointerState::Live;
                true
            }
            PointerState::Retired => {
                self.note(
                    AnomalyKind::DiffAfterRemove,
                    diff.point(),
                    format!("diff on key {} after remove", diff.key_hash),
                );
                false
            }
        }
    }

    pub fn note(&mut self, kind: AnomalyKind, point: LogPoint, detail: String) {
        self.anomalies.push(Anomaly {
            kind,
            ptr: self.ptr,
            level: point.0,
            operation_index: point.1,
            detail,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    fn action(kind: ActionKind, level: i64) -> BigMapAction {
        BigMapAction {
            kind,
            ptr: 7,
            source_ptr: None,
            contract: "KT1".to_string(),
            level,
            operation_index: 0,
            timestamp: DateTime::from_timestamp(0, 0).unwrap(),
        }
    }

    fn diff(level: i64) -> BigMapDiff {
        BigMapDiff {
            ptr: 7,
            key: vec![0, 1],
            key_hash: "exprK".to_string(),
            value: None,
            contract: "KT1".to_string(),
            level,
            operation_index: 0,
            timestamp: DateTime::from_timestamp(0, 0).unwrap(),
        }
    }

    #[test]
    fn alloc_then_remove() {
        let mut lc = Lifecycle::new(7);
        assert!(lc.apply_action(&action(ActionKind::Alloc, 1)));
        assert_eq!(lc.state(), PointerState::Live);
        assert!(lc.admit_diff(&diff(2)));
        assert!(lc.apply_action(&action(ActionKind::Remove, 3)));
        assert_eq!(lc.state(), PointerState::Retired);
        assert!(lc.anomalies().is_empty());
    }

    #[test]
    fn double_remove_is_noop_with_anomaly() {
        let mut lc = Lifecycle::new(7);
        lc.apply_action(&action(ActionKind::Alloc, 1));
        lc.apply_action(&action(ActionKind::Remove, 2));
        assert!(!lc.apply_action(&action(ActionKind::Remove, 3)));
        assert_eq!(lc.state(), PointerState::Retired);
        assert_eq!(lc.anomalies().len(), 1);
        assert_eq!(lc.anomalies()[0].kind, AnomalyKind::DuplicateRemove);
        assert_eq!(lc.anomalies()[0].level, 3);
    }

    #[test]
    fn diff_before_alloc_allocates_implicitly() {
        let mut lc = Lifecycle::new(7);
        assert!(lc.admit_diff(&diff(1)));
        assert_eq!(lc.state(), PointerState::Live);
        assert_eq!(lc.anomalies()[0].kind, AnomalyKind::DiffBeforeAlloc);
    }

    #[test]
    fn diff_after_remove_does_not_update_value() {
        let mut lc = Lifecycle::new(7);
        lc.apply_action(&action(ActionKind::Alloc, 1));
        lc.apply_action(&action(ActionKind::Remove, 2));
        assert!(!lc.admit_diff(&diff(3)));
        assert_eq!(lc.anomalies()[0].kind, AnomalyKind::DiffAfterRemove);
    }

    #[test]
    fn second_alloc_is_ignored() {
        let mut lc = Lifecycle::new(7);
        lc.apply_action(&action(ActionKind::Alloc, 1));
        assert!(!lc.apply_action(&action(ActionKind::Copy, 2)));
        assert_eq!(lc.state(), PointerState::Live);
        assert_eq!(lc.anomalies()[0].kind, AnomalyKind::DuplicateAlloc);
    }
}
