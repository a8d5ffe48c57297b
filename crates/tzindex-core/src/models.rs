//! Shared typed models used across the big map engine, storage, and query
//! layers.
//!
//! Rows reference pointers and contracts by identifier only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::EngineResult;
use crate::micheline::{decode, Node};

/// Position of an event in the chain: block level, then operation index
/// within the block.
pub type LogPoint = (i64, i64);

// ---------------------------------------------------------------------------
// 1. BigMapDiff
// ---------------------------------------------------------------------------

/// One logged key mutation. `value == None` is a deletion.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BigMapDiff {
    pub ptr: i64,
    /// Binary-encoded key.
    pub key: Vec<u8>,
    pub key_hash: String,
    /// Binary-encoded value.
    pub value: Option<Vec<u8>>,
    pub contract: String,
    pub level: i64,
    pub operation_index: i64,
    pub timestamp: DateTime<Utc>,
}

impl BigMapDiff {
    pub fn point(&self) -> LogPoint {
        (self.level, self.operation_index)
    }

    pub fn is_deletion(&self) -> bool {
        self.value.is_none()
    }

    pub fn key_node(&self) -> EngineResult<Node> {
        decode(&self.key)
    }

    pub fn value_node(&self) -> EngineResult<Option<Node>> {
        self.value.as_deref().map(decode).transpose()
    }
}

// ---------------------------------------------------------------------------
// 2. BigMapState
// ---------------------------------------------------------------------------

/// Latest state of one key of one pointer, materialized from its diffs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BigMapState {
    pub ptr: i64,
    pub key: Vec<u8>,
    pub key_hash: String,
    /// Latest value; `None` when the latest diff deleted the key.
    pub value: Option<Vec<u8>>,
    pub contract: String,
    pub last_update_level: i64,
    pub last_update_time: DateTime<Utc>,
    pub active: bool,
    /// Diffs that ever touched this key, including copied ones.
    pub count: i64,
    /// Pointer the key was copied from, when it entered through a copy.
    pub copied_from: Option<i64>,
}

impl BigMapState {
    pub fn key_node(&self) -> EngineResult<Node> {
        decode(&self.key)
    }

    pub fn value_node(&self) -> EngineResult<Option<Node>> {
        self.value.as_deref().map(decode).transpose()
    }
}

// ---------------------------------------------------------------------------
// 3. BigMapAction
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Alloc,
    Copy,
    Remove,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Alloc => "alloc",
            ActionKind::Copy => "copy",
            ActionKind::Remove => "remove",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "alloc" => Some(ActionKind::Alloc),
            "copy" => Some(ActionKind::Copy),
            "remove" => Some(ActionKind::Remove),
            _ => None,
        }
    }
}

/// Structural event on a pointer. For `Copy`, `ptr` is the destination and
/// `source_ptr` the pointer copied from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BigMapAction {
    pub kind: ActionKind,
    pub ptr: i64,
    pub source_ptr: Option<i64>,
    pub contract: String,
    pub level: i64,
    pub operation_index: i64,
    pub timestamp: DateTime<Utc>,
}

impl BigMapAction {
    pub fn point(&self) -> LogPoint {
        (self.level, self.operation_index)
    }

    /// Whether this action concerns `ptr`, as target or copy source.
    pub fn touches(&self, ptr: i64) -> bool {
        self.ptr == ptr || self.source_ptr == Some(ptr)
    }
}

// ---------------------------------------------------------------------------
// 4. Anomaly
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    /// Diff on a pointer with no prior alloc or copy; an implicit alloc was
    /// synthesized.
    DiffBeforeAlloc,
    /// Diff on a retired pointer; counted in the key history, value frozen.
    DiffAfterRemove,
    /// Second remove of a retired pointer; ignored.
    DuplicateRemove,
    /// Alloc or copy of a pointer that is already live or retired; ignored.
    DuplicateAlloc,
    /// Remove of a pointer that was never allocated.
    RemoveBeforeAlloc,
    /// Copy whose source pointer was never allocated.
    UnknownCopySource,
}

/// Irregularity found while replaying a pointer's log. Reconstruction
/// continues past every anomaly.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anomaly {
    pub kind: AnomalyKind,
    pub ptr: i64,
    pub level: i64,
    pub operation_index: i64,
    pub detail: String,
}
