//! SQLite storage for the big map log.
//!
//! Each public method opens its own connection so that the caller never has
//! to manage connection lifetime.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use tracing::{debug, info};

use crate::bigmap::Reconstruction;
use crate::errors::{EngineError, EngineResult};
use crate::models::{ActionKind, BigMapAction, BigMapDiff, BigMapState};
use crate::store::{schema, DiffSource};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let text = path.to_string_lossy();
    if text == "~" || text.starts_with("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            let mut expanded = PathBuf::from(home);
            if text.len() > 2 {
                expanded.push(&text[2..]);
            }
            return expanded;
        }
    }
    path.to_path_buf()
}

fn timestamp_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

const DIFF_COLUMNS: &str =
    "ptr, key, key_hash, value, contract, level, operation_index, timestamp";

fn diff_from_row(row: &Row<'_>) -> rusqlite::Result<BigMapDiff> {
    Ok(BigMapDiff {
        ptr: row.get(0)?,
        key: row.get(1)?,
        key_hash: row.get(2)?,
        value: row.get(3)?,
        contract: row.get(4)?,
        level: row.get(5)?,
        operation_index: row.get(6)?,
        timestamp: timestamp_at(row, 7)?,
    })
}

const ACTION_COLUMNS: &str = "action, ptr, source_ptr, contract, level, operation_index, timestamp";

fn action_from_row(row: &Row<'_>) -> rusqlite::Result<BigMapAction> {
    let name: String = row.get(0)?;
    let kind = ActionKind::parse(&name).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            Type::Text,
            format!("unknown big map action {name:?}").into(),
        )
    })?;
    Ok(BigMapAction {
        kind,
        ptr: row.get(1)?,
        source_ptr: row.get(2)?,
        contract: row.get(3)?,
        level: row.get(4)?,
        operation_index: row.get(5)?,
        timestamp: timestamp_at(row, 6)?,
    })
}

fn state_from_row(row: &Row<'_>) -> rusqlite::Result<BigMapState> {
    Ok(BigMapState {
        ptr: row.get(0)?,
        key_hash: row.get(1)?,
        key: row.get(2)?,
        value: row.get(3)?,
        contract: row.get(4)?,
        last_update_level: row.get(5)?,
        last_update_time: timestamp_at(row, 6)?,
        active: row.get(7)?,
        count: row.get(8)?,
        copied_from: row.get(9)?,
    })
}

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct Database {
    db_path: PathBuf,
}

impl Database {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: expand_tilde(db_path.as_ref()),
        }
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn connect(&self) -> EngineResult<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(conn)
    }

    /// Create tables and run pending migrations.
    pub fn init_schema(&self) -> EngineResult<()> {
        let conn = self.connect()?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        for stmt in schema::SCHEMA_STATEMENTS {
            conn.execute_batch(stmt)?;
        }
        schema::migrate_schema(&conn)?;
        debug!(path = %self.db_path.display(), "schema ready");
        Ok(())
    }

    pub fn schema_version(&self) -> EngineResult<i32> {
        Ok(schema::get_schema_version(&self.connect()?))
    }

    // -----------------------------------------------------------------------
    // Log writes
    // -----------------------------------------------------------------------

    /// Append diffs in one transaction.
    pub fn insert_diffs(&self, diffs: &[BigMapDiff]) -> EngineResult<usize> {
        if diffs.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO big_map_diffs ({DIFF_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);"
            ))?;
            for d in diffs {
                stmt.execute(params![
                    d.ptr,
                    d.key,
                    d.key_hash,
                    d.value,
                    d.contract,
                    d.level,
                    d.operation_index,
                    d.timestamp.to_rfc3339(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(diffs.len())
    }

    pub fn insert_actions(&self, actions: &[BigMapAction]) -> EngineResult<usize> {
        if actions.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO big_map_actions ({ACTION_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);"
            ))?;
            for a in actions {
                stmt.execute(params![
                    a.kind.as_str(),
                    a.ptr,
                    a.source_ptr,
                    a.contract,
                    a.level,
                    a.operation_index,
                    a.timestamp.to_rfc3339(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(actions.len())
    }

    // -----------------------------------------------------------------------
    // Materialized states
    // -----------------------------------------------------------------------

    /// Replace the stored states of every reconstructed pointer.
    pub fn save_states(&self, reconstruction: &Reconstruction) -> EngineResult<usize> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let mut written = 0usize;
        {
            let mut clear = tx.prepare("DELETE FROM big_map_states WHERE ptr = ?1;")?;
            let mut insert = tx.prepare(
                "INSERT INTO big_map_states \
                 (ptr, key_hash, key, value, contract, last_update_level, last_update_time, \
                  active, count, copied_from) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10);",
            )?;
            for pointer in &reconstruction.pointers {
                clear.execute(params![pointer.ptr])?;
                for s in pointer.states() {
                    insert.execute(params![
                        s.ptr,
                        s.key_hash,
                        s.key,
                        s.value,
                        s.contract,
                        s.last_update_level,
                        s.last_update_time.to_rfc3339(),
                        s.active,
                        s.count,
                        s.copied_from,
                    ])?;
                    written += 1;
                }
            }
        }
        tx.commit()?;
        info!(
            pointers = reconstruction.pointers.len(),
            states = written,
            "big map states saved"
        );
        Ok(written)
    }

    pub fn load_states(&self, ptr: i64) -> EngineResult<Vec<BigMapState>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT ptr, key_hash, key, value, contract, last_update_level, last_update_time, \
                    active, count, copied_from \
             FROM big_map_states WHERE ptr = ?1 \
             ORDER BY last_update_level DESC, key_hash;",
        )?;
        let rows = stmt.query_map(params![ptr], state_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // -----------------------------------------------------------------------
    // Backup
    // -----------------------------------------------------------------------

    /// Copy the database to `destination` through the SQLite backup API.
    pub fn backup_to(&self, destination: impl AsRef<Path>) -> EngineResult<PathBuf> {
        let resolved = expand_tilde(destination.as_ref());
        if let Some(parent) = resolved.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| EngineError::Database(format!("create {}: {e}", parent.display())))?;
        }
        let src_conn = self.connect()?;
        let mut dst_conn = Connection::open(&resolved)?;
        let backup = rusqlite::backup::Backup::new(&src_conn, &mut dst_conn)?;
        backup.run_to_completion(100, std::time::Duration::from_millis(10), None)?;
        Ok(resolved)
    }

    fn select_diffs(&self, filter: &str, bind: &[&dyn rusqlite::ToSql]) -> EngineResult<Vec<BigMapDiff>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {DIFF_COLUMNS} FROM big_map_diffs WHERE {filter} \
             ORDER BY level, operation_index, id;"
        ))?;
        let rows = stmt.query_map(bind, diff_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

impl DiffSource for Database {
    fn diffs_by_ptr(&self, ptr: i64, max_level: Option<i64>) -> EngineResult<Vec<BigMapDiff>> {
        match max_level {
            Some(max) => self.select_diffs("ptr = ?1 AND level <= ?2", &[&ptr, &max]),
            None => self.select_diffs("ptr = ?1", &[&ptr]),
        }
    }

    fn diffs_by_contract(&self, contract: &str) -> EngineResult<Vec<BigMapDiff>> {
        self.select_diffs("contract = ?1", &[&contract])
    }

    fn diffs_by_key(&self, ptr: i64, key_hash: &str) -> EngineResult<Vec<BigMapDiff>> {
        self.select_diffs("ptr = ?1 AND key_hash = ?2", &[&ptr, &key_hash])
    }

    fn actions_by_ptr(&self, ptr: i64) -> EngineResult<Vec<BigMapAction>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ACTION_COLUMNS} FROM big_map_actions \
             WHERE ptr = ?1 OR source_ptr = ?1 \
             ORDER BY level, operation_index, id;"
        ))?;
        let rows = stmt.query_map(params![ptr], action_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn count_diffs(&self, ptr: i64) -> EngineResult<usize> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM big_map_diffs WHERE ptr = ?1;",
            params![ptr],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    use crate::bigmap::{encoded_hash, reconstruct, ReconstructOptions};
    use crate::micheline::{encode, Node};

    fn open() -> (TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("bigmaps.db"));
        db.init_schema().unwrap();
        (dir, db)
    }

    fn diff(ptr: i64, level: i64, op: i64, key: &str, value: Option<i64>) -> BigMapDiff {
        let key = encode(&Node::string(key)).unwrap();
        BigMapDiff {
            ptr,
            key_hash: encoded_hash(&key),
            key,
            value: value.map(|v| encode(&Node::int(v)).unwrap()),
            contract: "KT1Ledger".to_string(),
            level,
            operation_index: op,
            timestamp: DateTime::from_timestamp(1_700_000_000 + level, 0).unwrap(),
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
            timestamp: DateTime::from_timestamp(1_700_000_000 + level, 0).unwrap(),
        }
    }

    #[test]
    fn init_schema_is_idempotent() {
        let (_dir, db) = open();
        db.init_schema().unwrap();
        assert_eq!(db.schema_version().unwrap(), schema::SCHEMA_VERSION);
    }

    #[test]
    fn diffs_round_trip_in_point_order() {
        let (_dir, db) = open();
        let rows = vec![
            diff(4, 10, 3, "a", Some(1)),
            diff(4, 10, 1, "b", None),
            diff(4, 2, 0, "a", Some(7)),
            diff(5, 1, 0, "z", Some(0)),
        ];
        assert_eq!(db.insert_diffs(&rows).unwrap(), 4);
        let loaded = db.diffs_by_ptr(4, None).unwrap();
        assert_eq!(loaded, vec![rows[2].clone(), rows[1].clone(), rows[0].clone()]);
        assert_eq!(db.diffs_by_ptr(4, Some(5)).unwrap().len(), 1);
        assert_eq!(db.diffs_by_key(4, &rows[0].key_hash).unwrap().len(), 2);
        assert_eq!(db.diffs_by_contract("KT1Ledger").unwrap().len(), 4);
        assert_eq!(db.count_diffs(4).unwrap(), 3);
    }

    #[test]
    fn actions_include_copy_sources() {
        let (_dir, db) = open();
        db.insert_actions(&[
            action(ActionKind::Alloc, 1, None, 1),
            action(ActionKind::Copy, 2, Some(1), 3),
            action(ActionKind::Remove, 1, None, 4),
        ])
        .unwrap();
        let kinds: Vec<ActionKind> = db.actions_by_ptr(1).unwrap().iter().map(|a| a.kind).collect();
        assert_eq!(kinds, vec![ActionKind::Alloc, ActionKind::Copy, ActionKind::Remove]);
        assert_eq!(db.actions_by_ptr(2).unwrap()[0].source_ptr, Some(1));
    }

    #[test]
    fn save_states_replaces_previous_rows() {
        let (_dir, db) = open();
        let mut rows = vec![diff(7, 1, 0, "a", Some(1)), diff(7, 2, 0, "b", Some(2))];
        db.insert_diffs(&rows).unwrap();
        let options = ReconstructOptions::default();
        let first = reconstruct(&rows, &[], &options);
        assert_eq!(db.save_states(&first).unwrap(), 2);

        rows.push(diff(7, 3, 0, "a", None));
        let second = reconstruct(&rows, &[], &options);
        assert_eq!(db.save_states(&second).unwrap(), 2);

        let states = db.load_states(7).unwrap();
        assert_eq!(states.len(), 2);
        let a = states.iter().find(|s| s.key_hash == rows[0].key_hash).unwrap();
        assert!(!a.active);
        assert_eq!(a.count, 2);
        assert_eq!(a.last_update_level, 3);
        assert_eq!(a.last_update_time, rows[2].timestamp);
    }

    #[test]
    fn backup_copies_rows() {
        let (dir, db) = open();
        db.insert_diffs(&[diff(1, 1, 0, "a", Some(1))]).unwrap();
        let target = db.backup_to(dir.path().join("nested").join("copy.db")).unwrap();
        let copy = Database::new(&target);
        assert_eq!(copy.count_diffs(1).unwrap(), 1);
    }
}
