//! SQLite schema DDL and migration framework for the big map log.

use rusqlite::{params, Connection};
use tracing::debug;

use crate::errors::EngineResult;

/// Current schema version. Migrations run from whatever the DB currently
/// reports up to this value.
pub const SCHEMA_VERSION: i32 = 3;

/// Core DDL: 5 CREATE TABLE + 6 CREATE INDEX, all `IF NOT EXISTS` so they
/// replay safely on an initialised database.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    // ── tables (5) ──────────────────────────────────────────────────────
    "CREATE TABLE IF NOT EXISTS store_meta (
        key TEXT PRIMARY KEY,
        value TEXT
    );",
    "CREATE TABLE IF NOT EXISTS migration_history (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        from_version INTEGER NOT NULL,
        to_version INTEGER NOT NULL,
        status TEXT NOT NULL,
        error_message TEXT,
        created_at TEXT DEFAULT CURRENT_TIMESTAMP
    );",
    "CREATE TABLE IF NOT EXISTS big_map_diffs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        ptr INTEGER NOT NULL,
        key BLOB NOT NULL,
        key_hash TEXT NOT NULL,
        value BLOB,
        contract TEXT NOT NULL,
        level INTEGER NOT NULL,
        operation_index INTEGER NOT NULL,
        timestamp TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS big_map_actions (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        action TEXT NOT NULL,
        ptr INTEGER NOT NULL,
        source_ptr INTEGER,
        contract TEXT NOT NULL,
        level INTEGER NOT NULL,
        operation_index INTEGER NOT NULL,
        timestamp TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS big_map_states (
        ptr INTEGER NOT NULL,
        key_hash TEXT NOT NULL,
        key BLOB NOT NULL,
        value BLOB,
        contract TEXT NOT NULL,
        last_update_level INTEGER NOT NULL,
        last_update_time TEXT NOT NULL,
        active INTEGER NOT NULL,
        count INTEGER NOT NULL DEFAULT 0,
        copied_from INTEGER,
        PRIMARY KEY(ptr, key_hash)
    );",
    // ── indexes (6) ─────────────────────────────────────────────────────
    "CREATE INDEX IF NOT EXISTS idx_diffs_ptr_point ON big_map_diffs(ptr, level, operation_index);",
    "CREATE INDEX IF NOT EXISTS idx_diffs_ptr_key ON big_map_diffs(ptr, key_hash, level);",
    "CREATE INDEX IF NOT EXISTS idx_diffs_contract ON big_map_diffs(contract, level);",
    "CREATE INDEX IF NOT EXISTS idx_actions_ptr ON big_map_actions(ptr, level, operation_index);",
    "CREATE INDEX IF NOT EXISTS idx_actions_source ON big_map_actions(source_ptr);",
    "CREATE INDEX IF NOT EXISTS idx_states_contract ON big_map_states(contract, active);",
];

// ─── Migration framework ────────────────────────────────────────────────────

type MigrationStep = fn(&Connection) -> EngineResult<()>;

/// Steps indexed by the version they produce, starting at 1.
const MIGRATIONS: [MigrationStep; SCHEMA_VERSION as usize] = [baseline, key_history_indexes, copy_provenance];

const STEP_SAVEPOINT: &str = "tzindex_migrate_step";

/// Bring the store from its recorded version up to [`SCHEMA_VERSION`].
/// A failing step is rolled back on its own and logged in
/// `migration_history` before the error is returned.
pub fn migrate_schema(conn: &Connection) -> EngineResult<()> {
    let from = get_schema_version(conn).max(0);
    for target in (from + 1)..=SCHEMA_VERSION {
        let step = MIGRATIONS[(target - 1) as usize];
        conn.execute_batch(&format!("SAVEPOINT {STEP_SAVEPOINT};"))?;
        let applied = step(conn)
            .and_then(|()| set_schema_version(conn, target))
            .and_then(|()| record_migration_step(conn, target - 1, target, "success", None));
        if let Err(err) = applied {
            let _ = conn.execute_batch(&format!(
                "ROLLBACK TO SAVEPOINT {STEP_SAVEPOINT}; RELEASE SAVEPOINT {STEP_SAVEPOINT};"
            ));
            let _ = record_migration_step(conn, target - 1, target, "failed", Some(&err.to_string()));
            return Err(err);
        }
        conn.execute_batch(&format!("RELEASE SAVEPOINT {STEP_SAVEPOINT};"))?;
        debug!(version = target, "big map store migrated");
    }
    Ok(())
}

/// Stored schema version; 0 when absent or unparseable.
pub(crate) fn get_schema_version(conn: &Connection) -> i32 {
    conn.query_row(
        "SELECT value FROM store_meta WHERE key = 'schema_version';",
        [],
        |row| row.get::<_, String>(0),
    )
    .ok()
    .and_then(|raw| raw.parse().ok())
    .unwrap_or(0)
}

fn set_schema_version(conn: &Connection, version: i32) -> EngineResult<()> {
    conn.execute(
        "INSERT INTO store_meta(key, value) \
         VALUES('schema_version', ?1) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value;",
        params![version.to_string()],
    )?;
    Ok(())
}

fn record_migration_step(
    conn: &Connection,
    from: i32,
    to: i32,
    status: &str,
    error: Option<&str>,
) -> EngineResult<()> {
    conn.execute(
        "INSERT INTO migration_history(from_version, to_version, status, error_message) \
         VALUES (?1, ?2, ?3, ?4);",
        params![from, to, status, error],
    )?;
    Ok(())
}

fn has_column(conn: &Connection, table: &str, column: &str) -> EngineResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    for name in names {
        if name? == column {
            return Ok(true);
        }
    }
    Ok(false)
}

// ─── Individual migration steps ─────────────────────────────────────────────

/// v0 -> v1: baseline, created by [`SCHEMA_STATEMENTS`].
fn baseline(_conn: &Connection) -> EngineResult<()> {
    Ok(())
}

/// v1 -> v2: per-key history and contract lookups.
fn key_history_indexes(conn: &Connection) -> EngineResult<()> {
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_diffs_ptr_key ON big_map_diffs(ptr, key_hash, level);
         CREATE INDEX IF NOT EXISTS idx_diffs_contract ON big_map_diffs(contract, level);",
    )?;
    Ok(())
}

/// v2 -> v3: copy provenance on states and the copy-source index.
fn copy_provenance(conn: &Connection) -> EngineResult<()> {
    if !has_column(conn, "big_map_states", "copied_from")? {
        conn.execute_batch("ALTER TABLE big_map_states ADD COLUMN copied_from INTEGER;")?;
    }
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_actions_source ON big_map_actions(source_ptr);",
    )?;
    Ok(())
}
