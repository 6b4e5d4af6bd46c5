//! Local embedded snapshot store.
//!
//! Holds exactly one persisted copy of the remote legend list under a fixed
//! key, so the picker can come up with real data before the network answers
//! (or without any network at all). Backed by SQLite like the response
//! cache, but kept as its own small database with its own version.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use tracing::warn;

use crate::legends::Legend;

/// Snapshot database file name inside the data directory.
pub const DB_FILE: &str = "litenkod.db";

const DB_VERSION: i64 = 1;
const LIST_KEY: &str = "list";

const SNAPSHOT_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS lists (
    key TEXT PRIMARY KEY,
    value BLOB NOT NULL,
    saved_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

/// Durable store for the single legend-list snapshot.
pub struct SnapshotStore {
  conn: Mutex<Connection>,
}

impl SnapshotStore {
  /// Open the store at an explicit path.
  pub fn open_at(path: &Path) -> Result<Self> {
    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open snapshot store at {}: {}", path.display(), e))?;
    Self::from_connection(conn)
  }

  /// Open an in-memory store (tests).
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory store: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self> {
    let store = Self {
      conn: Mutex::new(conn),
    };
    store.migrate()?;
    Ok(store)
  }

  /// Create the object container if absent. Idempotent: re-opening an
  /// existing compatible database leaves its contents untouched.
  fn migrate(&self) -> Result<()> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let version: i64 = conn
      .query_row("PRAGMA user_version", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to read schema version: {}", e))?;

    if version > DB_VERSION {
      return Err(eyre!(
        "Snapshot store version {} is newer than supported version {}",
        version,
        DB_VERSION
      ));
    }

    conn
      .execute_batch(SNAPSHOT_SCHEMA)
      .map_err(|e| eyre!("Failed to run snapshot migrations: {}", e))?;

    conn
      .pragma_update(None, "user_version", DB_VERSION)
      .map_err(|e| eyre!("Failed to set schema version: {}", e))?;

    Ok(())
  }

  /// Overwrite the snapshot. A single INSERT OR REPLACE, so readers never
  /// observe a partial write.
  pub fn save(&self, list: &[Legend]) -> Result<()> {
    let data =
      serde_json::to_vec(list).map_err(|e| eyre!("Failed to serialize snapshot: {}", e))?;

    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    conn
      .execute(
        "INSERT OR REPLACE INTO lists (key, value, saved_at) VALUES (?, ?, datetime('now'))",
        params![LIST_KEY, data],
      )
      .map_err(|e| eyre!("Failed to save snapshot: {}", e))?;

    Ok(())
  }

  /// Read the snapshot. `None` when nothing was ever saved or it was
  /// cleared. A snapshot that no longer deserializes is treated as absent
  /// rather than surfaced as an error.
  pub fn load(&self) -> Result<Option<Vec<Legend>>> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let data: Option<Vec<u8>> = conn
      .query_row(
        "SELECT value FROM lists WHERE key = ?",
        params![LIST_KEY],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to load snapshot: {}", e))?;

    let Some(data) = data else {
      return Ok(None);
    };

    match serde_json::from_slice(&data) {
      Ok(list) => Ok(Some(list)),
      Err(e) => {
        warn!("Discarding undecodable snapshot: {}", e);
        Ok(None)
      }
    }
  }

  /// Remove the snapshot entry.
  pub fn clear(&self) -> Result<()> {
    let conn = self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))?;
    conn
      .execute("DELETE FROM lists WHERE key = ?", params![LIST_KEY])
      .map_err(|e| eyre!("Failed to clear snapshot: {}", e))?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::legends::default_legends;

  #[test]
  fn test_load_without_save_is_absent() {
    let store = SnapshotStore::open_in_memory().unwrap();
    assert!(store.load().unwrap().is_none());
  }

  #[test]
  fn test_save_load_round_trip() {
    let store = SnapshotStore::open_in_memory().unwrap();
    let list = default_legends();
    store.save(&list).unwrap();
    assert_eq!(store.load().unwrap(), Some(list));
  }

  #[test]
  fn test_save_overwrites_single_key() {
    let store = SnapshotStore::open_in_memory().unwrap();
    let full = default_legends();
    let truncated = full[..3].to_vec();

    store.save(&full).unwrap();
    store.save(&truncated).unwrap();

    assert_eq!(store.load().unwrap(), Some(truncated));

    let conn = store.conn.lock().unwrap();
    let count: i64 = conn
      .query_row("SELECT COUNT(*) FROM lists", [], |row| row.get(0))
      .unwrap();
    assert_eq!(count, 1);
  }

  #[test]
  fn test_clear_then_load_is_absent() {
    let store = SnapshotStore::open_in_memory().unwrap();
    store.save(&default_legends()).unwrap();
    store.clear().unwrap();
    assert!(store.load().unwrap().is_none());
  }

  #[test]
  fn test_migration_is_idempotent() {
    let store = SnapshotStore::open_in_memory().unwrap();
    store.save(&default_legends()).unwrap();
    store.migrate().unwrap();
    assert!(store.load().unwrap().is_some());
  }

  #[test]
  fn test_corrupt_snapshot_reads_as_absent() {
    let store = SnapshotStore::open_in_memory().unwrap();
    {
      let conn = store.conn.lock().unwrap();
      conn
        .execute(
          "INSERT INTO lists (key, value) VALUES (?, ?)",
          params![LIST_KEY, b"not json".to_vec()],
        )
        .unwrap();
    }
    assert!(store.load().unwrap().is_none());
  }
}
