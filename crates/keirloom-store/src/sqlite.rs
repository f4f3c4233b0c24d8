//! SQLite persistence
//!
//! One `documents` table keyed by `(case_id, collection, doc_id)` with the
//! JSON value as text, plus a `leases` table for per-case execution leases.
//! WAL mode for concurrent readers.

use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;

use crate::{unix_now, CaseStore, StoreError};

/// A [`CaseStore`] backed by SQLite.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and run migrations.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(sql_err)?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(sql_err)?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS documents (
                case_id    TEXT NOT NULL,
                collection TEXT NOT NULL,
                doc_id     TEXT NOT NULL,
                value      TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (case_id, collection, doc_id)
            );

            CREATE TABLE IF NOT EXISTS leases (
                case_id    TEXT PRIMARY KEY,
                holder     TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            );
            ",
        )
        .map_err(sql_err)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T, StoreError> {
        let conn = self.conn.lock().map_err(|e| StoreError::Io(e.to_string()))?;
        f(&conn).map_err(sql_err)
    }
}

fn sql_err(e: rusqlite::Error) -> StoreError {
    StoreError::Io(e.to_string())
}

impl CaseStore for SqliteStore {
    fn get(
        &self,
        case_id: &str,
        collection: &str,
        doc_id: &str,
    ) -> Result<Option<String>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT value FROM documents
                 WHERE case_id = ?1 AND collection = ?2 AND doc_id = ?3",
            )?;
            let mut rows = stmt.query(params![case_id, collection, doc_id])?;
            match rows.next()? {
                Some(row) => Ok(Some(row.get(0)?)),
                None => Ok(None),
            }
        })
    }

    fn set(
        &self,
        case_id: &str,
        collection: &str,
        doc_id: &str,
        value: &str,
    ) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO documents (case_id, collection, doc_id, value, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(case_id, collection, doc_id)
                 DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![case_id, collection, doc_id, value, unix_now()],
            )?;
            Ok(())
        })
    }

    fn delete(&self, case_id: &str, collection: &str, doc_id: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM documents
                 WHERE case_id = ?1 AND collection = ?2 AND doc_id = ?3",
                params![case_id, collection, doc_id],
            )?;
            Ok(())
        })
    }

    fn list(&self, case_id: &str, collection: &str) -> Result<Vec<(String, String)>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT doc_id, value FROM documents
                 WHERE case_id = ?1 AND collection = ?2
                 ORDER BY doc_id",
            )?;
            let rows = stmt.query_map(params![case_id, collection], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?;
            rows.collect()
        })
    }

    fn delete_all(&self, case_id: &str, collection: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM documents WHERE case_id = ?1 AND collection = ?2",
                params![case_id, collection],
            )?;
            Ok(())
        })
    }

    fn list_case_ids(&self) -> Result<Vec<String>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare_cached("SELECT DISTINCT case_id FROM documents ORDER BY case_id")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect()
        })
    }

    fn acquire_lease(
        &self,
        case_id: &str,
        holder: &str,
        ttl_secs: u64,
    ) -> Result<bool, StoreError> {
        self.with_conn(|conn| {
            let now = unix_now();
            // Insert a fresh lease, or steal one whose TTL has elapsed
            let changed = conn.execute(
                "INSERT INTO leases (case_id, holder, expires_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(case_id) DO UPDATE
                 SET holder = excluded.holder, expires_at = excluded.expires_at
                 WHERE leases.expires_at <= ?4 OR leases.holder = excluded.holder",
                params![case_id, holder, now + ttl_secs, now],
            )?;
            Ok(changed > 0)
        })
    }

    fn release_lease(&self, case_id: &str, holder: &str) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM leases WHERE case_id = ?1 AND holder = ?2",
                params![case_id, holder],
            )?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_temp() -> (TempDir, SqliteStore) {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::open(&dir.path().join("cases.db")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_round_trip() {
        let (_dir, store) = open_temp();
        store.set("case-1", "items", "a", "{\"v\":1}").unwrap();
        store.set("case-1", "items", "a", "{\"v\":2}").unwrap();

        assert_eq!(
            store.get("case-1", "items", "a").unwrap().as_deref(),
            Some("{\"v\":2}")
        );
        assert!(store.get("case-1", "items", "b").unwrap().is_none());
    }

    #[test]
    fn test_listing_ordered_and_scoped() {
        let (_dir, store) = open_temp();
        store.set("case-1", "items", "b", "2").unwrap();
        store.set("case-1", "items", "a", "1").unwrap();
        store.set("case-2", "items", "c", "3").unwrap();

        let listed = store.list("case-1", "items").unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].0, "a");

        assert_eq!(store.list_case_ids().unwrap(), vec!["case-1", "case-2"]);

        store.delete_all("case-1", "items").unwrap();
        assert!(store.list("case-1", "items").unwrap().is_empty());
    }

    #[test]
    fn test_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cases.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.set("case-1", "state", "lock", "{\"s\":\"READY\"}").unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(
            store.get("case-1", "state", "lock").unwrap().as_deref(),
            Some("{\"s\":\"READY\"}")
        );
    }

    #[test]
    fn test_lease_lifecycle() {
        let (_dir, store) = open_temp();
        assert!(store.acquire_lease("case-1", "holder-a", 60).unwrap());
        assert!(!store.acquire_lease("case-1", "holder-b", 60).unwrap());

        store.release_lease("case-1", "holder-a").unwrap();
        assert!(store.acquire_lease("case-1", "holder-b", 60).unwrap());

        // ttl 0 expires immediately and may be stolen
        store.release_lease("case-1", "holder-b").unwrap();
        assert!(store.acquire_lease("case-1", "holder-a", 0).unwrap());
        assert!(store.acquire_lease("case-1", "holder-c", 60).unwrap());
    }
}
