//! The persistent, content-addressed symbol cache (`spec.md` §4.1, §6).
//!
//! A `rusqlite` (bundled SQLite) database at
//! `<project_root>/.lsmcp/cache/index.db`, keyed by
//! `(project_root, file_path, blob_hash)`. Each `(file_path, blob_hash)`
//! pair stores one row per *root* symbol, with `payload` holding the
//! bincode-encoded subtree (children included) and the remaining
//! columns denormalized for direct SQL inspection, per `SPEC_FULL.md`
//! §4.1's literal reading of `spec.md` §6's schema.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use rusqlite::{params, Connection};

use crate::error::LsmcpError;
use crate::model::symbol::IndexedSymbol;

/// Bumping this forces a wipe-and-reindex of all symbol rows on next open.
pub const SCHEMA_VERSION: i64 = 1;

pub struct PersistentCache {
    conn: Mutex<Connection>,
    project_root: String,
    requires_reindexing: AtomicBool,
}

impl PersistentCache {
    /// Opens (creating if absent) the cache database under
    /// `<project_root>/.lsmcp/cache/index.db`.
    pub fn open(project_root: impl AsRef<Path>) -> Result<Self, LsmcpError> {
        let project_root = project_root.as_ref();
        let cache_dir = project_root.join(".lsmcp").join("cache");
        std::fs::create_dir_all(&cache_dir).map_err(LsmcpError::Io)?;
        Self::open_at(&cache_dir.join("index.db"), &project_root.to_string_lossy())
    }

    /// Opens a cache at an explicit database path; split out from `open`
    /// so tests can point at a temp file without a `.lsmcp` layout.
    pub fn open_at(db_path: &Path, project_root: &str) -> Result<Self, LsmcpError> {
        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);
             CREATE TABLE IF NOT EXISTS symbols (
                project_root   TEXT NOT NULL,
                file_path      TEXT NOT NULL,
                blob_hash      TEXT NOT NULL,
                name_path      TEXT NOT NULL,
                start_line     INTEGER NOT NULL,
                start_char     INTEGER NOT NULL,
                end_line       INTEGER NOT NULL,
                end_char       INTEGER NOT NULL,
                kind           INTEGER NOT NULL,
                container_name TEXT,
                payload        BLOB NOT NULL,
                PRIMARY KEY (project_root, file_path, blob_hash, name_path, start_line, start_char)
             );",
        )?;

        let stored_version: Option<i64> =
            conn.query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0)).ok();

        let requires_reindexing = match stored_version {
            None => {
                conn.execute("INSERT INTO schema_version (version) VALUES (?1)", params![SCHEMA_VERSION])?;
                false
            }
            Some(v) if v < SCHEMA_VERSION => {
                conn.execute_batch("DELETE FROM symbols;")?;
                conn.execute("UPDATE schema_version SET version = ?1", params![SCHEMA_VERSION])?;
                true
            }
            Some(_) => false,
        };

        Ok(Self {
            conn: Mutex::new(conn),
            project_root: project_root.to_string(),
            requires_reindexing: AtomicBool::new(requires_reindexing),
        })
    }

    /// True after a schema-version bump wiped the cache; callers MUST
    /// treat this as "reindex required" and call
    /// [`PersistentCache::mark_reindex_complete`] once they have.
    pub fn requires_reindexing(&self) -> bool {
        self.requires_reindexing.load(Ordering::SeqCst)
    }

    pub fn mark_reindex_complete(&self) {
        self.requires_reindexing.store(false, Ordering::SeqCst);
    }

    /// Looks up symbols for `file_path` at exactly `blob_hash`. Read
    /// errors degrade to a miss (logged, not propagated); a present row
    /// whose hash doesn't match `blob_hash` is a cache miss by
    /// construction (the hash is part of the primary key).
    pub fn get(&self, file_path: &str, blob_hash: &str) -> Option<Vec<IndexedSymbol>> {
        match self.get_inner(file_path, blob_hash) {
            Ok(symbols) => symbols,
            Err(e) => {
                tracing::warn!(file_path, error = %e, "persistent cache read failed; treating as miss");
                None
            }
        }
    }

    fn get_inner(&self, file_path: &str, blob_hash: &str) -> Result<Option<Vec<IndexedSymbol>>, LsmcpError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT payload FROM symbols
             WHERE project_root = ?1 AND file_path = ?2 AND blob_hash = ?3
             ORDER BY start_line, start_char",
        )?;
        let rows = stmt
            .query_map(params![self.project_root, file_path, blob_hash], |row| {
                let payload: Vec<u8> = row.get(0)?;
                Ok(payload)
            })?
            .collect::<Result<Vec<_>, _>>()?;

        if rows.is_empty() {
            return Ok(None);
        }

        let mut symbols = Vec::with_capacity(rows.len());
        for payload in rows {
            let symbol: IndexedSymbol = bincode::deserialize(&payload)
                .map_err(|e| LsmcpError::Other(format!("corrupt cache payload: {e}")))?;
            symbols.push(symbol);
        }
        Ok(Some(symbols))
    }

    /// Replaces all rows for `(file_path, blob_hash)` with `symbols`.
    /// Write errors propagate so the caller may retry.
    pub fn set(&self, file_path: &str, blob_hash: &str, symbols: &[IndexedSymbol]) -> Result<(), LsmcpError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM symbols WHERE project_root = ?1 AND file_path = ?2 AND blob_hash = ?3",
            params![self.project_root, file_path, blob_hash],
        )?;

        for symbol in symbols {
            let payload = bincode::serialize(symbol)
                .map_err(|e| LsmcpError::Other(format!("failed to serialize symbol: {e}")))?;
            tx.execute(
                "INSERT INTO symbols
                    (project_root, file_path, blob_hash, name_path, start_line, start_char,
                     end_line, end_char, kind, container_name, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    self.project_root,
                    file_path,
                    blob_hash,
                    symbol.name,
                    symbol.location.range.start.line,
                    symbol.location.range.start.character,
                    symbol.location.range.end.line,
                    symbol.location.range.end.character,
                    symbol.kind as u8,
                    symbol.container_name,
                    payload,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Empties the cache entirely (`force_clear` in `spec.md` §4.4.5).
    pub fn clear(&self) -> Result<(), LsmcpError> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM symbols", [])?;
        Ok(())
    }
}

pub fn default_cache_path(project_root: &Path) -> PathBuf {
    project_root.join(".lsmcp").join("cache").join("index.db")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::position::{Location, Position, Range};
    use crate::model::symbol::SymbolKind;
    use url::Url;

    fn sample_symbol(name: &str) -> IndexedSymbol {
        IndexedSymbol {
            name: name.to_string(),
            kind: SymbolKind::Function,
            location: Location::new(
                Url::parse("file:///a.ts").unwrap(),
                Range::new(Position::new(0, 0), Position::new(1, 0)),
            ),
            container_name: None,
            deprecated: false,
            detail: None,
            children: vec![],
        }
    }

    #[test]
    fn round_trips_symbols() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PersistentCache::open_at(&dir.path().join("index.db"), "/proj").unwrap();
        let symbols = vec![sample_symbol("add")];
        cache.set("a.ts", "hash1", &symbols).unwrap();

        let fetched = cache.get("a.ts", "hash1").unwrap();
        assert_eq!(fetched, symbols);
    }

    #[test]
    fn mismatched_hash_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = PersistentCache::open_at(&dir.path().join("index.db"), "/proj").unwrap();
        cache.set("a.ts", "hash1", &[sample_symbol("add")]).unwrap();
        assert!(cache.get("a.ts", "hash2").is_none());
    }

    #[test]
    fn reopening_at_same_version_does_not_require_reindex() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("index.db");
        {
            let cache = PersistentCache::open_at(&db_path, "/proj").unwrap();
            assert!(!cache.requires_reindexing());
            cache.set("a.ts", "hash1", &[sample_symbol("add")]).unwrap();
        }
        let cache = PersistentCache::open_at(&db_path, "/proj").unwrap();
        assert!(!cache.requires_reindexing());
        assert!(cache.get("a.ts", "hash1").is_some());
    }

    #[test]
    fn schema_bump_wipes_symbols_and_flags_reindex() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("index.db");
        {
            let cache = PersistentCache::open_at(&db_path, "/proj").unwrap();
            cache.set("a.ts", "hash1", &[sample_symbol("add")]).unwrap();
        }
        // Simulate a schema bump by rewriting the stored version to 0.
        {
            let conn = Connection::open(&db_path).unwrap();
            conn.execute("UPDATE schema_version SET version = 0", []).unwrap();
        }
        let cache = PersistentCache::open_at(&db_path, "/proj").unwrap();
        assert!(cache.requires_reindexing());
        assert!(cache.get("a.ts", "hash1").is_none());
        cache.mark_reindex_complete();
        assert!(!cache.requires_reindexing());
    }
}
