//! Session database module - SQLite-backed storage for conversation turns,
//! analysis results, preferences, upload audit entries and usage counters.
pub mod schema;
pub mod migration;
pub mod conversation_store;
pub mod analysis_store;
pub mod preference_store;
pub mod upload_store;
pub mod usage_store;
pub use schema::*;
pub use migration::{MigrationManager, PurgeSummary};
pub use conversation_store::ConversationStore;
pub use analysis_store::AnalysisStore;
pub use preference_store::PreferenceStore;
pub use upload_store::UploadStore;
pub use usage_store::UsageStore;

use dashmap::DashMap;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::StoreError;

pub(crate) type SqlitePool = Pool<SqliteConnectionManager>;

/// Owner of the connection pool and of every per-table store.
///
/// One instance is shared (behind an `Arc`) by all session handles; it holds
/// no session state of its own apart from the per-session write locks.
pub struct SessionDatabase {
    pub conversations: ConversationStore,
    pub analyses: AnalysisStore,
    pub preferences: PreferenceStore,
    pub uploads: UploadStore,
    pub usage: UsageStore,
    pool: Arc<SqlitePool>,
    path: Option<PathBuf>,
    write_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl SessionDatabase {
    /// Open (or create) the database file, applying pending migrations.
    pub fn open(db_path: &Path, pool_size: u32) -> Result<Self, StoreError> {
        info!("Opening session database at: {}", db_path.display());
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let manager = SqliteConnectionManager::file(db_path)
            .with_flags(
                rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                    | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                    | rusqlite::OpenFlags::SQLITE_OPEN_FULL_MUTEX,
            )
            .with_init(|conn| {
                conn.execute_batch(
                    "PRAGMA busy_timeout = 5000;
                     PRAGMA synchronous = NORMAL;",
                )
            });
        let pool = Pool::builder().max_size(pool_size.max(1)).build(manager)?;

        {
            let mut conn = pool.get()?;
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
            MigrationManager::new(&mut conn).initialize_database()?;
        }
        info!("Session database initialized successfully");
        Ok(Self::from_pool(pool, Some(db_path.to_path_buf())))
    }

    /// Private in-memory database. The pool holds a single long-lived
    /// connection, since every SQLite in-memory connection is its own database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .build(manager)?;
        {
            let mut conn = pool.get()?;
            MigrationManager::new(&mut conn).initialize_database()?;
        }
        debug!("In-memory session database initialized");
        Ok(Self::from_pool(pool, None))
    }

    fn from_pool(pool: SqlitePool, path: Option<PathBuf>) -> Self {
        let pool = Arc::new(pool);
        Self {
            conversations: ConversationStore::new(Arc::clone(&pool)),
            analyses: AnalysisStore::new(Arc::clone(&pool)),
            preferences: PreferenceStore::new(Arc::clone(&pool)),
            uploads: UploadStore::new(Arc::clone(&pool)),
            usage: UsageStore::new(Arc::clone(&pool)),
            pool,
            path,
            write_locks: DashMap::new(),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Async mutex serializing writes within one session.
    pub fn session_lock(&self, session_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.write_locks
            .entry(session_id.to_string())
            .or_default()
            .clone()
    }

    /// Forget a session's write lock unless some handle still holds it.
    pub fn release_session_lock(&self, session_id: &str) -> bool {
        self.write_locks
            .remove_if(session_id, |_, lock| Arc::strong_count(lock) == 1)
            .is_some()
    }

    /// Number of sessions with a tracked write lock.
    pub fn tracked_session_locks(&self) -> usize {
        self.write_locks.len()
    }

    /// Run `f` inside an IMMEDIATE transaction; rolls back when `f` fails.
    pub fn with_transaction<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> Result<T, StoreError>,
    {
        immediate(&self.pool, f)
    }

    pub fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>, StoreError> {
        let conn = self.pool.get()?;
        let row = conn
            .query_row(
                "SELECT id, created_at, last_active FROM sessions WHERE id = ?1",
                [session_id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?)),
            )
            .optional()?;
        row.map(|(id, created_at, last_active)| {
            Ok(SessionRecord {
                id,
                created_at: parse_timestamp(&created_at)?,
                last_active: parse_timestamp(&last_active)?,
            })
        })
        .transpose()
    }

    /// Delete every record of a session across all tables, atomically.
    pub fn clear_session(&self, session_id: &str) -> Result<usize, StoreError> {
        let deleted = self.with_transaction(|tx| {
            let mut deleted = 0;
            for table in RECORD_TABLES {
                deleted += tx.execute(
                    &format!("DELETE FROM {} WHERE session_id = ?1", table),
                    [session_id],
                )?;
            }
            deleted += tx.execute("DELETE FROM sessions WHERE id = ?1", [session_id])?;
            Ok(deleted)
        })?;
        info!("Cleared {} records for session {}", deleted, session_id);
        Ok(deleted)
    }

    pub fn info(&self) -> Result<DatabaseInfo, StoreError> {
        let mut conn = self.pool.get()?;
        let table_counts = migration::get_table_counts(&conn)?;
        let database_size_bytes = migration::get_database_size(&conn)?;
        let schema_version = MigrationManager::new(&mut conn).get_current_version()?;
        Ok(DatabaseInfo {
            database_path: self.path.clone(),
            database_size_bytes,
            schema_version,
            total_sessions: table_counts.get("sessions").copied().unwrap_or(0),
            table_counts,
        })
    }

    pub fn vacuum(&self) -> Result<(), StoreError> {
        let mut conn = self.pool.get()?;
        migration::run_maintenance(&mut conn)?;
        Ok(())
    }

    /// Maintenance pass removing records older than `days` for all sessions.
    pub fn purge_older_than(&self, days: u32) -> Result<usize, StoreError> {
        let summary = {
            let mut conn = self.pool.get()?;
            MigrationManager::new(&mut conn).purge_older_than(days)?
        };
        for session_id in &summary.expired_sessions {
            self.release_session_lock(session_id);
        }
        Ok(summary.records_deleted)
    }
}

impl Drop for SessionDatabase {
    fn drop(&mut self) {
        if self.path.is_none() {
            return;
        }
        if let Ok(conn) = self.pool.get() {
            let _ = conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()));
        }
    }
}

pub(crate) fn get_conn(pool: &SqlitePool) -> Result<r2d2::PooledConnection<SqliteConnectionManager>, StoreError> {
    Ok(pool.get()?)
}

pub(crate) fn immediate<T, F>(pool: &SqlitePool, f: F) -> Result<T, StoreError>
where
    F: FnOnce(&rusqlite::Transaction<'_>) -> Result<T, StoreError>,
{
    let mut conn = get_conn(pool)?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let out = f(&tx)?;
    tx.commit()?;
    Ok(out)
}

/// Register the session on first write and bump its activity time.
pub(crate) fn touch_session(conn: &Connection, session_id: &str, now: &str) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO sessions (id, created_at, last_active) VALUES (?1, ?2, ?2)
         ON CONFLICT(id) DO UPDATE SET last_active = excluded.last_active",
        params![session_id, now],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_creates_file_and_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("studio.db");
        let db = SessionDatabase::open(&path, 4).unwrap();
        assert!(path.exists());
        assert_eq!(db.path(), Some(path.as_path()));
        assert_eq!(db.info().unwrap().schema_version, 2);
    }

    #[test]
    fn test_reopen_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("studio.db");
        {
            let db = SessionDatabase::open(&path, 2).unwrap();
            db.usage.insert("s1", "smart_chat", "page_visit").unwrap();
        }
        let db = SessionDatabase::open(&path, 2).unwrap();
        assert_eq!(db.usage.statistics("s1").unwrap().total_actions, 1);
    }

    #[test]
    fn test_clear_session_leaves_other_sessions() {
        let db = SessionDatabase::open_in_memory().unwrap();
        db.usage.insert("a", "smart_chat", "message_sent").unwrap();
        db.usage.insert("b", "smart_chat", "message_sent").unwrap();
        db.preferences.upsert("a", "theme", &serde_json::json!("dark")).unwrap();

        let deleted = db.clear_session("a").unwrap();
        assert_eq!(deleted, 3); // usage row, preference row, session row
        assert!(db.get_session("a").unwrap().is_none());
        assert_eq!(db.usage.statistics("b").unwrap().total_actions, 1);
    }

    #[test]
    fn test_info_counts_rows() {
        let db = SessionDatabase::open_in_memory().unwrap();
        db.usage.insert("a", "smart_chat", "message_sent").unwrap();
        let info = db.info().unwrap();
        assert_eq!(info.table_counts["usage_stats"], 1);
        assert_eq!(info.total_sessions, 1);
        assert!(info.database_path.is_none());
        db.vacuum().unwrap();
    }

    #[test]
    fn test_release_keeps_locks_that_are_still_held() {
        let db = SessionDatabase::open_in_memory().unwrap();
        let held = db.session_lock("a");
        db.session_lock("b");
        assert_eq!(db.tracked_session_locks(), 2);

        assert!(!db.release_session_lock("a"));
        assert!(db.release_session_lock("b"));
        assert_eq!(db.tracked_session_locks(), 1);

        drop(held);
        assert!(db.release_session_lock("a"));
        assert_eq!(db.tracked_session_locks(), 0);
    }

    #[test]
    fn test_purge_releases_locks_of_expired_sessions() {
        let db = SessionDatabase::open_in_memory().unwrap();
        db.with_transaction(|tx| {
            tx.execute(
                "INSERT INTO sessions (id, created_at, last_active)
                 VALUES ('old', '2001-01-01T00:00:00.000000Z', '2001-01-01T00:00:00.000000Z')",
                [],
            )?;
            Ok(())
        })
        .unwrap();
        db.usage.insert("fresh", "smart_chat", "page_visit").unwrap();
        db.session_lock("old");
        db.session_lock("fresh");

        assert_eq!(db.purge_older_than(30).unwrap(), 1);
        assert!(db.get_session("old").unwrap().is_none());
        assert!(db.get_session("fresh").unwrap().is_some());
        assert_eq!(db.tracked_session_locks(), 1);
    }

    #[test]
    fn test_session_lock_is_shared_per_session() {
        let db = SessionDatabase::open_in_memory().unwrap();
        let first = db.session_lock("a");
        let second = db.session_lock("a");
        let other = db.session_lock("b");
        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &other));
    }
}
