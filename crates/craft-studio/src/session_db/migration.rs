//! Database migration system

use rusqlite::{Connection, OptionalExtension, Result};
use std::collections::BTreeMap;
use tracing::{error, info, warn};

use crate::session_db::schema::{self, RECORD_TABLES};

/// Manages database schema migrations
pub struct MigrationManager<'a> {
    conn: &'a mut Connection,
}

impl<'a> MigrationManager<'a> {
    pub fn new(conn: &'a mut Connection) -> Self {
        Self { conn }
    }

    /// Bring the schema up to the latest version.
    pub fn initialize_database(&mut self) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        let current_version = self.get_current_version()?;
        info!("Current session database schema version: {}", current_version);

        self.apply_migrations(current_version)
    }

    fn apply_migrations(&mut self, current_version: i32) -> Result<()> {
        for (version, migration_sql) in get_migrations() {
            if version <= current_version {
                continue;
            }
            info!("Applying migration {}...", version);

            let tx = self.conn.transaction()?;
            if let Err(e) = tx.execute_batch(migration_sql) {
                error!("Failed to apply migration {}: {}", version, e);
                return Err(e);
            }
            tx.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
            tx.commit()?;

            info!("Migration {} applied successfully", version);
        }
        Ok(())
    }

    pub fn get_current_version(&self) -> Result<i32> {
        self.conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
    }

    pub fn has_migration_applied(&self, version: i32) -> Result<bool> {
        self.conn
            .query_row(
                "SELECT 1 FROM schema_version WHERE version = ?1",
                [version],
                |_| Ok(1),
            )
            .optional()
            .map(|result| result.is_some())
    }

    /// Delete records older than `older_than_days` from every table, for
    /// every session. Runs in one transaction; vacuums when anything went.
    pub fn purge_older_than(&mut self, older_than_days: u32) -> Result<PurgeSummary> {
        let cutoff = chrono::Utc::now() - chrono::Duration::days(i64::from(older_than_days));
        let cutoff_str = schema::format_timestamp(&cutoff);

        let tx = self.conn.transaction()?;
        let expired_sessions = {
            let mut stmt = tx.prepare("SELECT id FROM sessions WHERE last_active < ?1")?;
            let ids = stmt.query_map([&cutoff_str], |row| row.get::<_, String>(0))?;
            ids.collect::<Result<Vec<_>>>()?
        };
        let mut records_deleted = 0;
        for table in RECORD_TABLES {
            records_deleted += tx.execute(
                &format!("DELETE FROM {} WHERE timestamp < ?1", table),
                [&cutoff_str],
            )?;
        }
        records_deleted += tx.execute("DELETE FROM sessions WHERE last_active < ?1", [&cutoff_str])?;
        tx.commit()?;

        info!(
            "Purged {} records older than {} days ({} sessions expired)",
            records_deleted,
            older_than_days,
            expired_sessions.len()
        );
        if records_deleted > 0 {
            self.conn.execute_batch("VACUUM")?;
            info!("Database vacuum completed");
        }
        Ok(PurgeSummary {
            records_deleted,
            expired_sessions,
        })
    }
}

/// Outcome of a purge pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeSummary {
    pub records_deleted: usize,
    /// Ids of the session registry rows that were removed.
    pub expired_sessions: Vec<String>,
}

fn get_migrations() -> Vec<(i32, &'static str)> {
    vec![
        (1, include_str!("migrations/001_initial.sql")),
        (2, include_str!("migrations/002_session_indexes.sql")),
    ]
}

/// Row counts for every record table plus the session registry.
pub fn get_table_counts(conn: &Connection) -> Result<BTreeMap<String, i64>> {
    let mut counts = BTreeMap::new();
    for table in RECORD_TABLES.iter().chain(std::iter::once(&"sessions")) {
        let count = conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
            .or_else(|e| {
                warn!("Failed to get count from table {}: {}", table, e);
                Err(e)
            })?;
        counts.insert(table.to_string(), count);
    }
    Ok(counts)
}

pub fn get_database_size(conn: &Connection) -> Result<i64> {
    conn.query_row(
        "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
        [],
        |row| row.get(0),
    )
}

/// Refresh planner statistics and verify integrity, then compact.
pub fn run_maintenance(conn: &mut Connection) -> Result<()> {
    info!("Running database maintenance...");
    conn.execute_batch("ANALYZE")?;
    let integrity: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
    if integrity != "ok" {
        warn!("Integrity check reported: {}", integrity);
    }
    conn.execute_batch("VACUUM")?;
    info!("Database maintenance completed");
    Ok(())
}
