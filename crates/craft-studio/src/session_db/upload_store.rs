//! Upload audit log
use crate::error::StoreError;
use crate::session_db::schema::*;
use crate::session_db::{get_conn, immediate, touch_session, SqlitePool};
use rusqlite::{params, Row, ToSql};
use std::sync::Arc;
use tracing::debug;

const UPLOAD_COLUMNS: &str =
    "id, session_id, tool_name, filename, file_type, file_size, file_hash, timestamp";

pub struct UploadStore {
    pool: Arc<SqlitePool>,
}

impl UploadStore {
    pub fn new(pool: Arc<SqlitePool>) -> Self {
        Self { pool }
    }

    pub fn insert(&self, session_id: &str, upload: &NewUpload<'_>) -> Result<FileUploadRecord, StoreError> {
        let size = i64::try_from(upload.size_bytes)
            .map_err(|_| StoreError::InvalidArgument(format!("file size out of range: {}", upload.size_bytes)))?;
        let (now, now_str) = timestamp_now();

        let id = immediate(&self.pool, |tx| {
            touch_session(tx, session_id, &now_str)?;
            tx.execute(
                "INSERT INTO file_uploads
                 (session_id, filename, file_type, file_size, tool_name, file_hash, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    session_id,
                    upload.filename,
                    upload.file_type,
                    size,
                    upload.tool,
                    upload.content_hash,
                    now_str,
                ],
            )?;
            Ok(tx.last_insert_rowid())
        })?;

        debug!("Recorded upload {} ({} bytes) for session {}", upload.filename, upload.size_bytes, session_id);
        Ok(FileUploadRecord {
            id,
            session_id: session_id.to_string(),
            tool: upload.tool.to_string(),
            filename: upload.filename.to_string(),
            file_type: upload.file_type.to_string(),
            size_bytes: upload.size_bytes,
            content_hash: upload.content_hash.map(str::to_string),
            created_at: now,
        })
    }

    /// Uploads for the session, newest first, optionally for one tool.
    pub fn list(&self, session_id: &str, tool: Option<&str>) -> Result<Vec<FileUploadRecord>, StoreError> {
        let conn = get_conn(&self.pool)?;
        let mut query = format!("SELECT {} FROM file_uploads WHERE session_id = ?", UPLOAD_COLUMNS);
        let mut bindings: Vec<&dyn ToSql> = vec![&session_id];
        if let Some(tool) = &tool {
            query.push_str(" AND tool_name = ?");
            bindings.push(tool);
        }
        query.push_str(" ORDER BY id DESC");

        let mut stmt = conn.prepare(&query)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(bindings))?;
        let mut uploads = Vec::new();
        while let Some(row) = rows.next()? {
            uploads.push(Self::row_to_upload(row)?);
        }
        Ok(uploads)
    }

    fn row_to_upload(row: &Row) -> Result<FileUploadRecord, StoreError> {
        let size: i64 = row.get(5)?;
        Ok(FileUploadRecord {
            id: row.get(0)?,
            session_id: row.get(1)?,
            tool: row.get(2)?,
            filename: row.get(3)?,
            file_type: row.get(4)?,
            size_bytes: u64::try_from(size)
                .map_err(|_| StoreError::Corrupt(format!("negative file size: {}", size)))?,
            content_hash: row.get(6)?,
            created_at: parse_timestamp(&row.get::<_, String>(7)?)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::session_db::{NewUpload, SessionDatabase};

    fn upload<'a>(tool: &'a str, filename: &'a str) -> NewUpload<'a> {
        NewUpload {
            tool,
            filename,
            file_type: "text",
            size_bytes: 128,
            content_hash: Some("abc123"),
        }
    }

    #[test]
    fn test_uploads_are_never_deduplicated() {
        let db = SessionDatabase::open_in_memory().unwrap();
        db.uploads.insert("s1", &upload("document_intelligence", "notes.txt")).unwrap();
        db.uploads.insert("s1", &upload("document_intelligence", "notes.txt")).unwrap();
        assert_eq!(db.uploads.list("s1", None).unwrap().len(), 2);
    }

    #[test]
    fn test_list_filters_by_tool_newest_first() {
        let db = SessionDatabase::open_in_memory().unwrap();
        db.uploads.insert("s1", &upload("vision_analysis", "a.png")).unwrap();
        db.uploads.insert("s1", &upload("data_analyst", "b.csv")).unwrap();
        db.uploads.insert("s1", &upload("vision_analysis", "c.png")).unwrap();

        let images = db.uploads.list("s1", Some("vision_analysis")).unwrap();
        let names: Vec<_> = images.iter().map(|u| u.filename.as_str()).collect();
        assert_eq!(names, vec!["c.png", "a.png"]);
        assert_eq!(images[0].content_hash.as_deref(), Some("abc123"));
        assert_eq!(images[0].size_bytes, 128);
    }
}
