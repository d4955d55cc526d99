//! SQLite backend for the media record store.

use super::{effective_limit, MediaStore};
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use media_mirror_types::*;
use rusqlite::{Connection, ErrorCode};
use std::sync::{Mutex, MutexGuard};

const FILE_COLUMNS: &str = "file_id, file_url, file_type, media_group_id, message_id, chat_id,
                            created_at, updated_at";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &str) -> StoreResult<Self> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(path)?
        };
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.create_tables()?;
        Ok(db)
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn create_tables(&self) -> StoreResult<()> {
        let conn = self.lock()?;

        // Timestamps are RFC 3339 UTC with fixed microsecond precision so
        // that text comparison orders them chronologically.
        conn.execute(
            "CREATE TABLE IF NOT EXISTS site_files (
                file_id TEXT PRIMARY KEY,
                file_url TEXT,
                file_type TEXT,
                media_group_id TEXT,
                message_id INTEGER,
                chat_id TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (message_id, chat_id)
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_site_files_updated_at ON site_files(updated_at)",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS site_chat_ids (
                chat_id TEXT PRIMARY KEY
            )",
            [],
        )?;
        Ok(())
    }

    #[cfg(test)]
    pub fn register_chat(&self, chat_id: &str) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO site_chat_ids (chat_id) VALUES (?1)",
            [chat_id],
        )?;
        Ok(())
    }

    #[cfg(test)]
    pub fn set_updated_at(&self, file_id: &str, at: DateTime<Utc>) -> StoreResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE site_files SET created_at = MIN(created_at, ?2), updated_at = ?2
             WHERE file_id = ?1",
            rusqlite::params![file_id, format_timestamp(at)],
        )?;
        Ok(())
    }
}

#[async_trait]
impl MediaStore for SqliteStore {
    async fn upsert_file(&self, file: &FileUpsert) -> StoreResult<bool> {
        let mut conn = self.lock()?;
        let now = format_timestamp(Utc::now());

        match upsert_in_transaction(&mut conn, file, &now) {
            Ok(rows) => Ok(rows > 0),
            Err(e) if is_constraint_violation(&e) => {
                log::warn!(
                    "[STORE] Upsert of {} lost a unique-key race: {}",
                    file.file_id,
                    e
                );
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn refresh_file_url(&self, file_id: &str, file_url: &str) -> StoreResult<bool> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "UPDATE site_files SET file_url = ?2, updated_at = ?3 WHERE file_id = ?1",
            rusqlite::params![file_id, file_url, format_timestamp(Utc::now())],
        )?;
        Ok(rows > 0)
    }

    async fn get_expired_files(&self, expiry_minutes: u32) -> StoreResult<Vec<TrackedFile>> {
        let cutoff = Utc::now() - Duration::minutes(i64::from(expiry_minutes));
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM site_files WHERE updated_at < ?1",
            FILE_COLUMNS
        ))?;
        let rows = stmt
            .query_map([format_timestamp(cutoff)], read_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(FileRow::into_tracked).collect()
    }

    async fn is_chat_registered(&self, chat_id: LogicalChatId) -> StoreResult<bool> {
        let conn = self.lock()?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM site_chat_ids WHERE chat_id = ?1)",
            [chat_id.as_column()],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    async fn get_file(&self, file_id: &str) -> StoreResult<Option<TrackedFile>> {
        let conn = self.lock()?;
        let result = conn.query_row(
            &format!("SELECT {} FROM site_files WHERE file_id = ?1", FILE_COLUMNS),
            [file_id],
            read_row,
        );
        match result {
            Ok(row) => row.into_tracked().map(Some),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_files(&self, filter: &FileFilter) -> StoreResult<Vec<TrackedFile>> {
        let conn = self.lock()?;

        let mut sql = format!("SELECT {} FROM site_files WHERE 1=1", FILE_COLUMNS);
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(chat_id) = &filter.chat_id {
            params.push(Box::new(chat_id.clone()));
            sql.push_str(&format!(" AND chat_id = ?{}", params.len()));
        }
        if let Some(file_type) = filter.file_type {
            params.push(Box::new(file_type.as_str()));
            sql.push_str(&format!(" AND file_type = ?{}", params.len()));
        }
        params.push(Box::new(effective_limit(filter)));
        sql.push_str(&format!(
            " ORDER BY updated_at DESC, file_id ASC LIMIT ?{}",
            params.len()
        ));

        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(param_refs.as_slice(), read_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(FileRow::into_tracked).collect()
    }

    async fn count_files(&self) -> StoreResult<i64> {
        let conn = self.lock()?;
        let count = conn.query_row("SELECT COUNT(*) FROM site_files", [], |row| row.get(0))?;
        Ok(count)
    }

    async fn count_by_type(&self) -> StoreResult<Vec<FileTypeCount>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT file_type, COUNT(*) FROM site_files GROUP BY file_type ORDER BY file_type",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, Option<String>>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut counts: Vec<FileTypeCount> = Vec::new();
        for (raw_type, count) in rows {
            let file_type = FileType::from_column(raw_type.as_deref().unwrap_or(""));
            match counts.iter_mut().find(|c| c.file_type == file_type) {
                Some(existing) => existing.count += count,
                None => counts.push(FileTypeCount { file_type, count }),
            }
        }
        Ok(counts)
    }

    fn backend(&self) -> &'static str {
        "sqlite"
    }
}

/// SQLite has no data-modifying CTEs, so the touch and the insert run as two
/// statements inside one transaction.
fn upsert_in_transaction(
    conn: &mut Connection,
    file: &FileUpsert,
    now: &str,
) -> rusqlite::Result<usize> {
    let tx = conn.transaction()?;

    let touched = tx.execute(
        "UPDATE site_files SET file_url = ?2, updated_at = ?3 WHERE file_id = ?1",
        rusqlite::params![file.file_id, file.file_url, now],
    )?;

    let rows = if touched > 0 {
        touched
    } else {
        tx.execute(
            "INSERT INTO site_files
                (file_id, file_url, file_type, media_group_id, message_id, chat_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
             ON CONFLICT (message_id, chat_id) DO UPDATE SET
                file_id = excluded.file_id,
                file_url = excluded.file_url,
                file_type = excluded.file_type,
                updated_at = excluded.updated_at",
            rusqlite::params![
                file.file_id,
                file.file_url,
                file.file_type.as_str(),
                file.media_group_id,
                file.message.as_column(),
                file.chat_id.as_column(),
                now,
            ],
        )?
    };

    tx.commit()?;
    Ok(rows)
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(file_id: &str, raw: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt {
            file_id: file_id.to_string(),
            reason: format!("bad timestamp {:?}: {}", raw, e),
        })
}

struct FileRow {
    file_id: String,
    file_url: Option<String>,
    file_type: Option<String>,
    media_group_id: Option<String>,
    message_id: Option<i64>,
    chat_id: Option<String>,
    created_at: String,
    updated_at: String,
}

impl FileRow {
    fn into_tracked(self) -> StoreResult<TrackedFile> {
        let created_at = parse_timestamp(&self.file_id, &self.created_at)?;
        let updated_at = parse_timestamp(&self.file_id, &self.updated_at)?;
        Ok(TrackedFile {
            file_type: FileType::from_column(self.file_type.as_deref().unwrap_or("")),
            file_url: self.file_url.unwrap_or_default(),
            media_group_id: self.media_group_id,
            message_id: self.message_id,
            chat_id: self.chat_id.unwrap_or_default(),
            created_at,
            updated_at,
            file_id: self.file_id,
        })
    }
}

fn read_row(row: &rusqlite::Row) -> rusqlite::Result<FileRow> {
    Ok(FileRow {
        file_id: row.get(0)?,
        file_url: row.get(1)?,
        file_type: row.get(2)?,
        media_group_id: row.get(3)?,
        message_id: row.get(4)?,
        chat_id: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteStore {
        SqliteStore::open(":memory:").expect("in-memory db")
    }

    fn upsert(
        file_id: &str,
        url: &str,
        file_type: FileType,
        chat: i64,
        message: MessageRef,
    ) -> FileUpsert {
        FileUpsert {
            file_id: file_id.to_string(),
            file_url: url.to_string(),
            file_type,
            chat_id: LogicalChatId(chat),
            message,
            media_group_id: None,
        }
    }

    fn minutes_ago(minutes: i64) -> DateTime<Utc> {
        Utc::now() - Duration::minutes(minutes)
    }

    #[tokio::test]
    async fn test_insert_then_touch_same_file_id() {
        let db = store();
        let mut first = upsert("abc", "u1", FileType::Photo, 100, MessageRef::Message(5));
        first.media_group_id = Some("album-1".to_string());
        assert!(db.upsert_file(&first).await.unwrap());
        db.set_updated_at("abc", minutes_ago(30)).unwrap();
        let before = db.get_file("abc").await.unwrap().unwrap();

        // Same physical file resurfacing under another message and type
        let again = upsert("abc", "u2", FileType::Document, 100, MessageRef::Message(6));
        assert!(db.upsert_file(&again).await.unwrap());

        let after = db.get_file("abc").await.unwrap().unwrap();
        assert_eq!(after.file_url, "u2");
        assert_eq!(after.file_type, FileType::Photo);
        assert_eq!(after.media_group_id.as_deref(), Some("album-1"));
        assert_eq!(after.message_id, Some(5));
        assert_eq!(after.chat_id, "100");
        assert_eq!(after.created_at, before.created_at);
        assert!(after.updated_at > before.updated_at);
        assert_eq!(db.count_files().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_same_message_with_new_file_replaces_pointer() {
        let db = store();
        db.upsert_file(&upsert("other", "u0", FileType::Video, 100, MessageRef::Message(9)))
            .await
            .unwrap();
        let mut original = upsert("abc", "u1", FileType::Photo, 100, MessageRef::Message(5));
        original.media_group_id = Some("album-1".to_string());
        db.upsert_file(&original).await.unwrap();
        db.set_updated_at("abc", minutes_ago(30)).unwrap();
        db.set_updated_at("other", minutes_ago(30)).unwrap();
        let untouched_before = db.get_file("other").await.unwrap().unwrap();

        let replacement = upsert("xyz", "u2", FileType::Video, 100, MessageRef::Message(5));
        assert!(db.upsert_file(&replacement).await.unwrap());

        assert!(db.get_file("abc").await.unwrap().is_none());
        let row = db.get_file("xyz").await.unwrap().unwrap();
        assert_eq!(row.file_url, "u2");
        assert_eq!(row.file_type, FileType::Video);
        assert_eq!(row.message_id, Some(5));
        // Group id belongs to the message slot, not the file
        assert_eq!(row.media_group_id.as_deref(), Some("album-1"));
        assert!(row.updated_at > minutes_ago(1));

        let untouched_after = db.get_file("other").await.unwrap().unwrap();
        assert_eq!(untouched_after, untouched_before);
        assert_eq!(db.count_files().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_scenario_single_row_after_url_change() {
        let db = store();
        db.upsert_file(&upsert("abc", "u1", FileType::Photo, 100, MessageRef::Message(5)))
            .await
            .unwrap();
        db.upsert_file(&upsert("abc", "u2", FileType::Photo, 100, MessageRef::Message(5)))
            .await
            .unwrap();

        let files = db.list_files(&FileFilter::default()).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].file_url, "u2");
    }

    #[tokio::test]
    async fn test_scenario_message_repointed_to_new_file() {
        let db = store();
        db.upsert_file(&upsert("abc", "u1", FileType::Photo, 100, MessageRef::Message(5)))
            .await
            .unwrap();
        db.upsert_file(&upsert("xyz", "u2", FileType::Photo, 100, MessageRef::Message(5)))
            .await
            .unwrap();

        let files = db.list_files(&FileFilter::default()).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].file_id, "xyz");
    }

    #[tokio::test]
    async fn test_merge_by_file_id_wins_over_message_slot() {
        let db = store();
        db.upsert_file(&upsert("abc", "u1", FileType::Photo, 100, MessageRef::Message(5)))
            .await
            .unwrap();
        db.upsert_file(&upsert("old", "u0", FileType::Photo, 100, MessageRef::Message(9)))
            .await
            .unwrap();

        // "old" resurfaces at message 5: it is touched in place, message 5 keeps "abc"
        assert!(
            db.upsert_file(&upsert("old", "u3", FileType::Photo, 100, MessageRef::Message(5)))
                .await
                .unwrap()
        );
        assert_eq!(db.get_file("abc").await.unwrap().unwrap().message_id, Some(5));
        let old = db.get_file("old").await.unwrap().unwrap();
        assert_eq!(old.message_id, Some(9));
        assert_eq!(old.file_url, "u3");
    }

    #[tokio::test]
    async fn test_same_message_in_different_chats_is_distinct() {
        let db = store();
        db.upsert_file(&upsert("a", "u", FileType::Photo, 100, MessageRef::Message(5)))
            .await
            .unwrap();
        db.upsert_file(&upsert("b", "u", FileType::Photo, 200, MessageRef::Message(5)))
            .await
            .unwrap();
        assert_eq!(db.count_files().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_one_chat_photo_per_chat() {
        let db = store();
        db.upsert_file(&upsert("p1", "u1", FileType::ChatPhoto, 100, MessageRef::ChatPhoto))
            .await
            .unwrap();
        db.upsert_file(&upsert("p2", "u2", FileType::ChatPhoto, 100, MessageRef::ChatPhoto))
            .await
            .unwrap();

        let files = db.list_files(&FileFilter::default()).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].file_id, "p2");
        assert_eq!(files[0].message_id, Some(MessageRef::CHAT_PHOTO_MESSAGE_ID));
    }

    #[tokio::test]
    async fn test_absent_media_group_is_null() {
        let db = store();
        db.upsert_file(&upsert("abc", "u1", FileType::Audio, 100, MessageRef::Message(5)))
            .await
            .unwrap();

        let conn = db.lock().unwrap();
        let is_null: bool = conn
            .query_row(
                "SELECT media_group_id IS NULL FROM site_files WHERE file_id = 'abc'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert!(is_null);
    }

    #[tokio::test]
    async fn test_expired_selection_boundaries() {
        let db = store();
        for (message_id, id) in ["fresh", "stale", "ancient"].into_iter().enumerate() {
            let message = MessageRef::Message(message_id as i64);
            db.upsert_file(&upsert(id, "u", FileType::Photo, 100, message))
                .await
                .unwrap();
        }
        db.set_updated_at("fresh", minutes_ago(1)).unwrap();
        db.set_updated_at("stale", minutes_ago(61)).unwrap();
        db.set_updated_at("ancient", minutes_ago(60 * 24)).unwrap();

        let mut expired: Vec<String> = db
            .get_expired_files(60)
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.file_id)
            .collect();
        expired.sort();
        assert_eq!(expired, vec!["ancient".to_string(), "stale".to_string()]);

        let expired = db.get_expired_files(2 * 60 * 24).await.unwrap();
        assert!(expired.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_url() {
        let db = store();
        db.upsert_file(&upsert("abc", "u1", FileType::Photo, 100, MessageRef::Message(5)))
            .await
            .unwrap();
        db.set_updated_at("abc", minutes_ago(90)).unwrap();

        assert!(db.refresh_file_url("abc", "u2").await.unwrap());
        let row = db.get_file("abc").await.unwrap().unwrap();
        assert_eq!(row.file_url, "u2");
        assert!(row.updated_at > minutes_ago(1));
        assert!(db.get_expired_files(60).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_missing_file_is_noop() {
        let db = store();
        db.upsert_file(&upsert("abc", "u1", FileType::Photo, 100, MessageRef::Message(5)))
            .await
            .unwrap();

        assert!(!db.refresh_file_url("nope", "u2").await.unwrap());
        assert_eq!(db.count_files().await.unwrap(), 1);
        assert!(db.get_file("nope").await.unwrap().is_none());
        assert_eq!(db.get_file("abc").await.unwrap().unwrap().file_url, "u1");
    }

    #[tokio::test]
    async fn test_chat_registration() {
        let db = store();
        db.register_chat("100").unwrap();
        assert!(db.is_chat_registered(LogicalChatId(100)).await.unwrap());
        assert!(!db.is_chat_registered(LogicalChatId(42)).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_filter_and_counts() {
        let db = store();
        db.upsert_file(&upsert("a", "u", FileType::Photo, 100, MessageRef::Message(1)))
            .await
            .unwrap();
        db.upsert_file(&upsert("b", "u", FileType::Video, 100, MessageRef::Message(2)))
            .await
            .unwrap();
        db.upsert_file(&upsert("c", "u", FileType::Photo, 200, MessageRef::Message(1)))
            .await
            .unwrap();
        db.set_updated_at("a", minutes_ago(10)).unwrap();

        let filter = FileFilter {
            chat_id: Some("100".to_string()),
            ..Default::default()
        };
        let ids: Vec<String> = db
            .list_files(&filter)
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.file_id)
            .collect();
        assert_eq!(ids, vec!["b".to_string(), "a".to_string()]);

        let filter = FileFilter {
            file_type: Some(FileType::Photo),
            limit: Some(1),
            ..Default::default()
        };
        assert_eq!(db.list_files(&filter).await.unwrap().len(), 1);

        let counts = db.count_by_type().await.unwrap();
        let photos = counts.iter().find(|c| c.file_type == FileType::Photo).unwrap();
        assert_eq!(photos.count, 2);
        assert_eq!(db.count_files().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_reopen_file_database_keeps_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mirror.db");
        let path = path.to_str().unwrap();

        {
            let db = SqliteStore::open(path).unwrap();
            db.upsert_file(&upsert("abc", "u1", FileType::Photo, 100, MessageRef::Message(5)))
                .await
                .unwrap();
        }

        let db = SqliteStore::open(path).unwrap();
        assert_eq!(db.get_file("abc").await.unwrap().unwrap().file_url, "u1");
    }
}
