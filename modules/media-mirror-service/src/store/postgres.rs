//! PostgreSQL backend for the media record store.

use super::{effective_limit, MediaStore};
use crate::config::{PgSslMode, PostgresConfig};
use crate::error::StoreResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use media_mirror_types::*;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode as SqlxPgSslMode};
use sqlx::{Pool, Postgres, QueryBuilder};
use std::time::Duration;

const SCHEMA: [&str; 3] = [
    "CREATE TABLE IF NOT EXISTS site_files (
        file_id VARCHAR PRIMARY KEY,
        file_url VARCHAR,
        file_type VARCHAR,
        media_group_id VARCHAR,
        message_id INTEGER,
        chat_id VARCHAR,
        created_at TIMESTAMPTZ DEFAULT NOW() NOT NULL,
        updated_at TIMESTAMPTZ DEFAULT NOW() NOT NULL,
        UNIQUE (message_id, chat_id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_site_files_updated_at ON site_files(updated_at)",
    "CREATE TABLE IF NOT EXISTS site_chat_ids (chat_id VARCHAR PRIMARY KEY)",
];

const FILE_COLUMNS: &str = "file_id, file_url, file_type, media_group_id, message_id, chat_id,
                            created_at, updated_at";

// One round trip: touch by file_id, or insert and replace the pointer on a
// (message_id, chat_id) collision. The parameters are cast explicitly because
// INSERT ... SELECT does not infer types from the target columns.
const UPSERT_SQL: &str = "
    WITH touched AS (
        UPDATE site_files
        SET file_url = $2::varchar, updated_at = NOW()
        WHERE file_id = $1::varchar
        RETURNING file_id
    ), inserted AS (
        INSERT INTO site_files
            (file_id, file_url, file_type, media_group_id, message_id, chat_id)
        SELECT $1::varchar, $2::varchar, $3::varchar, $4::varchar, $5::integer, $6::varchar
        WHERE NOT EXISTS (SELECT 1 FROM touched)
        ON CONFLICT (message_id, chat_id) DO UPDATE SET
            file_id = EXCLUDED.file_id,
            file_url = EXCLUDED.file_url,
            file_type = EXCLUDED.file_type,
            updated_at = NOW()
        RETURNING file_id
    )
    SELECT (SELECT COUNT(*) FROM touched) + (SELECT COUNT(*) FROM inserted)";

pub struct PostgresStore {
    pool: Pool<Postgres>,
}

impl PostgresStore {
    pub async fn connect(config: &PostgresConfig) -> StoreResult<Self> {
        let mut opts = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.database)
            .ssl_mode(match config.ssl_mode {
                PgSslMode::Disable => SqlxPgSslMode::Disable,
                PgSslMode::Prefer => SqlxPgSslMode::Prefer,
                PgSslMode::Require => SqlxPgSslMode::Require,
            });
        if let Some(user) = &config.username {
            opts = opts.username(user);
        }
        if let Some(pass) = &config.password {
            opts = opts.password(pass);
        }

        log::info!(
            "[STORE] PostgreSQL pool: max {} connections, idle timeout {}s, connect timeout {}s, ssl {:?}",
            config.max_connections,
            config.idle_timeout_secs,
            config.connect_timeout_secs,
            config.ssl_mode
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> StoreResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

#[derive(sqlx::FromRow)]
struct PgFileRow {
    file_id: String,
    file_url: Option<String>,
    file_type: Option<String>,
    media_group_id: Option<String>,
    message_id: Option<i32>,
    chat_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<PgFileRow> for TrackedFile {
    fn from(row: PgFileRow) -> Self {
        TrackedFile {
            file_type: FileType::from_column(row.file_type.as_deref().unwrap_or("")),
            file_id: row.file_id,
            file_url: row.file_url.unwrap_or_default(),
            media_group_id: row.media_group_id,
            message_id: row.message_id.map(i64::from),
            chat_id: row.chat_id.unwrap_or_default(),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[async_trait]
impl MediaStore for PostgresStore {
    async fn upsert_file(&self, file: &FileUpsert) -> StoreResult<bool> {
        let result = sqlx::query_scalar::<_, i64>(UPSERT_SQL)
            .bind(&file.file_id)
            .bind(&file.file_url)
            .bind(file.file_type.as_str())
            .bind(file.media_group_id.as_deref())
            .bind(file.message.as_column())
            .bind(file.chat_id.as_column())
            .fetch_one(&self.pool)
            .await;

        match result {
            Ok(affected) => Ok(affected > 0),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
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
        let result = sqlx::query(
            "UPDATE site_files SET file_url = $2, updated_at = NOW() WHERE file_id = $1",
        )
        .bind(file_id)
        .bind(file_url)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_expired_files(&self, expiry_minutes: u32) -> StoreResult<Vec<TrackedFile>> {
        let minutes = i32::try_from(expiry_minutes).unwrap_or(i32::MAX);
        let rows: Vec<PgFileRow> = sqlx::query_as(&format!(
            "SELECT {} FROM site_files WHERE updated_at < NOW() - make_interval(mins => $1)",
            FILE_COLUMNS
        ))
        .bind(minutes)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(TrackedFile::from).collect())
    }

    async fn is_chat_registered(&self, chat_id: LogicalChatId) -> StoreResult<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM site_chat_ids WHERE chat_id = $1)")
                .bind(chat_id.as_column())
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn get_file(&self, file_id: &str) -> StoreResult<Option<TrackedFile>> {
        let row: Option<PgFileRow> = sqlx::query_as(&format!(
            "SELECT {} FROM site_files WHERE file_id = $1",
            FILE_COLUMNS
        ))
        .bind(file_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(TrackedFile::from))
    }

    async fn list_files(&self, filter: &FileFilter) -> StoreResult<Vec<TrackedFile>> {
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {} FROM site_files WHERE 1=1", FILE_COLUMNS));
        if let Some(chat_id) = &filter.chat_id {
            qb.push(" AND chat_id = ").push_bind(chat_id.clone());
        }
        if let Some(file_type) = filter.file_type {
            qb.push(" AND file_type = ").push_bind(file_type.as_str());
        }
        qb.push(" ORDER BY updated_at DESC, file_id ASC LIMIT ")
            .push_bind(effective_limit(filter));

        let rows: Vec<PgFileRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(TrackedFile::from).collect())
    }

    async fn count_files(&self) -> StoreResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM site_files")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn count_by_type(&self) -> StoreResult<Vec<FileTypeCount>> {
        let rows: Vec<(Option<String>, i64)> = sqlx::query_as(
            "SELECT file_type, COUNT(*) FROM site_files GROUP BY file_type ORDER BY file_type",
        )
        .fetch_all(&self.pool)
        .await?;

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
        "postgres"
    }
}
