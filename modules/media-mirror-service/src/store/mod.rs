//! Media record store: the `site_files` table plus the read-only
//! `site_chat_ids` allow-list.

pub mod postgres;
pub mod sqlite;

use crate::config::DatabaseConfig;
use crate::error::StoreResult;
use async_trait::async_trait;
use media_mirror_types::{FileFilter, FileTypeCount, FileUpsert, LogicalChatId, TrackedFile};
use std::sync::Arc;

pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;

/// Default number of rows returned by `list_files` when no limit is given.
pub const DEFAULT_LIST_LIMIT: usize = 100;

#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Merge-then-insert-else-replace.
    ///
    /// A row with the same `file_id` is touched (`updated_at` and the freshly
    /// resolved `file_url`). Otherwise a row is inserted; when the insert hits
    /// the `(message_id, chat_id)` constraint the existing row's `file_id`,
    /// `file_url`, `file_type` and `updated_at` are overwritten.
    ///
    /// Returns `false` when nothing was written, including when a concurrent
    /// writer won a unique-key race.
    async fn upsert_file(&self, file: &FileUpsert) -> StoreResult<bool>;

    /// Set a new URL for an existing row. `false` if the row is gone.
    async fn refresh_file_url(&self, file_id: &str, file_url: &str) -> StoreResult<bool>;

    /// Rows whose `updated_at` is older than `expiry_minutes`. Unordered.
    async fn get_expired_files(&self, expiry_minutes: u32) -> StoreResult<Vec<TrackedFile>>;

    async fn is_chat_registered(&self, chat_id: LogicalChatId) -> StoreResult<bool>;

    async fn get_file(&self, file_id: &str) -> StoreResult<Option<TrackedFile>>;

    /// Most recently updated first.
    async fn list_files(&self, filter: &FileFilter) -> StoreResult<Vec<TrackedFile>>;

    async fn count_files(&self) -> StoreResult<i64>;

    async fn count_by_type(&self) -> StoreResult<Vec<FileTypeCount>>;

    fn backend(&self) -> &'static str;
}

/// Open the backend selected by the config and make sure the schema exists.
pub async fn open_store(config: &DatabaseConfig) -> StoreResult<Arc<dyn MediaStore>> {
    match config {
        DatabaseConfig::Sqlite { path } => {
            log::info!("[STORE] Opening SQLite database at: {}", path);
            Ok(Arc::new(SqliteStore::open(path)?))
        }
        DatabaseConfig::Postgres(pg) => {
            log::info!(
                "[STORE] Connecting to PostgreSQL at {}:{}/{}",
                pg.host,
                pg.port,
                pg.database
            );
            Ok(Arc::new(PostgresStore::connect(pg).await?))
        }
    }
}

fn effective_limit(filter: &FileFilter) -> i64 {
    filter.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, 1000) as i64
}
