//! Reconciliation of expired file URLs.
//!
//! A pass resolves a fresh link for every row older than the expiry threshold.
//! Each record succeeds or fails on its own; only a failed scan aborts a pass.
//! Passes run from `/cron` and, when an interval is configured, from a
//! background loop.

use crate::error::StoreResult;
use crate::store::MediaStore;
use crate::telegram::FileResolver;
use futures_util::stream::{self, StreamExt};
use media_mirror_types::{ReconcileSummary, TrackedFile};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Result of the most recent pass, shared with the status endpoint.
#[derive(Debug, Clone)]
pub struct LastReconcile {
    pub at: String,
    pub summary: ReconcileSummary,
}

pub type LastReconcileSlot = Arc<Mutex<Option<LastReconcile>>>;

enum RecordResult {
    Refreshed,
    Missing,
    Failed,
}

pub async fn reconcile_expired(
    store: &dyn MediaStore,
    resolver: &dyn FileResolver,
    expiry_minutes: u32,
    concurrency: usize,
) -> StoreResult<ReconcileSummary> {
    let expired = store.get_expired_files(expiry_minutes).await?;
    let mut summary = ReconcileSummary {
        scanned: expired.len(),
        ..Default::default()
    };

    if expired.is_empty() {
        log::debug!("[RECONCILE] No files older than {} minutes", expiry_minutes);
        return Ok(summary);
    }

    log::info!(
        "[RECONCILE] Refreshing {} files older than {} minutes",
        expired.len(),
        expiry_minutes
    );

    let results: Vec<RecordResult> = stream::iter(expired)
        .map(|file| async move { refresh_one(store, resolver, &file).await })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    for result in results {
        match result {
            RecordResult::Refreshed => summary.refreshed += 1,
            RecordResult::Missing => summary.missing += 1,
            RecordResult::Failed => summary.failed += 1,
        }
    }

    log::info!(
        "[RECONCILE] Done: {} scanned, {} refreshed, {} missing, {} failed",
        summary.scanned,
        summary.refreshed,
        summary.missing,
        summary.failed
    );
    Ok(summary)
}

async fn refresh_one(
    store: &dyn MediaStore,
    resolver: &dyn FileResolver,
    file: &TrackedFile,
) -> RecordResult {
    let url = match resolver.resolve_file_url(&file.file_id).await {
        Ok(url) => url,
        Err(e) => {
            log::warn!("[RECONCILE] Could not resolve {}: {}", file.file_id, e);
            return RecordResult::Failed;
        }
    };

    match store.refresh_file_url(&file.file_id, &url).await {
        Ok(true) => RecordResult::Refreshed,
        Ok(false) => {
            log::warn!("[RECONCILE] {} disappeared before refresh", file.file_id);
            RecordResult::Missing
        }
        Err(e) => {
            log::warn!("[RECONCILE] Failed to store new url for {}: {}", file.file_id, e);
            RecordResult::Failed
        }
    }
}

/// Run one pass and record it for `/rpc/status`.
pub async fn reconcile_and_record(
    store: &dyn MediaStore,
    resolver: &dyn FileResolver,
    expiry_minutes: u32,
    concurrency: usize,
    last: &LastReconcileSlot,
) -> StoreResult<ReconcileSummary> {
    let summary = reconcile_expired(store, resolver, expiry_minutes, concurrency).await?;
    *last.lock().await = Some(LastReconcile {
        at: chrono::Utc::now().to_rfc3339(),
        summary: summary.clone(),
    });
    Ok(summary)
}

pub async fn run_worker(
    store: Arc<dyn MediaStore>,
    resolver: Arc<dyn FileResolver>,
    interval_secs: u64,
    expiry_minutes: u32,
    concurrency: usize,
    last: LastReconcileSlot,
) {
    log::info!(
        "[RECONCILE] Worker started (interval: {}s, expiry: {}m)",
        interval_secs,
        expiry_minutes
    );

    loop {
        tokio::time::sleep(Duration::from_secs(interval_secs)).await;

        if let Err(e) =
            reconcile_and_record(&*store, &*resolver, expiry_minutes, concurrency, &last).await
        {
            log::error!("[RECONCILE] Scan failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::tests::MockResolver;
    use crate::store::SqliteStore;
    use chrono::{Duration as ChronoDuration, Utc};
    use media_mirror_types::{FileType, FileUpsert, LogicalChatId, MessageRef};

    async fn seed(store: &SqliteStore, ids: &[&str], age_minutes: i64) {
        for (i, id) in ids.iter().enumerate() {
            let file = FileUpsert {
                file_id: id.to_string(),
                file_url: format!("old-{}", id),
                file_type: FileType::Document,
                chat_id: LogicalChatId(100),
                message: MessageRef::Message(i as i64 + age_minutes * 1000),
                media_group_id: None,
            };
            assert!(store.upsert_file(&file).await.unwrap());
            store
                .set_updated_at(id, Utc::now() - ChronoDuration::minutes(age_minutes))
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_failed_record_does_not_abort_batch() {
        let store = SqliteStore::open(":memory:").unwrap();
        seed(&store, &["one", "two", "three"], 90).await;
        let resolver = MockResolver::failing(&["two"]);

        let summary = reconcile_expired(&store, &resolver, 60, 1).await.unwrap();
        assert_eq!(
            summary,
            ReconcileSummary {
                scanned: 3,
                refreshed: 2,
                missing: 0,
                failed: 1
            }
        );

        let one = store.get_file("one").await.unwrap().unwrap();
        let two = store.get_file("two").await.unwrap().unwrap();
        let three = store.get_file("three").await.unwrap().unwrap();
        assert_eq!(one.file_url, "https://files.test/one");
        assert_eq!(two.file_url, "old-two");
        assert_eq!(three.file_url, "https://files.test/three");

        // Only the failed record is still due.
        let still_expired = store.get_expired_files(60).await.unwrap();
        assert_eq!(still_expired.len(), 1);
        assert_eq!(still_expired[0].file_id, "two");
    }

    #[tokio::test]
    async fn test_fresh_rows_are_left_alone() {
        let store = SqliteStore::open(":memory:").unwrap();
        seed(&store, &["fresh"], 1).await;
        seed(&store, &["stale"], 61).await;
        let resolver = MockResolver::default();

        let summary = reconcile_expired(&store, &resolver, 60, 4).await.unwrap();
        assert_eq!(summary.scanned, 1);
        assert_eq!(summary.refreshed, 1);
        assert_eq!(*resolver.calls.lock().unwrap(), vec!["stale".to_string()]);
        assert_eq!(store.get_file("fresh").await.unwrap().unwrap().file_url, "old-fresh");
    }

    #[tokio::test]
    async fn test_parallel_pass_refreshes_everything() {
        let store = SqliteStore::open(":memory:").unwrap();
        seed(&store, &["a", "b", "c", "d", "e"], 120).await;
        let resolver = MockResolver::failing(&["c"]);

        let summary = reconcile_expired(&store, &resolver, 60, 3).await.unwrap();
        assert_eq!(summary.scanned, 5);
        assert_eq!(summary.refreshed, 4);
        assert_eq!(summary.failed, 1);
    }

    #[tokio::test]
    async fn test_pass_runs_on_spawned_task() {
        let sqlite = SqliteStore::open(":memory:").unwrap();
        seed(&sqlite, &["x", "y"], 90).await;
        let store: Arc<dyn MediaStore> = Arc::new(sqlite);
        let resolver: Arc<dyn FileResolver> = Arc::new(MockResolver::default());
        let last: LastReconcileSlot = Arc::new(Mutex::new(None));

        let task_last = last.clone();
        let summary = tokio::spawn(async move {
            reconcile_and_record(&*store, &*resolver, 60, 2, &task_last).await
        })
        .await
        .unwrap()
        .unwrap();

        assert_eq!(summary.refreshed, 2);
        assert!(last.lock().await.is_some());
    }

    #[tokio::test]
    async fn test_record_updates_last_slot() {
        let store = SqliteStore::open(":memory:").unwrap();
        let resolver = MockResolver::default();
        let last: LastReconcileSlot = Arc::new(Mutex::new(None));

        let summary = reconcile_and_record(&store, &resolver, 60, 1, &last).await.unwrap();
        assert_eq!(summary, ReconcileSummary::default());
        let recorded = last.lock().await.clone().unwrap();
        assert_eq!(recorded.summary, ReconcileSummary::default());
    }
}
