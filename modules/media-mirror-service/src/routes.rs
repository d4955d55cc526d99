//! Axum route handlers: the Telegram webhook, the scheduled cron trigger and
//! the operator RPC API.

use crate::dispatcher::{self, Capabilities};
use crate::telegram::update::Update;
use crate::worker::{self, LastReconcileSlot};
use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{Html, IntoResponse, Json, Response};
use axum::routing::get;
use media_mirror_types::*;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;

const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

const ERROR_PAGE: &str = "<!DOCTYPE html>
<html>
<head><title>Server Error</title></head>
<body>
<h1>Server Error</h1>
<p>Sorry, there was a problem</p>
</body>
</html>";

pub struct AppState {
    pub caps: Arc<Capabilities>,
    pub start_time: Instant,
    pub mode: String,
    pub expiry_minutes: u32,
    pub reconcile_concurrency: usize,
    pub reconcile_interval_secs: Option<u64>,
    pub last_reconcile: LastReconcileSlot,
    pub webhook_secret: Option<String>,
    pub cron_secret: Option<String>,
}

pub fn build_router(state: Arc<AppState>) -> axum::Router {
    let cors = tower_http::cors::CorsLayer::permissive();

    axum::Router::new()
        .route("/webhook", axum::routing::post(webhook))
        .route("/cron", get(cron).post(cron))
        // Operator RPC
        .route("/rpc/status", get(status))
        .route("/rpc/files/get", get(files_get))
        .route("/rpc/files/list", get(files_list))
        .route("/rpc/files/stats", get(files_stats))
        .with_state(state)
        .layer(cors)
}

// =====================================================
// Telegram Endpoints
// =====================================================

// POST /webhook
pub async fn webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, &'static str) {
    if let Some(secret) = state.webhook_secret.as_deref() {
        let given = headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok());
        if given != Some(secret) {
            log::warn!("[WEBHOOK] Rejected update with missing or wrong secret token");
            return (StatusCode::UNAUTHORIZED, "Unauthorized");
        }
    }

    let update: Update = match serde_json::from_slice(&body) {
        Ok(update) => update,
        Err(e) => {
            // Redelivery would fail the same way.
            log::warn!("[WEBHOOK] Dropping unparseable update: {}", e);
            return (StatusCode::OK, "OK");
        }
    };

    let outcome = dispatcher::process_update(&state.caps, update).await;
    if outcome.is_failure() {
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
    } else {
        (StatusCode::OK, "OK")
    }
}

#[derive(Debug, Deserialize)]
pub struct CronParams {
    #[serde(rename = "expiryMinutes")]
    pub expiry_minutes: Option<u32>,
}

// GET|POST /cron
pub async fn cron(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    params: Result<Query<CronParams>, QueryRejection>,
) -> Response {
    if let Some(secret) = state.cron_secret.as_deref() {
        let given = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        if given != Some(secret) {
            return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
        }
    }

    let requested = match params {
        Ok(Query(params)) => params.expiry_minutes,
        Err(e) => {
            log::warn!("[RECONCILE] Ignoring bad cron parameters: {}", e);
            None
        }
    };
    let expiry_minutes = requested.unwrap_or(state.expiry_minutes);
    match worker::reconcile_and_record(
        state.caps.store.as_ref(),
        state.caps.resolver.as_ref(),
        expiry_minutes,
        state.reconcile_concurrency,
        &state.last_reconcile,
    )
    .await
    {
        Ok(_) => (StatusCode::OK, "Cron successful!").into_response(),
        Err(e) => {
            log::error!("[RECONCILE] Cron run failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, Html(ERROR_PAGE)).into_response()
        }
    }
}

// =====================================================
// RPC Endpoints
// =====================================================

// GET /rpc/status
pub async fn status(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<RpcResponse<ServiceStatus>>) {
    let total_files = state.caps.store.count_files().await.unwrap_or(0);
    let last = state.last_reconcile.lock().await.clone();

    let status = ServiceStatus {
        running: true,
        uptime_secs: state.start_time.elapsed().as_secs(),
        mode: state.mode.clone(),
        store_backend: state.caps.store.backend().to_string(),
        total_files,
        last_reconcile_at: last.as_ref().map(|l| l.at.clone()),
        last_reconcile: last.map(|l| l.summary),
        reconcile_interval_secs: state.reconcile_interval_secs,
    };

    (StatusCode::OK, Json(RpcResponse::ok(status)))
}

#[derive(Debug, Deserialize)]
pub struct FileLookup {
    pub file_id: String,
}

// GET /rpc/files/get
pub async fn files_get(
    State(state): State<Arc<AppState>>,
    Query(lookup): Query<FileLookup>,
) -> (StatusCode, Json<RpcResponse<TrackedFile>>) {
    match state.caps.store.get_file(&lookup.file_id).await {
        Ok(Some(file)) => (StatusCode::OK, Json(RpcResponse::ok(file))),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(RpcResponse::err(format!("File {} not found", lookup.file_id))),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(RpcResponse::err(format!("Failed to get file: {}", e))),
        ),
    }
}

// GET /rpc/files/list
pub async fn files_list(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<FileFilter>,
) -> (StatusCode, Json<RpcResponse<Vec<TrackedFile>>>) {
    match state.caps.store.list_files(&filter).await {
        Ok(files) => (StatusCode::OK, Json(RpcResponse::ok(files))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(RpcResponse::err(format!("Failed to list files: {}", e))),
        ),
    }
}

// GET /rpc/files/stats
pub async fn files_stats(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<RpcResponse<FileStats>>) {
    let store = &state.caps.store;
    let stats = async {
        Ok::<_, crate::error::StoreError>(FileStats {
            total_files: store.count_files().await?,
            expired_files: store.get_expired_files(state.expiry_minutes).await?.len() as i64,
            expiry_minutes: state.expiry_minutes,
            by_type: with_all_types(store.count_by_type().await?),
        })
    }
    .await;

    match stats {
        Ok(stats) => (StatusCode::OK, Json(RpcResponse::ok(stats))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(RpcResponse::err(format!("Failed to compute stats: {}", e))),
        ),
    }
}

/// One entry per file type, zero when the store has none of that type.
fn with_all_types(counts: Vec<FileTypeCount>) -> Vec<FileTypeCount> {
    FileType::ALL
        .into_iter()
        .map(|file_type| FileTypeCount {
            file_type,
            count: counts
                .iter()
                .filter(|c| c.file_type == file_type)
                .map(|c| c.count)
                .sum(),
        })
        .collect()
}
