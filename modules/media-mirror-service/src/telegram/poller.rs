//! Development-mode ingestion: long-poll `getUpdates` and feed each update
//! through the same dispatcher the webhook uses.

use super::update::Update;
use crate::dispatcher::{self, Capabilities};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

const POLL_TIMEOUT_SECS: u64 = 30;
const RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

pub struct UpdatePoller {
    client: reqwest::Client,
    endpoint: String,
}

impl UpdatePoller {
    pub fn new(api_url: &str, token: &str) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(POLL_TIMEOUT_SECS + 10))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/bot{}/getUpdates", api_url.trim_end_matches('/'), token),
        })
    }

    async fn fetch(&self, offset: Option<i64>) -> Result<Vec<serde_json::Value>, String> {
        let mut payload = serde_json::json!({
            "timeout": POLL_TIMEOUT_SECS,
            "allowed_updates": ["message", "edited_message", "channel_post", "edited_channel_post"],
        });
        if let Some(offset) = offset {
            payload["offset"] = serde_json::json!(offset);
        }

        let resp = self
            .client
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(|e| format!("getUpdates request failed: {}", e))?;

        let parsed: ApiResponse<Vec<serde_json::Value>> = resp
            .json()
            .await
            .map_err(|e| format!("getUpdates decode failed: {}", e))?;

        if !parsed.ok {
            return Err(format!(
                "getUpdates returned ok=false: {}",
                parsed.description.unwrap_or_default()
            ));
        }
        Ok(parsed.result.unwrap_or_default())
    }

    /// Poll forever. Each update is acknowledged (offset advanced) even when
    /// it fails to parse or to store, so a poison update cannot wedge the loop.
    pub async fn run(self, caps: Arc<Capabilities>) {
        log::info!("[POLLER] Long-polling getUpdates");
        let mut offset: Option<i64> = None;

        loop {
            let batch = match self.fetch(offset).await {
                Ok(batch) => batch,
                Err(e) => {
                    log::warn!("[POLLER] {}", e);
                    tokio::time::sleep(RETRY_DELAY).await;
                    continue;
                }
            };

            for raw in batch {
                if let Some(update_id) = raw.get("update_id").and_then(|v| v.as_i64()) {
                    offset = Some(offset.map_or(update_id + 1, |o| o.max(update_id + 1)));
                }

                let update: Update = match serde_json::from_value(raw) {
                    Ok(update) => update,
                    Err(e) => {
                        log::warn!("[POLLER] Skipping unparseable update: {}", e);
                        continue;
                    }
                };

                dispatcher::process_update(&caps, update).await;
            }
        }
    }
}
