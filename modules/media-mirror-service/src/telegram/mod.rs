//! Telegram Bot API boundary: file link resolution, chat lookups and
//! webhook registration.

pub mod poller;
pub mod update;

use crate::error::ResolveError;
use async_trait::async_trait;
use teloxide::payloads::SetWebhookSetters;
use teloxide::prelude::*;
use url::Url;

/// Everything the ingestion and reconciliation paths need from Telegram.
#[async_trait]
pub trait FileResolver: Send + Sync {
    /// Resolve a file id to a time-limited download URL.
    async fn resolve_file_url(&self, file_id: &str) -> Result<String, ResolveError>;

    /// The small chat photo's file id, `None` when the chat has no photo.
    async fn chat_photo_file_id(&self, chat_id: i64) -> Result<Option<String>, ResolveError>;
}

pub struct TelegramResolver {
    bot: Bot,
    api_url: String,
    token: String,
}

impl TelegramResolver {
    pub fn new(token: &str, api_url: &str) -> Result<Self, ResolveError> {
        let api_url = api_url.trim_end_matches('/').to_string();
        let bot = Bot::new(token).set_api_url(Url::parse(&api_url)?);
        Ok(Self {
            bot,
            api_url,
            token: token.to_string(),
        })
    }

    pub fn bot(&self) -> &Bot {
        &self.bot
    }

    fn download_url(&self, path: &str) -> Result<String, ResolveError> {
        let url = format!("{}/file/bot{}/{}", self.api_url, self.token, path);
        Ok(Url::parse(&url)?.to_string())
    }
}

#[async_trait]
impl FileResolver for TelegramResolver {
    async fn resolve_file_url(&self, file_id: &str) -> Result<String, ResolveError> {
        let file = self.bot.get_file(file_id.to_string()).await?;
        if file.path.is_empty() {
            return Err(ResolveError::NoPath(file_id.to_string()));
        }
        self.download_url(&file.path)
    }

    async fn chat_photo_file_id(&self, chat_id: i64) -> Result<Option<String>, ResolveError> {
        let chat = self.bot.get_chat(ChatId(chat_id)).await?;
        Ok(chat.photo.map(|photo| photo.small_file_id))
    }
}

/// Point Telegram at our public webhook endpoint.
pub async fn register_webhook(
    bot: &Bot,
    webhook_url: &str,
    secret: Option<&str>,
) -> Result<(), ResolveError> {
    let url = Url::parse(webhook_url)?;
    let mut request = bot.set_webhook(url);
    if let Some(secret) = secret {
        request = request.secret_token(secret.to_string());
    }
    request.await?;
    log::info!("[WEBHOOK] Registered webhook at {}", webhook_url);
    Ok(())
}

/// Drop any webhook so `getUpdates` polling is allowed.
pub async fn delete_webhook(bot: &Bot) -> Result<(), ResolveError> {
    bot.delete_webhook().await?;
    log::info!("[WEBHOOK] Webhook removed, switching to polling");
    Ok(())
}
