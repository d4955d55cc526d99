//! Per-event decision tree for inbound Telegram updates.
//!
//! Handlers never fail past this boundary: every path ends in an [`Outcome`]
//! which [`process_update`] logs and the transport maps to a reply.

use crate::event::{EventContent, InboundEvent};
use crate::store::MediaStore;
use crate::telegram::FileResolver;
use crate::telegram::update::Update;
use media_mirror_types::{FileType, FileUpsert, LogicalChatId, MessageRef};
use std::fmt;
use std::sync::Arc;

/// What a handler may touch.
pub struct Capabilities {
    pub store: Arc<dyn MediaStore>,
    pub resolver: Arc<dyn FileResolver>,
    pub chat_id_prefix_len: usize,
    pub chat_action_marker: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    UnsupportedUpdate,
    InvalidChatId(i64),
    NoMedia,
    MarkerAbsent,
    NoChatPhoto,
    NotRegistered(LogicalChatId),
    /// Telegram could not produce a link or chat lookup; redelivery will not help.
    Unresolvable(String),
    /// The store wrote nothing, e.g. a concurrent writer won the race.
    NotApplied(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::UnsupportedUpdate => write!(f, "unsupported update type"),
            SkipReason::InvalidChatId(raw) => write!(f, "chat id {} has no logical id", raw),
            SkipReason::NoMedia => write!(f, "no media"),
            SkipReason::MarkerAbsent => write!(f, "text without chat action marker"),
            SkipReason::NoChatPhoto => write!(f, "chat has no photo"),
            SkipReason::NotRegistered(chat) => write!(f, "chat {} not registered", chat),
            SkipReason::Unresolvable(what) => write!(f, "could not resolve {}", what),
            SkipReason::NotApplied(file_id) => write!(f, "upsert of {} was a no-op", file_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Stored(FileUpsert),
    Skipped(SkipReason),
    Failed(String),
}

impl Outcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed(_))
    }

    pub fn log(&self, update_id: i64) {
        match self {
            Outcome::Stored(file) => log::info!(
                "[INGRESS] update {}: stored {} {} for chat {}",
                update_id,
                file.file_type,
                file.file_id,
                file.chat_id
            ),
            Outcome::Skipped(SkipReason::NotApplied(_) | SkipReason::Unresolvable(_)) => {
                log::warn!("[INGRESS] update {}: {}", update_id, self)
            }
            Outcome::Skipped(_) => log::debug!("[INGRESS] update {}: {}", update_id, self),
            Outcome::Failed(reason) => {
                log::error!("[INGRESS] update {}: failed: {}", update_id, reason)
            }
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Stored(file) => write!(f, "stored {}", file.file_id),
            Outcome::Skipped(reason) => write!(f, "skipped: {}", reason),
            Outcome::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Convert, handle and log one wire update.
pub async fn process_update(caps: &Capabilities, update: Update) -> Outcome {
    let update_id = update.update_id;
    let outcome = match update.into_event() {
        Some(event) => {
            log::debug!(
                "[INGRESS] update {}: {} from chat {}",
                update_id,
                event.kind.as_str(),
                event.chat_id
            );
            handle_event(caps, &event).await
        }
        None => Outcome::Skipped(SkipReason::UnsupportedUpdate),
    };
    outcome.log(update_id);
    outcome
}

pub async fn handle_event(caps: &Capabilities, event: &InboundEvent) -> Outcome {
    let chat_id = match LogicalChatId::from_raw(event.chat_id, caps.chat_id_prefix_len) {
        Some(id) => id,
        None => return Outcome::Skipped(SkipReason::InvalidChatId(event.chat_id)),
    };

    match &event.content {
        EventContent::Text(text) => handle_chat_action(caps, event, chat_id, text).await,
        content => {
            let Some((file_type, file_id)) = content.media() else {
                return Outcome::Skipped(SkipReason::NoMedia);
            };
            if let Some(skip) = registration_gate(caps, chat_id).await {
                return skip;
            }
            store_file(
                caps,
                file_id,
                file_type,
                chat_id,
                MessageRef::Message(event.message_id),
                event.media_group_id.clone(),
            )
            .await
        }
    }
}

async fn handle_chat_action(
    caps: &Capabilities,
    event: &InboundEvent,
    chat_id: LogicalChatId,
    text: &str,
) -> Outcome {
    if !text.contains(caps.chat_action_marker.as_str()) {
        return Outcome::Skipped(SkipReason::MarkerAbsent);
    }
    if let Some(skip) = registration_gate(caps, chat_id).await {
        return skip;
    }

    let photo_id = match &event.chat_photo_file_id {
        Some(id) => Some(id.clone()),
        None => match caps.resolver.chat_photo_file_id(event.chat_id).await {
            Ok(id) => id,
            Err(e) => {
                log::warn!("[INGRESS] Chat lookup for {} failed: {}", chat_id, e);
                return Outcome::Skipped(SkipReason::Unresolvable(format!("chat {}", chat_id)));
            }
        },
    };
    let Some(photo_id) = photo_id.filter(|id| !id.is_empty()) else {
        return Outcome::Skipped(SkipReason::NoChatPhoto);
    };

    store_file(caps, &photo_id, FileType::ChatPhoto, chat_id, MessageRef::ChatPhoto, None).await
}

/// `Some(outcome)` when the chat must not be processed.
async fn registration_gate(caps: &Capabilities, chat_id: LogicalChatId) -> Option<Outcome> {
    match caps.store.is_chat_registered(chat_id).await {
        Ok(true) => None,
        Ok(false) => Some(Outcome::Skipped(SkipReason::NotRegistered(chat_id))),
        Err(e) => Some(Outcome::Failed(format!(
            "registration check for {}: {}",
            chat_id, e
        ))),
    }
}

async fn store_file(
    caps: &Capabilities,
    file_id: &str,
    file_type: FileType,
    chat_id: LogicalChatId,
    message: MessageRef,
    media_group_id: Option<String>,
) -> Outcome {
    let file_url = match caps.resolver.resolve_file_url(file_id).await {
        Ok(url) => url,
        Err(e) => {
            log::warn!("[INGRESS] Could not resolve {}: {}", file_id, e);
            return Outcome::Skipped(SkipReason::Unresolvable(file_id.to_string()));
        }
    };

    let upsert = FileUpsert {
        file_id: file_id.to_string(),
        file_url,
        file_type,
        chat_id,
        message,
        media_group_id,
    };

    match caps.store.upsert_file(&upsert).await {
        Ok(true) => Outcome::Stored(upsert),
        Ok(false) => Outcome::Skipped(SkipReason::NotApplied(upsert.file_id)),
        Err(e) => Outcome::Failed(format!("upsert {}: {}", upsert.file_id, e)),
    }
}
