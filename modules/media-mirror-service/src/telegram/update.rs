//! Telegram Bot API update payloads, reduced to the fields the mirror reads.
//!
//! Updates arrive both as webhook bodies and from `getUpdates`; either way
//! they are converted to an [`InboundEvent`] here and nowhere else.

use crate::event::{EventContent, InboundEvent, UpdateKind};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub edited_message: Option<Message>,
    pub channel_post: Option<Message>,
    pub edited_channel_post: Option<Message>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    pub text: Option<String>,
    pub photo: Option<Vec<PhotoSize>>,
    pub video: Option<FileRef>,
    pub document: Option<FileRef>,
    pub audio: Option<FileRef>,
    pub media_group_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
    pub photo: Option<ChatPhoto>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatPhoto {
    pub small_file_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhotoSize {
    pub file_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileRef {
    pub file_id: String,
}

impl Update {
    /// `None` for update types the mirror does not handle (callbacks, polls...).
    pub fn into_event(self) -> Option<InboundEvent> {
        let update_id = self.update_id;
        let (kind, message) = if let Some(m) = self.message {
            (UpdateKind::Message, m)
        } else if let Some(m) = self.edited_message {
            (UpdateKind::EditedMessage, m)
        } else if let Some(m) = self.channel_post {
            (UpdateKind::ChannelPost, m)
        } else if let Some(m) = self.edited_channel_post {
            (UpdateKind::EditedChannelPost, m)
        } else {
            return None;
        };
        Some(message.into_event(update_id, kind))
    }
}

impl Message {
    fn into_event(self, update_id: i64, kind: UpdateKind) -> InboundEvent {
        // A captioned photo is still a photo; text only counts on its own.
        let content = if let Some(sizes) = self.photo {
            EventContent::Photo(sizes.into_iter().map(|p| p.file_id).collect())
        } else if let Some(video) = self.video {
            EventContent::Video(Some(video.file_id))
        } else if let Some(document) = self.document {
            EventContent::Document(Some(document.file_id))
        } else if let Some(audio) = self.audio {
            EventContent::Audio(Some(audio.file_id))
        } else if let Some(text) = self.text {
            EventContent::Text(text)
        } else {
            EventContent::Other
        };

        InboundEvent {
            update_id,
            kind,
            chat_id: self.chat.id,
            chat_photo_file_id: self.chat.photo.map(|p| p.small_file_id),
            message_id: self.message_id,
            media_group_id: self.media_group_id,
            content,
        }
    }
}
