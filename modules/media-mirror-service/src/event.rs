//! Inbound events after conversion from the Telegram wire format.

use media_mirror_types::FileType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    Message,
    EditedMessage,
    ChannelPost,
    EditedChannelPost,
}

impl UpdateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateKind::Message => "message",
            UpdateKind::EditedMessage => "edited_message",
            UpdateKind::ChannelPost => "channel_post",
            UpdateKind::EditedChannelPost => "edited_channel_post",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventContent {
    Text(String),
    /// File ids in ascending resolution order, as Telegram sends them.
    Photo(Vec<String>),
    Video(Option<String>),
    Document(Option<String>),
    Audio(Option<String>),
    Other,
}

impl EventContent {
    /// The single file worth mirroring: the largest photo size, or the
    /// item's own file id. Empty ids count as absent.
    pub fn media(&self) -> Option<(FileType, &str)> {
        let (file_type, file_id) = match self {
            EventContent::Photo(sizes) => (FileType::Photo, sizes.last().map(String::as_str)),
            EventContent::Video(id) => (FileType::Video, id.as_deref()),
            EventContent::Document(id) => (FileType::Document, id.as_deref()),
            EventContent::Audio(id) => (FileType::Audio, id.as_deref()),
            EventContent::Text(_) | EventContent::Other => return None,
        };
        file_id
            .filter(|id| !id.is_empty())
            .map(|id| (file_type, id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub update_id: i64,
    pub kind: UpdateKind,
    /// Raw Telegram chat id, prefix included.
    pub chat_id: i64,
    /// Chat photo when the payload carried one; usually absent on updates.
    pub chat_photo_file_id: Option<String>,
    pub message_id: i64,
    pub media_group_id: Option<String>,
    pub content: EventContent,
}
