//! Shared types for the media mirror service and its RPC clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// =====================================================
// Domain Types
// =====================================================

/// Kind of media a tracked file was mirrored from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    Photo,
    Video,
    Document,
    Audio,
    ChatPhoto,
    Unknown,
}

impl FileType {
    pub const ALL: [FileType; 6] = [
        FileType::Photo,
        FileType::Video,
        FileType::Document,
        FileType::Audio,
        FileType::ChatPhoto,
        FileType::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Photo => "photo",
            FileType::Video => "video",
            FileType::Document => "document",
            FileType::Audio => "audio",
            FileType::ChatPhoto => "chat_photo",
            FileType::Unknown => "unknown",
        }
    }

    /// Parse a stored `file_type` column. Anything unrecognised maps to `Unknown`.
    pub fn from_column(value: &str) -> Self {
        match value {
            "photo" => FileType::Photo,
            "video" => FileType::Video,
            "document" => FileType::Document,
            "audio" => FileType::Audio,
            "chat_photo" => FileType::ChatPhoto,
            _ => FileType::Unknown,
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which message a tracked file hangs off.
///
/// Chat photo updates have no originating message; they are stored under the
/// reserved `message_id` of [`MessageRef::CHAT_PHOTO_MESSAGE_ID`], which keeps
/// at most one chat-photo row per chat via the `(message_id, chat_id)` constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRef {
    Message(i64),
    ChatPhoto,
}

impl MessageRef {
    pub const CHAT_PHOTO_MESSAGE_ID: i64 = -1;

    pub fn as_column(&self) -> i64 {
        match self {
            MessageRef::Message(id) => *id,
            MessageRef::ChatPhoto => Self::CHAT_PHOTO_MESSAGE_ID,
        }
    }
}

/// Chat id with the provider's supergroup/channel prefix removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogicalChatId(pub i64);

impl LogicalChatId {
    /// Strip `prefix_len` leading characters from the decimal form of `raw`
    /// and parse the rest. `-1001234567` with a prefix of 4 becomes `1234567`.
    pub fn from_raw(raw: i64, prefix_len: usize) -> Option<Self> {
        let text = raw.to_string();
        let rest = text.get(prefix_len..)?;
        if rest.is_empty() {
            return None;
        }
        rest.parse::<i64>().ok().map(LogicalChatId)
    }

    pub fn as_column(&self) -> String {
        self.0.to_string()
    }
}

impl fmt::Display for LogicalChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One mirrored media item, as stored in `site_files`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedFile {
    pub file_id: String,
    pub file_url: String,
    pub file_type: FileType,
    pub media_group_id: Option<String>,
    pub message_id: Option<i64>,
    pub chat_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input to the store's upsert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileUpsert {
    pub file_id: String,
    pub file_url: String,
    pub file_type: FileType,
    pub chat_id: LogicalChatId,
    pub message: MessageRef,
    pub media_group_id: Option<String>,
}

// =====================================================
// Filter / Query Types
// =====================================================

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct FileFilter {
    pub chat_id: Option<String>,
    pub file_type: Option<FileType>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileTypeCount {
    pub file_type: FileType,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileStats {
    pub total_files: i64,
    pub expired_files: i64,
    pub expiry_minutes: u32,
    pub by_type: Vec<FileTypeCount>,
}

/// Totals from one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileSummary {
    pub scanned: usize,
    pub refreshed: usize,
    pub missing: usize,
    pub failed: usize,
}

// =====================================================
// RPC Response Types
// =====================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct RpcResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> RpcResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

// =====================================================
// Service Status
// =====================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub running: bool,
    pub uptime_secs: u64,
    pub mode: String,
    pub store_backend: String,
    pub total_files: i64,
    pub last_reconcile_at: Option<String>,
    pub last_reconcile: Option<ReconcileSummary>,
    pub reconcile_interval_secs: Option<u64>,
}
