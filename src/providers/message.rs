//! Normalised message types shared across all provider backends.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::ProviderKind;

/// A media attachment on an inbound or outbound message.
///
/// Exactly one source is carried: an in-memory buffer, an on-disk path, or a
/// remote URL.
#[derive(Debug, Clone)]
pub struct MediaAttachment {
    /// Attachment category.
    pub kind: MediaKind,
    /// Where the bytes live.
    pub source: MediaSource,
    /// MIME type, if declared by the backend or caller.
    pub mime: Option<String>,
    /// Original file name, if any.
    pub file_name: Option<String>,
    /// Declared size in bytes, if known before transfer.
    pub size: Option<u64>,
    /// Optional thumbnail bytes.
    pub thumbnail: Option<Vec<u8>>,
}

/// Attachment category tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Still image.
    Image,
    /// Video clip.
    Video,
    /// Generic audio file.
    Audio,
    /// Voice note.
    Voice,
    /// Any other document.
    Document,
}

/// The single source of an attachment's bytes.
#[derive(Debug, Clone)]
pub enum MediaSource {
    /// In-memory buffer.
    Bytes(Vec<u8>),
    /// On-disk path.
    Path(PathBuf),
    /// Remote URL to be fetched by the provider.
    Url(String),
}

impl MediaAttachment {
    /// Attachment referencing a local file. The kind is not inferred;
    /// callers set the kind they mean.
    pub fn from_path(kind: MediaKind, path: PathBuf) -> Self {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned());
        Self {
            kind,
            source: MediaSource::Path(path),
            mime: None,
            file_name,
            size: None,
            thumbnail: None,
        }
    }

    /// Attachment referencing a remote URL.
    pub fn from_url(kind: MediaKind, url: String) -> Self {
        Self {
            kind,
            source: MediaSource::Url(url),
            mime: None,
            file_name: None,
            size: None,
            thumbnail: None,
        }
    }
}

/// Chat context of an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatContext {
    /// One-on-one conversation.
    Direct,
    /// Group chat (WA-Web only today).
    Group {
        /// Backend group identifier (e.g. `12345-678@g.us`).
        chat_id: String,
        /// Group subject, if the backend provided one.
        subject: Option<String>,
        /// Canonical identifiers mentioned in the message body.
        mentioned: Vec<String>,
    },
}

/// A normalised inbound message, produced by every provider adapter.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Backend-unique message id.
    pub id: String,
    /// Canonical sender identifier (group JID for group chats).
    pub from: String,
    /// Canonical receiver identifier (the operator's own address).
    pub to: String,
    /// Message body text.
    pub body: String,
    /// Millisecond timestamp.
    pub timestamp_ms: i64,
    /// Display name; for group chats the individual sender's identifier.
    pub sender_name: Option<String>,
    /// Ordered media attachments.
    pub media: Vec<MediaAttachment>,
    /// Provider the message arrived through.
    pub provider: ProviderKind,
    /// Direct or group context.
    pub chat: ChatContext,
    /// Raw backend payload, kept for debugging only.
    pub raw: Option<serde_json::Value>,
}

impl InboundMessage {
    /// Whether this message arrived in a group chat.
    pub fn is_group(&self) -> bool {
        matches!(self.chat, ChatContext::Group { .. })
    }
}

/// Options for an outbound send.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Ordered media list; only the first item is required to be honoured.
    pub media: Vec<MediaAttachment>,
    /// Backend message id this send replies to.
    pub reply_to: Option<String>,
    /// Request a typing pre-indicator before the body.
    pub typing: bool,
}

/// Outcome status of a send operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SendStatus {
    /// Accepted by the backend.
    Sent,
    /// Queued by the backend for later delivery.
    Queued,
    /// Rejected or failed; `error` carries the reason.
    Failed,
}

/// Result of a send operation. Failed sends are values, not errors.
#[derive(Debug, Clone)]
pub struct SendResult {
    /// Backend message id (empty on failure).
    pub message_id: String,
    /// Outcome status.
    pub status: SendStatus,
    /// Failure reason when `status` is [`SendStatus::Failed`].
    pub error: Option<String>,
    /// Provider-specific metadata (`sid`, `jid`, `user_id`).
    pub metadata: HashMap<String, String>,
}

impl SendResult {
    /// Successful send with the given backend message id.
    pub fn sent(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            status: SendStatus::Sent,
            error: None,
            metadata: HashMap::new(),
        }
    }

    /// Failed send carrying a reason; never thrown.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            message_id: String::new(),
            status: SendStatus::Failed,
            error: Some(error.into()),
            metadata: HashMap::new(),
        }
    }

    /// Attach a metadata key, consuming and returning self.
    pub fn with_meta(mut self, key: &str, value: impl Into<String>) -> Self {
        self.metadata.insert(key.to_owned(), value.into());
        self
    }

    /// Whether the send reached the backend.
    pub fn is_ok(&self) -> bool {
        !matches!(self.status, SendStatus::Failed)
    }
}

/// Normalised delivery state reported by `delivery_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    /// Accepted by the backend.
    Sent,
    /// Delivered to the peer's device.
    Delivered,
    /// Read by the peer.
    Read,
    /// Delivery failed.
    Failed,
    /// Backend exposes no reliable status.
    Unknown,
}

/// Delivery status snapshot for a previously sent message.
#[derive(Debug, Clone)]
pub struct DeliveryStatus {
    /// Normalised state.
    pub state: DeliveryState,
    /// Backend error as `"<code>: <message>"`, if any.
    pub error: Option<String>,
    /// When the status was observed.
    pub checked_at: chrono::DateTime<chrono::Utc>,
}

impl DeliveryStatus {
    /// Status for providers that expose no reliable acknowledgement.
    pub fn unknown() -> Self {
        Self {
            state: DeliveryState::Unknown,
            error: None,
            checked_at: chrono::Utc::now(),
        }
    }
}
