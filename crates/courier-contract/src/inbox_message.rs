//! Durable in-app inbox entries.
//!
//! Exactly one inbox message is written per dispatched delivery, independent
//! of external channel outcomes. Read/archive/star mutations belong to the UI
//! layer; expiry is evaluated against the stored timestamp.

use serde::{Deserialize, Serialize};

use crate::message_contract::{
    Channel, InboxAction, InboxMessageKind, MessageCategory, MessagePriority,
};

pub const INBOX_MESSAGE_SCHEMA_VERSION: u32 = 1;

fn inbox_message_schema_version() -> u32 {
    INBOX_MESSAGE_SCHEMA_VERSION
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// Durable in-app notification owned by one user.
pub struct InboxMessage {
    #[serde(default = "inbox_message_schema_version")]
    pub schema_version: u32,
    pub message_id: String,
    pub user_id: String,
    pub kind: InboxMessageKind,
    pub title: String,
    pub body: String,
    pub template_key: String,
    #[serde(default)]
    pub category: MessageCategory,
    #[serde(default)]
    pub priority: MessagePriority,
    #[serde(default)]
    pub action: Option<InboxAction>,
    /// First channel the originating delivery attempted, when known.
    #[serde(default)]
    pub source_channel: Option<Channel>,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub read_unix_ms: Option<u64>,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub archived_unix_ms: Option<u64>,
    #[serde(default)]
    pub starred: bool,
    #[serde(default)]
    pub expires_unix_ms: Option<u64>,
    pub created_unix_ms: u64,
}

impl InboxMessage {
    pub fn new(
        message_id: impl Into<String>,
        user_id: impl Into<String>,
        kind: InboxMessageKind,
        title: impl Into<String>,
        body: impl Into<String>,
        created_unix_ms: u64,
    ) -> Self {
        Self {
            schema_version: INBOX_MESSAGE_SCHEMA_VERSION,
            message_id: message_id.into(),
            user_id: user_id.into(),
            kind,
            title: title.into(),
            body: body.into(),
            template_key: String::new(),
            category: MessageCategory::default(),
            priority: MessagePriority::default(),
            action: None,
            source_channel: None,
            read: false,
            read_unix_ms: None,
            archived: false,
            archived_unix_ms: None,
            starred: false,
            expires_unix_ms: None,
            created_unix_ms,
        }
    }

    /// Returns true when an expiry is set and no longer in the future.
    pub fn is_expired(&self, now_unix_ms: u64) -> bool {
        courier_core::is_expired_unix_ms(self.expires_unix_ms, now_unix_ms)
    }

    pub fn mark_read(&mut self, now_unix_ms: u64) {
        if !self.read {
            self.read = true;
            self.read_unix_ms = Some(now_unix_ms);
        }
    }

    pub fn mark_archived(&mut self, now_unix_ms: u64) {
        if !self.archived {
            self.archived = true;
            self.archived_unix_ms = Some(now_unix_ms);
        }
    }
}
