//! Durable delivery records and per-channel status tracking.
//!
//! A `MessageDelivery` is created once per orchestrated send and never
//! deleted; per-channel `ChannelStatusRecord`s exist only for channels that
//! were actually attempted and advance forward-only as provider webhooks
//! report delivered/read/bounced outcomes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message_contract::{Channel, MessagePriority};

pub const MESSAGE_DELIVERY_SCHEMA_VERSION: u32 = 1;

fn message_delivery_schema_version() -> u32 {
    MESSAGE_DELIVERY_SCHEMA_VERSION
}

/// Failure reason recorded when every attempted channel fails.
pub const ALL_CHANNELS_FAILED_REASON: &str = "all channels failed";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// Lifecycle states for a delivery record.
pub enum DeliveryState {
    /// Created and waiting for immediate or scheduled dispatch.
    Pending,
    /// Channel fan-out is in flight.
    Processing,
    /// At least one attempted channel succeeded.
    Sent,
    /// Every attempted channel failed.
    Failed,
}

impl DeliveryState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// Per-channel delivery outcome, advanced by provider webhook events.
pub enum ChannelDeliveryState {
    Pending,
    Sent,
    Delivered,
    Read,
    Failed,
    Bounced,
    Complained,
}

impl ChannelDeliveryState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Read => "read",
            Self::Failed => "failed",
            Self::Bounced => "bounced",
            Self::Complained => "complained",
        }
    }

    /// True for the success lane (`sent` and anything past it).
    pub fn is_success(self) -> bool {
        matches!(self, Self::Sent | Self::Delivered | Self::Read)
    }

    pub fn is_failure(self) -> bool {
        matches!(self, Self::Failed | Self::Bounced | Self::Complained)
    }

    /// Position inside the success lane; webhook replays and out-of-order
    /// events must never move a record backwards.
    fn success_rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Sent => 1,
            Self::Delivered => 2,
            Self::Read => 3,
            Self::Failed | Self::Bounced | Self::Complained => 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Per-channel outcome record attached to a delivery.
pub struct ChannelStatusRecord {
    pub channel: Channel,
    pub status: ChannelDeliveryState,
    #[serde(default)]
    pub adapter: String,
    #[serde(default)]
    pub provider_message_id: Option<String>,
    pub attempted_unix_ms: u64,
    #[serde(default)]
    pub sent_unix_ms: Option<u64>,
    #[serde(default)]
    pub delivered_unix_ms: Option<u64>,
    #[serde(default)]
    pub read_unix_ms: Option<u64>,
    #[serde(default)]
    pub failed_unix_ms: Option<u64>,
    #[serde(default)]
    pub failure_reason: Option<String>,
}

impl ChannelStatusRecord {
    pub fn attempted(channel: Channel, attempted_unix_ms: u64) -> Self {
        Self {
            channel,
            status: ChannelDeliveryState::Pending,
            adapter: String::new(),
            provider_message_id: None,
            attempted_unix_ms,
            sent_unix_ms: None,
            delivered_unix_ms: None,
            read_unix_ms: None,
            failed_unix_ms: None,
            failure_reason: None,
        }
    }

    /// Applies a normalized delivery transition.
    ///
    /// Success-lane transitions are forward-only; failure transitions always
    /// record their reason and timestamp. Returns true when the record moved.
    pub fn apply_transition(
        &mut self,
        next: ChannelDeliveryState,
        timestamp_unix_ms: u64,
        reason: Option<&str>,
    ) -> bool {
        if next.is_failure() {
            if self.status == next {
                return false;
            }
            self.status = next;
            self.failed_unix_ms = Some(timestamp_unix_ms);
            self.failure_reason = reason.map(str::to_string);
            return true;
        }
        if next.success_rank() <= self.status.success_rank() {
            return false;
        }
        self.status = next;
        match next {
            ChannelDeliveryState::Sent => self.sent_unix_ms = Some(timestamp_unix_ms),
            ChannelDeliveryState::Delivered => self.delivered_unix_ms = Some(timestamp_unix_ms),
            ChannelDeliveryState::Read => self.read_unix_ms = Some(timestamp_unix_ms),
            _ => {}
        }
        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// One orchestrated send attempt. Created once, mutated as dispatch
/// completes, kept forever as the audit trail.
pub struct MessageDelivery {
    #[serde(default = "message_delivery_schema_version")]
    pub schema_version: u32,
    pub delivery_id: String,
    pub template_key: String,
    pub user_id: String,
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub variables: BTreeMap<String, Value>,
    pub status: DeliveryState,
    #[serde(default)]
    pub priority: MessagePriority,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sent_unix_ms: Option<u64>,
    #[serde(default)]
    pub failed_unix_ms: Option<u64>,
    #[serde(default)]
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub channel_statuses: Vec<ChannelStatusRecord>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_unix_ms: u64,
    pub updated_unix_ms: u64,
}

impl MessageDelivery {
    pub fn new(
        delivery_id: impl Into<String>,
        template_key: impl Into<String>,
        user_id: impl Into<String>,
        channels: Vec<Channel>,
        variables: BTreeMap<String, Value>,
        priority: MessagePriority,
        created_unix_ms: u64,
    ) -> Self {
        Self {
            schema_version: MESSAGE_DELIVERY_SCHEMA_VERSION,
            delivery_id: delivery_id.into(),
            template_key: template_key.into(),
            user_id: user_id.into(),
            channels,
            variables,
            status: DeliveryState::Pending,
            priority,
            scheduled_at: None,
            sent_unix_ms: None,
            failed_unix_ms: None,
            failure_reason: None,
            channel_statuses: Vec::new(),
            metadata: BTreeMap::new(),
            tags: Vec::new(),
            created_unix_ms,
            updated_unix_ms: created_unix_ms,
        }
    }

    pub fn status_record_mut(&mut self, channel: Channel) -> Option<&mut ChannelStatusRecord> {
        self.channel_statuses
            .iter_mut()
            .find(|record| record.channel == channel)
    }

    pub fn mark_processing(&mut self, now_unix_ms: u64) {
        self.status = DeliveryState::Processing;
        self.updated_unix_ms = now_unix_ms;
    }

    /// Fan-in barrier outcome: `sent` when at least one attempted channel
    /// reported success, `failed` otherwise.
    pub fn finalize(&mut self, now_unix_ms: u64) {
        let any_success = self
            .channel_statuses
            .iter()
            .any(|record| record.status.is_success());
        if any_success {
            self.status = DeliveryState::Sent;
            self.sent_unix_ms = Some(now_unix_ms);
        } else {
            self.status = DeliveryState::Failed;
            self.failed_unix_ms = Some(now_unix_ms);
            self.failure_reason = Some(ALL_CHANNELS_FAILED_REASON.to_string());
        }
        self.updated_unix_ms = now_unix_ms;
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>, now_unix_ms: u64) {
        self.status = DeliveryState::Failed;
        self.failed_unix_ms = Some(now_unix_ms);
        self.failure_reason = Some(reason.into());
        self.updated_unix_ms = now_unix_ms;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// Queue entry carrying a deferred delivery's target fire time.
pub struct ScheduledQueueEntry {
    pub delivery_id: String,
    pub fire_at: DateTime<Utc>,
    pub enqueued_unix_ms: u64,
}
