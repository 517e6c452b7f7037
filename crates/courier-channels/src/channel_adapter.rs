//! Provider adapter contract shared by every channel transport.
//!
//! The orchestrator depends only on this trait: `send` dispatches rendered
//! content to one destination, `handle_webhook` normalizes a provider's
//! delivery callbacks into the shared status transition model. Adapter
//! failures are structured (code, retryable flag, message) so per-channel
//! outcomes can be recorded without aborting sibling channels.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use courier_contract::{Channel, ChannelAddress, ChannelDeliveryState};

use crate::channel_render::RenderedContent;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `ChannelAdapterErrorCode` values.
pub enum ChannelAdapterErrorCode {
    InvalidInput,
    InvalidResponse,
    AuthFailed,
    Timeout,
    RateLimited,
    BackendUnavailable,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// Structured per-adapter failure captured on the channel's status record.
pub struct ChannelAdapterError {
    pub code: ChannelAdapterErrorCode,
    pub adapter: String,
    pub retryable: bool,
    pub message: String,
}

impl ChannelAdapterError {
    pub fn invalid_input(adapter: &str, message: impl Into<String>) -> Self {
        Self {
            code: ChannelAdapterErrorCode::InvalidInput,
            adapter: adapter.to_string(),
            retryable: false,
            message: message.into(),
        }
    }

    pub fn invalid_response(adapter: &str, message: impl Into<String>) -> Self {
        Self {
            code: ChannelAdapterErrorCode::InvalidResponse,
            adapter: adapter.to_string(),
            retryable: false,
            message: message.into(),
        }
    }

    pub fn auth_failed(adapter: &str, message: impl Into<String>) -> Self {
        Self {
            code: ChannelAdapterErrorCode::AuthFailed,
            adapter: adapter.to_string(),
            retryable: false,
            message: message.into(),
        }
    }

    pub fn timeout(adapter: &str, message: impl Into<String>) -> Self {
        Self {
            code: ChannelAdapterErrorCode::Timeout,
            adapter: adapter.to_string(),
            retryable: true,
            message: message.into(),
        }
    }

    pub fn rate_limited(adapter: &str, message: impl Into<String>) -> Self {
        Self {
            code: ChannelAdapterErrorCode::RateLimited,
            adapter: adapter.to_string(),
            retryable: true,
            message: message.into(),
        }
    }

    pub fn backend_unavailable(adapter: &str, message: impl Into<String>) -> Self {
        Self {
            code: ChannelAdapterErrorCode::BackendUnavailable,
            adapter: adapter.to_string(),
            retryable: true,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ChannelAdapterError {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            formatter,
            "channel adapter error: adapter={} code={:?} retryable={} message={}",
            self.adapter, self.code, self.retryable, self.message
        )
    }
}

impl std::error::Error for ChannelAdapterError {}

pub type ChannelAdapterResult<T> = Result<T, ChannelAdapterError>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// Successful dispatch acknowledgement from a provider.
pub struct ChannelSendReceipt {
    pub channel: Channel,
    pub adapter: String,
    pub provider_message_id: String,
    #[serde(default)]
    pub http_status: Option<u16>,
    pub accepted_unix_ms: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// Engagement feedback extracted from webhook events; feeds preference
/// learning and unsubscribe handling rather than status transitions.
pub enum EngagementSignal {
    Opened,
    Clicked,
    Unsubscribed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// Normalized delivery event produced from one provider webhook entry.
pub struct ChannelDeliveryEvent {
    pub provider_message_id: String,
    /// `None` for engagement-only events such as clicks.
    pub transition: Option<ChannelDeliveryState>,
    pub timestamp_unix_ms: u64,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub engagement: Option<EngagementSignal>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Raw webhook payload handed to an adapter, signature header included.
pub struct WebhookPayload {
    pub body: String,
    pub signature: Option<String>,
}

impl WebhookPayload {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            signature: None,
        }
    }

    pub fn signed(body: impl Into<String>, signature: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            signature: Some(signature.into()),
        }
    }
}

#[async_trait]
/// Trait contract for `ChannelAdapter` behavior.
///
/// One implementation per external transport; adapters are interchangeable
/// and selected via configuration, never via provider-specific call sites.
pub trait ChannelAdapter: Send + Sync {
    fn channel(&self) -> Channel;

    fn adapter_name(&self) -> &'static str;

    async fn send(
        &self,
        destination: &ChannelAddress,
        content: &RenderedContent,
    ) -> ChannelAdapterResult<ChannelSendReceipt>;

    /// Verifies authenticity and normalizes provider events.
    fn handle_webhook(&self, payload: &WebhookPayload) -> Result<Vec<ChannelDeliveryEvent>>;
}

#[derive(Debug, Clone)]
/// One dispatch captured by the deterministic adapter.
pub struct RecordedSend {
    pub destination: ChannelAddress,
    pub content: RenderedContent,
    pub provider_message_id: String,
}

/// In-memory adapter used by tests and embedding callers.
///
/// Succeeds with sequential provider ids until `fail_with` flips it into
/// returning the configured failure for every send.
pub struct DeterministicChannelAdapter {
    channel: Channel,
    sends: Mutex<Vec<RecordedSend>>,
    counter: AtomicU64,
    failing: AtomicBool,
    failure_message: Mutex<String>,
}

impl DeterministicChannelAdapter {
    const ADAPTER_NAME: &'static str = "deterministic-mock";

    pub fn new(channel: Channel) -> Arc<Self> {
        Arc::new(Self {
            channel,
            sends: Mutex::new(Vec::new()),
            counter: AtomicU64::new(1),
            failing: AtomicBool::new(false),
            failure_message: Mutex::new("provider unavailable".to_string()),
        })
    }

    pub fn fail_with(&self, message: impl Into<String>) {
        if let Ok(mut failure) = self.failure_message.lock() {
            *failure = message.into();
        }
        self.failing.store(true, Ordering::SeqCst);
    }

    pub fn recover(&self) {
        self.failing.store(false, Ordering::SeqCst);
    }

    pub fn sends(&self) -> Vec<RecordedSend> {
        self.sends.lock().map(|sends| sends.clone()).unwrap_or_default()
    }

    pub fn send_count(&self) -> usize {
        self.sends.lock().map(|sends| sends.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ChannelAdapter for DeterministicChannelAdapter {
    fn channel(&self) -> Channel {
        self.channel
    }

    fn adapter_name(&self) -> &'static str {
        Self::ADAPTER_NAME
    }

    async fn send(
        &self,
        destination: &ChannelAddress,
        content: &RenderedContent,
    ) -> ChannelAdapterResult<ChannelSendReceipt> {
        if content.channel() != self.channel {
            return Err(ChannelAdapterError::invalid_input(
                Self::ADAPTER_NAME,
                format!(
                    "adapter for {} received {} content",
                    self.channel.as_str(),
                    content.channel().as_str()
                ),
            ));
        }
        if self.failing.load(Ordering::SeqCst) {
            let message = self
                .failure_message
                .lock()
                .map(|failure| failure.clone())
                .unwrap_or_else(|_| "provider unavailable".to_string());
            return Err(ChannelAdapterError::backend_unavailable(
                Self::ADAPTER_NAME,
                message,
            ));
        }
        let sequence = self.counter.fetch_add(1, Ordering::SeqCst);
        let provider_message_id = format!("{}-{}-{}", self.channel.as_str(), "msg", sequence);
        if let Ok(mut sends) = self.sends.lock() {
            sends.push(RecordedSend {
                destination: destination.clone(),
                content: content.clone(),
                provider_message_id: provider_message_id.clone(),
            });
        }
        Ok(ChannelSendReceipt {
            channel: self.channel,
            adapter: Self::ADAPTER_NAME.to_string(),
            provider_message_id,
            http_status: None,
            accepted_unix_ms: courier_core::current_unix_timestamp_ms(),
        })
    }

    fn handle_webhook(&self, payload: &WebhookPayload) -> Result<Vec<ChannelDeliveryEvent>> {
        let event: ChannelDeliveryEvent = serde_json::from_str(&payload.body)?;
        Ok(vec![event])
    }
}
