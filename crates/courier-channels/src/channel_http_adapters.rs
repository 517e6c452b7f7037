//! HTTP-backed provider adapters, one per external transport.
//!
//! Each adapter shapes a JSON send payload for its channel, posts it with a
//! hard per-adapter timeout, and classifies responses into retryable versus
//! terminal structured errors. Webhook handling verifies the HMAC signature
//! when a secret is configured, then runs the channel's normalizer.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::{redirect::Policy, StatusCode};
use serde_json::{json, Value};
use tracing::debug;

use courier_contract::{Channel, ChannelAddress};

use crate::channel_adapter::{
    ChannelAdapter, ChannelAdapterError, ChannelAdapterResult, ChannelDeliveryEvent,
    ChannelSendReceipt, WebhookPayload,
};
use crate::channel_render::RenderedContent;
use crate::channel_webhook::{
    normalize_email_events, normalize_messaging_status_event, normalize_push_receipt_events,
    verify_webhook_signature,
};

const DEFAULT_ADAPTER_TIMEOUT_MS: u64 = 10_000;
const MAX_ERROR_BODY_CHARS: usize = 512;

#[derive(Debug, Clone)]
/// Configuration for one HTTP transport adapter.
pub struct HttpChannelAdapterConfig {
    pub channel: Channel,
    pub adapter_name: &'static str,
    pub api_base: String,
    pub send_path: String,
    pub api_key: Option<String>,
    pub webhook_secret: Option<String>,
    pub timeout_ms: u64,
}

impl HttpChannelAdapterConfig {
    pub fn email() -> Self {
        Self {
            channel: Channel::Email,
            adapter_name: "http-email",
            api_base: "https://api.mailer.example".to_string(),
            send_path: "/v1/mail/send".to_string(),
            api_key: None,
            webhook_secret: None,
            timeout_ms: DEFAULT_ADAPTER_TIMEOUT_MS,
        }
    }

    pub fn push() -> Self {
        Self {
            channel: Channel::Push,
            adapter_name: "http-push",
            api_base: "https://push.gateway.example".to_string(),
            send_path: "/v1/push/send".to_string(),
            api_key: None,
            webhook_secret: None,
            timeout_ms: DEFAULT_ADAPTER_TIMEOUT_MS,
        }
    }

    pub fn whatsapp() -> Self {
        Self {
            channel: Channel::Whatsapp,
            adapter_name: "http-whatsapp",
            api_base: "https://graph.messaging.example/v20.0".to_string(),
            send_path: "/messages".to_string(),
            api_key: None,
            webhook_secret: None,
            timeout_ms: DEFAULT_ADAPTER_TIMEOUT_MS,
        }
    }

    pub fn sms() -> Self {
        Self {
            channel: Channel::Sms,
            adapter_name: "http-sms",
            api_base: "https://sms.gateway.example".to_string(),
            send_path: "/v1/sms/send".to_string(),
            api_key: None,
            webhook_secret: None,
            timeout_ms: DEFAULT_ADAPTER_TIMEOUT_MS,
        }
    }

    /// Applies `COURIER_<CHANNEL>_API_BASE` / `_API_KEY` / `_WEBHOOK_SECRET`
    /// and `COURIER_<CHANNEL>_TIMEOUT_MS` environment overrides.
    pub fn with_env_overrides(mut self) -> Self {
        let prefix = format!("COURIER_{}", self.channel.as_str().to_ascii_uppercase());
        let read = |suffix: &str| {
            std::env::var(format!("{prefix}_{suffix}"))
                .ok()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        if let Some(api_base) = read("API_BASE") {
            self.api_base = api_base;
        }
        if let Some(api_key) = read("API_KEY") {
            self.api_key = Some(api_key);
        }
        if let Some(secret) = read("WEBHOOK_SECRET") {
            self.webhook_secret = Some(secret);
        }
        if let Some(timeout) = read("TIMEOUT_MS").and_then(|raw| raw.parse::<u64>().ok()) {
            self.timeout_ms = timeout;
        }
        self
    }
}

#[derive(Debug, Clone)]
/// Provider adapter speaking JSON over HTTP for one external channel.
pub struct HttpChannelAdapter {
    config: HttpChannelAdapterConfig,
    client: reqwest::Client,
}

impl HttpChannelAdapter {
    pub fn new(config: HttpChannelAdapterConfig) -> Result<Self> {
        if config.channel == Channel::Inapp {
            bail!("inapp delivery is inbox-backed and has no HTTP adapter");
        }
        if config.timeout_ms == 0 {
            bail!("http channel adapter requires a timeout > 0");
        }
        if config.api_base.trim().is_empty() {
            bail!("http channel adapter requires a non-empty api base");
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .redirect(Policy::none())
            .build()
            .context("failed to build channel adapter http client")?;
        Ok(Self { config, client })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.send_path
        )
    }

    fn build_payload(
        &self,
        destination: &ChannelAddress,
        content: &RenderedContent,
    ) -> ChannelAdapterResult<Value> {
        let adapter = self.config.adapter_name;
        match (destination, content) {
            (ChannelAddress::Email(address), RenderedContent::Email(email)) => Ok(json!({
                "to": address,
                "subject": email.subject,
                "preheader": email.preheader,
                "html": email.html_body,
                "text": email.text_body,
            })),
            (ChannelAddress::PushTokens(tokens), RenderedContent::Push(push)) => Ok(json!({
                "tokens": tokens,
                "title": push.title,
                "body": push.body,
                "click_action": push.click_action,
                "deep_link": push.deep_link,
            })),
            (ChannelAddress::WhatsappNumber(number), RenderedContent::Whatsapp(whatsapp)) => {
                let parameters: Vec<Value> = whatsapp
                    .parameters
                    .iter()
                    .map(|parameter| {
                        json!({
                            "type": parameter.kind.as_str(),
                            "value": parameter.value,
                            "currency_code": parameter.currency_code,
                        })
                    })
                    .collect();
                Ok(json!({
                    "to": number,
                    "template": {
                        "name": whatsapp.template_name,
                        "language": whatsapp.language,
                        "parameters": parameters,
                    },
                }))
            }
            (ChannelAddress::Phone(number), RenderedContent::Sms(sms)) => Ok(json!({
                "to": number,
                "body": sms.body,
            })),
            _ => Err(ChannelAdapterError::invalid_input(
                adapter,
                format!(
                    "destination does not match {} content",
                    content.channel().as_str()
                ),
            )),
        }
    }

    fn classify_error_status(&self, status: StatusCode, body: &str) -> ChannelAdapterError {
        let adapter = self.config.adapter_name;
        let detail: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
        let message = format!("provider returned {}: {detail}", status.as_u16());
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                ChannelAdapterError::auth_failed(adapter, message)
            }
            StatusCode::TOO_MANY_REQUESTS => ChannelAdapterError::rate_limited(adapter, message),
            status if status.is_server_error() => {
                ChannelAdapterError::backend_unavailable(adapter, message)
            }
            _ => ChannelAdapterError::invalid_input(adapter, message),
        }
    }
}

#[async_trait]
impl ChannelAdapter for HttpChannelAdapter {
    fn channel(&self) -> Channel {
        self.config.channel
    }

    fn adapter_name(&self) -> &'static str {
        self.config.adapter_name
    }

    async fn send(
        &self,
        destination: &ChannelAddress,
        content: &RenderedContent,
    ) -> ChannelAdapterResult<ChannelSendReceipt> {
        let adapter = self.config.adapter_name;
        let payload = self.build_payload(destination, content)?;
        let endpoint = self.endpoint();
        debug!(adapter, endpoint = endpoint.as_str(), "dispatching channel send");

        let mut request = self.client.post(&endpoint).json(&payload);
        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }
        let response = request.send().await.map_err(|error| {
            if error.is_timeout() {
                ChannelAdapterError::timeout(
                    adapter,
                    format!("provider call exceeded {}ms", self.config.timeout_ms),
                )
            } else {
                ChannelAdapterError::backend_unavailable(adapter, error.to_string())
            }
        })?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(self.classify_error_status(status, &body));
        }

        let parsed: Value = serde_json::from_str(&body).map_err(|_| {
            ChannelAdapterError::invalid_response(adapter, "provider response is not json")
        })?;
        let provider_message_id = parsed
            .get("message_id")
            .or_else(|| parsed.get("id"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                ChannelAdapterError::invalid_response(
                    adapter,
                    "provider response is missing message_id",
                )
            })?
            .to_string();

        Ok(ChannelSendReceipt {
            channel: self.config.channel,
            adapter: adapter.to_string(),
            provider_message_id,
            http_status: Some(status.as_u16()),
            accepted_unix_ms: courier_core::current_unix_timestamp_ms(),
        })
    }

    fn handle_webhook(&self, payload: &WebhookPayload) -> Result<Vec<ChannelDeliveryEvent>> {
        if let Some(secret) = &self.config.webhook_secret {
            let signature = payload
                .signature
                .as_deref()
                .context("webhook payload is missing its signature header")?;
            verify_webhook_signature(secret, &payload.body, signature)?;
        }
        match self.config.channel {
            Channel::Email => normalize_email_events(&payload.body),
            Channel::Push => normalize_push_receipt_events(&payload.body),
            Channel::Whatsapp | Channel::Sms => normalize_messaging_status_event(&payload.body),
            Channel::Inapp => bail!("inapp channel has no webhook surface"),
        }
    }
}
