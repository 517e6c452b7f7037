//! Webhook authenticity checks and provider event normalization.
//!
//! Signature verification is HMAC-SHA256 over the raw body with a shared
//! per-adapter secret, hex-encoded in the signature header. Normalizers fold
//! the provider-family event shapes into `ChannelDeliveryEvent`s; unknown
//! event kinds are skipped, malformed payloads are errors.

use anyhow::{bail, Context, Result};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::debug;

use courier_contract::ChannelDeliveryState;

use crate::channel_adapter::{ChannelDeliveryEvent, EngagementSignal};

type HmacSha256 = Hmac<Sha256>;

fn decode_hex(raw: &str) -> Result<Vec<u8>> {
    let trimmed = raw.trim();
    if !trimmed.is_ascii() {
        bail!("signature is not valid hex");
    }
    if trimmed.len() % 2 != 0 {
        bail!("signature hex has odd length");
    }
    trimmed
        .as_bytes()
        .chunks_exact(2)
        .map(|pair| {
            let pair = std::str::from_utf8(pair).expect("ascii input stays utf-8");
            u8::from_str_radix(pair, 16).context("signature is not valid hex")
        })
        .collect()
}

/// Computes the hex HMAC-SHA256 tag for a payload body. Test helper and
/// reference for collaborators producing signed callbacks.
pub fn sign_webhook_body(secret: &str, body: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key size");
    mac.update(body.as_bytes());
    mac.finalize()
        .into_bytes()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

/// Verifies an inbound webhook signature in constant time.
pub fn verify_webhook_signature(secret: &str, body: &str, signature_hex: &str) -> Result<()> {
    let expected = decode_hex(signature_hex)?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key size");
    mac.update(body.as_bytes());
    mac.verify_slice(&expected)
        .map_err(|_| anyhow::anyhow!("webhook signature mismatch"))
}

#[derive(Debug, Deserialize)]
struct EmailProviderEvent {
    event: String,
    message_id: String,
    /// Unix seconds, the convention email providers batch events with.
    timestamp: u64,
    #[serde(default)]
    reason: Option<String>,
}

/// Normalizes an email provider's batched event array.
///
/// `delivered`/`bounce`/`spamreport`/`dropped` advance the status record;
/// `open` maps to the `read` state, `click` and `unsubscribe` are
/// engagement-only.
pub fn normalize_email_events(raw: &str) -> Result<Vec<ChannelDeliveryEvent>> {
    let entries: Vec<EmailProviderEvent> =
        serde_json::from_str(raw).context("failed to parse email webhook payload")?;
    let mut events = Vec::with_capacity(entries.len());
    for entry in entries {
        if entry.message_id.trim().is_empty() {
            bail!("email webhook event has empty message_id");
        }
        let timestamp_unix_ms = entry.timestamp.saturating_mul(1_000);
        let (transition, engagement) = match entry.event.trim().to_ascii_lowercase().as_str() {
            "delivered" => (Some(ChannelDeliveryState::Delivered), None),
            "open" | "opened" => (Some(ChannelDeliveryState::Read), Some(EngagementSignal::Opened)),
            "click" | "clicked" => (None, Some(EngagementSignal::Clicked)),
            "bounce" | "bounced" => (Some(ChannelDeliveryState::Bounced), None),
            "spamreport" | "complained" => (Some(ChannelDeliveryState::Complained), None),
            "unsubscribe" | "unsubscribed" => (None, Some(EngagementSignal::Unsubscribed)),
            "dropped" | "failed" => (Some(ChannelDeliveryState::Failed), None),
            other => {
                debug!(event = other, "skipping unrecognized email webhook event");
                continue;
            }
        };
        events.push(ChannelDeliveryEvent {
            provider_message_id: entry.message_id,
            transition,
            timestamp_unix_ms,
            reason: entry.reason,
            engagement,
        });
    }
    Ok(events)
}

#[derive(Debug, Deserialize)]
struct MessagingStatusEvent {
    message_id: String,
    status: String,
    timestamp: u64,
    #[serde(default)]
    error_message: Option<String>,
}

/// Normalizes an SMS/WhatsApp style status callback (single object).
pub fn normalize_messaging_status_event(raw: &str) -> Result<Vec<ChannelDeliveryEvent>> {
    let entry: MessagingStatusEvent =
        serde_json::from_str(raw).context("failed to parse messaging status payload")?;
    if entry.message_id.trim().is_empty() {
        bail!("messaging status event has empty message_id");
    }
    let transition = match entry.status.trim().to_ascii_lowercase().as_str() {
        "queued" | "accepted" => None,
        "sent" => Some(ChannelDeliveryState::Sent),
        "delivered" => Some(ChannelDeliveryState::Delivered),
        "read" => Some(ChannelDeliveryState::Read),
        "failed" | "undelivered" => Some(ChannelDeliveryState::Failed),
        other => {
            debug!(status = other, "skipping unrecognized messaging status");
            None
        }
    };
    let Some(transition) = transition else {
        return Ok(Vec::new());
    };
    Ok(vec![ChannelDeliveryEvent {
        provider_message_id: entry.message_id,
        transition: Some(transition),
        timestamp_unix_ms: entry.timestamp.saturating_mul(1_000),
        reason: entry.error_message,
        engagement: if transition == ChannelDeliveryState::Read {
            Some(EngagementSignal::Opened)
        } else {
            None
        },
    }])
}

#[derive(Debug, Deserialize)]
struct PushReceiptEvent {
    message_id: String,
    status: String,
    timestamp: u64,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    clicked: bool,
}

/// Normalizes a push provider's receipt array.
pub fn normalize_push_receipt_events(raw: &str) -> Result<Vec<ChannelDeliveryEvent>> {
    let entries: Vec<PushReceiptEvent> =
        serde_json::from_str(raw).context("failed to parse push receipt payload")?;
    let mut events = Vec::with_capacity(entries.len());
    for entry in entries {
        if entry.message_id.trim().is_empty() {
            bail!("push receipt event has empty message_id");
        }
        let transition = match entry.status.trim().to_ascii_lowercase().as_str() {
            "delivered" => Some(ChannelDeliveryState::Delivered),
            "opened" => Some(ChannelDeliveryState::Read),
            "failed" | "unregistered" => Some(ChannelDeliveryState::Failed),
            other => {
                debug!(status = other, "skipping unrecognized push receipt status");
                continue;
            }
        };
        let engagement = if entry.clicked {
            Some(EngagementSignal::Clicked)
        } else if transition == Some(ChannelDeliveryState::Read) {
            Some(EngagementSignal::Opened)
        } else {
            None
        };
        events.push(ChannelDeliveryEvent {
            provider_message_id: entry.message_id,
            transition,
            timestamp_unix_ms: entry.timestamp.saturating_mul(1_000),
            reason: entry.reason,
            engagement,
        });
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::{
        normalize_email_events, normalize_messaging_status_event, normalize_push_receipt_events,
        sign_webhook_body, verify_webhook_signature,
    };
    use crate::channel_adapter::EngagementSignal;
    use courier_contract::ChannelDeliveryState;

    #[test]
    fn unit_signature_roundtrip_verifies_and_rejects_tampering() {
        let body = r#"[{"event":"delivered","message_id":"m-1","timestamp":10}]"#;
        let signature = sign_webhook_body("secret", body);
        verify_webhook_signature("secret", body, &signature).expect("valid signature");
        verify_webhook_signature("secret", "tampered", &signature)
            .expect_err("tampered body should fail");
        verify_webhook_signature("other", body, &signature)
            .expect_err("wrong secret should fail");
        verify_webhook_signature("secret", body, "zz").expect_err("non-hex should fail");
    }

    #[test]
    fn regression_multibyte_signature_is_rejected_not_a_panic() {
        let error = verify_webhook_signature("secret", "body", "aéaé")
            .expect_err("non-ascii signature should fail");
        assert!(error.to_string().contains("not valid hex"));
    }

    #[test]
    fn functional_email_events_map_to_status_and_engagement() {
        let raw = r#"[
  {"event": "delivered", "message_id": "m-1", "timestamp": 100},
  {"event": "open", "message_id": "m-1", "timestamp": 160},
  {"event": "click", "message_id": "m-1", "timestamp": 170},
  {"event": "bounce", "message_id": "m-2", "timestamp": 110, "reason": "mailbox full"},
  {"event": "processed", "message_id": "m-3", "timestamp": 90}
]"#;
        let events = normalize_email_events(raw).expect("normalize");
        assert_eq!(events.len(), 4);
        assert_eq!(events[0].transition, Some(ChannelDeliveryState::Delivered));
        assert_eq!(events[0].timestamp_unix_ms, 100_000);
        assert_eq!(events[1].transition, Some(ChannelDeliveryState::Read));
        assert_eq!(events[1].engagement, Some(EngagementSignal::Opened));
        assert_eq!(events[2].transition, None);
        assert_eq!(events[2].engagement, Some(EngagementSignal::Clicked));
        assert_eq!(events[3].transition, Some(ChannelDeliveryState::Bounced));
        assert_eq!(events[3].reason.as_deref(), Some("mailbox full"));
    }

    #[test]
    fn unit_messaging_status_maps_terminal_and_read_states() {
        let delivered = r#"{"message_id": "wa-1", "status": "delivered", "timestamp": 55}"#;
        let events = normalize_messaging_status_event(delivered).expect("normalize");
        assert_eq!(events[0].transition, Some(ChannelDeliveryState::Delivered));

        let failed =
            r#"{"message_id": "wa-2", "status": "undelivered", "timestamp": 56, "error_message": "blocked"}"#;
        let events = normalize_messaging_status_event(failed).expect("normalize");
        assert_eq!(events[0].transition, Some(ChannelDeliveryState::Failed));
        assert_eq!(events[0].reason.as_deref(), Some("blocked"));

        let queued = r#"{"message_id": "wa-3", "status": "queued", "timestamp": 57}"#;
        assert!(normalize_messaging_status_event(queued)
            .expect("normalize")
            .is_empty());
    }

    #[test]
    fn regression_push_receipts_carry_click_engagement() {
        let raw = r#"[
  {"message_id": "p-1", "status": "opened", "timestamp": 70, "clicked": true},
  {"message_id": "p-2", "status": "unregistered", "timestamp": 71, "reason": "token expired"}
]"#;
        let events = normalize_push_receipt_events(raw).expect("normalize");
        assert_eq!(events[0].engagement, Some(EngagementSignal::Clicked));
        assert_eq!(events[1].transition, Some(ChannelDeliveryState::Failed));
    }

    #[test]
    fn unit_normalizers_reject_empty_message_ids() {
        let raw = r#"[{"event": "delivered", "message_id": " ", "timestamp": 100}]"#;
        let error = normalize_email_events(raw).expect_err("empty id should fail");
        assert!(error.to_string().contains("empty message_id"));
    }
}
