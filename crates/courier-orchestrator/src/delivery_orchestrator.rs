//! Delivery orchestration: request intake, channel fan-out, and the
//! scheduled sweep.
//!
//! A delivery record moves `pending -> processing -> {sent | failed}`.
//! External channels are dispatched concurrently and their outcomes captured
//! per channel; exactly one inbox message is written per dispatched request
//! regardless of how the external channels fared.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use futures_util::future::join_all;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use courier_channels::{
    render_channel_content, render_inbox_fallback, ChannelAdapter, ChannelDeliveryEvent,
    RenderedContent, RenderedInapp, WebhookPayload,
};
use courier_contract::{
    Channel, ChannelDeliveryState, ChannelStatusRecord, DeliveryState, InboxMessage,
    MessageDelivery, MessageRecipient, MessageRequest, MessageTemplate, ScheduledQueueEntry,
    TemplateStore,
};
use courier_core::current_unix_timestamp_ms;

use crate::channel_eligibility::determine_channels;
use crate::message_store::MessageStore;
use crate::quiet_hours::calculate_send_time;
use crate::rate_limiter::{RateLimitCaps, RateLimitExceeded, SlidingWindowRateLimiter};
use crate::recipient_directory::{update_channel_preferences, RecipientDirectory};

/// Adapter name recorded on inbox-backed in-app status records.
const INBOX_ADAPTER_NAME: &str = "inbox";

#[derive(Debug, Error)]
/// Typed failures surfaced by [`DeliveryOrchestrator::send_message`].
pub enum SendError {
    #[error("missing required field '{field}'")]
    MissingField { field: &'static str },
    #[error("template '{key}' not found")]
    TemplateNotFound { key: String },
    #[error("template '{key}' is inactive")]
    TemplateInactive { key: String },
    #[error("recipient '{user_id}' not found")]
    RecipientNotFound { user_id: String },
    #[error(transparent)]
    RateLimited(#[from] RateLimitExceeded),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// What `send_message` did with a request.
pub enum SendOutcome {
    /// No eligible channel survived filtering; nothing was recorded.
    Skipped,
    /// Delivery persisted pending and queued for the scheduled sweep.
    Scheduled {
        delivery_id: String,
        scheduled_at: chrono::DateTime<Utc>,
    },
    /// Dispatch ran synchronously and finalized the delivery.
    Dispatched {
        delivery_id: String,
        status: DeliveryState,
    },
}

#[derive(Debug, Clone)]
/// Tunables for the orchestrator; defaults match production limits.
pub struct OrchestratorConfig {
    /// Upper bound on due queue entries processed per sweep.
    pub scheduled_batch_limit: usize,
    pub rate_limit_caps: RateLimitCaps,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            scheduled_batch_limit: 100,
            rate_limit_caps: RateLimitCaps::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
/// Summary of one scheduled-sweep pass.
pub struct ScheduledSweepReport {
    pub processed: usize,
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Central coordinator for multi-channel sends.
pub struct DeliveryOrchestrator {
    templates: TemplateStore,
    store: Arc<dyn MessageStore>,
    directory: Arc<dyn RecipientDirectory>,
    adapters: BTreeMap<Channel, Arc<dyn ChannelAdapter>>,
    rate_limiter: SlidingWindowRateLimiter,
    config: OrchestratorConfig,
    delivery_counter: AtomicU64,
}

impl DeliveryOrchestrator {
    pub fn new(
        templates: TemplateStore,
        store: Arc<dyn MessageStore>,
        directory: Arc<dyn RecipientDirectory>,
        config: OrchestratorConfig,
    ) -> Self {
        let rate_limiter = SlidingWindowRateLimiter::new(config.rate_limit_caps);
        Self {
            templates,
            store,
            directory,
            adapters: BTreeMap::new(),
            rate_limiter,
            config,
            delivery_counter: AtomicU64::new(1),
        }
    }

    /// Registers the transport for the adapter's own channel, replacing any
    /// previous registration.
    pub fn register_adapter(&mut self, adapter: Arc<dyn ChannelAdapter>) {
        self.adapters.insert(adapter.channel(), adapter);
    }

    fn next_delivery_id(&self, now_unix_ms: u64) -> String {
        let sequence = self.delivery_counter.fetch_add(1, Ordering::SeqCst);
        format!("dlv-{now_unix_ms}-{sequence}")
    }

    /// Orchestrates one notification request end to end.
    pub async fn send_message(&self, request: MessageRequest) -> Result<SendOutcome, SendError> {
        if request.template_key.trim().is_empty() {
            return Err(SendError::MissingField {
                field: "template_key",
            });
        }
        if request.user_id.trim().is_empty() {
            return Err(SendError::MissingField { field: "user_id" });
        }

        let template =
            self.templates
                .get(&request.template_key)
                .ok_or_else(|| SendError::TemplateNotFound {
                    key: request.template_key.clone(),
                })?;
        if !template.is_active {
            return Err(SendError::TemplateInactive {
                key: template.key.clone(),
            });
        }
        let recipient = self
            .directory
            .resolve_recipient(&request.user_id)?
            .ok_or_else(|| SendError::RecipientNotFound {
                user_id: request.user_id.clone(),
            })?;
        let preferences = self.directory.resolve_preferences(&request.user_id)?;

        // Only channels the template actually has content for are candidates.
        let template_channels = template.channels();
        let requested: Vec<Channel> = match &request.channels {
            Some(channels) => channels
                .iter()
                .copied()
                .filter(|channel| template_channels.contains(channel))
                .collect(),
            None => template_channels,
        };
        let channels =
            determine_channels(&requested, &recipient, &preferences, template.category);
        if channels.is_empty() {
            info!(
                user_id = request.user_id.as_str(),
                template_key = request.template_key.as_str(),
                "no eligible channel, skipping request"
            );
            return Ok(SendOutcome::Skipped);
        }

        let created_ms = current_unix_timestamp_ms();
        self.rate_limiter
            .check_and_record(&request.user_id, &channels, created_ms)?;

        let delivery_id = self.next_delivery_id(created_ms);
        let mut delivery = MessageDelivery::new(
            delivery_id.clone(),
            request.template_key.clone(),
            request.user_id.clone(),
            channels,
            request.variables.clone(),
            request.priority,
            created_ms,
        );
        delivery.metadata = request.metadata.clone();
        delivery.tags = request.tags.clone();

        let now = Utc::now();
        let send_at = calculate_send_time(&request, &recipient, now);
        if send_at > now {
            delivery.scheduled_at = Some(send_at);
            self.store.insert_delivery(delivery)?;
            self.store.enqueue_scheduled(ScheduledQueueEntry {
                delivery_id: delivery_id.clone(),
                fire_at: send_at,
                enqueued_unix_ms: created_ms,
            })?;
            info!(
                delivery_id = delivery_id.as_str(),
                scheduled_at = %send_at,
                "delivery deferred"
            );
            return Ok(SendOutcome::Scheduled {
                delivery_id,
                scheduled_at: send_at,
            });
        }

        self.store.insert_delivery(delivery.clone())?;
        self.dispatch_delivery(&mut delivery, &template, &recipient)
            .await?;
        Ok(SendOutcome::Dispatched {
            delivery_id,
            status: delivery.status,
        })
    }

    /// Fans a pending delivery out across its channels and finalizes it.
    async fn dispatch_delivery(
        &self,
        delivery: &mut MessageDelivery,
        template: &MessageTemplate,
        recipient: &MessageRecipient,
    ) -> Result<()> {
        let started_ms = current_unix_timestamp_ms();
        delivery.mark_processing(started_ms);
        self.store.update_delivery(delivery)?;

        let mut send_futures = Vec::new();
        for &channel in &delivery.channels {
            if channel == Channel::Inapp {
                continue;
            }
            let mut record = ChannelStatusRecord::attempted(channel, started_ms);
            let content = match render_channel_content(
                template,
                channel,
                &delivery.variables,
                started_ms,
            ) {
                Ok(content) => content,
                Err(error) => {
                    warn!(
                        delivery_id = delivery.delivery_id.as_str(),
                        channel = channel.as_str(),
                        %error,
                        "render failed"
                    );
                    record.apply_transition(
                        ChannelDeliveryState::Failed,
                        started_ms,
                        Some(&format!("render failed: {error:#}")),
                    );
                    delivery.channel_statuses.push(record);
                    continue;
                }
            };
            let Some(destination) = recipient.address_for(channel) else {
                record.apply_transition(
                    ChannelDeliveryState::Failed,
                    started_ms,
                    Some("no contact identifier"),
                );
                delivery.channel_statuses.push(record);
                continue;
            };
            let Some(adapter) = self.adapters.get(&channel).cloned() else {
                record.apply_transition(
                    ChannelDeliveryState::Failed,
                    started_ms,
                    Some("no adapter registered"),
                );
                delivery.channel_statuses.push(record);
                continue;
            };
            record.adapter = adapter.adapter_name().to_string();
            send_futures.push(async move {
                let outcome = adapter.send(&destination, &content).await;
                (record, outcome)
            });
        }

        for (mut record, outcome) in join_all(send_futures).await {
            match outcome {
                Ok(receipt) => {
                    record.adapter = receipt.adapter;
                    record.provider_message_id = Some(receipt.provider_message_id);
                    record.apply_transition(
                        ChannelDeliveryState::Sent,
                        receipt.accepted_unix_ms,
                        None,
                    );
                }
                Err(error) => {
                    warn!(
                        delivery_id = delivery.delivery_id.as_str(),
                        channel = record.channel.as_str(),
                        %error,
                        "channel dispatch failed"
                    );
                    record.apply_transition(
                        ChannelDeliveryState::Failed,
                        current_unix_timestamp_ms(),
                        Some(&error.message),
                    );
                }
            }
            delivery.channel_statuses.push(record);
        }

        self.write_inbox_message(delivery, template, started_ms);

        let finished_ms = current_unix_timestamp_ms();
        delivery.finalize(finished_ms);
        self.store.update_delivery(delivery)?;
        info!(
            delivery_id = delivery.delivery_id.as_str(),
            status = delivery.status.as_str(),
            "delivery finalized"
        );
        Ok(())
    }

    /// Writes the one guaranteed inbox entry for a dispatched delivery, using
    /// the template's in-app block when it renders and the generic fallback
    /// otherwise.
    fn write_inbox_message(
        &self,
        delivery: &mut MessageDelivery,
        template: &MessageTemplate,
        now_unix_ms: u64,
    ) {
        let rendered = if template.content_for(Channel::Inapp).is_some() {
            match render_channel_content(template, Channel::Inapp, &delivery.variables, now_unix_ms)
            {
                Ok(RenderedContent::Inapp(inapp)) => inapp,
                Ok(_) | Err(_) => {
                    warn!(
                        delivery_id = delivery.delivery_id.as_str(),
                        "in-app render failed, writing fallback inbox entry"
                    );
                    render_inbox_fallback(template)
                }
            }
        } else {
            render_inbox_fallback(template)
        };

        let message = self.build_inbox_entry(delivery, template, rendered, now_unix_ms);
        let inapp_attempted = delivery.channels.contains(&Channel::Inapp);
        match self.store.append_inbox(message) {
            Ok(()) => {
                if inapp_attempted {
                    let mut record = ChannelStatusRecord::attempted(Channel::Inapp, now_unix_ms);
                    record.adapter = INBOX_ADAPTER_NAME.to_string();
                    record.apply_transition(ChannelDeliveryState::Sent, now_unix_ms, None);
                    delivery.channel_statuses.push(record);
                }
            }
            Err(error) => {
                warn!(
                    delivery_id = delivery.delivery_id.as_str(),
                    %error,
                    "inbox write failed"
                );
                if inapp_attempted {
                    let mut record = ChannelStatusRecord::attempted(Channel::Inapp, now_unix_ms);
                    record.adapter = INBOX_ADAPTER_NAME.to_string();
                    record.apply_transition(
                        ChannelDeliveryState::Failed,
                        now_unix_ms,
                        Some(&format!("inbox write failed: {error:#}")),
                    );
                    delivery.channel_statuses.push(record);
                }
            }
        }
    }

    fn build_inbox_entry(
        &self,
        delivery: &MessageDelivery,
        template: &MessageTemplate,
        rendered: RenderedInapp,
        now_unix_ms: u64,
    ) -> InboxMessage {
        let mut message = InboxMessage::new(
            format!("inbox-{}", delivery.delivery_id),
            delivery.user_id.clone(),
            rendered.kind,
            rendered.title,
            rendered.message,
            now_unix_ms,
        );
        message.template_key = template.key.clone();
        message.category = template.category;
        message.priority = delivery.priority;
        message.action = rendered.action;
        message.source_channel = delivery.channels.first().copied();
        message.expires_unix_ms = rendered.expires_unix_ms;
        message
    }

    /// Drains due queue entries and dispatches each one in isolation.
    pub async fn process_scheduled_messages(&self) -> Result<ScheduledSweepReport> {
        let now = Utc::now();
        let due = self
            .store
            .take_due_scheduled(now, self.config.scheduled_batch_limit)?;
        let mut report = ScheduledSweepReport {
            processed: due.len(),
            ..ScheduledSweepReport::default()
        };

        for entry in due {
            let Some(mut delivery) = self.store.load_delivery(&entry.delivery_id)? else {
                warn!(
                    delivery_id = entry.delivery_id.as_str(),
                    "scheduled entry references unknown delivery"
                );
                report.skipped += 1;
                continue;
            };
            if delivery.status != DeliveryState::Pending {
                debug!(
                    delivery_id = delivery.delivery_id.as_str(),
                    status = delivery.status.as_str(),
                    "scheduled delivery already progressed, skipping"
                );
                report.skipped += 1;
                continue;
            }

            match self.dispatch_scheduled(&mut delivery).await {
                Ok(()) => {
                    if delivery.status == DeliveryState::Sent {
                        report.sent += 1;
                    } else {
                        report.failed += 1;
                    }
                }
                Err(error) => {
                    warn!(
                        delivery_id = delivery.delivery_id.as_str(),
                        %error,
                        "scheduled dispatch failed"
                    );
                    delivery.mark_failed(format!("{error:#}"), current_unix_timestamp_ms());
                    if let Err(update_error) = self.store.update_delivery(&delivery) {
                        warn!(
                            delivery_id = delivery.delivery_id.as_str(),
                            %update_error,
                            "failed to persist scheduled failure"
                        );
                    }
                    report.failed += 1;
                }
            }
        }

        info!(
            processed = report.processed,
            sent = report.sent,
            failed = report.failed,
            skipped = report.skipped,
            "scheduled sweep complete"
        );
        Ok(report)
    }

    async fn dispatch_scheduled(&self, delivery: &mut MessageDelivery) -> Result<()> {
        let template = self
            .templates
            .get(&delivery.template_key)
            .with_context(|| format!("template '{}' not found", delivery.template_key))?;
        let recipient = self
            .directory
            .resolve_recipient(&delivery.user_id)?
            .with_context(|| format!("recipient '{}' not found", delivery.user_id))?;
        self.dispatch_delivery(delivery, &template, &recipient).await
    }

    /// Applies one normalized provider event to the delivery that owns the
    /// provider message id. Returns true when a delivery was found.
    pub fn apply_delivery_event(
        &self,
        channel: Channel,
        event: &ChannelDeliveryEvent,
    ) -> Result<bool> {
        let Some(mut delivery) = self
            .store
            .find_delivery_by_provider_message_id(channel, &event.provider_message_id)?
        else {
            debug!(
                channel = channel.as_str(),
                provider_message_id = event.provider_message_id.as_str(),
                "delivery event matched no known delivery"
            );
            return Ok(false);
        };

        if let Some(transition) = event.transition {
            let moved = delivery
                .status_record_mut(channel)
                .map(|record| {
                    record.apply_transition(
                        transition,
                        event.timestamp_unix_ms,
                        event.reason.as_deref(),
                    )
                })
                .unwrap_or(false);
            if moved {
                delivery.updated_unix_ms = current_unix_timestamp_ms();
                self.store.update_delivery(&delivery)?;
            }
        }
        if let Some(signal) = event.engagement {
            update_channel_preferences(
                self.directory.as_ref(),
                &delivery.user_id,
                channel,
                signal,
            )?;
        }
        Ok(true)
    }

    /// Verifies and ingests a raw provider webhook for one channel, returning
    /// the number of events that matched a delivery.
    pub fn ingest_webhook(&self, channel: Channel, payload: &WebhookPayload) -> Result<usize> {
        let Some(adapter) = self.adapters.get(&channel) else {
            bail!("no adapter registered for channel '{}'", channel.as_str());
        };
        let events = adapter.handle_webhook(payload)?;
        let mut applied = 0;
        for event in &events {
            if self.apply_delivery_event(channel, event)? {
                applied += 1;
            }
        }
        Ok(applied)
    }

    /// Read access for embedding callers and tests.
    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }
}
