//! Durable record store for deliveries, the scheduled queue, and inboxes.
//!
//! The trait keeps the orchestrator storage-agnostic; the in-memory
//! implementation backs tests and single-process deployments.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Utc};

use courier_contract::{Channel, InboxMessage, MessageDelivery, ScheduledQueueEntry};

/// Persistence contract for delivery records and per-user inboxes.
///
/// Webhook ingestion does a load-modify-store cycle on a delivery, so
/// implementations shared across processes should make per-delivery updates
/// atomic (row lock or compare-and-set); a webhook arriving before the
/// dispatching call's final `update_delivery` has landed may otherwise be
/// applied to a stale record or find no `provider_message_id` at all.
pub trait MessageStore: Send + Sync {
    fn insert_delivery(&self, delivery: MessageDelivery) -> Result<()>;
    fn update_delivery(&self, delivery: &MessageDelivery) -> Result<()>;
    fn load_delivery(&self, delivery_id: &str) -> Result<Option<MessageDelivery>>;
    /// Looks a delivery up by the provider message id a channel send returned.
    fn find_delivery_by_provider_message_id(
        &self,
        channel: Channel,
        provider_message_id: &str,
    ) -> Result<Option<MessageDelivery>>;
    fn enqueue_scheduled(&self, entry: ScheduledQueueEntry) -> Result<()>;
    /// Removes and returns up to `limit` queue entries due at or before `now`,
    /// ordered by fire time.
    fn take_due_scheduled(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ScheduledQueueEntry>>;
    fn append_inbox(&self, message: InboxMessage) -> Result<()>;
    fn list_inbox(&self, user_id: &str) -> Result<Vec<InboxMessage>>;
}

#[derive(Default)]
struct MessageStoreState {
    deliveries: BTreeMap<String, MessageDelivery>,
    scheduled: Vec<ScheduledQueueEntry>,
    inboxes: BTreeMap<String, Vec<InboxMessage>>,
}

/// Process-local [`MessageStore`] backed by a mutex-guarded map.
#[derive(Clone, Default)]
pub struct InMemoryMessageStore {
    state: Arc<Mutex<MessageStoreState>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MessageStoreState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("message store lock poisoned"))
    }
}

impl MessageStore for InMemoryMessageStore {
    fn insert_delivery(&self, delivery: MessageDelivery) -> Result<()> {
        let mut state = self.lock()?;
        if state.deliveries.contains_key(&delivery.delivery_id) {
            bail!("delivery '{}' already exists", delivery.delivery_id);
        }
        state
            .deliveries
            .insert(delivery.delivery_id.clone(), delivery);
        Ok(())
    }

    fn update_delivery(&self, delivery: &MessageDelivery) -> Result<()> {
        let mut state = self.lock()?;
        if !state.deliveries.contains_key(&delivery.delivery_id) {
            bail!("delivery '{}' not found", delivery.delivery_id);
        }
        state
            .deliveries
            .insert(delivery.delivery_id.clone(), delivery.clone());
        Ok(())
    }

    fn load_delivery(&self, delivery_id: &str) -> Result<Option<MessageDelivery>> {
        let state = self.lock()?;
        Ok(state.deliveries.get(delivery_id).cloned())
    }

    fn find_delivery_by_provider_message_id(
        &self,
        channel: Channel,
        provider_message_id: &str,
    ) -> Result<Option<MessageDelivery>> {
        let state = self.lock()?;
        let found = state.deliveries.values().find(|delivery| {
            delivery.channel_statuses.iter().any(|record| {
                record.channel == channel
                    && record.provider_message_id.as_deref() == Some(provider_message_id)
            })
        });
        Ok(found.cloned())
    }

    fn enqueue_scheduled(&self, entry: ScheduledQueueEntry) -> Result<()> {
        let mut state = self.lock()?;
        state.scheduled.push(entry);
        Ok(())
    }

    fn take_due_scheduled(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ScheduledQueueEntry>> {
        let mut state = self.lock()?;
        state.scheduled.sort_by_key(|entry| entry.fire_at);
        let due_count = state
            .scheduled
            .iter()
            .take_while(|entry| entry.fire_at <= now)
            .count()
            .min(limit);
        Ok(state.scheduled.drain(..due_count).collect())
    }

    fn append_inbox(&self, message: InboxMessage) -> Result<()> {
        let mut state = self.lock()?;
        state
            .inboxes
            .entry(message.user_id.clone())
            .or_default()
            .push(message);
        Ok(())
    }

    fn list_inbox(&self, user_id: &str) -> Result<Vec<InboxMessage>> {
        let state = self.lock()?;
        Ok(state.inboxes.get(user_id).cloned().unwrap_or_default())
    }
}
