//! Recipient and preference resolution seam.
//!
//! The directory is collaborator-owned user storage: orchestration reads
//! recipients and preferences, and writes back only preference-learning
//! updates driven by engagement feedback. A missing preferences document is
//! never an error; it resolves to the permissive defaults.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use tracing::debug;

use courier_channels::EngagementSignal;
use courier_contract::{Channel, MessageRecipient, NotificationPreferences};

/// Trait contract for `RecipientDirectory` behavior.
pub trait RecipientDirectory: Send + Sync {
    fn resolve_recipient(&self, user_id: &str) -> Result<Option<MessageRecipient>>;

    /// Resolves stored preferences, falling back to permissive defaults so
    /// absence never blocks transactional or emergency sends.
    fn resolve_preferences(&self, user_id: &str) -> Result<NotificationPreferences>;

    fn set_preferred_channel(&self, user_id: &str, channel: Channel) -> Result<()>;

    fn mark_unsubscribed(&self, user_id: &str, channel: Channel) -> Result<()>;
}

/// Adapts a recipient's preferred channel from engagement feedback.
///
/// Win-stays heuristic: an open or click on a channel promotes it to
/// preferred; an unsubscribe removes the channel from future eligibility.
pub fn update_channel_preferences(
    directory: &dyn RecipientDirectory,
    user_id: &str,
    channel: Channel,
    signal: EngagementSignal,
) -> Result<()> {
    match signal {
        EngagementSignal::Opened | EngagementSignal::Clicked => {
            debug!(
                user_id,
                channel = channel.as_str(),
                "promoting engaged channel to preferred"
            );
            directory.set_preferred_channel(user_id, channel)
        }
        EngagementSignal::Unsubscribed => {
            debug!(
                user_id,
                channel = channel.as_str(),
                "recording webhook-driven unsubscribe"
            );
            directory.mark_unsubscribed(user_id, channel)
        }
    }
}

#[derive(Debug, Clone, Default)]
/// In-memory directory used by tests and embedding callers.
pub struct InMemoryRecipientDirectory {
    recipients: Arc<Mutex<BTreeMap<String, MessageRecipient>>>,
    preferences: Arc<Mutex<BTreeMap<String, NotificationPreferences>>>,
}

impl InMemoryRecipientDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_recipient(&self, recipient: MessageRecipient) {
        if let Ok(mut recipients) = self.recipients.lock() {
            recipients.insert(recipient.user_id.clone(), recipient);
        }
    }

    pub fn upsert_preferences(&self, user_id: impl Into<String>, preferences: NotificationPreferences) {
        if let Ok(mut stored) = self.preferences.lock() {
            stored.insert(user_id.into(), preferences);
        }
    }
}

impl RecipientDirectory for InMemoryRecipientDirectory {
    fn resolve_recipient(&self, user_id: &str) -> Result<Option<MessageRecipient>> {
        Ok(self
            .recipients
            .lock()
            .map_err(|_| anyhow::anyhow!("recipient directory lock poisoned"))?
            .get(user_id.trim())
            .cloned())
    }

    fn resolve_preferences(&self, user_id: &str) -> Result<NotificationPreferences> {
        Ok(self
            .preferences
            .lock()
            .map_err(|_| anyhow::anyhow!("recipient directory lock poisoned"))?
            .get(user_id.trim())
            .cloned()
            .unwrap_or_default())
    }

    fn set_preferred_channel(&self, user_id: &str, channel: Channel) -> Result<()> {
        let mut recipients = self
            .recipients
            .lock()
            .map_err(|_| anyhow::anyhow!("recipient directory lock poisoned"))?;
        if let Some(recipient) = recipients.get_mut(user_id.trim()) {
            recipient.preferred_channel = Some(channel);
        }
        Ok(())
    }

    fn mark_unsubscribed(&self, user_id: &str, channel: Channel) -> Result<()> {
        let mut recipients = self
            .recipients
            .lock()
            .map_err(|_| anyhow::anyhow!("recipient directory lock poisoned"))?;
        if let Some(recipient) = recipients.get_mut(user_id.trim()) {
            recipient.unsubscribed.insert(channel);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{update_channel_preferences, InMemoryRecipientDirectory, RecipientDirectory};
    use courier_channels::EngagementSignal;
    use courier_contract::{Channel, MessageRecipient};

    #[test]
    fn unit_missing_preferences_resolve_to_permissive_defaults() {
        let directory = InMemoryRecipientDirectory::new();
        let preferences = directory
            .resolve_preferences("unknown-user")
            .expect("defaults");
        assert!(preferences.channel_enabled(Channel::Email));
        assert!(preferences.marketing.allows(Channel::Push));
    }

    #[test]
    fn functional_engagement_click_promotes_preferred_channel() {
        let directory = InMemoryRecipientDirectory::new();
        let mut recipient = MessageRecipient::new("user-1");
        recipient.preferred_channel = Some(Channel::Email);
        directory.upsert_recipient(recipient);

        update_channel_preferences(&directory, "user-1", Channel::Push, EngagementSignal::Clicked)
            .expect("update");
        let stored = directory
            .resolve_recipient("user-1")
            .expect("resolve")
            .expect("present");
        assert_eq!(stored.preferred_channel, Some(Channel::Push));
    }

    #[test]
    fn functional_unsubscribe_signal_extends_unsubscribed_set() {
        let directory = InMemoryRecipientDirectory::new();
        directory.upsert_recipient(MessageRecipient::new("user-1"));
        update_channel_preferences(
            &directory,
            "user-1",
            Channel::Email,
            EngagementSignal::Unsubscribed,
        )
        .expect("update");
        let stored = directory
            .resolve_recipient("user-1")
            .expect("resolve")
            .expect("present");
        assert!(stored.unsubscribed.contains(&Channel::Email));
        // Preferred channel untouched by an unsubscribe.
        assert_eq!(stored.preferred_channel, None);
    }
}
