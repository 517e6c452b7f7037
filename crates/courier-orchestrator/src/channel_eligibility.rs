//! Channel eligibility filtering and ordering.
//!
//! Each exclusion is hard: unsubscribed channels, preference-disabled or
//! marketing-gated channels, and channels without a contact identifier never
//! survive. Survivors are reordered so the recipient's preferred channel
//! leads, with the fixed fallback order behind it.

use tracing::debug;

use courier_contract::{
    Channel, MessageCategory, MessageRecipient, NotificationPreferences, DEFAULT_CHANNEL_ORDER,
};

/// Why one requested channel was excluded; used for dispatch diagnostics.
pub fn channel_exclusion_reason(
    channel: Channel,
    recipient: &MessageRecipient,
    preferences: &NotificationPreferences,
    category: MessageCategory,
) -> Option<&'static str> {
    if recipient.unsubscribed.contains(&channel) {
        return Some("excluded_unsubscribed");
    }
    if !preferences.channel_enabled(channel) {
        return Some("excluded_preference_disabled");
    }
    if !preferences.category_allowed(channel, category) {
        return Some("excluded_category_blocked");
    }
    if !recipient.has_contact_for(channel) {
        return Some("excluded_missing_contact");
    }
    None
}

/// Filters the requested channels down to the eligible, ordered set.
pub fn determine_channels(
    requested: &[Channel],
    recipient: &MessageRecipient,
    preferences: &NotificationPreferences,
    category: MessageCategory,
) -> Vec<Channel> {
    let mut eligible = Vec::new();
    for &channel in requested {
        if eligible.contains(&channel) {
            continue;
        }
        match channel_exclusion_reason(channel, recipient, preferences, category) {
            Some(reason) => {
                debug!(
                    user_id = recipient.user_id.as_str(),
                    channel = channel.as_str(),
                    reason,
                    "channel excluded from delivery"
                );
            }
            None => eligible.push(channel),
        }
    }

    let mut ordered = Vec::with_capacity(eligible.len());
    if let Some(preferred) = recipient.preferred_channel {
        if eligible.contains(&preferred) {
            ordered.push(preferred);
        }
    }
    for channel in DEFAULT_CHANNEL_ORDER {
        if eligible.contains(&channel) && !ordered.contains(&channel) {
            ordered.push(channel);
        }
    }
    ordered
}

#[cfg(test)]
mod tests {
    use super::{channel_exclusion_reason, determine_channels};
    use courier_contract::{
        Channel, ChannelPreference, MessageCategory, MessageRecipient, NotificationPreferences,
    };

    fn full_contact_recipient() -> MessageRecipient {
        let mut recipient = MessageRecipient::new("user-1");
        recipient.email = Some("user@example.com".to_string());
        recipient.phone = Some("+15550100".to_string());
        recipient.whatsapp_number = Some("+15550100".to_string());
        recipient.push_tokens = vec!["tok-1".to_string()];
        recipient
    }

    const ALL: [Channel; 5] = [
        Channel::Email,
        Channel::Push,
        Channel::Whatsapp,
        Channel::Sms,
        Channel::Inapp,
    ];

    #[test]
    fn unit_unsubscribed_channels_are_excluded_even_when_requested() {
        let mut recipient = full_contact_recipient();
        recipient.unsubscribed.insert(Channel::Email);
        let preferences = NotificationPreferences::default();
        let eligible = determine_channels(
            &[Channel::Email],
            &recipient,
            &preferences,
            MessageCategory::Transactional,
        );
        assert!(eligible.is_empty());
        assert_eq!(
            channel_exclusion_reason(
                Channel::Email,
                &recipient,
                &preferences,
                MessageCategory::Transactional
            ),
            Some("excluded_unsubscribed")
        );
    }

    #[test]
    fn unit_marketing_gate_blocks_only_marketing_category() {
        let recipient = full_contact_recipient();
        let mut preferences = NotificationPreferences::default();
        preferences.marketing.channels.insert(Channel::Sms, false);

        let marketing = determine_channels(
            &[Channel::Sms],
            &recipient,
            &preferences,
            MessageCategory::Marketing,
        );
        assert!(marketing.is_empty());

        let transactional = determine_channels(
            &[Channel::Sms],
            &recipient,
            &preferences,
            MessageCategory::Transactional,
        );
        assert_eq!(transactional, vec![Channel::Sms]);
    }

    #[test]
    fn unit_missing_contact_identifier_excludes_channel() {
        let mut recipient = full_contact_recipient();
        recipient.push_tokens.clear();
        let eligible = determine_channels(
            &ALL,
            &recipient,
            &NotificationPreferences::default(),
            MessageCategory::Transactional,
        );
        assert!(!eligible.contains(&Channel::Push));
        assert!(eligible.contains(&Channel::Inapp));
    }

    #[test]
    fn functional_preferred_channel_leads_fixed_order_behind() {
        let mut recipient = full_contact_recipient();
        recipient.preferred_channel = Some(Channel::Whatsapp);
        let eligible = determine_channels(
            &ALL,
            &recipient,
            &NotificationPreferences::default(),
            MessageCategory::Transactional,
        );
        assert_eq!(
            eligible,
            vec![
                Channel::Whatsapp,
                Channel::Inapp,
                Channel::Push,
                Channel::Email,
                Channel::Sms,
            ]
        );
    }

    #[test]
    fn functional_absent_preferred_channel_uses_fixed_order() {
        let recipient = full_contact_recipient();
        let eligible = determine_channels(
            &ALL,
            &recipient,
            &NotificationPreferences::default(),
            MessageCategory::Transactional,
        );
        assert_eq!(
            eligible,
            vec![
                Channel::Inapp,
                Channel::Push,
                Channel::Email,
                Channel::Whatsapp,
                Channel::Sms,
            ]
        );
    }

    #[test]
    fn regression_disabled_preference_excludes_every_category() {
        let recipient = full_contact_recipient();
        let mut preferences = NotificationPreferences::default();
        preferences.channels.insert(
            Channel::Email,
            ChannelPreference {
                enabled: false,
                allowed_categories: None,
            },
        );
        for category in [
            MessageCategory::Transactional,
            MessageCategory::Emergency,
            MessageCategory::Marketing,
        ] {
            let eligible = determine_channels(&[Channel::Email], &recipient, &preferences, category);
            assert!(eligible.is_empty(), "email should be excluded for {category:?}");
        }
    }

    #[test]
    fn unit_duplicate_requested_channels_collapse() {
        let recipient = full_contact_recipient();
        let eligible = determine_channels(
            &[Channel::Push, Channel::Push],
            &recipient,
            &NotificationPreferences::default(),
            MessageCategory::Transactional,
        );
        assert_eq!(eligible, vec![Channel::Push]);
    }
}
