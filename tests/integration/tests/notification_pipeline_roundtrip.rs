use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;

use courier_channels::{DeterministicChannelAdapter, RenderedContent, WebhookPayload};
use courier_contract::{
    Channel, ChannelDeliveryState, DeliveryState, EmailContent, MessagePriority, MessageRequest,
    MessageTemplate, PushContent, TemplateContent, TemplateStore, VariableSpec, VariableType,
};
use courier_orchestrator::{
    DeliveryOrchestrator, InMemoryMessageStore, InMemoryRecipientDirectory, MessageStore,
    OrchestratorConfig, RecipientDirectory, SendOutcome,
};

struct Pipeline {
    orchestrator: DeliveryOrchestrator,
    store: InMemoryMessageStore,
    directory: InMemoryRecipientDirectory,
    email: Arc<DeterministicChannelAdapter>,
    push: Arc<DeterministicChannelAdapter>,
}

fn shipping_template() -> MessageTemplate {
    MessageTemplate::builder("shipping-update", "Shipping update")
        .variable(VariableSpec::required("name", VariableType::String))
        .variable(VariableSpec::required("status", VariableType::String))
        .content(
            Channel::Email,
            TemplateContent::Email(EmailContent {
                subject: "Shipping update for {{name}}".to_string(),
                preheader: String::new(),
                body_markup: "Hi **{{name}}**, your parcel is now {{status}}.".to_string(),
                body_text: None,
            }),
        )
        .content(
            Channel::Push,
            TemplateContent::Push(PushContent {
                title: "Shipping update".to_string(),
                body: "Your parcel is now {{status}}.".to_string(),
                click_action: None,
                deep_link: None,
            }),
        )
        .content(
            Channel::Inapp,
            TemplateContent::inapp("Shipping update", "Your parcel is now {{status}}."),
        )
        .build()
}

fn pipeline() -> Pipeline {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("courier_orchestrator=debug")
        .with_test_writer()
        .try_init();
    let templates = TemplateStore::new();
    templates
        .register(shipping_template())
        .expect("template registers");
    let store = InMemoryMessageStore::new();
    let directory = InMemoryRecipientDirectory::new();

    let mut recipient = courier_contract::MessageRecipient::new("user-7");
    recipient.email = Some("user7@example.com".to_string());
    recipient.push_tokens = vec!["device-token-7".to_string()];
    directory.upsert_recipient(recipient);

    let mut orchestrator = DeliveryOrchestrator::new(
        templates,
        Arc::new(store.clone()),
        Arc::new(directory.clone()),
        OrchestratorConfig::default(),
    );
    let email = DeterministicChannelAdapter::new(Channel::Email);
    let push = DeterministicChannelAdapter::new(Channel::Push);
    orchestrator.register_adapter(email.clone());
    orchestrator.register_adapter(push.clone());
    Pipeline {
        orchestrator,
        store,
        directory,
        email,
        push,
    }
}

fn shipping_request() -> MessageRequest {
    let mut request = MessageRequest::new("shipping-update", "user-7");
    request.priority = MessagePriority::Urgent;
    request.variables.insert("name".to_string(), json!("Ada"));
    request
        .variables
        .insert("status".to_string(), json!("out for delivery"));
    request
}

fn delivery_id(outcome: SendOutcome) -> String {
    match outcome {
        SendOutcome::Dispatched { delivery_id, .. } => delivery_id,
        other => panic!("expected dispatched outcome, got {other:?}"),
    }
}

#[tokio::test]
async fn integration_send_webhook_and_preference_learning_roundtrip() {
    let pipeline = pipeline();

    // First send: no preferred channel yet, so the fixed order leads with
    // in-app, then push, then email.
    let first_id = delivery_id(
        pipeline
            .orchestrator
            .send_message(shipping_request())
            .await
            .expect("first send succeeds"),
    );
    let first = pipeline
        .store
        .load_delivery(&first_id)
        .expect("load succeeds")
        .expect("delivery stored");
    assert_eq!(first.status, DeliveryState::Sent);
    assert_eq!(
        first.channels,
        vec![Channel::Inapp, Channel::Push, Channel::Email]
    );
    assert_eq!(pipeline.store.list_inbox("user-7").expect("list").len(), 1);

    // The provider later reports the email was opened.
    let provider_message_id = first
        .channel_statuses
        .iter()
        .find(|record| record.channel == Channel::Email)
        .and_then(|record| record.provider_message_id.clone())
        .expect("email provider id recorded");
    let payload = WebhookPayload::new(
        json!({
            "provider_message_id": provider_message_id,
            "transition": "read",
            "timestamp_unix_ms": Utc::now().timestamp_millis(),
            "engagement": "opened"
        })
        .to_string(),
    );
    assert_eq!(
        pipeline
            .orchestrator
            .ingest_webhook(Channel::Email, &payload)
            .expect("webhook ingests"),
        1
    );
    let first = pipeline
        .store
        .load_delivery(&first_id)
        .expect("load succeeds")
        .expect("delivery stored");
    let email_record = first
        .channel_statuses
        .iter()
        .find(|record| record.channel == Channel::Email)
        .expect("email record exists");
    assert_eq!(email_record.status, ChannelDeliveryState::Read);

    // Second send: the learned preference now leads the channel order.
    let second_id = delivery_id(
        pipeline
            .orchestrator
            .send_message(shipping_request())
            .await
            .expect("second send succeeds"),
    );
    let second = pipeline
        .store
        .load_delivery(&second_id)
        .expect("load succeeds")
        .expect("delivery stored");
    assert_eq!(second.channels[0], Channel::Email);
    assert_eq!(pipeline.store.list_inbox("user-7").expect("list").len(), 2);
}

#[tokio::test]
async fn integration_unsubscribe_engagement_blocks_the_channel_for_later_sends() {
    let pipeline = pipeline();
    let first_id = delivery_id(
        pipeline
            .orchestrator
            .send_message(shipping_request())
            .await
            .expect("first send succeeds"),
    );
    let first = pipeline
        .store
        .load_delivery(&first_id)
        .expect("load succeeds")
        .expect("delivery stored");
    let provider_message_id = first
        .channel_statuses
        .iter()
        .find(|record| record.channel == Channel::Email)
        .and_then(|record| record.provider_message_id.clone())
        .expect("email provider id recorded");

    let payload = WebhookPayload::new(
        json!({
            "provider_message_id": provider_message_id,
            "transition": null,
            "timestamp_unix_ms": Utc::now().timestamp_millis(),
            "engagement": "unsubscribed"
        })
        .to_string(),
    );
    pipeline
        .orchestrator
        .ingest_webhook(Channel::Email, &payload)
        .expect("webhook ingests");
    let recipient = pipeline
        .directory
        .resolve_recipient("user-7")
        .expect("resolve succeeds")
        .expect("recipient exists");
    assert!(recipient.unsubscribed.contains(&Channel::Email));

    assert_eq!(pipeline.email.send_count(), 1);
    delivery_id(
        pipeline
            .orchestrator
            .send_message(shipping_request())
            .await
            .expect("second send succeeds"),
    );
    // Email stayed untouched; push still dispatched.
    assert_eq!(pipeline.email.send_count(), 1);
    assert_eq!(pipeline.push.send_count(), 2);
}

#[tokio::test]
async fn integration_long_push_bodies_are_truncated_on_the_wire() {
    let pipeline = pipeline();
    let mut request = shipping_request();
    request
        .variables
        .insert("status".to_string(), json!("x".repeat(300)));
    request.channels = Some(vec![Channel::Push]);

    delivery_id(
        pipeline
            .orchestrator
            .send_message(request)
            .await
            .expect("send succeeds"),
    );
    let sends = pipeline.push.sends();
    assert_eq!(sends.len(), 1);
    let RenderedContent::Push(push) = &sends[0].content else {
        panic!("expected push content");
    };
    assert_eq!(push.body.chars().count(), 240);
    assert!(push.body.ends_with("..."));
}

#[tokio::test]
async fn integration_scheduled_request_fires_through_the_sweep() {
    let pipeline = pipeline();
    let mut request = shipping_request();
    request.priority = MessagePriority::Medium;
    request.scheduled_at = Some(Utc::now() + chrono::Duration::milliseconds(80));

    let outcome = pipeline
        .orchestrator
        .send_message(request)
        .await
        .expect("send succeeds");
    let scheduled_id = match outcome {
        SendOutcome::Scheduled { delivery_id, .. } => delivery_id,
        other => panic!("expected scheduled outcome, got {other:?}"),
    };
    assert_eq!(pipeline.email.send_count(), 0);

    // Before the fire time the sweep finds nothing due.
    let report = pipeline
        .orchestrator
        .process_scheduled_messages()
        .await
        .expect("sweep succeeds");
    assert_eq!(report.processed, 0);

    tokio::time::sleep(Duration::from_millis(120)).await;
    let report = pipeline
        .orchestrator
        .process_scheduled_messages()
        .await
        .expect("sweep succeeds");
    assert_eq!(report.processed, 1);
    assert_eq!(report.sent, 1);

    let delivery = pipeline
        .store
        .load_delivery(&scheduled_id)
        .expect("load succeeds")
        .expect("delivery stored");
    assert_eq!(delivery.status, DeliveryState::Sent);
    assert_eq!(pipeline.store.list_inbox("user-7").expect("list").len(), 1);
}

#[tokio::test]
async fn integration_absent_preferences_leave_every_contactable_channel_eligible() {
    let pipeline = pipeline();
    // No preferences were ever stored for user-7; the permissive default
    // must keep all contactable channels flowing.
    let id = delivery_id(
        pipeline
            .orchestrator
            .send_message(shipping_request())
            .await
            .expect("send succeeds"),
    );
    let delivery = pipeline
        .store
        .load_delivery(&id)
        .expect("load succeeds")
        .expect("delivery stored");
    assert_eq!(delivery.channel_statuses.len(), 3);
    assert!(delivery
        .channel_statuses
        .iter()
        .all(|record| record.status == ChannelDeliveryState::Sent));
}
