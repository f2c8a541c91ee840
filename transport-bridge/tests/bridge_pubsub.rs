//! Publish/subscribe scenarios across a two-port bridge, in both the
//! message-driven and native multicast flavors.

use integration_test_utils::{init_tracing, InMemoryBroker, InMemoryTransport, TestEndpoint};
use std::collections::HashMap;
use std::sync::Arc;
use subscription_store::{InMemoryBacking, TableSubscriptionStore};
use transport_bridge::{
    headers, BridgeConfiguration, ConnectionSettings, MessagingTransport, OutgoingMessage,
    PortConfiguration, TransportOperation, TransportTransaction,
};

#[tokio::test]
async fn subscribe_then_publish_reaches_only_matching_subscriber() {
    init_tracing();
    let left_broker = Arc::new(InMemoryBroker::new());
    let right_broker = Arc::new(InMemoryBroker::new());

    let storage = Arc::new(TableSubscriptionStore::new(InMemoryBacking::new()));
    let left = PortConfiguration::new(
        "bridge-left",
        Arc::new(InMemoryTransport::message_driven(left_broker.clone())),
    )
    .use_subscription_storage(storage.clone());
    let right = PortConfiguration::new(
        "bridge-right",
        Arc::new(InMemoryTransport::message_driven(right_broker.clone())),
    )
    .use_subscription_storage(storage);

    let bridge = BridgeConfiguration::new(left, right)
        .auto_create_queues(None)
        .limit_message_processing_concurrency(1)
        .create()
        .expect("bridge configuration");
    bridge.start().await.expect("bridge start");

    let publisher = TestEndpoint::start(left_broker.clone(), "publisher").await;
    let subscriber = TestEndpoint::start(right_broker.clone(), "subscriber").await;

    subscriber
        .subscribe_via_bridge("bridge-right", "Sales.OrderAccepted, Sales", "publisher")
        .await;

    // The translated subscribe reaching the publisher doubles as the
    // synchronization point: storage is updated before it is forwarded.
    let control = publisher.expect_message().await;
    assert_eq!(control.header(headers::MESSAGE_INTENT), Some("Subscribe"));
    assert_eq!(
        control.header(headers::SUBSCRIPTION_MESSAGE_TYPE),
        Some("Sales.OrderAccepted, Sales")
    );
    // The bridge substitutes itself as the subscriber.
    assert_eq!(
        control.header(headers::SUBSCRIBER_TRANSPORT_ADDRESS),
        Some("bridge-left")
    );

    publisher
        .publish_via_bridge(
            "bridge-left",
            "Sales.OrderAccepted, Sales",
            "event-1",
            b"accepted",
        )
        .await;

    let delivered = subscriber.expect_message().await;
    assert_eq!(delivered.body, b"accepted");
    assert_eq!(delivered.header(headers::MESSAGE_INTENT), Some("Publish"));

    // An unrelated event type must not reach the subscriber.
    publisher
        .publish_via_bridge(
            "bridge-left",
            "Sales.OrderCancelled, Sales",
            "event-2",
            b"cancelled",
        )
        .await;
    subscriber.expect_no_message().await;

    // Unsubscribing stops delivery of the matching type too.
    let message_id = uuid_like("unsub");
    let mut unsubscribe_headers = HashMap::new();
    unsubscribe_headers.insert(
        headers::MESSAGE_INTENT.to_string(),
        "Unsubscribe".to_string(),
    );
    unsubscribe_headers.insert(
        headers::SUBSCRIPTION_MESSAGE_TYPE.to_string(),
        "Sales.OrderAccepted, Sales".to_string(),
    );
    unsubscribe_headers.insert(
        headers::DESTINATION_ENDPOINT.to_string(),
        "publisher".to_string(),
    );
    unsubscribe_headers.insert(
        headers::REPLY_TO_ADDRESS.to_string(),
        "subscriber".to_string(),
    );
    subscriber
        .dispatch("bridge-right", &message_id, unsubscribe_headers, b"")
        .await;
    let control = publisher.expect_message().await;
    assert_eq!(control.header(headers::MESSAGE_INTENT), Some("Unsubscribe"));

    publisher
        .publish_via_bridge(
            "bridge-left",
            "Sales.OrderAccepted, Sales",
            "event-3",
            b"accepted again",
        )
        .await;
    subscriber.expect_no_message().await;

    bridge.stop().await.expect("bridge stop");
}

#[tokio::test]
async fn publish_from_native_side_reaches_message_driven_subscriber() {
    init_tracing();
    let left_broker = Arc::new(InMemoryBroker::new());
    let right_broker = Arc::new(InMemoryBroker::new());

    let storage = Arc::new(TableSubscriptionStore::new(InMemoryBacking::new()));
    let left = PortConfiguration::new(
        "bridge-left",
        Arc::new(InMemoryTransport::message_driven(left_broker.clone())),
    )
    .use_subscription_storage(storage);
    // The right transport's broker fans out publishes itself.
    let right = PortConfiguration::new(
        "bridge-right",
        Arc::new(InMemoryTransport::native(right_broker.clone())),
    );

    let configuration = BridgeConfiguration::new(left, right)
        .auto_create_queues(None)
        .limit_message_processing_concurrency(1);
    let types = configuration.type_registry().clone();
    let bridge = configuration.create().expect("bridge configuration");
    bridge.start().await.expect("bridge start");

    let subscriber = TestEndpoint::start(left_broker.clone(), "subscriber").await;

    subscriber
        .subscribe_via_bridge("bridge-left", "Sales.OrderAccepted, Sales", "publisher")
        .await;

    // Native subscriptions register the bridge's own queue on the broker
    // topic; wait until the registration is visible.
    let event_type = types
        .resolve("Sales.OrderAccepted, Sales")
        .expect("event type resolves");
    for _ in 0..100 {
        if right_broker
            .topic_subscribers(event_type.id())
            .contains(&"bridge-right".to_string())
        {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    // A native publisher multicasts on the broker; the bridge's queue is
    // among the topic's subscribers.
    let publisher_transport = InMemoryTransport::native(right_broker.clone());
    let mut publisher_settings = ConnectionSettings::new("native-publisher", "poison");
    publisher_settings.auto_create_queues = true;
    let publisher_connection = publisher_transport
        .connect(publisher_settings)
        .await
        .expect("publisher connect");

    let mut event_headers = HashMap::new();
    event_headers.insert(headers::MESSAGE_INTENT.to_string(), "Publish".to_string());
    event_headers.insert(
        headers::ENCLOSED_MESSAGE_TYPES.to_string(),
        "Sales.OrderAccepted, Sales".to_string(),
    );
    publisher_connection
        .dispatch(
            vec![TransportOperation::multicast(
                OutgoingMessage::new("event-1", event_headers, b"accepted".to_vec()),
                event_type,
            )],
            &TransportTransaction::none(),
        )
        .await
        .expect("native publish");

    let delivered = subscriber.expect_message().await;
    assert_eq!(delivered.body, b"accepted");

    bridge.stop().await.expect("bridge stop");
}

fn uuid_like(prefix: &str) -> String {
    format!("{prefix}-{}", std::process::id())
}
