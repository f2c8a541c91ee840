//! Send/reply round trip across a two-port bridge.

use integration_test_utils::{init_tracing, InMemoryBroker, InMemoryTransport, TestEndpoint};
use std::sync::Arc;
use subscription_store::{InMemoryBacking, TableSubscriptionStore};
use transport_bridge::{
    correlation, headers, Bridge, BridgeConfiguration, PortConfiguration, RetrySettings,
};

async fn start_bridge(
    left_broker: Arc<InMemoryBroker>,
    right_broker: Arc<InMemoryBroker>,
) -> Bridge {
    let storage = Arc::new(TableSubscriptionStore::new(InMemoryBacking::new()));
    let left = PortConfiguration::new(
        "bridge-left",
        Arc::new(InMemoryTransport::message_driven(left_broker)),
    )
    .use_subscription_storage(storage.clone());
    let right = PortConfiguration::new(
        "bridge-right",
        Arc::new(InMemoryTransport::message_driven(right_broker)),
    )
    .use_subscription_storage(storage);

    let bridge = BridgeConfiguration::new(left, right)
        .auto_create_queues(None)
        .limit_message_processing_concurrency(1)
        .retry_settings(RetrySettings {
            immediate_retries: 0,
            delayed_retries: 0,
            circuit_breaker_threshold: 5,
        })
        .create()
        .expect("bridge configuration");
    bridge.start().await.expect("bridge start");
    bridge
}

#[tokio::test]
async fn send_round_trip_restores_reply_correlation() {
    init_tracing();
    let left_broker = Arc::new(InMemoryBroker::new());
    let right_broker = Arc::new(InMemoryBroker::new());
    let bridge = start_bridge(left_broker.clone(), right_broker.clone()).await;

    let sender = TestEndpoint::start(left_broker.clone(), "sender").await;
    let receiver = TestEndpoint::start(right_broker.clone(), "receiver").await;

    sender
        .send_via_bridge(
            "bridge-left",
            "receiver",
            "Sales.PlaceOrder, Sales",
            "corr-1",
            b"order",
        )
        .await;

    // At the receiver, the reply-to points back at the bridge and the
    // correlation id carries the encoded bundle.
    let delivered = receiver.expect_message().await;
    assert_eq!(delivered.body, b"order");
    assert_eq!(
        delivered.header(headers::REPLY_TO_ADDRESS),
        Some("bridge-right")
    );
    assert_eq!(
        delivered.header(headers::CORRELATION_ID),
        Some(correlation::encode("corr-1", "sender", Some("bridge-left")).as_str())
    );
    // Bridge-internal headers never reach the final recipient.
    assert_eq!(delivered.header(headers::DESTINATION_ENDPOINT), None);

    receiver.reply_to(&delivered, "reply-1", b"ack").await;

    // Back at the sender, the original correlation id is restored.
    let reply = sender.expect_message().await;
    assert_eq!(reply.body, b"ack");
    assert_eq!(reply.header(headers::CORRELATION_ID), Some("corr-1"));

    bridge.stop().await.expect("bridge stop");
}

#[tokio::test]
async fn send_without_destination_lands_in_poison_queue() {
    init_tracing();
    let left_broker = Arc::new(InMemoryBroker::new());
    let right_broker = Arc::new(InMemoryBroker::new());
    let bridge = start_bridge(left_broker.clone(), right_broker.clone()).await;

    let sender = TestEndpoint::start(left_broker.clone(), "sender").await;

    // No destination-endpoint header and no forwarding-table entry.
    let mut message_headers = std::collections::HashMap::new();
    message_headers.insert(headers::MESSAGE_INTENT.to_string(), "Send".to_string());
    message_headers.insert(
        headers::ENCLOSED_MESSAGE_TYPES.to_string(),
        "Sales.PlaceOrder, Sales".to_string(),
    );
    sender
        .dispatch("bridge-left", "poisoned-1", message_headers, b"order")
        .await;

    let poisoned = wait_for_poison(&left_broker).await;
    assert_eq!(poisoned.0, "poisoned-1");
    // Original headers, intent included, stay intact for the operator.
    assert_eq!(
        poisoned.1.get(headers::MESSAGE_INTENT).map(String::as_str),
        Some("Send")
    );

    bridge.stop().await.expect("bridge stop");
}

#[tokio::test]
async fn unknown_intent_lands_in_poison_queue() {
    init_tracing();
    let left_broker = Arc::new(InMemoryBroker::new());
    let right_broker = Arc::new(InMemoryBroker::new());
    let bridge = start_bridge(left_broker.clone(), right_broker.clone()).await;

    let sender = TestEndpoint::start(left_broker.clone(), "sender").await;

    let mut message_headers = std::collections::HashMap::new();
    message_headers.insert(headers::MESSAGE_INTENT.to_string(), "Broadcast".to_string());
    sender
        .dispatch("bridge-left", "poisoned-2", message_headers, b"")
        .await;

    let poisoned = wait_for_poison(&left_broker).await;
    assert_eq!(poisoned.0, "poisoned-2");
    assert_eq!(
        poisoned.1.get(headers::MESSAGE_INTENT).map(String::as_str),
        Some("Broadcast")
    );

    bridge.stop().await.expect("bridge stop");
}

async fn wait_for_poison(
    broker: &Arc<InMemoryBroker>,
) -> (String, std::collections::HashMap<String, String>, Vec<u8>) {
    for _ in 0..100 {
        let mut drained = broker.drain_queue("poison");
        if let Some(message) = drained.pop() {
            return message;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    panic!("no message reached the poison queue in time");
}
