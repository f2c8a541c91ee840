//! Deduplication through the forwarding interception hook: two sends with
//! the same message id, exactly one delivery.

use async_trait::async_trait;
use integration_test_utils::{init_tracing, InMemoryBroker, InMemoryTransport, TestEndpoint};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use subscription_store::{InMemoryBacking, TableSubscriptionStore};
use transport_bridge::{
    BridgeConfiguration, BridgeError, Dispatcher, ForwardContinuation, ForwardInterceptor,
    MessageContext, PortConfiguration,
};

#[derive(Default)]
struct DeduplicatingInterceptor {
    seen: Mutex<HashSet<String>>,
}

#[async_trait]
impl ForwardInterceptor for DeduplicatingInterceptor {
    async fn intercept<'a>(
        &self,
        _port_name: &'a str,
        context: &'a MessageContext,
        _local_dispatch: Arc<dyn Dispatcher>,
        forward_dispatch: Arc<dyn Dispatcher>,
        next: ForwardContinuation<'a>,
    ) -> Result<(), BridgeError> {
        let first_sighting = self
            .seen
            .lock()
            .expect("seen ids poisoned")
            .insert(context.message_id.clone());
        if !first_sighting {
            // Already forwarded; complete without invoking the continuation.
            return Ok(());
        }
        next(forward_dispatch).await
    }
}

#[tokio::test]
async fn duplicate_sends_are_delivered_once() {
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
        .intercept_forwarding(Arc::new(DeduplicatingInterceptor::default()))
        .create()
        .expect("bridge configuration");
    bridge.start().await.expect("bridge start");

    let sender = TestEndpoint::start(left_broker.clone(), "sender").await;
    let receiver = TestEndpoint::start(right_broker.clone(), "receiver").await;

    // The same message dispatched twice, as a redelivering transport would.
    for _ in 0..2 {
        sender
            .send_via_bridge(
                "bridge-left",
                "receiver",
                "Sales.PlaceOrder, Sales",
                "dup-1",
                b"order",
            )
            .await;
    }

    let delivered = receiver.expect_message().await;
    assert_eq!(delivered.message_id, "dup-1");
    receiver.expect_no_message().await;

    // A fresh id still goes through.
    sender
        .send_via_bridge(
            "bridge-left",
            "receiver",
            "Sales.PlaceOrder, Sales",
            "dup-2",
            b"order",
        )
        .await;
    assert_eq!(receiver.expect_message().await.message_id, "dup-2");

    bridge.stop().await.expect("bridge stop");
}
