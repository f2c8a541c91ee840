//! Test endpoint helpers for driving bridge scenarios.

use crate::broker::InMemoryBroker;
use crate::transport::InMemoryTransport;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use transport_bridge::{
    headers, ConnectionSettings, MessagingTransport, OutgoingMessage, TransportConnection,
    TransportOperation, TransportTransaction,
};

/// One message observed by a test endpoint.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub message_id: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl ReceivedMessage {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// A simulated endpoint: one queue on one broker, with helpers for the
/// send/publish/subscribe/reply shapes bridge scenarios need.
pub struct TestEndpoint {
    name: String,
    connection: Arc<dyn TransportConnection>,
    received: Mutex<UnboundedReceiver<ReceivedMessage>>,
}

impl TestEndpoint {
    pub async fn start(broker: Arc<InMemoryBroker>, name: &str) -> Self {
        let transport = InMemoryTransport::message_driven(broker);
        let mut settings = ConnectionSettings::new(name, "poison");
        settings.auto_create_queues = true;
        let connection = transport
            .connect(settings)
            .await
            .expect("test endpoint connect");

        let (sender, received): (UnboundedSender<ReceivedMessage>, _) = unbounded_channel();
        let handler: transport_bridge::MessageHandler = Arc::new(
            move |context: &transport_bridge::MessageContext| -> futures::future::BoxFuture<
                '_,
                Result<(), transport_bridge::BridgeError>,
            > {
                let sender = sender.clone();
                let message = ReceivedMessage {
                    message_id: context.message_id.clone(),
                    headers: context.headers.clone(),
                    body: context.body.clone(),
                };
                Box::pin(async move {
                    let _ = sender.send(message);
                    Ok(())
                })
            },
        );
        connection
            .start_receiving(handler)
            .await
            .expect("test endpoint receive");

        Self {
            name: name.to_string(),
            connection,
            received: Mutex::new(received),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Waits for the next delivery; panics after two seconds of silence.
    pub async fn expect_message(&self) -> ReceivedMessage {
        tokio::time::timeout(Duration::from_secs(2), self.received.lock().await.recv())
            .await
            .unwrap_or_else(|_| panic!("endpoint '{}' received no message in time", self.name))
            .expect("endpoint receive channel closed")
    }

    /// Asserts that nothing arrives within the probe window.
    pub async fn expect_no_message(&self) {
        let received =
            tokio::time::timeout(Duration::from_millis(250), self.received.lock().await.recv())
                .await;
        if let Ok(Some(message)) = received {
            panic!(
                "endpoint '{}' unexpectedly received message {:?}",
                self.name, message.message_id
            );
        }
    }

    /// Raw dispatch of one unicast message to any queue on this broker.
    pub async fn dispatch(
        &self,
        destination: &str,
        message_id: &str,
        message_headers: HashMap<String, String>,
        body: &[u8],
    ) {
        let operation = TransportOperation::unicast(
            OutgoingMessage::new(message_id, message_headers, body.to_vec()),
            destination,
        );
        self.connection
            .dispatch(vec![operation], &TransportTransaction::none())
            .await
            .expect("test endpoint dispatch");
    }

    /// Sends a typed Send-intent message into a bridge port queue.
    pub async fn send_via_bridge(
        &self,
        bridge_queue: &str,
        destination_endpoint: &str,
        message_type: &str,
        message_id: &str,
        body: &[u8],
    ) {
        let mut message_headers = self.base_headers("Send", message_id);
        message_headers.insert(
            headers::ENCLOSED_MESSAGE_TYPES.to_string(),
            message_type.to_string(),
        );
        message_headers.insert(
            headers::DESTINATION_ENDPOINT.to_string(),
            destination_endpoint.to_string(),
        );
        self.dispatch(bridge_queue, message_id, message_headers, body).await;
    }

    /// Publishes a typed event into a bridge port queue.
    pub async fn publish_via_bridge(
        &self,
        bridge_queue: &str,
        message_types: &str,
        message_id: &str,
        body: &[u8],
    ) {
        let mut message_headers = self.base_headers("Publish", message_id);
        message_headers.insert(
            headers::ENCLOSED_MESSAGE_TYPES.to_string(),
            message_types.to_string(),
        );
        self.dispatch(bridge_queue, message_id, message_headers, body).await;
    }

    /// Subscribes to an event type published on the far side of a bridge.
    pub async fn subscribe_via_bridge(
        &self,
        bridge_queue: &str,
        event_type: &str,
        publisher_endpoint: &str,
    ) {
        let message_id = uuid::Uuid::new_v4().to_string();
        let mut message_headers = self.base_headers("Subscribe", &message_id);
        message_headers.insert(
            headers::SUBSCRIPTION_MESSAGE_TYPE.to_string(),
            event_type.to_string(),
        );
        message_headers.insert(
            headers::DESTINATION_ENDPOINT.to_string(),
            publisher_endpoint.to_string(),
        );
        self.dispatch(bridge_queue, &message_id, message_headers, b"").await;
    }

    /// Replies to a received message, following its reply-to header and
    /// echoing its correlation id the way an endpoint framework would.
    pub async fn reply_to(&self, received: &ReceivedMessage, message_id: &str, body: &[u8]) {
        let reply_to = received
            .header(headers::REPLY_TO_ADDRESS)
            .expect("received message has no reply-to address")
            .to_string();
        let mut message_headers = self.base_headers("Reply", message_id);
        if let Some(correlation_id) = received.header(headers::CORRELATION_ID) {
            message_headers.insert(
                headers::CORRELATION_ID.to_string(),
                correlation_id.to_string(),
            );
        }
        self.dispatch(&reply_to, message_id, message_headers, body).await;
    }

    fn base_headers(&self, intent: &str, correlation_id: &str) -> HashMap<String, String> {
        let mut message_headers = HashMap::new();
        message_headers.insert(headers::MESSAGE_INTENT.to_string(), intent.to_string());
        message_headers.insert(headers::REPLY_TO_ADDRESS.to_string(), self.name.clone());
        message_headers.insert(
            headers::CORRELATION_ID.to_string(),
            correlation_id.to_string(),
        );
        message_headers
    }

    pub async fn stop(&self) {
        let _ = self.connection.stop_receiving().await;
        let _ = self.connection.close().await;
    }
}
