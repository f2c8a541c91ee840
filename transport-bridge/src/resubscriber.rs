//! Periodic resubscription companion loop.
//!
//! Some transports drop native subscriptions across restarts, so endpoints
//! replay their subscribe messages into a dedicated `<queue>.Resubscriber`
//! queue. The resubscriber deduplicates the replays by (subscriber address,
//! message type) using the resubscription bookkeeping headers, waits out a
//! configured delay before re-playing an already-seen round, and moves each
//! surviving subscribe message back to the bridge input queue.

use crate::error::{BridgeError, UnforwardableMessage};
use crate::headers;
use crate::message::{MessageContext, OutgoingMessage, TransportOperation};
use crate::transport::{ConnectionSettings, MessageHandler, MessagingTransport, TransportConnection};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

const RESUBSCRIBER_TAG: &str = "Resubscriber:";

type SeenRounds = Mutex<HashMap<(String, String), (String, DateTime<Utc>)>>;

pub struct Resubscriber {
    connection: Arc<dyn TransportConnection>,
}

impl Resubscriber {
    /// Starts consuming `<input_queue>.Resubscriber` with concurrency 1 so
    /// dedup decisions stay ordered.
    pub async fn create(
        transport: Arc<dyn MessagingTransport>,
        input_queue: &str,
        poison_queue: &str,
        delay: Duration,
    ) -> Result<Self, BridgeError> {
        let mut settings =
            ConnectionSettings::new(format!("{input_queue}.Resubscriber"), poison_queue);
        settings.auto_create_queues = true;
        settings.max_concurrency = Some(1);
        let connection = transport.connect(settings).await?;

        let handler = Self::handler(connection.clone(), input_queue.to_string(), delay);
        connection.start_receiving(handler).await?;
        Ok(Self { connection })
    }

    pub async fn stop(&self) -> Result<(), BridgeError> {
        self.connection.stop_receiving().await?;
        self.connection.close().await?;
        Ok(())
    }

    fn handler(
        connection: Arc<dyn TransportConnection>,
        input_queue: String,
        delay: Duration,
    ) -> MessageHandler {
        use futures::future::BoxFuture;
        let seen: Arc<SeenRounds> = Arc::new(Mutex::new(HashMap::new()));
        Arc::new(
            move |context: &MessageContext| -> BoxFuture<'_, Result<(), BridgeError>> {
                let connection = connection.clone();
                let input_queue = input_queue.clone();
                let seen = seen.clone();
                Box::pin(async move {
                    Self::process(context, connection, &input_queue, delay, &seen).await
                })
            },
        )
    }

    async fn process(
        context: &MessageContext,
        connection: Arc<dyn TransportConnection>,
        input_queue: &str,
        delay: Duration,
        seen: &SeenRounds,
    ) -> Result<(), BridgeError> {
        let message_type = context
            .header(headers::SUBSCRIPTION_MESSAGE_TYPE)
            .unwrap_or_default()
            .to_string();
        let subscriber_address = context
            .header(headers::SUBSCRIBER_TRANSPORT_ADDRESS)
            .or_else(|| context.header(headers::REPLY_TO_ADDRESS))
            .ok_or_else(|| {
                UnforwardableMessage::new(
                    "resubscription message carries neither a subscriber address nor a reply-to address",
                )
            })?
            .to_string();
        let round_id = context
            .header(headers::RESUBSCRIPTION_ID)
            .ok_or_else(|| {
                UnforwardableMessage::new(format!(
                    "resubscription message does not contain the '{}' header",
                    headers::RESUBSCRIPTION_ID
                ))
            })?
            .to_string();
        let round_timestamp = context
            .header(headers::RESUBSCRIPTION_TIMESTAMP)
            .and_then(|value| DateTime::parse_from_rfc3339(value).ok())
            .map(|value| value.with_timezone(&Utc))
            .ok_or_else(|| {
                UnforwardableMessage::new(format!(
                    "resubscription message does not contain a valid '{}' header",
                    headers::RESUBSCRIPTION_TIMESTAMP
                ))
            })?;

        let key = (subscriber_address, message_type);
        let mut rounds = seen.lock().await;
        if let Some((seen_id, seen_timestamp)) = rounds.get(&key) {
            if *seen_id != round_id && round_timestamp < *seen_timestamp {
                // A newer round for this pair was already processed.
                return Ok(());
            }
            // Same round coming by again; pace the replay.
            tokio::time::sleep(delay).await;
        }

        let operation = TransportOperation::unicast(
            OutgoingMessage::new(
                context.message_id.clone(),
                context.headers.clone(),
                context.body.clone(),
            ),
            input_queue,
        );
        connection.dispatch(vec![operation], &context.transaction).await?;
        rounds.insert(key, (round_id, round_timestamp));
        debug!("{RESUBSCRIBER_TAG} moved subscription message back to '{input_queue}'");
        Ok(())
    }
}
