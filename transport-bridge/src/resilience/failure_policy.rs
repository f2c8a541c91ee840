//! Per-message failure handling: retries, poison queue, throttled intake.

use crate::config::RetrySettings;
use crate::error::BridgeError;
use crate::headers;
use crate::message::{MessageContext, OutgoingMessage, TransportOperation};
use crate::resilience::CircuitBreaker;
use crate::transport::{Dispatcher, MessageHandler};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, warn};

const FAILURE_POLICY_TAG: &str = "FailurePolicy:";

/// Base delay between delayed-retry rounds; grows linearly with the round.
const DELAYED_RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Pause applied before handling while the circuit is tripped.
const TRIPPED_INTAKE_DELAY: Duration = Duration::from_millis(500);

/// The single place deciding retry vs. poison queue vs. throttle.
///
/// Immediate retries re-run the handler in process; delayed retries return
/// the message to the input queue with an incremented retry header; once
/// both ladders are exhausted the message moves to the poison queue with its
/// original headers (intent included) intact, so an operator can inspect and
/// reprocess it.
pub(crate) struct FailurePolicy {
    port_name: String,
    settings: RetrySettings,
    breaker: CircuitBreaker,
    dispatcher: Arc<dyn Dispatcher>,
    poison_queue: String,
}

impl FailurePolicy {
    pub(crate) fn new(
        port_name: &str,
        settings: RetrySettings,
        dispatcher: Arc<dyn Dispatcher>,
        poison_queue: &str,
    ) -> Self {
        Self {
            port_name: port_name.to_string(),
            breaker: CircuitBreaker::new(settings.circuit_breaker_threshold),
            settings,
            dispatcher,
            poison_queue: poison_queue.to_string(),
        }
    }

    /// Wraps the routing handler into the handler given to the transport.
    pub(crate) fn wrap(self: Arc<Self>, inner: MessageHandler) -> MessageHandler {
        Arc::new(
            move |context: &MessageContext| -> futures::future::BoxFuture<'_, Result<(), BridgeError>> {
                let policy = self.clone();
                let inner = inner.clone();
                Box::pin(async move { policy.process(context, &inner).await })
            },
        )
    }

    async fn process(
        &self,
        context: &MessageContext,
        inner: &MessageHandler,
    ) -> Result<(), BridgeError> {
        if self.breaker.is_tripped() {
            sleep(TRIPPED_INTAKE_DELAY).await;
        }

        let mut last_error = None;
        for attempt in 0..=self.settings.immediate_retries {
            // A cancelled message belongs to a tearing-down receive loop;
            // leave redelivery to the transport instead of requeueing.
            if context.cancellation.is_cancelled() {
                return Err(crate::error::TransportError::ConnectionClosed.into());
            }
            match inner(context).await {
                Ok(()) => {
                    self.breaker.record_success();
                    return Ok(());
                }
                Err(err) => {
                    warn!(
                        "{}:{FAILURE_POLICY_TAG} attempt {attempt} failed: {err}",
                        self.port_name
                    );
                    last_error = Some(err);
                }
            }
        }
        self.breaker.record_failure();

        let reason = last_error
            .map(|err| err.to_string())
            .unwrap_or_else(|| "unknown failure".to_string());

        let delayed_round = context
            .header(headers::RETRIES)
            .and_then(|value| value.parse::<u32>().ok())
            .unwrap_or(0);
        if delayed_round < self.settings.delayed_retries {
            return self.return_to_queue(context, delayed_round).await;
        }
        self.move_to_poison_queue(context, &reason).await
    }

    async fn return_to_queue(
        &self,
        context: &MessageContext,
        delayed_round: u32,
    ) -> Result<(), BridgeError> {
        sleep(DELAYED_RETRY_BACKOFF * (delayed_round + 1)).await;

        let mut retried_headers = context.headers.clone();
        retried_headers.insert(headers::RETRIES.to_string(), (delayed_round + 1).to_string());
        let operation = TransportOperation::unicast(
            OutgoingMessage::new(
                context.message_id.clone(),
                retried_headers,
                context.body.clone(),
            ),
            self.dispatcher.local_address(),
        );
        self.dispatcher
            .dispatch(vec![operation], &context.transaction)
            .await?;
        warn!(
            "{}:{FAILURE_POLICY_TAG} returned message {} to the queue, delayed round {}",
            self.port_name,
            context.message_id,
            delayed_round + 1
        );
        Ok(())
    }

    async fn move_to_poison_queue(
        &self,
        context: &MessageContext,
        reason: &str,
    ) -> Result<(), BridgeError> {
        let operation = TransportOperation::unicast(
            OutgoingMessage::new(
                context.message_id.clone(),
                context.headers.clone(),
                context.body.clone(),
            ),
            self.poison_queue.clone(),
        );
        self.dispatcher
            .dispatch(vec![operation], &context.transaction)
            .await?;
        error!(
            "{}:{FAILURE_POLICY_TAG} moved message {} to poison queue '{}': {reason}",
            self.port_name, context.message_id, self.poison_queue
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::FailurePolicy;
    use crate::addressing::EndpointInstance;
    use crate::config::RetrySettings;
    use crate::error::{BridgeError, TransportError, UnforwardableMessage};
    use crate::message::{
        MessageContext, TransportOperation, TransportTransaction,
    };
    use crate::transport::{Dispatcher, MessageHandler};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex as StdMutex};
    use tokio_util::sync::CancellationToken;

    #[derive(Default)]
    struct RecordingDispatcher {
        dispatched: StdMutex<Vec<TransportOperation>>,
    }

    impl RecordingDispatcher {
        fn operations(&self) -> Vec<TransportOperation> {
            self.dispatched.lock().expect("lock dispatched").clone()
        }
    }

    #[async_trait]
    impl Dispatcher for RecordingDispatcher {
        fn endpoint_name(&self) -> &str {
            "port-a"
        }

        fn local_address(&self) -> &str {
            "port-a"
        }

        fn resolve_address(&self, instance: &EndpointInstance) -> String {
            instance.endpoint.clone()
        }

        async fn dispatch(
            &self,
            operations: Vec<TransportOperation>,
            _transaction: &TransportTransaction,
        ) -> Result<(), TransportError> {
            self.dispatched
                .lock()
                .expect("lock dispatched")
                .extend(operations);
            Ok(())
        }
    }

    fn context(headers: HashMap<String, String>) -> MessageContext {
        MessageContext::new(
            "m1",
            headers,
            b"body".to_vec(),
            TransportTransaction::none(),
            CancellationToken::new(),
        )
    }

    fn failing_handler(calls: Arc<AtomicU32>) -> MessageHandler {
        Arc::new(
            move |_context: &MessageContext| -> futures::future::BoxFuture<
                '_,
                Result<(), BridgeError>,
            > {
                let calls = calls.clone();
                Box::pin(async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(UnforwardableMessage::new("always fails").into())
                })
            },
        )
    }

    fn policy(
        dispatcher: Arc<RecordingDispatcher>,
        immediate: u32,
        delayed: u32,
    ) -> Arc<FailurePolicy> {
        Arc::new(FailurePolicy::new(
            "port-a",
            RetrySettings {
                immediate_retries: immediate,
                delayed_retries: delayed,
                circuit_breaker_threshold: 100,
            },
            dispatcher,
            "poison",
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn success_passes_straight_through() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let policy = policy(dispatcher.clone(), 2, 2);
        let handler: MessageHandler = Arc::new(
            |_context: &MessageContext| -> futures::future::BoxFuture<'_, Result<(), BridgeError>> {
                Box::pin(async { Ok(()) })
            },
        );

        policy.wrap(handler)(&context(HashMap::new())).await.unwrap();
        assert!(dispatcher.operations().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_retries_rerun_the_handler() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let policy = policy(dispatcher.clone(), 2, 5);
        let calls = Arc::new(AtomicU32::new(0));

        policy.wrap(failing_handler(calls.clone()))(&context(HashMap::new()))
            .await
            .unwrap();

        // First attempt plus two immediate retries.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_immediate_retries_return_message_to_queue() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let policy = policy(dispatcher.clone(), 0, 5);

        policy.wrap(failing_handler(Arc::new(AtomicU32::new(0))))(&context(HashMap::new()))
            .await
            .unwrap();

        let operations = dispatcher.operations();
        assert_eq!(operations.len(), 1);
        assert_eq!(
            operations[0].destination,
            crate::message::AddressTag::Unicast("port-a".to_string())
        );
        assert_eq!(
            operations[0]
                .message
                .headers
                .get(crate::headers::RETRIES)
                .map(String::as_str),
            Some("1")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_delayed_retries_move_message_to_poison_queue() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let policy = policy(dispatcher.clone(), 0, 2);

        let mut headers = HashMap::new();
        headers.insert(crate::headers::RETRIES.to_string(), "2".to_string());
        headers.insert(
            crate::headers::MESSAGE_INTENT.to_string(),
            "Send".to_string(),
        );

        policy.wrap(failing_handler(Arc::new(AtomicU32::new(0))))(&context(headers))
            .await
            .unwrap();

        let operations = dispatcher.operations();
        assert_eq!(operations.len(), 1);
        assert_eq!(
            operations[0].destination,
            crate::message::AddressTag::Unicast("poison".to_string())
        );
        // Original headers, intent included, stay intact.
        assert_eq!(
            operations[0]
                .message
                .headers
                .get(crate::headers::MESSAGE_INTENT)
                .map(String::as_str),
            Some("Send")
        );
        assert_eq!(
            operations[0]
                .message
                .headers
                .get(crate::headers::RETRIES)
                .map(String::as_str),
            Some("2")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn handler_error_does_not_leak_to_the_transport() {
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let policy = policy(dispatcher, 0, 1);

        let result: Result<(), BridgeError> =
            policy.wrap(failing_handler(Arc::new(AtomicU32::new(0))))(&context(HashMap::new()))
                .await;
        assert!(result.is_ok());
    }
}
