//! Routing strategies for messages with Publish intent.
//!
//! Two variants exist, fixed per port at initialization: the message-driven
//! router resolves subscribers from subscription storage and unicasts one
//! copy per resolved address; the native router emits a single multicast
//! operation tagged with the root event's type handle and leaves fan-out to
//! the transport's broker.

use crate::addressing::DistributionPolicy;
use crate::error::BridgeError;
use crate::headers;
use crate::identity::TypeRegistry;
use crate::message::{MessageContext, OutgoingMessage, TransportOperation};
use crate::routing::{enclosed_types, type_full_name};
use crate::transport::Dispatcher;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use subscription_store::{MessageType, SubscriptionStore};
use tracing::debug;

const PUBLISH_ROUTER_TAG: &str = "PublishRouter:";

#[async_trait]
pub trait PublishRouter: Send + Sync {
    async fn route(
        &self,
        context: &MessageContext,
        dispatcher: &dyn Dispatcher,
    ) -> Result<(), BridgeError>;
}

pub(crate) struct NativePublishRouter {
    types: Arc<TypeRegistry>,
}

impl NativePublishRouter {
    pub(crate) fn new(types: Arc<TypeRegistry>) -> Self {
        Self { types }
    }
}

#[async_trait]
impl PublishRouter for NativePublishRouter {
    async fn route(
        &self,
        context: &MessageContext,
        dispatcher: &dyn Dispatcher,
    ) -> Result<(), BridgeError> {
        let types = enclosed_types(context)?;
        let event_type = self.types.resolve(types[0])?;

        let mut forwarded = context.headers.clone();
        headers::strip_bridge_headers(&mut forwarded);

        let operation = TransportOperation::multicast(
            OutgoingMessage::new(context.message_id.clone(), forwarded, context.body.clone()),
            event_type,
        );
        dispatcher
            .dispatch(vec![operation], &context.transaction)
            .await?;
        Ok(())
    }
}

pub(crate) struct MessageDrivenPublishRouter {
    storage: Arc<dyn SubscriptionStore>,
    distribution: Arc<DistributionPolicy>,
}

impl MessageDrivenPublishRouter {
    pub(crate) fn new(
        storage: Arc<dyn SubscriptionStore>,
        distribution: Arc<DistributionPolicy>,
    ) -> Self {
        Self {
            storage,
            distribution,
        }
    }
}

#[async_trait]
impl PublishRouter for MessageDrivenPublishRouter {
    async fn route(
        &self,
        context: &MessageContext,
        dispatcher: &dyn Dispatcher,
    ) -> Result<(), BridgeError> {
        // The full enclosed-type list is the published hierarchy; a
        // subscriber to any entry receives the event.
        let hierarchy: Vec<MessageType> = enclosed_types(context)?
            .iter()
            .map(|descriptor| MessageType::new(type_full_name(descriptor)))
            .collect();
        let subscribers = self.storage.subscribers_for(&hierarchy).await?;

        let mut destinations = Vec::new();
        let mut scaled_out: HashMap<String, Vec<String>> = HashMap::new();
        for subscriber in subscribers {
            match subscriber.endpoint {
                Some(endpoint) => scaled_out
                    .entry(endpoint)
                    .or_default()
                    .push(subscriber.transport_address),
                None => destinations.push(subscriber.transport_address),
            }
        }
        for (endpoint, mut addresses) in scaled_out {
            addresses.sort();
            if let Some(selected) = self
                .distribution
                .strategy_for(&endpoint)
                .select_destination(&addresses)
            {
                destinations.push(selected);
            }
        }

        if destinations.is_empty() {
            debug!(
                "{PUBLISH_ROUTER_TAG} no subscribers for {:?}; dropping publish {}",
                hierarchy, context.message_id
            );
            return Ok(());
        }

        let mut forwarded = context.headers.clone();
        headers::strip_bridge_headers(&mut forwarded);

        let operations = destinations
            .into_iter()
            .map(|address| {
                TransportOperation::unicast(
                    OutgoingMessage::new(
                        context.message_id.clone(),
                        forwarded.clone(),
                        context.body.clone(),
                    ),
                    address,
                )
            })
            .collect();
        dispatcher
            .dispatch(operations, &context.transaction)
            .await?;
        Ok(())
    }
}
