//! Routing strategy for messages with Send intent.

use crate::addressing::{DistributionPolicy, EndpointInstances};
use crate::correlation;
use crate::error::{BridgeError, UnforwardableMessage};
use crate::headers;
use crate::message::{MessageContext, OutgoingMessage, TransportOperation};
use crate::routing::{enclosed_types, type_full_name, ForwardingTable};
use crate::transport::Dispatcher;
use std::sync::Arc;
use tracing::debug;

const SEND_ROUTER_TAG: &str = "SendRouter:";

pub(crate) struct SendRouter {
    instances: Arc<EndpointInstances>,
    distribution: Arc<DistributionPolicy>,
}

impl SendRouter {
    pub(crate) fn new(
        instances: Arc<EndpointInstances>,
        distribution: Arc<DistributionPolicy>,
    ) -> Self {
        Self {
            instances,
            distribution,
        }
    }

    /// Resolves the eventual destination and dispatches one operation per
    /// resolved address.
    ///
    /// Forwarding-table next hops win over the destination-endpoint header;
    /// a message carrying neither is unforwardable. The reply-to header is
    /// rewritten to point back at this port and, when a reply-to /
    /// correlation-id pair exists, the correlation id is replaced with the
    /// TLV bundle so the eventual reply can retrace the path.
    pub(crate) async fn route(
        &self,
        context: &MessageContext,
        dispatcher: &dyn Dispatcher,
        forwarding: &ForwardingTable,
        source_port: Option<&str>,
    ) -> Result<(), BridgeError> {
        let types = enclosed_types(context)?;
        let root_full_name = type_full_name(types[0]);

        if let Some(next_hops) = forwarding.send_destinations(context, root_full_name)? {
            debug!(
                "{SEND_ROUTER_TAG} forwarding {} to {} next hop(s)",
                root_full_name,
                next_hops.len()
            );
            let mut operations = Vec::with_capacity(next_hops.len());
            for next_hop in &next_hops {
                operations.push(self.build_operation(
                    context,
                    dispatcher,
                    next_hop,
                    source_port,
                    false,
                )?);
            }
            dispatcher.dispatch(operations, &context.transaction).await?;
            return Ok(());
        }

        let Some(destination) = context.header(headers::DESTINATION_ENDPOINT) else {
            return Err(UnforwardableMessage::new(format!(
                "sent message does not contain the '{}' header",
                headers::DESTINATION_ENDPOINT
            ))
            .into());
        };

        let operation = self.build_operation(context, dispatcher, destination, source_port, true)?;
        dispatcher
            .dispatch(vec![operation], &context.transaction)
            .await?;
        Ok(())
    }

    fn build_operation(
        &self,
        context: &MessageContext,
        dispatcher: &dyn Dispatcher,
        destination_endpoint: &str,
        source_port: Option<&str>,
        final_hop: bool,
    ) -> Result<TransportOperation, BridgeError> {
        let address = self.select_destination_address(destination_endpoint, dispatcher)?;

        let mut forwarded = context.headers.clone();
        let reply_to = forwarded.get(headers::REPLY_TO_ADDRESS).cloned();
        let correlation_id = forwarded.get(headers::CORRELATION_ID).cloned();
        if let (Some(reply_to), Some(correlation_id)) = (reply_to, correlation_id) {
            forwarded.insert(
                headers::CORRELATION_ID.to_string(),
                correlation::encode(&correlation_id, &reply_to, source_port),
            );
        }
        forwarded.insert(
            headers::REPLY_TO_ADDRESS.to_string(),
            dispatcher.local_address().to_string(),
        );
        if final_hop {
            headers::strip_bridge_headers(&mut forwarded);
        }

        Ok(TransportOperation::unicast(
            OutgoingMessage::new(context.message_id.clone(), forwarded, context.body.clone()),
            address,
        ))
    }

    fn select_destination_address(
        &self,
        endpoint: &str,
        dispatcher: &dyn Dispatcher,
    ) -> Result<String, UnforwardableMessage> {
        let candidates: Vec<String> = self
            .instances
            .find(endpoint)
            .iter()
            .map(|instance| dispatcher.resolve_address(instance))
            .collect();
        self.distribution
            .strategy_for(endpoint)
            .select_destination(&candidates)
            .ok_or_else(|| {
                UnforwardableMessage::new(format!(
                    "no instances discovered for endpoint '{endpoint}'"
                ))
            })
    }
}
