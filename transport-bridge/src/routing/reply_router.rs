//! Routing strategy for messages with Reply intent.

use crate::correlation::CorrelationBundle;
use crate::error::{BridgeError, UnforwardableMessage};
use crate::headers;
use crate::message::{MessageContext, OutgoingMessage, TransportOperation};
use crate::transport::Dispatcher;

pub(crate) struct ReplyRouter;

impl ReplyRouter {
    pub(crate) fn new() -> Self {
        Self
    }

    /// Routes a reply to the address encoded in its correlation bundle,
    /// undoing the send router's rewrite.
    ///
    /// A reply without a correlation id, or with a bundle lacking the
    /// `reply-to` field, cannot be routed blind and is unforwardable.
    pub(crate) async fn route(
        &self,
        context: &MessageContext,
        dispatcher: &dyn Dispatcher,
    ) -> Result<(), BridgeError> {
        let Some(correlation_id) = context.header(headers::CORRELATION_ID) else {
            return Err(UnforwardableMessage::new(format!(
                "the reply has to contain a '{}' header set by the bridge when sending out the initial message",
                headers::CORRELATION_ID
            ))
            .into());
        };

        let bundle = CorrelationBundle::decode(correlation_id)?;
        let Some(reply_to) = bundle.reply_to else {
            return Err(UnforwardableMessage::new(
                "the reply message does not contain the 'reply-to' correlation parameter required to route the message",
            )
            .into());
        };

        let mut forwarded = context.headers.clone();
        // Restore the correlation id the original sender used. For nested
        // hops the restored value is itself a bundle the previous bridge
        // decodes in turn.
        if let Some(original_id) = bundle.id {
            forwarded.insert(headers::CORRELATION_ID.to_string(), original_id);
        }
        headers::strip_bridge_headers(&mut forwarded);

        let operation = TransportOperation::unicast(
            OutgoingMessage::new(context.message_id.clone(), forwarded, context.body.clone()),
            reply_to,
        );
        dispatcher
            .dispatch(vec![operation], &context.transaction)
            .await?;
        Ok(())
    }
}
