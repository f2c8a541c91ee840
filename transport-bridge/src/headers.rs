//! Well-known header names used on the wire.
//!
//! The unprefixed names carry standard messaging semantics understood by
//! endpoints on either side. The `Bridge.`-prefixed names are internal to the
//! bridge and must never reach the true final recipient; ports strip or
//! overwrite them at the last hop.

/// Classifies a message as Send, Publish, Subscribe, Unsubscribe or Reply.
pub const MESSAGE_INTENT: &str = "MessageIntent";

/// `;`-separated list of type descriptors; the first entry is the root type
/// used for routing decisions.
pub const ENCLOSED_MESSAGE_TYPES: &str = "EnclosedMessageTypes";

/// Address replies should be sent to.
pub const REPLY_TO_ADDRESS: &str = "ReplyToAddress";

/// Correlation id; across a bridge hop it carries the TLV-encoded bundle.
pub const CORRELATION_ID: &str = "CorrelationId";

/// Type descriptor being subscribed to or unsubscribed from.
pub const SUBSCRIPTION_MESSAGE_TYPE: &str = "SubscriptionMessageType";

/// Physical address of the subscriber issuing a subscription request.
pub const SUBSCRIBER_TRANSPORT_ADDRESS: &str = "SubscriberTransportAddress";

/// Logical endpoint name of the subscriber issuing a subscription request.
pub const SUBSCRIBER_ENDPOINT: &str = "SubscriberEndpoint";

/// Wire-formatted timestamp stamped on outgoing control messages.
pub const TIME_SENT: &str = "TimeSent";

/// Logical endpoint the message should ultimately be delivered to.
pub const DESTINATION_ENDPOINT: &str = "Bridge.DestinationEndpoint";

/// Explicit switch port override, bypassing the port table.
pub const DESTINATION_PORT: &str = "Bridge.DestinationPort";

/// `;`-separated list of destination site names for site-based routing.
pub const DESTINATION_SITES: &str = "Bridge.DestinationSites";

/// Unique id of one resubscription round.
pub const RESUBSCRIPTION_ID: &str = "Bridge.ResubscriptionId";

/// Timestamp of one resubscription round.
pub const RESUBSCRIPTION_TIMESTAMP: &str = "Bridge.ResubscriptionTimestamp";

/// Delayed-retry counter maintained by the failure policy.
pub const RETRIES: &str = "Bridge.Retries";

/// Strips every bridge-internal header before final-hop delivery.
pub fn strip_bridge_headers(headers: &mut std::collections::HashMap<String, String>) {
    headers.retain(|name, _| !name.starts_with("Bridge."));
}

#[cfg(test)]
mod tests {
    use super::strip_bridge_headers;
    use std::collections::HashMap;

    #[test]
    fn strip_removes_only_bridge_namespace() {
        let mut headers = HashMap::new();
        headers.insert(super::DESTINATION_ENDPOINT.to_string(), "sales".to_string());
        headers.insert(super::DESTINATION_PORT.to_string(), "left".to_string());
        headers.insert(super::CORRELATION_ID.to_string(), "abc".to_string());

        strip_bridge_headers(&mut headers);

        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key(super::CORRELATION_ID));
    }
}
