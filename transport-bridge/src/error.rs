//! Error taxonomy shared across the forwarding engine.

use thiserror::Error;

/// A message that is structurally unroutable.
///
/// Raised by routers for data/contract problems: missing required headers,
/// malformed correlation bundles, unknown intents, or an unresolvable
/// forwarding destination. Never used for transient infrastructure trouble.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unforwardable message: {reason}")]
pub struct UnforwardableMessage {
    reason: String,
}

impl UnforwardableMessage {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// Failure reported by a transport while dispatching or receiving.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("destination queue '{0}' does not exist")]
    UnknownQueue(String),
    #[error("transport connection is closed")]
    ConnectionClosed,
    #[error("transport does not support the requested operation: {0}")]
    Unsupported(String),
    #[error("transport failure: {0}")]
    Other(String),
}

/// Top-level error type of the forwarding engine.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Unforwardable(#[from] UnforwardableMessage),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("subscription storage failure: {0}")]
    Storage(#[from] subscription_store::StoreError),
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl BridgeError {
    /// `true` for data/contract errors that no amount of retrying can fix.
    pub fn is_unforwardable(&self) -> bool {
        matches!(self, BridgeError::Unforwardable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::{BridgeError, TransportError, UnforwardableMessage};

    #[test]
    fn unforwardable_keeps_reason() {
        let err = UnforwardableMessage::new("missing header");
        assert_eq!(err.reason(), "missing header");
        assert_eq!(err.to_string(), "unforwardable message: missing header");
    }

    #[test]
    fn bridge_error_classifies_unforwardable() {
        let err: BridgeError = UnforwardableMessage::new("bad intent").into();
        assert!(err.is_unforwardable());

        let err: BridgeError = TransportError::ConnectionClosed.into();
        assert!(!err.is_unforwardable());
    }
}
