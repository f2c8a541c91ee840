//! Message intent classification.

use crate::headers;
use crate::message::MessageContext;
use std::str::FromStr;
use strum::EnumString;

/// The five routable message intents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, strum::Display)]
#[strum(ascii_case_insensitive)]
pub enum MessageIntent {
    Send,
    Publish,
    Subscribe,
    Unsubscribe,
    Reply,
}

impl MessageIntent {
    /// Classifies an inbound message from its intent header.
    ///
    /// An absent or unparseable header yields `None`; the forwarding entry
    /// point turns that into an unroutable-intent error.
    pub fn classify(context: &MessageContext) -> Option<MessageIntent> {
        context
            .header(headers::MESSAGE_INTENT)
            .and_then(|value| MessageIntent::from_str(value).ok())
    }
}
