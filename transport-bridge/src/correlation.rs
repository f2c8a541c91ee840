//! Tag-length-value codec for the correlation header.
//!
//! A bridge hop needs to thread the original correlation id, the original
//! reply-to address and optionally the source port name through transports
//! that only propagate a single correlation field. The bundle is packed as
//! `tag|<decimal length>|<value>` groups joined by `|`; values are length
//! prefixed, so they may themselves contain `|` (nested bundles included).

use crate::error::UnforwardableMessage;
use std::fmt::Write;

pub(crate) const TAG_ID: &str = "id";
pub(crate) const TAG_REPLY_TO: &str = "reply-to";
pub(crate) const TAG_PORT: &str = "port";

/// Encodes a correlation bundle into a single header value.
pub fn encode(id: &str, reply_to: &str, port: Option<&str>) -> String {
    let mut encoded = String::with_capacity(id.len() + reply_to.len() + 32);
    let _ = write!(
        encoded,
        "{TAG_ID}|{}|{id}|{TAG_REPLY_TO}|{}|{reply_to}",
        id.len(),
        reply_to.len()
    );
    if let Some(port) = port {
        let _ = write!(encoded, "|{TAG_PORT}|{}|{port}", port.len());
    }
    encoded
}

/// Decodes a bundle, invoking `callback(tag, value)` per group.
///
/// Decoding is a strict inverse of [`encode`]: a missing separator, a
/// non-numeric length or a declared length exceeding the remaining input is
/// rejected rather than silently truncated.
pub fn decode(
    encoded: &str,
    mut callback: impl FnMut(&str, &str),
) -> Result<(), UnforwardableMessage> {
    let mut remaining = encoded;
    loop {
        let Some(tag_end) = remaining.find('|') else {
            return Err(UnforwardableMessage::new(
                "correlation bundle: expected tag",
            ));
        };
        let tag = &remaining[..tag_end];
        remaining = &remaining[tag_end + 1..];

        let Some(len_end) = remaining.find('|') else {
            return Err(UnforwardableMessage::new(
                "correlation bundle: expected length",
            ));
        };
        let length: usize = remaining[..len_end].parse().map_err(|_| {
            UnforwardableMessage::new(format!(
                "correlation bundle: non-numeric length '{}'",
                &remaining[..len_end]
            ))
        })?;
        remaining = &remaining[len_end + 1..];

        if remaining.len() < length || !remaining.is_char_boundary(length) {
            return Err(UnforwardableMessage::new(format!(
                "correlation bundle: expected value of {length} characters"
            )));
        }
        let value = &remaining[..length];
        callback(tag, value);
        remaining = &remaining[length..];

        if remaining.is_empty() {
            return Ok(());
        }
        let Some(rest) = remaining.strip_prefix('|') else {
            return Err(UnforwardableMessage::new(
                "correlation bundle: expected separator",
            ));
        };
        remaining = rest;
    }
}

/// Decoded view of the three well-known bundle fields.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CorrelationBundle {
    pub id: Option<String>,
    pub reply_to: Option<String>,
    pub port: Option<String>,
}

impl CorrelationBundle {
    /// Decodes the well-known fields, ignoring unknown tags.
    pub fn decode(encoded: &str) -> Result<Self, UnforwardableMessage> {
        let mut bundle = Self::default();
        decode(encoded, |tag, value| match tag {
            TAG_ID => bundle.id = Some(value.to_string()),
            TAG_REPLY_TO => bundle.reply_to = Some(value.to_string()),
            TAG_PORT => bundle.port = Some(value.to_string()),
            _ => {}
        })?;
        Ok(bundle)
    }
}
