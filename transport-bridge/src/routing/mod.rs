/********************************************************************************
 * Copyright (c) 2024 Contributors to the Eclipse Foundation
 *
 * See the NOTICE file(s) distributed with this work for additional
 * information regarding copyright ownership.
 *
 * This program and the accompanying materials are made available under the
 * terms of the Apache License Version 2.0 which is available at
 * https://www.apache.org/licenses/LICENSE-2.0
 *
 * SPDX-License-Identifier: Apache-2.0
 ********************************************************************************/

//! Routing layer.
//!
//! Owns the per-intent routing strategies and the pieces they share: intent
//! classification, the inter-bridge forwarding table, and the per-port
//! pub/sub infrastructure slot that selects between the message-driven and
//! native publish/subscribe variants.

mod forwarding_table;
mod intent;
pub(crate) mod publish_router;
pub(crate) mod pubsub;
pub(crate) mod reply_router;
pub(crate) mod send_router;
pub(crate) mod subscribe_router;

pub use forwarding_table::{ForwardingTable, RoutingCallback};
pub use intent::MessageIntent;
pub use publish_router::PublishRouter;
pub use subscribe_router::SubscriptionForwarder;

use crate::error::UnforwardableMessage;
use crate::headers;
use crate::message::MessageContext;

/// Splits the enclosed-types header into individual descriptors, first entry
/// being the root type used for routing decisions.
pub(crate) fn enclosed_types(context: &MessageContext) -> Result<Vec<&str>, UnforwardableMessage> {
    let Some(raw) = context.header(headers::ENCLOSED_MESSAGE_TYPES) else {
        return Err(UnforwardableMessage::new(format!(
            "message does not contain the '{}' header",
            headers::ENCLOSED_MESSAGE_TYPES
        )));
    };
    let types: Vec<&str> = raw
        .split(';')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect();
    if types.is_empty() {
        return Err(UnforwardableMessage::new(format!(
            "the '{}' header is empty",
            headers::ENCLOSED_MESSAGE_TYPES
        )));
    }
    Ok(types)
}

/// Full name of a type descriptor: everything before the first comma.
pub(crate) fn type_full_name(descriptor: &str) -> &str {
    descriptor
        .split(',')
        .next()
        .map(str::trim)
        .unwrap_or(descriptor)
}

#[cfg(test)]
mod tests {
    use super::{enclosed_types, type_full_name};
    use crate::message::{MessageContext, TransportTransaction};
    use std::collections::HashMap;
    use tokio_util::sync::CancellationToken;

    fn context_with_types(value: Option<&str>) -> MessageContext {
        let mut headers = HashMap::new();
        if let Some(value) = value {
            headers.insert(
                crate::headers::ENCLOSED_MESSAGE_TYPES.to_string(),
                value.to_string(),
            );
        }
        MessageContext::new(
            "m1",
            headers,
            Vec::new(),
            TransportTransaction::none(),
            CancellationToken::new(),
        )
    }

    #[test]
    fn enclosed_types_splits_and_keeps_order() {
        let context = context_with_types(Some("A.Derived, Asm; A.Base, Asm ;"));
        let types = enclosed_types(&context).unwrap();
        assert_eq!(types, vec!["A.Derived, Asm", "A.Base, Asm"]);
    }

    #[test]
    fn enclosed_types_rejects_missing_or_empty_header() {
        assert!(enclosed_types(&context_with_types(None)).is_err());
        assert!(enclosed_types(&context_with_types(Some(" ; ;"))).is_err());
    }

    #[test]
    fn type_full_name_drops_assembly_and_version() {
        assert_eq!(type_full_name("A.Base, Asm, Version=1.0"), "A.Base");
        assert_eq!(type_full_name("A.Base"), "A.Base");
    }
}
