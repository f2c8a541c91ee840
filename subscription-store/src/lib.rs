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

//! # subscription-store
//!
//! Subscription storage contract used by message-driven publish/subscribe
//! routing, plus the two in-scope implementations: the native no-op store for
//! transports whose broker tracks subscribers itself, and a table store with
//! a pluggable row backing and an optional time-boxed read-through cache.
//!
//! Operations are individually atomic; a read concurrent with a write may see
//! either the old or the new state. No cross-operation transactions are
//! offered or required.

use async_trait::async_trait;
use thiserror::Error;

mod table;

pub use table::{InMemoryBacking, SubscriptionBacking, TableSubscriptionStore};

/// A subscriber identified by its physical transport address.
///
/// The logical endpoint name is advisory metadata used for scale-out
/// grouping; equality considers the transport address only.
#[derive(Debug, Clone)]
pub struct Subscriber {
    pub transport_address: String,
    pub endpoint: Option<String>,
}

impl Subscriber {
    pub fn new(transport_address: impl Into<String>, endpoint: Option<String>) -> Self {
        Self {
            transport_address: transport_address.into(),
            endpoint,
        }
    }
}

impl PartialEq for Subscriber {
    fn eq(&self, other: &Self) -> bool {
        self.transport_address == other.transport_address
    }
}

impl Eq for Subscriber {}

impl std::hash::Hash for Subscriber {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.transport_address.hash(state);
    }
}

/// A message type identified by its exact full name. No hierarchy reasoning
/// happens here; publishers express hierarchies by enclosing multiple types.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageType(String);

impl MessageType {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self(type_name.into())
    }

    pub fn type_name(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("subscription storage does not support this operation: {0}")]
    Unsupported(String),
    #[error("subscription storage backing failure: {0}")]
    Backing(String),
}

/// Records which subscriber wants which message types.
///
/// A (subscriber, type) pair is subscribed at most once; re-subscribing
/// overwrites the endpoint recorded for the pair.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn subscribe(
        &self,
        subscriber: &Subscriber,
        message_type: &MessageType,
    ) -> Result<(), StoreError>;

    async fn unsubscribe(
        &self,
        subscriber: &Subscriber,
        message_type: &MessageType,
    ) -> Result<(), StoreError>;

    /// Returns the distinct subscribers registered for any of the given
    /// types (a publish passes the full enclosed-type hierarchy).
    async fn subscribers_for(
        &self,
        message_types: &[MessageType],
    ) -> Result<Vec<Subscriber>, StoreError>;
}

/// No-op store for natively multicast transports: the broker itself tracks
/// subscribers, so there is nothing to record and nothing to query.
#[derive(Debug, Default)]
pub struct NativeSubscriptionStore;

impl NativeSubscriptionStore {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SubscriptionStore for NativeSubscriptionStore {
    async fn subscribe(&self, _: &Subscriber, _: &MessageType) -> Result<(), StoreError> {
        Ok(())
    }

    async fn unsubscribe(&self, _: &Subscriber, _: &MessageType) -> Result<(), StoreError> {
        Ok(())
    }

    async fn subscribers_for(&self, _: &[MessageType]) -> Result<Vec<Subscriber>, StoreError> {
        Err(StoreError::Unsupported(
            "native transports resolve subscribers in the broker".to_string(),
        ))
    }
}
