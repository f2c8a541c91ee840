//! Table-backed subscription store with pluggable row persistence and an
//! optional time-boxed read-through cache.

use crate::{MessageType, StoreError, Subscriber, SubscriptionStore};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

const TABLE_STORE_TAG: &str = "TableSubscriptionStore:";

/// Row-level persistence behind [`TableSubscriptionStore`].
///
/// A SQL implementation maps these to upsert/delete/select statements over a
/// (Subscriber, MessageType, Endpoint) table; [`InMemoryBacking`] keeps the
/// same rows in process memory.
#[async_trait]
pub trait SubscriptionBacking: Send + Sync {
    /// Inserts the row, replacing the endpoint of an existing
    /// (subscriber, type) pair.
    async fn upsert(
        &self,
        subscriber: &Subscriber,
        message_type: &MessageType,
    ) -> Result<(), StoreError>;

    async fn delete(
        &self,
        subscriber_address: &str,
        message_type: &MessageType,
    ) -> Result<(), StoreError>;

    /// Distinct subscribers for any of the given types.
    async fn query(&self, message_types: &[MessageType]) -> Result<Vec<Subscriber>, StoreError>;
}

/// In-process backing used by tests and single-process deployments.
#[derive(Default)]
pub struct InMemoryBacking {
    // type -> subscriber address -> endpoint
    rows: RwLock<HashMap<MessageType, HashMap<String, Option<String>>>>,
}

impl InMemoryBacking {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubscriptionBacking for InMemoryBacking {
    async fn upsert(
        &self,
        subscriber: &Subscriber,
        message_type: &MessageType,
    ) -> Result<(), StoreError> {
        let mut rows = self.rows.write().await;
        rows.entry(message_type.clone())
            .or_default()
            .insert(subscriber.transport_address.clone(), subscriber.endpoint.clone());
        Ok(())
    }

    async fn delete(
        &self,
        subscriber_address: &str,
        message_type: &MessageType,
    ) -> Result<(), StoreError> {
        let mut rows = self.rows.write().await;
        if let Some(for_type) = rows.get_mut(message_type) {
            for_type.remove(subscriber_address);
            if for_type.is_empty() {
                rows.remove(message_type);
            }
        }
        Ok(())
    }

    async fn query(&self, message_types: &[MessageType]) -> Result<Vec<Subscriber>, StoreError> {
        let rows = self.rows.read().await;
        let mut distinct: HashMap<String, Option<String>> = HashMap::new();
        for message_type in message_types {
            if let Some(for_type) = rows.get(message_type) {
                for (address, endpoint) in for_type {
                    distinct.insert(address.clone(), endpoint.clone());
                }
            }
        }
        Ok(distinct
            .into_iter()
            .map(|(address, endpoint)| Subscriber::new(address, endpoint))
            .collect())
    }
}

struct CacheItem {
    stored: Instant,
    subscribers: Vec<Subscriber>,
}

/// Subscription store over a [`SubscriptionBacking`], optionally caching
/// query results for a fixed time-to-live.
///
/// Writes eagerly invalidate every cached query touching the written message
/// type, so a subscribe becomes visible to publishes without waiting for the
/// TTL to lapse.
pub struct TableSubscriptionStore<B> {
    backing: B,
    cache_for: Option<Duration>,
    cache: DashMap<String, CacheItem>,
}

impl<B: SubscriptionBacking> TableSubscriptionStore<B> {
    pub fn new(backing: B) -> Self {
        Self {
            backing,
            cache_for: None,
            cache: DashMap::new(),
        }
    }

    pub fn with_cache(backing: B, cache_for: Duration) -> Self {
        Self {
            backing,
            cache_for: Some(cache_for),
            cache: DashMap::new(),
        }
    }

    fn cache_key(message_types: &[MessageType]) -> String {
        let mut key = String::new();
        for message_type in message_types {
            key.push_str(message_type.type_name());
            key.push(',');
        }
        key
    }

    fn key_part(message_type: &MessageType) -> String {
        format!("{},", message_type.type_name())
    }

    fn invalidate(&self, message_type: &MessageType) {
        if self.cache_for.is_none() {
            return;
        }
        let part = Self::key_part(message_type);
        self.cache.retain(|key, _| !key.contains(&part));
        debug!(
            "{TABLE_STORE_TAG} invalidated cached queries touching {}",
            message_type
        );
    }
}

#[async_trait]
impl<B: SubscriptionBacking> SubscriptionStore for TableSubscriptionStore<B> {
    async fn subscribe(
        &self,
        subscriber: &Subscriber,
        message_type: &MessageType,
    ) -> Result<(), StoreError> {
        self.backing.upsert(subscriber, message_type).await?;
        self.invalidate(message_type);
        Ok(())
    }

    async fn unsubscribe(
        &self,
        subscriber: &Subscriber,
        message_type: &MessageType,
    ) -> Result<(), StoreError> {
        self.backing
            .delete(&subscriber.transport_address, message_type)
            .await?;
        self.invalidate(message_type);
        Ok(())
    }

    async fn subscribers_for(
        &self,
        message_types: &[MessageType],
    ) -> Result<Vec<Subscriber>, StoreError> {
        let Some(cache_for) = self.cache_for else {
            return self.backing.query(message_types).await;
        };

        let key = Self::cache_key(message_types);
        if let Some(item) = self.cache.get(&key) {
            if item.stored.elapsed() < cache_for {
                return Ok(item.subscribers.clone());
            }
        }

        let subscribers = self.backing.query(message_types).await?;
        self.cache.insert(
            key,
            CacheItem {
                stored: Instant::now(),
                subscribers: subscribers.clone(),
            },
        );
        Ok(subscribers)
    }
}

#[cfg(test)]
mod tests {
    use super::{InMemoryBacking, TableSubscriptionStore};
    use crate::{MessageType, Subscriber, SubscriptionStore};
    use std::time::Duration;

    fn subscriber(address: &str) -> Subscriber {
        Subscriber::new(address, Some("subscriber-endpoint".to_string()))
    }

    #[tokio::test]
    async fn subscribe_then_query_returns_subscriber() {
        let store = TableSubscriptionStore::new(InMemoryBacking::new());
        let event = MessageType::new("Events.OrderAccepted");

        store.subscribe(&subscriber("s@host"), &event).await.unwrap();

        let found = store.subscribers_for(std::slice::from_ref(&event)).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].transport_address, "s@host");
    }

    #[tokio::test]
    async fn resubscribe_overwrites_endpoint() {
        let store = TableSubscriptionStore::new(InMemoryBacking::new());
        let event = MessageType::new("Events.OrderAccepted");

        store
            .subscribe(&Subscriber::new("s@host", Some("old".to_string())), &event)
            .await
            .unwrap();
        store
            .subscribe(&Subscriber::new("s@host", Some("new".to_string())), &event)
            .await
            .unwrap();

        let found = store.subscribers_for(std::slice::from_ref(&event)).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].endpoint.as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn query_spans_the_full_type_hierarchy() {
        let store = TableSubscriptionStore::new(InMemoryBacking::new());
        let base = MessageType::new("Events.BaseEvent");
        let derived = MessageType::new("Events.DerivedEvent");

        store.subscribe(&subscriber("base@host"), &base).await.unwrap();
        store.subscribe(&subscriber("derived@host"), &derived).await.unwrap();

        let mut found = store
            .subscribers_for(&[derived.clone(), base.clone()])
            .await
            .unwrap();
        found.sort_by(|a, b| a.transport_address.cmp(&b.transport_address));
        assert_eq!(found.len(), 2);

        store.unsubscribe(&subscriber("base@host"), &base).await.unwrap();
        let found = store.subscribers_for(&[derived, base]).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].transport_address, "derived@host");
    }

    #[tokio::test]
    async fn cached_reads_are_invalidated_by_writes() {
        let store =
            TableSubscriptionStore::with_cache(InMemoryBacking::new(), Duration::from_secs(3600));
        let event = MessageType::new("Events.OrderAccepted");

        assert!(store
            .subscribers_for(std::slice::from_ref(&event))
            .await
            .unwrap()
            .is_empty());

        // The write must punch through the hour-long cache.
        store.subscribe(&subscriber("s@host"), &event).await.unwrap();
        let found = store.subscribers_for(std::slice::from_ref(&event)).await.unwrap();
        assert_eq!(found.len(), 1);

        store.unsubscribe(&subscriber("s@host"), &event).await.unwrap();
        assert!(store
            .subscribers_for(std::slice::from_ref(&event))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn unrelated_writes_keep_cache_entries() {
        let store =
            TableSubscriptionStore::with_cache(InMemoryBacking::new(), Duration::from_secs(3600));
        let cached = MessageType::new("Events.Cached");
        let other = MessageType::new("Events.Other");

        store.subscribe(&subscriber("s@host"), &cached).await.unwrap();
        let first = store.subscribers_for(std::slice::from_ref(&cached)).await.unwrap();
        assert_eq!(first.len(), 1);

        store.subscribe(&subscriber("x@host"), &other).await.unwrap();

        let second = store.subscribers_for(std::slice::from_ref(&cached)).await.unwrap();
        assert_eq!(second, first);
    }
}
