//! Shared in-memory broker state: named queues plus a multicast fabric.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use transport_bridge::{OutgoingMessage, TransportError};

pub(crate) struct QueuedMessage {
    pub message_id: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

struct Queue {
    sender: UnboundedSender<QueuedMessage>,
    // Present while nobody is receiving from the queue.
    receiver: Option<UnboundedReceiver<QueuedMessage>>,
}

/// One broker per transport side; queues and topic subscriptions live here.
#[derive(Default)]
pub struct InMemoryBroker {
    queues: Mutex<HashMap<String, Queue>>,
    // topic (type-handle id) -> subscribed queue names
    topics: Mutex<HashMap<u64, HashSet<String>>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_queue(&self, name: &str) {
        let mut queues = self.queues.lock().expect("broker queues poisoned");
        queues.entry(name.to_string()).or_insert_with(|| {
            let (sender, receiver) = unbounded_channel();
            Queue {
                sender,
                receiver: Some(receiver),
            }
        });
    }

    pub fn queue_exists(&self, name: &str) -> bool {
        self.queues
            .lock()
            .expect("broker queues poisoned")
            .contains_key(name)
    }

    /// Takes every message sitting unconsumed in a queue with no receiver
    /// attached; handy for poison-queue assertions.
    pub fn drain_queue(&self, name: &str) -> Vec<(String, HashMap<String, String>, Vec<u8>)> {
        let mut queues = self.queues.lock().expect("broker queues poisoned");
        let Some(queue) = queues.get_mut(name) else {
            return Vec::new();
        };
        let Some(receiver) = queue.receiver.as_mut() else {
            return Vec::new();
        };
        let mut drained = Vec::new();
        while let Ok(message) = receiver.try_recv() {
            drained.push((message.message_id, message.headers, message.body));
        }
        drained
    }

    /// Queue names currently subscribed to a multicast topic.
    pub fn topic_subscribers(&self, topic: u64) -> Vec<String> {
        self.topics
            .lock()
            .expect("broker topics poisoned")
            .get(&topic)
            .map(|queues| queues.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn send(
        &self,
        queue_name: &str,
        message: &OutgoingMessage,
        auto_create: bool,
    ) -> Result<(), TransportError> {
        let mut queues = self.queues.lock().expect("broker queues poisoned");
        if !queues.contains_key(queue_name) {
            if !auto_create {
                return Err(TransportError::UnknownQueue(queue_name.to_string()));
            }
            let (sender, receiver) = unbounded_channel();
            queues.insert(
                queue_name.to_string(),
                Queue {
                    sender,
                    receiver: Some(receiver),
                },
            );
        }
        let queue = queues.get(queue_name).expect("queue just ensured");
        queue
            .sender
            .send(QueuedMessage {
                message_id: message.message_id.clone(),
                headers: message.headers.clone(),
                body: message.body.clone(),
            })
            .map_err(|_| TransportError::ConnectionClosed)
    }

    pub(crate) fn publish(
        &self,
        topic: u64,
        message: &OutgoingMessage,
        auto_create: bool,
    ) -> Result<(), TransportError> {
        let subscribed: Vec<String> = {
            let topics = self.topics.lock().expect("broker topics poisoned");
            topics
                .get(&topic)
                .map(|queues| queues.iter().cloned().collect())
                .unwrap_or_default()
        };
        for queue_name in subscribed {
            self.send(&queue_name, message, auto_create)?;
        }
        Ok(())
    }

    pub(crate) fn subscribe_topic(&self, topic: u64, queue_name: &str) {
        self.topics
            .lock()
            .expect("broker topics poisoned")
            .entry(topic)
            .or_default()
            .insert(queue_name.to_string());
    }

    pub(crate) fn unsubscribe_topic(&self, topic: u64, queue_name: &str) {
        if let Some(queues) = self
            .topics
            .lock()
            .expect("broker topics poisoned")
            .get_mut(&topic)
        {
            queues.remove(queue_name);
        }
    }

    pub(crate) fn take_receiver(
        &self,
        queue_name: &str,
    ) -> Result<UnboundedReceiver<QueuedMessage>, TransportError> {
        let mut queues = self.queues.lock().expect("broker queues poisoned");
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| TransportError::UnknownQueue(queue_name.to_string()))?;
        queue.receiver.take().ok_or_else(|| {
            TransportError::Other(format!("queue '{queue_name}' already has a receiver"))
        })
    }

    pub(crate) fn restore_receiver(
        &self,
        queue_name: &str,
        receiver: UnboundedReceiver<QueuedMessage>,
    ) {
        let mut queues = self.queues.lock().expect("broker queues poisoned");
        if let Some(queue) = queues.get_mut(queue_name) {
            queue.receiver = Some(receiver);
        }
    }
}
