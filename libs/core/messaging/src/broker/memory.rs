use super::{Broker, BrokerEvent, BrokerEvents};
use crate::error::MqError;
use crate::queue_names::QueueNames;
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use tokio::sync::{Mutex, broadcast};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{trace, warn};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Process-local broker.
///
/// All queues live in one map behind a single lock; every operation is an
/// O(1) append or removal, so contention stays low. Pushes to inbound and
/// success queues broadcast a [`BrokerEvent`] to subscribers. There is no
/// blocking pop, so `QueueClient::get` polls this backend.
pub struct MemoryBroker {
    queues: Mutex<HashMap<String, VecDeque<Vec<u8>>>>,
    events: broadcast::Sender<BrokerEvent>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            queues: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Names of queues that currently hold messages.
    pub async fn queue_names(&self) -> Vec<String> {
        let queues = self.queues.lock().await;
        let mut names: Vec<String> = queues
            .iter()
            .filter(|(_, entries)| !entries.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    fn signal(&self, queue: &str) {
        let topic = QueueNames::topic_for(queue);
        // No receivers is fine; nobody is waiting for a wake-up.
        let _ = self.events.send(BrokerEvent {
            topic: topic.to_string(),
            queue: queue.to_string(),
        });
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn push(&self, queue: &str, payload: Vec<u8>) -> Result<(), MqError> {
        {
            let mut queues = self.queues.lock().await;
            queues.entry(queue.to_string()).or_default().push_back(payload);
        }
        trace!(queue = %queue, "Pushed message");
        self.signal(queue);
        Ok(())
    }

    async fn pop(&self, queue: &str) -> Result<Option<Vec<u8>>, MqError> {
        let mut queues = self.queues.lock().await;
        Ok(queues.get_mut(queue).and_then(VecDeque::pop_front))
    }

    async fn trim(&self, queue: &str, max_len: usize) -> Result<(), MqError> {
        let mut queues = self.queues.lock().await;
        if let Some(entries) = queues.get_mut(queue)
            && entries.len() > max_len
        {
            let excess = entries.len() - max_len;
            entries.drain(..excess);
        }
        Ok(())
    }

    async fn len(&self, queue: &str) -> Result<usize, MqError> {
        let queues = self.queues.lock().await;
        Ok(queues.get(queue).map_or(0, VecDeque::len))
    }

    async fn peek(&self, queue: &str, limit: usize) -> Result<Vec<Vec<u8>>, MqError> {
        let queues = self.queues.lock().await;
        Ok(queues
            .get(queue)
            .map(|entries| entries.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn clear(&self, queue: &str) -> Result<(), MqError> {
        self.queues.lock().await.remove(queue);
        Ok(())
    }

    async fn subscribe(&self) -> Result<BrokerEvents, MqError> {
        let stream = BroadcastStream::new(self.events.subscribe()).filter_map(|event| async move {
            match event {
                Ok(event) => Some(event),
                Err(err) => {
                    warn!(error = %err, "Wake-up subscriber lagged, signals dropped");
                    None
                }
            }
        });
        Ok(stream.boxed())
    }
}
