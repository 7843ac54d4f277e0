//! Queue client.
//!
//! The only surface producers, handlers and hosting code need. A client wraps
//! exactly one broker connection and is cheap to clone.

use crate::broker::Broker;
use crate::config::MqConfig;
use crate::envelope::{Envelope, MessageError, Payload};
use crate::error::MqError;
use crate::queue_names::QueueNames;
use serde::{Serialize, de::DeserializeOwned};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Typed publish/consume operations over a [`Broker`].
///
/// # Example
///
/// ```rust,ignore
/// let client = QueueClient::new(Arc::new(MemoryBroker::new()), MqConfig::default());
/// let names = QueueNames::of::<Greeting>();
///
/// client.publish(names.input(), &Envelope::new(Greeting { text: "hi".into() })).await?;
/// let envelope = client.get::<Greeting>(names.input(), Duration::from_secs(1)).await?;
/// client.ack(&envelope);
/// ```
#[derive(Clone)]
pub struct QueueClient {
    broker: Arc<dyn Broker>,
    config: Arc<MqConfig>,
}

impl QueueClient {
    pub fn new(broker: Arc<dyn Broker>, config: MqConfig) -> Self {
        Self {
            broker,
            config: Arc::new(config),
        }
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    pub fn config(&self) -> &MqConfig {
        &self.config
    }

    /// Serialize and push `envelope` to `queue`, raising the broker's wake-up signal.
    pub async fn publish<T: Serialize>(
        &self,
        queue: &str,
        envelope: &Envelope<T>,
    ) -> Result<(), MqError> {
        self.broker.push(queue, envelope.to_bytes()?).await?;
        debug!(queue = %queue, message_id = %envelope.id(), "Published message");
        Ok(())
    }

    /// Pop the head of `queue` without waiting.
    pub async fn get_non_blocking<T: DeserializeOwned>(
        &self,
        queue: &str,
    ) -> Result<Option<Envelope<T>>, MqError> {
        match self.broker.pop(queue).await? {
            Some(bytes) => Envelope::from_bytes(&bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Wait up to `timeout` for a message on `queue`.
    ///
    /// Uses the broker's blocking pop when available, otherwise polls with
    /// `poll_interval` sleeps between empty reads. A blocking pop owns its own
    /// deadline: once the broker has removed a message it is always returned.
    pub async fn get<T: DeserializeOwned>(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Envelope<T>, MqError> {
        let bytes = if self.broker.supports_blocking_pop() {
            self.broker.pop_blocking(queue, timeout).await?
        } else {
            self.poll(queue, timeout).await?
        };

        match bytes {
            Some(bytes) => Envelope::from_bytes(&bytes),
            None => Err(MqError::Timeout {
                queue: queue.to_string(),
                timeout,
            }),
        }
    }

    async fn poll(&self, queue: &str, timeout: Duration) -> Result<Option<Vec<u8>>, MqError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(bytes) = self.broker.pop(queue).await? {
                return Ok(Some(bytes));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.config.poll_interval.min(deadline - now)).await;
        }
    }

    /// Publish to a success queue. Brokers that bound success queues trim here.
    pub async fn notify<T: Serialize>(
        &self,
        queue: &str,
        envelope: &Envelope<T>,
    ) -> Result<(), MqError> {
        self.broker
            .push_success(queue, envelope.to_bytes()?, self.config.max_success_queue_size)
            .await?;
        debug!(queue = %queue, message_id = %envelope.id(), "Notified success");
        Ok(())
    }

    /// Acknowledge a consumed message.
    ///
    /// Both brokers remove messages on pop, so consumption is already final.
    pub fn ack<T>(&self, _envelope: &Envelope<T>) {}

    /// Reject a message after a failed attempt.
    ///
    /// Counts the attempt, attaches `error` when given, then republishes to the
    /// type's `inq` when `requeue` is true or to its `dlq` otherwise.
    pub async fn nak<T: Payload>(
        &self,
        mut envelope: Envelope<T>,
        requeue: bool,
        error: Option<MessageError>,
    ) -> Result<(), MqError> {
        envelope.increment_retry();
        if let Some(error) = error {
            envelope.set_error(error);
        }

        let names = QueueNames::of::<T>();
        let queue = if requeue { names.input() } else { names.dlq() };
        self.publish(queue, &envelope).await?;
        debug!(
            queue = %queue,
            message_id = %envelope.id(),
            retry_attempts = envelope.retry_attempts(),
            "Rejected message"
        );
        Ok(())
    }

    /// A process-unique queue name for request/reply.
    pub fn new_temp_queue_name(&self) -> String {
        QueueNames::temp_queue_name()
    }

    pub async fn len(&self, queue: &str) -> Result<usize, MqError> {
        self.broker.len(queue).await
    }

    /// Up to `limit` envelopes from the head of `queue`, oldest first. Nothing is removed.
    pub async fn peek<T: DeserializeOwned>(
        &self,
        queue: &str,
        limit: usize,
    ) -> Result<Vec<Envelope<T>>, MqError> {
        self.broker
            .peek(queue, limit)
            .await?
            .iter()
            .map(|bytes| Envelope::from_bytes(bytes))
            .collect()
    }

    pub async fn clear(&self, queue: &str) -> Result<(), MqError> {
        self.broker.clear(queue).await
    }

    /// Move every dead-lettered message of `T` back to its `inq`.
    ///
    /// Retry counts and error records are left untouched. Returns how many
    /// messages were moved.
    pub async fn replay_dead_letters<T: Payload>(&self) -> Result<usize, MqError> {
        let names = QueueNames::of::<T>();
        let mut moved = 0;
        while let Some(bytes) = self.broker.pop(names.dlq()).await? {
            self.broker.push(names.input(), bytes).await?;
            moved += 1;
        }
        if moved > 0 {
            info!(type_name = T::TYPE_NAME, moved, "Replayed dead letters");
        }
        Ok(moved)
    }
}
