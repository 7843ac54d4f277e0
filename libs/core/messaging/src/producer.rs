//! Message producer.

use crate::client::QueueClient;
use crate::envelope::{Envelope, Payload};
use crate::error::MqError;
use crate::queue_names::QueueNames;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Publishes envelopes to the queues a [`crate::MessagingHost`] drains.
///
/// Priority envelopes (`priority != 0`) go to `{Type}.priorityq`, everything
/// else to `{Type}.inq`.
#[derive(Clone)]
pub struct Producer {
    client: QueueClient,
}

impl Producer {
    pub fn new(client: QueueClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &QueueClient {
        &self.client
    }

    /// Wrap `body` in a fresh envelope and publish it. Returns the message id.
    pub async fn publish<T: Payload>(&self, body: T) -> Result<Uuid, MqError> {
        let envelope = Envelope::new(body);
        self.publish_envelope(&envelope).await?;
        Ok(envelope.id())
    }

    pub async fn publish_envelope<T: Payload>(&self, envelope: &Envelope<T>) -> Result<(), MqError> {
        let names = QueueNames::of::<T>();
        let queue = if envelope.is_priority() {
            names.priority()
        } else {
            names.input()
        };
        self.publish_to(queue, envelope).await
    }

    /// Publish to an explicit queue, bypassing type routing.
    pub async fn publish_to<T: Payload>(
        &self,
        queue: &str,
        envelope: &Envelope<T>,
    ) -> Result<(), MqError> {
        self.client.publish(queue, envelope).await
    }

    /// Publish `body` and wait for a reply on a temporary queue.
    ///
    /// `timeout` falls back to the configured request timeout, then to 60s.
    /// The reply queue is removed before returning.
    pub async fn request<T, R>(&self, body: T, timeout: Option<Duration>) -> Result<Envelope<R>, MqError>
    where
        T: Payload,
        R: DeserializeOwned,
    {
        let reply_to = self.client.new_temp_queue_name();
        let envelope = Envelope::new(body).with_reply_to(reply_to.clone());
        let timeout = self.client.config().effective_request_timeout(timeout);

        self.publish_envelope(&envelope).await?;
        debug!(
            message_id = %envelope.id(),
            reply_to = %reply_to,
            timeout = ?timeout,
            "Awaiting reply"
        );

        let reply = self.client.get::<R>(&reply_to, timeout).await;
        // Late replies would otherwise linger in the broker.
        self.client.clear(&reply_to).await?;
        reply
    }
}
