//! Broker backends.
//!
//! A broker stores serialized envelopes in named FIFO queues and raises a
//! wake-up signal on every push. Two implementations share the [`Broker`]
//! contract:
//!
//! - [`MemoryBroker`]: process-local queues behind one lock, no blocking pop
//! - [`RedisBroker`]: Redis lists (`LPUSH`/`RPOP`/`BRPOP`) with pub/sub wake-ups
//!
//! Brokers never retry failed I/O; errors are returned to the caller as-is.

mod memory;
mod redis;

pub use self::memory::MemoryBroker;
pub use self::redis::RedisBroker;

use crate::error::MqError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::time::Duration;

/// Wake-up signal raised by a push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEvent {
    /// Topic channel the signal was published on
    pub topic: String,
    /// Queue that received the message
    pub queue: String,
}

/// Stream of wake-up signals returned by [`Broker::subscribe`].
pub type BrokerEvents = BoxStream<'static, BrokerEvent>;

/// Storage and transport for queued messages.
///
/// Queues are created lazily on first push. Push appends at the tail and pop
/// removes from the head, so each queue is FIFO.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Broker: Send + Sync {
    /// Short backend name for logs and errors.
    fn kind(&self) -> &'static str;

    /// Verify the backend is reachable.
    async fn health_check(&self) -> Result<(), MqError> {
        Ok(())
    }

    /// Append a message at the tail of `queue` and raise its wake-up signal.
    async fn push(&self, queue: &str, payload: Vec<u8>) -> Result<(), MqError>;

    /// Remove and return the head of `queue`, or `None` when it is empty.
    async fn pop(&self, queue: &str) -> Result<Option<Vec<u8>>, MqError>;

    /// Whether [`Broker::pop_blocking`] is implemented.
    fn supports_blocking_pop(&self) -> bool {
        false
    }

    /// Remove and return the head of `queue`, waiting up to `timeout` for a
    /// message. Returns `None` on timeout.
    ///
    /// Implementations enforce the deadline themselves. Callers never cancel
    /// the future early, since a message the backend has already removed would
    /// otherwise be lost.
    async fn pop_blocking(
        &self,
        _queue: &str,
        _timeout: Duration,
    ) -> Result<Option<Vec<u8>>, MqError> {
        Err(MqError::Unsupported {
            operation: "pop_blocking",
            broker: self.kind(),
        })
    }

    /// Keep only the `max_len` most recent entries of `queue`.
    async fn trim(&self, queue: &str, max_len: usize) -> Result<(), MqError>;

    /// Push to a success queue.
    ///
    /// Backends that bound success queues also trim to `max_len` here.
    async fn push_success(
        &self,
        queue: &str,
        payload: Vec<u8>,
        _max_len: usize,
    ) -> Result<(), MqError> {
        self.push(queue, payload).await
    }

    async fn len(&self, queue: &str) -> Result<usize, MqError>;

    /// Up to `limit` entries from the head of `queue`, oldest first, without removing them.
    async fn peek(&self, queue: &str, limit: usize) -> Result<Vec<Vec<u8>>, MqError>;

    /// Drop every entry of `queue`.
    async fn clear(&self, queue: &str) -> Result<(), MqError>;

    /// Subscribe to wake-up signals for future pushes.
    async fn subscribe(&self) -> Result<BrokerEvents, MqError>;
}
