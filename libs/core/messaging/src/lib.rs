//! Typed message queues with retry and dead-letter handling.
//!
//! Every payload type `T` owns four FIFO queues named after
//! [`Payload::TYPE_NAME`]:
//!
//! ```text
//!   Producer ──▶ {T}.priorityq ─┐
//!            └─▶ {T}.inq ───────┤
//!                               ▼
//!                        Handler<T, P> ── ok ──▶ {T}.outq   (+ reply_to)
//!                               │
//!                               └─ err ─▶ FailurePolicy ─▶ {T}.inq (retry)
//!                                                       └▶ {T}.dlq
//! ```
//!
//! Queues live in a [`Broker`]: [`MemoryBroker`] for a single process or
//! tests, [`RedisBroker`] for Redis lists shared between processes. A
//! [`MessagingHost`] owns one handler per type and drains them when
//! [`MessagingHost::start`] is called, or continuously via
//! [`MessagingHost::run`].
//!
//! # Example
//!
//! ```ignore
//! use messaging::{Envelope, HandlerError, MemoryBroker, MessagingHost, MqConfig,
//!                 Payload, Processor, Producer, QueueClient};
//!
//! #[derive(Clone, Serialize, Deserialize)]
//! struct Greeting {
//!     name: String,
//! }
//!
//! impl Payload for Greeting {
//!     const TYPE_NAME: &'static str = "Greeting";
//! }
//!
//! struct GreetingProcessor;
//!
//! #[async_trait]
//! impl Processor<Greeting> for GreetingProcessor {
//!     type Reply = String;
//!
//!     async fn process(&self, envelope: &Envelope<Greeting>) -> Result<Option<String>, HandlerError> {
//!         Ok(Some(format!("Hello, {}!", envelope.body().name)))
//!     }
//!
//!     fn name(&self) -> &'static str { "greeting_processor" }
//! }
//!
//! let client = QueueClient::new(Arc::new(MemoryBroker::new()), MqConfig::default());
//! let mut host = MessagingHost::new(client.clone());
//! host.register_handler::<Greeting, _>(GreetingProcessor)?;
//!
//! Producer::new(client).publish(Greeting { name: "World".into() }).await?;
//! host.start().await?;
//! ```

mod broker;
mod client;
mod config;
mod envelope;
mod error;
mod handler;
mod host;
mod metrics;
mod processor;
mod producer;
mod queue_names;
mod stats;

pub use broker::{Broker, BrokerEvent, BrokerEvents, MemoryBroker, RedisBroker};
pub use client::QueueClient;
pub use config::{
    DEFAULT_IDLE_WAKE_INTERVAL, DEFAULT_MAX_SUCCESS_QUEUE_SIZE, DEFAULT_POLL_INTERVAL,
    DEFAULT_REQUEST_TIMEOUT, DEFAULT_RETRY_LIMIT, MqConfig,
};
pub use envelope::{Envelope, MessageError, Payload};
pub use error::{HandlerError, MqError};
pub use handler::{
    DefaultFailurePolicy, DrainReport, FailureAction, FailureContext, FailurePolicy, Handler,
    HandlerContext, HandlerFactory, MessageHandler, OutHandler, TypedHandlerFactory,
};
pub use host::{HostState, MessagingHost, StartOutcome};
pub use self::metrics::QueueMetrics;
pub use processor::{FailingProcessor, FnProcessor, NoOpProcessor, Processor};
pub use producer::Producer;
pub use queue_names::{QueueKind, QueueNames, TEMP_QUEUE_PREFIX, TOPIC_IN, TOPIC_OUT};
pub use stats::{HandlerStats, HandlerStatsSnapshot, HostStats, StatsReport};
