//! Per-type drain loop and failure handling.
//!
//! A [`Handler`] drains one payload type's queues during a host cycle:
//!
//! ```text
//! loop {
//!     pop {Type}.priorityq ──▶ else pop {Type}.inq ──▶ else exit
//!         │
//!         ├─ malformed bytes ──▶ log, drop
//!         ├─ processor Ok    ──▶ notify {Type}.outq (+ reply_to)
//!         └─ processor Err   ──▶ FailurePolicy
//!                                 ├─ Retry      ──▶ {Type}.inq after the pass
//!                                 ├─ DeadLetter ──▶ {Type}.dlq
//!                                 └─ Handled    ──▶ nothing
//! }
//! ```
//!
//! Retries are held back until both queues are empty so a failing message is
//! attempted at most once per cycle.
//!
//! Priority is strict: a producer that keeps `priorityq` non-empty starves `inq`.

use crate::client::QueueClient;
use crate::envelope::{Envelope, Payload};
use crate::error::{HandlerError, MqError};
use crate::metrics::QueueMetrics;
use crate::processor::Processor;
use crate::queue_names::QueueNames;
use crate::stats::HandlerStats;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Observer for success notifications: `(outq name, message id)`.
pub type OutHandler = Arc<dyn Fn(&str, Uuid) + Send + Sync>;

/// What the handler should do with an envelope after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// Republish to the type's `inq` once the current pass is done
    Retry,
    /// Publish to the type's `dlq`
    DeadLetter,
    /// The policy already dealt with the envelope
    Handled,
}

/// Inputs available to a failure policy.
pub struct FailureContext<'a> {
    pub client: &'a QueueClient,
    pub queues: &'a QueueNames,
    pub retry_limit: u32,
}

/// Decides the fate of an envelope whose processing failed.
///
/// Errors returned from a policy are logged and never propagate; the envelope
/// is then dropped.
#[async_trait]
pub trait FailurePolicy<T: Payload>: Send + Sync {
    async fn on_failure(
        &self,
        envelope: &mut Envelope<T>,
        error: &HandlerError,
        ctx: &FailureContext<'_>,
    ) -> Result<FailureAction, HandlerError>;
}

/// Count the attempt, attach the error, retry below the limit and dead-letter at it.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFailurePolicy;

#[async_trait]
impl<T: Payload> FailurePolicy<T> for DefaultFailurePolicy {
    async fn on_failure(
        &self,
        envelope: &mut Envelope<T>,
        error: &HandlerError,
        ctx: &FailureContext<'_>,
    ) -> Result<FailureAction, HandlerError> {
        let attempts = envelope.increment_retry();
        envelope.set_error(error.to_message_error());

        if attempts < ctx.retry_limit {
            Ok(FailureAction::Retry)
        } else {
            Ok(FailureAction::DeadLetter)
        }
    }
}

/// Outcome of one handler's drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub type_name: String,
    pub received: u64,
    pub processed: u64,
    pub failed: u64,
    pub retried: u64,
    pub dead_lettered: u64,
    pub malformed: u64,
    /// The pass stopped early because the handler was disposed
    pub disposed: bool,
}

impl DrainReport {
    fn new(type_name: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            ..Default::default()
        }
    }
}

/// Per-cycle state shared between the host and a handler instance.
#[derive(Clone)]
pub struct HandlerContext {
    pub stats: Arc<HandlerStats>,
    pub disposed: Arc<AtomicBool>,
    pub out_handlers: Arc<[OutHandler]>,
}

impl HandlerContext {
    pub fn new(stats: Arc<HandlerStats>) -> Self {
        Self {
            stats,
            disposed: Arc::new(AtomicBool::new(false)),
            out_handlers: Arc::from(Vec::new()),
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

/// Type-erased handler, one variant per registered payload type.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    fn type_name(&self) -> &'static str;

    fn queue_names(&self) -> &QueueNames;

    /// Drain the type's queues until both are empty.
    ///
    /// Transport errors abort the pass and are returned; business and policy
    /// failures never are.
    async fn process(&self, client: &QueueClient) -> Result<DrainReport, MqError>;
}

/// Builds a fresh [`MessageHandler`] for each host cycle.
pub trait HandlerFactory: Send + Sync {
    fn type_name(&self) -> &'static str;

    fn create(&self, ctx: HandlerContext) -> Box<dyn MessageHandler>;
}

/// Factory for a typed handler; shares one processor and policy across cycles.
pub struct TypedHandlerFactory<T: Payload, P> {
    processor: Arc<P>,
    policy: Arc<dyn FailurePolicy<T>>,
}

impl<T: Payload, P: Processor<T> + 'static> TypedHandlerFactory<T, P> {
    pub fn new(processor: P, policy: Arc<dyn FailurePolicy<T>>) -> Self {
        Self {
            processor: Arc::new(processor),
            policy,
        }
    }
}

impl<T: Payload, P: Processor<T> + 'static> HandlerFactory for TypedHandlerFactory<T, P> {
    fn type_name(&self) -> &'static str {
        T::TYPE_NAME
    }

    fn create(&self, ctx: HandlerContext) -> Box<dyn MessageHandler> {
        Box::new(Handler::new(self.processor.clone(), self.policy.clone(), ctx))
    }
}

enum Popped<T> {
    Envelope { envelope: Envelope<T>, priority: bool },
    Malformed { queue: String, source: serde_json::Error },
}

/// Consumer loop for one payload type.
pub struct Handler<T: Payload, P> {
    processor: Arc<P>,
    policy: Arc<dyn FailurePolicy<T>>,
    queues: QueueNames,
    metrics: QueueMetrics,
    ctx: HandlerContext,
}

impl<T: Payload, P: Processor<T>> Handler<T, P> {
    pub fn new(processor: Arc<P>, policy: Arc<dyn FailurePolicy<T>>, ctx: HandlerContext) -> Self {
        Self {
            processor,
            policy,
            queues: QueueNames::of::<T>(),
            metrics: QueueMetrics::new(T::TYPE_NAME),
            ctx,
        }
    }

    /// Next message, priority queue first.
    async fn next(&self, client: &QueueClient) -> Result<Option<Popped<T>>, MqError> {
        for (queue, priority) in [(self.queues.priority(), true), (self.queues.input(), false)] {
            match client.get_non_blocking::<T>(queue).await {
                Ok(Some(envelope)) => return Ok(Some(Popped::Envelope { envelope, priority })),
                Ok(None) => continue,
                Err(MqError::MalformedEnvelope(source)) => {
                    return Ok(Some(Popped::Malformed {
                        queue: queue.to_string(),
                        source,
                    }));
                }
                Err(err) => return Err(err),
            }
        }
        Ok(None)
    }

    async fn drain(
        &self,
        client: &QueueClient,
        report: &mut DrainReport,
        retries: &mut Vec<Envelope<T>>,
    ) -> Result<(), MqError> {
        loop {
            if self.ctx.is_disposed() {
                debug!(type_name = T::TYPE_NAME, "Handler disposed, ending drain pass");
                report.disposed = true;
                return Ok(());
            }

            let Some(popped) = self.next(client).await? else {
                return Ok(());
            };
            report.received += 1;

            match popped {
                Popped::Envelope { envelope, priority } => {
                    self.ctx.stats.record_received(priority);
                    self.metrics.message_received(priority);
                    self.handle(client, envelope, report, retries).await?;
                }
                Popped::Malformed { queue, source } => {
                    error!(
                        type_name = T::TYPE_NAME,
                        queue = %queue,
                        error = %source,
                        "Dropping malformed envelope"
                    );
                    report.malformed += 1;
                    self.ctx.stats.record_malformed();
                    self.metrics.message_malformed();
                }
            }
        }
    }

    async fn handle(
        &self,
        client: &QueueClient,
        mut envelope: Envelope<T>,
        report: &mut DrainReport,
        retries: &mut Vec<Envelope<T>>,
    ) -> Result<(), MqError> {
        let started = Instant::now();
        match self.processor.process(&envelope).await {
            Ok(reply) => {
                client.ack(&envelope);
                self.on_success(client, &envelope, reply).await?;
                report.processed += 1;
                self.ctx.stats.record_processed();
                self.metrics.message_processed(started.elapsed());
            }
            Err(err) => {
                report.failed += 1;
                self.ctx.stats.record_failed();
                self.metrics.message_failed(err.code());
                warn!(
                    type_name = T::TYPE_NAME,
                    processor = self.processor.name(),
                    message_id = %envelope.id(),
                    retry_attempts = envelope.retry_attempts(),
                    error = %err,
                    "Message processing failed"
                );

                let ctx = FailureContext {
                    client,
                    queues: &self.queues,
                    retry_limit: client.config().retry_limit,
                };
                match self.policy.on_failure(&mut envelope, &err, &ctx).await {
                    Ok(FailureAction::Retry) => {
                        report.retried += 1;
                        self.ctx.stats.record_retried();
                        self.metrics.message_retried();
                        retries.push(envelope);
                    }
                    Ok(FailureAction::DeadLetter) => {
                        client.publish(self.queues.dlq(), &envelope).await?;
                        report.dead_lettered += 1;
                        self.ctx.stats.record_dead_lettered();
                        self.metrics.message_dead_lettered();
                        warn!(
                            type_name = T::TYPE_NAME,
                            message_id = %envelope.id(),
                            retry_attempts = envelope.retry_attempts(),
                            queue = %self.queues.dlq(),
                            "Message moved to dead letter queue"
                        );
                    }
                    Ok(FailureAction::Handled) => {}
                    Err(policy_err) => {
                        error!(
                            type_name = T::TYPE_NAME,
                            message_id = %envelope.id(),
                            error = %policy_err,
                            "Failure policy raised, message dropped"
                        );
                    }
                }
            }
        }
        Ok(())
    }

    async fn on_success(
        &self,
        client: &QueueClient,
        envelope: &Envelope<T>,
        reply: Option<P::Reply>,
    ) -> Result<(), MqError> {
        if client.config().publish_to_outq {
            client.notify(self.queues.out(), envelope).await?;
            for out_handler in self.ctx.out_handlers.iter() {
                out_handler(self.queues.out(), envelope.id());
            }
        }

        if let Some(reply) = reply
            && let Some(reply_to) = envelope.reply_to()
        {
            client.publish(reply_to, &Envelope::new(reply)).await?;
            debug!(message_id = %envelope.id(), reply_to = %reply_to, "Published reply");
        }
        Ok(())
    }

    /// Republish envelopes scheduled for retry.
    async fn requeue(&self, client: &QueueClient, retries: Vec<Envelope<T>>) -> Result<(), MqError> {
        for envelope in &retries {
            client.publish(self.queues.input(), envelope).await?;
            debug!(
                type_name = T::TYPE_NAME,
                message_id = %envelope.id(),
                retry_attempts = envelope.retry_attempts(),
                "Requeued message for retry"
            );
        }
        Ok(())
    }
}

#[async_trait]
impl<T: Payload, P: Processor<T>> MessageHandler for Handler<T, P> {
    fn type_name(&self) -> &'static str {
        T::TYPE_NAME
    }

    fn queue_names(&self) -> &QueueNames {
        &self.queues
    }

    async fn process(&self, client: &QueueClient) -> Result<DrainReport, MqError> {
        let mut report = DrainReport::new(T::TYPE_NAME);
        let mut retries = Vec::new();

        let drained = self.drain(client, &mut report, &mut retries).await;
        // Scheduled retries go back even when the pass was aborted.
        let requeued = self.requeue(client, retries).await;
        drained.and(requeued)?;

        if report.received > 0 {
            info!(
                type_name = T::TYPE_NAME,
                received = report.received,
                processed = report.processed,
                failed = report.failed,
                dead_lettered = report.dead_lettered,
                "Drain pass finished"
            );
        }
        Ok(report)
    }
}
