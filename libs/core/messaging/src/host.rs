//! Messaging host: handler registry and drain-cycle lifecycle.
//!
//! ```text
//!            start() CAS Stopped→Running
//!   Stopped ─────────────────────────────▶ Running
//!      ▲                                     │
//!      │  every handler drained              │
//!      └──── or every handler disposed ◀─────┘
//! ```
//!
//! One `start()` runs each registered handler in turn on a single client.
//! Concurrent `start()` calls while a cycle is in flight return
//! [`StartOutcome::AlreadyRunning`] without touching any queue.

use crate::client::QueueClient;
use crate::envelope::Payload;
use crate::error::MqError;
use crate::handler::{
    DefaultFailurePolicy, DrainReport, FailurePolicy, HandlerContext, HandlerFactory,
    MessageHandler, OutHandler, TypedHandlerFactory,
};
use crate::metrics::QueueMetrics;
use crate::processor::Processor;
use crate::queue_names::QueueNames;
use crate::stats::{HandlerStats, HostStats, StatsReport};
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use strum::Display;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

/// Lifecycle state of a [`MessagingHost`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[repr(u8)]
pub enum HostState {
    Stopped = 0,
    Running = 1,
}

impl HostState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => HostState::Running,
            _ => HostState::Stopped,
        }
    }
}

/// Result of [`MessagingHost::start`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// This call ran the cycle; one report per registered type
    Drained(Vec<DrainReport>),
    /// Another cycle was in flight, nothing was done
    AlreadyRunning,
}

struct Registration {
    factory: Box<dyn HandlerFactory>,
    stats: Arc<HandlerStats>,
}

struct Slot {
    type_name: &'static str,
    disposed: Arc<AtomicBool>,
}

/// Handler slots of the current (or most recent) cycle.
struct Cycle {
    generation: u64,
    slots: Vec<Slot>,
}

/// Owns the handler registry and runs drain cycles.
///
/// Handlers are registered while the host is exclusively owned; once it is
/// shared (usually behind an `Arc`) the registry is read-only.
///
/// # Example
///
/// ```rust,ignore
/// let client = QueueClient::new(Arc::new(MemoryBroker::new()), MqConfig::default());
/// let mut host = MessagingHost::new(client);
/// host.register_handler::<Greeting, _>(GreetingProcessor)?;
///
/// let host = Arc::new(host);
/// host.start().await?;
/// ```
pub struct MessagingHost {
    client: QueueClient,
    registrations: Vec<Registration>,
    out_handlers: Vec<OutHandler>,
    state: AtomicU8,
    cycle: Mutex<Cycle>,
    cycles_started: AtomicU64,
}

impl MessagingHost {
    pub fn new(client: QueueClient) -> Self {
        Self {
            client,
            registrations: Vec::new(),
            out_handlers: Vec::new(),
            state: AtomicU8::new(HostState::Stopped as u8),
            cycle: Mutex::new(Cycle {
                generation: 0,
                slots: Vec::new(),
            }),
            cycles_started: AtomicU64::new(0),
        }
    }

    pub fn client(&self) -> &QueueClient {
        &self.client
    }

    /// Register `processor` for `T` with the default retry/dead-letter policy.
    pub fn register_handler<T, P>(&mut self, processor: P) -> Result<(), MqError>
    where
        T: Payload,
        P: Processor<T> + 'static,
    {
        self.register_handler_with_failure_policy(processor, DefaultFailurePolicy)
    }

    /// Register `processor` for `T` with a custom failure callback.
    pub fn register_handler_with_failure_policy<T, P, F>(
        &mut self,
        processor: P,
        policy: F,
    ) -> Result<(), MqError>
    where
        T: Payload,
        P: Processor<T> + 'static,
        F: FailurePolicy<T> + 'static,
    {
        self.register_factory(Box::new(TypedHandlerFactory::new(processor, Arc::new(policy))))
    }

    /// Register a prebuilt factory. Fails if its type already has a handler.
    pub fn register_factory(&mut self, factory: Box<dyn HandlerFactory>) -> Result<(), MqError> {
        let type_name = factory.type_name();
        if self.is_registered(type_name) {
            return Err(MqError::DuplicateHandler {
                type_name: type_name.to_string(),
            });
        }
        info!(type_name = %type_name, "Registered message handler");
        self.registrations.push(Registration {
            factory,
            stats: Arc::new(HandlerStats::new()),
        });
        Ok(())
    }

    /// Observe every success notification as `(outq name, message id)`.
    pub fn on_success(&mut self, out_handler: impl Fn(&str, Uuid) + Send + Sync + 'static) {
        self.out_handlers.push(Arc::new(out_handler));
    }

    pub fn registered_types(&self) -> Vec<&'static str> {
        self.registrations
            .iter()
            .map(|r| r.factory.type_name())
            .collect()
    }

    pub fn is_registered(&self, type_name: &str) -> bool {
        self.registrations
            .iter()
            .any(|r| r.factory.type_name() == type_name)
    }

    pub fn state(&self) -> HostState {
        HostState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.state() == HostState::Running
    }

    /// Run one drain cycle unless one is already in flight.
    ///
    /// Handlers run sequentially against one client. A transport error aborts
    /// the cycle and is returned; the host is back in `Stopped` either way.
    pub async fn start(&self) -> Result<StartOutcome, MqError> {
        let Some((generation, handlers)) = self.begin_cycle() else {
            trace!("Drain cycle already running, start ignored");
            return Ok(StartOutcome::AlreadyRunning);
        };
        let _guard = CycleGuard {
            host: self,
            generation,
        };

        debug!(generation, handlers = handlers.len(), "Drain cycle started");
        let client = self.client.clone();
        let mut reports = Vec::with_capacity(handlers.len());
        for handler in &handlers {
            reports.push(handler.process(&client).await?);
        }
        Ok(StartOutcome::Drained(reports))
    }

    fn begin_cycle(&self) -> Option<(u64, Vec<Box<dyn MessageHandler>>)> {
        let mut cycle = self.lock_cycle();
        self.state
            .compare_exchange(
                HostState::Stopped as u8,
                HostState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .ok()?;

        cycle.generation += 1;
        self.cycles_started.fetch_add(1, Ordering::Relaxed);

        let out_handlers: Arc<[OutHandler]> = Arc::from(self.out_handlers.clone());
        let mut slots = Vec::with_capacity(self.registrations.len());
        let mut handlers = Vec::with_capacity(self.registrations.len());
        for registration in &self.registrations {
            let ctx = HandlerContext {
                stats: registration.stats.clone(),
                disposed: Arc::new(AtomicBool::new(false)),
                out_handlers: out_handlers.clone(),
            };
            slots.push(Slot {
                type_name: registration.factory.type_name(),
                disposed: ctx.disposed.clone(),
            });
            handlers.push(registration.factory.create(ctx));
        }
        cycle.slots = slots;
        Some((cycle.generation, handlers))
    }

    fn end_cycle(&self, generation: u64) {
        let cycle = self.lock_cycle();
        // A cycle stopped by disposal may already have been superseded.
        if cycle.generation == generation
            && self
                .state
                .compare_exchange(
                    HostState::Running as u8,
                    HostState::Stopped as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
        {
            debug!(generation, "Drain cycle finished");
        }
    }

    /// Mark the current cycle's handler for `type_name` as disposed.
    ///
    /// The handler stops at its next message boundary. When every slot is
    /// disposed the host moves to `Stopped`; returns `true` for the call that
    /// made that transition.
    pub fn dispose_handler(&self, type_name: &str) -> Result<bool, MqError> {
        if !self.is_registered(type_name) {
            return Err(MqError::UnknownHandler {
                type_name: type_name.to_string(),
            });
        }

        let cycle = self.lock_cycle();
        if let Some(slot) = cycle.slots.iter().find(|s| s.type_name == type_name) {
            slot.disposed.store(true, Ordering::Release);
            debug!(type_name = %type_name, "Handler disposed");
        }

        let all_disposed = !cycle.slots.is_empty()
            && cycle
                .slots
                .iter()
                .all(|s| s.disposed.load(Ordering::Acquire));
        let stopped = all_disposed
            && self
                .state
                .compare_exchange(
                    HostState::Running as u8,
                    HostState::Stopped as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok();
        if stopped {
            info!("All handlers disposed, messaging host stopped");
        }
        Ok(stopped)
    }

    /// Dispose every handler of the current cycle.
    pub fn dispose_all(&self) -> bool {
        let mut stopped = false;
        for registration in &self.registrations {
            // Every name comes from the registry, so lookups cannot fail.
            if let Ok(true) = self.dispose_handler(registration.factory.type_name()) {
                stopped = true;
            }
        }
        stopped
    }

    pub fn stats(&self) -> HostStats {
        let handlers = self
            .registrations
            .iter()
            .map(|r| r.stats.snapshot(r.factory.type_name()))
            .collect();
        HostStats::new(
            self.state().to_string(),
            self.cycles_started.load(Ordering::Relaxed),
            handlers,
        )
    }

    /// Stats plus the current depth of every registered queue.
    ///
    /// Also refreshes the `mq_queue_depth` gauge.
    pub async fn stats_report(&self) -> Result<StatsReport, MqError> {
        let mut depths = Vec::new();
        for type_name in self.registered_types() {
            let metrics = QueueMetrics::new(type_name);
            for (_, queue) in QueueNames::new(type_name).iter() {
                let depth = self.client.len(queue).await?;
                metrics.queue_depth(queue, depth);
                depths.push((queue.to_string(), depth));
            }
        }
        Ok(StatsReport {
            stats: self.stats(),
            depths,
        })
    }

    /// Text rendering of [`MessagingHost::stats_report`].
    pub async fn stats_description(&self) -> Result<String, MqError> {
        Ok(self.stats_report().await?.to_string())
    }

    /// Drive cycles from the broker's wake-up signals until `shutdown` flips.
    ///
    /// Also wakes every `idle_wake_interval` (and once immediately) so a
    /// missed signal only delays a message.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Result<(), MqError> {
        let mut events = self.client.broker().subscribe().await?;
        let mut idle = tokio::time::interval(self.client.config().idle_wake_interval);
        idle.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(types = ?self.registered_types(), "Messaging host listening for wake-up signals");

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                event = events.next() => match event {
                    Some(event) => {
                        if self.wants(&event.queue) {
                            self.wake(&event.queue).await;
                        }
                    }
                    None => {
                        warn!("Wake-up stream closed, resubscribing");
                        events = self.client.broker().subscribe().await?;
                    }
                },
                _ = idle.tick() => self.wake("idle").await,
            }
        }

        info!("Messaging host stopping");
        self.dispose_all();
        Ok(())
    }

    fn wants(&self, queue: &str) -> bool {
        QueueNames::parse(queue)
            .is_some_and(|(type_name, kind)| kind.is_inbound() && self.is_registered(type_name))
    }

    async fn wake(&self, reason: &str) {
        match self.start().await {
            Ok(StartOutcome::Drained(reports)) => {
                let received: u64 = reports.iter().map(|r| r.received).sum();
                trace!(reason = %reason, received, "Drain cycle complete");
            }
            Ok(StartOutcome::AlreadyRunning) => {}
            Err(err) => error!(reason = %reason, error = %err, "Drain cycle aborted"),
        }
    }

    fn lock_cycle(&self) -> MutexGuard<'_, Cycle> {
        self.cycle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Returns the host to `Stopped` when a cycle ends, errors and cancellation included.
struct CycleGuard<'a> {
    host: &'a MessagingHost,
    generation: u64,
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.host.end_cycle(self.generation);
    }
}
