//! Per-handler counters kept across drain cycles.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Live counters for one registered payload type.
///
/// Owned by the host registration, so the numbers survive the per-cycle
/// handler instances.
#[derive(Debug, Default)]
pub struct HandlerStats {
    normal_received: AtomicU64,
    priority_received: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    dead_lettered: AtomicU64,
    malformed: AtomicU64,
    last_processed_ms: AtomicI64,
}

impl HandlerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self, priority: bool) {
        let counter = if priority {
            &self.priority_received
        } else {
            &self.normal_received
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.last_processed_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retried(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dead_lettered(&self) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, type_name: &str) -> HandlerStatsSnapshot {
        let last_ms = self.last_processed_ms.load(Ordering::Relaxed);
        HandlerStatsSnapshot {
            type_name: type_name.to_string(),
            normal_received: self.normal_received.load(Ordering::Relaxed),
            priority_received: self.priority_received.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            last_processed_at: (last_ms > 0)
                .then(|| DateTime::<Utc>::from_timestamp_millis(last_ms))
                .flatten(),
        }
    }
}

/// Point-in-time copy of [`HandlerStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HandlerStatsSnapshot {
    pub type_name: String,
    pub normal_received: u64,
    pub priority_received: u64,
    pub processed: u64,
    pub failed: u64,
    pub retried: u64,
    pub dead_lettered: u64,
    pub malformed: u64,
    pub last_processed_at: Option<DateTime<Utc>>,
}

impl HandlerStatsSnapshot {
    pub fn total_received(&self) -> u64 {
        self.normal_received + self.priority_received
    }

    /// Fold another snapshot into this one.
    pub fn add(&mut self, other: &HandlerStatsSnapshot) {
        self.normal_received += other.normal_received;
        self.priority_received += other.priority_received;
        self.processed += other.processed;
        self.failed += other.failed;
        self.retried += other.retried;
        self.dead_lettered += other.dead_lettered;
        self.malformed += other.malformed;
        self.last_processed_at = self.last_processed_at.max(other.last_processed_at);
    }
}

/// Host-wide statistics.
#[derive(Debug, Clone, Serialize)]
pub struct HostStats {
    pub status: String,
    /// Drain cycles started since the host was created
    pub cycles: u64,
    pub totals: HandlerStatsSnapshot,
    pub handlers: Vec<HandlerStatsSnapshot>,
}

impl HostStats {
    pub fn new(status: impl Into<String>, cycles: u64, handlers: Vec<HandlerStatsSnapshot>) -> Self {
        let mut totals = HandlerStatsSnapshot {
            type_name: "total".to_string(),
            ..Default::default()
        };
        for handler in &handlers {
            totals.add(handler);
        }
        Self {
            status: status.into(),
            cycles,
            totals,
            handlers,
        }
    }

    pub fn handler(&self, type_name: &str) -> Option<&HandlerStatsSnapshot> {
        self.handlers.iter().find(|h| h.type_name == type_name)
    }
}

/// Human-readable stats with current queue depths.
#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub stats: HostStats,
    /// `(queue name, length)` for every queue of every registered type
    pub depths: Vec<(String, usize)>,
}

impl fmt::Display for StatsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let totals = &self.stats.totals;
        writeln!(f, "# MQ HOST STATS")?;
        writeln!(f, "STATUS: {}", self.stats.status)?;
        writeln!(f, "CYCLES STARTED: {}", self.stats.cycles)?;
        writeln!(f, "TOTAL MESSAGES RECEIVED: {}", totals.total_received())?;
        writeln!(f, "TOTAL MESSAGES PROCESSED: {}", totals.processed)?;
        writeln!(f, "TOTAL MESSAGES FAILED: {}", totals.failed)?;
        writeln!(f, "TOTAL MESSAGES DEAD-LETTERED: {}", totals.dead_lettered)?;

        for handler in &self.stats.handlers {
            writeln!(f)?;
            writeln!(f, "## {}", handler.type_name)?;
            writeln!(
                f,
                "received: {} (normal: {}, priority: {})",
                handler.total_received(),
                handler.normal_received,
                handler.priority_received
            )?;
            writeln!(
                f,
                "processed: {}, failed: {}, retried: {}, dead-lettered: {}, malformed: {}",
                handler.processed,
                handler.failed,
                handler.retried,
                handler.dead_lettered,
                handler.malformed
            )?;
            if let Some(at) = handler.last_processed_at {
                writeln!(f, "last processed: {}", at.to_rfc3339())?;
            }
            let prefix = format!("{}.", handler.type_name);
            for (queue, depth) in self.depths.iter().filter(|(q, _)| q.starts_with(&prefix)) {
                writeln!(f, "  {queue}: {depth}")?;
            }
        }
        Ok(())
    }
}
