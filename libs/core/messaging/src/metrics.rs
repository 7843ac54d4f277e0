//! Metrics emitted by handlers.
//!
//! Recorded through the `metrics` facade; the hosting binary decides on the
//! exporter.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Metric helper labelled with one payload type.
#[derive(Debug, Clone)]
pub struct QueueMetrics {
    type_name: String,
}

impl QueueMetrics {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
        }
    }

    pub fn message_received(&self, priority: bool) {
        counter!(
            "mq_messages_received_total",
            "type" => self.type_name.clone(),
            "queue" => if priority { "priority" } else { "normal" }
        )
        .increment(1);
    }

    pub fn message_processed(&self, duration: Duration) {
        counter!(
            "mq_messages_processed_total",
            "type" => self.type_name.clone(),
            "status" => "success"
        )
        .increment(1);

        histogram!(
            "mq_message_duration_seconds",
            "type" => self.type_name.clone()
        )
        .record(duration.as_secs_f64());
    }

    pub fn message_failed(&self, code: &str) {
        counter!(
            "mq_messages_processed_total",
            "type" => self.type_name.clone(),
            "status" => "failed"
        )
        .increment(1);

        counter!(
            "mq_message_errors_total",
            "type" => self.type_name.clone(),
            "code" => code.to_string()
        )
        .increment(1);
    }

    pub fn message_retried(&self) {
        counter!("mq_messages_retried_total", "type" => self.type_name.clone()).increment(1);
    }

    pub fn message_dead_lettered(&self) {
        counter!("mq_messages_dlq_total", "type" => self.type_name.clone()).increment(1);
    }

    pub fn message_malformed(&self) {
        counter!("mq_messages_malformed_total", "type" => self.type_name.clone()).increment(1);
    }

    pub fn queue_depth(&self, queue: &str, depth: usize) {
        gauge!(
            "mq_queue_depth",
            "type" => self.type_name.clone(),
            "queue" => queue.to_string()
        )
        .set(depth as f64);
    }
}
