//! Queue client and host configuration.

use core_config::{ConfigError, FromEnv, env_parse};
use std::time::Duration;

/// Failed deliveries allowed before a message is dead-lettered.
pub const DEFAULT_RETRY_LIMIT: u32 = 3;

/// Success-queue length kept by brokers that trim on notify.
pub const DEFAULT_MAX_SUCCESS_QUEUE_SIZE: usize = 100;

/// Sleep between empty polls when a broker cannot block on pop.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Fallback wake-up for hosts that missed a broker signal.
pub const DEFAULT_IDLE_WAKE_INTERVAL: Duration = Duration::from_secs(5);

/// Reply wait used by request/reply when neither the call nor the config sets one.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Settings shared by the queue client, handlers and the messaging host.
///
/// # Example
///
/// ```rust
/// use messaging::MqConfig;
/// use std::time::Duration;
///
/// let config = MqConfig::default()
///     .with_retry_limit(5)
///     .with_request_timeout(Duration::from_secs(10));
/// assert_eq!(config.retry_limit, 5);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqConfig {
    /// Failed deliveries allowed before dead-lettering
    pub retry_limit: u32,

    /// Default wait for a reply in request/reply calls
    pub request_timeout: Option<Duration>,

    /// Entries kept on each success queue (0 disables trimming)
    pub max_success_queue_size: usize,

    /// Sleep between empty polls in `QueueClient::get`
    pub poll_interval: Duration,

    /// Safety-net wake-up for `MessagingHost::run`
    pub idle_wake_interval: Duration,

    /// Notify the success queue after each handled message
    pub publish_to_outq: bool,
}

impl Default for MqConfig {
    fn default() -> Self {
        Self {
            retry_limit: DEFAULT_RETRY_LIMIT,
            request_timeout: None,
            max_success_queue_size: DEFAULT_MAX_SUCCESS_QUEUE_SIZE,
            poll_interval: DEFAULT_POLL_INTERVAL,
            idle_wake_interval: DEFAULT_IDLE_WAKE_INTERVAL,
            publish_to_outq: true,
        }
    }
}

impl MqConfig {
    pub fn with_retry_limit(mut self, retry_limit: u32) -> Self {
        self.retry_limit = retry_limit;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn with_max_success_queue_size(mut self, size: usize) -> Self {
        self.max_success_queue_size = size;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_idle_wake_interval(mut self, interval: Duration) -> Self {
        self.idle_wake_interval = interval;
        self
    }

    /// Skip success notifications entirely.
    pub fn without_outq(mut self) -> Self {
        self.publish_to_outq = false;
        self
    }

    /// Reply timeout for request/reply, preferring an explicit per-call value.
    pub fn effective_request_timeout(&self, explicit: Option<Duration>) -> Duration {
        explicit
            .or(self.request_timeout)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT)
    }
}

/// Environment variables (all optional):
/// - `MQ_RETRY_LIMIT`
/// - `MQ_REQUEST_TIMEOUT_MS`
/// - `MQ_MAX_SUCCESS_QUEUE_SIZE`
/// - `MQ_POLL_INTERVAL_MS`
/// - `MQ_IDLE_WAKE_INTERVAL_MS`
/// - `MQ_PUBLISH_TO_OUTQ` (`true`/`false`)
impl FromEnv for MqConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let millis = |key: &str| env_parse::<u64>(key).map(|v| v.map(Duration::from_millis));

        Ok(Self {
            retry_limit: env_parse("MQ_RETRY_LIMIT")?.unwrap_or(defaults.retry_limit),
            request_timeout: millis("MQ_REQUEST_TIMEOUT_MS")?.or(defaults.request_timeout),
            max_success_queue_size: env_parse("MQ_MAX_SUCCESS_QUEUE_SIZE")?
                .unwrap_or(defaults.max_success_queue_size),
            poll_interval: millis("MQ_POLL_INTERVAL_MS")?.unwrap_or(defaults.poll_interval),
            idle_wake_interval: millis("MQ_IDLE_WAKE_INTERVAL_MS")?
                .unwrap_or(defaults.idle_wake_interval),
            publish_to_outq: env_parse("MQ_PUBLISH_TO_OUTQ")?.unwrap_or(defaults.publish_to_outq),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEYS: [&str; 6] = [
        "MQ_RETRY_LIMIT",
        "MQ_REQUEST_TIMEOUT_MS",
        "MQ_MAX_SUCCESS_QUEUE_SIZE",
        "MQ_POLL_INTERVAL_MS",
        "MQ_IDLE_WAKE_INTERVAL_MS",
        "MQ_PUBLISH_TO_OUTQ",
    ];

    #[test]
    fn test_defaults() {
        let config = MqConfig::default();
        assert_eq!(config.retry_limit, 3);
        assert_eq!(config.request_timeout, None);
        assert_eq!(config.max_success_queue_size, 100);
        assert!(config.publish_to_outq);
    }

    #[test]
    fn test_builders() {
        let config = MqConfig::default()
            .with_retry_limit(2)
            .with_max_success_queue_size(10)
            .with_poll_interval(Duration::from_millis(5))
            .without_outq();
        assert_eq!(config.retry_limit, 2);
        assert_eq!(config.max_success_queue_size, 10);
        assert_eq!(config.poll_interval, Duration::from_millis(5));
        assert!(!config.publish_to_outq);
    }

    #[test]
    fn test_effective_request_timeout() {
        let config = MqConfig::default();
        assert_eq!(config.effective_request_timeout(None), DEFAULT_REQUEST_TIMEOUT);

        let config = config.with_request_timeout(Duration::from_secs(3));
        assert_eq!(config.effective_request_timeout(None), Duration::from_secs(3));
        assert_eq!(
            config.effective_request_timeout(Some(Duration::from_secs(1))),
            Duration::from_secs(1)
        );
    }

    #[test]
    fn test_from_env_defaults_when_unset() {
        temp_env::with_vars_unset(KEYS, || {
            assert_eq!(MqConfig::from_env().unwrap(), MqConfig::default());
        });
    }

    #[test]
    fn test_from_env_reads_values() {
        temp_env::with_vars(
            [
                ("MQ_RETRY_LIMIT", Some("5")),
                ("MQ_REQUEST_TIMEOUT_MS", Some("1500")),
                ("MQ_MAX_SUCCESS_QUEUE_SIZE", Some("20")),
                ("MQ_POLL_INTERVAL_MS", Some("10")),
                ("MQ_IDLE_WAKE_INTERVAL_MS", Some("250")),
                ("MQ_PUBLISH_TO_OUTQ", Some("false")),
            ],
            || {
                let config = MqConfig::from_env().unwrap();
                assert_eq!(config.retry_limit, 5);
                assert_eq!(config.request_timeout, Some(Duration::from_millis(1500)));
                assert_eq!(config.max_success_queue_size, 20);
                assert_eq!(config.poll_interval, Duration::from_millis(10));
                assert_eq!(config.idle_wake_interval, Duration::from_millis(250));
                assert!(!config.publish_to_outq);
            },
        );
    }

    #[test]
    fn test_from_env_rejects_bad_values() {
        temp_env::with_var("MQ_RETRY_LIMIT", Some("-1"), || {
            let err = MqConfig::from_env().unwrap_err();
            assert!(err.to_string().contains("MQ_RETRY_LIMIT"));
        });
    }
}
