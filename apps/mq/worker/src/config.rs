//! Worker process configuration.

use core_config::{ConfigError, FromEnv, env_parse};
use strum::{Display, EnumString};

/// Default port for the health and admin server
pub const DEFAULT_HEALTH_PORT: u16 = 8083;

/// Which broker backs the worker's queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum BrokerKind {
    /// Redis lists, shared between processes
    Redis,
    /// Process-local queues, lost on exit
    Memory,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub broker: BrokerKind,
    pub health_port: u16,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            broker: BrokerKind::Redis,
            health_port: DEFAULT_HEALTH_PORT,
        }
    }
}

/// Environment variables:
/// - `MQ_BROKER`: `redis` (default) or `memory`
/// - `MQ_WORKER_HEALTH_PORT`, then `HEALTH_PORT` (default 8083)
impl FromEnv for WorkerConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let health_port = match env_parse("MQ_WORKER_HEALTH_PORT")? {
            Some(port) => port,
            None => env_parse("HEALTH_PORT")?.unwrap_or(defaults.health_port),
        };
        Ok(Self {
            broker: env_parse("MQ_BROKER")?.unwrap_or(defaults.broker),
            health_port,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        temp_env::with_vars(
            [
                ("MQ_BROKER", None::<&str>),
                ("MQ_WORKER_HEALTH_PORT", None),
                ("HEALTH_PORT", None),
            ],
            || {
                let config = WorkerConfig::from_env().unwrap();
                assert_eq!(config, WorkerConfig::default());
            },
        );
    }

    #[test]
    fn test_specific_port_wins() {
        temp_env::with_vars(
            [
                ("MQ_BROKER", Some("Memory")),
                ("MQ_WORKER_HEALTH_PORT", Some("9100")),
                ("HEALTH_PORT", Some("9200")),
            ],
            || {
                let config = WorkerConfig::from_env().unwrap();
                assert_eq!(config.broker, BrokerKind::Memory);
                assert_eq!(config.health_port, 9100);
            },
        );
    }

    #[test]
    fn test_generic_port_fallback() {
        temp_env::with_vars(
            [
                ("MQ_WORKER_HEALTH_PORT", None),
                ("HEALTH_PORT", Some("9200")),
            ],
            || {
                assert_eq!(WorkerConfig::from_env().unwrap().health_port, 9200);
            },
        );
    }

    #[test]
    fn test_unknown_broker_rejected() {
        temp_env::with_var("MQ_BROKER", Some("kafka"), || {
            let err = WorkerConfig::from_env().unwrap_err();
            assert!(matches!(err, ConfigError::ParseError { ref key, .. } if key == "MQ_BROKER"));
        });
    }
}
