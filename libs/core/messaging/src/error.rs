//! Error types for queue operations and message handling.

use crate::envelope::MessageError;
use core_config::ConfigError;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by brokers, the queue client and the messaging host.
#[derive(Debug, Error)]
pub enum MqError {
    /// Broker connection or command failure, passed through unmodified.
    #[error("broker transport error: {0}")]
    Redis(#[from] redis::RedisError),

    /// No message arrived on the queue within the requested window.
    #[error("timed out after {timeout:?} waiting for a message on '{queue}'")]
    Timeout { queue: String, timeout: Duration },

    /// Bytes popped from a queue are not a well-formed envelope.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(#[source] serde_json::Error),

    /// An envelope could not be encoded.
    #[error("failed to serialize envelope: {0}")]
    Serialization(#[source] serde_json::Error),

    #[error("a handler for '{type_name}' is already registered")]
    DuplicateHandler { type_name: String },

    #[error("no handler registered for '{type_name}'")]
    UnknownHandler { type_name: String },

    /// The broker does not implement the requested capability.
    #[error("'{operation}' is not supported by the {broker} broker")]
    Unsupported {
        operation: &'static str,
        broker: &'static str,
    },

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl MqError {
    /// True for failures of the underlying store or connection.
    pub fn is_transport(&self) -> bool {
        matches!(self, MqError::Redis(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, MqError::Timeout { .. })
    }

    /// Configuration-time errors indicate a programming mistake rather than a runtime condition.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            MqError::DuplicateHandler { .. } | MqError::UnknownHandler { .. } | MqError::Config(_)
        )
    }
}

/// Error returned by business logic while handling a message.
///
/// Every `HandlerError` is routed through the handler's failure policy; the
/// `code` and message end up in the envelope's error record so that
/// dead-lettered messages explain why they failed.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct HandlerError {
    code: String,
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl HandlerError {
    pub const DEFAULT_CODE: &'static str = "HandlerError";

    /// Create an error with the default code.
    pub fn new(message: impl Into<String>) -> Self {
        Self::with_code(Self::DEFAULT_CODE, message)
    }

    /// Create an error with an explicit code.
    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Create an error wrapping an underlying cause.
    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            code: Self::DEFAULT_CODE.to_string(),
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// The structured record attached to a failed envelope.
    pub fn to_message_error(&self) -> MessageError {
        MessageError::new(&self.code, &self.message)
    }
}

impl From<MqError> for HandlerError {
    fn from(err: MqError) -> Self {
        Self {
            code: "MqError".to_string(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}
