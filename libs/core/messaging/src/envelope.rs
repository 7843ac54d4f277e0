//! Message envelope and payload contract.

use crate::error::MqError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use uuid::Uuid;

/// A message body that can travel through the queues.
///
/// `TYPE_NAME` is the stable name used to derive queue names, so it must be
/// unique across every payload type registered on a host.
///
/// # Example
///
/// ```rust
/// use messaging::Payload;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// struct Greeting {
///     text: String,
/// }
///
/// impl Payload for Greeting {
///     const TYPE_NAME: &'static str = "Greeting";
/// }
/// ```
pub trait Payload: Serialize + DeserializeOwned + Send + Sync + 'static {
    const TYPE_NAME: &'static str;
}

/// Error record attached to an envelope after a failed handling attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageError {
    pub code: String,
    pub message: String,
}

impl MessageError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Unit of work carried by the queues.
///
/// Identity and creation time are fixed at construction. The retry counter
/// can only grow, and only through [`Envelope::increment_retry`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T> {
    id: Uuid,
    created_at: DateTime<Utc>,
    #[serde(default)]
    priority: i64,
    #[serde(default)]
    retry_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reply_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<MessageError>,
    body: T,
}

impl<T> Envelope<T> {
    pub fn new(body: T) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            priority: 0,
            retry_attempts: 0,
            reply_to: None,
            error: None,
            body,
        }
    }

    /// Non-zero priority routes the envelope through the priority queue.
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_reply_to(mut self, queue: impl Into<String>) -> Self {
        self.reply_to = Some(queue.into());
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn priority(&self) -> i64 {
        self.priority
    }

    pub fn is_priority(&self) -> bool {
        self.priority != 0
    }

    pub fn retry_attempts(&self) -> u32 {
        self.retry_attempts
    }

    pub fn reply_to(&self) -> Option<&str> {
        self.reply_to.as_deref()
    }

    pub fn error(&self) -> Option<&MessageError> {
        self.error.as_ref()
    }

    pub fn body(&self) -> &T {
        &self.body
    }

    pub fn into_body(self) -> T {
        self.body
    }

    /// Record one failed delivery attempt.
    pub fn increment_retry(&mut self) -> u32 {
        self.retry_attempts = self.retry_attempts.saturating_add(1);
        self.retry_attempts
    }

    pub fn set_error(&mut self, error: MessageError) {
        self.error = Some(error);
    }
}

impl<T: Serialize> Envelope<T> {
    pub fn to_bytes(&self) -> Result<Vec<u8>, MqError> {
        serde_json::to_vec(self).map_err(MqError::Serialization)
    }
}

impl<T: DeserializeOwned> Envelope<T> {
    /// Decode an envelope, failing with [`MqError::MalformedEnvelope`] on any
    /// byte stream that is not a well-formed envelope of `T`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MqError> {
        serde_json::from_slice(bytes).map_err(MqError::MalformedEnvelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Greeting {
        text: String,
    }

    impl Payload for Greeting {
        const TYPE_NAME: &'static str = "Greeting";
    }

    fn greeting() -> Envelope<Greeting> {
        Envelope::new(Greeting {
            text: "hi".to_string(),
        })
    }

    #[test]
    fn test_new_envelope_defaults() {
        let envelope = greeting();
        assert_eq!(envelope.retry_attempts(), 0);
        assert_eq!(envelope.priority(), 0);
        assert!(!envelope.is_priority());
        assert!(envelope.reply_to().is_none());
        assert!(envelope.error().is_none());
        assert_eq!(envelope.body().text, "hi");
    }

    #[test]
    fn test_envelopes_get_distinct_ids() {
        assert_ne!(greeting().id(), greeting().id());
    }

    #[test]
    fn test_increment_retry_counts_up_by_one() {
        let mut envelope = greeting();
        assert_eq!(envelope.increment_retry(), 1);
        assert_eq!(envelope.increment_retry(), 2);
        assert_eq!(envelope.retry_attempts(), 2);
    }

    #[test]
    fn test_retry_state_survives_the_wire() {
        let mut envelope = greeting().with_priority(5).with_reply_to("mq:tmp:abc");
        envelope.increment_retry();
        envelope.set_error(MessageError::new("HandlerError", "boom"));

        let decoded = Envelope::<Greeting>::from_bytes(&envelope.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, envelope);
        assert_eq!(decoded.retry_attempts(), 1);
        assert_eq!(decoded.error().unwrap().message, "boom");
    }

    #[test]
    fn test_wire_format_uses_camel_case() {
        let json = String::from_utf8(greeting().to_bytes().unwrap()).unwrap();
        assert!(json.contains("\"retryAttempts\":0"));
        assert!(json.contains("\"createdAt\""));
        assert!(!json.contains("replyTo"));
    }

    #[test]
    fn test_from_bytes_rejects_garbage() {
        let err = Envelope::<Greeting>::from_bytes(b"not json").unwrap_err();
        assert!(matches!(err, MqError::MalformedEnvelope(_)));
    }

    #[test]
    fn test_from_bytes_rejects_wrong_body_shape() {
        let other = Envelope::new(42u32).to_bytes().unwrap();
        let err = Envelope::<Greeting>::from_bytes(&other).unwrap_err();
        assert!(matches!(err, MqError::MalformedEnvelope(_)));
    }
}
