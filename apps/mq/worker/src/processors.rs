//! Message types and processors hosted by the worker.

use async_trait::async_trait;
use messaging::{Envelope, HandlerError, MessagingHost, MqError, Payload, Processor};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Greeting {
    pub name: String,
}

impl Payload for Greeting {
    const TYPE_NAME: &'static str = "Greeting";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Echo {
    pub text: String,
}

impl Payload for Echo {
    const TYPE_NAME: &'static str = "Echo";
}

/// Replies `Hello, {name}!`. Blank names are rejected so they end up in the dlq.
pub struct GreetingProcessor;

#[async_trait]
impl Processor<Greeting> for GreetingProcessor {
    type Reply = String;

    async fn process(&self, envelope: &Envelope<Greeting>) -> Result<Option<String>, HandlerError> {
        let name = envelope.body().name.trim();
        if name.is_empty() {
            return Err(HandlerError::with_code(
                "EmptyName",
                "greeting name must not be blank",
            ));
        }
        info!(message_id = %envelope.id(), name = %name, "Greeting");
        Ok(Some(format!("Hello, {}!", name)))
    }

    fn name(&self) -> &'static str {
        "greeting_processor"
    }
}

/// Replies with the body it received.
pub struct EchoProcessor;

#[async_trait]
impl Processor<Echo> for EchoProcessor {
    type Reply = Echo;

    async fn process(&self, envelope: &Envelope<Echo>) -> Result<Option<Echo>, HandlerError> {
        Ok(Some(envelope.body().clone()))
    }

    fn name(&self) -> &'static str {
        "echo_processor"
    }
}

/// Register every processor the worker hosts.
pub fn register_all(host: &mut MessagingHost) -> Result<(), MqError> {
    host.register_handler::<Greeting, _>(GreetingProcessor)?;
    host.register_handler::<Echo, _>(EchoProcessor)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_greeting_reply() {
        let envelope = Envelope::new(Greeting {
            name: " Ada ".to_string(),
        });
        let reply = GreetingProcessor.process(&envelope).await.unwrap();
        assert_eq!(reply.as_deref(), Some("Hello, Ada!"));
    }

    #[tokio::test]
    async fn test_blank_greeting_fails() {
        let envelope = Envelope::new(Greeting {
            name: "  ".to_string(),
        });
        let err = GreetingProcessor.process(&envelope).await.unwrap_err();
        assert_eq!(err.code(), "EmptyName");
    }

    #[tokio::test]
    async fn test_echo_returns_body() {
        let body = Echo {
            text: "ping".to_string(),
        };
        let reply = EchoProcessor.process(&Envelope::new(body.clone())).await.unwrap();
        assert_eq!(reply, Some(body));
    }
}
