//! Processor trait for message business logic.

use crate::envelope::{Envelope, Payload};
use crate::error::HandlerError;
use async_trait::async_trait;
use serde::Serialize;
use std::marker::PhantomData;

/// Business logic for one payload type.
///
/// Returning `Err` hands the envelope to the handler's failure policy
/// (retry, then dead-letter). Returning `Ok(Some(reply))` publishes the reply
/// to the envelope's `reply_to` queue when one is set.
///
/// # Example
///
/// ```rust,ignore
/// use messaging::{Envelope, HandlerError, Processor};
/// use async_trait::async_trait;
///
/// struct GreetingProcessor;
///
/// #[async_trait]
/// impl Processor<Greeting> for GreetingProcessor {
///     type Reply = GreetingReply;
///
///     async fn process(&self, envelope: &Envelope<Greeting>) -> Result<Option<GreetingReply>, HandlerError> {
///         if envelope.body().text.is_empty() {
///             return Err(HandlerError::with_code("EmptyGreeting", "text must not be empty"));
///         }
///         Ok(Some(GreetingReply { text: format!("hello, {}", envelope.body().text) }))
///     }
///
///     fn name(&self) -> &'static str {
///         "greeting_processor"
///     }
/// }
/// ```
#[async_trait]
pub trait Processor<T: Payload>: Send + Sync {
    /// Body published to `reply_to` on success.
    type Reply: Serialize + Send + Sync + 'static;

    async fn process(&self, envelope: &Envelope<T>) -> Result<Option<Self::Reply>, HandlerError>;

    /// Used for logging and metrics labels.
    fn name(&self) -> &'static str;
}

/// A processor that accepts every message (for testing).
#[derive(Debug, Clone, Default)]
pub struct NoOpProcessor;

#[async_trait]
impl<T: Payload> Processor<T> for NoOpProcessor {
    type Reply = ();

    async fn process(&self, _envelope: &Envelope<T>) -> Result<Option<()>, HandlerError> {
        Ok(None)
    }

    fn name(&self) -> &'static str {
        "noop_processor"
    }
}

/// A processor that always fails (for testing).
#[derive(Debug, Clone)]
pub struct FailingProcessor {
    code: String,
    message: String,
}

impl FailingProcessor {
    pub fn new(message: impl Into<String>) -> Self {
        Self::with_code(HandlerError::DEFAULT_CODE, message)
    }

    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl<T: Payload> Processor<T> for FailingProcessor {
    type Reply = ();

    async fn process(&self, _envelope: &Envelope<T>) -> Result<Option<()>, HandlerError> {
        Err(HandlerError::with_code(&self.code, &self.message))
    }

    fn name(&self) -> &'static str {
        "failing_processor"
    }
}

/// Adapts an async function into a [`Processor`] without a reply.
///
/// ```rust,ignore
/// let processor = FnProcessor::new("audit", |envelope: Envelope<Greeting>| async move {
///     audit_log.write(envelope.body()).await.map_err(HandlerError::from)
/// });
/// ```
pub struct FnProcessor<T, F> {
    name: &'static str,
    f: F,
    _payload: PhantomData<fn(T)>,
}

impl<T, F> FnProcessor<T, F> {
    pub fn new(name: &'static str, f: F) -> Self {
        Self {
            name,
            f,
            _payload: PhantomData,
        }
    }
}

#[async_trait]
impl<T, F, Fut> Processor<T> for FnProcessor<T, F>
where
    T: Payload + Clone,
    F: Fn(Envelope<T>) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<(), HandlerError>> + Send,
{
    type Reply = ();

    async fn process(&self, envelope: &Envelope<T>) -> Result<Option<()>, HandlerError> {
        (self.f)(envelope.clone()).await.map(|()| None)
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Ping {
        n: u32,
    }

    impl Payload for Ping {
        const TYPE_NAME: &'static str = "Ping";
    }

    #[tokio::test]
    async fn test_noop_processor() {
        let result = Processor::<Ping>::process(&NoOpProcessor, &Envelope::new(Ping { n: 1 })).await;
        assert!(matches!(result, Ok(None)));
        assert_eq!(Processor::<Ping>::name(&NoOpProcessor), "noop_processor");
    }

    #[tokio::test]
    async fn test_failing_processor() {
        let processor = FailingProcessor::with_code("Nope", "always fails");
        let err = Processor::<Ping>::process(&processor, &Envelope::new(Ping { n: 1 }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "Nope");
        assert_eq!(err.message(), "always fails");
    }

    #[tokio::test]
    async fn test_fn_processor() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let processor = FnProcessor::new("count", move |envelope: Envelope<Ping>| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(envelope.body().n as usize, Ordering::SeqCst);
                Ok(())
            }
        });

        processor.process(&Envelope::new(Ping { n: 3 })).await.unwrap();
        processor.process(&Envelope::new(Ping { n: 4 })).await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 7);
        assert_eq!(processor.name(), "count");
    }
}
