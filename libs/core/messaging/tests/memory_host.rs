//! End-to-end host behaviour over the in-memory broker.

use async_trait::async_trait;
use messaging::{
    Envelope, FailingProcessor, FailureAction, FailureContext, FailurePolicy, HandlerError,
    HostState, MemoryBroker, MessagingHost, MqConfig, MqError, NoOpProcessor, Payload, Processor,
    Producer, QueueClient, QueueNames, StartOutcome,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use test_utils::assertions::assert_ids_in_order;
use tokio::sync::{Notify, watch};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Greeting {
    text: String,
}

impl Payload for Greeting {
    const TYPE_NAME: &'static str = "Greeting";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Echo {
    n: u32,
}

impl Payload for Echo {
    const TYPE_NAME: &'static str = "Echo";
}

fn client(config: MqConfig) -> QueueClient {
    QueueClient::new(Arc::new(MemoryBroker::new()), config)
}

fn greeting(text: &str) -> Greeting {
    Greeting {
        text: text.to_string(),
    }
}

async fn ids<T: Payload>(client: &QueueClient, queue: &str) -> Vec<Uuid> {
    client
        .peek::<T>(queue, 1000)
        .await
        .unwrap()
        .iter()
        .map(|e| e.id())
        .collect()
}

struct Replier;

#[async_trait]
impl Processor<Greeting> for Replier {
    type Reply = String;

    async fn process(&self, envelope: &Envelope<Greeting>) -> Result<Option<String>, HandlerError> {
        Ok(Some(format!("Hello, {}!", envelope.body().text)))
    }

    fn name(&self) -> &'static str {
        "replier"
    }
}

#[tokio::test]
async fn test_failing_greeting_retries_then_dead_letters() {
    let client = client(MqConfig::default().with_retry_limit(2));
    let names = QueueNames::of::<Greeting>();
    let mut host = MessagingHost::new(client.clone());
    host.register_handler::<Greeting, _>(FailingProcessor::new("always raises"))
        .unwrap();

    Producer::new(client.clone())
        .publish(greeting("hi"))
        .await
        .unwrap();

    host.start().await.unwrap();
    assert_eq!(client.len(names.dlq()).await.unwrap(), 0);
    let queued = client.peek::<Greeting>(names.input(), 10).await.unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].retry_attempts(), 1);
    assert_eq!(
        queued[0].error().map(|e| e.message.as_str()),
        Some("always raises")
    );

    host.start().await.unwrap();
    host.start().await.unwrap();
    assert_eq!(client.len(names.input()).await.unwrap(), 0);
    let dead = client.peek::<Greeting>(names.dlq(), 10).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].retry_attempts(), 2);
    assert_eq!(dead[0].body().text, "hi");
}

#[tokio::test]
async fn test_successful_echo_lands_in_outq_in_order() {
    let client = client(MqConfig::default());
    let names = QueueNames::of::<Echo>();
    let mut host = MessagingHost::new(client.clone());
    host.register_handler::<Echo, _>(NoOpProcessor).unwrap();

    let producer = Producer::new(client.clone());
    let mut published = Vec::new();
    for n in 0..3 {
        published.push(producer.publish(Echo { n }).await.unwrap());
    }

    host.start().await.unwrap();

    assert_eq!(client.len(names.input()).await.unwrap(), 0);
    assert_eq!(client.len(names.priority()).await.unwrap(), 0);
    assert_ids_in_order(&ids::<Echo>(&client, names.out()).await, &published, "Echo.outq");
}

#[tokio::test]
async fn test_priority_messages_drain_first() {
    let client = client(MqConfig::default());
    let names = QueueNames::of::<Echo>();
    let mut host = MessagingHost::new(client.clone());
    host.register_handler::<Echo, _>(NoOpProcessor).unwrap();

    let producer = Producer::new(client.clone());
    let normal = producer.publish(Echo { n: 1 }).await.unwrap();
    let urgent = Envelope::new(Echo { n: 2 }).with_priority(1);
    producer.publish_envelope(&urgent).await.unwrap();

    host.start().await.unwrap();
    assert_ids_in_order(
        &ids::<Echo>(&client, names.out()).await,
        &[urgent.id(), normal],
        "priority before normal",
    );
}

#[tokio::test]
async fn test_retry_attempts_never_decrease() {
    let client = client(MqConfig::default().with_retry_limit(5));
    let names = QueueNames::of::<Greeting>();
    let mut host = MessagingHost::new(client.clone());
    host.register_handler::<Greeting, _>(FailingProcessor::new("nope"))
        .unwrap();
    Producer::new(client.clone())
        .publish(greeting("again"))
        .await
        .unwrap();

    let mut last = 0;
    for _ in 0..4 {
        host.start().await.unwrap();
        let queued = client.peek::<Greeting>(names.input(), 1).await.unwrap();
        let attempts = queued[0].retry_attempts();
        assert_eq!(attempts, last + 1);
        last = attempts;
    }
    host.start().await.unwrap();
    assert_eq!(client.len(names.input()).await.unwrap(), 0);
    assert_eq!(client.len(names.dlq()).await.unwrap(), 1);
}

#[tokio::test]
async fn test_retry_limit_one_dead_letters_immediately() {
    let client = client(MqConfig::default().with_retry_limit(1));
    let names = QueueNames::of::<Greeting>();
    let mut host = MessagingHost::new(client.clone());
    host.register_handler::<Greeting, _>(FailingProcessor::new("nope"))
        .unwrap();
    Producer::new(client.clone())
        .publish(greeting("once"))
        .await
        .unwrap();

    let outcome = host.start().await.unwrap();
    let StartOutcome::Drained(reports) = outcome else {
        panic!("expected a drained cycle");
    };
    assert_eq!(reports[0].dead_lettered, 1);
    assert_eq!(reports[0].retried, 0);
    assert_eq!(client.len(names.input()).await.unwrap(), 0);
    assert_eq!(client.len(names.dlq()).await.unwrap(), 1);
}

#[tokio::test]
async fn test_malformed_envelope_is_dropped() {
    let client = client(MqConfig::default());
    let names = QueueNames::of::<Echo>();
    let mut host = MessagingHost::new(client.clone());
    host.register_handler::<Echo, _>(NoOpProcessor).unwrap();

    client
        .broker()
        .push(names.input(), b"{not json".to_vec())
        .await
        .unwrap();
    let good = Producer::new(client.clone())
        .publish(Echo { n: 9 })
        .await
        .unwrap();

    host.start().await.unwrap();
    assert_eq!(ids::<Echo>(&client, names.out()).await, vec![good]);
    assert_eq!(client.len(names.dlq()).await.unwrap(), 0);
    assert_eq!(host.stats().handler("Echo").map(|h| h.malformed), Some(1));
}

struct Gated {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl Processor<Echo> for Gated {
    type Reply = ();

    async fn process(&self, _envelope: &Envelope<Echo>) -> Result<Option<()>, HandlerError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(None)
    }

    fn name(&self) -> &'static str {
        "gated"
    }
}

#[tokio::test]
async fn test_concurrent_start_is_ignored() {
    let client = client(MqConfig::default());
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let mut host = MessagingHost::new(client.clone());
    host.register_handler::<Echo, _>(Gated {
        entered: entered.clone(),
        release: release.clone(),
    })
    .unwrap();
    let host = Arc::new(host);

    Producer::new(client.clone())
        .publish(Echo { n: 1 })
        .await
        .unwrap();

    let first = {
        let host = host.clone();
        tokio::spawn(async move { host.start().await })
    };
    entered.notified().await;

    assert_eq!(host.state(), HostState::Running);
    assert_eq!(host.start().await.unwrap(), StartOutcome::AlreadyRunning);

    release.notify_one();
    let outcome = first.await.unwrap().unwrap();
    assert!(matches!(outcome, StartOutcome::Drained(ref reports) if reports[0].processed == 1));
    assert_eq!(host.state(), HostState::Stopped);
    assert_eq!(host.stats().cycles, 1);
}

#[tokio::test]
async fn test_disposing_every_handler_stops_the_host() {
    let client = client(MqConfig::default());
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let mut host = MessagingHost::new(client.clone());
    host.register_handler::<Echo, _>(Gated {
        entered: entered.clone(),
        release: release.clone(),
    })
    .unwrap();
    let host = Arc::new(host);

    let producer = Producer::new(client.clone());
    producer.publish(Echo { n: 1 }).await.unwrap();
    producer.publish(Echo { n: 2 }).await.unwrap();

    let cycle = {
        let host = host.clone();
        tokio::spawn(async move { host.start().await })
    };
    entered.notified().await;

    assert!(host.dispose_handler("Echo").unwrap());
    assert_eq!(host.state(), HostState::Stopped);
    release.notify_one();

    let StartOutcome::Drained(reports) = cycle.await.unwrap().unwrap() else {
        panic!("expected a drained cycle");
    };
    // The in-flight message completes, the next one is left queued.
    assert!(reports[0].disposed);
    assert_eq!(reports[0].processed, 1);
    assert_eq!(client.len("Echo.inq").await.unwrap(), 1);
}

#[test]
fn test_duplicate_handler_rejected() {
    let mut host = MessagingHost::new(client(MqConfig::default()));
    host.register_handler::<Echo, _>(NoOpProcessor).unwrap();
    let err = host
        .register_handler::<Echo, _>(NoOpProcessor)
        .unwrap_err();
    assert!(matches!(err, MqError::DuplicateHandler { .. }));
}

/// Sends failures to a side queue instead of retrying.
struct ParkFailures {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl FailurePolicy<Greeting> for ParkFailures {
    async fn on_failure(
        &self,
        envelope: &mut Envelope<Greeting>,
        _error: &HandlerError,
        ctx: &FailureContext<'_>,
    ) -> Result<FailureAction, HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        ctx.client.publish("Greeting.parked", &*envelope).await?;
        Ok(FailureAction::Handled)
    }
}

#[tokio::test]
async fn test_custom_failure_policy() {
    let client = client(MqConfig::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let mut host = MessagingHost::new(client.clone());
    host.register_handler_with_failure_policy::<Greeting, _, _>(
        FailingProcessor::new("nope"),
        ParkFailures {
            calls: calls.clone(),
        },
    )
    .unwrap();
    Producer::new(client.clone())
        .publish(greeting("park me"))
        .await
        .unwrap();

    host.start().await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(client.len("Greeting.parked").await.unwrap(), 1);
    assert_eq!(client.len("Greeting.inq").await.unwrap(), 0);
    assert_eq!(client.len("Greeting.dlq").await.unwrap(), 0);
}

#[tokio::test]
async fn test_out_handlers_observe_successes() {
    let client = client(MqConfig::default());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut host = MessagingHost::new(client.clone());
    host.register_handler::<Echo, _>(NoOpProcessor).unwrap();
    let sink = seen.clone();
    host.on_success(move |queue, id| sink.lock().unwrap().push((queue.to_string(), id)));

    let id = Producer::new(client.clone())
        .publish(Echo { n: 4 })
        .await
        .unwrap();
    host.start().await.unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![("Echo.outq".to_string(), id)]);
}

#[tokio::test]
async fn test_replay_dead_letters_feeds_next_cycle() {
    let client = client(MqConfig::default().with_retry_limit(1));
    let mut host = MessagingHost::new(client.clone());
    host.register_handler::<Greeting, _>(FailingProcessor::new("nope"))
        .unwrap();
    Producer::new(client.clone())
        .publish(greeting("replay"))
        .await
        .unwrap();
    host.start().await.unwrap();
    assert_eq!(client.len("Greeting.dlq").await.unwrap(), 1);

    assert_eq!(client.replay_dead_letters::<Greeting>().await.unwrap(), 1);
    assert_eq!(client.len("Greeting.dlq").await.unwrap(), 0);
    assert_eq!(client.len("Greeting.inq").await.unwrap(), 1);

    host.start().await.unwrap();
    let dead = client.peek::<Greeting>("Greeting.dlq", 1).await.unwrap();
    assert_eq!(dead[0].retry_attempts(), 2);
}

#[tokio::test]
async fn test_run_wakes_on_publish_and_answers_requests() {
    let client = client(MqConfig::default().with_idle_wake_interval(Duration::from_secs(3600)));
    let mut host = MessagingHost::new(client.clone());
    host.register_handler::<Greeting, _>(Replier).unwrap();
    host.register_handler::<Echo, _>(NoOpProcessor).unwrap();
    let host = Arc::new(host);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let running = tokio::spawn(host.clone().run(shutdown_rx));

    let producer = Producer::new(client.clone());
    let reply = producer
        .request::<_, String>(greeting("World"), Some(Duration::from_secs(5)))
        .await
        .unwrap();
    assert_eq!(reply.body(), "Hello, World!");

    let id = producer.publish(Echo { n: 7 }).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if ids::<Echo>(&client, "Echo.outq").await.contains(&id) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    shutdown_tx.send(true).unwrap();
    running.await.unwrap().unwrap();
    assert_eq!(host.state(), HostState::Stopped);
}
