use super::{Broker, BrokerEvent, BrokerEvents};
use crate::error::MqError;
use crate::queue_names::{QueueNames, TOPIC_IN, TOPIC_OUT};
use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncConnectionConfig, Client};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Extra time allowed for a `BRPOP` reply beyond the server-side timeout.
const BLOCKING_POP_GRACE: Duration = Duration::from_secs(1);

/// Durable broker on Redis lists.
///
/// Queues are lists with the newest entry at the head: `LPUSH` appends and
/// `RPOP`/`BRPOP` remove the oldest entry, which keeps each queue FIFO. Every
/// push is paired with a `PUBLISH` of the queue name on [`TOPIC_IN`] or
/// [`TOPIC_OUT`] inside one `MULTI`/`EXEC` block. Success pushes additionally
/// `LTRIM` the list to the configured maximum.
///
/// Regular commands share one multiplexed [`ConnectionManager`]. Blocking pops
/// and subscriptions open their own connection so a parked `BRPOP` never
/// stalls other traffic.
#[derive(Clone)]
pub struct RedisBroker {
    client: Client,
    conn: ConnectionManager,
}

impl RedisBroker {
    /// Connect and verify the server answers `PING`.
    pub async fn connect(url: &str) -> Result<Self, MqError> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client.clone()).await?;
        let broker = Self::new(client, conn);
        broker.ping().await?;
        info!("Redis broker connected");
        Ok(broker)
    }

    pub fn new(client: Client, conn: ConnectionManager) -> Self {
        Self { client, conn }
    }

    pub async fn ping(&self) -> Result<(), MqError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn push_with_signal(
        &self,
        queue: &str,
        payload: Vec<u8>,
        trim_to: Option<usize>,
    ) -> Result<(), MqError> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic().cmd("LPUSH").arg(queue).arg(payload).ignore();
        if let Some(max_len) = trim_to {
            pipe.cmd("LTRIM").arg(queue).arg(0).arg(ltrim_end(max_len)).ignore();
        }
        pipe.cmd("PUBLISH")
            .arg(QueueNames::topic_for(queue))
            .arg(queue)
            .ignore();
        pipe.query_async::<()>(&mut conn).await?;
        debug!(queue = %queue, "Pushed message");
        Ok(())
    }
}

/// Last index kept by `LTRIM key 0 end` so that `max_len` (at least 1) entries remain.
fn ltrim_end(max_len: usize) -> i64 {
    i64::try_from(max_len).map_or(i64::MAX, |len| len - 1)
}

#[async_trait]
impl Broker for RedisBroker {
    fn kind(&self) -> &'static str {
        "redis"
    }

    async fn health_check(&self) -> Result<(), MqError> {
        self.ping().await
    }

    async fn push(&self, queue: &str, payload: Vec<u8>) -> Result<(), MqError> {
        self.push_with_signal(queue, payload, None).await
    }

    async fn pop(&self, queue: &str) -> Result<Option<Vec<u8>>, MqError> {
        let mut conn = self.conn.clone();
        let payload: Option<Vec<u8>> = redis::cmd("RPOP").arg(queue).query_async(&mut conn).await?;
        Ok(payload)
    }

    fn supports_blocking_pop(&self) -> bool {
        true
    }

    async fn pop_blocking(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, MqError> {
        // BRPOP treats 0 as "wait forever"; clamp to the smallest finite wait.
        let seconds = timeout.as_secs_f64().max(0.01);
        let config =
            AsyncConnectionConfig::new().set_response_timeout(Some(timeout + BLOCKING_POP_GRACE));
        let mut conn = self
            .client
            .get_multiplexed_async_connection_with_config(&config)
            .await?;

        let reply: Option<(String, Vec<u8>)> = redis::cmd("BRPOP")
            .arg(queue)
            .arg(seconds)
            .query_async(&mut conn)
            .await?;
        Ok(reply.map(|(_, payload)| payload))
    }

    async fn trim(&self, queue: &str, max_len: usize) -> Result<(), MqError> {
        if max_len == 0 {
            return self.clear(queue).await;
        }
        let mut conn = self.conn.clone();
        redis::cmd("LTRIM")
            .arg(queue)
            .arg(0)
            .arg(ltrim_end(max_len))
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn push_success(
        &self,
        queue: &str,
        payload: Vec<u8>,
        max_len: usize,
    ) -> Result<(), MqError> {
        let trim_to = (max_len > 0).then_some(max_len);
        self.push_with_signal(queue, payload, trim_to).await
    }

    async fn len(&self, queue: &str) -> Result<usize, MqError> {
        let mut conn = self.conn.clone();
        let len: usize = redis::cmd("LLEN").arg(queue).query_async(&mut conn).await?;
        Ok(len)
    }

    async fn peek(&self, queue: &str, limit: usize) -> Result<Vec<Vec<u8>>, MqError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let start = -i64::try_from(limit).unwrap_or(i64::MAX);
        let mut conn = self.conn.clone();
        // The oldest entries sit at the tail of the list.
        let mut entries: Vec<Vec<u8>> = redis::cmd("LRANGE")
            .arg(queue)
            .arg(start)
            .arg(-1)
            .query_async(&mut conn)
            .await?;
        entries.reverse();
        Ok(entries)
    }

    async fn clear(&self, queue: &str) -> Result<(), MqError> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL").arg(queue).query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn subscribe(&self) -> Result<BrokerEvents, MqError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(&[TOPIC_IN, TOPIC_OUT]).await?;
        info!(topics = ?[TOPIC_IN, TOPIC_OUT], "Subscribed to broker wake-up topics");

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            match msg.get_payload::<String>() {
                Ok(queue) => Some(BrokerEvent {
                    topic: msg.get_channel_name().to_string(),
                    queue,
                }),
                Err(err) => {
                    warn!(error = %err, "Ignoring undecodable wake-up signal");
                    None
                }
            }
        });
        Ok(stream.boxed())
    }
}
