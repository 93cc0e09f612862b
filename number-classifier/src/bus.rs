use async_trait::async_trait;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use redis::{AsyncCommands, RedisError};
use thiserror::Error;
use tokio::sync::mpsc;

/// Message bodies, in arrival order.
pub type MessageStream = BoxStream<'static, String>;

#[derive(Error, Debug)]
pub enum BusError {
    #[error("failed to connect to message bus: {0}")]
    ConnectionError(#[from] RedisError),
    #[error("failed to subscribe to {topic}: {error}")]
    SubscribeError { topic: String, error: RedisError },
    #[error("failed to publish to {topic}: {error}")]
    PublishError { topic: String, error: RedisError },
    #[error("subscription to {0} was closed")]
    SubscriptionClosed(String),
}

/// Publish/subscribe access to the message broker.
#[async_trait]
pub trait Client {
    async fn subscribe(&self, topic: &str) -> Result<MessageStream, BusError>;
    async fn publish(&self, topic: &str, payload: String) -> Result<(), BusError>;
}

/// Message bus backed by redis PUBLISH/SUBSCRIBE.
/// Every subscription holds its own connection, since a connection in
/// subscriber mode cannot run other commands.
pub struct RedisBus {
    client: redis::Client,
}

impl RedisBus {
    pub fn new(addr: String) -> Result<RedisBus, BusError> {
        let client = redis::Client::open(addr)?;

        Ok(RedisBus { client })
    }
}

#[async_trait]
impl Client for RedisBus {
    async fn subscribe(&self, topic: &str) -> Result<MessageStream, BusError> {
        let subscribe_error = |error: RedisError| BusError::SubscribeError {
            topic: topic.to_owned(),
            error,
        };

        let conn = self
            .client
            .get_async_connection()
            .await
            .map_err(subscribe_error)?;
        let mut pubsub = conn.into_pubsub();
        pubsub.subscribe(topic).await.map_err(subscribe_error)?;

        // The pubsub connection must outlive the returned stream, so a task
        // owns it and forwards bodies over a channel. The stream ends once
        // the connection drops.
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let messages = pubsub.on_message().map(|msg| {
                // Bodies that are not bulk strings decode as empty and get skipped by consumers.
                let body: Vec<u8> = msg.get_payload().unwrap_or_default();
                String::from_utf8_lossy(&body).into_owned()
            });
            forward_messages(messages, tx).await;
        });

        Ok(stream::poll_fn(move |cx| rx.poll_recv(cx)).boxed())
    }

    async fn publish(&self, topic: &str, payload: String) -> Result<(), BusError> {
        let publish_error = |error: RedisError| BusError::PublishError {
            topic: topic.to_owned(),
            error,
        };

        let mut conn = self
            .client
            .get_async_connection()
            .await
            .map_err(publish_error)?;

        conn.publish::<_, _, ()>(topic, payload)
            .await
            .map_err(publish_error)
    }
}

/// Forwards `messages` until the source ends or the receiving side is
/// dropped, whichever happens first.
async fn forward_messages<S>(messages: S, tx: mpsc::UnboundedSender<String>)
where
    S: Stream<Item = String>,
{
    tokio::pin!(messages);

    loop {
        tokio::select! {
            _ = tx.closed() => break,
            message = messages.next() => match message {
                Some(body) => {
                    if tx.send(body).is_err() {
                        break;
                    }
                }
                None => break,
            },
        }
    }
}
