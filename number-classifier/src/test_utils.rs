//! In-memory stand-ins for redis, postgres and the message bus.
//! Clones share state, so a test can keep a handle while the code under
//! test owns another.
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::stream::StreamExt;
use rand::{distributions::Alphanumeric, Rng};

use crate::bus::{BusError, Client as BusClient, MessageStream};
use crate::classification::Classification;
use crate::database::{Client as DatabaseClient, CustomDatabaseError};
use crate::redis::{Client as RedisClient, CustomRedisError};
use crate::time::TimeSource;

pub fn random_string(prefix: &str, length: usize) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(Alphanumeric)
        .take(length)
        .map(char::from)
        .collect();
    format!("{}{}", prefix, suffix)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn unavailable_redis() -> CustomRedisError {
    CustomRedisError::Other(redis::RedisError::from((
        redis::ErrorKind::IoError,
        "redis unavailable",
    )))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockRedisCall {
    Get(String),
    Set(String, String),
    SetNx(String, String),
    Append(String, String),
}

#[derive(Clone, Default)]
pub struct MockRedisClient {
    values: Arc<Mutex<HashMap<String, String>>>,
    calls: Arc<Mutex<Vec<MockRedisCall>>>,
    failing_reads: Arc<Mutex<bool>>,
    failing_writes: Arc<Mutex<bool>>,
}

impl MockRedisClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(self, key: &str, value: &str) -> Self {
        lock(&self.values).insert(key.to_owned(), value.to_owned());
        self
    }

    /// Every GET fails as if redis could not be reached.
    pub fn failing_reads(self) -> Self {
        *lock(&self.failing_reads) = true;
        self
    }

    /// Every SET, SETNX and APPEND fails as if redis could not be reached.
    pub fn failing_writes(self) -> Self {
        *lock(&self.failing_writes) = true;
        self
    }

    pub fn value(&self, key: &str) -> Option<String> {
        lock(&self.values).get(key).cloned()
    }

    pub fn get_calls(&self) -> Vec<MockRedisCall> {
        lock(&self.calls).clone()
    }

    fn record(&self, call: MockRedisCall) {
        lock(&self.calls).push(call);
    }

    fn check_writes(&self) -> Result<(), CustomRedisError> {
        if *lock(&self.failing_writes) {
            Err(unavailable_redis())
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RedisClient for MockRedisClient {
    async fn get(&self, k: String) -> Result<String, CustomRedisError> {
        self.record(MockRedisCall::Get(k.clone()));
        if *lock(&self.failing_reads) {
            return Err(unavailable_redis());
        }

        self.value(&k).ok_or(CustomRedisError::NotFound)
    }

    async fn set(&self, k: String, v: String) -> Result<(), CustomRedisError> {
        self.record(MockRedisCall::Set(k.clone(), v.clone()));
        self.check_writes()?;

        lock(&self.values).insert(k, v);
        Ok(())
    }

    async fn set_nx(&self, k: String, v: String) -> Result<bool, CustomRedisError> {
        self.record(MockRedisCall::SetNx(k.clone(), v.clone()));
        self.check_writes()?;

        let mut values = lock(&self.values);
        if values.contains_key(&k) {
            return Ok(false);
        }
        values.insert(k, v);
        Ok(true)
    }

    async fn append(&self, k: String, v: String) -> Result<usize, CustomRedisError> {
        self.record(MockRedisCall::Append(k.clone(), v.clone()));
        self.check_writes()?;

        let mut values = lock(&self.values);
        let value = values.entry(k).or_default();
        value.push_str(&v);
        Ok(value.len())
    }
}

#[derive(Clone, Default)]
pub struct MockDatabaseClient {
    rows: Arc<Mutex<HashMap<String, Classification>>>,
    fetches: Arc<Mutex<usize>>,
    inserts: Arc<Mutex<usize>>,
    unavailable: Arc<Mutex<bool>>,
    stale_reads: Arc<Mutex<bool>>,
}

impl MockDatabaseClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_row(self, number: &str, classification: Classification) -> Self {
        lock(&self.rows).insert(number.to_owned(), classification);
        self
    }

    /// Every query fails as if postgres could not be reached.
    pub fn unavailable(self) -> Self {
        *lock(&self.unavailable) = true;
        self
    }

    /// Fetches never see existing rows, like two requests racing on the
    /// same identifier before either insert lands.
    pub fn stale_reads(self) -> Self {
        *lock(&self.stale_reads) = true;
        self
    }

    pub fn row(&self, number: &str) -> Option<Classification> {
        lock(&self.rows).get(number).copied()
    }

    pub fn fetch_count(&self) -> usize {
        *lock(&self.fetches)
    }

    pub fn insert_count(&self) -> usize {
        *lock(&self.inserts)
    }

    fn check_available(&self) -> Result<(), CustomDatabaseError> {
        if *lock(&self.unavailable) {
            Err(CustomDatabaseError::Other(sqlx::Error::PoolTimedOut))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DatabaseClient for MockDatabaseClient {
    async fn fetch_classification(
        &self,
        number: &str,
    ) -> Result<Option<Classification>, CustomDatabaseError> {
        *lock(&self.fetches) += 1;
        self.check_available()?;

        if *lock(&self.stale_reads) {
            return Ok(None);
        }
        Ok(self.row(number))
    }

    async fn insert_classification(
        &self,
        number: &str,
        classification: Classification,
    ) -> Result<bool, CustomDatabaseError> {
        *lock(&self.inserts) += 1;
        self.check_available()?;

        let mut rows = lock(&self.rows);
        if rows.contains_key(number) {
            return Ok(false);
        }
        rows.insert(number.to_owned(), classification);
        Ok(true)
    }
}

/// Topic-based bus that fans every published message out to the live
/// subscribers of that topic and remembers it.
#[derive(Clone, Default)]
pub struct MockBus {
    subscribers: Arc<Mutex<HashMap<String, Vec<mpsc::UnboundedSender<String>>>>>,
    published: Arc<Mutex<Vec<(String, String)>>>,
    failing_publishes: Arc<Mutex<bool>>,
    failing_subscribes: Arc<Mutex<bool>>,
}

impl MockBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_publishes(self) -> Self {
        *lock(&self.failing_publishes) = true;
        self
    }

    pub fn failing_subscribes(self) -> Self {
        *lock(&self.failing_subscribes) = true;
        self
    }

    /// Everything published so far as (topic, payload) pairs, failed publishes excluded.
    pub fn published(&self) -> Vec<(String, String)> {
        lock(&self.published).clone()
    }

    pub fn published_to(&self, topic: &str) -> Vec<String> {
        self.published()
            .into_iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, payload)| payload)
            .collect()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        lock(&self.subscribers)
            .get(topic)
            .map(|senders| senders.iter().filter(|s| !s.is_closed()).count())
            .unwrap_or(0)
    }

    /// Ends every open subscription, as a dropped broker connection would.
    pub fn close_subscriptions(&self) {
        lock(&self.subscribers).clear();
    }

    pub async fn wait_for_subscriber(&self, topic: &str) {
        while self.subscriber_count(topic) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl BusClient for MockBus {
    async fn subscribe(&self, topic: &str) -> Result<MessageStream, BusError> {
        if *lock(&self.failing_subscribes) {
            return Err(BusError::SubscriptionClosed(topic.to_owned()));
        }

        let (tx, rx) = mpsc::unbounded();
        lock(&self.subscribers)
            .entry(topic.to_owned())
            .or_default()
            .push(tx);

        Ok(rx.boxed())
    }

    async fn publish(&self, topic: &str, payload: String) -> Result<(), BusError> {
        if *lock(&self.failing_publishes) {
            return Err(BusError::PublishError {
                topic: topic.to_owned(),
                error: redis::RedisError::from((redis::ErrorKind::IoError, "bus unavailable")),
            });
        }

        lock(&self.published).push((topic.to_owned(), payload.clone()));
        if let Some(senders) = lock(&self.subscribers).get_mut(topic) {
            senders.retain(|tx| tx.unbounded_send(payload.clone()).is_ok());
        }

        Ok(())
    }
}

/// Clock that always reads the same instant.
#[derive(Clone)]
pub struct FixedTime {
    pub time: String,
}

impl FixedTime {
    pub fn new(time: &str) -> Self {
        FixedTime {
            time: time.to_owned(),
        }
    }
}

impl TimeSource for FixedTime {
    fn current_time(&self) -> String {
        self.time.clone()
    }
}
