use std::time::Duration;

use async_trait::async_trait;
use redis::{AsyncCommands, RedisError};
use thiserror::Error;
use tokio::time::timeout;

#[derive(Error, Debug)]
pub enum CustomRedisError {
    #[error("Not found in redis")]
    NotFound,

    #[error("Redis error: {0}")]
    Other(#[from] RedisError),

    #[error("Timeout error")]
    Timeout(#[from] tokio::time::error::Elapsed),
}

/// A simple redis wrapper covering the string commands the cache and the
/// activity log need.
#[async_trait]
pub trait Client {
    async fn get(&self, k: String) -> Result<String, CustomRedisError>;
    async fn set(&self, k: String, v: String) -> Result<(), CustomRedisError>;
    /// Returns whether the key was created.
    async fn set_nx(&self, k: String, v: String) -> Result<bool, CustomRedisError>;
    /// Atomically appends to the value at `k` and returns its new length.
    async fn append(&self, k: String, v: String) -> Result<usize, CustomRedisError>;
}

pub struct RedisClient {
    client: redis::Client,
    timeout: Duration,
}

impl RedisClient {
    pub fn new(addr: String, timeout: Duration) -> Result<RedisClient, CustomRedisError> {
        let client = redis::Client::open(addr)?;

        Ok(RedisClient { client, timeout })
    }
}

#[async_trait]
impl Client for RedisClient {
    async fn get(&self, k: String) -> Result<String, CustomRedisError> {
        let mut conn = self.client.get_async_connection().await?;

        let results = conn.get::<_, Option<String>>(k);
        let fut = timeout(self.timeout, results).await?;

        fut?.ok_or(CustomRedisError::NotFound)
    }

    async fn set(&self, k: String, v: String) -> Result<(), CustomRedisError> {
        let mut conn = self.client.get_async_connection().await?;

        let results = conn.set::<_, _, ()>(k, v);
        let fut = timeout(self.timeout, results).await?;

        Ok(fut?)
    }

    async fn set_nx(&self, k: String, v: String) -> Result<bool, CustomRedisError> {
        let mut conn = self.client.get_async_connection().await?;

        let results = conn.set_nx::<_, _, bool>(k, v);
        let fut = timeout(self.timeout, results).await?;

        Ok(fut?)
    }

    async fn append(&self, k: String, v: String) -> Result<usize, CustomRedisError> {
        let mut conn = self.client.get_async_connection().await?;

        let results = conn.append::<_, _, usize>(k, v);
        let fut = timeout(self.timeout, results).await?;

        Ok(fut?)
    }
}
