use std::sync::Arc;

use tracing::instrument;

use crate::api::{ClassifyResponse, LookupError};
use crate::classification::Classifier;
use crate::database::Client as DatabaseClient;
use crate::metrics_utils::{
    CACHE_HITS_COUNTER, CACHE_MISSES_COUNTER, COMPUTED_COUNTER, STORE_HITS_COUNTER,
};
use crate::redis::{Client as RedisClient, CustomRedisError};

/// Cache-aside access to classifications.
///
/// Replies are cached in redis under the raw request message. Behind the
/// cache, classifications are persisted in postgres keyed by identifier and
/// computed only when no row exists yet.
pub struct ClassificationStore {
    cache: Arc<dyn RedisClient + Send + Sync>,
    database: Arc<dyn DatabaseClient + Send + Sync>,
    classifier: Classifier,
}

impl ClassificationStore {
    pub fn new(
        cache: Arc<dyn RedisClient + Send + Sync>,
        database: Arc<dyn DatabaseClient + Send + Sync>,
        classifier: Classifier,
    ) -> Self {
        ClassificationStore {
            cache,
            database,
            classifier,
        }
    }

    /// Returns the cached reply for a raw request, if any.
    /// Cache errors are treated as misses so the request is still answered.
    #[instrument(skip(self))]
    pub async fn cached_reply(&self, raw: &str) -> Option<String> {
        match self.cache.get(raw.to_owned()).await {
            Ok(reply) => {
                metrics::counter!(CACHE_HITS_COUNTER).increment(1);
                Some(reply)
            }
            Err(CustomRedisError::NotFound) => {
                metrics::counter!(CACHE_MISSES_COUNTER).increment(1);
                None
            }
            Err(e) => {
                tracing::warn!("cache lookup failed, treating as miss: {}", e);
                metrics::counter!(CACHE_MISSES_COUNTER).increment(1);
                None
            }
        }
    }

    /// Caches the reply for a raw request. Entries are never invalidated.
    pub async fn cache_reply(&self, raw: &str, reply: &str) -> Result<(), CustomRedisError> {
        self.cache.set(raw.to_owned(), reply.to_owned()).await
    }

    /// Classifies an identifier, preferring a persisted result over a fresh
    /// computation. A freshly computed result is persisted before returning.
    #[instrument(skip(self))]
    pub async fn classify(&self, number: &str) -> Result<ClassifyResponse, LookupError> {
        if let Some(stored) = self.database.fetch_classification(number).await? {
            metrics::counter!(STORE_HITS_COUNTER).increment(1);
            return Ok(ClassifyResponse::new(stored));
        }

        let computed = self.classifier.classify(number);
        metrics::counter!(COMPUTED_COUNTER, "result" => computed.as_str()).increment(1);

        if !self
            .database
            .insert_classification(number, computed)
            .await?
        {
            // Another request stored this identifier first; the result is the same.
            tracing::debug!("classification for {} was already stored", number);
        }

        Ok(ClassifyResponse::new(computed))
    }
}
