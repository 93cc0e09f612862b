use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::api::LookupError;
use crate::metrics_utils::{LOG_APPENDS_COUNTER, LOG_READS_COUNTER};
use crate::redis::{Client as RedisClient, CustomRedisError};
use crate::request::Request;

/// Written before every record in the accumulator.
pub const RECORD_DELIMITER: char = ',';

/// One accepted request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LogRecord {
    pub timestamp: String,
    pub command: String,
    pub number: String,
}

impl LogRecord {
    pub fn new(timestamp: String, request: &Request<'_>) -> Self {
        LogRecord {
            timestamp,
            command: request.code().to_owned(),
            number: request.identifier().to_owned(),
        }
    }
}

/// Append-only activity log kept as a single redis string.
///
/// Each record is appended as `,{json}` with redis APPEND, which is atomic,
/// so concurrent writers need no extra locking. Reading the log turns the
/// accumulated value into a JSON array without re-parsing the records.
pub struct ActivityLog {
    client: Arc<dyn RedisClient + Send + Sync>,
    key: String,
}

impl ActivityLog {
    pub fn new(client: Arc<dyn RedisClient + Send + Sync>, key: String) -> Self {
        ActivityLog { client, key }
    }

    /// Creates the accumulator as an empty value unless it already exists.
    pub async fn ensure_initialized(&self) -> Result<(), CustomRedisError> {
        if self.client.set_nx(self.key.clone(), String::new()).await? {
            tracing::info!("initialized empty activity log at {}", self.key);
        }

        Ok(())
    }

    pub async fn append(&self, record: &LogRecord) -> Result<(), LookupError> {
        let serialized = serde_json::to_string(record).map_err(|e| {
            tracing::error!("failed to serialize log record: {}", e);
            LookupError::DataParsingError
        })?;

        self.client
            .append(
                self.key.clone(),
                format!("{RECORD_DELIMITER}{serialized}"),
            )
            .await?;
        metrics::counter!(LOG_APPENDS_COUNTER).increment(1);

        Ok(())
    }

    /// All records so far as a JSON array, in append order.
    pub async fn snapshot(&self) -> Result<String, LookupError> {
        let accumulated = match self.client.get(self.key.clone()).await {
            Ok(value) => value,
            Err(CustomRedisError::NotFound) => String::new(),
            Err(e) => return Err(e.into()),
        };
        metrics::counter!(LOG_READS_COUNTER).increment(1);

        Ok(render_snapshot(&accumulated))
    }
}

/// Wraps the accumulated `,{..},{..}` text into `[{..},{..}]`.
pub fn render_snapshot(accumulated: &str) -> String {
    let records = accumulated
        .strip_prefix(RECORD_DELIMITER)
        .unwrap_or(accumulated);

    format!("[{records}]")
}
