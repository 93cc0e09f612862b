use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::classification::Classification;
use crate::database::CustomDatabaseError;
use crate::redis::CustomRedisError;

/// Reply body for an unrecognized command code.
pub const INVALID_COMMAND: &str = "Invalid command";

/// Reply body when a classification could not be completed.
pub const INTERNAL_ERROR: &str = "Internal error";

#[derive(Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ClassifyResponse {
    pub result: Classification,
}

impl ClassifyResponse {
    pub fn new(result: Classification) -> Self {
        ClassifyResponse { result }
    }

    pub fn to_payload(&self) -> Result<String, LookupError> {
        serde_json::to_string(self).map_err(|e| {
            tracing::error!("failed to serialize response: {}", e);
            LookupError::DataParsingError
        })
    }
}

#[derive(Error, Debug)]
pub enum LookupError {
    #[error("failed to parse stored data")]
    DataParsingError,
    #[error("redis unavailable")]
    RedisUnavailable,
    #[error("database unavailable")]
    DatabaseUnavailable,
    #[error("Timed out while fetching data")]
    TimeoutError,
}

impl From<CustomRedisError> for LookupError {
    fn from(e: CustomRedisError) -> Self {
        match e {
            CustomRedisError::NotFound | CustomRedisError::Other(_) => {
                tracing::error!("redis error: {}", e);
                LookupError::RedisUnavailable
            }
            CustomRedisError::Timeout(_) => LookupError::TimeoutError,
        }
    }
}

impl From<CustomDatabaseError> for LookupError {
    fn from(e: CustomDatabaseError) -> Self {
        match e {
            CustomDatabaseError::Other(_) => {
                tracing::error!("failed to get connection: {}", e);
                LookupError::DatabaseUnavailable
            }
            CustomDatabaseError::Timeout(_) => LookupError::TimeoutError,
            CustomDatabaseError::InvalidClassification(_) => {
                tracing::error!("{}", e);
                LookupError::DataParsingError
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_payload_shape() {
        assert_eq!(
            ClassifyResponse::new(Classification::Good)
                .to_payload()
                .unwrap(),
            r#"{"result":"Good"}"#
        );
        assert_eq!(
            ClassifyResponse::new(Classification::Bad)
                .to_payload()
                .unwrap(),
            r#"{"result":"Bad"}"#
        );
    }

    #[test]
    fn test_database_errors_are_mapped() {
        let err: LookupError = CustomDatabaseError::Other(sqlx::Error::PoolTimedOut).into();
        assert!(matches!(err, LookupError::DatabaseUnavailable));

        let err: LookupError =
            CustomDatabaseError::InvalidClassification("Maybe".to_string()).into();
        assert!(matches!(err, LookupError::DataParsingError));
    }
}
