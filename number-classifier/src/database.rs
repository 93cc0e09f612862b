use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use thiserror::Error;
use tokio::time::timeout;

use crate::classification::Classification;

#[derive(Error, Debug)]
pub enum CustomDatabaseError {
    #[error("Pg error: {0}")]
    Other(#[from] sqlx::Error),

    #[error("Timeout error")]
    Timeout(#[from] tokio::time::error::Elapsed),

    #[error("{0} is not a valid classification")]
    InvalidClassification(String),
}

/// Persistent classification rows, keyed by identifier.
/// Rows are written once and never updated.
#[async_trait]
pub trait Client {
    async fn fetch_classification(
        &self,
        number: &str,
    ) -> Result<Option<Classification>, CustomDatabaseError>;

    /// Returns `false` when a row for `number` already exists. A concurrent
    /// insert of the same identifier is a harmless conflict, not an error.
    async fn insert_classification(
        &self,
        number: &str,
        classification: Classification,
    ) -> Result<bool, CustomDatabaseError>;
}

pub struct PgClient {
    pool: PgPool,
    timeout: Duration,
}

impl PgClient {
    pub async fn new(
        url: &str,
        max_connections: u32,
        timeout: Duration,
    ) -> Result<PgClient, CustomDatabaseError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;

        Ok(PgClient { pool, timeout })
    }
}

#[async_trait]
impl Client for PgClient {
    async fn fetch_classification(
        &self,
        number: &str,
    ) -> Result<Option<Classification>, CustomDatabaseError> {
        let query = sqlx::query_scalar::<_, String>(
            "SELECT simple FROM fortunetable WHERE number = $1",
        )
        .bind(number)
        .fetch_optional(&self.pool);

        let row = timeout(self.timeout, query).await??;

        row.map(|simple| {
            simple
                .parse::<Classification>()
                .map_err(|e| CustomDatabaseError::InvalidClassification(e.0))
        })
        .transpose()
    }

    async fn insert_classification(
        &self,
        number: &str,
        classification: Classification,
    ) -> Result<bool, CustomDatabaseError> {
        let query = sqlx::query(
            r#"
INSERT INTO fortunetable
    (number, simple)
VALUES
    ($1, $2)
ON CONFLICT (number) DO NOTHING
            "#,
        )
        .bind(number)
        .bind(classification.as_str())
        .execute(&self.pool);

        let result = timeout(self.timeout, query).await??;

        Ok(result.rows_affected() == 1)
    }
}
