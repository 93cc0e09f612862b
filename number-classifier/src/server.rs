use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use metrics_exporter_prometheus::BuildError;
use thiserror::Error;
use tokio::task::{JoinError, JoinHandle};

use crate::activity_log::ActivityLog;
use crate::bus::{BusError, Client as BusClient, RedisBus};
use crate::classification::Classifier;
use crate::config::Config;
use crate::database::{Client as DatabaseClient, CustomDatabaseError, PgClient};
use crate::log_reader::LogReader;
use crate::lookup::ClassificationStore;
use crate::metrics_utils;
use crate::redis::{Client as RedisClient, CustomRedisError, RedisClient as RedisCache};
use crate::router::RequestRouter;
use crate::time::{SystemTime, TimeSource};

/// Conditions that stop the service.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("redis error: {0}")]
    Redis(#[from] CustomRedisError),
    #[error("database error: {0}")]
    Database(#[from] CustomDatabaseError),
    #[error("message bus error: {0}")]
    Bus(#[from] BusError),
    #[error("failed to install metrics recorder: {0}")]
    Metrics(#[from] BuildError),
    #[error("consumer task failed: {0}")]
    Task(#[from] JoinError),
}

/// The two consumer loops and the state they share.
pub struct Service {
    router: Arc<RequestRouter>,
    log_reader: Arc<LogReader>,
    activity_log: Arc<ActivityLog>,
    request_topic: String,
    log_request_topic: String,
}

impl Service {
    pub fn new(
        config: &Config,
        cache: Arc<dyn RedisClient + Send + Sync>,
        database: Arc<dyn DatabaseClient + Send + Sync>,
        bus: Arc<dyn BusClient + Send + Sync>,
        timesource: Arc<dyn TimeSource + Send + Sync>,
    ) -> Self {
        let activity_log = Arc::new(ActivityLog::new(cache.clone(), config.log_key.clone()));
        let store = Arc::new(ClassificationStore::new(
            cache,
            database,
            Classifier::new(config.identifier_prefix_len),
        ));

        let router = RequestRouter::new(
            bus.clone(),
            store,
            activity_log.clone(),
            timesource,
            config.response_topic_prefix.clone(),
        );
        let log_reader = LogReader::new(
            bus,
            activity_log.clone(),
            config.log_response_topic.clone(),
        );

        Service {
            router: Arc::new(router),
            log_reader: Arc::new(log_reader),
            activity_log,
            request_topic: config.request_topic.clone(),
            log_request_topic: config.log_request_topic.clone(),
        }
    }

    /// Runs both consumer loops until one of them fails or `shutdown` resolves.
    pub async fn run<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        self.activity_log.ensure_initialized().await?;

        let router = self.router.clone();
        let request_topic = self.request_topic.clone();
        let mut requests: JoinHandle<Result<(), BusError>> =
            tokio::spawn(async move { router.run(&request_topic).await });

        let log_reader = self.log_reader.clone();
        let log_request_topic = self.log_request_topic.clone();
        let mut log_reads: JoinHandle<Result<(), BusError>> =
            tokio::spawn(async move { log_reader.run(&log_request_topic).await });

        let result = tokio::select! {
            result = &mut requests => {
                tracing::error!("request consumer exited");
                flatten(result)
            }
            result = &mut log_reads => {
                tracing::error!("log request consumer exited");
                flatten(result)
            }
            _ = shutdown => {
                tracing::info!("Shutting down gracefully...");
                Ok(())
            }
        };

        requests.abort();
        log_reads.abort();

        result
    }
}

fn flatten(result: Result<Result<(), BusError>, JoinError>) -> Result<(), ServerError> {
    Ok(result??)
}

/// Connects to redis, postgres and the message bus, then runs the service.
/// Any connection failure is returned before consuming starts.
pub async fn serve<F>(config: Config, shutdown: F) -> Result<(), ServerError>
where
    F: Future<Output = ()>,
{
    let cache = Arc::new(RedisCache::new(
        config.redis_url.clone(),
        Duration::from_millis(config.redis_timeout_ms),
    )?);
    let bus = Arc::new(RedisBus::new(config.redis_url.clone())?);
    let database = Arc::new(
        PgClient::new(
            &config.database_url,
            config.max_pg_connections,
            Duration::from_millis(config.database_timeout_ms),
        )
        .await?,
    );

    if config.export_prometheus {
        let recorder_handle = metrics_utils::setup_metrics_recorder()?;
        let app = metrics_utils::app(Some(recorder_handle));
        let bind = config.bind();
        tokio::spawn(async move {
            if let Err(e) = metrics_utils::serve(app, &bind).await {
                tracing::error!("failed to serve metrics on {}: {}", bind, e);
            }
        });
    }

    let service = Service::new(&config, cache, database, bus, Arc::new(SystemTime {}));
    service.run(shutdown).await
}
