use std::sync::Arc;

use futures::StreamExt;
use tracing::instrument;

use crate::activity_log::{ActivityLog, LogRecord};
use crate::api::{INTERNAL_ERROR, INVALID_COMMAND};
use crate::bus::{BusError, Client as BusClient};
use crate::lookup::ClassificationStore;
use crate::metrics_utils::{
    INTERNAL_ERRORS_COUNTER, INVALID_COMMANDS_COUNTER, MALFORMED_REQUESTS_COUNTER,
    PUBLISH_ERRORS_COUNTER, REQUESTS_COUNTER,
};
use crate::request::{Command, Request};
use crate::time::TimeSource;

/// Consumes classification requests and answers each on its own reply topic.
pub struct RequestRouter {
    bus: Arc<dyn BusClient + Send + Sync>,
    store: Arc<ClassificationStore>,
    activity_log: Arc<ActivityLog>,
    timesource: Arc<dyn TimeSource + Send + Sync>,
    response_topic_prefix: String,
}

impl RequestRouter {
    pub fn new(
        bus: Arc<dyn BusClient + Send + Sync>,
        store: Arc<ClassificationStore>,
        activity_log: Arc<ActivityLog>,
        timesource: Arc<dyn TimeSource + Send + Sync>,
        response_topic_prefix: String,
    ) -> Self {
        RequestRouter {
            bus,
            store,
            activity_log,
            timesource,
            response_topic_prefix,
        }
    }

    pub fn reply_topic(&self, raw: &str) -> String {
        format!("{}{}", self.response_topic_prefix, raw)
    }

    /// Handles messages from `topic` one at a time, in arrival order.
    /// Only returns when the subscription fails or ends.
    pub async fn run(&self, topic: &str) -> Result<(), BusError> {
        let mut messages = self.bus.subscribe(topic).await?;
        tracing::info!("listening for requests on {}", topic);

        while let Some(message) = messages.next().await {
            self.handle(&message).await;
        }

        Err(BusError::SubscriptionClosed(topic.to_owned()))
    }

    /// Answers one request. Failures are logged; nothing here stops the loop.
    #[instrument(skip(self))]
    pub async fn handle(&self, raw: &str) {
        if raw.is_empty() {
            return;
        }
        let Some(request) = Request::parse(raw) else {
            tracing::debug!("dropping malformed request");
            metrics::counter!(MALFORMED_REQUESTS_COUNTER).increment(1);
            return;
        };
        metrics::counter!(REQUESTS_COUNTER, "command" => request.command().label()).increment(1);

        // Logged before the outcome is known, whether or not the command is valid.
        let record = LogRecord::new(self.timesource.current_time(), &request);
        if let Err(e) = self.activity_log.append(&record).await {
            tracing::error!("failed to append to activity log: {}", e);
        }

        if let Some(reply) = self.store.cached_reply(raw).await {
            self.reply(raw, reply).await;
            return;
        }

        match request.command() {
            Command::CheckSimple => self.check_simple(&request).await,
            Command::Unknown => {
                metrics::counter!(INVALID_COMMANDS_COUNTER).increment(1);
                self.reply(raw, INVALID_COMMAND.to_owned()).await;
            }
        }
    }

    async fn check_simple(&self, request: &Request<'_>) {
        let payload = match self
            .store
            .classify(request.identifier())
            .await
            .and_then(|response| response.to_payload())
        {
            Ok(payload) => payload,
            Err(e) => {
                // Never cached, so a later identical request retries the lookup.
                tracing::error!("failed to classify {}: {}", request.identifier(), e);
                metrics::counter!(INTERNAL_ERRORS_COUNTER).increment(1);
                self.reply(request.raw(), INTERNAL_ERROR.to_owned()).await;
                return;
            }
        };

        self.reply(request.raw(), payload.clone()).await;

        if let Err(e) = self.store.cache_reply(request.raw(), &payload).await {
            tracing::error!("failed to cache reply for {}: {}", request.raw(), e);
        }
    }

    async fn reply(&self, raw: &str, payload: String) {
        let topic = self.reply_topic(raw);
        if let Err(e) = self.bus.publish(&topic, payload).await {
            tracing::error!("failed to publish reply: {}", e);
            metrics::counter!(PUBLISH_ERRORS_COUNTER).increment(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::classification::{Classification, Classifier};
    use crate::test_utils::{FixedTime, MockBus, MockDatabaseClient, MockRedisClient, MockRedisCall};

    struct Harness {
        bus: MockBus,
        cache: MockRedisClient,
        database: MockDatabaseClient,
        router: RequestRouter,
    }

    fn harness(bus: MockBus, cache: MockRedisClient, database: MockDatabaseClient) -> Harness {
        let store = ClassificationStore::new(
            Arc::new(cache.clone()),
            Arc::new(database.clone()),
            Classifier::default(),
        );
        let activity_log = ActivityLog::new(Arc::new(cache.clone()), "LOG".to_string());
        let router = RequestRouter::new(
            Arc::new(bus.clone()),
            Arc::new(store),
            Arc::new(activity_log),
            Arc::new(FixedTime::new("2024-01-01T00:00:00.000000000Z")),
            "response/".to_string(),
        );

        Harness {
            bus,
            cache,
            database,
            router,
        }
    }

    fn default_harness() -> Harness {
        harness(
            MockBus::new(),
            MockRedisClient::new(),
            MockDatabaseClient::new(),
        )
    }

    fn logged_records(cache: &MockRedisClient) -> Vec<LogRecord> {
        let snapshot = crate::activity_log::render_snapshot(&cache.value("LOG").unwrap_or_default());
        serde_json::from_str(&snapshot).unwrap()
    }

    #[tokio::test]
    async fn test_check_simple_computes_replies_and_caches() {
        let h = default_harness();

        h.router.handle("csr5551402").await;

        assert_eq!(
            h.bus.published(),
            vec![(
                "response/csr5551402".to_string(),
                r#"{"result":"Bad"}"#.to_string()
            )]
        );
        assert_eq!(
            h.cache.value("csr5551402").as_deref(),
            Some(r#"{"result":"Bad"}"#)
        );
        assert_eq!(h.database.row("5551402"), Some(Classification::Bad));

        let records = logged_records(&h.cache);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].command, "csr");
        assert_eq!(records[0].number, "5551402");
        assert_eq!(records[0].timestamp, "2024-01-01T00:00:00.000000000Z");
    }

    #[tokio::test]
    async fn test_repeated_request_is_served_from_cache() {
        let h = default_harness();

        h.router.handle("csr5551239").await;
        h.router.handle("csr5551239").await;

        let replies = h.bus.published_to("response/csr5551239");
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0], replies[1]);
        let reply: Value = serde_json::from_str(&replies[0]).unwrap();
        assert_eq!(reply["result"], "Good");

        assert_eq!(h.database.fetch_count(), 1);
        assert_eq!(logged_records(&h.cache).len(), 2);
    }

    #[tokio::test]
    async fn test_cached_reply_is_used_when_database_is_down() {
        let h = harness(
            MockBus::new(),
            MockRedisClient::new().with_value("csr5551402", r#"{"result":"Good"}"#),
            MockDatabaseClient::new().unavailable(),
        );

        h.router.handle("csr5551402").await;

        assert_eq!(
            h.bus.published_to("response/csr5551402"),
            vec![r#"{"result":"Good"}"#.to_string()]
        );
        assert_eq!(h.database.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_command_is_rejected_and_not_cached() {
        let h = default_harness();

        h.router.handle("xyz5551234").await;

        assert_eq!(
            h.bus.published_to("response/xyz5551234"),
            vec!["Invalid command".to_string()]
        );
        assert_eq!(h.cache.value("xyz5551234"), None);
        assert!(!h
            .cache
            .get_calls()
            .iter()
            .any(|call| matches!(call, MockRedisCall::Set(..))));

        let records = logged_records(&h.cache);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].command, "xyz");
    }

    #[tokio::test]
    async fn test_malformed_request_is_dropped_silently() {
        let h = default_harness();

        h.router.handle("").await;
        h.router.handle("csr").await;

        assert!(h.bus.published().is_empty());
        assert!(h.cache.get_calls().is_empty());
        assert_eq!(h.cache.value("LOG"), None);
    }

    #[tokio::test]
    async fn test_database_failure_replies_internal_error() {
        let h = harness(
            MockBus::new(),
            MockRedisClient::new(),
            MockDatabaseClient::new().unavailable(),
        );

        h.router.handle("csr5551402").await;

        assert_eq!(
            h.bus.published_to("response/csr5551402"),
            vec!["Internal error".to_string()]
        );
        assert_eq!(h.cache.value("csr5551402"), None);
        assert_eq!(logged_records(&h.cache).len(), 1);
    }

    #[tokio::test]
    async fn test_publish_failure_still_caches_reply() {
        let h = harness(
            MockBus::new().failing_publishes(),
            MockRedisClient::new(),
            MockDatabaseClient::new(),
        );

        h.router.handle("csr5551239").await;

        assert!(h.bus.published().is_empty());
        assert_eq!(
            h.cache.value("csr5551239").as_deref(),
            Some(r#"{"result":"Good"}"#)
        );
    }

    #[tokio::test]
    async fn test_cache_write_failure_still_replies() {
        let h = harness(
            MockBus::new(),
            MockRedisClient::new().failing_writes(),
            MockDatabaseClient::new(),
        );

        h.router.handle("csr5551239").await;

        assert_eq!(
            h.bus.published_to("response/csr5551239"),
            vec![r#"{"result":"Good"}"#.to_string()]
        );
        assert_eq!(h.database.row("5551239"), Some(Classification::Good));
    }

    #[tokio::test]
    async fn test_run_ends_with_error_when_subscription_closes() {
        let h = default_harness();
        let bus = h.bus.clone();
        let router = Arc::new(h.router);

        let running = tokio::spawn({
            let router = router.clone();
            async move { router.run("request").await }
        });
        bus.wait_for_subscriber("request").await;

        bus.publish("request", "csr5551402".to_string()).await.unwrap();
        while bus.published_to("response/csr5551402").is_empty() {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        bus.close_subscriptions();

        match running.await.unwrap() {
            Err(BusError::SubscriptionClosed(topic)) => assert_eq!(topic, "request"),
            other => panic!("Expected SubscriptionClosed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_run_fails_when_subscription_cannot_be_established() {
        let h = harness(
            MockBus::new().failing_subscribes(),
            MockRedisClient::new(),
            MockDatabaseClient::new(),
        );

        assert!(h.router.run("request").await.is_err());
    }
}
