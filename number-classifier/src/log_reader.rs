use std::sync::Arc;

use futures::StreamExt;
use tracing::instrument;

use crate::activity_log::ActivityLog;
use crate::bus::{BusError, Client as BusClient};
use crate::metrics_utils::PUBLISH_ERRORS_COUNTER;

/// Answers log-read requests with a snapshot of the activity log.
/// Every reply goes to the same topic; requests carry no correlation id.
pub struct LogReader {
    bus: Arc<dyn BusClient + Send + Sync>,
    activity_log: Arc<ActivityLog>,
    response_topic: String,
}

impl LogReader {
    pub fn new(
        bus: Arc<dyn BusClient + Send + Sync>,
        activity_log: Arc<ActivityLog>,
        response_topic: String,
    ) -> Self {
        LogReader {
            bus,
            activity_log,
            response_topic,
        }
    }

    pub async fn run(&self, topic: &str) -> Result<(), BusError> {
        let mut messages = self.bus.subscribe(topic).await?;
        tracing::info!("listening for log requests on {}", topic);

        while let Some(message) = messages.next().await {
            self.handle(&message).await;
        }

        Err(BusError::SubscriptionClosed(topic.to_owned()))
    }

    /// The message body is only checked for being non-empty.
    #[instrument(skip(self))]
    pub async fn handle(&self, message: &str) {
        if message.is_empty() {
            return;
        }

        let snapshot = match self.activity_log.snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::error!("failed to read activity log: {}", e);
                return;
            }
        };

        if let Err(e) = self.bus.publish(&self.response_topic, snapshot).await {
            tracing::error!("failed to publish activity log: {}", e);
            metrics::counter!(PUBLISH_ERRORS_COUNTER).increment(1);
        }
    }
}
