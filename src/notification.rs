use crate::models::drop_record::DropRecord;

/// Payload handed to the external notifier (spec §6 "Notification request
/// sink"). Delivery and channel routing belong to the out-of-scope notifier;
/// this crate only guarantees the request reaches a sink exactly once per
/// match.
#[derive(Debug, Clone)]
pub struct NotificationRequest {
    pub user_id: String,
    pub drop: DropRecord,
    pub watchlist_id: String,
}

/// Generalizes the teacher's per-channel-type dispatch (email/slack/webhook
/// branches inlined in `eval_alerts`) into one trait boundary, since the
/// transports themselves are out of scope here and only the sink contract
/// matters.
pub trait NotificationSink: Send + Sync {
    fn submit(&self, request: NotificationRequest) -> anyhow::Result<()>;
}

/// Default sink: logs the would-be notification. Stands in for the real
/// transport until one is wired up by a deployment.
pub struct LoggingNotificationSink;

impl NotificationSink for LoggingNotificationSink {
    fn submit(&self, request: NotificationRequest) -> anyhow::Result<()> {
        tracing::info!(
            user_id = %request.user_id,
            label = %request.drop.label,
            tld = %request.drop.tld,
            watchlist_id = %request.watchlist_id,
            "watchlist match notification queued"
        );
        Ok(())
    }
}

#[cfg(test)]
pub struct CollectingNotificationSink {
    pub sent: std::sync::Mutex<Vec<NotificationRequest>>,
}

#[cfg(test)]
impl CollectingNotificationSink {
    pub fn new() -> Self {
        Self {
            sent: std::sync::Mutex::new(Vec::new()),
        }
    }
}

#[cfg(test)]
impl NotificationSink for CollectingNotificationSink {
    fn submit(&self, request: NotificationRequest) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(request);
        Ok(())
    }
}
