/// Delivery channel for push notifications. Stored notifications do not
/// depend on it; it only forwards them to the user's device token.
pub trait PushSender: Send + Sync {
    fn send(&self, token: &str, title: &str, body: &str) -> anyhow::Result<()>;
}

/// Records deliveries in the log instead of contacting a push service.
#[derive(Debug, Default)]
pub struct LogPushSender;

impl PushSender for LogPushSender {
    fn send(&self, token: &str, title: &str, body: &str) -> anyhow::Result<()> {
        anyhow::ensure!(!token.trim().is_empty(), "empty push token");
        tracing::info!(token, title, body, "push notification queued");
        Ok(())
    }
}
