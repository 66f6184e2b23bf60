//! Notification sink.
//!
//! Delivery is best-effort: a backend reports whether it got the message out
//! and nothing upstream ever fails because of it. Every message is also
//! logged locally.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Title used for failures.
pub const TITLE_ERROR: &str = "Error";
/// Title used for completed filings and updates.
pub const TITLE_SUCCESS: &str = "Success!";

/// An outbound message channel (push service, messenger, log).
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    /// Deliver one message. Returns `false` when delivery failed.
    async fn send(&self, title: &str, message: &str) -> bool;
}

/// Writes messages to the log only. Used when no service is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, title: &str, message: &str) -> bool {
        info!(target: "notification", "{title}: {message}");
        true
    }
}

/// A backend plus the prefix put in front of every message.
#[derive(Clone)]
pub struct Notifications {
    backend: Arc<dyn Notifier>,
    prefix: String,
}

impl Notifications {
    pub fn new(backend: Arc<dyn Notifier>, prefix: impl Into<String>) -> Self {
        Self {
            backend,
            prefix: prefix.into(),
        }
    }

    pub fn log_only() -> Self {
        Self::new(Arc::new(LogNotifier), "")
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Log the message and hand it, prefixed, to the backend.
    pub async fn send(&self, title: &str, message: &str) -> bool {
        if title == TITLE_ERROR {
            warn!("{title} - {message}");
        } else {
            info!("{title} - {message}");
        }
        let delivered = self
            .backend
            .send(title, &format!("{}{}", self.prefix, message))
            .await;
        if !delivered {
            warn!(backend = self.backend.name(), "notification was not delivered");
        }
        delivered
    }

    pub async fn error(&self, message: &str) -> bool {
        self.send(TITLE_ERROR, message).await
    }

    pub async fn success(&self, message: &str) -> bool {
        self.send(TITLE_SUCCESS, message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::RecordingNotifier;

    #[tokio::test]
    async fn test_prefix_is_prepended() {
        let recorder = Arc::new(RecordingNotifier::default());
        let notifications = Notifications::new(recorder.clone(), "🇵🇾 taxes\n");
        assert!(notifications.error("boom").await);
        assert_eq!(
            recorder.messages(),
            vec![("Error".to_string(), "🇵🇾 taxes\nboom".to_string())]
        );
    }

    #[tokio::test]
    async fn test_failed_delivery_is_reported_not_raised() {
        let recorder = Arc::new(RecordingNotifier::failing());
        let notifications = Notifications::new(recorder.clone(), "");
        assert!(!notifications.success("done").await);
        assert_eq!(recorder.messages().len(), 1);
    }
}
