use super::Notification;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Capability contract of a delivery channel.
///
/// The dispatcher is agnostic to what a channel does: email, webhooks and
/// chat integrations are all just implementations of this trait supplied by
/// the embedding application. Implementations report failure through the
/// returned result; the dispatcher handles retry, rate limiting and error
/// isolation.
#[async_trait]
pub trait Channel: Send + Sync {
    /// The channel's unique name, used for addressing and rate limiting.
    fn name(&self) -> &str;

    /// Delivers one notification.
    async fn send(&self, notification: &Notification) -> crate::Result<()>;
}

/// Outcome of dispatching one notification to one channel.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeliveryResult {
    /// The addressed channel.
    pub channel: String,
    /// Whether any attempt succeeded.
    pub success: bool,
    /// Number of attempts actually made (zero when admission was denied).
    pub attempts: u32,
    /// Failure description, if delivery did not succeed.
    pub error: Option<String>,
    /// When the outcome was determined.
    pub timestamp: DateTime<Utc>,
}

impl DeliveryResult {
    pub(super) fn success(channel: &str, attempts: u32) -> Self {
        Self {
            channel: channel.to_owned(),
            success: true,
            attempts,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub(super) fn failure(channel: &str, attempts: u32, error: impl Into<String>) -> Self {
        Self {
            channel: channel.to_owned(),
            success: false,
            attempts,
            error: Some(error.into()),
            timestamp: Utc::now(),
        }
    }
}
