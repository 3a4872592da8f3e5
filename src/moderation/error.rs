//! Error types for the moderation core
//!
//! Each capability the core depends on has its own error enum. The event path
//! never surfaces these to end users; they are logged and the documented
//! fallback is taken at the call site.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

/// Errors raised by a [`PersistentStore`](super::PersistentStore) implementation
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store could not be reached
    #[error("Persistent store unavailable: {0}")]
    Unavailable(String),

    /// The store call did not finish within the configured deadline
    #[error("Persistent store call timed out")]
    Timeout,

    /// Reading or writing a table file failed
    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A table could not be encoded or decoded
    #[error("Store serialization error: {0}")]
    Serialization(#[from] serde_yaml::Error),
}

/// Errors raised by a [`ChatPlatform`](super::ChatPlatform) implementation
#[derive(Debug, Error)]
pub enum PlatformError {
    /// The recipient blocked the bot, closed their DMs or no longer exists
    #[error("Recipient unreachable: {0}")]
    Unreachable(String),

    /// The bot lacks the permission for this call
    #[error("Missing permission: {0}")]
    Forbidden(String),

    /// The target message, member or channel does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// The platform call did not finish within the configured deadline
    #[error("Platform call timed out")]
    Timeout,

    /// Discord API error
    #[error("Discord API error: {0}")]
    Api(#[from] Box<poise::serenity_prelude::Error>),

    /// Generic error
    #[error("Platform error: {0}")]
    Other(String),
}

impl From<poise::serenity_prelude::Error> for PlatformError {
    fn from(error: poise::serenity_prelude::Error) -> Self {
        Self::Api(Box::new(error))
    }
}

impl PlatformError {
    /// Whether the recipient can no longer be reached, so it should be pruned
    #[must_use]
    pub const fn is_unreachable(&self) -> bool {
        matches!(self, Self::Unreachable(_))
    }
}

/// Operator input that was rejected before any state changed
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Referral threshold must be between 3 and 30, got {0}")]
    ThresholdOutOfRange(u32),

    #[error("At least one channel is required")]
    NoChannels,

    #[error("Not a valid channel id: {0}")]
    InvalidChannel(String),
}

/// Errors for moderation operations that are allowed to propagate
#[derive(Debug, Error)]
pub enum ModerationError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("Moderation error: {0}")]
    Other(String),
}

impl From<String> for ModerationError {
    fn from(message: String) -> Self {
        Self::Other(message)
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
pub type PlatformResult<T> = Result<T, PlatformError>;
pub type ModerationResult<T> = Result<T, ModerationError>;

/// Run a store call under `limit`, mapping an elapsed deadline to [`StoreError::Timeout`]
pub(crate) async fn store_call<T, F>(limit: Duration, call: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or(Err(StoreError::Timeout))
}

/// Run a platform call under `limit`, mapping an elapsed deadline to [`PlatformError::Timeout`]
pub(crate) async fn platform_call<T, F>(limit: Duration, call: F) -> PlatformResult<T>
where
    F: Future<Output = PlatformResult<T>>,
{
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or(Err(PlatformError::Timeout))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = StoreError::Unavailable("connection refused".to_string());
        assert_eq!(
            error.to_string(),
            "Persistent store unavailable: connection refused"
        );

        let error = ConfigurationError::ThresholdOutOfRange(31);
        assert_eq!(
            error.to_string(),
            "Referral threshold must be between 3 and 30, got 31"
        );

        let error = ModerationError::from("Something went wrong".to_string());
        assert_eq!(error.to_string(), "Moderation error: Something went wrong");

        let error = ModerationError::from(ConfigurationError::NoChannels);
        assert_eq!(error.to_string(), "At least one channel is required");
    }

    #[test]
    fn test_unreachable_classification() {
        assert!(PlatformError::Unreachable("blocked".into()).is_unreachable());
        assert!(!PlatformError::Forbidden("no perms".into()).is_unreachable());
        assert!(!PlatformError::Timeout.is_unreachable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_calls_time_out() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, StoreError>(1)
        };
        let result = store_call(Duration::from_secs(1), slow).await;
        assert!(matches!(result, Err(StoreError::Timeout)));

        let fast = async { Ok::<_, PlatformError>(7) };
        let result = platform_call(Duration::from_secs(1), fast).await;
        assert_eq!(result.ok(), Some(7));
    }
}
