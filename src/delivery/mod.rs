//! Message delivery against the chat platform.
//!
//! [`DeliveryClient`] is the seam the dispatch engine sends through;
//! [`SlackDelivery`] is the production implementation: fetch the current
//! credential, normalize the channel reference, call `chat.postMessage`.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::oauth::CredentialProvider;
use crate::slack::{ChatApi, SlackApiError};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from a delivery attempt.
///
/// The dispatch engine treats every variant the same way (message goes to
/// `failed`); the distinction only feeds logs.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// No workspace credential is available; the network call was skipped.
    #[error("no delivery credential available")]
    NoCredential,
    /// The platform accepted the request but rejected the send.
    #[error("platform rejected send: {0}")]
    Platform(String),
    /// Transport or parse failure before a platform verdict.
    #[error("unexpected delivery error: {0}")]
    Unexpected(String),
}

impl From<SlackApiError> for DeliveryError {
    fn from(e: SlackApiError) -> Self {
        match e {
            SlackApiError::Api(code) => DeliveryError::Platform(code),
            other => DeliveryError::Unexpected(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Delivers a message body to a channel.
#[async_trait]
pub trait DeliveryClient: Send + Sync {
    /// Deliver `body` to `channel`.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError`] when no credential is available, the platform
    /// rejects the send, or the transport fails.
    async fn send(&self, body: &str, channel: &str) -> Result<(), DeliveryError>;
}

// ---------------------------------------------------------------------------
// Channel normalization
// ---------------------------------------------------------------------------

/// Leading characters of platform identifiers that pass through unchanged:
/// channels (C), private groups (G), DMs (D), users (U/W).
const ID_PREFIXES: &[char] = &['C', 'G', 'D', 'U', 'W'];

/// Normalize a channel reference for the platform API.
///
/// Bare names get a `#` prepended; `#name`, `@user`, and ID-looking values
/// pass through unchanged. A convenience heuristic only — malformed channels
/// are rejected downstream, not here.
pub fn normalize_channel(channel: &str) -> String {
    if channel.starts_with('#') || channel.starts_with('@') {
        return channel.to_owned();
    }

    let mut chars = channel.chars();
    if let Some(first) = chars.next() {
        let rest_is_id = {
            let rest = chars.as_str();
            !rest.is_empty()
                && rest
                    .chars()
                    .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        };
        if ID_PREFIXES.contains(&first) && rest_is_id {
            return channel.to_owned();
        }
    }

    format!("#{channel}")
}

// ---------------------------------------------------------------------------
// Slack implementation
// ---------------------------------------------------------------------------

/// Delivery client backed by the Slack Web API.
pub struct SlackDelivery {
    api: Arc<dyn ChatApi>,
    credentials: Arc<dyn CredentialProvider>,
}

impl SlackDelivery {
    /// Create a delivery client over the given API and credential source.
    pub fn new(api: Arc<dyn ChatApi>, credentials: Arc<dyn CredentialProvider>) -> Self {
        Self { api, credentials }
    }
}

impl std::fmt::Debug for SlackDelivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlackDelivery").finish_non_exhaustive()
    }
}

#[async_trait]
impl DeliveryClient for SlackDelivery {
    async fn send(&self, body: &str, channel: &str) -> Result<(), DeliveryError> {
        // No caching here: the provider is the single source of truth, so a
        // re-installation takes effect on the very next send.
        let credential = self
            .credentials
            .get_credential()
            .await
            .ok_or(DeliveryError::NoCredential)?;

        let target = normalize_channel(channel);
        debug!(channel = %target, "delivering message");

        self.api
            .post_message(&credential.bot_token, &target, body)
            .await?;
        Ok(())
    }
}
