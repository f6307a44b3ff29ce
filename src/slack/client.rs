//! Production [`ChatApi`] implementation over `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use super::{
    check_http_response, ChatApi, OAuthAccessResponse, SlackApiError, SlackEnvelope,
};

const SLACK_API_BASE: &str = "https://slack.com/api";

/// Bounded timeout for every platform call so an unreachable endpoint cannot
/// stall the dispatch loop.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// `chat.postMessage` request body.
#[derive(Debug, Serialize)]
struct PostMessageRequest<'a> {
    channel: &'a str,
    text: &'a str,
}

/// Slack Web API client.
#[derive(Debug, Clone)]
pub struct SlackApiClient {
    http: reqwest::Client,
    base: String,
}

impl SlackApiClient {
    /// Create a client against the public Slack API endpoint.
    pub fn new() -> Self {
        Self::with_base(SLACK_API_BASE.to_owned())
    }

    /// Create a client against a custom base URL (mock servers in tests).
    pub fn with_base(base: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { http, base }
    }
}

impl Default for SlackApiClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatApi for SlackApiClient {
    async fn post_message(
        &self,
        token: &str,
        channel: &str,
        text: &str,
    ) -> Result<(), SlackApiError> {
        let url = format!("{}/chat.postMessage", self.base);
        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(&PostMessageRequest { channel, text })
            .send()
            .await?;

        let body = check_http_response(response).await?;
        let envelope: SlackEnvelope =
            serde_json::from_str(&body).map_err(|e| SlackApiError::Parse(e.to_string()))?;

        if !envelope.ok {
            return Err(SlackApiError::Api(
                envelope.error.unwrap_or_else(|| "unknown_error".to_owned()),
            ));
        }

        debug!(channel, "chat.postMessage accepted");
        Ok(())
    }

    async fn exchange_code(
        &self,
        client_id: &str,
        client_secret: &str,
        code: &str,
        redirect_uri: &str,
    ) -> Result<OAuthAccessResponse, SlackApiError> {
        let url = format!("{}/oauth.v2.access", self.base);
        let response = self
            .http
            .post(&url)
            .form(&[
                ("client_id", client_id),
                ("client_secret", client_secret),
                ("code", code),
                ("redirect_uri", redirect_uri),
            ])
            .send()
            .await?;

        let body = check_http_response(response).await?;

        // Check the envelope before the full schema: an `ok: false` body lacks
        // the access-token fields and would otherwise surface as a parse error.
        let raw: Value =
            serde_json::from_str(&body).map_err(|e| SlackApiError::Parse(e.to_string()))?;
        if raw.get("ok").and_then(Value::as_bool) != Some(true) {
            let code = raw
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown_error");
            return Err(SlackApiError::Api(code.to_owned()));
        }

        serde_json::from_value(raw).map_err(|e| SlackApiError::Parse(e.to_string()))
    }
}
