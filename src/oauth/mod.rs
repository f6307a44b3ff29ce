//! Workspace credential acquisition and the OAuth installation flow.
//!
//! One authorization round per workspace installation: herald issues a
//! single-use anti-CSRF state, redirects the operator to Slack's consent
//! page, and on callback exchanges the authorization code for a bot token
//! which is persisted keyed by workspace (a later install replaces it).
//!
//! Delivery-side consumers only see the [`CredentialProvider`] trait.
//! Single-workspace deployments can skip OAuth entirely with
//! [`StaticCredentialProvider`] and a pre-provisioned bot token.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use sqlx::SqlitePool;
use tracing::{error, info, warn};
use url::Url;

use crate::slack::{ChatApi, SlackApiError};

pub mod store;

/// How long an issued state token stays valid if unused.
pub const STATE_TTL_SECONDS: i64 = 300;

/// Length of a generated state token.
const STATE_TOKEN_LEN: usize = 32;

/// Slack authorization endpoint for the OAuth v2 flow.
const AUTHORIZE_URL: &str = "https://slack.com/oauth/v2/authorize";

/// Scopes requested when the caller does not override them.
pub const DEFAULT_SCOPES: &[&str] = &["chat:write", "channels:read", "groups:read"];

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A workspace-scoped bearer credential produced by an OAuth installation.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    /// Workspace id the token is scoped to.
    pub team_id: String,
    /// Bot bearer token used for delivery calls.
    pub bot_token: String,
    /// Bot user id, when the platform reported one.
    pub bot_user_id: Option<String>,
    /// Installed app id, when the platform reported one.
    pub app_id: Option<String>,
    /// Granted scopes.
    pub scopes: Vec<String>,
    /// When the installation completed.
    pub installed_at: DateTime<Utc>,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("team_id", &self.team_id)
            .field("bot_token", &"[REDACTED]")
            .field("bot_user_id", &self.bot_user_id)
            .field("app_id", &self.app_id)
            .field("scopes", &self.scopes)
            .field("installed_at", &self.installed_at)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from the OAuth installation flow.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The callback state is unknown, already consumed, or expired.
    #[error("invalid or expired oauth state")]
    InvalidState,
    /// The callback carried no authorization code.
    #[error("missing authorization code")]
    MissingCode,
    /// The code-for-token exchange failed; no credential was stored.
    #[error("token exchange failed: {0}")]
    ExchangeFailed(String),
    /// The authorization URL could not be built.
    #[error("invalid authorization url: {0}")]
    InvalidAuthorizeUrl(#[from] url::ParseError),
    /// State or installation persistence failed.
    #[error("credential store error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<SlackApiError> for AuthError {
    fn from(e: SlackApiError) -> Self {
        AuthError::ExchangeFailed(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Source of the delivery credential.
///
/// Returns `None` when no workspace is installed — the delivery client treats
/// that as a hard failure, never a retry condition.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// The most recently stored credential, if any.
    async fn get_credential(&self) -> Option<Credential>;
}

/// Fixed credential from configuration, for single-workspace deployments
/// that provision a bot token out of band.
#[derive(Debug, Clone)]
pub struct StaticCredentialProvider {
    credential: Credential,
}

impl StaticCredentialProvider {
    /// Wrap a pre-provisioned bot token.
    pub fn from_token(token: String) -> Self {
        Self {
            credential: Credential {
                team_id: "configured".to_owned(),
                bot_token: token,
                bot_user_id: None,
                app_id: None,
                scopes: Vec::new(),
                installed_at: Utc::now(),
            },
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn get_credential(&self) -> Option<Credential> {
        Some(self.credential.clone())
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Runs the OAuth installation flow and serves the stored credential.
pub struct OauthManager {
    db: SqlitePool,
    api: Arc<dyn ChatApi>,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
}

impl std::fmt::Debug for OauthManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OauthManager")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("redirect_uri", &self.redirect_uri)
            .finish_non_exhaustive()
    }
}

impl OauthManager {
    /// Create a manager over the shared pool, ensuring its schema.
    ///
    /// # Errors
    ///
    /// Returns a database error if the state/installation tables cannot be
    /// created.
    pub async fn new(
        db: SqlitePool,
        api: Arc<dyn ChatApi>,
        client_id: String,
        client_secret: String,
        redirect_uri: String,
    ) -> Result<Self, AuthError> {
        store::ensure_schema(&db).await?;
        Ok(Self {
            db,
            api,
            client_id,
            client_secret,
            redirect_uri,
        })
    }

    /// Issue a fresh single-use state and build the authorization URL.
    ///
    /// Expired unused states are swept as a side effect of issuing.
    ///
    /// # Errors
    ///
    /// Returns a database error if the state cannot be persisted, or an
    /// URL error if the authorization endpoint cannot be parsed.
    pub async fn authorize_url(&self, scopes: &[&str]) -> Result<(Url, String), AuthError> {
        let state: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(STATE_TOKEN_LEN)
            .map(char::from)
            .collect();

        let now = Utc::now();
        store::sweep_expired_states(&self.db, now - ChronoDuration::seconds(STATE_TTL_SECONDS))
            .await?;
        store::issue_state(&self.db, &state, now).await?;

        let mut url = Url::parse(AUTHORIZE_URL)?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("scope", &scopes.join(","))
            .append_pair("state", &state)
            .append_pair("redirect_uri", &self.redirect_uri);

        info!(redirect_uri = %self.redirect_uri, "authorization url issued");
        Ok((url, state))
    }

    /// Complete an installation from the OAuth callback parameters.
    ///
    /// The state is consumed exactly once before anything else: a replayed,
    /// unknown, or expired state fails closed. The code is then exchanged for
    /// a bot token, and the installation is upserted keyed by workspace. On
    /// any exchange failure no credential is stored.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidState`], [`AuthError::MissingCode`],
    /// [`AuthError::ExchangeFailed`], or a database error.
    pub async fn complete_installation(
        &self,
        code: Option<&str>,
        state: Option<&str>,
    ) -> Result<(), AuthError> {
        let now = Utc::now();
        let cutoff = now - ChronoDuration::seconds(STATE_TTL_SECONDS);

        let state = state.ok_or(AuthError::InvalidState)?;
        if !store::consume_state(&self.db, state, cutoff).await? {
            warn!("oauth callback with invalid or replayed state");
            return Err(AuthError::InvalidState);
        }

        let code = match code {
            Some(c) if !c.is_empty() => c,
            _ => {
                warn!("oauth callback without authorization code");
                return Err(AuthError::MissingCode);
            }
        };

        let access = self
            .api
            .exchange_code(&self.client_id, &self.client_secret, code, &self.redirect_uri)
            .await
            .map_err(|e| {
                error!(error = %e, "oauth code exchange failed");
                AuthError::from(e)
            })?;

        let credential = Credential {
            team_id: access.team.id.clone(),
            bot_token: access.access_token,
            bot_user_id: access.bot_user_id,
            app_id: access.app_id,
            scopes: access
                .scope
                .as_deref()
                .unwrap_or_default()
                .split(',')
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect(),
            installed_at: now,
        };

        store::upsert_installation(&self.db, &credential).await?;
        info!(team_id = %credential.team_id, "workspace installation stored");
        Ok(())
    }
}

#[async_trait]
impl CredentialProvider for OauthManager {
    async fn get_credential(&self) -> Option<Credential> {
        match store::latest_installation(&self.db).await {
            Ok(found) => found,
            Err(e) => {
                error!(error = %e, "failed to read stored installation");
                None
            }
        }
    }
}
