//! Thin HTTP surface: health probe and the OAuth installation endpoints.
//!
//! - `GET /health` — fixed ok payload, liveness probing only.
//! - `GET /auth` — 302 to the platform authorization URL.
//! - `GET /auth-url` — the authorization URL as JSON for frontends that
//!   prefer their own redirect.
//! - `GET /oauth-callback?code&state` — completes the installation, then
//!   redirects to a success or error page. No structured error detail
//!   reaches the browser; operators read the logs.
//!
//! The message CRUD API and admin UI live outside this service.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Redirect};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{error, info};

use crate::oauth::{OauthManager, DEFAULT_SCOPES};

/// Shared state for the HTTP surface.
#[derive(Clone)]
pub struct AppState {
    /// OAuth flow manager; `None` in bot-token-only deployments, where the
    /// auth endpoints answer 404.
    pub oauth: Option<Arc<OauthManager>>,
}

/// Query parameters Slack appends to the OAuth callback.
#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    /// Authorization code to exchange.
    pub code: Option<String>,
    /// Anti-CSRF state issued at authorization time.
    pub state: Option<String>,
}

/// Build the router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/auth", get(auth_redirect))
        .route("/auth-url", get(auth_url))
        .route("/oauth-callback", get(oauth_callback))
        .route("/auth/success", get(auth_success))
        .route("/auth/error", get(auth_error))
        .with_state(state)
}

/// Bind and serve until `shutdown` fires.
///
/// # Errors
///
/// Returns an error if the listener cannot bind or the server fails.
pub async fn serve(
    addr: std::net::SocketAddr,
    state: AppState,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "http surface listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await?;
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn auth_redirect(State(state): State<AppState>) -> axum::response::Response {
    let Some(oauth) = state.oauth else {
        return not_configured();
    };
    match oauth.authorize_url(DEFAULT_SCOPES).await {
        Ok((url, _state)) => Redirect::temporary(url.as_str()).into_response(),
        Err(e) => {
            error!(error = %e, "failed to build authorization url");
            Redirect::temporary("/auth/error").into_response()
        }
    }
}

async fn auth_url(State(state): State<AppState>) -> axum::response::Response {
    let Some(oauth) = state.oauth else {
        return not_configured();
    };
    match oauth.authorize_url(DEFAULT_SCOPES).await {
        Ok((url, _state)) => Json(serde_json::json!({ "url": url.as_str() })).into_response(),
        Err(e) => {
            error!(error = %e, "failed to build authorization url");
            (
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "authorization_unavailable" })),
            )
                .into_response()
        }
    }
}

async fn oauth_callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> axum::response::Response {
    let Some(oauth) = state.oauth else {
        return not_configured();
    };
    match oauth
        .complete_installation(params.code.as_deref(), params.state.as_deref())
        .await
    {
        Ok(()) => Redirect::temporary("/auth/success").into_response(),
        Err(e) => {
            error!(error = %e, "oauth installation failed");
            Redirect::temporary("/auth/error").into_response()
        }
    }
}

async fn auth_success() -> &'static str {
    "Workspace installed. You can close this page."
}

async fn auth_error() -> &'static str {
    "Installation failed. Check the service logs and try again."
}

fn not_configured() -> axum::response::Response {
    (
        axum::http::StatusCode::NOT_FOUND,
        "oauth is not configured for this deployment",
    )
        .into_response()
}
