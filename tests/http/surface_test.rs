//! Tests for `src/http/mod.rs` — the health probe and OAuth endpoints,
//! exercised over a real listener on an ephemeral port.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;

use herald::http::{router, AppState};
use herald::oauth::OauthManager;
use herald::slack::{ChatApi, OAuthAccessResponse, SlackApiError, TeamInfo};

/// Exchange stub that always succeeds.
struct OkExchange;

#[async_trait]
impl ChatApi for OkExchange {
    async fn post_message(
        &self,
        _token: &str,
        _channel: &str,
        _text: &str,
    ) -> Result<(), SlackApiError> {
        Ok(())
    }

    async fn exchange_code(
        &self,
        _client_id: &str,
        _client_secret: &str,
        _code: &str,
        _redirect_uri: &str,
    ) -> Result<OAuthAccessResponse, SlackApiError> {
        Ok(OAuthAccessResponse {
            access_token: "xoxb-installed".to_owned(),
            team: TeamInfo {
                id: "T012345".to_owned(),
                name: None,
            },
            bot_user_id: None,
            app_id: None,
            scope: None,
        })
    }
}

async fn spawn_surface(state: AppState) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.expect("serve");
    });
    format!("http://{addr}")
}

async fn oauth_state() -> AppState {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("open in-memory sqlite");
    let manager = OauthManager::new(
        pool,
        Arc::new(OkExchange),
        "client-id".to_owned(),
        "client-secret".to_owned(),
        "https://herald.test/oauth-callback".to_owned(),
    )
    .await
    .expect("create oauth manager");
    AppState {
        oauth: Some(Arc::new(manager)),
    }
}

fn no_redirect_client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .expect("build client")
}

#[tokio::test]
async fn health_returns_fixed_ok_payload() {
    let base = spawn_surface(AppState { oauth: None }).await;

    let body: serde_json::Value = reqwest::get(format!("{base}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body, serde_json::json!({ "status": "ok" }));
}

#[tokio::test]
async fn auth_redirects_to_the_platform_authorize_url() {
    let base = spawn_surface(oauth_state().await).await;

    let response = no_redirect_client()
        .get(format!("{base}/auth"))
        .send()
        .await
        .unwrap();

    assert!(response.status().is_redirection());
    let location = response
        .headers()
        .get("location")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    assert!(location.starts_with("https://slack.com/oauth/v2/authorize"));
    assert!(location.contains("state="));
}

#[tokio::test]
async fn auth_url_returns_the_url_as_json() {
    let base = spawn_surface(oauth_state().await).await;

    let body: serde_json::Value = reqwest::get(format!("{base}/auth-url"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let url = body["url"].as_str().unwrap_or_default();
    assert!(url.starts_with("https://slack.com/oauth/v2/authorize"));
}

#[tokio::test]
async fn callback_with_bad_state_redirects_to_the_error_page() {
    let base = spawn_surface(oauth_state().await).await;

    let response = no_redirect_client()
        .get(format!("{base}/oauth-callback?code=x&state=bogus"))
        .send()
        .await
        .unwrap();

    assert!(response.status().is_redirection());
    let location = response
        .headers()
        .get("location")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    assert_eq!(location, "/auth/error");
}

#[tokio::test]
async fn callback_with_issued_state_completes_and_redirects_to_success() {
    let base = spawn_surface(oauth_state().await).await;

    // Obtain a real state by asking for the authorization URL.
    let body: serde_json::Value = reqwest::get(format!("{base}/auth-url"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let auth_url = url::Url::parse(body["url"].as_str().unwrap()).unwrap();
    let state = auth_url
        .query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
        .expect("state param present");

    let response = no_redirect_client()
        .get(format!("{base}/oauth-callback?code=ok&state={state}"))
        .send()
        .await
        .unwrap();

    assert!(response.status().is_redirection());
    let location = response
        .headers()
        .get("location")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    assert_eq!(location, "/auth/success");
}

#[tokio::test]
async fn auth_endpoints_answer_404_without_oauth_config() {
    let base = spawn_surface(AppState { oauth: None }).await;

    let response = reqwest::get(format!("{base}/auth-url")).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}
