//! Tests for `src/oauth/` — state single-use, expiry, and the installation
//! exchange.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use herald::oauth::{AuthError, CredentialProvider, OauthManager, DEFAULT_SCOPES};
use herald::slack::{ChatApi, OAuthAccessResponse, SlackApiError, TeamInfo};

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

/// Scripted `oauth.v2.access` endpoint.
#[derive(Default)]
struct FakeExchange {
    fail_with: Mutex<Option<&'static str>>,
    codes_seen: Mutex<Vec<String>>,
}

#[async_trait]
impl ChatApi for FakeExchange {
    async fn post_message(
        &self,
        _token: &str,
        _channel: &str,
        _text: &str,
    ) -> Result<(), SlackApiError> {
        unimplemented!("not used by oauth tests")
    }

    async fn exchange_code(
        &self,
        _client_id: &str,
        _client_secret: &str,
        code: &str,
        _redirect_uri: &str,
    ) -> Result<OAuthAccessResponse, SlackApiError> {
        self.codes_seen.lock().unwrap().push(code.to_owned());
        if let Some(error) = *self.fail_with.lock().unwrap() {
            return Err(SlackApiError::Api(error.to_owned()));
        }
        Ok(OAuthAccessResponse {
            access_token: "xoxb-installed".to_owned(),
            team: TeamInfo {
                id: "T012345".to_owned(),
                name: Some("Test Workspace".to_owned()),
            },
            bot_user_id: Some("U0BOT".to_owned()),
            app_id: Some("A0APP".to_owned()),
            scope: Some("chat:write,channels:read".to_owned()),
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn memory_pool() -> SqlitePool {
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("open in-memory sqlite")
}

async fn manager(pool: SqlitePool, api: Arc<FakeExchange>) -> OauthManager {
    OauthManager::new(
        pool,
        api,
        "client-id".to_owned(),
        "client-secret".to_owned(),
        "https://herald.test/oauth-callback".to_owned(),
    )
    .await
    .expect("create oauth manager")
}

/// Backdate a stored state so it reads as expired.
async fn expire_state(pool: &SqlitePool, state: &str) {
    sqlx::query("UPDATE oauth_states SET issued_at = '2000-01-01T00:00:00.000000Z' WHERE state = ?1")
        .bind(state)
        .execute(pool)
        .await
        .expect("backdate state");
}

// ---------------------------------------------------------------------------
// Authorization URL
// ---------------------------------------------------------------------------

#[tokio::test]
async fn authorize_url_embeds_client_scopes_state_and_redirect() {
    let pool = memory_pool().await;
    let manager = manager(pool, Arc::new(FakeExchange::default())).await;

    let (url, state) = manager.authorize_url(DEFAULT_SCOPES).await.unwrap();

    assert_eq!(url.host_str(), Some("slack.com"));
    assert_eq!(url.path(), "/oauth/v2/authorize");
    let query: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    assert!(query.contains(&("client_id".to_owned(), "client-id".to_owned())));
    assert!(query.contains(&(
        "scope".to_owned(),
        "chat:write,channels:read,groups:read".to_owned()
    )));
    assert!(query.contains(&("state".to_owned(), state.clone())));
    assert!(query.contains(&(
        "redirect_uri".to_owned(),
        "https://herald.test/oauth-callback".to_owned()
    )));
    assert_eq!(state.len(), 32);
}

#[tokio::test]
async fn each_authorization_issues_a_distinct_state() {
    let pool = memory_pool().await;
    let manager = manager(pool, Arc::new(FakeExchange::default())).await;

    let (_, first) = manager.authorize_url(DEFAULT_SCOPES).await.unwrap();
    let (_, second) = manager.authorize_url(DEFAULT_SCOPES).await.unwrap();
    assert_ne!(first, second);
}

// ---------------------------------------------------------------------------
// Installation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn state_is_consumed_exactly_once() {
    let pool = memory_pool().await;
    let api = Arc::new(FakeExchange::default());
    let manager = manager(pool, api).await;
    let (_, state) = manager.authorize_url(DEFAULT_SCOPES).await.unwrap();

    manager
        .complete_installation(Some("code-1"), Some(&state))
        .await
        .unwrap();

    // Replay fails closed.
    let replay = manager
        .complete_installation(Some("code-2"), Some(&state))
        .await;
    assert!(matches!(replay, Err(AuthError::InvalidState)));
}

#[tokio::test]
async fn unknown_state_is_rejected() {
    let pool = memory_pool().await;
    let manager = manager(pool, Arc::new(FakeExchange::default())).await;

    let result = manager
        .complete_installation(Some("code"), Some("never-issued"))
        .await;
    assert!(matches!(result, Err(AuthError::InvalidState)));
}

#[tokio::test]
async fn expired_state_behaves_like_an_unknown_one() {
    let pool = memory_pool().await;
    let api = Arc::new(FakeExchange::default());
    let manager = manager(pool.clone(), api.clone()).await;
    let (_, state) = manager.authorize_url(DEFAULT_SCOPES).await.unwrap();
    expire_state(&pool, &state).await;

    let result = manager
        .complete_installation(Some("code"), Some(&state))
        .await;
    assert!(matches!(result, Err(AuthError::InvalidState)));
    assert!(api.codes_seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn missing_code_is_rejected_after_state_consumption() {
    let pool = memory_pool().await;
    let manager = manager(pool, Arc::new(FakeExchange::default())).await;
    let (_, state) = manager.authorize_url(DEFAULT_SCOPES).await.unwrap();

    let result = manager.complete_installation(None, Some(&state)).await;
    assert!(matches!(result, Err(AuthError::MissingCode)));

    // The state went with it: retrying with a code still fails.
    let retry = manager
        .complete_installation(Some("code"), Some(&state))
        .await;
    assert!(matches!(retry, Err(AuthError::InvalidState)));
}

#[tokio::test]
async fn successful_install_stores_the_credential() {
    let pool = memory_pool().await;
    let api = Arc::new(FakeExchange::default());
    let manager = manager(pool, api).await;
    let (_, state) = manager.authorize_url(DEFAULT_SCOPES).await.unwrap();

    manager
        .complete_installation(Some("the-code"), Some(&state))
        .await
        .unwrap();

    let credential = manager.get_credential().await.expect("credential stored");
    assert_eq!(credential.team_id, "T012345");
    assert_eq!(credential.bot_token, "xoxb-installed");
    assert_eq!(
        credential.scopes,
        vec!["chat:write".to_owned(), "channels:read".to_owned()]
    );
}

#[tokio::test]
async fn failed_exchange_stores_nothing() {
    let pool = memory_pool().await;
    let api = Arc::new(FakeExchange::default());
    *api.fail_with.lock().unwrap() = Some("invalid_code");
    let manager = manager(pool, api).await;
    let (_, state) = manager.authorize_url(DEFAULT_SCOPES).await.unwrap();

    let result = manager
        .complete_installation(Some("bad-code"), Some(&state))
        .await;

    assert!(matches!(result, Err(AuthError::ExchangeFailed(_))));
    assert!(manager.get_credential().await.is_none());
}

#[tokio::test]
async fn reinstall_replaces_the_stored_credential() {
    let pool = memory_pool().await;
    let api = Arc::new(FakeExchange::default());
    let manager = manager(pool.clone(), api).await;

    let (_, state) = manager.authorize_url(DEFAULT_SCOPES).await.unwrap();
    manager
        .complete_installation(Some("first"), Some(&state))
        .await
        .unwrap();

    let (_, state) = manager.authorize_url(DEFAULT_SCOPES).await.unwrap();
    manager
        .complete_installation(Some("second"), Some(&state))
        .await
        .unwrap();

    // Same team id: the row was replaced, not versioned.
    let credential = manager.get_credential().await.expect("credential stored");
    assert_eq!(credential.team_id, "T012345");

    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM installations")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count.0, 1);
}
