//! Tests for `src/delivery/mod.rs` — channel normalization, credential
//! handling, and error wrapping.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use herald::delivery::{normalize_channel, DeliveryClient, DeliveryError, SlackDelivery};
use herald::oauth::{Credential, CredentialProvider, StaticCredentialProvider};
use herald::slack::{ChatApi, OAuthAccessResponse, SlackApiError};

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

/// Records `post_message` calls; optionally fails them.
#[derive(Default)]
struct RecordingApi {
    calls: Mutex<Vec<(String, String, String)>>,
    fail_with: Mutex<Option<&'static str>>,
}

#[async_trait]
impl ChatApi for RecordingApi {
    async fn post_message(
        &self,
        token: &str,
        channel: &str,
        text: &str,
    ) -> Result<(), SlackApiError> {
        self.calls
            .lock()
            .unwrap()
            .push((token.to_owned(), channel.to_owned(), text.to_owned()));
        match *self.fail_with.lock().unwrap() {
            Some(code) => Err(SlackApiError::Api(code.to_owned())),
            None => Ok(()),
        }
    }

    async fn exchange_code(
        &self,
        _client_id: &str,
        _client_secret: &str,
        _code: &str,
        _redirect_uri: &str,
    ) -> Result<OAuthAccessResponse, SlackApiError> {
        unimplemented!("not used by delivery tests")
    }
}

/// A provider with no stored workspace.
struct EmptyProvider;

#[async_trait]
impl CredentialProvider for EmptyProvider {
    async fn get_credential(&self) -> Option<Credential> {
        None
    }
}

// ---------------------------------------------------------------------------
// Channel normalization
// ---------------------------------------------------------------------------

#[test]
fn bare_name_gets_hash_prefix() {
    assert_eq!(normalize_channel("general"), "#general");
}

#[test]
fn channel_id_passes_through() {
    assert_eq!(normalize_channel("C0123456"), "C0123456");
}

#[test]
fn user_and_dm_ids_pass_through() {
    assert_eq!(normalize_channel("U04AB12CD"), "U04AB12CD");
    assert_eq!(normalize_channel("D04AB12CD"), "D04AB12CD");
    assert_eq!(normalize_channel("W04AB12CD"), "W04AB12CD");
}

#[test]
fn already_prefixed_references_pass_through() {
    assert_eq!(normalize_channel("#general"), "#general");
    assert_eq!(normalize_channel("@alex"), "@alex");
}

#[test]
fn name_starting_with_id_letter_is_still_a_name() {
    // "General" starts with G but is not all caps+digits after it.
    assert_eq!(normalize_channel("General"), "#General");
    assert_eq!(normalize_channel("updates"), "#updates");
}

// ---------------------------------------------------------------------------
// Send path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn send_uses_credential_and_normalized_channel() {
    let api = Arc::new(RecordingApi::default());
    let provider = Arc::new(StaticCredentialProvider::from_token("xoxb-test".to_owned()));
    let delivery = SlackDelivery::new(api.clone(), provider);

    delivery.send("release at noon", "general").await.unwrap();

    let calls = api.calls.lock().unwrap().clone();
    assert_eq!(calls.len(), 1);
    let (token, channel, text) = &calls[0];
    assert_eq!(token, "xoxb-test");
    assert_eq!(channel, "#general");
    assert_eq!(text, "release at noon");
}

#[tokio::test]
async fn missing_credential_fails_without_a_network_call() {
    let api = Arc::new(RecordingApi::default());
    let delivery = SlackDelivery::new(api.clone(), Arc::new(EmptyProvider));

    let result = delivery.send("hello", "general").await;

    assert!(matches!(result, Err(DeliveryError::NoCredential)));
    assert!(api.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn platform_rejection_is_wrapped_with_its_error_code() {
    let api = Arc::new(RecordingApi::default());
    *api.fail_with.lock().unwrap() = Some("channel_not_found");
    let provider = Arc::new(StaticCredentialProvider::from_token("xoxb-test".to_owned()));
    let delivery = SlackDelivery::new(api, provider);

    let result = delivery.send("hello", "nowhere").await;

    match result {
        Err(DeliveryError::Platform(code)) => assert_eq!(code, "channel_not_found"),
        other => panic!("expected platform error, got {other:?}"),
    }
}
