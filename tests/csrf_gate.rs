//! End-to-end checks of the CSRF gate over real HTTP.

use reqwest::header::{COOKIE, SET_COOKIE};
use reqwest::StatusCode;
use serde_json::{json, Value};

use portal_client::{PortalClient, TokenCacheConfig, TokenChannel};
use portal_guard::config::GuardConfig;
use portal_guard::security::generate_token;

mod common;

#[tokio::test]
async fn test_post_without_tokens_is_missing() {
    let gate = common::spawn_gate(GuardConfig::default()).await;

    let resp = reqwest::Client::new()
        .post(gate.url("/api/students"))
        .json(&json!({"name": "Ada"}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    // A fresh token is issued so the next attempt can succeed.
    assert!(resp.headers().contains_key(SET_COOKIE));
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "CSRF_MISSING");
    assert!(body["message"].as_str().is_some());
}

#[tokio::test]
async fn test_post_with_mismatched_tokens() {
    let gate = common::spawn_gate(GuardConfig::default()).await;

    let resp = reqwest::Client::new()
        .post(gate.url("/api/students"))
        .header(COOKIE, "csrf-token=abc123")
        .header("x-csrf-token", "abc124")
        .json(&json!({"name": "Ada"}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "CSRF_MISMATCH");
}

#[tokio::test]
async fn test_post_with_matching_tokens_reaches_handler() {
    let gate = common::spawn_gate(GuardConfig::default()).await;
    let token = generate_token();
    assert_eq!(token.len(), 64);

    let resp = reqwest::Client::new()
        .post(gate.url("/api/students"))
        .header(COOKIE, format!("csrf-token={token}"))
        .header("x-csrf-token", &token)
        .json(&json!({"name": "Ada"}))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    // The existing cookie is reused, not rotated.
    assert!(!resp.headers().contains_key(SET_COOKIE));
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["created"]["name"], "Ada");
    assert_eq!(body["tokenLength"], 64);
}

#[tokio::test]
async fn test_health_check_exempt_without_tokens() {
    let gate = common::spawn_gate(GuardConfig::default()).await;
    let client = reqwest::Client::new();

    let resp = client.get(gate.url("/health")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    // Allow-listed even for mutating methods.
    let resp = client.post(gate.url("/health")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_safe_methods_pass_without_tokens() {
    let gate = common::spawn_gate(GuardConfig::default()).await;

    let resp = reqwest::Client::new()
        .get(gate.url("/api/students"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_token_endpoint_round_trip() {
    let gate = common::spawn_gate(GuardConfig::default()).await;
    let client = reqwest::Client::builder().cookie_store(true).build().unwrap();

    let resp = client.get(gate.url("/api/csrf-token")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let token = resp.json::<Value>().await.unwrap()["token"]
        .as_str()
        .unwrap()
        .to_string();

    // The same token is returned while the cookie is held.
    let again = client.get(gate.url("/api/csrf-token")).send().await.unwrap();
    assert_eq!(again.json::<Value>().await.unwrap()["token"], token.as_str());

    let resp = client
        .delete(gate.url("/api/students/7"))
        .header("x-csrf-token", &token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_portal_client_attaches_token() {
    let gate = common::spawn_gate(GuardConfig::default()).await;
    let client = PortalClient::new(&gate.base_url()).unwrap();

    let created: Value = client
        .post_json("/api/students", &json!({"name": "Grace"}))
        .await
        .unwrap();
    assert_eq!(created["created"]["name"], "Grace");

    client.delete("/api/students/1").await.unwrap();
    assert!(client.tokens().cached().is_some());
}

#[tokio::test]
async fn test_portal_client_recovers_from_stale_token() {
    let gate = common::spawn_gate(GuardConfig::default()).await;
    let channel = TokenChannel::new();
    let client =
        PortalClient::with_channel(&gate.base_url(), channel.clone(), TokenCacheConfig::default())
            .unwrap();

    client.delete("/api/students/1").await.unwrap();

    // A token that no longer matches the cookie is rejected once, then
    // replaced by a fresh fetch.
    channel.publish(&generate_token(), uuid::Uuid::new_v4());
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    client.delete("/api/students/2").await.unwrap();
}

#[tokio::test]
async fn test_clients_on_one_channel_share_a_token() {
    let gate = common::spawn_gate(GuardConfig::default()).await;
    let channel = TokenChannel::new();
    let http = reqwest::Client::builder().cookie_store(true).build().unwrap();
    let first = PortalClient::with_http_client(
        http.clone(),
        &gate.base_url(),
        channel.clone(),
        TokenCacheConfig::default(),
    );
    let second =
        PortalClient::with_http_client(http, &gate.base_url(), channel, TokenCacheConfig::default());

    first.delete("/api/students/1").await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let shared = first.tokens().cached();
    assert!(shared.is_some());
    assert_eq!(second.tokens().cached(), shared);

    // The adopted token is accepted without a fetch of its own.
    second.delete("/api/students/2").await.unwrap();
    assert_eq!(second.tokens().cached(), shared);
}

#[tokio::test]
async fn test_channel_clients_share_cookie_and_token() {
    let gate = common::spawn_gate(GuardConfig::default()).await;
    let channel = TokenChannel::new();
    let first =
        PortalClient::with_channel(&gate.base_url(), channel.clone(), TokenCacheConfig::default())
            .unwrap();
    let second =
        PortalClient::with_channel(&gate.base_url(), channel, TokenCacheConfig::default())
            .unwrap();

    first.delete("/api/students/1").await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    let shared = first.tokens().cached();
    assert!(shared.is_some());
    assert_eq!(second.tokens().cached(), shared);

    // The adopted token matches the shared cookie: no rejection, no refetch,
    // and nothing is broadcast back to overwrite the first client's cache.
    second.delete("/api/students/2").await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert_eq!(second.tokens().cached(), shared);
    assert_eq!(first.tokens().cached(), shared);

    first.delete("/api/students/3").await.unwrap();
    assert_eq!(first.tokens().cached(), shared);
}
