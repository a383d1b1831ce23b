//! Integration tests for the sign-in, lookup and session cookie flows.

mod common;

use std::time::Duration;

use common::*;
use flareauth::{AuthError, AuthFacade, DEFAULT_SESSION_DURATION};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const EMAIL: &str = "ada@example.com";
const PASSWORD: &str = "correct horse battery staple";

async fn mount_sign_in(server: &MockServer, id_token: &str, calls: u64) {
    Mock::given(method("POST"))
        .and(path("/v1/accounts:signInWithPassword"))
        .and(query_param("key", API_KEY))
        .and(body_partial_json(json!({
            "email": EMAIL,
            "password": PASSWORD,
            "returnSecureToken": true
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "kind": "identitytoolkit#VerifyPasswordResponse",
            "localId": "uid-1",
            "email": EMAIL,
            "displayName": "Ada",
            "idToken": id_token,
            "registered": true,
            "refreshToken": "refresh-token",
            "expiresIn": "3600"
        })))
        .expect(calls)
        .mount(server)
        .await;
}

async fn mount_lookup(server: &MockServer, id_token: &str, users: serde_json::Value, calls: u64) {
    Mock::given(method("POST"))
        .and(path("/v1/accounts:lookup"))
        .and(query_param("key", API_KEY))
        .and(body_partial_json(json!({ "idToken": id_token })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "kind": "identitytoolkit#GetAccountInfoResponse",
            "users": users
        })))
        .expect(calls)
        .mount(server)
        .await;
}

fn ada() -> serde_json::Value {
    json!([{
        "localId": "uid-1",
        "email": EMAIL,
        "emailVerified": false,
        "displayName": "Ada",
        "providerUserInfo": [{
            "providerId": "password",
            "federatedId": EMAIL,
            "email": EMAIL,
            "rawId": EMAIL
        }],
        "passwordUpdatedAt": 1_700_000_000_000_i64,
        "validSince": "1700000000",
        "lastLoginAt": "1700000000000",
        "createdAt": "1690000000000"
    }])
}

async fn mount_create_cookie(server: &MockServer, id_token: &str, cookie: &str, calls: u64) {
    Mock::given(method("POST"))
        .and(path(format!(
            "/v1/projects/{PROJECT_ID}:createSessionCookie"
        )))
        .and(header("authorization", "Bearer ya29.admin"))
        .and(body_partial_json(json!({ "idToken": id_token })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sessionCookie": cookie
        })))
        .expect(calls)
        .mount(server)
        .await;
}

fn id_token() -> String {
    sign(&id_token_claims("uid-1", EMAIL), "primary", PRIMARY_KEY)
}

#[tokio::test]
async fn test_sign_in_returns_token_for_input_email() {
    let server = MockServer::start().await;
    let id_token = id_token();
    mount_sign_in(&server, &id_token, 1).await;
    mount_lookup(&server, &id_token, ada(), 1).await;

    let auth = AuthFacade::new(config_for(&server)).unwrap();
    let result = auth
        .sign_in_with_email_and_password(EMAIL, PASSWORD)
        .await
        .unwrap();

    assert_eq!(result.token.email, EMAIL);
    assert_eq!(result.token.id_token, id_token);
    assert_eq!(result.token.expires_in_secs(), Some(3600));
    assert_eq!(result.user.local_id, "uid-1");
    assert_eq!(result.user.email.as_deref(), Some(EMAIL));
    assert_eq!(result.user.provider_user_info[0].provider_id, "password");
}

#[tokio::test]
async fn test_signed_in_id_token_verifies() {
    let server = MockServer::start().await;
    let id_token = id_token();
    mount_sign_in(&server, &id_token, 1).await;
    mount_lookup(&server, &id_token, ada(), 1).await;
    mount_keys(&server, ID_TOKEN_KEYS_PATH, "primary", 1).await;

    let auth = AuthFacade::new(config_for(&server)).unwrap();
    let result = auth
        .sign_in_with_email_and_password(EMAIL, PASSWORD)
        .await
        .unwrap();

    let decoded = auth.verify_id_token(&result.token.id_token).await.unwrap();
    assert_eq!(decoded.email(), Some(EMAIL));
    assert_eq!(decoded.uid(), result.user.local_id);
}

#[tokio::test]
async fn test_wrong_password_surfaces_provider_code() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/accounts:signInWithPassword"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {
                "code": 400,
                "message": "INVALID_PASSWORD",
                "errors": [{ "message": "INVALID_PASSWORD", "domain": "global", "reason": "invalid" }]
            }
        })))
        .expect(1)
        .mount(&server)
        .await;
    mount_lookup(&server, "unused", ada(), 0).await;

    let auth = AuthFacade::new(config_for(&server)).unwrap();
    let err = auth
        .sign_in_with_email_and_password(EMAIL, "wrong")
        .await
        .unwrap_err();

    match err {
        AuthError::UpstreamUnavailable {
            endpoint,
            status,
            message,
        } => {
            assert_eq!(status, Some(400));
            assert_eq!(message, "INVALID_PASSWORD");
            assert!(!endpoint.contains(API_KEY));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_sign_in_fails_atomically_when_lookup_fails() {
    let server = MockServer::start().await;
    let id_token = id_token();
    mount_sign_in(&server, &id_token, 1).await;
    Mock::given(method("POST"))
        .and(path("/v1/accounts:lookup"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let auth = AuthFacade::new(config_for(&server)).unwrap();
    let err = auth
        .sign_in_with_email_and_password(EMAIL, PASSWORD)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AuthError::UpstreamUnavailable {
            status: Some(500),
            ..
        }
    ));
}

#[tokio::test]
async fn test_toolkit_base_without_trailing_slash_is_rejected() {
    let server = MockServer::start().await;
    let mut config = config_for(&server);
    config.endpoints.identity_toolkit = format!("{}/v1", server.uri()).parse().unwrap();

    let err = AuthFacade::new(config).err().unwrap();
    assert!(matches!(err, AuthError::Configuration { .. }));
}

#[tokio::test]
async fn test_lookup_without_users_is_not_found() {
    let server = MockServer::start().await;
    mount_lookup(&server, "orphan-token", json!([]), 1).await;

    let auth = AuthFacade::new(config_for(&server)).unwrap();
    let err = auth.lookup_user("orphan-token").await.unwrap_err();
    assert!(matches!(err, AuthError::UserNotFound));
}

#[tokio::test]
async fn test_create_and_verify_session_cookie() {
    let server = MockServer::start().await;
    let id_token = id_token();
    let cookie = sign(&session_cookie_claims("uid-1", EMAIL), "cookie-key", PRIMARY_KEY);

    mount_token_endpoint(&server, "ya29.admin", 3600, 1).await;
    mount_create_cookie(&server, &id_token, &cookie, 2).await;
    mount_keys(&server, SESSION_KEYS_PATH, "cookie-key", 1).await;

    let auth = AuthFacade::new(config_for(&server)).unwrap();

    let minted = auth
        .create_session_cookie(&id_token, DEFAULT_SESSION_DURATION)
        .await
        .unwrap();
    assert_eq!(minted, cookie);

    // The admin bearer token is reused for the second cookie
    auth.create_session_cookie(&id_token, Duration::from_secs(3600))
        .await
        .unwrap();

    let decoded = auth.verify_session_cookie(&minted).await.unwrap();
    assert_eq!(decoded.uid(), "uid-1");
    assert_eq!(decoded.email(), Some(EMAIL));
}

#[tokio::test]
async fn test_session_cookie_duration_is_sent_in_seconds() {
    let server = MockServer::start().await;
    let id_token = id_token();

    mount_token_endpoint(&server, "ya29.admin", 3600, 1).await;
    Mock::given(method("POST"))
        .and(path(format!(
            "/v1/projects/{PROJECT_ID}:createSessionCookie"
        )))
        .and(body_partial_json(json!({ "validDuration": "1209600" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sessionCookie": "cookie"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let auth = AuthFacade::new(config_for(&server)).unwrap();
    auth.create_session_cookie(&id_token, DEFAULT_SESSION_DURATION)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_short_session_cookie_rejected_before_any_call() {
    let server = MockServer::start().await;
    let id_token = id_token();
    mount_token_endpoint(&server, "ya29.admin", 3600, 0).await;
    mount_create_cookie(&server, &id_token, "never", 0).await;

    let auth = AuthFacade::new(config_for(&server)).unwrap();
    let err = auth
        .create_session_cookie(&id_token, Duration::from_secs(100))
        .await
        .unwrap_err();

    assert!(matches!(err, AuthError::InvalidExpiry { seconds: 100 }));
}

#[tokio::test]
async fn test_long_session_cookie_rejected_before_any_call() {
    let server = MockServer::start().await;
    let id_token = id_token();
    mount_token_endpoint(&server, "ya29.admin", 3600, 0).await;
    mount_create_cookie(&server, &id_token, "never", 0).await;

    let auth = AuthFacade::new(config_for(&server)).unwrap();
    let err = auth
        .create_session_cookie(&id_token, Duration::from_secs(15 * 24 * 3600))
        .await
        .unwrap_err();

    assert!(matches!(err, AuthError::InvalidExpiry { .. }));
}

#[tokio::test]
async fn test_failed_mint_aborts_cookie_creation() {
    let server = MockServer::start().await;
    let id_token = id_token();
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
        .expect(1)
        .mount(&server)
        .await;
    mount_create_cookie(&server, &id_token, "never", 0).await;

    let auth = AuthFacade::new(config_for(&server)).unwrap();
    let err = auth
        .create_session_cookie(&id_token, DEFAULT_SESSION_DURATION)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AuthError::CredentialExchangeFailed { status: 401, .. }
    ));
}
