//! Shared fixtures for integration tests: RSA keys, token signing and a
//! configuration pointing at a wiremock server.

#![allow(dead_code)]

use flareauth::{AuthConfig, EndpointsConfig};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde_json::{Value, json};
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const PRIMARY_KEY: &str = include_str!("../fixtures/primary.key.pem");
pub const PRIMARY_CERT: &str = include_str!("../fixtures/primary.cert.pem");
pub const SECONDARY_KEY: &str = include_str!("../fixtures/secondary.key.pem");
pub const SECONDARY_CERT: &str = include_str!("../fixtures/secondary.cert.pem");

pub const PROJECT_ID: &str = "demo-project";
pub const API_KEY: &str = "test-api-key";
pub const SERVICE_ACCOUNT: &str = "firebase-adminsdk@demo-project.iam.gserviceaccount.com";

pub const ID_TOKEN_KEYS_PATH: &str =
    "/robot/v1/metadata/x509/securetoken@system.gserviceaccount.com";
pub const SESSION_KEYS_PATH: &str = "/identitytoolkit/v3/relyingparty/publicKeys";

pub fn now() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

/// Configuration with every endpoint on `server`.
pub fn config_for(server: &MockServer) -> AuthConfig {
    let base = Url::parse(&format!("{}/", server.uri())).unwrap();
    AuthConfig::new(PROJECT_ID, API_KEY)
        .with_endpoints(EndpointsConfig::with_base(&base).unwrap())
        .with_allow_http(true)
        .with_service_account(SERVICE_ACCOUNT, PRIMARY_KEY)
}

pub fn id_token_claims(sub: &str, email: &str) -> Value {
    let now = now();
    json!({
        "iss": format!("https://securetoken.google.com/{PROJECT_ID}"),
        "aud": PROJECT_ID,
        "sub": sub,
        "user_id": sub,
        "auth_time": now - 30,
        "iat": now - 30,
        "exp": now + 3600,
        "email": email,
        "email_verified": false,
        "firebase": {
            "identities": { "email": [email] },
            "sign_in_provider": "password"
        }
    })
}

pub fn session_cookie_claims(sub: &str, email: &str) -> Value {
    let mut claims = id_token_claims(sub, email);
    claims["iss"] = json!(format!("https://session.firebase.google.com/{PROJECT_ID}"));
    claims["exp"] = json!(now() + 14 * 24 * 3600);
    claims
}

pub fn sign(claims: &Value, kid: &str, private_key: &str) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(kid.to_string());
    let key = EncodingKey::from_rsa_pem(private_key.as_bytes()).unwrap();
    encode(&header, claims, &key).unwrap()
}

/// `{kid: certificate}` body as published by the provider.
pub fn key_set_body(entries: &[(&str, &str)]) -> Value {
    let map = entries
        .iter()
        .map(|(kid, cert)| ((*kid).to_string(), json!(cert)))
        .collect::<serde_json::Map<_, _>>();
    Value::Object(map)
}

/// Serves the primary certificate as `kid` on `key_path`, expecting `calls`
/// requests.
pub async fn mount_keys(server: &MockServer, key_path: &str, kid: &str, calls: u64) {
    Mock::given(method("GET"))
        .and(path(key_path))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Cache-Control", "public, max-age=19302, must-revalidate")
                .set_body_json(key_set_body(&[(kid, PRIMARY_CERT)])),
        )
        .expect(calls)
        .mount(server)
        .await;
}

/// Serves a token endpoint that mints `access_token`, expecting `calls`
/// requests.
pub async fn mount_token_endpoint(
    server: &MockServer,
    access_token: &str,
    expires_in: u64,
    calls: u64,
) {
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": access_token,
            "expires_in": expires_in,
            "token_type": "Bearer"
        })))
        .expect(calls)
        .mount(server)
        .await;
}
