//! Service credentials: OAuth2 bearer tokens minted from a service account.
//!
//! The service account signs a short JWT assertion (RFC 7523) and exchanges
//! it at the token endpoint for a ~1 hour access token. Tokens are cached per
//! (service account, scope) pair so repeated admin calls reuse one token.
//!
//! Concurrent cache misses may mint duplicate tokens; the provider treats
//! that as harmless.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::cache::{self, CredentialCache};
use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::{AuthResult, unix_now};

/// Grant type for the JWT bearer assertion exchange.
pub const JWT_BEARER_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Cache key prefix for stored credentials.
pub const CREDENTIAL_CACHE_PREFIX: &str = "oauth2-token:";

/// Lifetime of a signed assertion.
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// Lifetime assumed when the token endpoint omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;

/// A minted bearer token.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceCredential {
    /// Opaque bearer token.
    pub access_token: String,
    /// Mint time, unix seconds.
    #[serde(default)]
    pub issued_at: i64,
    /// Expiry, unix seconds.
    pub expires_at: i64,
}

impl ServiceCredential {
    /// Seconds until expiry; negative once expired.
    pub fn expires_in(&self) -> i64 {
        self.expires_at - unix_now()
    }

    /// Returns `true` if the token stays valid for more than `margin`.
    ///
    /// The margin is capped at half the granted lifetime, so a token granted
    /// for less than the margin is still reused for part of its TTL.
    pub fn is_fresh(&self, margin: Duration) -> bool {
        let margin = i64::try_from(margin.as_secs()).unwrap_or(i64::MAX);
        let lifetime = self.expires_at.saturating_sub(self.issued_at);
        self.expires_in() > margin.min(lifetime / 2)
    }
}

impl fmt::Debug for ServiceCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceCredential")
            .field("access_token", &"[REDACTED]")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Claims of the signed assertion sent to the token endpoint.
#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

/// Successful token endpoint response.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    DEFAULT_EXPIRES_IN_SECS
}

/// Mints and caches service credentials for one service account.
pub struct ServiceCredentialProvider {
    http_client: reqwest::Client,
    cache: Arc<dyn CredentialCache>,
    token_uri: Url,
    client_email: String,
    signing_key: EncodingKey,
    default_scope: String,
    refresh_margin: Duration,
}

impl ServiceCredentialProvider {
    /// Creates a provider for the service account `client_email`.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if `private_key_pem` is not an RSA private key.
    pub fn new(
        http_client: reqwest::Client,
        cache: Arc<dyn CredentialCache>,
        token_uri: Url,
        client_email: impl Into<String>,
        private_key_pem: &str,
        default_scope: impl Into<String>,
    ) -> AuthResult<Self> {
        let signing_key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes()).map_err(|e| {
            AuthError::configuration(format!("invalid service account private key: {e}"))
        })?;

        Ok(Self {
            http_client,
            cache,
            token_uri,
            client_email: client_email.into(),
            signing_key,
            default_scope: default_scope.into(),
            refresh_margin: Duration::from_secs(60),
        })
    }

    /// Creates a provider from the service account section of `config`.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if no service account is configured or its key
    /// is invalid.
    pub fn from_config(
        config: &AuthConfig,
        http_client: reqwest::Client,
        cache: Arc<dyn CredentialCache>,
    ) -> AuthResult<Self> {
        let account = &config.service_account;
        if account.email.is_empty() || account.private_key.is_empty() {
            return Err(AuthError::configuration("service account is not configured"));
        }

        Ok(Self::new(
            http_client,
            cache,
            config.endpoints.token_uri.clone(),
            &account.email,
            &account.private_key_pem(),
            &account.scope,
        )?
        .with_refresh_margin(config.credentials.refresh_margin))
    }

    /// Sets how close to expiry a cached credential is re-minted.
    #[must_use]
    pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin = margin;
        self
    }

    /// The service account email.
    pub fn client_email(&self) -> &str {
        &self.client_email
    }

    /// Returns a bearer token for the default scope.
    ///
    /// # Errors
    ///
    /// See [`access_token_for_scope`](Self::access_token_for_scope).
    pub async fn access_token(&self) -> AuthResult<ServiceCredential> {
        self.access_token_for_scope(&self.default_scope).await
    }

    /// Returns a bearer token for `scope`, minting one on cache miss.
    ///
    /// # Errors
    ///
    /// - `CredentialExchangeFailed` if the token endpoint rejects the assertion
    ///   or returns an unusable body
    /// - `UpstreamUnavailable` if the token endpoint cannot be reached
    pub async fn access_token_for_scope(&self, scope: &str) -> AuthResult<ServiceCredential> {
        let key = credential_cache_key(&self.client_email, scope);

        if let Some(credential) =
            cache::read_json::<ServiceCredential>(self.cache.as_ref(), &key).await
        {
            if credential.is_fresh(self.refresh_margin) {
                tracing::debug!(key = %key, expires_in = credential.expires_in(), "credential cache hit");
                return Ok(credential);
            }
            tracing::debug!(key = %key, "cached credential near expiry");
        } else {
            tracing::debug!(key = %key, "credential cache miss");
        }

        let credential = self.mint(scope).await?;
        let ttl = u64::try_from(credential.expires_in()).unwrap_or(0);
        cache::write_json(
            self.cache.as_ref(),
            &key,
            &credential,
            Some(Duration::from_secs(ttl)),
        )
        .await;

        Ok(credential)
    }

    /// Drops the cached credential for `scope`.
    pub async fn invalidate(&self, scope: &str) {
        let key = credential_cache_key(&self.client_email, scope);
        cache::evict(self.cache.as_ref(), &key).await;
        tracing::debug!(key = %key, "invalidated cached credential");
    }

    /// Signs an assertion for `scope` issued at `now`.
    fn build_assertion(&self, scope: &str, now: i64) -> AuthResult<String> {
        let claims = AssertionClaims {
            iss: &self.client_email,
            scope,
            aud: self.token_uri.as_str(),
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };

        encode(&Header::new(Algorithm::RS256), &claims, &self.signing_key)
            .map_err(|e| AuthError::configuration(format!("failed to sign assertion: {e}")))
    }

    async fn mint(&self, scope: &str) -> AuthResult<ServiceCredential> {
        let now = unix_now();
        let assertion = self.build_assertion(scope, now)?;
        let params = [
            ("grant_type", JWT_BEARER_GRANT_TYPE),
            ("assertion", assertion.as_str()),
        ];

        let response = self
            .http_client
            .post(self.token_uri.as_str())
            .form(&params)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(endpoint = %self.token_uri, error = %e, "token endpoint unreachable");
                AuthError::upstream(self.token_uri.as_str(), e.to_string())
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AuthError::upstream(self.token_uri.as_str(), e.to_string()))?;

        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "credential exchange rejected");
            return Err(AuthError::credential_exchange_failed(status.as_u16(), body));
        }

        let token: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            AuthError::credential_exchange_failed(
                status.as_u16(),
                format!("invalid token response: {e}"),
            )
        })?;

        let expires_in = i64::try_from(token.expires_in).unwrap_or(i64::MAX);
        tracing::info!(
            client_email = %self.client_email,
            scope = %scope,
            expires_in = token.expires_in,
            "minted service credential"
        );

        Ok(ServiceCredential {
            access_token: token.access_token,
            issued_at: now,
            expires_at: now.saturating_add(expires_in),
        })
    }
}

/// Cache key for the credential of a (service account, scope) pair.
pub fn credential_cache_key(client_email: &str, scope: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(client_email.as_bytes());
    hasher.update(b"\n");
    hasher.update(scope.as_bytes());
    format!("{CREDENTIAL_CACHE_PREFIX}{}", hex::encode(hasher.finalize()))
}
