//! High-level credential flows.
//!
//! [`AuthFacade`] wires the key source, verifier and credential provider
//! together from an [`AuthConfig`] and talks to the identity toolkit REST
//! API for password sign-in, user lookup and session cookie minting.
//!
//! # Example
//!
//! ```ignore
//! let auth = AuthFacade::new(AuthConfig::new("my-project", "AIza..."))?;
//!
//! let signed_in = auth.sign_in_with_email_and_password("ada@example.com", "pw").await?;
//! let cookie = auth
//!     .create_session_cookie(&signed_in.token.id_token, DEFAULT_SESSION_DURATION)
//!     .await?;
//! let claims = auth.verify_session_cookie(&cookie).await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::AuthResult;
use crate::cache::{CredentialCache, MemoryCache, NoOpCache, RedisCache};
use crate::config::{AuthConfig, CacheBackendKind};
use crate::credentials::{ServiceCredential, ServiceCredentialProvider};
use crate::error::AuthError;
use crate::keys::{CachedKeySource, HttpKeySource, KeySource, KeySourceConfig};
use crate::types::{DecodedToken, SignInResult, SignInToken, User};
use crate::verifier::{TokenVerifier, VerificationTarget};

/// Shortest session cookie lifetime the provider accepts.
pub const MIN_SESSION_DURATION: Duration = Duration::from_secs(5 * 60);

/// Longest session cookie lifetime the provider accepts.
pub const MAX_SESSION_DURATION: Duration = Duration::from_secs(14 * 24 * 3600);

/// Session cookie lifetime used when the caller has no preference.
pub const DEFAULT_SESSION_DURATION: Duration = MAX_SESSION_DURATION;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SignInRequest<'a> {
    email: &'a str,
    password: &'a str,
    return_secure_token: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LookupRequest<'a> {
    id_token: &'a str,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    users: Vec<User>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionCookieRequest<'a> {
    id_token: &'a str,
    valid_duration: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionCookieResponse {
    session_cookie: String,
}

/// Provider error envelope: `{"error": {"code": 400, "message": "INVALID_PASSWORD"}}`.
#[derive(Debug, Deserialize)]
struct ProviderErrorResponse {
    error: ProviderError,
}

#[derive(Debug, Deserialize)]
struct ProviderError {
    message: String,
}

/// Entry point for sign-in, session cookie and verification flows.
pub struct AuthFacade {
    config: AuthConfig,
    http_client: reqwest::Client,
    cache: Arc<dyn CredentialCache>,
    verifier: TokenVerifier,
    credentials: Option<ServiceCredentialProvider>,
    id_token_target: VerificationTarget,
    session_cookie_target: VerificationTarget,
}

impl AuthFacade {
    /// Creates a facade using the cache backend selected in `config`.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if the configuration is invalid, the cache
    /// backend cannot be created or the service account key is unusable.
    pub fn new(config: AuthConfig) -> AuthResult<Self> {
        let cache = cache_from_config(&config)?;
        Self::with_cache(config, cache)
    }

    /// Creates a facade sharing `cache` for keys and credentials.
    ///
    /// # Errors
    ///
    /// Same as [`new`](Self::new), minus cache creation.
    pub fn with_cache(config: AuthConfig, cache: Arc<dyn CredentialCache>) -> AuthResult<Self> {
        config
            .validate()
            .map_err(|e| AuthError::configuration(e.to_string()))?;

        let http_client = reqwest::Client::builder()
            .timeout(config.http.request_timeout)
            .build()
            .map_err(|e| AuthError::configuration(format!("failed to build HTTP client: {e}")))?;

        let keys: Arc<dyn KeySource> = Arc::new(CachedKeySource::new(
            HttpKeySource::new(http_client.clone(), KeySourceConfig::from(&config)),
            cache.clone(),
        ));
        let verifier = TokenVerifier::new(keys).with_leeway(config.verification.clock_skew);

        let credentials = if config.service_account.email.is_empty() {
            None
        } else {
            Some(ServiceCredentialProvider::from_config(
                &config,
                http_client.clone(),
                cache.clone(),
            )?)
        };

        Ok(Self {
            id_token_target: VerificationTarget::id_token(&config),
            session_cookie_target: VerificationTarget::session_cookie(&config),
            config,
            http_client,
            cache,
            verifier,
            credentials,
        })
    }

    /// The active configuration.
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// The shared cache.
    pub fn cache(&self) -> &Arc<dyn CredentialCache> {
        &self.cache
    }

    /// The underlying verifier, for custom targets.
    pub fn verifier(&self) -> &TokenVerifier {
        &self.verifier
    }

    /// Signs a user in with email and password, then looks the user up.
    ///
    /// Both calls must succeed; no partial result is returned.
    ///
    /// # Errors
    ///
    /// Returns `UpstreamUnavailable` with the provider's error code (for
    /// example `INVALID_PASSWORD`) if either call fails, or `UserNotFound`.
    pub async fn sign_in_with_email_and_password(
        &self,
        email: &str,
        password: &str,
    ) -> AuthResult<SignInResult> {
        let request = SignInRequest {
            email,
            password,
            return_secure_token: true,
        };
        let token: SignInToken = self
            .post_identity_toolkit(self.accounts_url("signInWithPassword")?, None, &request)
            .await?;

        tracing::debug!(uid = %token.local_id, "password sign-in succeeded");

        let user = self.lookup_user(&token.id_token).await?;
        Ok(SignInResult { token, user })
    }

    /// Looks up the user an ID token belongs to.
    ///
    /// # Errors
    ///
    /// Returns `UserNotFound` if the provider knows no user for the token.
    pub async fn lookup_user(&self, id_token: &str) -> AuthResult<User> {
        let response: LookupResponse = self
            .post_identity_toolkit(
                self.accounts_url("lookup")?,
                None,
                &LookupRequest { id_token },
            )
            .await?;

        response
            .users
            .into_iter()
            .next()
            .ok_or(AuthError::UserNotFound)
    }

    /// Mints a session cookie valid for `expires_in` from an ID token.
    ///
    /// # Errors
    ///
    /// Returns `InvalidExpiry` without any network call if `expires_in` is
    /// outside 5 minutes to 14 days, `Configuration` if no service account is
    /// configured, and credential or upstream errors otherwise.
    pub async fn create_session_cookie(
        &self,
        id_token: &str,
        expires_in: Duration,
    ) -> AuthResult<String> {
        validate_session_duration(expires_in)?;

        let credential = self.access_token().await?;
        let url = self.session_cookie_url()?;
        let request = CreateSessionCookieRequest {
            id_token,
            valid_duration: expires_in.as_secs().to_string(),
        };

        let response: CreateSessionCookieResponse = self
            .post_identity_toolkit(url, Some(&credential.access_token), &request)
            .await?;

        tracing::debug!(valid_duration = expires_in.as_secs(), "minted session cookie");
        Ok(response.session_cookie)
    }

    /// Verifies a session cookie.
    ///
    /// # Errors
    ///
    /// See [`TokenVerifier::verify`].
    pub async fn verify_session_cookie(&self, session_cookie: &str) -> AuthResult<DecodedToken> {
        self.verify(session_cookie, &self.session_cookie_target)
            .await
    }

    /// Verifies an ID token.
    ///
    /// # Errors
    ///
    /// See [`TokenVerifier::verify`].
    pub async fn verify_id_token(&self, id_token: &str) -> AuthResult<DecodedToken> {
        self.verify(id_token, &self.id_token_target).await
    }

    /// Returns a cached or freshly minted service credential.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if no service account is configured.
    pub async fn access_token(&self) -> AuthResult<ServiceCredential> {
        self.credential_provider()?.access_token().await
    }

    /// The service credential provider, if a service account is configured.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` if no service account is configured.
    pub fn credential_provider(&self) -> AuthResult<&ServiceCredentialProvider> {
        self.credentials
            .as_ref()
            .ok_or_else(|| AuthError::configuration("service account is not configured"))
    }

    async fn verify(&self, token: &str, target: &VerificationTarget) -> AuthResult<DecodedToken> {
        if self.config.verification.refresh_keys_on_unknown_kid {
            self.verifier.verify_with_refresh(token, target).await
        } else {
            self.verifier.verify(token, target).await
        }
    }

    fn accounts_url(&self, operation: &str) -> AuthResult<Url> {
        let mut url = self.toolkit_url(&format!("accounts:{operation}"))?;
        url.query_pairs_mut().append_pair("key", &self.config.api_key);
        Ok(url)
    }

    fn session_cookie_url(&self) -> AuthResult<Url> {
        self.toolkit_url(&format!(
            "projects/{}:createSessionCookie",
            self.config.project_id
        ))
    }

    // The leading "./" keeps "accounts:" from being read as a URL scheme
    fn toolkit_url(&self, path: &str) -> AuthResult<Url> {
        self.config
            .endpoints
            .identity_toolkit
            .join(&format!("./{path}"))
            .map_err(|e| AuthError::configuration(format!("invalid identity toolkit URL: {e}")))
    }

    async fn post_identity_toolkit<B, R>(
        &self,
        url: Url,
        bearer: Option<&str>,
        body: &B,
    ) -> AuthResult<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let label = endpoint_label(&url);

        let mut request = self.http_client.post(url).json(body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            tracing::warn!(endpoint = %label, error = %e, "identity toolkit unreachable");
            AuthError::upstream(&label, e.to_string())
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AuthError::upstream(&label, e.to_string()))?;

        if !status.is_success() {
            let message = serde_json::from_str::<ProviderErrorResponse>(&text)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| {
                    status
                        .canonical_reason()
                        .unwrap_or("non-success status")
                        .to_string()
                });
            tracing::warn!(endpoint = %label, status = status.as_u16(), message = %message, "identity toolkit call failed");
            return Err(AuthError::upstream_status(&label, status.as_u16(), message));
        }

        serde_json::from_str(&text).map_err(|e| {
            AuthError::upstream_status(
                &label,
                status.as_u16(),
                format!("unexpected response body: {e}"),
            )
        })
    }
}

/// Builds the cache backend selected in `config`.
///
/// # Errors
///
/// Returns `Configuration` if the Redis backend has no usable URL.
pub fn cache_from_config(config: &AuthConfig) -> AuthResult<Arc<dyn CredentialCache>> {
    Ok(match config.cache.backend {
        CacheBackendKind::Memory => Arc::new(MemoryCache::new()),
        CacheBackendKind::None => Arc::new(NoOpCache),
        CacheBackendKind::Redis => {
            let url = config
                .cache
                .redis_url
                .as_deref()
                .ok_or_else(|| AuthError::configuration("cache.redis_url is required"))?;
            let cache = RedisCache::from_url(url, config.cache.key_prefix.clone())
                .map_err(|e| AuthError::configuration(format!("invalid Redis cache: {e}")))?;
            Arc::new(cache)
        }
    })
}

/// Rejects session durations the provider would refuse.
///
/// # Errors
///
/// Returns `InvalidExpiry` outside 5 minutes to 14 days inclusive.
pub fn validate_session_duration(expires_in: Duration) -> AuthResult<()> {
    if expires_in < MIN_SESSION_DURATION || expires_in > MAX_SESSION_DURATION {
        return Err(AuthError::InvalidExpiry {
            seconds: expires_in.as_secs(),
        });
    }
    Ok(())
}

/// Endpoint without the query string, which carries the API key.
fn endpoint_label(url: &Url) -> String {
    let mut url = url.clone();
    url.set_query(None);
    url.to_string()
}
