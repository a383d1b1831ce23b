//! Provider signing key sets.
//!
//! The provider publishes its token signing keys as a JSON object mapping
//! key ids to X.509 certificates:
//!
//! ```json
//! { "a1b2c3": "-----BEGIN CERTIFICATE-----\n...", "d4e5f6": "..." }
//! ```
//!
//! ID tokens and session cookies are signed with keys from two different
//! endpoints. [`HttpKeySource`] fetches a set with one GET per call;
//! [`CachedKeySource`] keeps fetched sets in a [`CredentialCache`] for as
//! long as the response's `Cache-Control: max-age` allows.
//!
//! # Security
//!
//! - Only HTTPS endpoints are accepted unless `allow_http` is set (tests)
//! - Responses larger than the configured maximum are rejected
//! - `max-age` is clamped so a hostile header cannot pin keys forever

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::DecodingKey;
use serde::{Deserialize, Serialize};
use url::Url;
use x509_parser::prelude::{FromDer, X509Certificate};
use x509_parser::public_key::PublicKey;

use crate::cache::{self, CredentialCache};
use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::{AuthResult, unix_now};

/// Cache key prefix for stored key sets.
pub const KEY_SET_CACHE_PREFIX: &str = "signing-keys:";

// =============================================================================
// Key set
// =============================================================================

/// A fetched set of signing certificates, keyed by key id.
///
/// Immutable once fetched; a refetch replaces the whole set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SigningKeySet {
    keys: BTreeMap<String, String>,
    #[serde(with = "humantime_serde")]
    max_age: Duration,
    fetched_at: i64,
    expires_at: i64,
}

impl SigningKeySet {
    /// Creates a key set fetched now and fresh for `max_age`.
    #[must_use]
    pub fn new(keys: BTreeMap<String, String>, max_age: Duration) -> Self {
        let fetched_at = unix_now();
        let max_age_secs = i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX);
        Self {
            keys,
            max_age,
            fetched_at,
            expires_at: fetched_at.saturating_add(max_age_secs),
        }
    }

    /// Returns the certificate PEM for `kid`.
    pub fn certificate(&self, kid: &str) -> Option<&str> {
        self.keys.get(kid).map(String::as_str)
    }

    /// Returns `true` if the set contains `kid`.
    pub fn contains(&self, kid: &str) -> bool {
        self.keys.contains_key(kid)
    }

    /// Key ids in the set, sorted.
    pub fn kids(&self) -> impl Iterator<Item = &str> {
        self.keys.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Freshness window granted by the endpoint.
    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Fetch time, unix seconds.
    pub fn fetched_at(&self) -> i64 {
        self.fetched_at
    }

    /// End of the freshness window, unix seconds.
    pub fn expires_at(&self) -> i64 {
        self.expires_at
    }

    /// Returns `true` once the freshness window has passed.
    pub fn is_expired(&self) -> bool {
        self.expires_at <= unix_now()
    }

    /// Builds a verification key from the certificate for `kid`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownSigningKey` if `kid` is absent and `MalformedKeySet` if
    /// the certificate cannot be parsed or does not hold an RSA key.
    pub fn decoding_key(&self, kid: &str) -> AuthResult<DecodingKey> {
        let pem = self
            .certificate(kid)
            .ok_or_else(|| AuthError::unknown_signing_key(kid))?;
        certificate_decoding_key(pem)
    }
}

/// Extracts the RSA public key of a PEM certificate.
///
/// # Errors
///
/// Returns `MalformedKeySet` if the PEM, the certificate or its key cannot be
/// parsed, or if the key is not RSA.
pub fn certificate_decoding_key(certificate: &str) -> AuthResult<DecodingKey> {
    let block = pem::parse(certificate)
        .map_err(|e| AuthError::malformed_key_set(format!("invalid certificate PEM: {e}")))?;

    if block.tag() != "CERTIFICATE" {
        return Err(AuthError::malformed_key_set(format!(
            "expected CERTIFICATE PEM block, found {}",
            block.tag()
        )));
    }

    let (_, cert) = X509Certificate::from_der(block.contents())
        .map_err(|e| AuthError::malformed_key_set(format!("invalid certificate: {e}")))?;

    let spki = cert.public_key();
    match spki.parsed() {
        Ok(PublicKey::RSA(_)) => Ok(DecodingKey::from_rsa_der(&spki.subject_public_key.data)),
        Ok(_) => Err(AuthError::malformed_key_set(
            "certificate does not contain an RSA public key",
        )),
        Err(e) => Err(AuthError::malformed_key_set(format!(
            "invalid certificate public key: {e}"
        ))),
    }
}

// =============================================================================
// Key sources
// =============================================================================

/// Source of signing key sets.
#[async_trait]
pub trait KeySource: Send + Sync {
    /// Returns the key set published at `endpoint`.
    async fn fetch_keys(&self, endpoint: &Url) -> AuthResult<SigningKeySet>;

    /// Returns a freshly fetched key set, bypassing any cache.
    ///
    /// Used after an `UnknownSigningKey` failure when the provider may have
    /// rotated its keys.
    async fn refresh_keys(&self, endpoint: &Url) -> AuthResult<SigningKeySet> {
        self.fetch_keys(endpoint).await
    }
}

#[async_trait]
impl<T: KeySource + ?Sized> KeySource for Arc<T> {
    async fn fetch_keys(&self, endpoint: &Url) -> AuthResult<SigningKeySet> {
        (**self).fetch_keys(endpoint).await
    }

    async fn refresh_keys(&self, endpoint: &Url) -> AuthResult<SigningKeySet> {
        (**self).refresh_keys(endpoint).await
    }
}

/// Settings for [`HttpKeySource`].
#[derive(Debug, Clone)]
pub struct KeySourceConfig {
    /// TTL used when the response has no `max-age` (default: 1 hour).
    pub default_ttl: Duration,

    /// Upper bound for `max-age` (default: 24 hours).
    pub max_ttl: Duration,

    /// Lower bound for `max-age` (default: 1 minute).
    pub min_ttl: Duration,

    /// Maximum response body size in bytes (default: 1 MiB).
    pub max_response_size: usize,

    /// Allow HTTP (non-HTTPS) endpoints (default: false).
    pub allow_http: bool,
}

impl Default for KeySourceConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(3600),
            max_ttl: Duration::from_secs(24 * 3600),
            min_ttl: Duration::from_secs(60),
            max_response_size: 1024 * 1024,
            allow_http: false,
        }
    }
}

impl KeySourceConfig {
    /// Sets the default TTL.
    #[must_use]
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Sets the maximum TTL.
    #[must_use]
    pub fn with_max_ttl(mut self, ttl: Duration) -> Self {
        self.max_ttl = ttl;
        self
    }

    /// Sets the minimum TTL.
    #[must_use]
    pub fn with_min_ttl(mut self, ttl: Duration) -> Self {
        self.min_ttl = ttl;
        self
    }

    /// Sets the maximum response size.
    #[must_use]
    pub fn with_max_response_size(mut self, size: usize) -> Self {
        self.max_response_size = size;
        self
    }

    /// Allows HTTP (non-HTTPS) endpoints.
    #[must_use]
    pub fn with_allow_http(mut self, allow: bool) -> Self {
        self.allow_http = allow;
        self
    }
}

impl From<&AuthConfig> for KeySourceConfig {
    fn from(config: &AuthConfig) -> Self {
        Self {
            default_ttl: config.key_cache.default_ttl,
            max_ttl: config.key_cache.max_ttl,
            min_ttl: config.key_cache.min_ttl,
            max_response_size: config.http.max_response_size,
            allow_http: config.http.allow_http,
        }
    }
}

/// Fetches key sets over HTTP. No caching, no retries.
#[derive(Debug, Clone)]
pub struct HttpKeySource {
    http_client: reqwest::Client,
    config: KeySourceConfig,
}

impl HttpKeySource {
    /// Creates a key source using `http_client` for requests.
    #[must_use]
    pub fn new(http_client: reqwest::Client, config: KeySourceConfig) -> Self {
        Self {
            http_client,
            config,
        }
    }

    fn validate_scheme(&self, endpoint: &Url) -> AuthResult<()> {
        match endpoint.scheme() {
            "https" => Ok(()),
            "http" if self.config.allow_http => Ok(()),
            scheme => Err(AuthError::configuration(format!(
                "key endpoint {endpoint} must use HTTPS, got {scheme}"
            ))),
        }
    }

    /// Extracts `max-age` and clamps it between `min_ttl` and `max_ttl`.
    fn parse_cache_control(&self, headers: &reqwest::header::HeaderMap) -> Duration {
        let ttl = headers
            .get(reqwest::header::CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| {
                v.split(',').find_map(|directive| {
                    directive
                        .trim()
                        .strip_prefix("max-age=")
                        .and_then(|secs| secs.parse::<u64>().ok())
                })
            })
            .map(Duration::from_secs)
            .unwrap_or(self.config.default_ttl);

        ttl.min(self.config.max_ttl).max(self.config.min_ttl)
    }
}

#[async_trait]
impl KeySource for HttpKeySource {
    async fn fetch_keys(&self, endpoint: &Url) -> AuthResult<SigningKeySet> {
        self.validate_scheme(endpoint)?;
        let label = normalize_endpoint(endpoint);

        tracing::debug!(endpoint = %label, "fetching signing keys");

        let response = self
            .http_client
            .get(endpoint.as_str())
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(endpoint = %label, error = %e, "signing key fetch failed");
                AuthError::upstream(&label, e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(endpoint = %label, status = status.as_u16(), "signing key endpoint returned error");
            return Err(AuthError::upstream_status(
                &label,
                status.as_u16(),
                status.canonical_reason().unwrap_or("non-success status"),
            ));
        }

        let max_size = self.config.max_response_size;
        if let Some(len) = response.content_length()
            && len > max_size as u64
        {
            return Err(AuthError::malformed_key_set(format!(
                "response of {len} bytes exceeds maximum of {max_size}"
            )));
        }

        let max_age = self.parse_cache_control(response.headers());

        let body = response
            .bytes()
            .await
            .map_err(|e| AuthError::upstream(&label, format!("failed to read body: {e}")))?;

        if body.len() > max_size {
            return Err(AuthError::malformed_key_set(format!(
                "response of {} bytes exceeds maximum of {max_size}",
                body.len()
            )));
        }

        let keys: BTreeMap<String, String> = serde_json::from_slice(&body).map_err(|e| {
            tracing::warn!(endpoint = %label, error = %e, "failed to parse signing keys");
            AuthError::malformed_key_set(format!("expected an object of key id to certificate: {e}"))
        })?;

        if keys.is_empty() {
            return Err(AuthError::malformed_key_set("key set is empty"));
        }

        tracing::debug!(endpoint = %label, keys = keys.len(), max_age = ?max_age, "fetched signing keys");

        Ok(SigningKeySet::new(keys, max_age))
    }
}

/// Key source that keeps fetched sets in a [`CredentialCache`].
///
/// Cached sets are re-validated against their embedded expiry, so a backend
/// that ignores TTLs still never serves a stale set.
pub struct CachedKeySource<S> {
    inner: S,
    cache: Arc<dyn CredentialCache>,
}

impl<S: KeySource> CachedKeySource<S> {
    /// Wraps `inner` with `cache`.
    #[must_use]
    pub fn new(inner: S, cache: Arc<dyn CredentialCache>) -> Self {
        Self { inner, cache }
    }

    /// The wrapped source.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Drops the cached set for `endpoint` and fetches a new one.
    ///
    /// # Errors
    ///
    /// Returns the error of the underlying fetch.
    pub async fn refresh(&self, endpoint: &Url) -> AuthResult<SigningKeySet> {
        let key = key_set_cache_key(endpoint);
        cache::evict(self.cache.as_ref(), &key).await;
        self.fetch_and_store(endpoint, &key).await
    }

    async fn fetch_and_store(&self, endpoint: &Url, key: &str) -> AuthResult<SigningKeySet> {
        let keys = self.inner.fetch_keys(endpoint).await?;
        cache::write_json(self.cache.as_ref(), key, &keys, Some(keys.max_age())).await;
        Ok(keys)
    }
}

#[async_trait]
impl<S: KeySource> KeySource for CachedKeySource<S> {
    async fn fetch_keys(&self, endpoint: &Url) -> AuthResult<SigningKeySet> {
        let key = key_set_cache_key(endpoint);

        if let Some(keys) = cache::read_json::<SigningKeySet>(self.cache.as_ref(), &key).await {
            if !keys.is_expired() {
                tracing::debug!(key = %key, "signing key cache hit");
                return Ok(keys);
            }
            tracing::debug!(key = %key, "cached signing keys expired");
        } else {
            tracing::debug!(key = %key, "signing key cache miss");
        }

        self.fetch_and_store(endpoint, &key).await
    }

    async fn refresh_keys(&self, endpoint: &Url) -> AuthResult<SigningKeySet> {
        self.refresh(endpoint).await
    }
}

/// Cache key of the key set published at `endpoint`.
pub fn key_set_cache_key(endpoint: &Url) -> String {
    format!("{KEY_SET_CACHE_PREFIX}{}", normalize_endpoint(endpoint))
}

/// Normalizes an endpoint for use in cache keys and error messages.
fn normalize_endpoint(endpoint: &Url) -> String {
    let mut endpoint = endpoint.clone();
    endpoint.set_query(None);
    endpoint.set_fragment(None);
    endpoint.as_str().trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const PRIMARY_CERT: &str = include_str!("../tests/fixtures/primary.cert.pem");
    const PRIMARY_KEY: &str = include_str!("../tests/fixtures/primary.key.pem");

    fn key_set(max_age: Duration) -> SigningKeySet {
        let mut keys = BTreeMap::new();
        keys.insert("primary".to_string(), PRIMARY_CERT.to_string());
        SigningKeySet::new(keys, max_age)
    }

    struct CountingSource {
        calls: AtomicUsize,
        max_age: Duration,
    }

    impl CountingSource {
        fn new(max_age: Duration) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                max_age,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl KeySource for CountingSource {
        async fn fetch_keys(&self, _endpoint: &Url) -> AuthResult<SigningKeySet> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(key_set(self.max_age))
        }
    }

    fn endpoint() -> Url {
        Url::parse("https://keys.example.com/certs").unwrap()
    }

    #[test]
    fn test_key_set_accessors() {
        let keys = key_set(Duration::from_secs(600));
        assert_eq!(keys.len(), 1);
        assert!(keys.contains("primary"));
        assert!(!keys.contains("other"));
        assert_eq!(keys.kids().collect::<Vec<_>>(), vec!["primary"]);
        assert_eq!(keys.expires_at() - keys.fetched_at(), 600);
        assert!(!keys.is_expired());
    }

    #[test]
    fn test_zero_max_age_is_expired() {
        assert!(key_set(Duration::ZERO).is_expired());
    }

    #[test]
    fn test_key_set_serde_keeps_expiry() {
        let keys = key_set(Duration::from_secs(600));
        let raw = serde_json::to_string(&keys).unwrap();
        let back: SigningKeySet = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, keys);
    }

    #[test]
    fn test_certificate_decoding_key() {
        assert!(certificate_decoding_key(PRIMARY_CERT).is_ok());

        let err = key_set(Duration::from_secs(60))
            .decoding_key("missing")
            .err()
            .unwrap();
        assert!(matches!(err, AuthError::UnknownSigningKey { .. }));
    }

    #[test]
    fn test_certificate_decoding_key_rejects_garbage() {
        let err = certificate_decoding_key("not a certificate").err().unwrap();
        assert!(matches!(err, AuthError::MalformedKeySet { .. }));

        // A private key is valid PEM but not a certificate
        let err = certificate_decoding_key(PRIMARY_KEY).err().unwrap();
        assert!(matches!(err, AuthError::MalformedKeySet { .. }));

        let bogus = "-----BEGIN CERTIFICATE-----\nAAAA\n-----END CERTIFICATE-----\n";
        let err = certificate_decoding_key(bogus).err().unwrap();
        assert!(matches!(err, AuthError::MalformedKeySet { .. }));
    }

    #[test]
    fn test_validate_scheme() {
        let source = HttpKeySource::new(reqwest::Client::new(), KeySourceConfig::default());

        assert!(source.validate_scheme(&endpoint()).is_ok());

        let http = Url::parse("http://keys.example.com/certs").unwrap();
        assert!(source.validate_scheme(&http).is_err());

        let source = HttpKeySource::new(
            reqwest::Client::new(),
            KeySourceConfig::default().with_allow_http(true),
        );
        assert!(source.validate_scheme(&http).is_ok());
    }

    #[test]
    fn test_parse_cache_control() {
        let config = KeySourceConfig::default()
            .with_default_ttl(Duration::from_secs(3600))
            .with_min_ttl(Duration::from_secs(60))
            .with_max_ttl(Duration::from_secs(7200));
        let source = HttpKeySource::new(reqwest::Client::new(), config);

        // No header - use default
        let headers = reqwest::header::HeaderMap::new();
        assert_eq!(
            source.parse_cache_control(&headers),
            Duration::from_secs(3600)
        );

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::CACHE_CONTROL,
            "public, max-age=19302, must-revalidate, no-transform"
                .parse()
                .unwrap(),
        );
        assert_eq!(
            source.parse_cache_control(&headers),
            Duration::from_secs(7200)
        );

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::CACHE_CONTROL,
            "max-age=1800".parse().unwrap(),
        );
        assert_eq!(
            source.parse_cache_control(&headers),
            Duration::from_secs(1800)
        );

        // max-age below min - clamped to min
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(reqwest::header::CACHE_CONTROL, "max-age=5".parse().unwrap());
        assert_eq!(source.parse_cache_control(&headers), Duration::from_secs(60));

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::CACHE_CONTROL,
            "max-age=soon".parse().unwrap(),
        );
        assert_eq!(
            source.parse_cache_control(&headers),
            Duration::from_secs(3600)
        );
    }

    #[test]
    fn test_key_set_cache_key() {
        let a = Url::parse("https://keys.example.com/certs/").unwrap();
        let b = Url::parse("https://keys.example.com/certs?x=1").unwrap();
        assert_eq!(key_set_cache_key(&a), "signing-keys:https://keys.example.com/certs");
        assert_eq!(key_set_cache_key(&a), key_set_cache_key(&b));
    }

    #[tokio::test]
    async fn test_cached_source_fetches_once() {
        let inner = Arc::new(CountingSource::new(Duration::from_secs(600)));
        let source = CachedKeySource::new(inner.clone(), Arc::new(MemoryCache::new()));

        let first = source.fetch_keys(&endpoint()).await.unwrap();
        let second = source.fetch_keys(&endpoint()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(inner.calls(), 1);
    }

    #[tokio::test]
    async fn test_cached_source_separates_endpoints() {
        let inner = Arc::new(CountingSource::new(Duration::from_secs(600)));
        let source = CachedKeySource::new(inner.clone(), Arc::new(MemoryCache::new()));
        let other = Url::parse("https://keys.example.com/session").unwrap();

        source.fetch_keys(&endpoint()).await.unwrap();
        source.fetch_keys(&other).await.unwrap();
        source.fetch_keys(&other).await.unwrap();

        assert_eq!(inner.calls(), 2);
    }

    #[tokio::test]
    async fn test_cached_source_revalidates_embedded_expiry() {
        // Stored without a TTL the memory cache would keep it forever
        let cache = Arc::new(MemoryCache::new());
        let stale = key_set(Duration::ZERO);
        cache::write_json(cache.as_ref(), &key_set_cache_key(&endpoint()), &stale, None).await;

        let inner = Arc::new(CountingSource::new(Duration::from_secs(600)));
        let source = CachedKeySource::new(inner.clone(), cache);

        let keys = source.fetch_keys(&endpoint()).await.unwrap();
        assert!(!keys.is_expired());
        assert_eq!(inner.calls(), 1);
    }

    #[tokio::test]
    async fn test_cached_source_refresh_refetches() {
        let inner = Arc::new(CountingSource::new(Duration::from_secs(600)));
        let source = CachedKeySource::new(inner.clone(), Arc::new(MemoryCache::new()));

        source.fetch_keys(&endpoint()).await.unwrap();
        source.refresh_keys(&endpoint()).await.unwrap();
        source.fetch_keys(&endpoint()).await.unwrap();

        assert_eq!(inner.calls(), 2);
    }

    #[tokio::test]
    async fn test_cached_source_ignores_undecodable_entry() {
        let cache = Arc::new(MemoryCache::new());
        cache
            .put(&key_set_cache_key(&endpoint()), "{oops".to_string(), None)
            .await
            .unwrap();

        let inner = Arc::new(CountingSource::new(Duration::from_secs(600)));
        let source = CachedKeySource::new(inner.clone(), cache);

        assert!(source.fetch_keys(&endpoint()).await.is_ok());
        assert_eq!(inner.calls(), 1);
    }
}
