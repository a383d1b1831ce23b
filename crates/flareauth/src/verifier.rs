//! Token verification against provider-published signing keys.
//!
//! Verification order:
//!
//! 1. Decode the unverified header for `alg` and `kid`
//! 2. Resolve the signing key set for the target (ID tokens and session
//!    cookies use different key endpoints)
//! 3. Verify the RS256 signature with the certificate for `kid`
//! 4. Check `exp`, then `iss` and `aud` against the target
//! 5. Check `sub` and `iat`
//!
//! The signature is always checked before any claim, so a forged token never
//! reports `TokenExpired`.

use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{Algorithm, Validation, decode, decode_header};
use url::Url;

use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::keys::{KeySource, SigningKeySet};
use crate::types::{DecodedToken, RawClaims};
use crate::{AuthResult, unix_now};

/// Only algorithm the provider signs ID tokens and session cookies with.
pub const PROVIDER_ALGORITHM: Algorithm = Algorithm::RS256;

/// Maximum length of the `sub` claim (a provider uid).
const MAX_SUBJECT_LENGTH: usize = 128;

/// What a token must be checked against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationTarget {
    /// Endpoint publishing the signing certificates.
    pub keys_endpoint: Url,
    /// Required `iss`.
    pub issuer: String,
    /// Required `aud`.
    pub audience: String,
}

impl VerificationTarget {
    /// Target for ID tokens of the configured project.
    #[must_use]
    pub fn id_token(config: &AuthConfig) -> Self {
        Self {
            keys_endpoint: config.endpoints.id_token_keys.clone(),
            issuer: config.id_token_issuer(),
            audience: config.project_id.clone(),
        }
    }

    /// Target for session cookies of the configured project.
    #[must_use]
    pub fn session_cookie(config: &AuthConfig) -> Self {
        Self {
            keys_endpoint: config.endpoints.session_cookie_keys.clone(),
            issuer: config.session_cookie_issuer(),
            audience: config.project_id.clone(),
        }
    }
}

/// Verifies signed tokens and returns their claims.
#[derive(Clone)]
pub struct TokenVerifier {
    keys: Arc<dyn KeySource>,
    leeway: Duration,
}

impl TokenVerifier {
    /// Creates a verifier resolving keys through `keys`.
    #[must_use]
    pub fn new(keys: Arc<dyn KeySource>) -> Self {
        Self {
            keys,
            leeway: Duration::ZERO,
        }
    }

    /// Sets the tolerated clock difference for `exp` and `iat`.
    #[must_use]
    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }

    /// Verifies `token` against `target`.
    ///
    /// # Errors
    ///
    /// - `MalformedToken` if the token cannot be parsed, has no `kid`, is not
    ///   RS256, or carries an invalid `sub`/`iat`
    /// - `UnknownSigningKey` if `kid` is not in the fetched key set
    /// - `MalformedKeySet` if the matching certificate cannot be used
    /// - `InvalidSignature`, `TokenExpired`, `IssuerMismatch`, `AudienceMismatch`
    /// - `UpstreamUnavailable` if the key set cannot be fetched
    pub async fn verify(
        &self,
        token: &str,
        target: &VerificationTarget,
    ) -> AuthResult<DecodedToken> {
        let kid = token_kid(token)?;
        let keys = self.keys.fetch_keys(&target.keys_endpoint).await?;
        self.verify_with_keys(token, &kid, &keys, target)
    }

    /// Like [`verify`](Self::verify), but on `UnknownSigningKey` forces one key
    /// set refetch and retries once.
    ///
    /// # Errors
    ///
    /// Same as [`verify`](Self::verify).
    pub async fn verify_with_refresh(
        &self,
        token: &str,
        target: &VerificationTarget,
    ) -> AuthResult<DecodedToken> {
        match self.verify(token, target).await {
            Err(err) if err.is_stale_key() => {
                tracing::info!(
                    endpoint = %target.keys_endpoint,
                    error = %err,
                    "refreshing signing keys after unknown key id"
                );
                let kid = token_kid(token)?;
                let keys = self.keys.refresh_keys(&target.keys_endpoint).await?;
                self.verify_with_keys(token, &kid, &keys, target)
            }
            other => other,
        }
    }

    fn verify_with_keys(
        &self,
        token: &str,
        kid: &str,
        keys: &SigningKeySet,
        target: &VerificationTarget,
    ) -> AuthResult<DecodedToken> {
        let key = keys.decoding_key(kid)?;

        let mut validation = Validation::new(PROVIDER_ALGORITHM);
        validation.validate_aud = false; // checked below to report the actual value
        validation.leeway = self.leeway.as_secs();

        let claims = decode::<RawClaims>(token, &key, &validation)
            .map_err(|e| {
                let err = AuthError::from(e);
                tracing::debug!(kid = %kid, error = %err, "token rejected");
                err
            })?
            .claims;

        self.check_claims(claims, target)
    }

    fn check_claims(
        &self,
        claims: RawClaims,
        target: &VerificationTarget,
    ) -> AuthResult<DecodedToken> {
        if claims.iss != target.issuer {
            return Err(AuthError::issuer_mismatch(&target.issuer, &claims.iss));
        }

        if !claims.aud.contains(&target.audience) {
            return Err(AuthError::audience_mismatch(
                &target.audience,
                claims.aud.to_display(),
            ));
        }

        if claims.sub.is_empty() {
            return Err(AuthError::malformed_token("sub claim is empty"));
        }

        if claims.sub.chars().count() > MAX_SUBJECT_LENGTH {
            return Err(AuthError::malformed_token(format!(
                "sub claim is longer than {MAX_SUBJECT_LENGTH} characters"
            )));
        }

        let leeway = i64::try_from(self.leeway.as_secs()).unwrap_or(i64::MAX);
        if claims.iat > unix_now().saturating_add(leeway) {
            return Err(AuthError::malformed_token("iat claim is in the future"));
        }

        Ok(claims.into_verified(&target.audience))
    }
}

/// Reads the key id from the unverified header.
fn token_kid(token: &str) -> AuthResult<String> {
    let header = decode_header(token)
        .map_err(|e| AuthError::malformed_token(format!("invalid token header: {e}")))?;

    if header.alg != PROVIDER_ALGORITHM {
        return Err(AuthError::malformed_token(format!(
            "unexpected algorithm {:?}, expected {PROVIDER_ALGORITHM:?}",
            header.alg
        )));
    }

    match header.kid {
        Some(kid) if !kid.is_empty() => Ok(kid),
        _ => Err(AuthError::malformed_token("token header has no kid")),
    }
}
