//! Credential verification and minting error types.
//!
//! Every failure surfaced by the crate is an [`AuthError`]. Cache backend
//! failures are the only exception: they are logged and swallowed by the
//! callers, see [`crate::cache::CacheError`].

use std::fmt;

/// Errors that can occur while verifying, minting or fetching credentials.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// A provider endpoint could not be reached or returned a non-success status.
    #[error("Upstream unavailable: {endpoint} ({}) - {message}", status_label(.status))]
    UpstreamUnavailable {
        /// The endpoint that failed (without query string).
        endpoint: String,
        /// HTTP status, when a response was received.
        status: Option<u16>,
        /// Transport error or provider error message.
        message: String,
    },

    /// The key endpoint response could not be parsed into key id / certificate pairs.
    #[error("Malformed key set: {message}")]
    MalformedKeySet {
        /// Description of what could not be parsed.
        message: String,
    },

    /// The token could not be parsed, or its header is unusable.
    #[error("Malformed token: {message}")]
    MalformedToken {
        /// Description of why the token is malformed.
        message: String,
    },

    /// The token's key id is not present in the fetched key set.
    #[error("Unknown signing key: {kid}")]
    UnknownSigningKey {
        /// The key id from the token header.
        kid: String,
    },

    /// The token signature does not match the resolved public key.
    #[error("Invalid signature")]
    InvalidSignature,

    /// The token's `exp` claim is in the past.
    #[error("Token expired")]
    TokenExpired,

    /// The token's `iss` claim does not match the expected issuer.
    #[error("Issuer mismatch: expected {expected}, got {actual}")]
    IssuerMismatch {
        /// The expected issuer.
        expected: String,
        /// The issuer found in the token.
        actual: String,
    },

    /// The token's `aud` claim does not match the expected audience.
    #[error("Audience mismatch: expected {expected}, got {actual}")]
    AudienceMismatch {
        /// The expected audience (project id).
        expected: String,
        /// The audience found in the token.
        actual: String,
    },

    /// The token endpoint refused the service-account assertion.
    #[error("Credential exchange failed: status {status} - {body}")]
    CredentialExchangeFailed {
        /// HTTP status returned by the token endpoint.
        status: u16,
        /// Raw response body, kept for diagnostics.
        body: String,
    },

    /// A requested session duration is outside the provider's accepted window.
    #[error("Invalid expiry: {seconds}s is outside the accepted range of 300s to 1209600s")]
    InvalidExpiry {
        /// The rejected duration in seconds.
        seconds: u64,
    },

    /// The lookup endpoint returned no user for the token.
    #[error("User not found")]
    UserNotFound,

    /// The configuration or key material is invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration problem.
        message: String,
    },
}

fn status_label(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!("status {code}"),
        None => "no response".to_string(),
    }
}

impl AuthError {
    /// Creates a new `UpstreamUnavailable` error for a transport failure.
    #[must_use]
    pub fn upstream(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UpstreamUnavailable {
            endpoint: endpoint.into(),
            status: None,
            message: message.into(),
        }
    }

    /// Creates a new `UpstreamUnavailable` error for a non-success response.
    #[must_use]
    pub fn upstream_status(
        endpoint: impl Into<String>,
        status: u16,
        message: impl Into<String>,
    ) -> Self {
        Self::UpstreamUnavailable {
            endpoint: endpoint.into(),
            status: Some(status),
            message: message.into(),
        }
    }

    /// Creates a new `MalformedKeySet` error.
    #[must_use]
    pub fn malformed_key_set(message: impl Into<String>) -> Self {
        Self::MalformedKeySet {
            message: message.into(),
        }
    }

    /// Creates a new `MalformedToken` error.
    #[must_use]
    pub fn malformed_token(message: impl Into<String>) -> Self {
        Self::MalformedToken {
            message: message.into(),
        }
    }

    /// Creates a new `UnknownSigningKey` error.
    #[must_use]
    pub fn unknown_signing_key(kid: impl Into<String>) -> Self {
        Self::UnknownSigningKey { kid: kid.into() }
    }

    /// Creates a new `IssuerMismatch` error.
    #[must_use]
    pub fn issuer_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::IssuerMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Creates a new `AudienceMismatch` error.
    #[must_use]
    pub fn audience_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::AudienceMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Creates a new `CredentialExchangeFailed` error.
    #[must_use]
    pub fn credential_exchange_failed(status: u16, body: impl Into<String>) -> Self {
        Self::CredentialExchangeFailed {
            status,
            body: body.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Returns `true` if the token itself failed verification.
    #[must_use]
    pub fn is_verification_error(&self) -> bool {
        matches!(
            self,
            Self::MalformedToken { .. }
                | Self::UnknownSigningKey { .. }
                | Self::InvalidSignature
                | Self::TokenExpired
                | Self::IssuerMismatch { .. }
                | Self::AudienceMismatch { .. }
        )
    }

    /// Returns `true` if a provider endpoint misbehaved.
    #[must_use]
    pub fn is_upstream_error(&self) -> bool {
        matches!(
            self,
            Self::UpstreamUnavailable { .. }
                | Self::MalformedKeySet { .. }
                | Self::CredentialExchangeFailed { .. }
        )
    }

    /// Returns `true` if the failure may be caused by a stale key set.
    ///
    /// Callers may force a key refetch and retry once when this is set.
    #[must_use]
    pub fn is_stale_key(&self) -> bool {
        matches!(self, Self::UnknownSigningKey { .. })
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::UpstreamUnavailable { .. } => ErrorCategory::Upstream,
            Self::MalformedKeySet { .. } => ErrorCategory::Key,
            Self::MalformedToken { .. } => ErrorCategory::Token,
            Self::UnknownSigningKey { .. } => ErrorCategory::Key,
            Self::InvalidSignature => ErrorCategory::Token,
            Self::TokenExpired => ErrorCategory::Token,
            Self::IssuerMismatch { .. } => ErrorCategory::Token,
            Self::AudienceMismatch { .. } => ErrorCategory::Token,
            Self::CredentialExchangeFailed { .. } => ErrorCategory::Credential,
            Self::InvalidExpiry { .. } => ErrorCategory::Validation,
            Self::UserNotFound => ErrorCategory::Validation,
            Self::Configuration { .. } => ErrorCategory::Configuration,
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => Self::TokenExpired,
            ErrorKind::InvalidSignature => Self::InvalidSignature,
            ErrorKind::InvalidRsaKey(_) | ErrorKind::InvalidKeyFormat => {
                Self::malformed_key_set(err.to_string())
            }
            _ => Self::malformed_token(err.to_string()),
        }
    }
}

/// Categories of errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Provider endpoint failures.
    Upstream,
    /// Token parsing and claim failures.
    Token,
    /// Signing key resolution failures.
    Key,
    /// Service credential minting failures.
    Credential,
    /// Client-side input validation failures.
    Validation,
    /// Configuration errors.
    Configuration,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upstream => write!(f, "upstream"),
            Self::Token => write!(f, "token"),
            Self::Key => write!(f, "key"),
            Self::Credential => write!(f, "credential"),
            Self::Validation => write!(f, "validation"),
            Self::Configuration => write!(f, "configuration"),
        }
    }
}
