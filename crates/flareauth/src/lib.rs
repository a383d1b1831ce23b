//! # flareauth
//!
//! Credential verification and caching for Firebase / Google Identity
//! Toolkit projects.
//!
//! This crate provides:
//! - Signing key set fetching with `Cache-Control` aware caching
//! - ID token and session cookie verification
//! - Service-account bearer token minting with caching per account and scope
//! - Password sign-in, user lookup and session cookie minting
//!
//! ## Overview
//!
//! Every cached value goes through a pluggable [`CredentialCache`]
//! (in-memory, Redis or no-op). Cached key sets and credentials carry their
//! own expiry and are re-validated on read, so a backend that ignores TTLs
//! never serves stale material.
//!
//! ## Modules
//!
//! - [`config`] - Engine configuration
//! - [`error`] - Error taxonomy
//! - [`cache`] - Credential cache abstraction and backends
//! - [`keys`] - Signing key sets and key sources
//! - [`verifier`] - Token verification
//! - [`credentials`] - Service credential minting
//! - [`facade`] - High-level credential flows
//! - [`types`] - Claim and wire types

pub mod cache;
pub mod config;
pub mod credentials;
pub mod error;
pub mod facade;
pub mod keys;
pub mod types;
pub mod verifier;

pub use cache::{CacheError, CacheStats, CredentialCache, MemoryCache, NoOpCache, RedisCache};
pub use config::{AuthConfig, CacheBackendKind, ConfigError, EndpointsConfig};
pub use credentials::{ServiceCredential, ServiceCredentialProvider};
pub use error::{AuthError, ErrorCategory};
pub use facade::{
    AuthFacade, DEFAULT_SESSION_DURATION, MAX_SESSION_DURATION, MIN_SESSION_DURATION,
};
pub use keys::{CachedKeySource, HttpKeySource, KeySource, KeySourceConfig, SigningKeySet};
pub use types::{DecodedToken, FirebaseClaims, ProviderUserInfo, SignInResult, SignInToken, User};
pub use verifier::{TokenVerifier, VerificationTarget};

/// Type alias for credential operation results.
pub type AuthResult<T> = Result<T, AuthError>;

/// Current time as unix seconds.
pub(crate) fn unix_now() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

/// Prelude module for convenient imports.
///
/// ```ignore
/// use flareauth::prelude::*;
/// ```
pub mod prelude {
    pub use crate::AuthResult;
    pub use crate::cache::{CredentialCache, MemoryCache, NoOpCache, RedisCache};
    pub use crate::config::{AuthConfig, ConfigError};
    pub use crate::credentials::{ServiceCredential, ServiceCredentialProvider};
    pub use crate::error::{AuthError, ErrorCategory};
    pub use crate::facade::AuthFacade;
    pub use crate::keys::{CachedKeySource, HttpKeySource, KeySource, SigningKeySet};
    pub use crate::types::{DecodedToken, SignInResult, SignInToken, User};
    pub use crate::verifier::{TokenVerifier, VerificationTarget};
}
