//! Claim and wire types.
//!
//! [`DecodedToken`] is only ever produced by
//! [`TokenVerifier`](crate::verifier::TokenVerifier): it has no public
//! constructor and does not implement `Deserialize`. Untrusted payloads are
//! decoded into the crate-private [`RawClaims`] and converted after every
//! check has passed.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// =============================================================================
// Verified claims
// =============================================================================

/// Claims of a token whose signature, expiry, issuer and audience have been
/// verified.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedToken {
    iss: String,
    aud: Audience,
    #[serde(skip)]
    matched_audience: String,
    sub: String,
    iat: i64,
    exp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    auth_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    email_verified: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    picture: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    firebase: Option<FirebaseClaims>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl DecodedToken {
    /// Issuer (`iss`).
    pub fn issuer(&self) -> &str {
        &self.iss
    }

    /// The project id matched in `aud`.
    pub fn audience(&self) -> &str {
        &self.matched_audience
    }

    /// Every value of `aud`, in token order.
    pub fn audiences(&self) -> Vec<&str> {
        match &self.aud {
            Audience::One(aud) => vec![aud.as_str()],
            Audience::Many(auds) => auds.iter().map(String::as_str).collect(),
        }
    }

    /// Subject (`sub`), the user's uid.
    pub fn subject(&self) -> &str {
        &self.sub
    }

    /// Alias for [`subject`](Self::subject).
    pub fn uid(&self) -> &str {
        &self.sub
    }

    /// Issued-at, unix seconds.
    pub fn issued_at(&self) -> i64 {
        self.iat
    }

    /// Expiry, unix seconds.
    pub fn expires_at(&self) -> i64 {
        self.exp
    }

    /// Time the user authenticated, unix seconds.
    pub fn auth_time(&self) -> Option<i64> {
        self.auth_time
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    pub fn email_verified(&self) -> Option<bool> {
        self.email_verified
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn picture(&self) -> Option<&str> {
        self.picture.as_deref()
    }

    /// Provider-specific sign-in details.
    pub fn firebase(&self) -> Option<&FirebaseClaims> {
        self.firebase.as_ref()
    }

    /// Any claim not covered by a dedicated accessor (custom claims).
    pub fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }

    /// Looks up a claim by name, including the standard ones.
    pub fn claim(&self, name: &str) -> Option<Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(mut map)) => map.remove(name),
            _ => None,
        }
    }
}

/// The `firebase` claim block.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FirebaseClaims {
    /// Provider used for the sign-in (`password`, `google.com`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sign_in_provider: Option<String>,

    /// Linked identities per provider.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub identities: Map<String, Value>,

    /// Tenant id for multi-tenant projects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
}

// =============================================================================
// Untrusted claims
// =============================================================================

/// `aud` is a string for provider tokens but may be an array per RFC 7519.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub(crate) enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    pub(crate) fn contains(&self, expected: &str) -> bool {
        match self {
            Self::One(aud) => aud == expected,
            Self::Many(auds) => auds.iter().any(|aud| aud == expected),
        }
    }

    pub(crate) fn to_display(&self) -> String {
        match self {
            Self::One(aud) => aud.clone(),
            Self::Many(auds) => auds.join(","),
        }
    }
}

/// Payload as decoded from an unverified token.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct RawClaims {
    #[serde(default)]
    pub(crate) iss: String,
    pub(crate) aud: Audience,
    #[serde(default)]
    pub(crate) sub: String,
    pub(crate) iat: i64,
    pub(crate) exp: i64,
    #[serde(default)]
    pub(crate) auth_time: Option<i64>,
    #[serde(default)]
    pub(crate) user_id: Option<String>,
    #[serde(default)]
    pub(crate) email: Option<String>,
    #[serde(default)]
    pub(crate) email_verified: Option<bool>,
    #[serde(default)]
    pub(crate) name: Option<String>,
    #[serde(default)]
    pub(crate) picture: Option<String>,
    #[serde(default)]
    pub(crate) firebase: Option<FirebaseClaims>,
    #[serde(flatten)]
    pub(crate) extra: Map<String, Value>,
}

impl RawClaims {
    /// Converts checked claims. `audience` is the matched expected value.
    pub(crate) fn into_verified(self, audience: &str) -> DecodedToken {
        DecodedToken {
            iss: self.iss,
            aud: self.aud,
            matched_audience: audience.to_string(),
            sub: self.sub,
            iat: self.iat,
            exp: self.exp,
            auth_time: self.auth_time,
            user_id: self.user_id,
            email: self.email,
            email_verified: self.email_verified,
            name: self.name,
            picture: self.picture,
            firebase: self.firebase,
            extra: self.extra,
        }
    }
}

// =============================================================================
// Identity toolkit responses
// =============================================================================

/// Response of `accounts:signInWithPassword`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInToken {
    /// ID token for the signed-in user.
    pub id_token: String,

    pub email: String,

    /// Refresh token for the secure token endpoint.
    #[serde(default)]
    pub refresh_token: String,

    /// ID token lifetime in seconds, as a decimal string.
    #[serde(default)]
    pub expires_in: String,

    /// The user's uid.
    pub local_id: String,

    #[serde(default)]
    pub registered: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl SignInToken {
    /// ID token lifetime in seconds, if the provider sent a parseable value.
    pub fn expires_in_secs(&self) -> Option<u64> {
        self.expires_in.parse().ok()
    }
}

/// A user record from `accounts:lookup`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// The user's uid.
    pub local_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(default)]
    pub email_verified: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,

    #[serde(default)]
    pub disabled: bool,

    /// Creation time, epoch milliseconds as a decimal string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,

    /// Last sign-in time, epoch milliseconds as a decimal string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_login_at: Option<String>,

    /// Last password change, epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_updated_at: Option<i64>,

    #[serde(default)]
    pub provider_user_info: Vec<ProviderUserInfo>,

    /// Fields without a dedicated member.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A linked identity provider on a [`User`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderUserInfo {
    pub provider_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub federated_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
}

/// Result of a password sign-in: the provider's token response and the
/// user it belongs to.
#[derive(Debug, Clone, Serialize)]
pub struct SignInResult {
    pub token: SignInToken,
    pub user: User,
}
