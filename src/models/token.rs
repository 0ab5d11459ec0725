//! Token material exchanged with the identity provider.

use serde::{Deserialize, Serialize};

/// Access + refresh token pair returned by the provider's token endpoint.
///
/// Never persisted server-side: it is handed to the caller, who resubmits the
/// access token as a bearer credential and the refresh token via
/// `X-Refresh-Token`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,

    /// Access token lifetime in seconds.
    #[serde(default)]
    pub expires_in: i64,

    #[serde(default)]
    pub refresh_expires_in: i64,

    pub refresh_token: String,

    #[serde(default = "default_token_type")]
    pub token_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_state: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// Claims read from an access token without verifying its signature.
///
/// Only used to decide whether a refresh is worth attempting; the provider's
/// userinfo endpoint stays the authority on whether the token is acceptable.
#[derive(Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct TokenClaims {
    pub sub: Option<String>,
    pub exp: Option<i64>,
    pub iat: Option<i64>,
    pub nbf: Option<i64>,
    pub email: Option<String>,
    pub preferred_username: Option<String>,
}
