//! The authenticated principal as reported by the identity provider.

use serde::{Deserialize, Serialize};

/// Identity-provider-issued principal.
///
/// Resolved through the userinfo endpoint on every request and never cached,
/// so a value of this type only lives as long as the request that produced it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Subject {
    /// Stable unique identifier (`sub` claim). Also the object namespace prefix.
    pub sub: String,

    pub email: String,

    pub email_verified: bool,

    #[serde(default)]
    pub given_name: String,

    #[serde(default)]
    pub family_name: String,
}
