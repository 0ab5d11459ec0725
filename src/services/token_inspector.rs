//! Unverified reading of access token claims.
//!
//! Signature verification belongs to the identity provider; the gateway only
//! peeks at `exp` to decide whether a refresh is worth attempting before it
//! asks the provider who the caller is.

use chrono::{DateTime, Utc};
use jsonwebtoken::{DecodingKey, Validation, decode};
use std::{collections::HashSet, time::Duration};

use crate::models::token::TokenClaims;

/// Expiry classification of an access token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    /// Unparseable, missing `exp`, or `exp` at or before now.
    Expired,
    /// Time left until `exp`.
    Valid(Duration),
}

impl TokenState {
    pub fn is_expired(&self) -> bool {
        matches!(self, TokenState::Expired)
    }

    /// True when the token is still valid but has less than `threshold` left.
    pub fn expires_within(&self, threshold: Duration) -> bool {
        matches!(self, TokenState::Valid(remaining) if *remaining < threshold)
    }
}

/// Decode the claims segment of a JWT without checking its signature or any
/// time-based claim.
pub fn decode_unverified(token: &str) -> Option<TokenClaims> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims = HashSet::new();

    decode::<TokenClaims>(token, &DecodingKey::from_secret(&[]), &validation)
        .map(|data| data.claims)
        .ok()
}

pub fn inspect(token: &str) -> TokenState {
    inspect_at(token, Utc::now())
}

/// Classify `token` against the supplied clock.
pub fn inspect_at(token: &str, now: DateTime<Utc>) -> TokenState {
    let Some(exp) = decode_unverified(token).and_then(|claims| claims.exp) else {
        return TokenState::Expired;
    };

    let remaining_ms = exp
        .saturating_mul(1000)
        .saturating_sub(now.timestamp_millis());
    if remaining_ms <= 0 {
        TokenState::Expired
    } else {
        TokenState::Valid(Duration::from_millis(remaining_ms as u64))
    }
}
