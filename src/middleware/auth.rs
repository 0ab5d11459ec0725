//! Bearer authentication with transparent token rotation.
//!
//! Two stages, both mounted with `axum::middleware::from_fn_with_state`:
//!
//! - [`authenticate`] resolves the caller's [`Subject`] through the identity
//!   provider, refreshing first when the presented access token is expired or
//!   about to expire and an `X-Refresh-Token` header is present. Rejections
//!   short-circuit before the handler runs.
//! - [`proactive_refresh`] runs after it and, for tokens that are still valid
//!   but inside the proactive window, rotates them alongside the handler. It
//!   never fails the request.
//!
//! Rotated tokens reach the client through the `X-New-*` response headers.

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};
use std::{sync::Arc, time::Duration};
use tracing::{debug, warn};

use crate::{
    errors::{AppError, AuthError},
    models::{subject::Subject, token::TokenPair},
    services::{identity_gateway::IdentityProvider, token_inspector},
};

pub const REFRESH_TOKEN_HEADER: HeaderName = HeaderName::from_static("x-refresh-token");
pub const NEW_ACCESS_TOKEN_HEADER: HeaderName = HeaderName::from_static("x-new-access-token");
pub const NEW_REFRESH_TOKEN_HEADER: HeaderName = HeaderName::from_static("x-new-refresh-token");
pub const TOKEN_REFRESHED_HEADER: HeaderName = HeaderName::from_static("x-token-refreshed");
pub const TOKEN_EXPIRES_IN_HEADER: HeaderName = HeaderName::from_static("x-token-expires-in");

/// Remaining-lifetime thresholds for the two refresh stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPolicy {
    /// Below this, `authenticate` refreshes before resolving the subject.
    pub refresh_threshold: Duration,
    /// Below this, `proactive_refresh` rotates tokens alongside the handler.
    pub proactive_threshold: Duration,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            refresh_threshold: Duration::from_secs(120),
            proactive_threshold: Duration::from_secs(300),
        }
    }
}

/// State shared by both middleware stages.
#[derive(Clone)]
pub struct AuthState {
    pub identity: Arc<dyn IdentityProvider>,
    pub policy: RefreshPolicy,
}

impl AuthState {
    pub fn new(identity: Arc<dyn IdentityProvider>, policy: RefreshPolicy) -> Self {
        Self { identity, policy }
    }
}

/// Request extension carrying the resolved caller.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub subject: Subject,
    /// Access token in effect for this request (the rotated one, if any).
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Set when `authenticate` rotated the caller's tokens.
    pub rotated: Option<TokenPair>,
}

impl AuthContext {
    pub fn subject_id(&self) -> &str {
        &self.subject.sub
    }
}

/// First stage: resolve the caller or reject the request.
pub async fn authenticate(
    State(state): State<AuthState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let access_token = bearer_token(req.headers())?.to_string();
    let refresh_token = refresh_token(req.headers());

    let ctx = resolve(
        state.identity.as_ref(),
        &state.policy,
        access_token,
        refresh_token,
    )
    .await?;

    let rotated = ctx.rotated.clone();
    req.extensions_mut().insert(ctx);

    let mut response = next.run(req).await;
    if let Some(tokens) = rotated {
        set_rotation_headers(response.headers_mut(), &tokens);
    }
    Ok(response)
}

/// Second stage: rotate soon-to-expire tokens without holding up the handler.
pub async fn proactive_refresh(
    State(state): State<AuthState>,
    req: Request,
    next: Next,
) -> Response {
    let pending = req.extensions().get::<AuthContext>().and_then(|ctx| {
        if ctx.rotated.is_some() {
            return None;
        }
        let refresh = ctx.refresh_token.clone()?;
        token_inspector::inspect(&ctx.access_token)
            .expires_within(state.policy.proactive_threshold)
            .then(|| (ctx.subject.sub.clone(), refresh))
    });

    let Some((subject_id, refresh)) = pending else {
        return next.run(req).await;
    };

    let identity = state.identity.clone();
    let (mut response, refreshed) = tokio::join!(next.run(req), async move {
        identity.refresh(&refresh).await
    });

    match refreshed {
        Ok(tokens) => {
            debug!(subject = %subject_id, "proactively rotated tokens");
            set_rotation_headers(response.headers_mut(), &tokens);
        }
        Err(err) => debug!(subject = %subject_id, error = %err, "proactive refresh failed"),
    }
    response
}

/// Decide who the caller is, refreshing when the presented token warrants it.
pub async fn resolve(
    identity: &dyn IdentityProvider,
    policy: &RefreshPolicy,
    access_token: String,
    refresh_token: Option<String>,
) -> Result<AuthContext, AuthError> {
    let token_state = token_inspector::inspect(&access_token);
    let expired = token_state.is_expired();

    if let Some(refresh) = refresh_token.as_deref() {
        if expired || token_state.expires_within(policy.refresh_threshold) {
            match rotate(identity, refresh).await {
                Ok((tokens, subject)) => {
                    debug!(subject = %subject.sub, expired, "rotated tokens before resolving");
                    return Ok(AuthContext {
                        subject,
                        access_token: tokens.access_token.clone(),
                        refresh_token: Some(tokens.refresh_token.clone()),
                        rotated: Some(tokens),
                    });
                }
                Err(err) if expired => {
                    debug!(error = %err, "refresh of expired token failed");
                    return Err(AuthError::SessionExpired);
                }
                Err(err) => {
                    debug!(error = %err, "refresh of expiring token failed, keeping presented token");
                }
            }
        }
    }

    match identity.userinfo(&access_token).await {
        Ok(subject) => {
            debug!(subject = %subject.sub, "resolved presented token");
            Ok(AuthContext {
                subject,
                access_token,
                refresh_token,
                rotated: None,
            })
        }
        Err(err @ AuthError::UpstreamUnavailable { .. }) => Err(err),
        Err(err) if expired => {
            debug!(error = %err, "expired token rejected by identity provider");
            Err(AuthError::SessionExpired)
        }
        Err(err) => {
            debug!(error = %err, "token rejected by identity provider");
            Err(AuthError::TokenInvalid)
        }
    }
}

/// Refresh, then resolve the subject behind the new access token. Either call
/// failing fails the whole rotation.
async fn rotate(
    identity: &dyn IdentityProvider,
    refresh_token: &str,
) -> Result<(TokenPair, Subject), AuthError> {
    let tokens = identity.refresh(refresh_token).await?;
    let subject = identity.userinfo(&tokens.access_token).await?;
    Ok((tokens, subject))
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingOrMalformedCredential(
            "Authorization header required",
        ))?
        .to_str()
        .map_err(|_| AuthError::MissingOrMalformedCredential("Invalid authorization header"))?;

    let (scheme, token) = value
        .split_once(' ')
        .ok_or(AuthError::MissingOrMalformedCredential(
            "Invalid authorization header format",
        ))?;
    let token = token.trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return Err(AuthError::MissingOrMalformedCredential(
            "Invalid authorization header format",
        ));
    }
    Ok(token)
}

fn refresh_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(REFRESH_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Surface rotated tokens to the client.
pub fn set_rotation_headers(headers: &mut HeaderMap, tokens: &TokenPair) {
    let (Ok(access), Ok(refresh)) = (
        HeaderValue::from_str(&tokens.access_token),
        HeaderValue::from_str(&tokens.refresh_token),
    ) else {
        warn!("rotated tokens are not valid header values; dropping them");
        return;
    };

    headers.insert(NEW_ACCESS_TOKEN_HEADER, access);
    headers.insert(NEW_REFRESH_TOKEN_HEADER, refresh);
    headers.insert(TOKEN_REFRESHED_HEADER, HeaderValue::from_static("true"));
    headers.insert(TOKEN_EXPIRES_IN_HEADER, HeaderValue::from(tokens.expires_in));
}
