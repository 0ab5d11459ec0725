//! Round trips to the identity provider (a Keycloak realm).
//!
//! Every operation is a single outbound call with no retry: a failure is
//! terminal for the request that triggered it, which keeps side effects such
//! as user creation from being duplicated.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::time::Duration;
use tracing::{debug, warn};

use crate::{
    config::IdentityConfig,
    errors::AuthError,
    models::{subject::Subject, token::TokenPair},
};

/// New user registration forwarded to the provider's admin API.
#[derive(Debug, Clone, Deserialize)]
pub struct SignupRequest {
    /// Email address, also used as the username.
    #[serde(rename = "username", alias = "email")]
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub given_name: String,
    #[serde(default)]
    pub family_name: String,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resource-owner-password grant.
    async fn login(&self, username: &str, password: &str) -> Result<TokenPair, AuthError>;

    /// Refresh-token grant.
    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError>;

    /// Resolve the subject behind `access_token`. This is the check that
    /// actually authorizes a request.
    async fn userinfo(&self, access_token: &str) -> Result<Subject, AuthError>;

    /// Create a user with a permanent password and a verified email.
    async fn signup(&self, req: &SignupRequest) -> Result<(), AuthError>;

    /// Invalidate `refresh_token` on the provider side.
    async fn logout(&self, refresh_token: &str) -> Result<(), AuthError>;
}

/// Keycloak OpenID Connect + admin REST client.
#[derive(Clone, Debug)]
pub struct KeycloakGateway {
    config: IdentityConfig,
    http: Client,
}

#[derive(Debug, Deserialize)]
struct UserInfoResponse {
    sub: String,
    email: Option<String>,
    preferred_username: Option<String>,
    #[serde(default)]
    email_verified: bool,
    #[serde(default)]
    given_name: String,
    #[serde(default)]
    family_name: String,
}

#[derive(Debug, Deserialize)]
struct ServiceToken {
    access_token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NewUser<'a> {
    email: &'a str,
    username: &'a str,
    enabled: bool,
    email_verified: bool,
    first_name: &'a str,
    last_name: &'a str,
    credentials: [NewCredential<'a>; 1],
}

#[derive(Debug, Serialize)]
struct NewCredential<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    value: &'a str,
    temporary: bool,
}

impl KeycloakGateway {
    pub fn new(config: IdentityConfig, timeout: Duration) -> reqwest::Result<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self { config, http })
    }

    fn realm_url(&self, path: &str) -> String {
        format!(
            "{}/realms/{}/protocol/openid-connect/{}",
            self.config.base_url, self.config.realm, path
        )
    }

    fn admin_users_url(&self) -> String {
        format!(
            "{}/admin/realms/{}/users",
            self.config.base_url, self.config.realm
        )
    }

    /// POST a grant to the token endpoint. The outer error is a transport
    /// failure; the inner one the status of a rejected grant.
    async fn token_grant<T: DeserializeOwned>(
        &self,
        call: &'static str,
        params: &[(&str, &str)],
    ) -> Result<Result<T, StatusCode>, AuthError> {
        let mut form = vec![
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];
        form.extend_from_slice(params);

        let resp = send(call, self.http.post(self.realm_url("token")).form(&form)).await?;
        if resp.status() != StatusCode::OK {
            return Ok(Err(rejected(call, resp).await));
        }
        Ok(Ok(decode_json(call, resp).await?))
    }

    /// Client-credentials grant for the service account. The token never
    /// leaves this type.
    async fn service_token(&self) -> Result<String, AuthError> {
        match self
            .token_grant::<ServiceToken>(
                "client_credentials",
                &[("grant_type", "client_credentials")],
            )
            .await
        {
            Ok(Ok(token)) => Ok(token.access_token),
            Ok(Err(_)) => Err(AuthError::AdminTokenUnavailable),
            Err(err) => {
                warn!(error = %err, "service token request failed");
                Err(AuthError::AdminTokenUnavailable)
            }
        }
    }
}

#[async_trait]
impl IdentityProvider for KeycloakGateway {
    async fn login(&self, username: &str, password: &str) -> Result<TokenPair, AuthError> {
        self.token_grant::<TokenPair>(
            "login",
            &[
                ("grant_type", "password"),
                ("username", username),
                ("password", password),
            ],
        )
        .await?
        .map_err(|_| AuthError::InvalidCredentials)
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        self.token_grant::<TokenPair>(
            "refresh",
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
            ],
        )
        .await?
        .map_err(|_| AuthError::RefreshRejected)
    }

    async fn userinfo(&self, access_token: &str) -> Result<Subject, AuthError> {
        let call = "userinfo";
        let resp = send(
            call,
            self.http
                .get(self.realm_url("userinfo"))
                .bearer_auth(access_token),
        )
        .await?;
        if resp.status() != StatusCode::OK {
            rejected(call, resp).await;
            return Err(AuthError::TokenInvalid);
        }

        let info: UserInfoResponse = decode_json(call, resp).await?;
        Ok(Subject {
            sub: info.sub,
            email: info.email.or(info.preferred_username).unwrap_or_default(),
            email_verified: info.email_verified,
            given_name: info.given_name,
            family_name: info.family_name,
        })
    }

    async fn signup(&self, req: &SignupRequest) -> Result<(), AuthError> {
        let call = "create_user";
        let admin_token = self.service_token().await?;

        let user = NewUser {
            email: &req.email,
            username: &req.email,
            enabled: true,
            email_verified: true,
            first_name: &req.given_name,
            last_name: &req.family_name,
            credentials: [NewCredential {
                kind: "password",
                value: &req.password,
                temporary: false,
            }],
        };

        let resp = send(
            call,
            self.http
                .post(self.admin_users_url())
                .bearer_auth(admin_token)
                .json(&user),
        )
        .await?;
        if resp.status() != StatusCode::CREATED {
            let status = rejected(call, resp).await;
            return Err(AuthError::UserCreateRejected {
                status: status.as_u16(),
            });
        }

        debug!(email = %req.email, "user created");
        Ok(())
    }

    async fn logout(&self, refresh_token: &str) -> Result<(), AuthError> {
        let call = "logout";
        let form = [
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("refresh_token", refresh_token),
        ];
        let resp = send(call, self.http.post(self.realm_url("logout")).form(&form)).await?;

        match resp.status() {
            StatusCode::OK | StatusCode::NO_CONTENT => Ok(()),
            _ => {
                let status = rejected(call, resp).await;
                Err(AuthError::LogoutRejected {
                    status: status.as_u16(),
                })
            }
        }
    }
}

async fn send(call: &'static str, request: RequestBuilder) -> Result<Response, AuthError> {
    request
        .send()
        .await
        .map_err(|err| AuthError::UpstreamUnavailable {
            call,
            message: err.to_string(),
        })
}

async fn decode_json<T: DeserializeOwned>(
    call: &'static str,
    resp: Response,
) -> Result<T, AuthError> {
    resp.json::<T>()
        .await
        .map_err(|err| AuthError::UpstreamUnavailable {
            call,
            message: format!("undecodable response: {}", err),
        })
}

/// Log a non-success response and hand back its status. The body is kept out
/// of anything returned to callers.
async fn rejected(call: &'static str, resp: Response) -> StatusCode {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    debug!(call, %status, %body, "identity provider rejected request");
    status
}
