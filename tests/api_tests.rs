use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, Response, StatusCode, header},
};
use chrono::Utc;
use http_body_util::BodyExt;
use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::{Value, json};
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tower::ServiceExt;

use file_gateway::{
    errors::AuthError,
    middleware::{AuthState, RefreshPolicy},
    models::{subject::Subject, token::TokenPair},
    routes::routes::{RouterOptions, routes},
    services::{
        file_service::FileService,
        identity_gateway::{IdentityProvider, SignupRequest},
        object_backend::MemoryBackend,
    },
    state::AppState,
};

fn jwt(sub: &str, exp_offset_secs: i64) -> String {
    encode(
        &Header::default(),
        &json!({ "sub": sub, "exp": Utc::now().timestamp() + exp_offset_secs }),
        &EncodingKey::from_secret(b"throwaway"),
    )
    .unwrap()
}

fn subject(sub: &str) -> Subject {
    Subject {
        sub: sub.into(),
        email: format!("{}@example.com", sub),
        email_verified: true,
        given_name: "Test".into(),
        family_name: "User".into(),
    }
}

fn pair(access: &str, refresh: &str) -> TokenPair {
    TokenPair {
        access_token: access.into(),
        expires_in: 300,
        refresh_expires_in: 1800,
        refresh_token: refresh.into(),
        token_type: "Bearer".into(),
        id_token: None,
        session_state: None,
        scope: None,
    }
}

/// In-process stand-in for the identity provider.
#[derive(Default)]
struct StubIdentity {
    access: Mutex<HashMap<String, Subject>>,
    refresh: Mutex<HashMap<String, TokenPair>>,
    users: Mutex<Vec<String>>,
    refresh_calls: AtomicUsize,
}

impl StubIdentity {
    fn accept(&self, token: &str, sub: &str) {
        self.access
            .lock()
            .unwrap()
            .insert(token.to_string(), subject(sub));
    }

    fn rotate(&self, refresh_token: &str, tokens: TokenPair) {
        self.refresh
            .lock()
            .unwrap()
            .insert(refresh_token.to_string(), tokens);
    }
}

#[async_trait]
impl IdentityProvider for StubIdentity {
    async fn login(&self, username: &str, password: &str) -> Result<TokenPair, AuthError> {
        if username == "alice@example.com" && password == "password123" {
            Ok(pair("login-access", "login-refresh"))
        } else {
            Err(AuthError::InvalidCredentials)
        }
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.refresh
            .lock()
            .unwrap()
            .get(refresh_token)
            .cloned()
            .ok_or(AuthError::RefreshRejected)
    }

    async fn userinfo(&self, access_token: &str) -> Result<Subject, AuthError> {
        self.access
            .lock()
            .unwrap()
            .get(access_token)
            .cloned()
            .ok_or(AuthError::TokenInvalid)
    }

    async fn signup(&self, req: &SignupRequest) -> Result<(), AuthError> {
        let mut users = self.users.lock().unwrap();
        if users.contains(&req.email) {
            return Err(AuthError::UserCreateRejected { status: 409 });
        }
        users.push(req.email.clone());
        Ok(())
    }

    async fn logout(&self, _refresh_token: &str) -> Result<(), AuthError> {
        Ok(())
    }
}

struct TestApp {
    router: Router,
    identity: Arc<StubIdentity>,
}

impl TestApp {
    fn new() -> Self {
        let identity = Arc::new(StubIdentity::default());
        let auth = AuthState::new(identity.clone(), RefreshPolicy::default());
        let files = FileService::new(Arc::new(MemoryBackend::new("user-files")));
        let state = AppState::new(auth, files, Duration::from_secs(3600));
        let router = routes(state, &RouterOptions::default()).unwrap();
        Self { router, identity }
    }

    /// A live token for `sub` that the stub provider accepts.
    fn login_as(&self, sub: &str) -> String {
        let token = jwt(sub, 3600);
        self.identity.accept(&token, sub);
        token
    }

    async fn send(&self, req: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(req).await.unwrap()
    }
}

fn get(uri: &str, token: &str) -> Request<Body> {
    Request::get(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn upload(token: &str, file_name: &str, content: &str) -> Request<Body> {
    let boundary = "X-TEST-BOUNDARY";
    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{name}\"\r\n\
         Content-Type: text/plain\r\n\r\n{content}\r\n--{b}--\r\n",
        b = boundary,
        name = file_name,
        content = content,
    );
    Request::post("/api/v1/files/upload")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", boundary),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn body_bytes(resp: Response<Body>) -> Vec<u8> {
    resp.into_body().collect().await.unwrap().to_bytes().to_vec()
}

async fn body_json(resp: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(resp).await).unwrap()
}

#[tokio::test]
async fn health_endpoints_respond() {
    let app = TestApp::new();
    let resp = app
        .send(Request::get("/healthz").body(Body::empty()).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app
        .send(Request::get("/readyz").body(Body::empty()).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["checks"]["object_store"]["ok"], true);
}

#[tokio::test]
async fn missing_or_malformed_authorization_is_rejected() {
    let app = TestApp::new();

    let resp = app
        .send(Request::get("/api/v1/files").body(Body::empty()).unwrap())
        .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(resp).await["status"], 401);

    let resp = app
        .send(
            Request::get("/api/v1/user/profile")
                .header(header::AUTHORIZATION, "Token abc")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unknown_token_is_invalid() {
    let app = TestApp::new();
    let resp = app.send(get("/api/v1/user/profile", &jwt("u1", 3600))).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(resp).await;
    assert_eq!(body["error"], "Invalid token");
    assert!(body.get("refreshRequired").is_none());
}

#[tokio::test]
async fn expired_token_is_rotated_transparently() {
    let app = TestApp::new();
    let fresh = jwt("u123", 300);
    app.identity.accept(&fresh, "u123");
    app.identity.rotate("refresh-1", pair(&fresh, "refresh-2"));

    let resp = app
        .send(
            Request::get("/api/v1/user/profile")
                .header(header::AUTHORIZATION, format!("Bearer {}", jwt("u123", -300)))
                .header("x-refresh-token", "refresh-1")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(resp.status(), StatusCode::OK);
    let headers = resp.headers().clone();
    assert_eq!(headers["x-new-access-token"], fresh.as_str());
    assert_eq!(headers["x-new-refresh-token"], "refresh-2");
    assert_eq!(headers["x-token-refreshed"], "true");
    assert_eq!(headers["x-token-expires-in"], "300");
    assert_eq!(body_json(resp).await["sub"], "u123");
    // The proactive stage does not refresh a second time.
    assert_eq!(app.identity.refresh_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn expired_token_without_refresh_requires_login() {
    let app = TestApp::new();
    let resp = app.send(get("/api/v1/files", &jwt("u123", -300))).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(resp).await;
    assert_eq!(body["refreshRequired"], true);
    assert_eq!(body["errorDescription"], "Please login again");
}

#[tokio::test]
async fn expired_token_with_revoked_refresh_requires_login() {
    let app = TestApp::new();
    let resp = app
        .send(
            Request::get("/api/v1/files")
                .header(header::AUTHORIZATION, format!("Bearer {}", jwt("u123", -300)))
                .header("x-refresh-token", "revoked")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(resp).await["refreshRequired"], true);
}

#[tokio::test]
async fn expiring_token_still_serves_when_refresh_fails() {
    let app = TestApp::new();
    let token = jwt("u123", 60);
    app.identity.accept(&token, "u123");

    let resp = app
        .send(
            Request::get("/api/v1/user/profile")
                .header(header::AUTHORIZATION, format!("Bearer {}", token))
                .header("x-refresh-token", "revoked")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers().get("x-token-refreshed").is_none());
}

#[tokio::test]
async fn proactive_refresh_adds_headers_without_changing_subject() {
    let app = TestApp::new();
    let token = jwt("u123", 200);
    app.identity.accept(&token, "u123");
    app.identity.rotate("refresh-1", pair("next-access", "refresh-2"));

    let resp = app
        .send(
            Request::get("/api/v1/user/profile")
                .header(header::AUTHORIZATION, format!("Bearer {}", token))
                .header("x-refresh-token", "refresh-1")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["x-new-access-token"], "next-access");
    assert_eq!(resp.headers()["x-token-refreshed"], "true");
    assert_eq!(body_json(resp).await["sub"], "u123");
}

#[tokio::test]
async fn healthy_token_is_not_refreshed() {
    let app = TestApp::new();
    let token = app.login_as("u123");
    app.identity.rotate("refresh-1", pair("next-access", "refresh-2"));

    let resp = app
        .send(
            Request::get("/api/v1/user/profile")
                .header(header::AUTHORIZATION, format!("Bearer {}", token))
                .header("x-refresh-token", "refresh-1")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers().get("x-new-access-token").is_none());
    assert_eq!(app.identity.refresh_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn login_and_refresh_endpoints() {
    let app = TestApp::new();

    let resp = app
        .send(post_json(
            "/api/v1/auth/login",
            json!({ "username": "alice@example.com", "password": "password123" }),
        ))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["access_token"], "login-access");
    assert_eq!(body["token_type"], "Bearer");

    let resp = app
        .send(post_json(
            "/api/v1/auth/login",
            json!({ "username": "alice@example.com", "password": "wrong" }),
        ))
        .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(resp).await["error"], "Invalid login attempt");

    let resp = app
        .send(post_json(
            "/api/v1/auth/refresh",
            json!({ "refreshToken": "unknown" }),
        ))
        .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = app
        .send(post_json(
            "/api/v1/auth/logout",
            json!({ "refreshToken": "login-refresh" }),
        ))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn signup_validates_and_rejects_duplicates() {
    let app = TestApp::new();
    let signup = |email: &str, password: &str| {
        post_json(
            "/api/v1/auth/signup",
            json!({
                "username": email,
                "password": password,
                "given_name": "Alice",
                "family_name": "Smith"
            }),
        )
    };

    let resp = app.send(signup("not-an-email", "password123")).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = app.send(signup("alice@example.com", "short")).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = app.send(signup("alice@example.com", "password123")).await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = app.send(signup("alice@example.com", "password123")).await;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn file_lifecycle() {
    let app = TestApp::new();
    let token = app.login_as("u123");

    let resp = app.send(upload(&token, "report.pdf", "hello world")).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let uploaded = body_json(resp).await;
    assert_eq!(uploaded["key"], "u123/report.pdf");
    assert_eq!(uploaded["name"], "report.pdf");
    assert_eq!(uploaded["size"], 11);

    let resp = app.send(get("/api/v1/files?limit=1", &token)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let listing = body_json(resp).await;
    assert_eq!(listing["files"].as_array().unwrap().len(), 1);
    assert_eq!(listing["files"][0]["name"], "report.pdf");
    assert_eq!(listing["hasMore"], false);
    assert!(listing.get("nextCursor").is_none());

    let resp = app.send(get("/api/v1/files/report.pdf", &token)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let url = body_json(resp).await;
    assert_eq!(url["expiresIn"], 3600);
    assert_eq!(url["fileId"], "report.pdf");
    assert!(url["url"].as_str().unwrap().contains("u123/report.pdf"));

    let resp = app.send(get("/api/v1/files/report.pdf/download", &token)).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"report.pdf\""
    );
    assert_eq!(resp.headers()[header::CONTENT_LENGTH], "11");
    assert_eq!(body_bytes(resp).await, b"hello world");

    let resp = app
        .send(
            Request::delete("/api/v1/files/report.pdf")
                .header(header::AUTHORIZATION, format!("Bearer {}", token))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app.send(get("/api/v1/files/report.pdf", &token)).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(resp).await["error"], "File not found");
}

#[tokio::test]
async fn double_dots_inside_a_name_are_accepted() {
    let app = TestApp::new();
    let token = app.login_as("u1");

    let resp = app.send(upload(&token, "report..final.pdf", "v2")).await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let resp = app
        .send(get("/api/v1/files/report..final.pdf/download", &token))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_bytes(resp).await, b"v2");
}

#[tokio::test]
async fn upload_without_file_field_is_bad_request() {
    let app = TestApp::new();
    let token = app.login_as("u123");
    let boundary = "B";
    let body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"other\"\r\n\r\nvalue\r\n--{b}--\r\n",
        b = boundary
    );
    let resp = app
        .send(
            Request::post("/api/v1/files/upload")
                .header(header::AUTHORIZATION, format!("Bearer {}", token))
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={}", boundary),
                )
                .body(Body::from(body))
                .unwrap(),
        )
        .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn subjects_are_isolated() {
    let app = TestApp::new();
    let alice = app.login_as("alice");
    let bob = app.login_as("bob");

    let resp = app.send(upload(&alice, "secret.txt", "alice only")).await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let listing = body_json(app.send(get("/api/v1/files", &bob)).await).await;
    assert!(listing["files"].as_array().unwrap().is_empty());

    let resp = app.send(get("/api/v1/files/secret.txt/download", &bob)).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = app.send(get("/api/v1/files/secret.txt", &bob)).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    // A cursor pointing into Alice's namespace is refused.
    let resp = app.send(get("/api/v1/files?cursor=alice/secret.txt", &bob)).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = app.send(get("/api/v1/files/secret.txt/download", &alice)).await;
    assert_eq!(body_bytes(resp).await, b"alice only");
}

#[tokio::test]
async fn listing_pages_follow_cursor() {
    let app = TestApp::new();
    let token = app.login_as("u1");
    for name in ["a.txt", "b.txt", "c.txt", "d.txt", "e.txt"] {
        let resp = app.send(upload(&token, name, "x")).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
    }

    let mut names = Vec::new();
    let mut uri = "/api/v1/files?limit=2".to_string();
    loop {
        let page = body_json(app.send(get(&uri, &token)).await).await;
        for file in page["files"].as_array().unwrap() {
            names.push(file["name"].as_str().unwrap().to_string());
        }
        if page["hasMore"] == false {
            break;
        }
        let cursor = page["nextCursor"].as_str().unwrap();
        uri = format!("/api/v1/files?limit=2&cursor={}", cursor);
    }
    assert_eq!(names, ["a.txt", "b.txt", "c.txt", "d.txt", "e.txt"]);
}

#[tokio::test]
async fn cors_preflight_allows_frontend_and_refresh_header() {
    let app = TestApp::new();
    let resp = app
        .send(
            Request::options("/api/v1/files")
                .header(header::ORIGIN, "http://localhost:3000")
                .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
                .header(
                    header::ACCESS_CONTROL_REQUEST_HEADERS,
                    "authorization,x-refresh-token",
                )
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(
        resp.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "http://localhost:3000"
    );
    assert_eq!(resp.headers()[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
}
