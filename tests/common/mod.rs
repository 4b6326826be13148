// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

use axum::{
    body::Body,
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use jsonwebtoken::{encode, Algorithm, DecodingKey, EncodingKey, Header};
use reelreview::config::Config;
use reelreview::db::{FirestoreDb, MemoryDb};
use reelreview::routes::create_router;
use reelreview::routes::users::REFRESH_COOKIE;
use reelreview::services::GoogleOidcVerifier;
use reelreview::AppState;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tower::ServiceExt;

pub const GOOGLE_TEST_KID: &str = "integration-kid";
pub const GOOGLE_TEST_SECRET: &[u8] = b"integration-google-secret";

/// Check if emulator is available via environment variable.
#[allow(dead_code)]
pub fn emulator_available() -> bool {
    std::env::var("FIRESTORE_EMULATOR_HOST").is_ok()
}

/// Skip test with message if emulator not available.
#[macro_export]
macro_rules! require_emulator {
    () => {
        if !crate::common::emulator_available() {
            eprintln!("⚠️  Skipping: FIRESTORE_EMULATOR_HOST not set");
            return;
        }
    };
}

/// Create a test database connection.
#[allow(dead_code)]
pub async fn test_db() -> FirestoreDb {
    FirestoreDb::new("test-project")
        .await
        .expect("Failed to connect to Firestore emulator")
}

/// Create a test app on the in-memory store, trusting Google credentials
/// signed with [`GOOGLE_TEST_SECRET`].
/// Returns the router, the shared state and the store.
#[allow(dead_code)]
pub fn create_test_app() -> (Router, Arc<AppState>, Arc<MemoryDb>) {
    let config = Config::test_default();
    let store = Arc::new(MemoryDb::new());
    let verifier = GoogleOidcVerifier::new_with_static_key(
        &config,
        GOOGLE_TEST_KID,
        Algorithm::HS256,
        DecodingKey::from_secret(GOOGLE_TEST_SECRET),
    )
    .expect("static verifier");

    let state = Arc::new(AppState::new(config, store.clone(), Arc::new(verifier)));
    (create_router(state.clone()), state, store)
}

/// Mint a Google-style ID token the test app accepts.
#[allow(dead_code)]
pub fn google_credential(email: &str, subject: &str, name: Option<&str>) -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs();

    let claims = json!({
        "iss": "https://accounts.google.com",
        "aud": Config::test_default().google_client_id,
        "sub": subject,
        "iat": now,
        "exp": now + 3600,
        "email": email,
        "email_verified": true,
        "name": name,
        "picture": "https://lh3.googleusercontent.com/a/test",
    });

    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some(GOOGLE_TEST_KID.to_string());
    encode(&header, &claims, &EncodingKey::from_secret(GOOGLE_TEST_SECRET)).unwrap()
}

/// Response pieces tests care about.
#[allow(dead_code)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

#[allow(dead_code)]
impl TestResponse {
    /// Raw refresh token from a `Set-Cookie` header, if one was set.
    pub fn refresh_cookie(&self) -> Option<String> {
        self.set_cookie_header().and_then(|raw| {
            raw.split(';')
                .next()
                .and_then(|pair| pair.trim().strip_prefix(&format!("{REFRESH_COOKIE}=")))
                .map(str::to_string)
        })
    }

    pub fn set_cookie_header(&self) -> Option<String> {
        self.headers
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find(|v| v.starts_with(REFRESH_COOKIE))
            .map(str::to_string)
    }

    pub fn access_token(&self) -> String {
        self.body["accessToken"]
            .as_str()
            .expect("response has accessToken")
            .to_string()
    }

    pub fn error_code(&self) -> &str {
        self.body["error"].as_str().unwrap_or("")
    }
}

/// Send a request and decode the JSON body (`Null` when empty).
#[allow(dead_code)]
pub async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    bearer: Option<&str>,
    cookie: Option<&str>,
    body: Option<Value>,
) -> TestResponse {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    if let Some(raw) = cookie {
        builder = builder.header(header::COOKIE, format!("{REFRESH_COOKIE}={raw}"));
    }
    let request = match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };

    TestResponse {
        status,
        headers,
        body,
    }
}

/// POST a JSON body without credentials.
#[allow(dead_code)]
pub async fn post_json(app: &Router, uri: &str, body: Value) -> TestResponse {
    send(app, Method::POST, uri, None, None, Some(body)).await
}

/// Sign up and return the response.
#[allow(dead_code)]
pub async fn signup(app: &Router, email: &str, password: &str, username: &str) -> TestResponse {
    post_json(
        app,
        "/users/signup",
        json!({"email": email, "password": password, "username": username}),
    )
    .await
}
