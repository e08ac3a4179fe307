#![allow(dead_code)]

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use serde_json::Value;
use slotdrop::{
    app::build_app,
    auth::{
        dto::OAuthProfile,
        oauth::{OAuthClient, OAuthProviders},
        repo_types::AuthProvider,
    },
    config::AppConfig,
    state::AppState,
};
use tower::ServiceExt;

/// Provider double: any code in `profiles` exchanges to that profile.
pub struct FakeOAuth {
    pub profiles: HashMap<String, OAuthProfile>,
}

#[async_trait]
impl OAuthClient for FakeOAuth {
    fn authorization_url(&self, state: &str) -> String {
        format!("https://idp.test/authorize?client_id=test&state={state}")
    }

    async fn exchange(&self, code: &str) -> anyhow::Result<OAuthProfile> {
        self.profiles
            .get(code)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("invalid_grant"))
    }
}

pub fn google_profile(email: &str, photo: Option<&str>) -> OAuthProfile {
    OAuthProfile {
        email: email.into(),
        display_name: Some("Ada Lovelace".into()),
        first_name: Some("Ada".into()),
        last_name: Some("Lovelace".into()),
        provider: AuthProvider::Google,
        photo: photo.map(String::from),
    }
}

pub fn app() -> Router {
    app_with_google(HashMap::new())
}

pub fn app_with_google(profiles: HashMap<String, OAuthProfile>) -> Router {
    app_with_config(AppState::test_config(), profiles)
}

pub fn app_with_config(config: AppConfig, profiles: HashMap<String, OAuthProfile>) -> Router {
    let oauth = OAuthProviders {
        google: Some(Arc::new(FakeOAuth { profiles })),
        microsoft: None,
    };
    build_app(AppState::in_memory(config, oauth)).unwrap()
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

/// Browser stand-in: keeps the session cookie and the last CSRF token it saw.
#[derive(Clone)]
pub struct TestClient {
    app: Router,
    cookie: Option<String>,
    strict_cookie: bool,
    pub csrf: Option<String>,
}

impl TestClient {
    pub fn new(app: Router) -> Self {
        Self {
            app,
            cookie: None,
            strict_cookie: false,
            csrf: None,
        }
    }

    pub async fn send(&mut self, method: Method, uri: &str, body: Option<Value>) -> TestResponse {
        self.send_with(method, uri, body, self.csrf.clone()).await
    }

    pub async fn send_with(
        &mut self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        csrf: Option<String>,
    ) -> TestResponse {
        let cookie = self.cookie.clone();
        self.dispatch(method, uri, body, csrf, cookie).await
    }

    /// Top-level navigation arriving from another site, e.g. a provider
    /// redirecting back. Browsers withhold `SameSite=Strict` cookies here.
    pub async fn get_cross_site(&mut self, uri: &str) -> TestResponse {
        let cookie = self.cookie.clone().filter(|_| !self.strict_cookie);
        self.dispatch(Method::GET, uri, None, None, cookie).await
    }

    async fn dispatch(
        &mut self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        csrf: Option<String>,
        cookie: Option<String>,
    ) -> TestResponse {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(cookie) = cookie {
            req = req.header(header::COOKIE, cookie);
        }
        if let Some(token) = csrf {
            req = req.header("x-csrf-token", token);
        }
        let req = match body {
            Some(json) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };

        let res = self.app.clone().oneshot(req).await.unwrap();
        self.remember_cookie(res.headers());

        let status = res.status();
        let headers = res.headers().clone();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let body: Value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        if let Some(token) = body.get("csrfToken").and_then(Value::as_str) {
            self.csrf = Some(token.to_string());
        }
        TestResponse {
            status,
            headers,
            body,
        }
    }

    fn remember_cookie(&mut self, headers: &HeaderMap) {
        let Some(raw) = headers
            .get(header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
        else {
            return;
        };
        let pair = raw.split(';').next().unwrap_or_default().trim();
        let expired = raw.contains("Max-Age=0") || pair.ends_with('=');
        self.strict_cookie = raw.to_ascii_lowercase().contains("samesite=strict");
        self.cookie = if expired { None } else { Some(pair.to_string()) };
    }

    pub async fn get(&mut self, uri: &str) -> TestResponse {
        self.send(Method::GET, uri, None).await
    }

    pub async fn post(&mut self, uri: &str, body: Value) -> TestResponse {
        self.send(Method::POST, uri, Some(body)).await
    }

    pub async fn delete(&mut self, uri: &str) -> TestResponse {
        self.send(Method::DELETE, uri, None).await
    }

    pub async fn fetch_csrf(&mut self) -> String {
        let res = self.get("/csrf-token").await;
        assert_eq!(res.status, StatusCode::OK);
        res.body["csrfToken"].as_str().unwrap().to_string()
    }

    pub async fn register(&mut self, body: Value) -> TestResponse {
        self.fetch_csrf().await;
        self.post("/users/register", body).await
    }

    pub async fn login(&mut self, email: &str, password: &str) -> TestResponse {
        self.fetch_csrf().await;
        self.post(
            "/users/login",
            serde_json::json!({ "email": email, "password": password }),
        )
        .await
    }
}

/// Seconds from a `Set-Cookie` header's `Max-Age` attribute.
pub fn max_age(headers: &HeaderMap) -> Option<i64> {
    let raw = headers.get(header::SET_COOKIE)?.to_str().ok()?;
    raw.split(';')
        .map(str::trim)
        .find_map(|attr| attr.strip_prefix("Max-Age="))
        .and_then(|v| v.parse().ok())
}

pub fn registration(email: &str) -> Value {
    serde_json::json!({
        "email": email,
        "password": "password1",
        "username": "abc",
        "firstName": "A",
        "lastName": "B"
    })
}
