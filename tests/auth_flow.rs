//! End-to-end auth flows against the in-memory router.

mod common;

use std::collections::HashMap;

use axum::http::{header, StatusCode};
use common::{
    app, app_with_config, app_with_google, google_profile, max_age, registration, TestClient,
};
use slotdrop::state::AppState;
use reqwest::Url;
use serde_json::json;

#[tokio::test]
async fn register_then_duplicate() {
    let app = app();
    let mut first = TestClient::new(app.clone());
    let res = first.register(registration("a@x.com")).await;
    assert_eq!(res.status, StatusCode::CREATED);
    assert_eq!(res.body["success"], true);
    assert_eq!(res.body["user"]["provider"], "local");
    assert_eq!(res.body["user"]["email"], "a@x.com");
    assert_eq!(res.body["user"]["displayName"], "A B");
    assert!(res.body["user"].get("password").is_none());
    assert!(res.body["user"].get("passwordHash").is_none());
    assert_eq!(res.body["csrfToken"].as_str().unwrap().len(), 64);

    let mut second = TestClient::new(app);
    let res = second.register(registration("a@x.com")).await;
    assert_eq!(res.status, StatusCode::CONFLICT);
    assert_eq!(
        res.body,
        json!({ "error": "User with this email already exists" })
    );
}

#[tokio::test]
async fn distinct_registrations_get_distinct_ids() {
    let app = app();
    let mut ids = Vec::new();
    for email in ["a@x.com", "b@x.com", "c@x.com"] {
        let mut client = TestClient::new(app.clone());
        let res = client.register(registration(email)).await;
        assert_eq!(res.status, StatusCode::CREATED);
        ids.push(res.body["user"]["userId"].as_str().unwrap().to_string());
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 3);
}

#[tokio::test]
async fn parallel_registrations_have_exactly_one_winner() {
    let app = app();
    let mut set = tokio::task::JoinSet::new();
    for _ in 0..10 {
        let mut client = TestClient::new(app.clone());
        set.spawn(async move { client.register(registration("race@x.com")).await.status });
    }

    let mut created = 0;
    let mut conflicts = 0;
    while let Some(status) = set.join_next().await {
        match status.unwrap() {
            StatusCode::CREATED => created += 1,
            StatusCode::CONFLICT => conflicts += 1,
            other => panic!("unexpected status {other}"),
        }
    }
    assert_eq!(created, 1);
    assert_eq!(conflicts, 9);
}

#[tokio::test]
async fn registration_validation_messages() {
    let mut client = TestClient::new(app());
    let mut body = registration("a@x.com");
    body["password"] = json!("short");
    let res = client.register(body).await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.body["error"], "Password must be at least 8 characters");

    let mut body = registration("not-an-email");
    body["username"] = json!("ab");
    let res = client.register(body).await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.body["error"], "Valid email is required");
}

#[tokio::test]
async fn login_failures_are_indistinguishable() {
    let app = app();
    TestClient::new(app.clone())
        .register(registration("a@x.com"))
        .await;

    let mut client = TestClient::new(app);
    let wrong = client.login("a@x.com", "password2").await;
    let unknown = client.login("nobody@x.com", "password1").await;
    assert_eq!(wrong.status, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong.status, unknown.status);
    assert_eq!(wrong.body, unknown.body);
    assert_eq!(wrong.body, json!({ "error": "Invalid email or password" }));

    let ok = client.login("a@x.com", "password1").await;
    assert_eq!(ok.status, StatusCode::OK);
    assert_eq!(ok.body["success"], true);
}

#[tokio::test]
async fn status_follows_login_and_logout() {
    let app = app();
    TestClient::new(app.clone())
        .register(registration("a@x.com"))
        .await;

    let mut client = TestClient::new(app);
    let res = client.get("/auth/status").await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body, json!({ "isAuthenticated": false, "user": null }));

    let login = client.login("a@x.com", "password1").await;
    assert_eq!(login.status, StatusCode::OK);

    let res = client.get("/auth/status").await;
    assert_eq!(res.body["isAuthenticated"], true);
    assert_eq!(res.body["user"]["email"], "a@x.com");

    let res = client.get("/auth/user").await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["user"]["username"], "abc");

    let res = client.get("/auth/logout").await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body, json!({ "message": "Logged out successfully" }));

    let res = client.get("/auth/status").await;
    assert_eq!(res.body["isAuthenticated"], false);
    let res = client.get("/auth/user").await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    assert_eq!(res.body, json!({ "error": "Not authenticated" }));
}

#[tokio::test]
async fn login_rotates_session_cookie() {
    let app = app();
    TestClient::new(app.clone())
        .register(registration("a@x.com"))
        .await;

    let mut client = TestClient::new(app);
    let before = client.fetch_csrf().await;
    let res = client
        .post(
            "/users/login",
            json!({ "email": "a@x.com", "password": "password1" }),
        )
        .await;
    assert!(res.headers.get(header::SET_COOKIE).is_some());
    assert_ne!(res.body["csrfToken"].as_str().unwrap(), before);
}

#[tokio::test]
async fn session_lasts_a_fixed_day_and_reads_do_not_renew_it() {
    let app = app();
    TestClient::new(app.clone())
        .register(registration("a@x.com"))
        .await;

    let mut client = TestClient::new(app);
    let res = client.login("a@x.com", "password1").await;
    let ttl = max_age(&res.headers).expect("login sets a Max-Age");
    assert!((86_390..=86_400).contains(&ttl), "Max-Age was {ttl}");

    for path in ["/auth/status", "/auth/user"] {
        let res = client.get(path).await;
        assert_eq!(res.status, StatusCode::OK);
        assert!(
            res.headers.get(header::SET_COOKIE).is_none(),
            "{path} re-issued the session cookie"
        );
    }
    assert_eq!(client.get("/auth/status").await.body["isAuthenticated"], true);
}

#[tokio::test]
async fn mutating_requests_need_the_session_token() {
    let mut client = TestClient::new(app());
    client.fetch_csrf().await;

    let body = json!({ "email": "a@x.com", "password": "password1" });

    let res = client
        .send_with(axum::http::Method::POST, "/users/login", Some(body.clone()), None)
        .await;
    assert_eq!(res.status, StatusCode::FORBIDDEN);
    assert_eq!(res.body, json!({ "error": "Invalid CSRF token" }));

    let res = client
        .send_with(
            axum::http::Method::POST,
            "/users/login",
            Some(body.clone()),
            Some("0".repeat(64)),
        )
        .await;
    assert_eq!(res.status, StatusCode::FORBIDDEN);

    // right token reaches the handler (unknown user)
    let res = client.post("/users/login", body).await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn csrf_token_may_travel_in_the_json_body() {
    let mut client = TestClient::new(app());
    let token = client.fetch_csrf().await;
    let mut body = registration("a@x.com");
    body["_csrf"] = json!(token);

    let res = client
        .send_with(axum::http::Method::POST, "/users/register", Some(body), None)
        .await;
    assert_eq!(res.status, StatusCode::CREATED);
}

#[tokio::test]
async fn csrf_token_is_stable_within_a_session() {
    let mut client = TestClient::new(app());
    let a = client.fetch_csrf().await;
    let b = client.fetch_csrf().await;
    assert_eq!(a, b);
}

#[tokio::test]
async fn malformed_json_is_a_validation_error() {
    let mut client = TestClient::new(app());
    client.fetch_csrf().await;
    let res = client.post("/users/login", json!("just a string")).await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
}

fn state_from(location: &str) -> String {
    let url = Url::parse(location).unwrap();
    url.query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
        .unwrap()
}

#[tokio::test]
async fn oauth_callback_links_existing_account() {
    let mut profiles = HashMap::new();
    profiles.insert("code-1".to_string(), google_profile("a@x.com", Some("https://img/a.png")));
    let app = app_with_google(profiles);

    let mut local = TestClient::new(app.clone());
    let created = local.register(registration("a@x.com")).await;
    let user_id = created.body["user"]["userId"].clone();

    let mut browser = TestClient::new(app);
    let res = browser.get("/auth/google").await;
    assert_eq!(res.status, StatusCode::FOUND);
    let location = res.headers[header::LOCATION].to_str().unwrap().to_string();
    assert!(location.starts_with("https://idp.test/authorize"));
    let state = state_from(&location);

    let res = browser
        .get(&format!("/auth/google/callback?code=code-1&state={state}"))
        .await;
    assert_eq!(res.status, StatusCode::FOUND);
    assert_eq!(
        res.headers[header::LOCATION],
        "http://localhost:3000?auth=success"
    );

    let res = browser.get("/auth/status").await;
    assert_eq!(res.body["isAuthenticated"], true);
    assert_eq!(res.body["user"]["userId"], user_id);
    assert_eq!(res.body["user"]["provider"], "google");
    assert_eq!(res.body["user"]["photo"], "https://img/a.png");

    // repeat login with the same provider keeps provider and refreshes updatedAt
    let first_updated = res.body["user"]["updatedAt"].as_str().unwrap().to_string();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let res = browser.get("/auth/google").await;
    let state = state_from(res.headers[header::LOCATION].to_str().unwrap());
    browser
        .get(&format!("/auth/google/callback?code=code-1&state={state}"))
        .await;
    let res = browser.get("/auth/status").await;
    assert_eq!(res.body["user"]["provider"], "google");
    assert_ne!(res.body["user"]["updatedAt"].as_str().unwrap(), first_updated);
}

#[tokio::test]
async fn production_oauth_round_trip_keeps_the_pending_state() {
    let mut profiles = HashMap::new();
    profiles.insert("code-1".to_string(), google_profile("g@x.com", None));
    let mut config = AppState::test_config();
    config.session.production = true;
    let app = app_with_config(config, profiles);

    let mut browser = TestClient::new(app);
    let res = browser.get("/auth/google").await;
    let cookie = res.headers[header::SET_COOKIE].to_str().unwrap().to_string();
    assert!(cookie.contains("SameSite=Lax"), "{cookie}");
    assert!(cookie.contains("Secure"), "{cookie}");
    assert!(cookie.contains("HttpOnly"), "{cookie}");
    let state = state_from(res.headers[header::LOCATION].to_str().unwrap());

    let res = browser
        .get_cross_site(&format!("/auth/google/callback?code=code-1&state={state}"))
        .await;
    assert_eq!(res.status, StatusCode::FOUND);
    assert_eq!(
        res.headers[header::LOCATION],
        "http://localhost:3000?auth=success"
    );

    let res = browser.get("/auth/status").await;
    assert_eq!(res.body["isAuthenticated"], true);
    assert_eq!(res.body["user"]["email"], "g@x.com");
}

#[tokio::test]
async fn oauth_callback_failures_redirect_to_login() {
    let mut profiles = HashMap::new();
    profiles.insert("code-1".to_string(), google_profile("g@x.com", None));
    let app = app_with_google(profiles);
    let failure = "http://localhost:3000/login";

    let mut browser = TestClient::new(app);

    // no pending state
    let res = browser
        .get("/auth/google/callback?code=code-1&state=forged")
        .await;
    assert_eq!(res.status, StatusCode::FOUND);
    assert_eq!(res.headers[header::LOCATION], failure);

    // state mismatch
    browser.get("/auth/google").await;
    let res = browser
        .get("/auth/google/callback?code=code-1&state=forged")
        .await;
    assert_eq!(res.headers[header::LOCATION], failure);

    // provider reported an error
    browser.get("/auth/google").await;
    let res = browser
        .get("/auth/google/callback?error=access_denied")
        .await;
    assert_eq!(res.headers[header::LOCATION], failure);

    // code rejected at exchange
    let res = browser.get("/auth/google").await;
    let state = state_from(res.headers[header::LOCATION].to_str().unwrap());
    let res = browser
        .get(&format!("/auth/google/callback?code=bogus&state={state}"))
        .await;
    assert_eq!(res.headers[header::LOCATION], failure);

    let res = browser.get("/auth/status").await;
    assert_eq!(res.body["isAuthenticated"], false);
}

#[tokio::test]
async fn unknown_or_disabled_provider_is_not_found() {
    let mut client = TestClient::new(app());
    assert_eq!(client.get("/auth/github").await.status, StatusCode::NOT_FOUND);
    assert_eq!(
        client.get("/auth/microsoft").await.status,
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn health_and_fallback() {
    let mut client = TestClient::new(app());
    for path in ["/health", "/api/health"] {
        let res = client.get(path).await;
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.body, json!({ "status": "OK", "message": "Server is running" }));
    }

    let res = client.get("/").await;
    assert_eq!(res.body["message"], "Welcome to the API");

    let res = client.get("/nope").await;
    assert_eq!(res.status, StatusCode::NOT_FOUND);
    assert_eq!(res.body, json!({ "error": "Route not found" }));
    assert_eq!(res.headers["x-content-type-options"], "nosniff");
}
