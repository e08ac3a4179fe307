use std::net::SocketAddr;

use anyhow::Context;
use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderName, HeaderValue, Method, StatusCode},
    middleware,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::json;
use tower_http::{cors::CorsLayer, set_header::SetResponseHeaderLayer, trace::TraceLayer};
use tower_sessions::{cookie::SameSite, SessionManagerLayer};

use crate::auth::{csrf, session::SessionBackend};
use crate::config::AppConfig;
use crate::state::AppState;
use crate::{auth, files};

pub const BODY_LIMIT: usize = 10 * 1024 * 1024;

pub fn build_app(state: AppState) -> anyhow::Result<Router> {
    let cors = cors_layer(&state.config)?;
    let sessions = session_layer(&state);

    Ok(Router::new()
        .merge(auth::router())
        .merge(files::router())
        .route("/health", get(health))
        .route("/api/health", get(health))
        .route("/", get(welcome))
        .fallback(not_found)
        .with_state(state)
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        // needs the session, so it sits inside the session layer
        .layer(middleware::from_fn(csrf::csrf_guard))
        .layer(sessions)
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("SAMEORIGIN"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::REFERRER_POLICY,
            HeaderValue::from_static("no-referrer"),
        ))
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let path = req.uri().path().to_owned();
                    tracing::info_span!(
                        "http_request",
                        %method,
                        %path,
                        status = tracing::field::Empty
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        if status.is_server_error() {
                            tracing::error!(%status, ?latency, "response");
                        } else {
                            tracing::info!(%status, ?latency, "response");
                        }
                    },
                ),
        ))
}

fn cors_layer(config: &AppConfig) -> anyhow::Result<CorsLayer> {
    let origin: HeaderValue = config
        .client_url
        .parse()
        .with_context(|| format!("CLIENT_URL `{}` is not a valid origin", config.client_url))?;
    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            HeaderName::from_static(csrf::CSRF_HEADER),
        ]))
}

/// Session cookie: `HttpOnly` and `SameSite=Lax`, plus `Secure` in production.
///
/// The pending OAuth state lives in the session, so the cookie has to survive the
/// provider's top-level redirect back to the callback. `Strict` would drop it there.
fn session_layer(state: &AppState) -> SessionManagerLayer<SessionBackend> {
    let cfg = &state.config.session;
    SessionManagerLayer::new(state.session_store.clone())
        .with_name(cfg.cookie_name.clone())
        .with_http_only(true)
        .with_secure(cfg.production)
        .with_same_site(SameSite::Lax)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "OK", "message": "Server is running" }))
}

async fn welcome() -> impl IntoResponse {
    Json(json!({ "message": "Welcome to the API" }))
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "Route not found" })),
    )
}

pub async fn serve(app: Router, config: &AppConfig) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("APP_HOST/APP_PORT do not form a socket address")?;

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
