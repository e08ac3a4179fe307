use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{header::CONTENT_TYPE, Method},
    middleware::Next,
    response::Response,
    Json,
};
use rand::{rngs::OsRng, RngCore};
use tower_sessions::Session;
use tracing::{instrument, warn};

use crate::{
    app::BODY_LIMIT,
    auth::{dto::CsrfTokenResponse, session::CSRF_TOKEN_KEY},
    error::{AppError, AppResult},
    state::AppState,
};

pub const CSRF_HEADER: &str = "x-csrf-token";
const BODY_FIELD: &str = "_csrf";

/// 32 random bytes, hex encoded.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn tokens_match(expected: &str, supplied: &str) -> bool {
    let (a, b) = (expected.as_bytes(), supplied.as_bytes());
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn is_exempt(req: &Request) -> bool {
    matches!(*req.method(), Method::GET | Method::HEAD | Method::OPTIONS)
        || req.uri().path().starts_with("/auth/")
}

fn token_in_body(content_type: &str, bytes: &[u8]) -> Option<String> {
    if content_type.starts_with("application/json") {
        let value: serde_json::Value = serde_json::from_slice(bytes).ok()?;
        return value.get(BODY_FIELD)?.as_str().map(str::to_owned);
    }
    if content_type.starts_with("application/x-www-form-urlencoded") {
        return oauth2::url::form_urlencoded::parse(bytes)
            .find(|(k, _)| k == BODY_FIELD)
            .map(|(_, v)| v.into_owned());
    }
    None
}

/// Rejects state-changing requests whose token does not match the session's.
///
/// The header wins; the body is only buffered (and handed on intact) when it is absent.
pub async fn csrf_guard(session: Session, req: Request, next: Next) -> Result<Response, AppError> {
    if is_exempt(&req) {
        return Ok(next.run(req).await);
    }

    let expected: Option<String> = session
        .get(CSRF_TOKEN_KEY)
        .await
        .map_err(|e| AppError::UpstreamUnavailable(format!("session store: {e}")))?;

    let header = req
        .headers()
        .get(CSRF_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    let (req, supplied) = match header {
        Some(token) => (req, Some(token)),
        None => {
            let (parts, body) = req.into_parts();
            let bytes = to_bytes(body, BODY_LIMIT).await.map_err(|e| {
                warn!(error = %e, "unreadable body during csrf check");
                AppError::PayloadTooLarge
            })?;
            let content_type = parts
                .headers
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default();
            let token = token_in_body(content_type, &bytes);
            (Request::from_parts(parts, Body::from(bytes)), token)
        }
    };

    match (expected, supplied) {
        (Some(expected), Some(supplied)) if tokens_match(&expected, &supplied) => {
            Ok(next.run(req).await)
        }
        (expected, supplied) => {
            warn!(
                method = %req.method(),
                path = %req.uri().path(),
                has_session_token = expected.is_some(),
                has_request_token = supplied.is_some(),
                "csrf check failed"
            );
            Err(AppError::ForbiddenCsrf)
        }
    }
}

#[instrument(skip_all)]
pub async fn get_csrf_token(
    State(state): State<AppState>,
    session: Session,
) -> AppResult<Json<CsrfTokenResponse>> {
    let csrf_token = state.sessions.csrf_token(&session).await?;
    Ok(Json(CsrfTokenResponse { csrf_token }))
}
