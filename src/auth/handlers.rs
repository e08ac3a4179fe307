use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_sessions::Session;
use tracing::{info, instrument, warn};

use crate::{
    auth::{
        csrf,
        dto::{
            AuthResponse, CallbackParams, LoginRequest, MessageResponse, PublicUser,
            RegisterRequest, StatusResponse, UserResponse,
        },
        extractors::AuthUser,
        oauth::OAuthProvider,
        services::{validate_login, validate_registration},
    },
    error::{AppError, AppResult},
    state::AppState,
};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users/register", post(register))
        .route("/users/login", post(login))
        .route("/csrf-token", get(csrf::get_csrf_token))
}

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/logout", get(logout))
        .route("/auth/status", get(status))
        .route("/auth/user", get(current_user))
        .route("/auth/{provider}", get(oauth_start))
        .route("/auth/{provider}/callback", get(oauth_callback))
}

fn body_error(rejection: JsonRejection) -> AppError {
    warn!(error = %rejection.body_text(), "rejected request body");
    AppError::validation("Invalid request body")
}

/// 302 Found; axum's `Redirect::to` answers 303.
fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_string())]).into_response()
}

#[instrument(skip_all)]
pub async fn register(
    State(state): State<AppState>,
    session: Session,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<AuthResponse>)> {
    let Json(payload) = payload.map_err(body_error)?;
    let input = validate_registration(payload)?;

    let user = state.identity.create_local_user(input).await?;
    let csrf_token = state.sessions.start(&session, user.user_id).await?;

    info!(user_id = %user.user_id, "user registered");
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            success: true,
            user,
            csrf_token,
        }),
    ))
}

#[instrument(skip_all)]
pub async fn login(
    State(state): State<AppState>,
    session: Session,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> AppResult<Json<AuthResponse>> {
    let Json(payload) = payload.map_err(body_error)?;
    let creds = validate_login(payload)?;

    let user = state.identity.authenticate(creds).await?;
    let csrf_token = state.sessions.start(&session, user.user_id).await?;

    info!(user_id = %user.user_id, "user logged in");
    Ok(Json(AuthResponse {
        success: true,
        user,
        csrf_token,
    }))
}

fn provider_not_found() -> AppError {
    AppError::NotFound("Route not found".into())
}

#[instrument(skip(state, session))]
pub async fn oauth_start(
    State(state): State<AppState>,
    session: Session,
    Path(provider): Path<String>,
) -> AppResult<Response> {
    let provider = OAuthProvider::parse(&provider).ok_or_else(provider_not_found)?;
    let client = state.oauth.get(provider).ok_or_else(provider_not_found)?;

    let nonce = csrf::generate_token();
    state
        .sessions
        .set_oauth_state(&session, &format!("{provider}:{nonce}"))
        .await?;

    Ok(found(&client.authorization_url(&nonce)))
}

#[instrument(skip(state, session, params))]
pub async fn oauth_callback(
    State(state): State<AppState>,
    session: Session,
    Path(provider): Path<String>,
    Query(params): Query<CallbackParams>,
) -> AppResult<Response> {
    let provider = OAuthProvider::parse(&provider).ok_or_else(provider_not_found)?;
    if state.oauth.get(provider).is_none() {
        return Err(provider_not_found());
    }

    match complete_oauth(&state, &session, provider, params).await {
        Ok(user) => {
            info!(user_id = %user.user_id, %provider, "oauth login");
            Ok(found(&state.config.oauth_success_redirect()))
        }
        Err(e) => {
            warn!(%provider, status = %e.status(), error = %e, "oauth callback failed");
            Ok(found(&state.config.oauth_failure_redirect))
        }
    }
}

async fn complete_oauth(
    state: &AppState,
    session: &Session,
    provider: OAuthProvider,
    params: CallbackParams,
) -> AppResult<PublicUser> {
    // consumed whatever the outcome
    let expected = state.sessions.take_oauth_state(session).await?;

    if let Some(err) = params.error {
        return Err(AppError::validation(format!("provider error: {err}")));
    }
    let code = params
        .code
        .ok_or_else(|| AppError::validation("missing authorization code"))?;
    let supplied = format!("{provider}:{}", params.state.unwrap_or_default());
    if expected.as_deref() != Some(supplied.as_str()) {
        return Err(AppError::ForbiddenCsrf);
    }

    let client = state.oauth.get(provider).ok_or_else(provider_not_found)?;
    let profile = client
        .exchange(&code)
        .await
        .map_err(|e| AppError::UpstreamUnavailable(format!("{e:#}")))?;

    let user = state.identity.find_or_create_oauth_user(profile).await?;
    state.sessions.start(session, user.user_id).await?;
    Ok(user)
}

#[instrument(skip_all)]
pub async fn logout(
    State(state): State<AppState>,
    session: Session,
) -> AppResult<Json<MessageResponse>> {
    state.sessions.end(&session).await?;
    Ok(Json(MessageResponse {
        message: "Logged out successfully".into(),
    }))
}

#[instrument(skip_all)]
pub async fn status(
    State(state): State<AppState>,
    session: Session,
) -> AppResult<Json<StatusResponse>> {
    let user = state.sessions.current_principal(&session).await?;
    Ok(Json(StatusResponse {
        is_authenticated: user.is_some(),
        user: user.map(PublicUser::from),
    }))
}

pub async fn current_user(AuthUser(user): AuthUser) -> Json<UserResponse> {
    Json(UserResponse { user: user.into() })
}
