use axum::{extract::FromRequestParts, http::request::Parts};
use tower_sessions::Session;

use super::repo_types::User;
use crate::{error::AppError, state::AppState};

/// Resolves the session's principal, rejecting anonymous requests with 401.
pub struct AuthUser(pub User);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        // Session layer missing is a wiring bug, not a client error
        let session = Session::from_request_parts(parts, state)
            .await
            .map_err(|(_, msg)| AppError::Unexpected(anyhow::anyhow!(msg)))?;

        state
            .sessions
            .current_principal(&session)
            .await?
            .map(AuthUser)
            .ok_or(AppError::Unauthenticated)
    }
}
