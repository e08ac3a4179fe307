use crate::state::AppState;
use axum::Router;

pub mod csrf;
pub mod dto;
pub mod extractors;
pub mod handlers;
pub mod oauth;
pub mod password;
pub mod repo;
pub mod repo_types;
pub mod services;
pub mod session;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::user_routes())
        .merge(handlers::auth_routes())
}
