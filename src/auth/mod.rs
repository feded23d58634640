use crate::state::AppState;
use axum::Router;

pub mod claims;
pub(crate) mod dto;
pub mod extractors;
pub mod handlers;
pub mod jwt;
pub mod otp;
pub mod password;
pub mod service;

pub fn router() -> Router<AppState> {
    Router::new().merge(handlers::auth_routes())
}
