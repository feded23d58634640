use crate::state::AppState;
use axum::Router;

pub(crate) mod dto;
pub mod handlers;
pub mod service;

pub fn router() -> Router<AppState> {
    Router::new().merge(handlers::user_routes())
}
