use crate::state::AppState;
use axum::Router;

pub mod dto;
pub mod google;
pub mod handlers;
pub mod jwt;
pub mod password;
pub mod services;

pub fn router() -> Router<AppState> {
    handlers::auth_routes()
}
