use crate::state::AppState;
use axum::Router;

pub mod document;
pub mod dto;
pub mod handlers;
pub mod hooks;
pub mod memory;
pub mod mongo;
pub mod postgres;
pub mod repo;
pub mod repo_types;
pub mod services;
pub mod validation;

pub fn router() -> Router<AppState> {
    Router::new().merge(handlers::user_routes())
}
