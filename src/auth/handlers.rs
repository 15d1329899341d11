use axum::{extract::State, routing::post, Json, Router};
use tracing::{info, instrument};

use crate::{
    auth::dto::LoginRequest, error::AppError, state::AppState, users::dto::PublicUser,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new().route("/auth/login", post(login))
}

/// Credential check only; no token is issued.
#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<PublicUser>, AppError> {
    let user = state
        .users
        .verify_credentials(&payload.email, &payload.password)
        .await?;
    info!(user_id = %user.id, email = %user.email, "user logged in");
    Ok(Json(user.into()))
}
