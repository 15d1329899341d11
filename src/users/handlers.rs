use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;
use uuid::Uuid;

use super::dto::{EmailQuery, PublicUser, RegisterRequest, UpdateUserRequest};
use crate::{error::AppError, state::AppState};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users", post(register).get(find_by_email))
        .route("/users/:id", get(get_user).patch(update_user))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user = state.users.register(payload).await?;
    let location = format!("/api/v1/users/{}", user.id);
    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, location)],
        Json(PublicUser::from(user)),
    ))
}

#[instrument(skip(state))]
pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<PublicUser>, AppError> {
    let user = state.users.find_by_id(id).await?;
    Ok(Json(user.into()))
}

#[instrument(skip(state))]
pub async fn find_by_email(
    State(state): State<AppState>,
    Query(q): Query<EmailQuery>,
) -> Result<Json<PublicUser>, AppError> {
    let user = state.users.find_by_email(&q.email).await?;
    Ok(Json(user.into()))
}

#[instrument(skip(state, payload))]
pub async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateUserRequest>,
) -> Result<Json<PublicUser>, AppError> {
    let user = state.users.update(id, payload).await?;
    Ok(Json(user.into()))
}
