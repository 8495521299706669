use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::{
    auth::jwt::AuthUser,
    error::ApiError,
    response::ApiResponse,
    state::AppState,
    users::{
        dto::{PublicUser, SetAvatarRequest, UnsubscribeRequest, UpdateProfileRequest},
        repo::UserStore,
        services,
    },
};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users/me", get(get_me).patch(update_profile))
        .route("/users/me/avatar", put(set_avatar).delete(remove_avatar))
        .route("/users/:id/unsubscribe", post(unsubscribe))
}

const AVATAR_URL_TTL_SECS: u64 = 3600;

/// Build the outbound projection, swapping the stored avatar key for a
/// presigned URL when storage can produce one.
async fn project_user(state: &AppState, user: &crate::users::repo::User) -> PublicUser {
    let mut out = PublicUser::from_user(user);
    if let Some(key) = &user.avatar {
        match state.storage.presign_get(key, AVATAR_URL_TTL_SECS).await {
            Ok(url) => out.avatar = Some(url),
            Err(e) => warn!(error = %e, user_id = %user.id, "avatar presign failed"),
        }
    }
    out
}

#[instrument(skip(state))]
pub async fn get_me(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .store
        .find_by_id(user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;

    let projection = project_user(&state, &user).await;
    Ok(ApiResponse::ok(StatusCode::OK, projection, "Current user"))
}

#[instrument(skip(state, payload))]
pub async fn update_profile(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<UpdateProfileRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = services::update_profile(state.store.as_ref(), user_id, payload).await?;
    let projection = project_user(&state, &user).await;
    Ok(ApiResponse::ok(StatusCode::OK, projection, "Profile updated"))
}

#[instrument(skip(state, payload))]
pub async fn set_avatar(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<SetAvatarRequest>,
) -> Result<impl IntoResponse, ApiError> {
    services::set_avatar(state.store.as_ref(), user_id, &payload.file_key).await?;
    Ok(ApiResponse::message(StatusCode::OK, "Avatar updated"))
}

#[instrument(skip(state))]
pub async fn remove_avatar(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let old_key = services::remove_avatar(state.store.as_ref(), user_id).await?;

    // Best-effort cleanup of the stored object; the reference is gone.
    if let Some(key) = old_key {
        if let Err(e) = state.storage.delete_object(&key).await {
            warn!(error = %e, user_id = %user_id, key = %key, "avatar object delete failed");
        }
    }
    Ok(ApiResponse::message(StatusCode::OK, "Avatar removed"))
}

#[instrument(skip(state, payload))]
pub async fn unsubscribe(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UnsubscribeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    services::unsubscribe(state.store.as_ref(), id, &payload.email).await?;
    Ok(ApiResponse::message(StatusCode::OK, "Unsubscribed"))
}
