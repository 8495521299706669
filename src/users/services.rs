use tracing::info;
use uuid::Uuid;

use crate::{
    auth::services::{is_valid_email, normalize_email},
    error::ApiError,
    users::{
        dto::UpdateProfileRequest,
        repo::{ProfileChanges, User, UserStore},
    },
};

pub async fn update_profile(
    store: &dyn UserStore,
    user_id: Uuid,
    mut req: UpdateProfileRequest,
) -> Result<User, ApiError> {
    req.email = normalize_email(&req.email);
    if !is_valid_email(&req.email) {
        return Err(ApiError::Validation("Invalid email".into()));
    }
    if req.full_name.trim().is_empty() {
        return Err(ApiError::Validation("Full name is required".into()));
    }

    let user = store
        .find_by_id(user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;

    // Email and phone stay unique; re-check only when they actually change.
    if req.email != user.email && store.find_by_email(&req.email).await?.is_some() {
        return Err(ApiError::Conflict("Email already registered".into()));
    }
    if let Some(phone) = &req.phone {
        if user.phone.as_deref() != Some(phone) && store.find_by_phone(phone).await?.is_some() {
            return Err(ApiError::Conflict("Phone already registered".into()));
        }
    }

    let updated = store
        .update_profile(
            user.id,
            ProfileChanges {
                email: req.email,
                full_name: req.full_name.trim().to_string(),
                phone: req.phone,
                gender: req.gender,
                birth_date: req.birth_date,
                pronoun: req.pronoun,
            },
        )
        .await?;
    info!(user_id = %updated.id, "profile updated");
    Ok(updated)
}

pub async fn set_avatar(
    store: &dyn UserStore,
    user_id: Uuid,
    file_key: &str,
) -> Result<(), ApiError> {
    if file_key.trim().is_empty() {
        return Err(ApiError::Validation("File reference is required".into()));
    }
    store
        .find_by_id(user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;
    store.set_avatar(user_id, file_key.trim()).await?;
    info!(user_id = %user_id, "avatar set");
    Ok(())
}

/// Clears the stored reference and hands the old key back so the caller can
/// delete the object best-effort.
pub async fn remove_avatar(
    store: &dyn UserStore,
    user_id: Uuid,
) -> Result<Option<String>, ApiError> {
    let user = store
        .find_by_id(user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;
    store.clear_avatar(user_id).await?;
    info!(user_id = %user_id, "avatar removed");
    Ok(user.avatar)
}

/// Flip the subscribed flag off. The record is retained; only the flag
/// changes. The supplied email must match the account's email.
pub async fn unsubscribe(
    store: &dyn UserStore,
    user_id: Uuid,
    email: &str,
) -> Result<(), ApiError> {
    let email = normalize_email(email);
    if !is_valid_email(&email) {
        return Err(ApiError::Validation("Invalid email".into()));
    }

    let user = store
        .find_by_id(user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;

    if user.email != email {
        return Err(ApiError::Forbidden(
            "Email does not match this account".into(),
        ));
    }

    store.set_subscribed(user.id, false).await?;
    info!(user_id = %user.id, "user unsubscribed");
    Ok(())
}
