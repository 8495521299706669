use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use crate::users::repo::User;

/// Public part of the user returned to the client. Never carries the
/// password hash, session slot or reset slot.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub avatar: Option<String>,
    pub gender: Option<String>,
    pub birth_date: Option<Date>,
    pub pronoun: Option<String>,
    pub subscribed: bool,
    pub created_at: OffsetDateTime,
}

impl PublicUser {
    pub fn from_user(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            full_name: user.full_name.clone(),
            phone: user.phone.clone(),
            avatar: user.avatar.clone(),
            gender: user.gender.clone(),
            birth_date: user.birth_date,
            pronoun: user.pronoun.clone(),
            subscribed: user.subscribed,
            created_at: user.created_at,
        }
    }
}

/// Request body for profile updates.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    pub email: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub gender: Option<String>,
    pub birth_date: Option<Date>,
    pub pronoun: Option<String>,
}

/// Request body for avatar set; `file_key` references an object already
/// uploaded to storage.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetAvatarRequest {
    pub file_key: String,
}

/// Request body for unsubscribe; the email must match the account's email.
#[derive(Debug, Deserialize)]
pub struct UnsubscribeRequest {
    pub email: String,
}
