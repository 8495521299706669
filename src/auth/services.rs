use lazy_static::lazy_static;
use rand::{distributions::Alphanumeric, Rng};
use regex::Regex;
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    auth::{
        dto::{ChangePasswordRequest, LoginRequest, RegisterRequest, ResetPasswordRequest},
        google::GoogleClient,
        jwt::JwtKeys,
        password::{hash_password, verify_password},
    },
    email::Mailer,
    error::ApiError,
    users::repo::{NewOAuthUser, NewUser, User, UserStore},
};

pub const MIN_PASSWORD_LEN: usize = 8;
pub const RESET_TOKEN_LEN: usize = 40;

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn validate_email(email: &str) -> Result<(), ApiError> {
    if !is_valid_email(email) {
        return Err(ApiError::Validation("Invalid email".into()));
    }
    Ok(())
}

fn validate_new_password(password: &str, password2: &str) -> Result<(), ApiError> {
    if password.is_empty() {
        return Err(ApiError::Validation("Password is required".into()));
    }
    if password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::Validation("Password too short".into()));
    }
    if password != password2 {
        return Err(ApiError::Validation("Passwords do not match".into()));
    }
    Ok(())
}

/// Opaque single-use token for password reset; not a signed JWT.
pub fn generate_reset_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(RESET_TOKEN_LEN)
        .map(char::from)
        .collect()
}

#[derive(Debug)]
pub struct IssuedTokens {
    pub access_token: String,
    pub refresh_token: String,
}

/// Sign a fresh access/refresh pair and overwrite the user's session slot.
/// Any earlier session ends here: its refresh token no longer matches the
/// slot and will fail rotation.
pub async fn issue_session(
    store: &dyn UserStore,
    keys: &JwtKeys,
    user_id: Uuid,
) -> Result<IssuedTokens, ApiError> {
    let access_token = keys.sign_access(user_id)?;
    let refresh_token = keys.sign_refresh(user_id)?;
    store.store_refresh_token(user_id, &refresh_token).await?;
    Ok(IssuedTokens {
        access_token,
        refresh_token,
    })
}

pub async fn register(
    store: &dyn UserStore,
    keys: &JwtKeys,
    mailer: &dyn Mailer,
    mut req: RegisterRequest,
) -> Result<(User, IssuedTokens), ApiError> {
    req.email = normalize_email(&req.email);
    validate_email(&req.email)?;
    validate_new_password(&req.password, &req.password2)?;
    if req.full_name.trim().is_empty() {
        return Err(ApiError::Validation("Full name is required".into()));
    }

    if store.find_by_email(&req.email).await?.is_some() {
        warn!(email = %req.email, "email already registered");
        return Err(ApiError::Conflict("Email already registered".into()));
    }
    if let Some(phone) = &req.phone {
        if store.find_by_phone(phone).await?.is_some() {
            return Err(ApiError::Conflict("Phone already registered".into()));
        }
    }

    let hash = hash_password(&req.password)?;
    let user = store
        .create(NewUser {
            email: req.email,
            password_hash: hash,
            full_name: req.full_name.trim().to_string(),
            phone: req.phone,
        })
        .await?;

    if let Err(e) = mailer.send_welcome(&user.email, &user.full_name).await {
        warn!(error = %e, user_id = %user.id, "welcome email failed");
    }

    let tokens = issue_session(store, keys, user.id).await?;
    info!(user_id = %user.id, email = %user.email, "user registered");
    Ok((user, tokens))
}

pub async fn login(
    store: &dyn UserStore,
    keys: &JwtKeys,
    mut req: LoginRequest,
) -> Result<(User, IssuedTokens), ApiError> {
    req.email = normalize_email(&req.email);
    validate_email(&req.email)?;
    if req.password.is_empty() {
        return Err(ApiError::Validation("Password is required".into()));
    }

    // Unknown email, OAuth-only account and wrong password all answer the
    // same way so responses cannot be used to enumerate accounts.
    let user = match store.find_by_email(&req.email).await? {
        Some(u) => u,
        None => {
            warn!(email = %req.email, "login unknown email");
            return Err(ApiError::InvalidCredentials);
        }
    };
    let Some(hash) = user.password_hash.as_deref() else {
        warn!(user_id = %user.id, "login against oauth-only account");
        return Err(ApiError::InvalidCredentials);
    };
    if !verify_password(&req.password, hash)? {
        warn!(user_id = %user.id, "login invalid password");
        return Err(ApiError::InvalidCredentials);
    }

    let tokens = issue_session(store, keys, user.id).await?;
    info!(user_id = %user.id, email = %user.email, "user logged in");
    Ok((user, tokens))
}

pub async fn logout(store: &dyn UserStore, user_id: Uuid) -> Result<(), ApiError> {
    store.clear_refresh_token(user_id).await?;
    info!(user_id = %user_id, "user logged out");
    Ok(())
}

/// Rotate the session: verify the presented refresh token, then swap it for
/// a new one with a compare-and-swap on the session slot. A token that no
/// longer matches the slot (superseded login, logout, password reset) is
/// rejected outright.
pub async fn refresh(
    store: &dyn UserStore,
    keys: &JwtKeys,
    token: Option<&str>,
) -> Result<(User, IssuedTokens), ApiError> {
    let token = token.ok_or_else(|| ApiError::Unauthorized("Refresh token required".into()))?;

    let claims = keys
        .verify_refresh(token)
        .map_err(|_| ApiError::InvalidToken("Invalid refresh token".into()))?;

    let user = store
        .find_by_id(claims.sub)
        .await?
        .ok_or_else(|| ApiError::InvalidToken("Invalid refresh token".into()))?;

    let access_token = keys.sign_access(user.id)?;
    let refresh_token = keys.sign_refresh(user.id)?;
    let swapped = store
        .swap_refresh_token(user.id, token, &refresh_token)
        .await?;
    if !swapped {
        warn!(user_id = %user.id, "refresh token does not match session slot");
        return Err(ApiError::InvalidToken("Refresh token superseded".into()));
    }

    info!(user_id = %user.id, "session rotated");
    Ok((
        user,
        IssuedTokens {
            access_token,
            refresh_token,
        },
    ))
}

pub async fn forgot_password(
    store: &dyn UserStore,
    mailer: &dyn Mailer,
    email: &str,
    reset_ttl: TimeDuration,
) -> Result<(), ApiError> {
    let email = normalize_email(email);
    validate_email(&email)?;

    let user = store
        .find_by_email(&email)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;

    let token = generate_reset_token();
    let expires_at = OffsetDateTime::now_utc() + reset_ttl;
    store.store_reset_token(user.id, &token, expires_at).await?;

    // Delivery outcome is never surfaced to the caller.
    if let Err(e) = mailer.send_password_reset(&user.email, &token).await {
        warn!(error = %e, user_id = %user.id, "password reset email failed");
    }

    info!(user_id = %user.id, "password reset token issued");
    Ok(())
}

pub async fn reset_password(
    store: &dyn UserStore,
    token: &str,
    req: ResetPasswordRequest,
) -> Result<(), ApiError> {
    let user = store
        .find_by_reset_token(token)
        .await?
        .ok_or_else(|| ApiError::InvalidToken("Invalid reset token".into()))?;

    let expires_at = user
        .reset_token_expires_at
        .ok_or_else(|| ApiError::InvalidToken("Invalid reset token".into()))?;
    if OffsetDateTime::now_utc() >= expires_at {
        return Err(ApiError::Expired("Reset token expired".into()));
    }

    validate_new_password(&req.password, &req.password2)?;

    let hash = hash_password(&req.password)?;
    // Clears the reset slot (single-use) and the session slot: sessions
    // issued under the old password die with it.
    store.reset_password(user.id, &hash).await?;
    info!(user_id = %user.id, "password reset");
    Ok(())
}

pub async fn change_password(
    store: &dyn UserStore,
    user_id: Uuid,
    req: ChangePasswordRequest,
) -> Result<(), ApiError> {
    let user = store
        .find_by_id(user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;

    let hash = user
        .password_hash
        .as_deref()
        .ok_or(ApiError::InvalidCredentials)?;
    if !verify_password(&req.old_password, hash)? {
        return Err(ApiError::InvalidCredentials);
    }
    if req.password == req.old_password {
        return Err(ApiError::SamePassword);
    }
    validate_new_password(&req.password, &req.password2)?;

    let new_hash = hash_password(&req.password)?;
    store.update_password(user.id, &new_hash).await?;
    info!(user_id = %user.id, "password changed");
    Ok(())
}

/// Google OAuth login/register: find by provider subject, else link an
/// existing account by email, else create a passwordless account. The bool
/// is true when a new account was created.
pub async fn google_login(
    store: &dyn UserStore,
    keys: &JwtKeys,
    google: &dyn GoogleClient,
    code: &str,
) -> Result<(User, IssuedTokens, bool), ApiError> {
    let bundle = google
        .exchange_code(code)
        .await
        .map_err(|e| ApiError::Upstream(format!("Google code exchange failed: {e}")))?;
    let profile = google
        .verify_id_token(&bundle.id_token)
        .await
        .map_err(|e| ApiError::Upstream(format!("Google identity verification failed: {e}")))?;

    let email = normalize_email(&profile.email);

    let (user, created) = if let Some(user) = store.find_by_google_id(&profile.sub).await? {
        (user, false)
    } else if let Some(user) = store.find_by_email(&email).await? {
        // Linking by email match alone would let an unverified provider
        // email take over an existing account.
        if !profile.email_is_verified() {
            warn!(user_id = %user.id, "refusing to link unverified google email");
            return Err(ApiError::Forbidden(
                "Google account email is not verified".into(),
            ));
        }
        store.link_google_id(user.id, &profile.sub).await?;
        info!(user_id = %user.id, "google identity linked to existing account");
        (user, false)
    } else {
        let user = store
            .create_oauth(NewOAuthUser {
                email,
                google_id: profile.sub.clone(),
                full_name: profile.name.unwrap_or_default(),
                avatar: profile.picture,
            })
            .await?;
        info!(user_id = %user.id, "user created via google oauth");
        (user, true)
    };

    let tokens = issue_session(store, keys, user.id).await?;
    Ok((user, tokens, created))
}
