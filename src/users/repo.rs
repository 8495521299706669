use axum::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use time::{Date, OffsetDateTime};
use uuid::Uuid;

/// User record in the database. The session slot (`refresh_token`) and the
/// reset slot (`reset_token` + expiry) live here; the row is the sole source
/// of truth for whether a refresh or reset token is still valid.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub phone: Option<String>,
    pub google_id: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>, // absent for OAuth-only accounts
    pub full_name: String,
    pub avatar: Option<String>,
    pub gender: Option<String>,
    pub birth_date: Option<Date>,
    pub pronoun: Option<String>,
    pub subscribed: bool,
    #[serde(skip_serializing)]
    pub refresh_token: Option<String>, // single session slot
    #[serde(skip_serializing)]
    pub reset_token: Option<String>,
    #[serde(skip_serializing)]
    pub reset_token_expires_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub full_name: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewOAuthUser {
    pub email: String,
    pub google_id: String,
    pub full_name: String,
    pub avatar: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ProfileChanges {
    pub email: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub gender: Option<String>,
    pub birth_date: Option<Date>,
    pub pronoun: Option<String>,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>>;
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;
    async fn find_by_phone(&self, phone: &str) -> anyhow::Result<Option<User>>;
    async fn find_by_google_id(&self, google_id: &str) -> anyhow::Result<Option<User>>;
    async fn find_by_reset_token(&self, token: &str) -> anyhow::Result<Option<User>>;

    async fn create(&self, new: NewUser) -> anyhow::Result<User>;
    async fn create_oauth(&self, new: NewOAuthUser) -> anyhow::Result<User>;
    async fn link_google_id(&self, id: Uuid, google_id: &str) -> anyhow::Result<()>;
    async fn update_profile(&self, id: Uuid, changes: ProfileChanges) -> anyhow::Result<User>;
    async fn set_avatar(&self, id: Uuid, key: &str) -> anyhow::Result<()>;
    async fn clear_avatar(&self, id: Uuid) -> anyhow::Result<()>;
    async fn set_subscribed(&self, id: Uuid, subscribed: bool) -> anyhow::Result<()>;

    /// Overwrite the session slot unconditionally (login, register, OAuth).
    async fn store_refresh_token(&self, id: Uuid, token: &str) -> anyhow::Result<()>;
    /// Compare-and-swap rotation: succeeds only if `current` is still the
    /// stored slot value. Returns false when the slot holds something else,
    /// meaning the presented token was superseded or revoked.
    async fn swap_refresh_token(
        &self,
        id: Uuid,
        current: &str,
        replacement: &str,
    ) -> anyhow::Result<bool>;
    async fn clear_refresh_token(&self, id: Uuid) -> anyhow::Result<()>;

    async fn store_reset_token(
        &self,
        id: Uuid,
        token: &str,
        expires_at: OffsetDateTime,
    ) -> anyhow::Result<()>;
    /// Set a new hash and clear both the reset slot and the session slot.
    async fn reset_password(&self, id: Uuid, password_hash: &str) -> anyhow::Result<()>;
    async fn update_password(&self, id: Uuid, password_hash: &str) -> anyhow::Result<()>;
}

const USER_COLUMNS: &str = "id, email, phone, google_id, password_hash, full_name, avatar, \
     gender, birth_date, pronoun, subscribed, refresh_token, reset_token, \
     reset_token_expires_at, created_at, updated_at";

pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    async fn fetch_one_by(&self, column: &str, value: &str) -> anyhow::Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = $1");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(value)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        self.fetch_one_by("email", email).await
    }

    async fn find_by_phone(&self, phone: &str) -> anyhow::Result<Option<User>> {
        self.fetch_one_by("phone", phone).await
    }

    async fn find_by_google_id(&self, google_id: &str) -> anyhow::Result<Option<User>> {
        self.fetch_one_by("google_id", google_id).await
    }

    async fn find_by_reset_token(&self, token: &str) -> anyhow::Result<Option<User>> {
        self.fetch_one_by("reset_token", token).await
    }

    async fn create(&self, new: NewUser) -> anyhow::Result<User> {
        let sql = format!(
            "INSERT INTO users (email, password_hash, full_name, phone) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {USER_COLUMNS}"
        );
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(&new.email)
            .bind(&new.password_hash)
            .bind(&new.full_name)
            .bind(&new.phone)
            .fetch_one(&self.db)
            .await?;
        Ok(user)
    }

    async fn create_oauth(&self, new: NewOAuthUser) -> anyhow::Result<User> {
        let sql = format!(
            "INSERT INTO users (email, google_id, full_name, avatar) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {USER_COLUMNS}"
        );
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(&new.email)
            .bind(&new.google_id)
            .bind(&new.full_name)
            .bind(&new.avatar)
            .fetch_one(&self.db)
            .await?;
        Ok(user)
    }

    async fn link_google_id(&self, id: Uuid, google_id: &str) -> anyhow::Result<()> {
        sqlx::query("UPDATE users SET google_id = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(google_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn update_profile(&self, id: Uuid, changes: ProfileChanges) -> anyhow::Result<User> {
        let sql = format!(
            "UPDATE users SET email = $2, full_name = $3, phone = $4, gender = $5, \
             birth_date = $6, pronoun = $7, updated_at = now() \
             WHERE id = $1 \
             RETURNING {USER_COLUMNS}"
        );
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .bind(&changes.email)
            .bind(&changes.full_name)
            .bind(&changes.phone)
            .bind(&changes.gender)
            .bind(changes.birth_date)
            .bind(&changes.pronoun)
            .fetch_one(&self.db)
            .await?;
        Ok(user)
    }

    async fn set_avatar(&self, id: Uuid, key: &str) -> anyhow::Result<()> {
        sqlx::query("UPDATE users SET avatar = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(key)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn clear_avatar(&self, id: Uuid) -> anyhow::Result<()> {
        sqlx::query("UPDATE users SET avatar = NULL, updated_at = now() WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn set_subscribed(&self, id: Uuid, subscribed: bool) -> anyhow::Result<()> {
        sqlx::query("UPDATE users SET subscribed = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(subscribed)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn store_refresh_token(&self, id: Uuid, token: &str) -> anyhow::Result<()> {
        sqlx::query("UPDATE users SET refresh_token = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(token)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn swap_refresh_token(
        &self,
        id: Uuid,
        current: &str,
        replacement: &str,
    ) -> anyhow::Result<bool> {
        // Atomic at the store: two concurrent rotations against the same
        // stale value cannot both succeed.
        let result = sqlx::query(
            "UPDATE users SET refresh_token = $3, updated_at = now() \
             WHERE id = $1 AND refresh_token = $2",
        )
        .bind(id)
        .bind(current)
        .bind(replacement)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn clear_refresh_token(&self, id: Uuid) -> anyhow::Result<()> {
        sqlx::query("UPDATE users SET refresh_token = NULL, updated_at = now() WHERE id = $1")
            .bind(id)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn store_reset_token(
        &self,
        id: Uuid,
        token: &str,
        expires_at: OffsetDateTime,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE users SET reset_token = $2, reset_token_expires_at = $3, \
             updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(token)
        .bind(expires_at)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn reset_password(&self, id: Uuid, password_hash: &str) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE users SET password_hash = $2, reset_token = NULL, \
             reset_token_expires_at = NULL, refresh_token = NULL, updated_at = now() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(password_hash)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> anyhow::Result<()> {
        sqlx::query("UPDATE users SET password_hash = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(password_hash)
            .execute(&self.db)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory store mirroring the Postgres semantics, including the
    /// unique indexes and the compare-and-swap on the session slot.
    #[derive(Default)]
    pub struct MemoryUserStore {
        users: Mutex<HashMap<Uuid, User>>,
    }

    impl MemoryUserStore {
        pub fn insert(&self, user: User) {
            self.users.lock().unwrap().insert(user.id, user);
        }

        pub fn get(&self, id: Uuid) -> Option<User> {
            self.users.lock().unwrap().get(&id).cloned()
        }

        pub fn len(&self) -> usize {
            self.users.lock().unwrap().len()
        }

        fn update<F: FnOnce(&mut User)>(&self, id: Uuid, f: F) -> anyhow::Result<()> {
            let mut users = self.users.lock().unwrap();
            let user = users
                .get_mut(&id)
                .ok_or_else(|| anyhow::anyhow!("no such user"))?;
            f(user);
            user.updated_at = OffsetDateTime::now_utc();
            Ok(())
        }
    }

    pub fn bare_user(email: &str) -> User {
        let now = OffsetDateTime::now_utc();
        User {
            id: Uuid::new_v4(),
            email: email.to_string(),
            phone: None,
            google_id: None,
            password_hash: None,
            full_name: "Test User".to_string(),
            avatar: None,
            gender: None,
            birth_date: None,
            pronoun: None,
            subscribed: true,
            refresh_token: None,
            reset_token: None,
            reset_token_expires_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[async_trait]
    impl UserStore for MemoryUserStore {
        async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
            Ok(self.get(id))
        }

        async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
            let users = self.users.lock().unwrap();
            Ok(users.values().find(|u| u.email == email).cloned())
        }

        async fn find_by_phone(&self, phone: &str) -> anyhow::Result<Option<User>> {
            let users = self.users.lock().unwrap();
            Ok(users
                .values()
                .find(|u| u.phone.as_deref() == Some(phone))
                .cloned())
        }

        async fn find_by_google_id(&self, google_id: &str) -> anyhow::Result<Option<User>> {
            let users = self.users.lock().unwrap();
            Ok(users
                .values()
                .find(|u| u.google_id.as_deref() == Some(google_id))
                .cloned())
        }

        async fn find_by_reset_token(&self, token: &str) -> anyhow::Result<Option<User>> {
            let users = self.users.lock().unwrap();
            Ok(users
                .values()
                .find(|u| u.reset_token.as_deref() == Some(token))
                .cloned())
        }

        async fn create(&self, new: NewUser) -> anyhow::Result<User> {
            let mut users = self.users.lock().unwrap();
            if users.values().any(|u| u.email == new.email) {
                anyhow::bail!("duplicate key value violates unique constraint \"users_email_key\"");
            }
            let mut user = bare_user(&new.email);
            user.password_hash = Some(new.password_hash);
            user.full_name = new.full_name;
            user.phone = new.phone;
            users.insert(user.id, user.clone());
            Ok(user)
        }

        async fn create_oauth(&self, new: NewOAuthUser) -> anyhow::Result<User> {
            let mut users = self.users.lock().unwrap();
            if users.values().any(|u| u.email == new.email) {
                anyhow::bail!("duplicate key value violates unique constraint \"users_email_key\"");
            }
            let mut user = bare_user(&new.email);
            user.google_id = Some(new.google_id);
            user.full_name = new.full_name;
            user.avatar = new.avatar;
            users.insert(user.id, user.clone());
            Ok(user)
        }

        async fn link_google_id(&self, id: Uuid, google_id: &str) -> anyhow::Result<()> {
            self.update(id, |u| u.google_id = Some(google_id.to_string()))
        }

        async fn update_profile(&self, id: Uuid, changes: ProfileChanges) -> anyhow::Result<User> {
            self.update(id, |u| {
                u.email = changes.email;
                u.full_name = changes.full_name;
                u.phone = changes.phone;
                u.gender = changes.gender;
                u.birth_date = changes.birth_date;
                u.pronoun = changes.pronoun;
            })?;
            Ok(self.get(id).unwrap())
        }

        async fn set_avatar(&self, id: Uuid, key: &str) -> anyhow::Result<()> {
            self.update(id, |u| u.avatar = Some(key.to_string()))
        }

        async fn clear_avatar(&self, id: Uuid) -> anyhow::Result<()> {
            self.update(id, |u| u.avatar = None)
        }

        async fn set_subscribed(&self, id: Uuid, subscribed: bool) -> anyhow::Result<()> {
            self.update(id, |u| u.subscribed = subscribed)
        }

        async fn store_refresh_token(&self, id: Uuid, token: &str) -> anyhow::Result<()> {
            self.update(id, |u| u.refresh_token = Some(token.to_string()))
        }

        async fn swap_refresh_token(
            &self,
            id: Uuid,
            current: &str,
            replacement: &str,
        ) -> anyhow::Result<bool> {
            let mut users = self.users.lock().unwrap();
            let Some(user) = users.get_mut(&id) else {
                return Ok(false);
            };
            if user.refresh_token.as_deref() == Some(current) {
                user.refresh_token = Some(replacement.to_string());
                Ok(true)
            } else {
                Ok(false)
            }
        }

        async fn clear_refresh_token(&self, id: Uuid) -> anyhow::Result<()> {
            self.update(id, |u| u.refresh_token = None)
        }

        async fn store_reset_token(
            &self,
            id: Uuid,
            token: &str,
            expires_at: OffsetDateTime,
        ) -> anyhow::Result<()> {
            self.update(id, |u| {
                u.reset_token = Some(token.to_string());
                u.reset_token_expires_at = Some(expires_at);
            })
        }

        async fn reset_password(&self, id: Uuid, password_hash: &str) -> anyhow::Result<()> {
            self.update(id, |u| {
                u.password_hash = Some(password_hash.to_string());
                u.reset_token = None;
                u.reset_token_expires_at = None;
                u.refresh_token = None;
            })
        }

        async fn update_password(&self, id: Uuid, password_hash: &str) -> anyhow::Result<()> {
            self.update(id, |u| u.password_hash = Some(password_hash.to_string()))
        }
    }
}
