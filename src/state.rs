use std::sync::Arc;

use anyhow::Context;
use sqlx::PgPool;

use crate::auth::google::{GoogleClient, HttpGoogleClient};
use crate::config::AppConfig;
use crate::email::{LogMailer, Mailer};
use crate::storage::{Storage, StorageClient};
use crate::users::repo::{PgUserStore, UserStore};

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn UserStore>,
    pub storage: Arc<dyn StorageClient>,
    pub google: Arc<dyn GoogleClient>,
    pub mailer: Arc<dyn Mailer>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let db = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await
            .context("connect to database")?;

        let storage = Arc::new(
            Storage::new(
                &config.storage.endpoint,
                &config.storage.bucket,
                &config.storage.access_key,
                &config.storage.secret_key,
                "us-east-1",
            )
            .await?,
        ) as Arc<dyn StorageClient>;

        let store = Arc::new(PgUserStore::new(db.clone())) as Arc<dyn UserStore>;
        let google = Arc::new(HttpGoogleClient::new(config.google.clone())) as Arc<dyn GoogleClient>;
        let mailer = Arc::new(LogMailer) as Arc<dyn Mailer>;

        Ok(Self {
            db,
            config,
            store,
            storage,
            google,
            mailer,
        })
    }

}
