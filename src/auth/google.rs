use anyhow::Context;
use axum::async_trait;
use serde::Deserialize;

use crate::config::GoogleConfig;

const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const TOKENINFO_URL: &str = "https://oauth2.googleapis.com/tokeninfo";

/// Provider tokens returned by the authorization-code exchange. Only the
/// identity token is consumed; the rest of the payload is ignored.
#[derive(Debug, Deserialize)]
pub struct GoogleTokens {
    pub id_token: String,
}

/// Identity extracted from a verified Google ID token. tokeninfo reports
/// `email_verified` as the string "true"/"false".
#[derive(Debug, Clone, Deserialize)]
pub struct GoogleProfile {
    pub sub: String,
    pub email: String,
    pub email_verified: Option<String>,
    pub name: Option<String>,
    pub picture: Option<String>,
    pub aud: Option<String>,
}

impl GoogleProfile {
    pub fn email_is_verified(&self) -> bool {
        self.email_verified.as_deref() == Some("true")
    }
}

/// Google OAuth collaborator, consumed only through its exchange/verify
/// contract so tests can substitute a fake.
#[async_trait]
pub trait GoogleClient: Send + Sync {
    async fn exchange_code(&self, code: &str) -> anyhow::Result<GoogleTokens>;
    async fn verify_id_token(&self, id_token: &str) -> anyhow::Result<GoogleProfile>;
}

pub struct HttpGoogleClient {
    http: reqwest::Client,
    config: GoogleConfig,
}

impl HttpGoogleClient {
    pub fn new(config: GoogleConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl GoogleClient for HttpGoogleClient {
    async fn exchange_code(&self, code: &str) -> anyhow::Result<GoogleTokens> {
        let params = [
            ("code", code),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
        ];
        let tokens = self
            .http
            .post(TOKEN_URL)
            .form(&params)
            .send()
            .await
            .context("google token exchange request")?
            .error_for_status()
            .context("google token exchange rejected")?
            .json::<GoogleTokens>()
            .await
            .context("google token exchange response")?;
        Ok(tokens)
    }

    async fn verify_id_token(&self, id_token: &str) -> anyhow::Result<GoogleProfile> {
        // tokeninfo validates the signature and expiry server-side; the
        // audience still has to be checked against our client id.
        let profile = self
            .http
            .get(TOKENINFO_URL)
            .query(&[("id_token", id_token)])
            .send()
            .await
            .context("google tokeninfo request")?
            .error_for_status()
            .context("google id token rejected")?
            .json::<GoogleProfile>()
            .await
            .context("google tokeninfo response")?;

        if profile.aud.as_deref() != Some(self.config.client_id.as_str()) {
            anyhow::bail!("id token audience mismatch");
        }
        Ok(profile)
    }
}
