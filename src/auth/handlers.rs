use axum::{
    extract::{FromRef, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use time::Duration as TimeDuration;
use tracing::instrument;

use crate::{
    auth::{
        dto::{
            AuthResponse, ChangePasswordRequest, ForgotPasswordRequest, GoogleCallbackQuery,
            LoginRequest, RefreshRequest, RegisterRequest, ResetPasswordRequest,
        },
        jwt::{AuthUser, JwtKeys},
        services::{self, IssuedTokens},
    },
    error::ApiError,
    response::ApiResponse,
    state::AppState,
    users::dto::PublicUser,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/refresh", post(refresh))
        .route("/auth/forgot-password", post(forgot_password))
        .route("/auth/reset-password/:token", post(reset_password))
        .route("/auth/change-password", post(change_password))
        .route("/auth/google/callback", get(google_callback))
}

const ACCESS_COOKIE: &str = "accessToken";
const REFRESH_COOKIE: &str = "refreshToken";

fn auth_cookie(name: &'static str, value: String) -> Cookie<'static> {
    Cookie::build((name, value))
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Lax)
        .path("/")
        .build()
}

fn set_session_cookies(jar: CookieJar, tokens: &IssuedTokens) -> CookieJar {
    jar.add(auth_cookie(ACCESS_COOKIE, tokens.access_token.clone()))
        .add(auth_cookie(REFRESH_COOKIE, tokens.refresh_token.clone()))
}

fn clear_session_cookies(jar: CookieJar) -> CookieJar {
    jar.remove(auth_cookie(ACCESS_COOKIE, String::new()))
        .remove(auth_cookie(REFRESH_COOKIE, String::new()))
}

fn auth_body(user: &crate::users::repo::User, tokens: IssuedTokens) -> AuthResponse {
    AuthResponse {
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
        user: PublicUser::from_user(user),
    }
}

#[instrument(skip(state, jar, payload))]
pub async fn register(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(payload): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let keys = JwtKeys::from_ref(&state);
    let (user, tokens) = services::register(
        state.store.as_ref(),
        &keys,
        state.mailer.as_ref(),
        payload,
    )
    .await?;

    let jar = set_session_cookies(jar, &tokens);
    Ok((
        jar,
        ApiResponse::ok(StatusCode::CREATED, auth_body(&user, tokens), "User registered"),
    ))
}

#[instrument(skip(state, jar, payload))]
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let keys = JwtKeys::from_ref(&state);
    let (user, tokens) = services::login(state.store.as_ref(), &keys, payload).await?;

    let jar = set_session_cookies(jar, &tokens);
    Ok((
        jar,
        ApiResponse::ok(StatusCode::OK, auth_body(&user, tokens), "User logged in"),
    ))
}

#[instrument(skip(state, jar))]
pub async fn logout(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    jar: CookieJar,
) -> Result<impl IntoResponse, ApiError> {
    services::logout(state.store.as_ref(), user_id).await?;
    let jar = clear_session_cookies(jar);
    Ok((jar, ApiResponse::message(StatusCode::OK, "User logged out")))
}

#[instrument(skip(state, jar, payload))]
pub async fn refresh(
    State(state): State<AppState>,
    jar: CookieJar,
    payload: Option<Json<RefreshRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let keys = JwtKeys::from_ref(&state);
    // Cookie first, body as fallback for non-browser clients.
    let token = jar
        .get(REFRESH_COOKIE)
        .map(|c| c.value().to_string())
        .or_else(|| payload.and_then(|Json(p)| p.refresh_token));

    let (user, tokens) = services::refresh(state.store.as_ref(), &keys, token.as_deref()).await?;

    let jar = set_session_cookies(jar, &tokens);
    Ok((
        jar,
        ApiResponse::ok(StatusCode::OK, auth_body(&user, tokens), "Session refreshed"),
    ))
}

#[instrument(skip(state, payload))]
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(payload): Json<ForgotPasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let reset_ttl = TimeDuration::minutes(state.config.jwt.reset_ttl_minutes);
    services::forgot_password(
        state.store.as_ref(),
        state.mailer.as_ref(),
        &payload.email,
        reset_ttl,
    )
    .await?;
    Ok(ApiResponse::message(
        StatusCode::OK,
        "Password reset email sent",
    ))
}

#[instrument(skip(state, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    services::reset_password(state.store.as_ref(), &token, payload).await?;
    Ok(ApiResponse::message(StatusCode::OK, "Password reset"))
}

#[instrument(skip(state, payload))]
pub async fn change_password(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    services::change_password(state.store.as_ref(), user_id, payload).await?;
    Ok(ApiResponse::message(StatusCode::OK, "Password changed"))
}

#[instrument(skip(state, jar, query))]
pub async fn google_callback(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<GoogleCallbackQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let keys = JwtKeys::from_ref(&state);
    let (user, tokens, created) = services::google_login(
        state.store.as_ref(),
        &keys,
        state.google.as_ref(),
        &query.code,
    )
    .await?;

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    let jar = set_session_cookies(jar, &tokens);
    Ok((
        jar,
        ApiResponse::ok(status, auth_body(&user, tokens), "Google login successful"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{header, Request},
        response::Response,
    };
    use tower::ServiceExt;

    use crate::auth::google::{GoogleClient, GoogleProfile, GoogleTokens};
    use crate::config::{AppConfig, GoogleConfig, JwtConfig, StorageConfig};
    use crate::email::LogMailer;
    use crate::storage::StorageClient;
    use crate::users::repo::testing::MemoryUserStore;

    struct NoopStorage;

    #[axum::async_trait]
    impl StorageClient for NoopStorage {
        async fn delete_object(&self, _key: &str) -> anyhow::Result<()> {
            Ok(())
        }

        async fn presign_get(&self, key: &str, _seconds: u64) -> anyhow::Result<String> {
            Ok(key.to_string())
        }
    }

    struct UnconfiguredGoogle;

    #[axum::async_trait]
    impl GoogleClient for UnconfiguredGoogle {
        async fn exchange_code(&self, _code: &str) -> anyhow::Result<GoogleTokens> {
            anyhow::bail!("not configured")
        }

        async fn verify_id_token(&self, _id_token: &str) -> anyhow::Result<GoogleProfile> {
            anyhow::bail!("not configured")
        }
    }

    fn test_app() -> Router {
        let config = AppConfig {
            database_url: "postgres://localhost/unused".into(),
            jwt: JwtConfig {
                access_secret: "access-test-secret".into(),
                refresh_secret: "refresh-test-secret".into(),
                issuer: "test-issuer".into(),
                audience: "test-aud".into(),
                access_ttl_minutes: 5,
                refresh_ttl_minutes: 60,
                reset_ttl_minutes: 15,
            },
            google: GoogleConfig {
                client_id: String::new(),
                client_secret: String::new(),
                redirect_uri: String::new(),
            },
            storage: StorageConfig {
                endpoint: String::new(),
                bucket: String::new(),
                access_key: String::new(),
                secret_key: String::new(),
            },
        };
        // Lazy pool: handlers under test never touch it.
        let db = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy(&config.database_url)
            .expect("lazy pool");
        let state = AppState {
            db,
            config: Arc::new(config),
            store: Arc::new(MemoryUserStore::default()),
            storage: Arc::new(NoopStorage),
            google: Arc::new(UnconfiguredGoogle),
            mailer: Arc::new(LogMailer),
        };
        auth_routes().with_state(state)
    }

    fn json_request(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn register(app: &Router, email: &str) -> Response {
        app.clone()
            .oneshot(json_request(
                "/auth/register",
                serde_json::json!({
                    "email": email,
                    "password": "secret-pw-1",
                    "password2": "secret-pw-1",
                    "fullName": "Ada Example",
                }),
            ))
            .await
            .unwrap()
    }

    fn set_cookies(response: &Response) -> Vec<String> {
        response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect()
    }

    fn cookie_value(cookies: &[String], name: &str) -> String {
        let prefix = format!("{name}=");
        cookies
            .iter()
            .find(|c| c.starts_with(&prefix))
            .unwrap_or_else(|| panic!("missing {name} cookie"))
            .split(';')
            .next()
            .unwrap()
            .trim_start_matches(&prefix)
            .to_string()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[tokio::test]
    async fn register_sets_http_only_secure_session_cookies() {
        let app = test_app();
        let response = register(&app, "a@x.com").await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let cookies = set_cookies(&response);
        for name in [ACCESS_COOKIE, REFRESH_COOKIE] {
            let cookie = cookies
                .iter()
                .find(|c| c.starts_with(&format!("{name}=")))
                .unwrap_or_else(|| panic!("missing {name} cookie"));
            assert!(cookie.contains("HttpOnly"), "{cookie}");
            assert!(cookie.contains("Secure"), "{cookie}");
            assert!(cookie.contains("Path=/"), "{cookie}");
        }
    }

    #[tokio::test]
    async fn login_then_cookie_refresh_rotates_the_pair() {
        let app = test_app();
        register(&app, "a@x.com").await;

        let response = app
            .clone()
            .oneshot(json_request(
                "/auth/login",
                serde_json::json!({"email": "a@x.com", "password": "secret-pw-1"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let refresh_token = cookie_value(&set_cookies(&response), REFRESH_COOKIE);

        // No body: the refresh token travels in the cookie alone.
        let request = Request::builder()
            .method("POST")
            .uri("/auth/refresh")
            .header(header::COOKIE, format!("{REFRESH_COOKIE}={refresh_token}"))
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let rotated = set_cookies(&response);
        assert!(!cookie_value(&rotated, ACCESS_COOKIE).is_empty());
        assert_ne!(cookie_value(&rotated, REFRESH_COOKIE), refresh_token);
    }

    #[tokio::test]
    async fn logout_sends_removal_cookies() {
        let app = test_app();
        let response = register(&app, "a@x.com").await;
        let body = body_json(response).await;
        let access = body["data"]["accessToken"].as_str().expect("access token");

        let request = Request::builder()
            .method("POST")
            .uri("/auth/logout")
            .header(header::AUTHORIZATION, format!("Bearer {access}"))
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let cookies = set_cookies(&response);
        for name in [ACCESS_COOKIE, REFRESH_COOKIE] {
            assert!(cookie_value(&cookies, name).is_empty(), "{name} not cleared");
            let cookie = cookies
                .iter()
                .find(|c| c.starts_with(&format!("{name}=")))
                .unwrap();
            assert!(cookie.contains("Max-Age=0"), "{cookie}");
        }
    }

    #[tokio::test]
    async fn protected_route_rejection_uses_error_envelope() {
        let app = test_app();
        let request = Request::builder()
            .method("POST")
            .uri("/auth/logout")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let json = body_json(response).await;
        assert_eq!(json["statusCode"], 401);
        assert_eq!(json["success"], false);
    }
}
