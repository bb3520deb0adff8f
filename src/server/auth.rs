//! Token authentication for the API.
//!
//! `POST /api/login` exchanges a username and password for an opaque bearer
//! token stored in the ledger database. Protected routes go through
//! [`api_auth_middleware`], which resolves the token to an [`AuthUser`].

use super::error::ApiError;
use crate::config::AuthConfig;
use crate::server::AppContext;
use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
    Extension, Json,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    typed_header::TypedHeader,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use stemforged_db::models::{User, UserRole};
use stemforged_db::pool::{get_conn, DbPool};
use stemforged_db::queries::{auth_tokens, users};

/// Username of the account created on first start.
pub const DEFAULT_ADMIN: &str = "admin";

/// Caller identity attached to authenticated requests.
#[derive(Debug, Clone)]
pub enum AuthUser {
    /// Authentication is disabled; the caller has full access.
    Anonymous,
    User(User),
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        match self {
            AuthUser::Anonymous => true,
            AuthUser::User(user) => user.is_admin(),
        }
    }

    pub fn view(&self) -> UserView {
        match self {
            AuthUser::Anonymous => UserView {
                username: "anonymous".to_string(),
                role: UserRole::Admin,
                needs_password_change: false,
            },
            AuthUser::User(user) => UserView::from(user),
        }
    }
}

/// Public part of a user account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserView {
    pub username: String,
    pub role: UserRole,
    pub needs_password_change: bool,
}

impl From<&User> for UserView {
    fn from(user: &User) -> Self {
        Self {
            username: user.username.clone(),
            role: user.role,
            needs_password_change: user.needs_password_change,
        }
    }
}

/// Login request payload
#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Login response
#[derive(Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
    pub user: UserView,
}

#[derive(Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
    #[serde(default)]
    pub new_username: Option<String>,
}

#[derive(Serialize)]
pub struct ChangePasswordResponse {
    pub message: &'static str,
    pub access_token: String,
    pub user: UserView,
}

/// Generate a bcrypt hash for a password
pub fn hash_password(password: &str) -> anyhow::Result<String> {
    Ok(bcrypt::hash(password, bcrypt::DEFAULT_COST)?)
}

/// Generate a random 32-byte hex secret
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn verify_password(password: &str, hash: &str) -> bool {
    bcrypt::verify(password, hash).unwrap_or(false)
}

/// Create the `admin` account when the user table is empty. Returns whether
/// an account was created.
pub fn ensure_default_admin(db: &DbPool, auth: &AuthConfig) -> anyhow::Result<bool> {
    {
        let conn = get_conn(db)?;
        if users::count_users(&conn)? > 0 {
            return Ok(false);
        }
    }
    let hash = hash_password(&auth.default_admin_password)?;
    let conn = get_conn(db)?;
    let created = users::ensure_default_admin(&conn, DEFAULT_ADMIN, &hash)?;
    if created {
        tracing::warn!(
            "Created default '{}' account; change its password after first login",
            DEFAULT_ADMIN
        );
    }
    Ok(created)
}

/// Middleware resolving the bearer token into an [`AuthUser`] extension.
pub async fn api_auth_middleware(
    State(ctx): State<AppContext>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let user = if !ctx.config.server.auth.enabled {
        AuthUser::Anonymous
    } else {
        let token = bearer
            .map(|b| b.token().to_string())
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;
        let conn = get_conn(&ctx.db)?;
        let (_, user) = auth_tokens::get_token_with_user(&conn, &token)?
            .ok_or_else(|| ApiError::unauthorized("Invalid or expired token"))?;
        AuthUser::User(user)
    };

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

/// Middleware rejecting non-admin callers with 403.
pub async fn require_admin(
    Extension(user): Extension<AuthUser>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    if !user.is_admin() {
        return Err(ApiError::forbidden());
    }
    Ok(next.run(request).await)
}

/// Login handler
pub async fn login(
    State(ctx): State<AppContext>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let ttl_secs = ctx.config.server.auth.token_ttl_secs;
    let db = ctx.db.clone();

    let response = tokio::task::spawn_blocking(move || -> Result<LoginResponse, ApiError> {
        let found = {
            let conn = get_conn(&db)?;
            users::get_user_by_username(&conn, &payload.username)?
        };
        let user = found
            .filter(|u| verify_password(&payload.password, &u.password_hash))
            .ok_or_else(|| ApiError::unauthorized("Invalid credentials"))?;

        let conn = get_conn(&db)?;
        let token = auth_tokens::create_token(&conn, user.id, chrono::Duration::seconds(ttl_secs as i64))?;
        if let Err(e) = auth_tokens::delete_expired_tokens(&conn) {
            tracing::debug!("Failed to purge expired tokens: {}", e);
        }

        tracing::info!("User '{}' logged in", user.username);
        Ok(LoginResponse {
            access_token: token.token,
            token_type: "Bearer",
            expires_in: ttl_secs,
            user: UserView::from(&user),
        })
    })
    .await
    .map_err(|e| ApiError::internal(format!("Login task failed: {}", e)))??;

    Ok(Json(response))
}

/// Logout handler, revokes the presented token
pub async fn logout(
    State(ctx): State<AppContext>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if let Some(TypedHeader(auth)) = bearer {
        let conn = get_conn(&ctx.db)?;
        auth_tokens::delete_token(&conn, auth.token())?;
    }
    Ok(Json(serde_json::json!({ "message": "Logged out" })))
}

pub async fn me(Extension(user): Extension<AuthUser>) -> Json<UserView> {
    Json(user.view())
}

pub async fn change_password(
    State(ctx): State<AppContext>,
    Extension(user): Extension<AuthUser>,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<Json<ChangePasswordResponse>, ApiError> {
    let AuthUser::User(user) = user else {
        return Err(ApiError::bad_request("Authentication is disabled"));
    };
    if payload.new_password.is_empty() {
        return Err(ApiError::bad_request("New password must not be empty"));
    }

    let ttl_secs = ctx.config.server.auth.token_ttl_secs;
    let db = ctx.db.clone();

    let response = tokio::task::spawn_blocking(move || -> Result<ChangePasswordResponse, ApiError> {
        if !verify_password(&payload.current_password, &user.password_hash) {
            return Err(ApiError::unauthorized("Current password is incorrect"));
        }
        let hash = hash_password(&payload.new_password)?;
        let new_username = payload
            .new_username
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty() && *n != user.username);

        let conn = get_conn(&db)?;
        let updated = users::update_credentials(&conn, user.id, new_username, &hash)?;
        auth_tokens::delete_user_tokens(&conn, user.id)?;
        let token = auth_tokens::create_token(&conn, user.id, chrono::Duration::seconds(ttl_secs as i64))?;

        tracing::info!("User '{}' changed their password", updated.username);
        Ok(ChangePasswordResponse {
            message: "Password changed successfully",
            access_token: token.token,
            user: UserView::from(&updated),
        })
    })
    .await
    .map_err(|e| ApiError::internal(format!("Password change task failed: {}", e)))??;

    Ok(Json(response))
}
