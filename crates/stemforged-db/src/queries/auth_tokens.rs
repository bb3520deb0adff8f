//! Authentication token queries.
//!
//! Tokens are opaque bearer strings with a fixed expiry. Expired tokens are
//! never returned by lookups and are purged opportunistically.

use chrono::{Duration, Utc};
use rusqlite::{Connection, OptionalExtension};
use stemforged_common::{Error, Result, UserId};
use uuid::Uuid;

use crate::models::{format_ts, parse_text, parse_ts, AuthToken, User};
use crate::queries::users::user_from_row_at;

/// Issue a token for `user_id` valid for `ttl`.
pub fn create_token(conn: &Connection, user_id: UserId, ttl: Duration) -> Result<AuthToken> {
    let now = Utc::now();
    let token = AuthToken {
        token: Uuid::new_v4().simple().to_string(),
        user_id,
        created_at: now,
        expires_at: now + ttl,
    };

    conn.execute(
        "INSERT INTO auth_tokens (token, user_id, created_at, expires_at)
         VALUES (:token, :user_id, :created_at, :expires_at)",
        rusqlite::named_params! {
            ":token": token.token,
            ":user_id": user_id.to_string(),
            ":created_at": format_ts(token.created_at),
            ":expires_at": format_ts(token.expires_at),
        },
    )
    .map_err(|e| Error::database(e.to_string()))?;

    Ok(token)
}

/// Look up an unexpired token and its user.
pub fn get_token_with_user(conn: &Connection, token: &str) -> Result<Option<(AuthToken, User)>> {
    conn.query_row(
        "SELECT t.token, t.user_id, t.created_at, t.expires_at,
                u.id, u.username, u.password_hash, u.role, u.needs_password_change, u.created_at
         FROM auth_tokens t
         INNER JOIN users u ON t.user_id = u.id
         WHERE t.token = :token AND t.expires_at > :now",
        rusqlite::named_params! {
            ":token": token,
            ":now": format_ts(Utc::now()),
        },
        |row| {
            let auth_token = AuthToken {
                token: row.get(0)?,
                user_id: parse_text(1, &row.get::<_, String>(1)?)?,
                created_at: parse_ts(2, &row.get::<_, String>(2)?)?,
                expires_at: parse_ts(3, &row.get::<_, String>(3)?)?,
            };
            Ok((auth_token, user_from_row_at(row, 4)?))
        },
    )
    .optional()
    .map_err(|e| Error::database(e.to_string()))
}

/// Revoke a token. Returns whether it existed.
pub fn delete_token(conn: &Connection, token: &str) -> Result<bool> {
    let changed = conn
        .execute("DELETE FROM auth_tokens WHERE token = ?1", [token])
        .map_err(|e| Error::database(e.to_string()))?;
    Ok(changed > 0)
}

/// Revoke all tokens of a user, e.g. after a password change.
pub fn delete_user_tokens(conn: &Connection, user_id: UserId) -> Result<usize> {
    conn.execute(
        "DELETE FROM auth_tokens WHERE user_id = ?1",
        [user_id.to_string()],
    )
    .map_err(|e| Error::database(e.to_string()))
}

/// Remove expired tokens.
pub fn delete_expired_tokens(conn: &Connection) -> Result<usize> {
    conn.execute(
        "DELETE FROM auth_tokens WHERE expires_at <= ?1",
        [format_ts(Utc::now())],
    )
    .map_err(|e| Error::database(e.to_string()))
}
