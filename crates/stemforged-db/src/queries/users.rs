//! User database queries.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row};
use stemforged_common::{Error, Result, UserId};

use crate::models::{format_ts, parse_text, parse_ts, User, UserRole};

const COLS: &str = "id, username, password_hash, role, needs_password_change, created_at";

pub(crate) fn user_from_row_at(row: &Row, offset: usize) -> rusqlite::Result<User> {
    Ok(User {
        id: parse_text(offset, &row.get::<_, String>(offset)?)?,
        username: row.get(offset + 1)?,
        password_hash: row.get(offset + 2)?,
        role: parse_text(offset + 3, &row.get::<_, String>(offset + 3)?)?,
        needs_password_change: row.get(offset + 4)?,
        created_at: parse_ts(offset + 5, &row.get::<_, String>(offset + 5)?)?,
    })
}

fn user_from_row(row: &Row) -> rusqlite::Result<User> {
    user_from_row_at(row, 0)
}

fn map_unique(username: &str) -> impl FnOnce(rusqlite::Error) -> Error + '_ {
    move |e| {
        if e.to_string().contains("UNIQUE constraint failed") {
            Error::InvalidInput(format!("Username '{}' already exists", username))
        } else {
            Error::database(e.to_string())
        }
    }
}

/// Create a new user.
///
/// # Returns
///
/// * `Ok(User)` - The created user
/// * `Err(Error::InvalidInput)` - If the username already exists
pub fn create_user(
    conn: &Connection,
    username: &str,
    password_hash: &str,
    role: UserRole,
    needs_password_change: bool,
) -> Result<User> {
    let user = User {
        id: UserId::new(),
        username: username.to_string(),
        password_hash: password_hash.to_string(),
        role,
        needs_password_change,
        created_at: Utc::now(),
    };

    conn.execute(
        "INSERT INTO users (id, username, password_hash, role, needs_password_change, created_at)
         VALUES (:id, :username, :password_hash, :role, :needs_password_change, :created_at)",
        rusqlite::named_params! {
            ":id": user.id.to_string(),
            ":username": username,
            ":password_hash": password_hash,
            ":role": role.as_str(),
            ":needs_password_change": needs_password_change,
            ":created_at": format_ts(user.created_at),
        },
    )
    .map_err(map_unique(username))?;

    Ok(user)
}

/// Get a user by ID.
pub fn get_user(conn: &Connection, id: UserId) -> Result<Option<User>> {
    conn.query_row(
        &format!("SELECT {COLS} FROM users WHERE id = ?1"),
        [id.to_string()],
        user_from_row,
    )
    .optional()
    .map_err(|e| Error::database(e.to_string()))
}

/// Get a user by username.
pub fn get_user_by_username(conn: &Connection, username: &str) -> Result<Option<User>> {
    conn.query_row(
        &format!("SELECT {COLS} FROM users WHERE username = ?1"),
        [username],
        user_from_row,
    )
    .optional()
    .map_err(|e| Error::database(e.to_string()))
}

/// List all users ordered by username.
pub fn list_users(conn: &Connection) -> Result<Vec<User>> {
    let mut stmt = conn
        .prepare(&format!("SELECT {COLS} FROM users ORDER BY username"))
        .map_err(|e| Error::database(e.to_string()))?;
    let rows = stmt
        .query_map([], user_from_row)
        .map_err(|e| Error::database(e.to_string()))?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| Error::database(e.to_string()))
}

/// Count user accounts.
pub fn count_users(conn: &Connection) -> Result<u64> {
    conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get::<_, i64>(0))
        .map(|n| n.max(0) as u64)
        .map_err(|e| Error::database(e.to_string()))
}

/// Replace a user's password (and optionally username) and clear the
/// password-change flag.
pub fn update_credentials(
    conn: &Connection,
    id: UserId,
    new_username: Option<&str>,
    password_hash: &str,
) -> Result<User> {
    let username_for_err = new_username.unwrap_or_default();
    conn.query_row(
        &format!(
            "UPDATE users SET username = COALESCE(:username, username),
                    password_hash = :password_hash,
                    needs_password_change = 0
             WHERE id = :id
             RETURNING {COLS}"
        ),
        rusqlite::named_params! {
            ":username": new_username,
            ":password_hash": password_hash,
            ":id": id.to_string(),
        },
        user_from_row,
    )
    .optional()
    .map_err(map_unique(username_for_err))?
    .ok_or_else(|| Error::not_found("User"))
}

/// Create the initial admin account when no users exist.
///
/// The account is flagged for a password change on first login. Returns
/// `true` if an account was created.
pub fn ensure_default_admin(conn: &Connection, username: &str, password_hash: &str) -> Result<bool> {
    if count_users(conn)? > 0 {
        return Ok(false);
    }
    create_user(conn, username, password_hash, UserRole::Admin, true)?;
    Ok(true)
}
