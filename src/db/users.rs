//! User lookup and creation.

use super::{Database, now, ts_from_sql, ts_to_sql};
use crate::error::CommandError;
use crate::types::User;
use anyhow::Result;
use rusqlite::{Connection, Row, params};

fn parse_user_row(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        user_id: row.get("user_id")?,
        username: row.get("username")?,
        email: row.get("email")?,
        created_at: ts_from_sql(3, row.get("created_at")?)?,
    })
}

/// Internal helper to get a user using an existing connection.
pub(crate) fn get_user_internal(conn: &Connection, user_id: i64) -> Result<Option<User>> {
    let mut stmt = conn.prepare("SELECT * FROM users WHERE user_id = ?1")?;

    match stmt.query_row(params![user_id], parse_user_row) {
        Ok(user) => Ok(Some(user)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

impl Database {
    /// Create a user. Username and email are unique across all users.
    pub fn create_user(&self, username: &str, email: &str) -> Result<User> {
        self.with_conn(|conn| {
            let created_at = now();
            let result = conn.execute(
                "INSERT INTO users (username, email, created_at) VALUES (?1, ?2, ?3)",
                params![username, email, ts_to_sql(&created_at)],
            );

            match result {
                Ok(_) => Ok(User {
                    user_id: conn.last_insert_rowid(),
                    username: username.to_string(),
                    email: email.to_string(),
                    created_at,
                }),
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    Err(CommandError::conflict(format!(
                        "A user with username '{}' or email '{}' already exists",
                        username, email
                    ))
                    .into())
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    /// Get a user by ID.
    pub fn get_user(&self, user_id: i64) -> Result<Option<User>> {
        self.with_conn(|conn| get_user_internal(conn, user_id))
    }

    /// Get a user by username.
    pub fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM users WHERE username = ?1")?;

            match stmt.query_row(params![username], parse_user_row) {
                Ok(user) => Ok(Some(user)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }

    /// Search users with optional case-insensitive filters.
    pub fn search_users(
        &self,
        username: Option<&str>,
        email: Option<&str>,
    ) -> Result<Vec<User>> {
        self.with_conn(|conn| {
            let mut sql = String::from("SELECT * FROM users");
            let mut conds: Vec<&str> = Vec::new();
            let mut values: Vec<String> = Vec::new();

            if let Some(username) = username {
                conds.push("LOWER(username) = LOWER(?)");
                values.push(username.to_string());
            }
            if let Some(email) = email {
                conds.push("LOWER(email) = LOWER(?)");
                values.push(email.to_string());
            }
            if !conds.is_empty() {
                sql.push_str(" WHERE ");
                sql.push_str(&conds.join(" AND "));
            }
            sql.push_str(" ORDER BY user_id");

            let mut stmt = conn.prepare(&sql)?;
            let users = stmt
                .query_map(rusqlite::params_from_iter(values.iter()), parse_user_row)?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(users)
        })
    }

    /// Get or create the fallback creator account used when a command does
    /// not name one.
    pub fn ensure_default_user(&self, username: &str, email: &str) -> Result<User> {
        if let Some(user) = self.get_user_by_username(username)? {
            return Ok(user);
        }
        self.create_user(username, email)
    }
}
