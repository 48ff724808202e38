//! # Access Crate
//!
//! This crate is the central authority for identity and session resolution
//! for the `studyrag` application. Clients never send credentials over the
//! chat connection; they send an opaque session token which this crate
//! resolves to a `(User, AuthSession)` pair.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use turso::{params, Database, Error as TursoError, Row};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum AccessError {
    #[error("Database error: {0}")]
    Database(#[from] TursoError),
    #[error("Failed to create or find user for identifier: {0}")]
    UserPersistenceFailed(String),
    #[error("Data integrity error: {0}")]
    DataIntegrity(String),
}

/// DDL for the identity tables. Idempotent, safe to run on every startup.
const ACCESS_TABLE_CREATION_SQL: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE TABLE IF NOT EXISTS auth_sessions (
        token TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        expires_at TEXT,
        created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE INDEX IF NOT EXISTS idx_auth_sessions_user ON auth_sessions (user_id)",
];

/// Represents a user in the system.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct User {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// A live authenticated session, resolved from an opaque token.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AuthSession {
    pub token: String,
    pub user_id: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Parses the `CURRENT_TIMESTAMP` text format SQLite produces.
fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, AccessError> {
    chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .map(|ndt| DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc))
        .map_err(|e| AccessError::DataIntegrity(format!("Failed to parse date '{value}': {e}")))
}

impl TryFrom<&Row> for User {
    type Error = AccessError;

    fn try_from(row: &Row) -> Result<Self, Self::Error> {
        let created_at_str: String = row.get(2)?;
        Ok(User {
            id: row.get(0)?,
            name: row.get(1)?,
            created_at: parse_timestamp(&created_at_str)?,
        })
    }
}

/// Ensures the identity tables exist.
pub async fn initialize_schema(db: &Database) -> Result<(), AccessError> {
    let conn = db.connect()?;
    for statement in ACCESS_TABLE_CREATION_SQL {
        conn.execute(statement, ()).await?;
    }
    Ok(())
}

/// Finds a user by their external identifier (e.g. an email), creating them
/// if they don't exist.
///
/// A random v4 id is assigned on first sight; the identifier is only used
/// for lookup.
pub async fn get_or_create_user(db: &Database, name: &str) -> Result<User, AccessError> {
    let conn = db.connect()?;

    let mut rows = conn
        .query(
            "SELECT id, name, created_at FROM users WHERE name = ?",
            params![name.to_string()],
        )
        .await?;
    if let Some(row) = rows.next().await? {
        return User::try_from(&row);
    }

    let user_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO users (id, name) VALUES (?, ?)",
        params![user_id.clone(), name.to_string()],
    )
    .await?;

    let mut rows = conn
        .query(
            "SELECT id, name, created_at FROM users WHERE id = ?",
            params![user_id],
        )
        .await?;
    let row = rows
        .next()
        .await?
        .ok_or_else(|| AccessError::UserPersistenceFailed(name.to_string()))?;
    User::try_from(&row)
}

/// Issues a new opaque session token for a user.
///
/// `ttl_seconds` of `None` creates a non-expiring session (used by tests and
/// local tooling).
pub async fn create_session(
    db: &Database,
    user_id: &str,
    ttl_seconds: Option<i64>,
) -> Result<AuthSession, AccessError> {
    let conn = db.connect()?;
    let token = Uuid::new_v4().to_string();
    let expires_at = ttl_seconds.map(|ttl| Utc::now() + chrono::Duration::seconds(ttl));
    let expires_at_str = expires_at.map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string());

    conn.execute(
        "INSERT INTO auth_sessions (token, user_id, expires_at) VALUES (?, ?, ?)",
        params![token.clone(), user_id.to_string(), expires_at_str],
    )
    .await?;

    Ok(AuthSession {
        token,
        user_id: user_id.to_string(),
        expires_at,
    })
}

/// Resolves an opaque session token to its user.
///
/// Returns `Ok(None)` for unknown or expired tokens; database failures are
/// the only error path.
pub async fn resolve_session(
    db: &Database,
    token: &str,
) -> Result<Option<(User, AuthSession)>, AccessError> {
    let conn = db.connect()?;
    let mut rows = conn
        .query(
            "SELECT u.id, u.name, u.created_at, s.token, s.expires_at
             FROM auth_sessions s JOIN users u ON u.id = s.user_id
             WHERE s.token = ?",
            params![token.to_string()],
        )
        .await?;

    let Some(row) = rows.next().await? else {
        return Ok(None);
    };

    let user = User::try_from(&row)?;
    let session_token: String = row.get(3)?;
    let expires_at = match row.get_value(4)? {
        turso::Value::Text(s) => Some(parse_timestamp(&s)?),
        _ => None,
    };

    if let Some(expiry) = expires_at {
        if expiry <= Utc::now() {
            tracing::debug!(token = %session_token, "Rejected expired session token");
            return Ok(None);
        }
    }

    Ok(Some((
        user.clone(),
        AuthSession {
            token: session_token,
            user_id: user.id,
            expires_at,
        },
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> Database {
        let db = turso::Builder::new_local(":memory:")
            .build()
            .await
            .expect("in-memory db");
        initialize_schema(&db).await.expect("schema");
        db
    }

    #[tokio::test]
    async fn test_get_or_create_user_is_idempotent() {
        let db = test_db().await;
        let first = get_or_create_user(&db, "alice").await.unwrap();
        let second = get_or_create_user(&db, "alice").await.unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_resolve_session_round_trip() {
        let db = test_db().await;
        let user = get_or_create_user(&db, "bob").await.unwrap();
        let session = create_session(&db, &user.id, None).await.unwrap();

        let resolved = resolve_session(&db, &session.token).await.unwrap();
        let (resolved_user, resolved_session) = resolved.expect("session should resolve");
        assert_eq!(resolved_user.id, user.id);
        assert_eq!(resolved_session.token, session.token);
    }

    #[tokio::test]
    async fn test_resolve_session_rejects_unknown_and_expired() {
        let db = test_db().await;
        assert!(resolve_session(&db, "no-such-token")
            .await
            .unwrap()
            .is_none());

        let user = get_or_create_user(&db, "carol").await.unwrap();
        let expired = create_session(&db, &user.id, Some(-60)).await.unwrap();
        assert!(resolve_session(&db, &expired.token)
            .await
            .unwrap()
            .is_none());
    }
}
