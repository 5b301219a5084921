// Database-backed SessionStore implementation
//
// The HTTP tier owns the sessions table; this store only resolves a
// cookie-derived session id to the user it belongs to.

use async_trait::async_trait;

use coursewire_core::{AuthenticatedUser, RealtimeError, Result, SessionStore};

use crate::repositories::Database;

#[derive(Clone)]
pub struct DbSessionStore {
    db: Database,
}

impl DbSessionStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[derive(sqlx::FromRow)]
struct SessionUserRow {
    user_id: i64,
    name: String,
    role: Option<String>,
}

#[async_trait]
impl SessionStore for DbSessionStore {
    async fn lookup(&self, session_id: &str) -> Result<Option<AuthenticatedUser>> {
        let row: Option<SessionUserRow> = sqlx::query_as(
            r#"
            SELECT u.user_id, u.name, u.role
            FROM sessions s
            JOIN users u ON u.user_id = s.user_id
            WHERE s.session_id = $1
              AND (s.expires_at IS NULL OR s.expires_at > NOW())
            "#,
        )
        .bind(session_id)
        .fetch_optional(self.db.pool())
        .await
        .map_err(|e| RealtimeError::session(e.to_string()))?;

        Ok(row.map(|row| AuthenticatedUser {
            user_id: row.user_id,
            name: row.name,
            role: row.role,
        }))
    }
}
