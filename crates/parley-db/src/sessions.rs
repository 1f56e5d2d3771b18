use chrono::{DateTime, Utc};

use crate::{datetime_from_db_text, datetime_to_db_text, sha256_hex, DbError, DbPool};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRow {
    pub user_id: String,
    pub is_active: bool,
    pub expires_at: DateTime<Utc>,
}

impl SessionRow {
    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at > now
    }
}

pub async fn create_session(
    pool: &DbPool,
    token: &str,
    user_id: &str,
    expires_at: DateTime<Utc>,
) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO user_sessions (token_hash, user_id, is_active, expires_at)
         VALUES (?1, ?2, 1, ?3)",
    )
    .bind(sha256_hex(token))
    .bind(user_id)
    .bind(datetime_to_db_text(expires_at))
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn find_session_by_token(
    pool: &DbPool,
    token: &str,
) -> Result<Option<SessionRow>, DbError> {
    let row: Option<(String, i64, String)> = sqlx::query_as(
        "SELECT user_id, is_active, expires_at FROM user_sessions WHERE token_hash = ?1",
    )
    .bind(sha256_hex(token))
    .fetch_optional(pool)
    .await?;

    let Some((user_id, is_active, expires_at)) = row else {
        return Ok(None);
    };
    Ok(Some(SessionRow {
        user_id,
        is_active: is_active != 0,
        expires_at: datetime_from_db_text(&expires_at)?,
    }))
}

/// Returns false when no session matched the token.
pub async fn deactivate_session(pool: &DbPool, token: &str) -> Result<bool, DbError> {
    let result = sqlx::query("UPDATE user_sessions SET is_active = 0 WHERE token_hash = ?1")
        .bind(sha256_hex(token))
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
