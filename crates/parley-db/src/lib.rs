pub mod blocked_ips;
pub mod groups;
pub mod messages;
pub mod sessions;

use sha2::{Digest, Sha256};
use sqlx::any::AnyPoolOptions;
use thiserror::Error;

pub type DbPool = sqlx::AnyPool;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("not found")]
    NotFound,
}

pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<DbPool, sqlx::Error> {
    ensure_sqlite_url(database_url)?;

    // Required once before using sqlx::Any.
    sqlx::any::install_default_drivers();

    AnyPoolOptions::new()
        .max_connections(max_connections)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                // Tune SQLite for concurrent access.
                sqlx::query("PRAGMA journal_mode = WAL;")
                    .execute(&mut *conn)
                    .await?;
                sqlx::query("PRAGMA foreign_keys = ON;")
                    .execute(&mut *conn)
                    .await?;
                sqlx::query("PRAGMA busy_timeout = 5000;")
                    .execute(&mut *conn)
                    .await?;
                sqlx::query("PRAGMA synchronous = NORMAL;")
                    .execute(&mut *conn)
                    .await?;
                Ok(())
            })
        })
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("migrations: applied successfully");
    Ok(())
}

fn ensure_sqlite_url(database_url: &str) -> Result<(), sqlx::Error> {
    let normalized = database_url.trim().to_ascii_lowercase();
    if normalized.starts_with("sqlite:") {
        Ok(())
    } else {
        Err(sqlx::Error::Configuration(
            format!("unsupported database URL scheme in '{}'", database_url).into(),
        ))
    }
}

pub(crate) fn datetime_to_db_text(value: chrono::DateTime<chrono::Utc>) -> String {
    value.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

pub(crate) fn datetime_from_db_text(
    value: &str,
) -> Result<chrono::DateTime<chrono::Utc>, sqlx::Error> {
    use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(Utc.from_utc_datetime(&naive));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Ok(Utc.from_utc_datetime(&naive));
    }

    Err(sqlx::Error::Protocol(format!(
        "invalid datetime text '{}'",
        value
    )))
}

/// Session tokens are only ever stored hashed.
pub(crate) fn sha256_hex(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{create_pool, datetime_from_db_text, datetime_to_db_text, run_migrations};
    use chrono::{TimeZone, Utc};

    #[tokio::test]
    async fn create_pool_supports_in_memory_sqlite() {
        let pool = create_pool("sqlite::memory:", 1).await.expect("pool");
        let value: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&pool)
            .await
            .expect("query");
        assert_eq!(value, 1);
    }

    #[tokio::test]
    async fn rejects_non_sqlite_urls() {
        let err = create_pool("mysql://localhost/parley", 1)
            .await
            .expect_err("mysql is not supported");
        assert!(matches!(err, sqlx::Error::Configuration(_)));
    }

    #[tokio::test]
    async fn migrations_create_tables() {
        let pool = create_pool("sqlite::memory:", 1).await.expect("pool");
        run_migrations(&pool).await.expect("migrations");
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'
             AND name IN ('user_sessions', 'groups', 'group_members', 'chat_messages', 'blocked_ips')",
        )
        .fetch_one(&pool)
        .await
        .expect("count tables");
        assert_eq!(count, 5);
    }

    #[test]
    fn datetime_text_keeps_milliseconds() {
        let at = Utc.timestamp_millis_opt(1_780_000_000_123).unwrap();
        let text = datetime_to_db_text(at);
        assert_eq!(datetime_from_db_text(&text).unwrap(), at);
    }
}
