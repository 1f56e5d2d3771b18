use crate::{DbError, DbPool};

pub async fn block_value(pool: &DbPool, value: &str, kind: &str) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO blocked_ips (value, kind) VALUES (?1, ?2)
         ON CONFLICT (value) DO UPDATE SET kind = excluded.kind",
    )
    .bind(value)
    .bind(kind)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn unblock_value(pool: &DbPool, value: &str) -> Result<(), DbError> {
    sqlx::query("DELETE FROM blocked_ips WHERE value = ?1")
        .bind(value)
        .execute(pool)
        .await?;
    Ok(())
}

/// Exact-match lookup against `ip` rules only.
pub async fn is_ip_blocked(pool: &DbPool, ip: &str) -> Result<bool, DbError> {
    let exists: Option<(i64,)> =
        sqlx::query_as("SELECT 1 FROM blocked_ips WHERE kind = 'ip' AND value = ?1 LIMIT 1")
            .bind(ip)
            .fetch_optional(pool)
            .await?;
    Ok(exists.is_some())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn only_ip_rules_match() {
        let pool = crate::create_pool("sqlite::memory:", 1).await.expect("pool");
        crate::run_migrations(&pool).await.expect("migrations");

        block_value(&pool, "203.0.113.9", "ip").await.expect("block ip");
        block_value(&pool, "198.51.100.1", "city").await.expect("block city");

        assert!(is_ip_blocked(&pool, "203.0.113.9").await.expect("lookup"));
        assert!(!is_ip_blocked(&pool, "198.51.100.1").await.expect("lookup"));

        unblock_value(&pool, "203.0.113.9").await.expect("unblock");
        assert!(!is_ip_blocked(&pool, "203.0.113.9").await.expect("lookup"));
    }
}
