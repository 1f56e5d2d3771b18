use crate::{DbError, DbPool};

pub async fn create_group(
    pool: &DbPool,
    group_id: &str,
    name: &str,
    created_by: &str,
) -> Result<(), DbError> {
    let mut tx = pool.begin().await?;

    sqlx::query("INSERT INTO groups (id, name, created_by, is_active) VALUES (?1, ?2, ?3, 1)")
        .bind(group_id)
        .bind(name)
        .bind(created_by)
        .execute(&mut *tx)
        .await?;

    sqlx::query("INSERT INTO group_members (group_id, user_id, role) VALUES (?1, ?2, 'admin')")
        .bind(group_id)
        .bind(created_by)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

pub async fn add_member(pool: &DbPool, group_id: &str, user_id: &str) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO group_members (group_id, user_id, role) VALUES (?1, ?2, 'member')
         ON CONFLICT (group_id, user_id) DO NOTHING",
    )
    .bind(group_id)
    .bind(user_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn remove_member(pool: &DbPool, group_id: &str, user_id: &str) -> Result<(), DbError> {
    sqlx::query("DELETE FROM group_members WHERE group_id = ?1 AND user_id = ?2")
        .bind(group_id)
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn set_group_active(pool: &DbPool, group_id: &str, active: bool) -> Result<(), DbError> {
    let result = sqlx::query("UPDATE groups SET is_active = ?2 WHERE id = ?1")
        .bind(group_id)
        .bind(i64::from(active))
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }
    Ok(())
}

/// Ids of the active groups that list `user_id` as a member.
pub async fn active_group_ids_for_user(
    pool: &DbPool,
    user_id: &str,
) -> Result<Vec<String>, DbError> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT g.id
         FROM groups g
         INNER JOIN group_members m ON m.group_id = g.id
         WHERE m.user_id = ?1 AND g.is_active = 1
         ORDER BY g.id",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn pool() -> DbPool {
        let pool = crate::create_pool("sqlite::memory:", 1).await.expect("pool");
        crate::run_migrations(&pool).await.expect("migrations");
        pool
    }

    #[tokio::test]
    async fn creator_is_a_member() {
        let pool = pool().await;
        create_group(&pool, "g1", "general", "alice").await.expect("group");
        let groups = active_group_ids_for_user(&pool, "alice").await.expect("lookup");
        assert_eq!(groups, vec!["g1".to_string()]);
    }

    #[tokio::test]
    async fn inactive_groups_are_excluded() {
        let pool = pool().await;
        create_group(&pool, "g1", "one", "alice").await.expect("group");
        create_group(&pool, "g2", "two", "bob").await.expect("group");
        add_member(&pool, "g2", "alice").await.expect("member");
        set_group_active(&pool, "g1", false).await.expect("deactivate");

        let groups = active_group_ids_for_user(&pool, "alice").await.expect("lookup");
        assert_eq!(groups, vec!["g2".to_string()]);
    }

    #[tokio::test]
    async fn removed_member_loses_group() {
        let pool = pool().await;
        create_group(&pool, "g1", "one", "alice").await.expect("group");
        add_member(&pool, "g1", "bob").await.expect("member");
        add_member(&pool, "g1", "bob").await.expect("duplicate add is a no-op");
        remove_member(&pool, "g1", "bob").await.expect("remove");
        assert!(active_group_ids_for_user(&pool, "bob")
            .await
            .expect("lookup")
            .is_empty());
    }

    #[tokio::test]
    async fn deactivating_unknown_group_is_not_found() {
        let pool = pool().await;
        let err = set_group_active(&pool, "missing", false)
            .await
            .expect_err("unknown group");
        assert!(matches!(err, DbError::NotFound));
    }
}
