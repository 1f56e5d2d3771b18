//! SQL-backed implementations of the collaborator traits.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{SubsecRound, Utc};
use parley_db::messages::NewMessage;
use parley_db::DbPool;
use parley_models::ids::{GroupId, UserId};
use parley_models::message::{AppendedMessage, MessageTarget};

use crate::collab::{
    DependencyError, GroupMembershipProvider, MessageRepository, SessionInfo, SessionStore,
};

const SESSION_STORE: &str = "session store";
const GROUP_DIRECTORY: &str = "group directory";
const MESSAGE_REPOSITORY: &str = "message repository";

#[derive(Clone)]
pub struct SqlSessionStore {
    db: DbPool,
}

impl SqlSessionStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SessionStore for SqlSessionStore {
    async fn validate(&self, token: &str) -> Result<Option<SessionInfo>, DependencyError> {
        let row = parley_db::sessions::find_session_by_token(&self.db, token)
            .await
            .map_err(|e| DependencyError::unavailable(SESSION_STORE, e.to_string()))?;
        Ok(row
            .filter(|row| row.is_usable_at(Utc::now()))
            .map(|row| SessionInfo {
                user_id: UserId::new(row.user_id),
                expires_at: row.expires_at,
            }))
    }
}

#[derive(Clone)]
pub struct SqlGroupDirectory {
    db: DbPool,
}

impl SqlGroupDirectory {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl GroupMembershipProvider for SqlGroupDirectory {
    async fn active_groups_for(
        &self,
        user_id: &UserId,
    ) -> Result<HashSet<GroupId>, DependencyError> {
        let ids = parley_db::groups::active_group_ids_for_user(&self.db, user_id.as_str())
            .await
            .map_err(|e| DependencyError::unavailable(GROUP_DIRECTORY, e.to_string()))?;
        Ok(ids.into_iter().map(GroupId::new).collect())
    }
}

#[derive(Clone)]
pub struct SqlMessageRepository {
    db: DbPool,
    worker_id: u16,
}

impl SqlMessageRepository {
    pub fn new(db: DbPool, worker_id: u16) -> Self {
        Self { db, worker_id }
    }
}

#[async_trait]
impl MessageRepository for SqlMessageRepository {
    async fn append(
        &self,
        sender_id: &UserId,
        target: &MessageTarget,
        content: &str,
    ) -> Result<AppendedMessage, DependencyError> {
        // Stored with millisecond precision; hand back the same value.
        let created_at = Utc::now().trunc_subsecs(3);
        let id = parley_util::snowflake::generate_at(self.worker_id, created_at);
        parley_db::messages::create_message(
            &self.db,
            NewMessage {
                id,
                sender_id: sender_id.as_str(),
                receiver_id: target.receiver_id().map(UserId::as_str),
                group_id: target.group_id().map(GroupId::as_str),
                message_type: target.kind().as_str(),
                content,
                created_at,
            },
        )
        .await
        .map_err(|e| DependencyError::unavailable(MESSAGE_REPOSITORY, e.to_string()))?;

        Ok(AppendedMessage {
            message_id: id.to_string(),
            created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn pool() -> DbPool {
        let pool = parley_db::create_pool("sqlite::memory:", 1)
            .await
            .expect("pool");
        parley_db::run_migrations(&pool).await.expect("migrations");
        pool
    }

    #[tokio::test]
    async fn session_store_rejects_expired_and_inactive_sessions() {
        let pool = pool().await;
        let now = Utc::now();
        parley_db::sessions::create_session(&pool, "live", "alice", now + Duration::hours(1))
            .await
            .expect("session");
        parley_db::sessions::create_session(&pool, "stale", "bob", now - Duration::hours(1))
            .await
            .expect("session");
        parley_db::sessions::create_session(&pool, "revoked", "carol", now + Duration::hours(1))
            .await
            .expect("session");
        parley_db::sessions::deactivate_session(&pool, "revoked")
            .await
            .expect("deactivate");

        let store = SqlSessionStore::new(pool);
        let live = store.validate("live").await.expect("validate");
        assert_eq!(live.map(|s| s.user_id), Some(UserId::from("alice")));
        assert!(store.validate("stale").await.expect("validate").is_none());
        assert!(store.validate("revoked").await.expect("validate").is_none());
        assert!(store.validate("unknown").await.expect("validate").is_none());
    }

    #[tokio::test]
    async fn group_directory_lists_active_memberships() {
        let pool = pool().await;
        parley_db::groups::create_group(&pool, "g1", "general", "alice")
            .await
            .expect("group");
        let directory = SqlGroupDirectory::new(pool);
        let groups = directory
            .active_groups_for(&UserId::from("alice"))
            .await
            .expect("lookup");
        assert_eq!(groups, HashSet::from([GroupId::from("g1")]));
    }

    #[tokio::test]
    async fn message_repository_assigns_id_and_timestamp() {
        let pool = pool().await;
        let repo = SqlMessageRepository::new(pool.clone(), 1);
        let appended = repo
            .append(
                &UserId::from("alice"),
                &MessageTarget::Group(GroupId::from("g1")),
                "hello group",
            )
            .await
            .expect("append");

        let id: i64 = appended.message_id.parse().expect("numeric id");
        let row = parley_db::messages::get_message(&pool, id)
            .await
            .expect("query")
            .expect("row");
        assert_eq!(row.message_type, "group");
        assert_eq!(row.group_id.as_deref(), Some("g1"));
        assert_eq!(row.receiver_id, None);
        assert_eq!(row.created_at, appended.created_at);
    }
}
