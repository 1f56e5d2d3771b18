//! Services the gateway calls into. Each call may suspend on I/O; none of
//! them is invoked while a registry lock is held.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parley_models::ids::{GroupId, UserId};
use parley_models::message::{AppendedMessage, MessageTarget};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("{service} unavailable: {reason}")]
pub struct DependencyError {
    pub service: &'static str,
    pub reason: String,
}

impl DependencyError {
    pub fn unavailable(service: &'static str, reason: impl Into<String>) -> Self {
        Self {
            service,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub user_id: UserId,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// `Ok(None)` when the token does not name a usable session.
    async fn validate(&self, token: &str) -> Result<Option<SessionInfo>, DependencyError>;
}

#[async_trait]
pub trait GroupMembershipProvider: Send + Sync {
    async fn active_groups_for(&self, user_id: &UserId)
        -> Result<HashSet<GroupId>, DependencyError>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn append(
        &self,
        sender_id: &UserId,
        target: &MessageTarget,
        content: &str,
    ) -> Result<AppendedMessage, DependencyError>;
}
