use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use parley_models::ids::{ConnectionId, GroupId, UserId};

use crate::collab::GroupMembershipProvider;

/// Logical broadcast channel: a user's personal inbox or a group room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChannelId {
    User(UserId),
    Group(GroupId),
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "user:{id}"),
            Self::Group(id) => write!(f, "group:{id}"),
        }
    }
}

#[derive(Default)]
struct RouterState {
    members: HashMap<ChannelId, HashSet<ConnectionId>>,
    joined: HashMap<ConnectionId, HashSet<ChannelId>>,
}

/// Channel membership of live connections. Nothing here is persisted;
/// group channels are recomputed from the membership provider on demand.
pub struct ChannelRouter {
    groups: Arc<dyn GroupMembershipProvider>,
    state: Mutex<RouterState>,
}

impl ChannelRouter {
    pub fn new(groups: Arc<dyn GroupMembershipProvider>) -> Self {
        Self {
            groups,
            state: Mutex::new(RouterState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RouterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The user's personal channel plus one channel per active group. A
    /// failing provider degrades to the personal channel alone.
    pub async fn resolve_membership(&self, user_id: &UserId) -> HashSet<ChannelId> {
        let mut channels = HashSet::from([ChannelId::User(user_id.clone())]);
        match self.groups.active_groups_for(user_id).await {
            Ok(groups) => channels.extend(groups.into_iter().map(ChannelId::Group)),
            Err(err) => {
                tracing::warn!(
                    user_id = %user_id,
                    error = %err,
                    "group membership lookup failed, personal channel only"
                );
            }
        }
        channels
    }

    /// Subscribes a connection to `channels`. Already-joined channels are
    /// left alone; the newly joined ones are returned.
    pub fn subscribe(
        &self,
        connection_id: ConnectionId,
        channels: impl IntoIterator<Item = ChannelId>,
    ) -> Vec<ChannelId> {
        let mut state = self.lock();
        let mut added = Vec::new();
        for channel in channels {
            let joined = state.joined.entry(connection_id).or_default();
            if !joined.insert(channel.clone()) {
                continue;
            }
            state
                .members
                .entry(channel.clone())
                .or_default()
                .insert(connection_id);
            added.push(channel);
        }
        added.sort();
        added
    }

    pub fn channel_members(&self, channel: &ChannelId) -> HashSet<ConnectionId> {
        self.lock().members.get(channel).cloned().unwrap_or_default()
    }

    pub fn is_subscribed(&self, connection_id: ConnectionId, channel: &ChannelId) -> bool {
        self.lock()
            .joined
            .get(&connection_id)
            .is_some_and(|joined| joined.contains(channel))
    }

    /// Drops the connection from every channel; empty channels are removed.
    /// Returns the number of channels left.
    pub fn unsubscribe_all(&self, connection_id: ConnectionId) -> usize {
        let mut state = self.lock();
        let Some(joined) = state.joined.remove(&connection_id) else {
            return 0;
        };
        for channel in &joined {
            if let Some(members) = state.members.get_mut(channel) {
                members.remove(&connection_id);
                if members.is_empty() {
                    state.members.remove(channel);
                }
            }
        }
        joined.len()
    }

    pub fn channel_count(&self) -> usize {
        self.lock().members.len()
    }
}
