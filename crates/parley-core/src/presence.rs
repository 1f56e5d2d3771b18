use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use parley_models::gateway::{PresenceStatus, ServerEvent};
use parley_models::ids::{ConnectionId, UserId};
use thiserror::Error;

use crate::outbox::Outbox;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("user already has {0} open connections")]
pub struct ConnectionLimitReached(pub usize);

struct ConnectionEntry {
    user_id: UserId,
    outbox: Outbox,
}

#[derive(Default)]
struct PresenceState {
    users: HashMap<UserId, HashSet<ConnectionId>>,
    connections: HashMap<ConnectionId, ConnectionEntry>,
}

impl PresenceState {
    fn online_users(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.users.keys().cloned().collect();
        users.sort();
        users
    }

    fn broadcast(&self, event: &ServerEvent) {
        for entry in self.connections.values() {
            entry.outbox.deliver(event.clone());
        }
    }
}

/// Who is online, and through which connections.
///
/// A user is present iff at least one of its connections is registered.
/// Every transition is decided and broadcast under one lock, so concurrent
/// registrations and closes for the same user can neither lose an update
/// nor emit a duplicate online/offline event.
pub struct PresenceRegistry {
    max_connections_per_user: usize,
    state: Mutex<PresenceState>,
}

impl PresenceRegistry {
    pub fn new(max_connections_per_user: usize) -> Self {
        Self {
            max_connections_per_user: max_connections_per_user.max(1),
            state: Mutex::new(PresenceState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PresenceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds `outbox`'s connection to `user_id`.
    ///
    /// The new connection first receives `onlineUsers` with the users that
    /// were online before it joined, then (if this is the user's first
    /// connection) every registered connection, this one included, receives
    /// `userStatus{online}`. Returns whether the user came online.
    pub fn register(
        &self,
        user_id: &UserId,
        outbox: Outbox,
    ) -> Result<bool, ConnectionLimitReached> {
        let connection_id = outbox.connection_id();
        let mut state = self.lock();

        if state.connections.contains_key(&connection_id) {
            return Ok(false);
        }
        let open = state.users.get(user_id).map_or(0, HashSet::len);
        if open >= self.max_connections_per_user {
            return Err(ConnectionLimitReached(open));
        }

        outbox.deliver(ServerEvent::OnlineUsers(state.online_users()));
        state.connections.insert(
            connection_id,
            ConnectionEntry {
                user_id: user_id.clone(),
                outbox,
            },
        );
        let connections = state.users.entry(user_id.clone()).or_default();
        connections.insert(connection_id);
        let came_online = connections.len() == 1;

        if came_online {
            state.broadcast(&ServerEvent::user_status(
                user_id.clone(),
                PresenceStatus::Online,
            ));
        }
        Ok(came_online)
    }

    /// Removes a connection. Returns whether the user went offline, in which
    /// case the remaining connections have been sent `userStatus{offline}`.
    pub fn unregister(&self, user_id: &UserId, connection_id: ConnectionId) -> bool {
        let mut state = self.lock();

        match state.connections.get(&connection_id) {
            Some(entry) if entry.user_id == *user_id => {}
            _ => return false,
        }
        state.connections.remove(&connection_id);

        let Some(connections) = state.users.get_mut(user_id) else {
            return false;
        };
        connections.remove(&connection_id);
        if !connections.is_empty() {
            return false;
        }
        state.users.remove(user_id);
        state.broadcast(&ServerEvent::user_status(
            user_id.clone(),
            PresenceStatus::Offline,
        ));
        true
    }

    /// Point-in-time set of online users, sorted.
    pub fn snapshot(&self) -> Vec<UserId> {
        self.lock().online_users()
    }

    pub fn is_online(&self, user_id: &UserId) -> bool {
        self.lock().users.contains_key(user_id)
    }

    pub fn connection_count(&self) -> usize {
        self.lock().connections.len()
    }

    pub fn online_count(&self) -> usize {
        self.lock().users.len()
    }

    /// Sends `event` to each registered connection in `targets`; unknown
    /// connections are skipped. Returns how many queues accepted it.
    pub fn deliver(&self, targets: &HashSet<ConnectionId>, event: &ServerEvent) -> usize {
        let state = self.lock();
        targets
            .iter()
            .filter_map(|id| state.connections.get(id))
            .filter(|entry| entry.outbox.deliver(event.clone()))
            .count()
    }
}
