use std::collections::HashSet;

use parley_models::gateway::ServerEvent;
use parley_models::ids::{ConnectionId, UserId};

use crate::error::GatewayError;
use crate::outbox::Outbox;
use crate::router::ChannelId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated,
    Closed,
}

/// Per-connection protocol state, owned by the connection's task.
///
/// `Unauthenticated -> Authenticated -> Closed`, or `Unauthenticated -> Closed`
/// when the handshake fails. `Closed` is terminal.
#[derive(Debug)]
pub struct ConnectionSession {
    id: ConnectionId,
    outbox: Outbox,
    user_id: Option<UserId>,
    state: SessionState,
    joined_channels: HashSet<ChannelId>,
}

impl ConnectionSession {
    pub fn new(outbox: Outbox) -> Self {
        Self {
            id: outbox.connection_id(),
            outbox,
            user_id: None,
            state: SessionState::Unauthenticated,
            joined_channels: HashSet::new(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn user_id(&self) -> Option<&UserId> {
        self.user_id.as_ref()
    }

    pub fn joined_channels(&self) -> &HashSet<ChannelId> {
        &self.joined_channels
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    /// The bound user, or `AuthenticationRequired` outside `Authenticated`.
    pub fn require_user(&self) -> Result<&UserId, GatewayError> {
        match (self.state, &self.user_id) {
            (SessionState::Authenticated, Some(user_id)) => Ok(user_id),
            _ => Err(GatewayError::AuthenticationRequired),
        }
    }

    pub fn emit(&self, event: ServerEvent) -> bool {
        self.outbox.deliver(event)
    }

    /// Binds the user. Only valid from `Unauthenticated`; the binding never changes afterwards.
    pub(crate) fn mark_authenticated(&mut self, user_id: UserId) -> bool {
        if self.state != SessionState::Unauthenticated {
            return false;
        }
        self.user_id = Some(user_id);
        self.state = SessionState::Authenticated;
        true
    }

    pub(crate) fn record_joined(&mut self, channels: impl IntoIterator<Item = ChannelId>) {
        self.joined_channels.extend(channels);
    }

    /// Moves to `Closed`. Returns `None` if the session was already closed,
    /// otherwise `Some` with the user that was bound (if the handshake had
    /// completed), so teardown runs exactly once.
    pub(crate) fn mark_closed(&mut self) -> Option<Option<UserId>> {
        match self.state {
            SessionState::Closed => None,
            SessionState::Unauthenticated => {
                self.state = SessionState::Closed;
                Some(None)
            }
            SessionState::Authenticated => {
                self.state = SessionState::Closed;
                self.joined_channels.clear();
                Some(self.user_id.clone())
            }
        }
    }
}
