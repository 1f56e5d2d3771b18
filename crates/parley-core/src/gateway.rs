use std::collections::HashSet;
use std::num::NonZeroU32;
use std::sync::Arc;

use chrono::Utc;
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use parley_models::gateway::{ClientEvent, SendMessagePayload, ServerEvent};
use parley_models::ids::{ConnectionId, GroupId, UserId};
use parley_models::message::{ChatMessage, MessageKind, MessageTarget};
use tokio::sync::mpsc;

use crate::collab::{GroupMembershipProvider, MessageRepository, SessionStore};
use crate::error::{AuthFailure, GatewayError};
use crate::outbox::Outbox;
use crate::presence::PresenceRegistry;
use crate::router::{ChannelId, ChannelRouter};
use crate::session::{ConnectionSession, SessionState};
use crate::GatewayConfig;

/// Control surface of the real-time layer: runs the handshake, dispatches
/// inbound events and fans out outbound ones.
///
/// Calls for one connection take `&mut ConnectionSession`, so a
/// connection's events are handled strictly in order; different
/// connections run concurrently. Registry locks are never held across a
/// collaborator call.
pub struct MessageGateway {
    config: GatewayConfig,
    sessions: Arc<dyn SessionStore>,
    messages: Arc<dyn MessageRepository>,
    presence: PresenceRegistry,
    router: ChannelRouter,
    send_limiter: DefaultKeyedRateLimiter<UserId>,
}

impl MessageGateway {
    pub fn new(
        config: GatewayConfig,
        sessions: Arc<dyn SessionStore>,
        groups: Arc<dyn GroupMembershipProvider>,
        messages: Arc<dyn MessageRepository>,
    ) -> Self {
        let per_minute =
            NonZeroU32::new(config.max_messages_per_minute).unwrap_or(NonZeroU32::MIN);
        Self {
            presence: PresenceRegistry::new(config.max_connections_per_user),
            router: ChannelRouter::new(groups),
            send_limiter: RateLimiter::keyed(Quota::per_minute(per_minute)),
            sessions,
            messages,
            config,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    pub fn router(&self) -> &ChannelRouter {
        &self.router
    }

    /// A fresh `Unauthenticated` session plus the receiving end of its outbound queue.
    pub fn open_session(&self) -> (ConnectionSession, mpsc::Receiver<ServerEvent>) {
        let (outbox, rx) = Outbox::channel(ConnectionId::new(), self.config.outbox_capacity);
        (ConnectionSession::new(outbox), rx)
    }

    /// Runs the handshake. On success the connection is registered for
    /// presence and joined to its personal channel. On failure the session
    /// is closed and never reaches `Authenticated`.
    pub async fn authenticate(
        &self,
        session: &mut ConnectionSession,
        token: Option<&str>,
    ) -> Result<UserId, GatewayError> {
        match session.state() {
            SessionState::Unauthenticated => {}
            SessionState::Authenticated => {
                return Err(GatewayError::Authentication(
                    AuthFailure::AlreadyAuthenticated,
                ))
            }
            SessionState::Closed => return Err(GatewayError::Authentication(AuthFailure::Closed)),
        }

        let result = self.admit(session, token).await;
        if let Err(err) = &result {
            session.mark_closed();
            tracing::warn!(
                connection_id = %session.id(),
                error = %err,
                "handshake rejected"
            );
        }
        result
    }

    async fn admit(
        &self,
        session: &mut ConnectionSession,
        token: Option<&str>,
    ) -> Result<UserId, GatewayError> {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(GatewayError::Authentication(AuthFailure::MissingToken))?;

        let info = self
            .sessions
            .validate(token)
            .await
            .map_err(|e| GatewayError::Authentication(AuthFailure::Unavailable(e)))?
            .ok_or(GatewayError::Authentication(AuthFailure::InvalidSession))?;
        if info.expires_at <= Utc::now() {
            return Err(GatewayError::Authentication(AuthFailure::Expired));
        }

        let user_id = info.user_id;
        // Subscribed before `register` announces the user online, so a DM
        // sent in reaction to that announcement already finds this connection.
        let joined = self
            .router
            .subscribe(session.id(), [ChannelId::User(user_id.clone())]);
        if self
            .presence
            .register(&user_id, session.outbox().clone())
            .is_err()
        {
            self.router.unsubscribe_all(session.id());
            return Err(GatewayError::ConnectionLimit);
        }
        session.mark_authenticated(user_id.clone());
        session.record_joined(joined);

        tracing::info!(
            connection_id = %session.id(),
            user_id = %user_id,
            "connection authenticated"
        );
        Ok(user_id)
    }

    /// Parses and handles one inbound text frame. Failures are reported to
    /// this connection only, as an `error` event.
    pub async fn handle_frame(&self, session: &mut ConnectionSession, text: &str) {
        let result = match session.require_user() {
            Err(err) => Err(err),
            Ok(_) => match serde_json::from_str::<ClientEvent>(text) {
                Ok(event) => self.handle_event(session, event).await,
                Err(err) => Err(GatewayError::Validation(format!("malformed event: {err}"))),
            },
        };
        if let Err(err) = result {
            self.report(session, &err);
        }
    }

    /// Handles one inbound event, returning the failure instead of emitting it.
    pub async fn handle_event(
        &self,
        session: &mut ConnectionSession,
        event: ClientEvent,
    ) -> Result<(), GatewayError> {
        session.require_user()?;
        match event {
            ClientEvent::JoinGroups => self.join_groups(session).await,
            ClientEvent::SendMessage(payload) => self.send_message(session, payload).await,
        }
    }

    /// Logs a failed event and tells the originating connection.
    pub fn report(&self, session: &ConnectionSession, err: &GatewayError) {
        let user_id = session.user_id().map(UserId::as_str).unwrap_or("-");
        match err {
            GatewayError::Persistence(_) => tracing::error!(
                connection_id = %session.id(),
                user_id,
                error = %err,
                "event failed"
            ),
            _ => tracing::debug!(
                connection_id = %session.id(),
                user_id,
                error = %err,
                "event rejected"
            ),
        }
        session.emit(ServerEvent::error(err.client_message()));
    }

    /// Additive only: channels of groups the user has since left stay
    /// subscribed until the connection closes.
    async fn join_groups(&self, session: &mut ConnectionSession) -> Result<(), GatewayError> {
        let user_id = session.require_user()?.clone();
        let channels = self.router.resolve_membership(&user_id).await;

        if session.state() != SessionState::Authenticated {
            return Ok(());
        }
        let joined = self.router.subscribe(session.id(), channels);
        tracing::debug!(
            connection_id = %session.id(),
            user_id = %user_id,
            joined = joined.len(),
            "joined group channels"
        );
        session.record_joined(joined);
        Ok(())
    }

    async fn send_message(
        &self,
        session: &mut ConnectionSession,
        payload: SendMessagePayload,
    ) -> Result<(), GatewayError> {
        let sender_id = session.require_user()?.clone();
        let target = validate_target(&payload)?;
        self.validate_content(&payload.content)?;

        if let MessageTarget::Group(group_id) = &target {
            if !session
                .joined_channels()
                .contains(&ChannelId::Group(group_id.clone()))
            {
                return Err(GatewayError::NotGroupMember(group_id.clone()));
            }
        }
        if self.send_limiter.check_key(&sender_id).is_err() {
            return Err(GatewayError::RateLimited);
        }

        let appended = self
            .messages
            .append(&sender_id, &target, &payload.content)
            .await
            .map_err(GatewayError::Persistence)?;

        let message = ChatMessage {
            message_id: appended.message_id,
            sender_id,
            target,
            content: payload.content,
            created_at: appended.created_at,
        };
        let recipients = self.fan_out_targets(&message);
        let delivered = self
            .presence
            .deliver(&recipients, &ServerEvent::NewMessage((&message).into()));

        tracing::debug!(
            connection_id = %session.id(),
            message_id = %message.message_id,
            kind = message.target.kind().as_str(),
            delivered,
            "message fanned out"
        );
        Ok(())
    }

    fn validate_content(&self, content: &str) -> Result<(), GatewayError> {
        if content.trim().is_empty() {
            return Err(GatewayError::Validation(
                "message content cannot be empty".to_string(),
            ));
        }
        if content.chars().count() > self.config.max_message_length {
            return Err(GatewayError::Validation(format!(
                "message content exceeds {} characters",
                self.config.max_message_length
            )));
        }
        Ok(())
    }

    /// Connections resolved at delivery time; anything closed meanwhile is
    /// already unsubscribed and gets nothing.
    fn fan_out_targets(&self, message: &ChatMessage) -> HashSet<ConnectionId> {
        match &message.target {
            MessageTarget::Direct(receiver_id) => {
                let mut targets = self
                    .router
                    .channel_members(&ChannelId::User(message.sender_id.clone()));
                targets.extend(
                    self.router
                        .channel_members(&ChannelId::User(receiver_id.clone())),
                );
                targets
            }
            MessageTarget::Group(group_id) => self
                .router
                .channel_members(&ChannelId::Group(group_id.clone())),
        }
    }

    /// Closes the session, whatever state it reached. Teardown runs once;
    /// later calls return false.
    pub fn disconnect(&self, session: &mut ConnectionSession) -> bool {
        let Some(bound_user) = session.mark_closed() else {
            return false;
        };
        let Some(user_id) = bound_user else {
            tracing::debug!(connection_id = %session.id(), "unauthenticated connection closed");
            return true;
        };

        let channels = self.router.unsubscribe_all(session.id());
        let went_offline = self.presence.unregister(&user_id, session.id());
        tracing::info!(
            connection_id = %session.id(),
            user_id = %user_id,
            channels,
            went_offline,
            "connection closed"
        );
        true
    }

    /// Drops idle rate-limiter keys.
    pub fn prune(&self) {
        self.send_limiter.retain_recent();
        self.send_limiter.shrink_to_fit();
    }
}

fn non_blank(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|v| !v.is_empty())
}

fn validate_target(payload: &SendMessagePayload) -> Result<MessageTarget, GatewayError> {
    let receiver_id = non_blank(payload.receiver_id.as_deref());
    let group_id = non_blank(payload.group_id.as_deref());
    match (payload.kind, receiver_id, group_id) {
        (MessageKind::Dm, Some(receiver_id), None) => {
            Ok(MessageTarget::Direct(UserId::from(receiver_id)))
        }
        (MessageKind::Group, None, Some(group_id)) => {
            Ok(MessageTarget::Group(GroupId::from(group_id)))
        }
        (MessageKind::Dm, _, _) => Err(GatewayError::Validation(
            "dm messages need a receiverId and no groupId".to_string(),
        )),
        (MessageKind::Group, _, _) => Err(GatewayError::Validation(
            "group messages need a groupId and no receiverId".to_string(),
        )),
    }
}
