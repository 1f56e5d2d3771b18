use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{GroupId, UserId};
use crate::message::{ChatMessage, MessageKind};

// Server -> Client event names
pub const EVENT_ONLINE_USERS: &str = "onlineUsers";
pub const EVENT_USER_STATUS: &str = "userStatus";
pub const EVENT_NEW_MESSAGE: &str = "newMessage";
pub const EVENT_ERROR: &str = "error";

// Close codes
pub const CLOSE_AUTHENTICATION_FAILED: u16 = 4001;
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// Inbound events. Frames look like `{"event": "sendMessage", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    JoinGroups,
    SendMessage(SendMessagePayload),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessagePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
}

/// First frame carrying the bearer token when none was supplied at upgrade time.
#[derive(Debug, Clone, Deserialize)]
pub struct HandshakeFrame {
    pub token: String,
}

/// Outbound events, framed the same way as inbound ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    OnlineUsers(Vec<UserId>),
    UserStatus(UserStatusPayload),
    NewMessage(NewMessagePayload),
    Error(ErrorPayload),
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::OnlineUsers(_) => EVENT_ONLINE_USERS,
            Self::UserStatus(_) => EVENT_USER_STATUS,
            Self::NewMessage(_) => EVENT_NEW_MESSAGE,
            Self::Error(_) => EVENT_ERROR,
        }
    }

    pub fn user_status(user_id: UserId, status: PresenceStatus) -> Self {
        Self::UserStatus(UserStatusPayload { user_id, status })
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorPayload {
            message: message.into(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStatusPayload {
    pub user_id: UserId,
    pub status: PresenceStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessagePayload {
    pub message_id: String,
    pub sender_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver_id: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<GroupId>,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub created_at: DateTime<Utc>,
}

impl From<&ChatMessage> for NewMessagePayload {
    fn from(message: &ChatMessage) -> Self {
        Self {
            message_id: message.message_id.clone(),
            sender_id: message.sender_id.clone(),
            receiver_id: message.target.receiver_id().cloned(),
            group_id: message.target.group_id().cloned(),
            content: message.content.clone(),
            kind: message.target.kind(),
            created_at: message.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn join_groups_needs_no_payload() {
        let event: ClientEvent = serde_json::from_str(r#"{"event":"joinGroups"}"#).unwrap();
        assert_eq!(event, ClientEvent::JoinGroups);
    }

    #[test]
    fn send_message_reads_camel_case_fields() {
        let event: ClientEvent = serde_json::from_value(json!({
            "event": "sendMessage",
            "data": { "groupId": "g1", "content": "hi", "type": "group" }
        }))
        .unwrap();
        let ClientEvent::SendMessage(payload) = event else {
            panic!("expected sendMessage");
        };
        assert_eq!(payload.group_id.as_deref(), Some("g1"));
        assert_eq!(payload.receiver_id, None);
        assert_eq!(payload.kind, MessageKind::Group);
    }

    #[test]
    fn unknown_message_type_is_rejected() {
        let parsed = serde_json::from_value::<ClientEvent>(json!({
            "event": "sendMessage",
            "data": { "receiverId": "u2", "content": "hi", "type": "broadcast" }
        }));
        assert!(parsed.is_err());
    }

    #[test]
    fn user_status_frame_shape() {
        let frame = serde_json::to_value(ServerEvent::user_status(
            UserId::from("u1"),
            PresenceStatus::Offline,
        ))
        .unwrap();
        assert_eq!(
            frame,
            json!({ "event": "userStatus", "data": { "userId": "u1", "status": "offline" } })
        );
    }

    #[test]
    fn direct_message_frame_omits_group_id() {
        let created_at = DateTime::parse_from_rfc3339("2026-05-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let frame = serde_json::to_value(ServerEvent::NewMessage(NewMessagePayload {
            message_id: "42".into(),
            sender_id: UserId::from("a"),
            receiver_id: Some(UserId::from("b")),
            group_id: None,
            content: "hello".into(),
            kind: MessageKind::Dm,
            created_at,
        }))
        .unwrap();
        let data = &frame["data"];
        assert_eq!(frame["event"], "newMessage");
        assert_eq!(data["receiverId"], "b");
        assert_eq!(data["type"], "dm");
        assert!(data.get("groupId").is_none());
        assert_eq!(data["createdAt"], "2026-05-01T10:00:00Z");
    }
}
