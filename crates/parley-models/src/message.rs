use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{GroupId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Dm,
    Group,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dm => "dm",
            Self::Group => "group",
        }
    }
}

/// Where a message is addressed. Exactly one target exists per message and
/// it always agrees with the message kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageTarget {
    Direct(UserId),
    Group(GroupId),
}

impl MessageTarget {
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Direct(_) => MessageKind::Dm,
            Self::Group(_) => MessageKind::Group,
        }
    }

    pub fn receiver_id(&self) -> Option<&UserId> {
        match self {
            Self::Direct(user_id) => Some(user_id),
            Self::Group(_) => None,
        }
    }

    pub fn group_id(&self) -> Option<&GroupId> {
        match self {
            Self::Direct(_) => None,
            Self::Group(group_id) => Some(group_id),
        }
    }
}

/// Identity and timestamp assigned by the message repository on append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendedMessage {
    pub message_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub message_id: String,
    pub sender_id: UserId,
    pub target: MessageTarget,
    pub content: String,
    pub created_at: DateTime<Utc>,
}
