use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(pub i64);
    };
}

id_newtype!(UserId);
id_newtype!(ConversationId);
id_newtype!(MessageId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Agent,
    Client,
}

/// Immutable snapshot of a user as embedded in messages and conversations.
/// The identity service owns the live record; this is what it looked like
/// when the containing object was created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    pub id: UserId,
    pub display_name: String,
    pub role: Role,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    PropertyShare,
    MediaShare,
}

/// Identity and preview data for shared content; payload semantics live with
/// the media service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentSummary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_count: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender: UserRef,
    pub text: String,
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<AttachmentSummary>,
    pub created_at: DateTime<Utc>,
}

/// Two-party thread summary. The backend guarantees one conversation per
/// unordered pair of participants; clients only reflect what they receive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub participants: [UserRef; 2],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_preview: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    /// Server-computed unread count for the requesting user. Present only in
    /// conversation-list snapshots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unread_count: Option<i64>,
}

impl Conversation {
    /// Timestamp used for recency ordering.
    pub fn recency(&self) -> DateTime<Utc> {
        self.last_activity_at.unwrap_or(self.updated_at)
    }

    pub fn involves(&self, user_id: UserId) -> bool {
        self.participants.iter().any(|p| p.id == user_id)
    }

    pub fn peer_of(&self, user_id: UserId) -> Option<&UserRef> {
        self.participants.iter().find(|p| p.id != user_id)
    }
}
