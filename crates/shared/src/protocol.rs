use serde::{Deserialize, Serialize};

use crate::{
    domain::{Conversation, ConversationId, Message, UserId},
    error::ApiError,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientRequest {
    /// Append a message to an existing conversation, or start one with
    /// `recipient_id` when no thread exists yet. Exactly one of the two
    /// targets is expected.
    SendMessage {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        conversation_id: Option<ConversationId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        recipient_id: Option<UserId>,
        text: String,
    },
}

/// Acknowledgement payload for a send over the persistent channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendAck {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation: Option<Conversation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SendAck {
    /// A successful acknowledgement must carry both halves of the result;
    /// anything else is treated as a rejection by the caller.
    pub fn into_result(self) -> Option<SendResult> {
        match (self.ok, self.conversation, self.message) {
            (true, Some(conversation), Some(message)) => Some(SendResult {
                conversation,
                message,
            }),
            _ => None,
        }
    }
}

/// The one result shape both delivery paths normalize to. Downstream code
/// never learns whether the acknowledgement or the request/response channel
/// produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendResult {
    pub conversation: Conversation,
    pub message: Message,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A message was appended to one of the user's conversations, by either
    /// party, from any session.
    MessageNew {
        conversation: Conversation,
        message: Message,
    },
    /// Some session of `user_id` marked the conversation read.
    ConversationRead {
        conversation_id: ConversationId,
        user_id: UserId,
    },
    Error(ApiError),
}

/// Envelope for requests over the persistent channel. The server echoes
/// `request_id` in the matching acknowledgement frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientFrame {
    pub request_id: u64,
    pub request: ClientRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerFrame {
    Ack { request_id: u64, ack: SendAck },
    Event { event: ServerEvent },
}
