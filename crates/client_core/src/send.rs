use std::sync::Arc;

use shared::{
    domain::{ConversationId, UserId},
    protocol::{ClientRequest, SendResult},
};
use thiserror::Error;
use tracing::{error, warn};

use crate::{
    api::{MessagingApi, SendMessageHttpRequest},
    connection::EventTransport,
};

/// A locally-initiated send. Exactly one of `conversation_id` (existing
/// thread) or `recipient_id` (first message to a peer) identifies the target.
#[derive(Debug, Clone)]
pub struct SendRequest {
    pub conversation_id: Option<ConversationId>,
    pub recipient_id: Option<UserId>,
    pub text: String,
}

impl SendRequest {
    pub fn to_conversation(conversation_id: ConversationId, text: impl Into<String>) -> Self {
        Self {
            conversation_id: Some(conversation_id),
            recipient_id: None,
            text: text.into(),
        }
    }

    pub fn to_recipient(recipient_id: UserId, text: impl Into<String>) -> Self {
        Self {
            conversation_id: None,
            recipient_id: Some(recipient_id),
            text: text.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error("message target missing: provide a conversation or a recipient")]
    MissingTarget,
    #[error("message text must not be empty")]
    EmptyText,
    /// Both delivery paths failed. `draft` carries the un-sent text so the
    /// caller can restore it to the input instead of losing it.
    #[error("message could not be delivered: {reason}")]
    Failed { draft: String, reason: String },
}

/// Runs a send over the persistent channel when it is up, falling back to the
/// request/response channel on rejection, timeout, or unavailability. Both
/// paths produce the same [`SendResult`], so callers never branch on which
/// one delivered.
pub struct SendCoordinator {
    sender_id: UserId,
    transport: Arc<dyn EventTransport>,
    api: Arc<dyn MessagingApi>,
}

impl SendCoordinator {
    pub fn new(
        sender_id: UserId,
        transport: Arc<dyn EventTransport>,
        api: Arc<dyn MessagingApi>,
    ) -> Self {
        Self {
            sender_id,
            transport,
            api,
        }
    }

    pub async fn send(&self, request: SendRequest) -> Result<SendResult, SendError> {
        if request.text.trim().is_empty() {
            return Err(SendError::EmptyText);
        }
        if request.conversation_id.is_none() && request.recipient_id.is_none() {
            return Err(SendError::MissingTarget);
        }

        let mut realtime_failure: Option<String> = None;
        if self.transport.is_connected() {
            let wire = ClientRequest::SendMessage {
                conversation_id: request.conversation_id,
                recipient_id: request.recipient_id,
                text: request.text.clone(),
            };
            match self.transport.send_with_ack(wire).await {
                Ok(ack) => {
                    let rejection = ack.error.clone();
                    match ack.into_result() {
                        Some(result) => return Ok(result),
                        None => {
                            let reason = rejection
                                .unwrap_or_else(|| "acknowledgement missing payload".to_string());
                            warn!("realtime send rejected, falling back to http: {reason}");
                            realtime_failure = Some(reason);
                        }
                    }
                }
                Err(err) => {
                    warn!("realtime send failed, falling back to http: {err}");
                    realtime_failure = Some(err.to_string());
                }
            }
        }

        let fallback = SendMessageHttpRequest {
            user_id: self.sender_id.0,
            conversation_id: request.conversation_id,
            recipient_id: request.recipient_id,
            text: request.text.clone(),
        };
        match self.api.send_message(fallback).await {
            Ok(result) => Ok(result),
            Err(err) => {
                let reason = match realtime_failure {
                    Some(realtime) => format!("realtime: {realtime}; http: {err}"),
                    None => err.to_string(),
                };
                error!("both delivery paths failed: {reason}");
                Err(SendError::Failed {
                    draft: request.text,
                    reason,
                })
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/send_tests.rs"]
mod tests;
