use std::collections::HashMap;

use shared::domain::{ConversationId, Message, MessageId};
use tracing::debug;

/// Id-keyed message set for the conversation currently on screen.
///
/// Both delivery paths for a locally-sent message (acknowledgement and
/// broadcast) land here, as do history loads racing live events, so the merge
/// must tolerate seeing the same message any number of times.
#[derive(Debug, Default)]
pub struct MessageStore {
    conversation_id: Option<ConversationId>,
    by_id: HashMap<MessageId, Message>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn conversation_id(&self) -> Option<ConversationId> {
        self.conversation_id
    }

    /// Replace-or-insert every message by id, then return the projection
    /// sorted ascending by creation time. Re-applying an overlapping batch
    /// yields the same sequence.
    pub fn merge(
        &mut self,
        conversation_id: ConversationId,
        messages: impl IntoIterator<Item = Message>,
    ) -> Vec<Message> {
        if self.conversation_id != Some(conversation_id) {
            self.by_id.clear();
            self.conversation_id = Some(conversation_id);
        }
        for message in messages {
            if message.conversation_id != conversation_id {
                debug!(
                    message_id = message.id.0,
                    expected = conversation_id.0,
                    actual = message.conversation_id.0,
                    "dropping message addressed to another conversation"
                );
                continue;
            }
            self.by_id.insert(message.id, message);
        }
        self.ordered()
    }

    /// Messages sorted ascending by `created_at`, id as tiebreak so equal
    /// timestamps still project deterministically.
    pub fn ordered(&self) -> Vec<Message> {
        let mut messages: Vec<Message> = self.by_id.values().cloned().collect();
        messages.sort_by_key(|m| (m.created_at, m.id));
        messages
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn clear(&mut self) {
        self.conversation_id = None;
        self.by_id.clear();
    }
}

#[cfg(test)]
#[path = "tests/message_store_tests.rs"]
mod tests;
