use std::collections::HashMap;

use shared::domain::{Conversation, ConversationId, UserId};

/// Recency-ordered view of every conversation the user belongs to.
#[derive(Debug, Default)]
pub struct ConversationIndex {
    by_id: HashMap<ConversationId, Conversation>,
}

impl ConversationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace-by-id or insert, then return the full list ordered by most
    /// recent activity. Re-applying the same snapshot neither duplicates nor
    /// reorders anything.
    pub fn upsert(&mut self, conversation: Conversation) -> Vec<Conversation> {
        self.by_id.insert(conversation.id, conversation);
        self.ordered()
    }

    pub fn get(&self, id: ConversationId) -> Option<&Conversation> {
        self.by_id.get(&id)
    }

    /// The existing thread between the current user and `peer_id`, if one is
    /// already known. Sends targeting a peer reuse this instead of asking the
    /// backend for a second conversation.
    pub fn find_with_peer(&self, self_id: UserId, peer_id: UserId) -> Option<&Conversation> {
        self.by_id
            .values()
            .find(|c| c.involves(self_id) && c.involves(peer_id))
    }

    /// All conversations, most recent activity first. Threads without any
    /// activity yet sort by their update time.
    pub fn ordered(&self) -> Vec<Conversation> {
        let mut conversations: Vec<Conversation> = self.by_id.values().cloned().collect();
        conversations.sort_by(|a, b| b.recency().cmp(&a.recency()).then(b.id.cmp(&a.id)));
        conversations
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_id.clear();
    }
}

#[cfg(test)]
#[path = "tests/conversation_index_tests.rs"]
mod tests;
