use std::collections::HashMap;

use shared::domain::{Conversation, ConversationId};
use tracing::debug;

/// Single source of truth for per-conversation unread counts. No other
/// component mutates these; everything goes through the methods below.
#[derive(Debug, Default)]
pub struct UnreadTracker {
    counts: HashMap<ConversationId, u32>,
}

impl UnreadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full overwrite from a trusted server snapshot. Conversations without a
    /// positive count are omitted entirely.
    pub fn sync_from_snapshot(&mut self, conversations: &[Conversation]) {
        self.counts.clear();
        for conversation in conversations {
            match conversation.unread_count {
                Some(count) if count > 0 => {
                    self.counts.insert(conversation.id, count as u32);
                }
                _ => {}
            }
        }
    }

    /// Increment by exactly one, but only for a peer's message in a
    /// conversation that is not currently on screen.
    pub fn note_incoming(
        &mut self,
        conversation_id: ConversationId,
        is_own_message: bool,
        is_active_conversation: bool,
    ) -> bool {
        if is_own_message || is_active_conversation {
            return false;
        }
        *self.counts.entry(conversation_id).or_insert(0) += 1;
        true
    }

    /// Remove the local entry. Returns whether anything was cleared so callers
    /// can skip redundant event fan-out; clearing an absent entry is a no-op,
    /// never an underflow.
    pub fn mark_read(&mut self, conversation_id: ConversationId) -> bool {
        let cleared = self.counts.remove(&conversation_id).is_some();
        if !cleared {
            debug!(
                conversation_id = conversation_id.0,
                "mark_read on already-read conversation"
            );
        }
        cleared
    }

    /// Clear every entry, returning the conversations that had one so the
    /// caller can persist their read state.
    pub fn clear_all(&mut self) -> Vec<ConversationId> {
        let ids: Vec<ConversationId> = self.counts.keys().copied().collect();
        self.counts.clear();
        ids
    }

    pub fn count(&self, conversation_id: ConversationId) -> u32 {
        self.counts.get(&conversation_id).copied().unwrap_or(0)
    }

    /// Aggregate across all conversations, for the single badge.
    pub fn total(&self) -> u64 {
        self.counts.values().map(|&c| u64::from(c)).sum()
    }

    pub fn by_conversation(&self) -> HashMap<ConversationId, u32> {
        self.counts.clone()
    }
}

#[cfg(test)]
#[path = "tests/unread_tests.rs"]
mod tests;
