use std::collections::{HashSet, VecDeque};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::domain::{ConversationId, Message, MessageId, MessageKind};
use tracing::debug;

pub const NOTIFICATION_FEED_CAP: usize = 20;
/// The seen-id cache is wiped wholesale once it reaches this size instead of
/// evicting oldest-first, which briefly reopens the dedup window for very old
/// ids. Matches the behavior observed in production; see DESIGN.md.
pub const SEEN_CACHE_CLEAR_THRESHOLD: usize = 256;

/// Ephemeral in-app notification. Never persisted; the feed is a bounded ring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationRecord {
    pub id: String,
    pub conversation_id: ConversationId,
    pub message_id: MessageId,
    pub sender_name: String,
    pub preview_text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationPermission {
    Granted,
    Denied,
    Default,
    Unsupported,
}

/// What gets handed to the platform. `tag` is the message id; platforms
/// collapse repeated notifications with the same tag, so a redelivered
/// message never raises a second OS notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformNote {
    pub tag: String,
    pub title: String,
    pub body: String,
}

pub trait PlatformNotifier: Send + Sync {
    fn permission(&self) -> NotificationPermission;
    fn is_foreground(&self) -> bool;
    fn notify(&self, note: &PlatformNote) -> Result<()>;
    fn request_permission(&self) -> NotificationPermission;
}

pub struct MissingPlatformNotifier;

impl PlatformNotifier for MissingPlatformNotifier {
    fn permission(&self) -> NotificationPermission {
        NotificationPermission::Unsupported
    }

    fn is_foreground(&self) -> bool {
        true
    }

    fn notify(&self, _note: &PlatformNote) -> Result<()> {
        Err(anyhow::anyhow!("platform notifications are unavailable"))
    }

    fn request_permission(&self) -> NotificationPermission {
        NotificationPermission::Unsupported
    }
}

/// Bounded, newest-first feed of notification records derived from incoming
/// messages.
#[derive(Debug, Default)]
pub struct NotificationFeed {
    records: VecDeque<NotificationRecord>,
    seen_message_ids: HashSet<MessageId>,
}

impl NotificationFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive a record for an incoming message. Own messages and already-seen
    /// ids produce nothing.
    pub fn on_incoming(
        &mut self,
        message: &Message,
        is_own_message: bool,
    ) -> Option<NotificationRecord> {
        if is_own_message {
            return None;
        }
        if self.seen_message_ids.len() >= SEEN_CACHE_CLEAR_THRESHOLD {
            debug!(
                entries = self.seen_message_ids.len(),
                "resetting seen-message cache"
            );
            self.seen_message_ids.clear();
        }
        if !self.seen_message_ids.insert(message.id) {
            return None;
        }

        let record = NotificationRecord {
            id: format!(
                "{}-{}",
                message.id.0,
                message.created_at.timestamp_millis()
            ),
            conversation_id: message.conversation_id,
            message_id: message.id,
            sender_name: message.sender.display_name.clone(),
            preview_text: preview_text(message),
            created_at: message.created_at,
        };

        self.records.push_front(record.clone());
        while self.records.len() > NOTIFICATION_FEED_CAP {
            self.records.pop_back();
        }
        Some(record)
    }

    /// Newest first.
    pub fn recent(&self) -> Vec<NotificationRecord> {
        self.records.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.seen_message_ids.clear();
    }
}

/// Human preview for a message: explicit text wins, then a shared-content
/// summary, then a generic fallback.
pub fn preview_text(message: &Message) -> String {
    let text = message.text.trim();
    if !text.is_empty() {
        return text.to_string();
    }
    match message.kind {
        MessageKind::PropertyShare => {
            match message.attachment.as_ref().and_then(|a| a.title.as_deref()) {
                Some(title) => format!("Shared property: {title}"),
                None => "Shared a property".to_string(),
            }
        }
        MessageKind::MediaShare => {
            let count = message
                .attachment
                .as_ref()
                .and_then(|a| a.media_count)
                .unwrap_or(1);
            if count > 1 {
                format!("Shared {count} media files")
            } else {
                "Shared a media file".to_string()
            }
        }
        MessageKind::Text => "New message".to_string(),
    }
}

#[cfg(test)]
#[path = "tests/notifications_tests.rs"]
mod tests;
