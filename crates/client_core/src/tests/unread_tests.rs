use super::*;
use chrono::{DateTime, Utc};
use shared::domain::{Role, UserId, UserRef};

fn at(seconds: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(seconds, 0).expect("timestamp")
}

fn user(id: i64) -> UserRef {
    UserRef {
        id: UserId(id),
        display_name: format!("user-{id}"),
        role: Role::Client,
    }
}

fn snapshot_conversation(id: i64, unread: Option<i64>) -> Conversation {
    Conversation {
        id: ConversationId(id),
        participants: [user(1), user(2)],
        last_message_preview: None,
        last_activity_at: None,
        updated_at: at(100),
        unread_count: unread,
    }
}

#[test]
fn increments_by_exactly_one_per_qualifying_message() {
    let mut tracker = UnreadTracker::new();

    for _ in 0..3 {
        assert!(tracker.note_incoming(ConversationId(7), false, false));
    }

    assert_eq!(tracker.count(ConversationId(7)), 3);
    assert_eq!(tracker.total(), 3);
}

#[test]
fn own_messages_never_increment() {
    let mut tracker = UnreadTracker::new();

    assert!(!tracker.note_incoming(ConversationId(7), true, false));

    assert_eq!(tracker.count(ConversationId(7)), 0);
}

#[test]
fn active_conversation_suppresses_increment() {
    let mut tracker = UnreadTracker::new();

    assert!(!tracker.note_incoming(ConversationId(7), false, true));

    assert_eq!(tracker.count(ConversationId(7)), 0);
    assert_eq!(tracker.total(), 0);
}

#[test]
fn snapshot_sync_overwrites_and_omits_nonpositive_counts() {
    let mut tracker = UnreadTracker::new();
    tracker.note_incoming(ConversationId(1), false, false);

    tracker.sync_from_snapshot(&[
        snapshot_conversation(2, Some(4)),
        snapshot_conversation(3, Some(0)),
        snapshot_conversation(4, Some(-2)),
        snapshot_conversation(5, None),
    ]);

    assert_eq!(tracker.count(ConversationId(1)), 0);
    assert_eq!(tracker.count(ConversationId(2)), 4);
    assert_eq!(tracker.count(ConversationId(3)), 0);
    assert_eq!(tracker.count(ConversationId(4)), 0);
    assert_eq!(tracker.total(), 4);
}

#[test]
fn mark_read_clears_and_repeated_calls_are_noops() {
    let mut tracker = UnreadTracker::new();
    tracker.note_incoming(ConversationId(7), false, false);

    assert!(tracker.mark_read(ConversationId(7)));
    assert_eq!(tracker.count(ConversationId(7)), 0);

    // A read event for the same thread from another session must not
    // underflow or error.
    assert!(!tracker.mark_read(ConversationId(7)));
    assert_eq!(tracker.count(ConversationId(7)), 0);
    assert_eq!(tracker.total(), 0);
}

#[test]
fn clear_all_returns_every_tracked_conversation() {
    let mut tracker = UnreadTracker::new();
    tracker.note_incoming(ConversationId(1), false, false);
    tracker.note_incoming(ConversationId(2), false, false);
    tracker.note_incoming(ConversationId(2), false, false);

    let mut cleared = tracker.clear_all();
    cleared.sort();

    assert_eq!(cleared, vec![ConversationId(1), ConversationId(2)]);
    assert_eq!(tracker.total(), 0);
    assert!(tracker.by_conversation().is_empty());
}
