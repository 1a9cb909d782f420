use super::*;
use chrono::{DateTime, Utc};
use shared::domain::{Role, UserRef};

fn at(seconds: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(seconds, 0).expect("timestamp")
}

fn user(id: i64) -> UserRef {
    UserRef {
        id: UserId(id),
        display_name: format!("user-{id}"),
        role: Role::Agent,
    }
}

fn conversation(id: i64, a: i64, b: i64, activity: Option<i64>, updated: i64) -> Conversation {
    Conversation {
        id: ConversationId(id),
        participants: [user(a), user(b)],
        last_message_preview: None,
        last_activity_at: activity.map(at),
        updated_at: at(updated),
        unread_count: None,
    }
}

#[test]
fn upsert_replaces_by_id_without_duplicating() {
    let mut index = ConversationIndex::new();
    index.upsert(conversation(1, 10, 20, Some(100), 100));

    let mut updated = conversation(1, 10, 20, Some(200), 200);
    updated.last_message_preview = Some("newer".to_string());
    let ordered = index.upsert(updated);

    assert_eq!(ordered.len(), 1);
    assert_eq!(ordered[0].last_message_preview.as_deref(), Some("newer"));
}

#[test]
fn upsert_is_idempotent_for_identical_snapshots() {
    let mut index = ConversationIndex::new();
    let snapshot = conversation(1, 10, 20, Some(100), 100);

    let first = index.upsert(snapshot.clone());
    let second = index.upsert(snapshot);

    assert_eq!(first, second);
}

#[test]
fn ordering_is_most_recent_activity_first_in_any_interleaving() {
    let orderings: [[i64; 3]; 3] = [[1, 2, 3], [3, 1, 2], [2, 3, 1]];
    for order in orderings {
        let mut index = ConversationIndex::new();
        for id in order {
            // Conversation N saw activity at time N * 100.
            index.upsert(conversation(id, 10, 20 + id, Some(id * 100), id * 100));
        }
        let ids: Vec<i64> = index.ordered().iter().map(|c| c.id.0).collect();
        assert_eq!(ids, vec![3, 2, 1], "insertion order {order:?}");
    }
}

#[test]
fn ordering_falls_back_to_updated_at_without_activity() {
    let mut index = ConversationIndex::new();
    index.upsert(conversation(1, 10, 20, None, 300));
    index.upsert(conversation(2, 10, 21, Some(100), 100));

    let ids: Vec<i64> = index.ordered().iter().map(|c| c.id.0).collect();
    assert_eq!(ids, vec![1, 2]);
}

#[test]
fn find_with_peer_locates_the_shared_thread() {
    let mut index = ConversationIndex::new();
    index.upsert(conversation(1, 10, 20, Some(100), 100));
    index.upsert(conversation(2, 10, 30, Some(200), 200));

    let found = index
        .find_with_peer(UserId(10), UserId(20))
        .expect("thread with peer 20");
    assert_eq!(found.id, ConversationId(1));

    assert!(index.find_with_peer(UserId(10), UserId(99)).is_none());
}
