use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use futures::future::join_all;
use shared::{
    domain::{Conversation, ConversationId, Message, UserId, UserRef},
    protocol::{SendResult, ServerEvent},
};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
};
use tracing::{info, warn};

pub mod api;
pub mod connection;
pub mod conversation_index;
pub mod error;
pub mod message_store;
pub mod notifications;
pub mod send;
pub mod unread;

pub use api::{MessagingApi, MissingMessagingApi, RestApi, SendMessageHttpRequest};
pub use connection::{
    EventTransport, MissingEventTransport, TransportError, TransportEvent, WsTransport,
};
pub use conversation_index::ConversationIndex;
pub use error::ClientError;
pub use message_store::MessageStore;
pub use notifications::{
    MissingPlatformNotifier, NotificationFeed, NotificationPermission, NotificationRecord,
    PlatformNote, PlatformNotifier, NOTIFICATION_FEED_CAP,
};
pub use send::{SendCoordinator, SendError, SendRequest};
pub use unread::UnreadTracker;

const MARK_READ_PERSIST_ATTEMPTS: usize = 3;
const MARK_READ_PERSIST_RETRY_DELAY: Duration = Duration::from_millis(500);
const HISTORY_PAGE_SIZE: u32 = 100;
const CLIENT_EVENT_CAPACITY: usize = 1024;

/// State fan-out to the embedding UI.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    ConnectivityChanged(bool),
    ConversationsUpdated(Vec<Conversation>),
    MessagesUpdated {
        conversation_id: ConversationId,
        messages: Vec<Message>,
    },
    UnreadChanged {
        total: u64,
        by_conversation: HashMap<ConversationId, u32>,
    },
    NotificationPosted(NotificationRecord),
    Error(String),
}

struct ClientInner {
    conversations: ConversationIndex,
    messages: MessageStore,
    unread: UnreadTracker,
    notifications: NotificationFeed,
    active_conversation: Option<ConversationId>,
    history_generation: u64,
}

impl ClientInner {
    fn new() -> Self {
        Self {
            conversations: ConversationIndex::new(),
            messages: MessageStore::new(),
            unread: UnreadTracker::new(),
            notifications: NotificationFeed::new(),
            active_conversation: None,
            history_generation: 0,
        }
    }

    fn reset(&mut self) {
        self.conversations.clear();
        self.messages.clear();
        self.unread.clear_all();
        self.notifications.clear();
        self.active_conversation = None;
        self.history_generation += 1;
    }

    fn unread_snapshot(&self) -> (u64, HashMap<ConversationId, u32>) {
        (self.unread.total(), self.unread.by_conversation())
    }
}

/// Session-scoped messaging controller.
///
/// All mutation funnels through one event pump and the same idempotent
/// merge/upsert primitives, so the two delivery paths for a message (send
/// acknowledgement and broadcast) can race freely without double-applying.
/// Collaborators are injected at construction; nothing reads ambient state.
pub struct MessagingClient {
    current_user: UserRef,
    api: Arc<dyn MessagingApi>,
    transport: Arc<dyn EventTransport>,
    notifier: Arc<dyn PlatformNotifier>,
    coordinator: SendCoordinator,
    connected: AtomicBool,
    inner: Mutex<ClientInner>,
    events: broadcast::Sender<ClientEvent>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl MessagingClient {
    pub fn new(current_user: UserRef) -> Arc<Self> {
        Self::new_with_dependencies(
            current_user,
            Arc::new(MissingMessagingApi),
            Arc::new(MissingEventTransport::new()),
            Arc::new(MissingPlatformNotifier),
        )
    }

    pub fn new_with_dependencies(
        current_user: UserRef,
        api: Arc<dyn MessagingApi>,
        transport: Arc<dyn EventTransport>,
        notifier: Arc<dyn PlatformNotifier>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(CLIENT_EVENT_CAPACITY);
        let coordinator =
            SendCoordinator::new(current_user.id, Arc::clone(&transport), Arc::clone(&api));
        Arc::new(Self {
            current_user,
            api,
            transport,
            notifier,
            coordinator,
            connected: AtomicBool::new(false),
            inner: Mutex::new(ClientInner::new()),
            events,
            pump: Mutex::new(None),
        })
    }

    pub fn current_user(&self) -> &UserRef {
        &self.current_user
    }

    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Open the persistent channel and start the event pump. Connectivity
    /// failures after this point only flip `connected()`; the transport
    /// retries on its own.
    pub async fn connect(self: &Arc<Self>, auth_token: &str) -> anyhow::Result<()> {
        {
            let mut pump = self.pump.lock().await;
            if pump.is_some() {
                return Ok(());
            }
            let mut rx = self.transport.subscribe();
            let client = Arc::clone(self);
            *pump = Some(tokio::spawn(async move {
                loop {
                    match rx.recv().await {
                        Ok(event) => client.dispatch(event).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "event pump lagged behind the transport");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }));
        }
        self.transport.open(auth_token).await
    }

    /// Session teardown: stop the pump, close the transport, and drop all
    /// conversation-scoped state so nothing leaks into the next session.
    pub async fn disconnect(&self) {
        if let Some(pump) = self.pump.lock().await.take() {
            pump.abort();
        }
        self.transport.close().await;
        self.connected.store(false, Ordering::SeqCst);
        self.inner.lock().await.reset();
        let _ = self.events.send(ClientEvent::ConnectivityChanged(false));
    }

    /// Single inbound stream consumed here; every mutation below goes through
    /// the idempotent primitives.
    async fn dispatch(&self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => self.set_connected(true),
            TransportEvent::Disconnected | TransportEvent::ConnectError => {
                self.set_connected(false)
            }
            TransportEvent::Server(event) => self.apply_server_event(event).await,
        }
    }

    fn set_connected(&self, connected: bool) {
        if self.connected.swap(connected, Ordering::SeqCst) != connected {
            let _ = self.events.send(ClientEvent::ConnectivityChanged(connected));
        }
    }

    async fn apply_server_event(&self, event: ServerEvent) {
        match event {
            ServerEvent::MessageNew {
                conversation,
                message,
            } => {
                self.apply_message(conversation, message).await;
            }
            ServerEvent::ConversationRead {
                conversation_id,
                user_id,
            } => {
                if user_id != self.current_user.id {
                    return;
                }
                // Another session of this user read the thread. Converge to
                // the same state as a local mark-read, minus the persistence
                // that session already did.
                let snapshot = {
                    let mut inner = self.inner.lock().await;
                    inner
                        .unread
                        .mark_read(conversation_id)
                        .then(|| inner.unread_snapshot())
                };
                if let Some((total, by_conversation)) = snapshot {
                    let _ = self.events.send(ClientEvent::UnreadChanged {
                        total,
                        by_conversation,
                    });
                }
            }
            ServerEvent::Error(err) => {
                let _ = self.events.send(ClientEvent::Error(err.message));
            }
        }
    }

    /// The one application routine for a `{conversation, message}` pair,
    /// whichever path delivered it. A racing duplicate from the other path
    /// merges to a no-op because the message id is identical.
    async fn apply_message(&self, conversation: Conversation, message: Message) {
        let is_own = message.sender.id == self.current_user.id;
        let conversation_id = message.conversation_id;

        let (ordered, merged, unread_snapshot, record) = {
            let mut inner = self.inner.lock().await;
            let ordered = inner.conversations.upsert(conversation);
            let is_active = inner.active_conversation == Some(conversation_id);
            let merged =
                is_active.then(|| inner.messages.merge(conversation_id, [message.clone()]));
            let unread_snapshot = inner
                .unread
                .note_incoming(conversation_id, is_own, is_active)
                .then(|| inner.unread_snapshot());
            let record = inner.notifications.on_incoming(&message, is_own);
            (ordered, merged, unread_snapshot, record)
        };

        let _ = self.events.send(ClientEvent::ConversationsUpdated(ordered));
        if let Some(messages) = merged {
            let _ = self.events.send(ClientEvent::MessagesUpdated {
                conversation_id,
                messages,
            });
        }
        if let Some((total, by_conversation)) = unread_snapshot {
            let _ = self.events.send(ClientEvent::UnreadChanged {
                total,
                by_conversation,
            });
        }
        if let Some(record) = record {
            let _ = self
                .events
                .send(ClientEvent::NotificationPosted(record.clone()));
            self.maybe_notify_platform(&record);
        }
    }

    fn maybe_notify_platform(&self, record: &NotificationRecord) {
        if self.notifier.permission() != NotificationPermission::Granted {
            return;
        }
        if self.notifier.is_foreground() {
            return;
        }
        let note = PlatformNote {
            tag: record.message_id.0.to_string(),
            title: record.sender_name.clone(),
            body: record.preview_text.clone(),
        };
        if let Err(err) = self.notifier.notify(&note) {
            // Best-effort enhancement; never blocks message delivery.
            warn!(
                message_id = record.message_id.0,
                "platform notification failed: {err}"
            );
        }
    }

    pub fn request_platform_permission(&self) -> NotificationPermission {
        self.notifier.request_permission()
    }

    pub async fn refresh_contacts(&self) -> Result<Vec<UserRef>, ClientError> {
        self.api
            .fetch_contacts()
            .await
            .map_err(|source| ClientError::Refresh {
                what: "contacts",
                source,
            })
    }

    /// Reload the conversation list and rebuild unread counts from the
    /// server snapshot.
    pub async fn refresh_conversations(&self) -> Result<Vec<Conversation>, ClientError> {
        let conversations =
            self.api
                .fetch_conversations()
                .await
                .map_err(|source| ClientError::Refresh {
                    what: "conversations",
                    source,
                })?;

        let (ordered, total, by_conversation) = {
            let mut inner = self.inner.lock().await;
            inner.unread.sync_from_snapshot(&conversations);
            // The open conversation stays read even when the snapshot lags a
            // not-yet-persisted local mark-read.
            if let Some(active) = inner.active_conversation {
                inner.unread.mark_read(active);
            }
            for conversation in conversations {
                inner.conversations.upsert(conversation);
            }
            let ordered = inner.conversations.ordered();
            let (total, by_conversation) = inner.unread_snapshot();
            (ordered, total, by_conversation)
        };

        let _ = self
            .events
            .send(ClientEvent::ConversationsUpdated(ordered.clone()));
        let _ = self.events.send(ClientEvent::UnreadChanged {
            total,
            by_conversation,
        });
        Ok(ordered)
    }

    /// Switch the open conversation. Clears the per-conversation store, loads
    /// fresh history, and discards a response that lands after the user has
    /// already moved on.
    pub async fn set_active_conversation(
        &self,
        conversation_id: Option<ConversationId>,
    ) -> Result<Vec<Message>, ClientError> {
        let generation = {
            let mut inner = self.inner.lock().await;
            inner.active_conversation = conversation_id;
            inner.messages.clear();
            inner.history_generation += 1;
            inner.history_generation
        };

        let Some(conversation_id) = conversation_id else {
            return Ok(Vec::new());
        };

        self.mark_conversation_read(conversation_id).await;

        let history = self.api.fetch_messages(conversation_id, HISTORY_PAGE_SIZE).await;

        let mut inner = self.inner.lock().await;
        if inner.history_generation != generation
            || inner.active_conversation != Some(conversation_id)
        {
            info!(
                conversation_id = conversation_id.0,
                "discarding stale history load"
            );
            return Ok(Vec::new());
        }

        match history {
            Ok(messages) => {
                let merged = inner.messages.merge(conversation_id, messages);
                drop(inner);
                let _ = self.events.send(ClientEvent::MessagesUpdated {
                    conversation_id,
                    messages: merged.clone(),
                });
                Ok(merged)
            }
            Err(source) => {
                drop(inner);
                let err = ClientError::HistoryLoad {
                    conversation_id: conversation_id.0,
                    source,
                };
                let _ = self.events.send(ClientEvent::Error(err.to_string()));
                Err(err)
            }
        }
    }

    pub async fn active_conversation(&self) -> Option<ConversationId> {
        self.inner.lock().await.active_conversation
    }

    /// Build a send for `peer_id`, reusing the existing thread when the index
    /// already knows one.
    pub async fn compose_to_peer(&self, peer_id: UserId, text: impl Into<String>) -> SendRequest {
        let inner = self.inner.lock().await;
        match inner
            .conversations
            .find_with_peer(self.current_user.id, peer_id)
        {
            Some(conversation) => SendRequest::to_conversation(conversation.id, text),
            None => SendRequest::to_recipient(peer_id, text),
        }
    }

    /// Send a message and apply the result through the same path broadcast
    /// deliveries take. On failure the error carries the draft text.
    pub async fn send_message(&self, request: SendRequest) -> Result<SendResult, ClientError> {
        let result = self.coordinator.send(request).await?;
        self.apply_message(result.conversation.clone(), result.message.clone())
            .await;
        Ok(result)
    }

    /// Two-phase read marker: commit locally first, then tell the backend
    /// with a bounded retry in the background. Local state stays cleared even
    /// when every attempt fails; the next snapshot sync re-converges.
    pub async fn mark_conversation_read(&self, conversation_id: ConversationId) {
        let snapshot = {
            let mut inner = self.inner.lock().await;
            inner
                .unread
                .mark_read(conversation_id)
                .then(|| inner.unread_snapshot())
        };
        if let Some((total, by_conversation)) = snapshot {
            let _ = self.events.send(ClientEvent::UnreadChanged {
                total,
                by_conversation,
            });
        }

        let api = Arc::clone(&self.api);
        tokio::spawn(async move {
            persist_mark_read_with_retry(api, conversation_id).await;
        });
    }

    /// Clear every unread entry, then persist each conversation's read state
    /// concurrently. Individual persistence failures are swallowed.
    pub async fn mark_all_read(&self) {
        let (cleared, total, by_conversation) = {
            let mut inner = self.inner.lock().await;
            let cleared = inner.unread.clear_all();
            let (total, by_conversation) = inner.unread_snapshot();
            (cleared, total, by_conversation)
        };
        if cleared.is_empty() {
            return;
        }
        let _ = self.events.send(ClientEvent::UnreadChanged {
            total,
            by_conversation,
        });

        let api = Arc::clone(&self.api);
        tokio::spawn(async move {
            let results = join_all(cleared.into_iter().map(|conversation_id| {
                let api = Arc::clone(&api);
                async move { (conversation_id, api.persist_mark_read(conversation_id).await) }
            }))
            .await;
            for (conversation_id, result) in results {
                if let Err(err) = result {
                    warn!(
                        conversation_id = conversation_id.0,
                        "read-state persistence failed: {err}"
                    );
                }
            }
        });
    }

    pub async fn total_unread(&self) -> u64 {
        self.inner.lock().await.unread.total()
    }

    pub async fn unread_by_conversation(&self) -> HashMap<ConversationId, u32> {
        self.inner.lock().await.unread.by_conversation()
    }

    pub async fn recent_notifications(&self) -> Vec<NotificationRecord> {
        self.inner.lock().await.notifications.recent()
    }

    pub async fn conversations(&self) -> Vec<Conversation> {
        self.inner.lock().await.conversations.ordered()
    }

    /// Messages of the open conversation, oldest first.
    pub async fn messages(&self) -> Vec<Message> {
        self.inner.lock().await.messages.ordered()
    }
}

async fn persist_mark_read_with_retry(api: Arc<dyn MessagingApi>, conversation_id: ConversationId) {
    for attempt in 1..=MARK_READ_PERSIST_ATTEMPTS {
        match api.persist_mark_read(conversation_id).await {
            Ok(()) => return,
            Err(err) => {
                if attempt == MARK_READ_PERSIST_ATTEMPTS {
                    // Local state is already cleared; accept the drift until
                    // the next snapshot sync instead of rolling back.
                    warn!(
                        conversation_id = conversation_id.0,
                        attempts = attempt,
                        "read-state persistence failed: {err}"
                    );
                } else {
                    tokio::time::sleep(MARK_READ_PERSIST_RETRY_DELAY).await;
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
