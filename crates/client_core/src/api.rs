use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use shared::{
    domain::{Conversation, ConversationId, Message, UserId, UserRef},
    protocol::SendResult,
};

/// Body of the atomic create-or-reuse-and-append fallback call. The backend
/// resolves `recipient_id` to the existing thread for the pair, or creates
/// one, before appending the message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageHttpRequest {
    pub user_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<UserId>,
    pub text: String,
}

/// Request/response collaborator boundary: history fetches, read-state
/// persistence, and the send fallback.
#[async_trait]
pub trait MessagingApi: Send + Sync {
    async fn fetch_contacts(&self) -> Result<Vec<UserRef>>;
    async fn fetch_conversations(&self) -> Result<Vec<Conversation>>;
    async fn fetch_messages(
        &self,
        conversation_id: ConversationId,
        limit: u32,
    ) -> Result<Vec<Message>>;
    async fn persist_mark_read(&self, conversation_id: ConversationId) -> Result<()>;
    async fn send_message(&self, request: SendMessageHttpRequest) -> Result<SendResult>;
}

pub struct MissingMessagingApi;

#[async_trait]
impl MessagingApi for MissingMessagingApi {
    async fn fetch_contacts(&self) -> Result<Vec<UserRef>> {
        Err(anyhow!("messaging api is unavailable"))
    }

    async fn fetch_conversations(&self) -> Result<Vec<Conversation>> {
        Err(anyhow!("messaging api is unavailable"))
    }

    async fn fetch_messages(
        &self,
        conversation_id: ConversationId,
        _limit: u32,
    ) -> Result<Vec<Message>> {
        Err(anyhow!(
            "messaging api is unavailable for conversation {}",
            conversation_id.0
        ))
    }

    async fn persist_mark_read(&self, conversation_id: ConversationId) -> Result<()> {
        Err(anyhow!(
            "messaging api is unavailable for conversation {}",
            conversation_id.0
        ))
    }

    async fn send_message(&self, _request: SendMessageHttpRequest) -> Result<SendResult> {
        Err(anyhow!("messaging api is unavailable"))
    }
}

/// HTTP implementation against the messaging backend.
pub struct RestApi {
    http: Client,
    server_url: String,
    user_id: UserId,
}

impl RestApi {
    pub fn new(server_url: impl Into<String>, user_id: UserId) -> Self {
        Self {
            http: Client::new(),
            server_url: server_url.into(),
            user_id,
        }
    }
}

#[async_trait]
impl MessagingApi for RestApi {
    async fn fetch_contacts(&self) -> Result<Vec<UserRef>> {
        let contacts = self
            .http
            .get(format!("{}/contacts", self.server_url))
            .query(&[("user_id", self.user_id.0)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(contacts)
    }

    async fn fetch_conversations(&self) -> Result<Vec<Conversation>> {
        let conversations = self
            .http
            .get(format!("{}/conversations", self.server_url))
            .query(&[("user_id", self.user_id.0)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(conversations)
    }

    async fn fetch_messages(
        &self,
        conversation_id: ConversationId,
        limit: u32,
    ) -> Result<Vec<Message>> {
        let limit = limit.clamp(1, 200);
        let messages = self
            .http
            .get(format!(
                "{}/conversations/{}/messages",
                self.server_url, conversation_id.0
            ))
            .query(&[("user_id", self.user_id.0), ("limit", i64::from(limit))])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(messages)
    }

    async fn persist_mark_read(&self, conversation_id: ConversationId) -> Result<()> {
        self.http
            .post(format!(
                "{}/conversations/{}/read",
                self.server_url, conversation_id.0
            ))
            .query(&[("user_id", self.user_id.0)])
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn send_message(&self, request: SendMessageHttpRequest) -> Result<SendResult> {
        let result = self
            .http
            .post(format!("{}/messages", self.server_url))
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(result)
    }
}
