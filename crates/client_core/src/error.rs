use thiserror::Error;

pub use crate::{connection::TransportError, send::SendError};

/// Failures surfaced to the embedding UI. Anything that blocks seeing or
/// sending messages lands here; best-effort side channels (read-state
/// persistence, platform notifications) degrade silently with a log line
/// instead.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Send(#[from] SendError),
    /// History could not be loaded; the conversation shows an empty state and
    /// the caller may retry by reopening it.
    #[error("failed to load history for conversation {conversation_id}: {source}")]
    HistoryLoad {
        conversation_id: i64,
        #[source]
        source: anyhow::Error,
    },
    #[error("failed to refresh {what}: {source}")]
    Refresh {
        what: &'static str,
        #[source]
        source: anyhow::Error,
    },
}
