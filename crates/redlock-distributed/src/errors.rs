use thiserror::Error;

pub type Result<T> = std::result::Result<T, ServerError>;

/// Outcome of a single server call that did not produce a usable reply.
/// Every variant is counted as a failure vote by the coordinator.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("transport error: {0}")]
    Transport(#[source] redis::RedisError),
    #[error("server not connected: {0}")]
    NotConnected(String),
    #[error("lock is held by another owner")]
    Conflict,
    #[error("lock not found")]
    NotFound,
    #[error("unexpected reply: {0}")]
    UnexpectedReply(String),
    #[error("call deadline exceeded")]
    Timeout,
    #[error("call cancelled")]
    Cancelled,
}

impl ServerError {
    /// Maps the error codes the lock scripts reply with.
    pub fn from_reply_code(code: &str) -> Option<Self> {
        match code {
            "CONFLICT" => Some(Self::Conflict),
            "NOTFOUND" => Some(Self::NotFound),
            _ => None,
        }
    }
}

impl From<redis::RedisError> for ServerError {
    fn from(err: redis::RedisError) -> Self {
        match err.code().and_then(Self::from_reply_code) {
            Some(mapped) => mapped,
            None => Self::Transport(err),
        }
    }
}
