use async_trait::async_trait;

use crate::errors::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseReply {
    Deleted,
    AlreadyReleased,
}

/// One lock server. Implementations run each lock operation as a single
/// atomic step on the server; ownership mismatches come back as
/// `ServerError::Conflict`.
#[async_trait]
pub trait LockServer: Send + Sync {
    /// Human readable address used in logs.
    fn endpoint(&self) -> &str;

    /// Sets `key = token` with the given expiry if the key is free or
    /// already held by `token`. Refreshes the expiry in the latter case.
    async fn acquire(&self, key: &str, token: &str, expiry_millis: u64) -> Result<()>;

    async fn release(&self, key: &str, token: &str) -> Result<ReleaseReply>;

    /// Remaining lifetime in whole seconds of a record owned by `token`.
    async fn inspect_ttl(&self, key: &str, token: &str) -> Result<i64>;

    /// Plain existence check, owner agnostic.
    async fn exists(&self, key: &str) -> Result<bool>;
}
