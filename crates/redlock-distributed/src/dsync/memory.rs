use std::{
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::time::Instant;

use crate::errors::{Result, ServerError};

use super::locker::{LockServer, ReleaseReply};

#[derive(Debug, Clone)]
struct Record {
    token: String,
    expires_at: Instant,
}

/// In-process lock server with the same check-and-act semantics as the
/// scripted key-value server. Each operation holds the map lock for its
/// whole read-then-write step.
#[derive(Debug)]
pub struct MemoryServer {
    name: String,
    records: Mutex<HashMap<String, Record>>,
    online: AtomicBool,
}

impl MemoryServer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            records: Mutex::new(HashMap::new()),
            online: AtomicBool::new(true),
        }
    }

    /// Simulates the server dropping off the network.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Current holder of `key`, ignoring expired records.
    pub fn holder(&self, key: &str) -> Option<String> {
        self.with_records(|records| records.get(key).map(|record| record.token.clone()))
    }

    fn check_online(&self) -> Result<()> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ServerError::NotConnected(self.name.clone()))
        }
    }

    fn with_records<T>(&self, f: impl FnOnce(&mut HashMap<String, Record>) -> T) -> T {
        let mut records = match self.records.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let now = Instant::now();
        records.retain(|_, record| record.expires_at > now);
        f(&mut *records)
    }
}

fn owned_by(records: &HashMap<String, Record>, key: &str, token: &str) -> Option<bool> {
    records.get(key).map(|record| record.token == token)
}

#[async_trait]
impl LockServer for MemoryServer {
    fn endpoint(&self) -> &str {
        &self.name
    }

    async fn acquire(&self, key: &str, token: &str, expiry_millis: u64) -> Result<()> {
        self.check_online()?;
        self.with_records(|records| match owned_by(records, key, token) {
            Some(false) => Err(ServerError::Conflict),
            _ => {
                records.insert(
                    key.to_string(),
                    Record {
                        token: token.to_string(),
                        expires_at: Instant::now() + Duration::from_millis(expiry_millis),
                    },
                );
                Ok(())
            }
        })
    }

    async fn release(&self, key: &str, token: &str) -> Result<ReleaseReply> {
        self.check_online()?;
        self.with_records(|records| match owned_by(records, key, token) {
            None => Ok(ReleaseReply::AlreadyReleased),
            Some(true) => {
                records.remove(key);
                Ok(ReleaseReply::Deleted)
            }
            Some(false) => Err(ServerError::Conflict),
        })
    }

    async fn inspect_ttl(&self, key: &str, token: &str) -> Result<i64> {
        self.check_online()?;
        self.with_records(|records| match records.get(key) {
            None => Err(ServerError::NotFound),
            Some(record) if record.token == token => {
                let remaining = record.expires_at.saturating_duration_since(Instant::now());
                Ok(remaining.as_secs() as i64)
            }
            Some(_) => Err(ServerError::Conflict),
        })
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.check_online()?;
        Ok(self.with_records(|records| records.contains_key(key)))
    }
}
