use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use redis::{Client, ErrorKind, Value, aio::MultiplexedConnection};
use redlock_common::error::{RedlockError, Result as RedlockResult};
use tokio::{sync::Mutex, task::JoinSet, time::timeout};
use tracing::{debug, info, warn};

use crate::{
    errors::{Result, ServerError},
    types::{ServerDescriptor, ServerSetConfig},
};

use super::{
    client::Redlock,
    locker::{LockServer, ReleaseReply},
    scripts,
};

/// Bound on the first connection attempt made while building a coordinator.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
    Acquire,
    Release,
    InspectTtl,
}

impl ScriptKind {
    pub const ALL: [ScriptKind; 3] = [Self::Acquire, Self::Release, Self::InspectTtl];

    pub fn body(self) -> &'static str {
        match self {
            Self::Acquire => scripts::ACQUIRE,
            Self::Release => scripts::RELEASE,
            Self::InspectTtl => scripts::INSPECT_TTL,
        }
    }
}

/// SHA1 handles the server returned when the lock scripts were loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptHandles {
    acquire: String,
    release: String,
    inspect_ttl: String,
}

impl ScriptHandles {
    /// Builds the handles from `SCRIPT LOAD` replies given in
    /// `ScriptKind::ALL` order.
    pub fn from_replies([acquire, release, inspect_ttl]: [String; 3]) -> Result<Self> {
        Ok(Self {
            acquire: checked_sha(acquire)?,
            release: checked_sha(release)?,
            inspect_ttl: checked_sha(inspect_ttl)?,
        })
    }

    pub fn sha(&self, kind: ScriptKind) -> &str {
        match kind {
            ScriptKind::Acquire => &self.acquire,
            ScriptKind::Release => &self.release,
            ScriptKind::InspectTtl => &self.inspect_ttl,
        }
    }
}

fn checked_sha(sha: String) -> Result<String> {
    if sha.len() == 40 && sha.bytes().all(|byte| byte.is_ascii_hexdigit()) {
        Ok(sha)
    } else {
        Err(ServerError::UnexpectedReply(format!("script handle {sha:?}")))
    }
}

#[derive(Clone)]
struct Session {
    conn: MultiplexedConnection,
    handles: ScriptHandles,
}

/// A key-value lock server reached over one multiplexed connection.
///
/// Scripts are registered when the connection is established and invoked
/// through the handles the server returned. A server that cannot be
/// reached is kept; each call tries to connect again and otherwise reports
/// a transport failure.
pub struct RedisServer {
    endpoint: String,
    client: Client,
    session: Mutex<Option<Session>>,
}

impl RedisServer {
    pub async fn connect(descriptor: &ServerDescriptor) -> RedlockResult<Self> {
        let endpoint = descriptor.endpoint();
        let client = Client::open(descriptor.url().as_str()).map_err(|err| RedlockError::Connect {
            endpoint: endpoint.clone(),
            message: err.to_string(),
        })?;

        let server = Self {
            endpoint,
            client,
            session: Mutex::new(None),
        };

        match timeout(CONNECT_TIMEOUT, server.session()).await {
            Ok(Ok(_)) => info!(server = %server.endpoint, "lock server connected"),
            Ok(Err(err)) => warn!(
                server = %server.endpoint,
                error = %err,
                "lock server unreachable; calls will count as failure votes"
            ),
            Err(_) => warn!(
                server = %server.endpoint,
                timeout_ms = CONNECT_TIMEOUT.as_millis() as u64,
                "lock server connect timed out; calls will count as failure votes"
            ),
        }

        Ok(server)
    }

    async fn session(&self) -> Result<Session> {
        let mut guard = self.session.lock().await;
        if let Some(session) = guard.as_ref() {
            return Ok(session.clone());
        }

        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let handles = register_scripts(&mut conn).await?;
        debug!(server = %self.endpoint, "lock scripts registered");
        let session = Session { conn, handles };
        *guard = Some(session.clone());
        Ok(session)
    }

    async fn reset_session(&self) {
        *self.session.lock().await = None;
    }

    async fn store_handles(&self, handles: ScriptHandles) {
        if let Some(session) = self.session.lock().await.as_mut() {
            session.handles = handles;
        }
    }

    async fn evalsha(&self, kind: ScriptKind, key: &str, args: &[&str]) -> Result<Value> {
        let Session { mut conn, handles } = self.session().await?;
        match invoke(&mut conn, handles.sha(kind), key, args).await {
            Err(err) if err.kind() == ErrorKind::NoScriptError => {
                debug!(server = %self.endpoint, "script cache flushed; registering again");
                let handles = register_scripts(&mut conn).await?;
                let reply = invoke(&mut conn, handles.sha(kind), key, args).await;
                self.store_handles(handles).await;
                Ok(reply?)
            }
            Err(err) if is_connection_error(&err) => {
                self.reset_session().await;
                Err(err.into())
            }
            result => Ok(result?),
        }
    }
}

async fn register_scripts(conn: &mut MultiplexedConnection) -> Result<ScriptHandles> {
    let mut replies = Vec::with_capacity(ScriptKind::ALL.len());
    for kind in ScriptKind::ALL {
        let sha: String = redis::cmd("SCRIPT")
            .arg("LOAD")
            .arg(kind.body())
            .query_async(&mut *conn)
            .await?;
        replies.push(sha);
    }
    let replies: [String; 3] = replies
        .try_into()
        .map_err(|_| ServerError::UnexpectedReply("incomplete script registration".to_string()))?;
    ScriptHandles::from_replies(replies)
}

async fn invoke(
    conn: &mut MultiplexedConnection,
    sha: &str,
    key: &str,
    args: &[&str],
) -> redis::RedisResult<Value> {
    let mut cmd = redis::cmd("EVALSHA");
    cmd.arg(sha).arg(1).arg(key);
    for arg in args {
        cmd.arg(*arg);
    }
    cmd.query_async(conn).await
}

fn is_connection_error(err: &redis::RedisError) -> bool {
    err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal()
}

/// Only the set-succeeded status counts as a granted acquire.
fn acquire_reply(reply: Value) -> Result<()> {
    match reply {
        Value::Okay => Ok(()),
        Value::SimpleString(status) if status == scripts::SET_OK => Ok(()),
        other => Err(ServerError::UnexpectedReply(format!("{other:?}"))),
    }
}

fn release_reply(reply: Value) -> Result<ReleaseReply> {
    match reply {
        Value::Int(0) => Ok(ReleaseReply::AlreadyReleased),
        Value::Int(1) => Ok(ReleaseReply::Deleted),
        other => Err(ServerError::UnexpectedReply(format!("{other:?}"))),
    }
}

fn ttl_reply(reply: Value) -> Result<i64> {
    match reply {
        Value::Int(ttl) => Ok(ttl),
        other => Err(ServerError::UnexpectedReply(format!("{other:?}"))),
    }
}

#[async_trait]
impl LockServer for RedisServer {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn acquire(&self, key: &str, token: &str, expiry_millis: u64) -> Result<()> {
        let expiry = expiry_millis.to_string();
        acquire_reply(
            self.evalsha(ScriptKind::Acquire, key, &[token, expiry.as_str()])
                .await?,
        )
    }

    async fn release(&self, key: &str, token: &str) -> Result<ReleaseReply> {
        release_reply(self.evalsha(ScriptKind::Release, key, &[token]).await?)
    }

    async fn inspect_ttl(&self, key: &str, token: &str) -> Result<i64> {
        ttl_reply(self.evalsha(ScriptKind::InspectTtl, key, &[token]).await?)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let Session { mut conn, .. } = self.session().await?;
        let count: i64 = redis::cmd("EXISTS").arg(key).query_async(&mut conn).await?;
        Ok(count > 0)
    }
}

impl Redlock {
    /// Connects to every configured server concurrently and registers the
    /// lock scripts. Server order follows the configuration.
    pub async fn connect(config: &ServerSetConfig) -> RedlockResult<Self> {
        let mut pending = JoinSet::new();
        for (index, descriptor) in config.servers.iter().cloned().enumerate() {
            pending.spawn(async move { (index, RedisServer::connect(&descriptor).await) });
        }

        let mut slots: Vec<Option<Arc<dyn LockServer>>> = vec![None; config.servers.len()];
        while let Some(joined) = pending.join_next().await {
            let (index, server) = joined.map_err(|err| RedlockError::Connect {
                endpoint: "lock server".to_string(),
                message: err.to_string(),
            })?;
            slots[index] = Some(Arc::new(server?));
        }

        Redlock::new(slots.into_iter().flatten().collect())
    }
}
