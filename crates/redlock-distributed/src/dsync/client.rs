use std::{future::Future, sync::Arc, time::Instant};

use redlock_common::{
    error::{RedlockError, Result},
    time::elapsed_seconds,
};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::{
    context::CallContext,
    locker::LockServer,
    tally::{Vote, VoteTally, quorum},
};

/// Safety margin added to every requested lock lifetime to absorb clock
/// drift between the coordinator and the servers.
pub const CLOCK_DRIFT_TOLERANCE_MS: u64 = 500;

const MILLIS_PER_SECOND: u64 = 1000;

/// Server-side expiry for a lock requested for `ttl_seconds`.
pub fn expiry_millis(ttl_seconds: u64) -> u64 {
    ttl_seconds
        .saturating_mul(MILLIS_PER_SECOND)
        .saturating_add(CLOCK_DRIFT_TOLERANCE_MS)
}

/// Majority-vote lock coordinator over a fixed set of lock servers.
///
/// Every call contacts every server in parallel and waits for all of them
/// before deciding. Nothing is cached between calls. A failed acquire is
/// not rolled back: servers that granted it keep the record until it
/// expires, at most `ttl_seconds` plus the drift tolerance later.
#[derive(Clone)]
pub struct Redlock {
    servers: Arc<[Arc<dyn LockServer>]>,
    quorum: usize,
}

impl Redlock {
    pub fn new(servers: Vec<Arc<dyn LockServer>>) -> Result<Self> {
        if servers.is_empty() {
            return Err(RedlockError::InvalidArgument(
                "cannot build a lock coordinator with zero servers".to_string(),
            ));
        }

        let quorum = quorum(servers.len());
        Ok(Self {
            servers: servers.into(),
            quorum,
        })
    }

    pub fn total_servers(&self) -> usize {
        self.servers.len()
    }

    pub fn quorum(&self) -> usize {
        self.quorum
    }

    pub fn endpoints(&self) -> Vec<&str> {
        self.servers.iter().map(|server| server.endpoint()).collect()
    }

    /// Takes the lock on a majority of servers. Returns the elapsed wall
    /// clock time in seconds.
    pub async fn acquire(
        &self,
        ctx: &CallContext,
        key: &str,
        token: &str,
        ttl_seconds: u64,
    ) -> Result<f64> {
        if ttl_seconds == 0 {
            return Err(RedlockError::InvalidArgument(
                "lock ttl must be at least one second".to_string(),
            ));
        }

        let start = Instant::now();
        let expiry = expiry_millis(ttl_seconds);
        let tally = self
            .fan_out(|server| {
                let ctx = ctx.clone();
                let key = key.to_string();
                let token = token.to_string();
                async move {
                    match ctx.run(server.acquire(&key, &token, expiry)).await {
                        Ok(()) => Vote::Granted,
                        Err(err) => {
                            debug!(server = server.endpoint(), key = %key, error = %err, "acquire vote denied");
                            Vote::Denied
                        }
                    }
                }
            })
            .await;

        if !tally.has_quorum(self.quorum) {
            warn!(
                key,
                granted = tally.granted(),
                denied = tally.denied(),
                quorum = self.quorum,
                cancelled = ctx.is_cancelled(),
                "lock not acquired"
            );
            return Err(RedlockError::LockNotAcquired {
                key: key.to_string(),
            });
        }

        let elapsed = elapsed_seconds(start);
        debug!(key, granted = tally.granted(), elapsed, "lock acquired");
        Ok(elapsed)
    }

    /// Deletes the lock on a majority of servers. A server that no longer
    /// holds the key votes for the release.
    pub async fn release(&self, ctx: &CallContext, key: &str, token: &str) -> Result<f64> {
        let start = Instant::now();
        let tally = self
            .fan_out(|server| {
                let ctx = ctx.clone();
                let key = key.to_string();
                let token = token.to_string();
                async move {
                    match ctx.run(server.release(&key, &token)).await {
                        Ok(_) => Vote::Granted,
                        Err(err) => {
                            debug!(server = server.endpoint(), key = %key, error = %err, "release vote denied");
                            Vote::Denied
                        }
                    }
                }
            })
            .await;

        if !tally.has_quorum(self.quorum) {
            warn!(
                key,
                granted = tally.granted(),
                denied = tally.denied(),
                quorum = self.quorum,
                cancelled = ctx.is_cancelled(),
                "lock not released"
            );
            return Err(RedlockError::CannotRelease {
                key: key.to_string(),
            });
        }

        let elapsed = elapsed_seconds(start);
        debug!(key, granted = tally.granted(), elapsed, "lock released");
        Ok(elapsed)
    }

    /// Remaining lifetime of a lock owned by `token`. Succeeds only when a
    /// majority answered and every answer carries the same value.
    pub async fn query_ttl(&self, ctx: &CallContext, key: &str, token: &str) -> Result<i64> {
        let start = Instant::now();
        let tally = self
            .fan_out(|server| {
                let ctx = ctx.clone();
                let key = key.to_string();
                let token = token.to_string();
                async move {
                    match ctx.run(server.inspect_ttl(&key, &token)).await {
                        Ok(ttl) => Vote::Ttl(ttl),
                        Err(err) => {
                            debug!(server = server.endpoint(), key = %key, error = %err, "ttl vote denied");
                            Vote::Denied
                        }
                    }
                }
            })
            .await;

        match tally.agreed_ttl() {
            Some(ttl) if tally.has_quorum(self.quorum) => Ok(ttl),
            _ => {
                let elapsed = elapsed_seconds(start);
                warn!(
                    key,
                    granted = tally.granted(),
                    denied = tally.denied(),
                    quorum = self.quorum,
                    cancelled = ctx.is_cancelled(),
                    "ttl not agreed"
                );
                Err(RedlockError::TtlUnavailable {
                    key: key.to_string(),
                    elapsed,
                })
            }
        }
    }

    /// Best-effort check whether a majority of servers hold any record for
    /// `key`. Says nothing about ownership.
    pub async fn probe(&self, ctx: &CallContext, key: &str) -> bool {
        let tally = self
            .fan_out(|server| {
                let ctx = ctx.clone();
                let key = key.to_string();
                async move {
                    match ctx.run(server.exists(&key)).await {
                        Ok(true) => Vote::Granted,
                        Ok(false) => Vote::Denied,
                        Err(err) => {
                            debug!(server = server.endpoint(), key = %key, error = %err, "probe failed");
                            Vote::Denied
                        }
                    }
                }
            })
            .await;

        tally.has_quorum(self.quorum)
    }

    /// Runs `call` against every server on its own task and waits for all
    /// of them. A worker that dies without voting counts as denied.
    async fn fan_out<F, Fut>(&self, call: F) -> Arc<VoteTally>
    where
        F: Fn(Arc<dyn LockServer>) -> Fut,
        Fut: Future<Output = Vote> + Send + 'static,
    {
        let tally = Arc::new(VoteTally::new());
        let mut workers = JoinSet::new();

        for server in self.servers.iter() {
            let vote = call(Arc::clone(server));
            let tally = Arc::clone(&tally);
            workers.spawn(async move {
                tally.record(vote.await);
            });
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                warn!(error = %err, "lock server worker aborted");
            }
        }

        tally
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use async_trait::async_trait;
    use rand::{Rng, seq::SliceRandom};
    use redlock_common::error::RedlockError;
    use tokio_util::sync::CancellationToken;

    use super::{CLOCK_DRIFT_TOLERANCE_MS, Redlock, expiry_millis};
    use crate::{
        dsync::{
            context::CallContext,
            locker::{LockServer, ReleaseReply},
            memory::MemoryServer,
        },
        errors::{Result, ServerError},
    };

    #[derive(Debug, Clone, Copy)]
    enum Behavior {
        Grant,
        Conflict,
        Down,
        Ttl(i64),
        Hang,
    }

    struct ScriptedServer {
        name: String,
        behavior: Behavior,
        delay: Duration,
    }

    impl ScriptedServer {
        fn new(index: usize, behavior: Behavior) -> Self {
            Self {
                name: format!("scripted-{index}"),
                behavior,
                delay: Duration::ZERO,
            }
        }

        fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        async fn reply<T>(&self, granted: T) -> Result<T> {
            tokio::time::sleep(self.delay).await;
            match self.behavior {
                Behavior::Grant | Behavior::Ttl(_) => Ok(granted),
                Behavior::Conflict => Err(ServerError::Conflict),
                Behavior::Down => Err(ServerError::NotConnected(self.name.clone())),
                Behavior::Hang => std::future::pending().await,
            }
        }
    }

    #[async_trait]
    impl LockServer for ScriptedServer {
        fn endpoint(&self) -> &str {
            &self.name
        }

        async fn acquire(&self, _key: &str, _token: &str, _expiry_millis: u64) -> Result<()> {
            self.reply(()).await
        }

        async fn release(&self, _key: &str, _token: &str) -> Result<ReleaseReply> {
            self.reply(ReleaseReply::Deleted).await
        }

        async fn inspect_ttl(&self, _key: &str, _token: &str) -> Result<i64> {
            let ttl = match self.behavior {
                Behavior::Ttl(ttl) => ttl,
                _ => 60,
            };
            self.reply(ttl).await
        }

        async fn exists(&self, _key: &str) -> Result<bool> {
            self.reply(true).await
        }
    }

    fn coordinator(behaviors: &[Behavior]) -> Redlock {
        let servers = behaviors
            .iter()
            .enumerate()
            .map(|(index, behavior)| {
                Arc::new(ScriptedServer::new(index, *behavior)) as Arc<dyn LockServer>
            })
            .collect();
        Redlock::new(servers).expect("non-empty server set")
    }

    fn votes(total: usize, granted: usize) -> Vec<Behavior> {
        (0..total)
            .map(|index| {
                if index < granted {
                    Behavior::Grant
                } else {
                    Behavior::Down
                }
            })
            .collect()
    }

    fn memory_coordinator(total: usize) -> (Redlock, Vec<Arc<MemoryServer>>) {
        let servers = (0..total)
            .map(|index| Arc::new(MemoryServer::new(format!("mem-{index}"))))
            .collect::<Vec<_>>();
        let handles = servers
            .iter()
            .map(|server| Arc::clone(server) as Arc<dyn LockServer>)
            .collect();
        (Redlock::new(handles).expect("non-empty server set"), servers)
    }

    #[test]
    fn expiry_adds_drift_tolerance() {
        assert_eq!(expiry_millis(60), 60_000 + CLOCK_DRIFT_TOLERANCE_MS);
        assert_eq!(expiry_millis(u64::MAX), u64::MAX);
    }

    #[test]
    fn empty_server_set_is_rejected() {
        assert!(matches!(
            Redlock::new(Vec::new()),
            Err(RedlockError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn acquire_and_release_follow_the_majority_threshold() {
        let ctx = CallContext::background();
        for total in [1usize, 2, 3, 5] {
            let quorum = total / 2 + 1;
            for granted in [quorum - 1, quorum, total] {
                let redlock = coordinator(&votes(total, granted));
                assert_eq!(redlock.quorum(), quorum);

                let acquired = redlock.acquire(&ctx, "k", "t", 10).await;
                let released = redlock.release(&ctx, "k", "t").await;
                let expected = granted >= quorum;

                assert_eq!(acquired.is_ok(), expected, "acquire n={total} granted={granted}");
                assert_eq!(released.is_ok(), expected, "release n={total} granted={granted}");
                assert_eq!(redlock.probe(&ctx, "k").await, expected, "probe n={total} granted={granted}");
            }
        }
    }

    #[tokio::test]
    async fn failed_acquire_names_the_key() {
        let redlock = coordinator(&[Behavior::Grant, Behavior::Conflict, Behavior::Conflict]);
        let err = redlock
            .acquire(&CallContext::background(), "orders", "t", 10)
            .await
            .unwrap_err();
        assert!(matches!(err, RedlockError::LockNotAcquired { ref key } if key == "orders"));
    }

    #[tokio::test]
    async fn zero_ttl_is_rejected() {
        let redlock = coordinator(&[Behavior::Grant]);
        let result = redlock.acquire(&CallContext::background(), "k", "t", 0).await;
        assert!(matches!(result, Err(RedlockError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn ttl_requires_agreement_across_all_responders() {
        let ctx = CallContext::background();

        let agreed = coordinator(&[Behavior::Ttl(42), Behavior::Ttl(42), Behavior::Down]);
        assert_eq!(agreed.query_ttl(&ctx, "k", "t").await.ok(), Some(42));

        let divergent = coordinator(&[Behavior::Ttl(42), Behavior::Ttl(42), Behavior::Ttl(41)]);
        let err = divergent.query_ttl(&ctx, "k", "t").await.unwrap_err();
        assert!(matches!(err, RedlockError::TtlUnavailable { .. }));

        let minority = coordinator(&[Behavior::Ttl(42), Behavior::Down, Behavior::Conflict]);
        assert!(minority.query_ttl(&ctx, "k", "t").await.is_err());
    }

    #[tokio::test]
    async fn response_order_does_not_change_the_decision() {
        let ctx = CallContext::background();
        let mut behaviors = vec![
            Behavior::Grant,
            Behavior::Grant,
            Behavior::Grant,
            Behavior::Conflict,
            Behavior::Down,
        ];

        for _ in 0..8 {
            behaviors.shuffle(&mut rand::rng());
            let servers = behaviors
                .iter()
                .enumerate()
                .map(|(index, behavior)| {
                    let delay = Duration::from_millis(rand::rng().random_range(0..15));
                    Arc::new(ScriptedServer::new(index, *behavior).with_delay(delay))
                        as Arc<dyn LockServer>
                })
                .collect();
            let redlock = Redlock::new(servers).expect("non-empty server set");
            assert!(redlock.acquire(&ctx, "k", "t", 10).await.is_ok());
        }
    }

    #[tokio::test]
    async fn hung_servers_count_as_failures_once_the_deadline_passes() {
        let ctx = CallContext::background().with_timeout(Duration::from_millis(50));

        let majority = coordinator(&[Behavior::Grant, Behavior::Grant, Behavior::Hang]);
        assert!(majority.acquire(&ctx, "k", "t", 10).await.is_ok());

        let ctx = CallContext::background().with_timeout(Duration::from_millis(50));
        let minority = coordinator(&[Behavior::Grant, Behavior::Hang, Behavior::Hang]);
        assert!(minority.acquire(&ctx, "k", "t", 10).await.is_err());
    }

    #[tokio::test]
    async fn cancelled_context_denies_every_vote() {
        let token = CancellationToken::new();
        token.cancel();
        let ctx = CallContext::background().with_cancellation(token);
        let redlock = coordinator(&[Behavior::Hang, Behavior::Hang, Behavior::Hang]);
        assert!(!redlock.probe(&ctx, "k").await);
    }

    #[tokio::test]
    async fn reacquire_refreshes_but_other_tokens_are_refused() {
        let ctx = CallContext::background();
        let (redlock, _servers) = memory_coordinator(3);

        redlock.acquire(&ctx, "k", "a", 30).await.expect("first acquire");
        redlock.acquire(&ctx, "k", "a", 30).await.expect("refresh");
        assert!(matches!(
            redlock.acquire(&ctx, "k", "b", 30).await,
            Err(RedlockError::LockNotAcquired { .. })
        ));
    }

    #[tokio::test]
    async fn release_by_another_owner_leaves_the_record() {
        let ctx = CallContext::background();
        let (redlock, servers) = memory_coordinator(3);

        redlock.acquire(&ctx, "k", "a", 30).await.expect("acquire");
        assert!(matches!(
            redlock.release(&ctx, "k", "b").await,
            Err(RedlockError::CannotRelease { .. })
        ));
        for server in &servers {
            assert_eq!(server.holder("k").as_deref(), Some("a"));
        }
        assert!(redlock.probe(&ctx, "k").await);
    }

    #[tokio::test]
    async fn failed_acquire_is_not_rolled_back() {
        let ctx = CallContext::background();
        let (redlock, servers) = memory_coordinator(3);

        servers[1].acquire("k", "other", 30_000).await.expect("seed");
        servers[2].acquire("k", "other", 30_000).await.expect("seed");

        assert!(redlock.acquire(&ctx, "k", "a", 30).await.is_err());
        assert_eq!(servers[0].holder("k").as_deref(), Some("a"));

        let _ = redlock.release(&ctx, "k", "a").await;
        assert_eq!(servers[0].holder("k"), None);
    }

    #[tokio::test]
    async fn one_unreachable_server_is_tolerated() {
        let ctx = CallContext::background();
        let (redlock, servers) = memory_coordinator(3);
        servers[2].set_online(false);

        redlock.acquire(&ctx, "k", "a", 30).await.expect("acquire");
        assert_eq!(redlock.query_ttl(&ctx, "k", "a").await.ok(), Some(30));
        redlock.release(&ctx, "k", "a").await.expect("release");

        servers[1].set_online(false);
        assert!(redlock.acquire(&ctx, "k", "a", 30).await.is_err());
    }
}
