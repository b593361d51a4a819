//! Lease-based leader election.
//!
//! The lock is a broker key `titan:leader:{name}` acquired with
//! SET-if-absent plus a TTL, renewed at half-lease cadence, and released
//! through a check-and-delete script that only deletes when the value still
//! equals this instance's id. A crashed leader's lock expires at TTL, after
//! which another instance acquires it.

use std::sync::Arc;

use parking_lot::Mutex;
use rand::Rng;
use redis::Script;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::LeaderConfig;
use crate::core::error::{TitanError, TitanResult};

/// Key prefix for leader locks.
pub const LOCK_PREFIX: &str = "titan:leader:";

/// Release only succeeds when the caller still owns the lock.
const RELEASE_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

/// Callback invoked on leadership transitions.
pub trait LeadershipHandler: Send + Sync {
    /// `is_leader` is `true` on election and `false` on demotion.
    fn on_transition(&self, is_leader: bool);
}

impl<F> LeadershipHandler for F
where
    F: Fn(bool) + Send + Sync,
{
    fn on_transition(&self, is_leader: bool) {
        self(is_leader)
    }
}

/// Unique instance identity: the hostname plus a random suffix, so pods
/// sharing a hostname stay distinguishable.
pub fn generate_instance_id() -> String {
    let hostname = std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("POD_NAME"))
        .unwrap_or_else(|_| "unknown".to_string());
    let suffix: String = rand::thread_rng()
        .sample_iter(rand::distributions::Alphanumeric)
        .take(8)
        .map(|c| (c as char).to_ascii_lowercase())
        .collect();
    format!("{hostname}-{suffix}")
}

/// Broker-based leader election for a named singleton worker.
pub struct LeaderElection {
    name: String,
    instance_id: String,
    lock_key: String,
    client: redis::Client,
    config: LeaderConfig,
    is_leader: watch::Sender<bool>,
    handlers: Arc<Mutex<Vec<Arc<dyn LeadershipHandler>>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LeaderElection {
    pub fn new(name: impl Into<String>, redis_url: &str, config: LeaderConfig) -> TitanResult<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| TitanError::Internal(format!("redis client: {e}")))?;
        let name = name.into();
        let (is_leader, _) = watch::channel(false);
        Ok(Self {
            lock_key: format!("{LOCK_PREFIX}{name}"),
            instance_id: generate_instance_id(),
            name,
            client,
            config,
            is_leader,
            handlers: Arc::new(Mutex::new(Vec::new())),
            task: Mutex::new(None),
        })
    }

    /// Whether this instance currently holds the lease.
    pub fn is_leader(&self) -> bool {
        *self.is_leader.borrow()
    }

    /// A receiver that observes every leadership transition.
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.is_leader.subscribe()
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn lock_key(&self) -> &str {
        &self.lock_key
    }

    /// Register a transition callback.
    pub fn on_transition(&self, handler: Arc<dyn LeadershipHandler>) {
        self.handlers.lock().push(handler);
    }

    /// Start the election loop. Idempotent.
    pub fn start(self: &Arc<Self>) {
        let mut guard = self.task.lock();
        if guard.is_some() {
            return;
        }

        let election = Arc::clone(self);
        *guard = Some(tokio::spawn(async move {
            let interval = std::time::Duration::from_secs(election.config.renewal_interval_secs);
            loop {
                let holding = election.is_leader();
                let outcome = if holding {
                    election.renew_lock().await
                } else {
                    election.acquire_lock().await
                };

                match outcome {
                    Ok(now_leader) => {
                        if now_leader != holding {
                            election.transition(now_leader);
                        }
                    }
                    Err(e) => {
                        tracing::error!(
                            role = %election.name,
                            error = %e,
                            "leader election loop error"
                        );
                        if holding {
                            election.transition(false);
                        }
                    }
                }

                tokio::time::sleep(interval).await;
            }
        }));
        tracing::info!(
            role = %self.name,
            instance_id = %self.instance_id,
            "leader election started"
        );
    }

    /// Stop the loop and gracefully release a held lease.
    pub async fn stop(&self) {
        let task = self.task.lock().take();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
        }
        if self.is_leader() {
            if let Err(e) = self.release_lock().await {
                tracing::warn!(role = %self.name, error = %e, "lease release failed");
            }
            self.transition(false);
        }
        tracing::info!(role = %self.name, "leader election stopped");
    }

    fn transition(&self, now_leader: bool) {
        let _ = self.is_leader.send(now_leader);
        if now_leader {
            tracing::info!(role = %self.name, instance_id = %self.instance_id, "elected leader");
        } else {
            tracing::warn!(role = %self.name, instance_id = %self.instance_id, "lost leadership");
        }
        let handlers: Vec<Arc<dyn LeadershipHandler>> =
            self.handlers.lock().iter().cloned().collect();
        for handler in handlers {
            handler.on_transition(now_leader);
        }
    }

    async fn connection(&self) -> TitanResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| TitanError::Internal(format!("leader election connect: {e}")))
    }

    /// Atomic SET-if-absent with TTL. Returns whether the lease is now
    /// held by this instance.
    async fn acquire_lock(&self) -> TitanResult<bool> {
        let mut conn = self.connection().await?;
        let acquired: Option<String> = redis::cmd("SET")
            .arg(&self.lock_key)
            .arg(&self.instance_id)
            .arg("NX")
            .arg("EX")
            .arg(self.config.lease_ttl_secs)
            .query_async(&mut conn)
            .await
            .map_err(|e| TitanError::Internal(format!("lease acquire: {e}")))?;
        Ok(acquired.is_some())
    }

    /// Refresh the TTL when this instance still owns the lock. Returns
    /// whether leadership is retained.
    async fn renew_lock(&self) -> TitanResult<bool> {
        let mut conn = self.connection().await?;
        let owner: Option<String> = redis::cmd("GET")
            .arg(&self.lock_key)
            .query_async(&mut conn)
            .await
            .map_err(|e| TitanError::Internal(format!("lease read: {e}")))?;

        match owner {
            Some(owner) if owner == self.instance_id => {
                redis::cmd("EXPIRE")
                    .arg(&self.lock_key)
                    .arg(self.config.lease_ttl_secs)
                    .query_async::<_, ()>(&mut conn)
                    .await
                    .map_err(|e| TitanError::Internal(format!("lease renew: {e}")))?;
                tracing::debug!(role = %self.name, "lease renewed");
                Ok(true)
            }
            Some(owner) => {
                tracing::warn!(role = %self.name, owner = %owner, "lease taken by another instance");
                Ok(false)
            }
            None => Ok(false),
        }
    }

    /// Check-and-delete release.
    async fn release_lock(&self) -> TitanResult<bool> {
        let mut conn = self.connection().await?;
        let released: i64 = Script::new(RELEASE_SCRIPT)
            .key(&self.lock_key)
            .arg(&self.instance_id)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| TitanError::Internal(format!("lease release: {e}")))?;
        if released > 0 {
            tracing::info!(role = %self.name, "released leadership");
        }
        Ok(released > 0)
    }

    /// Instance id of the current lease holder, if any.
    pub async fn current_leader(&self) -> TitanResult<Option<String>> {
        let mut conn = self.connection().await?;
        redis::cmd("GET")
            .arg(&self.lock_key)
            .query_async(&mut conn)
            .await
            .map_err(|e| TitanError::Internal(format!("lease read: {e}")))
    }
}
