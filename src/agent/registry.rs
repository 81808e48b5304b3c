//! Per-user controller registry.
//!
//! Controllers are created on first use and kept in a size-bounded LRU
//! cache. Entries idle for longer than the configured TTL are dropped on the
//! next access, but only when no caller still holds the controller.
//!
//! A held controller is never evicted: two live controllers for one user
//! would break per-user turn serialisation. When every entry is held the
//! cache grows past its configured capacity, and later inserts give the
//! extra room back once those entries are released.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use lru::LruCache;

use super::controller::{AgentDeps, HealthDataAgent};
use super::error::AgentError;
use super::types::{AgentStatus, TurnRequest, TurnResult};
use crate::config::AgentConfig;

/// Builds a controller for a user id.
pub type AgentFactory = Box<dyn Fn(&str) -> HealthDataAgent + Send + Sync>;

struct Entry {
    agent: Arc<HealthDataAgent>,
    last_used: Instant,
}

impl Entry {
    /// No turn or caller outside the registry holds this controller.
    fn is_detached(&self) -> bool {
        Arc::strong_count(&self.agent) == 1
    }
}

pub struct AgentRegistry {
    cache: Mutex<LruCache<String, Entry>>,
    capacity: NonZeroUsize,
    factory: AgentFactory,
    idle_ttl: Duration,
}

impl AgentRegistry {
    pub fn new(capacity: usize, idle_ttl: Duration, factory: AgentFactory) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
            capacity,
            factory,
            idle_ttl,
        }
    }

    /// Registry whose controllers share `deps` and take limits from `config`.
    pub fn from_config(config: &AgentConfig, deps: AgentDeps) -> Self {
        let agent_config = config.clone();
        Self::new(
            config.registry_capacity,
            Duration::from_secs(config.registry_idle_secs),
            Box::new(move |user_id| HealthDataAgent::new(user_id, &agent_config, deps.clone())),
        )
    }

    fn lock(&self) -> Result<MutexGuard<'_, LruCache<String, Entry>>, AgentError> {
        self.cache
            .lock()
            .map_err(|_| AgentError::LockPoisoned("agent registry".to_string()))
    }

    fn evict_idle(&self, cache: &mut LruCache<String, Entry>, now: Instant) {
        let expired: Vec<String> = cache
            .iter()
            .filter(|(_, e)| e.is_detached() && now.duration_since(e.last_used) > self.idle_ttl)
            .map(|(k, _)| k.clone())
            .collect();
        for user_id in expired {
            cache.pop(&user_id);
            tracing::debug!(user_id = %user_id, "Idle agent evicted");
        }
    }

    /// Free a slot for one insert. Only detached entries are evicted, least
    /// recently used first; if none is left the cache grows by one instead.
    /// Capacity borrowed earlier is given back as entries are released.
    fn make_room(&self, cache: &mut LruCache<String, Entry>) {
        while cache.len() >= self.capacity.get() {
            let idle = cache
                .iter()
                .rev()
                .find(|(_, e)| e.is_detached())
                .map(|(k, _)| k.clone());
            let Some(victim) = idle else { break };
            cache.pop(&victim);
            tracing::debug!(user_id = %victim, "Agent evicted at capacity");
        }

        let needed = NonZeroUsize::new(cache.len() + 1)
            .map_or(self.capacity, |n| n.max(self.capacity));
        if needed > cache.cap() {
            tracing::warn!(
                capacity = self.capacity.get(),
                agents = cache.len(),
                "Every cached agent is in use, growing registry"
            );
        }
        if needed != cache.cap() {
            cache.resize(needed);
        }
    }

    /// The controller for `user_id`, created if absent.
    pub fn get_or_create(&self, user_id: &str) -> Result<Arc<HealthDataAgent>, AgentError> {
        let mut cache = self.lock()?;
        let now = Instant::now();
        self.evict_idle(&mut cache, now);

        if let Some(entry) = cache.get_mut(user_id) {
            entry.last_used = now;
            return Ok(Arc::clone(&entry.agent));
        }

        self.make_room(&mut cache);
        let agent = Arc::new((self.factory)(user_id));
        cache.put(
            user_id.to_string(),
            Entry {
                agent: Arc::clone(&agent),
                last_used: now,
            },
        );
        tracing::info!(user_id = %user_id, agents = cache.len(), "Agent created");
        Ok(agent)
    }

    /// Run one turn for `user_id`. The registry lock is released before the
    /// turn starts, so distinct users never wait on each other.
    pub fn process_turn(&self, user_id: &str, request: TurnRequest) -> TurnResult {
        match self.get_or_create(user_id) {
            Ok(agent) => agent.process_turn(request),
            Err(e) => {
                tracing::error!(user_id = %user_id, error = %e, "Agent lookup failed");
                TurnResult::failed(e.to_string())
            }
        }
    }

    /// Status without touching recency; `None` for an unknown user.
    pub fn status(&self, user_id: &str) -> Option<AgentStatus> {
        let cache = self.lock().ok()?;
        let agent = Arc::clone(&cache.peek(user_id)?.agent);
        drop(cache);
        Some(agent.status())
    }

    /// Reset a known user's controller. Unknown users are a no-op.
    pub fn reset(&self, user_id: &str, full: bool) -> Result<(), AgentError> {
        let cache = self.lock()?;
        let agent = cache.peek(user_id).map(|e| Arc::clone(&e.agent));
        drop(cache);
        match agent {
            Some(agent) => agent.reset(full),
            None => Ok(()),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
