use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Sliding window in-memory limiter (pod local) backing the karma abuse
/// restriction. The policy itself is a toggle: callers that pass
/// `restriction_enabled = false` (reward issuance) bypass it entirely.
#[derive(Clone)]
pub struct KarmaThrottle {
    store: Arc<DashMap<String, VecDeque<Instant>>>,
    pub enabled: bool,
}

impl KarmaThrottle {
    pub fn new(enabled: bool) -> Self {
        Self {
            store: Arc::new(DashMap::new()),
            enabled,
        }
    }

    /// Returns true if allowed, false if limited.
    pub fn check(&self, key: &str, limit: usize, window: Duration) -> bool {
        if !self.enabled {
            return true;
        }
        let now = Instant::now();
        let mut entry = self.store.entry(key.to_string()).or_default();
        while let Some(front) = entry.front() {
            if now.duration_since(*front) >= window {
                entry.pop_front();
            } else {
                break;
            }
        }
        if entry.len() < limit {
            entry.push_back(now);
            true
        } else {
            false
        }
    }
}

/// Per-action limits derived from env.
#[derive(Clone, Debug)]
pub struct ThrottleConfig {
    pub karma_limit: usize,
    pub karma_window: Duration,
}

impl ThrottleConfig {
    pub fn from_env() -> Self {
        fn usize_env(name: &str, default: usize) -> usize {
            std::env::var(name)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        }
        fn dur_env(name: &str, default: u64) -> Duration {
            Duration::from_secs(
                std::env::var(name)
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(default),
            )
        }
        Self {
            karma_limit: usize_env("RL_KARMA_LIMIT", 5),
            karma_window: dur_env("RL_KARMA_WINDOW", 60),
        }
    }
}

/// High level guard used by the karma-mutation primitive.
#[derive(Clone)]
pub struct ThrottleFacade {
    pub limiter: KarmaThrottle,
    pub cfg: ThrottleConfig,
}

impl ThrottleFacade {
    pub fn new(limiter: KarmaThrottle, cfg: ThrottleConfig) -> Self {
        Self { limiter, cfg }
    }

    /// One budget per acting user, shared across chats.
    pub fn allow_change(&self, actor_tg_id: i64) -> bool {
        self.limiter.check(
            &format!("karma:{actor_tg_id}"),
            self.cfg.karma_limit,
            self.cfg.karma_window,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sliding_window_basic() {
        let rl = KarmaThrottle::new(true);
        let window = Duration::from_millis(50);
        for _ in 0..3 {
            assert!(rl.check("k", 3, window));
        }
        assert!(!rl.check("k", 3, window));
    }

    #[test]
    fn disabled_limiter_always_allows() {
        let rl = KarmaThrottle::new(false);
        let window = Duration::from_millis(50);
        for _ in 0..10 {
            assert!(rl.check("k", 1, window));
        }
    }
}
