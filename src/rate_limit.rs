use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use dashmap::DashMap;

/// Checks between sweeps of idle keys.
const SWEEP_EVERY: usize = 1024;

#[derive(Default)]
struct Bucket {
    window: Duration,
    hits: VecDeque<Instant>,
}

impl Bucket {
    fn prune(&mut self, now: Instant) {
        while let Some(front) = self.hits.front() {
            if now.duration_since(*front) >= self.window { self.hits.pop_front(); } else { break; }
        }
    }
}

/// Sliding window in-memory rate limiter (process local).
#[derive(Clone)]
pub struct InMemoryRateLimiter {
    store: Arc<DashMap<String, Bucket>>,
    checks: Arc<AtomicUsize>,
    pub enabled: bool,
}

impl InMemoryRateLimiter {
    pub fn new(enabled: bool) -> Self {
        Self { store: Arc::new(DashMap::new()), checks: Arc::new(AtomicUsize::new(0)), enabled }
    }

    /// Returns true if allowed, false if limited.
    pub fn check(&self, key: &str, limit: usize, window: Duration) -> bool {
        if !self.enabled { return true; }
        let now = Instant::now();
        if self.checks.fetch_add(1, Ordering::Relaxed) % SWEEP_EVERY == SWEEP_EVERY - 1 {
            self.sweep(now);
        }
        let allowed = {
            let mut bucket = self.store.entry(key.to_string()).or_default();
            bucket.window = window;
            bucket.prune(now);
            if bucket.hits.len() < limit {
                bucket.hits.push_back(now);
                true
            } else {
                false
            }
        };
        if !allowed {
            // a zero limit never records a hit
            self.store.remove_if(key, |_, b| b.hits.is_empty());
        }
        allowed
    }

    /// Drops every key whose window has fully elapsed.
    pub fn sweep(&self, now: Instant) {
        self.store.retain(|_, b| {
            b.prune(now);
            !b.hits.is_empty()
        });
    }

    pub fn tracked_keys(&self) -> usize { self.store.len() }
}

#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub post_limit: usize,
    pub post_window: Duration,
    pub comment_limit: usize,
    pub comment_window: Duration,
    pub vote_limit: usize,
    pub vote_window: Duration,
}

impl RateLimitConfig {
    pub fn from_env() -> Self {
        fn usize_env(name: &str, default: usize) -> usize { std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default) }
        fn dur_env(name: &str, default: u64) -> Duration { Duration::from_secs(std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)) }
        Self {
            post_limit: usize_env("RL_POST_LIMIT", 5),
            post_window: dur_env("RL_POST_WINDOW", 300),
            comment_limit: usize_env("RL_COMMENT_LIMIT", 10),
            comment_window: dur_env("RL_COMMENT_WINDOW", 60),
            vote_limit: usize_env("RL_VOTE_LIMIT", 60),
            vote_window: dur_env("RL_VOTE_WINDOW", 60),
        }
    }
}

/// Per-action guard used by handlers, keyed by token subject.
#[derive(Clone)]
pub struct RateLimiterFacade {
    pub limiter: InMemoryRateLimiter,
    pub cfg: RateLimitConfig,
}

impl RateLimiterFacade {
    pub fn new(limiter: InMemoryRateLimiter, cfg: RateLimitConfig) -> Self { Self { limiter, cfg } }
    pub fn allow_post(&self, who: &str) -> bool { self.limiter.check(&format!("post:{who}"), self.cfg.post_limit, self.cfg.post_window) }
    pub fn allow_comment(&self, who: &str) -> bool { self.limiter.check(&format!("comment:{who}"), self.cfg.comment_limit, self.cfg.comment_window) }
    pub fn allow_vote(&self, who: &str) -> bool { self.limiter.check(&format!("vote:{who}"), self.cfg.vote_limit, self.cfg.vote_window) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sliding_window_basic() {
        let rl = InMemoryRateLimiter::new(true);
        let window = Duration::from_millis(50);
        for _ in 0..3 { assert!(rl.check("k", 3, window)); }
        assert!(!rl.check("k", 3, window));
        std::thread::sleep(Duration::from_millis(60));
        assert!(rl.check("k", 3, window));
    }

    #[test]
    fn idle_keys_are_dropped() {
        let rl = InMemoryRateLimiter::new(true);
        let window = Duration::from_millis(20);
        for who in ["a", "b", "c"] { assert!(rl.check(who, 1, window)); }
        assert_eq!(rl.tracked_keys(), 3);

        std::thread::sleep(Duration::from_millis(30));
        rl.sweep(Instant::now());
        assert_eq!(rl.tracked_keys(), 0);

        assert!(!rl.check("z", 0, window));
        assert_eq!(rl.tracked_keys(), 0, "a zero limit leaves no key behind");
    }

    #[test]
    fn actions_are_limited_independently() {
        let cfg = RateLimitConfig {
            post_limit: 1, post_window: Duration::from_secs(60),
            comment_limit: 1, comment_window: Duration::from_secs(60),
            vote_limit: 1, vote_window: Duration::from_secs(60),
        };
        let rl = RateLimiterFacade::new(InMemoryRateLimiter::new(true), cfg);
        assert!(rl.allow_post("ana"));
        assert!(!rl.allow_post("ana"));
        assert!(rl.allow_vote("ana"));
        assert!(rl.allow_post("bob"));
    }
}
