use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(60);

/// Per-sender sliding window. A limit of 0 disables it.
pub struct RateLimiter {
    limit: usize,
    window: Duration,
    hits: Mutex<HashMap<u64, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn per_minute(limit: u32) -> Self {
        Self::new(limit as usize, WINDOW)
    }

    pub fn new(limit: usize, window: Duration) -> Self {
        Self { limit, window, hits: Mutex::new(HashMap::new()) }
    }

    /// Records a hit and reports whether it fits in the window.
    pub fn check(&self, sender: u64) -> bool {
        self.check_at(sender, Instant::now())
    }

    fn check_at(&self, sender: u64, now: Instant) -> bool {
        if self.limit == 0 {
            return true;
        }
        let mut hits = self.hits.lock().unwrap_or_else(|e| e.into_inner());
        hits.retain(|_, q| q.back().is_some_and(|t| now.duration_since(*t) < self.window));
        let queue = hits.entry(sender).or_default();
        while queue.front().is_some_and(|t| now.duration_since(*t) >= self.window) {
            queue.pop_front();
        }
        if queue.len() >= self.limit {
            return false;
        }
        queue.push_back(now);
        true
    }
}
