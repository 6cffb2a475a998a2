//! Sliding-window request/token rate limiter.
//!
//! Tracks two quantities over a configurable window (default 60 s):
//! the number of requests and the number of tokens they consumed. Callers
//! supply an estimated token cost per call; the limiter either admits the
//! call or fails with a [`RateLimitError`] carrying the number of seconds
//! until the oldest window entry expires.
//!
//! The limiter never sleeps. Waiting is the caller's decision: the embedder
//! lets the error escape and the indexing operator re-runs from checkpoint.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::RateLimitError;

const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct Window {
    requests: VecDeque<Instant>,
    tokens: VecDeque<(Instant, u64)>,
    token_total: u64,
}

impl Window {
    /// Drop entries older than `window`. Called lazily on every observation.
    fn evict(&mut self, now: Instant, window: Duration) {
        while let Some(first) = self.requests.front() {
            if now.duration_since(*first) > window {
                self.requests.pop_front();
            } else {
                break;
            }
        }
        while let Some((first, cost)) = self.tokens.front() {
            if now.duration_since(*first) > window {
                self.token_total -= *cost;
                self.tokens.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Thread-safe sliding-window RPM/TPM gate. Mutation is serialized by an
/// internal mutex, so `check_and_record` is atomic with respect to
/// concurrent callers.
pub struct RateLimiter {
    rpm_limit: u32,
    tpm_limit: u64,
    window: Duration,
    state: Mutex<Window>,
}

/// Snapshot of window occupancy, for logging and diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct RateStats {
    pub current_requests: usize,
    pub rpm_limit: u32,
    pub current_tokens: u64,
    pub tpm_limit: u64,
}

impl RateLimiter {
    pub fn new(rpm_limit: u32, tpm_limit: u64) -> Self {
        Self::with_window(rpm_limit, tpm_limit, DEFAULT_WINDOW)
    }

    pub fn with_window(rpm_limit: u32, tpm_limit: u64, window: Duration) -> Self {
        Self {
            rpm_limit,
            tpm_limit,
            window,
            state: Mutex::new(Window::default()),
        }
    }

    /// Fails if admitting a request costing `tokens` would exceed either
    /// ceiling. Does not record anything.
    pub fn check(&self, tokens: u64) -> Result<(), RateLimitError> {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap();
        state.evict(now, self.window);
        self.check_locked(&state, tokens, now)
    }

    /// Records a request costing `tokens` at the current instant.
    pub fn record(&self, tokens: u64) {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap();
        state.evict(now, self.window);
        state.requests.push_back(now);
        if tokens > 0 {
            state.tokens.push_back((now, tokens));
            state.token_total += tokens;
        }
    }

    /// Atomic check-then-record under one lock acquisition.
    pub fn check_and_record(&self, tokens: u64) -> Result<(), RateLimitError> {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap();
        state.evict(now, self.window);
        self.check_locked(&state, tokens, now)?;
        state.requests.push_back(now);
        if tokens > 0 {
            state.tokens.push_back((now, tokens));
            state.token_total += tokens;
        }
        Ok(())
    }

    pub fn stats(&self) -> RateStats {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap();
        state.evict(now, self.window);
        RateStats {
            current_requests: state.requests.len(),
            rpm_limit: self.rpm_limit,
            current_tokens: state.token_total,
            tpm_limit: self.tpm_limit,
        }
    }

    fn check_locked(
        &self,
        state: &Window,
        tokens: u64,
        now: Instant,
    ) -> Result<(), RateLimitError> {
        let mut blocked_until: Option<Instant> = None;

        if state.requests.len() as u32 >= self.rpm_limit {
            if let Some(first) = state.requests.front() {
                blocked_until = Some(*first + self.window);
            }
        }
        if state.token_total + tokens > self.tpm_limit {
            if let Some((first, _)) = state.tokens.front() {
                let until = *first + self.window;
                blocked_until = Some(blocked_until.map_or(until, |b| b.max(until)));
            }
        }

        match blocked_until {
            None => Ok(()),
            Some(until) => Err(RateLimitError {
                retry_after_secs: ceil_secs(until.saturating_duration_since(now)),
            }),
        }
    }
}

fn ceil_secs(d: Duration) -> u64 {
    let whole = d.as_secs();
    if d.subsec_nanos() > 0 {
        whole + 1
    } else {
        whole
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_up_to_the_request_ceiling() {
        let limiter = RateLimiter::new(3, 1_000_000);
        for _ in 0..3 {
            limiter.check_and_record(10).unwrap();
        }
        let err = limiter.check_and_record(10).unwrap_err();
        assert!(err.retry_after_secs <= 60);
        assert!(err.retry_after_secs >= 1);
    }

    #[test]
    fn token_ceiling_counts_the_pending_cost() {
        let limiter = RateLimiter::new(100, 1000);
        limiter.check_and_record(600).unwrap();
        // 600 + 500 > 1000 must be refused even though requests are fine.
        assert!(limiter.check(500).is_err());
        limiter.check_and_record(400).unwrap();
    }

    #[test]
    fn check_alone_records_nothing() {
        let limiter = RateLimiter::new(1, 1000);
        limiter.check(10).unwrap();
        limiter.check(10).unwrap();
        let stats = limiter.stats();
        assert_eq!(stats.current_requests, 0);
        assert_eq!(stats.current_tokens, 0);
    }

    #[test]
    fn old_entries_are_evicted() {
        let limiter = RateLimiter::with_window(1, 1000, Duration::from_millis(50));
        limiter.check_and_record(100).unwrap();
        assert!(limiter.check(1).is_err());
        std::thread::sleep(Duration::from_millis(80));
        limiter.check_and_record(100).unwrap();
        let stats = limiter.stats();
        assert_eq!(stats.current_requests, 1);
        assert_eq!(stats.current_tokens, 100);
    }

    #[test]
    fn retry_after_is_ceiled_seconds() {
        let limiter = RateLimiter::with_window(1, 1000, Duration::from_millis(200));
        limiter.check_and_record(1).unwrap();
        let err = limiter.check(1).unwrap_err();
        // 200 ms remaining rounds up to one second.
        assert_eq!(err.retry_after_secs, 1);
    }

    #[test]
    fn concurrent_callers_never_exceed_the_ceiling() {
        use std::sync::Arc;

        let limiter = Arc::new(RateLimiter::new(50, u64::MAX));
        let mut handles = Vec::new();
        let admitted = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        for _ in 0..8 {
            let limiter = limiter.clone();
            let admitted = admitted.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..20 {
                    if limiter.check_and_record(1).is_ok() {
                        admitted.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    }
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(admitted.load(std::sync::atomic::Ordering::SeqCst), 50);
    }
}
