//! Client-side rate limiting for collaborators
//!
//! [`TokenBucket`] is the accounting; [`RateGate`] makes callers wait for a
//! token; [`Throttled`] wraps a completion or search provider so every call
//! passes through a shared gate.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::config::RateLimitConfig;
use crate::error::CollaboratorError;
use crate::llm::{CompletionProvider, CompletionSettings};
use crate::search::{SearchHit, SearchProvider};

/// Classic token bucket: `capacity` tokens, refilled continuously at
/// `refill_per_second`.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_second: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(capacity: u32, refill_per_second: f64) -> Self {
        Self::new_at(capacity, refill_per_second, Instant::now())
    }

    /// Start full at a fixed instant. Capacity is at least one token.
    pub fn new_at(capacity: u32, refill_per_second: f64, now: Instant) -> Self {
        let capacity = capacity.max(1) as f64;
        Self {
            capacity,
            tokens: capacity,
            refill_per_second: refill_per_second.max(0.0),
            last_refill: now,
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.requests, config.refill_per_second())
    }

    pub fn available(&self) -> f64 {
        self.tokens
    }

    pub fn try_consume(&mut self, tokens: u32) -> bool {
        self.try_consume_at(tokens, Instant::now())
    }

    pub fn try_consume_at(&mut self, tokens: u32, now: Instant) -> bool {
        self.refill(now);
        let needed = tokens as f64;
        if needed <= self.tokens {
            self.tokens -= needed;
            true
        } else {
            false
        }
    }

    /// How long until `tokens` could be consumed
    pub fn wait_time(&mut self, tokens: u32) -> Duration {
        self.wait_time_at(tokens, Instant::now())
    }

    pub fn wait_time_at(&mut self, tokens: u32, now: Instant) -> Duration {
        self.refill(now);
        let needed = (tokens as f64).min(self.capacity);
        if needed <= self.tokens {
            return Duration::ZERO;
        }
        if self.refill_per_second <= 0.0 {
            return Duration::MAX;
        }
        Duration::from_secs_f64((needed - self.tokens) / self.refill_per_second)
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * self.refill_per_second).min(self.capacity);
            self.last_refill = now;
        }
    }
}

/// Shared async gate over a token bucket
#[derive(Debug)]
pub struct RateGate {
    bucket: Mutex<TokenBucket>,
}

impl RateGate {
    pub fn new(bucket: TokenBucket) -> Self {
        Self {
            bucket: Mutex::new(bucket),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(TokenBucket::from_config(config))
    }

    /// Wait until one token is available and take it. The lock is released
    /// while sleeping.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                if bucket.try_consume(1) {
                    return;
                }
                bucket.wait_time(1)
            };
            debug!(sleep_ms = wait.as_millis() as u64, "Rate limiting: waiting for token");
            tokio::time::sleep(wait).await;
        }
    }
}

/// A collaborator whose calls pass through a [`RateGate`]
pub struct Throttled<P> {
    inner: P,
    gate: Arc<RateGate>,
}

impl<P> Throttled<P> {
    pub fn new(inner: P, gate: Arc<RateGate>) -> Self {
        Self { inner, gate }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }
}

#[async_trait]
impl<P> CompletionProvider for Throttled<P>
where
    P: CompletionProvider,
{
    async fn complete(
        &self,
        prompt: &str,
        settings: &CompletionSettings,
    ) -> Result<String, CollaboratorError> {
        self.gate.acquire().await;
        self.inner.complete(prompt, settings).await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

#[async_trait]
impl<P> SearchProvider for Throttled<P>
where
    P: SearchProvider,
{
    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchHit>, CollaboratorError> {
        self.gate.acquire().await;
        self.inner.search(query, max_results).await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_bucket_consumption() {
        let now = Instant::now();
        let mut bucket = TokenBucket::new_at(5, 2.0, now);

        assert!(bucket.try_consume_at(3, now));
        assert!(bucket.try_consume_at(2, now));
        assert!(!bucket.try_consume_at(1, now));

        let wait = bucket.wait_time_at(1, now);
        assert!(wait > Duration::ZERO);
        assert!(wait <= Duration::from_secs(1));
    }

    #[test]
    fn test_bucket_refills_over_time() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new_at(5, 2.0, start);
        assert!(bucket.try_consume_at(5, start));

        let later = start + Duration::from_millis(1500);
        assert!(bucket.try_consume_at(3, later));
        assert!(!bucket.try_consume_at(1, later));
    }

    #[test]
    fn test_bucket_never_exceeds_capacity() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new_at(2, 10.0, start);
        bucket.refill(start + Duration::from_secs(60));
        assert_eq!(bucket.available(), 2.0);
    }

    #[test]
    fn test_zero_capacity_bucket_holds_one_token() {
        let now = Instant::now();
        let mut bucket = TokenBucket::new_at(0, 1.0, now);
        assert!(bucket.try_consume_at(1, now));
        assert_eq!(bucket.wait_time_at(1, now), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_capacity_gate_sleeps_instead_of_spinning() {
        let gate = RateGate::new(TokenBucket::new(0, 2.0));
        let started = Instant::now();

        gate.acquire().await;
        gate.acquire().await;

        assert!(started.elapsed() >= Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gate_waits_for_refill() {
        let gate = RateGate::new(TokenBucket::new(1, 1.0));
        let started = Instant::now();

        gate.acquire().await;
        gate.acquire().await;

        assert!(started.elapsed() >= Duration::from_millis(900));
    }

    struct CountingSearch(AtomicUsize);

    #[async_trait]
    impl SearchProvider for CountingSearch {
        async fn search(&self, query: &str, _max: usize) -> Result<Vec<SearchHit>, CollaboratorError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(vec![SearchHit::new("https://arxiv.org/abs/1", query)])
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_search_passes_through() {
        let gate = Arc::new(RateGate::new(TokenBucket::new(2, 1.0)));
        let search = Throttled::new(CountingSearch(AtomicUsize::new(0)), gate);

        for _ in 0..3 {
            let hits = search.search("solar", 5).await.unwrap();
            assert_eq!(hits.len(), 1);
        }
        assert_eq!(search.inner().0.load(Ordering::SeqCst), 3);
    }
}
