use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
#[error("cancelled while waiting for a rate limit token")]
pub struct AcquireCancelled;

/// Process-local token bucket.
///
/// Bounds the rate at which this process dispatches one job type; across N
/// processes the aggregate is N times the configured rate. That is the
/// intent: the limiter shields downstream providers from local bursts, it
/// does not enforce a global quota.
#[derive(Debug)]
pub struct RateLimiter {
    // None is the unlimited sentinel: acquire admits immediately.
    bucket: Option<Mutex<Bucket>>,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    rate: f64,
    burst: f64,
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.rate).min(self.burst);
        self.last_refill = now;
    }
}

impl RateLimiter {
    /// Token bucket with rate and burst both equal to `events_per_second`.
    pub fn per_second(events_per_second: u32) -> Self {
        let n = f64::from(events_per_second.max(1));
        Self {
            bucket: Some(Mutex::new(Bucket {
                tokens: n,
                rate: n,
                burst: n,
                last_refill: Instant::now(),
            })),
        }
    }

    pub fn unlimited() -> Self {
        Self { bucket: None }
    }

    /// Wait until a token is available, or until `cancel` fires.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), AcquireCancelled> {
        let Some(bucket) = &self.bucket else {
            return Ok(());
        };

        loop {
            let wait = {
                let mut b = bucket.lock().await;
                b.refill(Instant::now());
                if b.tokens >= 1.0 {
                    b.tokens -= 1.0;
                    return Ok(());
                }
                Duration::from_secs_f64((1.0 - b.tokens) / b.rate)
            };

            tokio::select! {
                _ = cancel.cancelled() => return Err(AcquireCancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn burst_admits_immediately() {
        let limiter = RateLimiter::per_second(3);
        let cancel = CancellationToken::new();

        for _ in 0..3 {
            limiter.acquire(&cancel).await.unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fourth_token_waits_for_refill() {
        let limiter = RateLimiter::per_second(2);
        let cancel = CancellationToken::new();

        limiter.acquire(&cancel).await.unwrap();
        limiter.acquire(&cancel).await.unwrap();

        let before = Instant::now();
        limiter.acquire(&cancel).await.unwrap();
        let waited = before.elapsed();

        // rate 2/s -> roughly half a second for the next token
        assert!(waited >= Duration::from_millis(400), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn unlimited_never_waits() {
        let limiter = RateLimiter::unlimited();
        let cancel = CancellationToken::new();

        let before = Instant::now();
        for _ in 0..1000 {
            limiter.acquire(&cancel).await.unwrap();
        }
        assert_eq!(before.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_the_wait() {
        let limiter = RateLimiter::per_second(1);
        let cancel = CancellationToken::new();

        limiter.acquire(&cancel).await.unwrap();

        let waiter = {
            let cancel = cancel.clone();
            async move { limiter.acquire(&cancel).await }
        };
        tokio::pin!(waiter);

        tokio::select! {
            _ = &mut waiter => panic!("should still be waiting"),
            _ = tokio::time::sleep(Duration::from_millis(100)) => {}
        }

        cancel.cancel();
        assert!(waiter.await.is_err());
    }
}
