//! Quota-aware pacing for Gmail API calls
//!
//! Gmail meters each user in "quota units" per second (250 by default) and
//! charges each method a fixed number of units. A token bucket refilled at the
//! per-second rate lets short bursts through and makes later calls wait until
//! enough units have accumulated again.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::config::QuotaConfig;

/// Quota charged by the endpoints this crate calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaCost {
    /// messages.list
    ListMessages,
    /// threads.list
    ListThreads,
    /// messages.get
    GetMessage,
    /// threads.get
    GetThread,
    /// messages.attachments.get
    GetAttachment,
    /// messages.modify / trash / untrash
    ModifyMessage,
    /// threads.modify / trash / untrash
    ModifyThread,
    /// messages.delete
    DeleteMessage,
    /// messages.batchModify
    BatchModify,
    /// messages.batchDelete
    BatchDelete,
    /// labels.list / labels.create
    Labels,
    Custom(u32),
}

impl QuotaCost {
    pub fn units(&self) -> u32 {
        match self {
            QuotaCost::ListMessages
            | QuotaCost::GetMessage
            | QuotaCost::GetAttachment
            | QuotaCost::ModifyMessage
            | QuotaCost::Labels => 5,
            QuotaCost::ListThreads | QuotaCost::GetThread | QuotaCost::ModifyThread
            | QuotaCost::DeleteMessage => 10,
            QuotaCost::BatchModify | QuotaCost::BatchDelete => 50,
            QuotaCost::Custom(units) => *units,
        }
    }
}

/// Token bucket shared by every clone
#[derive(Debug, Clone)]
pub struct QuotaRateLimiter {
    inner: Arc<Mutex<BucketState>>,
}

#[derive(Debug)]
struct BucketState {
    available_units: f64,
    max_units: f64,
    refill_rate: f64,
    last_refill: Instant,
    total_consumed: u64,
    total_operations: u64,
}

impl BucketState {
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.available_units = (self.available_units + elapsed * self.refill_rate).min(self.max_units);
        self.last_refill = now;
    }
}

impl QuotaRateLimiter {
    /// Gmail's default per-user budget: 250 units/s with two seconds of burst
    pub fn new() -> Self {
        Self::with_config(250.0, 500.0)
    }

    pub fn from_config(config: &QuotaConfig) -> Self {
        Self::with_config(config.units_per_second, config.burst_units)
    }

    /// # Arguments
    /// * `refill_rate` - Quota units added per second
    /// * `max_units` - Maximum burst capacity
    pub fn with_config(refill_rate: f64, max_units: f64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BucketState {
                available_units: max_units,
                max_units,
                refill_rate,
                last_refill: Instant::now(),
                total_consumed: 0,
                total_operations: 0,
            })),
        }
    }

    /// Wait until `cost` units are available, then consume them
    pub async fn acquire(&self, cost: QuotaCost) {
        let units_needed = cost.units() as f64;

        loop {
            let wait_time = {
                let mut state = self.inner.lock().await;
                state.refill();

                trace!(
                    "Quota state: {:.1}/{:.1} units available, requesting {:.0}",
                    state.available_units,
                    state.max_units,
                    units_needed
                );

                // A request larger than the whole bucket can only ever wait for a full bucket
                let threshold = units_needed.min(state.max_units);
                if state.available_units >= threshold {
                    state.available_units -= units_needed;
                    state.total_consumed += units_needed as u64;
                    state.total_operations += 1;
                    return;
                }

                let deficit = threshold - state.available_units;
                Duration::from_secs_f64(deficit / state.refill_rate)
            };

            debug!(
                "Quota exhausted, waiting {:.2}s for {} units",
                wait_time.as_secs_f64(),
                units_needed
            );
            tokio::time::sleep(wait_time).await;
        }
    }

    pub async fn stats(&self) -> QuotaStats {
        let mut state = self.inner.lock().await;
        state.refill();
        QuotaStats {
            available_units: state.available_units.max(0.0) as u32,
            total_consumed: state.total_consumed,
            total_operations: state.total_operations,
        }
    }
}

impl Default for QuotaRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct QuotaStats {
    pub available_units: u32,
    pub total_consumed: u64,
    pub total_operations: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_cost_units() {
        assert_eq!(QuotaCost::ListMessages.units(), 5);
        assert_eq!(QuotaCost::ListThreads.units(), 10);
        assert_eq!(QuotaCost::BatchModify.units(), 50);
        assert_eq!(QuotaCost::BatchDelete.units(), 50);
        assert_eq!(QuotaCost::Custom(100).units(), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_immediate_when_bucket_full() {
        let limiter = QuotaRateLimiter::with_config(100.0, 100.0);
        let start = Instant::now();

        limiter.acquire(QuotaCost::ListMessages).await;

        assert_eq!(start.elapsed(), Duration::ZERO);
        let stats = limiter.stats().await;
        assert_eq!(stats.total_operations, 1);
        assert_eq!(stats.total_consumed, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_refill() {
        let limiter = QuotaRateLimiter::with_config(100.0, 10.0);

        limiter.acquire(QuotaCost::ListMessages).await;
        limiter.acquire(QuotaCost::ListMessages).await;

        let start = Instant::now();
        limiter.acquire(QuotaCost::ListMessages).await;

        // 5 units at 100 units/s
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_request_waits_for_full_bucket() {
        let limiter = QuotaRateLimiter::with_config(10.0, 20.0);
        limiter.acquire(QuotaCost::Custom(20)).await;

        let start = Instant::now();
        limiter.acquire(QuotaCost::BatchModify).await;
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clone_shares_state() {
        let limiter = QuotaRateLimiter::with_config(100.0, 100.0);
        let shared = limiter.clone();

        limiter.acquire(QuotaCost::BatchModify).await;

        let stats = shared.stats().await;
        assert_eq!(stats.total_operations, 1);
        assert_eq!(stats.total_consumed, 50);
    }
}
