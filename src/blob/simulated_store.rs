//! Simulated blob backend with fault injection
//!
//! Wraps another backend and injects failures and latency from a seeded RNG,
//! so a failing run can be replayed from its seed. Attempt counters double as
//! a way to observe how many effectful calls reached the store.

use super::object_store::{BlobBackend, BlobFuture};
use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::io::{Error as IoError, ErrorKind};
use std::sync::Arc;
use std::time::Duration;

/// Configuration for simulated fault injection
#[derive(Debug, Clone)]
pub struct SimulatedBlobConfig {
    /// Probability of PUT failure
    pub put_fail_prob: f64,
    /// Probability of GET failure
    pub get_fail_prob: f64,
    /// Probability of DELETE failure
    pub delete_fail_prob: f64,
    /// Simulated latency range in microseconds (min, max)
    pub latency_range_us: (u64, u64),
}

impl Default for SimulatedBlobConfig {
    fn default() -> Self {
        SimulatedBlobConfig {
            put_fail_prob: 0.01,
            get_fail_prob: 0.01,
            delete_fail_prob: 0.01,
            latency_range_us: (50, 2_000),
        }
    }
}

impl SimulatedBlobConfig {
    /// No faults, no latency
    pub fn no_faults() -> Self {
        SimulatedBlobConfig {
            put_fail_prob: 0.0,
            get_fail_prob: 0.0,
            delete_fail_prob: 0.0,
            latency_range_us: (0, 0),
        }
    }

    pub fn high_chaos() -> Self {
        SimulatedBlobConfig {
            put_fail_prob: 0.10,
            get_fail_prob: 0.05,
            delete_fail_prob: 0.10,
            latency_range_us: (100, 5_000),
        }
    }

    /// No faults, fixed latency. Keeps calls suspended long enough to overlap.
    pub fn slow(latency: Duration) -> Self {
        let us = latency.as_micros() as u64;
        SimulatedBlobConfig {
            latency_range_us: (us, us),
            ..Self::no_faults()
        }
    }
}

/// Statistics for fault injection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulatedBlobStats {
    pub put_attempts: u64,
    pub put_failures: u64,
    pub get_attempts: u64,
    pub get_failures: u64,
    pub delete_attempts: u64,
    pub delete_failures: u64,
}

struct SimulatedState {
    rng: ChaCha8Rng,
    config: SimulatedBlobConfig,
    stats: SimulatedBlobStats,
}

impl SimulatedState {
    fn roll(&mut self, prob: f64) -> bool {
        prob > 0.0 && self.rng.gen_bool(prob.min(1.0))
    }

    fn latency(&mut self) -> Option<Duration> {
        let (min, max) = self.config.latency_range_us;
        let us = if max > min {
            self.rng.gen_range(min..max)
        } else {
            min
        };
        (us > 0).then(|| Duration::from_micros(us))
    }
}

/// Blob backend that wraps another backend and injects faults
#[derive(Clone)]
pub struct SimulatedBlobBackend<B: BlobBackend> {
    inner: B,
    state: Arc<Mutex<SimulatedState>>,
}

#[derive(Clone, Copy)]
enum Op {
    Put,
    Get,
    Delete,
}

impl<B: BlobBackend> SimulatedBlobBackend<B> {
    pub fn new(inner: B, seed: u64, config: SimulatedBlobConfig) -> Self {
        SimulatedBlobBackend {
            inner,
            state: Arc::new(Mutex::new(SimulatedState {
                rng: ChaCha8Rng::seed_from_u64(seed),
                config,
                stats: SimulatedBlobStats::default(),
            })),
        }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    pub fn stats(&self) -> SimulatedBlobStats {
        self.state.lock().stats.clone()
    }

    pub fn reset_stats(&self) {
        self.state.lock().stats = SimulatedBlobStats::default();
    }

    /// Swap fault probabilities mid-run (e.g. to heal the store)
    pub fn set_config(&self, config: SimulatedBlobConfig) {
        self.state.lock().config = config;
    }

    /// Record the attempt, decide on failure, and pick a latency
    fn admit(&self, op: Op) -> (bool, Option<Duration>) {
        let mut s = self.state.lock();
        let prob = match op {
            Op::Put => {
                s.stats.put_attempts += 1;
                s.config.put_fail_prob
            }
            Op::Get => {
                s.stats.get_attempts += 1;
                s.config.get_fail_prob
            }
            Op::Delete => {
                s.stats.delete_attempts += 1;
                s.config.delete_fail_prob
            }
        };
        let fail = s.roll(prob);
        if fail {
            match op {
                Op::Put => s.stats.put_failures += 1,
                Op::Get => s.stats.get_failures += 1,
                Op::Delete => s.stats.delete_failures += 1,
            }
        }
        (fail, s.latency())
    }
}

async fn simulate_latency(latency: Option<Duration>) {
    if let Some(d) = latency {
        tokio::time::sleep(d).await;
    }
}

impl<B: BlobBackend> BlobBackend for SimulatedBlobBackend<B> {
    fn put<'a>(&'a self, key: &'a str, data: &'a [u8]) -> BlobFuture<'a, ()> {
        Box::pin(async move {
            let (fail, latency) = self.admit(Op::Put);
            simulate_latency(latency).await;
            if fail {
                return Err(IoError::new(ErrorKind::Other, "simulated put failure"));
            }
            self.inner.put(key, data).await
        })
    }

    fn get<'a>(&'a self, key: &'a str) -> BlobFuture<'a, Vec<u8>> {
        Box::pin(async move {
            let (fail, latency) = self.admit(Op::Get);
            simulate_latency(latency).await;
            if fail {
                return Err(IoError::new(ErrorKind::Other, "simulated get failure"));
            }
            self.inner.get(key).await
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> BlobFuture<'a, ()> {
        Box::pin(async move {
            let (fail, latency) = self.admit(Op::Delete);
            simulate_latency(latency).await;
            if fail {
                return Err(IoError::new(ErrorKind::Other, "simulated delete failure"));
            }
            self.inner.delete(key).await
        })
    }

    fn exists<'a>(&'a self, key: &'a str) -> BlobFuture<'a, bool> {
        self.inner.exists(key)
    }

    fn list<'a>(&'a self, prefix: &'a str) -> BlobFuture<'a, Vec<String>> {
        self.inner.list(prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::InMemoryBlobBackend;

    #[tokio::test]
    async fn test_no_faults() {
        let store = SimulatedBlobBackend::new(
            InMemoryBlobBackend::new(),
            42,
            SimulatedBlobConfig::no_faults(),
        );

        store.put("key1", b"value1").await.unwrap();
        assert_eq!(store.get("key1").await.unwrap(), b"value1");

        let stats = store.stats();
        assert_eq!(stats.put_attempts, 1);
        assert_eq!(stats.put_failures, 0);
        assert_eq!(stats.get_attempts, 1);
    }

    #[tokio::test]
    async fn test_deterministic_per_seed() {
        let config = SimulatedBlobConfig {
            put_fail_prob: 0.5,
            ..SimulatedBlobConfig::no_faults()
        };
        let a = SimulatedBlobBackend::new(InMemoryBlobBackend::new(), 12345, config.clone());
        let b = SimulatedBlobBackend::new(InMemoryBlobBackend::new(), 12345, config);

        let mut ra = Vec::new();
        let mut rb = Vec::new();
        for i in 0..20 {
            ra.push(a.put(&format!("k{}", i), b"d").await.is_ok());
            rb.push(b.put(&format!("k{}", i), b"d").await.is_ok());
        }
        assert_eq!(ra, rb, "Same seed must inject the same faults");
    }

    #[tokio::test]
    async fn test_always_fail() {
        let store = SimulatedBlobBackend::new(
            InMemoryBlobBackend::new(),
            7,
            SimulatedBlobConfig {
                put_fail_prob: 1.0,
                ..SimulatedBlobConfig::no_faults()
            },
        );
        assert!(store.put("k", b"v").await.is_err());
        assert!(store.inner().is_empty());
        assert_eq!(store.stats().put_failures, 1);

        store.set_config(SimulatedBlobConfig::no_faults());
        store.put("k", b"v").await.unwrap();
        assert_eq!(store.inner().len(), 1);
    }
}
