//! Rate Limiter
//!
//! Token-bucket admission per client identifier. Each client owns one
//! bucket, created lazily from the config store (falling back to the
//! default config on absence or store failure). A background task tops up
//! every bucket once per second so idle buckets stay close to wall time.

use crate::domain::entities::RateConfig;
use crate::domain::ports::{ConfigStore, StoreError};
use crate::infrastructure::shutdown::ShutdownController;
use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Runtime token-bucket state for one client.
struct Bucket {
    capacity: i64,
    refill_rate: f64,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(config: RateConfig) -> Self {
        Self {
            capacity: config.capacity,
            refill_rate: config.refill_rate,
            state: Mutex::new(BucketState {
                tokens: config.capacity as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Refill from elapsed time, then admit iff `cost` tokens remain.
    /// The critical section is a handful of arithmetic operations.
    fn allow(&self, cost: f64) -> bool {
        let mut state = self.state.lock().expect("bucket lock poisoned");
        self.refill_locked(&mut state);

        if state.tokens >= cost {
            state.tokens -= cost;
            true
        } else {
            false
        }
    }

    fn refill(&self) {
        let mut state = self.state.lock().expect("bucket lock poisoned");
        self.refill_locked(&mut state);
    }

    fn refill_locked(&self, state: &mut BucketState) {
        let now = Instant::now();
        // saturating_duration_since keeps a skewed clock from producing a
        // negative elapsed interval.
        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.refill_rate).min(self.capacity as f64);
        state.last_refill = now;
    }

    #[cfg(test)]
    fn tokens(&self) -> f64 {
        self.state.lock().unwrap().tokens
    }
}

/// Token-bucket rate limiter with pluggable config storage.
pub struct TokenBucket {
    buckets: DashMap<String, Arc<Bucket>>,
    store: Arc<dyn ConfigStore>,
    default_config: RateConfig,
}

impl TokenBucket {
    pub fn new(store: Arc<dyn ConfigStore>, default_config: RateConfig) -> Self {
        Self {
            buckets: DashMap::new(),
            store,
            default_config,
        }
    }

    /// Check whether a request from this client is admitted.
    ///
    /// Store errors degrade to the default config: the request is still
    /// processed, with a warning. The resolved config only matters on the
    /// first request from a client; later requests reuse the existing
    /// bucket even if the stored config has changed since.
    pub async fn allow(&self, client_id: &str) -> bool {
        let config = match self.store.get(client_id).await {
            Ok(Some(config)) => config,
            Ok(None) => self.default_config,
            Err(e) => {
                tracing::warn!(
                    client_id,
                    error = %e,
                    "config store lookup failed, using default rate config"
                );
                self.default_config
            }
        };

        let bucket = self
            .buckets
            .entry(client_id.to_string())
            .or_insert_with(|| Arc::new(Bucket::new(config)))
            .clone();

        bucket.allow(1.0)
    }

    /// Start the background refill task: every second, top up every bucket
    /// from its elapsed time. This keeps `last_refill` near wall time for
    /// idle buckets; admission would cap the same burst anyway, so the
    /// task is an optimization, not a correctness requirement.
    pub fn start_refill(self: &Arc<Self>, shutdown: &ShutdownController) {
        let limiter = self.clone();
        let mut signal = shutdown.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        for entry in limiter.buckets.iter() {
                            entry.value().refill();
                        }
                    }
                    _ = signal.recv() => {
                        tracing::info!("bucket refill task stopped");
                        return;
                    }
                }
            }
        });
    }

    /// Close the underlying config store.
    pub async fn stop(&self) -> Result<(), StoreError> {
        self.store.close().await
    }

    /// Number of distinct clients with live buckets.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}
