//! Token-bucket throttling for control-plane requests.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use crate::controller::metrics;

/// A token bucket shared by every request a client issues.
///
/// `throttle` consumes one token, sleeping until the bucket refills when it
/// is empty. Saturation (1.0 = exhausted) is exported through the
/// `cluster_controller_rate_limiter_use` gauge on every acquisition.
pub struct RateLimiter {
    qps: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

struct Bucket {
    tokens: f64,
    refreshed: Instant,
}

impl RateLimiter {
    pub fn new(qps: f32, burst: u32) -> Self {
        let burst = f64::from(burst).max(1.0);
        Self {
            qps: f64::from(qps).max(f64::MIN_POSITIVE),
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                refreshed: Instant::now(),
            }),
        }
    }

    pub async fn throttle(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().unwrap();
                let now = Instant::now();
                let elapsed = now.duration_since(bucket.refreshed).as_secs_f64();
                bucket.tokens = (bucket.tokens + elapsed * self.qps).min(self.burst);
                bucket.refreshed = now;
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    metrics::set_rate_limiter_use(1.0 - bucket.tokens / self.burst);
                    return;
                }
                Duration::from_secs_f64((1.0 - bucket.tokens) / self.qps)
            };
            metrics::set_rate_limiter_use(1.0);
            tokio::time::sleep(wait).await;
        }
    }

    /// Fraction of the bucket currently in use.
    pub fn saturation(&self) -> f64 {
        let bucket = self.bucket.lock().unwrap();
        1.0 - bucket.tokens / self.burst
    }
}
