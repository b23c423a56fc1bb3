use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Fixed requests-per-interval throttle for calls to upstream quota-bound
/// services (search queries, scrape fetches). Works independently of the
/// worker-pool concurrency bound: a pool of four workers still only issues
/// what the bucket refills.
#[derive(Clone, Debug)]
pub struct Throttle {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    capacity: f64,
    period: Duration,
    // current tokens and time of last refill
    bucket: Mutex<(f64, Instant)>,
}

impl Throttle {
    pub fn new(requests: u32, per: Duration) -> Self {
        let capacity = f64::from(requests.max(1));
        Self {
            inner: Arc::new(Inner {
                capacity,
                period: per,
                bucket: Mutex::new((capacity, Instant::now())),
            }),
        }
    }

    /// Wait until a request token is available and consume it.
    pub async fn acquire(&self) {
        // Token bucket: refill continuously, wait until one token accumulates
        loop {
            let mut guard = self.inner.bucket.lock().await;
            let (ref mut tokens, ref mut last) = *guard;
            let now = Instant::now();
            let elapsed = now.duration_since(*last).as_secs_f64();
            let refill_rate = self.inner.capacity / self.inner.period.as_secs_f64();
            *tokens = (*tokens + elapsed * refill_rate).min(self.inner.capacity);
            *last = now;
            if *tokens >= 1.0 {
                *tokens -= 1.0;
                return;
            }
            let need = 1.0 - *tokens;
            let secs = need / refill_rate;
            drop(guard);
            tokio::time::sleep(Duration::from_secs_f64(secs.max(0.001))).await;
        }
    }
}
