//! A tiny shared token bucket: one permit per `interval`, enforced across
//! every in-flight caller (spec.md §5 — "a shared token-bucket enforces
//! this across all in-flight requests").

use std::sync::Mutex;
use std::time::{Duration, Instant};

pub struct TokenBucket {
    interval: Duration,
    next_slot: Mutex<Instant>,
}

impl TokenBucket {
    pub fn per_second(calls_per_second: u32) -> Self {
        let calls_per_second = calls_per_second.max(1);
        TokenBucket {
            interval: Duration::from_secs_f64(1.0 / calls_per_second as f64),
            next_slot: Mutex::new(Instant::now()),
        }
    }

    /// Blocks the caller until its turn, serializing all acquirers onto a
    /// strictly increasing schedule of slots `interval` apart.
    pub async fn acquire(&self) {
        let wait_until = {
            let mut slot = self.next_slot.lock().unwrap();
            let now = Instant::now();
            let start = (*slot).max(now);
            *slot = start + self.interval;
            start
        };

        let now = Instant::now();
        if wait_until > now {
            tokio::time::sleep(wait_until - now).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn serializes_concurrent_acquires() {
        let bucket = std::sync::Arc::new(TokenBucket::per_second(100));
        let start = Instant::now();
        let mut handles = vec![];
        for _ in 0..5 {
            let b = std::sync::Arc::clone(&bucket);
            handles.push(tokio::spawn(async move {
                b.acquire().await;
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        // 5 calls at 100/s means the 5th is gated at >= 40ms.
        assert!(start.elapsed() >= Duration::from_millis(35));
    }
}
