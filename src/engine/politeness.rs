//! Per-authority politeness pacing.
//!
//! Reserves the next fetch slot for an authority under one lock, then sleeps
//! outside it, so concurrent workers against the same authority line up at
//! `delay`-spaced instants instead of racing the map.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

#[derive(Debug)]
pub struct PolitenessGate {
    delay: Duration,
    next_slot: Mutex<HashMap<String, Instant>>,
}

impl PolitenessGate {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            next_slot: Mutex::new(HashMap::new()),
        }
    }

    /// Wait until this worker may fetch from `authority`.
    pub async fn wait_turn(&self, authority: &str) {
        if self.delay.is_zero() {
            return;
        }

        let slot = {
            let mut slots = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = match slots.get(authority) {
                Some(reserved) => (*reserved).max(now),
                None => now,
            };
            slots.insert(authority.to_string(), slot + self.delay);
            slot
        };

        tokio::time::sleep_until(tokio::time::Instant::from_std(slot)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn consecutive_fetches_are_spaced_by_delay() {
        let gate = PolitenessGate::new(Duration::from_millis(40));
        let started = Instant::now();
        gate.wait_turn("example.com").await;
        gate.wait_turn("example.com").await;
        gate.wait_turn("example.com").await;
        assert!(started.elapsed() >= Duration::from_millis(80));
    }

    #[tokio::test]
    async fn authorities_do_not_block_each_other() {
        let gate = PolitenessGate::new(Duration::from_millis(200));
        let started = Instant::now();
        gate.wait_turn("a.example").await;
        gate.wait_turn("b.example").await;
        assert!(started.elapsed() < Duration::from_millis(150));
    }

    #[tokio::test]
    async fn zero_delay_never_sleeps() {
        let gate = PolitenessGate::new(Duration::ZERO);
        let started = Instant::now();
        for _ in 0..100 {
            gate.wait_turn("example.com").await;
        }
        assert!(started.elapsed() < Duration::from_millis(50));
    }
}
