//! Sliding-window rate limiter
//!
//! Bounds both the number of requests and their summed estimated cost
//! (e.g. tokens) within a rolling window. Callers reserve an estimate up
//! front and later correct it with the actual cost.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Rate limiter tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Length of the rolling window
    #[serde(with = "strata_common::serde_ms")]
    pub window: Duration,
    /// Maximum requests per window
    pub max_requests: u32,
    /// Maximum summed cost per window
    pub max_cost: u64,
    /// Longest single sleep while waiting for headroom
    #[serde(with = "strata_common::serde_ms")]
    pub poll_interval: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            max_requests: 50,
            max_cost: 100_000,
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// A granted slot in the current window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    id: u64,
    estimated_cost: u64,
}

impl Reservation {
    /// Cost reserved at acquisition time
    #[inline]
    #[must_use]
    pub fn estimated_cost(&self) -> u64 {
        self.estimated_cost
    }
}

/// Current window occupancy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RateLimitUsage {
    /// Requests counted in the window
    pub requests: u32,
    /// Summed cost in the window
    pub cost: u64,
}

#[derive(Debug)]
struct Slot {
    id: u64,
    at: Instant,
    cost: u64,
}

/// Request-count and cost limiter over a rolling window
#[derive(Debug)]
pub struct RateLimiter {
    name: String,
    config: RateLimitConfig,
    slots: Mutex<VecDeque<Slot>>,
    next_id: AtomicU64,
}

impl RateLimiter {
    /// Create a limiter
    #[must_use]
    pub fn new(name: impl Into<String>, config: RateLimitConfig) -> Self {
        Self {
            name: name.into(),
            config,
            slots: Mutex::new(VecDeque::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Dependency name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait until both budgets have room for `estimated_cost`, then reserve it.
    ///
    /// A request whose estimate alone exceeds `max_cost` is admitted once the
    /// window is empty.
    pub async fn acquire(&self, estimated_cost: u64) -> Reservation {
        let mut waited = false;
        loop {
            match self.try_reserve(estimated_cost) {
                Ok(reservation) => {
                    if waited {
                        tracing::debug!(limiter = %self.name, estimated_cost, "rate limit headroom available");
                    }
                    return reservation;
                }
                Err(wait) => {
                    if !waited {
                        tracing::debug!(
                            limiter = %self.name,
                            estimated_cost,
                            wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                            "rate limit reached, waiting"
                        );
                        waited = true;
                    }
                    let nap = wait
                        .min(self.config.poll_interval)
                        .max(Duration::from_millis(1));
                    tokio::time::sleep(nap).await;
                }
            }
        }
    }

    /// Reserve without waiting
    #[must_use]
    pub fn try_acquire(&self, estimated_cost: u64) -> Option<Reservation> {
        self.try_reserve(estimated_cost).ok()
    }

    /// Replace a reservation's estimated cost with the actual one
    pub fn record_actual(&self, reservation: &Reservation, actual_cost: u64) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.iter_mut().find(|s| s.id == reservation.id) {
            slot.cost = actual_cost;
        }
    }

    /// Give a reservation's slot back, as if it had never been granted
    pub fn release(&self, reservation: &Reservation) {
        let mut slots = self.slots.lock();
        if let Some(pos) = slots.iter().position(|s| s.id == reservation.id) {
            slots.remove(pos);
        }
    }

    /// Occupancy of the current window
    #[must_use]
    pub fn usage(&self) -> RateLimitUsage {
        let mut slots = self.slots.lock();
        self.roll_off(&mut slots, Instant::now());
        Self::summarize(&slots)
    }

    fn try_reserve(&self, estimated_cost: u64) -> Result<Reservation, Duration> {
        let now = Instant::now();
        let mut slots = self.slots.lock();
        self.roll_off(&mut slots, now);

        let usage = Self::summarize(&slots);
        let count_ok = usage.requests < self.config.max_requests;
        let cost_ok =
            slots.is_empty() || usage.cost.saturating_add(estimated_cost) <= self.config.max_cost;

        if count_ok && cost_ok {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            slots.push_back(Slot {
                id,
                at: now,
                cost: estimated_cost,
            });
            return Ok(Reservation { id, estimated_cost });
        }

        let wait = slots
            .front()
            .map_or(self.config.poll_interval, |oldest| {
                (oldest.at + self.config.window).saturating_duration_since(now)
            });
        Err(wait)
    }

    fn roll_off(&self, slots: &mut VecDeque<Slot>, now: Instant) {
        while let Some(front) = slots.front() {
            if now.saturating_duration_since(front.at) >= self.config.window {
                slots.pop_front();
            } else {
                break;
            }
        }
    }

    fn summarize(slots: &VecDeque<Slot>) -> RateLimitUsage {
        RateLimitUsage {
            requests: u32::try_from(slots.len()).unwrap_or(u32::MAX),
            cost: slots.iter().map(|s| s.cost).sum(),
        }
    }
}
