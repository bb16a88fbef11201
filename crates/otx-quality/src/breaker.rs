//! Process-wide provider circuit breaker.
//!
//! CLOSED counts failures over a rolling window; reaching the threshold
//! flips to OPEN. OPEN fast-fails until the open interval elapses, then
//! HALF_OPEN permits probe traffic: one success closes the circuit, one
//! failure re-opens it.
//!
//! Shared across workers behind a mutex; contention is low because the
//! lock is only taken on checks and transitions.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "CLOSED",
            BreakerState::Open => "OPEN",
            BreakerState::HalfOpen => "HALF_OPEN",
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct BreakerConfig {
    /// Failures within `window_secs` required to trip.
    pub failure_threshold: u32,
    pub window_secs: i64,
    /// How long OPEN fast-fails before probing.
    pub open_secs: i64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window_secs: 60,
            open_secs: 30,
        }
    }
}

struct Inner {
    state: BreakerState,
    failures: VecDeque<DateTime<Utc>>,
    opened_at: Option<DateTime<Utc>>,
}

pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failures: VecDeque::new(),
                opened_at: None,
            }),
        }
    }

    /// Current state, applying the OPEN → HALF_OPEN timeout transition.
    pub fn state(&self, now: DateTime<Utc>) -> BreakerState {
        let mut inner = self.lock();
        if inner.state == BreakerState::Open {
            if let Some(opened) = inner.opened_at {
                if (now - opened).num_seconds() >= self.config.open_secs {
                    inner.state = BreakerState::HalfOpen;
                }
            }
        }
        inner.state
    }

    /// True when callers should fast-fail instead of hitting the provider.
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.state(now) == BreakerState::Open
    }

    /// Record a provider failure; may trip the circuit.
    pub fn record_failure(&self, now: DateTime<Utc>) {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::HalfOpen => {
                // Probe failed; straight back to OPEN.
                inner.state = BreakerState::Open;
                inner.opened_at = Some(now);
                inner.failures.clear();
                warn!("provider circuit re-opened after failed probe");
            }
            BreakerState::Open => {}
            BreakerState::Closed => {
                inner.failures.push_back(now);
                let cutoff = now - chrono::Duration::seconds(self.config.window_secs);
                while inner.failures.front().map(|t| *t < cutoff).unwrap_or(false) {
                    inner.failures.pop_front();
                }
                if inner.failures.len() as u32 >= self.config.failure_threshold {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(now);
                    inner.failures.clear();
                    warn!(
                        threshold = self.config.failure_threshold,
                        "provider circuit opened"
                    );
                }
            }
        }
    }

    /// Record a provider success; closes from HALF_OPEN.
    pub fn record_success(&self, _now: DateTime<Utc>) {
        let mut inner = self.lock();
        if inner.state == BreakerState::HalfOpen {
            inner.state = BreakerState::Closed;
            inner.opened_at = None;
        }
        inner.failures.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 11, 0, 0).unwrap()
    }

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(BreakerConfig {
            failure_threshold: 5,
            window_secs: 60,
            open_secs: 30,
        })
    }

    #[test]
    fn stays_closed_below_threshold() {
        let b = breaker();
        for i in 0..4 {
            b.record_failure(t0() + chrono::Duration::seconds(i));
        }
        assert_eq!(b.state(t0() + chrono::Duration::seconds(5)), BreakerState::Closed);
    }

    #[test]
    fn threshold_failure_flips_open() {
        let b = breaker();
        for i in 0..4 {
            b.record_failure(t0() + chrono::Duration::seconds(i));
        }
        assert_eq!(b.state(t0() + chrono::Duration::seconds(4)), BreakerState::Closed);
        // The next (fifth) failure trips it.
        b.record_failure(t0() + chrono::Duration::seconds(5));
        assert_eq!(b.state(t0() + chrono::Duration::seconds(6)), BreakerState::Open);
    }

    #[test]
    fn rolling_window_expires_old_failures() {
        let b = breaker();
        // Four failures early in the window.
        for i in 0..4 {
            b.record_failure(t0() + chrono::Duration::seconds(i));
        }
        // A fifth failure 2 minutes later: the first four have rolled off.
        b.record_failure(t0() + chrono::Duration::seconds(120));
        assert_eq!(
            b.state(t0() + chrono::Duration::seconds(121)),
            BreakerState::Closed
        );
    }

    #[test]
    fn open_becomes_half_open_after_interval() {
        let b = breaker();
        for i in 0..5 {
            b.record_failure(t0() + chrono::Duration::seconds(i));
        }
        let opened = t0() + chrono::Duration::seconds(4);
        assert_eq!(b.state(opened + chrono::Duration::seconds(29)), BreakerState::Open);
        assert_eq!(
            b.state(opened + chrono::Duration::seconds(30)),
            BreakerState::HalfOpen
        );
    }

    #[test]
    fn half_open_probe_success_closes() {
        let b = breaker();
        for i in 0..5 {
            b.record_failure(t0() + chrono::Duration::seconds(i));
        }
        let probe_time = t0() + chrono::Duration::seconds(40);
        assert_eq!(b.state(probe_time), BreakerState::HalfOpen);
        b.record_success(probe_time);
        assert_eq!(b.state(probe_time), BreakerState::Closed);
    }

    #[test]
    fn half_open_probe_failure_reopens() {
        let b = breaker();
        for i in 0..5 {
            b.record_failure(t0() + chrono::Duration::seconds(i));
        }
        let probe_time = t0() + chrono::Duration::seconds(40);
        assert_eq!(b.state(probe_time), BreakerState::HalfOpen);
        b.record_failure(probe_time);
        assert_eq!(b.state(probe_time), BreakerState::Open);
        // And the open interval restarts from the probe failure.
        assert_eq!(
            b.state(probe_time + chrono::Duration::seconds(29)),
            BreakerState::Open
        );
        assert_eq!(
            b.state(probe_time + chrono::Duration::seconds(30)),
            BreakerState::HalfOpen
        );
    }
}
