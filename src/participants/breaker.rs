// Copyright 2025 Felipe Torres González
//
//    Licensed under the Apache License, Version 2.0 (the "License");
//    you may not use this file except in compliance with the License.
//    You may obtain a copy of the License at
//
//        http://www.apache.org/licenses/LICENSE-2.0
//
//    Unless required by applicable law or agreed to in writing, software
//    distributed under the License is distributed on an "AS IS" BASIS,
//    WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//    See the License for the specific language governing permissions and
//    limitations under the License.

use std::{
    sync::{Mutex, MutexGuard},
    time::Duration,
};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Consecutive failures that open the breaker.
pub const FAILURE_THRESHOLD: u32 = 5;
/// Time the breaker stays open before letting a probe through.
pub const COOL_DOWN: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failures: u32,
    last_failure: Option<Instant>,
    /// Start of the probe in flight, if any.
    probe: Option<Instant>,
}

/// Circuit breaker placed in front of the chat platform.
///
/// # Description
///
/// After [FAILURE_THRESHOLD] consecutive failures the breaker opens and every request is refused
/// right away. Once the cool-down has elapsed, a single probe is let through (half-open state): a
/// success closes the breaker, a failure opens it again.
///
/// A probe that never reports back doesn't keep the breaker half-open forever. Dropping the
/// [CallPermit] of the probe lets the next caller probe again, and a probe older than the
/// cool-down is given up.
#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    threshold: u32,
    cool_down: Duration,
}

/// Permission to send a request, granted by [CircuitBreaker::try_acquire].
///
/// Report the outcome with [CircuitBreaker::record_success] or [CircuitBreaker::record_failure].
/// When the permit of a probe is dropped without a report, the probe is released.
#[derive(Debug)]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
}

impl CallPermit<'_> {
    pub fn is_probe(&self) -> bool {
        self.probe
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if self.probe {
            self.breaker.release_probe();
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        CircuitBreaker::new(FAILURE_THRESHOLD, COOL_DOWN)
    }
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cool_down: Duration) -> Self {
        CircuitBreaker {
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failures: 0,
                last_failure: None,
                probe: None,
            }),
            threshold: threshold.max(1),
            cool_down,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // The critical sections can't panic halfway, so a poisoned lock still holds valid data.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn cooled_down(&self, inner: &Inner) -> bool {
        inner
            .last_failure
            .is_none_or(|t| t.elapsed() >= self.cool_down)
    }

    /// Decide whether a request may go out. `Some(true)` when it is the probe of a half-open
    /// breaker.
    fn admit(&self) -> Option<bool> {
        let mut inner = self.lock();
        let (state, probe) = (inner.state, inner.probe);

        match state {
            CircuitState::Closed => Some(false),
            CircuitState::Open if self.cooled_down(&inner) => {
                info!("Circuit breaker half-open, letting a probe through");
                inner.state = CircuitState::HalfOpen;
                inner.probe = Some(Instant::now());
                Some(true)
            }
            CircuitState::Open => None,
            CircuitState::HalfOpen => match probe {
                Some(started) if started.elapsed() < self.cool_down => None,
                Some(started) => {
                    warn!(
                        elapsed = ?started.elapsed(),
                        "Circuit breaker probe never reported back, letting another one through"
                    );
                    inner.probe = Some(Instant::now());
                    Some(true)
                }
                None => {
                    inner.probe = Some(Instant::now());
                    Some(true)
                }
            },
        }
    }

    /// Ask for permission to send a request to the platform.
    pub fn can_execute(&self) -> bool {
        self.admit().is_some()
    }

    /// Ask for permission to send a request, getting a permit that releases the probe of a
    /// half-open breaker when it is dropped before reporting.
    pub fn try_acquire(&self) -> Option<CallPermit<'_>> {
        self.admit().map(|probe| CallPermit {
            breaker: self,
            probe,
        })
    }

    fn release_probe(&self) {
        let mut inner = self.lock();

        if inner.state == CircuitState::HalfOpen && inner.probe.take().is_some() {
            debug!("Circuit breaker probe abandoned");
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();

        if inner.state != CircuitState::Closed {
            info!("Circuit breaker closed");
        }
        inner.state = CircuitState::Closed;
        inner.failures = 0;
        inner.probe = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self.lock();

        inner.failures = inner.failures.saturating_add(1);
        inner.last_failure = Some(Instant::now());
        inner.probe = None;

        if inner.state == CircuitState::HalfOpen || inner.failures >= self.threshold {
            if inner.state != CircuitState::Open {
                warn!(
                    failures = inner.failures,
                    cool_down = ?self.cool_down,
                    "Circuit breaker opened"
                );
            }
            inner.state = CircuitState::Open;
        }
    }

    /// Current state, accounting for an elapsed cool-down.
    pub fn state(&self) -> CircuitState {
        let inner = self.lock();

        match inner.state {
            CircuitState::Open if self.cooled_down(&inner) => CircuitState::HalfOpen,
            state => state,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test(start_paused = true)]
    async fn opens_after_threshold_and_recovers() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(60));

        for _ in 0..2 {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.can_execute());

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.can_execute());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.can_execute());
        // A single probe at a time.
        assert!(!breaker.can_execute());

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.can_execute());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_probe_reopens() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(10));
        breaker.record_failure();
        assert!(breaker.is_open());

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(breaker.can_execute());
        breaker.record_failure();

        assert!(breaker.is_open());
        assert!(!breaker.can_execute());
    }

    #[test]
    fn success_resets_the_failure_streak() {
        let breaker = CircuitBreaker::default();

        for _ in 0..FAILURE_THRESHOLD - 1 {
            breaker.record_failure();
        }
        breaker.record_success();
        for _ in 0..FAILURE_THRESHOLD - 1 {
            breaker.record_failure();
        }

        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_probe_is_released() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(10));
        breaker.record_failure();
        tokio::time::advance(Duration::from_secs(11)).await;

        let permit = breaker.try_acquire().expect("The probe should be let through");
        assert!(permit.is_probe());
        assert!(breaker.try_acquire().is_none());
        drop(permit);

        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.can_execute());
    }

    #[tokio::test(start_paused = true)]
    async fn silent_probe_expires() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(10));
        breaker.record_failure();
        tokio::time::advance(Duration::from_secs(11)).await;

        assert!(breaker.can_execute());
        assert!(!breaker.can_execute());

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(breaker.can_execute());
    }

    #[test]
    fn permits_of_a_closed_breaker_are_not_probes() {
        let breaker = CircuitBreaker::default();

        let permit = breaker.try_acquire().unwrap();
        assert!(!permit.is_probe());
        drop(permit);

        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
