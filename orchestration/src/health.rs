//! Provider health tracking and circuit breaking.
//!
//! The tracker counts consecutive failures per provider. When failures reach
//! a configurable threshold the circuit *opens* and the provider is skipped
//! until `cooldown_until`. There are no timers: expiry is evaluated lazily on
//! the next availability check, which moves the circuit back to closed and
//! marks the provider as *probing*. A failure while probing reopens the
//! circuit immediately; a success clears everything.
//!
//! State lives behind a mutex so one tracker can be shared (`Arc`) across
//! every router and worker in the process.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Circuit breaker state for a single provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Healthy; requests allowed.
    Closed,
    /// Tripped; requests blocked until cooldown expires.
    Open,
    /// Cooldown expired; the next request is a probe.
    HalfOpen,
}

/// Stored health of one provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthState {
    pub consecutive_failures: u32,
    pub last_failure: Option<DateTime<Utc>>,
    /// Always strictly in the future when set.
    pub cooldown_until: Option<DateTime<Utc>>,
    /// Set when a cooldown has lapsed and no call has succeeded since.
    pub probing: bool,
}

/// Shortest cooldown an open circuit can have.
pub const MIN_COOLDOWN: Duration = Duration::from_millis(1);

/// Per-provider circuit breaker shared across pipeline invocations.
#[derive(Debug)]
pub struct HealthTracker {
    states: Mutex<HashMap<String, HealthState>>,
    failure_threshold: u32,
    cooldown: chrono::Duration,
}

impl HealthTracker {
    /// `cooldown` is raised to at least [`MIN_COOLDOWN`] so an open circuit
    /// always expires strictly after it opened.
    pub fn new(failure_threshold: u32, cooldown: Duration) -> Self {
        let cooldown = chrono::Duration::from_std(cooldown.max(MIN_COOLDOWN))
            .unwrap_or_else(|_| chrono::Duration::seconds(i64::from(u32::MAX)));
        Self {
            states: Mutex::new(HashMap::new()),
            failure_threshold: failure_threshold.max(1),
            cooldown,
        }
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, HealthState>> {
        // Counters stay consistent even if a holder panicked mid-update.
        self.states.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a success: resets the streak and closes the circuit.
    pub fn record_success(&self, provider: &str) {
        let mut states = self.lock();
        if let Some(state) = states.get_mut(provider) {
            if state.cooldown_until.is_some() || state.probing {
                info!(provider, "provider recovered, circuit closed");
            }
            *state = HealthState::default();
        }
    }

    /// Record a failure; may open the circuit.
    pub fn record_failure(&self, provider: &str) {
        self.record_failure_at(provider, Utc::now());
    }

    pub fn record_failure_at(&self, provider: &str, now: DateTime<Utc>) {
        let mut states = self.lock();
        let state = states.entry(provider.to_string()).or_default();
        if state.cooldown_until.is_some_and(|until| now >= until) {
            state.cooldown_until = None;
            state.probing = true;
        }
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        state.last_failure = Some(now);

        let trip = state.probing || state.consecutive_failures >= self.failure_threshold;
        if trip && state.cooldown_until.is_none() {
            let until = now + self.cooldown;
            warn!(
                provider,
                failures = state.consecutive_failures,
                probing = state.probing,
                cooldown_until = %until,
                "circuit opened"
            );
            state.cooldown_until = Some(until);
            state.probing = false;
        }
    }

    /// Whether the provider may be called now.
    pub fn is_available(&self, provider: &str) -> bool {
        self.is_available_at(provider, Utc::now())
    }

    /// Lazily expires a lapsed cooldown: the circuit closes with a reset
    /// count and the provider is marked as probing.
    pub fn is_available_at(&self, provider: &str, now: DateTime<Utc>) -> bool {
        let mut states = self.lock();
        let Some(state) = states.get_mut(provider) else {
            return true;
        };
        match state.cooldown_until {
            None => true,
            Some(until) if now >= until => {
                info!(provider, "cooldown elapsed, circuit half-open");
                state.cooldown_until = None;
                state.consecutive_failures = 0;
                state.probing = true;
                true
            }
            Some(_) => false,
        }
    }

    /// Current state without mutating anything.
    pub fn state(&self, provider: &str) -> CircuitState {
        self.state_at(provider, Utc::now())
    }

    pub fn state_at(&self, provider: &str, now: DateTime<Utc>) -> CircuitState {
        let states = self.lock();
        match states.get(provider) {
            None => CircuitState::Closed,
            Some(state) => match state.cooldown_until {
                Some(until) if now < until => CircuitState::Open,
                Some(_) => CircuitState::HalfOpen,
                None if state.probing => CircuitState::HalfOpen,
                None => CircuitState::Closed,
            },
        }
    }

    /// Consecutive failures recorded for `provider`.
    pub fn failure_count(&self, provider: &str) -> u32 {
        self.lock()
            .get(provider)
            .map(|s| s.consecutive_failures)
            .unwrap_or(0)
    }

    /// Copy of the stored health for diagnostics.
    pub fn snapshot(&self, provider: &str) -> HealthState {
        self.lock().get(provider).cloned().unwrap_or_default()
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(300))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn secs(n: i64) -> chrono::Duration {
        chrono::Duration::seconds(n)
    }

    #[test]
    fn circuit_starts_closed() {
        let tracker = HealthTracker::default();
        assert_eq!(tracker.state("primary"), CircuitState::Closed);
        assert!(tracker.is_available("primary"));
        assert_eq!(tracker.failure_count("primary"), 0);
    }

    #[test]
    fn circuit_opens_after_threshold() {
        let tracker = HealthTracker::new(2, Duration::from_secs(60));
        let t0 = Utc::now();
        tracker.record_failure_at("primary", t0);
        assert!(tracker.is_available_at("primary", t0));
        tracker.record_failure_at("primary", t0);
        assert_eq!(tracker.state_at("primary", t0), CircuitState::Open);
        assert!(!tracker.is_available_at("primary", t0 + secs(59)));
    }

    #[test]
    fn cooldown_is_strictly_in_the_future() {
        let tracker = HealthTracker::new(1, Duration::from_secs(1));
        let t0 = Utc::now();
        tracker.record_failure_at("p", t0);
        let until = tracker.snapshot("p").cooldown_until.unwrap();
        assert!(until > t0);
    }

    #[test]
    fn zero_cooldown_is_raised_to_the_minimum() {
        let tracker = HealthTracker::new(1, Duration::ZERO);
        let t0 = Utc::now();
        tracker.record_failure_at("primary", t0);
        assert_eq!(tracker.state_at("primary", t0), CircuitState::Open);
        assert!(!tracker.is_available_at("primary", t0));
        let until = tracker.snapshot("primary").cooldown_until.unwrap();
        assert!(until > t0);
        assert!(tracker.is_available_at("primary", t0 + chrono::Duration::milliseconds(1)));
    }

    #[test]
    fn available_again_once_cooldown_elapses() {
        let tracker = HealthTracker::new(3, Duration::from_secs(300));
        let t0 = Utc::now();
        for _ in 0..5 {
            tracker.record_failure_at("primary", t0);
        }
        assert!(!tracker.is_available_at("primary", t0 + secs(299)));
        assert!(tracker.is_available_at("primary", t0 + secs(300)));
        assert_eq!(tracker.failure_count("primary"), 0);
        assert_eq!(tracker.state_at("primary", t0 + secs(300)), CircuitState::HalfOpen);
    }

    #[test]
    fn failure_while_probing_reopens_immediately() {
        let tracker = HealthTracker::new(3, Duration::from_secs(10));
        let t0 = Utc::now();
        for _ in 0..3 {
            tracker.record_failure_at("p", t0);
        }
        let t1 = t0 + secs(10);
        assert!(tracker.is_available_at("p", t1));
        tracker.record_failure_at("p", t1);
        assert!(!tracker.is_available_at("p", t1 + secs(1)));
    }

    #[test]
    fn success_resets_any_streak() {
        let tracker = HealthTracker::new(5, Duration::from_secs(60));
        for _ in 0..4 {
            tracker.record_failure("p");
        }
        assert_eq!(tracker.failure_count("p"), 4);
        tracker.record_success("p");
        assert_eq!(tracker.failure_count("p"), 0);
        assert_eq!(tracker.snapshot("p"), HealthState::default());
    }

    #[test]
    fn success_closes_an_open_circuit() {
        let tracker = HealthTracker::new(1, Duration::from_secs(600));
        tracker.record_failure("p");
        assert_eq!(tracker.state("p"), CircuitState::Open);
        tracker.record_success("p");
        assert_eq!(tracker.state("p"), CircuitState::Closed);
        assert!(tracker.is_available("p"));
    }

    #[test]
    fn providers_are_isolated() {
        let tracker = HealthTracker::new(1, Duration::from_secs(600));
        tracker.record_failure("primary");
        assert!(!tracker.is_available("primary"));
        assert!(tracker.is_available("fallback"));
    }

    #[test]
    fn shared_across_threads() {
        let tracker = Arc::new(HealthTracker::new(100, Duration::from_secs(60)));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let t = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        t.record_failure("shared");
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(tracker.failure_count("shared"), 40);
    }
}
