//! Per-provider circuit breaker
//!
//! A provider that fails `failure_threshold` times in a row within `window`
//! is excluded for `cooldown`. After the cool-down a single trial call is
//! admitted (half-open): a success closes the circuit, a failure re-opens it
//! at once. Other callers stay excluded while the trial is outstanding; a
//! trial that never reports back is replaced after another cool-down.
//!
//! Uses `tokio::time::Instant` so breaker timing follows a paused test clock.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BreakerPolicy {
    pub failure_threshold: u32,
    pub window: Duration,
    pub cooldown: Duration,
}

impl Default for BreakerPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            window: Duration::from_secs(60),
            cooldown: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Default)]
struct ProviderCircuit {
    consecutive_failures: u32,
    window_start: Option<Instant>,
    open_until: Option<Instant>,
    half_open: bool,
    trial_started: Option<Instant>,
}

#[derive(Debug, Default)]
pub struct CircuitBreaker {
    policy: BreakerPolicy,
    circuits: Mutex<HashMap<String, ProviderCircuit>>,
}

impl CircuitBreaker {
    pub fn new(policy: BreakerPolicy) -> Self {
        Self {
            policy,
            circuits: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> BreakerPolicy {
        self.policy
    }

    // Breaker state stays consistent across a panic elsewhere; recover the guard
    fn lock(&self) -> MutexGuard<'_, HashMap<String, ProviderCircuit>> {
        self.circuits.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Whether `provider` may be invoked now
    ///
    /// An expired open circuit moves to half-open and admits this call as the
    /// trial. The caller must report its outcome.
    pub fn allows(&self, provider: &str) -> bool {
        let now = Instant::now();
        let cooldown = self.policy.cooldown;
        let mut circuits = self.lock();
        let Some(circuit) = circuits.get_mut(provider) else {
            return true;
        };

        match circuit.open_until {
            Some(until) if now < until => false,
            Some(_) => {
                circuit.open_until = None;
                circuit.half_open = true;
                circuit.trial_started = Some(now);
                debug!(provider, "Circuit half-open, admitting trial call");
                true
            }
            None if circuit.half_open => match circuit.trial_started {
                Some(started) if now.duration_since(started) < cooldown => false,
                _ => {
                    circuit.trial_started = Some(now);
                    debug!(provider, "Half-open trial went stale, admitting another");
                    true
                }
            },
            None => true,
        }
    }

    pub fn is_open(&self, provider: &str) -> bool {
        self.lock()
            .get(provider)
            .and_then(|c| c.open_until)
            .map(|until| Instant::now() < until)
            .unwrap_or(false)
    }

    pub fn record_success(&self, provider: &str) {
        let mut circuits = self.lock();
        if let Some(circuit) = circuits.get_mut(provider) {
            if circuit.half_open || circuit.consecutive_failures > 0 {
                debug!(provider, "Circuit closed after success");
            }
            *circuit = ProviderCircuit::default();
        }
    }

    /// Count a failure
    ///
    /// Returns the consecutive failure count when this failure opened the circuit.
    pub fn record_failure(&self, provider: &str) -> Option<u32> {
        let now = Instant::now();
        let mut circuits = self.lock();
        let circuit = circuits.entry(provider.to_string()).or_default();

        let window_expired = circuit
            .window_start
            .map(|start| now.duration_since(start) > self.policy.window)
            .unwrap_or(true);
        if window_expired && !circuit.half_open {
            circuit.consecutive_failures = 0;
            circuit.window_start = Some(now);
        }
        circuit.consecutive_failures += 1;

        if circuit.half_open || circuit.consecutive_failures >= self.policy.failure_threshold {
            Some(Self::open(circuit, now, self.policy.cooldown, provider))
        } else {
            None
        }
    }

    /// Open the circuit immediately (credential rejection)
    pub fn trip(&self, provider: &str) -> u32 {
        let now = Instant::now();
        let mut circuits = self.lock();
        let circuit = circuits.entry(provider.to_string()).or_default();
        circuit.consecutive_failures += 1;
        Self::open(circuit, now, self.policy.cooldown, provider)
    }

    fn open(circuit: &mut ProviderCircuit, now: Instant, cooldown: Duration, provider: &str) -> u32 {
        let failures = circuit.consecutive_failures;
        circuit.open_until = Some(now + cooldown);
        circuit.half_open = false;
        circuit.trial_started = None;
        circuit.consecutive_failures = 0;
        circuit.window_start = None;
        info!(
            provider,
            consecutive_failures = failures,
            cooldown_ms = cooldown.as_millis() as u64,
            "Circuit opened"
        );
        failures
    }
}
