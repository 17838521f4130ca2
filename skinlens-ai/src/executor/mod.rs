//! Fallback executor - runs eligible providers under the tier's policy
//!
//! - `basic` / `enhanced`: sequential fallback, first success wins
//! - `clinical`: bounded concurrent fan-out, every success before the
//!   overall deadline is collected
//!
//! Each call is bounded by the per-provider timeout and the remaining overall
//! deadline. Calls still running at the deadline are dropped (cancelled) and
//! counted as timeouts. Failures never escape; an outcome with zero
//! successes tells the caller to use the fallback producer.

pub mod circuit_breaker;

use crate::fusion::Contribution;
use crate::providers::{ProviderDescriptor, ProviderFailure, ProviderParams};
use crate::types::{AnalysisRequest, ImageHandle, ProviderResult};
use circuit_breaker::{BreakerPolicy, CircuitBreaker};
use futures::stream::{FuturesUnordered, StreamExt};
use skinlens_common::events::{AnalysisEvent, EventBus};
use skinlens_common::time::{elapsed_ms, now};
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// What happened to one provider during a request
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Succeeded,
    Failed(ProviderFailure),
    /// Excluded by an open circuit, never invoked
    CircuitOpen,
    /// Still running at the overall deadline
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttemptRecord {
    pub provider: String,
    pub outcome: AttemptOutcome,
    pub elapsed_ms: u64,
}

/// Result of running one request's providers
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub successes: Vec<Contribution>,
    /// Target ensemble size (1 for sequential)
    pub requested: usize,
    /// Ordered attempt log
    pub attempts: Vec<AttemptRecord>,
}

impl ExecutionOutcome {
    fn empty(requested: usize) -> Self {
        Self {
            successes: Vec::new(),
            requested,
            attempts: Vec::new(),
        }
    }

    /// Number of providers actually invoked
    pub fn invoked(&self) -> usize {
        self.attempts
            .iter()
            .filter(|a| a.outcome != AttemptOutcome::CircuitOpen)
            .count()
    }
}

pub struct ProviderExecutor {
    breaker: CircuitBreaker,
    provider_timeout: Duration,
    overall_deadline: Duration,
    clinical_fanout: usize,
    event_bus: EventBus,
}

impl ProviderExecutor {
    pub fn new(
        provider_timeout: Duration,
        overall_deadline: Duration,
        clinical_fanout: usize,
        breaker_policy: BreakerPolicy,
        event_bus: EventBus,
    ) -> Self {
        Self {
            breaker: CircuitBreaker::new(breaker_policy),
            provider_timeout,
            overall_deadline,
            clinical_fanout: clinical_fanout.max(1),
            event_bus,
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Run `eligible` (already in priority order) for `request`, with the
    /// overall deadline starting now
    pub async fn execute(
        &self,
        eligible: &[ProviderDescriptor],
        request: &AnalysisRequest,
    ) -> ExecutionOutcome {
        self.execute_until(eligible, request, Instant::now() + self.overall_deadline)
            .await
    }

    /// Run `eligible` for `request`, cancelling whatever is still running at `deadline`
    pub async fn execute_until(
        &self,
        eligible: &[ProviderDescriptor],
        request: &AnalysisRequest,
        deadline: Instant,
    ) -> ExecutionOutcome {
        let params = ProviderParams::from(request);
        if request.tier().is_ensemble() {
            self.fan_out(eligible, request.image(), &params, deadline).await
        } else {
            self.sequential(eligible, request.image(), &params, deadline)
                .await
        }
    }

    async fn sequential(
        &self,
        eligible: &[ProviderDescriptor],
        image: &ImageHandle,
        params: &ProviderParams,
        deadline: Instant,
    ) -> ExecutionOutcome {
        let mut outcome = ExecutionOutcome::empty(1);

        for descriptor in eligible {
            // Checked before the breaker so a half-open trial is never admitted and then skipped
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!("Overall provider deadline elapsed before trying {}", descriptor.name);
                break;
            }

            if !self.breaker.allows(&descriptor.name) {
                debug!(provider = %descriptor.name, "Skipping provider, circuit open");
                outcome.attempts.push(AttemptRecord {
                    provider: descriptor.name.clone(),
                    outcome: AttemptOutcome::CircuitOpen,
                    elapsed_ms: 0,
                });
                continue;
            }

            let call_timeout = self.provider_timeout.min(remaining);

            self.emit_attempt(descriptor, params);
            let start = std::time::Instant::now();
            let result = invoke_bounded(descriptor, image, params, call_timeout).await;
            let elapsed = elapsed_ms(start);

            match result {
                Ok(result) => {
                    self.record_success(descriptor, &result, elapsed);
                    outcome.attempts.push(AttemptRecord {
                        provider: descriptor.name.clone(),
                        outcome: AttemptOutcome::Succeeded,
                        elapsed_ms: elapsed,
                    });
                    outcome.successes.push(contribution(descriptor, result));
                    break;
                }
                Err(failure) => {
                    self.record_failure(descriptor, &failure);
                    let cut_by_deadline = failure == ProviderFailure::Timeout
                        && call_timeout < self.provider_timeout;
                    outcome.attempts.push(AttemptRecord {
                        provider: descriptor.name.clone(),
                        outcome: if cut_by_deadline {
                            AttemptOutcome::Cancelled
                        } else {
                            AttemptOutcome::Failed(failure)
                        },
                        elapsed_ms: elapsed,
                    });
                    if cut_by_deadline {
                        break;
                    }
                }
            }
        }

        outcome
    }

    async fn fan_out(
        &self,
        eligible: &[ProviderDescriptor],
        image: &ImageHandle,
        params: &ProviderParams,
        deadline: Instant,
    ) -> ExecutionOutcome {
        let requested = self.clinical_fanout.min(eligible.len());
        let mut outcome = ExecutionOutcome::empty(requested);

        let mut admitted: Vec<&ProviderDescriptor> = Vec::with_capacity(requested);
        for descriptor in eligible {
            if admitted.len() == requested {
                break;
            }
            if self.breaker.allows(&descriptor.name) {
                admitted.push(descriptor);
            } else {
                debug!(provider = %descriptor.name, "Excluding provider from ensemble, circuit open");
                outcome.attempts.push(AttemptRecord {
                    provider: descriptor.name.clone(),
                    outcome: AttemptOutcome::CircuitOpen,
                    elapsed_ms: 0,
                });
            }
        }

        if admitted.is_empty() {
            return outcome;
        }

        // The deadline arm below cancels calls that outlive the overall deadline
        let call_timeout = self.provider_timeout;
        info!(
            providers = ?admitted.iter().map(|d| d.name.as_str()).collect::<Vec<_>>(),
            requested,
            "Fanning out clinical analysis"
        );

        let mut pending: FuturesUnordered<_> = admitted
            .iter()
            .map(|descriptor| {
                self.emit_attempt(descriptor, params);
                async move {
                    let start = std::time::Instant::now();
                    let result = invoke_bounded(descriptor, image, params, call_timeout).await;
                    (*descriptor, result, elapsed_ms(start))
                }
            })
            .collect();

        let mut finished: HashSet<String> = HashSet::new();
        let started = std::time::Instant::now();
        let sleep = tokio::time::sleep_until(deadline);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                next = pending.next() => {
                    let Some((descriptor, result, elapsed)) = next else {
                        break;
                    };
                    finished.insert(descriptor.name.clone());
                    match result {
                        Ok(result) => {
                            self.record_success(descriptor, &result, elapsed);
                            outcome.attempts.push(AttemptRecord {
                                provider: descriptor.name.clone(),
                                outcome: AttemptOutcome::Succeeded,
                                elapsed_ms: elapsed,
                            });
                            outcome.successes.push(contribution(descriptor, result));
                        }
                        Err(failure) => {
                            self.record_failure(descriptor, &failure);
                            outcome.attempts.push(AttemptRecord {
                                provider: descriptor.name.clone(),
                                outcome: AttemptOutcome::Failed(failure),
                                elapsed_ms: elapsed,
                            });
                        }
                    }
                }
                _ = &mut sleep => {
                    warn!("Overall provider deadline elapsed, cancelling in-flight calls");
                    break;
                }
            }
        }

        // Dropping the stream cancels whatever is still running
        drop(pending);
        let elapsed = elapsed_ms(started);
        for descriptor in admitted {
            if !finished.contains(&descriptor.name) {
                self.record_failure(descriptor, &ProviderFailure::Timeout);
                outcome.attempts.push(AttemptRecord {
                    provider: descriptor.name.clone(),
                    outcome: AttemptOutcome::Cancelled,
                    elapsed_ms: elapsed,
                });
            }
        }

        outcome
    }

    fn emit_attempt(&self, descriptor: &ProviderDescriptor, params: &ProviderParams) {
        debug!(provider = %descriptor.name, tier = %params.tier, "Invoking provider");
        self.event_bus.emit_lossy(AnalysisEvent::ProviderAttempted {
            provider: descriptor.name.clone(),
            tier: params.tier.to_string(),
            timestamp: now(),
        });
    }

    fn record_success(&self, descriptor: &ProviderDescriptor, result: &ProviderResult, elapsed: u64) {
        self.breaker.record_success(&descriptor.name);
        info!(
            provider = %descriptor.name,
            elapsed_ms = elapsed,
            metrics = result.severity.len(),
            "Provider succeeded"
        );
    }

    fn record_failure(&self, descriptor: &ProviderDescriptor, failure: &ProviderFailure) {
        warn!(
            provider = %descriptor.name,
            kind = failure.kind(),
            "Provider failed: {}",
            failure
        );
        self.event_bus.emit_lossy(AnalysisEvent::ProviderFailed {
            provider: descriptor.name.clone(),
            kind: failure.kind().to_string(),
            message: failure.to_string(),
            timestamp: now(),
        });

        let opened = match failure {
            ProviderFailure::AuthError(_) => Some(self.breaker.trip(&descriptor.name)),
            _ => self.breaker.record_failure(&descriptor.name),
        };

        if let Some(consecutive_failures) = opened {
            self.event_bus.emit_lossy(AnalysisEvent::CircuitOpened {
                provider: descriptor.name.clone(),
                consecutive_failures,
                cooldown_ms: self.breaker.policy().cooldown.as_millis() as u64,
                timestamp: now(),
            });
        }
    }
}

/// Invoke one adapter, enforcing `timeout` even if the adapter ignores it
async fn invoke_bounded(
    descriptor: &ProviderDescriptor,
    image: &ImageHandle,
    params: &ProviderParams,
    timeout: Duration,
) -> Result<ProviderResult, ProviderFailure> {
    match tokio::time::timeout(timeout, descriptor.adapter.invoke(image, params, timeout)).await {
        Ok(result) => result,
        Err(_) => Err(ProviderFailure::Timeout),
    }
}

fn contribution(descriptor: &ProviderDescriptor, mut result: ProviderResult) -> Contribution {
    // Provenance uses the registered name
    result.provider_name = descriptor.name.clone();
    Contribution {
        result,
        priority: descriptor.priority,
        baseline_accuracy: descriptor.baseline_accuracy,
    }
}
