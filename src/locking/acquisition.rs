// Copyright 2025 dentsusoken
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::error::{LeaseError, Result};
use crate::locking::backend::{AttemptOutcome, LeaseBackend};
use crate::locking::cancellation::CancellationToken;
use crate::locking::lease::{Lease, OwnerToken, ResourceKey};
use crate::locking::timeout::LockTimeoutValue;
use crate::locking::wait_observer::{LockObserver, NoopLockObserver};
use log::{debug, trace};
use std::time::{Duration, Instant};

static NOOP_OBSERVER: NoopLockObserver = NoopLockObserver;

/// How an exhausted budget is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireMode {
    /// `lock()`: running out of time is an error.
    Blocking,
    /// `try_lock()`: running out of time under contention yields `None`.
    Bounded,
}

/// Delay between acquisition attempts. Retries use a constant interval.
#[derive(Debug, Clone)]
pub struct PollingBackoff {
    interval: Duration,
}

impl PollingBackoff {
    pub fn fixed(interval: Duration) -> Self {
        Self { interval }
    }

    pub fn next_delay(&self) -> Duration {
        self.interval
    }
}

impl Default for PollingBackoff {
    fn default() -> Self {
        Self::fixed(Duration::from_millis(100))
    }
}

/// Tracks elapsed and remaining time for a lock timeout budget.
#[derive(Debug, Clone)]
pub struct LockTimeoutBudget {
    value: LockTimeoutValue,
    started_at: Instant,
}

impl LockTimeoutBudget {
    pub fn new(value: LockTimeoutValue) -> Self {
        Self {
            value,
            started_at: Instant::now(),
        }
    }

    pub fn value(&self) -> LockTimeoutValue {
        self.value
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn remaining(&self) -> Option<Duration> {
        match self.value {
            LockTimeoutValue::Infinite => None,
            LockTimeoutValue::Finite(limit) => Some(limit.saturating_sub(self.elapsed())),
        }
    }

    pub fn is_expired(&self) -> bool {
        matches!(self.value, LockTimeoutValue::Finite(limit) if self.elapsed() >= limit)
    }
}

/// Carries the configuration for one call to `lock` or `try_lock`.
pub struct LockAcquisitionRequest<'a> {
    key: ResourceKey,
    lease_time: Duration,
    budget: LockTimeoutBudget,
    cancellation: CancellationToken,
    backoff: PollingBackoff,
    observer: &'a dyn LockObserver,
    mode: AcquireMode,
    retries: usize,
    wait_started: bool,
}

impl<'a> LockAcquisitionRequest<'a> {
    pub fn new(key: ResourceKey, lease_time: Duration, timeout: LockTimeoutValue) -> Self {
        Self {
            key,
            lease_time,
            budget: LockTimeoutBudget::new(timeout),
            cancellation: CancellationToken::new(),
            backoff: PollingBackoff::default(),
            observer: &NOOP_OBSERVER,
            mode: AcquireMode::Blocking,
            retries: 0,
            wait_started: false,
        }
    }

    pub fn with_mode(mut self, mode: AcquireMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn with_backoff(mut self, backoff: PollingBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_observer(mut self, observer: &'a dyn LockObserver) -> Self {
        self.observer = observer;
        self
    }

    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    pub fn lease_time(&self) -> Duration {
        self.lease_time
    }

    pub fn mode(&self) -> AcquireMode {
        self.mode
    }

    pub fn budget(&self) -> &LockTimeoutBudget {
        &self.budget
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn elapsed(&self) -> Duration {
        self.budget.elapsed()
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.budget.remaining()
    }

    pub fn timeout_value(&self) -> LockTimeoutValue {
        self.budget.value()
    }

    pub fn retries(&self) -> usize {
        self.retries
    }

    /// Retry delay clamped to what is left of the budget; `None` once it is spent.
    pub fn next_sleep_interval(&self) -> Option<Duration> {
        let delay = self.backoff.next_delay();
        match self.remaining() {
            Some(remaining) if remaining.is_zero() => None,
            Some(remaining) => Some(delay.min(remaining)),
            None => Some(delay),
        }
    }

    pub fn record_wait_start(&mut self) {
        if !self.wait_started {
            self.observer.on_wait_start(&self.key, self.timeout_value());
            self.wait_started = true;
        }
    }

    pub fn record_retry(&mut self) {
        self.retries = self.retries.saturating_add(1);
        self.observer
            .on_retry(&self.key, self.retries, self.elapsed(), self.remaining());
    }

    pub fn notify_acquired(&self, lease: &Lease) {
        self.observer.on_acquired(lease, self.elapsed());
    }

    pub fn notify_timeout(&self) {
        self.observer.on_timeout(&self.key, self.elapsed());
    }

    pub fn notify_cancelled(&self) {
        self.observer.on_cancelled(&self.key, self.elapsed());
    }

    fn cancelled_error(&self) -> LeaseError {
        self.notify_cancelled();
        LeaseError::Cancelled {
            resource: self.key.to_string(),
            waited_secs: self.elapsed().as_secs_f64(),
        }
    }

    fn timeout_error(&self) -> LeaseError {
        LeaseError::LockTimeout {
            resource: self.key.to_string(),
            waited_secs: self.elapsed().as_secs_f64(),
            timeout_value: self.timeout_value(),
        }
    }
}

/// Runs attempts against `backend` until one is granted or the request's
/// budget is spent.
///
/// Each attempt draws a fresh [`OwnerToken`]. When the budget runs out the
/// result depends on why the final attempt failed: an unreachable
/// coordinator (or quorum) is returned as that error in either mode, plain
/// contention becomes `LockTimeout` for blocking requests and `Ok(None)` for
/// bounded ones.
pub(crate) fn acquire_lease(
    backend: &dyn LeaseBackend,
    request: &mut LockAcquisitionRequest<'_>,
) -> Result<Option<Lease>> {
    loop {
        if request.cancellation().is_cancelled() {
            return Err(request.cancelled_error());
        }

        let token = OwnerToken::generate();
        let last_unavailable = match backend.attempt(request.key(), &token, request.lease_time())
        {
            AttemptOutcome::Granted(lease) => {
                debug!(
                    "Acquired lease for {} via {} after {:.3}s ({} retries)",
                    request.key(),
                    backend.describe(),
                    request.elapsed().as_secs_f64(),
                    request.retries()
                );
                request.notify_acquired(&lease);
                return Ok(Some(lease));
            }
            AttemptOutcome::Denied => {
                trace!("Lease for {} is held elsewhere", request.key());
                None
            }
            AttemptOutcome::Unavailable(err) => {
                debug!("Attempt on {} could not reach coordinators: {err}", request.key());
                Some(err)
            }
        };

        request.record_wait_start();
        let sleep_for = if request.budget().is_expired() {
            None
        } else {
            request.next_sleep_interval()
        };

        let Some(sleep_for) = sleep_for else {
            request.notify_timeout();
            if let Some(err) = last_unavailable {
                return Err(err);
            }
            return match request.mode() {
                AcquireMode::Blocking => Err(request.timeout_error()),
                AcquireMode::Bounded => {
                    debug!(
                        "Gave up on {} after {:.3}s",
                        request.key(),
                        request.elapsed().as_secs_f64()
                    );
                    Ok(None)
                }
            };
        };

        request.record_retry();
        if request.cancellation().wait_timeout(sleep_for) {
            return Err(request.cancelled_error());
        }
    }
}
