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

use crate::config::LeaseLockConfig;
use crate::error::{LeaseError, Result};
use crate::locking::cancellation::{CancellationToken, global_token};
use crate::locking::controller::{AcquireOptions, DistributedLock, LockController};
use crate::locking::handle::LockHandle;
use crate::locking::lease::{LeaseSnapshot, ResourceKey};
use crate::locking::timeout::{LockTimeoutValue, parse_timeout_override};
use log::info;
use serde::Serialize;
use std::time::{Duration, Instant};

/// How often the holder re-checks that its lease is still alive.
const HOLD_CHECK_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Serialize)]
struct HoldOutput {
    lease: LeaseSnapshot,
    held_ms: u64,
    interrupted: bool,
    release: String,
}

pub struct HoldCommand<'a> {
    config: &'a LeaseLockConfig,
}

impl<'a> HoldCommand<'a> {
    pub fn new(config: &'a LeaseLockConfig) -> Result<Self> {
        Ok(Self { config })
    }

    pub fn execute(
        &self,
        key: &str,
        hold_secs: u64,
        wait: Option<&str>,
        json: bool,
    ) -> Result<()> {
        let key = ResourceKey::from(key);
        let cancellation = global_token();
        let wait = wait
            .map(|value| {
                parse_timeout_override(value)
                    .map_err(|err| LeaseError::InvalidConfiguration(format!("--wait: {err}")))
            })
            .transpose()?;

        let mut handle = self.acquire(&key, wait, &cancellation)?;
        let Some(snapshot) = handle.snapshot() else {
            return Err(LeaseError::LeaseLost {
                resource: key.to_string(),
            });
        };

        if !json {
            println!(
                "Acquired {key} (token {}, valid for {}ms, confirmed by {})",
                snapshot.token,
                snapshot.remaining_ms,
                snapshot.confirmed_by.join(", ")
            );
        }

        let started = Instant::now();
        let interrupted = hold(&handle, Duration::from_secs(hold_secs), &cancellation)?;
        if interrupted {
            info!("Interrupted while holding {key}; releasing early");
        }

        let outcome = handle.release()?;
        let held_ms = started.elapsed().as_millis() as u64;

        if json {
            let output = HoldOutput {
                lease: snapshot,
                held_ms,
                interrupted,
                release: outcome.to_string(),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        } else {
            println!("Released {key} after {held_ms}ms: {outcome}");
        }
        Ok(())
    }

    fn acquire(
        &self,
        key: &ResourceKey,
        wait: Option<LockTimeoutValue>,
        cancellation: &CancellationToken,
    ) -> Result<LockHandle> {
        match wait {
            None => {
                let lock = LockController::from_config(self.config)?;
                lock.lock_cancellable(key, cancellation)
            }
            Some(LockTimeoutValue::Infinite) => {
                let mut config = self.config.clone();
                config.locking.acquire_timeout = LockTimeoutValue::Infinite.to_string();
                let lock = LockController::from_config(&config)?;
                lock.lock_cancellable(key, cancellation)
            }
            Some(LockTimeoutValue::Finite(wait_time)) => {
                let lock = LockController::from_config(self.config)?;
                let options = AcquireOptions::new(wait_time, lock.settings().lease_time)
                    .with_cancellation(cancellation.clone());
                lock.try_lock_with(key, options)?
                    .ok_or_else(|| LeaseError::LockTimeout {
                        resource: key.to_string(),
                        waited_secs: wait_time.as_secs_f64(),
                        timeout_value: LockTimeoutValue::Finite(wait_time),
                    })
            }
        }
    }
}

/// Holds the lease for `duration`. Returns `true` if cancelled first.
fn hold(handle: &LockHandle, duration: Duration, cancellation: &CancellationToken) -> Result<bool> {
    let deadline = Instant::now() + duration;
    loop {
        handle.ensure_held()?;
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(false);
        }
        if cancellation.wait_timeout(remaining.min(HOLD_CHECK_INTERVAL)) {
            return Ok(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locking::watchdog::WatchdogRegistry;
    use std::sync::Arc;

    #[test]
    fn hold_returns_after_duration() {
        let config = LeaseLockConfig::default();
        let lock = LockController::build(&config, Arc::new(WatchdogRegistry::new())).unwrap();
        let mut handle = lock.lock(&ResourceKey::from("job-42")).unwrap();

        let started = Instant::now();
        let interrupted = hold(&handle, Duration::from_millis(60), &CancellationToken::new()).unwrap();
        assert!(!interrupted);
        assert!(started.elapsed() >= Duration::from_millis(60));
        handle.release().unwrap();
    }

    #[test]
    fn hold_stops_when_cancelled() {
        let config = LeaseLockConfig::default();
        let lock = LockController::from_config(&config).unwrap();
        let mut handle = lock.lock(&ResourceKey::from("job-43")).unwrap();
        let token = CancellationToken::new();
        token.cancel();

        assert!(hold(&handle, Duration::from_secs(30), &token).unwrap());
        handle.release().unwrap();
    }

    #[test]
    fn invalid_wait_is_rejected() {
        let config = LeaseLockConfig::default();
        let command = HoldCommand::new(&config).unwrap();
        let err = command.execute("job-42", 0, Some("soon"), false).unwrap_err();
        assert!(matches!(err, LeaseError::InvalidConfiguration(_)));
    }
}
