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

use crate::config::{BackendKind, LeaseLockConfig, LockStrategy};
use crate::coordinator::{Coordinator, MemoryCoordinator, RedisCoordinator};
use crate::error::{LeaseError, Result};
use crate::locking::acquisition::{
    AcquireMode, LockAcquisitionRequest, PollingBackoff, acquire_lease,
};
use crate::locking::backend::{LeaseBackend, ReleaseOutcome};
use crate::locking::cancellation::CancellationToken;
use crate::locking::handle::{HeldKeys, LeaseCell, LockHandle};
use crate::locking::lease::ResourceKey;
use crate::locking::quorum::QuorumBackend;
use crate::locking::single::SingleNodeBackend;
use crate::locking::timeout::LockTimeoutValue;
use crate::locking::wait_observer::{LockObserver, NoopLockObserver};
use crate::locking::watchdog::{Watchdog, WatchdogParams, WatchdogRegistry};
use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_LEASE_TIME: Duration = Duration::from_millis(10_000);
pub const DEFAULT_WAIT_TIME: Duration = Duration::from_millis(5_000);
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_ACQUIRE_TIMEOUT: LockTimeoutValue = LockTimeoutValue::from_secs(60);

/// When the watchdog renews a held lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalPolicy {
    /// No watchdog; the lease simply expires after its ttl.
    Disabled,
    Fixed(Duration),
    /// Renew every `lease_time / n`.
    LeaseFraction(u32),
}

impl RenewalPolicy {
    pub fn cadence(&self, lease_time: Duration) -> Option<Duration> {
        match self {
            RenewalPolicy::Disabled => None,
            RenewalPolicy::Fixed(cadence) => Some(*cadence),
            RenewalPolicy::LeaseFraction(parts) => Some(lease_time / (*parts).max(1)),
        }
    }

    fn validate(&self, lease_time: Duration) -> Result<()> {
        match self.cadence(lease_time) {
            Some(cadence) if cadence.is_zero() || cadence >= lease_time => {
                Err(LeaseError::InvalidConfiguration(format!(
                    "Renewal cadence {}ms must be greater than zero and shorter than the {}ms lease",
                    cadence.as_millis(),
                    lease_time.as_millis()
                )))
            }
            _ => Ok(()),
        }
    }
}

impl Default for RenewalPolicy {
    fn default() -> Self {
        RenewalPolicy::LeaseFraction(3)
    }
}

/// Tunables shared by every acquisition made through one lock instance.
#[derive(Debug, Clone)]
pub struct LockSettings {
    pub lease_time: Duration,
    /// Budget used by [`AcquireOptions::from_settings`].
    pub wait_time: Duration,
    pub retry_interval: Duration,
    /// Budget of the blocking `lock` call.
    pub acquire_timeout: LockTimeoutValue,
    pub renewal: RenewalPolicy,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            lease_time: DEFAULT_LEASE_TIME,
            wait_time: DEFAULT_WAIT_TIME,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            renewal: RenewalPolicy::default(),
        }
    }
}

impl LockSettings {
    pub fn validate(&self) -> Result<()> {
        if self.lease_time.is_zero() {
            return Err(LeaseError::InvalidConfiguration(
                "Lease time must be greater than zero".to_string(),
            ));
        }
        if self.retry_interval.is_zero() {
            return Err(LeaseError::InvalidConfiguration(
                "Retry interval must be greater than zero".to_string(),
            ));
        }
        self.renewal.validate(self.lease_time)
    }
}

/// Per-call parameters for [`DistributedLock::try_lock_with`].
#[derive(Debug, Clone)]
pub struct AcquireOptions {
    pub wait_time: Duration,
    pub lease_time: Duration,
    /// Falls back to the lock's configured policy when `None`.
    pub renewal: Option<RenewalPolicy>,
    pub cancellation: Option<CancellationToken>,
}

impl AcquireOptions {
    pub fn new(wait_time: Duration, lease_time: Duration) -> Self {
        Self {
            wait_time,
            lease_time,
            renewal: None,
            cancellation: None,
        }
    }

    /// Configured default wait and lease times.
    pub fn from_settings(settings: &LockSettings) -> Self {
        Self::new(settings.wait_time, settings.lease_time)
    }

    pub fn with_renewal(mut self, renewal: RenewalPolicy) -> Self {
        self.renewal = Some(renewal);
        self
    }

    pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = Some(cancellation);
        self
    }
}

/// Caller-facing capability shared by the single-node and quorum locks.
pub trait DistributedLock: Send + Sync {
    /// Blocks until the lease is acquired or the configured acquire timeout passes.
    fn lock(&self, key: &ResourceKey) -> Result<LockHandle>;

    fn lock_cancellable(
        &self,
        key: &ResourceKey,
        cancellation: &CancellationToken,
    ) -> Result<LockHandle>;

    /// Retries for up to `wait_time`; `Ok(None)` means the key stayed contended.
    fn try_lock(
        &self,
        key: &ResourceKey,
        wait_time: Duration,
        lease_time: Duration,
    ) -> Result<Option<LockHandle>>;

    fn try_lock_with(
        &self,
        key: &ResourceKey,
        options: AcquireOptions,
    ) -> Result<Option<LockHandle>>;

    fn unlock(&self, handle: &mut LockHandle) -> Result<ReleaseOutcome> {
        handle.release()
    }

    fn is_held(&self, handle: &LockHandle) -> Result<bool> {
        handle.is_still_held()
    }

    fn settings(&self) -> &LockSettings;

    fn describe(&self) -> String;
}

/// Generic lock driving one [`LeaseBackend`].
pub struct LeaseLock<B: LeaseBackend + 'static> {
    backend: Arc<B>,
    settings: LockSettings,
    observer: Arc<dyn LockObserver>,
    registry: Arc<WatchdogRegistry>,
    held: Arc<HeldKeys>,
}

pub type SingleNodeLock = LeaseLock<SingleNodeBackend>;
pub type QuorumLock = LeaseLock<QuorumBackend>;

impl<B: LeaseBackend + 'static> LeaseLock<B> {
    pub fn new(backend: B, settings: LockSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            backend: Arc::new(backend),
            settings,
            observer: Arc::new(NoopLockObserver),
            registry: WatchdogRegistry::global(),
            held: Arc::new(HeldKeys::default()),
        })
    }

    pub fn with_observer(mut self, observer: Arc<dyn LockObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_registry(mut self, registry: Arc<WatchdogRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn registry(&self) -> &Arc<WatchdogRegistry> {
        &self.registry
    }

    /// Whether a handle obtained from this instance currently holds `key`.
    pub fn holds(&self, key: &ResourceKey) -> bool {
        self.held.contains(key)
    }

    fn acquire(
        &self,
        key: &ResourceKey,
        lease_time: Duration,
        timeout: LockTimeoutValue,
        mode: AcquireMode,
        cancellation: CancellationToken,
        renewal: RenewalPolicy,
    ) -> Result<Option<LockHandle>> {
        if lease_time.is_zero() {
            return Err(LeaseError::InvalidConfiguration(
                "Lease time must be greater than zero".to_string(),
            ));
        }
        renewal.validate(lease_time)?;

        if !self.held.claim(key) {
            return Err(LeaseError::AlreadyHeld {
                resource: key.to_string(),
            });
        }

        debug!(
            "Acquiring {key} via {} (lease {}ms, timeout {timeout})",
            self.backend.describe(),
            lease_time.as_millis()
        );
        let mut request = LockAcquisitionRequest::new(key.clone(), lease_time, timeout)
            .with_mode(mode)
            .with_cancellation(cancellation)
            .with_backoff(PollingBackoff::fixed(self.settings.retry_interval))
            .with_observer(self.observer.as_ref());

        let lease = match acquire_lease(self.backend.as_ref(), &mut request) {
            Ok(Some(lease)) => lease,
            Ok(None) => {
                self.held.remove(key);
                return Ok(None);
            }
            Err(err) => {
                self.held.remove(key);
                return Err(err);
            }
        };

        let backend: Arc<dyn LeaseBackend> = self.backend.clone();
        let cell = Arc::new(LeaseCell::new(lease));
        let mut handle = LockHandle::new(
            Arc::clone(&cell),
            key.clone(),
            Arc::clone(&backend),
            Arc::clone(&self.held),
        );

        // On failure the handle is dropped here, which releases the lease.
        if let Some(cadence) = renewal.cadence(lease_time) {
            handle.attach_watchdog(Watchdog::spawn(WatchdogParams {
                cell,
                backend,
                observer: Arc::clone(&self.observer),
                registry: Arc::clone(&self.registry),
                lease_time,
                cadence,
            })?);
        }

        Ok(Some(handle))
    }

    fn lock_with(&self, key: &ResourceKey, cancellation: CancellationToken) -> Result<LockHandle> {
        let timeout = self.settings.acquire_timeout;
        let acquired = self.acquire(
            key,
            self.settings.lease_time,
            timeout,
            AcquireMode::Blocking,
            cancellation,
            self.settings.renewal,
        )?;

        // Blocking requests report an exhausted budget as an error, so this
        // only guards against a bounded result leaking through.
        acquired.ok_or_else(|| LeaseError::LockTimeout {
            resource: key.to_string(),
            waited_secs: timeout.as_duration().as_secs_f64(),
            timeout_value: timeout,
        })
    }
}

impl<B: LeaseBackend + 'static> DistributedLock for LeaseLock<B> {
    fn lock(&self, key: &ResourceKey) -> Result<LockHandle> {
        self.lock_with(key, CancellationToken::new())
    }

    fn lock_cancellable(
        &self,
        key: &ResourceKey,
        cancellation: &CancellationToken,
    ) -> Result<LockHandle> {
        self.lock_with(key, cancellation.clone())
    }

    fn try_lock(
        &self,
        key: &ResourceKey,
        wait_time: Duration,
        lease_time: Duration,
    ) -> Result<Option<LockHandle>> {
        self.try_lock_with(key, AcquireOptions::new(wait_time, lease_time))
    }

    fn try_lock_with(
        &self,
        key: &ResourceKey,
        options: AcquireOptions,
    ) -> Result<Option<LockHandle>> {
        self.acquire(
            key,
            options.lease_time,
            LockTimeoutValue::Finite(options.wait_time),
            AcquireMode::Bounded,
            options.cancellation.unwrap_or_default(),
            options.renewal.unwrap_or(self.settings.renewal),
        )
    }

    fn settings(&self) -> &LockSettings {
        &self.settings
    }

    fn describe(&self) -> String {
        self.backend.describe()
    }
}

/// Builds the lock variant selected by configuration.
pub struct LockController;

impl LockController {
    pub fn from_config(config: &LeaseLockConfig) -> Result<Box<dyn DistributedLock>> {
        Self::build(config, WatchdogRegistry::global())
    }

    pub fn build(
        config: &LeaseLockConfig,
        registry: Arc<WatchdogRegistry>,
    ) -> Result<Box<dyn DistributedLock>> {
        config.validate()?;
        let coordinators = Self::coordinators(config)?;
        Self::with_coordinators(config, coordinators, registry)
    }

    /// Builds the configured strategy over caller-supplied coordinators.
    pub fn with_coordinators(
        config: &LeaseLockConfig,
        coordinators: Vec<Arc<dyn Coordinator>>,
        registry: Arc<WatchdogRegistry>,
    ) -> Result<Box<dyn DistributedLock>> {
        let settings = config.locking.settings()?;

        match config.locking.strategy {
            LockStrategy::Single => {
                let Some(coordinator) = coordinators.into_iter().next() else {
                    return Err(LeaseError::InvalidConfiguration(
                        "Single-node locking needs a coordinator address".to_string(),
                    ));
                };
                info!("Using single-node locking against {}", coordinator.id());
                let lock = SingleNodeLock::new(SingleNodeBackend::new(coordinator), settings)?
                    .with_registry(registry);
                Ok(Box::new(lock))
            }
            LockStrategy::Quorum => {
                info!(
                    "Using quorum locking across {} coordinators",
                    coordinators.len()
                );
                let backend = QuorumBackend::new(
                    coordinators,
                    config.coordinators.timeout(),
                    config.locking.clock_drift_factor,
                )?;
                let lock = QuorumLock::new(backend, settings)?.with_registry(registry);
                Ok(Box::new(lock))
            }
        }
    }

    /// Creates one client per configured address. Memory coordinators are
    /// independent in-process nodes named after their address.
    pub fn coordinators(config: &LeaseLockConfig) -> Result<Vec<Arc<dyn Coordinator>>> {
        let timeout = config.coordinators.timeout();
        config
            .coordinators
            .addresses
            .iter()
            .map(|address| -> Result<Arc<dyn Coordinator>> {
                match config.coordinators.backend {
                    BackendKind::Memory => Ok(Arc::new(MemoryCoordinator::new(address.as_str()))),
                    BackendKind::Redis => Ok(Arc::new(RedisCoordinator::new(address, timeout)?)),
                }
            })
            .collect()
    }
}
