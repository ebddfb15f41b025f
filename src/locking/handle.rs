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
use crate::locking::backend::{LeaseBackend, ReleaseOutcome};
use crate::locking::lease::{Lease, LeaseSnapshot, ResourceKey};
use crate::locking::watchdog::Watchdog;
use log::{debug, warn};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// The current lease of one handle, shared with its watchdog.
#[derive(Debug)]
pub(crate) struct LeaseCell {
    state: Mutex<Option<Lease>>,
    lost: AtomicBool,
}

impl LeaseCell {
    pub(crate) fn new(lease: Lease) -> Self {
        Self {
            state: Mutex::new(Some(lease)),
            lost: AtomicBool::new(false),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Option<Lease>> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn current(&self) -> Option<Lease> {
        self.lock().clone()
    }

    /// Clears the lease, waiting for any renewal in flight to finish first.
    pub(crate) fn take(&self) -> Option<Lease> {
        self.lock().take()
    }

    /// Puts back a lease whose release could not be confirmed.
    pub(crate) fn restore(&self, lease: Lease) {
        *self.lock() = Some(lease);
    }

    pub(crate) fn mark_lost(&self) {
        self.lost.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }
}

/// Keys currently held through one lock instance.
#[derive(Debug, Default)]
pub(crate) struct HeldKeys {
    keys: Mutex<HashSet<ResourceKey>>,
}

impl HeldKeys {
    /// Returns `false` if `key` is already claimed.
    pub(crate) fn claim(&self, key: &ResourceKey) -> bool {
        self.keys().insert(key.clone())
    }

    pub(crate) fn remove(&self, key: &ResourceKey) {
        self.keys().remove(key);
    }

    pub(crate) fn contains(&self, key: &ResourceKey) -> bool {
        self.keys().contains(key)
    }

    fn keys(&self) -> MutexGuard<'_, HashSet<ResourceKey>> {
        self.keys
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Proof of a successful acquisition.
///
/// The handle owns its lease and the watchdog renewing it. Dropping a handle
/// without calling [`release`](LockHandle::release) stops the watchdog and
/// makes a best-effort release.
pub struct LockHandle {
    key: ResourceKey,
    cell: Arc<LeaseCell>,
    backend: Arc<dyn LeaseBackend>,
    watchdog: Option<Watchdog>,
    held: Arc<HeldKeys>,
    acquired_at: Instant,
}

impl LockHandle {
    pub(crate) fn new(
        cell: Arc<LeaseCell>,
        key: ResourceKey,
        backend: Arc<dyn LeaseBackend>,
        held: Arc<HeldKeys>,
    ) -> Self {
        Self {
            key,
            cell,
            backend,
            watchdog: None,
            held,
            acquired_at: Instant::now(),
        }
    }

    pub(crate) fn attach_watchdog(&mut self, watchdog: Watchdog) {
        self.watchdog = Some(watchdog);
    }

    #[cfg(test)]
    pub(crate) fn cell(&self) -> &Arc<LeaseCell> {
        &self.cell
    }

    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    /// The current lease, or `None` once released.
    pub fn lease(&self) -> Option<Lease> {
        self.cell.current()
    }

    pub fn snapshot(&self) -> Option<LeaseSnapshot> {
        self.lease().map(|lease| lease.snapshot())
    }

    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    pub fn has_watchdog(&self) -> bool {
        self.watchdog
            .as_ref()
            .is_some_and(|watchdog| watchdog.is_running())
    }

    /// `true` once the watchdog has given up on the lease.
    pub fn is_lease_lost(&self) -> bool {
        self.cell.is_lost()
    }

    /// Fails with `LeaseLost` unless the lease is still locally valid.
    ///
    /// Long critical sections should call this before each step that must
    /// not run without the lock.
    pub fn ensure_held(&self) -> Result<()> {
        let valid = !self.cell.is_lost() && self.lease().is_some_and(|lease| !lease.is_expired());
        if valid {
            Ok(())
        } else {
            Err(LeaseError::LeaseLost {
                resource: self.key.to_string(),
            })
        }
    }

    /// Asks the coordinator(s) whether this handle's token still owns the key.
    pub fn is_still_held(&self) -> Result<bool> {
        if self.cell.is_lost() {
            return Ok(false);
        }
        match self.lease() {
            Some(lease) if !lease.is_expired() => self.backend.is_held(&lease),
            _ => Ok(false),
        }
    }

    /// Stops renewal and releases the lease. Releasing twice returns
    /// [`ReleaseOutcome::AlreadyExpired`]. When the release itself fails the
    /// handle keeps its lease, so the call can be retried.
    pub fn release(&mut self) -> Result<ReleaseOutcome> {
        let lease = self.cell.take();
        if let Some(mut watchdog) = self.watchdog.take() {
            watchdog.stop();
        }

        let Some(lease) = lease else {
            debug!("Lease for {} was already released", self.key);
            return Ok(ReleaseOutcome::AlreadyExpired);
        };

        let outcome = self.backend.release(&lease);
        if outcome.is_err() {
            // Keep the lease so a later release (or drop) can retry. Renewal
            // stays stopped, so the coordinators expire it after its ttl at
            // the latest.
            self.cell.restore(lease);
        } else {
            self.held.remove(&self.key);
        }

        match &outcome {
            Ok(ReleaseOutcome::Released) => debug!(
                "Released lease for {} after {:.3}s",
                self.key,
                self.held_for().as_secs_f64()
            ),
            Ok(ReleaseOutcome::AlreadyExpired) => warn!(
                "Lease for {} had already expired or changed owner before release",
                self.key
            ),
            Err(err) => warn!("Failed to release lease for {}: {err}", self.key),
        }
        outcome
    }
}

impl fmt::Debug for LockHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockHandle")
            .field("key", &self.key)
            .field("backend", &self.backend.describe())
            .field("lost", &self.cell.is_lost())
            .field("watchdog", &self.watchdog.is_some())
            .finish()
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if self.cell.current().is_none() {
            return;
        }
        if let Err(err) = self.release() {
            warn!("Failed to release lease for {} during drop: {err}", self.key);
        }
    }
}
