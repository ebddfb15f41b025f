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

//! Background lease renewal.
//!
//! Each held lease with renewal enabled gets one thread that wakes every
//! cadence, takes the lease mutex, and asks the backend to extend the lease
//! with its own token. Holding the mutex across the renewal call means a
//! release either waits for the renewal in flight or finds the lease already
//! gone, so the two never overlap.

use crate::error::{LeaseError, Result};
use crate::locking::backend::{LeaseBackend, RenewalOutcome};
use crate::locking::handle::LeaseCell;
use crate::locking::lease::ResourceKey;
use crate::locking::wait_observer::LockObserver;
use chrono::{DateTime, Utc};
use log::{debug, trace, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Registry entry describing one running watchdog.
#[derive(Debug, Clone)]
pub struct WatchdogEntry {
    pub key: ResourceKey,
    pub cadence: Duration,
    pub started_at: DateTime<Utc>,
}

/// Tracks every running watchdog. Entries are added when a watchdog starts
/// and removed when its thread exits or it is stopped.
#[derive(Debug, Default)]
pub struct WatchdogRegistry {
    next_id: AtomicU64,
    active: Mutex<HashMap<u64, WatchdogEntry>>,
}

static GLOBAL_REGISTRY: OnceLock<Arc<WatchdogRegistry>> = OnceLock::new();

impl WatchdogRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry used unless a lock is given its own.
    pub fn global() -> Arc<WatchdogRegistry> {
        Arc::clone(GLOBAL_REGISTRY.get_or_init(|| Arc::new(WatchdogRegistry::new())))
    }

    pub fn active_count(&self) -> usize {
        self.entries().len()
    }

    pub fn is_active(&self, key: &ResourceKey) -> bool {
        self.entries().values().any(|entry| &entry.key == key)
    }

    pub fn snapshot(&self) -> Vec<WatchdogEntry> {
        self.entries().values().cloned().collect()
    }

    fn register(&self, key: &ResourceKey, cadence: Duration) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries().insert(
            id,
            WatchdogEntry {
                key: key.clone(),
                cadence,
                started_at: Utc::now(),
            },
        );
        id
    }

    fn unregister(&self, id: u64) {
        self.entries().remove(&id);
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<u64, WatchdogEntry>> {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Renewal thread bound to one lease. Stopping (or dropping) it joins the thread.
#[derive(Debug)]
pub struct Watchdog {
    id: u64,
    key: ResourceKey,
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
    registry: Arc<WatchdogRegistry>,
}

pub(crate) struct WatchdogParams {
    pub(crate) cell: Arc<LeaseCell>,
    pub(crate) backend: Arc<dyn LeaseBackend>,
    pub(crate) observer: Arc<dyn LockObserver>,
    pub(crate) registry: Arc<WatchdogRegistry>,
    pub(crate) lease_time: Duration,
    pub(crate) cadence: Duration,
}

impl Watchdog {
    pub(crate) fn spawn(params: WatchdogParams) -> Result<Self> {
        let WatchdogParams {
            cell,
            backend,
            observer,
            registry,
            lease_time,
            cadence,
        } = params;

        let Some(key) = cell.current().map(|lease| lease.key().clone()) else {
            return Err(LeaseError::InvalidConfiguration(
                "Cannot start renewal for a lease that is no longer held".to_string(),
            ));
        };

        let id = registry.register(&key, cadence);
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let thread_registry = Arc::clone(&registry);
        let thread_key = key.clone();

        let spawned = thread::Builder::new()
            .name(format!("leaselock-watchdog-{key}"))
            .spawn(move || {
                renewal_loop(
                    &thread_key,
                    &cell,
                    backend.as_ref(),
                    observer.as_ref(),
                    lease_time,
                    cadence,
                    |wait| match stop_rx.recv_timeout(wait) {
                        Err(RecvTimeoutError::Timeout) => false,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
                    },
                );
                thread_registry.unregister(id);
            });

        let thread = match spawned {
            Ok(thread) => thread,
            Err(err) => {
                registry.unregister(id);
                return Err(err.into());
            }
        };

        debug!(
            "Started lease watchdog for {key} (cadence {:.3}s)",
            cadence.as_secs_f64()
        );
        Ok(Self {
            id,
            key,
            stop_tx: Some(stop_tx),
            thread: Some(thread),
            registry,
        })
    }

    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    pub fn is_running(&self) -> bool {
        self.thread
            .as_ref()
            .is_some_and(|thread| !thread.is_finished())
    }

    /// Signals the thread and waits for it to exit. Idempotent.
    pub fn stop(&mut self) {
        drop(self.stop_tx.take());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Lease watchdog for {} panicked", self.key);
            }
            debug!("Stopped lease watchdog for {}", self.key);
        }
        self.registry.unregister(self.id);
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Body of the watchdog thread. `wait_for_stop` sleeps for up to the given
/// duration and returns `true` when the watchdog has been told to stop.
fn renewal_loop(
    key: &ResourceKey,
    cell: &LeaseCell,
    backend: &dyn LeaseBackend,
    observer: &dyn LockObserver,
    lease_time: Duration,
    cadence: Duration,
    wait_for_stop: impl Fn(Duration) -> bool,
) {
    loop {
        if wait_for_stop(cadence) {
            return;
        }

        let mut slot = cell.lock();
        let Some(lease) = slot.as_ref() else {
            // Released between ticks.
            return;
        };

        match backend.renew(lease, lease_time) {
            RenewalOutcome::Renewed(renewed) => {
                trace!(
                    "Renewed lease for {key}, valid for another {:.3}s",
                    renewed.remaining().as_secs_f64()
                );
                observer.on_renewed(&renewed);
                *slot = Some(renewed);
            }
            RenewalOutcome::Rejected => {
                warn!("Lease for {key} is no longer owned; renewal stopped");
                cell.mark_lost();
                observer.on_lease_lost(key);
                return;
            }
            RenewalOutcome::Inconclusive(reason) => {
                if lease.remaining() <= cadence {
                    warn!(
                        "Lease for {key} could not be renewed before it runs out ({reason}); \
                         treating it as lost"
                    );
                    cell.mark_lost();
                    observer.on_lease_lost(key);
                    return;
                }
                debug!(
                    "Renewal of {key} inconclusive ({reason}); {:.3}s of validity left, retrying",
                    lease.remaining().as_secs_f64()
                );
            }
        }
    }
}
