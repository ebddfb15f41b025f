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

//! Observer interfaces for lock instrumentation.
//!
//! Observers decouple the acquisition loop and the watchdog from whatever
//! wants to react to them (progress output, metrics, the holder's own
//! abort logic) without duplicating polling.

use crate::locking::lease::{Lease, ResourceKey};
use crate::locking::timeout::LockTimeoutValue;
use std::time::Duration;

/// Observer hooks for lock wait and lease lifecycle events.
///
/// Renewal hooks run on the watchdog thread, so implementations must be cheap
/// and must not call back into the lock handle.
pub trait LockObserver: Send + Sync {
    fn on_wait_start(&self, _key: &ResourceKey, _timeout: LockTimeoutValue) {}

    fn on_retry(
        &self,
        _key: &ResourceKey,
        _attempt: usize,
        _elapsed: Duration,
        _remaining: Option<Duration>,
    ) {
    }

    fn on_acquired(&self, _lease: &Lease, _waited: Duration) {}

    fn on_timeout(&self, _key: &ResourceKey, _waited: Duration) {}

    fn on_cancelled(&self, _key: &ResourceKey, _waited: Duration) {}

    fn on_renewed(&self, _lease: &Lease) {}

    /// The watchdog could not keep the lease alive. The holder is no longer protected.
    fn on_lease_lost(&self, _key: &ResourceKey) {}
}

/// Observer implementation that performs no work.
#[derive(Debug, Default)]
pub struct NoopLockObserver;

impl LockObserver for NoopLockObserver {}
