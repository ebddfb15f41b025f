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
use crate::locking::lease::{Lease, OwnerToken, ResourceKey};
use std::fmt;
use std::time::Duration;

/// Result of one acquisition round against the coordinator(s).
#[derive(Debug)]
pub enum AttemptOutcome {
    Granted(Lease),
    /// Clean contention: somebody else holds the resource.
    Denied,
    /// Too few coordinators answered to decide either way.
    Unavailable(LeaseError),
}

/// Result of one watchdog renewal round.
#[derive(Debug)]
pub enum RenewalOutcome {
    Renewed(Lease),
    /// Ownership is definitively gone.
    Rejected,
    /// The round failed without proving loss; it may be retried while time remains.
    Inconclusive(String),
}

/// How a release ended. Both variants leave the resource free.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released,
    /// The lease had already expired, been taken over, or been released before.
    AlreadyExpired,
}

impl fmt::Display for ReleaseOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReleaseOutcome::Released => f.write_str("released"),
            ReleaseOutcome::AlreadyExpired => f.write_str("already expired"),
        }
    }
}

/// Protocol-specific half of a lock: how one round of acquire, renew,
/// release and ownership check is carried out against the coordinators.
pub trait LeaseBackend: Send + Sync {
    /// Short label for logs, e.g. `single-node(redis://host:6379)`.
    fn describe(&self) -> String;

    fn attempt(&self, key: &ResourceKey, token: &OwnerToken, lease_time: Duration)
    -> AttemptOutcome;

    fn renew(&self, lease: &Lease, lease_time: Duration) -> RenewalOutcome;

    fn release(&self, lease: &Lease) -> Result<ReleaseOutcome>;

    fn is_held(&self, lease: &Lease) -> Result<bool>;
}
