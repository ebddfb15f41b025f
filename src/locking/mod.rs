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

pub mod acquisition;
pub mod backend;
pub mod cancellation;
pub mod controller;
pub mod handle;
pub mod lease;
pub mod quorum;
pub mod single;
pub mod timeout;
pub mod wait_observer;
pub mod watchdog;

pub use acquisition::{AcquireMode, LockAcquisitionRequest, LockTimeoutBudget, PollingBackoff};
pub use backend::{AttemptOutcome, LeaseBackend, ReleaseOutcome, RenewalOutcome};
pub use cancellation::CancellationToken;
pub use controller::{
    AcquireOptions, DistributedLock, LeaseLock, LockController, LockSettings, QuorumLock,
    RenewalPolicy, SingleNodeLock,
};
pub use handle::LockHandle;
pub use lease::{Lease, LeaseSnapshot, OwnerToken, ResourceKey};
pub use quorum::{CoordinatorOutcome, CoordinatorStatus, QuorumBackend, QuorumState};
pub use single::SingleNodeBackend;
pub use timeout::{LockTimeoutValue, parse_timeout_override};
pub use wait_observer::{LockObserver, NoopLockObserver};
pub use watchdog::{Watchdog, WatchdogEntry, WatchdogRegistry};
