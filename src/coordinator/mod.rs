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

//! Client contract for a single key/value coordination node.
//!
//! Every operation is a single atomic step on the node. Network failures
//! and timeouts come back as [`LeaseError::CoordinatorUnavailable`] and are
//! never folded into a `false` answer: a clean denial and an unknown outcome
//! mean different things to the quorum algorithm.
//!
//! [`LeaseError::CoordinatorUnavailable`]: crate::error::LeaseError::CoordinatorUnavailable

pub mod memory;
pub mod redis;

pub use self::memory::MemoryCoordinator;
pub use self::redis::RedisCoordinator;

use crate::error::Result;
use crate::locking::lease::{OwnerToken, ResourceKey};
use std::fmt;
use std::time::Duration;

/// Stable identifier of a coordination node, usually its address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CoordinatorId(String);

impl CoordinatorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CoordinatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub trait Coordinator: Send + Sync {
    fn id(&self) -> &CoordinatorId;

    /// SET-IF-ABSENT-WITH-TTL. Returns `true` iff this call stored `token`.
    fn acquire(&self, key: &ResourceKey, token: &OwnerToken, ttl: Duration) -> Result<bool>;

    /// COMPARE-AND-DELETE. Returns `true` iff the key held `token` and was removed.
    fn release_if_owner(&self, key: &ResourceKey, token: &OwnerToken) -> Result<bool>;

    /// EXTEND-IF-OWNER. Returns `true` iff the key held `token` and its ttl was reset.
    fn extend_if_owner(&self, key: &ResourceKey, token: &OwnerToken, ttl: Duration)
    -> Result<bool>;

    /// Liveness check only; never use the answer to decide on a release.
    fn is_owner(&self, key: &ResourceKey, token: &OwnerToken) -> Result<bool> {
        Ok(self.get(key)?.as_deref() == Some(token.as_str()))
    }

    fn get(&self, key: &ResourceKey) -> Result<Option<String>>;
}
