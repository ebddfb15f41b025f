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

//! Lease value objects.
//!
//! A [`Lease`] is never mutated after creation. Renewal produces a new lease
//! with the same key and token and a later expiry; the lock handle swaps the
//! old value out under its mutex.

use crate::coordinator::CoordinatorId;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Name of the contended resource, used verbatim as the coordinator key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey(Arc<str>);

impl ResourceKey {
    pub fn new(key: impl AsRef<str>) -> Self {
        Self(Arc::from(key.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ResourceKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ResourceKey {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for ResourceKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// Proof of ownership stored as the coordinator value.
///
/// Every acquisition attempt draws a new random token, so a late reply to an
/// abandoned attempt can never be confused with the current one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OwnerToken(String);

impl OwnerToken {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[cfg(test)]
    pub(crate) fn from_raw(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl fmt::Display for OwnerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A time-bounded ownership claim confirmed by one or more coordinators.
#[derive(Debug, Clone)]
pub struct Lease {
    key: ResourceKey,
    token: OwnerToken,
    expires_at: Instant,
    confirmed_by: BTreeSet<CoordinatorId>,
    acquired_at: DateTime<Utc>,
}

impl Lease {
    pub fn new(
        key: ResourceKey,
        token: OwnerToken,
        expires_at: Instant,
        confirmed_by: BTreeSet<CoordinatorId>,
    ) -> Self {
        Self {
            key,
            token,
            expires_at,
            confirmed_by,
            acquired_at: Utc::now(),
        }
    }

    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    pub fn token(&self) -> &OwnerToken {
        &self.token
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    pub fn confirmed_by(&self) -> &BTreeSet<CoordinatorId> {
        &self.confirmed_by
    }

    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }

    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    /// Returns the lease that replaces this one after a successful renewal.
    pub fn renewed(&self, expires_at: Instant, confirmed_by: BTreeSet<CoordinatorId>) -> Self {
        Self {
            key: self.key.clone(),
            token: self.token.clone(),
            expires_at,
            confirmed_by,
            acquired_at: self.acquired_at,
        }
    }

    pub fn snapshot(&self) -> LeaseSnapshot {
        LeaseSnapshot {
            key: self.key.clone(),
            token: self.token.to_string(),
            remaining_ms: self.remaining().as_millis() as u64,
            confirmed_by: self.confirmed_by.iter().map(ToString::to_string).collect(),
            acquired_at: self.acquired_at,
        }
    }
}

/// Serialisable view of a lease for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct LeaseSnapshot {
    pub key: ResourceKey,
    pub token: String,
    pub remaining_ms: u64,
    pub confirmed_by: Vec<String>,
    pub acquired_at: DateTime<Utc>,
}
