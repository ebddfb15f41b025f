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

//! In-process coordination node with TTL semantics and fault injection.
//!
//! Used by the test suite and the `simulate` command. A single mutex makes
//! each operation atomic, which is all the lock algorithms require from a
//! node.

use crate::coordinator::{Coordinator, CoordinatorId};
use crate::error::{LeaseError, Result};
use crate::locking::lease::{OwnerToken, ResourceKey};
use log::trace;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Instant,
}

#[derive(Debug)]
pub struct MemoryCoordinator {
    id: CoordinatorId,
    entries: Mutex<HashMap<ResourceKey, Entry>>,
    available: AtomicBool,
    latency_ms: AtomicU64,
}

impl MemoryCoordinator {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: CoordinatorId::new(id),
            entries: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
            latency_ms: AtomicU64::new(0),
        }
    }

    /// Simulates a crashed or partitioned node when `false`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Delays every subsequent call by `latency` before it touches the store.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Drops `key` regardless of owner, as if its ttl had elapsed.
    pub fn force_expire(&self, key: &ResourceKey) {
        self.entries().remove(key);
    }

    /// Reads the live value without latency or availability checks.
    pub fn peek(&self, key: &ResourceKey) -> Option<String> {
        let entries = self.entries();
        entries
            .get(key)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.value.clone())
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<ResourceKey, Entry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn enter(&self, operation: &str) -> Result<MutexGuard<'_, HashMap<ResourceKey, Entry>>> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            thread::sleep(Duration::from_millis(latency));
        }
        if !self.is_available() {
            return Err(LeaseError::unavailable(
                self.id.as_str(),
                format!("{operation}: node is unreachable"),
            ));
        }
        Ok(self.entries())
    }
}

fn live<'a>(entries: &'a HashMap<ResourceKey, Entry>, key: &ResourceKey) -> Option<&'a Entry> {
    entries
        .get(key)
        .filter(|entry| entry.expires_at > Instant::now())
}

impl Coordinator for MemoryCoordinator {
    fn id(&self) -> &CoordinatorId {
        &self.id
    }

    fn acquire(&self, key: &ResourceKey, token: &OwnerToken, ttl: Duration) -> Result<bool> {
        let mut entries = self.enter("acquire")?;
        if live(&entries, key).is_some() {
            trace!("{}: {key} is taken", self.id);
            return Ok(false);
        }
        entries.insert(
            key.clone(),
            Entry {
                value: token.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(true)
    }

    fn release_if_owner(&self, key: &ResourceKey, token: &OwnerToken) -> Result<bool> {
        let mut entries = self.enter("release")?;
        let owned = live(&entries, key).is_some_and(|entry| entry.value == token.as_str());
        if owned {
            entries.remove(key);
        }
        Ok(owned)
    }

    fn extend_if_owner(
        &self,
        key: &ResourceKey,
        token: &OwnerToken,
        ttl: Duration,
    ) -> Result<bool> {
        let mut entries = self.enter("extend")?;
        match entries.get_mut(key) {
            Some(entry) if entry.expires_at > Instant::now() && entry.value == token.as_str() => {
                entry.expires_at = Instant::now() + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn get(&self, key: &ResourceKey) -> Result<Option<String>> {
        let entries = self.enter("get")?;
        Ok(live(&entries, key).map(|entry| entry.value.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> ResourceKey {
        ResourceKey::from("job-42")
    }

    #[test]
    fn acquire_is_exclusive_until_expiry() {
        let node = MemoryCoordinator::new("node-a");
        let first = OwnerToken::generate();
        let second = OwnerToken::generate();

        assert!(node.acquire(&key(), &first, Duration::from_millis(60)).unwrap());
        assert!(!node.acquire(&key(), &second, Duration::from_millis(60)).unwrap());

        thread::sleep(Duration::from_millis(80));
        assert!(node.acquire(&key(), &second, Duration::from_millis(60)).unwrap());
        assert_eq!(node.peek(&key()), Some(second.to_string()));
    }

    #[test]
    fn release_requires_matching_token() {
        let node = MemoryCoordinator::new("node-a");
        let owner = OwnerToken::generate();
        let intruder = OwnerToken::generate();
        node.acquire(&key(), &owner, Duration::from_secs(5)).unwrap();

        assert!(!node.release_if_owner(&key(), &intruder).unwrap());
        assert_eq!(node.peek(&key()), Some(owner.to_string()));
        assert!(node.release_if_owner(&key(), &owner).unwrap());
        assert!(!node.release_if_owner(&key(), &owner).unwrap());
        assert_eq!(node.peek(&key()), None);
    }

    #[test]
    fn extend_only_for_live_owner() {
        let node = MemoryCoordinator::new("node-a");
        let owner = OwnerToken::generate();
        node.acquire(&key(), &owner, Duration::from_millis(40))
            .unwrap();

        assert!(!node
            .extend_if_owner(&key(), &OwnerToken::generate(), Duration::from_secs(5))
            .unwrap());
        assert!(node
            .extend_if_owner(&key(), &owner, Duration::from_secs(5))
            .unwrap());
        thread::sleep(Duration::from_millis(60));
        assert!(node.is_owner(&key(), &owner).unwrap());

        node.force_expire(&key());
        assert!(!node
            .extend_if_owner(&key(), &owner, Duration::from_secs(5))
            .unwrap());
    }

    #[test]
    fn unavailable_node_reports_errors_not_denials() {
        let node = MemoryCoordinator::new("node-a");
        node.set_available(false);

        let err = node
            .acquire(&key(), &OwnerToken::generate(), Duration::from_secs(1))
            .unwrap_err();
        assert!(err.is_unavailable());
        assert!(err.to_string().contains("node-a"));
    }

    #[test]
    fn latency_delays_each_call() {
        let node = MemoryCoordinator::new("node-a");
        node.set_latency(Duration::from_millis(30));
        let started = Instant::now();
        node.get(&key()).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(30));
    }
}
