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

//! Leased-token lock against exactly one coordination node.

use crate::coordinator::{Coordinator, CoordinatorId};
use crate::error::Result;
use crate::locking::backend::{AttemptOutcome, LeaseBackend, ReleaseOutcome, RenewalOutcome};
use crate::locking::lease::{Lease, OwnerToken, ResourceKey};
use log::debug;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct SingleNodeBackend {
    coordinator: Arc<dyn Coordinator>,
}

impl SingleNodeBackend {
    pub fn new(coordinator: Arc<dyn Coordinator>) -> Self {
        Self { coordinator }
    }

    fn confirmed(&self) -> BTreeSet<CoordinatorId> {
        BTreeSet::from([self.coordinator.id().clone()])
    }
}

impl LeaseBackend for SingleNodeBackend {
    fn describe(&self) -> String {
        format!("single-node({})", self.coordinator.id())
    }

    fn attempt(
        &self,
        key: &ResourceKey,
        token: &OwnerToken,
        lease_time: Duration,
    ) -> AttemptOutcome {
        // The node starts its ttl after receiving the request, so expiry
        // measured from before the call never overestimates validity.
        let started = Instant::now();
        match self.coordinator.acquire(key, token, lease_time) {
            Ok(true) => AttemptOutcome::Granted(Lease::new(
                key.clone(),
                token.clone(),
                started + lease_time,
                self.confirmed(),
            )),
            Ok(false) => AttemptOutcome::Denied,
            Err(err) => AttemptOutcome::Unavailable(err),
        }
    }

    fn renew(&self, lease: &Lease, lease_time: Duration) -> RenewalOutcome {
        let started = Instant::now();
        match self
            .coordinator
            .extend_if_owner(lease.key(), lease.token(), lease_time)
        {
            Ok(true) => RenewalOutcome::Renewed(lease.renewed(started + lease_time, self.confirmed())),
            Ok(false) => RenewalOutcome::Rejected,
            Err(err) => RenewalOutcome::Inconclusive(err.to_string()),
        }
    }

    fn release(&self, lease: &Lease) -> Result<ReleaseOutcome> {
        if self.coordinator.release_if_owner(lease.key(), lease.token())? {
            debug!("Released lease for {} on {}", lease.key(), self.coordinator.id());
            Ok(ReleaseOutcome::Released)
        } else {
            debug!(
                "{} no longer held the lease for {}",
                self.coordinator.id(),
                lease.key()
            );
            Ok(ReleaseOutcome::AlreadyExpired)
        }
    }

    fn is_held(&self, lease: &Lease) -> Result<bool> {
        self.coordinator.is_owner(lease.key(), lease.token())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::MemoryCoordinator;
    use crate::error::LeaseError;
    use mockall::mock;
    use mockall::predicate::always;

    mock! {
        Node {}

        impl Coordinator for Node {
            fn id(&self) -> &CoordinatorId;
            fn acquire(&self, key: &ResourceKey, token: &OwnerToken, ttl: Duration) -> Result<bool>;
            fn release_if_owner(&self, key: &ResourceKey, token: &OwnerToken) -> Result<bool>;
            fn extend_if_owner(
                &self,
                key: &ResourceKey,
                token: &OwnerToken,
                ttl: Duration,
            ) -> Result<bool>;
            fn get(&self, key: &ResourceKey) -> Result<Option<String>>;
        }
    }

    fn mock_node() -> MockNode {
        let mut node = MockNode::new();
        node.expect_id().return_const(CoordinatorId::new("mock-node"));
        node
    }

    fn lease() -> Lease {
        Lease::new(
            ResourceKey::from("job-42"),
            OwnerToken::generate(),
            Instant::now() + Duration::from_secs(10),
            BTreeSet::new(),
        )
    }

    #[test]
    fn granted_lease_is_confirmed_by_the_node() {
        let node = Arc::new(MemoryCoordinator::new("node-a"));
        let backend = SingleNodeBackend::new(node.clone());
        let key = ResourceKey::from("job-42");
        let token = OwnerToken::generate();

        let before = Instant::now();
        let AttemptOutcome::Granted(lease) = backend.attempt(&key, &token, Duration::from_secs(10))
        else {
            panic!("expected the free resource to be granted");
        };
        assert_eq!(lease.token(), &token);
        assert!(lease.expires_at() <= Instant::now() + Duration::from_secs(10));
        assert!(lease.expires_at() >= before + Duration::from_secs(10));
        assert!(lease.confirmed_by().contains(&CoordinatorId::new("node-a")));
        assert_eq!(node.peek(&key), Some(token.to_string()));

        assert!(matches!(
            backend.attempt(&key, &OwnerToken::generate(), Duration::from_secs(10)),
            AttemptOutcome::Denied
        ));
    }

    #[test]
    fn coordinator_error_is_not_a_denial() {
        let mut node = mock_node();
        node.expect_acquire()
            .with(always(), always(), always())
            .returning(|_, _, _| Err(LeaseError::unavailable("mock-node", "connection reset")));
        let backend = SingleNodeBackend::new(Arc::new(node));

        let outcome = backend.attempt(
            &ResourceKey::from("job-42"),
            &OwnerToken::generate(),
            Duration::from_secs(1),
        );
        assert!(matches!(outcome, AttemptOutcome::Unavailable(err) if err.is_unavailable()));
    }

    #[test]
    fn renewal_distinguishes_rejection_from_failure() {
        let mut node = mock_node();
        let mut calls = 0;
        node.expect_extend_if_owner().times(2).returning(move |_, _, _| {
            calls += 1;
            if calls == 1 {
                Ok(false)
            } else {
                Err(LeaseError::unavailable("mock-node", "timeout"))
            }
        });
        let backend = SingleNodeBackend::new(Arc::new(node));
        let lease = lease();

        assert!(matches!(
            backend.renew(&lease, Duration::from_secs(10)),
            RenewalOutcome::Rejected
        ));
        assert!(matches!(
            backend.renew(&lease, Duration::from_secs(10)),
            RenewalOutcome::Inconclusive(reason) if reason.contains("timeout")
        ));
    }

    #[test]
    fn successful_renewal_moves_expiry() {
        let mut node = mock_node();
        node.expect_extend_if_owner().returning(|_, _, _| Ok(true));
        let backend = SingleNodeBackend::new(Arc::new(node));
        let lease = lease();

        let RenewalOutcome::Renewed(renewed) = backend.renew(&lease, Duration::from_secs(60)) else {
            panic!("expected renewal");
        };
        assert_eq!(renewed.token(), lease.token());
        assert!(renewed.expires_at() > lease.expires_at());
    }

    #[test]
    fn release_of_expired_lease_is_not_an_error() {
        let mut node = mock_node();
        node.expect_release_if_owner().returning(|_, _| Ok(false));
        let backend = SingleNodeBackend::new(Arc::new(node));

        assert_eq!(
            backend.release(&lease()).unwrap(),
            ReleaseOutcome::AlreadyExpired
        );
    }

    #[test]
    fn release_error_propagates() {
        let mut node = mock_node();
        node.expect_release_if_owner()
            .returning(|_, _| Err(LeaseError::unavailable("mock-node", "broken pipe")));
        let backend = SingleNodeBackend::new(Arc::new(node));

        assert!(backend.release(&lease()).unwrap_err().is_unavailable());
    }

    #[test]
    fn is_held_reads_current_owner() {
        let mut node = mock_node();
        let lease = lease();
        let owner = lease.token().to_string();
        node.expect_get().returning(move |_| Ok(Some(owner.clone())));
        let backend = SingleNodeBackend::new(Arc::new(node));

        assert!(backend.is_held(&lease).unwrap());
    }
}
