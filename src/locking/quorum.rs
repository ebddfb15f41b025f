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

//! Majority-lease lock over N independent coordination nodes.
//!
//! Every round (acquire, renew, release, ownership check) is dispatched to
//! all nodes at once, one short-lived thread per node, and answers are
//! collected until the per-coordinator timeout runs out. A node that has not
//! answered by then counts as timed out; its thread is left to finish on its
//! own and its late answer is discarded.
//!
//! A lease is valid only while a majority granted it *and* the round took
//! less than `lease_time - drift`, where drift covers clock rate differences
//! between the nodes. The lease's local expiry is shortened by the same drift,
//! so the holder stops trusting it before any node can have let it go.

use crate::coordinator::{Coordinator, CoordinatorId};
use crate::error::{LeaseError, Result};
use crate::locking::backend::{AttemptOutcome, LeaseBackend, ReleaseOutcome, RenewalOutcome};
use crate::locking::lease::{Lease, OwnerToken, ResourceKey};
use log::{debug, trace, warn};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

/// Fixed part of the drift allowance, on top of the proportional factor.
const CLOCK_DRIFT_BASE: Duration = Duration::from_millis(2);

/// Answer of one coordinator within a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorStatus {
    Granted,
    Denied,
    TimedOut,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct CoordinatorOutcome {
    pub id: CoordinatorId,
    pub status: CoordinatorStatus,
}

/// Per-round record; discarded once the round is decided.
#[derive(Debug, Clone)]
pub struct QuorumState {
    outcomes: Vec<CoordinatorOutcome>,
    elapsed: Duration,
}

impl QuorumState {
    pub fn outcomes(&self) -> &[CoordinatorOutcome] {
        &self.outcomes
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn granted(&self) -> BTreeSet<CoordinatorId> {
        self.ids_where(|status| *status == CoordinatorStatus::Granted)
            .collect()
    }

    pub fn granted_count(&self) -> usize {
        self.count(|status| *status == CoordinatorStatus::Granted)
    }

    pub fn denied_count(&self) -> usize {
        self.count(|status| *status == CoordinatorStatus::Denied)
    }

    /// Nodes that gave a definite answer either way.
    pub fn responsive_count(&self) -> usize {
        self.granted_count() + self.denied_count()
    }

    /// Indexes of every node that may now hold our token: granted, timed out or failed.
    fn possibly_holding(&self) -> Vec<usize> {
        self.outcomes
            .iter()
            .enumerate()
            .filter(|(_, outcome)| outcome.status != CoordinatorStatus::Denied)
            .map(|(index, _)| index)
            .collect()
    }

    fn count(&self, predicate: impl Fn(&CoordinatorStatus) -> bool) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| predicate(&outcome.status))
            .count()
    }

    fn ids_where<'a>(
        &'a self,
        predicate: impl Fn(&CoordinatorStatus) -> bool + 'a,
    ) -> impl Iterator<Item = CoordinatorId> + 'a {
        self.outcomes
            .iter()
            .filter(move |outcome| predicate(&outcome.status))
            .map(|outcome| outcome.id.clone())
    }

    fn summary(&self) -> String {
        self.outcomes
            .iter()
            .map(|outcome| match &outcome.status {
                CoordinatorStatus::Granted => format!("{}=granted", outcome.id),
                CoordinatorStatus::Denied => format!("{}=denied", outcome.id),
                CoordinatorStatus::TimedOut => format!("{}=timed out", outcome.id),
                CoordinatorStatus::Failed(reason) => format!("{}=failed ({reason})", outcome.id),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

pub struct QuorumBackend {
    coordinators: Vec<Arc<dyn Coordinator>>,
    timeout: Duration,
    drift_factor: f64,
}

impl QuorumBackend {
    /// `timeout` bounds how long one round waits for each node.
    pub fn new(
        coordinators: Vec<Arc<dyn Coordinator>>,
        timeout: Duration,
        drift_factor: f64,
    ) -> Result<Self> {
        let count = coordinators.len();
        if count < 3 || count % 2 == 0 {
            return Err(LeaseError::InvalidConfiguration(format!(
                "Quorum locking needs an odd number of at least 3 coordinators, got {count}"
            )));
        }
        if timeout.is_zero() {
            return Err(LeaseError::InvalidConfiguration(
                "Coordinator timeout must be greater than zero".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&drift_factor) {
            return Err(LeaseError::InvalidConfiguration(format!(
                "Clock drift factor must be in [0, 1), got {drift_factor}"
            )));
        }

        Ok(Self {
            coordinators,
            timeout,
            drift_factor,
        })
    }

    pub fn quorum(&self) -> usize {
        self.coordinators.len() / 2 + 1
    }

    pub fn drift(&self, lease_time: Duration) -> Duration {
        lease_time.mul_f64(self.drift_factor) + CLOCK_DRIFT_BASE
    }

    /// Local validity budget of a lease granted for `lease_time`.
    fn validity(&self, lease_time: Duration) -> Duration {
        lease_time.saturating_sub(self.drift(lease_time))
    }

    fn fan_out_all<F>(&self, operation: &'static str, op: F) -> QuorumState
    where
        F: Fn(&dyn Coordinator) -> Result<bool> + Send + Sync + 'static,
    {
        let targets: Vec<usize> = (0..self.coordinators.len()).collect();
        self.fan_out(operation, &targets, op)
    }

    /// Runs `op` on every coordinator in `targets` concurrently and waits at
    /// most one coordinator timeout for the answers.
    fn fan_out<F>(&self, operation: &'static str, targets: &[usize], op: F) -> QuorumState
    where
        F: Fn(&dyn Coordinator) -> Result<bool> + Send + Sync + 'static,
    {
        let op = Arc::new(op);
        let (tx, rx) = mpsc::channel::<(usize, Result<bool>)>();
        let started = Instant::now();

        let mut statuses: Vec<Option<CoordinatorStatus>> = vec![None; targets.len()];
        for (slot, &index) in targets.iter().enumerate() {
            let node = Arc::clone(&self.coordinators[index]);
            let op = Arc::clone(&op);
            let tx = tx.clone();
            let spawned = thread::Builder::new()
                .name(format!("leaselock-{operation}"))
                .spawn(move || {
                    let result = op(node.as_ref());
                    // The receiver is gone once the round has timed out.
                    let _ = tx.send((slot, result));
                });
            if let Err(err) = spawned {
                statuses[slot] = Some(CoordinatorStatus::Failed(format!(
                    "failed to spawn worker: {err}"
                )));
            }
        }
        drop(tx);

        let deadline = started + self.timeout;
        let mut pending = statuses.iter().filter(|status| status.is_none()).count();
        while pending > 0 {
            let wait = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(wait) {
                Ok((slot, result)) => {
                    statuses[slot] = Some(match result {
                        Ok(true) => CoordinatorStatus::Granted,
                        Ok(false) => CoordinatorStatus::Denied,
                        Err(err) => CoordinatorStatus::Failed(err.to_string()),
                    });
                    pending -= 1;
                }
                Err(_) => break,
            }
        }
        let elapsed = started.elapsed();

        let outcomes = targets
            .iter()
            .zip(statuses)
            .map(|(&index, status)| CoordinatorOutcome {
                id: self.coordinators[index].id().clone(),
                status: status.unwrap_or(CoordinatorStatus::TimedOut),
            })
            .collect();

        let state = QuorumState { outcomes, elapsed };
        trace!(
            "Quorum {operation} round finished in {:.3}s: {}",
            elapsed.as_secs_f64(),
            state.summary()
        );
        state
    }

    /// Best-effort compare-and-delete on every node that might hold `token`.
    /// Fire and forget: the caller does not wait for stragglers, and failures
    /// are logged from the worker threads.
    fn cleanup(&self, key: &ResourceKey, token: &OwnerToken, state: &QuorumState) {
        for index in state.possibly_holding() {
            let node = Arc::clone(&self.coordinators[index]);
            let (key_owned, token_owned) = (key.clone(), token.clone());
            let spawned = thread::Builder::new()
                .name("leaselock-cleanup".to_string())
                .spawn(move || match node.release_if_owner(&key_owned, &token_owned) {
                    Ok(deleted) => {
                        trace!("Cleanup of {key_owned} on {}: deleted={deleted}", node.id())
                    }
                    Err(err) => warn!("Cleanup of {key_owned} on {} failed: {err}", node.id()),
                });
            if let Err(err) = spawned {
                warn!("Could not dispatch cleanup of {key}: {err}");
            }
        }
    }

    fn unavailable(&self, key: &ResourceKey, state: &QuorumState) -> LeaseError {
        LeaseError::QuorumUnavailable {
            resource: key.to_string(),
            reachable: state.responsive_count(),
            required: self.quorum(),
        }
    }
}

impl LeaseBackend for QuorumBackend {
    fn describe(&self) -> String {
        format!(
            "quorum({} of {})",
            self.quorum(),
            self.coordinators.len()
        )
    }

    fn attempt(
        &self,
        key: &ResourceKey,
        token: &OwnerToken,
        lease_time: Duration,
    ) -> AttemptOutcome {
        let started = Instant::now();
        let (key_owned, token_owned) = (key.clone(), token.clone());
        let state = self.fan_out_all("acquire", move |node| {
            node.acquire(&key_owned, &token_owned, lease_time)
        });

        let validity = self.validity(lease_time);
        let granted = state.granted_count();
        if granted >= self.quorum() && state.elapsed() < validity {
            return AttemptOutcome::Granted(Lease::new(
                key.clone(),
                token.clone(),
                started + validity,
                state.granted(),
            ));
        }

        if granted >= self.quorum() {
            debug!(
                "Quorum for {key} took {:.3}s, longer than its {:.3}s validity; discarding",
                state.elapsed().as_secs_f64(),
                validity.as_secs_f64()
            );
        }
        self.cleanup(key, token, &state);

        if state.responsive_count() < self.quorum() {
            AttemptOutcome::Unavailable(self.unavailable(key, &state))
        } else {
            AttemptOutcome::Denied
        }
    }

    fn renew(&self, lease: &Lease, lease_time: Duration) -> RenewalOutcome {
        let started = Instant::now();
        let (key, token) = (lease.key().clone(), lease.token().clone());
        let state = self.fan_out_all("extend", move |node| {
            node.extend_if_owner(&key, &token, lease_time)
        });

        let validity = self.validity(lease_time);
        let extended = state.granted_count();
        if extended >= self.quorum() && state.elapsed() < validity {
            return RenewalOutcome::Renewed(lease.renewed(started + validity, state.granted()));
        }

        // More refusals than the cluster can spare: a majority can never
        // confirm this token again.
        if state.denied_count() > self.coordinators.len() - self.quorum() {
            return RenewalOutcome::Rejected;
        }

        if extended >= self.quorum() {
            RenewalOutcome::Inconclusive(format!(
                "renewal took {:.3}s, longer than its {:.3}s validity",
                state.elapsed().as_secs_f64(),
                validity.as_secs_f64()
            ))
        } else {
            RenewalOutcome::Inconclusive(format!(
                "{extended} of {} required coordinators extended the lease ({})",
                self.quorum(),
                state.summary()
            ))
        }
    }

    fn release(&self, lease: &Lease) -> Result<ReleaseOutcome> {
        let (key, token) = (lease.key().clone(), lease.token().clone());
        let state = self.fan_out_all("release", move |node| node.release_if_owner(&key, &token));

        for outcome in state.outcomes() {
            match &outcome.status {
                CoordinatorStatus::Failed(reason) => warn!(
                    "Release of {} on {} failed: {reason}",
                    lease.key(),
                    outcome.id
                ),
                CoordinatorStatus::TimedOut => {
                    warn!("Release of {} on {} timed out", lease.key(), outcome.id)
                }
                _ => {}
            }
        }

        if state.granted_count() > 0 {
            debug!(
                "Released lease for {} on {} of {} coordinators",
                lease.key(),
                state.granted_count(),
                self.coordinators.len()
            );
            return Ok(ReleaseOutcome::Released);
        }

        if state.responsive_count() < self.quorum() {
            return Err(self.unavailable(lease.key(), &state));
        }

        debug!("No coordinator still held the lease for {}", lease.key());
        Ok(ReleaseOutcome::AlreadyExpired)
    }

    fn is_held(&self, lease: &Lease) -> Result<bool> {
        let (key, token) = (lease.key().clone(), lease.token().clone());
        let state = self.fan_out_all("check", move |node| node.is_owner(&key, &token));
        Ok(state.granted_count() >= self.quorum())
    }
}
