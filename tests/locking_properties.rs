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

use leaselock::coordinator::{Coordinator, MemoryCoordinator};
use leaselock::error::LeaseError;
use leaselock::locking::{
    CancellationToken, DistributedLock, LockSettings, LockTimeoutValue, QuorumBackend, QuorumLock,
    ReleaseOutcome, RenewalPolicy, ResourceKey, SingleNodeBackend, SingleNodeLock,
    WatchdogRegistry,
};
use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

fn key() -> ResourceKey {
    ResourceKey::from("job-42")
}

fn settings(lease_ms: u64, renewal: RenewalPolicy) -> LockSettings {
    LockSettings {
        lease_time: Duration::from_millis(lease_ms),
        wait_time: Duration::from_millis(200),
        retry_interval: Duration::from_millis(10),
        acquire_timeout: LockTimeoutValue::from_millis(2_000),
        renewal,
    }
}

fn single_lock(
    node: &Arc<MemoryCoordinator>,
    settings: LockSettings,
    registry: &Arc<WatchdogRegistry>,
) -> SingleNodeLock {
    let coordinator: Arc<dyn Coordinator> = node.clone();
    SingleNodeLock::new(SingleNodeBackend::new(coordinator), settings)
        .unwrap()
        .with_registry(Arc::clone(registry))
}

fn cluster(size: usize) -> Vec<Arc<MemoryCoordinator>> {
    (0..size)
        .map(|i| Arc::new(MemoryCoordinator::new(format!("node-{i}"))))
        .collect()
}

fn quorum_lock(
    nodes: &[Arc<MemoryCoordinator>],
    settings: LockSettings,
    registry: &Arc<WatchdogRegistry>,
) -> QuorumLock {
    quorum_lock_with_timeout(nodes, Duration::from_millis(200), settings, registry)
}

fn quorum_lock_with_timeout(
    nodes: &[Arc<MemoryCoordinator>],
    coordinator_timeout: Duration,
    settings: LockSettings,
    registry: &Arc<WatchdogRegistry>,
) -> QuorumLock {
    let coordinators: Vec<Arc<dyn Coordinator>> = nodes
        .iter()
        .map(|node| Arc::clone(node) as Arc<dyn Coordinator>)
        .collect();
    let backend = QuorumBackend::new(coordinators, coordinator_timeout, 0.01).unwrap();
    QuorumLock::new(backend, settings)
        .unwrap()
        .with_registry(Arc::clone(registry))
}

/// Polls `condition` until it holds or `within` passes.
fn eventually(within: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + within;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
}

fn all_free(nodes: &[Arc<MemoryCoordinator>]) -> bool {
    nodes.iter().all(|node| node.peek(&key()).is_none())
}

/// Runs `workers` threads that each own a lock instance and reports the peak
/// number of simultaneous holders.
fn contend(locks: Vec<Box<dyn DistributedLock>>, rounds: usize) -> usize {
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let threads: Vec<_> = locks
        .into_iter()
        .map(|lock| {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            thread::spawn(move || {
                for _ in 0..rounds {
                    let acquired = lock
                        .try_lock(&key(), Duration::from_millis(500), Duration::from_secs(5))
                        .unwrap();
                    if let Some(mut handle) = acquired {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        let hold_ms = rand::thread_rng().gen_range(1..=4);
                        thread::sleep(Duration::from_millis(hold_ms));
                        active.fetch_sub(1, Ordering::SeqCst);
                        handle.release().unwrap();
                    }
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }
    peak.load(Ordering::SeqCst)
}

#[test]
fn single_node_holders_never_overlap() {
    let node = Arc::new(MemoryCoordinator::new("node-a"));
    let registry = Arc::new(WatchdogRegistry::new());
    let locks: Vec<Box<dyn DistributedLock>> = (0..4)
        .map(|_| {
            Box::new(single_lock(&node, settings(5_000, RenewalPolicy::default()), &registry))
                as Box<dyn DistributedLock>
        })
        .collect();

    assert_eq!(contend(locks, 10), 1);
    assert_eq!(node.peek(&key()), None);
}

#[test]
fn quorum_holders_never_overlap() {
    let nodes = cluster(5);
    let registry = Arc::new(WatchdogRegistry::new());
    let locks: Vec<Box<dyn DistributedLock>> = (0..3)
        .map(|_| {
            Box::new(quorum_lock(&nodes, settings(5_000, RenewalPolicy::default()), &registry))
                as Box<dyn DistributedLock>
        })
        .collect();

    assert_eq!(contend(locks, 5), 1);
    assert!(nodes.iter().all(|node| node.peek(&key()).is_none()));
}

#[test]
fn lease_without_watchdog_expires_for_others() {
    let node = Arc::new(MemoryCoordinator::new("node-a"));
    let registry = Arc::new(WatchdogRegistry::new());
    let holder = single_lock(&node, settings(100, RenewalPolicy::Disabled), &registry);
    let other = single_lock(&node, settings(100, RenewalPolicy::Disabled), &registry);

    let mut handle = holder.lock(&key()).unwrap();
    assert!(!handle.has_watchdog());

    thread::sleep(Duration::from_millis(40));
    let early = other
        .try_lock(&key(), Duration::from_millis(10), Duration::from_secs(5))
        .unwrap();
    assert!(early.is_none(), "lease was taken before its ttl ran out");
    assert!(holder.is_held(&handle).unwrap());

    thread::sleep(Duration::from_millis(100));

    let mut taken = other
        .try_lock(&key(), Duration::from_millis(50), Duration::from_secs(5))
        .unwrap()
        .expect("expired lease should be free");
    assert!(!holder.is_held(&handle).unwrap());
    assert!(matches!(handle.ensure_held(), Err(LeaseError::LeaseLost { .. })));
    assert_eq!(handle.release().unwrap(), ReleaseOutcome::AlreadyExpired);

    // The stale release must not disturb the new owner.
    assert!(other.is_held(&taken).unwrap());
    assert_eq!(taken.release().unwrap(), ReleaseOutcome::Released);
}

#[test]
fn watchdog_keeps_lease_past_several_ttls() {
    let node = Arc::new(MemoryCoordinator::new("node-a"));
    let registry = Arc::new(WatchdogRegistry::new());
    let holder = single_lock(&node, settings(150, RenewalPolicy::LeaseFraction(3)), &registry);
    let other = single_lock(&node, settings(150, RenewalPolicy::Disabled), &registry);

    let mut handle = holder.lock(&key()).unwrap();
    assert!(handle.has_watchdog());
    assert_eq!(registry.active_count(), 1);

    thread::sleep(Duration::from_millis(500));
    assert!(holder.is_held(&handle).unwrap());
    let contended = other
        .try_lock(&key(), Duration::from_millis(30), Duration::from_millis(150))
        .unwrap();
    assert!(contended.is_none());

    assert_eq!(handle.release().unwrap(), ReleaseOutcome::Released);
    assert_eq!(registry.active_count(), 0);
    assert_eq!(node.peek(&key()), None);
}

#[test]
fn quorum_watchdog_keeps_lease_then_reports_majority_loss() {
    let nodes = cluster(3);
    let registry = Arc::new(WatchdogRegistry::new());
    let holder = quorum_lock(&nodes, settings(150, RenewalPolicy::LeaseFraction(3)), &registry);
    let other = quorum_lock(&nodes, settings(150, RenewalPolicy::Disabled), &registry);

    let mut handle = holder.lock(&key()).unwrap();
    assert!(handle.has_watchdog());

    thread::sleep(Duration::from_millis(600));
    assert!(holder.is_held(&handle).unwrap());
    assert!(!handle.is_lease_lost());
    let contended = other
        .try_lock(&key(), Duration::from_millis(30), Duration::from_millis(150))
        .unwrap();
    assert!(contended.is_none());

    nodes[0].set_available(false);
    nodes[1].set_available(false);
    assert!(eventually(Duration::from_secs(1), || handle.is_lease_lost()));
    assert!(matches!(handle.ensure_held(), Err(LeaseError::LeaseLost { .. })));
    assert!(!holder.is_held(&handle).unwrap());

    nodes[0].set_available(true);
    nodes[1].set_available(true);
    assert!(handle.release().is_ok());
    assert_eq!(registry.active_count(), 0);
}

#[test]
fn quorum_survives_minority_outage() {
    let nodes = cluster(5);
    nodes[0].set_available(false);
    nodes[3].set_available(false);
    let registry = Arc::new(WatchdogRegistry::new());
    let lock = quorum_lock(&nodes, settings(2_000, RenewalPolicy::default()), &registry);

    let mut handle = lock.lock(&key()).unwrap();
    let snapshot = handle.snapshot().unwrap();
    assert_eq!(snapshot.confirmed_by.len(), 3);
    assert_eq!(handle.release().unwrap(), ReleaseOutcome::Released);
}

#[test]
fn quorum_reports_majority_outage() {
    let nodes = cluster(5);
    for node in &nodes[..3] {
        node.set_available(false);
    }
    let registry = Arc::new(WatchdogRegistry::new());
    let lock = quorum_lock(&nodes, settings(2_000, RenewalPolicy::default()), &registry);

    let err = lock
        .try_lock(&key(), Duration::from_millis(50), Duration::from_secs(2))
        .unwrap_err();
    match err {
        LeaseError::QuorumUnavailable {
            reachable,
            required,
            ..
        } => {
            assert_eq!(reachable, 2);
            assert_eq!(required, 3);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(eventually(Duration::from_secs(1), || all_free(&nodes)));
    assert!(!lock.holds(&key()));
}

#[test]
fn partitioned_quorum_returns_within_one_coordinator_timeout() {
    let nodes = cluster(3);
    nodes[1].set_latency(Duration::from_millis(400));
    nodes[2].set_latency(Duration::from_millis(400));
    let registry = Arc::new(WatchdogRegistry::new());
    let coordinator_timeout = Duration::from_millis(100);
    let wait_time = Duration::from_millis(50);
    let lock = quorum_lock_with_timeout(
        &nodes,
        coordinator_timeout,
        settings(2_000, RenewalPolicy::Disabled),
        &registry,
    );

    let started = Instant::now();
    let result = lock.try_lock(&key(), wait_time, Duration::from_secs(2));
    let took = started.elapsed();

    assert!(matches!(result, Err(LeaseError::QuorumUnavailable { .. })));
    assert!(
        took < wait_time + coordinator_timeout,
        "try_lock took {took:?}, over the {:?} bound",
        wait_time + coordinator_timeout
    );

    // Late grants from the slow nodes are still cleaned up in the background.
    assert!(eventually(Duration::from_secs(2), || all_free(&nodes)));
}

#[test]
fn slow_quorum_round_leaves_no_partial_grants() {
    let nodes = cluster(3);
    for node in &nodes {
        node.set_latency(Duration::from_millis(40));
    }
    let registry = Arc::new(WatchdogRegistry::new());
    let lock = quorum_lock(&nodes, settings(30, RenewalPolicy::Disabled), &registry);

    let acquired = lock
        .try_lock(&key(), Duration::from_millis(1), Duration::from_millis(30))
        .unwrap();
    assert!(acquired.is_none());
    assert!(eventually(Duration::from_secs(1), || all_free(&nodes)));
}

#[test]
fn release_twice_reports_already_expired() {
    let node = Arc::new(MemoryCoordinator::new("node-a"));
    let registry = Arc::new(WatchdogRegistry::new());
    let lock = single_lock(&node, settings(2_000, RenewalPolicy::default()), &registry);

    let mut handle = lock.lock(&key()).unwrap();
    assert_eq!(lock.unlock(&mut handle).unwrap(), ReleaseOutcome::Released);
    assert_eq!(lock.unlock(&mut handle).unwrap(), ReleaseOutcome::AlreadyExpired);
    assert!(!lock.holds(&key()));
}

#[test]
fn bounded_wait_gives_up_then_succeeds_after_release() {
    let node = Arc::new(MemoryCoordinator::new("node-a"));
    let registry = Arc::new(WatchdogRegistry::new());
    let worker_a = single_lock(&node, settings(10_000, RenewalPolicy::default()), &registry);
    let worker_b = single_lock(&node, settings(10_000, RenewalPolicy::default()), &registry);

    let mut held = worker_a.lock(&key()).unwrap();

    let started = Instant::now();
    let attempt = worker_b
        .try_lock(&key(), Duration::from_millis(200), Duration::from_secs(10))
        .unwrap();
    assert!(attempt.is_none());
    assert!(started.elapsed() >= Duration::from_millis(200));
    assert!(started.elapsed() < Duration::from_secs(2));

    held.release().unwrap();
    let mut handle = worker_b
        .try_lock(&key(), Duration::from_millis(200), Duration::from_secs(10))
        .unwrap()
        .expect("released key should be acquirable");
    handle.release().unwrap();
}

#[test]
fn cancellation_interrupts_blocking_lock() {
    let node = Arc::new(MemoryCoordinator::new("node-a"));
    let registry = Arc::new(WatchdogRegistry::new());
    let holder = single_lock(&node, settings(5_000, RenewalPolicy::default()), &registry);
    let waiter = single_lock(&node, settings(5_000, RenewalPolicy::default()), &registry);
    let mut held = holder.lock(&key()).unwrap();

    let token = CancellationToken::new();
    let canceller = {
        let token = token.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            token.cancel();
        })
    };

    let started = Instant::now();
    let err = waiter.lock_cancellable(&key(), &token).unwrap_err();
    canceller.join().unwrap();

    assert!(matches!(err, LeaseError::Cancelled { .. }));
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(!waiter.holds(&key()));
    held.release().unwrap();
}

#[test]
fn dropped_handles_leave_no_watchdogs() {
    let node = Arc::new(MemoryCoordinator::new("node-a"));
    let registry = Arc::new(WatchdogRegistry::new());
    let lock = single_lock(&node, settings(300, RenewalPolicy::default()), &registry);

    for name in ["alpha", "beta", "gamma"] {
        let handle = lock.lock(&ResourceKey::from(name)).unwrap();
        assert!(registry.is_active(handle.key()));
        drop(handle);
    }

    assert_eq!(registry.active_count(), 0);
    assert!(registry.snapshot().is_empty());
    assert_eq!(node.peek(&ResourceKey::from("alpha")), None);
}
