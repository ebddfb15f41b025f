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

//! Contention exercise against in-process coordinators.
//!
//! Every worker gets its own lock instance, the way separate processes would,
//! and all of them share the same coordinator nodes.

use crate::config::LeaseLockConfig;
use crate::coordinator::{Coordinator, MemoryCoordinator};
use crate::error::{LeaseError, Result};
use crate::locking::controller::LockController;
use crate::locking::lease::ResourceKey;
use crate::locking::watchdog::WatchdogRegistry;
use log::debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

const CRITICAL_SECTION: Duration = Duration::from_millis(2);

#[derive(Debug, Default)]
pub struct SimulationReport {
    pub acquisitions: usize,
    pub contended: usize,
    pub max_concurrent: usize,
    pub elapsed: Duration,
}

impl SimulationReport {
    /// Fails when more than one worker was ever inside the critical section.
    pub fn verify(&self, key: &str) -> Result<()> {
        if self.max_concurrent > 1 {
            return Err(LeaseError::ExclusionViolated {
                resource: key.to_string(),
                holders: self.max_concurrent,
            });
        }
        Ok(())
    }
}

#[derive(Default)]
struct Counters {
    active: AtomicUsize,
    max_active: AtomicUsize,
    acquisitions: AtomicUsize,
    contended: AtomicUsize,
}

pub struct SimulateCommand<'a> {
    config: &'a LeaseLockConfig,
}

impl<'a> SimulateCommand<'a> {
    pub fn new(config: &'a LeaseLockConfig) -> Result<Self> {
        Ok(Self { config })
    }

    pub fn execute(&self, workers: usize, rounds: usize, key: &str) -> Result<()> {
        let report = self.run(workers, rounds, key)?;
        println!(
            "workers: {workers}, rounds: {rounds}, acquisitions: {}, contended: {}, elapsed: {:.3}s",
            report.acquisitions,
            report.contended,
            report.elapsed.as_secs_f64()
        );
        println!("max concurrent holders: {}", report.max_concurrent);
        report.verify(key)
    }

    pub fn run(&self, workers: usize, rounds: usize, key: &str) -> Result<SimulationReport> {
        if workers == 0 {
            return Err(LeaseError::InvalidConfiguration(
                "--workers must be at least 1".to_string(),
            ));
        }
        self.config.validate()?;

        let nodes: Vec<Arc<dyn Coordinator>> = self
            .config
            .coordinators
            .addresses
            .iter()
            .map(|address| Arc::new(MemoryCoordinator::new(address.as_str())) as Arc<dyn Coordinator>)
            .collect();
        let registry = Arc::new(WatchdogRegistry::new());
        let counters = Arc::new(Counters::default());
        let key = ResourceKey::from(key);
        let started = Instant::now();

        let mut threads = Vec::with_capacity(workers);
        for worker in 0..workers {
            let lock =
                LockController::with_coordinators(self.config, nodes.clone(), Arc::clone(&registry))?;
            let counters = Arc::clone(&counters);
            let key = key.clone();
            let thread = thread::Builder::new()
                .name(format!("leaselock-sim-{worker}"))
                .spawn(move || -> Result<()> {
                    let settings = lock.settings().clone();
                    for _ in 0..rounds {
                        match lock.try_lock(&key, settings.wait_time, settings.lease_time)? {
                            Some(mut handle) => {
                                counters.enter();
                                thread::sleep(CRITICAL_SECTION);
                                counters.leave();
                                handle.release()?;
                            }
                            None => {
                                counters.contended.fetch_add(1, Ordering::SeqCst);
                            }
                        }
                    }
                    debug!("Simulation worker {worker} finished");
                    Ok(())
                })?;
            threads.push(thread);
        }

        for thread in threads {
            match thread.join() {
                Ok(result) => result?,
                Err(_) => {
                    return Err(LeaseError::Io(std::io::Error::other(
                        "simulation worker panicked",
                    )));
                }
            }
        }

        Ok(SimulationReport {
            acquisitions: counters.acquisitions.load(Ordering::SeqCst),
            contended: counters.contended.load(Ordering::SeqCst),
            max_concurrent: counters.max_active.load(Ordering::SeqCst),
            elapsed: started.elapsed(),
        })
    }
}

impl Counters {
    fn enter(&self) {
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LockStrategy;
    use crate::error::get_exit_code;

    #[test]
    fn single_node_simulation_is_exclusive() {
        let config = LeaseLockConfig::default();
        let report = SimulateCommand::new(&config)
            .unwrap()
            .run(4, 10, "sim")
            .unwrap();
        assert_eq!(report.max_concurrent, 1);
        assert_eq!(report.acquisitions + report.contended, 40);
    }

    #[test]
    fn quorum_simulation_is_exclusive() {
        let mut config = LeaseLockConfig::default();
        config.locking.strategy = LockStrategy::Quorum;
        config.coordinators.addresses = (0..5).map(|i| format!("memory://node-{i}")).collect();

        let report = SimulateCommand::new(&config)
            .unwrap()
            .run(3, 5, "sim")
            .unwrap();
        assert_eq!(report.max_concurrent, 1);
        assert!(report.acquisitions > 0);
    }

    #[test]
    fn overlapping_holders_fail_verification() {
        let report = SimulationReport {
            acquisitions: 10,
            max_concurrent: 2,
            ..SimulationReport::default()
        };
        let err = report.verify("sim").unwrap_err();
        assert!(matches!(
            err,
            LeaseError::ExclusionViolated { holders: 2, .. }
        ));
        assert_eq!(get_exit_code(&err), 5);

        let clean = SimulationReport {
            max_concurrent: 1,
            ..SimulationReport::default()
        };
        assert!(clean.verify("sim").is_ok());
    }

    #[test]
    fn zero_workers_is_rejected() {
        let config = LeaseLockConfig::default();
        let err = SimulateCommand::new(&config).unwrap().run(0, 1, "sim").unwrap_err();
        assert!(matches!(err, LeaseError::InvalidConfiguration(_)));
    }
}
