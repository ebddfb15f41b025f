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

use log::warn;
use signal_hook::SigId;
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use signal_hook::flag;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::time::{Duration, Instant};

#[cfg(windows)]
use signal_hook::consts::signal::SIGBREAK;

/// Signal handlers can only flip the flag, so waiters re-check it at least this often.
const SIGNAL_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug)]
struct Shared {
    flag: Arc<AtomicBool>,
    gate: Mutex<()>,
    wakeup: Condvar,
}

/// Token used to stop a waiting lock acquisition from another thread or a signal.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    shared: Arc<Shared>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::from_shared(Arc::new(AtomicBool::new(false)))
    }

    pub(crate) fn from_shared(flag: Arc<AtomicBool>) -> Self {
        Self {
            shared: Arc::new(Shared {
                flag,
                gate: Mutex::new(()),
                wakeup: Condvar::new(),
            }),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.flag.load(Ordering::Relaxed)
    }

    /// Marks the token as cancelled and wakes every thread blocked in [`wait_timeout`].
    ///
    /// [`wait_timeout`]: CancellationToken::wait_timeout
    pub fn cancel(&self) {
        self.shared.flag.store(true, Ordering::SeqCst);
        let _gate = self
            .shared
            .gate
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        self.shared.wakeup.notify_all();
    }

    /// Sleeps for up to `duration`, returning `true` as soon as the token is cancelled.
    pub fn wait_timeout(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut gate = self
            .shared
            .gate
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        loop {
            if self.is_cancelled() {
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            let slice = remaining.min(SIGNAL_POLL_INTERVAL);
            gate = match self.shared.wakeup.wait_timeout(gate, slice) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
struct CancellationRegistry {
    flag: Arc<AtomicBool>,
    _handles: Vec<SigId>,
}

impl CancellationRegistry {
    fn new() -> Self {
        let flag = Arc::new(AtomicBool::new(false));
        let mut handles = Vec::new();

        for signal in registered_signals() {
            match flag::register(*signal, flag.clone()) {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    warn!("Failed to register cancellation handler for signal {signal}: {err}")
                }
            }
        }

        Self {
            flag,
            _handles: handles,
        }
    }

    fn token(&self) -> CancellationToken {
        CancellationToken::from_shared(self.flag.clone())
    }
}

fn registered_signals() -> &'static [i32] {
    #[cfg(windows)]
    {
        static SIGNALS: [i32; 3] = [SIGINT, SIGTERM, SIGBREAK];
        &SIGNALS
    }

    #[cfg(not(windows))]
    {
        static SIGNALS: [i32; 2] = [SIGINT, SIGTERM];
        &SIGNALS
    }
}

static GLOBAL_REGISTRY: OnceLock<CancellationRegistry> = OnceLock::new();

/// Returns a cancellation token backed by global SIGINT/SIGTERM handlers.
pub fn global_token() -> CancellationToken {
    GLOBAL_REGISTRY
        .get_or_init(CancellationRegistry::new)
        .token()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn wait_times_out_when_not_cancelled() {
        let token = CancellationToken::new();
        let started = Instant::now();
        assert!(!token.wait_timeout(Duration::from_millis(30)));
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn cancel_wakes_waiter_early() {
        let token = CancellationToken::new();
        let remote = token.clone();
        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.cancel();
        });

        let started = Instant::now();
        assert!(token.wait_timeout(Duration::from_secs(10)));
        assert!(started.elapsed() < Duration::from_secs(2));
        canceller.join().unwrap();
    }

    #[test]
    fn shared_flag_is_observed_without_notify() {
        let flag = Arc::new(AtomicBool::new(false));
        let token = CancellationToken::from_shared(flag.clone());
        flag.store(true, Ordering::SeqCst);
        assert!(token.is_cancelled());
        assert!(token.wait_timeout(Duration::from_secs(1)));
    }
}
