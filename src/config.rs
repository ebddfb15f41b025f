use crate::error::{LeaseError, Result};
use crate::locking::controller::{LockSettings, RenewalPolicy};
use crate::locking::timeout::{LockTimeoutValue, parse_timeout_override};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const CONFIG_FILE_NAME: &str = "leaselock.toml";
const ENV_PREFIX: &str = "LEASELOCK";

const DEFAULT_LEASE_MS: u64 = 10_000;
const DEFAULT_WAIT_MS: u64 = 5_000;
const DEFAULT_RETRY_INTERVAL_MS: u64 = 100;
const DEFAULT_ACQUIRE_TIMEOUT: &str = "60";
const DEFAULT_CLOCK_DRIFT_FACTOR: f64 = 0.01;
const DEFAULT_COORDINATOR_TIMEOUT_MS: u64 = 500;
const DEFAULT_COORDINATOR_ADDRESS: &str = "memory://node-0";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LeaseLockConfig {
    #[serde(default)]
    pub locking: LockingConfig,

    #[serde(default)]
    pub coordinators: CoordinatorConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LockStrategy {
    #[default]
    Single,
    Quorum,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockingConfig {
    #[serde(default)]
    pub strategy: LockStrategy,

    #[serde(default = "default_lease_ms")]
    pub lease_ms: u64,

    #[serde(default = "default_wait_ms")]
    pub wait_ms: u64,

    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,

    /// Seconds, `<n>ms`, or `infinite`.
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout: String,

    #[serde(default = "default_clock_drift_factor")]
    pub clock_drift_factor: f64,

    #[serde(default)]
    pub watchdog: WatchdogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Defaults to a third of the lease time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cadence_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    #[serde(default)]
    pub backend: BackendKind,

    #[serde(default = "default_addresses")]
    pub addresses: Vec<String>,

    #[serde(default = "default_coordinator_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for LockingConfig {
    fn default() -> Self {
        Self {
            strategy: LockStrategy::default(),
            lease_ms: DEFAULT_LEASE_MS,
            wait_ms: DEFAULT_WAIT_MS,
            retry_interval_ms: DEFAULT_RETRY_INTERVAL_MS,
            acquire_timeout: default_acquire_timeout(),
            clock_drift_factor: DEFAULT_CLOCK_DRIFT_FACTOR,
            watchdog: WatchdogConfig::default(),
        }
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cadence_ms: None,
        }
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            addresses: default_addresses(),
            timeout_ms: DEFAULT_COORDINATOR_TIMEOUT_MS,
        }
    }
}

fn default_lease_ms() -> u64 {
    DEFAULT_LEASE_MS
}

fn default_wait_ms() -> u64 {
    DEFAULT_WAIT_MS
}

fn default_retry_interval_ms() -> u64 {
    DEFAULT_RETRY_INTERVAL_MS
}

fn default_acquire_timeout() -> String {
    DEFAULT_ACQUIRE_TIMEOUT.to_string()
}

fn default_clock_drift_factor() -> f64 {
    DEFAULT_CLOCK_DRIFT_FACTOR
}

fn default_true() -> bool {
    true
}

fn default_addresses() -> Vec<String> {
    vec![DEFAULT_COORDINATOR_ADDRESS.to_string()]
}

fn default_coordinator_timeout_ms() -> u64 {
    DEFAULT_COORDINATOR_TIMEOUT_MS
}

impl LockingConfig {
    pub fn lease_time(&self) -> Duration {
        Duration::from_millis(self.lease_ms)
    }

    pub fn wait_time(&self) -> Duration {
        Duration::from_millis(self.wait_ms)
    }

    pub fn acquire_timeout(&self) -> Result<LockTimeoutValue> {
        parse_timeout_override(&self.acquire_timeout).map_err(|err| {
            LeaseError::InvalidConfiguration(format!("locking.acquire_timeout: {err}"))
        })
    }

    pub fn renewal(&self) -> RenewalPolicy {
        match (self.watchdog.enabled, self.watchdog.cadence_ms) {
            (false, _) => RenewalPolicy::Disabled,
            (true, Some(cadence)) => RenewalPolicy::Fixed(Duration::from_millis(cadence)),
            (true, None) => RenewalPolicy::default(),
        }
    }

    pub fn settings(&self) -> Result<LockSettings> {
        Ok(LockSettings {
            lease_time: self.lease_time(),
            wait_time: self.wait_time(),
            retry_interval: Duration::from_millis(self.retry_interval_ms),
            acquire_timeout: self.acquire_timeout()?,
            renewal: self.renewal(),
        })
    }
}

impl CoordinatorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl LeaseLockConfig {
    /// Loads configuration from `path` (required to exist when given) or from
    /// `leaselock.toml` in the working directory (optional), then applies
    /// `LEASELOCK_*` environment overrides such as
    /// `LEASELOCK_LOCKING__LEASE_MS=3000` or
    /// `LEASELOCK_COORDINATORS__ADDRESSES=redis://a:6379,redis://b:6379`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => File::from(path).format(FileFormat::Toml).required(true),
            None => File::with_name(CONFIG_FILE_NAME)
                .format(FileFormat::Toml)
                .required(false),
        };

        let config: LeaseLockConfig = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("coordinators.addresses")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        log::debug!(
            "Loaded configuration: strategy {:?}, {} coordinator(s)",
            config.locking.strategy,
            config.coordinators.addresses.len()
        );
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let locking = &self.locking;
        if locking.lease_ms == 0 {
            return Err(invalid("locking.lease_ms must be greater than zero"));
        }
        if locking.retry_interval_ms == 0 {
            return Err(invalid("locking.retry_interval_ms must be greater than zero"));
        }
        if !(0.0..1.0).contains(&locking.clock_drift_factor) {
            return Err(invalid("locking.clock_drift_factor must be in [0, 1)"));
        }
        locking.acquire_timeout()?;

        if let Some(cadence) = locking.watchdog.cadence_ms
            && (cadence == 0 || cadence >= locking.lease_ms)
        {
            return Err(invalid(
                "locking.watchdog.cadence_ms must be greater than zero and below locking.lease_ms",
            ));
        }

        let coordinators = &self.coordinators;
        if coordinators.timeout_ms == 0 {
            return Err(invalid("coordinators.timeout_ms must be greater than zero"));
        }
        if coordinators.addresses.iter().any(|address| address.trim().is_empty()) {
            return Err(invalid("coordinators.addresses must not contain empty entries"));
        }

        let count = coordinators.addresses.len();
        match locking.strategy {
            LockStrategy::Single if count != 1 => Err(LeaseError::InvalidConfiguration(format!(
                "Single-node locking needs exactly one coordinator address, got {count}"
            ))),
            LockStrategy::Quorum if count < 3 || count % 2 == 0 => {
                Err(LeaseError::InvalidConfiguration(format!(
                    "Quorum locking needs an odd number of at least 3 coordinator addresses, got {count}"
                )))
            }
            LockStrategy::Quorum => {
                let drift = locking.lease_ms as f64 * locking.clock_drift_factor + 2.0;
                if drift >= locking.lease_ms as f64 {
                    return Err(invalid(
                        "locking.lease_ms is too short to cover the clock drift allowance",
                    ));
                }
                Ok(())
            }
            LockStrategy::Single => Ok(()),
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| LeaseError::ConfigFile(format!("Failed to serialize config: {e}")))
    }
}

fn invalid(message: &str) -> LeaseError {
    LeaseError::InvalidConfiguration(message.to_string())
}
