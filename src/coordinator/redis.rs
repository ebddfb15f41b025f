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

//! Coordination node backed by a Redis server.
//!
//! SET-IF-ABSENT maps to `SET key token NX PX ttl`; the compare-and-delete
//! and extend-if-owner operations run as Lua scripts so the comparison and
//! the write happen in one server-side step.

use crate::coordinator::{Coordinator, CoordinatorId};
use crate::error::{LeaseError, Result};
use crate::locking::lease::{OwnerToken, ResourceKey};
use ::redis::{Client, Connection, RedisResult, Script};
use log::{debug, warn};
use std::sync::Mutex;
use std::time::Duration;

const RELEASE_SCRIPT: &str = r#"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('del', KEYS[1])
else
    return 0
end
"#;

const EXTEND_SCRIPT: &str = r#"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('pexpire', KEYS[1], ARGV[2])
else
    return 0
end
"#;

pub struct RedisCoordinator {
    id: CoordinatorId,
    client: Client,
    timeout: Duration,
    connection: Mutex<Option<Connection>>,
    release_script: Script,
    extend_script: Script,
}

impl RedisCoordinator {
    /// Creates a client for `address` (e.g. `redis://127.0.0.1:6379`). No
    /// connection is opened until the first operation.
    pub fn new(address: &str, timeout: Duration) -> Result<Self> {
        let client = Client::open(address).map_err(|err| {
            LeaseError::InvalidConfiguration(format!(
                "Invalid Redis coordinator address '{address}': {err}"
            ))
        })?;

        Ok(Self {
            id: CoordinatorId::new(address),
            client,
            timeout,
            connection: Mutex::new(None),
            release_script: Script::new(RELEASE_SCRIPT),
            extend_script: Script::new(EXTEND_SCRIPT),
        })
    }

    fn connect(&self) -> RedisResult<Connection> {
        let connection = self.client.get_connection_with_timeout(self.timeout)?;
        connection.set_read_timeout(Some(self.timeout))?;
        connection.set_write_timeout(Some(self.timeout))?;
        debug!("Connected to coordinator {}", self.id);
        Ok(connection)
    }

    /// Runs `operation` on the cached connection, reconnecting first if needed.
    /// Any failure discards the connection so the next call starts clean.
    fn with_connection<T>(
        &self,
        operation: &str,
        f: impl FnOnce(&mut Connection) -> RedisResult<T>,
    ) -> Result<T> {
        let mut slot = self
            .connection
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let outcome = match slot.take() {
            Some(connection) => Ok(connection),
            None => self.connect(),
        }
        .and_then(|mut connection| f(&mut connection).map(|value| (value, connection)));

        match outcome {
            Ok((value, connection)) => {
                *slot = Some(connection);
                Ok(value)
            }
            Err(err) => {
                warn!("Coordinator {} failed during {operation}: {err}", self.id);
                Err(LeaseError::unavailable(
                    self.id.as_str(),
                    format!("{operation}: {err}"),
                ))
            }
        }
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    ttl.as_millis().max(1) as u64
}

impl Coordinator for RedisCoordinator {
    fn id(&self) -> &CoordinatorId {
        &self.id
    }

    fn acquire(&self, key: &ResourceKey, token: &OwnerToken, ttl: Duration) -> Result<bool> {
        let reply: Option<String> = self.with_connection("acquire", |connection| {
            ::redis::cmd("SET")
                .arg(key.as_str())
                .arg(token.as_str())
                .arg("NX")
                .arg("PX")
                .arg(ttl_millis(ttl))
                .query(connection)
        })?;
        Ok(reply.as_deref() == Some("OK"))
    }

    fn release_if_owner(&self, key: &ResourceKey, token: &OwnerToken) -> Result<bool> {
        let deleted: i64 = self.with_connection("release", |connection| {
            self.release_script
                .key(key.as_str())
                .arg(token.as_str())
                .invoke(connection)
        })?;
        Ok(deleted == 1)
    }

    fn extend_if_owner(
        &self,
        key: &ResourceKey,
        token: &OwnerToken,
        ttl: Duration,
    ) -> Result<bool> {
        let extended: i64 = self.with_connection("extend", |connection| {
            self.extend_script
                .key(key.as_str())
                .arg(token.as_str())
                .arg(ttl_millis(ttl))
                .invoke(connection)
        })?;
        Ok(extended == 1)
    }

    fn get(&self, key: &ResourceKey) -> Result<Option<String>> {
        self.with_connection("get", |connection| {
            ::redis::cmd("GET").arg(key.as_str()).query(connection)
        })
    }
}
