// Copyright 2025 Felipe Torres González
//
//    Licensed under the Apache License, Version 2.0 (the "License");
//    you may not use this file except in compliance with the License.
//    You may obtain a copy of the License at
//
//        http://www.apache.org/licenses/LICENSE-2.0
//
//    Unless required by applicable law or agreed to in writing, software
//    distributed under the License is distributed on an "AS IS" BASIS,
//    WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//    See the License for the specific language governing permissions and
//    limitations under the License.

//! Valkey implementation of [CountStore].

use crate::{configuration::ValkeySettings, errors::CacheError, store::CountStore};
use redis::{AsyncCommands, AsyncConnectionConfig, RedisResult, aio::MultiplexedConnection};
use std::time::Duration;
use tracing::{error, info, trace, warn};

/// Attempts made to reach the server when the store is built.
const CONNECT_ATTEMPTS: u32 = 3;
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// TTL in milliseconds for `PSETEX`, which refuses a zero expiry.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// Handle to a Valkey server.
///
/// # Description
///
/// The handle keeps a single multiplexed connection that is cloned for every request. Cloning a
/// [MultiplexedConnection] is cheap and all the clones share the same socket, so the handle can be
/// shared by as many tasks as needed. The connection is owned by whoever builds the store (usually
/// the `main` of the application), and it goes away when the last clone is dropped.
#[derive(Clone)]
pub struct ValkeyStore {
    con: MultiplexedConnection,
}

impl ValkeyStore {
    /// Connect to the server described by `settings`.
    ///
    /// # Description
    ///
    /// The server is probed with a `PING` before returning. A failed attempt is retried up to
    /// [CONNECT_ATTEMPTS] times with an exponential backoff.
    pub async fn connect(settings: &ValkeySettings) -> Result<Self, CacheError> {
        let client = redis::Client::open(settings.url())?;
        let config = settings.connection_config();
        let mut delay = CONNECT_RETRY_DELAY;
        let mut attempt = 1;

        loop {
            match Self::try_connect(&client, &config).await {
                Ok(con) => {
                    info!(
                        "Connected to Valkey at {}:{} (attempt {attempt})",
                        settings.valkey_host, settings.valkey_port
                    );
                    return Ok(Self { con });
                }
                Err(e) if attempt < CONNECT_ATTEMPTS => {
                    warn!(
                        "Valkey connection attempt {attempt}/{CONNECT_ATTEMPTS} failed, retrying in {delay:?}: {e}"
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => {
                    error!("All the Valkey connection attempts failed: {e}");
                    return Err(e.into());
                }
            }
        }
    }

    /// Build the store on top of an already open connection.
    pub fn from_connection(con: MultiplexedConnection) -> Self {
        Self { con }
    }

    async fn try_connect(
        client: &redis::Client,
        config: &AsyncConnectionConfig,
    ) -> RedisResult<MultiplexedConnection> {
        let mut con = client
            .get_multiplexed_async_connection_with_config(config)
            .await?;
        let _: String = redis::cmd("PING").query_async(&mut con).await?;

        Ok(con)
    }
}

impl CountStore for ValkeyStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut con = self.con.clone();

        Ok(con.get::<_, Option<String>>(key).await?)
    }

    async fn multi_get(&self, keys: &[String]) -> Result<Vec<Option<String>>, CacheError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut con = self.con.clone();

        // Send MGET explicitly: a single key must still produce an array reply.
        Ok(redis::cmd("MGET")
            .arg(keys)
            .query_async::<Vec<Option<String>>>(&mut con)
            .await?)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let mut con = self.con.clone();

        if ttl.is_zero() {
            let _: () = con.set(key, value).await?;
        } else {
            let _: () = con.pset_ex(key, value, ttl_millis(ttl)).await?;
        }

        Ok(())
    }

    async fn pipelined_multi_set(
        &self,
        entries: Vec<(String, String)>,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        for (key, value) in entries {
            if ttl.is_zero() {
                pipe.set(key, value).ignore();
            } else {
                pipe.pset_ex(key, value, ttl_millis(ttl)).ignore();
            }
        }

        let mut con = self.con.clone();
        pipe.query_async::<()>(&mut con).await?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut con = self.con.clone();
        let _: () = con.del(key).await?;

        Ok(())
    }

    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<(Vec<String>, u64), CacheError> {
        let mut con = self.con.clone();

        let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut con)
            .await?;

        trace!("SCAN {cursor} returned {} keys, next cursor {next_cursor}", keys.len());

        Ok((keys, next_cursor))
    }
}
