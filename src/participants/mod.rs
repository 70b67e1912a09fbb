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

//! Module that includes all the logic related to the participants count of the chats.
//!
//! # Description
//!
//! Asking the chat platform for the number of members of a chat is slow and rate limited, so the
//! counts are kept in a cache ([CountCache]) and served from there. The cache is kept warm by a
//! background worker ([RefreshWorker]) that runs two loops:
//!
//! - A stale sweep that refreshes the entries older than a threshold, every few minutes.
//! - A full refresh of every known chat, once a day at a fixed hour.
//!
//! The worker doesn't know how counts are refreshed: it delegates on an [Updater]. The production
//! updater is [ParticipantsUpdater].

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

mod breaker;
mod cache;
mod shutdown;
mod updater;
mod worker;

pub use breaker::{CallPermit, CircuitBreaker, CircuitState};
pub use cache::CountCache;
pub use shutdown::ShutdownToken;
pub use updater::{ParticipantsUpdater, Updater};
pub use worker::{RefreshWorker, WorkerState, next_full_update};

/// Prefix of every key of the participants cache.
///
/// # Description
///
/// The prefix doubles as the match pattern of the staleness scan, so it must be reserved for the
/// participants cache: any other key under it would be taken as a (malformed) cache entry.
pub const KEY_PREFIX: &str = "chat_participants:";

/// Where a participants count comes from.
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Read from the cache.
    #[default]
    Cache,
    /// Fetched right now from the chat platform.
    Platform,
    /// Last value saved in the chat directory, served when the platform can't be reached.
    Database,
}

/// Participants count of a chat.
///
/// # Description
///
/// This is the record kept in the cache for each chat. Records are never modified: every refresh
/// writes a brand new record with [ParticipantsInfo::updated_at] set to the time of the write.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParticipantsInfo {
    /// Last known number of members of the chat.
    pub count: u64,
    /// Time of the last write of the record.
    pub updated_at: DateTime<Utc>,
    /// See [Origin].
    pub source: Origin,
}

impl ParticipantsInfo {
    pub fn new(count: u64) -> Self {
        ParticipantsInfo {
            count,
            updated_at: Utc::now(),
            source: Origin::Cache,
        }
    }

    /// Time elapsed since the last write.
    pub fn age(&self) -> TimeDelta {
        Utc::now() - self.updated_at
    }
}

/// Configuration of the participants refresh.
///
/// # Description
///
/// This object is immutable once loaded. Build it from the configuration files using
/// [crate::configuration::ParticipantsSettings::validated].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantsConfig {
    /// Master switch of the background refresh.
    pub enable_background_sync: bool,
    /// Period of the stale sweep.
    pub update_interval: Duration,
    /// Local hour at which the full refresh runs, in `[0, 23]`.
    pub full_update_hour: u32,
    /// Maximum number of chats handled per refresh.
    pub batch_size: usize,
    /// Age beyond which a cached count is stale.
    pub stale_threshold: Duration,
    /// TTL of the cache entries.
    pub cache_ttl: Duration,
    /// Time limit for a single request to the chat platform.
    pub platform_timeout: Duration,
    /// Attempts made per chat when the platform fails.
    pub max_retries: u32,
}

impl Default for ParticipantsConfig {
    fn default() -> Self {
        ParticipantsConfig {
            enable_background_sync: true,
            update_interval: Duration::from_secs(15 * 60),
            full_update_hour: 3,
            batch_size: 50,
            stale_threshold: Duration::from_secs(3600),
            cache_ttl: Duration::from_secs(3600),
            platform_timeout: Duration::from_secs(30),
            max_retries: 3,
        }
    }
}
