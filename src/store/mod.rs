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

//! Key/value stores that can keep the participants cache.
//!
//! # Description
//!
//! The cache logic ([crate::participants::CountCache]) only needs a handful of primitives from the
//! store: single and multiple reads, single and pipelined writes with a TTL, deletion and a
//! cursor-based scan of the key space. Those are captured by the trait [CountStore].
//!
//! Two implementations are provided:
//! - [ValkeyStore]: the production store, backed by a Valkey (or Redis) server.
//! - [MemoryStore]: an in-process store, handy for local runs and tests.

use crate::errors::CacheError;
use std::future::Future;
use std::time::Duration;

mod memory;
mod valkey;

pub use memory::MemoryStore;
pub use valkey::ValkeyStore;

/// Primitives that a key/value store must offer to keep the participants cache.
///
/// # Description
///
/// Implementations must be safe for concurrent use: the same handle is shared by the request path
/// and the background refresh loops, and no extra locking is placed around it.
///
/// A TTL of zero means the entry never expires.
pub trait CountStore: Send + Sync {
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>, CacheError>> + Send;

    /// Values are returned in the same order as `keys`, `None` for absent keys.
    fn multi_get(
        &self,
        keys: &[String],
    ) -> impl Future<Output = Result<Vec<Option<String>>, CacheError>> + Send;

    fn set(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> impl Future<Output = Result<(), CacheError>> + Send;

    /// Write all the entries sharing a single round trip.
    fn pipelined_multi_set(
        &self,
        entries: Vec<(String, String)>,
        ttl: Duration,
    ) -> impl Future<Output = Result<(), CacheError>> + Send;

    fn delete(&self, key: &str) -> impl Future<Output = Result<(), CacheError>> + Send;

    /// Return a page of keys matching `pattern` and the cursor for the next page.
    ///
    /// # Description
    ///
    /// A scan starts with cursor 0 and is complete when the returned cursor is 0 again. `count` is
    /// a hint of how many keys to inspect per call.
    fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> impl Future<Output = Result<(Vec<String>, u64), CacheError>> + Send;
}
