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

//! In-process implementation of [CountStore].

use crate::{errors::CacheError, store::CountStore};
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::Duration,
};
use tokio::{sync::Mutex, time::Instant};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
    /// Position of the key in the scan order.
    seq: u64,
}

impl Entry {
    fn is_alive(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|deadline| deadline > now)
    }
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    order: BTreeMap<u64, String>,
    last_seq: u64,
}

impl Inner {
    fn insert(&mut self, key: String, value: String, expires_at: Option<Instant>) {
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.value = value;
            entry.expires_at = expires_at;
            return;
        }

        // Sequence numbers start at 1, cursor 0 is the start of a scan.
        self.last_seq += 1;
        self.order.insert(self.last_seq, key.clone());
        self.entries.insert(
            key,
            Entry {
                value,
                expires_at,
                seq: self.last_seq,
            },
        );
    }

    fn remove(&mut self, key: &str) {
        if let Some(entry) = self.entries.remove(key) {
            self.order.remove(&entry.seq);
        }
    }
}

/// Key/value store kept in the main memory of the process.
///
/// # Description
///
/// This store mimics the behaviour of the Valkey server for the subset of commands needed by the
/// participants cache: entries expire after their TTL and the key space can be walked using a
/// cursor. Expired entries are purged lazily when they are found.
///
/// Every key gets a sequence number when it is first inserted, and the scan walks the keys in that
/// order. The cursor is the sequence number of the next key to inspect, so removing keys during a
/// scan never hides a key that is present during the whole scan. Match patterns support exact keys
/// and a single trailing `*`.
///
/// Clones share the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    data: Arc<Mutex<Inner>>,
}

fn matches(pattern: &str, key: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => key == pattern,
    }
}

fn deadline(ttl: Duration) -> Option<Instant> {
    if ttl.is_zero() {
        None
    } else {
        Some(Instant::now() + ttl)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.data
            .lock()
            .await
            .entries
            .values()
            .filter(|e| e.is_alive(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl CountStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = Instant::now();
        let mut data = self.data.lock().await;

        match data.entries.get(key).cloned() {
            Some(entry) if entry.is_alive(now) => Ok(Some(entry.value)),
            Some(_) => {
                data.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn multi_get(&self, keys: &[String]) -> Result<Vec<Option<String>>, CacheError> {
        let now = Instant::now();
        let data = self.data.lock().await;

        Ok(keys
            .iter()
            .map(|k| {
                data.entries
                    .get(k)
                    .filter(|e| e.is_alive(now))
                    .map(|e| e.value.clone())
            })
            .collect())
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        self.data
            .lock()
            .await
            .insert(key.to_owned(), value, deadline(ttl));

        Ok(())
    }

    async fn pipelined_multi_set(
        &self,
        entries: Vec<(String, String)>,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let expires_at = deadline(ttl);
        let mut data = self.data.lock().await;

        for (key, value) in entries {
            data.insert(key, value, expires_at);
        }

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.data.lock().await.remove(key);

        Ok(())
    }

    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<(Vec<String>, u64), CacheError> {
        let now = Instant::now();
        let mut data = self.data.lock().await;

        let mut expired = Vec::new();
        let mut keys = Vec::new();
        let mut last = None;

        for (seq, key) in data.order.range(cursor..).take(count.max(1)) {
            last = Some(*seq);
            let alive = data.entries.get(key).is_some_and(|e| e.is_alive(now));
            if !alive {
                expired.push(key.clone());
            } else if matches(pattern, key) {
                keys.push(key.clone());
            }
        }

        let next_cursor = match last {
            Some(seq) if data.order.range(seq + 1..).next().is_some() => seq + 1,
            _ => 0,
        };

        for key in expired {
            data.remove(&key);
        }

        Ok((keys, next_cursor))
    }
}
