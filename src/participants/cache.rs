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

//! Representation of the cache of participants counts.

use crate::{
    errors::CacheError,
    participants::{KEY_PREFIX, Origin, ParticipantsInfo},
    store::CountStore,
};
use chrono::{DateTime, TimeDelta, Utc};
use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};
use tracing::{debug, error, instrument, trace, warn};

/// Default bound of the pages walked by a single staleness scan.
const MAX_SCAN_PAGES: usize = 1000;

/// Object that represents the cache of participants counts.
///
/// # Description
///
/// The cache owns everything related to *what* is cached: the key scheme, the serialization of
/// the records, the TTL of the entries and the detection of stale entries. It knows nothing about
/// how the counts get refreshed, that is up to [crate::participants::Updater].
///
/// The object holds no lock. The store behind it is shared by all the clones of the cache, and
/// concurrent writes of the same chat follow a _last writer wins_ policy.
///
/// # Failure policy
///
/// - Errors reaching the store are returned to the caller.
/// - A record that can't be decoded is an error for [CountCache::get], but it is skipped by the
///   batch methods. Skipped records are counted, see [CountCache::dropped_entries].
#[derive(Clone)]
pub struct CountCache<S> {
    store: S,
    prefix: String,
    max_scan_pages: usize,
    dropped: Arc<AtomicU64>,
}

impl<S: CountStore> CountCache<S> {
    pub fn new(store: S) -> Self {
        CountCache {
            store,
            prefix: KEY_PREFIX.to_owned(),
            max_scan_pages: MAX_SCAN_PAGES,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Use a custom key prefix. Intended to isolate several caches sharing the same server.
    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.to_owned();
        self
    }

    /// Bound the number of pages walked by [CountCache::get_stale_chats].
    pub fn with_max_scan_pages(mut self, pages: usize) -> Self {
        self.max_scan_pages = pages.max(1);
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Number of records skipped by the batch methods because they were malformed.
    pub fn dropped_entries(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn key(&self, chat_id: i64) -> String {
        format!("{}{chat_id}", self.prefix)
    }

    fn chat_id(&self, key: &str) -> Option<i64> {
        key.strip_prefix(&self.prefix)?.parse::<i64>().ok()
    }

    fn drop_entry(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Retrieve the participants count of a chat.
    ///
    /// # Description
    ///
    /// A chat that was never cached (or whose entry expired) gets [CacheError::NotCached]. A
    /// malformed record gets [CacheError::Format].
    pub async fn get(&self, chat_id: i64) -> Result<ParticipantsInfo, CacheError> {
        let start = Instant::now();

        let raw = match self.store.get(&self.key(chat_id)).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!(chat_id, elapsed = ?start.elapsed(), "Cache miss for participants");
                return Err(CacheError::NotCached);
            }
            Err(e) => {
                error!(chat_id, elapsed = ?start.elapsed(), "Failed to get participants from cache: {e}");
                return Err(e);
            }
        };

        let info = decode(&raw).inspect_err(|e| {
            error!(chat_id, "Failed to decode participants from cache: {e}");
        })?;

        debug!(
            chat_id,
            count = info.count,
            age = ?info.age(),
            elapsed = ?start.elapsed(),
            "Cache hit for participants"
        );

        Ok(info)
    }

    /// Store the participants count of a chat, overwriting any previous value.
    pub async fn set(&self, chat_id: i64, count: i64, ttl: Duration) -> Result<(), CacheError> {
        let record = encode(count, Utc::now()).inspect_err(|e| {
            error!(chat_id, count, "Refusing to cache participants: {e}");
        })?;

        self.store
            .set(&self.key(chat_id), record, ttl)
            .await
            .inspect_err(|e| error!(chat_id, count, "Failed to set participants in cache: {e}"))?;

        debug!(chat_id, count, ?ttl, "Participants cached");

        Ok(())
    }

    /// Retrieve the participants count of several chats at once.
    ///
    /// # Description
    ///
    /// Chats that are not cached, or whose record is malformed, are missing from the returned map.
    /// This is not an error: callers shall treat a missing entry as _not cached_.
    pub async fn get_multiple(
        &self,
        chat_ids: &[i64],
    ) -> Result<HashMap<i64, ParticipantsInfo>, CacheError> {
        if chat_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let keys: Vec<String> = chat_ids.iter().map(|id| self.key(*id)).collect();
        let values = self.store.multi_get(&keys).await?;

        let mut result = HashMap::with_capacity(chat_ids.len());
        for (chat_id, value) in chat_ids.iter().zip(values) {
            let Some(raw) = value else { continue };

            match decode(&raw) {
                Ok(info) => {
                    result.insert(*chat_id, info);
                }
                Err(e) => {
                    self.drop_entry();
                    warn!(chat_id, "Skipping malformed participants entry: {e}");
                }
            }
        }

        Ok(result)
    }

    /// Store the participants count of several chats sharing a single round trip.
    ///
    /// # Description
    ///
    /// Entries that can't be encoded (negative counts) are skipped. Only a failure writing the
    /// batch is reported as an error. Returns the number of entries written.
    pub async fn set_multiple(
        &self,
        counts: &HashMap<i64, i64>,
        ttl: Duration,
    ) -> Result<usize, CacheError> {
        if counts.is_empty() {
            trace!("set_multiple called with no entries");
            return Ok(0);
        }

        let start = Instant::now();
        let now = Utc::now();
        let mut entries = Vec::with_capacity(counts.len());

        for (chat_id, count) in counts {
            match encode(*count, now) {
                Ok(record) => entries.push((self.key(*chat_id), record)),
                Err(e) => {
                    self.drop_entry();
                    error!(chat_id, count, "Skipping participants entry in batch: {e}");
                }
            }
        }

        let written = entries.len();
        let skipped = counts.len() - written;

        self.store
            .pipelined_multi_set(entries, ttl)
            .await
            .inspect_err(|e| {
                error!(
                    total = counts.len(),
                    elapsed = ?start.elapsed(),
                    "Failed to execute batch cache operation: {e}"
                )
            })?;

        if skipped > 0 {
            warn!(written, skipped, ?ttl, elapsed = ?start.elapsed(), "Batch cache operation completed with some errors");
        } else {
            debug!(written, ?ttl, elapsed = ?start.elapsed(), "Participants batch cached");
        }

        Ok(written)
    }

    /// Remove the participants count of a chat right away.
    pub async fn delete(&self, chat_id: i64) -> Result<(), CacheError> {
        self.store.delete(&self.key(chat_id)).await
    }

    /// Find chats whose participants count was written before `now - older_than`.
    ///
    /// # Description
    ///
    /// The key space under the prefix of the cache is walked with a cursor, so the store never
    /// serves a long running request. Each page asks for `2 × limit` keys. The walk stops when:
    ///
    /// - `limit` stale chats were found,
    /// - the cursor goes back to the start, or
    /// - the page bound of the cache was reached (see [CountCache::with_max_scan_pages]). Under
    ///   heavy write load the cursor might otherwise never complete.
    ///
    /// Malformed records are skipped. A `limit` of 0 does nothing.
    #[instrument(name = "Scan stale participants", skip(self))]
    pub async fn get_stale_chats(
        &self,
        older_than: Duration,
        limit: usize,
    ) -> Result<Vec<i64>, CacheError> {
        let mut stale = Vec::new();
        if limit == 0 {
            return Ok(stale);
        }

        let Some(cutoff) = cutoff(older_than) else {
            return Ok(stale);
        };

        let pattern = format!("{}*", self.prefix);
        let page_size = limit.saturating_mul(2);
        let mut cursor = 0;
        let mut pages = 0;

        loop {
            let (keys, next_cursor) = self.store.scan(cursor, &pattern, page_size).await?;
            pages += 1;

            if !keys.is_empty() {
                let values = self.store.multi_get(&keys).await?;

                for (key, value) in keys.iter().zip(values) {
                    let Some(raw) = value else { continue };
                    let Some(chat_id) = self.chat_id(key) else {
                        self.drop_entry();
                        warn!(key = key.as_str(), "Foreign key found under the participants prefix");
                        continue;
                    };

                    match decode(&raw) {
                        Ok(info) if info.updated_at < cutoff => {
                            stale.push(chat_id);
                            if stale.len() >= limit {
                                debug!(pages, "Stale scan reached its limit");
                                return Ok(stale);
                            }
                        }
                        Ok(_) => (),
                        Err(e) => {
                            self.drop_entry();
                            warn!(chat_id, "Skipping malformed participants entry: {e}");
                        }
                    }
                }
            }

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
            if pages >= self.max_scan_pages {
                warn!(
                    pages,
                    found = stale.len(),
                    "Stale scan stopped before completing the key space"
                );
                break;
            }
        }

        debug!(pages, found = stale.len(), "Stale scan completed");

        Ok(stale)
    }
}

/// Point in time before which a record is stale. `None` when nothing can be that old.
fn cutoff(older_than: Duration) -> Option<DateTime<Utc>> {
    let delta = TimeDelta::from_std(older_than).ok()?;
    Utc::now().checked_sub_signed(delta)
}

fn encode(count: i64, now: DateTime<Utc>) -> Result<String, CacheError> {
    let count = u64::try_from(count)
        .map_err(|_| CacheError::Format(format!("negative participants count: {count}")))?;

    Ok(serde_json::to_string(&ParticipantsInfo {
        count,
        updated_at: now,
        source: Origin::Cache,
    })?)
}

fn decode(raw: &str) -> Result<ParticipantsInfo, CacheError> {
    let mut info: ParticipantsInfo = serde_json::from_str(raw)?;
    info.source = Origin::Cache;

    Ok(info)
}
