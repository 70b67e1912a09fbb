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

use crate::{
    errors::UpdateError,
    participants::{CircuitBreaker, CountCache, Origin, ParticipantsConfig, ParticipantsInfo},
    platform::{ChatDirectory, CountSource},
    store::CountStore,
};
use std::{collections::HashMap, future::Future, time::Duration};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

const RETRY_DELAY: Duration = Duration::from_secs(1);
const BATCH_PAUSE: Duration = Duration::from_secs(1);

/// Refresh operations driven by [crate::participants::RefreshWorker].
///
/// # Description
///
/// Both methods return the number of chats whose count was refreshed. A partial failure is not an
/// error: only failures that prevent the operation as a whole (the cache or the chat directory are
/// unreachable) are reported.
pub trait Updater: Send + Sync + 'static {
    /// Refresh up to `batch_size` chats whose cached count is older than `older_than`.
    fn update_stale(
        &self,
        older_than: Duration,
        batch_size: usize,
    ) -> impl Future<Output = Result<usize, UpdateError>> + Send;

    /// Refresh every chat of the directory, `batch_size` chats at a time.
    fn update_all(
        &self,
        batch_size: usize,
    ) -> impl Future<Output = Result<usize, UpdateError>> + Send;
}

/// Production [Updater]: fetches counts from a [CountSource] and writes them to a [CountCache].
///
/// # Description
///
/// Every fetch is bounded by the platform timeout of the configuration, and retried with an
/// exponential backoff when it fails. A [CircuitBreaker] sits in front of the platform: once it
/// opens, batches stop early instead of hammering a service that is down.
pub struct ParticipantsUpdater<S, P, D> {
    cache: CountCache<S>,
    source: P,
    directory: D,
    breaker: CircuitBreaker,
    cache_ttl: Duration,
    platform_timeout: Duration,
    max_retries: u32,
    retry_delay: Duration,
    batch_pause: Duration,
}

impl<S, P, D> ParticipantsUpdater<S, P, D>
where
    S: CountStore + 'static,
    P: CountSource,
    D: ChatDirectory,
{
    pub fn new(cache: CountCache<S>, source: P, directory: D, config: &ParticipantsConfig) -> Self {
        ParticipantsUpdater {
            cache,
            source,
            directory,
            breaker: CircuitBreaker::default(),
            cache_ttl: config.cache_ttl,
            platform_timeout: config.platform_timeout,
            max_retries: config.max_retries.max(1),
            retry_delay: RETRY_DELAY,
            batch_pause: BATCH_PAUSE,
        }
    }

    pub fn with_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = breaker;
        self
    }

    /// Initial delay between attempts of a failed fetch. It doubles after each attempt.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Pause between pages of a full refresh.
    pub fn with_batch_pause(mut self, pause: Duration) -> Self {
        self.batch_pause = pause;
        self
    }

    pub fn cache(&self) -> &CountCache<S> {
        &self.cache
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    async fn fetch_with_retry(&self, chat_id: i64) -> Result<u64, UpdateError> {
        // Held until the outcome is recorded, a dropped probe is released with it.
        let Some(_permit) = self.breaker.try_acquire() else {
            return Err(UpdateError::CircuitOpen);
        };

        let mut delay = self.retry_delay;
        let mut attempt = 1;

        loop {
            let err = match tokio::time::timeout(
                self.platform_timeout,
                self.source.fetch_count(chat_id),
            )
            .await
            {
                Ok(Ok(count)) => {
                    self.breaker.record_success();
                    return Ok(count);
                }
                // The platform answered, only this chat is out of reach.
                Ok(Err(e)) if !e.is_platform_failure() => {
                    self.breaker.record_success();
                    return Err(e);
                }
                Ok(Err(e)) => e,
                Err(_) => UpdateError::Platform(format!(
                    "request timed out after {:?}",
                    self.platform_timeout
                )),
            };

            if attempt >= self.max_retries {
                self.breaker.record_failure();
                return Err(err);
            }

            warn!(
                chat_id,
                "Fetch attempt {attempt}/{} failed, retrying in {delay:?}: {err}", self.max_retries
            );
            tokio::time::sleep(delay).await;
            delay *= 2;
            attempt += 1;
        }
    }

    /// Serve the count saved in the chat directory when the platform failed with `cause`.
    async fn fallback(
        &self,
        chat_id: i64,
        cause: UpdateError,
    ) -> Result<ParticipantsInfo, UpdateError> {
        match self.directory.stored_count(chat_id).await {
            Ok(Some(info)) => {
                info!(
                    chat_id,
                    count = info.count,
                    age = ?info.age(),
                    "Serving the participants count saved in the DB"
                );
                Ok(info)
            }
            Ok(None) => Err(cause),
            Err(e) => {
                error!(chat_id, "Failed to get the participants count from the DB: {e}");
                Err(cause)
            }
        }
    }

    /// Refresh the count of a single chat.
    ///
    /// # Description
    ///
    /// A fresh count is written to the cache and saved in the chat directory. Failing to save it
    /// in the directory is only logged.
    ///
    /// When the platform can't give a count (including an open circuit breaker), the count saved
    /// in the directory is returned with [Origin::Database] as source, and the cache is left
    /// alone. The platform error is returned when the directory has no count either.
    pub async fn update_single(&self, chat_id: i64) -> Result<ParticipantsInfo, UpdateError> {
        let start = Instant::now();

        let count = match self.fetch_with_retry(chat_id).await {
            Ok(count) => count,
            Err(e) => {
                error!(chat_id, "Failed to get the participants count from the platform: {e}");
                return self.fallback(chat_id, e).await;
            }
        };
        let signed = i64::try_from(count)
            .map_err(|_| UpdateError::Platform(format!("count out of range: {count}")))?;

        self.cache.set(chat_id, signed, self.cache_ttl).await?;

        if let Err(e) = self.directory.save_count(chat_id, count).await {
            error!(chat_id, count, "Failed to save the participants count in the DB: {e}");
        }

        debug!(chat_id, count, elapsed = ?start.elapsed(), "Participants count refreshed");

        Ok(ParticipantsInfo {
            source: Origin::Platform,
            ..ParticipantsInfo::new(count)
        })
    }

    /// Refresh the count of several chats and write them all to the cache with a single request.
    ///
    /// # Description
    ///
    /// Chats that can't be fetched are logged and left out of the result. The batch stops early
    /// when the circuit breaker opens. An error writing the cache is returned to the caller.
    #[instrument(name = "Participants batch update", skip_all, fields(size = chat_ids.len()))]
    pub async fn update_batch(&self, chat_ids: &[i64]) -> Result<HashMap<i64, u64>, UpdateError> {
        let start = Instant::now();
        let mut counts = HashMap::with_capacity(chat_ids.len());
        let mut failed = 0;

        for (processed, chat_id) in chat_ids.iter().enumerate() {
            match self.fetch_with_retry(*chat_id).await {
                Ok(count) => {
                    counts.insert(*chat_id, count);
                }
                Err(UpdateError::CircuitOpen) => {
                    warn!(
                        processed,
                        total = chat_ids.len(),
                        "Circuit breaker is open, batch stopped"
                    );
                    break;
                }
                Err(e) => {
                    failed += 1;
                    error!(chat_id, "Failed to update chat in batch: {e}");
                }
            }
        }

        if !counts.is_empty() {
            let entries: HashMap<i64, i64> = counts
                .iter()
                .filter_map(|(id, count)| Some((*id, i64::try_from(*count).ok()?)))
                .collect();
            self.cache.set_multiple(&entries, self.cache_ttl).await?;
        }

        let elapsed = start.elapsed();
        if failed > 0 {
            warn!(
                successful = counts.len(),
                failed,
                ?elapsed,
                "Batch update completed with errors"
            );
        } else {
            debug!(successful = counts.len(), ?elapsed, "Batch update completed");
        }

        Ok(counts)
    }
}

impl<S, P, D> Updater for ParticipantsUpdater<S, P, D>
where
    S: CountStore + 'static,
    P: CountSource,
    D: ChatDirectory,
{
    async fn update_stale(
        &self,
        older_than: Duration,
        batch_size: usize,
    ) -> Result<usize, UpdateError> {
        if batch_size == 0 {
            return Ok(0);
        }

        let stale = self
            .cache
            .get_stale_chats(older_than, batch_size)
            .await
            .inspect_err(|e| error!("Failed to get stale chats from cache: {e}"))?;

        if stale.is_empty() {
            debug!(?older_than, "No stale chats found");
            return Ok(0);
        }

        info!(stale = stale.len(), ?older_than, "Retrieved stale chats from cache");
        let updated = self.update_batch(&stale).await?;

        Ok(updated.len())
    }

    #[instrument(name = "Full participants update", skip(self))]
    async fn update_all(&self, batch_size: usize) -> Result<usize, UpdateError> {
        if batch_size == 0 {
            return Ok(0);
        }

        let mut page = 0;
        let mut total = 0;

        loop {
            let chat_ids = self
                .directory
                .list_chat_ids(page, batch_size)
                .await
                .inspect_err(|e| error!(page, "Failed to list chats: {e}"))?;

            if chat_ids.is_empty() {
                break;
            }

            match self.update_batch(&chat_ids).await {
                Ok(updated) => {
                    total += updated.len();
                    debug!(page, updated = updated.len(), total, "Page of chats updated");
                }
                Err(e) => error!(page, "Failed to update page of chats: {e}"),
            }

            if chat_ids.len() < batch_size {
                break;
            }
            if self.breaker.is_open() {
                warn!(page, total, "Circuit breaker is open, full update stopped");
                break;
            }

            page += 1;
            if !self.batch_pause.is_zero() {
                tokio::time::sleep(self.batch_pause).await;
            }
        }

        info!(total, pages = page + 1, "Full participants update completed");

        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        errors::CacheError,
        participants::{CircuitState, KEY_PREFIX},
        store::MemoryStore,
        telemetry::TEST_TRACING,
    };
    use chrono::{TimeDelta, Utc};
    use once_cell::sync::Lazy;
    use pretty_assertions::assert_eq;
    use rstest::*;
    use std::{
        collections::HashSet,
        sync::{
            Mutex,
            atomic::{AtomicUsize, Ordering},
        },
    };

    /// Platform that knows the count of a few chats. Unknown chats are unavailable.
    #[derive(Default)]
    struct FakeSource {
        counts: HashMap<i64, u64>,
        /// Every request fails as if the platform were down.
        outage: bool,
        /// Chats that always fail.
        broken: HashSet<i64>,
        /// Pending failures per chat before it starts answering.
        flaky: Mutex<HashMap<i64, u32>>,
        delay: Option<Duration>,
        calls: AtomicUsize,
    }

    impl FakeSource {
        fn with_counts(counts: &[(i64, u64)]) -> Self {
            FakeSource {
                counts: counts.iter().copied().collect(),
                ..Default::default()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl CountSource for FakeSource {
        async fn fetch_count(&self, chat_id: i64) -> Result<u64, UpdateError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.outage {
                return Err(UpdateError::Platform("service unavailable".to_owned()));
            }
            if self.broken.contains(&chat_id) {
                return Err(UpdateError::ChatUnavailable("bot was kicked".to_owned()));
            }
            {
                let mut flaky = self.flaky.lock().unwrap();
                if let Some(pending) = flaky.get_mut(&chat_id).filter(|p| **p > 0) {
                    *pending -= 1;
                    return Err(UpdateError::Platform("too many requests".to_owned()));
                }
            }

            self.counts
                .get(&chat_id)
                .copied()
                .ok_or_else(|| UpdateError::ChatUnavailable("chat not found".to_owned()))
        }
    }

    #[derive(Default)]
    struct FakeDirectory {
        ids: Vec<i64>,
        calls: AtomicUsize,
        /// Counts saved per chat.
        saved: Mutex<HashMap<i64, u64>>,
        fail_writes: bool,
    }

    impl FakeDirectory {
        fn with_saved(saved: &[(i64, u64)]) -> Self {
            FakeDirectory {
                saved: Mutex::new(saved.iter().copied().collect()),
                ..Default::default()
            }
        }

        fn saved(&self, chat_id: i64) -> Option<u64> {
            self.saved.lock().unwrap().get(&chat_id).copied()
        }
    }

    impl ChatDirectory for FakeDirectory {
        async fn list_chat_ids(
            &self,
            page: usize,
            page_size: usize,
        ) -> Result<Vec<i64>, UpdateError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .ids
                .iter()
                .skip(page * page_size)
                .take(page_size)
                .copied()
                .collect())
        }

        async fn stored_count(
            &self,
            chat_id: i64,
        ) -> Result<Option<ParticipantsInfo>, UpdateError> {
            Ok(self.saved(chat_id).map(|count| ParticipantsInfo {
                count,
                updated_at: Utc::now() - TimeDelta::days(1),
                source: Origin::Database,
            }))
        }

        async fn save_count(&self, chat_id: i64, count: u64) -> Result<(), UpdateError> {
            if self.fail_writes {
                return Err(UpdateError::Directory("connection reset by peer".to_owned()));
            }
            self.saved.lock().unwrap().insert(chat_id, count);

            Ok(())
        }
    }

    type TestUpdater = ParticipantsUpdater<MemoryStore, FakeSource, FakeDirectory>;

    fn updater(source: FakeSource, directory: FakeDirectory) -> (TestUpdater, MemoryStore) {
        Lazy::force(&TEST_TRACING);
        let store = MemoryStore::new();
        let config = ParticipantsConfig {
            max_retries: 1,
            ..Default::default()
        };
        let updater = ParticipantsUpdater::new(
            CountCache::new(store.clone()),
            source,
            directory,
            &config,
        )
        .with_retry_delay(Duration::from_millis(10))
        .with_batch_pause(Duration::ZERO);

        (updater, store)
    }

    async fn seed_stale(store: &MemoryStore, chat_id: i64, age: TimeDelta) {
        let record = serde_json::to_string(&ParticipantsInfo {
            count: 1,
            updated_at: Utc::now() - age,
            source: Origin::Cache,
        })
        .unwrap();
        store
            .set(&format!("{KEY_PREFIX}{chat_id}"), record, Duration::ZERO)
            .await
            .unwrap();
    }

    #[fixture]
    fn three_chats() -> FakeSource {
        FakeSource::with_counts(&[(1, 10), (2, 20), (3, 30)])
    }

    #[rstest]
    #[tokio::test]
    async fn update_single_writes_through(three_chats: FakeSource) {
        let (updater, _) = updater(three_chats, FakeDirectory::default());

        let info = updater.update_single(2).await.expect("Failed to update");

        assert_eq!(info.count, 20);
        assert_eq!(info.source, Origin::Platform);
        let cached = updater.cache().get(2).await.unwrap();
        assert_eq!(cached.count, 20);
        assert_eq!(cached.source, Origin::Cache);
        assert_eq!(updater.directory.saved(2), Some(20));
    }

    #[rstest]
    #[tokio::test]
    async fn failed_db_write_is_not_an_error(three_chats: FakeSource) {
        let directory = FakeDirectory {
            fail_writes: true,
            ..Default::default()
        };
        let (updater, _) = updater(three_chats, directory);

        let info = updater.update_single(1).await.expect("Failed to update");

        assert_eq!(info.count, 10);
        assert_eq!(updater.cache().get(1).await.unwrap().count, 10);
    }

    /// TC: The platform is down and the DB knows the chat.
    ///
    /// # Description
    ///
    /// The count saved in the DB is served with `database` as source, and the cache is not
    /// touched.
    #[tokio::test]
    async fn update_single_falls_back_to_the_db() {
        let source = FakeSource {
            outage: true,
            ..Default::default()
        };
        let (updater, _) = updater(source, FakeDirectory::with_saved(&[(5, 55)]));

        let info = updater.update_single(5).await.expect("The DB should answer");

        assert_eq!(info.count, 55);
        assert_eq!(info.source, Origin::Database);
        assert!(matches!(
            updater.cache().get(5).await,
            Err(CacheError::NotCached)
        ));
    }

    #[rstest]
    #[tokio::test]
    async fn update_single_failure_leaves_cache_alone(three_chats: FakeSource) {
        let (updater, _) = updater(three_chats, FakeDirectory::default());

        assert!(matches!(
            updater.update_single(99).await,
            Err(UpdateError::ChatUnavailable(_))
        ));
        assert!(matches!(
            updater.cache().get(99).await,
            Err(CacheError::NotCached)
        ));
    }

    /// TC: A batch with a failing chat is a partial success.
    #[rstest]
    #[tokio::test]
    async fn batch_is_partial_success(mut three_chats: FakeSource) {
        three_chats.broken.insert(2);
        let (updater, _) = updater(three_chats, FakeDirectory::default());

        let counts = updater.update_batch(&[1, 2, 3]).await.unwrap();

        assert_eq!(counts, HashMap::from([(1, 10), (3, 30)]));
        let cached = updater.cache().get_multiple(&[1, 2, 3]).await.unwrap();
        assert_eq!(cached.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_fetches_are_retried() {
        let source = FakeSource::with_counts(&[(1, 10)]);
        source.flaky.lock().unwrap().insert(1, 2);
        let (updater, _) = updater(source, FakeDirectory::default());
        let config = ParticipantsConfig {
            max_retries: 3,
            ..Default::default()
        };
        let updater = ParticipantsUpdater::new(
            updater.cache.clone(),
            updater.source,
            updater.directory,
            &config,
        );

        let info = updater.update_single(1).await.expect("Retries should succeed");

        assert_eq!(info.count, 10);
        assert_eq!(updater.source.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_platform_times_out() {
        let source = FakeSource {
            delay: Some(Duration::from_secs(60)),
            ..FakeSource::with_counts(&[(1, 10)])
        };
        let (updater, _) = updater(source, FakeDirectory::default());

        assert!(matches!(
            updater.update_single(1).await,
            Err(UpdateError::Platform(_))
        ));
    }

    /// TC: An open breaker stops the batch.
    ///
    /// # Description
    ///
    /// Every request fails. After two failures the breaker opens and the rest of the batch is
    /// never sent to the platform.
    #[tokio::test]
    async fn open_breaker_stops_the_batch() {
        let source = FakeSource {
            outage: true,
            ..Default::default()
        };
        let (updater, _) = updater(source, FakeDirectory::default());
        let updater = updater.with_breaker(CircuitBreaker::new(2, Duration::from_secs(60)));

        let counts = updater.update_batch(&[1, 2, 3, 4, 5]).await.unwrap();

        assert!(counts.is_empty());
        assert_eq!(updater.source.calls(), 2);
        assert!(updater.breaker().is_open());
    }

    /// TC: Chats the platform refuses to serve don't open the breaker.
    ///
    /// # Description
    ///
    /// The first five chats of the batch are gone from the platform. They are neither retried
    /// nor counted as platform failures, so the healthy chats after them are refreshed.
    #[tokio::test]
    async fn dead_chats_dont_open_the_breaker() {
        let counts: Vec<(i64, u64)> = (6..=8).map(|id| (id, id as u64)).collect();
        let source = FakeSource {
            broken: (1..=5).collect(),
            ..FakeSource::with_counts(&counts)
        };
        let config = ParticipantsConfig {
            max_retries: 3,
            ..Default::default()
        };
        let updater = ParticipantsUpdater::new(
            CountCache::new(MemoryStore::new()),
            source,
            FakeDirectory::default(),
            &config,
        );

        let counts = updater
            .update_batch(&(1..=8).collect::<Vec<_>>())
            .await
            .unwrap();

        assert_eq!(counts, HashMap::from([(6, 6), (7, 7), (8, 8)]));
        assert_eq!(updater.source.calls(), 8);
        assert_eq!(updater.breaker().state(), CircuitState::Closed);
    }

    /// TC: The request that probes a half-open breaker is abandoned.
    ///
    /// # Description
    ///
    /// The caller gives up on the probe before the platform answers. The next request must be
    /// let through instead of being refused forever.
    #[tokio::test(start_paused = true)]
    async fn abandoned_probe_releases_the_breaker() {
        let source = FakeSource {
            delay: Some(Duration::from_secs(20)),
            ..FakeSource::with_counts(&[(1, 10)])
        };
        let (updater, _) = updater(source, FakeDirectory::default());
        let updater = updater.with_breaker(CircuitBreaker::new(1, Duration::from_secs(10)));
        updater.breaker().record_failure();
        tokio::time::advance(Duration::from_secs(11)).await;

        let abandoned =
            tokio::time::timeout(Duration::from_secs(5), updater.update_single(1)).await;
        assert!(abandoned.is_err());
        assert_eq!(updater.breaker().state(), CircuitState::HalfOpen);

        let info = updater
            .update_single(1)
            .await
            .expect("The breaker should let a new probe through");

        assert_eq!(info.count, 10);
        assert_eq!(updater.source.calls(), 2);
        assert_eq!(updater.breaker().state(), CircuitState::Closed);
    }

    /// TC: Refreshing stale chats twice in a row.
    ///
    /// # Description
    ///
    /// The first pass refreshes every stale chat, so the second one has nothing to do.
    #[rstest]
    #[tokio::test]
    async fn stale_refresh_is_idempotent(three_chats: FakeSource) {
        let (updater, store) = updater(three_chats, FakeDirectory::default());
        seed_stale(&store, 1, TimeDelta::hours(2)).await;
        seed_stale(&store, 2, TimeDelta::hours(3)).await;
        seed_stale(&store, 3, TimeDelta::minutes(5)).await;

        let threshold = Duration::from_secs(3600);
        assert_eq!(updater.update_stale(threshold, 10).await.unwrap(), 2);
        assert_eq!(updater.update_stale(threshold, 10).await.unwrap(), 0);
        assert_eq!(updater.source.calls(), 2);
        assert_eq!(updater.cache().get(1).await.unwrap().count, 10);
    }

    #[rstest]
    #[tokio::test]
    async fn zero_batch_size_is_no_work(three_chats: FakeSource) {
        let directory = FakeDirectory {
            ids: vec![1, 2, 3],
            ..Default::default()
        };
        let (updater, store) = updater(three_chats, directory);
        seed_stale(&store, 1, TimeDelta::hours(2)).await;

        assert_eq!(updater.update_stale(Duration::from_secs(1), 0).await.unwrap(), 0);
        assert_eq!(updater.update_all(0).await.unwrap(), 0);
        assert_eq!(updater.source.calls(), 0);
        assert_eq!(updater.directory.calls.load(Ordering::SeqCst), 0);
    }

    /// TC: A full refresh walks the whole directory page by page.
    #[tokio::test]
    async fn update_all_pages_the_directory() {
        let counts: Vec<(i64, u64)> = (1..=7).map(|id| (id, id as u64 * 100)).collect();
        let directory = FakeDirectory {
            ids: (1..=7).collect(),
            ..Default::default()
        };
        let (updater, _) = updater(FakeSource::with_counts(&counts), directory);

        let updated = updater.update_all(3).await.unwrap();

        assert_eq!(updated, 7);
        assert_eq!(updater.directory.calls.load(Ordering::SeqCst), 3);
        let cached = updater
            .cache()
            .get_multiple(&(1..=7).collect::<Vec<_>>())
            .await
            .unwrap();
        assert_eq!(cached.len(), 7);
        assert_eq!(cached[&7].count, 700);
    }

    #[tokio::test]
    async fn update_all_with_exact_pages() {
        let counts: Vec<(i64, u64)> = (1..=4).map(|id| (id, 1)).collect();
        let directory = FakeDirectory {
            ids: (1..=4).collect(),
            ..Default::default()
        };
        let (updater, _) = updater(FakeSource::with_counts(&counts), directory);

        assert_eq!(updater.update_all(2).await.unwrap(), 4);
        // The last page is empty.
        assert_eq!(updater.directory.calls.load(Ordering::SeqCst), 3);
    }
}
