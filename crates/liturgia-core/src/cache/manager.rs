use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{Datelike, NaiveDate};
use futures::future::{BoxFuture, FutureExt, Shared};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::{FetchError, LiturgyProvider};
use crate::models::LiturgyDocument;
use crate::store::{KeyValueStore, StoreResult};
use crate::utils::{add_days, date_from_key, key_for, month_key_for, KEY_PREFIX, META_KEY};

use super::clock::{Clock, SystemClock};
use super::window::RetentionWindow;

// ============================================================================
// Constants
// ============================================================================

/// Length of the rolling window kept resident, starting at today.
pub const CACHE_DAYS: u32 = 7;

/// Largest serialized entry that will be persisted (200 KB).
/// Bigger documents are still returned to the caller.
pub const MAX_CACHE_SIZE: usize = 200 * 1024;

/// Maximum concurrent requests during a background prefetch.
const PREFETCH_CONCURRENCY: usize = 4;

type FetchOutcome = Result<Option<LiturgyDocument>, FetchError>;
type InFlightFetch = Shared<BoxFuture<'static, FetchOutcome>>;

/// Counters describing how the cache has been used since it was created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Requests actually sent to the provider
    pub fetches: u64,
    pub fetch_failures: u64,
    /// Documents returned but not persisted because of their size
    pub oversized_skips: u64,
    /// Entries removed while re-anchoring the window
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    fetches: AtomicU64,
    fetch_failures: AtomicU64,
    oversized_skips: AtomicU64,
    evictions: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            oversized_skips: self.oversized_skips.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

/// Outcome of a background prefetch run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrefetchReport {
    /// Dates whose liturgy is now available
    pub available: usize,
    /// Dates the API had nothing for
    pub missing: usize,
    /// Dates that could not be fetched
    pub failed: usize,
}

struct Inner<S, P, C> {
    store: S,
    provider: P,
    clock: C,
    /// One shared future per date key currently being fetched
    in_flight: Mutex<HashMap<String, InFlightFetch>>,
    /// Serializes window re-anchoring
    reanchor: tokio::sync::Mutex<()>,
    initialized: AtomicBool,
    counters: Counters,
}

/// Date-keyed liturgy cache over a key-value store and a remote provider.
///
/// Clone is cheap: clones share the store, the provider and the in-flight
/// request map, so a clone can be moved into a background task.
pub struct LiturgyCache<S, P, C = SystemClock> {
    inner: Arc<Inner<S, P, C>>,
}

impl<S, P, C> Clone for LiturgyCache<S, P, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S, P> LiturgyCache<S, P, SystemClock>
where
    S: KeyValueStore + 'static,
    P: LiturgyProvider + 'static,
{
    pub fn new(store: S, provider: P) -> Self {
        Self::with_clock(store, provider, SystemClock)
    }
}

impl<S, P, C> LiturgyCache<S, P, C>
where
    S: KeyValueStore + 'static,
    P: LiturgyProvider + 'static,
    C: Clock,
{
    pub fn with_clock(store: S, provider: P, clock: C) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                provider,
                clock,
                in_flight: Mutex::new(HashMap::new()),
                reanchor: tokio::sync::Mutex::new(()),
                initialized: AtomicBool::new(false),
                counters: Counters::default(),
            }),
        }
    }

    pub fn store(&self) -> &S {
        &self.inner.store
    }

    pub fn provider(&self) -> &P {
        &self.inner.provider
    }

    pub fn today(&self) -> NaiveDate {
        self.inner.clock.today()
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.counters.snapshot()
    }

    /// Setup hook. Safe to call any number of times; performs no network I/O.
    pub async fn initialize(&self) {
        if self.inner.initialized.swap(true, Ordering::SeqCst) {
            debug!("Liturgy cache already initialized");
            return;
        }
        match self.window().await {
            Some(window) => info!(start = %window.start, end = %window.end, "Liturgy cache initialized"),
            None => info!("Liturgy cache initialized (no window cached yet)"),
        }
    }

    /// Current retention window, if one has been recorded.
    pub async fn window(&self) -> Option<RetentionWindow> {
        let raw = match self.inner.store.get(META_KEY).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "Failed to read liturgy window metadata");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(window) => Some(window),
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable liturgy window metadata");
                None
            }
        }
    }

    /// Liturgy for `date`.
    ///
    /// Served from the store when present. Otherwise fetched from the
    /// provider; a request for today also moves the retention window when
    /// today has left it. `Ok(None)` means the API has no liturgy for that
    /// date. `Err` means the API could not be reached for this request.
    pub async fn get_liturgia_by_date(&self, date: NaiveDate) -> FetchOutcome {
        if let Some(doc) = self.load_day(date).await {
            Counters::bump(&self.inner.counters.hits, 1);
            debug!(%date, "Liturgy cache hit");
            return Ok(Some(doc));
        }
        Counters::bump(&self.inner.counters.misses, 1);

        let today = self.today();
        if date != today {
            return self.fill_day(date).await;
        }

        match self.window().await {
            // Today is covered but its entry is missing
            Some(window) if window.contains(today) => self.fill_day(today).await,
            _ => self.reanchor(today).await,
        }
    }

    /// Remove every key owned by the cache, window metadata included.
    pub async fn clear(&self) -> StoreResult<usize> {
        let keys: Vec<String> = self
            .inner
            .store
            .list_keys()
            .await?
            .into_iter()
            .filter(|k| k.starts_with(KEY_PREFIX))
            .collect();
        if !keys.is_empty() {
            self.inner.store.remove_many(&keys).await?;
        }
        info!(removed = keys.len(), "Cleared liturgy cache");
        Ok(keys.len())
    }

    /// The next `days` dates starting at today.
    pub fn upcoming_dates(&self, days: u32) -> Vec<NaiveDate> {
        let today = self.today();
        (0..i64::from(days)).map(|i| add_days(today, i)).collect()
    }

    /// Warm the cache for `dates` on a detached task.
    ///
    /// The task is never cancelled and never fails; per-date errors are logged
    /// and counted in the returned report.
    pub fn spawn_prefetch(&self, dates: Vec<NaiveDate>) -> JoinHandle<PrefetchReport> {
        let cache = self.clone();
        tokio::spawn(async move { cache.prefetch(dates).await })
    }

    async fn prefetch(&self, dates: Vec<NaiveDate>) -> PrefetchReport {
        let outcomes: Vec<(NaiveDate, FetchOutcome)> = stream::iter(dates)
            .map(|date| {
                let cache = self.clone();
                async move { (date, cache.get_liturgia_by_date(date).await) }
            })
            .buffer_unordered(PREFETCH_CONCURRENCY)
            .collect()
            .await;

        let mut report = PrefetchReport::default();
        for (date, outcome) in outcomes {
            match outcome {
                Ok(Some(_)) => report.available += 1,
                Ok(None) => report.missing += 1,
                Err(e) => {
                    warn!(%date, error = %e, "Background liturgy prefetch failed");
                    report.failed += 1;
                }
            }
        }
        debug!(?report, "Background liturgy prefetch finished");
        report
    }

    // ===== Window =====

    async fn reanchor(&self, today: NaiveDate) -> FetchOutcome {
        let _guard = self.inner.reanchor.lock().await;

        // Another caller may have moved the window while we waited
        if let Some(window) = self.window().await {
            if window.contains(today) {
                if let Some(doc) = self.load_day(today).await {
                    return Ok(Some(doc));
                }
                return self.fill_day(today).await;
            }
        }

        let window = RetentionWindow::anchored_at(today, CACHE_DAYS);
        info!(start = %window.start, end = %window.end, "Re-anchoring liturgy window");

        // Populate before pruning so month bundles can still feed the new days
        let mut today_outcome = Ok(None);
        for date in window.dates() {
            let outcome = match self.load_day(date).await {
                Some(doc) => Ok(Some(doc)),
                None => self.fill_day(date).await,
            };
            match &outcome {
                Ok(Some(_)) => {}
                Ok(None) => debug!(%date, "No liturgy published for date"),
                Err(e) => warn!(%date, error = %e, "Failed to fetch liturgy, continuing"),
            }
            if date == today {
                today_outcome = outcome;
            }
        }

        let evicted = self.prune_outside(&window).await;
        Counters::bump(&self.inner.counters.evictions, evicted as u64);

        self.save_window(&window).await;
        today_outcome
    }

    /// Delete every cache entry that is not a day inside `window`. Returns the
    /// number of keys removed.
    async fn prune_outside(&self, window: &RetentionWindow) -> usize {
        let keys = match self.inner.store.list_keys().await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "Failed to list store keys, skipping prune");
                return 0;
            }
        };

        let stale: Vec<String> = keys
            .into_iter()
            .filter(|k| k.starts_with(KEY_PREFIX) && k != META_KEY)
            .filter(|k| !date_from_key(k).is_some_and(|d| window.contains(d)))
            .collect();
        if stale.is_empty() {
            return 0;
        }

        match self.inner.store.remove_many(&stale).await {
            Ok(()) => {
                debug!(removed = stale.len(), "Pruned liturgy entries outside window");
                stale.len()
            }
            Err(e) => {
                warn!(error = %e, "Failed to prune liturgy entries");
                0
            }
        }
    }

    async fn save_window(&self, window: &RetentionWindow) {
        let json = match serde_json::to_string(window) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Failed to serialize liturgy window");
                return;
            }
        };
        if let Err(e) = self.inner.store.set(META_KEY, &json).await {
            warn!(error = %e, "Failed to save liturgy window metadata");
        }
    }

    // ===== Entries =====

    async fn load_day(&self, date: NaiveDate) -> Option<LiturgyDocument> {
        let key = key_for(&date);
        let raw = match self.inner.store.get(&key).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to read cached liturgy, treating as miss");
                return None;
            }
        };
        match LiturgyDocument::from_json(&raw) {
            Ok(doc) if !doc.is_empty() => Some(doc),
            Ok(_) => None,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to parse cached liturgy, treating as miss");
                None
            }
        }
    }

    /// Persist a document unless it exceeds `MAX_CACHE_SIZE`. Returns whether
    /// it was written.
    async fn save_day(&self, date: NaiveDate, doc: &LiturgyDocument) -> bool {
        let key = key_for(&date);
        let json = match doc.to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to serialize liturgy");
                return false;
            }
        };
        if json.len() > MAX_CACHE_SIZE {
            debug!(key = %key, bytes = json.len(), "Liturgy too large to cache");
            Counters::bump(&self.inner.counters.oversized_skips, 1);
            return false;
        }
        match self.inner.store.set(&key, &json).await {
            Ok(()) => true,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to cache liturgy");
                false
            }
        }
    }

    /// Older builds stored a whole month as `{"<day>": {...}}` under
    /// `liturgia-YYYY-MM`. Copy the requested day out of such a bundle.
    async fn migrate_from_month_bundle(&self, date: NaiveDate) -> Option<LiturgyDocument> {
        let key = month_key_for(date.year(), date.month());
        let raw = self.inner.store.get(&key).await.ok()??;
        let mut bundle: HashMap<String, Value> = match serde_json::from_str(&raw) {
            Ok(bundle) => bundle,
            Err(e) => {
                debug!(key = %key, error = %e, "Ignoring unreadable month bundle");
                return None;
            }
        };
        let doc = LiturgyDocument::new(bundle.remove(&date.day().to_string())?);
        if doc.is_empty() {
            return None;
        }
        debug!(%date, "Migrating liturgy from month bundle");
        self.save_day(date, &doc).await;
        Some(doc)
    }

    /// Source a missing day: the legacy month bundle first, then the network.
    async fn fill_day(&self, date: NaiveDate) -> FetchOutcome {
        if let Some(doc) = self.migrate_from_month_bundle(date).await {
            return Ok(Some(doc));
        }
        self.fetch_and_store(date).await
    }

    /// Fetch one date and store the result. Concurrent calls for the same
    /// date share a single request.
    ///
    /// The request runs on its own task, so it completes and leaves the
    /// in-flight map even when every caller waiting on it has gone away.
    async fn fetch_and_store(&self, date: NaiveDate) -> FetchOutcome {
        let key = key_for(&date);
        let fetch = {
            let mut in_flight = self.in_flight();
            if let Some(existing) = in_flight.get(&key) {
                debug!(%date, "Joining in-flight liturgy fetch");
                existing.clone()
            } else {
                let cache = self.clone();
                let done_key = key.clone();
                let task = tokio::spawn(async move {
                    let outcome = cache.fetch_uncoalesced(date).await;
                    cache.in_flight().remove(&done_key);
                    outcome
                });
                let fetch = task
                    .map(|joined| joined.unwrap_or_else(|e| Err(FetchError::from(e))))
                    .boxed()
                    .shared();
                in_flight.insert(key, fetch.clone());
                fetch
            }
        };
        fetch.await
    }

    async fn fetch_uncoalesced(&self, date: NaiveDate) -> FetchOutcome {
        Counters::bump(&self.inner.counters.fetches, 1);
        match self.inner.provider.fetch(date).await {
            Ok(Some(doc)) => {
                self.save_day(date, &doc).await;
                Ok(Some(doc))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                Counters::bump(&self.inner.counters.fetch_failures, 1);
                Err(e)
            }
        }
    }

    fn in_flight(&self) -> MutexGuard<'_, HashMap<String, InFlightFetch>> {
        self.inner.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::FixedClock;
    use crate::store::{MemoryStore, StoreError};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashSet;
    use std::time::Duration;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn doc_for(date: NaiveDate) -> LiturgyDocument {
        LiturgyDocument::new(json!({ "data": date.to_string(), "cor": "Verde" }))
    }

    /// Provider answering from a script, recording every request.
    #[derive(Default)]
    struct ScriptedProvider {
        failures: HashSet<NaiveDate>,
        empty: HashSet<NaiveDate>,
        oversized: HashSet<NaiveDate>,
        delay: Option<Duration>,
        calls: Mutex<Vec<NaiveDate>>,
    }

    impl ScriptedProvider {
        fn calls(&self) -> Vec<NaiveDate> {
            self.calls.lock().unwrap().clone()
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl LiturgyProvider for ScriptedProvider {
        async fn fetch(&self, date: NaiveDate) -> Result<Option<LiturgyDocument>, FetchError> {
            self.calls.lock().unwrap().push(date);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.failures.contains(&date) {
                return Err(FetchError::Timeout(format!("no answer for {}", date)));
            }
            if self.empty.contains(&date) {
                return Ok(None);
            }
            if self.oversized.contains(&date) {
                let text = "x".repeat(MAX_CACHE_SIZE + 1);
                return Ok(Some(LiturgyDocument::new(json!({ "evangelho": { "texto": text } }))));
            }
            Ok(Some(doc_for(date)))
        }
    }

    /// Store whose reads and/or writes always fail.
    #[derive(Default)]
    struct FailingStore {
        inner: MemoryStore,
        fail_reads: bool,
        fail_writes: bool,
    }

    #[async_trait]
    impl KeyValueStore for FailingStore {
        async fn get(&self, key: &str) -> StoreResult<Option<String>> {
            if self.fail_reads {
                return Err(StoreError::Unavailable("read".into()));
            }
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
            if self.fail_writes {
                return Err(StoreError::Unavailable("write".into()));
            }
            self.inner.set(key, value).await
        }

        async fn remove(&self, key: &str) -> StoreResult<()> {
            self.inner.remove(key).await
        }

        async fn list_keys(&self) -> StoreResult<Vec<String>> {
            self.inner.list_keys().await
        }
    }

    type TestCache = LiturgyCache<MemoryStore, ScriptedProvider, FixedClock>;

    fn cache_with(provider: ScriptedProvider, today: NaiveDate) -> TestCache {
        LiturgyCache::with_clock(MemoryStore::new(), provider, FixedClock::new(today))
    }

    async fn stored_dates(cache: &TestCache) -> Vec<NaiveDate> {
        let mut dates: Vec<NaiveDate> = cache
            .store()
            .list_keys()
            .await
            .unwrap()
            .iter()
            .filter_map(|k| date_from_key(k))
            .collect();
        dates.sort();
        dates
    }

    #[tokio::test]
    async fn test_first_request_for_today_populates_week() {
        let today = date(2025, 6, 10);
        let cache = cache_with(ScriptedProvider::default(), today);

        let doc = cache.get_liturgia_by_date(today).await.unwrap();
        assert_eq!(doc, Some(doc_for(today)));

        let expected: Vec<NaiveDate> = (0..7).map(|i| add_days(today, i)).collect();
        assert_eq!(cache.provider().calls(), expected);
        assert_eq!(stored_dates(&cache).await, expected);

        let meta = cache.store().get(META_KEY).await.unwrap().unwrap();
        assert_eq!(meta, r#"{"start":"2025-06-10","end":"2025-06-16"}"#);
    }

    #[tokio::test]
    async fn test_scenario_past_date_is_isolated_fetch() {
        let today = date(2025, 6, 10);
        let cache = cache_with(ScriptedProvider::default(), today);

        cache.get_liturgia_by_date(today).await.unwrap();
        let window = cache.window().await;

        let past = date(2025, 6, 5);
        let doc = cache.get_liturgia_by_date(past).await.unwrap();
        assert_eq!(doc, Some(doc_for(past)));
        assert_eq!(cache.provider().call_count(), 8);
        assert_eq!(cache.provider().calls().last(), Some(&past));
        assert_eq!(cache.window().await, window);
    }

    #[tokio::test]
    async fn test_hit_does_not_call_provider() {
        let today = date(2025, 6, 10);
        let cache = cache_with(ScriptedProvider::default(), today);
        let other = date(2025, 3, 1);

        let first = cache.get_liturgia_by_date(other).await.unwrap();
        let second = cache.get_liturgia_by_date(other).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.provider().call_count(), 1);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.fetches, 1);
        assert!((stats.hit_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_window_days_are_hits_after_population() {
        let today = date(2025, 6, 10);
        let cache = cache_with(ScriptedProvider::default(), today);
        cache.get_liturgia_by_date(today).await.unwrap();

        for i in 0..7 {
            cache.get_liturgia_by_date(add_days(today, i)).await.unwrap();
        }
        assert_eq!(cache.provider().call_count(), 7);
    }

    #[tokio::test]
    async fn test_not_today_miss_leaves_window_untouched() {
        let today = date(2025, 6, 10);
        let cache = cache_with(ScriptedProvider::default(), today);
        let stale = r#"{"start":"2025-05-01","end":"2025-05-07"}"#;
        cache.store().set(META_KEY, stale).await.unwrap();

        cache.get_liturgia_by_date(date(2025, 8, 15)).await.unwrap();

        assert_eq!(cache.store().get(META_KEY).await.unwrap().as_deref(), Some(stale));
        assert_eq!(cache.provider().call_count(), 1);
    }

    #[tokio::test]
    async fn test_reanchor_prunes_everything_before_today() {
        let today = date(2025, 6, 10);
        let cache = cache_with(ScriptedProvider::default(), today);
        let store = cache.store();

        for offset in (-10..=3).filter(|o| *o != 0) {
            let d = add_days(today, offset);
            store.set(&key_for(&d), &doc_for(d).to_json().unwrap()).await.unwrap();
        }
        store.set(&month_key_for(2025, 5), "{}").await.unwrap();
        store.set(META_KEY, r#"{"start":"2025-05-31","end":"2025-06-06"}"#).await.unwrap();
        store.set("notas", "[]").await.unwrap();

        cache.get_liturgia_by_date(today).await.unwrap();

        let dates = stored_dates(&cache).await;
        assert!(dates.iter().all(|d| *d >= today), "stale entries left: {:?}", dates);
        assert_eq!(dates.len(), 7);
        assert_eq!(store.get(&month_key_for(2025, 5)).await.unwrap(), None);
        assert_eq!(store.get("notas").await.unwrap().as_deref(), Some("[]"));
        assert_eq!(cache.stats().evictions, 11);

        // Days already resident inside the new window are not fetched again
        let expected: Vec<NaiveDate> = [0, 4, 5, 6].iter().map(|i| add_days(today, *i)).collect();
        assert_eq!(cache.provider().calls(), expected);
    }

    #[tokio::test]
    async fn test_day_rollover_moves_window() {
        let today = date(2025, 6, 10);
        let clock_cache = cache_with(ScriptedProvider::default(), today);
        clock_cache.get_liturgia_by_date(today).await.unwrap();

        // Still inside the window: served from cache, no re-anchor
        let tomorrow = add_days(today, 1);
        clock_cache.inner.clock.set(tomorrow);
        clock_cache.get_liturgia_by_date(tomorrow).await.unwrap();
        assert_eq!(clock_cache.provider().call_count(), 7);

        // A week later: outside the window
        let next_week = add_days(today, 7);
        clock_cache.inner.clock.set(next_week);
        clock_cache.get_liturgia_by_date(next_week).await.unwrap();

        assert_eq!(
            clock_cache.window().await,
            Some(RetentionWindow::anchored_at(next_week, CACHE_DAYS))
        );
        let dates = stored_dates(&clock_cache).await;
        assert_eq!(dates.first(), Some(&next_week));
        assert_eq!(dates.len(), 7);
        assert_eq!(clock_cache.provider().call_count(), 14);
    }

    #[tokio::test]
    async fn test_partial_failures_during_population() {
        let today = date(2025, 6, 10);
        let failing = [add_days(today, 2), add_days(today, 5)];
        let provider = ScriptedProvider {
            failures: failing.iter().copied().collect(),
            ..Default::default()
        };
        let cache = cache_with(provider, today);

        let doc = cache.get_liturgia_by_date(today).await.unwrap();
        assert_eq!(doc, Some(doc_for(today)));
        assert_eq!(cache.provider().call_count(), 7);
        assert_eq!(stored_dates(&cache).await.len(), 5);
        assert_eq!(cache.window().await, Some(RetentionWindow::anchored_at(today, CACHE_DAYS)));

        for i in [0, 1, 3, 4, 6] {
            let d = add_days(today, i);
            assert_eq!(cache.get_liturgia_by_date(d).await.unwrap(), Some(doc_for(d)));
        }
        assert_eq!(cache.provider().call_count(), 7);
        assert_eq!(cache.stats().fetch_failures, 2);
    }

    #[tokio::test]
    async fn test_gap_inside_window_is_a_direct_fetch() {
        let today = date(2025, 6, 10);
        let provider = ScriptedProvider {
            failures: [today].into_iter().collect(),
            ..Default::default()
        };
        let cache = cache_with(provider, today);

        // Today's own failure is reported even though the window was written
        let err = cache.get_liturgia_by_date(today).await.unwrap_err();
        assert!(matches!(err, FetchError::Timeout(_)));
        assert!(cache.window().await.is_some());

        // Window already covers today: single retry, no repopulation
        assert!(cache.get_liturgia_by_date(today).await.is_err());
        assert_eq!(cache.provider().call_count(), 8);
    }

    #[tokio::test]
    async fn test_oversized_document_is_returned_but_not_stored() {
        let today = date(2025, 6, 10);
        let big = date(2025, 1, 20);
        let provider = ScriptedProvider {
            oversized: [big].into_iter().collect(),
            ..Default::default()
        };
        let cache = cache_with(provider, today);

        let doc = cache.get_liturgia_by_date(big).await.unwrap().unwrap();
        assert!(doc.to_json().unwrap().len() > MAX_CACHE_SIZE);
        assert_eq!(cache.store().get(&key_for(&big)).await.unwrap(), None);

        cache.get_liturgia_by_date(big).await.unwrap();
        assert_eq!(cache.provider().call_count(), 2);
        assert_eq!(cache.stats().oversized_skips, 2);
    }

    #[tokio::test]
    async fn test_oversized_today_is_still_returned_after_population() {
        let today = date(2025, 6, 10);
        let provider = ScriptedProvider {
            oversized: [today].into_iter().collect(),
            ..Default::default()
        };
        let cache = cache_with(provider, today);

        assert!(cache.get_liturgia_by_date(today).await.unwrap().is_some());
        assert_eq!(stored_dates(&cache).await.len(), 6);
    }

    #[tokio::test]
    async fn test_empty_document_is_none_and_not_stored() {
        let today = date(2025, 6, 10);
        let missing = date(2030, 1, 1);
        let provider = ScriptedProvider {
            empty: [missing].into_iter().collect(),
            ..Default::default()
        };
        let cache = cache_with(provider, today);

        assert_eq!(cache.get_liturgia_by_date(missing).await.unwrap(), None);
        assert_eq!(cache.store().get(&key_for(&missing)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_transport_failure_on_direct_lookup_is_an_error() {
        let today = date(2025, 6, 10);
        let other = date(2025, 6, 1);
        let provider = ScriptedProvider {
            failures: [other].into_iter().collect(),
            ..Default::default()
        };
        let cache = cache_with(provider, today);

        let err = cache.get_liturgia_by_date(other).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_store_read_failure_is_a_miss() {
        let today = date(2025, 6, 10);
        let store = FailingStore {
            fail_reads: true,
            ..Default::default()
        };
        let cache = LiturgyCache::with_clock(store, ScriptedProvider::default(), FixedClock::new(today));
        let other = date(2025, 2, 2);

        assert_eq!(cache.get_liturgia_by_date(other).await.unwrap(), Some(doc_for(other)));
        assert_eq!(cache.get_liturgia_by_date(other).await.unwrap(), Some(doc_for(other)));
        assert_eq!(cache.provider().call_count(), 2);
    }

    #[tokio::test]
    async fn test_store_write_failure_still_returns_document() {
        let today = date(2025, 6, 10);
        let store = FailingStore {
            fail_writes: true,
            ..Default::default()
        };
        let cache = LiturgyCache::with_clock(store, ScriptedProvider::default(), FixedClock::new(today));

        assert_eq!(cache.get_liturgia_by_date(today).await.unwrap(), Some(doc_for(today)));
        assert_eq!(cache.window().await, None);
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_fetch() {
        let today = date(2025, 6, 10);
        let provider = ScriptedProvider {
            delay: Some(Duration::from_millis(20)),
            ..Default::default()
        };
        let cache = cache_with(provider, today);
        let other = date(2025, 4, 20);

        let (a, b) = tokio::join!(
            cache.get_liturgia_by_date(other),
            cache.get_liturgia_by_date(other)
        );
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(cache.provider().call_count(), 1);
        assert!(cache.in_flight().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_today_requests_populate_once() {
        let today = date(2025, 6, 10);
        let provider = ScriptedProvider {
            delay: Some(Duration::from_millis(5)),
            ..Default::default()
        };
        let cache = cache_with(provider, today);

        let (a, b) = tokio::join!(
            cache.get_liturgia_by_date(today),
            cache.get_liturgia_by_date(today)
        );
        assert_eq!(a.unwrap(), Some(doc_for(today)));
        assert_eq!(b.unwrap(), Some(doc_for(today)));
        assert_eq!(cache.provider().call_count(), 7);
    }

    #[tokio::test]
    async fn test_month_bundle_is_migrated() {
        let today = date(2025, 6, 10);
        let cache = cache_with(ScriptedProvider::default(), today);
        let legacy = json!({ "3": { "cor": "Branco" }, "4": {} });
        cache
            .store()
            .set(&month_key_for(2025, 5), &legacy.to_string())
            .await
            .unwrap();

        let doc = cache.get_liturgia_by_date(date(2025, 5, 3)).await.unwrap().unwrap();
        assert_eq!(doc.summary().cor.as_deref(), Some("Branco"));
        assert_eq!(cache.provider().call_count(), 0);
        assert!(cache.store().get("liturgia-2025-05-03").await.unwrap().is_some());

        // An empty day in the bundle falls through to the network
        cache.get_liturgia_by_date(date(2025, 5, 4)).await.unwrap();
        assert_eq!(cache.provider().call_count(), 1);
    }

    #[tokio::test]
    async fn test_month_bundle_for_today_still_reanchors() {
        let today = date(2025, 6, 10);
        let cache = cache_with(ScriptedProvider::default(), today);
        let store = cache.store();
        let old = date(2025, 1, 1);
        store.set(META_KEY, r#"{"start":"2024-12-30","end":"2025-01-05"}"#).await.unwrap();
        store.set(&key_for(&old), &doc_for(old).to_json().unwrap()).await.unwrap();
        let legacy = json!({ "10": { "cor": "Vermelho" } });
        store.set(&month_key_for(2025, 6), &legacy.to_string()).await.unwrap();

        let doc = cache.get_liturgia_by_date(today).await.unwrap().unwrap();
        assert_eq!(doc.summary().cor.as_deref(), Some("Vermelho"));

        assert_eq!(cache.window().await, Some(RetentionWindow::anchored_at(today, CACHE_DAYS)));
        let expected: Vec<NaiveDate> = (0..7).map(|i| add_days(today, i)).collect();
        assert_eq!(stored_dates(&cache).await, expected);
        assert_eq!(store.get(&month_key_for(2025, 6)).await.unwrap(), None);
        // Today came from the bundle; only the other six days hit the network
        assert_eq!(cache.provider().calls(), expected[1..].to_vec());
    }

    #[tokio::test]
    async fn test_unreadable_window_metadata_forces_reanchor() {
        let today = date(2025, 6, 10);
        let cache = cache_with(ScriptedProvider::default(), today);
        cache.store().set(META_KEY, "{garbage").await.unwrap();
        assert_eq!(cache.window().await, None);

        assert_eq!(cache.get_liturgia_by_date(today).await.unwrap(), Some(doc_for(today)));

        let expected: Vec<NaiveDate> = (0..7).map(|i| add_days(today, i)).collect();
        assert_eq!(cache.provider().calls(), expected);
        assert_eq!(stored_dates(&cache).await, expected);
        assert_eq!(cache.window().await, Some(RetentionWindow::anchored_at(today, CACHE_DAYS)));
    }

    #[tokio::test]
    async fn test_abandoned_fetch_completes_and_releases_cache() {
        let today = date(2025, 6, 10);
        let provider = ScriptedProvider {
            delay: Some(Duration::from_millis(50)),
            ..Default::default()
        };
        let cache = cache_with(provider, today);
        let other = date(2025, 4, 20);

        let waited = tokio::time::timeout(Duration::from_millis(5), cache.get_liturgia_by_date(other)).await;
        assert!(waited.is_err());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(cache.in_flight().is_empty());
        assert_eq!(
            cache.store().get(&key_for(&other)).await.unwrap(),
            Some(doc_for(other).to_json().unwrap())
        );
        assert_eq!(cache.provider().call_count(), 1);

        let inner = Arc::downgrade(&cache.inner);
        drop(cache);
        assert!(inner.upgrade().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_refetched() {
        let today = date(2025, 6, 10);
        let cache = cache_with(ScriptedProvider::default(), today);
        let other = date(2025, 1, 1);
        cache.store().set(&key_for(&other), "{not json").await.unwrap();

        assert_eq!(cache.get_liturgia_by_date(other).await.unwrap(), Some(doc_for(other)));
        assert_eq!(cache.provider().call_count(), 1);
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent_and_offline() {
        let today = date(2025, 6, 10);
        let cache = cache_with(ScriptedProvider::default(), today);
        cache.initialize().await;
        cache.initialize().await;
        assert_eq!(cache.provider().call_count(), 0);
        assert!(cache.store().is_empty());
    }

    #[tokio::test]
    async fn test_clear_removes_only_owned_keys() {
        let today = date(2025, 6, 10);
        let cache = cache_with(ScriptedProvider::default(), today);
        cache.get_liturgia_by_date(today).await.unwrap();
        cache.store().set("notas", "[]").await.unwrap();

        assert_eq!(cache.clear().await.unwrap(), 8);
        assert_eq!(cache.store().list_keys().await.unwrap(), vec!["notas".to_string()]);
        assert_eq!(cache.window().await, None);
    }

    #[tokio::test]
    async fn test_spawn_prefetch_reports_outcomes() {
        let today = date(2025, 6, 10);
        let provider = ScriptedProvider {
            failures: [add_days(today, 8)].into_iter().collect(),
            empty: [add_days(today, 9)].into_iter().collect(),
            ..Default::default()
        };
        let cache = cache_with(provider, today);

        let dates: Vec<NaiveDate> = (7..10).map(|i| add_days(today, i)).collect();
        let report = cache.spawn_prefetch(dates).await.unwrap();
        assert_eq!(
            report,
            PrefetchReport {
                available: 1,
                missing: 1,
                failed: 1
            }
        );
        assert_eq!(stored_dates(&cache).await, vec![add_days(today, 7)]);
        // Prefetching other days never creates a window
        assert_eq!(cache.window().await, None);
    }

    #[test]
    fn test_upcoming_dates() {
        let today = date(2025, 12, 30);
        let cache = cache_with(ScriptedProvider::default(), today);
        assert_eq!(
            cache.upcoming_dates(3),
            vec![today, date(2025, 12, 31), date(2026, 1, 1)]
        );
    }
}
