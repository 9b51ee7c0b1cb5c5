// =============================================================================
// Market Data Store - reconciles bulk loads with incremental push updates
// =============================================================================
//
// Two independent data paths feed the store: REST-style bulk loads (full
// candle lists, full snapshots) and incremental push events from the session
// connection. Both are merged into one capped CandleSeries per (symbol,
// timeframe) and at most one MarketSnapshot per symbol, resolved by
// timestamp comparison rather than arrival order.
//
// Series invariant: strictly increasing, unique open_time per entry,
// length <= cap. Snapshot invariant: timestamp monotonically non-decreasing
// per symbol; stale events are dropped and counted, never surfaced.
//
// Mutations notify watchers through explicit per-key broadcast channels;
// consumers subscribe with `watch_series` / `watch_price`. The store itself
// performs no network I/O.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::debug;

use crate::types::{Candle, MarketSnapshot, Timeframe};

/// Composite key identifying one candle series.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct SeriesKey {
    pub symbol: String,
    pub timeframe: Timeframe,
}

impl SeriesKey {
    pub fn new(symbol: impl Into<String>, timeframe: Timeframe) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
        }
    }
}

impl std::fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.symbol, self.timeframe)
    }
}

/// Change notification delivered to store watchers.
#[derive(Debug, Clone)]
pub enum StoreChange {
    /// One candle was merged into the watched series.
    Candle(Candle),
    /// The watched series was replaced by a bulk load; re-read via `candles`.
    SeriesReloaded,
    /// The watched symbol's snapshot was updated.
    Snapshot(MarketSnapshot),
}

const WATCH_CHANNEL_CAPACITY: usize = 64;

pub struct MarketStore {
    cap: usize,
    series: RwLock<HashMap<SeriesKey, VecDeque<Candle>>>,
    snapshots: RwLock<HashMap<String, MarketSnapshot>>,
    series_watchers: RwLock<HashMap<SeriesKey, broadcast::Sender<StoreChange>>>,
    price_watchers: RwLock<HashMap<String, broadcast::Sender<StoreChange>>>,
    stale_discards: AtomicU64,
}

impl MarketStore {
    /// Create a store retaining at most `cap` candles per series.
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            series: RwLock::new(HashMap::new()),
            snapshots: RwLock::new(HashMap::new()),
            series_watchers: RwLock::new(HashMap::new()),
            price_watchers: RwLock::new(HashMap::new()),
            stale_discards: AtomicU64::new(0),
        }
    }

    // ── Candle path ─────────────────────────────────────────────────────

    /// Replace the series for (symbol, timeframe) with a bulk-loaded list.
    ///
    /// Candles already stored that are strictly newer than the bulk list's
    /// newest bar are kept on top: they arrived over push while the load was
    /// in flight, and timestamp comparison, not arrival order, decides.
    pub fn apply_snapshot(&self, symbol: &str, timeframe: Timeframe, candles: Vec<Candle>) {
        let key = SeriesKey::new(symbol, timeframe);

        let mut fresh = candles;
        fresh.sort_by_key(|c| c.open_time);
        fresh.dedup_by_key(|c| c.open_time);

        {
            let mut map = self.series.write();
            let ring = map
                .entry(key.clone())
                .or_insert_with(|| VecDeque::with_capacity(self.cap + 1));

            let carried: Vec<Candle> = match fresh.last() {
                Some(newest) => ring
                    .iter()
                    .filter(|c| c.open_time > newest.open_time)
                    .cloned()
                    .collect(),
                // An explicitly empty reload clears the series.
                None => Vec::new(),
            };

            ring.clear();
            ring.extend(fresh);
            ring.extend(carried);
            while ring.len() > self.cap {
                ring.pop_front();
            }
        }

        self.notify_series(&key, StoreChange::SeriesReloaded);
    }

    /// Merge one pushed candle into its series, keyed by `open_time`:
    /// a matching key overwrites in place (the still-forming bar), a new key
    /// is inserted in order. The update is not assumed to be the newest bar.
    pub fn apply_candle_update(&self, symbol: &str, timeframe: Timeframe, candle: Candle) {
        let key = SeriesKey::new(symbol, timeframe);

        {
            let mut map = self.series.write();
            let ring = map
                .entry(key.clone())
                .or_insert_with(|| VecDeque::with_capacity(self.cap + 1));

            match ring.binary_search_by(|c| c.open_time.cmp(&candle.open_time)) {
                Ok(idx) => ring[idx] = candle.clone(),
                Err(idx) => {
                    ring.insert(idx, candle.clone());
                    while ring.len() > self.cap {
                        ring.pop_front();
                    }
                }
            }
        }

        self.notify_series(&key, StoreChange::Candle(candle));
    }

    /// Candles for (symbol, timeframe), oldest first.
    pub fn candles(&self, symbol: &str, timeframe: Timeframe) -> Vec<Candle> {
        let key = SeriesKey::new(symbol, timeframe);
        self.series
            .read()
            .get(&key)
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// The most recent candle of a series, if any.
    pub fn latest_candle(&self, symbol: &str, timeframe: Timeframe) -> Option<Candle> {
        let key = SeriesKey::new(symbol, timeframe);
        self.series.read().get(&key).and_then(|r| r.back().cloned())
    }

    pub fn series_len(&self, symbol: &str, timeframe: Timeframe) -> usize {
        let key = SeriesKey::new(symbol, timeframe);
        self.series.read().get(&key).map_or(0, VecDeque::len)
    }

    // ── Price path ──────────────────────────────────────────────────────

    /// Merge one pushed price event, last-write-wins keyed by the event
    /// timestamp. An event not newer than the stored snapshot is silently
    /// discarded and counted. Returns whether the event was applied.
    pub fn apply_price_update(
        &self,
        symbol: &str,
        price: f64,
        volume: Option<f64>,
        event_ts: i64,
    ) -> bool {
        let updated = {
            let mut snaps = self.snapshots.write();
            match snaps.get_mut(symbol) {
                Some(existing) if event_ts <= existing.timestamp => None,
                Some(existing) => {
                    existing.price = price;
                    if volume.is_some() {
                        existing.volume_24h = volume;
                    }
                    existing.timestamp = event_ts;
                    Some(existing.clone())
                }
                None => {
                    let snapshot = MarketSnapshot {
                        symbol: symbol.to_string(),
                        price,
                        volume_24h: volume,
                        high_24h: None,
                        low_24h: None,
                        price_change_24h: None,
                        price_change_percent_24h: None,
                        timestamp: event_ts,
                    };
                    snaps.insert(symbol.to_string(), snapshot.clone());
                    Some(snapshot)
                }
            }
        };

        match updated {
            Some(snapshot) => {
                self.notify_price(symbol, StoreChange::Snapshot(snapshot));
                true
            }
            None => {
                self.stale_discards.fetch_add(1, Ordering::Relaxed);
                debug!(symbol = %symbol, event_ts, "stale price event discarded");
                false
            }
        }
    }

    /// Replace the full snapshot for a symbol from a bulk load, under the
    /// same timestamp monotonicity guard as the push path.
    pub fn set_snapshot(&self, snapshot: MarketSnapshot) -> bool {
        let applied = {
            let mut snaps = self.snapshots.write();
            match snaps.get(&snapshot.symbol) {
                Some(existing) if snapshot.timestamp <= existing.timestamp => false,
                _ => {
                    snaps.insert(snapshot.symbol.clone(), snapshot.clone());
                    true
                }
            }
        };

        if applied {
            let symbol = snapshot.symbol.clone();
            self.notify_price(&symbol, StoreChange::Snapshot(snapshot));
        } else {
            self.stale_discards.fetch_add(1, Ordering::Relaxed);
        }
        applied
    }

    pub fn snapshot(&self, symbol: &str) -> Option<MarketSnapshot> {
        self.snapshots.read().get(symbol).cloned()
    }

    /// Stale events dropped by the timestamp guard since creation.
    pub fn stale_discards(&self) -> u64 {
        self.stale_discards.load(Ordering::Relaxed)
    }

    // ── Change notification ─────────────────────────────────────────────

    /// Subscribe to changes of one candle series.
    pub fn watch_series(&self, symbol: &str, timeframe: Timeframe) -> broadcast::Receiver<StoreChange> {
        let key = SeriesKey::new(symbol, timeframe);
        self.series_watchers
            .write()
            .entry(key)
            .or_insert_with(|| broadcast::channel(WATCH_CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Subscribe to snapshot changes of one symbol.
    pub fn watch_price(&self, symbol: &str) -> broadcast::Receiver<StoreChange> {
        self.price_watchers
            .write()
            .entry(symbol.to_string())
            .or_insert_with(|| broadcast::channel(WATCH_CHANNEL_CAPACITY).0)
            .subscribe()
    }

    fn notify_series(&self, key: &SeriesKey, change: StoreChange) {
        if let Some(tx) = self.series_watchers.read().get(key) {
            // Nobody listening is fine.
            let _ = tx.send(change);
        }
    }

    fn notify_price(&self, symbol: &str, change: StoreChange) {
        if let Some(tx) = self.price_watchers.read().get(symbol) {
            let _ = tx.send(change);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_candle(open_time: i64, close: f64) -> Candle {
        Candle {
            open_time,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 100.0,
            close_time: open_time + 59_999,
            quote_volume: 200.0,
            trades: 50,
            taker_buy_base_volume: 60.0,
            taker_buy_quote_volume: 120.0,
        }
    }

    fn assert_strictly_increasing(candles: &[Candle]) {
        for pair in candles.windows(2) {
            assert!(
                pair[0].open_time < pair[1].open_time,
                "open times must be strictly increasing: {} then {}",
                pair[0].open_time,
                pair[1].open_time
            );
        }
    }

    #[test]
    fn update_same_open_time_overwrites_in_place() {
        let store = MarketStore::new(10);
        store.apply_candle_update("BTCUSDT", Timeframe::M1, sample_candle(0, 100.0));
        store.apply_candle_update("BTCUSDT", Timeframe::M1, sample_candle(0, 105.0));

        let candles = store.candles("BTCUSDT", Timeframe::M1);
        assert_eq!(candles.len(), 1);
        assert!((candles[0].close - 105.0).abs() < f64::EPSILON);
    }

    #[test]
    fn new_open_time_appends_in_order() {
        let store = MarketStore::new(10);
        store.apply_candle_update("BTCUSDT", Timeframe::M1, sample_candle(0, 100.0));
        store.apply_candle_update("BTCUSDT", Timeframe::M1, sample_candle(0, 105.0));
        store.apply_candle_update("BTCUSDT", Timeframe::M1, sample_candle(60_000, 106.0));

        let candles = store.candles("BTCUSDT", Timeframe::M1);
        assert_eq!(candles.len(), 2);
        assert!((candles[0].close - 105.0).abs() < f64::EPSILON);
        assert!((candles[1].close - 106.0).abs() < f64::EPSILON);
        assert_strictly_increasing(&candles);
    }

    #[test]
    fn out_of_order_updates_keep_series_sorted_and_unique() {
        let store = MarketStore::new(10);
        for open_time in [180_000_i64, 0, 120_000, 60_000, 120_000, 0] {
            store.apply_candle_update(
                "BTCUSDT",
                Timeframe::M1,
                sample_candle(open_time, open_time as f64),
            );
        }

        let candles = store.candles("BTCUSDT", Timeframe::M1);
        assert_eq!(candles.len(), 4);
        assert_strictly_increasing(&candles);
    }

    #[test]
    fn series_is_capped_and_evicts_oldest() {
        let store = MarketStore::new(3);
        for i in 0..5_i64 {
            store.apply_candle_update(
                "BTCUSDT",
                Timeframe::M1,
                sample_candle(i * 60_000, 100.0 + i as f64),
            );
        }

        let candles = store.candles("BTCUSDT", Timeframe::M1);
        assert_eq!(candles.len(), 3);
        assert_eq!(candles[0].open_time, 120_000);
        assert_strictly_increasing(&candles);
    }

    #[test]
    fn series_are_independent_per_timeframe() {
        let store = MarketStore::new(10);
        store.apply_candle_update("BTCUSDT", Timeframe::M1, sample_candle(0, 100.0));
        store.apply_candle_update("BTCUSDT", Timeframe::M5, sample_candle(0, 200.0));

        assert_eq!(store.series_len("BTCUSDT", Timeframe::M1), 1);
        assert!((store.latest_candle("BTCUSDT", Timeframe::M5).unwrap().close - 200.0).abs()
            < f64::EPSILON);
    }

    #[test]
    fn bulk_snapshot_replaces_but_keeps_newer_pushed_candles() {
        let store = MarketStore::new(10);
        // A pushed bar arrives while the bulk load is in flight.
        store.apply_candle_update("BTCUSDT", Timeframe::M1, sample_candle(180_000, 999.0));

        store.apply_snapshot(
            "BTCUSDT",
            Timeframe::M1,
            vec![
                sample_candle(0, 100.0),
                sample_candle(60_000, 101.0),
                sample_candle(120_000, 102.0),
            ],
        );

        let candles = store.candles("BTCUSDT", Timeframe::M1);
        assert_eq!(candles.len(), 4);
        assert_eq!(candles[3].open_time, 180_000);
        assert!((candles[3].close - 999.0).abs() < f64::EPSILON);
        assert_strictly_increasing(&candles);
    }

    #[test]
    fn bulk_snapshot_truncates_to_cap() {
        let store = MarketStore::new(2);
        store.apply_snapshot(
            "BTCUSDT",
            Timeframe::M1,
            vec![
                sample_candle(0, 100.0),
                sample_candle(60_000, 101.0),
                sample_candle(120_000, 102.0),
            ],
        );

        let candles = store.candles("BTCUSDT", Timeframe::M1);
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].open_time, 60_000);
    }

    #[test]
    fn stale_price_update_is_discarded() {
        let store = MarketStore::new(10);
        assert!(store.apply_price_update("BTCUSDT", 100.0, None, 1000));
        // Equal timestamp: stale.
        assert!(!store.apply_price_update("BTCUSDT", 101.0, None, 1000));
        // Older timestamp: stale.
        assert!(!store.apply_price_update("BTCUSDT", 102.0, None, 999));

        let snap = store.snapshot("BTCUSDT").unwrap();
        assert!((snap.price - 100.0).abs() < f64::EPSILON);
        assert_eq!(snap.timestamp, 1000);
        assert_eq!(store.stale_discards(), 2);
    }

    #[test]
    fn fresh_price_update_replaces_fields() {
        let store = MarketStore::new(10);
        store.apply_price_update("BTCUSDT", 100.0, Some(5.0), 1000);
        assert!(store.apply_price_update("BTCUSDT", 110.0, Some(6.0), 1001));

        let snap = store.snapshot("BTCUSDT").unwrap();
        assert!((snap.price - 110.0).abs() < f64::EPSILON);
        assert_eq!(snap.volume_24h, Some(6.0));
        assert_eq!(snap.timestamp, 1001);
    }

    #[test]
    fn bulk_snapshot_respects_timestamp_guard() {
        let store = MarketStore::new(10);
        store.apply_price_update("BTCUSDT", 100.0, None, 2000);

        let stale = MarketSnapshot {
            symbol: "BTCUSDT".into(),
            price: 90.0,
            volume_24h: Some(1.0),
            high_24h: Some(120.0),
            low_24h: Some(80.0),
            price_change_24h: None,
            price_change_percent_24h: None,
            timestamp: 1500,
        };
        assert!(!store.set_snapshot(stale));
        assert!((store.snapshot("BTCUSDT").unwrap().price - 100.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn series_watcher_receives_merged_candle() {
        let store = MarketStore::new(10);
        let mut rx = store.watch_series("BTCUSDT", Timeframe::M1);

        store.apply_candle_update("BTCUSDT", Timeframe::M1, sample_candle(0, 100.0));

        match rx.recv().await.unwrap() {
            StoreChange::Candle(c) => assert_eq!(c.open_time, 0),
            other => panic!("expected candle change, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn price_watcher_ignores_other_symbols() {
        let store = MarketStore::new(10);
        let mut rx = store.watch_price("BTCUSDT");

        store.apply_price_update("ETHUSDT", 2000.0, None, 1);
        store.apply_price_update("BTCUSDT", 37000.0, None, 1);

        match rx.recv().await.unwrap() {
            StoreChange::Snapshot(s) => assert_eq!(s.symbol, "BTCUSDT"),
            other => panic!("expected snapshot change, got {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }
}
