use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use tokio::sync::Notify;

use crate::feed::FeedBuffer;
use crate::models::{BidAsk, Candle, DepthSnapshot};

/// Per-source delta of one `apply_all` pass.
///
/// `tables` carries the freshly promoted rows, serialized and named for the
/// persistence collaborator. Depth rows are applied but never included
/// (too big to be worth persisting every cycle).
#[derive(Debug, Default)]
pub struct AppliedDelta {
    pub promoted: HashMap<&'static str, usize>,
    pub tables: Vec<(String, Value)>,
}

impl AppliedDelta {
    pub fn total_promoted(&self) -> usize {
        self.promoted.values().sum()
    }
}

struct FeedSet {
    candles: Option<FeedBuffer<Candle>>,
    bid_ask: Option<FeedBuffer<BidAsk>>,
    depth: Option<FeedBuffer<DepthSnapshot>>,
}

/// Owns every feed buffer of one strategy instance behind a single lock.
///
/// All buffer state transitions (append and apply across all feeds) happen
/// under this one mutex; external code never touches a buffer directly.
/// Every ingestion path signals `new_data`, waking the processing loop.
pub struct FeedAggregator {
    inner: Mutex<FeedSet>,
    new_data: Notify,
}

impl FeedAggregator {
    pub fn new(
        candles: Option<FeedBuffer<Candle>>,
        bid_ask: Option<FeedBuffer<BidAsk>>,
        depth: Option<FeedBuffer<DepthSnapshot>>,
    ) -> Self {
        Self {
            inner: Mutex::new(FeedSet {
                candles,
                bid_ask,
                depth,
            }),
            new_data: Notify::new(),
        }
    }

    /// Suspend until any feed reports new data. Condition-variable
    /// semantics: single waiter, auto-reset on wake.
    pub async fn wait_new_data(&self) {
        self.new_data.notified().await;
    }

    pub fn on_candles(&self, candles: impl IntoIterator<Item = Candle>) {
        {
            let mut set = self.inner.lock().unwrap();
            if let Some(buf) = set.candles.as_mut() {
                buf.append(candles);
            }
        }
        self.new_data.notify_one();
    }

    pub fn on_bid_ask(&self, quotes: impl IntoIterator<Item = BidAsk>) {
        {
            let mut set = self.inner.lock().unwrap();
            if let Some(buf) = set.bid_ask.as_mut() {
                buf.append(quotes);
            }
        }
        self.new_data.notify_one();
    }

    pub fn on_depth(&self, snapshots: impl IntoIterator<Item = DepthSnapshot>) {
        {
            let mut set = self.inner.lock().unwrap();
            if let Some(buf) = set.depth.as_mut() {
                buf.append(snapshots);
            }
        }
        self.new_data.notify_one();
    }

    /// Promote pending data of every configured buffer under one critical
    /// section and collect the per-source delta for persistence.
    pub fn apply_all(&self) -> AppliedDelta {
        let mut set = self.inner.lock().unwrap();
        let mut delta = AppliedDelta::default();

        if let Some(buf) = set.candles.as_mut() {
            if !buf.pending().is_empty() {
                if let Ok(rows) = serde_json::to_value(buf.pending()) {
                    delta.tables.push(("raw_candles".to_string(), rows));
                }
            }
            delta.promoted.insert(buf.name(), buf.apply());
        }
        if let Some(buf) = set.bid_ask.as_mut() {
            if !buf.pending().is_empty() {
                if let Ok(rows) = serde_json::to_value(buf.pending()) {
                    delta.tables.push(("raw_bid_ask".to_string(), rows));
                }
            }
            delta.promoted.insert(buf.name(), buf.apply());
        }
        if let Some(buf) = set.depth.as_mut() {
            delta.promoted.insert(buf.name(), buf.apply());
        }

        delta
    }

    /// Learn-readiness precondition: every configured buffer spans its
    /// minimum history window.
    pub fn has_all_min_history(&self) -> bool {
        let set = self.inner.lock().unwrap();
        set.candles.as_ref().map_or(true, |b| b.has_min_history())
            && set.bid_ask.as_ref().map_or(true, |b| b.has_min_history())
            && set.depth.as_ref().map_or(true, |b| b.has_min_history())
    }

    /// Liveness across all configured feeds. A false result is terminal for
    /// the process: trading on stale feeds is unsafe.
    pub fn is_alive(&self, max_staleness: Duration, now: DateTime<Utc>) -> bool {
        let set = self.inner.lock().unwrap();
        set.candles
            .as_ref()
            .map_or(true, |b| b.is_alive(max_staleness, now))
            && set
                .bid_ask
                .as_ref()
                .map_or(true, |b| b.is_alive(max_staleness, now))
            && set
                .depth
                .as_ref()
                .map_or(true, |b| b.is_alive(max_staleness, now))
    }

    /// Run a closure against the committed candle history while holding the
    /// aggregator lock. Feature construction goes through here so it never
    /// races an apply.
    pub fn with_candles<R>(&self, f: impl FnOnce(&[Candle]) -> R) -> Option<R> {
        let set = self.inner.lock().unwrap();
        set.candles.as_ref().map(|b| f(b.committed()))
    }

    /// Last committed candle, if any
    pub fn last_candle(&self) -> Option<Candle> {
        let set = self.inner.lock().unwrap();
        set.candles
            .as_ref()
            .and_then(|b| b.committed().last().cloned())
    }

    /// Operational status of every configured feed
    pub fn report(&self) -> Value {
        let set = self.inner.lock().unwrap();
        let mut feeds = serde_json::Map::new();

        if let Some(buf) = set.candles.as_ref() {
            feeds.insert(
                buf.name().to_string(),
                json!({
                    "committed": buf.committed().len(),
                    "pending": buf.pending().len(),
                    "last_timestamp": buf.last_timestamp(),
                }),
            );
        }
        if let Some(buf) = set.bid_ask.as_ref() {
            feeds.insert(
                buf.name().to_string(),
                json!({
                    "committed": buf.committed().len(),
                    "pending": buf.pending().len(),
                    "last_timestamp": buf.last_timestamp(),
                }),
            );
        }
        if let Some(buf) = set.depth.as_ref() {
            feeds.insert(
                buf.name().to_string(),
                json!({
                    "committed": buf.committed().len(),
                    "pending": buf.pending().len(),
                    "last_timestamp": buf.last_timestamp(),
                }),
            );
        }

        Value::Object(feeds)
    }
}
