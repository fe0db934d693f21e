use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use tracing::{debug, error, info};

use crate::broker::{Broker, TradeRequest};
use crate::config::BotConfig;
use crate::features::FeatureEngineer;
use crate::feed::FeedAggregator;
use crate::model::ModelAdapter;
use crate::models::{FeatureRow, Prediction, Signal, SignalStatus, TargetRow, Trade};
use crate::persistence::Persister;
use crate::risk::RiskManager;
use crate::strategy::{SignalCalculator, TrainingSet};

/// Orchestrates one strategy instance: waits on feed data, derives features,
/// predicts, gates the signal and hands entries to the broker. A separate
/// self-rescheduling loop retrains the model.
///
/// Both loops guard against overlapping runs with atomic flags. Recoverable
/// errors are logged and the loop continues; a failed feed liveness check is
/// terminal.
pub struct StrategyCore {
    cfg: BotConfig,
    aggregator: Arc<FeedAggregator>,
    broker: Arc<dyn Broker>,
    risk: Arc<RiskManager>,
    engineer: Arc<dyn FeatureEngineer>,
    signal_calc: Arc<dyn SignalCalculator>,
    persister: Arc<dyn Persister>,
    model: Mutex<Box<dyn ModelAdapter>>,
    training: Mutex<TrainingSet>,
    is_processing: AtomicBool,
    is_learning: AtomicBool,
    last_trade_check: Mutex<Option<DateTime<Utc>>>,
}

impl StrategyCore {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: BotConfig,
        aggregator: Arc<FeedAggregator>,
        broker: Arc<dyn Broker>,
        risk: Arc<RiskManager>,
        engineer: Arc<dyn FeatureEngineer>,
        signal_calc: Arc<dyn SignalCalculator>,
        persister: Arc<dyn Persister>,
        model: Box<dyn ModelAdapter>,
    ) -> Self {
        let training = TrainingSet::new(cfg.learn_window());
        Self {
            cfg,
            aggregator,
            broker,
            risk,
            engineer,
            signal_calc,
            persister,
            model: Mutex::new(model),
            training: Mutex::new(training),
            is_processing: AtomicBool::new(false),
            is_learning: AtomicBool::new(false),
            last_trade_check: Mutex::new(None),
        }
    }

    /// Main loop. Returns only on a failed liveness check, which the caller
    /// must treat as fatal: trading on stale feeds is worse than not trading.
    pub async fn processing_loop(self: Arc<Self>) -> anyhow::Result<()> {
        info!(strategy = %self.cfg.strategy_name, "Processing loop starting");
        loop {
            self.aggregator.wait_new_data().await;

            if !self.aggregator.is_alive(self.cfg.max_staleness(), Utc::now()) {
                error!(report = %self.status_report(), "Feed liveness check failed");
                anyhow::bail!("feed is not alive");
            }

            if self.is_processing.swap(true, Ordering::SeqCst) {
                continue;
            }
            if let Err(e) = self.process_cycle() {
                error!("Processing cycle failed: {:#}", e);
            }
            self.is_processing.store(false, Ordering::SeqCst);

            if self.cfg.processing_interval_secs > 0 {
                tokio::time::sleep(std::time::Duration::from_secs(
                    self.cfg.processing_interval_secs,
                ))
                .await;
            }
        }
    }

    /// One pass: promote pending feed data, refresh the training set, then
    /// predict and act if the model is ready.
    pub fn process_cycle(&self) -> anyhow::Result<()> {
        let delta = self.aggregator.apply_all();
        if !delta.tables.is_empty() {
            self.persister
                .save_snapshot(&self.cfg.strategy_name, &delta.tables);
        }

        self.check_trade_status_if_due(Utc::now())?;

        let Some(candle) = self.aggregator.last_candle() else {
            return Ok(());
        };
        let Some(features) = self
            .aggregator
            .with_candles(|c| self.engineer.last_features(c))
            .flatten()
        else {
            debug!("Not enough candles for a feature row");
            return Ok(());
        };

        // Accumulate training data whether or not a model exists yet,
        // otherwise the first fit could never happen
        self.refresh_training_set(features.clone());

        let raw = {
            let model = self.model.lock().unwrap();
            if !model.is_trained() {
                debug!("Model not trained yet, skipping prediction");
                return Ok(());
            }
            model.predict(&features)?
        };
        anyhow::ensure!(raw.len() >= 2, "prediction width {} too small", raw.len());
        let prediction = Prediction {
            timestamp: candle.close_time,
            fut_low_diff: raw[0],
            fut_high_diff: raw[1],
        };

        let decision = self.signal_calc.calc_signal(&candle, &prediction);
        let signal = self.act_on_decision(&candle, decision)?;
        info!(
            status = ?signal.status,
            direction = signal.direction,
            price = signal.price,
            "Cycle complete"
        );

        self.persister.save_snapshot(
            &self.cfg.strategy_name,
            &[
                ("features".to_string(), json!([features])),
                ("prediction".to_string(), json!([prediction])),
                ("signal".to_string(), json!([signal])),
            ],
        );
        Ok(())
    }

    fn refresh_training_set(&self, features: crate::models::FeatureRow) {
        let labels = self
            .aggregator
            .with_candles(|c| self.engineer.targets_of(c, self.cfg.predict_window()))
            .unwrap_or_default();
        let mut training = self.training.lock().unwrap();
        training.push_unchecked(features);
        let promoted = training.promote(&labels);
        if promoted > 0 {
            debug!(promoted, total = training.checked_len(), "Training rows labeled");
        }
    }

    /// Gate the decision through the risk manager and the single-trade rule,
    /// then place the entry order. Exactly one signal record per cycle.
    fn act_on_decision(
        &self,
        candle: &crate::models::Candle,
        decision: crate::strategy::SignalDecision,
    ) -> anyhow::Result<Signal> {
        let mut signal = Signal {
            timestamp: candle.close_time,
            direction: decision.direction,
            price: candle.close,
            stop_loss: decision.stop_loss.map(|p| self.cfg.round_price(p)),
            take_profit: decision.take_profit.map(|p| self.cfg.round_price(p)),
            trailing_delta: decision.trailing_delta.map(|p| self.cfg.round_price(p)),
            status: SignalStatus::SignalOom,
            open_price: None,
        };

        // Report precedence: a flat signal is signal_oom even when the
        // cooldown or an open trade would also block it, and an open trade
        // masks the cooldown.
        if signal.direction == 0 {
            return Ok(signal);
        }
        if self.has_open_trade() {
            signal.status = SignalStatus::AlreadyInMarket;
            return Ok(signal);
        }
        if !self.risk.can_trade() {
            signal.status = SignalStatus::RiskManagerOom;
            return Ok(signal);
        }

        let request = TradeRequest {
            ticker: self.cfg.ticker.clone(),
            direction: signal.direction,
            quantity: self.cfg.round_quantity(self.cfg.order_quantity),
            price: Some(self.cfg.round_price(candle.close)),
            stop_loss_price: signal
                .stop_loss
                .ok_or_else(|| anyhow::anyhow!("signal without stop loss"))?,
            take_profit_price: signal
                .take_profit
                .ok_or_else(|| anyhow::anyhow!("signal without take profit"))?,
            trailing_delta: signal.trailing_delta,
        };
        match self.broker.create_trade(&request)? {
            Some(trade) => {
                signal.status = SignalStatus::OrderCreated;
                signal.open_price = Some(trade.open_price);
            }
            None => signal.status = SignalStatus::OrderNotCreated,
        }
        Ok(signal)
    }

    fn has_open_trade(&self) -> bool {
        self.broker
            .current_trade()
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(Trade::is_open)
    }

    /// Periodic authoritative status refresh while a trade is open. The
    /// protective stop may have filled on the venue side without a price
    /// tick crossing it locally.
    fn check_trade_status_if_due(&self, now: DateTime<Utc>) -> anyhow::Result<()> {
        if !self.has_open_trade() {
            return Ok(());
        }
        let due = {
            let mut last = self.last_trade_check.lock().unwrap();
            match *last {
                Some(t) if now - t < self.cfg.trade_check_interval() => false,
                _ => {
                    *last = Some(now);
                    true
                }
            }
        };
        if due {
            self.broker.update_trade_status()?;
        }
        Ok(())
    }

    /// Self-rescheduling learn loop. A failed pass logs and retries on the
    /// next tick, the reschedule is unconditional.
    pub async fn learning_loop(self: Arc<Self>) {
        info!(
            strategy = %self.cfg.strategy_name,
            interval_secs = self.cfg.learn_interval_secs,
            "Learning loop starting"
        );
        let interval = std::time::Duration::from_secs(self.cfg.learn_interval_secs.max(1));
        loop {
            if !self.is_learning.swap(true, Ordering::SeqCst) {
                if let Err(e) = self.learn() {
                    error!("Learn pass failed: {:#}", e);
                }
                self.is_learning.store(false, Ordering::SeqCst);
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// One training pass. The train tables are rebuilt from the committed
    /// candle history each time, so a fit never depends on processing cycles
    /// having run since startup.
    pub fn learn(&self) -> anyhow::Result<()> {
        let delta = self.aggregator.apply_all();
        if !delta.tables.is_empty() {
            self.persister
                .save_snapshot(&self.cfg.strategy_name, &delta.tables);
        }
        if !self.aggregator.has_all_min_history() {
            debug!("Not enough feed history to learn yet");
            return Ok(());
        }

        let Some((features, labels)) = self.aggregator.with_candles(|c| {
            (
                self.engineer.features_of(c),
                self.engineer.targets_of(c, self.cfg.predict_window()),
            )
        }) else {
            return Ok(());
        };
        // Rows quarantined by the processing loop graduate on the same labels
        self.training.lock().unwrap().promote(&labels);

        let (x, y) = Self::join_labeled(features, labels, self.cfg.learn_window());
        if x.len() < self.cfg.min_train_rows {
            debug!(
                rows = x.len(),
                min = self.cfg.min_train_rows,
                "Training set below minimum, skipping fit"
            );
            return Ok(());
        }

        let started = std::time::Instant::now();
        let snapshot = {
            let mut model = self.model.lock().unwrap();
            if !model.has_pipeline() {
                model.build_pipeline(self.engineer.feature_width(), self.engineer.target_width());
            }
            model.fit(&x, &y)?;
            let snapshot = model.snapshot()?;
            model.release();
            snapshot
        };
        self.persister.save_model(&self.cfg.strategy_name, &snapshot);
        info!(rows = x.len(), elapsed = ?started.elapsed(), "Model trained");
        Ok(())
    }

    /// Inner-join feature and target rows on timestamp, then keep only rows
    /// inside the learn window ending at the newest labeled row.
    fn join_labeled(
        features: Vec<FeatureRow>,
        labels: Vec<TargetRow>,
        window: Duration,
    ) -> (Vec<FeatureRow>, Vec<TargetRow>) {
        let by_ts: HashMap<DateTime<Utc>, TargetRow> =
            labels.into_iter().map(|t| (t.timestamp, t)).collect();
        let mut x = Vec::new();
        let mut y = Vec::new();
        for f in features {
            if let Some(t) = by_ts.get(&f.timestamp) {
                y.push(t.clone());
                x.push(f);
            }
        }
        if let Some(newest) = x.last().map(|r| r.timestamp) {
            let cutoff = newest - window;
            if let Some(keep_from) = x.iter().position(|r| r.timestamp >= cutoff) {
                x.drain(..keep_from);
                y.drain(..keep_from);
            }
        }
        (x, y)
    }

    /// Operational snapshot for logs and diagnostics
    pub fn status_report(&self) -> Value {
        json!({
            "strategy": self.cfg.strategy_name,
            "ticker": self.cfg.ticker,
            "feeds": self.aggregator.report(),
            "cur_trade": self.broker.current_trade().lock().unwrap().clone(),
            "is_processing": self.is_processing.load(Ordering::SeqCst),
            "is_learning": self.is_learning.load(Ordering::SeqCst),
            "training_rows": self.training.lock().unwrap().checked_len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::PaperBroker;
    use crate::features::LowHighFeatures;
    use crate::feed::FeedBuffer;
    use crate::models::{Candle, FeatureRow, TargetRow};
    use crate::persistence::MemoryPersister;
    use crate::strategy::LowHighSignalCalculator;
    use chrono::Duration;

    /// Fixed-output model so cycles are deterministic
    struct StubModel {
        trained: bool,
        output: Vec<f64>,
    }

    impl ModelAdapter for StubModel {
        fn has_pipeline(&self) -> bool {
            true
        }
        fn build_pipeline(&mut self, _x_width: usize, _y_width: usize) {}
        fn is_trained(&self) -> bool {
            self.trained
        }
        fn fit(&mut self, _x: &[FeatureRow], _y: &[TargetRow]) -> anyhow::Result<()> {
            self.trained = true;
            Ok(())
        }
        fn predict(&self, _x: &FeatureRow) -> anyhow::Result<Vec<f64>> {
            Ok(self.output.clone())
        }
        fn snapshot(&self) -> anyhow::Result<Vec<u8>> {
            Ok(vec![1])
        }
    }

    fn candle(minute: i64, close: f64) -> Candle {
        let close_time = chrono::DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
            + Duration::minutes(minute);
        Candle {
            ticker: "BTC-USDT".to_string(),
            interval: "1min".to_string(),
            open_time: close_time - Duration::minutes(1),
            close_time,
            open: close - 1.0,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 100.0,
        }
    }

    struct Harness {
        core: StrategyCore,
        aggregator: Arc<FeedAggregator>,
        broker: Arc<PaperBroker>,
        persister: Arc<MemoryPersister>,
        risk: Arc<RiskManager>,
    }

    fn harness(output: Vec<f64>, trained: bool) -> Harness {
        harness_with(output, trained, |_| {})
    }

    fn harness_with(
        output: Vec<f64>,
        trained: bool,
        tweak: impl FnOnce(&mut BotConfig),
    ) -> Harness {
        let mut cfg = BotConfig::default();
        cfg.candle_history_min_secs = 300;
        cfg.min_train_rows = 1;
        tweak(&mut cfg);

        let aggregator = Arc::new(FeedAggregator::new(
            Some(FeedBuffer::new(
                "candles",
                Duration::hours(4),
                cfg.candle_history_min(),
            )),
            None,
            None,
        ));
        let broker = Arc::new(PaperBroker::new());
        let persister = Arc::new(MemoryPersister::new());
        let risk = Arc::new(RiskManager::new(cfg.risk_cooldown()));

        let core = StrategyCore::new(
            cfg,
            aggregator.clone(),
            broker.clone(),
            risk.clone(),
            Arc::new(LowHighFeatures::default()),
            Arc::new(LowHighSignalCalculator::default()),
            persister.clone(),
            Box::new(StubModel { trained, output }),
        );
        Harness {
            core,
            aggregator,
            broker,
            persister,
            risk,
        }
    }

    fn feed_candles(h: &Harness, n: i64) {
        h.aggregator
            .on_candles((0..n).map(|i| candle(i, 100.0 + i as f64)));
    }

    #[test]
    fn test_cycle_skips_without_feature_lookback() {
        let h = harness(vec![0.5, 3.0], true);
        h.aggregator.on_candles([candle(0, 100.0)]);

        h.core.process_cycle().unwrap();
        assert!(h.persister.rows("low-high", "signal").is_empty());
        assert!(h.broker.current_trade().lock().unwrap().is_none());
    }

    #[test]
    fn test_trained_model_trades_before_learn_history_met() {
        // Learn readiness needs an hour of candles, prediction does not
        let h = harness_with(vec![0.5, 3.0], true, |cfg| {
            cfg.candle_history_min_secs = 3600;
        });
        feed_candles(&h, 25);

        h.core.process_cycle().unwrap();
        let signals = h.persister.rows("low-high", "signal");
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0]["status"], "order_created");

        // The learn pass still waits for the full history window
        h.core.learn().unwrap();
        assert!(h.persister.model("low-high").is_none());
    }

    #[test]
    fn test_cycle_accumulates_training_before_model_is_ready() {
        let h = harness(vec![0.5, 3.0], false);
        feed_candles(&h, 25);

        h.core.process_cycle().unwrap();
        // Feature row quarantined, no signal emitted
        assert_eq!(h.core.training.lock().unwrap().unchecked_len(), 1);
        assert!(h.persister.rows("low-high", "signal").is_empty());
    }

    #[test]
    fn test_favorable_prediction_opens_trade() {
        let h = harness(vec![0.5, 3.0], true);
        feed_candles(&h, 25);

        h.core.process_cycle().unwrap();

        let trade = h.broker.current_trade().lock().unwrap().clone().unwrap();
        assert!(trade.is_open());
        assert_eq!(trade.side, crate::models::TradeSide::Long);

        let signals = h.persister.rows("low-high", "signal");
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0]["status"], "order_created");
        assert_eq!(h.persister.rows("low-high", "prediction").len(), 1);
    }

    #[test]
    fn test_second_cycle_reports_already_in_market() {
        let h = harness(vec![0.5, 3.0], true);
        feed_candles(&h, 25);
        h.core.process_cycle().unwrap();

        h.broker.on_price(126.0);
        h.aggregator.on_candles([candle(25, 126.0)]);
        h.core.process_cycle().unwrap();

        let signals = h.persister.rows("low-high", "signal");
        assert_eq!(signals.len(), 2);
        assert_eq!(signals[1]["status"], "already_in_market");
    }

    fn losing_trade() -> Trade {
        Trade {
            id: uuid::Uuid::new_v4(),
            ticker: "BTC-USDT".to_string(),
            side: crate::models::TradeSide::Long,
            quantity: 1.0,
            open_price: 100.0,
            open_time: Utc::now(),
            stop_loss_price: 95.0,
            take_profit_price: 110.0,
            trailing_delta: None,
            status: crate::models::TradeStatus::Closed,
            stop_loss_order_id: None,
            close_price: Some(95.0),
            close_time: Some(Utc::now()),
        }
    }

    #[test]
    fn test_risk_cooldown_vetoes_entry() {
        let h = harness(vec![0.5, 3.0], true);
        feed_candles(&h, 25);

        // Arm the cooldown with a fresh losing trade
        h.risk.on_trade_closed(&losing_trade());
        h.core.process_cycle().unwrap();

        let signals = h.persister.rows("low-high", "signal");
        assert_eq!(signals[0]["status"], "risk_manager_oom");
        assert!(h.broker.current_trade().lock().unwrap().is_none());
    }

    #[test]
    fn test_flat_prediction_reports_signal_oom() {
        let h = harness(vec![-0.5, 0.5], true);
        feed_candles(&h, 25);
        h.core.process_cycle().unwrap();

        let signals = h.persister.rows("low-high", "signal");
        assert_eq!(signals[0]["status"], "signal_oom");
    }

    #[test]
    fn test_flat_prediction_during_cooldown_reports_signal_oom() {
        // The flat-signal status wins over the armed cooldown
        let h = harness(vec![-0.5, 0.5], true);
        feed_candles(&h, 25);
        h.risk.on_trade_closed(&losing_trade());
        h.core.process_cycle().unwrap();

        let signals = h.persister.rows("low-high", "signal");
        assert_eq!(signals[0]["status"], "signal_oom");
    }

    #[test]
    fn test_learn_fits_once_rows_are_labeled() {
        let h = harness(vec![0.5, 3.0], false);
        feed_candles(&h, 25);
        h.core.process_cycle().unwrap();

        // Later candles cover the label horizon of the quarantined row
        h.aggregator
            .on_candles((25..30).map(|i| candle(i, 100.0 + i as f64)));
        h.core.learn().unwrap();

        assert!(h.core.model.lock().unwrap().is_trained());
        assert!(h.persister.model("low-high").is_some());
    }

    #[test]
    fn test_learn_builds_train_tables_from_history_alone() {
        let h = harness(vec![0.5, 3.0], false);
        feed_candles(&h, 30);

        // No processing cycle ran, the history by itself must be enough
        h.core.learn().unwrap();
        assert!(h.core.model.lock().unwrap().is_trained());
        assert!(h.persister.model("low-high").is_some());
    }

    #[test]
    fn test_learn_skips_below_min_rows() {
        let h = harness_with(vec![0.5, 3.0], false, |cfg| cfg.min_train_rows = 100);
        feed_candles(&h, 30);
        h.core.learn().unwrap();
        assert!(!h.core.model.lock().unwrap().is_trained());
        assert!(h.persister.model("low-high").is_none());
    }

    #[test]
    fn test_status_report_shape() {
        let h = harness(vec![0.5, 3.0], true);
        feed_candles(&h, 5);
        let report = h.core.status_report();

        assert_eq!(report["strategy"], "low-high");
        assert_eq!(report["is_processing"], false);
        assert!(report["feeds"].get("candles").is_some());
    }
}
