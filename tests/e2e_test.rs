//! End-to-end scenarios over the full stack: synthetic candle feed, paper
//! broker, in-memory persistence and a deterministic model.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use predictbot::broker::{Broker, PaperBroker, TradeLifecycleManager};
use predictbot::config::BotConfig;
use predictbot::features::LowHighFeatures;
use predictbot::feed::{FeedAggregator, FeedBuffer};
use predictbot::model::ModelAdapter;
use predictbot::models::{
    Candle, FeatureRow, Prediction, PriceTick, TargetRow, TradeSide, TradeStatus,
};
use predictbot::persistence::MemoryPersister;
use predictbot::risk::RiskManager;
use predictbot::strategy::{
    LowHighSignalCalculator, SignalCalculator, SignalDecision, StrategyCore,
};

/// Fixed-output model; `fit` flips it to trained
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
    fn fit(&mut self, x: &[FeatureRow], y: &[TargetRow]) -> anyhow::Result<()> {
        anyhow::ensure!(!x.is_empty() && x.len() == y.len(), "bad training set");
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

fn start() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

/// Rising 1-minute candles: close 100 + i, low/high one unit around it
fn rising_candles(range: std::ops::Range<i64>) -> Vec<Candle> {
    range
        .map(|i| {
            let close = 100.0 + i as f64;
            let close_time = start() + Duration::minutes(i);
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
        })
        .collect()
}

/// Short-lookback engineer so 20 candles are plenty
fn small_engineer() -> LowHighFeatures {
    LowHighFeatures {
        rsi_period: 5,
        fast_ema_period: 2,
        slow_ema_period: 5,
        atr_period: 5,
        roc_period: 2,
    }
}

struct Stack {
    core: StrategyCore,
    aggregator: Arc<FeedAggregator>,
    broker: Arc<PaperBroker>,
    persister: Arc<MemoryPersister>,
    risk: Arc<RiskManager>,
}

fn build_stack(model: StubModel, use_trailing_stop: bool) -> Stack {
    let signal_calc = Arc::new(LowHighSignalCalculator {
        use_trailing_stop,
        ..LowHighSignalCalculator::default()
    });
    build_stack_with_calc(model, use_trailing_stop, signal_calc)
}

fn build_stack_with_calc(
    model: StubModel,
    use_trailing_stop: bool,
    signal_calc: Arc<dyn SignalCalculator>,
) -> Stack {
    let mut cfg = BotConfig::default();
    cfg.candle_history_min_secs = 600;
    cfg.min_train_rows = 1;
    cfg.use_trailing_stop = use_trailing_stop;

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
    {
        let risk = risk.clone();
        broker.add_closed_listener(Box::new(move |t| risk.on_trade_closed(t)));
    }

    let core = StrategyCore::new(
        cfg,
        aggregator.clone(),
        broker.clone(),
        risk.clone(),
        Arc::new(small_engineer()),
        signal_calc,
        persister.clone(),
        Box::new(model),
    );
    Stack {
        core,
        aggregator,
        broker,
        persister,
        risk,
    }
}

#[test]
fn test_favorable_prediction_opens_exactly_one_long_trade() {
    // Prediction: future low 0.5 above the last low, future high 1.0 above
    // the last high. For close 119 that is risk 0.5 vs reward 2.0.
    let stack = build_stack(
        StubModel {
            trained: true,
            output: vec![0.5, 1.0],
        },
        false,
    );
    stack.aggregator.on_candles(rising_candles(0..20));

    stack.core.process_cycle().unwrap();

    let trade = stack
        .broker
        .current_trade()
        .lock()
        .unwrap()
        .clone()
        .expect("one trade must be open");
    assert!(trade.is_open());
    assert_eq!(trade.side, TradeSide::Long);
    // Stop loss on the predicted future low, take profit on the future high
    assert_eq!(trade.stop_loss_price, 118.5);
    assert_eq!(trade.take_profit_price, 121.0);
    assert_eq!(trade.trailing_delta, None);

    let signals = stack.persister.rows("low-high", "signal");
    assert_eq!(signals.len(), 1);
    assert_eq!(signals[0]["status"], "order_created");
    assert_eq!(signals[0]["direction"], 1);

    // A second cycle with the trade still open must not stack another entry
    stack.broker.on_price(120.0);
    stack.aggregator.on_candles(rising_candles(20..21));
    stack.core.process_cycle().unwrap();

    let signals = stack.persister.rows("low-high", "signal");
    assert_eq!(signals.len(), 2);
    assert_eq!(signals[1]["status"], "already_in_market");
}

/// Goes long whenever the predicted high is above the close, stop on the
/// predicted low. Stands in for strategy-specific signal math.
struct LongOnUpside;

impl SignalCalculator for LongOnUpside {
    fn calc_signal(&self, candle: &Candle, prediction: &Prediction) -> SignalDecision {
        let fut_low = candle.low + prediction.fut_low_diff;
        let fut_high = candle.high + prediction.fut_high_diff;
        if fut_high > candle.close {
            SignalDecision {
                direction: 1,
                stop_loss: Some(fut_low),
                take_profit: Some(fut_high),
                trailing_delta: None,
            }
        } else {
            SignalDecision::none()
        }
    }
}

#[test]
fn test_stop_loss_lands_on_predicted_low_offset() {
    // Symmetric offsets: predicted low one unit below the last low,
    // predicted high one unit above the last high
    let stack = build_stack_with_calc(
        StubModel {
            trained: true,
            output: vec![-1.0, 1.0],
        },
        false,
        Arc::new(LongOnUpside),
    );
    stack.aggregator.on_candles(rising_candles(0..20));

    stack.core.process_cycle().unwrap();

    let trade = stack.broker.current_trade().lock().unwrap().clone().unwrap();
    assert_eq!(trade.side, TradeSide::Long);
    // Last candle: low 118, high 120
    assert_eq!(trade.stop_loss_price, 117.0);
    assert_eq!(trade.take_profit_price, 121.0);

    let signals = stack.persister.rows("low-high", "signal");
    assert_eq!(signals.len(), 1);
    assert_eq!(signals[0]["status"], "order_created");
}

#[test]
fn test_learning_flow_enables_trading() {
    let stack = build_stack(
        StubModel {
            trained: false,
            output: vec![0.5, 1.0],
        },
        false,
    );

    // Untrained model: the cycle only accumulates training data
    stack.aggregator.on_candles(rising_candles(0..20));
    stack.core.process_cycle().unwrap();
    assert!(stack.persister.rows("low-high", "signal").is_empty());
    assert!(stack.broker.current_trade().lock().unwrap().is_none());

    // Later candles cover the label horizon, the learn pass can fit
    stack.aggregator.on_candles(rising_candles(20..25));
    stack.core.learn().unwrap();
    assert!(stack.persister.model("low-high").is_some());

    // With a trained model the next cycle trades
    stack.core.process_cycle().unwrap();
    let signals = stack.persister.rows("low-high", "signal");
    assert_eq!(signals.len(), 1);
    assert_eq!(signals[0]["status"], "order_created");
    assert!(stack
        .broker
        .current_trade()
        .lock()
        .unwrap()
        .as_ref()
        .is_some_and(|t| t.is_open()));
}

#[test]
fn test_trailing_stop_ratchets_and_locks_in_profit() {
    let stack = build_stack(
        StubModel {
            trained: true,
            output: vec![0.5, 1.0],
        },
        true,
    );
    stack.aggregator.on_candles(rising_candles(0..20));
    stack.core.process_cycle().unwrap();

    let trade = stack.broker.current_trade().lock().unwrap().clone().unwrap();
    // Trailing delta equals the stop distance (119 - 118.5)
    assert_eq!(trade.trailing_delta, Some(0.5));
    assert_eq!(trade.take_profit_price, 121.0);

    let broker_dyn: Arc<dyn Broker> = stack.broker.clone();
    let lifecycle = TradeLifecycleManager::new(broker_dyn);
    let tick = |price: f64| PriceTick {
        ticker: "BTC-USDT".to_string(),
        timestamp: Utc::now(),
        price,
    };

    // Crossing the take profit moves the stop instead of closing
    stack.broker.on_price(121.5);
    lifecycle.on_price_ticks(&[tick(121.5)]).unwrap();

    let trade = stack.broker.current_trade().lock().unwrap().clone().unwrap();
    assert!(trade.is_open());
    assert_eq!(trade.take_profit_price, 121.5);
    assert_eq!(trade.stop_loss_price, 121.0);

    // Pullback through the ratcheted stop closes at its trigger
    stack.broker.on_price(120.8);
    let trade = stack.broker.update_trade_status().unwrap().unwrap();
    assert_eq!(trade.status, TradeStatus::Closed);
    assert_eq!(trade.close_price, Some(121.0));
    assert!(trade.realized_pnl().unwrap() > 0.0);

    // The winning close must not arm the risk cooldown
    assert!(stack.risk.can_trade());
}
