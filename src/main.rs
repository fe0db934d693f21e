use std::sync::Arc;

use chrono::{DurationRound, Utc};
use clap::Parser;
use predictbot::broker::{Broker, PaperBroker, TradeLifecycleManager};
use predictbot::config::BotConfig;
use predictbot::features::LowHighFeatures;
use predictbot::feed::{FeedAggregator, FeedBuffer};
use predictbot::model::LinearModel;
use predictbot::models::{BidAsk, Candle, PriceTick};
use predictbot::persistence::{MemoryPersister, Persister, RedisPersister};
use predictbot::risk::RiskManager;
use predictbot::strategy::{LowHighSignalCalculator, StrategyCore};
use tokio::time::Duration;

#[derive(Parser)]
#[command(name = "predictbot", about = "Self-learning low/high prediction trading bot")]
struct Cli {
    /// Config file base name, read as <name>.toml when present
    #[arg(long, default_value = "predictbot")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let cfg = BotConfig::load_from(&cli.config)?;
    tracing::info!(
        ticker = %cfg.ticker,
        strategy = %cfg.strategy_name,
        "Predictbot starting"
    );

    let aggregator = Arc::new(build_aggregator(&cfg));
    let broker = Arc::new(PaperBroker::new());
    let risk = Arc::new(RiskManager::new(cfg.risk_cooldown()));
    {
        let risk = risk.clone();
        broker.add_closed_listener(Box::new(move |trade| risk.on_trade_closed(trade)));
    }

    let persister: Arc<dyn Persister> = match &cfg.redis_url {
        Some(url) => Arc::new(RedisPersister::new(url).await?),
        None => {
            tracing::info!("No Redis URL configured, persistence stays in memory");
            Arc::new(MemoryPersister::new())
        }
    };

    let signal_calc = LowHighSignalCalculator {
        profit_loss_ratio: cfg.profit_loss_ratio,
        stop_loss_min_coeff: cfg.stop_loss_min_coeff,
        stop_loss_max_coeff: cfg.stop_loss_max_coeff,
        take_profit_min_coeff: cfg.take_profit_min_coeff,
        take_profit_max_coeff: cfg.take_profit_max_coeff,
        use_trailing_stop: cfg.use_trailing_stop,
    };

    let broker_dyn: Arc<dyn Broker> = broker.clone();
    let lifecycle = Arc::new(TradeLifecycleManager::new(broker_dyn.clone()));
    broker.run()?;

    let core = Arc::new(StrategyCore::new(
        cfg.clone(),
        aggregator.clone(),
        broker_dyn,
        risk,
        Arc::new(LowHighFeatures::default()),
        Arc::new(signal_calc),
        persister,
        Box::new(LinearModel::new()),
    ));

    let feed_task = {
        let aggregator = aggregator.clone();
        let broker = broker.clone();
        let cfg = cfg.clone();
        tokio::spawn(async move {
            market_feed_loop(aggregator, broker, lifecycle, cfg).await;
        })
    };
    let processing_task = tokio::spawn(core.clone().processing_loop());
    let learning_task = tokio::spawn(core.clone().learning_loop());

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C, shutting down");
        }
        result = processing_task => {
            tracing::error!("Processing loop exited: {:?}", result);
            // Stale feeds are fatal, a supervisor should restart the process
            std::process::exit(1);
        }
        result = learning_task => {
            tracing::error!("Learning loop exited: {:?}", result);
            std::process::exit(1);
        }
        result = feed_task => {
            tracing::error!("Market feed loop exited: {:?}", result);
            std::process::exit(1);
        }
    }

    tracing::info!("Predictbot stopped");
    Ok(())
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "predictbot=info".into()),
        )
        .init();
}

fn build_aggregator(cfg: &BotConfig) -> FeedAggregator {
    FeedAggregator::new(
        Some(FeedBuffer::new(
            "candles",
            cfg.candle_retention(),
            cfg.candle_history_min(),
        )),
        Some(FeedBuffer::new(
            "bid_ask",
            cfg.bid_ask_retention(),
            cfg.bid_ask_history_min(),
        )),
        cfg.depth_enabled.then(|| {
            FeedBuffer::new("depth", cfg.depth_retention(), cfg.depth_history_min())
        }),
    )
}

/// Deterministic pseudo-random step in [-1, 1]
fn lcg_step(state: &mut u64) -> f64 {
    *state = state
        .wrapping_mul(6364136223846793005)
        .wrapping_add(1442695040888963407);
    ((*state >> 33) as f64 / (1u64 << 30) as f64) - 1.0
}

/// Synthetic market data source for paper trading.
///
/// Walks a price once per second, feeds quotes and in-progress candles into
/// the aggregator (same-timestamp updates supersede each other on apply) and
/// drives the trade lifecycle with the tick stream.
async fn market_feed_loop(
    aggregator: Arc<FeedAggregator>,
    broker: Arc<PaperBroker>,
    lifecycle: Arc<TradeLifecycleManager>,
    cfg: BotConfig,
) {
    tracing::info!("Market feed loop starting (synthetic prices)");
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let mut state: u64 = 0x9E37_79B9_7F4A_7C15;
    let mut price = 100.0;
    let mut candle: Option<Candle> = None;

    loop {
        ticker.tick().await;
        let now = Utc::now();
        price *= 1.0 + 0.0005 * lcg_step(&mut state);

        broker.on_price(price);
        let tick = PriceTick {
            ticker: cfg.ticker.clone(),
            timestamp: now,
            price,
        };
        if let Err(e) = lifecycle.on_price_ticks(std::slice::from_ref(&tick)) {
            tracing::warn!("Trade lifecycle failed on tick: {:#}", e);
        }

        aggregator.on_bid_ask([BidAsk {
            ticker: cfg.ticker.clone(),
            timestamp: now,
            bid: price * 0.9999,
            bid_size: 1.0,
            ask: price * 1.0001,
            ask_size: 1.0,
        }]);

        let Ok(open_time) = now.duration_trunc(chrono::Duration::minutes(1)) else {
            continue;
        };
        let cur = candle.get_or_insert_with(|| Candle {
            ticker: cfg.ticker.clone(),
            interval: cfg.candle_interval.clone(),
            open_time,
            close_time: open_time + chrono::Duration::minutes(1),
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 0.0,
        });
        if cur.open_time != open_time {
            // Minute rolled over, start the next candle
            *cur = Candle {
                ticker: cfg.ticker.clone(),
                interval: cfg.candle_interval.clone(),
                open_time,
                close_time: open_time + chrono::Duration::minutes(1),
                open: price,
                high: price,
                low: price,
                close: price,
                volume: 0.0,
            };
        }
        cur.high = cur.high.max(price);
        cur.low = cur.low.min(price);
        cur.close = price;
        cur.volume += 1.0;
        aggregator.on_candles([cur.clone()]);
    }
}
