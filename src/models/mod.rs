use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Anything that lives in a time-indexed feed buffer.
///
/// The timestamp is the uniqueness and ordering key: two records with the
/// same timestamp are considered the same event (last write wins on apply).
pub trait Timestamped {
    fn timestamp(&self) -> DateTime<Utc>;
}

/// OHLCV candlestick over a fixed interval
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub ticker: String,
    /// Interval tag, e.g. "1min", "5min"
    pub interval: String,
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Timestamped for Candle {
    fn timestamp(&self) -> DateTime<Utc> {
        self.close_time
    }
}

/// Best bid/ask quote
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BidAsk {
    pub ticker: String,
    pub timestamp: DateTime<Utc>,
    pub bid: f64,
    pub bid_size: f64,
    pub ask: f64,
    pub ask_size: f64,
}

impl BidAsk {
    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }
}

impl Timestamped for BidAsk {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// One price level of an order book side
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: f64,
    pub size: f64,
}

/// Level-2 order book snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepthSnapshot {
    pub ticker: String,
    pub timestamp: DateTime<Utc>,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
}

impl Timestamped for DepthSnapshot {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Live trade/ticker price event, drives trailing-stop evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceTick {
    pub ticker: String,
    pub timestamp: DateTime<Utc>,
    pub price: f64,
}

/// Trade direction
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TradeSide {
    Long,
    Short,
}

impl TradeSide {
    /// +1.0 for long, -1.0 for short
    pub fn sign(&self) -> f64 {
        match self {
            TradeSide::Long => 1.0,
            TradeSide::Short => -1.0,
        }
    }

    /// Map a -1/0/+1 signal direction to a side
    pub fn from_signal(direction: i8) -> Option<TradeSide> {
        match direction {
            1 => Some(TradeSide::Long),
            -1 => Some(TradeSide::Short),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TradeStatus {
    Opened,
    Closed,
    Cancelled,
}

/// An open or historical position at the broker.
///
/// Owned by the broker/lifecycle side; the strategy core only ever holds a
/// shared read handle. At most one trade is open per strategy instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: Uuid,
    pub ticker: String,
    pub side: TradeSide,
    pub quantity: f64,
    pub open_price: f64,
    pub open_time: DateTime<Utc>,
    pub stop_loss_price: f64,
    pub take_profit_price: f64,
    pub trailing_delta: Option<f64>,
    pub status: TradeStatus,
    /// Broker id of the outstanding protective sl/tp order
    pub stop_loss_order_id: Option<String>,
    pub close_price: Option<f64>,
    pub close_time: Option<DateTime<Utc>>,
}

impl Trade {
    pub fn is_open(&self) -> bool {
        self.status == TradeStatus::Opened
    }

    /// Realized P&L, available once closed
    pub fn realized_pnl(&self) -> Option<f64> {
        self.close_price
            .map(|close| (close - self.open_price) * self.side.sign() * self.quantity)
    }
}

/// Outcome classification of one processing cycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SignalStatus {
    /// Direction was 0, nothing to do
    SignalOom,
    /// Risk manager cooldown vetoed the entry
    RiskManagerOom,
    /// A trade is already open
    AlreadyInMarket,
    OrderCreated,
    OrderNotCreated,
}

/// One per processing cycle, never mutated after the cycle ends
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub timestamp: DateTime<Utc>,
    /// -1 short, 0 none, +1 long
    pub direction: i8,
    pub price: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub trailing_delta: Option<f64>,
    pub status: SignalStatus,
    pub open_price: Option<f64>,
}

/// Point-in-time vector of derived model inputs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureRow {
    pub timestamp: DateTime<Utc>,
    pub values: Vec<f64>,
}

impl Timestamped for FeatureRow {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Forward-looking label (or prediction) paired with a feature row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetRow {
    pub timestamp: DateTime<Utc>,
    pub values: Vec<f64>,
}

impl Timestamped for TargetRow {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Domain-scale model output for one cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub timestamp: DateTime<Utc>,
    /// Predicted future low, as an offset from the last candle low
    pub fut_low_diff: f64,
    /// Predicted future high, as an offset from the last candle high
    pub fut_high_diff: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_trade(side: TradeSide) -> Trade {
        Trade {
            id: Uuid::new_v4(),
            ticker: "BTC-USDT".to_string(),
            side,
            quantity: 2.0,
            open_price: 100.0,
            open_time: Utc::now(),
            stop_loss_price: 95.0,
            take_profit_price: 110.0,
            trailing_delta: None,
            status: TradeStatus::Opened,
            stop_loss_order_id: Some("sl-1".to_string()),
            close_price: None,
            close_time: None,
        }
    }

    #[test]
    fn test_realized_pnl_long() {
        let mut trade = test_trade(TradeSide::Long);
        assert_eq!(trade.realized_pnl(), None);

        trade.status = TradeStatus::Closed;
        trade.close_price = Some(110.0);
        assert_eq!(trade.realized_pnl(), Some(20.0)); // 2 * (110 - 100)
    }

    #[test]
    fn test_realized_pnl_short() {
        let mut trade = test_trade(TradeSide::Short);
        trade.status = TradeStatus::Closed;
        trade.close_price = Some(110.0);
        assert_eq!(trade.realized_pnl(), Some(-20.0)); // short lost 10 per unit
    }

    #[test]
    fn test_side_from_signal() {
        assert_eq!(TradeSide::from_signal(1), Some(TradeSide::Long));
        assert_eq!(TradeSide::from_signal(-1), Some(TradeSide::Short));
        assert_eq!(TradeSide::from_signal(0), None);
    }

    #[test]
    fn test_signal_status_serializes_snake_case() {
        let json = serde_json::to_string(&SignalStatus::OrderCreated).unwrap();
        assert_eq!(json, "\"order_created\"");
    }
}
