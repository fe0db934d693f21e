// Brokerage collaborators
pub mod paper;
pub mod trailing;

pub use paper::PaperBroker;
pub use trailing::TradeLifecycleManager;

use std::sync::{Arc, Mutex};

use crate::models::Trade;

/// Shared read handle to the single current trade. The mutex is only held
/// for short reads/writes; mutating action sequences are serialized by the
/// lifecycle manager's trade-wide lock.
pub type SharedTrade = Arc<Mutex<Option<Trade>>>;

/// Entry order request derived from a signal
#[derive(Debug, Clone)]
pub struct TradeRequest {
    pub ticker: String,
    /// +1 long, -1 short
    pub direction: i8,
    pub quantity: f64,
    /// None means market entry at the broker's current price
    pub price: Option<f64>,
    pub stop_loss_price: f64,
    pub take_profit_price: f64,
    pub trailing_delta: Option<f64>,
}

/// Brokerage contract the core consumes. Wire protocol and order plumbing
/// live behind implementations of this trait.
pub trait Broker: Send + Sync {
    /// Open the current trade. Returns None when the order was rejected.
    /// Implementations must refuse a second open trade.
    fn create_trade(&self, req: &TradeRequest) -> anyhow::Result<Option<Trade>>;

    /// Re-fetch the authoritative status of the current trade (a protective
    /// stop may have triggered since the last look) and refresh the shared
    /// handle. Returns the refreshed trade.
    fn update_trade_status(&self) -> anyhow::Result<Option<Trade>>;

    /// Cancel an outstanding order, e.g. the protective stop
    fn cancel_order(&self, ticker: &str, order_id: &str) -> anyhow::Result<()>;

    /// Submit a closing order for the trade's full quantity. The final
    /// transition to Closed happens via the broker's order-update
    /// notification, never synchronously here.
    fn create_closing_order(&self, trade: &Trade) -> anyhow::Result<()>;

    /// Place a fresh protective stop order; returns its order id. Used by
    /// the trailing-stop ratchet.
    fn create_protective_order(
        &self,
        trade: &Trade,
        stop_trigger: f64,
        take_profit: f64,
    ) -> anyhow::Result<String>;

    /// Connect and start delivering order-update notifications
    fn run(&self) -> anyhow::Result<()>;

    /// Handle to the single current trade
    fn current_trade(&self) -> SharedTrade;
}
