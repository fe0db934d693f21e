use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use super::{Broker, SharedTrade, TradeRequest};
use crate::models::{Trade, TradeSide, TradeStatus};

type ClosedListener = Box<dyn Fn(&Trade) + Send + Sync>;

/// Simulated venue. Orders fill instantly at the last seen mark price and the
/// protective stop is emulated inside `update_trade_status`, so the
/// order-update notification arrives inline instead of over a socket.
pub struct PaperBroker {
    cur_trade: SharedTrade,
    last_price: Mutex<Option<f64>>,
    closed_listeners: Mutex<Vec<ClosedListener>>,
}

impl PaperBroker {
    pub fn new() -> Self {
        Self {
            cur_trade: Arc::new(Mutex::new(None)),
            last_price: Mutex::new(None),
            closed_listeners: Mutex::new(Vec::new()),
        }
    }

    /// Record the venue mark price. The feed loop calls this on every tick.
    pub fn on_price(&self, price: f64) {
        *self.last_price.lock().unwrap() = Some(price);
    }

    /// Subscribe to terminal trade transitions (risk manager, persistence)
    pub fn add_closed_listener(&self, listener: ClosedListener) {
        self.closed_listeners.lock().unwrap().push(listener);
    }

    fn notify_closed(&self, trade: &Trade) {
        for listener in self.closed_listeners.lock().unwrap().iter() {
            listener(trade);
        }
    }

    fn mark_price(&self) -> anyhow::Result<f64> {
        self.last_price
            .lock()
            .unwrap()
            .ok_or_else(|| anyhow::anyhow!("no market price seen yet"))
    }
}

impl Default for PaperBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl Broker for PaperBroker {
    fn create_trade(&self, req: &TradeRequest) -> anyhow::Result<Option<Trade>> {
        let mut guard = self.cur_trade.lock().unwrap();
        if guard.as_ref().is_some_and(|t| t.is_open()) {
            warn!("Rejecting entry order, a trade is already open");
            return Ok(None);
        }

        let open_price = match req.price {
            Some(p) => p,
            None => self.mark_price()?,
        };
        let trade = Trade {
            id: Uuid::new_v4(),
            ticker: req.ticker.clone(),
            side: TradeSide::from_signal(req.direction)
                .ok_or_else(|| anyhow::anyhow!("flat direction in trade request"))?,
            quantity: req.quantity,
            open_price,
            open_time: Utc::now(),
            stop_loss_price: req.stop_loss_price,
            take_profit_price: req.take_profit_price,
            trailing_delta: req.trailing_delta,
            status: TradeStatus::Opened,
            stop_loss_order_id: Some(Uuid::new_v4().to_string()),
            close_price: None,
            close_time: None,
        };
        info!(
            trade_id = %trade.id,
            side = ?trade.side,
            open_price,
            sl = trade.stop_loss_price,
            tp = trade.take_profit_price,
            "Paper trade opened"
        );
        *guard = Some(trade.clone());
        Ok(Some(trade))
    }

    fn update_trade_status(&self) -> anyhow::Result<Option<Trade>> {
        let closed = {
            let mut guard = self.cur_trade.lock().unwrap();
            let Some(trade) = guard.as_mut().filter(|t| t.is_open()) else {
                return Ok(guard.clone());
            };
            let price = self.mark_price()?;
            let stop_hit = match trade.side {
                TradeSide::Long => price <= trade.stop_loss_price,
                TradeSide::Short => price >= trade.stop_loss_price,
            };
            if !stop_hit || trade.stop_loss_order_id.is_none() {
                return Ok(Some(trade.clone()));
            }
            // Emulated stop order fills at its trigger price
            trade.status = TradeStatus::Closed;
            trade.close_price = Some(trade.stop_loss_price);
            trade.close_time = Some(Utc::now());
            trade.stop_loss_order_id = None;
            info!(trade_id = %trade.id, close_price = trade.stop_loss_price, "Protective stop filled");
            trade.clone()
        };
        // Listeners run outside the trade mutex
        self.notify_closed(&closed);
        Ok(Some(closed))
    }

    fn cancel_order(&self, _ticker: &str, order_id: &str) -> anyhow::Result<()> {
        let mut guard = self.cur_trade.lock().unwrap();
        if let Some(trade) = guard.as_mut() {
            if trade.stop_loss_order_id.as_deref() == Some(order_id) {
                trade.stop_loss_order_id = None;
            }
        }
        Ok(())
    }

    fn create_closing_order(&self, trade: &Trade) -> anyhow::Result<()> {
        let closed = {
            let mut guard = self.cur_trade.lock().unwrap();
            let Some(cur) = guard.as_mut().filter(|t| t.id == trade.id && t.is_open()) else {
                warn!(trade_id = %trade.id, "Closing order for a trade that is no longer open");
                return Ok(());
            };
            cur.status = TradeStatus::Closed;
            cur.close_price = Some(self.mark_price()?);
            cur.close_time = Some(Utc::now());
            info!(trade_id = %cur.id, close_price = ?cur.close_price, "Paper trade closed at market");
            cur.clone()
        };
        self.notify_closed(&closed);
        Ok(())
    }

    fn create_protective_order(
        &self,
        trade: &Trade,
        stop_trigger: f64,
        take_profit: f64,
    ) -> anyhow::Result<String> {
        let order_id = Uuid::new_v4().to_string();
        let mut guard = self.cur_trade.lock().unwrap();
        if let Some(cur) = guard.as_mut().filter(|t| t.id == trade.id && t.is_open()) {
            cur.stop_loss_price = stop_trigger;
            cur.take_profit_price = take_profit;
            cur.stop_loss_order_id = Some(order_id.clone());
        }
        Ok(order_id)
    }

    fn run(&self) -> anyhow::Result<()> {
        // Nothing to connect, fills are emulated in-process
        Ok(())
    }

    fn current_trade(&self) -> SharedTrade {
        Arc::clone(&self.cur_trade)
    }
}
