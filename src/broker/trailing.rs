use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use super::{Broker, SharedTrade};
use crate::models::{PriceTick, Trade, TradeSide};

/// Watches price ticks against the open trade's take-profit level and drives
/// the cancel-then-close sequence when it is crossed.
///
/// When the trade carries a trailing delta the take profit is never taken
/// directly. Crossing it instead ratchets the protective stop to
/// `new_tp - direction * delta`, so profit locks in while the move runs.
pub struct TradeLifecycleManager {
    broker: Arc<dyn Broker>,
    cur_trade: SharedTrade,
    /// Trade-wide lock. Serializes mutating order sequences against the
    /// periodic status check; the shared-trade mutex alone only covers
    /// short reads and writes.
    action_lock: Mutex<()>,
}

impl TradeLifecycleManager {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        let cur_trade = broker.current_trade();
        Self {
            broker,
            cur_trade,
            action_lock: Mutex::new(()),
        }
    }

    /// Process a batch of ticks. At most one lifecycle action is initiated
    /// per batch; later ticks are dropped once one fires.
    pub fn on_price_ticks(&self, ticks: &[PriceTick]) -> anyhow::Result<()> {
        // Cheap unlocked-path read. Stale Opened is tolerated because the
        // authoritative status is re-fetched before acting.
        let snapshot = match self.cur_trade.lock().unwrap().clone() {
            Some(t) if t.is_open() => t,
            _ => return Ok(()),
        };

        let _action = self.action_lock.lock().unwrap();
        for tick in ticks {
            if tick.ticker != snapshot.ticker {
                continue;
            }
            if !Self::crossed_take_profit(&snapshot, tick.price) {
                continue;
            }

            // The stop may already have filled on the venue side. Re-fetch
            // before cancelling anything.
            let Some(trade) = self.broker.update_trade_status()? else {
                return Ok(());
            };
            if !trade.is_open() {
                debug!(trade_id = %trade.id, "Trade closed on venue before take-profit action");
                return Ok(());
            }

            match trade.trailing_delta {
                Some(delta) => self.ratchet_stop(&trade, tick.price, delta)?,
                None => self.close_at_market(&trade, tick.price)?,
            }
            break;
        }
        Ok(())
    }

    /// A trailing ratchet needs strict progress past the level, otherwise a
    /// tick at the exact take profit would re-issue the same stop order.
    fn crossed_take_profit(trade: &Trade, price: f64) -> bool {
        let tp = trade.take_profit_price;
        match (trade.side, trade.trailing_delta.is_some()) {
            (TradeSide::Long, true) => price > tp,
            (TradeSide::Long, false) => price >= tp,
            (TradeSide::Short, true) => price < tp,
            (TradeSide::Short, false) => price <= tp,
        }
    }

    /// Cancel the protective stop, then submit a market close. The terminal
    /// transition arrives via the broker's order-update notification.
    fn close_at_market(&self, trade: &Trade, price: f64) -> anyhow::Result<()> {
        info!(
            trade_id = %trade.id,
            price,
            tp = trade.take_profit_price,
            "Take profit crossed, closing trade"
        );
        if let Some(order_id) = &trade.stop_loss_order_id {
            self.broker.cancel_order(&trade.ticker, order_id)?;
        }
        self.broker.create_closing_order(trade)
    }

    /// Move the protective stop behind the new high-water price and advance
    /// the take-profit level by the same step.
    fn ratchet_stop(&self, trade: &Trade, price: f64, delta: f64) -> anyhow::Result<()> {
        let dir = trade.side.sign() as f64;
        let new_tp = price;
        let new_trigger = new_tp - dir * delta;
        info!(
            trade_id = %trade.id,
            new_trigger,
            new_tp,
            "Trailing stop ratcheted"
        );

        if let Some(order_id) = &trade.stop_loss_order_id {
            self.broker.cancel_order(&trade.ticker, order_id)?;
        }
        let order_id = self.broker.create_protective_order(trade, new_trigger, new_tp)?;

        let mut guard = self.cur_trade.lock().unwrap();
        if let Some(cur) = guard.as_mut().filter(|t| t.id == trade.id && t.is_open()) {
            cur.stop_loss_price = new_trigger;
            cur.take_profit_price = new_tp;
            cur.stop_loss_order_id = Some(order_id);
        }
        Ok(())
    }
}
