use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

use crate::models::Trade;

/// Gates new trade entry after a losing close.
///
/// Side-effect-free query plus one mutation path: the broker's trade-closed
/// notification. A loss arms the cooldown; wins and flat closes leave the
/// record untouched.
pub struct RiskManager {
    cooldown: Duration,
    last_loss: Mutex<Option<DateTime<Utc>>>,
}

impl RiskManager {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_loss: Mutex::new(None),
        }
    }

    /// True iff no loss is on record or the cooldown has fully elapsed
    pub fn can_trade_at(&self, now: DateTime<Utc>) -> bool {
        match *self.last_loss.lock().unwrap() {
            Some(loss_time) => now - loss_time >= self.cooldown,
            None => true,
        }
    }

    pub fn can_trade(&self) -> bool {
        self.can_trade_at(Utc::now())
    }

    /// Broker callback: a trade reached a terminal state
    pub fn on_trade_closed(&self, trade: &Trade) {
        if let Some(pnl) = trade.realized_pnl() {
            if pnl < 0.0 {
                let closed_at = trade.close_time.unwrap_or_else(Utc::now);
                tracing::info!(
                    trade_id = %trade.id,
                    pnl,
                    cooldown_secs = self.cooldown.num_seconds(),
                    "Losing trade closed, arming risk cooldown"
                );
                *self.last_loss.lock().unwrap() = Some(closed_at);
            }
        }
    }
}
