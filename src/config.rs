use chrono::Duration;
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::{BotError, Result};

fn default_ticker() -> String {
    "BTC-USDT".to_string()
}
fn default_interval() -> String {
    "1min".to_string()
}
fn default_strategy_name() -> String {
    "low-high".to_string()
}
fn default_candle_history_min_secs() -> u64 {
    1800
}
fn default_candle_retention_secs() -> u64 {
    14400
}
fn default_bid_ask_history_min_secs() -> u64 {
    120
}
fn default_bid_ask_retention_secs() -> u64 {
    3600
}
fn default_depth_retention_secs() -> u64 {
    3600
}
fn default_staleness_grace_secs() -> u64 {
    60
}
fn default_trade_check_interval_secs() -> u64 {
    30
}
fn default_learn_interval_secs() -> u64 {
    60
}
fn default_learn_window_secs() -> u64 {
    86400
}
fn default_predict_window_secs() -> u64 {
    180
}
fn default_risk_cooldown_secs() -> u64 {
    1800
}
fn default_order_quantity() -> f64 {
    0.001
}
fn default_price_precision() -> u32 {
    2
}
fn default_amount_precision() -> u32 {
    6
}
fn default_profit_loss_ratio() -> f64 {
    4.0
}
fn default_stop_loss_max_coeff() -> f64 {
    0.005
}
fn default_take_profit_min_coeff() -> f64 {
    0.003
}
fn default_min_train_rows() -> usize {
    20
}

/// Runtime configuration.
///
/// Layered: optional `predictbot.toml` in the working directory, then
/// `PREDICTBOT__*` environment variables on top. Every field has a default
/// so the bot starts with an empty environment.
#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    #[serde(default = "default_ticker")]
    pub ticker: String,
    #[serde(default = "default_interval")]
    pub candle_interval: String,
    #[serde(default = "default_strategy_name")]
    pub strategy_name: String,

    /// Redis URL; persistence stays in-memory when unset
    #[serde(default)]
    pub redis_url: Option<String>,

    // Feed windows, in seconds
    #[serde(default = "default_candle_history_min_secs")]
    pub candle_history_min_secs: u64,
    #[serde(default = "default_candle_retention_secs")]
    pub candle_retention_secs: u64,
    #[serde(default = "default_bid_ask_history_min_secs")]
    pub bid_ask_history_min_secs: u64,
    #[serde(default = "default_bid_ask_retention_secs")]
    pub bid_ask_retention_secs: u64,
    #[serde(default)]
    pub depth_enabled: bool,
    #[serde(default)]
    pub depth_history_min_secs: u64,
    #[serde(default = "default_depth_retention_secs")]
    pub depth_retention_secs: u64,
    /// Added on top of the longest history window for the liveness cutoff
    #[serde(default = "default_staleness_grace_secs")]
    pub staleness_grace_secs: u64,

    // Cadence
    /// Pause after each processing cycle; 0 runs back to back
    #[serde(default)]
    pub processing_interval_secs: u64,
    #[serde(default = "default_trade_check_interval_secs")]
    pub trade_check_interval_secs: u64,
    #[serde(default = "default_learn_interval_secs")]
    pub learn_interval_secs: u64,
    #[serde(default = "default_learn_window_secs")]
    pub learn_window_secs: u64,
    /// Label horizon for future low/high targets
    #[serde(default = "default_predict_window_secs")]
    pub predict_window_secs: u64,
    #[serde(default = "default_min_train_rows")]
    pub min_train_rows: usize,

    // Risk and orders
    #[serde(default = "default_risk_cooldown_secs")]
    pub risk_cooldown_secs: u64,
    #[serde(default = "default_order_quantity")]
    pub order_quantity: f64,
    #[serde(default = "default_price_precision")]
    pub price_precision: u32,
    #[serde(default = "default_amount_precision")]
    pub amount_precision: u32,

    // Signal bounds
    #[serde(default = "default_profit_loss_ratio")]
    pub profit_loss_ratio: f64,
    #[serde(default)]
    pub stop_loss_min_coeff: f64,
    #[serde(default = "default_stop_loss_max_coeff")]
    pub stop_loss_max_coeff: f64,
    #[serde(default = "default_take_profit_min_coeff")]
    pub take_profit_min_coeff: f64,
    /// Non-positive means unbounded
    #[serde(default)]
    pub take_profit_max_coeff: f64,
    #[serde(default)]
    pub use_trailing_stop: bool,
}

impl BotConfig {
    /// Load from `predictbot.toml` (optional) with `PREDICTBOT__*`
    /// environment overrides
    pub fn load() -> Result<Self> {
        Self::load_from("predictbot")
    }

    pub fn load_from(basename: &str) -> Result<Self> {
        Config::builder()
            .add_source(File::with_name(basename).required(false))
            .add_source(Environment::with_prefix("PREDICTBOT").separator("__"))
            .build()
            .and_then(Config::try_deserialize)
            .map_err(|e| BotError::Config(e.to_string()))
    }

    pub fn candle_history_min(&self) -> Duration {
        Duration::seconds(self.candle_history_min_secs as i64)
    }

    pub fn candle_retention(&self) -> Duration {
        Duration::seconds(self.candle_retention_secs as i64)
    }

    pub fn bid_ask_history_min(&self) -> Duration {
        Duration::seconds(self.bid_ask_history_min_secs as i64)
    }

    pub fn bid_ask_retention(&self) -> Duration {
        Duration::seconds(self.bid_ask_retention_secs as i64)
    }

    pub fn depth_history_min(&self) -> Duration {
        Duration::seconds(self.depth_history_min_secs as i64)
    }

    pub fn depth_retention(&self) -> Duration {
        Duration::seconds(self.depth_retention_secs as i64)
    }

    /// Liveness cutoff: longest history window plus the grace period
    pub fn max_staleness(&self) -> Duration {
        let longest = self
            .candle_history_min_secs
            .max(self.bid_ask_history_min_secs)
            .max(self.depth_history_min_secs);
        Duration::seconds((longest + self.staleness_grace_secs) as i64)
    }

    pub fn trade_check_interval(&self) -> Duration {
        Duration::seconds(self.trade_check_interval_secs as i64)
    }

    pub fn learn_window(&self) -> Duration {
        Duration::seconds(self.learn_window_secs as i64)
    }

    pub fn predict_window(&self) -> Duration {
        Duration::seconds(self.predict_window_secs as i64)
    }

    pub fn risk_cooldown(&self) -> Duration {
        Duration::seconds(self.risk_cooldown_secs as i64)
    }

    pub fn round_price(&self, price: f64) -> f64 {
        let factor = 10f64.powi(self.price_precision as i32);
        (price * factor).round() / factor
    }

    pub fn round_quantity(&self, quantity: f64) -> f64 {
        let factor = 10f64.powi(self.amount_precision as i32);
        (quantity * factor).round() / factor
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        // Every field has a serde default, so an empty source yields one
        serde_json::from_value(serde_json::json!({}))
            .unwrap_or_else(|e| unreachable!("default config must deserialize: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = BotConfig::default();
        assert_eq!(cfg.ticker, "BTC-USDT");
        assert_eq!(cfg.trade_check_interval(), Duration::seconds(30));
        assert_eq!(cfg.risk_cooldown(), Duration::minutes(30));
        assert!(cfg.redis_url.is_none());
        assert!(!cfg.use_trailing_stop);
    }

    #[test]
    fn test_max_staleness_tracks_longest_window() {
        let mut cfg = BotConfig::default();
        cfg.candle_history_min_secs = 1800;
        cfg.bid_ask_history_min_secs = 120;
        cfg.staleness_grace_secs = 60;
        assert_eq!(cfg.max_staleness(), Duration::seconds(1860));
    }

    #[test]
    fn test_price_rounding() {
        let cfg = BotConfig::default();
        assert_eq!(cfg.round_price(100.12345), 100.12);
        assert_eq!(cfg.round_quantity(0.123456789), 0.123457);
    }
}
