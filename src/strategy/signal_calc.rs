use tracing::debug;

use crate::models::{Candle, Prediction};

/// Entry decision derived from one prediction. Direction 0 means no entry;
/// the protective levels are present iff direction is non-zero.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalDecision {
    pub direction: i8,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub trailing_delta: Option<f64>,
}

impl SignalDecision {
    pub fn none() -> Self {
        Self {
            direction: 0,
            stop_loss: None,
            take_profit: None,
            trailing_delta: None,
        }
    }
}

/// Maps a model prediction onto an entry signal with protective levels
pub trait SignalCalculator: Send + Sync {
    fn calc_signal(&self, candle: &Candle, prediction: &Prediction) -> SignalDecision;
}

/// Risk/reward gate over predicted future low/high.
///
/// A long entry needs the predicted upside (future high minus close) to be at
/// least `profit_loss_ratio` times the predicted downside, and both
/// protective distances to sit inside their coefficient bounds relative to
/// the close. Shorts mirror. Stop loss lands on the adverse predicted
/// extreme, take profit on the favorable one.
#[derive(Debug, Clone)]
pub struct LowHighSignalCalculator {
    pub profit_loss_ratio: f64,
    /// Bounds on the stop distance as fractions of the close price.
    /// A non-positive max disables that bound.
    pub stop_loss_min_coeff: f64,
    pub stop_loss_max_coeff: f64,
    pub take_profit_min_coeff: f64,
    pub take_profit_max_coeff: f64,
    /// When set, emitted trades trail: delta is the stop distance
    pub use_trailing_stop: bool,
}

impl Default for LowHighSignalCalculator {
    fn default() -> Self {
        Self {
            profit_loss_ratio: 4.0,
            stop_loss_min_coeff: 0.0,
            stop_loss_max_coeff: 0.005,
            take_profit_min_coeff: 0.003,
            take_profit_max_coeff: 0.0,
            use_trailing_stop: false,
        }
    }
}

impl LowHighSignalCalculator {
    fn within(&self, delta: f64, close: f64, min_coeff: f64, max_coeff: f64) -> bool {
        if delta <= 0.0 {
            return false;
        }
        if delta < close * min_coeff {
            return false;
        }
        max_coeff <= 0.0 || delta <= close * max_coeff
    }

    fn decision(&self, direction: i8, stop_loss: f64, take_profit: f64, close: f64) -> SignalDecision {
        SignalDecision {
            direction,
            stop_loss: Some(stop_loss),
            take_profit: Some(take_profit),
            trailing_delta: self.use_trailing_stop.then(|| (close - stop_loss).abs()),
        }
    }
}

impl SignalCalculator for LowHighSignalCalculator {
    fn calc_signal(&self, candle: &Candle, prediction: &Prediction) -> SignalDecision {
        let close = candle.close;
        let fut_low = candle.low + prediction.fut_low_diff;
        let fut_high = candle.high + prediction.fut_high_diff;

        let long_risk = close - fut_low;
        let long_reward = fut_high - close;
        let long_ok = long_risk > 0.0
            && long_reward / long_risk >= self.profit_loss_ratio
            && self.within(long_risk, close, self.stop_loss_min_coeff, self.stop_loss_max_coeff)
            && self.within(
                long_reward,
                close,
                self.take_profit_min_coeff,
                self.take_profit_max_coeff,
            );

        let short_risk = fut_high - close;
        let short_reward = close - fut_low;
        let short_ok = short_risk > 0.0
            && short_reward / short_risk >= self.profit_loss_ratio
            && self.within(short_risk, close, self.stop_loss_min_coeff, self.stop_loss_max_coeff)
            && self.within(
                short_reward,
                close,
                self.take_profit_min_coeff,
                self.take_profit_max_coeff,
            );

        match (long_ok, short_ok) {
            (true, false) => self.decision(1, fut_low, fut_high, close),
            (false, true) => self.decision(-1, fut_high, fut_low, close),
            // Contradictory predictions cancel out
            (true, true) => {
                debug!(fut_low, fut_high, close, "Both directions pass, emitting no signal");
                SignalDecision::none()
            }
            (false, false) => SignalDecision::none(),
        }
    }
}
