use chrono::Duration;

use crate::indicators;
use crate::models::{Candle, FeatureRow, TargetRow};

/// Turns raw candle history into model inputs and forward-looking labels.
///
/// The strategy core never derives features itself; it only aligns and
/// forwards what this collaborator produces.
pub trait FeatureEngineer: Send + Sync {
    /// One feature row per candle that has enough lookback history
    fn features_of(&self, candles: &[Candle]) -> Vec<FeatureRow>;

    /// Future low/high labels. A row exists only for candles whose label
    /// horizon is already covered by later candles.
    fn targets_of(&self, candles: &[Candle], horizon: Duration) -> Vec<TargetRow>;

    /// Feature row for the newest candle, if enough history exists
    fn last_features(&self, candles: &[Candle]) -> Option<FeatureRow>;

    fn feature_width(&self) -> usize;

    fn target_width(&self) -> usize {
        2
    }
}

/// Default engineer: a small indicator vector per candle, future low/high
/// offsets as targets.
#[derive(Debug, Clone)]
pub struct LowHighFeatures {
    pub rsi_period: usize,
    pub fast_ema_period: usize,
    pub slow_ema_period: usize,
    pub atr_period: usize,
    pub roc_period: usize,
}

impl Default for LowHighFeatures {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            fast_ema_period: 5,
            slow_ema_period: 20,
            atr_period: 14,
            roc_period: 3,
        }
    }
}

impl LowHighFeatures {
    /// Candles required before the first feature row can be produced
    pub fn min_candles(&self) -> usize {
        self.rsi_period
            .max(self.slow_ema_period)
            .max(self.atr_period)
            .max(self.roc_period)
            + 1
    }

    fn row_at(&self, candles: &[Candle], idx: usize) -> Option<FeatureRow> {
        if idx + 1 < self.min_candles() {
            return None;
        }
        let visible = &candles[..=idx];
        let closes: Vec<f64> = visible.iter().map(|c| c.close).collect();
        let last = &candles[idx];

        let rsi = indicators::rsi(&closes, self.rsi_period)?;
        let fast_ema = indicators::ema(&closes, self.fast_ema_period)?;
        let slow_ema = indicators::ema(&closes, self.slow_ema_period)?;
        let atr = indicators::atr(visible, self.atr_period)?;
        let roc = indicators::roc(&closes, self.roc_period)?;

        Some(FeatureRow {
            timestamp: last.close_time,
            values: vec![
                // Centered/relative values so scales stay comparable
                rsi / 100.0,
                (fast_ema - last.close) / last.close,
                (slow_ema - last.close) / last.close,
                atr / last.close,
                roc,
                (last.high - last.low) / last.close,
            ],
        })
    }
}

impl FeatureEngineer for LowHighFeatures {
    fn features_of(&self, candles: &[Candle]) -> Vec<FeatureRow> {
        (0..candles.len())
            .filter_map(|i| self.row_at(candles, i))
            .collect()
    }

    fn targets_of(&self, candles: &[Candle], horizon: Duration) -> Vec<TargetRow> {
        let mut rows = Vec::new();
        for (i, candle) in candles.iter().enumerate() {
            let deadline = candle.close_time + horizon;
            // Label is computable only once a candle at or beyond the
            // horizon exists
            if !candles[i + 1..].iter().any(|c| c.close_time >= deadline) {
                continue;
            }
            let future: Vec<&Candle> = candles[i + 1..]
                .iter()
                .take_while(|c| c.close_time <= deadline)
                .collect();
            if future.is_empty() {
                continue;
            }
            let fut_low = future.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
            let fut_high = future
                .iter()
                .map(|c| c.high)
                .fold(f64::NEG_INFINITY, f64::max);
            rows.push(TargetRow {
                timestamp: candle.close_time,
                values: vec![fut_low - candle.low, fut_high - candle.high],
            });
        }
        rows
    }

    fn last_features(&self, candles: &[Candle]) -> Option<FeatureRow> {
        if candles.is_empty() {
            return None;
        }
        self.row_at(candles, candles.len() - 1)
    }

    fn feature_width(&self) -> usize {
        6
    }
}
