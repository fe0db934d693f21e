// Strategy orchestration
pub mod core;
pub mod signal_calc;
pub mod unchecked;

pub use self::core::StrategyCore;
pub use signal_calc::{LowHighSignalCalculator, SignalCalculator, SignalDecision};
pub use unchecked::TrainingSet;
