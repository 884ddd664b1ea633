// Signal evaluation: adaptive thresholds + buy/sell decision rules
pub mod evaluator;
pub mod thresholds;

pub use evaluator::{SellDecision, SignalEvaluator, MIN_CONFIDENCE_SCORE};
pub use thresholds::{IndicatorThresholds, ThresholdLimits, ThresholdState};
