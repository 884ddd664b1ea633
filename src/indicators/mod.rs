// Technical indicators module
// Implements EMA, RSI, MACD, VWAP and volume MA for signal evaluation

pub mod ema;
pub mod macd;
pub mod rsi;
pub mod volume;
pub mod vwap;

pub use ema::calculate_ema;
pub use macd::{calculate_macd, MacdPeriods};
pub use rsi::calculate_rsi;
pub use volume::calculate_volume_ma;
pub use vwap::calculate_vwap;
