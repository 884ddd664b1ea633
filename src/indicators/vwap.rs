use crate::error::EngineError;
use crate::models::Candle;

/// Calculate Volume-Weighted Average Price over a candle series
///
/// Uses (open + high + low + close) / 4 as the typical price per candle.
pub fn calculate_vwap(candles: &[Candle]) -> Result<f64, EngineError> {
    if candles.is_empty() {
        return Err(EngineError::InsufficientData { have: 0, need: 1 });
    }

    let mut total_pv = 0.0;
    let mut total_volume = 0.0;

    for candle in candles {
        total_pv += candle.typical_price() * candle.volume;
        total_volume += candle.volume;
    }

    if total_volume == 0.0 {
        return Err(EngineError::DivisionByZero { context: "vwap" });
    }

    Ok(total_pv / total_volume)
}
