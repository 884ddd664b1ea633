use crate::error::EngineError;
use crate::models::Candle;

/// Mean volume of the last `period` candles
pub fn calculate_volume_ma(candles: &[Candle], period: usize) -> Result<f64, EngineError> {
    if candles.is_empty() {
        return Err(EngineError::InsufficientData { have: 0, need: 1 });
    }

    let take = period.min(candles.len());
    let sum: f64 = candles.iter().rev().take(take).map(|c| c.volume).sum();

    Ok(sum / period as f64)
}
