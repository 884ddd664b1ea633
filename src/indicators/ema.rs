use crate::error::EngineError;

/// Calculate Exponential Moving Average (EMA)
///
/// Seeds with the first price and folds the rest with smoothing factor
/// k = 2 / (period + 1). The result is a convex combination of the inputs,
/// so it always lies between the min and max price of the series.
pub fn calculate_ema(prices: &[f64], period: usize) -> Result<f64, EngineError> {
    if prices.is_empty() {
        return Err(EngineError::InsufficientData { have: 0, need: 1 });
    }

    let multiplier = 2.0 / (period as f64 + 1.0);

    let mut ema = prices[0];
    for price in &prices[1..] {
        ema = (price - ema) * multiplier + ema;
    }

    Ok(ema)
}
