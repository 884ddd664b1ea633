use crate::error::EngineError;

/// Calculate Relative Strength Index (RSI)
///
/// Averages gains (positive deltas) and losses (negated negative deltas)
/// over the last `period` deltas. A zero average loss returns the neutral
/// value 50 rather than dividing by zero.
pub fn calculate_rsi(prices: &[f64], period: usize) -> Result<f64, EngineError> {
    if prices.len() < 2 {
        return Err(EngineError::InsufficientData {
            have: prices.len(),
            need: 2,
        });
    }

    let mut gains = Vec::new();
    let mut losses = Vec::new();

    for window in prices.windows(2) {
        let change = window[1] - window[0];
        if change > 0.0 {
            gains.push(change);
            losses.push(0.0);
        } else {
            gains.push(0.0);
            losses.push(change.abs());
        }
    }

    let take = period.min(gains.len());
    let avg_gain: f64 = gains.iter().rev().take(take).sum::<f64>() / period as f64;
    let avg_loss: f64 = losses.iter().rev().take(take).sum::<f64>() / period as f64;

    if avg_loss == 0.0 {
        return Ok(50.0);
    }

    let rs = avg_gain / avg_loss;
    Ok(100.0 - (100.0 / (1.0 + rs)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rsi_within_bounds() {
        let prices = vec![
            44.0, 44.25, 44.5, 43.75, 44.0, 44.5, 45.0, 45.5, 45.25, 45.5, 46.0, 46.5, 46.25,
            46.0, 46.5,
        ];

        let rsi = calculate_rsi(&prices, 14).unwrap();
        assert!(rsi > 0.0 && rsi < 100.0);
    }

    #[test]
    fn test_rsi_zero_loss_is_neutral() {
        // Monotonic rise: no losses at all, neutral fallback applies
        let prices = vec![100.0, 101.0, 102.0, 103.0, 104.0, 105.0];
        let rsi = calculate_rsi(&prices, 5).unwrap();
        assert_eq!(rsi, 50.0);
    }

    #[test]
    fn test_rsi_all_losses_is_zero() {
        let prices = vec![105.0, 104.0, 103.0, 102.0, 101.0, 100.0];
        let rsi = calculate_rsi(&prices, 5).unwrap();
        assert_eq!(rsi, 0.0);
    }

    #[test]
    fn test_rsi_insufficient_data() {
        let result = calculate_rsi(&[100.0], 14);
        assert!(matches!(
            result,
            Err(EngineError::InsufficientData { have: 1, need: 2 })
        ));
    }

    #[test]
    fn test_rsi_balanced_moves() {
        // Equal gain and loss magnitudes give RS = 1, RSI = 50
        let prices = vec![100.0, 102.0, 100.0, 102.0, 100.0];
        let rsi = calculate_rsi(&prices, 4).unwrap();
        assert!((rsi - 50.0).abs() < 1e-9);
    }
}
