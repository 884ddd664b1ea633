use crate::error::EngineError;
use crate::indicators::{
    calculate_ema, calculate_macd, calculate_rsi, calculate_volume_ma, calculate_vwap,
};
use crate::models::{Candle, IndicatorSnapshot, Position, PositionStatus};
use crate::signal::thresholds::{IndicatorThresholds, ThresholdLimits, ThresholdState};
use chrono::{DateTime, Duration, Utc};

/// Minimum chart-analysis confidence for a buy to pass, out of 100
pub const MIN_CONFIDENCE_SCORE: u8 = 70;

const RSI_PERIOD: usize = 14;

/// Exit decision for an open position, in priority order
#[derive(Debug, Clone, PartialEq)]
pub enum SellDecision {
    /// Partial exit at a pending ladder level
    TakeProfit { level_index: usize },
    /// Full exit below the stop
    StopLoss,
    /// Full exit after the maximum hold time
    Timeout,
}

/// Applies the multi-factor buy rule and the exit priority rules.
///
/// Owns the adaptive threshold state for the lifetime of a monitoring
/// session; indicators and positions are supplied by the caller.
pub struct SignalEvaluator {
    state: ThresholdState,
}

impl SignalEvaluator {
    pub fn new(base: IndicatorThresholds, limits: ThresholdLimits) -> Self {
        Self {
            state: ThresholdState::new(base, limits),
        }
    }

    pub fn thresholds(&self) -> &IndicatorThresholds {
        self.state.current()
    }

    /// Record how many symbols qualified this cycle; true means thresholds
    /// were relaxed and the caller may re-evaluate once immediately.
    pub fn record_cycle(&mut self, qualifying_symbols: usize) -> bool {
        self.state.record_cycle(qualifying_symbols)
    }

    /// Compute the indicator snapshot for a candle series (oldest first).
    ///
    /// The last candle supplies the current price and OHLC; the series
    /// supplies the aggregates.
    pub fn snapshot(&self, candles: &[Candle]) -> Result<IndicatorSnapshot, EngineError> {
        let last = candles.last().ok_or(EngineError::InsufficientData {
            have: 0,
            need: 1,
        })?;

        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let thresholds = self.state.current();

        Ok(IndicatorSnapshot {
            current_price: last.close,
            volume: last.volume,
            volume_ma: calculate_volume_ma(candles, thresholds.vwap_period)?,
            ema_fast: calculate_ema(&closes, thresholds.ema_fast)?,
            ema_slow: calculate_ema(&closes, thresholds.ema_slow)?,
            rsi: calculate_rsi(&closes, RSI_PERIOD)?,
            macd: calculate_macd(&closes, thresholds.macd)?,
            vwap: calculate_vwap(candles)?,
            high: last.high,
            low: last.low,
            open: last.open,
            close: last.close,
        })
    }

    /// All conditions must hold for a buy.
    ///
    /// An absent confidence score does not block; a sub-threshold one does.
    pub fn evaluate_buy(
        &self,
        indicators: &IndicatorSnapshot,
        external_confidence: Option<u8>,
    ) -> bool {
        let thresholds = self.state.current();

        if let Some(score) = external_confidence {
            if score < MIN_CONFIDENCE_SCORE {
                tracing::debug!(
                    "Buy blocked: confidence {}/100 below {}",
                    score,
                    MIN_CONFIDENCE_SCORE
                );
                return false;
            }
        }

        let volume_spike =
            indicators.volume > indicators.volume_ma * thresholds.volume_spike_multiplier;
        let above_vwap = indicators.current_price > indicators.vwap;
        let strong_rsi = indicators.rsi > thresholds.rsi_threshold;
        let bullish_ema = indicators.ema_fast > indicators.ema_slow;
        let bullish_macd = indicators.macd.signal > indicators.macd.histogram;

        let upper_wick = indicators.high - indicators.open.max(indicators.close);
        let no_upper_wick = upper_wick < indicators.high * (thresholds.upper_wick_pct / 100.0);

        let conditions = [
            volume_spike,
            above_vwap,
            strong_rsi,
            bullish_ema,
            bullish_macd,
            no_upper_wick,
        ];

        tracing::debug!(
            "Buy conditions: vol_spike={} (vol {:.2} vs {:.2}x MA {:.2}), vwap={} ({:.6} vs {:.6}), \
             rsi={} ({:.1} vs {:.1}), ema={} ({:.6} vs {:.6}), macd={} ({:.6} vs {:.6}), wick={} ({:.6} vs {:.2}%)",
            volume_spike,
            indicators.volume,
            thresholds.volume_spike_multiplier,
            indicators.volume_ma,
            above_vwap,
            indicators.current_price,
            indicators.vwap,
            strong_rsi,
            indicators.rsi,
            thresholds.rsi_threshold,
            bullish_ema,
            indicators.ema_fast,
            indicators.ema_slow,
            bullish_macd,
            indicators.macd.signal,
            indicators.macd.histogram,
            no_upper_wick,
            upper_wick,
            thresholds.upper_wick_pct
        );

        conditions.iter().all(|&c| c)
    }

    /// Exit rules in priority order: pending take-profit level hit, then
    /// stop-loss, then hold timeout. At most one decision per call; the
    /// next cycle sees the mutated position and re-evaluates.
    pub fn evaluate_sell(
        position: &Position,
        current_price: f64,
        now: DateTime<Utc>,
        max_hold: Duration,
    ) -> Option<SellDecision> {
        if position.status != PositionStatus::Open {
            return None;
        }

        for (index, level) in position.take_profit_levels.iter().enumerate() {
            if level.status == crate::models::LevelStatus::Pending && current_price >= level.price {
                return Some(SellDecision::TakeProfit { level_index: index });
            }
        }

        if current_price <= position.stop_loss {
            return Some(SellDecision::StopLoss);
        }

        if now - position.entry_time > max_hold {
            return Some(SellDecision::Timeout);
        }

        None
    }
}

impl Default for SignalEvaluator {
    fn default() -> Self {
        Self::new(IndicatorThresholds::default(), ThresholdLimits::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LevelStatus, Macd, TakeProfitLevel};
    use uuid::Uuid;

    /// Snapshot where every buy condition passes against default thresholds
    fn passing_snapshot() -> IndicatorSnapshot {
        IndicatorSnapshot {
            current_price: 105.0,
            volume: 5000.0,
            volume_ma: 1000.0, // spike: 5000 > 1000 * 1.2
            ema_fast: 104.0,   // above slow
            ema_slow: 100.0,
            rsi: 60.0,          // above 55
            macd: Macd {
                line: 1.0,
                signal: 1.0,    // signal > histogram (0)
                histogram: 0.0,
            },
            vwap: 100.0,        // price above
            high: 105.5,        // wick 0.5 < 105.5 * 4% = 4.22
            low: 99.0,
            open: 100.0,
            close: 105.0,
        }
    }

    fn position_with_ladder() -> Position {
        Position {
            id: Uuid::new_v4(),
            symbol: "NEWUSDT".to_string(),
            entry_price: 100.0,
            quantity: 10.0,
            status: PositionStatus::Open,
            entry_time: Utc::now(),
            stop_loss: 95.0,
            take_profit_levels: vec![
                TakeProfitLevel {
                    price: 110.0,
                    percentage: 10.0,
                    status: LevelStatus::Pending,
                },
                TakeProfitLevel {
                    price: 125.0,
                    percentage: 25.0,
                    status: LevelStatus::Pending,
                },
                TakeProfitLevel {
                    price: 150.0,
                    percentage: 50.0,
                    status: LevelStatus::Pending,
                },
            ],
            dry_run: true,
        }
    }

    #[test]
    fn test_all_conditions_pass() {
        let evaluator = SignalEvaluator::default();
        assert!(evaluator.evaluate_buy(&passing_snapshot(), None));
    }

    #[test]
    fn test_each_single_failing_condition_blocks() {
        let evaluator = SignalEvaluator::default();

        // Volume below the spike multiplier
        let mut snap = passing_snapshot();
        snap.volume = 1100.0; // needs > 1200
        assert!(!evaluator.evaluate_buy(&snap, None));

        // Price below VWAP
        let mut snap = passing_snapshot();
        snap.vwap = 106.0;
        assert!(!evaluator.evaluate_buy(&snap, None));

        // Weak RSI
        let mut snap = passing_snapshot();
        snap.rsi = 54.9;
        assert!(!evaluator.evaluate_buy(&snap, None));

        // Bearish EMA cross
        let mut snap = passing_snapshot();
        snap.ema_fast = 99.0;
        assert!(!evaluator.evaluate_buy(&snap, None));

        // MACD signal at or below histogram
        let mut snap = passing_snapshot();
        snap.macd.signal = -0.5;
        assert!(!evaluator.evaluate_buy(&snap, None));

        // Oversized upper wick
        let mut snap = passing_snapshot();
        snap.high = 115.0; // wick 10 >= 115 * 4% = 4.6
        assert!(!evaluator.evaluate_buy(&snap, None));
    }

    #[test]
    fn test_confidence_gate() {
        let evaluator = SignalEvaluator::default();
        let snap = passing_snapshot();

        // Absent score does not block
        assert!(evaluator.evaluate_buy(&snap, None));
        // Threshold score passes
        assert!(evaluator.evaluate_buy(&snap, Some(70)));
        assert!(evaluator.evaluate_buy(&snap, Some(95)));
        // Sub-threshold score blocks even with perfect indicators
        assert!(!evaluator.evaluate_buy(&snap, Some(69)));
        assert!(!evaluator.evaluate_buy(&snap, Some(0)));
    }

    #[test]
    fn test_sell_priority_take_profit_before_stop_loss() {
        // Contrived: price satisfies both the first ladder level and the
        // stop (stop raised above market). Take-profit wins by priority.
        let mut position = position_with_ladder();
        position.stop_loss = 111.0;

        let decision = SignalEvaluator::evaluate_sell(
            &position,
            110.5,
            Utc::now(),
            Duration::minutes(15),
        );
        assert_eq!(decision, Some(SellDecision::TakeProfit { level_index: 0 }));
    }

    #[test]
    fn test_sell_skips_executed_levels() {
        let mut position = position_with_ladder();
        position.take_profit_levels[0].status = LevelStatus::Executed;

        let decision = SignalEvaluator::evaluate_sell(
            &position,
            126.0,
            Utc::now(),
            Duration::minutes(15),
        );
        assert_eq!(decision, Some(SellDecision::TakeProfit { level_index: 1 }));
    }

    #[test]
    fn test_sell_stop_loss() {
        let position = position_with_ladder();
        let decision = SignalEvaluator::evaluate_sell(
            &position,
            94.9,
            Utc::now(),
            Duration::minutes(15),
        );
        assert_eq!(decision, Some(SellDecision::StopLoss));
    }

    #[test]
    fn test_sell_timeout_after_max_hold() {
        let mut position = position_with_ladder();
        position.entry_time = Utc::now() - Duration::minutes(16);

        let decision = SignalEvaluator::evaluate_sell(
            &position,
            100.0,
            Utc::now(),
            Duration::minutes(15),
        );
        assert_eq!(decision, Some(SellDecision::Timeout));
    }

    #[test]
    fn test_sell_holds_inside_band_and_window() {
        let position = position_with_ladder();
        let decision = SignalEvaluator::evaluate_sell(
            &position,
            100.0,
            Utc::now(),
            Duration::minutes(15),
        );
        assert_eq!(decision, None);
    }

    #[test]
    fn test_sell_ignores_closed_position() {
        let mut position = position_with_ladder();
        position.status = PositionStatus::Closed;

        let decision = SignalEvaluator::evaluate_sell(
            &position,
            50.0,
            Utc::now(),
            Duration::minutes(15),
        );
        assert_eq!(decision, None);
    }

    #[test]
    fn test_snapshot_insufficient_data() {
        let evaluator = SignalEvaluator::default();
        let result = evaluator.snapshot(&[]);
        assert!(matches!(
            result,
            Err(EngineError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_snapshot_from_series() {
        use chrono::Utc;

        let evaluator = SignalEvaluator::default();
        let candles: Vec<Candle> = (0..30)
            .map(|i| {
                let price = 100.0 + i as f64;
                Candle {
                    open_time: Utc::now(),
                    open: price - 0.5,
                    high: price + 0.5,
                    low: price - 1.0,
                    close: price,
                    volume: 1000.0 + i as f64 * 10.0,
                    close_time: Utc::now(),
                    quote_volume: 0.0,
                }
            })
            .collect();

        let snap = evaluator.snapshot(&candles).unwrap();
        assert_eq!(snap.current_price, 129.0);
        assert_eq!(snap.close, 129.0);
        assert!(snap.ema_fast > snap.ema_slow); // steady uptrend
        assert!(snap.vwap > 100.0 && snap.vwap < 129.0);
        assert_eq!(snap.macd.histogram, 0.0);
    }
}
