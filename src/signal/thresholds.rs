use crate::indicators::MacdPeriods;

/// Consecutive empty cycles before thresholds start relaxing
pub const NO_SIGNAL_RELAX_AFTER: u32 = 3;

/// Tunable indicator thresholds for the buy rule
#[derive(Debug, Clone)]
pub struct IndicatorThresholds {
    pub volume_spike_multiplier: f64,
    pub rsi_threshold: f64,
    /// Maximum tolerated upper wick, percent of the candle high
    pub upper_wick_pct: f64,
    pub vwap_period: usize,
    pub ema_fast: usize,
    pub ema_slow: usize,
    pub macd: MacdPeriods,
}

impl Default for IndicatorThresholds {
    fn default() -> Self {
        Self {
            volume_spike_multiplier: 1.2,
            rsi_threshold: 55.0,
            upper_wick_pct: 4.0,
            vwap_period: 20,
            ema_fast: 5,
            ema_slow: 20,
            macd: MacdPeriods::default(),
        }
    }
}

/// Clamps that keep relaxation from drifting into noise
#[derive(Debug, Clone)]
pub struct ThresholdLimits {
    pub min_volume_spike_multiplier: f64,
    pub min_rsi_threshold: f64,
    pub max_upper_wick_pct: f64,
}

impl Default for ThresholdLimits {
    fn default() -> Self {
        Self {
            min_volume_spike_multiplier: 1.05,
            min_rsi_threshold: 40.0,
            max_upper_wick_pct: 5.0,
        }
    }
}

/// Adaptive threshold state owned by one evaluator instance.
///
/// After `NO_SIGNAL_RELAX_AFTER` consecutive cycles with zero qualifying
/// symbols, each empty cycle relaxes the thresholds one fixed step:
/// volume multiplier ×0.9, RSI threshold −2, wick tolerance +0.2, each
/// clamped to its limit. The first cycle that produces a signal snaps
/// everything back to base. The exact steps and clamps are what makes
/// behavior reproducible in backtests.
#[derive(Debug, Clone)]
pub struct ThresholdState {
    base: IndicatorThresholds,
    limits: ThresholdLimits,
    current: IndicatorThresholds,
    no_signal_streak: u32,
}

impl ThresholdState {
    pub fn new(base: IndicatorThresholds, limits: ThresholdLimits) -> Self {
        Self {
            current: base.clone(),
            base,
            limits,
            no_signal_streak: 0,
        }
    }

    pub fn current(&self) -> &IndicatorThresholds {
        &self.current
    }

    pub fn no_signal_streak(&self) -> u32 {
        self.no_signal_streak
    }

    /// Record the outcome of an evaluation cycle.
    ///
    /// Returns true when the thresholds were relaxed, which entitles the
    /// caller to one bounded immediate re-evaluation.
    pub fn record_cycle(&mut self, qualifying_symbols: usize) -> bool {
        if qualifying_symbols > 0 {
            if self.no_signal_streak > 0 {
                tracing::info!(
                    "Signals found, resetting thresholds to base (streak was {})",
                    self.no_signal_streak
                );
            }
            self.current = self.base.clone();
            self.no_signal_streak = 0;
            return false;
        }

        self.no_signal_streak += 1;
        if self.no_signal_streak < NO_SIGNAL_RELAX_AFTER {
            return false;
        }

        self.relax();
        true
    }

    fn relax(&mut self) {
        self.current.volume_spike_multiplier = (self.current.volume_spike_multiplier * 0.9)
            .max(self.limits.min_volume_spike_multiplier);
        self.current.rsi_threshold =
            (self.current.rsi_threshold - 2.0).max(self.limits.min_rsi_threshold);
        self.current.upper_wick_pct =
            (self.current.upper_wick_pct + 0.2).min(self.limits.max_upper_wick_pct);

        tracing::info!(
            "Relaxed thresholds after {} empty cycles: volume x{:.3}, rsi {:.1}, wick {:.1}%",
            self.no_signal_streak,
            self.current.volume_spike_multiplier,
            self.current.rsi_threshold,
            self.current.upper_wick_pct
        );
    }
}

impl Default for ThresholdState {
    fn default() -> Self {
        Self::new(IndicatorThresholds::default(), ThresholdLimits::default())
    }
}
