use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Exchange metadata for a trading pair
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SymbolMeta {
    pub symbol: String,
    pub status: String,
    pub base_asset: String,
    pub quote_asset: String,
    /// Raw exchange filters (LOT_SIZE etc.), kept verbatim for sizing
    pub filters: Vec<serde_json::Value>,
}

impl SymbolMeta {
    /// Lot step size from the LOT_SIZE filter, if the exchange provides one
    pub fn lot_step_size(&self) -> Option<f64> {
        self.filters
            .iter()
            .find(|f| f.get("filterType").and_then(|v| v.as_str()) == Some("LOT_SIZE"))
            .and_then(|f| f.get("stepSize"))
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
    }
}

/// OHLCV candlestick, oldest-first ordering per symbol+interval
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub close_time: DateTime<Utc>,
    pub quote_volume: f64,
}

impl Candle {
    /// Typical price used by VWAP
    pub fn typical_price(&self) -> f64 {
        (self.open + self.high + self.low + self.close) / 4.0
    }

    /// High minus the upper body edge
    pub fn upper_wick(&self) -> f64 {
        self.high - self.open.max(self.close)
    }
}

/// Symbol lifecycle record: created on first observation, never deleted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingRecord {
    pub symbol: String,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

/// MACD triple
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Macd {
    pub line: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// Per-cycle indicator values derived from a candle series; never persisted
#[derive(Debug, Clone)]
pub struct IndicatorSnapshot {
    pub current_price: f64,
    pub volume: f64,
    pub volume_ma: f64,
    pub ema_fast: f64,
    pub ema_slow: f64,
    pub rsi: f64,
    pub macd: Macd,
    pub vwap: f64,
    pub high: f64,
    pub low: f64,
    pub open: f64,
    pub close: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum LevelStatus {
    Pending,
    Executed,
}

/// One rung of the take-profit ladder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TakeProfitLevel {
    pub price: f64,
    /// Portion of the original quantity to sell at this level, in (0, 100]
    pub percentage: f64,
    pub status: LevelStatus,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum PositionStatus {
    Open,
    Closed,
}

/// Speculative position on a newly listed pair
///
/// At most one open position per symbol; mutated only through the
/// position manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub symbol: String,
    pub entry_price: f64,
    pub quantity: f64,
    pub status: PositionStatus,
    pub entry_time: DateTime<Utc>,
    pub stop_loss: f64,
    pub take_profit_levels: Vec<TakeProfitLevel>,
    pub dry_run: bool,
}

impl Position {
    /// Percent distance of `current_price` from entry
    pub fn unrealized_pct(&self, current_price: f64) -> f64 {
        (current_price - self.entry_price) / self.entry_price * 100.0
    }

    /// Quantity a ladder level should sell.
    ///
    /// Level percentages are shares of the original quantity; the current
    /// quantity only reflects what is left, so the share is rescaled by the
    /// percentage still pending.
    pub fn quantity_for_level(&self, level_index: usize) -> f64 {
        let Some(level) = self.take_profit_levels.get(level_index) else {
            return 0.0;
        };

        let executed_pct: f64 = self
            .take_profit_levels
            .iter()
            .filter(|l| l.status == LevelStatus::Executed)
            .map(|l| l.percentage)
            .sum();
        let remaining_pct = 100.0 - executed_pct;
        if remaining_pct <= 0.0 {
            return 0.0;
        }

        self.quantity * (level.percentage / remaining_pct)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum TradeKind {
    Entry,
    Exit,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum TradeStatus {
    Pending,
    Executed,
    Failed,
}

/// Fill record, append-only per position
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: Uuid,
    pub position_id: Uuid,
    pub kind: TradeKind,
    pub price: f64,
    pub quantity: f64,
    pub status: TradeStatus,
    pub exchange_order_id: Option<String>,
    pub executed_at: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_exchange_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum OrderType {
    Market,
    Limit,
}

impl OrderType {
    pub fn as_exchange_str(&self) -> &'static str {
        match self {
            OrderType::Market => "MARKET",
            OrderType::Limit => "LIMIT",
        }
    }
}

/// Order intent handed to an executor
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: f64,
    pub price: Option<f64>,
}

/// Result of an accepted order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub symbol: String,
    pub side: OrderSide,
    pub price: f64,
    pub quantity: f64,
    pub exchange_order_id: String,
    pub executed_at: DateTime<Utc>,
    pub dry_run: bool,
}

/// Free balance for one asset
#[derive(Debug, Clone, Deserialize)]
pub struct AssetBalance {
    pub asset: String,
    pub free: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typical_price() {
        let candle = Candle {
            open_time: Utc::now(),
            open: 100.0,
            high: 110.0,
            low: 90.0,
            close: 104.0,
            volume: 1000.0,
            close_time: Utc::now(),
            quote_volume: 100_000.0,
        };
        assert_eq!(candle.typical_price(), 101.0);
    }

    #[test]
    fn test_upper_wick_uses_body_top() {
        let candle = Candle {
            open_time: Utc::now(),
            open: 104.0,
            high: 110.0,
            low: 90.0,
            close: 100.0,
            volume: 1000.0,
            close_time: Utc::now(),
            quote_volume: 100_000.0,
        };
        // Body top is the open here (104), not the close
        assert_eq!(candle.upper_wick(), 6.0);
    }

    #[test]
    fn test_lot_step_size_parsing() {
        let meta = SymbolMeta {
            symbol: "NEWUSDT".to_string(),
            status: "TRADING".to_string(),
            base_asset: "NEW".to_string(),
            quote_asset: "USDT".to_string(),
            filters: vec![serde_json::json!({
                "filterType": "LOT_SIZE",
                "minQty": "0.01000000",
                "maxQty": "100000.00000000",
                "stepSize": "0.01000000"
            })],
        };
        assert_eq!(meta.lot_step_size(), Some(0.01));
    }

    #[test]
    fn test_lot_step_size_missing_filter() {
        let meta = SymbolMeta {
            symbol: "NEWUSDT".to_string(),
            status: "TRADING".to_string(),
            base_asset: "NEW".to_string(),
            quote_asset: "USDT".to_string(),
            filters: vec![],
        };
        assert_eq!(meta.lot_step_size(), None);
    }

    #[test]
    fn test_quantity_for_level_rescales_after_partials() {
        let mut position = Position {
            id: Uuid::new_v4(),
            symbol: "NEWUSDT".to_string(),
            entry_price: 100.0,
            quantity: 1000.0,
            status: PositionStatus::Open,
            entry_time: Utc::now(),
            stop_loss: 95.0,
            take_profit_levels: vec![
                TakeProfitLevel { price: 110.0, percentage: 10.0, status: LevelStatus::Pending },
                TakeProfitLevel { price: 125.0, percentage: 25.0, status: LevelStatus::Pending },
                TakeProfitLevel { price: 150.0, percentage: 50.0, status: LevelStatus::Pending },
            ],
            dry_run: true,
        };

        // Untouched ladder: shares of the original quantity
        assert_eq!(position.quantity_for_level(0), 100.0);

        // After the 10% level fills, 900 remain covering 90% of the original
        position.take_profit_levels[0].status = LevelStatus::Executed;
        position.quantity = 900.0;
        assert!((position.quantity_for_level(1) - 250.0).abs() < 1e-9);

        position.take_profit_levels[1].status = LevelStatus::Executed;
        position.quantity = 650.0;
        assert!((position.quantity_for_level(2) - 500.0).abs() < 1e-9);

        // Out-of-range index sells nothing
        assert_eq!(position.quantity_for_level(9), 0.0);
    }

    #[test]
    fn test_unrealized_pct() {
        let position = Position {
            id: Uuid::new_v4(),
            symbol: "NEWUSDT".to_string(),
            entry_price: 100.0,
            quantity: 10.0,
            status: PositionStatus::Open,
            entry_time: Utc::now(),
            stop_loss: 95.0,
            take_profit_levels: vec![],
            dry_run: true,
        };
        assert_eq!(position.unrealized_pct(110.0), 10.0);
        assert_eq!(position.unrealized_pct(95.0), -5.0);
    }
}
