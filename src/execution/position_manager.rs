use crate::error::EngineError;
use crate::models::{
    Fill, LevelStatus, Position, PositionStatus, TakeProfitLevel, Trade, TradeKind, TradeStatus,
};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use uuid::Uuid;

/// Why a position was fully exited
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExitReason {
    StopLoss,
    Timeout,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "stop_loss",
            ExitReason::Timeout => "timeout",
        }
    }
}

/// One rung of the default ladder: price gain percent and the portion of
/// the original quantity it sells
#[derive(Debug, Clone, Copy)]
pub struct LadderRung {
    pub gain_pct: f64,
    pub portion_pct: f64,
}

#[derive(Debug, Clone)]
pub struct PositionConfig {
    pub take_profit_ladder: Vec<LadderRung>,
    pub stop_loss_pct: f64,
    pub max_hold: Duration,
}

impl Default for PositionConfig {
    fn default() -> Self {
        Self {
            take_profit_ladder: vec![
                LadderRung {
                    gain_pct: 10.0,
                    portion_pct: 10.0,
                },
                LadderRung {
                    gain_pct: 25.0,
                    portion_pct: 25.0,
                },
                LadderRung {
                    gain_pct: 50.0,
                    portion_pct: 50.0,
                },
            ],
            stop_loss_pct: 5.0,
            max_hold: Duration::minutes(15),
        }
    }
}

/// Owns the position state machine: NONE → OPEN → [partial exits]* → CLOSED.
///
/// All mutations for a symbol must come through one manager instance behind
/// a lock; every mutation validates first and writes second, so a failed
/// call leaves the last-committed state untouched. Fills are deduplicated
/// by exchange order id, making re-processing a fill a no-op.
pub struct PositionManager {
    positions: Vec<Position>,
    trades: HashMap<Uuid, Vec<Trade>>,
    config: PositionConfig,
}

impl PositionManager {
    pub fn new(config: PositionConfig) -> Self {
        Self {
            positions: Vec::new(),
            trades: HashMap::new(),
            config,
        }
    }

    /// Restore a manager from persisted positions and trades
    pub fn with_state(
        config: PositionConfig,
        positions: Vec<Position>,
        trades: Vec<Trade>,
    ) -> Self {
        let mut by_position: HashMap<Uuid, Vec<Trade>> = HashMap::new();
        for trade in trades {
            by_position.entry(trade.position_id).or_default().push(trade);
        }

        tracing::info!(
            "Restored {} positions ({} open) from persistence",
            positions.len(),
            positions
                .iter()
                .filter(|p| p.status == PositionStatus::Open)
                .count()
        );

        Self {
            positions,
            trades: by_position,
            config,
        }
    }

    pub fn config(&self) -> &PositionConfig {
        &self.config
    }

    pub fn max_hold(&self) -> Duration {
        self.config.max_hold
    }

    /// Open a position from an entry fill.
    ///
    /// Opening while a position for the symbol is already open is an
    /// idempotent no-op returning the existing id; duplicate buy signals
    /// must not double a position. The default take-profit ladder and
    /// stop-loss are seeded from the entry price.
    pub fn open_position(
        &mut self,
        symbol: &str,
        fill: &Fill,
        now: DateTime<Utc>,
    ) -> Result<Uuid, EngineError> {
        if fill.price <= 0.0 {
            return Err(EngineError::Validation(format!(
                "entry price must be positive, got {}",
                fill.price
            )));
        }
        if fill.quantity <= 0.0 {
            return Err(EngineError::Validation(format!(
                "quantity must be positive, got {}",
                fill.quantity
            )));
        }

        // Replayed entry fill: return the position that order already opened
        if let Some(existing) = self.position_for_order(&fill.exchange_order_id) {
            tracing::debug!(
                "Entry fill {} already recorded on position {}",
                fill.exchange_order_id,
                existing
            );
            return Ok(existing);
        }

        if let Some(existing) = self.get_open_position(symbol) {
            tracing::info!(
                "Ignoring duplicate entry for {} (position {} already open)",
                symbol,
                existing.id
            );
            return Ok(existing.id);
        }

        let id = Uuid::new_v4();
        let take_profit_levels = self
            .config
            .take_profit_ladder
            .iter()
            .map(|rung| TakeProfitLevel {
                price: fill.price * (1.0 + rung.gain_pct / 100.0),
                percentage: rung.portion_pct,
                status: LevelStatus::Pending,
            })
            .collect();

        let position = Position {
            id,
            symbol: symbol.to_string(),
            entry_price: fill.price,
            quantity: fill.quantity,
            status: PositionStatus::Open,
            entry_time: now,
            stop_loss: fill.price * (1.0 - self.config.stop_loss_pct / 100.0),
            take_profit_levels,
            dry_run: fill.dry_run,
        };

        self.positions.push(position);
        self.record_trade(
            id,
            TradeKind::Entry,
            fill,
            serde_json::json!({ "reason": "entry" }),
        );

        tracing::info!(
            "Opened position {} for {} @ {} (qty {}, stop {})",
            id,
            symbol,
            fill.price,
            fill.quantity,
            fill.price * (1.0 - self.config.stop_loss_pct / 100.0)
        );

        Ok(id)
    }

    /// Apply a partial take-profit fill to a pending ladder level.
    ///
    /// Decrements quantity, flips the level to executed, appends an exit
    /// trade; the position closes once every level has executed. Validation
    /// happens before any mutation.
    pub fn apply_partial_exit(
        &mut self,
        position_id: Uuid,
        level_index: usize,
        fill: &Fill,
    ) -> Result<(), EngineError> {
        // Fill already recorded: the whole mutation already happened
        if self.trade_exists(position_id, &fill.exchange_order_id) {
            tracing::debug!(
                "Skipping already-recorded fill {} for position {}",
                fill.exchange_order_id,
                position_id
            );
            return Ok(());
        }

        let position = self.get_position(position_id)?;
        if position.status != PositionStatus::Open {
            return Err(EngineError::Validation(
                "cannot apply partial exit to a closed position".to_string(),
            ));
        }
        let level = position.take_profit_levels.get(level_index).ok_or_else(|| {
            EngineError::Validation(format!("no take-profit level at index {}", level_index))
        })?;
        if level.status == LevelStatus::Executed {
            return Err(EngineError::Validation(format!(
                "take-profit level {} already executed",
                level_index
            )));
        }
        if fill.quantity > position.quantity {
            return Err(EngineError::Validation(format!(
                "fill quantity {} exceeds remaining position quantity {}",
                fill.quantity, position.quantity
            )));
        }

        let entry_price = position.entry_price;
        let level_pct = level.percentage;

        let position = self.get_position_mut(position_id)?;
        position.quantity -= fill.quantity;
        position.take_profit_levels[level_index].status = LevelStatus::Executed;

        let all_executed = position
            .take_profit_levels
            .iter()
            .all(|l| l.status == LevelStatus::Executed);
        if all_executed {
            position.status = PositionStatus::Closed;
        }
        let symbol = position.symbol.clone();

        self.record_trade(
            position_id,
            TradeKind::Exit,
            fill,
            serde_json::json!({
                "reason": "take_profit",
                "take_profit_level": level_pct,
                "profit_percentage": profit_pct(entry_price, fill.price),
            }),
        );

        tracing::info!(
            "Take-profit {}% executed for {} @ {} (qty {}){}",
            level_pct,
            symbol,
            fill.price,
            fill.quantity,
            if all_executed { ", ladder complete, position closed" } else { "" }
        );

        Ok(())
    }

    /// Close the position entirely on a stop-loss or timeout fill
    pub fn apply_full_exit(
        &mut self,
        position_id: Uuid,
        fill: &Fill,
        reason: ExitReason,
    ) -> Result<(), EngineError> {
        if self.trade_exists(position_id, &fill.exchange_order_id) {
            tracing::debug!(
                "Skipping already-recorded fill {} for position {}",
                fill.exchange_order_id,
                position_id
            );
            return Ok(());
        }

        let position = self.get_position(position_id)?;
        if position.status != PositionStatus::Open {
            return Err(EngineError::Validation(
                "position already closed".to_string(),
            ));
        }

        let entry_price = position.entry_price;

        let position = self.get_position_mut(position_id)?;
        position.status = PositionStatus::Closed;
        let symbol = position.symbol.clone();

        self.record_trade(
            position_id,
            TradeKind::Exit,
            fill,
            serde_json::json!({
                "reason": reason.as_str(),
                "profit_percentage": profit_pct(entry_price, fill.price),
            }),
        );

        tracing::info!(
            "Position {} for {} closed by {} @ {} (qty {})",
            position_id,
            symbol,
            reason.as_str(),
            fill.price,
            fill.quantity
        );

        Ok(())
    }

    pub fn has_open_position(&self, symbol: &str) -> bool {
        self.get_open_position(symbol).is_some()
    }

    pub fn get_open_position(&self, symbol: &str) -> Option<&Position> {
        self.positions
            .iter()
            .find(|p| p.symbol == symbol && p.status == PositionStatus::Open)
    }

    pub fn open_positions(&self) -> Vec<&Position> {
        self.positions
            .iter()
            .filter(|p| p.status == PositionStatus::Open)
            .collect()
    }

    pub fn all_positions(&self) -> &[Position] {
        &self.positions
    }

    pub fn position(&self, position_id: Uuid) -> Option<&Position> {
        self.positions.iter().find(|p| p.id == position_id)
    }

    pub fn trades_for(&self, position_id: Uuid) -> &[Trade] {
        self.trades
            .get(&position_id)
            .map(|t| t.as_slice())
            .unwrap_or(&[])
    }

    /// Sum of per-exit profit percentages recorded on this position
    pub fn realized_profit_pct(&self, position_id: Uuid) -> f64 {
        self.trades_for(position_id)
            .iter()
            .filter(|t| t.kind == TradeKind::Exit)
            .filter_map(|t| t.metadata.get("profit_percentage").and_then(|v| v.as_f64()))
            .sum()
    }

    fn get_position(&self, position_id: Uuid) -> Result<&Position, EngineError> {
        self.position(position_id)
            .ok_or_else(|| EngineError::Validation(format!("position {} not found", position_id)))
    }

    fn get_position_mut(&mut self, position_id: Uuid) -> Result<&mut Position, EngineError> {
        self.positions
            .iter_mut()
            .find(|p| p.id == position_id)
            .ok_or_else(|| EngineError::Validation(format!("position {} not found", position_id)))
    }

    fn position_for_order(&self, exchange_order_id: &str) -> Option<Uuid> {
        self.trades.iter().find_map(|(position_id, trades)| {
            trades
                .iter()
                .any(|t| t.exchange_order_id.as_deref() == Some(exchange_order_id))
                .then_some(*position_id)
        })
    }

    fn trade_exists(&self, position_id: Uuid, exchange_order_id: &str) -> bool {
        self.trades_for(position_id)
            .iter()
            .any(|t| t.exchange_order_id.as_deref() == Some(exchange_order_id))
    }

    fn record_trade(
        &mut self,
        position_id: Uuid,
        kind: TradeKind,
        fill: &Fill,
        metadata: serde_json::Value,
    ) {
        self.trades.entry(position_id).or_default().push(Trade {
            id: Uuid::new_v4(),
            position_id,
            kind,
            price: fill.price,
            quantity: fill.quantity,
            status: TradeStatus::Executed,
            exchange_order_id: Some(fill.exchange_order_id.clone()),
            executed_at: Some(fill.executed_at),
            metadata,
        });
    }
}

fn profit_pct(entry_price: f64, exit_price: f64) -> f64 {
    (exit_price - entry_price) / entry_price * 100.0
}
