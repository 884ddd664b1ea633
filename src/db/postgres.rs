use crate::models::{
    Fill, ListingRecord, Position, PositionStatus, TakeProfitLevel, Trade, TradeKind, TradeStatus,
};
use crate::Result;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use uuid::Uuid;

/// Postgres persistence for listings, positions and trades
///
/// All committed state lives here; the in-memory registry and position
/// manager are rebuilt from these tables on restart.
pub struct PostgresPersistence {
    pool: PgPool,
}

impl PostgresPersistence {
    /// Connect and run pending migrations
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::info!("Connected to Postgres at {}", database_url);

        Ok(Self { pool })
    }

    // ============== Listings ==============

    /// Upsert a listing record
    pub async fn save_listing(&self, record: &ListingRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO listings (symbol, first_seen_at, last_seen_at, is_active)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (symbol) DO UPDATE SET
                last_seen_at = EXCLUDED.last_seen_at,
                is_active = EXCLUDED.is_active,
                updated_at = NOW()
            "#,
        )
        .bind(&record.symbol)
        .bind(record.first_seen_at)
        .bind(record.last_seen_at)
        .bind(record.is_active)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn load_listings(&self) -> Result<Vec<ListingRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT symbol, first_seen_at, last_seen_at, is_active
            FROM listings
            ORDER BY first_seen_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let records = rows
            .into_iter()
            .map(|row| ListingRecord {
                symbol: row.get("symbol"),
                first_seen_at: row.get("first_seen_at"),
                last_seen_at: row.get("last_seen_at"),
                is_active: row.get("is_active"),
            })
            .collect::<Vec<_>>();

        tracing::info!("Loaded {} listing records from Postgres", records.len());

        Ok(records)
    }

    // ============== Positions ==============

    /// Upsert a position, ladder included
    pub async fn save_position(&self, position: &Position) -> Result<()> {
        let status_str = match position.status {
            PositionStatus::Open => "open",
            PositionStatus::Closed => "closed",
        };
        let levels = serde_json::to_value(&position.take_profit_levels)?;

        sqlx::query(
            r#"
            INSERT INTO positions (
                id, symbol, entry_price, quantity, status, entry_time,
                stop_loss, take_profit_levels, dry_run
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                quantity = EXCLUDED.quantity,
                status = EXCLUDED.status,
                take_profit_levels = EXCLUDED.take_profit_levels,
                updated_at = NOW()
            "#,
        )
        .bind(position.id)
        .bind(&position.symbol)
        .bind(position.entry_price)
        .bind(position.quantity)
        .bind(status_str)
        .bind(position.entry_time)
        .bind(position.stop_loss)
        .bind(levels)
        .bind(position.dry_run)
        .execute(&self.pool)
        .await?;

        tracing::debug!(
            "Saved position {} for {} to Postgres",
            position.id,
            position.symbol
        );

        Ok(())
    }

    pub async fn load_positions(&self) -> Result<Vec<Position>> {
        let rows = sqlx::query(
            r#"
            SELECT id, symbol, entry_price, quantity, status, entry_time,
                   stop_loss, take_profit_levels, dry_run
            FROM positions
            ORDER BY entry_time ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut positions = Vec::new();

        for row in rows {
            let status_str: String = row.get("status");
            let status = match status_str.as_str() {
                "open" => PositionStatus::Open,
                "closed" => PositionStatus::Closed,
                _ => return Err("invalid position status".into()),
            };

            let levels_value: serde_json::Value = row.get("take_profit_levels");
            let take_profit_levels: Vec<TakeProfitLevel> = serde_json::from_value(levels_value)?;

            positions.push(Position {
                id: row.get("id"),
                symbol: row.get("symbol"),
                entry_price: decimal_to_f64(row.get("entry_price"))?,
                quantity: decimal_to_f64(row.get("quantity"))?,
                status,
                entry_time: row.get("entry_time"),
                stop_loss: decimal_to_f64(row.get("stop_loss"))?,
                take_profit_levels,
                dry_run: row.get("dry_run"),
            });
        }

        tracing::info!("Loaded {} positions from Postgres", positions.len());

        Ok(positions)
    }

    pub async fn load_open_positions(&self) -> Result<Vec<Position>> {
        Ok(self
            .load_positions()
            .await?
            .into_iter()
            .filter(|p| p.status == PositionStatus::Open)
            .collect())
    }

    // ============== Trades ==============

    /// Record a fill as a trade, keyed by exchange order id.
    ///
    /// Atomic find-or-create: re-processing the same order id returns the
    /// existing row and never inserts a duplicate.
    pub async fn find_or_create_trade(
        &self,
        position_id: Uuid,
        kind: TradeKind,
        fill: &Fill,
        metadata: serde_json::Value,
    ) -> Result<Trade> {
        let kind_str = trade_kind_str(kind);

        // INSERT .. ON CONFLICT DO NOTHING, then read back whichever row
        // owns the order id. Losing the race still returns the winner's row.
        sqlx::query(
            r#"
            INSERT INTO trades (
                id, position_id, kind, price, quantity, status,
                exchange_order_id, executed_at, metadata
            )
            VALUES ($1, $2, $3, $4, $5, 'executed', $6, $7, $8)
            ON CONFLICT (exchange_order_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(position_id)
        .bind(kind_str)
        .bind(fill.price)
        .bind(fill.quantity)
        .bind(&fill.exchange_order_id)
        .bind(fill.executed_at)
        .bind(metadata)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(
            r#"
            SELECT id, position_id, kind, price, quantity, status,
                   exchange_order_id, executed_at, metadata
            FROM trades
            WHERE exchange_order_id = $1
            "#,
        )
        .bind(&fill.exchange_order_id)
        .fetch_one(&self.pool)
        .await?;

        trade_from_row(&row)
    }

    /// Persist an already-recorded trade; a duplicate order id is a no-op
    pub async fn save_trade(&self, trade: &Trade) -> Result<()> {
        let status_str = match trade.status {
            TradeStatus::Pending => "pending",
            TradeStatus::Executed => "executed",
            TradeStatus::Failed => "failed",
        };

        sqlx::query(
            r#"
            INSERT INTO trades (
                id, position_id, kind, price, quantity, status,
                exchange_order_id, executed_at, metadata
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (exchange_order_id) DO NOTHING
            "#,
        )
        .bind(trade.id)
        .bind(trade.position_id)
        .bind(trade_kind_str(trade.kind))
        .bind(trade.price)
        .bind(trade.quantity)
        .bind(status_str)
        .bind(&trade.exchange_order_id)
        .bind(trade.executed_at)
        .bind(&trade.metadata)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn load_trades(&self, position_id: Uuid) -> Result<Vec<Trade>> {
        let rows = sqlx::query(
            r#"
            SELECT id, position_id, kind, price, quantity, status,
                   exchange_order_id, executed_at, metadata
            FROM trades
            WHERE position_id = $1
            ORDER BY executed_at ASC
            "#,
        )
        .bind(position_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(trade_from_row).collect()
    }

    pub async fn load_all_trades(&self) -> Result<Vec<Trade>> {
        let rows = sqlx::query(
            r#"
            SELECT id, position_id, kind, price, quantity, status,
                   exchange_order_id, executed_at, metadata
            FROM trades
            ORDER BY executed_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(trade_from_row).collect()
    }

    /// Delete everything (testing only)
    #[cfg(test)]
    pub async fn clear_all(&self) -> Result<()> {
        sqlx::query("DELETE FROM trades").execute(&self.pool).await?;
        sqlx::query("DELETE FROM positions").execute(&self.pool).await?;
        sqlx::query("DELETE FROM listings").execute(&self.pool).await?;
        Ok(())
    }
}

fn trade_kind_str(kind: TradeKind) -> &'static str {
    match kind {
        TradeKind::Entry => "entry",
        TradeKind::Exit => "exit",
    }
}

fn decimal_to_f64(value: Decimal) -> Result<f64> {
    value
        .to_f64()
        .ok_or_else(|| format!("decimal out of f64 range: {}", value).into())
}

fn trade_from_row(row: &sqlx::postgres::PgRow) -> Result<Trade> {
    let kind_str: String = row.get("kind");
    let kind = match kind_str.as_str() {
        "entry" => TradeKind::Entry,
        "exit" => TradeKind::Exit,
        _ => return Err("invalid trade kind".into()),
    };

    let status_str: String = row.get("status");
    let status = match status_str.as_str() {
        "pending" => TradeStatus::Pending,
        "executed" => TradeStatus::Executed,
        "failed" => TradeStatus::Failed,
        _ => return Err("invalid trade status".into()),
    };

    let executed_at: Option<DateTime<Utc>> = row.get("executed_at");

    Ok(Trade {
        id: row.get("id"),
        position_id: row.get("position_id"),
        kind,
        price: decimal_to_f64(row.get("price"))?,
        quantity: decimal_to_f64(row.get("quantity"))?,
        status,
        exchange_order_id: row.get("exchange_order_id"),
        executed_at,
        metadata: row.get("metadata"),
    })
}

// These tests need a running Postgres with DATABASE_URL set; they exercise
// the same pool the bot uses, so they stay ignored by default.
#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LevelStatus, OrderSide};

    async fn connect() -> PostgresPersistence {
        let url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/listingbot_test".to_string());
        PostgresPersistence::new(&url).await.unwrap()
    }

    fn sample_fill(order_id: &str) -> Fill {
        Fill {
            symbol: "NEWUSDT".to_string(),
            side: OrderSide::Buy,
            price: 1.25,
            quantity: 100.0,
            exchange_order_id: order_id.to_string(),
            executed_at: Utc::now(),
            dry_run: true,
        }
    }

    #[tokio::test]
    #[ignore] // Requires Postgres
    async fn test_listing_round_trip() {
        let db = connect().await;
        db.clear_all().await.unwrap();

        let record = ListingRecord {
            symbol: "NEWUSDT".to_string(),
            first_seen_at: Utc::now(),
            last_seen_at: Some(Utc::now()),
            is_active: true,
        };
        db.save_listing(&record).await.unwrap();

        let loaded = db.load_listings().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].symbol, "NEWUSDT");
        assert!(loaded[0].is_active);
    }

    #[tokio::test]
    #[ignore] // Requires Postgres
    async fn test_position_round_trip() {
        let db = connect().await;
        db.clear_all().await.unwrap();

        let position = Position {
            id: Uuid::new_v4(),
            symbol: "NEWUSDT".to_string(),
            entry_price: 1.25,
            quantity: 100.0,
            status: PositionStatus::Open,
            entry_time: Utc::now(),
            stop_loss: 1.1875,
            take_profit_levels: vec![TakeProfitLevel {
                price: 1.375,
                percentage: 10.0,
                status: LevelStatus::Pending,
            }],
            dry_run: true,
        };
        db.save_position(&position).await.unwrap();

        let loaded = db.load_open_positions().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, position.id);
        assert_eq!(loaded[0].take_profit_levels.len(), 1);
    }

    #[tokio::test]
    #[ignore] // Requires Postgres
    async fn test_find_or_create_trade_is_idempotent() {
        let db = connect().await;
        db.clear_all().await.unwrap();

        let position = Position {
            id: Uuid::new_v4(),
            symbol: "NEWUSDT".to_string(),
            entry_price: 1.25,
            quantity: 100.0,
            status: PositionStatus::Open,
            entry_time: Utc::now(),
            stop_loss: 1.1875,
            take_profit_levels: vec![],
            dry_run: true,
        };
        db.save_position(&position).await.unwrap();

        let fill = sample_fill("sim-abc");
        let first = db
            .find_or_create_trade(position.id, TradeKind::Entry, &fill, serde_json::json!({}))
            .await
            .unwrap();
        let second = db
            .find_or_create_trade(position.id, TradeKind::Entry, &fill, serde_json::json!({}))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(db.load_trades(position.id).await.unwrap().len(), 1);
    }
}
