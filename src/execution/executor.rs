use crate::error::EngineError;
use crate::feed::BinanceClient;
use crate::models::{AssetBalance, Fill, OrderRequest};
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

/// Places orders against real or simulated capital.
///
/// Both implementations return a `Fill` keyed by an exchange order id (or a
/// synthesized one); the position manager deduplicates on that id, so an
/// executor never needs its own retry loop. A typed error means "no fill
/// happened this cycle" and the caller retries on the next evaluation.
#[async_trait]
pub trait OrderExecutor: Send + Sync {
    async fn place_order(&self, request: &OrderRequest) -> Result<Fill, EngineError>;

    fn is_dry_run(&self) -> bool;
}

/// Signs and sends real orders to the exchange
pub struct LiveExecutor {
    client: BinanceClient,
}

impl LiveExecutor {
    pub fn new(client: BinanceClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl OrderExecutor for LiveExecutor {
    async fn place_order(&self, request: &OrderRequest) -> Result<Fill, EngineError> {
        self.client.place_order(request).await
    }

    fn is_dry_run(&self) -> bool {
        false
    }
}

/// Synthesizes immediate full fills without touching the exchange.
///
/// Fills are tagged `dry_run` so downstream records can tell simulated
/// capital from real capital.
pub struct SimulatedExecutor;

impl SimulatedExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SimulatedExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OrderExecutor for SimulatedExecutor {
    async fn place_order(&self, request: &OrderRequest) -> Result<Fill, EngineError> {
        let price = request.price.ok_or_else(|| {
            EngineError::Validation(
                "simulated orders need a reference price on the request".to_string(),
            )
        })?;
        if request.quantity <= 0.0 {
            return Err(EngineError::Validation(format!(
                "quantity must be positive, got {}",
                request.quantity
            )));
        }

        let fill = Fill {
            symbol: request.symbol.clone(),
            side: request.side,
            price,
            quantity: request.quantity,
            exchange_order_id: format!("sim-{}", Uuid::new_v4()),
            executed_at: Utc::now(),
            dry_run: true,
        };

        tracing::debug!(
            "Simulated {} fill for {}: {} @ {}",
            fill.side.as_exchange_str(),
            fill.symbol,
            fill.quantity,
            fill.price
        );

        Ok(fill)
    }

    fn is_dry_run(&self) -> bool {
        true
    }
}

/// Size an entry as a percentage of the free quote balance, rounded down to
/// the symbol's lot step. Returns 0 when there is nothing to spend.
pub fn calculate_position_size(
    balances: &[AssetBalance],
    quote_asset: &str,
    current_price: f64,
    risk_pct: f64,
    lot_step: Option<f64>,
) -> f64 {
    let free = balances
        .iter()
        .find(|b| b.asset == quote_asset)
        .map(|b| b.free)
        .unwrap_or(0.0);
    if free <= 0.0 || current_price <= 0.0 {
        return 0.0;
    }

    let risk_amount = free * (risk_pct / 100.0);
    let mut quantity = risk_amount / current_price;

    if let Some(step) = lot_step.filter(|s| *s > 0.0) {
        quantity = (quantity / step).floor() * step;
    }

    quantity
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrderSide, OrderType};

    fn market_sell(price: Option<f64>) -> OrderRequest {
        OrderRequest {
            symbol: "NEWUSDT".to_string(),
            side: OrderSide::Sell,
            order_type: OrderType::Market,
            quantity: 25.0,
            price,
        }
    }

    #[tokio::test]
    async fn test_simulated_fill_mirrors_request() {
        let executor = SimulatedExecutor::new();
        let fill = executor.place_order(&market_sell(Some(1.5))).await.unwrap();

        assert_eq!(fill.symbol, "NEWUSDT");
        assert_eq!(fill.price, 1.5);
        assert_eq!(fill.quantity, 25.0);
        assert!(fill.dry_run);
        assert!(fill.exchange_order_id.starts_with("sim-"));
    }

    #[tokio::test]
    async fn test_simulated_order_ids_are_unique() {
        let executor = SimulatedExecutor::new();
        let a = executor.place_order(&market_sell(Some(1.0))).await.unwrap();
        let b = executor.place_order(&market_sell(Some(1.0))).await.unwrap();
        assert_ne!(a.exchange_order_id, b.exchange_order_id);
    }

    #[tokio::test]
    async fn test_simulated_order_requires_price() {
        let executor = SimulatedExecutor::new();
        let result = executor.place_order(&market_sell(None)).await;
        assert!(matches!(result, Err(EngineError::Validation(_))));
    }

    #[test]
    fn test_position_size_rounds_to_lot_step() {
        let balances = vec![AssetBalance {
            asset: "USDT".to_string(),
            free: 10_000.0,
        }];

        // 5% of 10000 = 500 USDT at price 3.0 → 166.666..., lot 0.1 → 166.6
        let qty = calculate_position_size(&balances, "USDT", 3.0, 5.0, Some(0.1));
        assert!((qty - 166.6).abs() < 1e-9);
    }

    #[test]
    fn test_position_size_without_lot_filter() {
        let balances = vec![AssetBalance {
            asset: "USDT".to_string(),
            free: 1000.0,
        }];

        let qty = calculate_position_size(&balances, "USDT", 2.0, 5.0, None);
        assert_eq!(qty, 25.0);
    }

    #[test]
    fn test_position_size_zero_without_balance() {
        let balances = vec![AssetBalance {
            asset: "BTC".to_string(),
            free: 1.0,
        }];

        assert_eq!(
            calculate_position_size(&balances, "USDT", 2.0, 5.0, None),
            0.0
        );
        assert_eq!(calculate_position_size(&[], "USDT", 2.0, 5.0, None), 0.0);
    }
}
