use chrono::{Duration, TimeZone, Utc};
use listingbot::execution::{OrderExecutor, PositionConfig, PositionManager, SimulatedExecutor};
use listingbot::models::{
    Candle, LevelStatus, OrderRequest, OrderSide, OrderType, PositionStatus, TradeKind,
};
use listingbot::registry::ListingRegistry;
use listingbot::signal::{SellDecision, SignalEvaluator};
use std::collections::HashSet;

/// Build an hourly candle series that satisfies every buy condition under
/// the default thresholds: a steady rise with two shallow dips (so RSI is
/// strong but defined), a closing volume spike, and no upper wick on the
/// final candle.
fn bullish_series() -> Vec<Candle> {
    let start = Utc.with_ymd_and_hms(2024, 5, 14, 0, 0, 0).unwrap();
    let mut close = 1.0;
    let mut candles = Vec::new();

    for i in 0..24 {
        // Small pullbacks at two points, otherwise +1% per candle
        let delta = if i == 8 || i == 16 { -0.002 } else { 0.01 };
        let open = close;
        close += delta;

        let is_last = i == 23;
        candles.push(Candle {
            open_time: start + Duration::hours(i),
            open,
            // Last candle closes on its high: no upper wick to reject
            high: if is_last { close } else { close.max(open) * 1.001 },
            low: open.min(close) * 0.999,
            close,
            volume: if is_last { 5000.0 } else { 1000.0 },
            close_time: start + Duration::hours(i + 1) - Duration::seconds(1),
            quote_volume: 1000.0,
        });
    }

    candles
}

#[tokio::test]
async fn test_listing_to_closed_position_cycle() {
    println!("=== Listing-to-exit engine cycle (simulated capital) ===\n");

    // 1. A fresh symbol appears on the exchange
    println!("1. Reconciling listings...");
    let mut registry = ListingRegistry::new();
    let now = Utc::now();

    let active: HashSet<String> = ["NEWUSDT".to_string()].into_iter().collect();
    let report = registry.reconcile(&active, now);
    assert_eq!(report.newly_seen, vec!["NEWUSDT"]);
    assert!(registry.is_new("NEWUSDT", now));
    println!("   ✓ NEWUSDT recorded as newly seen");

    // 2. Indicators qualify the listing for entry
    println!("\n2. Evaluating entry conditions...");
    let mut evaluator = SignalEvaluator::default();
    let candles = bullish_series();

    let snapshot = evaluator.snapshot(&candles).unwrap();
    println!(
        "   RSI {:.1}, price {:.4} vs VWAP {:.4}, volume {:.0} vs MA {:.0}",
        snapshot.rsi, snapshot.current_price, snapshot.vwap, snapshot.volume, snapshot.volume_ma
    );
    assert!(snapshot.rsi > 55.0);
    assert!(snapshot.current_price > snapshot.vwap);

    assert!(evaluator.evaluate_buy(&snapshot, None));
    // A weak advisory score vetoes the same snapshot
    assert!(!evaluator.evaluate_buy(&snapshot, Some(40)));
    println!("   ✓ Buy signal with confidence gate behaving");

    let relaxed = evaluator.record_cycle(1);
    assert!(!relaxed);

    // 3. Simulated entry fill opens a position
    println!("\n3. Opening position via simulated executor...");
    let executor = SimulatedExecutor::new();
    let mut pm = PositionManager::new(PositionConfig::default());

    let entry_price = snapshot.current_price;
    let entry_fill = executor
        .place_order(&OrderRequest {
            symbol: "NEWUSDT".to_string(),
            side: OrderSide::Buy,
            order_type: OrderType::Market,
            quantity: 1000.0,
            price: Some(entry_price),
        })
        .await
        .unwrap();
    assert!(entry_fill.dry_run);

    let position_id = pm.open_position("NEWUSDT", &entry_fill, now).unwrap();
    let position = pm.position(position_id).unwrap();
    println!(
        "   ✓ Opened @ {:.4}, stop {:.4}, ladder {:?}",
        position.entry_price,
        position.stop_loss,
        position
            .take_profit_levels
            .iter()
            .map(|l| l.price)
            .collect::<Vec<_>>()
    );

    // A second buy signal (fresh order) cannot double the position
    let second_fill = executor
        .place_order(&OrderRequest {
            symbol: "NEWUSDT".to_string(),
            side: OrderSide::Buy,
            order_type: OrderType::Market,
            quantity: 1000.0,
            price: Some(entry_price),
        })
        .await
        .unwrap();
    let duplicate = pm.open_position("NEWUSDT", &second_fill, now).unwrap();
    assert_eq!(duplicate, position_id);
    assert_eq!(pm.open_positions().len(), 1);

    // 4. Price reaches the first ladder level
    println!("\n4. Price reaches the first take-profit level...");
    let first_level_price = pm.position(position_id).unwrap().take_profit_levels[0].price;
    let tp_price = first_level_price + entry_price * 0.01;
    let max_hold = pm.max_hold();

    let decision =
        SignalEvaluator::evaluate_sell(pm.position(position_id).unwrap(), tp_price, now, max_hold)
            .unwrap();
    assert_eq!(decision, SellDecision::TakeProfit { level_index: 0 });

    let tp_quantity = pm.position(position_id).unwrap().quantity_for_level(0);
    assert_eq!(tp_quantity, 100.0);

    let tp_fill = executor
        .place_order(&OrderRequest {
            symbol: "NEWUSDT".to_string(),
            side: OrderSide::Sell,
            order_type: OrderType::Market,
            quantity: tp_quantity,
            price: Some(tp_price),
        })
        .await
        .unwrap();
    pm.apply_partial_exit(position_id, 0, &tp_fill).unwrap();

    let position = pm.position(position_id).unwrap();
    assert_eq!(position.quantity, 900.0);
    assert_eq!(position.take_profit_levels[0].status, LevelStatus::Executed);
    assert_eq!(position.status, PositionStatus::Open);
    println!("   ✓ Partial exit: 10% sold, 900 remaining");

    // Re-processing the same fill is a no-op
    pm.apply_partial_exit(position_id, 0, &tp_fill).unwrap();
    assert_eq!(pm.position(position_id).unwrap().quantity, 900.0);

    // 5. Price collapses through the stop
    println!("\n5. Price collapses through the stop...");
    let stop_price = pm.position(position_id).unwrap().stop_loss - entry_price * 0.01;

    let decision = SignalEvaluator::evaluate_sell(
        pm.position(position_id).unwrap(),
        stop_price,
        now,
        max_hold,
    )
    .unwrap();
    assert_eq!(decision, SellDecision::StopLoss);

    let stop_fill = executor
        .place_order(&OrderRequest {
            symbol: "NEWUSDT".to_string(),
            side: OrderSide::Sell,
            order_type: OrderType::Market,
            quantity: 900.0,
            price: Some(stop_price),
        })
        .await
        .unwrap();
    pm.apply_full_exit(
        position_id,
        &stop_fill,
        listingbot::execution::ExitReason::StopLoss,
    )
    .unwrap();

    let position = pm.position(position_id).unwrap();
    assert_eq!(position.status, PositionStatus::Closed);

    let exits: Vec<_> = pm
        .trades_for(position_id)
        .iter()
        .filter(|t| t.kind == TradeKind::Exit)
        .collect();
    assert_eq!(exits.len(), 2);
    assert_eq!(exits[1].quantity, 900.0);
    println!(
        "   ✓ Closed by stop-loss, realized {:.2}% across {} exits",
        pm.realized_profit_pct(position_id),
        exits.len()
    );

    // 6. The symbol can be traded again once closed, but a replayed entry
    //    fill still maps to the original position
    println!("\n6. Reopening after close...");
    let replayed = pm.open_position("NEWUSDT", &entry_fill, now).unwrap();
    assert_eq!(replayed, position_id);

    let fresh_fill = executor
        .place_order(&OrderRequest {
            symbol: "NEWUSDT".to_string(),
            side: OrderSide::Buy,
            order_type: OrderType::Market,
            quantity: 500.0,
            price: Some(stop_price),
        })
        .await
        .unwrap();
    let reopened = pm.open_position("NEWUSDT", &fresh_fill, now).unwrap();
    assert_ne!(reopened, position_id);
    println!("   ✓ Fresh position allowed after the prior one closed");

    println!("\n=== Engine cycle complete ✅ ===");
}

#[tokio::test]
async fn test_threshold_relaxation_over_dry_cycles() {
    println!("=== Adaptive threshold relaxation across dry cycles ===\n");

    let mut evaluator = SignalEvaluator::default();
    assert_eq!(evaluator.thresholds().rsi_threshold, 55.0);

    // Two dry cycles change nothing
    assert!(!evaluator.record_cycle(0));
    assert!(!evaluator.record_cycle(0));
    assert_eq!(evaluator.thresholds().rsi_threshold, 55.0);

    // Third dry cycle relaxes, entitling one immediate retry
    assert!(evaluator.record_cycle(0));
    assert_eq!(evaluator.thresholds().rsi_threshold, 53.0);
    assert!((evaluator.thresholds().volume_spike_multiplier - 1.08).abs() < 1e-9);
    assert!((evaluator.thresholds().upper_wick_pct - 4.2).abs() < 1e-9);
    println!("✓ Relax steps applied after three dry cycles");

    // Drain until the clamps engage
    for _ in 0..20 {
        evaluator.record_cycle(0);
    }
    assert_eq!(evaluator.thresholds().rsi_threshold, 40.0);
    assert_eq!(evaluator.thresholds().volume_spike_multiplier, 1.05);
    assert_eq!(evaluator.thresholds().upper_wick_pct, 5.0);
    println!("✓ Floors and ceiling hold");

    // A productive cycle resets everything to base
    assert!(!evaluator.record_cycle(3));
    assert_eq!(evaluator.thresholds().rsi_threshold, 55.0);
    assert_eq!(evaluator.thresholds().volume_spike_multiplier, 1.2);
    assert_eq!(evaluator.thresholds().upper_wick_pct, 4.0);
    println!("✓ Reset to base after signals returned");
}

#[tokio::test]
async fn test_registry_week_window_against_series_of_polls() {
    println!("=== Rolling new-listing window across polls ===\n");

    let mut registry = ListingRegistry::new();
    let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

    let active: HashSet<String> = ["FRESHUSDT".to_string()].into_iter().collect();
    registry.reconcile(&active, t0);

    // Re-qualifies on every poll during its first week
    for day in 0..=7 {
        assert!(
            registry.is_new("FRESHUSDT", t0 + Duration::days(day)),
            "day {} should still be new",
            day
        );
    }
    assert!(!registry.is_new("FRESHUSDT", t0 + Duration::days(8)));
    println!("✓ New for seven days, established afterwards");

    // Established symbols keep their first_seen through repeated polls
    let later = t0 + Duration::days(30);
    registry.reconcile(&active, later);
    assert_eq!(registry.get("FRESHUSDT").unwrap().first_seen_at, t0);
    assert_eq!(registry.get("FRESHUSDT").unwrap().last_seen_at, Some(later));
    println!("✓ first_seen stable, last_seen refreshed");
}
