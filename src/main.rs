use chrono::Utc;
use clap::Parser;
use listingbot::analysis::ChartAnalyzer;
use listingbot::config::{Cli, Settings};
use listingbot::db::PostgresPersistence;
use listingbot::error::EngineError;
use listingbot::execution::{
    calculate_position_size, ExitReason, LiveExecutor, OrderExecutor, PositionConfig,
    PositionManager, SimulatedExecutor,
};
use listingbot::feed::{BinanceClient, MarketFeed, StreamEvent};
use listingbot::models::{
    AssetBalance, Candle, OrderRequest, OrderSide, OrderType, Position,
};
use listingbot::notify::{self, TelegramNotifier};
use listingbot::registry::ListingRegistry;
use listingbot::signal::{SellDecision, SignalEvaluator};
use listingbot::Result;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Duration, Instant};

const CANDLE_INTERVAL: &str = "1h";
const CANDLE_LIMIT: u32 = 24;
const STREAM_INTERVALS: &[&str] = &["1m", "3m"];
const STREAM_CHANNEL_CAPACITY: usize = 256;

// ============================================================================
// Shared State
// ============================================================================

struct SharedState {
    registry: Mutex<ListingRegistry>,
    evaluator: Mutex<SignalEvaluator>,
    // Single lock serializes every position mutation: exit evaluation and
    // entry recording for a symbol can never interleave mid-flight
    position_manager: Mutex<PositionManager>,
    executor: Arc<dyn OrderExecutor>,
    analyzer: Option<ChartAnalyzer>,
    notifier: Option<TelegramNotifier>,
    settings: Settings,
    quote_asset: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let settings = Settings::from_env(cli.dry_run)?;

    tracing::info!(
        "🚀 ListingBot starting ({} mode, quote asset {})",
        if cli.dry_run { "dry-run" } else { "live" },
        cli.quote_asset
    );

    let client = BinanceClient::new(settings.api_key.clone(), settings.api_secret.clone());

    // Restore committed state
    let postgres = connect_to_postgres(settings.database_url.as_deref()).await;
    let registry = restore_registry(postgres.as_ref()).await;
    let position_manager = restore_position_manager(postgres.as_ref()).await;

    let executor: Arc<dyn OrderExecutor> = if cli.dry_run {
        Arc::new(SimulatedExecutor::new())
    } else {
        Arc::new(LiveExecutor::new(client.clone()))
    };

    let analyzer = ChartAnalyzer::from_backend(cli.analysis_backend.0);
    if analyzer.is_none() {
        tracing::info!("Chart analysis disabled, trading on indicators alone");
    }

    let notifier = TelegramNotifier::from_env();
    if notifier.is_none() {
        tracing::info!("Telegram credentials absent, notifications disabled");
    }

    let state = Arc::new(SharedState {
        registry: Mutex::new(registry),
        evaluator: Mutex::new(SignalEvaluator::default()),
        position_manager: Mutex::new(position_manager),
        executor,
        analyzer,
        notifier,
        settings: settings.clone(),
        quote_asset: cli.quote_asset.clone(),
    });

    tracing::info!("\n🔄 Spawning independent loops...");

    let (stream_tx, stream_rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);

    // Loop 1: listing reconciliation + per-cycle evaluation
    let reconcile_task = {
        let state = state.clone();
        let client = client.clone();
        let database_url = settings.database_url.clone();
        let interval_minutes = cli.reconcile_interval_minutes;
        tokio::spawn(async move {
            reconcile_loop(state, client, database_url, interval_minutes, stream_tx).await;
        })
    };

    // Loop 2: realtime evaluation of streamed candle closes
    let stream_task = {
        let state = state.clone();
        let client = client.clone();
        let database_url = settings.database_url.clone();
        tokio::spawn(async move {
            stream_evaluation_loop(state, client, database_url, stream_rx).await;
        })
    };

    // Loop 3: exit monitoring for open positions
    let exit_task = {
        let state = state.clone();
        let client = client.clone();
        let database_url = settings.database_url.clone();
        let interval_secs = cli.exit_check_interval_secs;
        tokio::spawn(async move {
            exit_monitor_loop(state, client, database_url, interval_secs).await;
        })
    };

    tracing::info!("✅ All loops spawned");
    tracing::info!("  🔍 Reconcile: every {} min", cli.reconcile_interval_minutes);
    tracing::info!("  💹 Stream evaluation: on candle close");
    tracing::info!("  🚪 Exit checks: every {}s", cli.exit_check_interval_secs);
    tracing::info!("\nPress Ctrl+C to stop...\n");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("\n⚠️  Received Ctrl+C, shutting down...");
        }
        result = reconcile_task => {
            tracing::error!("Reconcile loop exited: {:?}", result);
        }
        result = stream_task => {
            tracing::error!("Stream evaluation loop exited: {:?}", result);
        }
        result = exit_task => {
            tracing::error!("Exit monitor loop exited: {:?}", result);
        }
    }

    tracing::info!("👋 ListingBot stopped");
    Ok(())
}

// ============================================================================
// Initialization
// ============================================================================

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "listingbot=info".into()),
        )
        .init();
}

async fn connect_to_postgres(database_url: Option<&str>) -> Option<PostgresPersistence> {
    let url = database_url?;

    match PostgresPersistence::new(url).await {
        Ok(p) => Some(p),
        Err(e) => {
            tracing::warn!(
                "Failed to connect to Postgres ({}), continuing without persistence",
                e
            );
            None
        }
    }
}

async fn restore_registry(postgres: Option<&PostgresPersistence>) -> ListingRegistry {
    let Some(postgres) = postgres else {
        return ListingRegistry::new();
    };

    match postgres.load_listings().await {
        Ok(records) if !records.is_empty() => {
            tracing::info!("✓ Restored {} listing records", records.len());
            ListingRegistry::with_records(records)
        }
        Ok(_) => ListingRegistry::new(),
        Err(e) => {
            tracing::warn!("Failed to load listings: {}", e);
            ListingRegistry::new()
        }
    }
}

async fn restore_position_manager(postgres: Option<&PostgresPersistence>) -> PositionManager {
    let Some(postgres) = postgres else {
        return PositionManager::new(PositionConfig::default());
    };

    let positions = match postgres.load_positions().await {
        Ok(positions) => positions,
        Err(e) => {
            tracing::warn!("Failed to load positions: {}", e);
            return PositionManager::new(PositionConfig::default());
        }
    };
    let trades = match postgres.load_all_trades().await {
        Ok(trades) => trades,
        Err(e) => {
            tracing::warn!("Failed to load trades: {}", e);
            Vec::new()
        }
    };

    PositionManager::with_state(PositionConfig::default(), positions, trades)
}

// ============================================================================
// Loop 1: Listing Reconciliation
// ============================================================================

/// Polls exchange metadata, reconciles the listing ledger, manages stream
/// subscriptions for new listings and evaluates entries once per tick.
///
/// The loop body runs to completion before the next tick fires (missed
/// ticks are skipped), so reconcile passes never overlap.
async fn reconcile_loop(
    state: Arc<SharedState>,
    client: BinanceClient,
    database_url: Option<String>,
    interval_minutes: u64,
    stream_tx: mpsc::Sender<StreamEvent>,
) {
    tracing::info!("🔍 Reconcile loop starting...");

    let mut feed = MarketFeed::new(client);
    let postgres = connect_to_postgres(database_url.as_deref()).await;

    let mut ticker = interval_at(
        Instant::now(),
        Duration::from_secs(interval_minutes * 60),
    );
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        tracing::info!("🔍 [RECONCILE] Tick at {}", Utc::now().format("%H:%M:%S"));

        match run_monitor_cycle(&state, &mut feed, postgres.as_ref(), &stream_tx).await {
            Ok(candidates) => {
                tracing::info!("  ✓ Cycle complete, {} candidate symbols", candidates);
            }
            Err(EngineError::RateLimited { retry_after_secs }) => {
                let wait = retry_after_secs.unwrap_or(60);
                tracing::warn!("  ✗ Rate limited, backing off {}s before next poll", wait);
                tokio::time::sleep(Duration::from_secs(wait)).await;
            }
            Err(e) => {
                tracing::error!("  ✗ Reconcile cycle failed: {}", e);
            }
        }
    }
}

/// One scheduler tick: reconcile, manage subscriptions, evaluate each
/// candidate. A relaxation grants exactly one immediate re-evaluation.
async fn run_monitor_cycle(
    state: &Arc<SharedState>,
    feed: &mut MarketFeed,
    postgres: Option<&PostgresPersistence>,
    stream_tx: &mpsc::Sender<StreamEvent>,
) -> std::result::Result<usize, EngineError> {
    let now = Utc::now();
    let symbols = feed.list_active_symbols(&state.quote_asset).await?;
    let active: HashSet<String> = symbols.iter().map(|s| s.symbol.clone()).collect();

    let report = {
        let mut registry = state.registry.lock().unwrap();
        registry.reconcile(&active, now)
    };

    if !report.newly_seen.is_empty() {
        tracing::info!("  🆕 Newly seen: {}", report.newly_seen.join(", "));
    }
    if !report.newly_inactive.is_empty() {
        tracing::info!("  💤 Newly inactive: {}", report.newly_inactive.join(", "));
    }

    persist_reconcile_outcome(state, postgres, &report.newly_seen, &report.newly_inactive).await;

    // Announce genuinely new listings with their early growth
    for symbol in &report.newly_seen {
        let growth = growth_percentage(feed, symbol).await;
        if let Some(notifier) = &state.notifier {
            let base_asset = symbols
                .iter()
                .find(|s| &s.symbol == symbol)
                .map(|s| s.base_asset.as_str())
                .unwrap_or("");
            notifier
                .notify(&notify::format_new_listing(symbol, base_asset, growth))
                .await;
        }
    }

    // Candidates: everything inside the rolling "new listing" window
    let candidates: Vec<String> = {
        let registry = state.registry.lock().unwrap();
        symbols
            .iter()
            .map(|s| s.symbol.clone())
            .filter(|s| registry.is_new(s, now))
            .collect()
    };

    // Streams follow the candidate set; the exchange-wide ticker stream is
    // reopened here whenever it has died
    feed.subscribe_ticker(stream_tx.clone());
    for symbol in &candidates {
        feed.subscribe_klines(symbol, STREAM_INTERVALS, stream_tx.clone());
    }
    for symbol in &report.newly_inactive {
        feed.unsubscribe(symbol);
    }
    for symbol in feed.subscribed_symbols() {
        if !candidates.contains(&symbol) {
            feed.unsubscribe(&symbol);
        }
    }

    let qualifying = evaluate_candidates(state, feed, postgres, &candidates, None).await;

    let relaxed = {
        let mut evaluator = state.evaluator.lock().unwrap();
        evaluator.record_cycle(qualifying)
    };
    if relaxed {
        // Bounded retry: one immediate pass with the relaxed thresholds
        let retry_qualifying =
            evaluate_candidates(state, feed, postgres, &candidates, None).await;
        let mut evaluator = state.evaluator.lock().unwrap();
        evaluator.record_cycle(retry_qualifying);
    }

    Ok(candidates.len())
}

async fn persist_reconcile_outcome(
    state: &Arc<SharedState>,
    postgres: Option<&PostgresPersistence>,
    newly_seen: &[String],
    newly_inactive: &[String],
) {
    let Some(postgres) = postgres else { return };

    let changed: Vec<_> = {
        let registry = state.registry.lock().unwrap();
        newly_seen
            .iter()
            .chain(newly_inactive.iter())
            .filter_map(|s| registry.get(s).cloned())
            .collect()
    };

    for record in changed {
        if let Err(e) = postgres.save_listing(&record).await {
            tracing::warn!("Failed to persist listing {}: {}", record.symbol, e);
        }
    }
}

/// Percent change from the first to the last close of the fetched window
async fn growth_percentage(feed: &MarketFeed, symbol: &str) -> Option<f64> {
    let candles = feed
        .get_candles(symbol, CANDLE_INTERVAL, CANDLE_LIMIT)
        .await
        .ok()?;
    let first = candles.first()?.close;
    let last = candles.last()?.close;
    if first <= 0.0 {
        return None;
    }
    Some((last - first) / first * 100.0)
}

// ============================================================================
// Evaluation
// ============================================================================

/// Evaluate every candidate, isolating per-symbol failures. Returns the
/// number of symbols that produced a buy signal.
async fn evaluate_candidates(
    state: &Arc<SharedState>,
    feed: &MarketFeed,
    postgres: Option<&PostgresPersistence>,
    candidates: &[String],
    extra_candle: Option<(&str, &Candle)>,
) -> usize {
    let mut qualifying = 0;

    for symbol in candidates {
        let extra = extra_candle.and_then(|(s, c)| (s == symbol.as_str()).then_some(c));
        match evaluate_symbol(state, feed, symbol, extra).await {
            Ok(true) => {
                qualifying += 1;
                try_enter(state, feed, postgres, symbol).await;
            }
            Ok(false) => {}
            Err(EngineError::InsufficientData { have, need }) => {
                tracing::debug!(
                    "  {} skipped: {} candles, need {}",
                    symbol,
                    have,
                    need
                );
            }
            Err(EngineError::RateLimited { .. }) => {
                tracing::warn!("  Rate limited while evaluating {}, ending cycle", symbol);
                break;
            }
            Err(e) => {
                tracing::warn!("  {} evaluation failed: {}", symbol, e);
            }
        }
    }

    qualifying
}

/// Compute indicators for a symbol and apply the buy rule
async fn evaluate_symbol(
    state: &Arc<SharedState>,
    feed: &MarketFeed,
    symbol: &str,
    extra_candle: Option<&Candle>,
) -> std::result::Result<bool, EngineError> {
    let mut candles = feed
        .get_candles(symbol, CANDLE_INTERVAL, CANDLE_LIMIT)
        .await?;
    if let Some(candle) = extra_candle {
        candles.push(candle.clone());
    }

    let snapshot = {
        let evaluator = state.evaluator.lock().unwrap();
        evaluator.snapshot(&candles)?
    };

    let confidence = match &state.analyzer {
        Some(analyzer) => analyzer.confidence(symbol, &candles).await,
        None => None,
    };

    let evaluator = state.evaluator.lock().unwrap();
    Ok(evaluator.evaluate_buy(&snapshot, confidence))
}

/// Size, place and record an entry order for a buy signal
async fn try_enter(
    state: &Arc<SharedState>,
    feed: &MarketFeed,
    postgres: Option<&PostgresPersistence>,
    symbol: &str,
) {
    // Duplicate signals die here before any order goes out
    if state.position_manager.lock().unwrap().has_open_position(symbol) {
        tracing::debug!("  {} already has an open position, skipping entry", symbol);
        return;
    }

    let price = match feed.ticker_price(symbol).await {
        Ok(price) => price,
        Err(e) => {
            tracing::warn!("  {} price fetch failed before entry: {}", symbol, e);
            return;
        }
    };

    let balances = if state.executor.is_dry_run() {
        vec![AssetBalance {
            asset: state.quote_asset.clone(),
            free: state.settings.dry_run_quote_balance,
        }]
    } else {
        match feed.client().account_balances().await {
            Ok(balances) => balances,
            Err(e) => {
                tracing::warn!("  Balance fetch failed: {}", e);
                return;
            }
        }
    };

    let lot_step = feed
        .symbol_meta(symbol)
        .await
        .ok()
        .flatten()
        .and_then(|m| m.lot_step_size());

    let quantity = calculate_position_size(
        &balances,
        &state.quote_asset,
        price,
        state.settings.risk_pct,
        lot_step,
    );
    if quantity <= 0.0 {
        tracing::warn!("  {} entry skipped: nothing to spend", symbol);
        return;
    }

    let request = OrderRequest {
        symbol: symbol.to_string(),
        side: OrderSide::Buy,
        order_type: OrderType::Market,
        quantity,
        price: Some(price),
    };

    let fill = match state.executor.place_order(&request).await {
        Ok(fill) => fill,
        Err(e) => {
            // No fill happened; the next evaluation cycle retries
            tracing::warn!("  {} entry order failed: {}", symbol, e);
            return;
        }
    };

    let (position, trade) = {
        let mut pm = state.position_manager.lock().unwrap();
        match pm.open_position(symbol, &fill, Utc::now()) {
            Ok(id) => (
                pm.position(id).cloned(),
                pm.trades_for(id).last().cloned(),
            ),
            Err(e) => {
                tracing::error!("  ✗ Failed to record position for {}: {}", symbol, e);
                return;
            }
        }
    };

    if let Some(position) = &position {
        persist_position(postgres, position).await;
    }
    if let Some(trade) = &trade {
        if let Some(postgres) = postgres {
            if let Err(e) = postgres.save_trade(trade).await {
                tracing::warn!("Failed to persist trade: {}", e);
            }
        }
    }

    if let Some(notifier) = &state.notifier {
        notifier
            .notify(&notify::format_entry(
                symbol,
                fill.price,
                fill.quantity,
                fill.dry_run,
            ))
            .await;
    }
}

async fn persist_position(postgres: Option<&PostgresPersistence>, position: &Position) {
    if let Some(postgres) = postgres {
        if let Err(e) = postgres.save_position(position).await {
            tracing::warn!("Failed to persist position {}: {}", position.id, e);
        }
    }
}

// ============================================================================
// Loop 2: Stream Evaluation
// ============================================================================

/// Reacts to closed candles from the kline streams: evaluates an entry for
/// the candle's symbol using the freshest data available.
async fn stream_evaluation_loop(
    state: Arc<SharedState>,
    client: BinanceClient,
    database_url: Option<String>,
    mut stream_rx: mpsc::Receiver<StreamEvent>,
) {
    tracing::info!("💹 Stream evaluation loop starting...");

    let feed = MarketFeed::new(client);
    let postgres = connect_to_postgres(database_url.as_deref()).await;

    // Debounce per-symbol ticker evaluations; the exchange-wide stream
    // fires every second for every symbol
    let mut last_ticker_eval: std::collections::HashMap<String, Instant> =
        std::collections::HashMap::new();
    const TICKER_EVAL_DEBOUNCE: Duration = Duration::from_secs(60);

    while let Some(event) = stream_rx.recv().await {
        match event {
            StreamEvent::Ticker { symbol, price } => {
                let is_new = {
                    let registry = state.registry.lock().unwrap();
                    registry.is_new(&symbol, Utc::now())
                };
                if !is_new {
                    continue;
                }
                if state
                    .position_manager
                    .lock()
                    .unwrap()
                    .has_open_position(&symbol)
                {
                    continue;
                }
                let due = last_ticker_eval
                    .get(&symbol)
                    .map(|t| t.elapsed() >= TICKER_EVAL_DEBOUNCE)
                    .unwrap_or(true);
                if !due {
                    continue;
                }
                last_ticker_eval.insert(symbol.clone(), Instant::now());

                tracing::debug!("💹 [STREAM] ticker for new listing {} @ {}", symbol, price);
                let candidates = vec![symbol];
                evaluate_candidates(&state, &feed, postgres.as_ref(), &candidates, None).await;
            }
            StreamEvent::CandleClosed {
                symbol,
                interval,
                candle,
            } => {
                tracing::debug!(
                    "💹 [STREAM] {} {} candle closed @ {}",
                    symbol,
                    interval,
                    candle.close
                );

                let candidates = vec![symbol.clone()];
                let qualifying = evaluate_candidates(
                    &state,
                    &feed,
                    postgres.as_ref(),
                    &candidates,
                    Some((symbol.as_str(), &candle)),
                )
                .await;

                if qualifying > 0 {
                    tracing::info!("  ✓ Buy signal from {} {} stream", symbol, interval);
                }
            }
            StreamEvent::Exhausted { symbol, attempts } => {
                // Degradation, not a crash: the next reconcile tick reopens
                // the subscription
                tracing::error!(
                    "Kline stream for {} exhausted after {} attempts",
                    symbol,
                    attempts
                );
                if let Some(notifier) = &state.notifier {
                    notifier
                        .notify(&format!(
                            "⚠️ Market stream for {} lost after {} reconnect attempts",
                            symbol, attempts
                        ))
                        .await;
                }
            }
        }
    }

    tracing::warn!("Stream channel closed, evaluation loop ending");
}

// ============================================================================
// Loop 3: Exit Monitoring
// ============================================================================

/// Checks exit conditions for every open position once per tick.
///
/// Decisions follow the fixed priority (take-profit, stop-loss, timeout)
/// and at most one order per position goes out per cycle; the mutated
/// position is re-evaluated on the next tick.
async fn exit_monitor_loop(
    state: Arc<SharedState>,
    client: BinanceClient,
    database_url: Option<String>,
    interval_secs: u64,
) {
    tracing::info!("🚪 Exit monitor loop starting...");

    let postgres = connect_to_postgres(database_url.as_deref()).await;

    let mut ticker = interval_at(Instant::now(), Duration::from_secs(interval_secs));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        let open_positions: Vec<Position> = {
            let pm = state.position_manager.lock().unwrap();
            pm.open_positions().into_iter().cloned().collect()
        };
        if open_positions.is_empty() {
            continue;
        }

        tracing::info!(
            "🚪 [EXITS] Checking {} open position(s)",
            open_positions.len()
        );

        for position in open_positions {
            let price = match client.ticker_price(&position.symbol).await {
                Ok(price) => price,
                Err(EngineError::RateLimited { retry_after_secs }) => {
                    tracing::warn!(
                        "  Rate limited fetching {}, deferring remaining checks{}",
                        position.symbol,
                        retry_after_secs
                            .map(|s| format!(" ({}s)", s))
                            .unwrap_or_default()
                    );
                    break;
                }
                Err(e) => {
                    // One symbol's feed trouble must not block the others
                    tracing::warn!("  {} price fetch failed: {}", position.symbol, e);
                    continue;
                }
            };

            tracing::info!(
                "  {} @ {} (entry {}, {:+.2}%)",
                position.symbol,
                price,
                position.entry_price,
                position.unrealized_pct(price)
            );

            let max_hold = state.position_manager.lock().unwrap().max_hold();
            let Some(decision) =
                SignalEvaluator::evaluate_sell(&position, price, Utc::now(), max_hold)
            else {
                continue;
            };

            execute_exit(&state, postgres.as_ref(), &position, price, decision).await;
        }
    }
}

/// Place the sell order for an exit decision and record the outcome
async fn execute_exit(
    state: &Arc<SharedState>,
    postgres: Option<&PostgresPersistence>,
    position: &Position,
    price: f64,
    decision: SellDecision,
) {
    let quantity = match &decision {
        SellDecision::TakeProfit { level_index } => position.quantity_for_level(*level_index),
        SellDecision::StopLoss | SellDecision::Timeout => position.quantity,
    };
    if quantity <= 0.0 {
        tracing::warn!("  {} exit skipped: nothing to sell", position.symbol);
        return;
    }

    let request = OrderRequest {
        symbol: position.symbol.clone(),
        side: OrderSide::Sell,
        order_type: OrderType::Market,
        quantity,
        price: Some(price),
    };

    let fill = match state.executor.place_order(&request).await {
        Ok(fill) => fill,
        Err(e) => {
            // No state change; retried on the next cycle
            tracing::warn!("  {} exit order failed: {}", position.symbol, e);
            return;
        }
    };

    let result = {
        let mut pm = state.position_manager.lock().unwrap();
        match &decision {
            SellDecision::TakeProfit { level_index } => {
                pm.apply_partial_exit(position.id, *level_index, &fill)
            }
            SellDecision::StopLoss => {
                pm.apply_full_exit(position.id, &fill, ExitReason::StopLoss)
            }
            SellDecision::Timeout => pm.apply_full_exit(position.id, &fill, ExitReason::Timeout),
        }
    };

    if let Err(e) = result {
        tracing::error!(
            "  ✗ Failed to apply exit for {}: {}",
            position.symbol,
            e
        );
        return;
    }

    let (updated, trade) = {
        let pm = state.position_manager.lock().unwrap();
        (
            pm.position(position.id).cloned(),
            pm.trades_for(position.id).last().cloned(),
        )
    };

    if let Some(updated) = &updated {
        persist_position(postgres, updated).await;
    }
    if let Some(trade) = &trade {
        if let Some(postgres) = postgres {
            if let Err(e) = postgres.save_trade(trade).await {
                tracing::warn!("Failed to persist trade: {}", e);
            }
        }
    }

    if let Some(notifier) = &state.notifier {
        let message = match &decision {
            SellDecision::TakeProfit { level_index } => {
                let level_pct = position
                    .take_profit_levels
                    .get(*level_index)
                    .map(|l| l.percentage)
                    .unwrap_or(0.0);
                notify::format_partial_exit(&position.symbol, level_pct, fill.price, fill.quantity)
            }
            SellDecision::StopLoss => {
                notify::format_full_exit(&position.symbol, "stop_loss", fill.price, fill.quantity)
            }
            SellDecision::Timeout => {
                notify::format_full_exit(&position.symbol, "timeout", fill.price, fill.quantity)
            }
        };
        notifier.notify(&message).await;
    }
}
