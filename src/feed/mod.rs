// Market data access: REST client, read-through caches, kline streams
pub mod binance;
pub mod cache;
pub mod stream;

pub use binance::BinanceClient;
pub use cache::TtlCache;
pub use stream::{KlineStreamRegistry, StreamEvent};

use crate::error::EngineError;
use crate::models::{Candle, SymbolMeta};
use std::time::Duration;
use tokio::sync::mpsc;

const CACHE_TTL: Duration = Duration::from_secs(600);
const METADATA_CACHE_KEY: &str = "exchange_info";

/// Facade over exchange market data with caching and stream lifecycle
///
/// Exchange-wide metadata and candle responses are cached for ten minutes
/// to bound the request rate; concurrent metadata misses coalesce into a
/// single upstream fetch.
pub struct MarketFeed {
    client: BinanceClient,
    metadata_cache: TtlCache<String, Vec<SymbolMeta>>,
    kline_cache: TtlCache<String, Vec<Candle>>,
    metadata_fetch: tokio::sync::Mutex<()>,
    streams: KlineStreamRegistry,
}

impl MarketFeed {
    pub fn new(client: BinanceClient) -> Self {
        Self {
            client,
            metadata_cache: TtlCache::new(CACHE_TTL),
            kline_cache: TtlCache::new(CACHE_TTL),
            metadata_fetch: tokio::sync::Mutex::new(()),
            streams: KlineStreamRegistry::new(),
        }
    }

    pub fn client(&self) -> &BinanceClient {
        &self.client
    }

    /// Symbols currently tradable against the given quote asset
    pub async fn list_active_symbols(
        &self,
        quote_asset: &str,
    ) -> Result<Vec<SymbolMeta>, EngineError> {
        let all = self.exchange_info().await?;

        Ok(all
            .into_iter()
            .filter(|s| {
                s.status == "TRADING"
                    && s.quote_asset == quote_asset
                    && s.symbol.ends_with(quote_asset)
            })
            .collect())
    }

    /// Metadata for a single symbol, if listed
    pub async fn symbol_meta(&self, symbol: &str) -> Result<Option<SymbolMeta>, EngineError> {
        let all = self.exchange_info().await?;
        Ok(all.into_iter().find(|s| s.symbol == symbol))
    }

    /// Candles for a symbol, oldest first, served from cache when fresh
    pub async fn get_candles(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<Candle>, EngineError> {
        let key = format!("{}_{}_{}", symbol, interval, limit);
        if let Some(candles) = self.kline_cache.get(&key) {
            return Ok(candles);
        }

        let candles = self.client.get_klines(symbol, interval, limit).await?;
        self.kline_cache.insert(key, candles.clone());
        Ok(candles)
    }

    /// Latest traded price, never cached
    pub async fn ticker_price(&self, symbol: &str) -> Result<f64, EngineError> {
        self.client.ticker_price(symbol).await
    }

    /// Open the exchange-wide ticker subscription (best-effort)
    pub fn subscribe_ticker(&mut self, tx: mpsc::Sender<StreamEvent>) {
        self.streams.open_ticker(tx);
    }

    /// Open a closed-candle subscription for a symbol
    pub fn subscribe_klines(
        &mut self,
        symbol: &str,
        intervals: &[&str],
        tx: mpsc::Sender<StreamEvent>,
    ) {
        self.streams.open(symbol, intervals, tx);
    }

    pub fn unsubscribe(&mut self, symbol: &str) {
        self.streams.close(symbol);
    }

    pub fn subscribed_symbols(&self) -> Vec<String> {
        self.streams.open_symbols()
    }

    pub fn shutdown_streams(&mut self) {
        self.streams.close_all();
    }

    async fn exchange_info(&self) -> Result<Vec<SymbolMeta>, EngineError> {
        let key = METADATA_CACHE_KEY.to_string();
        if let Some(cached) = self.metadata_cache.get(&key) {
            return Ok(cached);
        }

        // Coalesce concurrent misses: one fetch, everyone else re-reads
        let _guard = self.metadata_fetch.lock().await;
        if let Some(cached) = self.metadata_cache.get(&key) {
            return Ok(cached);
        }

        let symbols = self.client.exchange_info().await?;
        self.metadata_cache.insert(key, symbols.clone());
        Ok(symbols)
    }
}
