use crate::models::Candle;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::Deserialize;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

const STREAM_BASE: &str = "wss://stream.binance.com:9443";
const BASE_RECONNECT_DELAY_SECS: u64 = 5;
const MAX_RECONNECT_ATTEMPTS: u32 = 5;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Reserved registry key for the exchange-wide ticker connection
const TICKER_KEY: &str = "!ticker";

/// Event delivered to stream subscribers
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A candle closed on one of the subscribed intervals
    CandleClosed {
        symbol: String,
        interval: String,
        candle: Candle,
    },
    /// Last-price update from the exchange-wide ticker stream
    Ticker { symbol: String, price: f64 },
    /// Reconnect budget spent; the subscription is dead until reopened
    Exhausted { symbol: String, attempts: u32 },
}

/// Registry of live kline stream connections, keyed by symbol
///
/// Each open subscription owns one background task with an explicit
/// lifecycle: `open` spawns it, `close` aborts it. Reconnects back off by
/// `BASE_RECONNECT_DELAY_SECS * attempt` and give up after
/// `MAX_RECONNECT_ATTEMPTS`, surfacing `StreamEvent::Exhausted` instead of
/// silently stopping.
pub struct KlineStreamRegistry {
    stream_base: String,
    connections: HashMap<String, JoinHandle<()>>,
}

impl KlineStreamRegistry {
    pub fn new() -> Self {
        Self::with_base(STREAM_BASE.to_string())
    }

    pub fn with_base(stream_base: String) -> Self {
        Self {
            stream_base,
            connections: HashMap::new(),
        }
    }

    /// Subscribe to closed-candle events for a symbol.
    ///
    /// No-op if a subscription for the symbol is already open.
    pub fn open(&mut self, symbol: &str, intervals: &[&str], tx: mpsc::Sender<StreamEvent>) {
        if let Some(handle) = self.connections.get(symbol) {
            if !handle.is_finished() {
                return;
            }
        }

        let streams: Vec<String> = intervals
            .iter()
            .map(|i| format!("{}@kline_{}", symbol.to_lowercase(), i))
            .collect();
        let url = format!("{}/stream?streams={}", self.stream_base, streams.join("/"));
        let symbol_owned = symbol.to_string();

        tracing::info!("Opening kline stream for {} ({})", symbol, streams.join(", "));

        let handle = tokio::spawn(async move {
            run_stream(symbol_owned, url, tx).await;
        });
        self.connections.insert(symbol.to_string(), handle);
    }

    /// Subscribe to the exchange-wide ticker stream (best-effort).
    ///
    /// No-op if the ticker connection is already open.
    pub fn open_ticker(&mut self, tx: mpsc::Sender<StreamEvent>) {
        if let Some(handle) = self.connections.get(TICKER_KEY) {
            if !handle.is_finished() {
                return;
            }
        }

        let url = format!("{}/ws/!ticker@arr", self.stream_base);
        tracing::info!("Opening exchange-wide ticker stream");

        let handle = tokio::spawn(async move {
            run_stream(TICKER_KEY.to_string(), url, tx).await;
        });
        self.connections.insert(TICKER_KEY.to_string(), handle);
    }

    /// Close the subscription for a symbol, aborting its task
    pub fn close(&mut self, symbol: &str) {
        if let Some(handle) = self.connections.remove(symbol) {
            handle.abort();
            tracing::info!("Closed kline stream for {}", symbol);
        }
    }

    pub fn close_all(&mut self) {
        for (symbol, handle) in self.connections.drain() {
            handle.abort();
            tracing::debug!("Closed kline stream for {}", symbol);
        }
    }

    pub fn is_open(&self, symbol: &str) -> bool {
        self.connections
            .get(symbol)
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Symbols with a live kline subscription (the ticker connection is
    /// not a symbol and is excluded)
    pub fn open_symbols(&self) -> Vec<String> {
        self.connections
            .iter()
            .filter(|(key, h)| key.as_str() != TICKER_KEY && !h.is_finished())
            .map(|(s, _)| s.clone())
            .collect()
    }
}

impl Default for KlineStreamRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Delay before reconnect attempt `attempt` (1-based)
fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_secs(BASE_RECONNECT_DELAY_SECS * attempt as u64)
}

async fn run_stream(symbol: String, url: String, tx: mpsc::Sender<StreamEvent>) {
    let mut attempts: u32 = 0;

    loop {
        let connection = match timeout(CONNECT_TIMEOUT, connect_async(url.as_str())).await {
            Ok(Ok((ws, _))) => ws,
            Ok(Err(e)) => {
                tracing::warn!("{} stream connect failed: {}", symbol, e);
                attempts += 1;
                if attempts >= MAX_RECONNECT_ATTEMPTS {
                    let _ = tx
                        .send(StreamEvent::Exhausted {
                            symbol: symbol.clone(),
                            attempts,
                        })
                        .await;
                    return;
                }
                tokio::time::sleep(backoff_delay(attempts)).await;
                continue;
            }
            Err(_) => {
                tracing::warn!("{} stream connect timed out", symbol);
                attempts += 1;
                if attempts >= MAX_RECONNECT_ATTEMPTS {
                    let _ = tx
                        .send(StreamEvent::Exhausted {
                            symbol: symbol.clone(),
                            attempts,
                        })
                        .await;
                    return;
                }
                tokio::time::sleep(backoff_delay(attempts)).await;
                continue;
            }
        };

        tracing::info!("{} kline stream connected", symbol);
        attempts = 0;

        let (_, mut read) = connection.split();

        while let Some(message) = read.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    for event in parse_messages(&text) {
                        if tx.send(event).await.is_err() {
                            // Receiver dropped, nothing left to feed
                            return;
                        }
                    }
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                Ok(Message::Close(frame)) => {
                    tracing::warn!("{} stream closed by server: {:?}", symbol, frame);
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("{} stream read error: {}", symbol, e);
                    break;
                }
            }
        }

        attempts += 1;
        if attempts >= MAX_RECONNECT_ATTEMPTS {
            let _ = tx
                .send(StreamEvent::Exhausted {
                    symbol: symbol.clone(),
                    attempts,
                })
                .await;
            return;
        }

        let delay = backoff_delay(attempts);
        tracing::info!(
            "{} stream reconnecting in {:?} (attempt {}/{})",
            symbol,
            delay,
            attempts,
            MAX_RECONNECT_ATTEMPTS
        );
        tokio::time::sleep(delay).await;
    }
}

// ============== Wire Types ==============

#[derive(Debug, Deserialize)]
struct CombinedStreamMessage {
    #[allow(dead_code)]
    stream: String,
    data: KlineEventRaw,
}

#[derive(Debug, Deserialize)]
struct KlineEventRaw {
    #[serde(rename = "e")]
    event_type: String,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "k")]
    kline: KlinePayloadRaw,
}

#[derive(Debug, Deserialize)]
struct KlinePayloadRaw {
    #[serde(rename = "t")]
    open_time: i64,
    #[serde(rename = "T")]
    close_time: i64,
    #[serde(rename = "i")]
    interval: String,
    #[serde(rename = "o")]
    open: String,
    #[serde(rename = "h")]
    high: String,
    #[serde(rename = "l")]
    low: String,
    #[serde(rename = "c")]
    close: String,
    #[serde(rename = "v")]
    volume: String,
    #[serde(rename = "q")]
    quote_volume: String,
    #[serde(rename = "x")]
    is_closed: bool,
}

#[derive(Debug, Deserialize)]
struct TickerRaw {
    #[serde(rename = "e")]
    event_type: String,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "c")]
    last_price: String,
}

/// Parse any supported stream payload into zero or more events
fn parse_messages(text: &str) -> Vec<StreamEvent> {
    if let Some(event) = parse_stream_message(text) {
        return vec![event];
    }
    parse_ticker_array(text)
}

/// The `!ticker@arr` stream sends a bare JSON array of ticker events
fn parse_ticker_array(text: &str) -> Vec<StreamEvent> {
    let Ok(items) = serde_json::from_str::<Vec<TickerRaw>>(text) else {
        return Vec::new();
    };

    items
        .into_iter()
        .filter(|t| t.event_type == "24hrTicker")
        .filter_map(|t| {
            t.last_price.parse().ok().map(|price| StreamEvent::Ticker {
                symbol: t.symbol,
                price,
            })
        })
        .collect()
}

/// Parse a combined-stream payload, keeping only closed candles
fn parse_stream_message(text: &str) -> Option<StreamEvent> {
    let message: CombinedStreamMessage = serde_json::from_str(text).ok()?;
    if message.data.event_type != "kline" || !message.data.kline.is_closed {
        return None;
    }

    let k = &message.data.kline;
    let millis =
        |ms: i64| -> Option<DateTime<Utc>> { DateTime::from_timestamp_millis(ms) };

    let candle = Candle {
        open_time: millis(k.open_time)?,
        open: k.open.parse().ok()?,
        high: k.high.parse().ok()?,
        low: k.low.parse().ok()?,
        close: k.close.parse().ok()?,
        volume: k.volume.parse().ok()?,
        close_time: millis(k.close_time)?,
        quote_volume: k.quote_volume.parse().ok()?,
    };

    Some(StreamEvent::CandleClosed {
        symbol: message.data.symbol,
        interval: k.interval.clone(),
        candle,
    })
}
