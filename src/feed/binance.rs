use crate::error::EngineError;
use crate::models::{AssetBalance, Candle, Fill, OrderRequest, SymbolMeta};
use chrono::{DateTime, Utc};
use governor::{Quota, RateLimiter};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;
use std::num::NonZeroU32;
use std::sync::Arc;

const BINANCE_API_BASE: &str = "https://api.binance.com";
// Stay well under the exchange's 1200 weight/minute allowance
const RATE_LIMIT_RPM: u32 = 600;
// Bound every request so a shutdown never waits on a hung call
const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

type ExchangeRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// REST client for a Binance-style exchange
///
/// Signed endpoints use HMAC-SHA256 over the canonical query string.
/// Rate-limit responses surface as `EngineError::RateLimited`; the retry
/// policy belongs to the caller, never to this client.
#[derive(Clone)]
pub struct BinanceClient {
    client: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    rate_limiter: Arc<ExchangeRateLimiter>,
}

// ============== Response Types ==============

#[derive(Debug, Deserialize)]
struct ExchangeInfoResponse {
    symbols: Vec<SymbolMetaRaw>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SymbolMetaRaw {
    symbol: String,
    status: String,
    base_asset: String,
    quote_asset: String,
    #[serde(default)]
    filters: Vec<serde_json::Value>,
}

impl From<SymbolMetaRaw> for SymbolMeta {
    fn from(raw: SymbolMetaRaw) -> Self {
        SymbolMeta {
            symbol: raw.symbol,
            status: raw.status,
            base_asset: raw.base_asset,
            quote_asset: raw.quote_asset,
            filters: raw.filters,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TickerPriceRaw {
    price: String,
}

#[derive(Debug, Deserialize)]
struct AccountRaw {
    balances: Vec<BalanceRaw>,
}

#[derive(Debug, Deserialize)]
struct BalanceRaw {
    asset: String,
    free: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderResponseRaw {
    order_id: i64,
    status: String,
    transact_time: i64,
    #[serde(default)]
    price: Option<String>,
    executed_qty: String,
    #[serde(default)]
    fills: Vec<OrderFillRaw>,
}

#[derive(Debug, Deserialize)]
struct OrderFillRaw {
    price: String,
    qty: String,
}

// ============== Implementation ==============

impl BinanceClient {
    pub fn new(api_key: String, api_secret: String) -> Self {
        Self::with_base_url(BINANCE_API_BASE.to_string(), api_key, api_secret)
    }

    /// Point the client at a different host (tests, mirrors)
    pub fn with_base_url(base_url: String, api_key: String, api_secret: String) -> Self {
        let quota = Quota::per_minute(NonZeroU32::new(RATE_LIMIT_RPM).unwrap());

        Self {
            client: Client::new(),
            base_url,
            api_key,
            api_secret,
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    /// Full exchange metadata for every listed symbol
    pub async fn exchange_info(&self) -> Result<Vec<SymbolMeta>, EngineError> {
        let url = format!("{}/api/v3/exchangeInfo", self.base_url);
        let response = self.get(&url).await?;

        let info: ExchangeInfoResponse = response.json().await?;
        Ok(info.symbols.into_iter().map(SymbolMeta::from).collect())
    }

    /// Candles for a symbol, oldest first
    pub async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<Candle>, EngineError> {
        let url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.base_url, symbol, interval, limit
        );
        let response = self.get(&url).await?;

        // Klines come back as positional arrays with numbers encoded as strings
        let rows: Vec<Vec<serde_json::Value>> = response.json().await?;
        rows.iter().map(parse_kline_row).collect()
    }

    /// Latest traded price for a symbol
    pub async fn ticker_price(&self, symbol: &str) -> Result<f64, EngineError> {
        let url = format!("{}/api/v3/ticker/price?symbol={}", self.base_url, symbol);
        let response = self.get(&url).await?;

        let ticker: TickerPriceRaw = response.json().await?;
        ticker
            .price
            .parse()
            .map_err(|_| EngineError::Validation(format!("unparseable price: {}", ticker.price)))
    }

    /// Free balances with non-zero amounts (signed endpoint)
    pub async fn account_balances(&self) -> Result<Vec<AssetBalance>, EngineError> {
        let query = format!("timestamp={}", Utc::now().timestamp_millis());
        let signature = self.sign(&query);
        let url = format!(
            "{}/api/v3/account?{}&signature={}",
            self.base_url, query, signature
        );

        let response = self.get(&url).await?;
        let account: AccountRaw = response.json().await?;

        Ok(account
            .balances
            .into_iter()
            .filter_map(|b| {
                let free: f64 = b.free.parse().ok()?;
                (free > 0.0).then_some(AssetBalance {
                    asset: b.asset,
                    free,
                })
            })
            .collect())
    }

    /// Place a signed order and return the resulting fill
    pub async fn place_order(&self, request: &OrderRequest) -> Result<Fill, EngineError> {
        let mut query = format!(
            "symbol={}&side={}&type={}&quantity={}&timestamp={}",
            request.symbol,
            request.side.as_exchange_str(),
            request.order_type.as_exchange_str(),
            request.quantity,
            Utc::now().timestamp_millis(),
        );
        if let Some(price) = request.price {
            query.push_str(&format!("&price={}", price));
        }
        let signature = self.sign(&query);
        let url = format!(
            "{}/api/v3/order?{}&signature={}",
            self.base_url, query, signature
        );

        self.rate_limiter.until_ready().await;

        let response = self
            .client
            .post(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(EngineError::RateLimited {
                retry_after_secs: retry_after(&response),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::OrderRejected {
                reason: format!("{}: {}", status, body),
            });
        }

        let raw: OrderResponseRaw = response.json().await?;
        if raw.status != "FILLED" {
            return Err(EngineError::OrderRejected {
                reason: format!("order not filled (status {})", raw.status),
            });
        }

        let quantity: f64 = raw
            .executed_qty
            .parse()
            .map_err(|_| EngineError::Validation("unparseable executedQty".to_string()))?;

        Ok(Fill {
            symbol: request.symbol.clone(),
            side: request.side,
            price: fill_price(&raw, request),
            quantity,
            exchange_order_id: raw.order_id.to_string(),
            executed_at: DateTime::from_timestamp_millis(raw.transact_time)
                .unwrap_or_else(Utc::now),
            dry_run: false,
        })
    }

    /// HMAC-SHA256 signature over the canonical query string
    fn sign(&self, query: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.api_secret.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Rate-limited GET with the exchange error taxonomy applied
    async fn get(&self, url: &str) -> Result<reqwest::Response, EngineError> {
        self.rate_limiter.until_ready().await;

        let response = self
            .client
            .get(url)
            .header("X-MBX-APIKEY", &self.api_key)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(EngineError::RateLimited {
                retry_after_secs: retry_after(&response),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::Network(format!(
                "exchange returned {}: {}",
                status, body
            )));
        }

        Ok(response)
    }
}

fn retry_after(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get("Retry-After")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse().ok())
}

/// Average fill price; falls back to the quoted price, then the request price
fn fill_price(raw: &OrderResponseRaw, request: &OrderRequest) -> f64 {
    if !raw.fills.is_empty() {
        let mut total_qty = 0.0;
        let mut total_value = 0.0;
        for fill in &raw.fills {
            let price: f64 = fill.price.parse().unwrap_or(0.0);
            let qty: f64 = fill.qty.parse().unwrap_or(0.0);
            total_value += price * qty;
            total_qty += qty;
        }
        if total_qty > 0.0 {
            return total_value / total_qty;
        }
    }

    raw.price
        .as_deref()
        .and_then(|p| p.parse::<f64>().ok())
        .filter(|p| *p > 0.0)
        .or(request.price)
        .unwrap_or(0.0)
}

fn parse_kline_row(row: &Vec<serde_json::Value>) -> Result<Candle, EngineError> {
    if row.len() < 8 {
        return Err(EngineError::Validation(format!(
            "kline row has {} fields, expected at least 8",
            row.len()
        )));
    }

    let millis = |v: &serde_json::Value| -> Result<DateTime<Utc>, EngineError> {
        v.as_i64()
            .and_then(DateTime::from_timestamp_millis)
            .ok_or_else(|| EngineError::Validation("bad kline timestamp".to_string()))
    };
    let number = |v: &serde_json::Value| -> Result<f64, EngineError> {
        v.as_str()
            .and_then(|s| s.parse().ok())
            .or_else(|| v.as_f64())
            .ok_or_else(|| EngineError::Validation("bad kline number".to_string()))
    };

    Ok(Candle {
        open_time: millis(&row[0])?,
        open: number(&row[1])?,
        high: number(&row[2])?,
        low: number(&row[3])?,
        close: number(&row[4])?,
        volume: number(&row[5])?,
        close_time: millis(&row[6])?,
        quote_volume: number(&row[7])?,
    })
}
