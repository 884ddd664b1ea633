use anyhow::{bail, Context, Result};
use serde::Serialize;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Fire-and-forget Telegram notifications.
///
/// Delivery failures are logged and swallowed by `notify`; the trading
/// logic never depends on a message going out.
pub struct TelegramNotifier {
    bot_token: String,
    chat_id: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
}

impl TelegramNotifier {
    pub fn new(bot_token: String, chat_id: String) -> Self {
        Self {
            bot_token,
            chat_id,
            client: reqwest::Client::new(),
        }
    }

    /// Build a notifier from TELEGRAM_BOT_TOKEN / TELEGRAM_CHAT_ID, if both
    /// are present
    pub fn from_env() -> Option<Self> {
        let bot_token = std::env::var("TELEGRAM_BOT_TOKEN").ok()?;
        let chat_id = std::env::var("TELEGRAM_CHAT_ID").ok()?;
        Some(Self::new(bot_token, chat_id))
    }

    /// Send a message, logging failure instead of propagating it
    pub async fn notify(&self, message: &str) {
        if let Err(e) = self.send(message).await {
            tracing::warn!("Telegram notification failed: {:#}", e);
        }
    }

    async fn send(&self, message: &str) -> Result<()> {
        let url = format!(
            "{}/bot{}/sendMessage",
            TELEGRAM_API_BASE, self.bot_token
        );

        let response = self
            .client
            .post(&url)
            .json(&SendMessageRequest {
                chat_id: &self.chat_id,
                text: message,
            })
            .send()
            .await
            .context("Telegram request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("Telegram API error {}: {}", status, body);
        }

        Ok(())
    }
}

/// Message for a freshly detected listing
pub fn format_new_listing(symbol: &str, base_asset: &str, growth_pct: Option<f64>) -> String {
    let mut message = format!(
        "🚀 New listing detected!\n\nSymbol: {}\nAsset: {}\n",
        symbol, base_asset
    );
    if let Some(growth) = growth_pct {
        message.push_str(&format!("Growth since first candle: {:.2}%\n", growth));
    }
    message.push_str(&format!(
        "Chart: https://www.binance.com/en/trade/{}",
        symbol
    ));
    message
}

pub fn format_entry(symbol: &str, price: f64, quantity: f64, dry_run: bool) -> String {
    format!(
        "🟢 {}Buy executed for {}\nPrice: {}\nQuantity: {}",
        if dry_run { "[dry-run] " } else { "" },
        symbol,
        price,
        quantity
    )
}

pub fn format_partial_exit(symbol: &str, level_pct: f64, price: f64, quantity: f64) -> String {
    format!(
        "💰 Take profit {}% executed for {}\nPrice: {}\nQuantity: {}",
        level_pct, symbol, price, quantity
    )
}

pub fn format_full_exit(symbol: &str, reason: &str, price: f64, quantity: f64) -> String {
    let emoji = if reason == "stop_loss" { "🔴" } else { "⏰" };
    format!(
        "{} Exit ({}) for {}\nPrice: {}\nQuantity: {}",
        emoji, reason, symbol, price, quantity
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_listing_message() {
        let message = format_new_listing("NEWUSDT", "NEW", Some(12.34));
        assert!(message.contains("NEWUSDT"));
        assert!(message.contains("12.34%"));
        assert!(message.contains("binance.com/en/trade/NEWUSDT"));

        let message = format_new_listing("NEWUSDT", "NEW", None);
        assert!(!message.contains("Growth"));
    }

    #[test]
    fn test_entry_message_tags_dry_run() {
        assert!(format_entry("NEWUSDT", 1.0, 10.0, true).contains("[dry-run]"));
        assert!(!format_entry("NEWUSDT", 1.0, 10.0, false).contains("[dry-run]"));
    }

    #[test]
    fn test_exit_messages() {
        assert!(format_partial_exit("NEWUSDT", 10.0, 1.1, 5.0).contains("Take profit 10%"));
        assert!(format_full_exit("NEWUSDT", "stop_loss", 0.95, 45.0).starts_with("🔴"));
        assert!(format_full_exit("NEWUSDT", "timeout", 1.0, 45.0).starts_with("⏰"));
    }
}
