/// Typed error taxonomy for the engine.
///
/// Callers are expected to match on these: `InsufficientData` means "skip
/// this symbol for the cycle", `RateLimited` means "back off before the next
/// poll", `OrderRejected` means "no fill happened, retry next cycle".
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("insufficient data: have {have} candles, need {need}")]
    InsufficientData { have: usize, need: usize },

    #[error("division by zero while computing {context}")]
    DivisionByZero { context: &'static str },

    #[error("rate limited by exchange{}", retry_after_secs.map(|s| format!(" (retry after {}s)", s)).unwrap_or_default())]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("network error: {0}")]
    Network(String),

    #[error("stream connection exhausted after {attempts} reconnect attempts")]
    ConnectionExhausted { attempts: u32 },

    #[error("order rejected by exchange: {reason}")]
    OrderRejected { reason: String },

    #[error("validation failed: {0}")]
    Validation(String),
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        EngineError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Validation(format!("malformed payload: {}", err))
    }
}
