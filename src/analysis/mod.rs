// Advisory chart analysis via an LLM provider
//
// The engine treats this as an optional collaborator: a missing provider or
// a failed call never blocks trading, but a sub-threshold confidence score
// vetoes a buy.
pub mod claude;
pub mod openai;

pub use claude::ClaudeProvider;
pub use openai::OpenAiProvider;

use crate::feed::TtlCache;
use crate::models::Candle;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

const ANALYSIS_CACHE_TTL: Duration = Duration::from_secs(300);

/// Structured verdict from a chart-analysis provider
#[derive(Debug, Clone)]
pub struct ChartAnalysis {
    /// 0..=100, gated against `MIN_CONFIDENCE_SCORE` by the evaluator
    pub confidence_score: u8,
    pub trend_strength: String,
    pub pattern_recognition: String,
    pub volume_analysis: String,
    pub risk_assessment: String,
    pub recommendations: String,
    pub provider: String,
}

#[async_trait]
pub trait ChartAnalysisProvider: Send + Sync {
    async fn analyze(&self, symbol: &str, candles: &[Candle]) -> Result<ChartAnalysis>;

    fn name(&self) -> &'static str;
}

/// Provider selection, decided once at configuration time
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AnalysisBackend {
    OpenAi,
    Claude,
    Disabled,
}

impl std::str::FromStr for AnalysisBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openai" | "chatgpt" | "gpt" => Ok(AnalysisBackend::OpenAi),
            "claude" | "anthropic" => Ok(AnalysisBackend::Claude),
            "none" | "disabled" | "off" => Ok(AnalysisBackend::Disabled),
            other => Err(format!("unknown analysis backend: {}", other)),
        }
    }
}

/// Caching wrapper that turns provider results into an optional confidence
/// score for the evaluator. Failures are logged and swallowed: advisory
/// input must not take the engine down.
pub struct ChartAnalyzer {
    provider: Box<dyn ChartAnalysisProvider>,
    cache: TtlCache<String, ChartAnalysis>,
}

impl ChartAnalyzer {
    pub fn new(provider: Box<dyn ChartAnalysisProvider>) -> Self {
        Self {
            provider,
            cache: TtlCache::new(ANALYSIS_CACHE_TTL),
        }
    }

    /// Build an analyzer for the configured backend, if any
    pub fn from_backend(backend: AnalysisBackend) -> Option<Self> {
        let provider: Box<dyn ChartAnalysisProvider> = match backend {
            AnalysisBackend::OpenAi => {
                let api_key = std::env::var("OPENAI_API_KEY").ok()?;
                Box::new(OpenAiProvider::new(api_key))
            }
            AnalysisBackend::Claude => {
                let api_key = std::env::var("ANTHROPIC_API_KEY").ok()?;
                Box::new(ClaudeProvider::new(api_key))
            }
            AnalysisBackend::Disabled => return None,
        };
        Some(Self::new(provider))
    }

    /// Confidence score for the latest chart state, cached per symbol and
    /// candle close. Returns None when the provider fails.
    pub async fn confidence(&self, symbol: &str, candles: &[Candle]) -> Option<u8> {
        let cache_key = match candles.last() {
            Some(last) => format!("{}_{}", symbol, last.close_time.timestamp()),
            None => return None,
        };

        if let Some(cached) = self.cache.get(&cache_key) {
            return Some(cached.confidence_score);
        }

        match self.provider.analyze(symbol, candles).await {
            Ok(analysis) => {
                tracing::info!(
                    "{} analysis for {}: confidence {}/100, trend: {}",
                    analysis.provider,
                    symbol,
                    analysis.confidence_score,
                    analysis.trend_strength
                );
                let score = analysis.confidence_score;
                self.cache.insert(cache_key, analysis);
                Some(score)
            }
            Err(e) => {
                tracing::warn!("Chart analysis failed for {}: {:#}", symbol, e);
                None
            }
        }
    }
}

// ============== Shared prompt / response plumbing ==============

#[derive(Debug, Deserialize)]
struct AnalysisResponseRaw {
    confidence_score: f64,
    #[serde(default)]
    trend_strength: String,
    #[serde(default)]
    pattern_recognition: String,
    #[serde(default)]
    volume_analysis: String,
    #[serde(default)]
    risk_assessment: String,
    #[serde(default)]
    recommendations: String,
}

pub(crate) fn build_prompt(symbol: &str, candles: &[Candle]) -> String {
    // Cap the series to keep the token count sane
    let recent = if candles.len() > 100 {
        &candles[candles.len() - 100..]
    } else {
        candles
    };

    let rows: Vec<serde_json::Value> = recent
        .iter()
        .map(|c| {
            serde_json::json!({
                "time": c.open_time.to_rfc3339(),
                "open": c.open,
                "high": c.high,
                "low": c.low,
                "close": c.close,
                "volume": c.volume,
            })
        })
        .collect();

    format!(
        "You are an expert technical analyst. Analyze the candle data for {} and respond \
         with valid JSON only, no markdown formatting, using exactly these keys: \
         confidence_score (number 0-100), trend_strength, pattern_recognition, \
         volume_analysis, risk_assessment, recommendations (all strings).\n\nCandles:\n{}",
        symbol,
        serde_json::to_string(&rows).unwrap_or_default()
    )
}

/// Models wrap JSON in markdown fences often enough that stripping them is
/// part of the protocol
pub(crate) fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map(|rest| rest.trim_end_matches("```").trim())
        .unwrap_or(trimmed)
}

pub(crate) fn parse_analysis(text: &str, provider: &str) -> Result<ChartAnalysis> {
    let cleaned = strip_code_fences(text);
    let raw: AnalysisResponseRaw = serde_json::from_str(cleaned)
        .with_context(|| format!("unparseable analysis response: {}", cleaned))?;

    Ok(ChartAnalysis {
        confidence_score: raw.confidence_score.clamp(0.0, 100.0) as u8,
        trend_strength: raw.trend_strength,
        pattern_recognition: raw.pattern_recognition,
        volume_analysis: raw.volume_analysis,
        risk_assessment: raw.risk_assessment,
        recommendations: raw.recommendations,
        provider: provider.to_string(),
    })
}
