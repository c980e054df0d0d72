//! Remote advisory client: sends indicator values to a text-generation
//! service and parses a strict JSON recommendation out of the reply.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::indicators::IndicatorSet;
use crate::models::{SignalAction, TradingSignal};

const DEFAULT_API_URL: &str = "https://api.anthropic.com/v1/messages";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Why an advisory call produced no usable signal. Always recovered by the
/// rule-based fallback; never surfaced to trading callers.
#[derive(Debug, Error)]
pub enum AdvisoryError {
    #[error("advisory request failed: {0}")]
    Transport(reqwest::Error),

    #[error("advisory request timed out")]
    Timeout,

    #[error("advisory service returned status {0}")]
    Status(reqwest::StatusCode),

    #[error("advisory response could not be parsed: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for AdvisoryError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            AdvisoryError::Timeout
        } else {
            AdvisoryError::Transport(e)
        }
    }
}

/// Capability interface for obtaining a trading recommendation. Implemented
/// by the remote client here and by fakes in tests.
#[async_trait]
pub trait Advisor: Send + Sync {
    async fn advise(
        &self,
        symbol: &str,
        indicators: &IndicatorSet,
    ) -> Result<TradingSignal, AdvisoryError>;
}

/// Client for a hosted text-generation advisory service.
pub struct RemoteAdvisor {
    client: Client,
    api_url: String,
    api_key: String,
    model: String,
}

impl RemoteAdvisor {
    /// Build from `ADVISOR_API_KEY` / `ADVISOR_API_URL` / `ADVISOR_MODEL`.
    /// Returns `Ok(None)` when no API key is configured.
    pub fn from_env() -> anyhow::Result<Option<Self>> {
        let api_key = match std::env::var("ADVISOR_API_KEY") {
            Ok(key) if !key.is_empty() => key,
            _ => return Ok(None),
        };
        let api_url =
            std::env::var("ADVISOR_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        let model = std::env::var("ADVISOR_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());

        Ok(Some(Self::new(api_url, api_key, model)?))
    }

    pub fn new(api_url: String, api_key: String, model: String) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {e}"))?;

        Ok(Self {
            client,
            api_url,
            api_key,
            model,
        })
    }

    fn build_prompt(symbol: &str, indicators: &IndicatorSet) -> String {
        format!(
            r#"Analyze these technical indicators for {symbol} and provide a trading recommendation:

Technical Indicators:
- SMA(20): {sma_20}
- SMA(50): {sma_50}
- EMA(12): {ema_12}
- EMA(26): {ema_26}
- RSI(14): {rsi_14}
- MACD: {macd}
- MACD Signal: {macd_signal}
- MACD Histogram: {macd_histogram}
- Bollinger Upper: {bb_upper}
- Bollinger Middle: {bb_middle}
- Bollinger Lower: {bb_lower}
- Volatility: {volatility}

Provide your recommendation in exactly this JSON format:
{{"action": "BUY|SELL|HOLD", "confidence": 0.0-1.0, "reason": "brief explanation"}}"#,
            sma_20 = fmt_indicator(indicators.sma_20),
            sma_50 = fmt_indicator(indicators.sma_50),
            ema_12 = fmt_indicator(indicators.ema_12),
            ema_26 = fmt_indicator(indicators.ema_26),
            rsi_14 = fmt_indicator(indicators.rsi_14),
            macd = fmt_indicator(indicators.macd),
            macd_signal = fmt_indicator(indicators.macd_signal),
            macd_histogram = fmt_indicator(indicators.macd_histogram),
            bb_upper = fmt_indicator(indicators.bollinger_upper),
            bb_middle = fmt_indicator(indicators.bollinger_middle),
            bb_lower = fmt_indicator(indicators.bollinger_lower),
            volatility = fmt_indicator(indicators.volatility),
        )
    }
}

#[async_trait]
impl Advisor for RemoteAdvisor {
    async fn advise(
        &self,
        symbol: &str,
        indicators: &IndicatorSet,
    ) -> Result<TradingSignal, AdvisoryError> {
        let prompt = Self::build_prompt(symbol, indicators);

        debug!(symbol = %symbol, "Requesting advisory signal");
        let response = self
            .client
            .post(&self.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&json!({
                "model": self.model,
                "max_tokens": 1000,
                "messages": [{"role": "user", "content": prompt}],
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AdvisoryError::Status(response.status()));
        }

        let body: MessagesResponse = response
            .json()
            .await
            .map_err(|e| AdvisoryError::Malformed(e.to_string()))?;
        let text = body
            .content
            .first()
            .map(|block| block.text.as_str())
            .ok_or_else(|| AdvisoryError::Malformed("empty content".to_string()))?;

        parse_signal_text(text)
    }
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct RawSignal {
    action: Option<String>,
    confidence: Option<f64>,
    reason: Option<String>,
}

/// Parse a strict JSON signal object from advisory reply text, tolerating a
/// fenced code block around it.
fn parse_signal_text(text: &str) -> Result<TradingSignal, AdvisoryError> {
    let stripped = strip_code_fences(text);
    let raw: RawSignal = serde_json::from_str(stripped.trim())
        .map_err(|e| AdvisoryError::Malformed(e.to_string()))?;

    let action = match raw.action.as_deref().map(str::to_uppercase).as_deref() {
        Some("BUY") => SignalAction::Buy,
        Some("SELL") => SignalAction::Sell,
        _ => SignalAction::Hold,
    };

    Ok(TradingSignal {
        action,
        confidence: raw.confidence.unwrap_or(0.5).clamp(0.0, 1.0),
        reason: raw.reason.unwrap_or_else(|| "AI prediction".to_string()),
    })
}

fn strip_code_fences(text: &str) -> &str {
    if let Some(rest) = text.split("```json").nth(1) {
        rest.split("```").next().unwrap_or(rest)
    } else if let Some(rest) = text.split("```").nth(1) {
        rest
    } else {
        text
    }
}

fn fmt_indicator(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{v:.4}"),
        None => "N/A".to_string(),
    }
}
