//! Deterministic rule-based signal: the fallback when the advisory service
//! is unavailable or unconfigured.
//!
//! RSI is the sole action selector; the MACD histogram and the SMA crossover
//! only raise confidence when they agree with the already-chosen action.

use crate::indicators::IndicatorSet;
use crate::models::{SignalAction, TradingSignal};

/// Evaluate the fallback rules over an indicator set.
pub fn rule_based(indicators: &IndicatorSet) -> TradingSignal {
    let mut action = SignalAction::Hold;
    let mut confidence: f64 = 0.5;
    let mut reason = String::from("Insufficient data for clear signal");

    if let Some(rsi) = indicators.rsi_14 {
        if rsi < 30.0 {
            action = SignalAction::Buy;
            confidence = 0.7;
            reason = format!("RSI ({rsi:.2}) indicates oversold conditions");
        } else if rsi > 70.0 {
            action = SignalAction::Sell;
            confidence = 0.7;
            reason = format!("RSI ({rsi:.2}) indicates overbought conditions");
        }
    }

    if let Some(histogram) = indicators.macd_histogram {
        if histogram > 0.0 && action == SignalAction::Buy {
            confidence = (confidence + 0.15).min(0.85);
            reason.push_str(" with positive MACD momentum");
        } else if histogram < 0.0 && action == SignalAction::Sell {
            confidence = (confidence + 0.15).min(0.85);
            reason.push_str(" with negative MACD momentum");
        }
    }

    if let (Some(sma_20), Some(sma_50)) = (indicators.sma_20, indicators.sma_50) {
        if sma_20 > sma_50 && action == SignalAction::Buy {
            confidence = (confidence + 0.1).min(0.9);
            reason.push_str(" and bullish MA crossover");
        } else if sma_20 < sma_50 && action == SignalAction::Sell {
            confidence = (confidence + 0.1).min(0.9);
            reason.push_str(" and bearish MA crossover");
        }
    }

    TradingSignal {
        action,
        confidence,
        reason,
    }
}
