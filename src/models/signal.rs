//! Trading signal models shared by the advisory path and the rule fallback.

use serde::{Deserialize, Serialize};

/// Recommended action from a signal source. Hold never trades.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalAction {
    Buy,
    Sell,
    Hold,
}

impl SignalAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalAction::Buy => "BUY",
            SignalAction::Sell => "SELL",
            SignalAction::Hold => "HOLD",
        }
    }
}

impl std::fmt::Display for SignalAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A trading recommendation with its confidence and justification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingSignal {
    pub action: SignalAction,

    /// Confidence in [0.0, 1.0]
    pub confidence: f64,

    /// Short human-readable justification
    pub reason: String,
}

impl TradingSignal {
    /// Neutral signal used as the starting point for rule evaluation.
    pub fn hold(reason: impl Into<String>) -> Self {
        Self {
            action: SignalAction::Hold,
            confidence: 0.5,
            reason: reason.into(),
        }
    }
}
