//! Signal generation: a remote advisory path with a deterministic rule-based
//! fallback. The generator itself is infallible — any advisory failure is
//! recovered locally and never surfaced to callers.

mod advisor;
mod rules;

pub use advisor::{Advisor, AdvisoryError, RemoteAdvisor};
pub use rules::rule_based;

use tracing::debug;

use crate::indicators::IndicatorSet;
use crate::models::TradingSignal;

/// Produces a trading signal for one ticker, preferring the remote advisor
/// when one is configured and falling back to the rule engine otherwise.
pub struct SignalGenerator {
    advisor: Option<Box<dyn Advisor>>,
}

impl SignalGenerator {
    pub fn new(advisor: Option<Box<dyn Advisor>>) -> Self {
        Self { advisor }
    }

    /// Build from the environment: remote advisory when an API key is set,
    /// rule-based only otherwise.
    pub fn from_env() -> Self {
        match RemoteAdvisor::from_env() {
            Ok(Some(advisor)) => Self::new(Some(Box::new(advisor))),
            Ok(None) => {
                debug!("No advisory API key configured, using rule-based signals");
                Self::new(None)
            }
            Err(e) => {
                debug!(error = %e, "Advisory client unavailable, using rule-based signals");
                Self::new(None)
            }
        }
    }

    /// Get a signal for a ticker. Advisory timeouts, transport errors, and
    /// malformed payloads all degrade to the rule-based fallback.
    pub async fn signal(&self, symbol: &str, indicators: &IndicatorSet) -> TradingSignal {
        if let Some(advisor) = &self.advisor {
            match advisor.advise(symbol, indicators).await {
                Ok(signal) => return signal,
                Err(e) => {
                    debug!(symbol = %symbol, error = %e, "Advisory unavailable, falling back to rules");
                }
            }
        }

        rule_based(indicators)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SignalAction;
    use async_trait::async_trait;

    struct FixedAdvisor(TradingSignal);

    #[async_trait]
    impl Advisor for FixedAdvisor {
        async fn advise(
            &self,
            _symbol: &str,
            _indicators: &IndicatorSet,
        ) -> Result<TradingSignal, AdvisoryError> {
            Ok(self.0.clone())
        }
    }

    struct FailingAdvisor;

    #[async_trait]
    impl Advisor for FailingAdvisor {
        async fn advise(
            &self,
            _symbol: &str,
            _indicators: &IndicatorSet,
        ) -> Result<TradingSignal, AdvisoryError> {
            Err(AdvisoryError::Timeout)
        }
    }

    #[tokio::test]
    async fn test_advisor_signal_is_preferred() {
        let advisor = FixedAdvisor(TradingSignal {
            action: SignalAction::Buy,
            confidence: 0.9,
            reason: "advisory".to_string(),
        });
        let generator = SignalGenerator::new(Some(Box::new(advisor)));

        let signal = generator.signal("AAPL", &IndicatorSet::default()).await;
        assert_eq!(signal.action, SignalAction::Buy);
        assert_eq!(signal.confidence, 0.9);
    }

    #[tokio::test]
    async fn test_advisor_failure_falls_back_to_rules() {
        let generator = SignalGenerator::new(Some(Box::new(FailingAdvisor)));

        // Empty indicator set: the fallback's neutral default
        let signal = generator.signal("AAPL", &IndicatorSet::default()).await;
        assert_eq!(signal.action, SignalAction::Hold);
        assert_eq!(signal.confidence, 0.5);
    }

    #[tokio::test]
    async fn test_no_advisor_uses_rules() {
        let generator = SignalGenerator::new(None);

        let indicators = IndicatorSet {
            rsi_14: Some(25.0),
            ..IndicatorSet::default()
        };
        let signal = generator.signal("AAPL", &indicators).await;
        assert_eq!(signal.action, SignalAction::Buy);
    }
}
