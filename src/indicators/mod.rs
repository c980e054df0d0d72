//! Technical indicators over a chronologically ordered price window.
//!
//! Every function is pure and deterministic. A window shorter than an
//! indicator's minimum length yields `None` ("insufficient history") — never
//! zero and never an error — so callers must treat an undefined indicator as
//! having no signal basis.

use serde::Serialize;
use statrs::statistics::Statistics;

/// Trading days per year, used to annualize volatility.
const TRADING_DAYS: f64 = 252.0;

/// Simple moving average of the last `period` prices.
pub fn sma(prices: &[f64], period: usize) -> Option<f64> {
    if prices.len() < period || period == 0 {
        return None;
    }
    Some(prices[prices.len() - period..].iter().mean())
}

/// Exponential moving average with smoothing factor `2 / (period + 1)`,
/// computed by recurrence over the whole window starting from its first point.
pub fn ema(prices: &[f64], period: usize) -> Option<f64> {
    if prices.len() < period || period == 0 {
        return None;
    }
    ema_series(prices, period).last().copied()
}

fn ema_series(prices: &[f64], period: usize) -> Vec<f64> {
    let alpha = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(prices.len());
    let mut current = match prices.first() {
        Some(p) => *p,
        None => return out,
    };
    out.push(current);
    for price in &prices[1..] {
        current = alpha * price + (1.0 - alpha) * current;
        out.push(current);
    }
    out
}

/// Relative Strength Index over the last `period` price deltas.
///
/// Needs `period + 1` points. When the average loss is exactly zero the
/// index reports full strength (100), not NaN.
pub fn rsi(prices: &[f64], period: usize) -> Option<f64> {
    if prices.len() < period + 1 || period == 0 {
        return None;
    }

    let deltas: Vec<f64> = prices.windows(2).map(|w| w[1] - w[0]).collect();
    let recent = &deltas[deltas.len() - period..];

    let avg_gain: f64 =
        recent.iter().map(|d| d.max(0.0)).sum::<f64>() / period as f64;
    let avg_loss: f64 =
        recent.iter().map(|d| (-d).max(0.0)).sum::<f64>() / period as f64;

    if avg_loss == 0.0 {
        return Some(100.0);
    }

    let rs = avg_gain / avg_loss;
    Some(100.0 - 100.0 / (1.0 + rs))
}

/// MACD line, signal line, and histogram.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Macd {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// Moving average convergence/divergence: fast EMA minus slow EMA, an EMA of
/// that difference as the signal line, and their gap as the histogram.
/// Undefined below `slow` points.
pub fn macd(prices: &[f64], fast: usize, slow: usize, signal: usize) -> Option<Macd> {
    if prices.len() < slow || slow == 0 {
        return None;
    }

    let ema_fast = ema_series(prices, fast);
    let ema_slow = ema_series(prices, slow);
    let macd_line: Vec<f64> = ema_fast
        .iter()
        .zip(&ema_slow)
        .map(|(f, s)| f - s)
        .collect();
    let signal_line = ema_series(&macd_line, signal);

    let macd_last = *macd_line.last()?;
    let signal_last = *signal_line.last()?;
    Some(Macd {
        macd: macd_last,
        signal: signal_last,
        histogram: macd_last - signal_last,
    })
}

/// Bollinger bands: middle = SMA(period), upper/lower = middle ± k·stddev.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BollingerBands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

pub fn bollinger_bands(prices: &[f64], period: usize, k: f64) -> Option<BollingerBands> {
    if prices.len() < period || period < 2 {
        return None;
    }

    let window = &prices[prices.len() - period..];
    let middle = window.iter().mean();
    let std = window.iter().std_dev();

    Some(BollingerBands {
        upper: middle + k * std,
        middle,
        lower: middle - k * std,
    })
}

/// Annualized volatility: standard deviation of the last `period` percentage
/// returns, scaled by √252. Needs `period + 1` points.
pub fn volatility(prices: &[f64], period: usize) -> Option<f64> {
    if prices.len() < period + 1 || period < 2 {
        return None;
    }

    let returns: Vec<f64> = prices
        .windows(2)
        .map(|w| if w[0] != 0.0 { w[1] / w[0] - 1.0 } else { 0.0 })
        .collect();
    let recent = &returns[returns.len() - period..];

    Some(recent.iter().std_dev() * TRADING_DAYS.sqrt())
}

/// The full indicator payload computed for one ticker, with standard periods.
/// `None` fields mean the history was too short for that indicator.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndicatorSet {
    pub sma_20: Option<f64>,
    pub sma_50: Option<f64>,
    pub ema_12: Option<f64>,
    pub ema_26: Option<f64>,
    pub rsi_14: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_histogram: Option<f64>,
    pub bollinger_upper: Option<f64>,
    pub bollinger_middle: Option<f64>,
    pub bollinger_lower: Option<f64>,
    pub volatility: Option<f64>,
}

impl IndicatorSet {
    /// Compute every indicator over a chronological price window.
    pub fn compute(prices: &[f64]) -> Self {
        let macd_values = macd(prices, 12, 26, 9);
        let bands = bollinger_bands(prices, 20, 2.0);

        Self {
            sma_20: sma(prices, 20),
            sma_50: sma(prices, 50),
            ema_12: ema(prices, 12),
            ema_26: ema(prices, 26),
            rsi_14: rsi(prices, 14),
            macd: macd_values.map(|m| m.macd),
            macd_signal: macd_values.map(|m| m.signal),
            macd_histogram: macd_values.map(|m| m.histogram),
            bollinger_upper: bands.map(|b| b.upper),
            bollinger_middle: bands.map(|b| b.middle),
            bollinger_lower: bands.map(|b| b.lower),
            volatility: volatility(prices, 20),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_sma_basic_and_undefined() {
        let prices = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_relative_eq!(sma(&prices, 5).unwrap(), 3.0);
        assert_relative_eq!(sma(&prices, 2).unwrap(), 4.5);
        assert_eq!(sma(&prices, 6), None);
    }

    #[test]
    fn test_ema_recurrence_from_first_point() {
        let prices = [1.0, 2.0, 3.0];
        // alpha = 2/3: 1, 5/3, 23/9
        assert_relative_eq!(ema(&prices, 2).unwrap(), 23.0 / 9.0, epsilon = 1e-12);
        assert_eq!(ema(&prices, 4), None);
    }

    #[test]
    fn test_rsi_known_value() {
        // Deltas: +1.0, -0.5 -> avg gain 0.5, avg loss 0.25, RS 2
        let prices = [10.0, 11.0, 10.5];
        assert_relative_eq!(rsi(&prices, 2).unwrap(), 100.0 - 100.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_rsi_zero_loss_is_exactly_100() {
        let rising = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(rsi(&rising, 4), Some(100.0));

        // A flat window has zero average loss as well
        let flat = [5.0; 10];
        assert_eq!(rsi(&flat, 4), Some(100.0));
    }

    #[test]
    fn test_rsi_bounds_and_undefined() {
        let prices = [5.0, 4.0, 6.0, 3.0, 7.0, 2.0, 8.0, 1.0];
        let value = rsi(&prices, 7).unwrap();
        assert!((0.0..=100.0).contains(&value));

        // Needs period + 1 points
        assert_eq!(rsi(&prices, 8), None);

        let falling = [5.0, 4.0, 3.0, 2.0, 1.0];
        assert_relative_eq!(rsi(&falling, 4).unwrap(), 0.0);
    }

    #[test]
    fn test_macd_undefined_below_slow_period() {
        let prices: Vec<f64> = (0..25).map(|i| 100.0 + i as f64).collect();
        assert!(macd(&prices, 12, 26, 9).is_none());
    }

    #[test]
    fn test_macd_flat_prices_are_all_zero() {
        let prices = [100.0; 40];
        let m = macd(&prices, 12, 26, 9).unwrap();
        assert_relative_eq!(m.macd, 0.0);
        assert_relative_eq!(m.signal, 0.0);
        assert_relative_eq!(m.histogram, 0.0);
    }

    #[test]
    fn test_macd_rising_prices_positive_line() {
        let prices: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        let m = macd(&prices, 12, 26, 9).unwrap();
        // Fast EMA tracks a rising series more closely than the slow one
        assert!(m.macd > 0.0);
    }

    #[test]
    fn test_bollinger_bands_known_window() {
        let prices = [1.0, 2.0, 3.0];
        // mean 2, sample stddev 1
        let bands = bollinger_bands(&prices, 3, 2.0).unwrap();
        assert_relative_eq!(bands.middle, 2.0);
        assert_relative_eq!(bands.upper, 4.0);
        assert_relative_eq!(bands.lower, 0.0);

        assert!(bollinger_bands(&prices, 4, 2.0).is_none());
    }

    #[test]
    fn test_bollinger_bands_collapse_when_flat() {
        let prices = [50.0; 25];
        let bands = bollinger_bands(&prices, 20, 2.0).unwrap();
        assert_relative_eq!(bands.upper, 50.0);
        assert_relative_eq!(bands.middle, 50.0);
        assert_relative_eq!(bands.lower, 50.0);
    }

    #[test]
    fn test_volatility_flat_is_zero_and_needs_period_plus_one() {
        let flat = [75.0; 21];
        assert_relative_eq!(volatility(&flat, 20).unwrap(), 0.0);

        assert!(volatility(&flat[..20], 20).is_none());
    }

    #[test]
    fn test_indicator_set_short_history_is_all_none() {
        let set = IndicatorSet::compute(&[100.0, 101.0]);
        assert!(set.sma_20.is_none());
        assert!(set.sma_50.is_none());
        assert!(set.ema_12.is_none());
        assert!(set.ema_26.is_none());
        assert!(set.rsi_14.is_none());
        assert!(set.macd.is_none());
        assert!(set.macd_histogram.is_none());
        assert!(set.bollinger_upper.is_none());
        assert!(set.volatility.is_none());
    }

    #[test]
    fn test_indicator_set_partial_definition() {
        // 30 points: enough for everything except SMA(50)
        let prices: Vec<f64> = (0..30).map(|i| 100.0 + (i % 7) as f64).collect();
        let set = IndicatorSet::compute(&prices);
        assert!(set.sma_20.is_some());
        assert!(set.sma_50.is_none());
        assert!(set.rsi_14.is_some());
        assert!(set.macd.is_some());
        assert!(set.bollinger_middle.is_some());
        assert!(set.volatility.is_some());
    }

    #[test]
    fn test_indicators_are_deterministic() {
        let prices: Vec<f64> = (0..60)
            .map(|i| 100.0 + (i as f64 * 0.7).sin() * 5.0)
            .collect();

        let a = IndicatorSet::compute(&prices);
        let b = IndicatorSet::compute(&prices);

        // Bit-for-bit reproducible
        assert_eq!(a.sma_20, b.sma_20);
        assert_eq!(a.sma_50, b.sma_50);
        assert_eq!(a.ema_12, b.ema_12);
        assert_eq!(a.rsi_14, b.rsi_14);
        assert_eq!(a.macd_histogram, b.macd_histogram);
        assert_eq!(a.bollinger_upper, b.bollinger_upper);
        assert_eq!(a.volatility, b.volatility);
    }
}
