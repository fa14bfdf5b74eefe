//! Pure technical-indicator functions over closed-bar price series.
//!
//! Every function here takes `&[f64]` (or matching OHLC slices) and returns
//! either a single value for the most recent point or a full per-point
//! series. No I/O, no clock, no state carried between calls — callers own
//! the history window (see `RecentBarsWindow` in `ntx-strategy`) and pass it
//! in fresh each evaluation.

/// Simple moving average of the last `period` values. `None` if there
/// aren't enough points yet.
pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let window = &values[values.len() - period..];
    Some(window.iter().sum::<f64>() / period as f64)
}

/// Full SMA series, one entry per input point (`None` until `period` points
/// have accumulated).
pub fn sma_series(values: &[f64], period: usize) -> Vec<Option<f64>> {
    (1..=values.len())
        .map(|i| sma(&values[..i], period))
        .collect()
}

/// Exponential moving average series. The seed value is the SMA of the
/// first `period` points; `None` before that.
pub fn ema_series(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if period == 0 || values.is_empty() {
        return vec![None; values.len()];
    }
    let alpha = 2.0 / (period as f64 + 1.0);
    let mut out = vec![None; values.len()];
    if values.len() < period {
        return out;
    }
    let seed = values[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = Some(seed);
    let mut prev = seed;
    for i in period..values.len() {
        let next = alpha * values[i] + (1.0 - alpha) * prev;
        out[i] = Some(next);
        prev = next;
    }
    out
}

/// Last value of the EMA series, or `None` if not enough points.
pub fn ema(values: &[f64], period: usize) -> Option<f64> {
    ema_series(values, period).last().copied().flatten()
}

/// Wilder's RSI series (period default 14). `None` until `period + 1` points
/// have accumulated (the first delta needs a previous point).
pub fn rsi_series(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() <= period {
        return out;
    }
    let mut gains = 0.0;
    let mut losses = 0.0;
    for i in 1..=period {
        let delta = values[i] - values[i - 1];
        if delta >= 0.0 {
            gains += delta;
        } else {
            losses += -delta;
        }
    }
    let mut avg_gain = gains / period as f64;
    let mut avg_loss = losses / period as f64;
    out[period] = Some(rsi_from_averages(avg_gain, avg_loss));

    for i in (period + 1)..values.len() {
        let delta = values[i] - values[i - 1];
        let (gain, loss) = if delta >= 0.0 { (delta, 0.0) } else { (0.0, -delta) };
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
        out[i] = Some(rsi_from_averages(avg_gain, avg_loss));
    }
    out
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - (100.0 / (1.0 + rs))
}

/// Last RSI value, or `None` if not enough points.
pub fn rsi(values: &[f64], period: usize) -> Option<f64> {
    rsi_series(values, period).last().copied().flatten()
}

/// One point of a MACD series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdPoint {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// MACD = EMA(fast) - EMA(slow), signal = EMA(macd, signal_period).
/// Returns the last point, or `None` until both EMAs and the signal line
/// have enough history.
pub fn macd(values: &[f64], fast: usize, slow: usize, signal_period: usize) -> Option<MacdPoint> {
    let fast_series = ema_series(values, fast);
    let slow_series = ema_series(values, slow);
    let macd_line: Vec<f64> = fast_series
        .iter()
        .zip(slow_series.iter())
        .filter_map(|(f, s)| match (f, s) {
            (Some(f), Some(s)) => Some(f - s),
            _ => None,
        })
        .collect();
    if macd_line.is_empty() {
        return None;
    }
    let signal = ema(&macd_line, signal_period)?;
    let macd_val = *macd_line.last()?;
    Some(MacdPoint {
        macd: macd_val,
        signal,
        histogram: macd_val - signal,
    })
}

/// Bollinger band values at the most recent point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BollingerBands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

pub fn bollinger_bands(values: &[f64], period: usize, num_std: f64) -> Option<BollingerBands> {
    if period == 0 || values.len() < period {
        return None;
    }
    let window = &values[values.len() - period..];
    let mean = window.iter().sum::<f64>() / period as f64;
    let variance = window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / period as f64;
    let std_dev = variance.sqrt();
    Some(BollingerBands {
        upper: mean + num_std * std_dev,
        middle: mean,
        lower: mean - num_std * std_dev,
    })
}

/// Average True Range over the last `period` bars (Wilder smoothing via
/// simple average of true ranges, not the recursive form — sufficient
/// precision for intraday SL/TP sizing).
pub fn atr(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Option<f64> {
    let n = highs.len().min(lows.len()).min(closes.len());
    if n < period + 1 || period == 0 {
        return None;
    }
    let mut true_ranges = Vec::with_capacity(n - 1);
    for i in 1..n {
        let hl = highs[i] - lows[i];
        let hc = (highs[i] - closes[i - 1]).abs();
        let lc = (lows[i] - closes[i - 1]).abs();
        true_ranges.push(hl.max(hc).max(lc));
    }
    sma(&true_ranges, period)
}

/// Cumulative session VWAP: sum(price*volume) / sum(volume) over the given
/// slice, which the caller truncates to the current trading session.
pub fn vwap_session(prices: &[f64], volumes: &[i64]) -> Option<f64> {
    let n = prices.len().min(volumes.len());
    if n == 0 {
        return None;
    }
    let mut pv_sum = 0.0;
    let mut vol_sum = 0i64;
    for i in 0..n {
        pv_sum += prices[i] * volumes[i] as f64;
        vol_sum += volumes[i];
    }
    if vol_sum == 0 {
        return None;
    }
    Some(pv_sum / vol_sum as f64)
}

/// `true` if `series` crossed from at-or-below `threshold` to strictly
/// above it between its last two points.
pub fn crossed_above(series: &[f64], threshold: f64) -> bool {
    if series.len() < 2 {
        return false;
    }
    let prev = series[series.len() - 2];
    let last = series[series.len() - 1];
    prev <= threshold && last > threshold
}

/// `true` if `series` crossed from at-or-above `threshold` to strictly
/// below it between its last two points.
pub fn crossed_below(series: &[f64], threshold: f64) -> bool {
    if series.len() < 2 {
        return false;
    }
    let prev = series[series.len() - 2];
    let last = series[series.len() - 1];
    prev >= threshold && last < threshold
}

/// `true` if `a` crossed above `b` between their last two points
/// (both series must be equal length and at least 2 long).
pub fn series_crossed_above(a: &[f64], b: &[f64]) -> bool {
    if a.len() < 2 || b.len() < 2 || a.len() != b.len() {
        return false;
    }
    let n = a.len();
    a[n - 2] <= b[n - 2] && a[n - 1] > b[n - 1]
}

/// `true` if `a` crossed below `b` between their last two points.
pub fn series_crossed_below(a: &[f64], b: &[f64]) -> bool {
    if a.len() < 2 || b.len() < 2 || a.len() != b.len() {
        return false;
    }
    let n = a.len();
    a[n - 2] >= b[n - 2] && a[n - 1] < b[n - 1]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sma_needs_full_window() {
        assert_eq!(sma(&[1.0, 2.0], 3), None);
        assert_eq!(sma(&[1.0, 2.0, 3.0], 3), Some(2.0));
        assert_eq!(sma(&[1.0, 2.0, 3.0, 9.0], 3), Some((2.0 + 3.0 + 9.0) / 3.0));
    }

    #[test]
    fn ema_seeds_with_sma_then_smooths() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let series = ema_series(&values, 3);
        assert_eq!(series[0], None);
        assert_eq!(series[1], None);
        assert_eq!(series[2], Some(2.0));
        assert!(series[3].unwrap() > 2.0);
    }

    #[test]
    fn rsi_all_gains_is_100() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let r = rsi(&values, 5).unwrap();
        assert!((r - 100.0).abs() < 1e-9);
    }

    #[test]
    fn rsi_all_losses_is_zero() {
        let values = vec![6.0, 5.0, 4.0, 3.0, 2.0, 1.0];
        let r = rsi(&values, 5).unwrap();
        assert!(r.abs() < 1e-9);
    }

    #[test]
    fn macd_needs_slow_and_signal_history() {
        let values: Vec<f64> = (1..=40).map(|x| x as f64).collect();
        assert!(macd(&values, 12, 26, 9).is_some());
        assert!(macd(&values[..5], 12, 26, 9).is_none());
    }

    #[test]
    fn bollinger_bands_centers_on_mean() {
        let values = vec![10.0, 10.0, 10.0, 10.0];
        let bb = bollinger_bands(&values, 4, 2.0).unwrap();
        assert_eq!(bb.middle, 10.0);
        assert_eq!(bb.upper, 10.0);
        assert_eq!(bb.lower, 10.0);
    }

    #[test]
    fn atr_flat_series_is_zero() {
        let highs = vec![10.0, 10.0, 10.0, 10.0];
        let lows = vec![10.0, 10.0, 10.0, 10.0];
        let closes = vec![10.0, 10.0, 10.0, 10.0];
        let v = atr(&highs, &lows, &closes, 3).unwrap();
        assert!(v.abs() < 1e-9);
    }

    #[test]
    fn vwap_weights_by_volume() {
        let prices = vec![10.0, 20.0];
        let volumes = vec![1, 3];
        let v = vwap_session(&prices, &volumes).unwrap();
        assert!((v - 17.5).abs() < 1e-9);
    }

    #[test]
    fn crossed_above_detects_boundary_cross() {
        assert!(crossed_above(&[1.0, 2.0], 1.5));
        assert!(!crossed_above(&[2.0, 2.0], 1.5));
        assert!(!crossed_above(&[2.0, 1.0], 1.5));
    }

    #[test]
    fn series_crossed_above_requires_equal_length() {
        assert!(series_crossed_above(&[1.0, 3.0], &[2.0, 2.0]));
        assert!(!series_crossed_above(&[1.0], &[2.0, 2.0]));
    }
}
