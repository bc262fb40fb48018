//! Technical indicators drawn over or below price charts, and the
//! bullish/bearish signal summary derived from them.

use serde::{Deserialize, Serialize};
use std::fmt::Display;

use crate::core::chart::{Series, SeriesStyle};
use crate::core::table::Table;

/// Band width used for Bollinger bands, in standard deviations.
pub const BOLLINGER_WIDTH: f64 = 2.0;

const MACD_FAST: usize = 12;
const MACD_SLOW: usize = 26;
const MACD_SIGNAL: usize = 9;

const RSI_OVERBOUGHT: f64 = 70.0;
const RSI_OVERSOLD: f64 = 30.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Overlay {
    Sma(usize),
    Ema(usize),
    Wma(usize),
    Bollinger(usize),
    Rsi(usize),
    /// MACD(12, 26, 9) with its signal line and histogram.
    Macd,
    Atr(usize),
}

impl Display for Overlay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Overlay::Sma(period) => write!(f, "SMA{period}"),
            Overlay::Ema(period) => write!(f, "EMA{period}"),
            Overlay::Wma(period) => write!(f, "WMA{period}"),
            Overlay::Bollinger(period) => write!(f, "BB{period}"),
            Overlay::Rsi(period) => write!(f, "RSI{period}"),
            Overlay::Macd => write!(f, "MACD"),
            Overlay::Atr(period) => write!(f, "ATR{period}"),
        }
    }
}

impl Overlay {
    /// Oscillators get their own panel below the price chart.
    pub fn lower_panel(&self) -> bool {
        matches!(self, Overlay::Rsi(_) | Overlay::Macd | Overlay::Atr(_))
    }

    /// Computes the overlay's series from the table. Empty when the
    /// columns it needs are absent.
    pub fn series(&self, table: &Table) -> Vec<Series> {
        let Some(closes) = table.float_column("close") else {
            return Vec::new();
        };
        let name = self.to_string();
        let line = |name: String, values| Series::new(name, SeriesStyle::Line, values);

        match self {
            Overlay::Sma(period) => vec![line(name, sma(&closes, *period))],
            Overlay::Ema(period) => vec![line(name, ema(&closes, *period))],
            Overlay::Wma(period) => vec![line(name, wma(&closes, *period))],
            Overlay::Rsi(period) => vec![line(name, rsi(&closes, *period))],
            Overlay::Bollinger(period) => {
                let bands = bollinger(&closes, *period, BOLLINGER_WIDTH);
                vec![
                    line(format!("{name} upper"), bands.upper),
                    line(format!("{name} middle"), bands.middle),
                    line(format!("{name} lower"), bands.lower),
                ]
            }
            Overlay::Macd => {
                let macd = macd(&closes, MACD_FAST, MACD_SLOW, MACD_SIGNAL);
                vec![
                    line(name, macd.line),
                    line("Signal".to_string(), macd.signal),
                    Series::new("Histogram", SeriesStyle::Bar, macd.histogram),
                ]
            }
            Overlay::Atr(period) => {
                let (Some(high), Some(low)) = (table.float_column("high"), table.float_column("low"))
                else {
                    return Vec::new();
                };
                vec![Series::new(name, SeriesStyle::Area, atr(&high, &low, &closes, *period))]
            }
        }
    }
}

// Applies `f` to every full window of `period` values. Windows containing a
// gap yield `None`.
fn rolling(
    values: &[Option<f64>],
    period: usize,
    f: impl Fn(&[f64]) -> Option<f64>,
) -> Vec<Option<f64>> {
    if period == 0 {
        return vec![None; values.len()];
    }
    (0..values.len())
        .map(|i| {
            if i + 1 < period {
                return None;
            }
            let window: Option<Vec<f64>> = values[i + 1 - period..=i].iter().copied().collect();
            window.and_then(|w| f(&w))
        })
        .collect()
}

fn mean(window: &[f64]) -> Option<f64> {
    (!window.is_empty()).then(|| window.iter().sum::<f64>() / window.len() as f64)
}

fn sample_std(window: &[f64]) -> Option<f64> {
    if window.len() < 2 {
        return None;
    }
    let m = mean(window)?;
    let variance =
        window.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (window.len() as f64 - 1.0);
    Some(variance.sqrt())
}

fn zip_with(
    a: &[Option<f64>],
    b: &[Option<f64>],
    f: impl Fn(f64, f64) -> f64,
) -> Vec<Option<f64>> {
    a.iter()
        .zip(b)
        .map(|(x, y)| Some(f((*x)?, (*y)?)))
        .collect()
}

/// Simple moving average.
pub fn sma(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    rolling(values, period, mean)
}

/// Linearly weighted moving average; the newest value has weight `period`.
pub fn wma(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    let total = (period * (period + 1) / 2) as f64;
    rolling(values, period, |window| {
        let weighted: f64 = window
            .iter()
            .enumerate()
            .map(|(i, v)| v * (i + 1) as f64)
            .sum();
        Some(weighted / total)
    })
}

/// Span-adjusted exponential moving average with `alpha = 2 / (period + 1)`.
///
/// Each output is the decay-weighted mean of every value so far, so early
/// outputs are not biased towards the first value. Gaps still decay the
/// older weights and repeat the current average.
pub fn ema(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    if period == 0 {
        return vec![None; values.len()];
    }
    let decay = 1.0 - 2.0 / (period as f64 + 1.0);
    let (mut numerator, mut denominator) = (0.0, 0.0);
    values
        .iter()
        .map(|v| {
            numerator *= decay;
            denominator *= decay;
            if let Some(x) = v {
                numerator += x;
                denominator += 1.0;
            }
            (denominator > 0.0).then(|| numerator / denominator)
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bands {
    pub upper: Vec<Option<f64>>,
    pub middle: Vec<Option<f64>>,
    pub lower: Vec<Option<f64>>,
}

/// SMA middle band with bands `width` sample standard deviations away.
pub fn bollinger(values: &[Option<f64>], period: usize, width: f64) -> Bands {
    let middle = sma(values, period);
    let deviation = rolling(values, period, sample_std);
    Bands {
        upper: zip_with(&middle, &deviation, |m, d| m + width * d),
        lower: zip_with(&middle, &deviation, |m, d| m - width * d),
        middle,
    }
}

/// Relative strength index over simple averages of gains and losses.
///
/// A change next to a gap, and the first row, count as no movement. Flat
/// windows yield `None`.
pub fn rsi(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    let changes: Vec<f64> = (0..values.len())
        .map(|i| match (i.checked_sub(1).and_then(|j| values[j]), values[i]) {
            (Some(prev), Some(current)) => current - prev,
            _ => 0.0,
        })
        .collect();
    let gains: Vec<Option<f64>> = changes.iter().map(|c| Some(c.max(0.0))).collect();
    let losses: Vec<Option<f64>> = changes.iter().map(|c| Some((-c).max(0.0))).collect();

    sma(&gains, period)
        .into_iter()
        .zip(sma(&losses, period))
        .map(|(gain, loss)| match (gain?, loss?) {
            (gain, loss) if loss == 0.0 && gain == 0.0 => None,
            (_, loss) if loss == 0.0 => Some(100.0),
            (gain, loss) => Some(100.0 - 100.0 / (1.0 + gain / loss)),
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct Macd {
    pub line: Vec<Option<f64>>,
    pub signal: Vec<Option<f64>>,
    pub histogram: Vec<Option<f64>>,
}

pub fn macd(values: &[Option<f64>], fast: usize, slow: usize, signal: usize) -> Macd {
    let line = zip_with(&ema(values, fast), &ema(values, slow), |f, s| f - s);
    let signal = ema(&line, signal);
    Macd {
        histogram: zip_with(&line, &signal, |l, s| l - s),
        line,
        signal,
    }
}

/// Average true range. The first row's true range is its high-low span.
pub fn atr(
    high: &[Option<f64>],
    low: &[Option<f64>],
    close: &[Option<f64>],
    period: usize,
) -> Vec<Option<f64>> {
    let true_range: Vec<Option<f64>> = (0..close.len())
        .map(|i| {
            let (h, l) = (high.get(i).copied().flatten()?, low.get(i).copied().flatten()?);
            let span = h - l;
            match i.checked_sub(1).and_then(|j| close[j]) {
                Some(prev) => Some(span.max((h - prev).abs()).max((l - prev).abs())),
                None => Some(span),
            }
        })
        .collect();
    sma(&true_range, period)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Bullish,
    Bearish,
    Overbought,
    Oversold,
    Neutral,
}

impl Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Verdict::Bullish => "bullish",
                Verdict::Bearish => "bearish",
                Verdict::Overbought => "overbought",
                Verdict::Oversold => "oversold",
                Verdict::Neutral => "neutral",
            }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Signal {
    pub condition: String,
    pub verdict: Verdict,
}

impl Signal {
    fn new(condition: impl Into<String>, verdict: Verdict) -> Self {
        Self {
            condition: condition.into(),
            verdict,
        }
    }

    fn trend(bullish: bool, above: &str, below: &str) -> Self {
        if bullish {
            Self::new(above, Verdict::Bullish)
        } else {
            Self::new(below, Verdict::Bearish)
        }
    }
}

/// Latest-bar readings of trend and momentum indicators. Only trend
/// signals count towards the bullish and bearish totals.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalSummary {
    pub signals: Vec<Signal>,
    pub bullish: usize,
    pub bearish: usize,
}

impl SignalSummary {
    /// `None` when there are too few closes for any signal.
    pub fn from_table(table: &Table) -> Option<Self> {
        let closes = table.float_column("close")?;
        let latest = |values: Vec<Option<f64>>| values.last().copied().flatten();

        let close = latest(closes.clone());
        let sma20 = latest(sma(&closes, 20));
        let sma50 = latest(sma(&closes, 50));
        let rsi14 = latest(rsi(&closes, 14));
        let macd = macd(&closes, MACD_FAST, MACD_SLOW, MACD_SIGNAL);
        let (macd_line, macd_signal) = (latest(macd.line), latest(macd.signal));

        let mut signals = Vec::new();
        if let (Some(close), Some(sma20)) = (close, sma20) {
            signals.push(Signal::trend(close > sma20, "Price > SMA20", "Price < SMA20"));
        }
        if let (Some(sma20), Some(sma50)) = (sma20, sma50) {
            signals.push(Signal::trend(sma20 > sma50, "SMA20 > SMA50", "SMA20 < SMA50"));
        }
        if let Some(rsi14) = rsi14 {
            let verdict = if rsi14 > RSI_OVERBOUGHT {
                Verdict::Overbought
            } else if rsi14 < RSI_OVERSOLD {
                Verdict::Oversold
            } else {
                Verdict::Neutral
            };
            signals.push(Signal::new(format!("RSI = {rsi14:.1}"), verdict));
        }
        if let (Some(line), Some(signal)) = (macd_line, macd_signal) {
            signals.push(Signal::trend(line > signal, "MACD > Signal", "MACD < Signal"));
        }

        if signals.is_empty() {
            return None;
        }
        let count = |verdict: Verdict| signals.iter().filter(|s| s.verdict == verdict).count();
        Some(Self {
            bullish: count(Verdict::Bullish),
            bearish: count(Verdict::Bearish),
            signals,
        })
    }

    /// Share of bullish trend signals, in percent.
    pub fn bullish_percent(&self) -> Option<f64> {
        let total = self.bullish + self.bearish;
        (total > 0).then(|| self.bullish as f64 / total as f64 * 100.0)
    }
}
