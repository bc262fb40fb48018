//! Summary statistics over fetched price tables: headline and risk
//! numbers for one symbol, and normalized comparison and correlation
//! across several.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::core::table::{Table, Value};

/// Trading days used to annualize daily statistics.
pub const TRADING_DAYS: f64 = 252.0;

/// Annual risk-free rate (as a fraction) used for Sharpe and Sortino
/// ratios unless configured otherwise.
pub const DEFAULT_RISK_FREE_RATE: f64 = 0.05;

/// Headline numbers shown next to a price chart. Percentages are in
/// percent units (`1.5` means 1.5%); ratios are plain numbers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceSummary {
    pub last_close: f64,
    /// Change of the last close versus the one before it.
    pub last_change: Option<f64>,
    /// Change from the first to the last close in the table.
    pub period_return: f64,
    /// Sample standard deviation of daily returns.
    pub daily_volatility: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    /// Mean daily return times the trading days in a year.
    pub annualized_return: Option<f64>,
    pub annualized_volatility: Option<f64>,
    pub sharpe_ratio: Option<f64>,
    /// Like Sharpe, over the volatility of losing days only.
    pub sortino_ratio: Option<f64>,
    /// Deepest fall from a running peak close; zero or negative.
    pub max_drawdown: Option<f64>,
    /// 5th percentile of daily returns.
    pub var_95: Option<f64>,
    pub best_day: Option<f64>,
    pub worst_day: Option<f64>,
}

impl PriceSummary {
    /// Returns `None` when the table has no usable `close` values.
    pub fn from_table(table: &Table) -> Option<Self> {
        Self::from_table_with_rate(table, DEFAULT_RISK_FREE_RATE)
    }

    pub fn from_table_with_rate(table: &Table, risk_free_rate: f64) -> Option<Self> {
        let closes: Vec<f64> = table.float_column("close")?.into_iter().flatten().collect();
        let first = *closes.first()?;
        let last_close = *closes.last()?;

        let returns = daily_returns(&closes);
        let last_change = returns.last().map(|r| r * 100.0);
        let period_return = if first != 0.0 {
            (last_close / first - 1.0) * 100.0
        } else {
            0.0
        };

        let extreme = |name: &str, pick: fn(f64, f64) -> f64| {
            table
                .float_column(name)
                .and_then(|col| col.into_iter().flatten().reduce(pick))
        };

        let daily_std = std_dev(&returns);
        let annual_return = mean(&returns).map(|m| m * TRADING_DAYS);
        let annual_vol = daily_std.map(|s| s * TRADING_DAYS.sqrt());
        let losses: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
        let downside_vol = std_dev(&losses).map(|s| s * TRADING_DAYS.sqrt());
        let excess_over = |vol: Option<f64>| {
            let (ret, vol) = (annual_return?, vol?);
            (vol > 0.0).then(|| (ret - risk_free_rate) / vol)
        };

        Some(Self {
            last_close,
            last_change,
            period_return,
            daily_volatility: daily_std.map(|s| s * 100.0),
            high: extreme("high", f64::max).or_else(|| closes.iter().copied().reduce(f64::max)),
            low: extreme("low", f64::min).or_else(|| closes.iter().copied().reduce(f64::min)),
            annualized_return: annual_return.map(|r| r * 100.0),
            annualized_volatility: annual_vol.map(|v| v * 100.0),
            sharpe_ratio: excess_over(annual_vol),
            sortino_ratio: excess_over(downside_vol),
            max_drawdown: max_drawdown(&closes).map(|d| d * 100.0),
            var_95: quantile(&returns, 0.05).map(|q| q * 100.0),
            best_day: returns.iter().copied().reduce(f64::max).map(|r| r * 100.0),
            worst_day: returns.iter().copied().reduce(f64::min).map(|r| r * 100.0),
        })
    }
}

fn daily_returns(closes: &[f64]) -> Vec<f64> {
    closes
        .windows(2)
        .filter(|w| w[0] != 0.0)
        .map(|w| w[1] / w[0] - 1.0)
        .collect()
}

fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

fn std_dev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Some(variance.sqrt())
}

fn max_drawdown(closes: &[f64]) -> Option<f64> {
    let mut peak = f64::NEG_INFINITY;
    closes
        .iter()
        .filter_map(|&close| {
            peak = peak.max(close);
            (peak > 0.0).then(|| close / peak - 1.0)
        })
        .reduce(f64::min)
}

// Linear interpolation between the closest ranks.
fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let position = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let (lower, upper) = (position.floor() as usize, position.ceil() as usize);
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * (position - lower as f64))
}

/// Closes of several symbols restricted to the dates they all share.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AlignedCloses {
    pub dates: Vec<NaiveDate>,
    pub symbols: Vec<String>,
    /// One row of closes per symbol, parallel to `dates`.
    pub closes: Vec<Vec<f64>>,
}

impl AlignedCloses {
    /// Tables without a `date` and a `close` column are left out.
    pub fn align(tables: &[(String, &Table)]) -> Self {
        let dated: Vec<(String, BTreeMap<NaiveDate, f64>)> = tables
            .iter()
            .filter_map(|(symbol, table)| Some((symbol.clone(), dated_closes(table)?)))
            .collect();
        let Some((_, first)) = dated.first() else {
            return Self::default();
        };

        let dates: Vec<NaiveDate> = first
            .keys()
            .filter(|date| dated.iter().all(|(_, closes)| closes.contains_key(*date)))
            .copied()
            .collect();
        let closes = dated
            .iter()
            .map(|(_, by_date)| dates.iter().filter_map(|d| by_date.get(d).copied()).collect())
            .collect();
        Self {
            symbols: dated.into_iter().map(|(symbol, _)| symbol).collect(),
            dates,
            closes,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }
}

fn dated_closes(table: &Table) -> Option<BTreeMap<NaiveDate, f64>> {
    let dates = table.column("date")?;
    let closes = table.float_column("close")?;
    let by_date = dates
        .values
        .iter()
        .zip(closes)
        .filter_map(|(date, close)| match (date, close) {
            (Value::Date(date), Some(close)) => Some((*date, close)),
            _ => None,
        })
        .collect();
    Some(by_date)
}

/// Rebases `closes` so the first value reads 100. All `None` when the
/// first close is zero.
pub fn normalize(closes: &[f64]) -> Vec<Option<f64>> {
    let base = closes.first().copied().filter(|b| *b != 0.0);
    closes
        .iter()
        .map(|close| base.map(|b| close / b * 100.0))
        .collect()
}

/// Pearson correlation of daily returns between every pair of symbols.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CorrelationMatrix {
    pub symbols: Vec<String>,
    /// `None` where a series is flat or too short.
    pub values: Vec<Vec<Option<f64>>>,
}

impl CorrelationMatrix {
    pub fn from_aligned(aligned: &AlignedCloses) -> Self {
        let returns: Vec<Vec<Option<f64>>> = aligned
            .closes
            .iter()
            .map(|closes| {
                closes
                    .windows(2)
                    .map(|w| (w[0] != 0.0).then(|| w[1] / w[0] - 1.0))
                    .collect()
            })
            .collect();
        let values = returns
            .iter()
            .map(|a| returns.iter().map(|b| pearson(a, b)).collect())
            .collect();
        Self {
            symbols: aligned.symbols.clone(),
            values,
        }
    }

    pub fn get(&self, a: &str, b: &str) -> Option<f64> {
        let i = self.symbols.iter().position(|s| s == a)?;
        let j = self.symbols.iter().position(|s| s == b)?;
        self.values[i][j]
    }
}

fn pearson(a: &[Option<f64>], b: &[Option<f64>]) -> Option<f64> {
    let (xs, ys): (Vec<f64>, Vec<f64>) = a
        .iter()
        .zip(b)
        .filter_map(|(x, y)| Some(((*x)?, (*y)?)))
        .unzip();
    let (mx, my) = (mean(&xs)?, mean(&ys)?);
    if xs.len() < 2 {
        return None;
    }
    let covariance: f64 = xs.iter().zip(&ys).map(|(x, y)| (x - mx) * (y - my)).sum();
    let spread_x: f64 = xs.iter().map(|x| (x - mx).powi(2)).sum();
    let spread_y: f64 = ys.iter().map(|y| (y - my).powi(2)).sum();
    let denominator = (spread_x * spread_y).sqrt();
    (denominator > 0.0).then(|| covariance / denominator)
}
