//! Renderer-agnostic chart descriptions built from fetched tables.

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;

use crate::core::analytics::{AlignedCloses, normalize};
use crate::core::error::PipelineError;
use crate::core::result::FetchResult;
use crate::core::table::{Table, Value};

const X_COLUMNS: [&str; 2] = ["date", "timestamp"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartKind {
    Line,
    Area,
    Bar,
    Candlestick,
}

impl Display for ChartKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                ChartKind::Line => "line",
                ChartKind::Area => "area",
                ChartKind::Bar => "bar",
                ChartKind::Candlestick => "candlestick",
            }
        )
    }
}

impl FromStr for ChartKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "line" => Ok(ChartKind::Line),
            "area" => Ok(ChartKind::Area),
            "bar" => Ok(ChartKind::Bar),
            "candlestick" | "candle" | "ohlc" => Ok(ChartKind::Candlestick),
            _ => Err(anyhow::anyhow!("Invalid chart kind: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OhlcField {
    Open,
    High,
    Low,
    Close,
}

impl OhlcField {
    pub const ALL: [OhlcField; 4] = [
        OhlcField::Open,
        OhlcField::High,
        OhlcField::Low,
        OhlcField::Close,
    ];

    pub fn column(&self) -> &'static str {
        match self {
            OhlcField::Open => "open",
            OhlcField::High => "high",
            OhlcField::Low => "low",
            OhlcField::Close => "close",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "field")]
pub enum SeriesStyle {
    Line,
    Area,
    Bar,
    Candle(OhlcField),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub name: String,
    pub style: SeriesStyle,
    /// 0 is the main panel; higher panels stack below it.
    pub panel: u8,
    pub values: Vec<Option<f64>>,
}

impl Series {
    pub fn new(name: impl Into<String>, style: SeriesStyle, values: Vec<Option<f64>>) -> Self {
        Self {
            name: name.into(),
            style,
            panel: 0,
            values,
        }
    }

    pub fn on_panel(mut self, panel: u8) -> Self {
        self.panel = panel;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.values.iter().all(Option::is_none)
    }

    pub fn last(&self) -> Option<f64> {
        self.values.iter().rev().find_map(|v| *v)
    }

    pub fn min(&self) -> Option<f64> {
        self.values.iter().flatten().copied().reduce(f64::min)
    }

    pub fn max(&self) -> Option<f64> {
        self.values.iter().flatten().copied().reduce(f64::max)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Axis {
    pub label: String,
}

impl Axis {
    fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSpec {
    pub title: String,
    pub kind: ChartKind,
    pub x_axis: Axis,
    pub y_axis: Axis,
    /// Shared x coordinates; every series has one value per entry.
    pub x: Vec<Value>,
    pub series: Vec<Series>,
    /// Set when the underlying fetch failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

impl ChartSpec {
    fn failed(kind: ChartKind, diagnostic: &str) -> Self {
        Self {
            title: String::new(),
            kind,
            x_axis: Axis::default(),
            y_axis: Axis::default(),
            x: Vec::new(),
            series: Vec::new(),
            diagnostic: Some(diagnostic.to_string()),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn series(&self, name: &str) -> Option<&Series> {
        self.series.iter().find(|s| s.name == name)
    }

    /// Appends a series aligned with the existing x coordinates.
    pub fn push_series(&mut self, series: Series) {
        debug_assert_eq!(series.values.len(), self.x.len());
        self.series.push(series);
    }

    pub fn x_range(&self) -> Option<(&Value, &Value)> {
        Some((self.x.first()?, self.x.last()?))
    }

    pub fn panels(&self) -> u8 {
        self.series.iter().map(|s| s.panel + 1).max().unwrap_or(0)
    }
}

/// Builds a chart description for `result`.
///
/// Failed results render to an empty chart carrying the diagnostic. Tables
/// that lack the columns `kind` needs are rejected with
/// [`PipelineError::ShapeMismatch`].
pub fn render(result: &FetchResult, kind: ChartKind) -> Result<ChartSpec, PipelineError> {
    if let Some(diagnostic) = result.diagnostic() {
        return Ok(ChartSpec::failed(kind, diagnostic));
    }

    let table = &result.table;
    let (x_name, x) = x_values(table);

    let (y_label, series) = match kind {
        ChartKind::Candlestick => ("price", candlestick_series(table)?),
        ChartKind::Line => value_series(table, x_name, "close", SeriesStyle::Line, kind)?,
        ChartKind::Area => value_series(table, x_name, "close", SeriesStyle::Area, kind)?,
        ChartKind::Bar => value_series(table, x_name, "volume", SeriesStyle::Bar, kind)?,
    };

    Ok(ChartSpec {
        title: String::new(),
        kind,
        x_axis: Axis::new(x_name.unwrap_or("row")),
        y_axis: Axis::new(y_label),
        x,
        series,
        diagnostic: None,
    })
}

/// A bar series of the `volume` column on the panel below the main one.
pub fn volume_panel(table: &Table) -> Option<Series> {
    table
        .float_column("volume")
        .map(|values| Series::new("volume", SeriesStyle::Bar, values).on_panel(1))
}

/// One line per symbol, each rebased to 100 on the first shared date.
pub fn normalized_comparison(aligned: &AlignedCloses) -> ChartSpec {
    ChartSpec {
        title: String::new(),
        kind: ChartKind::Line,
        x_axis: Axis::new("date"),
        y_axis: Axis::new("normalized (base 100)"),
        x: aligned.dates.iter().copied().map(Value::Date).collect(),
        series: aligned
            .symbols
            .iter()
            .zip(&aligned.closes)
            .map(|(symbol, closes)| Series::new(symbol.clone(), SeriesStyle::Line, normalize(closes)))
            .collect(),
        diagnostic: None,
    }
}

fn x_values(table: &Table) -> (Option<&'static str>, Vec<Value>) {
    for name in X_COLUMNS {
        if let Some(column) = table.column(name) {
            return (Some(name), column.values.clone());
        }
    }
    (None, (0..table.len() as i64).map(Value::Int).collect())
}

// A column that exists but holds text counts as missing.
fn plottable(table: &Table, name: &str) -> bool {
    table.column(name).is_some_and(|c| c.holds_only_numbers())
}

fn candlestick_series(table: &Table) -> Result<Vec<Series>, PipelineError> {
    let missing: Vec<String> = OhlcField::ALL
        .iter()
        .filter(|f| !plottable(table, f.column()))
        .map(|f| f.column().to_string())
        .collect();
    if !missing.is_empty() {
        return Err(PipelineError::ShapeMismatch {
            kind: ChartKind::Candlestick,
            missing,
        });
    }

    Ok(OhlcField::ALL
        .iter()
        .filter_map(|field| {
            table
                .float_column(field.column())
                .map(|values| Series::new(field.column(), SeriesStyle::Candle(*field), values))
        })
        .collect())
}

// Prefers the named column, falling back to one series per numeric column.
fn value_series(
    table: &Table,
    x_name: Option<&str>,
    preferred: &'static str,
    style: SeriesStyle,
    kind: ChartKind,
) -> Result<(&'static str, Vec<Series>), PipelineError> {
    if table.has_column(preferred) {
        if !plottable(table, preferred) {
            return Err(PipelineError::ShapeMismatch {
                kind,
                missing: vec![preferred.to_string()],
            });
        }
        let values = table.float_column(preferred).unwrap_or_default();
        let label = if preferred == "close" { "price" } else { preferred };
        return Ok((label, vec![Series::new(preferred, style, values)]));
    }

    let series: Vec<Series> = table
        .columns()
        .iter()
        .filter(|c| Some(c.name.as_str()) != x_name && c.is_numeric())
        .map(|c| Series::new(c.name.clone(), style, c.values.iter().map(Value::as_f64).collect()))
        .collect();

    if series.is_empty() {
        return Err(PipelineError::ShapeMismatch {
            kind,
            missing: vec![preferred.to_string()],
        });
    }
    Ok(("value", series))
}
