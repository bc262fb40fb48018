use super::ui;
use crate::core::analytics::{DEFAULT_RISK_FREE_RATE, PriceSummary};
use crate::core::chart::{ChartSpec, SeriesStyle};
use crate::core::gateway::ProviderGateway;
use crate::core::indicators::{SignalSummary, Verdict};
use crate::core::router::{COMPARE_PARAM, Comparison, ModuleRouter, UserInputs};
use anyhow::Result;
use comfy_table::{Cell, Color};
use serde::Serialize;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct ShowOptions {
    /// Print the module view as JSON instead of tables.
    pub json: bool,
    /// Trailing data rows to print.
    pub rows: usize,
    /// Annual risk-free rate for Sharpe and Sortino ratios.
    pub risk_free_rate: f64,
}

impl Default for ShowOptions {
    fn default() -> Self {
        Self {
            json: false,
            rows: 10,
            risk_free_rate: DEFAULT_RISK_FREE_RATE,
        }
    }
}

/// Everything one module displays: its chart plus whatever analysis the
/// module asks for.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleView {
    pub chart: ChartSpec,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<PriceSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signals: Option<SignalSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comparison: Option<Comparison>,
}

fn style_name(style: &SeriesStyle) -> &'static str {
    match style {
        SeriesStyle::Line => "line",
        SeriesStyle::Area => "area",
        SeriesStyle::Bar => "bar",
        SeriesStyle::Candle(_) => "candle",
    }
}

fn number_cell(value: Option<f64>) -> Cell {
    ui::format_optional_cell(value, |v| format!("{v:.2}"))
}

fn percent_cell(value: Option<f64>) -> Cell {
    ui::format_optional_cell(value, |v| format!("{v:.2}%"))
}

fn series_table(spec: &ChartSpec) -> comfy_table::Table {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Series"),
        ui::header_cell("Style"),
        ui::header_cell("Panel"),
        ui::header_cell("Last"),
        ui::header_cell("Min"),
        ui::header_cell("Max"),
    ]);
    for series in &spec.series {
        table.add_row(vec![
            Cell::new(&series.name),
            Cell::new(style_name(&series.style)),
            Cell::new(series.panel),
            number_cell(series.last()),
            number_cell(series.min()),
            number_cell(series.max()),
        ]);
    }
    table
}

fn data_table(spec: &ChartSpec, rows: usize) -> comfy_table::Table {
    let mut table = ui::new_styled_table();
    let mut header = vec![ui::header_cell(&spec.x_axis.label)];
    header.extend(spec.series.iter().map(|s| ui::header_cell(&s.name)));
    table.set_header(header);

    let start = spec.x.len().saturating_sub(rows);
    for (i, x) in spec.x.iter().enumerate().skip(start) {
        let mut row = vec![Cell::new(x.to_string())];
        row.extend(
            spec.series
                .iter()
                .map(|s| number_cell(s.values.get(i).copied().flatten())),
        );
        table.add_row(row);
    }
    table
}

fn summary_table(summary: &PriceSummary) -> comfy_table::Table {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Last Close"),
        ui::header_cell("Day Change"),
        ui::header_cell("Period Return"),
        ui::header_cell("Daily Volatility"),
        ui::header_cell("High"),
        ui::header_cell("Low"),
    ]);
    table.add_row(vec![
        number_cell(Some(summary.last_close)),
        ui::change_cell(summary.last_change),
        ui::change_cell(Some(summary.period_return)),
        percent_cell(summary.daily_volatility),
        number_cell(summary.high),
        number_cell(summary.low),
    ]);
    table
}

fn risk_table(summary: &PriceSummary) -> comfy_table::Table {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Ann. Return"),
        ui::header_cell("Ann. Volatility"),
        ui::header_cell("Sharpe"),
        ui::header_cell("Sortino"),
        ui::header_cell("Max Drawdown"),
        ui::header_cell("VaR 95%"),
        ui::header_cell("Best Day"),
        ui::header_cell("Worst Day"),
    ]);
    table.add_row(vec![
        ui::change_cell(summary.annualized_return),
        percent_cell(summary.annualized_volatility),
        number_cell(summary.sharpe_ratio),
        number_cell(summary.sortino_ratio),
        percent_cell(summary.max_drawdown),
        percent_cell(summary.var_95),
        ui::change_cell(summary.best_day),
        ui::change_cell(summary.worst_day),
    ]);
    table
}

fn signals_table(signals: &SignalSummary) -> comfy_table::Table {
    let mut table = ui::new_styled_table();
    table.set_header(vec![ui::header_cell("Signal"), ui::header_cell("Reading")]);
    for signal in &signals.signals {
        let verdict = Cell::new(signal.verdict.to_string());
        let verdict = match signal.verdict {
            Verdict::Bullish | Verdict::Oversold => verdict.fg(Color::Green),
            Verdict::Bearish | Verdict::Overbought => verdict.fg(Color::Red),
            Verdict::Neutral => verdict,
        };
        table.add_row(vec![Cell::new(&signal.condition), verdict]);
    }
    table
}

fn comparison_table(comparison: &Comparison) -> comfy_table::Table {
    let mut table = ui::new_styled_table();
    table.set_header(vec![
        ui::header_cell("Symbol"),
        ui::header_cell("Normalized"),
        ui::header_cell("Change"),
    ]);
    for series in &comparison.chart.series {
        let last = series.last();
        table.add_row(vec![
            Cell::new(&series.name),
            number_cell(last),
            ui::change_cell(last.map(|v| v - 100.0)),
        ]);
    }
    table
}

fn correlation_table(comparison: &Comparison) -> comfy_table::Table {
    let matrix = &comparison.correlation;
    let mut table = ui::new_styled_table();
    let mut header = vec![ui::header_cell("")];
    header.extend(matrix.symbols.iter().map(|s| ui::header_cell(s)));
    table.set_header(header);
    for (symbol, row) in matrix.symbols.iter().zip(&matrix.values) {
        let mut cells = vec![Cell::new(symbol)];
        cells.extend(
            row.iter()
                .map(|v| ui::format_optional_cell(*v, |v| format!("{v:.3}"))),
        );
        table.add_row(cells);
    }
    table
}

fn section(title: &str, body: impl std::fmt::Display) -> String {
    format!(
        "\n{}\n{}\n",
        ui::style_text(title, ui::StyleType::Label),
        body
    )
}

/// Formats a chart specification for the terminal.
pub fn render_spec(spec: &ChartSpec, summary: Option<&PriceSummary>, rows: usize) -> String {
    let mut output = format!(
        "Chart: {} ({})\n",
        ui::style_text(&spec.title, ui::StyleType::Title),
        spec.kind
    );

    if let Some(diagnostic) = &spec.diagnostic {
        output.push_str(&format!(
            "\n{} {}\n",
            ui::style_text("Error:", ui::StyleType::Label),
            ui::style_text(diagnostic, ui::StyleType::Error)
        ));
        return output;
    }

    match spec.x_range() {
        Some((first, last)) => output.push_str(&format!(
            "{}\n",
            ui::style_text(
                &format!("{} to {} ({} points)", first, last, spec.x.len()),
                ui::StyleType::Subtle
            )
        )),
        None => {
            output.push_str(&format!(
                "\n{}\n",
                ui::style_text("No data for the requested range", ui::StyleType::Subtle)
            ));
            return output;
        }
    }

    output.push_str(&format!("\n{}\n", series_table(spec)));
    if rows > 0 {
        output.push_str(&format!("\n{}\n", data_table(spec, rows)));
    }
    if let Some(summary) = summary {
        output.push_str(&section("Summary", summary_table(summary)));
        output.push_str(&section("Risk", risk_table(summary)));
    }
    output
}

pub fn render_view(view: &ModuleView, rows: usize) -> String {
    let mut output = render_spec(&view.chart, view.summary.as_ref(), rows);

    if let Some(signals) = &view.signals {
        output.push_str(&section("Signals", signals_table(signals)));
        if let Some(percent) = signals.bullish_percent() {
            output.push_str(&format!(
                "{} bullish, {} bearish ({percent:.0}% bullish)\n",
                signals.bullish, signals.bearish
            ));
        }
    }

    if let Some(comparison) = &view.comparison {
        output.push_str(&section(
            &format!("Comparison: {}", comparison.chart.title),
            comparison_table(comparison),
        ));
        if comparison.correlation.symbols.len() > 1 {
            output.push_str(&section(
                "Return correlation",
                correlation_table(comparison),
            ));
        }
        for (symbol, reason) in &comparison.failures {
            output.push_str(&format!(
                "{} {}\n",
                ui::style_text(&format!("Skipped {symbol}:"), ui::StyleType::Label),
                ui::style_text(reason, ui::StyleType::Error)
            ));
        }
    }
    output
}

/// Dispatches `label` and gathers the summary, signals and comparison
/// the module is configured for.
pub async fn load_view<G: ProviderGateway>(
    router: &ModuleRouter<G>,
    label: &str,
    inputs: &UserInputs,
    options: &ShowOptions,
) -> Result<ModuleView> {
    let descriptor = router.resolve(label)?;
    let chart = router.dispatch(descriptor, inputs).await?;

    // The dispatch above just populated the cache for this query
    let result = match descriptor.query_for(inputs) {
        Ok(query) if chart.diagnostic.is_none() => router.cache().get(&query).await,
        Ok(_) => None,
        Err(e) => {
            debug!("No cached result for {}: {}", label, e);
            None
        }
    };
    let summary = result
        .as_ref()
        .and_then(|r| PriceSummary::from_table_with_rate(&r.table, options.risk_free_rate));
    let signals = result
        .as_ref()
        .filter(|_| descriptor.signals)
        .and_then(|r| SignalSummary::from_table(&r.table));

    let comparison = if descriptor.compare.is_empty() && !inputs.contains_key(COMPARE_PARAM) {
        None
    } else {
        match router.compare(descriptor, inputs).await {
            Ok(comparison) => Some(comparison),
            Err(e) => {
                warn!(error = %e, "Comparison skipped for {}", label);
                None
            }
        }
    };

    Ok(ModuleView {
        chart,
        summary,
        signals,
        comparison,
    })
}

/// The module view as terminal text, or as JSON.
pub async fn view<G: ProviderGateway>(
    router: &ModuleRouter<G>,
    label: &str,
    inputs: &UserInputs,
    options: &ShowOptions,
) -> Result<String> {
    let view = load_view(router, label, inputs, options).await?;
    if options.json {
        return Ok(serde_json::to_string_pretty(&view)?);
    }
    Ok(render_view(&view, options.rows))
}

pub async fn run<G: ProviderGateway>(
    router: &ModuleRouter<G>,
    label: &str,
    inputs: &UserInputs,
    options: &ShowOptions,
) -> Result<()> {
    println!("{}", view(router, label, inputs, options).await?);
    Ok(())
}
