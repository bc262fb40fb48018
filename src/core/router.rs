//! Maps module labels to a query template and a chart kind, and runs the
//! fetch-and-render chain for a single interaction.

use anyhow::{Result as AnyResult, bail};
use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::core::analytics::{AlignedCloses, CorrelationMatrix};
use crate::core::cache::ResultCache;
use crate::core::chart::{self, ChartKind, ChartSpec};
use crate::core::error::PipelineError;
use crate::core::gateway::{END_PARAM, ProviderGateway, START_PARAM, SYMBOL_PARAM, parse_date};
use crate::core::indicators::Overlay;
use crate::core::period::RangePreset;
use crate::core::query::Query;
use crate::core::result::FetchResult;
use crate::core::table::Table;

/// User input that expands into `start_date`/`end_date`.
pub const RANGE_PARAM: &str = "range";

/// Comma-separated symbols replacing a module's comparison set.
pub const COMPARE_PARAM: &str = "compare";

pub type UserInputs = HashMap<String, String>;

/// A selectable dashboard module. Read-only once registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    pub label: String,
    #[serde(default)]
    pub description: String,
    pub query: Query,
    pub chart: ChartKind,
    #[serde(default)]
    pub overlays: Vec<Overlay>,
    #[serde(default)]
    pub show_volume: bool,
    /// Symbols compared against each other, normalized to 100.
    #[serde(default)]
    pub compare: Vec<String>,
    /// Show the bullish/bearish signal summary.
    #[serde(default)]
    pub signals: bool,
}

impl ModuleDescriptor {
    pub fn new(label: impl Into<String>, query: Query, chart: ChartKind) -> Self {
        Self {
            label: label.into(),
            description: String::new(),
            query,
            chart,
            overlays: Vec::new(),
            show_volume: false,
            compare: Vec::new(),
            signals: false,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_overlays(mut self, overlays: impl IntoIterator<Item = Overlay>) -> Self {
        self.overlays.extend(overlays);
        self
    }

    pub fn with_volume(mut self) -> Self {
        self.show_volume = true;
        self
    }

    pub fn comparing<S: Into<String>>(mut self, symbols: impl IntoIterator<Item = S>) -> Self {
        self.compare.extend(symbols.into_iter().map(Into::into));
        self
    }

    pub fn with_signals(mut self) -> Self {
        self.signals = true;
        self
    }

    /// The concrete query issued for `inputs`.
    pub fn query_for(&self, inputs: &UserInputs) -> Result<Query, PipelineError> {
        let mut inputs = expand_range(inputs)?;
        inputs.remove(COMPARE_PARAM);
        Ok(self.query.merged(&inputs))
    }

    /// Symbols to compare: the `compare` input when given, else the
    /// module's own list. Blanks and repeats are dropped.
    pub fn compare_symbols(&self, inputs: &UserInputs) -> Vec<String> {
        let requested: Vec<String> = match inputs.get(COMPARE_PARAM) {
            Some(list) => list.split(',').map(str::to_string).collect(),
            None => self.compare.clone(),
        };
        let mut symbols: Vec<String> = Vec::new();
        for symbol in requested.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
            if !symbols.iter().any(|s| s == symbol) {
                symbols.push(symbol.to_string());
            }
        }
        symbols
    }
}

/// Several symbols on one normalized chart, with the correlation of
/// their daily returns.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Comparison {
    pub chart: ChartSpec,
    pub correlation: CorrelationMatrix,
    /// Symbols left out, with the reason.
    pub failures: Vec<(String, String)>,
}

// Replaces a `range` preset with a start date relative to the requested
// end (or today). An explicit start date wins over the preset.
fn expand_range(inputs: &UserInputs) -> Result<UserInputs, PipelineError> {
    let mut expanded = inputs.clone();
    let Some(preset) = expanded.remove(RANGE_PARAM) else {
        return Ok(expanded);
    };
    let preset: RangePreset = preset
        .parse()
        .map_err(|e: anyhow::Error| PipelineError::invalid_query(e.to_string()))?;

    let end = match expanded.get(END_PARAM) {
        Some(end) => parse_date(END_PARAM, end)?,
        None => Utc::now().date_naive(),
    };
    let (start, end) = preset.window_ending(end).ok_or_else(|| {
        PipelineError::invalid_query(format!(
            "range {preset} ending {end} starts before the earliest date"
        ))
    })?;
    expanded
        .entry(START_PARAM.to_string())
        .or_insert_with(|| start.format("%Y-%m-%d").to_string());
    expanded
        .entry(END_PARAM.to_string())
        .or_insert_with(|| end.format("%Y-%m-%d").to_string());
    Ok(expanded)
}

/// Routes module labels through a shared [`ResultCache`].
pub struct ModuleRouter<G: ProviderGateway> {
    modules: Vec<ModuleDescriptor>,
    cache: Arc<ResultCache<G>>,
    ttl: Duration,
}

impl<G: ProviderGateway> ModuleRouter<G> {
    /// Registers `modules` in display order. Labels must be unique.
    pub fn new(cache: Arc<ResultCache<G>>, modules: Vec<ModuleDescriptor>) -> AnyResult<Self> {
        for (i, module) in modules.iter().enumerate() {
            if modules[..i].iter().any(|m| m.label == module.label) {
                bail!("Duplicate module label: {}", module.label);
            }
        }
        let ttl = cache.default_ttl();
        Ok(Self {
            modules,
            cache,
            ttl,
        })
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn modules(&self) -> &[ModuleDescriptor] {
        &self.modules
    }

    pub fn cache(&self) -> &Arc<ResultCache<G>> {
        &self.cache
    }

    pub fn resolve(&self, label: &str) -> Result<&ModuleDescriptor, PipelineError> {
        let label = label.trim();
        self.modules
            .iter()
            .find(|m| m.label == label)
            .ok_or_else(|| PipelineError::UnknownModule(label.to_string()))
    }

    /// Fetches through the cache and renders the module's chart.
    #[instrument(name = "Dispatch", skip(self, descriptor, inputs), fields(module = %descriptor.label))]
    pub async fn dispatch(
        &self,
        descriptor: &ModuleDescriptor,
        inputs: &UserInputs,
    ) -> Result<ChartSpec, PipelineError> {
        let query = descriptor.query_for(inputs)?;
        debug!(%query, "Dispatching module query");

        let result = self.cache.get_or_fetch(&query, self.ttl).await?;
        let mut spec = chart::render(&result, descriptor.chart)?;
        if spec.diagnostic.is_some() {
            return Ok(spec.with_title(descriptor.label.clone()));
        }

        if descriptor.show_volume {
            if let Some(volume) = chart::volume_panel(&result.table) {
                spec.push_series(volume);
            }
        }
        for overlay in &descriptor.overlays {
            let panel = if overlay.lower_panel() { spec.panels() } else { 0 };
            for series in overlay.series(&result.table) {
                spec.push_series(series.on_panel(panel));
            }
        }

        let title = query
            .param(SYMBOL_PARAM)
            .map_or_else(|| descriptor.label.clone(), str::to_string);
        Ok(spec.with_title(title))
    }

    /// Resolves `label` and dispatches it in one step.
    pub async fn show(&self, label: &str, inputs: &UserInputs) -> Result<ChartSpec, PipelineError> {
        let descriptor = self.resolve(label)?;
        self.dispatch(descriptor, inputs).await
    }

    /// Fetches every comparison symbol through the cache and lines their
    /// closes up on shared dates. Symbols that fail to fetch or carry no
    /// dated closes are reported in [`Comparison::failures`].
    #[instrument(name = "Compare", skip(self, descriptor, inputs), fields(module = %descriptor.label))]
    pub async fn compare(
        &self,
        descriptor: &ModuleDescriptor,
        inputs: &UserInputs,
    ) -> Result<Comparison, PipelineError> {
        let symbols = descriptor.compare_symbols(inputs);
        if symbols.len() < 2 {
            return Err(PipelineError::invalid_query(
                "comparison needs at least two symbols",
            ));
        }
        let queries = symbols
            .iter()
            .map(|symbol| {
                let mut inputs = inputs.clone();
                inputs.insert(SYMBOL_PARAM.to_string(), symbol.clone());
                descriptor.query_for(&inputs)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let results = join_all(
            queries
                .iter()
                .map(|query| self.cache.get_or_fetch(query, self.ttl)),
        )
        .await;

        let mut fetched = Vec::new();
        let mut failures = Vec::new();
        for (symbol, result) in symbols.into_iter().zip(results) {
            match result {
                Ok(result) => match result.diagnostic() {
                    Some(diagnostic) => failures.push((symbol, diagnostic.to_string())),
                    None => fetched.push((symbol, result)),
                },
                Err(e) => failures.push((symbol, e.to_string())),
            }
        }

        let tables: Vec<(String, &Table)> = fetched
            .iter()
            .map(|(symbol, result)| (symbol.clone(), &result.table))
            .collect();
        let aligned = AlignedCloses::align(&tables);
        for (symbol, _) in &tables {
            if !aligned.symbols.contains(symbol) {
                failures.push((symbol.clone(), "no dated close prices".to_string()));
            }
        }
        info!(
            symbols = aligned.symbols.len(),
            dates = aligned.dates.len(),
            failures = failures.len(),
            "Comparison aligned"
        );

        let title = aligned.symbols.join(" / ");
        Ok(Comparison {
            chart: chart::normalized_comparison(&aligned).with_title(title),
            correlation: CorrelationMatrix::from_aligned(&aligned),
            failures,
        })
    }

    /// Warms the cache for every module with its template defaults.
    pub async fn prefetch(&self) -> Vec<(String, Result<Arc<FetchResult>, PipelineError>)> {
        let inputs = UserInputs::new();
        let futures = self.modules.iter().map(|module| {
            let inputs = &inputs;
            async move {
                let result = match module.query_for(inputs) {
                    Ok(query) => self.cache.get_or_fetch(&query, self.ttl).await,
                    Err(e) => Err(e),
                };
                (module.label.clone(), result)
            }
        });
        let results = join_all(futures).await;
        info!(modules = results.len(), "Prefetch complete");
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::gateway::require_symbol;
    use crate::core::table::{Column, Table};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingGateway {
        calls: AtomicUsize,
        last_query: Mutex<Option<Query>>,
    }

    #[async_trait]
    impl ProviderGateway for RecordingGateway {
        fn validate(&self, query: &Query) -> Result<(), PipelineError> {
            require_symbol(query).map(|_| ())
        }

        async fn fetch(&self, query: &Query) -> Result<FetchResult, PipelineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_query.lock().unwrap() = Some(query.clone());
            if query.param(SYMBOL_PARAM) == Some("FAIL") {
                return Ok(FetchResult::failure(query.provider(), "HTTP error: 404 Not Found"));
            }
            let start = chrono::NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
            let closes = (0..30).map(|i| Some(100.0 + i as f64));
            let table = Table::new(vec![
                Column::dates("date", (0..30).map(|i| start + chrono::Days::new(i))),
                Column::floats("close", closes),
                Column::floats("volume", (0..30).map(|_| Some(1000.0))),
            ])
            .unwrap();
            Ok(FetchResult::success(query.provider(), table))
        }
    }

    fn router() -> ModuleRouter<RecordingGateway> {
        let cache = Arc::new(ResultCache::new(RecordingGateway::default()));
        let modules = vec![
            ModuleDescriptor::new(
                "Equity",
                Query::new("stub", "equity.price.historical").with_param(SYMBOL_PARAM, "QQQ"),
                ChartKind::Line,
            )
            .with_volume()
            .with_overlays([Overlay::Sma(20)]),
            ModuleDescriptor::new(
                "Momentum",
                Query::new("stub", "equity.price.historical").with_param(SYMBOL_PARAM, "QQQ"),
                ChartKind::Line,
            )
            .with_overlays([Overlay::Bollinger(5), Overlay::Rsi(14), Overlay::Macd])
            .comparing(["QQQ", "SPY"]),
            ModuleDescriptor::new(
                "Candles",
                Query::new("stub", "equity.price.historical").with_param(SYMBOL_PARAM, "QQQ"),
                ChartKind::Candlestick,
            ),
        ];
        ModuleRouter::new(cache, modules).unwrap()
    }

    fn inputs(pairs: &[(&str, &str)]) -> UserInputs {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_resolve_unknown_module() {
        let router = router();
        assert_eq!(router.resolve(" Equity ").unwrap().label, "Equity");
        assert_eq!(
            router.resolve("Options").unwrap_err(),
            PipelineError::UnknownModule("Options".to_string())
        );
    }

    #[test]
    fn test_duplicate_labels_rejected() {
        let cache = Arc::new(ResultCache::new(RecordingGateway::default()));
        let module = ModuleDescriptor::new("Dup", Query::new("stub", "f"), ChartKind::Line);
        assert!(ModuleRouter::new(cache, vec![module.clone(), module]).is_err());
    }

    #[tokio::test]
    async fn test_dispatch_merges_inputs_and_adds_overlays() {
        let router = router();
        let descriptor = router.resolve("Equity").unwrap();

        let spec = router
            .dispatch(descriptor, &inputs(&[("symbol", "AAPL"), ("provider", "alt")]))
            .await
            .unwrap();

        let recorded = router.cache().gateway().last_query.lock().unwrap().clone().unwrap();
        assert_eq!(recorded.provider(), "alt");
        assert_eq!(recorded.param(SYMBOL_PARAM), Some("AAPL"));

        assert_eq!(spec.title, "AAPL");
        let names: Vec<&str> = spec.series.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["close", "volume", "SMA20"]);
        assert_eq!(spec.panels(), 2);
    }

    #[tokio::test]
    async fn test_dispatch_uses_cache() {
        let router = router();
        let descriptor = router.resolve("Equity").unwrap();

        router.dispatch(descriptor, &UserInputs::new()).await.unwrap();
        router.dispatch(descriptor, &UserInputs::new()).await.unwrap();
        assert_eq!(router.cache().gateway().calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_ttl_refetches() {
        let router = router().with_ttl(Duration::ZERO);
        let descriptor = router.resolve("Equity").unwrap();

        router.dispatch(descriptor, &UserInputs::new()).await.unwrap();
        router.dispatch(descriptor, &UserInputs::new()).await.unwrap();
        assert_eq!(router.cache().gateway().calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_dispatch_shape_mismatch_is_raised() {
        let router = router();
        let err = router.show("Candles", &UserInputs::new()).await.unwrap_err();
        assert!(matches!(err, PipelineError::ShapeMismatch { .. }));
    }

    #[tokio::test]
    async fn test_dispatch_failed_fetch_shows_diagnostic() {
        let router = router();
        let spec = router
            .show("Equity", &inputs(&[("symbol", "FAIL")]))
            .await
            .unwrap();
        assert_eq!(spec.diagnostic.as_deref(), Some("HTTP error: 404 Not Found"));
        assert!(spec.series.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_inputs_rejected_before_cache() {
        let router = router();
        let err = router
            .show("Equity", &inputs(&[("symbol", " ")]))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidQuery(_)));
        assert!(router.cache().is_empty().await);
    }

    #[test]
    fn test_range_preset_expands_to_dates() {
        let expanded = expand_range(&inputs(&[("range", "1M"), ("end_date", "2024-03-31")])).unwrap();
        assert_eq!(expanded.get(START_PARAM).unwrap(), "2024-03-01");
        assert_eq!(expanded.get(END_PARAM).unwrap(), "2024-03-31");
        assert!(!expanded.contains_key(RANGE_PARAM));

        let explicit = expand_range(&inputs(&[("range", "1Y"), ("start_date", "2020-01-01")])).unwrap();
        assert_eq!(explicit.get(START_PARAM).unwrap(), "2020-01-01");

        assert!(matches!(
            expand_range(&inputs(&[("range", "7W")])),
            Err(PipelineError::InvalidQuery(_))
        ));

        let earliest = chrono::NaiveDate::MIN.format("%Y-%m-%d").to_string();
        assert!(matches!(
            expand_range(&inputs(&[("range", "5Y"), ("end_date", earliest.as_str())])),
            Err(PipelineError::InvalidQuery(_))
        ));
    }

    #[tokio::test]
    async fn test_oscillators_stack_below_price() {
        let router = router();
        let spec = router.show("Momentum", &UserInputs::new()).await.unwrap();

        let panel_of = |name: &str| spec.series(name).unwrap().panel;
        assert_eq!(panel_of("close"), 0);
        assert_eq!(panel_of("BB5 upper"), 0);
        assert_eq!(panel_of("RSI14"), 1);
        assert_eq!(panel_of("MACD"), 2);
        assert_eq!(panel_of("Histogram"), 2);
        assert_eq!(spec.panels(), 3);
    }

    #[tokio::test]
    async fn test_compare_normalizes_and_correlates() {
        let router = router();
        let descriptor = router.resolve("Momentum").unwrap();

        let comparison = router
            .compare(descriptor, &inputs(&[("compare", "QQQ, SPY,FAIL,QQQ")]))
            .await
            .unwrap();
        let names: Vec<&str> = comparison.chart.series.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["QQQ", "SPY"]);
        assert_eq!(comparison.chart.title, "QQQ / SPY");
        assert_eq!(comparison.chart.x.len(), 30);
        assert_eq!(comparison.chart.series[0].values[0], Some(100.0));
        assert_eq!(
            comparison.failures,
            vec![("FAIL".to_string(), "HTTP error: 404 Not Found".to_string())]
        );
        let qqq_spy = comparison.correlation.get("QQQ", "SPY").unwrap();
        assert!((qqq_spy - 1.0).abs() < 1e-9);

        // The module's own list, served from the cache
        router.compare(descriptor, &UserInputs::new()).await.unwrap();
        assert_eq!(router.cache().gateway().calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_compare_needs_two_symbols() {
        let router = router();
        let descriptor = router.resolve("Equity").unwrap();
        let err = router
            .compare(descriptor, &inputs(&[("compare", "QQQ, ,QQQ")]))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::InvalidQuery(_)));
        assert_eq!(router.cache().gateway().calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_compare_input_is_not_a_query_param() {
        let router = router();
        let descriptor = router.resolve("Equity").unwrap();
        let query = descriptor.query_for(&inputs(&[("compare", "SPY,QQQ")])).unwrap();
        assert_eq!(query.param(COMPARE_PARAM), None);
    }

    #[tokio::test]
    async fn test_prefetch_warms_every_module() {
        let router = router();
        let results = router.prefetch().await;
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|(_, r)| r.as_ref().unwrap().is_success()));
        // Both modules share one query
        assert_eq!(router.cache().len().await, 1);
    }
}
