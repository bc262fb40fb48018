pub mod cli;
pub mod core;
pub mod providers;

use crate::core::cache::ResultCache;
use crate::core::config::AppConfig;
use crate::core::gateway::{END_PARAM, START_PARAM, SYMBOL_PARAM};
use crate::core::query::PROVIDER_PARAM;
use crate::core::router::{COMPARE_PARAM, ModuleRouter, RANGE_PARAM, UserInputs};
use crate::providers::ProviderRegistry;
use crate::providers::yahoo_finance::{PROVIDER_ID, YahooFinanceGateway};
use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, info};

pub enum AppCommand {
    Modules,
    Show(ShowArgs),
    /// Interactive session over one router, optionally warming its cache
    /// first.
    Dashboard { prefetch: bool },
}

/// User inputs for a single module view.
#[derive(Debug, Clone, Default)]
pub struct ShowArgs {
    pub label: String,
    pub symbol: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub range: Option<String>,
    pub provider: Option<String>,
    /// Comma-separated symbols to compare.
    pub compare: Option<String>,
    pub json: bool,
    pub rows: Option<usize>,
}

impl ShowArgs {
    pub fn inputs(&self) -> UserInputs {
        [
            (SYMBOL_PARAM, &self.symbol),
            (START_PARAM, &self.start),
            (END_PARAM, &self.end),
            (RANGE_PARAM, &self.range),
            (PROVIDER_PARAM, &self.provider),
            (COMPARE_PARAM, &self.compare),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.as_ref().map(|v| (key.to_string(), v.clone())))
        .collect()
    }
}

/// Wires the configured providers, cache and module catalogue together.
pub fn build_router(config: &AppConfig) -> Result<ModuleRouter<ProviderRegistry>> {
    let yahoo = config.yahoo();
    debug!(base_url = %yahoo.base_url, "Registering Yahoo Finance provider");
    let registry = ProviderRegistry::new().register(
        PROVIDER_ID,
        YahooFinanceGateway::new(&yahoo.base_url, yahoo.timeout())?,
    );

    let cache = Arc::new(ResultCache::with_default_ttl(registry, config.cache_ttl()));
    ModuleRouter::new(cache, config.modules())
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    info!("finchart starting...");

    let config = match config_path {
        Some(path) => AppConfig::load_from_path(path)?,
        None => AppConfig::load()?,
    };
    debug!("Loaded config: {config:#?}");

    let router = build_router(&config)?;
    let mut options = cli::show::ShowOptions {
        risk_free_rate: config.analytics.risk_free_rate,
        ..Default::default()
    };

    match command {
        AppCommand::Modules => {
            cli::modules::run(router.modules());
            Ok(())
        }
        AppCommand::Show(args) => {
            options.json = args.json;
            if let Some(rows) = args.rows {
                options.rows = rows;
            }
            cli::show::run(&router, &args.label, &args.inputs(), &options).await
        }
        AppCommand::Dashboard { prefetch } => {
            cli::dashboard::run(&router, &options, prefetch).await
        }
    }
}
