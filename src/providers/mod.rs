pub mod yahoo_finance;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::core::error::PipelineError;
use crate::core::gateway::ProviderGateway;
use crate::core::query::Query;
use crate::core::result::FetchResult;

/// Dispatches queries to the gateway registered for their provider id.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    gateways: BTreeMap<String, Arc<dyn ProviderGateway>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, id: impl Into<String>, gateway: impl ProviderGateway + 'static) -> Self {
        self.gateways.insert(id.into(), Arc::new(gateway));
        self
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.gateways.keys().map(String::as_str)
    }

    fn lookup(&self, query: &Query) -> Result<&Arc<dyn ProviderGateway>, PipelineError> {
        self.gateways.get(query.provider()).ok_or_else(|| {
            PipelineError::invalid_query(format!("unknown provider '{}'", query.provider()))
        })
    }
}

#[async_trait]
impl ProviderGateway for ProviderRegistry {
    fn validate(&self, query: &Query) -> Result<(), PipelineError> {
        self.lookup(query)?.validate(query)
    }

    async fn fetch(&self, query: &Query) -> Result<FetchResult, PipelineError> {
        self.lookup(query)?.fetch(query).await
    }
}
