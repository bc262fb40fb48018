//! Provider gateway abstraction and shared query validation.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use std::sync::Arc;

use crate::core::error::PipelineError;
use crate::core::period::RangePreset;
use crate::core::query::Query;
use crate::core::result::FetchResult;

pub const SYMBOL_PARAM: &str = "symbol";
pub const START_PARAM: &str = "start_date";
pub const END_PARAM: &str = "end_date";

/// A source of tabular market data.
///
/// `fetch` returns `Err` only for queries rejected by `validate`; every
/// remote failure comes back as a failed [`FetchResult`]. Gateways never
/// retry on their own.
#[async_trait]
pub trait ProviderGateway: Send + Sync {
    fn validate(&self, query: &Query) -> Result<(), PipelineError>;

    async fn fetch(&self, query: &Query) -> Result<FetchResult, PipelineError>;
}

#[async_trait]
impl<G: ProviderGateway + ?Sized> ProviderGateway for Arc<G> {
    fn validate(&self, query: &Query) -> Result<(), PipelineError> {
        (**self).validate(query)
    }

    async fn fetch(&self, query: &Query) -> Result<FetchResult, PipelineError> {
        (**self).fetch(query).await
    }
}

pub fn require_symbol(query: &Query) -> Result<&str, PipelineError> {
    query
        .param(SYMBOL_PARAM)
        .ok_or_else(|| PipelineError::invalid_query(format!("missing '{SYMBOL_PARAM}'")))
}

pub fn parse_date(name: &str, value: &str) -> Result<NaiveDate, PipelineError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| {
        PipelineError::invalid_query(format!("'{name}' must be YYYY-MM-DD, got '{value}'"))
    })
}

/// Resolves the requested date window. A missing end means today and a
/// missing start means one year before the end.
pub fn date_range(query: &Query) -> Result<(NaiveDate, NaiveDate), PipelineError> {
    let end = match query.param(END_PARAM) {
        Some(v) => parse_date(END_PARAM, v)?,
        None => Utc::now().date_naive(),
    };
    let start = match query.param(START_PARAM) {
        Some(v) => parse_date(START_PARAM, v)?,
        None => {
            let (start, _) = RangePreset::OneYear.window_ending(end).ok_or_else(|| {
                PipelineError::invalid_query(format!(
                    "end date {end} leaves no room for a default start"
                ))
            })?;
            start
        }
    };
    if start > end {
        return Err(PipelineError::invalid_query(format!(
            "start date {start} is after end date {end}"
        )));
    }
    Ok((start, end))
}
