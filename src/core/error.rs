//! Error taxonomy for the fetch-and-render pipeline.
//!
//! Provider failures are not represented here: they travel as a failed
//! [`FetchResult`](crate::core::result::FetchResult) so they can be cached
//! and displayed.

use crate::core::chart::ChartKind;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// Malformed query parameters, caught before any network call.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// The result's columns cannot back the requested chart kind.
    #[error("Cannot render {kind} chart: missing column(s) {}", .missing.join(", "))]
    ShapeMismatch {
        kind: ChartKind,
        missing: Vec<String>,
    },

    #[error("Unknown module: {0}")]
    UnknownModule(String),
}

impl PipelineError {
    pub fn invalid_query(msg: impl Into<String>) -> Self {
        PipelineError::InvalidQuery(msg.into())
    }
}
