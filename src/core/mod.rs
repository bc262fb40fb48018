//! Core pipeline: queries, the provider gateway seam, the result cache,
//! chart rendering and module routing.

pub mod analytics;
pub mod cache;
pub mod catalog;
pub mod chart;
pub mod config;
pub mod error;
pub mod gateway;
pub mod indicators;
pub mod log;
pub mod period;
pub mod query;
pub mod result;
pub mod router;
pub mod table;

// Re-export main types for cleaner imports
pub use cache::ResultCache;
pub use chart::{ChartKind, ChartSpec, render};
pub use error::PipelineError;
pub use gateway::ProviderGateway;
pub use query::Query;
pub use result::FetchResult;
pub use router::{ModuleDescriptor, ModuleRouter, UserInputs};
pub use table::{Column, Table, Value};
