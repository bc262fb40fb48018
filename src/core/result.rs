//! The outcome of a provider call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::table::Table;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure { diagnostic: String },
}

/// A table plus retrieval metadata. Never mutated once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchResult {
    pub table: Table,
    pub fetched_at: DateTime<Utc>,
    pub provider: String,
    pub outcome: Outcome,
}

impl FetchResult {
    pub fn success(provider: impl Into<String>, table: Table) -> Self {
        Self {
            table,
            fetched_at: Utc::now(),
            provider: provider.into(),
            outcome: Outcome::Success,
        }
    }

    pub fn failure(provider: impl Into<String>, diagnostic: impl Into<String>) -> Self {
        Self {
            table: Table::empty(),
            fetched_at: Utc::now(),
            provider: provider.into(),
            outcome: Outcome::Failure {
                diagnostic: diagnostic.into(),
            },
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success)
    }

    pub fn diagnostic(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Success => None,
            Outcome::Failure { diagnostic } => Some(diagnostic),
        }
    }
}
