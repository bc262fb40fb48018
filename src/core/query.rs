//! Query identity: what to fetch, from whom, with which parameters.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;

/// Parameter name that lets user inputs pick a different provider.
pub const PROVIDER_PARAM: &str = "provider";

/// Identifies a single data request.
///
/// Parameters live in a `BTreeMap`, so two queries built with the same
/// parameters in a different order are equal and share a cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Query {
    provider: String,
    function: String,
    #[serde(default)]
    params: BTreeMap<String, String>,
}

impl Query {
    pub fn new(provider: impl Into<String>, function: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            function: function.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn function(&self) -> &str {
        &self.function
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    /// Returns a trimmed, non-empty parameter value.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Overlays `inputs` on this query. Inputs win over existing values and a
    /// `provider` input replaces the provider instead of becoming a parameter.
    pub fn merged<'a, I>(&self, inputs: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        let mut merged = self.clone();
        for (name, value) in inputs {
            if name == PROVIDER_PARAM {
                if !value.trim().is_empty() {
                    merged.provider = value.trim().to_string();
                }
            } else {
                merged.params.insert(name.clone(), value.clone());
            }
        }
        merged
    }

    /// Deterministic serialization used as the cache key.
    pub fn cache_key(&self) -> String {
        let params = self
            .params
            .iter()
            .map(|(k, v)| format!("{}={}", escape(k), escape(v)))
            .collect::<Vec<_>>()
            .join("&");
        format!(
            "{}:{}?{}",
            escape(&self.provider),
            escape(&self.function),
            params
        )
    }
}

fn escape(part: &str) -> String {
    let mut out = String::with_capacity(part.len());
    for c in part.chars() {
        match c {
            '%' | '&' | '=' | ':' | '?' => out.push_str(&format!("%{:02X}", c as u32)),
            _ => out.push(c),
        }
    }
    out
}

impl Display for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.cache_key())
    }
}
