//! Date range presets offered alongside explicit start/end dates.

use anyhow::Result;
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub enum RangePreset {
    OneMonth,
    ThreeMonths,
    SixMonths,
    OneYear,
    TwoYears,
    FiveYears,
}

impl Display for RangePreset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                RangePreset::OneMonth => "1M",
                RangePreset::ThreeMonths => "3M",
                RangePreset::SixMonths => "6M",
                RangePreset::OneYear => "1Y",
                RangePreset::TwoYears => "2Y",
                RangePreset::FiveYears => "5Y",
            }
        )
    }
}

impl RangePreset {
    pub fn to_duration(&self) -> Duration {
        match self {
            RangePreset::OneMonth => Duration::days(30),
            RangePreset::ThreeMonths => Duration::days(90),
            RangePreset::SixMonths => Duration::days(180),
            RangePreset::OneYear => Duration::days(365),
            RangePreset::TwoYears => Duration::days(730),
            RangePreset::FiveYears => Duration::days(1825),
        }
    }

    /// The `(start, end)` window ending on `end`, or `None` when the start
    /// falls before the earliest representable date.
    pub fn window_ending(&self, end: NaiveDate) -> Option<(NaiveDate, NaiveDate)> {
        let start = end.checked_sub_signed(self.to_duration())?;
        Some((start, end))
    }
}

impl FromStr for RangePreset {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "1M" => Ok(RangePreset::OneMonth),
            "3M" => Ok(RangePreset::ThreeMonths),
            "6M" => Ok(RangePreset::SixMonths),
            "1Y" => Ok(RangePreset::OneYear),
            "2Y" => Ok(RangePreset::TwoYears),
            "5Y" => Ok(RangePreset::FiveYears),
            _ => Err(anyhow::anyhow!("Invalid date range: {}", s)),
        }
    }
}
