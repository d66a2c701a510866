use crate::error::Result;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProrationPolicy {
    /// Every calendar year from the start year on receives a full annual amount.
    #[default]
    #[schemars(
        description = "Each year in [start_year, start_year + duration) gets the full annual amount"
    )]
    FullYear,
    /// The first year is prorated by the days left after the start date and the
    /// remainder is booked in the year after the nominal last one.
    #[schemars(
        description = "First year prorated by days remaining after the start date; the remainder falls in the final year"
    )]
    DayProrated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct EngineConfig {
    #[schemars(description = "How partial first/last depreciation years are handled")]
    pub depreciation_proration: ProrationPolicy,

    #[schemars(
        description = "Relative tolerance for the interest + principal == payment check (0.01 = 1 %)"
    )]
    pub consistency_tolerance: f64,

    #[schemars(description = "Year length used to turn a start/end date span into years")]
    pub days_per_year: f64,

    #[schemars(
        description = "Allowed gap in years between the date span of a loan and its configured duration before a warning is raised"
    )]
    pub duration_mismatch_tolerance_years: f64,

    #[schemars(description = "How many times a recompute interrupted by an invalidation is retried")]
    pub stale_read_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            depreciation_proration: ProrationPolicy::FullYear,
            consistency_tolerance: 0.01,
            days_per_year: 365.0,
            duration_mismatch_tolerance_years: 1.0,
            stale_read_retries: 1,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn schema_as_json() -> Result<String> {
        Ok(crate::schema::schema_as_json::<EngineConfig>()?)
    }
}
