use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::bottleneck::RuleSet;
use crate::cache::CacheTtls;

/// Estimated working hours per transit hour.
///
/// Drivers' time-clock data is not part of the fact table, so hours worked
/// are approximated as transit time plus a fixed allowance for loading,
/// paperwork and breaks.
pub const HOURS_WORKED_FACTOR: f64 = 1.2;

/// Engine tuning; every field has a default so partial JSON files work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub cache: CacheTtls,
    pub bottleneck_rules: RuleSet,
    /// Transit benchmark for routes without their own
    pub default_benchmark_hours: f64,
    /// Load capacity for entities without their own
    pub default_capacity_kg: f64,
    pub target_cost_per_mile: f64,
    pub hours_worked_factor: f64,
    pub recent_shipments_limit: usize,
    pub related_entities_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache: CacheTtls::default(),
            bottleneck_rules: RuleSet::default(),
            default_benchmark_hours: 48.0,
            default_capacity_kg: 2000.0,
            target_cost_per_mile: 2.5,
            hours_worked_factor: HOURS_WORKED_FACTOR,
            recent_shipments_limit: 10,
            related_entities_limit: 5,
        }
    }
}

impl EngineConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Loads `path` when given, defaults otherwise
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::from_path(p),
            None => Ok(Self::default()),
        }
    }
}
