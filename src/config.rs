use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::DEFAULT_MEMORY_BYTES;
use crate::error::OptimizeError;
use crate::patterns::DEFAULT_SOLUTION_LIMIT;
use crate::types::DemandLine;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaserSettings {
    pub kerf: f64,
    pub trim: f64,
    pub max_surplus: u32,
    /// 0 means no cap.
    pub max_patterns: u32,
}

impl Default for LaserSettings {
    fn default() -> Self {
        Self {
            kerf: 1.0,
            trim: 10.0,
            max_surplus: 50,
            max_patterns: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BundlerSettings {
    pub kerf: f64,
    pub trim: f64,
    pub max_over_production: u32,
    pub manual_cut_limit: u32,
    pub bundle_factors: Vec<u32>,
    /// 0 means no limit.
    pub max_segments_per_pattern: usize,
}

impl Default for BundlerSettings {
    fn default() -> Self {
        Self {
            kerf: 2.5,
            trim: 15.0,
            max_over_production: 20,
            manual_cut_limit: 10,
            bundle_factors: vec![14, 16, 18, 20],
            max_segments_per_pattern: 5,
        }
    }
}

/// Short segments are harder to pack tightly, so the allowed waste grows as
/// the demand-weighted average length shrinks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TolerancePolicy {
    pub baseline: f64,
    pub short_threshold: f64,
    pub short_tolerance: f64,
    pub medium_threshold: f64,
    pub medium_tolerance: f64,
}

impl Default for TolerancePolicy {
    fn default() -> Self {
        Self {
            baseline: 0.015,
            short_threshold: 500.0,
            short_tolerance: 0.10,
            medium_threshold: 1000.0,
            medium_tolerance: 0.05,
        }
    }
}

impl TolerancePolicy {
    pub fn resolve(&self, lines: &[DemandLine]) -> f64 {
        let total_qty: f64 = lines.iter().map(|l| l.quantity as f64).sum();
        if total_qty == 0.0 {
            return self.baseline;
        }
        let weighted: f64 = lines.iter().map(|l| l.length * l.quantity as f64).sum();
        let average = weighted / total_qty;

        if average < self.short_threshold {
            self.short_tolerance
        } else if average < self.medium_threshold {
            self.medium_tolerance
        } else {
            self.baseline
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub laser: LaserSettings,
    pub bundler: BundlerSettings,
    pub tolerance: TolerancePolicy,
    /// Enumeration stops once this many patterns were found.
    pub solution_limit: usize,
    /// Wall-clock budget of one partition's allocation, every phase and
    /// retry included.
    pub time_budget_secs: u64,
    /// Directory for persisted patterns; in-memory only when unset.
    pub cache_dir: Option<PathBuf>,
    /// Byte bound of the in-memory pattern cache.
    pub memory_cache_bytes: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            laser: LaserSettings::default(),
            bundler: BundlerSettings::default(),
            tolerance: TolerancePolicy::default(),
            solution_limit: DEFAULT_SOLUTION_LIMIT,
            time_budget_secs: 60,
            cache_dir: None,
            memory_cache_bytes: DEFAULT_MEMORY_BYTES,
        }
    }
}

impl EngineConfig {
    pub fn from_file(path: &Path) -> Result<Self, OptimizeError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            OptimizeError::InvalidInput(format!("cannot read config {}: {e}", path.display()))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            OptimizeError::InvalidInput(format!("invalid config {}: {e}", path.display()))
        })
    }

    pub fn time_budget(&self) -> Duration {
        Duration::from_secs(self.time_budget_secs)
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }
}

/// Normalizes bundle factors: positive, unique, `1` (manual cut) always
/// present, largest first.
pub fn normalize_factors(factors: &[u32]) -> Vec<u32> {
    let mut out: Vec<u32> = factors.iter().copied().filter(|&f| f > 1).collect();
    out.push(1);
    out.sort_unstable_by(|a, b| b.cmp(a));
    out.dedup();
    out
}

/// Parses a free-form factor list such as `"14 16, 18;20"`. Tokens that are
/// not integers are skipped.
pub fn parse_bundle_factors(raw: &str) -> Vec<u32> {
    let parsed: Vec<u32> = raw
        .split(|c: char| c == ',' || c == '.' || c == ';' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<u32>().ok())
        .collect();
    normalize_factors(&parsed)
}
