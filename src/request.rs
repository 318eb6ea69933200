use serde::{Deserialize, Deserializer, Serialize};

use crate::config::{EngineConfig, parse_bundle_factors};
use crate::error::OptimizeError;
use crate::types::{DemandLine, Machine, Plan, PlanSummary, SegmentKey};

/// Accepts any JSON number with an integral value, so clients that only
/// produce floats (`4.0`) can still send quantities.
pub fn deserialize_u32_from_number<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = f64::deserialize(deserializer)?;
    if value < 0.0 || value.fract() != 0.0 || value > u32::MAX as f64 {
        return Err(serde::de::Error::custom(format!(
            "expected a non-negative whole number, got {value}"
        )));
    }
    Ok(value as u32)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineRequest {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub piece_code: Option<String>,
    pub length: f64,
    #[serde(deserialize_with = "deserialize_u32_from_number")]
    pub quantity: u32,
    #[serde(default)]
    pub machine: Machine,
}

impl LineRequest {
    pub fn to_demand(&self) -> DemandLine {
        let mut key = SegmentKey::new(self.name.clone());
        if let Some(piece) = &self.piece_code {
            key = key.with_piece_code(piece.clone());
        }
        DemandLine::new(key, self.length, self.quantity).on(self.machine)
    }
}

/// Bundle factors arrive either as a list or as the free text operators type
/// into the order form ("14 16 18 20").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FactorList {
    List(Vec<u32>),
    Text(String),
}

impl FactorList {
    pub fn factors(&self) -> Vec<u32> {
        match self {
            FactorList::List(values) => values.clone(),
            FactorList::Text(raw) => parse_bundle_factors(raw),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OptimizeRequest {
    pub stock_length: f64,
    /// Applies to both machines when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trim: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub laser_kerf: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundler_kerf: Option<f64>,
    pub lines: Vec<LineRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_surplus: Option<u32>,
    /// 0 lifts the cap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_patterns: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_over_production: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual_cut_limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle_factors: Option<FactorList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_segments_per_pattern: Option<usize>,
}

impl OptimizeRequest {
    pub fn demand_lines(&self) -> Vec<DemandLine> {
        self.lines.iter().map(LineRequest::to_demand).collect()
    }

    /// `base` with this request's overrides applied.
    pub fn effective_config(&self, base: &EngineConfig) -> EngineConfig {
        let mut config = base.clone();
        if let Some(trim) = self.trim {
            config.laser.trim = trim;
            config.bundler.trim = trim;
        }
        if let Some(kerf) = self.laser_kerf {
            config.laser.kerf = kerf;
        }
        if let Some(kerf) = self.bundler_kerf {
            config.bundler.kerf = kerf;
        }
        if let Some(v) = self.max_surplus {
            config.laser.max_surplus = v;
        }
        if let Some(v) = self.max_patterns {
            config.laser.max_patterns = v;
        }
        if let Some(v) = self.max_over_production {
            config.bundler.max_over_production = v;
        }
        if let Some(v) = self.manual_cut_limit {
            config.bundler.manual_cut_limit = v;
        }
        if let Some(factors) = &self.bundle_factors {
            config.bundler.bundle_factors = factors.factors();
        }
        if let Some(v) = self.max_segments_per_pattern {
            config.bundler.max_segments_per_pattern = v;
        }
        config
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptimizeResponse {
    pub plan: Plan,
    pub summary: PlanSummary,
}

impl From<Plan> for OptimizeResponse {
    fn from(plan: Plan) -> Self {
        let summary = plan.summary();
        Self { plan, summary }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorResponse {
    pub error: bool,
    pub error_type: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_params: Option<serde_json::Value>,
}

impl From<&OptimizeError> for ErrorResponse {
    fn from(err: &OptimizeError) -> Self {
        let current_params = match err {
            OptimizeError::NoSolution {
                attempts,
                max_surplus,
            } => Some(serde_json::json!({
                "attempts": attempts,
                "max_surplus": max_surplus,
            })),
            OptimizeError::PatternCapInfeasible { max_patterns } => {
                Some(serde_json::json!({ "max_patterns": max_patterns }))
            }
            OptimizeError::BundleInfeasible {
                manual_cut_limit,
                max_over_production,
            } => Some(serde_json::json!({
                "manual_cut_limit": manual_cut_limit,
                "max_over_production": max_over_production,
            })),
            OptimizeError::NoFeasiblePattern {
                stock_length,
                lengths,
                kerf,
                trim,
                tolerance,
            } => Some(serde_json::json!({
                "stock_length": stock_length,
                "lengths": lengths,
                "kerf": kerf,
                "trim": trim,
                "tolerance": tolerance,
            })),
            OptimizeError::Timeout { stage, budget_secs } => Some(serde_json::json!({
                "stage": stage,
                "time_budget_secs": budget_secs,
            })),
            _ => None,
        };
        Self {
            error: true,
            error_type: err.code().to_string(),
            message: err.to_string(),
            current_params,
        }
    }
}
