use crate::types::SegmentKey;

#[derive(Debug, thiserror::Error)]
pub enum OptimizeError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("segment '{key}' is {length} long but only {usable} is usable after trim")]
    SegmentTooLong {
        key: SegmentKey,
        length: f64,
        usable: f64,
    },

    #[error(
        "no cutting pattern fits stock {stock_length} with lengths {lengths:?} \
         (kerf {kerf}, trim {trim}, tolerance {tolerance})"
    )]
    NoFeasiblePattern {
        stock_length: f64,
        lengths: Vec<f64>,
        kerf: f64,
        trim: f64,
        tolerance: f64,
    },

    #[error("no cutting pattern produces segment '{key}'")]
    UncoverableSegment { key: SegmentKey },

    #[error("no cutting plan found after {attempts} attempts (last max_surplus = {max_surplus})")]
    NoSolution { attempts: u32, max_surplus: u32 },

    #[error("demand cannot be met with at most {max_patterns} distinct patterns")]
    PatternCapInfeasible { max_patterns: u32 },

    #[error(
        "no bundled plan within manual cut limit {manual_cut_limit} \
         and over-production {max_over_production}"
    )]
    BundleInfeasible {
        manual_cut_limit: u32,
        max_over_production: u32,
    },

    #[error("no plan found within the {budget_secs}s time budget ({stage} phase)")]
    Timeout {
        stage: &'static str,
        budget_secs: f64,
    },

    #[error("solver failure: {0}")]
    Solver(String),
}

impl OptimizeError {
    /// Stable identifier callers can match on without parsing messages.
    pub fn code(&self) -> &'static str {
        match self {
            OptimizeError::InvalidInput(_) => "invalid_input",
            OptimizeError::SegmentTooLong { .. } => "segment_too_long",
            OptimizeError::NoFeasiblePattern { .. } => "no_feasible_pattern",
            OptimizeError::UncoverableSegment { .. } => "uncoverable_segment",
            OptimizeError::NoSolution { .. } => "no_solution",
            OptimizeError::PatternCapInfeasible { .. } => "pattern_cap_infeasible",
            OptimizeError::BundleInfeasible { .. } => "bundle_infeasible",
            OptimizeError::Timeout { .. } => "timeout",
            OptimizeError::Solver(_) => "solver",
        }
    }

    /// Errors caused by the request itself rather than by the optimization.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            OptimizeError::InvalidInput(_) | OptimizeError::SegmentTooLong { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, OptimizeError>;
