use crate::error::OptimizeError;

/// Lengths carry at most one decimal place; everything downstream works in
/// tenths so the solver only ever sees integers.
pub const SCALE_FACTOR: i64 = 10;

#[derive(Debug, Clone, Copy, Default)]
pub struct Scaler;

impl Scaler {
    pub fn to_units(value: f64) -> Result<i64, OptimizeError> {
        if !value.is_finite() || value < 0.0 {
            return Err(OptimizeError::InvalidInput(format!(
                "length {value} must be a finite non-negative number"
            )));
        }
        let raw = value * SCALE_FACTOR as f64;
        let scaled = raw.round();
        if scaled > i64::MAX as f64 {
            return Err(OptimizeError::InvalidInput(format!("length {value} is too large")));
        }
        // only representation error may separate `raw` from a whole number
        if (raw - scaled).abs() > 1e-6_f64.max(scaled * 1e-12) {
            return Err(OptimizeError::InvalidInput(format!(
                "length {value} has more than one decimal place"
            )));
        }
        Ok(scaled as i64)
    }

    pub fn to_length(units: i64) -> f64 {
        units as f64 / SCALE_FACTOR as f64
    }
}
