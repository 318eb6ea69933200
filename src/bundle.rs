//! Allocation for the bundle saw. Every pattern use is a stack of `f` bars
//! cut together, `f` taken from the configured bundle factors; factor 1 is a
//! manual cut and draws on a separate budget.

use std::time::Duration;

use crate::allocate::{Allocation, AllocationEntry};
use crate::config::normalize_factors;
use crate::error::OptimizeError;
use crate::milp::{Deadline, IntegerProgram, Outcome, Sense};
use crate::types::Pattern;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundlePolicy {
    pub factors: Vec<u32>,
    pub manual_cut_limit: u32,
    pub max_over_production: u32,
    /// 0 means no limit.
    pub max_segments_per_pattern: usize,
}

/// Patterns with at most `max_segments` distinct lines. Falls back to the
/// full set when nothing passes.
pub fn filter_by_segments(patterns: &[Pattern], max_segments: usize) -> Vec<Pattern> {
    if max_segments == 0 {
        return patterns.to_vec();
    }
    let kept: Vec<Pattern> = patterns
        .iter()
        .filter(|p| p.distinct_segments() <= max_segments)
        .cloned()
        .collect();
    if kept.is_empty() {
        tracing::debug!(
            max_segments,
            "segment filter removed every pattern, keeping all"
        );
        return patterns.to_vec();
    }
    kept
}

/// Bar-count phase result. The waste-optimal plan satisfies the waste lock,
/// so it stands whenever this phase has nothing better.
fn settle_bar_phase(outcome: Outcome, waste_plan: Vec<i64>) -> Vec<i64> {
    match outcome {
        Outcome::Optimal(values) | Outcome::Incumbent(values) => values,
        Outcome::Infeasible | Outcome::TimedOut => {
            tracing::warn!("bar-count phase gave no better plan, keeping the waste-optimal one");
            waste_plan
        }
    }
}

struct BundleVar {
    pattern: usize,
    factor: u32,
    var: usize,
}

/// Lexicographic waste then bar count. `budget` covers both phases.
pub fn allocate_bundled(
    patterns: &[Pattern],
    demand: &[u32],
    stock: i64,
    policy: &BundlePolicy,
    budget: Duration,
) -> Result<Allocation, OptimizeError> {
    let deadline = Deadline::after(budget);
    let candidates = filter_by_segments(patterns, policy.max_segments_per_pattern);
    let factors = normalize_factors(&policy.factors);
    let max_factor = factors.first().copied().unwrap_or(1);
    let total_demand: i64 = demand.iter().map(|&d| d as i64).sum();

    let infeasible = || OptimizeError::BundleInfeasible {
        manual_cut_limit: policy.manual_cut_limit,
        max_over_production: policy.max_over_production,
    };

    let mut program = IntegerProgram::new();
    let mut vars = Vec::with_capacity(candidates.len() * factors.len());
    for j in 0..candidates.len() {
        for &factor in &factors {
            let upper = (total_demand / factor as i64 + 1).max(1);
            vars.push(BundleVar {
                pattern: j,
                factor,
                var: program.add_var(upper),
            });
        }
    }

    for (i, &d) in demand.iter().enumerate() {
        let terms: Vec<(usize, f64)> = vars
            .iter()
            .filter(|v| candidates[v.pattern].counts[i] > 0)
            .map(|v| (v.var, candidates[v.pattern].counts[i] as f64 * v.factor as f64))
            .collect();
        let over = (policy.max_over_production as i64 * max_factor as i64).max(d as i64);
        program.add_row(terms.clone(), Sense::AtLeast, d as f64);
        program.add_row(terms, Sense::AtMost, (d as i64 + over) as f64);
    }

    let manual: Vec<(usize, f64)> = vars
        .iter()
        .filter(|v| v.factor == 1)
        .map(|v| (v.var, 1.0))
        .collect();
    program.add_row(manual, Sense::AtMost, policy.manual_cut_limit as f64);

    let waste_terms: Vec<(usize, f64)> = vars
        .iter()
        .map(|v| {
            let waste = candidates[v.pattern].waste(stock) * v.factor as i64;
            (v.var, waste as f64)
        })
        .collect();
    let bar_terms: Vec<(usize, f64)> = vars.iter().map(|v| (v.var, v.factor as f64)).collect();

    tracing::debug!(
        patterns = candidates.len(),
        factors = ?factors,
        variables = program.var_count(),
        "solving bundle allocation"
    );

    // Waste first, then bar count under the waste optimum.
    program.set_objective(waste_terms.clone());
    let waste_plan = match program.solve(deadline.remaining())? {
        Outcome::Optimal(values) | Outcome::Incumbent(values) => values,
        Outcome::Infeasible => return Err(infeasible()),
        Outcome::TimedOut => {
            return Err(OptimizeError::Timeout {
                stage: "bundle waste",
                budget_secs: budget.as_secs_f64(),
            });
        }
    };
    let min_waste: i64 = waste_terms
        .iter()
        .map(|&(var, coeff)| waste_plan[var] * coeff as i64)
        .sum();

    program.add_row(waste_terms, Sense::AtMost, min_waste as f64);
    program.set_objective(bar_terms);
    let outcome = program.solve(deadline.remaining())?;
    let plan = settle_bar_phase(outcome, waste_plan);

    let entries: Vec<AllocationEntry> = vars
        .iter()
        .filter(|v| plan[v.var] > 0)
        .map(|v| {
            let bundles = plan[v.var] as u32;
            AllocationEntry {
                pattern: candidates[v.pattern].clone(),
                multiplicity: bundles * v.factor,
                bundle_factor: Some(v.factor),
                bundles: Some(bundles),
            }
        })
        .collect();

    let allocation = Allocation { entries };
    tracing::info!(
        bars = allocation.bars(),
        patterns = allocation.pattern_count(),
        waste = allocation.total_waste(stock),
        "bundle allocation solved"
    );
    Ok(allocation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns;

    const BUDGET: Duration = Duration::from_secs(30);

    fn policy(factors: &[u32], manual_cut_limit: u32, max_over_production: u32) -> BundlePolicy {
        BundlePolicy {
            factors: factors.to_vec(),
            manual_cut_limit,
            max_over_production,
            max_segments_per_pattern: 5,
        }
    }

    /// 1990 mm pieces on a 6000 mm bar with kerf 2.5 and trim 15; only three
    /// per bar reach the tolerance.
    fn three_per_bar() -> Vec<Pattern> {
        let found = patterns::enumerate(60000, &[19900], 25, 150, 0.015, 100_000);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].counts, vec![3]);
        assert_eq!(found[0].material_used, 59925);
        found
    }

    #[test]
    fn test_large_factor_without_manual_cuts() {
        let p = policy(&[1, 20, 24], 0, 20);
        let allocation = allocate_bundled(&three_per_bar(), &[30], 60000, &p, BUDGET).unwrap();

        assert_eq!(allocation.entries.len(), 1);
        let entry = &allocation.entries[0];
        assert_eq!(entry.bundle_factor, Some(20));
        assert_eq!(entry.bundles, Some(1));
        assert_eq!(entry.multiplicity, 20);
        assert_eq!(allocation.production(1), vec![60]);
    }

    #[test]
    fn test_residual_needing_manual_cuts_is_infeasible() {
        let p = policy(&[20, 24], 0, 0);
        let err = allocate_bundled(&three_per_bar(), &[3], 60000, &p, BUDGET).unwrap_err();
        assert!(matches!(
            err,
            OptimizeError::BundleInfeasible {
                manual_cut_limit: 0,
                max_over_production: 0
            }
        ));
    }

    #[test]
    fn test_manual_cut_budget_covers_residual() {
        let p = policy(&[20, 24], 1, 0);
        let allocation = allocate_bundled(&three_per_bar(), &[3], 60000, &p, BUDGET).unwrap();

        assert_eq!(allocation.entries.len(), 1);
        assert_eq!(allocation.entries[0].bundle_factor, Some(1));
        assert_eq!(allocation.entries[0].bundles, Some(1));
        assert_eq!(allocation.bars(), 1);
    }

    #[test]
    fn test_production_stays_within_bounds() {
        let found = patterns::enumerate(60000, &[19900, 9000], 25, 150, 0.05, 100_000);
        let demand = [40, 25];
        let p = policy(&[14, 16, 18, 20], 10, 20);
        let allocation = allocate_bundled(&found, &demand, 60000, &p, BUDGET).unwrap();

        let manual: u32 = allocation
            .entries
            .iter()
            .filter(|e| e.bundle_factor == Some(1))
            .filter_map(|e| e.bundles)
            .sum();
        assert!(manual <= 10);

        for (i, (&produced, &d)) in allocation.production(2).iter().zip(&demand).enumerate() {
            assert!(produced >= d as u64, "segment {i} short");
            let over = (20u64 * 20).max(d as u64);
            assert!(produced <= d as u64 + over, "segment {i} over-produced");
        }
        for entry in &allocation.entries {
            let f = entry.bundle_factor.unwrap();
            assert_eq!(entry.multiplicity, f * entry.bundles.unwrap());
        }
    }

    #[test]
    fn test_segment_filter() {
        let patterns = vec![
            Pattern {
                counts: vec![1, 1, 1],
                material_used: 100,
            },
            Pattern {
                counts: vec![2, 0, 1],
                material_used: 100,
            },
        ];

        assert_eq!(filter_by_segments(&patterns, 2).len(), 1);
        assert_eq!(filter_by_segments(&patterns, 0).len(), 2);
        // nothing has a single segment, so everything is kept
        assert_eq!(filter_by_segments(&patterns, 1).len(), 2);
    }

    #[test]
    fn test_bar_phase_timeout_keeps_waste_plan() {
        assert_eq!(settle_bar_phase(Outcome::TimedOut, vec![0, 2]), vec![0, 2]);
        assert_eq!(
            settle_bar_phase(Outcome::Infeasible, vec![0, 2]),
            vec![0, 2]
        );
        assert_eq!(
            settle_bar_phase(Outcome::Incumbent(vec![1, 0]), vec![0, 2]),
            vec![1, 0]
        );
    }

    #[test]
    fn test_zero_budget_is_a_timeout_not_infeasible() {
        let p = policy(&[20, 24], 0, 20);
        let err =
            allocate_bundled(&three_per_bar(), &[30], 60000, &p, Duration::ZERO).unwrap_err();
        assert!(
            matches!(
                err,
                OptimizeError::Timeout {
                    stage: "bundle waste",
                    ..
                }
            ),
            "got {err:?}"
        );
    }
}
