//! Single-bar allocation: how many bars to cut with each pattern so that
//! demand is covered, waste is minimal and, among minimal-waste plans,
//! surplus is minimal.

use std::time::Duration;

use crate::error::OptimizeError;
use crate::milp::{Deadline, IntegerProgram, Outcome, Sense};
use crate::types::Pattern;

/// Retries after the first attempt, each doubling the surplus bound.
pub const MAX_RETRIES: u32 = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct AllocationEntry {
    pub pattern: Pattern,
    /// Bars cut with `pattern`.
    pub multiplicity: u32,
    pub bundle_factor: Option<u32>,
    pub bundles: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Allocation {
    pub entries: Vec<AllocationEntry>,
}

impl Allocation {
    pub fn production(&self, segments: usize) -> Vec<u64> {
        let mut produced = vec![0u64; segments];
        for entry in &self.entries {
            for (slot, &count) in produced.iter_mut().zip(&entry.pattern.counts) {
                *slot += count as u64 * entry.multiplicity as u64;
            }
        }
        produced
    }

    pub fn total_waste(&self, stock: i64) -> i64 {
        self.entries
            .iter()
            .map(|e| e.pattern.waste(stock) * e.multiplicity as i64)
            .sum()
    }

    pub fn total_surplus(&self, demand: &[u32]) -> u64 {
        self.production(demand.len())
            .iter()
            .zip(demand)
            .map(|(&p, &d)| p.saturating_sub(d as u64))
            .sum()
    }

    pub fn bars(&self) -> u64 {
        self.entries.iter().map(|e| e.multiplicity as u64).sum()
    }

    pub fn pattern_count(&self) -> usize {
        self.entries.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoveragePolicy {
    pub max_surplus: u32,
    pub max_patterns: Option<u32>,
}

/// Index of the first segment with demand that no pattern produces.
pub fn uncovered_segment(patterns: &[Pattern], demand: &[u32]) -> Option<usize> {
    (0..demand.len()).find(|&i| demand[i] > 0 && patterns.iter().all(|p| p.counts[i] == 0))
}

/// Most bars of `pattern` any plan can use without some segment exceeding
/// `demand + max_surplus`.
pub fn pattern_upper(pattern: &Pattern, demand: &[u32], max_surplus: u32) -> i64 {
    pattern
        .counts
        .iter()
        .zip(demand)
        .filter(|&(&c, _)| c > 0)
        .map(|(&c, &d)| (d as i64 + max_surplus as i64) / c as i64)
        .min()
        .unwrap_or(0)
}

/// Covers `demand` with the fewest wasted units. `budget` is the wall-clock
/// limit for the whole call, retries included.
pub fn allocate(
    patterns: &[Pattern],
    demand: &[u32],
    stock: i64,
    policy: CoveragePolicy,
    budget: Duration,
) -> Result<Allocation, OptimizeError> {
    let deadline = Deadline::after(budget);
    let mut bound = policy.max_surplus;

    for attempt in 1..=MAX_RETRIES + 1 {
        tracing::debug!(attempt, max_surplus = bound, "coverage allocation attempt");
        let found = attempt_with_bound(
            patterns,
            demand,
            stock,
            bound,
            policy.max_patterns,
            &deadline,
        )?;
        if let Some(allocation) = found {
            tracing::info!(
                bars = allocation.bars(),
                patterns = allocation.pattern_count(),
                waste = allocation.total_waste(stock),
                max_surplus = bound,
                "coverage allocation solved"
            );
            return Ok(allocation);
        }
        if attempt <= MAX_RETRIES {
            let next = bound.saturating_mul(2).max(1);
            tracing::info!(
                max_surplus = bound,
                next,
                "demand not coverable, relaxing surplus bound"
            );
            bound = next;
        }
    }

    Err(OptimizeError::NoSolution {
        attempts: MAX_RETRIES + 1,
        max_surplus: bound,
    })
}

struct CoverageModel {
    program: IntegerProgram,
    bars: Vec<usize>,
    surplus: Vec<usize>,
    waste: Vec<i64>,
}

impl CoverageModel {
    fn build(patterns: &[Pattern], demand: &[u32], stock: i64, max_surplus: u32) -> Self {
        let mut program = IntegerProgram::new();
        let bars: Vec<usize> = patterns
            .iter()
            .map(|p| program.add_var(pattern_upper(p, demand, max_surplus)))
            .collect();
        let surplus: Vec<usize> = demand
            .iter()
            .map(|_| program.add_var(max_surplus as i64))
            .collect();

        // production[i] - surplus[i] == demand[i]
        for (i, &d) in demand.iter().enumerate() {
            let mut terms: Vec<(usize, f64)> = patterns
                .iter()
                .zip(&bars)
                .filter(|(p, _)| p.counts[i] > 0)
                .map(|(p, &x)| (x, p.counts[i] as f64))
                .collect();
            terms.push((surplus[i], -1.0));
            program.add_row(terms, Sense::Equal, d as f64);
        }

        Self {
            program,
            bars,
            surplus,
            waste: patterns.iter().map(|p| p.waste(stock)).collect(),
        }
    }

    fn waste_terms(&self) -> Vec<(usize, f64)> {
        self.bars
            .iter()
            .zip(&self.waste)
            .map(|(&x, &w)| (x, w as f64))
            .collect()
    }

    fn total_waste(&self, values: &[i64]) -> i64 {
        self.bars
            .iter()
            .zip(&self.waste)
            .map(|(&x, &w)| values[x] * w)
            .sum()
    }

    fn patterns_used(&self, values: &[i64]) -> usize {
        self.bars.iter().filter(|&&x| values[x] > 0).count()
    }
}

/// Phase A result. `Ok(None)` means demand cannot be covered within the
/// current surplus bound.
fn settle_waste_phase(
    outcome: Outcome,
    budget: Duration,
) -> Result<Option<Vec<i64>>, OptimizeError> {
    match outcome {
        Outcome::Optimal(values) | Outcome::Incumbent(values) => Ok(Some(values)),
        Outcome::Infeasible => Ok(None),
        Outcome::TimedOut => Err(OptimizeError::Timeout {
            stage: "waste",
            budget_secs: budget.as_secs_f64(),
        }),
    }
}

/// Phase B result. The waste-optimal plan already satisfies the waste lock,
/// so it stands whenever the surplus phase has nothing to offer.
fn settle_surplus_phase(outcome: Outcome, waste_plan: Vec<i64>) -> Vec<i64> {
    match outcome {
        Outcome::Optimal(values) | Outcome::Incumbent(values) => values,
        Outcome::Infeasible | Outcome::TimedOut => {
            tracing::warn!("surplus phase gave no better plan, keeping the waste-optimal one");
            waste_plan
        }
    }
}

fn settle_cap_phase(
    outcome: Outcome,
    cap: u32,
    budget: Duration,
) -> Result<Vec<i64>, OptimizeError> {
    match outcome {
        Outcome::Optimal(values) | Outcome::Incumbent(values) => Ok(values),
        Outcome::Infeasible => Err(OptimizeError::PatternCapInfeasible { max_patterns: cap }),
        Outcome::TimedOut => Err(OptimizeError::Timeout {
            stage: "pattern cap",
            budget_secs: budget.as_secs_f64(),
        }),
    }
}

/// One full allocation under a fixed surplus bound. `Ok(None)` means demand
/// cannot be covered within the bound.
fn attempt_with_bound(
    patterns: &[Pattern],
    demand: &[u32],
    stock: i64,
    max_surplus: u32,
    max_patterns: Option<u32>,
    deadline: &Deadline,
) -> Result<Option<Allocation>, OptimizeError> {
    let mut model = CoverageModel::build(patterns, demand, stock, max_surplus);

    // Phase A: waste.
    let waste_terms = model.waste_terms();
    model.program.set_objective(waste_terms);
    let outcome = model.program.solve(deadline.remaining())?;
    let Some(waste_plan) = settle_waste_phase(outcome, deadline.budget())? else {
        return Ok(None);
    };
    let min_waste = model.total_waste(&waste_plan);
    tracing::debug!(min_waste, "waste phase solved");

    // Phase B: surplus, with waste held at its optimum. `<=` is equivalent
    // to equality here since nothing can go below the optimum.
    let waste_lock = model.waste_terms();
    let surplus_terms = model.surplus.iter().map(|&s| (s, 1.0)).collect();
    model.program.add_row(waste_lock, Sense::AtMost, min_waste as f64);
    model.program.set_objective(surplus_terms);
    let outcome = model.program.solve(deadline.remaining())?;
    let mut plan = settle_surplus_phase(outcome, waste_plan);

    if let Some(cap) = max_patterns {
        let used = model.patterns_used(&plan);
        if used > cap as usize {
            tracing::debug!(used, cap, "re-solving under the pattern cap");
            plan = solve_with_cap(&mut model, cap, deadline)?;
        }
    }

    let entries = patterns
        .iter()
        .zip(&model.bars)
        .filter(|&(_, &x)| plan[x] > 0)
        .map(|(p, &x)| AllocationEntry {
            pattern: p.clone(),
            multiplicity: plan[x] as u32,
            bundle_factor: None,
            bundles: None,
        })
        .collect();

    Ok(Some(Allocation { entries }))
}

fn solve_with_cap(
    model: &mut CoverageModel,
    cap: u32,
    deadline: &Deadline,
) -> Result<Vec<i64>, OptimizeError> {
    let mut indicators = Vec::with_capacity(model.bars.len());
    for &x in &model.bars {
        let used = model.program.add_var(1);
        let upper = model.program.upper(x) as f64;
        // used == 0 forces x == 0, used == 1 forces x >= 1
        model
            .program
            .add_row(vec![(x, 1.0), (used, -upper)], Sense::AtMost, 0.0);
        model
            .program
            .add_row(vec![(x, 1.0), (used, -1.0)], Sense::AtLeast, 0.0);
        indicators.push((used, 1.0));
    }
    model.program.add_row(indicators, Sense::AtMost, cap as f64);

    let outcome = model.program.solve(deadline.remaining())?;
    settle_cap_phase(outcome, cap, deadline.budget())
}
