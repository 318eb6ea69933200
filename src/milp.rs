//! Solver-neutral integer programs and their solution through `good_lp`.
//!
//! Allocators describe their model as plain data (`IntegerProgram`) so that
//! it can be re-solved with extra rows. Every variable is a non-negative
//! integer with an explicit upper bound; the objective is always minimized.

use std::time::{Duration, Instant};

use good_lp::{
    Expression, ProblemVariables, ResolutionError, Solution, SolutionStatus, SolverModel,
    Variable, WithTimeLimit, constraint, default_solver, variable,
};

use crate::error::OptimizeError;

pub const INT32_CEILING: i64 = i32::MAX as i64;

/// Bounds handed to the backend never exceed the signed 32-bit range.
pub fn clamp_bound(value: i64) -> i64 {
    value.clamp(0, INT32_CEILING)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sense {
    AtMost,
    AtLeast,
    Equal,
}

#[derive(Debug, Clone)]
pub struct Row {
    pub terms: Vec<(usize, f64)>,
    pub sense: Sense,
    pub rhs: f64,
}

#[derive(Debug, Clone, Default)]
pub struct IntegerProgram {
    upper: Vec<i64>,
    objective: Vec<(usize, f64)>,
    rows: Vec<Row>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Proven optimal.
    Optimal(Vec<i64>),
    /// Best feasible values found before the budget ran out.
    Incumbent(Vec<i64>),
    Infeasible,
    /// The budget ran out before any feasible values were found.
    TimedOut,
}

/// Wall-clock limit shared by every solve of one allocation.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    budget: Duration,
    at: Instant,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            budget,
            at: Instant::now() + budget,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }
}

impl IntegerProgram {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an integer variable in `[0, upper]` and returns its index.
    pub fn add_var(&mut self, upper: i64) -> usize {
        self.upper.push(clamp_bound(upper));
        self.upper.len() - 1
    }

    pub fn add_row(&mut self, terms: Vec<(usize, f64)>, sense: Sense, rhs: f64) {
        self.rows.push(Row { terms, sense, rhs });
    }

    pub fn set_objective(&mut self, terms: Vec<(usize, f64)>) {
        self.objective = terms;
    }

    pub fn var_count(&self) -> usize {
        self.upper.len()
    }

    pub fn upper(&self, var: usize) -> i64 {
        self.upper[var]
    }

    /// Solves with the backend's own time limit set to `budget`, so the
    /// call returns once the limit is hit.
    pub fn solve(&self, budget: Duration) -> Result<Outcome, OptimizeError> {
        let started = Instant::now();
        let mut vars = ProblemVariables::new();
        let handles: Vec<Variable> = self
            .upper
            .iter()
            .map(|&ub| vars.add(variable().integer().min(0.0).max(ub as f64)))
            .collect();

        let objective = linear(&handles, &self.objective);
        let mut model = vars
            .minimise(objective)
            .using(default_solver)
            .with_time_limit(budget.as_secs_f64());

        for row in &self.rows {
            let lhs = linear(&handles, &row.terms);
            let rhs = row.rhs;
            model = match row.sense {
                Sense::AtMost => model.with(constraint!(lhs <= rhs)),
                Sense::AtLeast => model.with(constraint!(lhs >= rhs)),
                Sense::Equal => model.with(constraint!(lhs == rhs)),
            };
        }

        match model.solve() {
            Ok(solution) => {
                let values: Vec<i64> = handles
                    .iter()
                    .map(|&v| solution.value(v).round() as i64)
                    .collect();
                match solution.status() {
                    SolutionStatus::Optimal => Ok(Outcome::Optimal(values)),
                    SolutionStatus::TimeLimit | SolutionStatus::GapLimit => {
                        tracing::warn!(
                            budget_secs = budget.as_secs_f64(),
                            variables = self.upper.len(),
                            "solver stopped at its time budget, using its best plan"
                        );
                        Ok(Outcome::Incumbent(values))
                    }
                }
            }
            Err(ResolutionError::Infeasible) => Ok(Outcome::Infeasible),
            Err(ResolutionError::Other(_)) if started.elapsed() >= budget => {
                tracing::warn!(
                    budget_secs = budget.as_secs_f64(),
                    variables = self.upper.len(),
                    "solver found no plan within its time budget"
                );
                Ok(Outcome::TimedOut)
            }
            Err(other) => Err(OptimizeError::Solver(other.to_string())),
        }
    }
}

fn linear(handles: &[Variable], terms: &[(usize, f64)]) -> Expression {
    let mut expr = Expression::from(0.0);
    for &(idx, coeff) in terms {
        expr += coeff * handles[idx];
    }
    expr
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUDGET: Duration = Duration::from_secs(30);

    fn knapsack() -> IntegerProgram {
        // cover 7 with 3a + 5b, minimize a + 3b
        let mut program = IntegerProgram::new();
        let a = program.add_var(10);
        let b = program.add_var(10);
        program.add_row(vec![(a, 3.0), (b, 5.0)], Sense::AtLeast, 7.0);
        program.set_objective(vec![(a, 1.0), (b, 3.0)]);
        program
    }

    #[test]
    fn test_clamp_bound() {
        assert_eq!(clamp_bound(-5), 0);
        assert_eq!(clamp_bound(42), 42);
        assert_eq!(clamp_bound(i64::MAX), i32::MAX as i64);
    }

    #[test]
    fn test_small_knapsack_cover() {
        assert_eq!(
            knapsack().solve(BUDGET).unwrap(),
            Outcome::Optimal(vec![3, 0])
        );
    }

    #[test]
    fn test_integrality_is_enforced() {
        // 2x == 3 has no integer solution
        let mut program = IntegerProgram::new();
        let x = program.add_var(10);
        program.add_row(vec![(x, 2.0)], Sense::Equal, 3.0);
        program.set_objective(vec![(x, 1.0)]);

        assert_eq!(program.solve(BUDGET).unwrap(), Outcome::Infeasible);
    }

    #[test]
    fn test_upper_bound_is_respected() {
        let mut program = IntegerProgram::new();
        let x = program.add_var(2);
        program.add_row(vec![(x, 1.0)], Sense::AtLeast, 3.0);
        program.set_objective(vec![(x, 1.0)]);

        assert_eq!(program.solve(BUDGET).unwrap(), Outcome::Infeasible);
        assert_eq!(program.upper(x), 2);
        assert_eq!(program.var_count(), 1);
    }

    #[test]
    fn test_zero_budget_times_out() {
        let started = Instant::now();
        assert_eq!(knapsack().solve(Duration::ZERO).unwrap(), Outcome::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_deadline_runs_down() {
        let deadline = Deadline::after(Duration::ZERO);
        assert_eq!(deadline.remaining(), Duration::ZERO);
        assert_eq!(deadline.budget(), Duration::ZERO);
        let remaining = Deadline::after(BUDGET).remaining();
        assert!(remaining > Duration::from_secs(29));
    }
}
