use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::engine::{MonteCarloInputs, run};
use super::error::{EngineError, Result};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GoalType {
    /// Largest annual withdrawal that still meets the success target.
    MaxWithdrawal,
    /// Smallest starting corpus that meets the success target.
    RequiredCorpus,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalSolveConfig {
    pub goal_type: GoalType,
    pub target_success_rate: f64,
    pub search_min: f64,
    pub search_max: f64,
    pub tolerance: f64,
    pub max_iterations: u32,
    pub runs_per_iteration: u32,
    pub final_runs: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalSolveIteration {
    pub iteration: u32,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub candidate_value: f64,
    pub success_rate: f64,
    pub success_ci_half_width: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalSolveResult {
    pub config: GoalSolveConfig,
    pub solved_value: Option<f64>,
    pub achieved_success_rate: Option<f64>,
    pub achieved_success_ci_half_width: Option<f64>,
    pub iterations: Vec<GoalSolveIteration>,
    pub converged: bool,
    pub feasible: bool,
    pub message: String,
}

/// Bisection over one Monte Carlo input. Every candidate reuses the base seed,
/// so success is monotone in the searched value.
pub fn solve_goal(inputs: &MonteCarloInputs, config: GoalSolveConfig) -> Result<GoalSolveResult> {
    validate_config(config)?;
    inputs.validate()?;

    let mut iterations = Vec::with_capacity(config.max_iterations as usize);
    let low_eval = evaluate_candidate(inputs, config, config.search_min, config.runs_per_iteration)?;
    let high_eval =
        evaluate_candidate(inputs, config, config.search_max, config.runs_per_iteration)?;
    let meets = |eval: CandidateEval| eval.success_rate + 1e-12 >= config.target_success_rate;

    let mut solved_value = None;
    let mut converged = false;
    let feasible;
    let message;

    match config.goal_type {
        GoalType::RequiredCorpus => {
            if meets(low_eval) {
                solved_value = Some(config.search_min);
                converged = true;
                feasible = true;
                message = "Already meets target at lower corpus bound.".to_string();
            } else if !meets(high_eval) {
                feasible = false;
                message = "No feasible corpus found within the search bounds.".to_string();
            } else {
                let mut lo = config.search_min;
                let mut hi = config.search_max;
                let mut it = 0;
                while it < config.max_iterations {
                    it += 1;
                    let mid = (lo + hi) * 0.5;
                    let eval = evaluate_candidate(inputs, config, mid, config.runs_per_iteration)?;
                    iterations.push(eval.trace(it, lo, hi, mid));

                    if meets(eval) {
                        hi = mid;
                    } else {
                        lo = mid;
                    }

                    if (hi - lo).abs() <= config.tolerance {
                        converged = true;
                        break;
                    }
                }
                solved_value = Some(hi);
                feasible = true;
                message = if converged {
                    "Solved required starting corpus.".to_string()
                } else {
                    "Reached max iterations before tolerance was met; returning best estimate."
                        .to_string()
                };
            }
        }
        GoalType::MaxWithdrawal => {
            if !meets(low_eval) {
                feasible = false;
                message = "No feasible withdrawal found within the search bounds.".to_string();
            } else if meets(high_eval) {
                solved_value = Some(config.search_max);
                converged = true;
                feasible = true;
                message = "Upper withdrawal bound is still feasible; increase search max."
                    .to_string();
            } else {
                let mut lo = config.search_min;
                let mut hi = config.search_max;
                let mut it = 0;
                while it < config.max_iterations {
                    it += 1;
                    let mid = (lo + hi) * 0.5;
                    let eval = evaluate_candidate(inputs, config, mid, config.runs_per_iteration)?;
                    iterations.push(eval.trace(it, lo, hi, mid));

                    if meets(eval) {
                        lo = mid;
                    } else {
                        hi = mid;
                    }

                    if (hi - lo).abs() <= config.tolerance {
                        converged = true;
                        break;
                    }
                }
                solved_value = Some(lo);
                feasible = true;
                message = if converged {
                    "Solved maximum sustainable withdrawal.".to_string()
                } else {
                    "Reached max iterations before tolerance was met; returning best estimate."
                        .to_string()
                };
            }
        }
    }

    if !converged && feasible {
        debug!(
            "goal solver stopped after {} iterations without meeting tolerance {}",
            config.max_iterations, config.tolerance
        );
    }

    let mut achieved_success_rate = None;
    let mut achieved_success_ci_half_width = None;
    if let Some(value) = solved_value {
        let final_eval = evaluate_candidate(inputs, config, value, config.final_runs)?;
        achieved_success_rate = Some(final_eval.success_rate);
        achieved_success_ci_half_width = Some(final_eval.success_ci_half_width);
    }

    info!("{:?}: {message}", config.goal_type);

    Ok(GoalSolveResult {
        config,
        solved_value,
        achieved_success_rate,
        achieved_success_ci_half_width,
        iterations,
        converged,
        feasible,
        message,
    })
}

#[derive(Debug, Clone, Copy)]
struct CandidateEval {
    success_rate: f64,
    success_ci_half_width: f64,
}

impl CandidateEval {
    fn trace(
        self,
        iteration: u32,
        lower_bound: f64,
        upper_bound: f64,
        candidate_value: f64,
    ) -> GoalSolveIteration {
        GoalSolveIteration {
            iteration,
            lower_bound,
            upper_bound,
            candidate_value,
            success_rate: self.success_rate,
            success_ci_half_width: self.success_ci_half_width,
        }
    }
}

fn evaluate_candidate(
    base_inputs: &MonteCarloInputs,
    config: GoalSolveConfig,
    candidate_value: f64,
    runs: u32,
) -> Result<CandidateEval> {
    let mut inputs = base_inputs.clone();
    inputs.runs = runs.max(1);

    match config.goal_type {
        GoalType::MaxWithdrawal => inputs.annual_withdrawal = candidate_value.max(0.0),
        GoalType::RequiredCorpus => inputs.starting_corpus = candidate_value.max(0.0),
    }

    let result = run(&inputs)?;
    Ok(CandidateEval {
        success_rate: result.success_rate,
        success_ci_half_width: binomial_ci_half_width(result.success_rate, inputs.runs),
    })
}

fn binomial_ci_half_width(p: f64, n: u32) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let p = p.clamp(0.0, 1.0);
    1.96 * (p * (1.0 - p) / n as f64).sqrt()
}

fn validate_config(config: GoalSolveConfig) -> Result<()> {
    if !(0.0..=1.0).contains(&config.target_success_rate) {
        return Err(EngineError::invalid(
            "target_success_rate",
            "must be between 0 and 1",
        ));
    }
    if !config.search_min.is_finite() || !config.search_max.is_finite() {
        return Err(EngineError::invalid("search bounds", "must be finite"));
    }
    if config.search_min < 0.0 {
        return Err(EngineError::invalid("search_min", "must be >= 0"));
    }
    if config.search_max <= config.search_min {
        return Err(EngineError::invalid(
            "search_max",
            "must be greater than search_min",
        ));
    }
    if !config.tolerance.is_finite() || config.tolerance <= 0.0 {
        return Err(EngineError::invalid("tolerance", "must be > 0"));
    }
    if config.max_iterations == 0 {
        return Err(EngineError::invalid("max_iterations", "must be > 0"));
    }
    if config.runs_per_iteration == 0 {
        return Err(EngineError::invalid("runs_per_iteration", "must be > 0"));
    }
    if config.final_runs == 0 {
        return Err(EngineError::invalid("final_runs", "must be > 0"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::engine::{ExecutionMode, MarketAssumptions};

    fn assert_close(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual}, tolerance {tol}"
        );
    }

    fn deterministic_inputs() -> MonteCarloInputs {
        MonteCarloInputs {
            starting_corpus: 1_000.0,
            annual_withdrawal: 100.0,
            years: 10,
            equity_allocation: 0.5,
            runs: 1,
            seed: 7,
            market: MarketAssumptions {
                equity_return_mean: 0.0,
                equity_return_vol: 0.0,
                debt_return_mean: 0.0,
                debt_return_vol: 0.0,
            },
            execution: ExecutionMode::Sequential,
        }
    }

    fn config(goal_type: GoalType, search_max: f64) -> GoalSolveConfig {
        GoalSolveConfig {
            goal_type,
            target_success_rate: 1.0,
            search_min: 0.0,
            search_max,
            tolerance: 0.5,
            max_iterations: 24,
            runs_per_iteration: 1,
            final_runs: 1,
        }
    }

    #[test]
    fn max_withdrawal_solver_finds_deterministic_solution() {
        let config = config(GoalType::MaxWithdrawal, 200.0);
        let result = solve_goal(&deterministic_inputs(), config).expect("must solve");
        assert!(result.feasible);
        assert!(result.converged);
        let value = result.solved_value.expect("value expected");
        assert!(value < 100.0);
        assert_close(value, 100.0, config.tolerance + 0.5);
        assert_close(
            result.achieved_success_rate.expect("rate expected"),
            1.0,
            1e-9,
        );
        assert!(!result.iterations.is_empty());
    }

    #[test]
    fn required_corpus_solver_finds_deterministic_solution() {
        let config = config(GoalType::RequiredCorpus, 5_000.0);
        let result = solve_goal(&deterministic_inputs(), config).expect("must solve");
        assert!(result.feasible);
        let value = result.solved_value.expect("value expected");
        assert!(value > 1_000.0);
        assert_close(value, 1_000.0, config.tolerance + 0.5);
    }

    #[test]
    fn required_corpus_solver_reports_infeasible_when_bounds_too_low() {
        let mut config = config(GoalType::RequiredCorpus, 500.0);
        config.max_iterations = 16;
        let result = solve_goal(&deterministic_inputs(), config).expect("must return result");
        assert!(!result.feasible);
        assert!(result.solved_value.is_none());
        assert!(result.achieved_success_rate.is_none());
    }

    #[test]
    fn iteration_cap_is_reported_as_not_converged() {
        let mut config = config(GoalType::MaxWithdrawal, 200.0);
        config.tolerance = 1e-9;
        config.max_iterations = 3;
        let result = solve_goal(&deterministic_inputs(), config).expect("must return result");
        assert!(result.feasible);
        assert!(!result.converged);
        assert_eq!(result.iterations.len(), 3);
    }

    #[test]
    fn rejects_inverted_bounds() {
        let mut config = config(GoalType::MaxWithdrawal, 200.0);
        config.search_min = 300.0;
        assert!(solve_goal(&deterministic_inputs(), config).is_err());
    }
}
