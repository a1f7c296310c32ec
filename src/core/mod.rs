pub mod amortization;
pub mod capital_gains;
pub mod engine;
pub mod error;
pub mod fire;
pub mod freedom_score;
pub mod primitives;
pub mod solver;
pub mod tax;
pub mod types;
pub mod withdrawal;

pub use amortization::{
    PayoffStrategy, PrepaymentMode, compare_strategies, emi, generate_schedule,
    prepayment_impact, simulate_payoff,
};
pub use capital_gains::{CapitalGainLot, CapitalGainsConfig, assess_lots, classify_and_tax};
pub use engine::{ExecutionMode, MarketAssumptions, MonteCarloInputs, SimulationResult, run};
pub use error::{EngineError, Result};
pub use fire::{FireAssumptions, fire_number, fire_summary, years_to_target};
pub use freedom_score::{FreedomScoreConfig, ScoreInputs, TaxPosition, freedom_score};
pub use primitives::Money;
pub use solver::{GoalSolveConfig, GoalType, solve_goal};
pub use tax::{TaxRegimeConfig, TaxRegimeSet, apply_deductions, compare_regimes, compute_tax};
pub use types::{ClaimedDeduction, Debt, FinancialSnapshot};
pub use withdrawal::{WithdrawalContext, WithdrawalStrategyParams, calculate_withdrawal};
