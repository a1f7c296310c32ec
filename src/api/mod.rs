use std::fs;
use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand, ValueEnum};
use log::debug;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::core::amortization::{AmortizationSchedule, PrepaymentImpact};
use crate::core::capital_gains::{CapitalGainAssessment, CapitalGainsSummary, summarize};
use crate::core::fire::FireSummary;
use crate::core::freedom_score::{FreedomScore, retirement_readiness_inputs};
use crate::core::primitives::percent_to_fraction;
use crate::core::tax::{RegimeComparison, TaxBreakdown, tax_breakdown};
use crate::core::withdrawal::{ProjectionInputs, WithdrawalDecision, WithdrawalYear, project_withdrawals};
use crate::core::{
    CapitalGainLot, CapitalGainsConfig, ClaimedDeduction, Debt, ExecutionMode, FinancialSnapshot,
    FireAssumptions, FreedomScoreConfig, GoalSolveConfig, GoalType, MarketAssumptions,
    MonteCarloInputs, PayoffStrategy, PrepaymentMode, ScoreInputs, SimulationResult, TaxPosition,
    TaxRegimeConfig, TaxRegimeSet, WithdrawalContext, WithdrawalStrategyParams, apply_deductions,
    assess_lots, calculate_withdrawal, compare_regimes, compare_strategies, emi, fire_summary,
    freedom_score, generate_schedule, prepayment_impact, run, simulate_payoff, solve_goal,
};

/// Every tunable table the calculators read. Missing keys keep the built-in
/// values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    #[serde(alias = "tax_regimes")]
    pub tax_regimes: TaxRegimeSet,
    /// Added to `tax_regimes` instead of replacing it.
    #[serde(alias = "extra_regimes")]
    pub extra_regimes: Vec<TaxRegimeConfig>,
    #[serde(alias = "capital_gains")]
    pub capital_gains: CapitalGainsConfig,
    pub market: MarketAssumptions,
    pub fire: FireAssumptions,
    pub score: FreedomScoreConfig,
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self, String> {
        let mut config: Self =
            serde_json::from_str(json).map_err(|e| format!("Invalid config JSON: {e}"))?;
        for regime in std::mem::take(&mut config.extra_regimes) {
            config.tax_regimes.insert(regime);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: Option<&Path>) -> Result<Self, String> {
        match path {
            None => Ok(Self::default()),
            Some(path) => {
                let json = fs::read_to_string(path)
                    .map_err(|e| format!("Cannot read config {}: {e}", path.display()))?;
                debug!("loaded engine config from {}", path.display());
                Self::from_json(&json)
            }
        }
    }

    fn validate(&self) -> Result<(), String> {
        for regime in self.tax_regimes.iter() {
            regime.validate().map_err(|e| e.to_string())?;
        }
        self.capital_gains.validate().map_err(|e| e.to_string())?;
        self.market.validate().map_err(|e| e.to_string())?;
        self.fire.multipliers.validate().map_err(|e| e.to_string())?;
        self.score.validate().map_err(|e| e.to_string())
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum CliPrepaymentMode {
    ReduceInstallment,
    ReduceTerm,
}

impl From<CliPrepaymentMode> for PrepaymentMode {
    fn from(value: CliPrepaymentMode) -> Self {
        match value {
            CliPrepaymentMode::ReduceInstallment => PrepaymentMode::ReduceInstallment,
            CliPrepaymentMode::ReduceTerm => PrepaymentMode::ReduceTerm,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum CliPayoffStrategy {
    Avalanche,
    Snowball,
}

impl From<CliPayoffStrategy> for PayoffStrategy {
    fn from(value: CliPayoffStrategy) -> Self {
        match value {
            CliPayoffStrategy::Avalanche => PayoffStrategy::Avalanche,
            CliPayoffStrategy::Snowball => PayoffStrategy::Snowball,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum CliGoal {
    MaxWithdrawal,
    RequiredCorpus,
}

impl From<CliGoal> for GoalType {
    fn from(value: CliGoal) -> Self {
        match value {
            CliGoal::MaxWithdrawal => GoalType::MaxWithdrawal,
            CliGoal::RequiredCorpus => GoalType::RequiredCorpus,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "fire-engine",
    about = "Retirement planning calculators: tax, capital gains, loans, FIRE, withdrawals, Monte Carlo"
)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        help = "Engine configuration JSON; built-in tables when omitted"
    )]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Income tax under one regime, or a comparison of every regime
    Tax {
        #[arg(long, help = "Gross annual income")]
        income: f64,
        #[arg(long, help = "Regime name; compares all regimes when omitted")]
        regime: Option<String>,
        #[arg(long, help = "JSON file with claimed deductions")]
        deductions: Option<PathBuf>,
    },
    /// Classify and tax a batch of capital-gain lots
    CapitalGains {
        #[arg(long, help = "JSON file with an array of lots")]
        lots: PathBuf,
    },
    /// Level monthly installment for a loan
    Emi {
        #[arg(long)]
        principal: f64,
        #[arg(long, help = "Annual interest rate in percent, e.g. 10")]
        rate: f64,
        #[arg(long)]
        months: u32,
    },
    /// Month-by-month amortization schedule
    Schedule {
        #[arg(long)]
        principal: f64,
        #[arg(long, help = "Annual interest rate in percent")]
        rate: f64,
        #[arg(long)]
        months: u32,
        #[arg(long, help = "Monthly installment; defaults to the EMI")]
        installment: Option<f64>,
    },
    /// Effect of a lump-sum prepayment
    Prepay {
        #[arg(long)]
        balance: f64,
        #[arg(long, help = "Annual interest rate in percent")]
        rate: f64,
        #[arg(long)]
        remaining_months: u32,
        #[arg(long)]
        installment: f64,
        #[arg(long)]
        amount: f64,
        #[arg(long, value_enum, default_value_t = CliPrepaymentMode::ReduceTerm)]
        mode: CliPrepaymentMode,
    },
    /// Multi-debt payoff; compares avalanche and snowball when no strategy is given
    Payoff {
        #[arg(long, help = "JSON file with an array of debts")]
        debts: PathBuf,
        #[arg(long, default_value_t = 0.0, help = "Extra monthly payment")]
        extra: f64,
        #[arg(long, value_enum)]
        strategy: Option<CliPayoffStrategy>,
        #[arg(long, help = "First payment month, YYYY-MM-DD; defaults to today")]
        start: Option<NaiveDate>,
    },
    /// FIRE numbers and timeline for a snapshot
    Fire {
        #[arg(long, help = "JSON file with a financial snapshot")]
        snapshot: PathBuf,
        #[arg(long, help = "Safe withdrawal rate in percent")]
        swr: Option<f64>,
        #[arg(long, help = "Expected annual return in percent")]
        expected_return: Option<f64>,
        #[arg(long, help = "Part-time monthly income for barista FIRE")]
        part_time_income: Option<f64>,
    },
    /// One withdrawal decision, optionally projected forward
    Withdrawal {
        #[arg(long, help = "JSON file with strategy, context and optional projection")]
        request: PathBuf,
    },
    /// Monte Carlo survival of a corpus under a fixed withdrawal
    Simulate {
        #[arg(long)]
        corpus: f64,
        #[arg(long, help = "Annual withdrawal amount")]
        withdrawal: Option<f64>,
        #[arg(long, help = "Withdrawal as a percent of the starting corpus")]
        swr: Option<f64>,
        #[arg(long, default_value_t = 30)]
        years: u32,
        #[arg(long, default_value_t = 60.0, help = "Equity allocation in percent")]
        equity: f64,
        #[arg(long, default_value_t = 10_000)]
        runs: u32,
        #[arg(long, default_value_t = 42)]
        seed: u64,
        #[arg(long, help = "Spread runs across threads")]
        parallel: bool,
        #[arg(long, help = "Include every simulated path in the output")]
        include_paths: bool,
    },
    /// Bisection for the largest withdrawal or smallest corpus meeting a success target
    Solve {
        #[arg(long, value_enum)]
        goal: CliGoal,
        #[arg(long, default_value_t = 0.0)]
        corpus: f64,
        #[arg(long, default_value_t = 0.0)]
        withdrawal: f64,
        #[arg(long, default_value_t = 30)]
        years: u32,
        #[arg(long, default_value_t = 60.0, help = "Equity allocation in percent")]
        equity: f64,
        #[arg(long, default_value_t = 90.0, help = "Target success rate in percent")]
        target_success: f64,
        #[arg(long, default_value_t = 0.0)]
        search_min: f64,
        #[arg(long)]
        search_max: f64,
        #[arg(long, default_value_t = 1_000.0)]
        tolerance: f64,
        #[arg(long, default_value_t = 40)]
        max_iterations: u32,
        #[arg(long, default_value_t = 2_000)]
        runs_per_iteration: u32,
        #[arg(long, default_value_t = 10_000)]
        final_runs: u32,
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
    /// Composite 0-100 freedom score for a snapshot
    Score {
        #[arg(long, help = "JSON file with a financial snapshot")]
        snapshot: PathBuf,
        #[arg(long, help = "Regime currently filed under; enables the tax domain")]
        regime: Option<String>,
        #[arg(long, default_value_t = 2_000, help = "Monte Carlo runs; 0 skips readiness")]
        runs: u32,
        #[arg(long, default_value_t = 40, help = "Years the corpus must last")]
        horizon_years: u32,
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WithdrawalRequest {
    strategy: WithdrawalStrategyParams,
    context: WithdrawalContext,
    #[serde(default)]
    projection: Option<ProjectionRequest>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectionRequest {
    #[serde(alias = "annual_return")]
    annual_return: f64,
    #[serde(default, alias = "cash_return")]
    cash_return: f64,
    #[serde(default, alias = "bond_return")]
    bond_return: f64,
    years: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TaxResponse {
    regime: String,
    gross_income: f64,
    breakdown: TaxBreakdown,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum TaxOutput {
    Single(TaxResponse),
    Comparison(RegimeComparison),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct LotReport {
    id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    assessment: Option<CapitalGainAssessment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CapitalGainsResponse {
    lots: Vec<LotReport>,
    summary: CapitalGainsSummary,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EmiResponse {
    installment: f64,
    total_paid: f64,
    total_interest: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ScheduleResponse {
    installment: f64,
    schedule: AmortizationSchedule,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WithdrawalResponse {
    decision: WithdrawalDecision,
    #[serde(skip_serializing_if = "Option::is_none")]
    projection: Option<Vec<WithdrawalYear>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ScoreResponse {
    score: FreedomScore,
    fire: FireSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    success_rate: Option<f64>,
}

/// Runs one subcommand and returns its pretty-printed JSON.
pub fn execute(cli: Cli) -> Result<String, String> {
    let config = EngineConfig::load(cli.config.as_deref())?;
    match cli.command {
        Command::Tax {
            income,
            regime,
            deductions,
        } => {
            let claimed: Vec<ClaimedDeduction> = match deductions {
                Some(path) => read_json(&path, "deductions")?,
                None => Vec::new(),
            };
            to_json(&tax_output(&config, income, regime.as_deref(), &claimed)?)
        }
        Command::CapitalGains { lots } => {
            let lots: Vec<CapitalGainLot> = read_json(&lots, "lots")?;
            to_json(&capital_gains_response(&config.capital_gains, &lots))
        }
        Command::Emi {
            principal,
            rate,
            months,
        } => {
            let installment = emi(principal, percent("--rate", rate)?, months).map_err(to_message)?;
            let total_paid = installment * months as f64;
            to_json(&EmiResponse {
                installment,
                total_paid,
                total_interest: (total_paid - principal).max(0.0),
            })
        }
        Command::Schedule {
            principal,
            rate,
            months,
            installment,
        } => {
            let rate = percent("--rate", rate)?;
            let installment = match installment {
                Some(v) => v,
                None => emi(principal, rate, months).map_err(to_message)?,
            };
            let schedule =
                generate_schedule(principal, rate, months, installment).map_err(to_message)?;
            to_json(&ScheduleResponse {
                installment,
                schedule,
            })
        }
        Command::Prepay {
            balance,
            rate,
            remaining_months,
            installment,
            amount,
            mode,
        } => {
            let impact: PrepaymentImpact = prepayment_impact(
                balance,
                percent("--rate", rate)?,
                remaining_months,
                installment,
                amount,
                mode.into(),
            )
            .map_err(to_message)?;
            to_json(&impact)
        }
        Command::Payoff {
            debts,
            extra,
            strategy,
            start,
        } => {
            let debts: Vec<Debt> = read_json(&debts, "debts")?;
            let start = start.unwrap_or_else(|| Local::now().date_naive());
            match strategy {
                Some(strategy) => to_json(
                    &simulate_payoff(&debts, strategy.into(), extra, start).map_err(to_message)?,
                ),
                None => to_json(&compare_strategies(&debts, extra, start).map_err(to_message)?),
            }
        }
        Command::Fire {
            snapshot,
            swr,
            expected_return,
            part_time_income,
        } => {
            let snapshot: FinancialSnapshot = read_json(&snapshot, "snapshot")?;
            let assumptions =
                fire_assumptions(config.fire, swr, expected_return, part_time_income)?;
            to_json(&fire_summary(&snapshot, &assumptions).map_err(to_message)?)
        }
        Command::Withdrawal { request } => {
            let request: WithdrawalRequest = read_json(&request, "withdrawal request")?;
            to_json(&withdrawal_response(request)?)
        }
        Command::Simulate {
            corpus,
            withdrawal,
            swr,
            years,
            equity,
            runs,
            seed,
            parallel,
            include_paths,
        } => {
            let mut inputs = match (withdrawal, swr) {
                (Some(withdrawal), None) => MonteCarloInputs {
                    starting_corpus: corpus,
                    annual_withdrawal: withdrawal,
                    years,
                    equity_allocation: percent_bounded("--equity", equity)?,
                    runs,
                    seed,
                    market: config.market,
                    execution: ExecutionMode::Sequential,
                },
                (None, Some(swr)) => MonteCarloInputs::from_fixed_swr(
                    corpus,
                    percent("--swr", swr)?,
                    years,
                    percent_bounded("--equity", equity)?,
                    runs,
                    seed,
                    config.market,
                )
                .map_err(to_message)?,
                _ => return Err("exactly one of --withdrawal or --swr is required".to_string()),
            };
            if parallel {
                inputs.execution = ExecutionMode::Parallel;
            }
            to_json(&simulate(&inputs, include_paths)?)
        }
        Command::Solve {
            goal,
            corpus,
            withdrawal,
            years,
            equity,
            target_success,
            search_min,
            search_max,
            tolerance,
            max_iterations,
            runs_per_iteration,
            final_runs,
            seed,
        } => {
            let inputs = MonteCarloInputs {
                starting_corpus: corpus,
                annual_withdrawal: withdrawal,
                years,
                equity_allocation: percent_bounded("--equity", equity)?,
                runs: runs_per_iteration,
                seed,
                market: config.market,
                execution: ExecutionMode::Parallel,
            };
            let solve_config = GoalSolveConfig {
                goal_type: goal.into(),
                target_success_rate: percent_bounded("--target-success", target_success)?,
                search_min,
                search_max,
                tolerance,
                max_iterations,
                runs_per_iteration,
                final_runs,
            };
            to_json(&solve_goal(&inputs, solve_config).map_err(to_message)?)
        }
        Command::Score {
            snapshot,
            regime,
            runs,
            horizon_years,
            seed,
        } => {
            let snapshot: FinancialSnapshot = read_json(&snapshot, "snapshot")?;
            to_json(&score_response(
                &config,
                &snapshot,
                regime.as_deref(),
                runs,
                horizon_years,
                seed,
            )?)
        }
    }
}

fn to_message(e: crate::core::EngineError) -> String {
    e.to_string()
}

fn to_json<T: Serialize>(value: &T) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("Cannot serialize result: {e}"))
}

fn read_json<T: DeserializeOwned>(path: &Path, what: &str) -> Result<T, String> {
    let json = fs::read_to_string(path)
        .map_err(|e| format!("Cannot read {what} file {}: {e}", path.display()))?;
    serde_json::from_str(&json).map_err(|e| format!("Invalid {what} JSON: {e}"))
}

fn percent(flag: &str, value: f64) -> Result<f64, String> {
    if !value.is_finite() {
        return Err(format!("{flag} must be a finite number"));
    }
    Ok(percent_to_fraction(value))
}

fn percent_bounded(flag: &str, value: f64) -> Result<f64, String> {
    if !(0.0..=100.0).contains(&value) {
        return Err(format!("{flag} must be between 0 and 100"));
    }
    percent(flag, value)
}

fn tax_output(
    config: &EngineConfig,
    income: f64,
    regime: Option<&str>,
    claimed: &[ClaimedDeduction],
) -> Result<TaxOutput, String> {
    if !income.is_finite() || income < 0.0 {
        return Err("--income must be >= 0".to_string());
    }
    match regime {
        Some(name) => {
            let regime = config.tax_regimes.get(name).map_err(to_message)?;
            let taxable = apply_deductions(income, claimed, regime).map_err(to_message)?;
            Ok(TaxOutput::Single(TaxResponse {
                regime: regime.name.clone(),
                gross_income: income,
                breakdown: tax_breakdown(taxable, regime).map_err(to_message)?,
            }))
        }
        None => compare_regimes(income, claimed, &config.tax_regimes)
            .map(TaxOutput::Comparison)
            .map_err(to_message),
    }
}

fn capital_gains_response(config: &CapitalGainsConfig, lots: &[CapitalGainLot]) -> CapitalGainsResponse {
    let results = assess_lots(lots, config);
    let summary = summarize(&results);
    let lots = lots
        .iter()
        .zip(results)
        .map(|(lot, result)| match result {
            Ok(assessment) => LotReport {
                id: lot.id.clone(),
                assessment: Some(assessment),
                error: None,
            },
            Err(e) => LotReport {
                id: lot.id.clone(),
                assessment: None,
                error: Some(e.to_string()),
            },
        })
        .collect();
    CapitalGainsResponse { lots, summary }
}

fn fire_assumptions(
    base: FireAssumptions,
    swr: Option<f64>,
    expected_return: Option<f64>,
    part_time_income: Option<f64>,
) -> Result<FireAssumptions, String> {
    let mut assumptions = base;
    if let Some(v) = swr {
        if v <= 0.0 || v > 100.0 {
            return Err("--swr must be > 0 and <= 100".to_string());
        }
        assumptions.safe_withdrawal_rate = percent("--swr", v)?;
    }
    if let Some(v) = expected_return {
        if v <= -100.0 {
            return Err("--expected-return must be > -100".to_string());
        }
        assumptions.expected_annual_return = percent("--expected-return", v)?;
    }
    if let Some(v) = part_time_income {
        if !v.is_finite() || v < 0.0 {
            return Err("--part-time-income must be >= 0".to_string());
        }
        assumptions.part_time_monthly_income = v;
    }
    Ok(assumptions)
}

fn withdrawal_response(request: WithdrawalRequest) -> Result<WithdrawalResponse, String> {
    let decision = calculate_withdrawal(&request.strategy, &request.context).map_err(to_message)?;
    let projection = match request.projection {
        Some(projection) => Some(
            project_withdrawals(
                &request.strategy,
                &ProjectionInputs {
                    starting_corpus: request.context.corpus,
                    annual_expenses: request.context.annual_expenses,
                    current_age: request.context.current_age,
                    annual_return: projection.annual_return,
                    cash_return: projection.cash_return,
                    bond_return: projection.bond_return,
                    inflation: request.context.inflation,
                    years: projection.years,
                },
            )
            .map_err(to_message)?,
        ),
        None => None,
    };
    Ok(WithdrawalResponse {
        decision,
        projection,
    })
}

fn simulate(inputs: &MonteCarloInputs, include_paths: bool) -> Result<SimulationResult, String> {
    let mut result = run(inputs).map_err(to_message)?;
    if !include_paths {
        result.paths.clear();
    }
    Ok(result)
}

fn score_response(
    config: &EngineConfig,
    snapshot: &FinancialSnapshot,
    regime: Option<&str>,
    runs: u32,
    horizon_years: u32,
    seed: u64,
) -> Result<ScoreResponse, String> {
    let tax = match regime {
        Some(name) => {
            let comparison = compare_regimes(
                snapshot.gross_annual_income(),
                &snapshot.deductions,
                &config.tax_regimes,
            )
            .map_err(to_message)?;
            Some(TaxPosition::from_comparison(&comparison, name).map_err(to_message)?)
        }
        None => None,
    };

    let simulation = if runs > 0 {
        let inputs = retirement_readiness_inputs(
            snapshot,
            &config.fire,
            config.market,
            horizon_years,
            runs,
            seed,
        )
        .map_err(to_message)?;
        Some(run(&inputs).map_err(to_message)?)
    } else {
        None
    };

    let inputs = ScoreInputs::from_snapshot(snapshot, &config.fire, simulation.as_ref(), tax)
        .map_err(to_message)?;
    Ok(ScoreResponse {
        score: freedom_score(&inputs, &config.score).map_err(to_message)?,
        fire: fire_summary(snapshot, &config.fire).map_err(to_message)?,
        success_rate: simulation.map(|s| s.success_rate),
    })
}
