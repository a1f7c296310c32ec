use std::f64::consts::PI;

use log::info;
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::error::{EngineError, Result};
use super::primitives::{Money, ensure_finite, ensure_fraction, ensure_non_negative};
use super::withdrawal::{WithdrawalContext, WithdrawalStrategyParams, calculate_withdrawal};

/// Sampled returns are clamped so a year's growth factor stays positive.
const RETURN_FLOOR: f64 = -0.95;
const RETURN_CEILING: f64 = 2.5;
pub const MAX_YEARS: u32 = 150;

/// Percentiles reported for every year of the horizon.
pub const BAND_PERCENTILES: [f64; 7] = [5.0, 10.0, 25.0, 50.0, 75.0, 90.0, 95.0];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MarketAssumptions {
    pub equity_return_mean: f64,
    pub equity_return_vol: f64,
    pub debt_return_mean: f64,
    pub debt_return_vol: f64,
}

impl Default for MarketAssumptions {
    fn default() -> Self {
        Self {
            equity_return_mean: 0.12,
            equity_return_vol: 0.18,
            debt_return_mean: 0.07,
            debt_return_vol: 0.04,
        }
    }
}

impl MarketAssumptions {
    pub fn validate(&self) -> Result<()> {
        ensure_finite("equity_return_mean", self.equity_return_mean)?;
        ensure_finite("debt_return_mean", self.debt_return_mean)?;
        ensure_non_negative("equity_return_vol", self.equity_return_vol)?;
        ensure_non_negative("debt_return_vol", self.debt_return_vol)
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionMode {
    #[default]
    Sequential,
    Parallel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonteCarloInputs {
    pub starting_corpus: Money,
    pub annual_withdrawal: Money,
    pub years: u32,
    pub equity_allocation: f64,
    pub runs: u32,
    #[serde(default)]
    pub seed: u64,
    #[serde(default)]
    pub market: MarketAssumptions,
    #[serde(default)]
    pub execution: ExecutionMode,
}

impl MonteCarloInputs {
    /// Withdrawal fixed at `swr` of the starting corpus, via the withdrawal engine.
    pub fn from_fixed_swr(
        starting_corpus: Money,
        swr: f64,
        years: u32,
        equity_allocation: f64,
        runs: u32,
        seed: u64,
        market: MarketAssumptions,
    ) -> Result<Self> {
        let decision = calculate_withdrawal(
            &WithdrawalStrategyParams::FixedSwr { rate: swr },
            &WithdrawalContext {
                corpus: starting_corpus,
                annual_expenses: 0.0,
                current_age: 0,
                previous_withdrawal: None,
                inflation: 0.0,
            },
        )?;
        Ok(Self {
            starting_corpus,
            annual_withdrawal: decision.withdrawal,
            years,
            equity_allocation,
            runs,
            seed,
            market,
            execution: ExecutionMode::default(),
        })
    }

    pub fn validate(&self) -> Result<()> {
        ensure_non_negative("starting_corpus", self.starting_corpus)?;
        ensure_non_negative("annual_withdrawal", self.annual_withdrawal)?;
        ensure_fraction("equity_allocation", self.equity_allocation)?;
        if self.years == 0 || self.years > MAX_YEARS {
            return Err(EngineError::invalid(
                "years",
                format!("must be in 1..={MAX_YEARS}, got {}", self.years),
            ));
        }
        if self.runs == 0 {
            return Err(EngineError::invalid("runs", "must be at least 1"));
        }
        self.market.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PercentileBand {
    pub year: u32,
    pub p5: f64,
    pub p10: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
    pub p95: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioPaths {
    pub pessimistic: Vec<f64>,
    pub median: Vec<f64>,
    pub optimistic: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    /// One path per run, each `years + 1` long; index 0 is the starting corpus.
    pub paths: Vec<Vec<f64>>,
    pub runs: u32,
    pub successful_runs: u32,
    pub success_rate: f64,
    pub percentiles: Vec<PercentileBand>,
    pub scenarios: ScenarioPaths,
    pub median_terminal_corpus: f64,
    /// Mean year in which failed runs hit zero; `None` when nothing failed.
    pub mean_depletion_year: Option<f64>,
}

impl SimulationResult {
    /// Interpolated percentile of all runs' corpus at `year`.
    pub fn percentile_at(&self, year: u32, p: f64) -> Option<f64> {
        let mut column = column_at(&self.paths, year as usize)?;
        Some(percentile(&mut column, p))
    }
}

#[derive(Debug)]
struct RunOutcome {
    path: Vec<f64>,
    depleted_in: Option<u32>,
}

pub fn run(inputs: &MonteCarloInputs) -> Result<SimulationResult> {
    inputs.validate()?;

    let outcomes = match inputs.execution {
        ExecutionMode::Sequential => run_sequential(inputs),
        ExecutionMode::Parallel => run_parallel(inputs),
    };
    let result = summarize(outcomes, inputs);

    info!(
        "monte carlo: {} runs over {} years, success rate {:.1}%",
        inputs.runs,
        inputs.years,
        result.success_rate * 100.0
    );
    Ok(result)
}

fn run_sequential(inputs: &MonteCarloInputs) -> Vec<RunOutcome> {
    (0..inputs.runs)
        .map(|run_id| simulate_run(inputs, run_id))
        .collect()
}

#[cfg(feature = "parallel")]
fn run_parallel(inputs: &MonteCarloInputs) -> Vec<RunOutcome> {
    (0..inputs.runs)
        .into_par_iter()
        .map(|run_id| simulate_run(inputs, run_id))
        .collect()
}

#[cfg(not(feature = "parallel"))]
fn run_parallel(inputs: &MonteCarloInputs) -> Vec<RunOutcome> {
    log::debug!("built without the parallel feature; running sequentially");
    run_sequential(inputs)
}

/// A run that hits zero is failed and stays at zero for the rest of the horizon.
fn simulate_run(inputs: &MonteCarloInputs, run_id: u32) -> RunOutcome {
    let mut rng = Rng::new(derive_seed(inputs.seed, run_id));
    let mut path = Vec::with_capacity(inputs.years as usize + 1);
    let mut corpus = inputs.starting_corpus;
    let mut depleted_in = None;
    path.push(corpus);

    for year in 1..=inputs.years {
        if depleted_in.is_some() {
            path.push(0.0);
            continue;
        }

        let r = sample_portfolio_return(&inputs.market, inputs.equity_allocation, &mut rng);
        corpus = corpus * (1.0 + r) - inputs.annual_withdrawal;
        if corpus <= 0.0 {
            corpus = 0.0;
            depleted_in = Some(year);
        }
        path.push(corpus);
    }

    RunOutcome { path, depleted_in }
}

fn sample_portfolio_return(
    market: &MarketAssumptions,
    equity_allocation: f64,
    rng: &mut Rng,
) -> f64 {
    let z1 = rng.standard_normal();
    let z2 = rng.standard_normal();

    let equity = (market.equity_return_mean + market.equity_return_vol * z1)
        .clamp(RETURN_FLOOR, RETURN_CEILING);
    let debt =
        (market.debt_return_mean + market.debt_return_vol * z2).clamp(RETURN_FLOOR, RETURN_CEILING);

    equity_allocation * equity + (1.0 - equity_allocation) * debt
}

fn summarize(outcomes: Vec<RunOutcome>, inputs: &MonteCarloInputs) -> SimulationResult {
    let runs = outcomes.len() as u32;
    let depletion_years: Vec<u32> = outcomes.iter().filter_map(|o| o.depleted_in).collect();
    let successful_runs = runs - depletion_years.len() as u32;
    let paths: Vec<Vec<f64>> = outcomes.into_iter().map(|o| o.path).collect();

    let mut percentiles = Vec::with_capacity(inputs.years as usize + 1);
    let mut scenarios = ScenarioPaths {
        pessimistic: Vec::with_capacity(inputs.years as usize + 1),
        median: Vec::with_capacity(inputs.years as usize + 1),
        optimistic: Vec::with_capacity(inputs.years as usize + 1),
    };

    for year in 0..=inputs.years {
        let Some(mut column) = column_at(&paths, year as usize) else {
            continue;
        };
        column.sort_by(|a, b| a.total_cmp(b));
        let [p5, p10, p25, p50, p75, p90, p95] =
            BAND_PERCENTILES.map(|p| percentile_sorted(&column, p));

        scenarios.pessimistic.push(p5);
        scenarios.median.push(p50);
        scenarios.optimistic.push(p95);
        percentiles.push(PercentileBand {
            year,
            p5,
            p10,
            p25,
            p50,
            p75,
            p90,
            p95,
        });
    }

    let mean_depletion_year = if depletion_years.is_empty() {
        None
    } else {
        let total: u64 = depletion_years.iter().map(|&y| y as u64).sum();
        Some(total as f64 / depletion_years.len() as f64)
    };

    SimulationResult {
        median_terminal_corpus: scenarios.median.last().copied().unwrap_or(0.0),
        success_rate: successful_runs as f64 / runs.max(1) as f64,
        paths,
        runs,
        successful_runs,
        percentiles,
        scenarios,
        mean_depletion_year,
    }
}

fn column_at(paths: &[Vec<f64>], index: usize) -> Option<Vec<f64>> {
    paths.iter().map(|path| path.get(index).copied()).collect()
}

fn derive_seed(base_seed: u64, run_id: u32) -> u64 {
    splitmix64(splitmix64(base_seed) ^ run_id as u64)
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// xorshift64* with a cached Box–Muller normal.
struct Rng {
    state: u64,
    cached_normal: Option<f64>,
}

impl Rng {
    fn new(seed: u64) -> Self {
        let state = if seed == 0 {
            0xA5A5_A5A5_A5A5_A5A5
        } else {
            seed
        };
        Self {
            state,
            cached_normal: None,
        }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545F4914F6CDD1D)
    }

    fn next_f64(&mut self) -> f64 {
        const DENOM: f64 = (1_u64 << 53) as f64;
        let v = self.next_u64() >> 11;
        ((v as f64) + 0.5) / DENOM
    }

    fn standard_normal(&mut self) -> f64 {
        if let Some(z) = self.cached_normal.take() {
            return z;
        }

        let u1 = self.next_f64().max(1e-12);
        let u2 = self.next_f64();
        let r = (-2.0 * u1.ln()).sqrt();
        let theta = 2.0 * PI * u2;

        let z0 = r * theta.cos();
        let z1 = r * theta.sin();
        self.cached_normal = Some(z1);
        z0
    }
}

/// Linear interpolation between the bracketing order statistics.
pub fn percentile(values: &mut [f64], p: f64) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    percentile_sorted(values, p)
}

fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    match n {
        0 => return 0.0,
        1 => return sorted[0],
        _ => {}
    }

    let rank = (p.clamp(0.0, 100.0) / 100.0) * (n as f64 - 1.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;

    if lower == upper {
        sorted[lower]
    } else {
        let w = rank - lower as f64;
        sorted[lower] * (1.0 - w) + sorted[upper] * w
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::{prop_assert, prop_assert_eq, proptest};

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn sample_inputs() -> MonteCarloInputs {
        MonteCarloInputs {
            starting_corpus: 10_000_000.0,
            annual_withdrawal: 400_000.0,
            years: 30,
            equity_allocation: 0.6,
            runs: 500,
            seed: 42,
            market: MarketAssumptions::default(),
            execution: ExecutionMode::Sequential,
        }
    }

    fn flat_market(equity: f64, debt: f64) -> MarketAssumptions {
        MarketAssumptions {
            equity_return_mean: equity,
            equity_return_vol: 0.0,
            debt_return_mean: debt,
            debt_return_vol: 0.0,
        }
    }

    #[test]
    fn percentile_matches_order_statistics_on_odd_input() {
        let mut values = vec![50.0, 10.0, 40.0, 20.0, 30.0];
        assert_approx(percentile(&mut values, 50.0), 30.0);
        assert_approx(percentile(&mut values, 25.0), 20.0);
        assert_approx(percentile(&mut values, 0.0), 10.0);
        assert_approx(percentile(&mut values, 100.0), 50.0);
    }

    #[test]
    fn percentile_interpolates_between_points() {
        let mut values = vec![1.0, 2.0, 3.0, 4.0];
        assert_approx(percentile(&mut values, 25.0), 1.75);
        assert_approx(percentile(&mut [], 50.0), 0.0);
    }

    #[test]
    fn derive_seed_changes_per_run() {
        let a = derive_seed(42, 0);
        let b = derive_seed(42, 1);
        let c = derive_seed(43, 0);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn sample_return_blends_means_at_zero_volatility() {
        let mut rng = Rng::new(123);
        let r = sample_portfolio_return(&flat_market(0.10, 0.05), 0.6, &mut rng);
        assert_approx(r, 0.6 * 0.10 + 0.4 * 0.05);
    }

    #[test]
    fn sample_return_clamps_extreme_values() {
        let mut rng = Rng::new(1);
        let r = sample_portfolio_return(&flat_market(-2.0, 3.0), 1.0, &mut rng);
        assert_approx(r, RETURN_FLOOR);
        let r = sample_portfolio_return(&flat_market(-2.0, 3.0), 0.0, &mut rng);
        assert_approx(r, RETURN_CEILING);
    }

    #[test]
    fn deterministic_market_matches_closed_form() {
        let mut inputs = sample_inputs();
        inputs.starting_corpus = 1_000.0;
        inputs.annual_withdrawal = 100.0;
        inputs.years = 3;
        inputs.runs = 4;
        inputs.market = flat_market(0.10, 0.10);

        let result = run(&inputs).expect("valid");
        let expected = [1_000.0, 1_000.0, 1_000.0, 1_000.0];
        for path in &result.paths {
            assert_eq!(path.len(), 4);
            for (actual, expected) in path.iter().zip(expected) {
                assert_approx(*actual, expected);
            }
        }
        assert_approx(result.success_rate, 1.0);
        assert_eq!(result.mean_depletion_year, None);
    }

    #[test]
    fn depleted_runs_freeze_at_zero() {
        let mut inputs = sample_inputs();
        inputs.starting_corpus = 250.0;
        inputs.annual_withdrawal = 100.0;
        inputs.years = 5;
        inputs.runs = 3;
        inputs.market = flat_market(0.0, 0.0);

        let result = run(&inputs).expect("valid");
        for path in &result.paths {
            assert_eq!(path, &vec![250.0, 150.0, 50.0, 0.0, 0.0, 0.0]);
        }
        assert_eq!(result.successful_runs, 0);
        assert_approx(result.success_rate, 0.0);
        assert_eq!(result.mean_depletion_year, Some(3.0));
        assert_approx(result.median_terminal_corpus, 0.0);
    }

    #[test]
    fn percentile_bands_cover_every_year() {
        let result = run(&sample_inputs()).expect("valid");
        assert_eq!(result.percentiles.len(), 31);
        assert_eq!(result.scenarios.median.len(), 31);
        for band in &result.percentiles {
            assert!(band.p5 <= band.p10 && band.p10 <= band.p25 && band.p25 <= band.p50);
            assert!(band.p50 <= band.p75 && band.p75 <= band.p90 && band.p90 <= band.p95);
        }
        assert_approx(result.percentiles[0].p50, 10_000_000.0);
        let at_30 = result.percentile_at(30, 50.0).expect("in horizon");
        assert_approx(at_30, result.median_terminal_corpus);
        assert!(result.percentile_at(31, 50.0).is_none());
    }

    #[test]
    fn same_seed_is_bit_identical() {
        let a = run(&sample_inputs()).expect("valid");
        let b = run(&sample_inputs()).expect("valid");
        assert_eq!(a, b);

        let mut other = sample_inputs();
        other.seed = 7;
        let c = run(&other).expect("valid");
        assert_ne!(a.paths, c.paths);
    }

    #[test]
    fn parallel_matches_sequential() {
        let sequential = run(&sample_inputs()).expect("valid");
        let mut inputs = sample_inputs();
        inputs.execution = ExecutionMode::Parallel;
        let parallel = run(&inputs).expect("valid");
        assert_eq!(sequential, parallel);
    }

    #[test]
    fn higher_withdrawal_lowers_success() {
        let modest = run(&sample_inputs()).expect("valid");
        let mut inputs = sample_inputs();
        inputs.annual_withdrawal = 1_000_000.0;
        let aggressive = run(&inputs).expect("valid");
        assert!(aggressive.success_rate <= modest.success_rate);
    }

    #[test]
    fn from_fixed_swr_uses_share_of_corpus() {
        let market = MarketAssumptions::default();
        let inputs = MonteCarloInputs::from_fixed_swr(5_000_000.0, 0.04, 30, 0.7, 100, 1, market)
            .expect("valid");
        assert_approx(inputs.annual_withdrawal, 200_000.0);
        assert!(MonteCarloInputs::from_fixed_swr(5_000_000.0, 0.0, 30, 0.7, 100, 1, market).is_err());
    }

    #[test]
    fn rejects_invalid_inputs() {
        let mut inputs = sample_inputs();
        inputs.runs = 0;
        assert!(run(&inputs).is_err());

        let mut inputs = sample_inputs();
        inputs.equity_allocation = 1.5;
        assert!(run(&inputs).is_err());

        let mut inputs = sample_inputs();
        inputs.years = 0;
        assert!(run(&inputs).is_err());
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(32))]

        #[test]
        fn prop_paths_are_uniform_and_non_negative(
            corpus in 0u32..2_000_000,
            withdrawal in 0u32..300_000,
            years in 1u32..40,
            seed in 0u64..1_000
        ) {
            let inputs = MonteCarloInputs {
                starting_corpus: corpus as f64,
                annual_withdrawal: withdrawal as f64,
                years,
                equity_allocation: 0.8,
                runs: 20,
                seed,
                market: MarketAssumptions::default(),
                execution: ExecutionMode::Sequential,
            };
            let result = run(&inputs).expect("valid");
            prop_assert_eq!(result.paths.len(), 20);
            for path in &result.paths {
                prop_assert_eq!(path.len(), years as usize + 1);
                prop_assert!(path.iter().all(|v| *v >= 0.0));
                if let Some(first_zero) = path.iter().skip(1).position(|v| *v == 0.0) {
                    prop_assert!(path[first_zero + 1..].iter().all(|v| *v == 0.0));
                }
            }
            prop_assert!((0.0..=1.0).contains(&result.success_rate));
        }
    }
}
