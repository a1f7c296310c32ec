use serde::{Deserialize, Serialize};

use super::engine::{ExecutionMode, MarketAssumptions, MonteCarloInputs, SimulationResult};
use super::error::{EngineError, Result};
use super::fire::{FireAssumptions, fire_summary};
use super::primitives::{Money, ensure_non_negative, future_value, safe_div};
use super::tax::RegimeComparison;
use super::types::FinancialSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScoreWeights {
    pub fire_progress: f64,
    pub savings_rate: f64,
    pub debt_burden: f64,
    pub emergency_fund: f64,
    pub retirement_readiness: f64,
    pub tax_efficiency: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            fire_progress: 0.25,
            savings_rate: 0.20,
            debt_burden: 0.15,
            emergency_fund: 0.15,
            retirement_readiness: 0.15,
            tax_efficiency: 0.10,
        }
    }
}

impl ScoreWeights {
    fn weight(&self, domain: ScoreDomain) -> f64 {
        match domain {
            ScoreDomain::FireProgress => self.fire_progress,
            ScoreDomain::SavingsRate => self.savings_rate,
            ScoreDomain::DebtBurden => self.debt_burden,
            ScoreDomain::EmergencyFund => self.emergency_fund,
            ScoreDomain::RetirementReadiness => self.retirement_readiness,
            ScoreDomain::TaxEfficiency => self.tax_efficiency,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FreedomScoreConfig {
    pub weights: ScoreWeights,
    /// Savings rate that earns the full domain score.
    pub target_savings_rate: f64,
    pub emergency_fund_months: f64,
    /// Debt payments over income at which the debt domain reaches zero.
    pub max_debt_to_income: f64,
}

impl Default for FreedomScoreConfig {
    fn default() -> Self {
        Self {
            weights: ScoreWeights::default(),
            target_savings_rate: 0.5,
            emergency_fund_months: 6.0,
            max_debt_to_income: 0.5,
        }
    }
}

impl FreedomScoreConfig {
    pub fn validate(&self) -> Result<()> {
        let w = &self.weights;
        for (field, value) in [
            ("weights.fire_progress", w.fire_progress),
            ("weights.savings_rate", w.savings_rate),
            ("weights.debt_burden", w.debt_burden),
            ("weights.emergency_fund", w.emergency_fund),
            ("weights.retirement_readiness", w.retirement_readiness),
            ("weights.tax_efficiency", w.tax_efficiency),
        ] {
            ensure_non_negative(field, value)?;
        }
        ensure_non_negative("target_savings_rate", self.target_savings_rate)?;
        ensure_non_negative("emergency_fund_months", self.emergency_fund_months)?;
        ensure_non_negative("max_debt_to_income", self.max_debt_to_income)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScoreDomain {
    FireProgress,
    SavingsRate,
    DebtBurden,
    EmergencyFund,
    RetirementReadiness,
    TaxEfficiency,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
    F,
}

impl Grade {
    pub fn from_score(score: f64) -> Self {
        match score {
            s if s >= 80.0 => Grade::A,
            s if s >= 65.0 => Grade::B,
            s if s >= 50.0 => Grade::C,
            s if s >= 35.0 => Grade::D,
            _ => Grade::F,
        }
    }
}

/// Tax actually payable against the cheapest available option.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxPosition {
    pub current_tax: Money,
    pub optimal_tax: Money,
}

impl TaxPosition {
    pub fn from_comparison(comparison: &RegimeComparison, current_regime: &str) -> Result<Self> {
        let current = comparison
            .outcomes
            .iter()
            .find(|o| o.regime == current_regime)
            .ok_or_else(|| {
                EngineError::invalid("current_regime", format!("unknown regime '{current_regime}'"))
            })?;
        let optimal = comparison
            .recommended_outcome()
            .map(|o| o.breakdown.total)
            .unwrap_or(current.breakdown.total);
        Ok(Self {
            current_tax: current.breakdown.total,
            optimal_tax: optimal,
        })
    }
}

/// Raw measurements behind each domain. Optional ones drop their domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreInputs {
    pub fire_progress: f64,
    pub savings_rate: f64,
    pub monthly_income: Money,
    pub monthly_debt_payments: Money,
    pub emergency_fund: Money,
    pub essential_monthly_expenses: Money,
    #[serde(default)]
    pub success_rate: Option<f64>,
    #[serde(default)]
    pub tax: Option<TaxPosition>,
}

impl ScoreInputs {
    pub fn from_snapshot(
        snapshot: &FinancialSnapshot,
        assumptions: &FireAssumptions,
        simulation: Option<&SimulationResult>,
        tax: Option<TaxPosition>,
    ) -> Result<Self> {
        let fire = fire_summary(snapshot, assumptions)?;
        Ok(Self {
            fire_progress: fire.progress,
            savings_rate: fire.savings_rate,
            monthly_income: snapshot.monthly_income,
            monthly_debt_payments: snapshot.total_minimum_payments(),
            emergency_fund: snapshot.emergency_fund,
            essential_monthly_expenses: snapshot.essential_monthly_expenses(),
            success_rate: simulation.map(|s| s.success_rate),
            tax,
        })
    }
}

/// Simulation behind the retirement-readiness domain. The corpus grows to the
/// target retirement age with the current surplus, then funds today's annual
/// expenses for `horizon_years`.
pub fn retirement_readiness_inputs(
    snapshot: &FinancialSnapshot,
    assumptions: &FireAssumptions,
    market: MarketAssumptions,
    horizon_years: u32,
    runs: u32,
    seed: u64,
) -> Result<MonteCarloInputs> {
    snapshot.validate()?;
    let corpus_at_retirement = future_value(
        snapshot.current_corpus,
        snapshot.monthly_surplus().max(0.0),
        assumptions.expected_annual_return,
        snapshot.years_to_retirement() * 12,
    );
    let inputs = MonteCarloInputs {
        starting_corpus: corpus_at_retirement,
        annual_withdrawal: snapshot.annual_expenses(),
        years: horizon_years,
        equity_allocation: snapshot.equity_allocation,
        runs,
        seed,
        market,
        execution: ExecutionMode::Parallel,
    };
    inputs.validate()?;
    Ok(inputs)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainScore {
    pub domain: ScoreDomain,
    pub score: f64,
    /// Weight after renormalising over the domains present.
    pub weight: f64,
    pub contribution: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FreedomScore {
    pub total: f64,
    pub grade: Grade,
    pub domains: Vec<DomainScore>,
}

fn to_score(ratio: f64) -> f64 {
    if ratio.is_finite() {
        (ratio * 100.0).clamp(0.0, 100.0)
    } else {
        0.0
    }
}

fn domain_scores(inputs: &ScoreInputs, config: &FreedomScoreConfig) -> Vec<(ScoreDomain, f64)> {
    let mut scores = vec![
        (ScoreDomain::FireProgress, to_score(inputs.fire_progress)),
        (
            ScoreDomain::SavingsRate,
            to_score(safe_div(inputs.savings_rate, config.target_savings_rate).unwrap_or(1.0)),
        ),
    ];

    let debt = if inputs.monthly_debt_payments <= 0.0 {
        100.0
    } else {
        match safe_div(inputs.monthly_debt_payments, inputs.monthly_income) {
            Some(dti) => to_score(1.0 - safe_div(dti, config.max_debt_to_income).unwrap_or(1.0)),
            None => 0.0,
        }
    };
    scores.push((ScoreDomain::DebtBurden, debt));

    let emergency = safe_div(inputs.emergency_fund, inputs.essential_monthly_expenses)
        .map(|months| to_score(safe_div(months, config.emergency_fund_months).unwrap_or(1.0)))
        .unwrap_or(100.0);
    scores.push((ScoreDomain::EmergencyFund, emergency));

    if let Some(rate) = inputs.success_rate {
        scores.push((ScoreDomain::RetirementReadiness, to_score(rate)));
    }
    if let Some(tax) = inputs.tax {
        let efficiency = safe_div(tax.optimal_tax, tax.current_tax).unwrap_or(1.0);
        scores.push((ScoreDomain::TaxEfficiency, to_score(efficiency)));
    }
    scores
}

pub fn freedom_score(inputs: &ScoreInputs, config: &FreedomScoreConfig) -> Result<FreedomScore> {
    config.validate()?;
    ensure_non_negative("monthly_income", inputs.monthly_income)?;
    ensure_non_negative("monthly_debt_payments", inputs.monthly_debt_payments)?;
    ensure_non_negative("emergency_fund", inputs.emergency_fund)?;
    ensure_non_negative("essential_monthly_expenses", inputs.essential_monthly_expenses)?;

    let scores = domain_scores(inputs, config);
    let weight_sum: f64 = scores
        .iter()
        .map(|(domain, _)| config.weights.weight(*domain))
        .sum();
    if weight_sum <= 0.0 {
        return Err(EngineError::invalid(
            "weights",
            "domains present carry no weight",
        ));
    }

    let domains: Vec<DomainScore> = scores
        .into_iter()
        .map(|(domain, score)| {
            let weight = config.weights.weight(domain) / weight_sum;
            DomainScore {
                domain,
                score,
                weight,
                contribution: score * weight,
            }
        })
        .collect();

    let total = domains
        .iter()
        .map(|d| d.contribution)
        .sum::<f64>()
        .clamp(0.0, 100.0);

    Ok(FreedomScore {
        total,
        grade: Grade::from_score(total),
        domains,
    })
}
