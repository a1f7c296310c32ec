use log::debug;
use serde::{Deserialize, Serialize};

use super::error::{EngineError, Result};
use super::primitives::{Money, ensure_finite, ensure_non_negative, monthly_rate, safe_div};
use super::types::FinancialSnapshot;

/// Projection stops after 100 years.
pub const MAX_PROJECTION_MONTHS: u32 = 1_200;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FireMultipliers {
    pub lean: f64,
    pub regular: f64,
    pub fat: f64,
}

impl Default for FireMultipliers {
    fn default() -> Self {
        Self {
            lean: 0.6,
            regular: 1.0,
            fat: 1.5,
        }
    }
}

impl FireMultipliers {
    pub fn validate(&self) -> Result<()> {
        ensure_non_negative("multipliers.lean", self.lean)?;
        ensure_non_negative("multipliers.regular", self.regular)?;
        ensure_non_negative("multipliers.fat", self.fat)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FireNumbers {
    /// `annual_expenses / swr` before any multiplier.
    pub base: Money,
    pub lean: Money,
    pub regular: Money,
    pub fat: Money,
}

fn ensure_swr(swr: f64) -> Result<()> {
    ensure_finite("safe_withdrawal_rate", swr)?;
    if swr <= 0.0 || swr > 1.0 {
        return Err(EngineError::invalid(
            "safe_withdrawal_rate",
            format!("must be in (0, 1], got {swr}"),
        ));
    }
    Ok(())
}

fn ensure_return(field: &'static str, annual_return: f64) -> Result<()> {
    ensure_finite(field, annual_return)?;
    if annual_return <= -1.0 {
        return Err(EngineError::invalid(field, "must be > -1"));
    }
    Ok(())
}

pub fn fire_number(annual_expenses: Money, swr: f64) -> Result<Money> {
    ensure_non_negative("annual_expenses", annual_expenses)?;
    ensure_swr(swr)?;
    Ok(annual_expenses / swr)
}

pub fn fire_numbers(
    annual_expenses: Money,
    swr: f64,
    multipliers: &FireMultipliers,
) -> Result<FireNumbers> {
    multipliers.validate()?;
    let base = fire_number(annual_expenses, swr)?;
    Ok(FireNumbers {
        base,
        lean: base * multipliers.lean,
        regular: base * multipliers.regular,
        fat: base * multipliers.fat,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum YearsToTarget {
    Reached { months: u32, years: f64 },
    /// Not reachable within [`MAX_PROJECTION_MONTHS`], or no contribution.
    Unreachable,
}

impl YearsToTarget {
    pub fn years(&self) -> Option<f64> {
        match self {
            YearsToTarget::Reached { years, .. } => Some(*years),
            YearsToTarget::Unreachable => None,
        }
    }

    pub fn is_reachable(&self) -> bool {
        matches!(self, YearsToTarget::Reached { .. })
    }
}

/// Month-by-month compounding with the contribution added at month end.
pub fn years_to_target(
    current: Money,
    target: Money,
    monthly_contribution: Money,
    annual_return: f64,
) -> Result<YearsToTarget> {
    ensure_non_negative("current", current)?;
    ensure_non_negative("target", target)?;
    ensure_finite("monthly_contribution", monthly_contribution)?;
    ensure_return("annual_return", annual_return)?;

    if current >= target {
        return Ok(YearsToTarget::Reached {
            months: 0,
            years: 0.0,
        });
    }
    if monthly_contribution <= 0.0 {
        return Ok(YearsToTarget::Unreachable);
    }

    let r = monthly_rate(annual_return);
    let mut corpus = current;
    for month in 1..=MAX_PROJECTION_MONTHS {
        corpus = corpus * (1.0 + r) + monthly_contribution;
        if corpus >= target {
            return Ok(YearsToTarget::Reached {
                months: month,
                years: month as f64 / 12.0,
            });
        }
    }

    debug!("target {target:.0} not reached within {MAX_PROJECTION_MONTHS} months");
    Ok(YearsToTarget::Unreachable)
}

/// Corpus needed today so that growth alone reaches `target` by retirement.
pub fn coast_fire(target: Money, years_to_retirement: f64, annual_return: f64) -> Result<Money> {
    ensure_non_negative("target", target)?;
    ensure_non_negative("years_to_retirement", years_to_retirement)?;
    ensure_return("annual_return", annual_return)?;
    Ok(target / (1.0 + annual_return).powf(years_to_retirement))
}

/// Corpus needed when part-time income covers part of expenses.
pub fn barista_fire(
    annual_expenses: Money,
    part_time_monthly_income: Money,
    swr: f64,
) -> Result<Money> {
    ensure_non_negative("annual_expenses", annual_expenses)?;
    ensure_non_negative("part_time_monthly_income", part_time_monthly_income)?;
    ensure_swr(swr)?;
    Ok((annual_expenses - part_time_monthly_income * 12.0).max(0.0) / swr)
}

/// Share of income left after outgoings; 0 when there is no income.
pub fn savings_rate(monthly_income: Money, monthly_outgoings: Money) -> f64 {
    safe_div(monthly_income - monthly_outgoings, monthly_income).unwrap_or(0.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FireAssumptions {
    pub safe_withdrawal_rate: f64,
    pub expected_annual_return: f64,
    pub part_time_monthly_income: Money,
    pub multipliers: FireMultipliers,
}

impl Default for FireAssumptions {
    fn default() -> Self {
        Self {
            safe_withdrawal_rate: 0.04,
            expected_annual_return: 0.10,
            part_time_monthly_income: 0.0,
            multipliers: FireMultipliers::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FireSummary {
    pub annual_expenses: Money,
    pub fire_numbers: FireNumbers,
    pub monthly_contribution: Money,
    pub years_to_fire: YearsToTarget,
    pub fire_age: Option<f64>,
    pub coast_number: Money,
    pub coast_reached: bool,
    pub barista_number: Money,
    pub savings_rate: f64,
    /// Corpus over the regular FIRE number. Not capped at 1.
    pub progress: f64,
    pub total_debt: Money,
    /// `None` when some debt's minimum payment never clears it.
    pub debt_free_months: Option<u32>,
}

/// Every FIRE metric for one snapshot. The monthly surplus (never below zero)
/// is the contribution.
pub fn fire_summary(
    snapshot: &FinancialSnapshot,
    assumptions: &FireAssumptions,
) -> Result<FireSummary> {
    snapshot.validate()?;

    let annual_expenses = snapshot.annual_expenses();
    let numbers = fire_numbers(
        annual_expenses,
        assumptions.safe_withdrawal_rate,
        &assumptions.multipliers,
    )?;
    let surplus = snapshot.monthly_surplus();
    let contribution = surplus.max(0.0);

    let years_to_fire = years_to_target(
        snapshot.current_corpus,
        numbers.regular,
        contribution,
        assumptions.expected_annual_return,
    )?;
    let coast_number = coast_fire(
        numbers.regular,
        snapshot.years_to_retirement() as f64,
        assumptions.expected_annual_return,
    )?;
    let barista_number = barista_fire(
        annual_expenses,
        assumptions.part_time_monthly_income,
        assumptions.safe_withdrawal_rate,
    )?;

    Ok(FireSummary {
        annual_expenses,
        fire_numbers: numbers,
        monthly_contribution: contribution,
        fire_age: years_to_fire
            .years()
            .map(|years| snapshot.current_age as f64 + years),
        years_to_fire,
        coast_number,
        coast_reached: snapshot.current_corpus >= coast_number,
        barista_number,
        savings_rate: savings_rate(snapshot.monthly_income, snapshot.monthly_income - surplus),
        progress: safe_div(snapshot.current_corpus, numbers.regular).unwrap_or(1.0),
        total_debt: snapshot.total_debt_balance(),
        debt_free_months: snapshot.debt_free_months(),
    })
}
