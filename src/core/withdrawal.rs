use log::debug;
use serde::{Deserialize, Serialize};

use super::error::{EngineError, Result};
use super::primitives::{Money, ensure_finite, ensure_non_negative, safe_div};

/// Exactly one strategy is active; switching is just a different value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "strategy",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum WithdrawalStrategyParams {
    FixedSwr {
        rate: f64,
    },
    Bucket {
        cash_years: f64,
        bond_years: f64,
        equity_percent: f64,
    },
    VariablePercentage {
        start_age: u32,
        end_age: u32,
    },
    Guardrails {
        initial_rate: f64,
        upper_guardrail: f64,
        lower_guardrail: f64,
        max_increase: f64,
        max_decrease: f64,
    },
}

impl WithdrawalStrategyParams {
    pub fn validate(&self) -> Result<()> {
        match *self {
            WithdrawalStrategyParams::FixedSwr { rate } => ensure_rate("rate", rate),
            WithdrawalStrategyParams::Bucket {
                cash_years,
                bond_years,
                equity_percent,
            } => {
                ensure_non_negative("cash_years", cash_years)?;
                ensure_non_negative("bond_years", bond_years)?;
                ensure_finite("equity_percent", equity_percent)?;
                if !(0.0..100.0).contains(&equity_percent) {
                    return Err(EngineError::invalid(
                        "equity_percent",
                        format!("must be in [0, 100), got {equity_percent}"),
                    ));
                }
                Ok(())
            }
            WithdrawalStrategyParams::VariablePercentage { start_age, end_age } => {
                if end_age < start_age {
                    return Err(EngineError::invalid("end_age", "must be >= start_age"));
                }
                Ok(())
            }
            WithdrawalStrategyParams::Guardrails {
                initial_rate,
                upper_guardrail,
                lower_guardrail,
                max_increase,
                max_decrease,
            } => {
                ensure_rate("initial_rate", initial_rate)?;
                ensure_finite("upper_guardrail", upper_guardrail)?;
                ensure_finite("lower_guardrail", lower_guardrail)?;
                if lower_guardrail <= 0.0 || upper_guardrail <= lower_guardrail {
                    return Err(EngineError::invalid(
                        "guardrails",
                        "need 0 < lower_guardrail < upper_guardrail",
                    ));
                }
                ensure_finite("max_increase", max_increase)?;
                if max_increase < 1.0 {
                    return Err(EngineError::invalid("max_increase", "must be >= 1"));
                }
                ensure_finite("max_decrease", max_decrease)?;
                if max_decrease <= 0.0 || max_decrease > 1.0 {
                    return Err(EngineError::invalid("max_decrease", "must be in (0, 1]"));
                }
                Ok(())
            }
        }
    }
}

fn ensure_rate(field: &'static str, rate: f64) -> Result<()> {
    ensure_finite(field, rate)?;
    if rate <= 0.0 || rate > 1.0 {
        return Err(EngineError::invalid(field, format!("must be in (0, 1], got {rate}")));
    }
    Ok(())
}

/// Everything a single withdrawal decision depends on. Guardrails need the
/// previous period's withdrawal; the caller threads it from year to year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalContext {
    pub corpus: Money,
    #[serde(alias = "annual_expenses")]
    pub annual_expenses: Money,
    #[serde(alias = "current_age")]
    pub current_age: u32,
    #[serde(default, alias = "previous_withdrawal")]
    pub previous_withdrawal: Option<Money>,
    #[serde(default)]
    pub inflation: f64,
}

impl WithdrawalContext {
    fn validate(&self) -> Result<()> {
        ensure_non_negative("corpus", self.corpus)?;
        ensure_non_negative("annual_expenses", self.annual_expenses)?;
        if let Some(previous) = self.previous_withdrawal {
            ensure_non_negative("previous_withdrawal", previous)?;
        }
        ensure_finite("inflation", self.inflation)?;
        if self.inflation <= -1.0 {
            return Err(EngineError::invalid("inflation", "must be > -1"));
        }
        Ok(())
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GuardrailAdjustment {
    None,
    Increase,
    Decrease,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketAllocation {
    pub cash: Money,
    pub bonds: Money,
    pub equity: Money,
    pub total: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalDecision {
    pub withdrawal: Money,
    /// Withdrawal as a fraction of the corpus; 0 for an empty corpus.
    pub rate: f64,
    pub adjustment: GuardrailAdjustment,
    pub buckets: Option<BucketAllocation>,
}

/// Withdrawal for one period. Pure: nothing is remembered between calls.
pub fn calculate_withdrawal(
    params: &WithdrawalStrategyParams,
    ctx: &WithdrawalContext,
) -> Result<WithdrawalDecision> {
    params.validate()?;
    ctx.validate()?;

    let mut adjustment = GuardrailAdjustment::None;
    let mut buckets = None;

    let withdrawal = match *params {
        WithdrawalStrategyParams::FixedSwr { rate } => ctx.corpus * rate,
        WithdrawalStrategyParams::Bucket {
            cash_years,
            bond_years,
            equity_percent,
        } => {
            buckets = Some(bucket_allocation(
                ctx.annual_expenses,
                cash_years,
                bond_years,
                equity_percent,
            )?);
            ctx.annual_expenses
        }
        WithdrawalStrategyParams::VariablePercentage { start_age, end_age } => {
            ctx.corpus * variable_percentage_rate(ctx.current_age, start_age, end_age)
        }
        WithdrawalStrategyParams::Guardrails {
            initial_rate,
            upper_guardrail,
            lower_guardrail,
            max_increase,
            max_decrease,
        } => match ctx.previous_withdrawal {
            None => ctx.corpus * initial_rate,
            Some(previous) => {
                let desired = previous * (1.0 + ctx.inflation);
                match safe_div(desired, ctx.corpus) {
                    None => {
                        adjustment = GuardrailAdjustment::Decrease;
                        0.0
                    }
                    Some(current_rate) if current_rate > initial_rate * upper_guardrail => {
                        adjustment = GuardrailAdjustment::Decrease;
                        (previous * max_decrease).max(ctx.corpus * initial_rate)
                    }
                    Some(current_rate) if current_rate < initial_rate * lower_guardrail => {
                        adjustment = GuardrailAdjustment::Increase;
                        (desired * max_increase).min(ctx.corpus * initial_rate)
                    }
                    Some(_) => desired,
                }
            }
        },
    };

    if adjustment != GuardrailAdjustment::None {
        debug!("guardrail {adjustment:?}: withdrawal set to {withdrawal:.2}");
    }

    Ok(WithdrawalDecision {
        withdrawal,
        rate: safe_div(withdrawal, ctx.corpus).unwrap_or(0.0),
        adjustment,
        buckets,
    })
}

/// `clamp(100 / max(1, end_age - age), 3, 10)` percent, as a fraction.
/// Nothing is withdrawn before `start_age`.
fn variable_percentage_rate(current_age: u32, start_age: u32, end_age: u32) -> f64 {
    if current_age < start_age {
        return 0.0;
    }
    let years_left = end_age.saturating_sub(current_age).max(1) as f64;
    (100.0 / years_left).clamp(3.0, 10.0) / 100.0
}

/// Sizes the three buckets so equity is `equity_percent` of the total.
pub fn bucket_allocation(
    annual_expenses: Money,
    cash_years: f64,
    bond_years: f64,
    equity_percent: f64,
) -> Result<BucketAllocation> {
    let cash = annual_expenses * cash_years;
    let bonds = annual_expenses * bond_years;
    let total = safe_div(cash + bonds, 1.0 - equity_percent / 100.0)
        .ok_or_else(|| EngineError::invalid("equity_percent", "must be below 100"))?;
    Ok(BucketAllocation {
        cash,
        bonds,
        equity: total - cash - bonds,
        total,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketBalances {
    pub cash: Money,
    pub bonds: Money,
    pub equity: Money,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketDraw {
    pub from_cash: Money,
    pub from_bonds: Money,
    pub from_equity: Money,
    /// Part of the request no bucket could cover.
    pub shortfall: Money,
    pub balances: BucketBalances,
}

/// Draws cash first, then bonds, then equity.
pub fn draw_from_buckets(balances: BucketBalances, amount: Money) -> BucketDraw {
    let mut remaining = amount.max(0.0);
    let mut take = |available: &mut Money| {
        let taken = remaining.min(available.max(0.0));
        *available -= taken;
        remaining -= taken;
        taken
    };

    let mut next = balances;
    let from_cash = take(&mut next.cash);
    let from_bonds = take(&mut next.bonds);
    let from_equity = take(&mut next.equity);

    BucketDraw {
        from_cash,
        from_bonds,
        from_equity,
        shortfall: remaining,
        balances: next,
    }
}

/// Tops buckets back up toward `targets`.
///
/// After a year with a non-negative equity return, cash and then bonds are
/// refilled from equity. After a down year equity is left alone and cash is
/// refilled from bonds only.
pub fn refill_buckets(
    balances: BucketBalances,
    targets: &BucketAllocation,
    equity_return: f64,
) -> BucketBalances {
    let mut next = balances;
    let mut transfer = |from: &mut Money, to: &mut Money, target: Money| {
        let moved = (target - *to).max(0.0).min(from.max(0.0));
        *from -= moved;
        *to += moved;
    };

    if equity_return >= 0.0 {
        transfer(&mut next.equity, &mut next.cash, targets.cash);
        transfer(&mut next.equity, &mut next.bonds, targets.bonds);
    } else {
        transfer(&mut next.bonds, &mut next.cash, targets.cash);
    }
    next
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectionInputs {
    #[serde(alias = "starting_corpus")]
    pub starting_corpus: Money,
    #[serde(alias = "annual_expenses")]
    pub annual_expenses: Money,
    #[serde(alias = "current_age")]
    pub current_age: u32,
    /// Growth of the whole corpus, or of the equity bucket under `Bucket`.
    #[serde(alias = "annual_return")]
    pub annual_return: f64,
    #[serde(default, alias = "cash_return")]
    pub cash_return: f64,
    #[serde(default, alias = "bond_return")]
    pub bond_return: f64,
    pub inflation: f64,
    pub years: u32,
}

impl ProjectionInputs {
    fn validate(&self) -> Result<()> {
        ensure_non_negative("starting_corpus", self.starting_corpus)?;
        for (field, rate) in [
            ("annual_return", self.annual_return),
            ("cash_return", self.cash_return),
            ("bond_return", self.bond_return),
        ] {
            ensure_finite(field, rate)?;
            if rate <= -1.0 {
                return Err(EngineError::invalid(field, "must be > -1"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalYear {
    pub year: u32,
    pub age: u32,
    pub corpus_start: Money,
    pub withdrawal: Money,
    /// Requested withdrawal the corpus could not cover.
    pub shortfall: Money,
    pub adjustment: GuardrailAdjustment,
    pub corpus_end: Money,
    /// End-of-year balances after refill, `Bucket` only.
    pub buckets: Option<BucketBalances>,
}

/// Fills cash and then bonds up to their targets; equity takes the rest.
fn seed_buckets(corpus: Money, targets: &BucketAllocation) -> BucketBalances {
    let cash = corpus.min(targets.cash).max(0.0);
    let bonds = (corpus - cash).min(targets.bonds).max(0.0);
    BucketBalances {
        cash,
        bonds,
        equity: (corpus - cash - bonds).max(0.0),
    }
}

fn bucket_total(balances: &BucketBalances) -> Money {
    balances.cash + balances.bonds + balances.equity
}

/// Deterministic path at constant returns, feeding each year's withdrawal
/// into the next decision. Expenses grow with inflation.
///
/// Under `Bucket` the three balances are tracked separately: the year's
/// expenses are drawn, each bucket grows at its own return, and the buckets
/// are refilled toward that year's targets.
pub fn project_withdrawals(
    params: &WithdrawalStrategyParams,
    inputs: &ProjectionInputs,
) -> Result<Vec<WithdrawalYear>> {
    inputs.validate()?;

    let mut rows = Vec::with_capacity(inputs.years as usize);
    let mut corpus = inputs.starting_corpus;
    let mut expenses = inputs.annual_expenses;
    let mut previous_withdrawal = None;
    let mut balances: Option<BucketBalances> = None;

    for year in 0..inputs.years {
        let age = inputs.current_age + year;
        let decision = calculate_withdrawal(
            params,
            &WithdrawalContext {
                corpus,
                annual_expenses: expenses,
                current_age: age,
                previous_withdrawal,
                inflation: inputs.inflation,
            },
        )?;

        let (withdrawal, shortfall, corpus_end, buckets) = match decision.buckets {
            Some(targets) => {
                let start = balances.unwrap_or_else(|| seed_buckets(corpus, &targets));
                let draw = draw_from_buckets(start, decision.withdrawal);
                let grown = BucketBalances {
                    cash: draw.balances.cash * (1.0 + inputs.cash_return),
                    bonds: draw.balances.bonds * (1.0 + inputs.bond_return),
                    equity: draw.balances.equity * (1.0 + inputs.annual_return),
                };
                let refilled = refill_buckets(grown, &targets, inputs.annual_return);
                if draw.shortfall > 0.0 {
                    debug!("year {year}: buckets short by {:.2}", draw.shortfall);
                }
                (
                    decision.withdrawal - draw.shortfall,
                    draw.shortfall,
                    bucket_total(&refilled),
                    Some(refilled),
                )
            }
            None => {
                let withdrawal = decision.withdrawal.min(corpus);
                let corpus_end = ((corpus - withdrawal) * (1.0 + inputs.annual_return)).max(0.0);
                (withdrawal, decision.withdrawal - withdrawal, corpus_end, None)
            }
        };

        rows.push(WithdrawalYear {
            year,
            age,
            corpus_start: corpus,
            withdrawal,
            shortfall,
            adjustment: decision.adjustment,
            corpus_end,
            buckets,
        });

        corpus = corpus_end;
        balances = buckets;
        expenses *= 1.0 + inputs.inflation;
        previous_withdrawal = Some(withdrawal);
    }

    Ok(rows)
}
