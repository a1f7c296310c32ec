use std::collections::BTreeMap;

use log::debug;
use serde::{Deserialize, Serialize};

use super::error::{EngineError, Result};
use super::primitives::{Money, ensure_finite, ensure_non_negative, round_rupee, safe_div};
use super::types::{ClaimedDeduction, DeductionKind};

/// One slab of a progressive schedule. `upper = None` means unbounded.
///
/// Upper bounds are inclusive: income exactly on a boundary is taxed entirely
/// in the lower slab.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxBracket {
    pub lower: Money,
    pub upper: Option<Money>,
    pub rate: f64,
}

impl TaxBracket {
    fn contains(&self, income: Money) -> bool {
        income > self.lower && self.upper.is_none_or(|upper| income <= upper)
    }
}

/// A deduction a regime recognises, with an optional ceiling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeductionAllowance {
    pub kind: DeductionKind,
    pub cap: Option<Money>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxRegimeConfig {
    pub name: String,
    pub brackets: Vec<TaxBracket>,
    #[serde(default)]
    pub standard_deduction: Money,
    #[serde(default)]
    pub rebate_threshold: Money,
    /// Caps the tax just above the rebate threshold at the income in excess
    /// of the threshold.
    #[serde(default)]
    pub rebate_marginal_relief: bool,
    /// Extra percentage of the slab tax, picked by total taxable income.
    #[serde(default)]
    pub surcharge: Vec<TaxBracket>,
    #[serde(default)]
    pub cess_rate: f64,
    #[serde(default)]
    pub allowed_deductions: Vec<DeductionAllowance>,
}

impl TaxRegimeConfig {
    /// Old regime, FY 2025-26 slabs.
    pub fn old_regime() -> Self {
        Self {
            name: "old".to_string(),
            brackets: vec![
                slab(0.0, Some(250_000.0), 0.0),
                slab(250_000.0, Some(500_000.0), 0.05),
                slab(500_000.0, Some(1_000_000.0), 0.20),
                slab(1_000_000.0, None, 0.30),
            ],
            standard_deduction: 50_000.0,
            rebate_threshold: 500_000.0,
            rebate_marginal_relief: false,
            surcharge: vec![
                slab(5_000_000.0, Some(10_000_000.0), 0.10),
                slab(10_000_000.0, Some(20_000_000.0), 0.15),
                slab(20_000_000.0, Some(50_000_000.0), 0.25),
                slab(50_000_000.0, None, 0.37),
            ],
            cess_rate: 0.04,
            allowed_deductions: vec![
                allowance(DeductionKind::Section80C, Some(150_000.0)),
                allowance(DeductionKind::Section80D, Some(25_000.0)),
                allowance(DeductionKind::Section80Ccd1b, Some(50_000.0)),
                allowance(DeductionKind::Section80Ccd2, None),
                allowance(DeductionKind::HomeLoanInterest, Some(200_000.0)),
                allowance(DeductionKind::Hra, None),
            ],
        }
    }

    /// New (default) regime, FY 2025-26 slabs.
    pub fn new_regime() -> Self {
        Self {
            name: "new".to_string(),
            brackets: vec![
                slab(0.0, Some(400_000.0), 0.0),
                slab(400_000.0, Some(800_000.0), 0.05),
                slab(800_000.0, Some(1_200_000.0), 0.10),
                slab(1_200_000.0, Some(1_600_000.0), 0.15),
                slab(1_600_000.0, Some(2_000_000.0), 0.20),
                slab(2_000_000.0, Some(2_400_000.0), 0.25),
                slab(2_400_000.0, None, 0.30),
            ],
            standard_deduction: 75_000.0,
            rebate_threshold: 1_200_000.0,
            rebate_marginal_relief: true,
            surcharge: vec![
                slab(5_000_000.0, Some(10_000_000.0), 0.10),
                slab(10_000_000.0, Some(20_000_000.0), 0.15),
                slab(20_000_000.0, None, 0.25),
            ],
            cess_rate: 0.04,
            allowed_deductions: vec![allowance(DeductionKind::Section80Ccd2, None)],
        }
    }

    /// Rejects gaps, overlaps and out-of-range rates before any tax is computed.
    pub fn validate(&self) -> Result<()> {
        let regime = self.name.as_str();
        if self.brackets.is_empty() {
            return Err(EngineError::brackets(regime, "no brackets"));
        }
        if self.brackets[0].lower != 0.0 {
            return Err(EngineError::brackets(regime, "first bracket must start at 0"));
        }
        check_schedule(regime, "bracket", &self.brackets, true)?;
        check_schedule(regime, "surcharge", &self.surcharge, false)?;

        ensure_non_negative("standard_deduction", self.standard_deduction)?;
        ensure_non_negative("rebate_threshold", self.rebate_threshold)?;
        if !(0.0..=1.0).contains(&self.cess_rate) {
            return Err(EngineError::brackets(regime, "cess rate must be between 0 and 1"));
        }
        for allowance in &self.allowed_deductions {
            if let Some(cap) = allowance.cap {
                ensure_non_negative("allowed_deductions.cap", cap)?;
            }
        }
        Ok(())
    }

    fn allowance_for(&self, kind: DeductionKind) -> Option<&DeductionAllowance> {
        self.allowed_deductions.iter().find(|a| a.kind == kind)
    }

    fn surcharge_rate(&self, income: Money) -> f64 {
        self.surcharge
            .iter()
            .find(|b| b.contains(income))
            .map_or(0.0, |b| b.rate)
    }
}

fn slab(lower: Money, upper: Option<Money>, rate: f64) -> TaxBracket {
    TaxBracket { lower, upper, rate }
}

fn allowance(kind: DeductionKind, cap: Option<Money>) -> DeductionAllowance {
    DeductionAllowance { kind, cap }
}

fn check_schedule(
    regime: &str,
    label: &str,
    brackets: &[TaxBracket],
    contiguous: bool,
) -> Result<()> {
    for (idx, bracket) in brackets.iter().enumerate() {
        if !bracket.lower.is_finite() || bracket.lower < 0.0 {
            return Err(EngineError::brackets(
                regime,
                format!("{label} {idx} has an invalid lower bound"),
            ));
        }
        if !(0.0..=1.0).contains(&bracket.rate) {
            return Err(EngineError::brackets(
                regime,
                format!("{label} {idx} rate must be between 0 and 1"),
            ));
        }

        let is_last = idx + 1 == brackets.len();
        match (bracket.upper, is_last) {
            (None, false) => {
                return Err(EngineError::brackets(
                    regime,
                    format!("only the last {label} may be unbounded"),
                ));
            }
            (Some(upper), _) if upper <= bracket.lower => {
                return Err(EngineError::brackets(
                    regime,
                    format!("{label} {idx} upper bound must exceed its lower bound"),
                ));
            }
            _ => {}
        }

        if let (Some(upper), Some(next)) = (bracket.upper, brackets.get(idx + 1)) {
            if next.lower < upper {
                return Err(EngineError::brackets(
                    regime,
                    format!("{label} {idx} overlaps the next one at {}", next.lower),
                ));
            }
            if contiguous && next.lower > upper {
                return Err(EngineError::brackets(
                    regime,
                    format!("gap between {upper} and {}", next.lower),
                ));
            }
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxBreakdown {
    pub taxable_income: Money,
    pub slab_tax: Money,
    pub surcharge: Money,
    pub cess: Money,
    pub total: Money,
    pub effective_rate: f64,
}

impl TaxBreakdown {
    fn zero(taxable_income: Money) -> Self {
        Self {
            taxable_income,
            slab_tax: 0.0,
            surcharge: 0.0,
            cess: 0.0,
            total: 0.0,
            effective_rate: 0.0,
        }
    }
}

/// Total liability (slab tax + surcharge + cess), rounded to the rupee.
pub fn compute_tax(taxable_income: Money, config: &TaxRegimeConfig) -> Result<Money> {
    tax_breakdown(taxable_income, config).map(|b| b.total)
}

pub fn tax_breakdown(taxable_income: Money, config: &TaxRegimeConfig) -> Result<TaxBreakdown> {
    config.validate()?;
    ensure_finite("taxable_income", taxable_income)?;

    if taxable_income <= 0.0 || taxable_income <= config.rebate_threshold {
        return Ok(TaxBreakdown::zero(taxable_income.max(0.0)));
    }

    let mut slab_tax: Money = config
        .brackets
        .iter()
        .filter(|b| b.lower < taxable_income)
        .map(|b| {
            let top = b.upper.map_or(taxable_income, |upper| taxable_income.min(upper));
            (top - b.lower).max(0.0) * b.rate
        })
        .sum();

    if config.rebate_marginal_relief {
        slab_tax = slab_tax.min(taxable_income - config.rebate_threshold);
    }

    let surcharge = slab_tax * config.surcharge_rate(taxable_income);
    let cess = (slab_tax + surcharge) * config.cess_rate;
    let total = round_rupee(slab_tax + surcharge + cess);

    Ok(TaxBreakdown {
        taxable_income,
        slab_tax,
        surcharge,
        cess,
        total,
        effective_rate: safe_div(total, taxable_income).unwrap_or(0.0),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AllowedDeduction {
    pub kind: DeductionKind,
    pub claimed: Money,
    pub allowed: Money,
}

/// Claimed amounts per kind after applying the regime's allow-list and caps.
/// Several claims of one kind share a single cap.
pub fn allowed_deductions(
    claimed: &[ClaimedDeduction],
    config: &TaxRegimeConfig,
) -> Result<Vec<AllowedDeduction>> {
    let mut totals: Vec<(DeductionKind, Money)> = Vec::new();
    for claim in claimed {
        ensure_non_negative("claimed_deductions.amount", claim.amount)?;
        match totals.iter_mut().find(|(kind, _)| *kind == claim.kind) {
            Some((_, total)) => *total += claim.amount,
            None => totals.push((claim.kind, claim.amount)),
        }
    }

    let mut allowed = Vec::with_capacity(totals.len());
    for (kind, amount) in totals {
        let Some(allowance) = config.allowance_for(kind) else {
            debug!("regime {} ignores deduction {kind:?}", config.name);
            continue;
        };
        let capped = allowance.cap.map_or(amount, |cap| amount.min(cap));
        allowed.push(AllowedDeduction {
            kind,
            claimed: amount,
            allowed: capped,
        });
    }
    Ok(allowed)
}

/// Gross income less the standard deduction and the regime-allowed, capped
/// deductions. Never negative.
pub fn apply_deductions(
    gross_income: Money,
    claimed_deductions: &[ClaimedDeduction],
    config: &TaxRegimeConfig,
) -> Result<Money> {
    ensure_finite("gross_income", gross_income)?;
    if gross_income <= 0.0 {
        return Ok(0.0);
    }
    let itemised: Money = allowed_deductions(claimed_deductions, config)?
        .iter()
        .map(|d| d.allowed)
        .sum();
    Ok((gross_income - config.standard_deduction - itemised).max(0.0))
}

/// Named regimes. Defaults to `old` and `new`; any other jurisdiction can be
/// added as data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaxRegimeSet {
    regimes: BTreeMap<String, TaxRegimeConfig>,
}

impl Default for TaxRegimeSet {
    fn default() -> Self {
        let mut set = Self {
            regimes: BTreeMap::new(),
        };
        set.insert(TaxRegimeConfig::old_regime());
        set.insert(TaxRegimeConfig::new_regime());
        set
    }
}

impl TaxRegimeSet {
    pub fn insert(&mut self, config: TaxRegimeConfig) {
        self.regimes.insert(config.name.clone(), config);
    }

    pub fn get(&self, name: &str) -> Result<&TaxRegimeConfig> {
        self.regimes
            .get(name)
            .ok_or_else(|| EngineError::invalid("regime", format!("unknown regime `{name}`")))
    }

    pub fn iter(&self) -> impl Iterator<Item = &TaxRegimeConfig> {
        self.regimes.values()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegimeOutcome {
    pub regime: String,
    pub deductions: Vec<AllowedDeduction>,
    pub breakdown: TaxBreakdown,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegimeComparison {
    pub gross_income: Money,
    pub outcomes: Vec<RegimeOutcome>,
    pub recommended: String,
    /// Tax saved by the recommended regime against the most expensive one.
    pub savings: Money,
}

impl RegimeComparison {
    pub fn recommended_outcome(&self) -> Option<&RegimeOutcome> {
        self.outcomes.iter().find(|o| o.regime == self.recommended)
    }
}

pub fn compare_regimes(
    gross_income: Money,
    claimed_deductions: &[ClaimedDeduction],
    regimes: &TaxRegimeSet,
) -> Result<RegimeComparison> {
    let mut outcomes = Vec::new();
    for config in regimes.iter() {
        let deductions = allowed_deductions(claimed_deductions, config)?;
        let taxable = apply_deductions(gross_income, claimed_deductions, config)?;
        let breakdown = tax_breakdown(taxable, config)?;
        outcomes.push(RegimeOutcome {
            regime: config.name.clone(),
            deductions,
            breakdown,
        });
    }

    let cheapest = outcomes
        .iter()
        .min_by(|a, b| a.breakdown.total.total_cmp(&b.breakdown.total))
        .ok_or_else(|| EngineError::invalid("regimes", "no regimes to compare"))?;
    let dearest = outcomes
        .iter()
        .map(|o| o.breakdown.total)
        .fold(0.0, f64::max);

    Ok(RegimeComparison {
        gross_income,
        recommended: cheapest.regime.clone(),
        savings: dearest - cheapest.breakdown.total,
        outcomes,
    })
}
