use std::collections::BTreeMap;

use chrono::NaiveDate;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use super::error::{EngineError, Result};
use super::primitives::{Money, ensure_fraction, ensure_non_negative, financial_year, round_money, safe_div};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssetClass {
    ListedEquity,
    EquityMutualFund,
    DebtMutualFund,
    RealEstate,
    Gold,
    UnlistedShares,
    Other,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GainType {
    ShortTerm,
    LongTerm,
}

/// A single acquisition/disposal pair. Everything derived from it is
/// recomputed on every call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapitalGainLot {
    #[serde(default)]
    pub id: String,
    #[serde(alias = "asset_class")]
    pub asset_class: AssetClass,
    #[serde(alias = "acquisition_date")]
    pub acquisition_date: NaiveDate,
    #[serde(alias = "purchase_price")]
    pub purchase_price: Money,
    #[serde(alias = "disposal_date")]
    pub disposal_date: NaiveDate,
    #[serde(alias = "disposal_price")]
    pub disposal_price: Money,
    #[serde(default)]
    pub expenses: Money,
    #[serde(default, alias = "use_indexation")]
    pub use_indexation: bool,
    /// Lot-specific exemption claimed (e.g. reinvestment relief).
    #[serde(default)]
    pub exemption: Money,
}

impl CapitalGainLot {
    fn validate(&self) -> Result<()> {
        ensure_non_negative("lot.purchase_price", self.purchase_price)?;
        ensure_non_negative("lot.disposal_price", self.disposal_price)?;
        ensure_non_negative("lot.expenses", self.expenses)?;
        ensure_non_negative("lot.exemption", self.exemption)?;
        if self.disposal_date < self.acquisition_date {
            return Err(EngineError::invalid(
                "lot.disposal_date",
                format!(
                    "{} is before acquisition date {}",
                    self.disposal_date, self.acquisition_date
                ),
            ));
        }
        Ok(())
    }

    /// Whole 30-day months between acquisition and disposal.
    pub fn holding_months(&self) -> u32 {
        let days = (self.disposal_date - self.acquisition_date).num_days().max(0);
        (days / 30) as u32
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoldingThreshold {
    pub asset_class: AssetClass,
    pub months: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateEntry {
    pub asset_class: AssetClass,
    pub gain_type: GainType,
    pub indexation: bool,
    pub rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetExemption {
    pub asset_class: AssetClass,
    pub amount: Money,
}

/// Lots of `asset_class` acquired before `cutover_date` and held long term
/// are taxed both ways, and the cheaper method is recommended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DualComputationRule {
    pub asset_class: AssetClass,
    pub cutover_date: NaiveDate,
    pub indexed_rate: f64,
    pub non_indexed_rate: f64,
}

/// Cost inflation index keyed by the starting year of the financial year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CostInflationIndex {
    entries: BTreeMap<i32, f64>,
}

impl Default for CostInflationIndex {
    fn default() -> Self {
        const PUBLISHED: [(i32, f64); 25] = [
            (2001, 100.0),
            (2002, 105.0),
            (2003, 109.0),
            (2004, 113.0),
            (2005, 117.0),
            (2006, 122.0),
            (2007, 129.0),
            (2008, 137.0),
            (2009, 148.0),
            (2010, 167.0),
            (2011, 184.0),
            (2012, 200.0),
            (2013, 220.0),
            (2014, 240.0),
            (2015, 254.0),
            (2016, 264.0),
            (2017, 272.0),
            (2018, 280.0),
            (2019, 289.0),
            (2020, 301.0),
            (2021, 317.0),
            (2022, 331.0),
            (2023, 348.0),
            (2024, 363.0),
            (2025, 376.0),
        ];
        Self {
            entries: PUBLISHED.into_iter().collect(),
        }
    }
}

impl CostInflationIndex {
    pub fn new(entries: BTreeMap<i32, f64>) -> Self {
        Self { entries }
    }

    /// Index for the financial year containing `date`. Years after the last
    /// published entry reuse that entry until the table is updated.
    pub fn for_date(&self, date: NaiveDate) -> Result<f64> {
        let year = financial_year(date);
        let entry = match self.entries.last_key_value() {
            Some((&latest, &index)) if year > latest => {
                warn!(
                    "no cost inflation index for financial year {year}; using {latest} ({index})"
                );
                Some(index)
            }
            _ => self.entries.get(&year).copied(),
        };
        match entry {
            Some(index) if index > 0.0 => Ok(index),
            _ => Err(EngineError::invalid(
                "cost_inflation_index",
                format!("no index published for financial year {year}"),
            )),
        }
    }

    /// Purchase cost scaled by the index ratio between the two dates.
    pub fn indexed_cost(&self, cost: Money, acquired: NaiveDate, disposed: NaiveDate) -> Result<Money> {
        let ratio = safe_div(self.for_date(disposed)?, self.for_date(acquired)?)
            .ok_or_else(|| EngineError::numerical("indexed_cost", "zero acquisition index"))?;
        Ok(cost * ratio)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CapitalGainsConfig {
    pub holding_thresholds: Vec<HoldingThreshold>,
    pub default_threshold_months: u32,
    pub rates: Vec<RateEntry>,
    /// Stand-in for the owner's slab rate when no table entry matches.
    pub slab_proxy_rate: f64,
    pub cost_inflation_index: CostInflationIndex,
    pub asset_exemptions: Vec<AssetExemption>,
    pub dual_rules: Vec<DualComputationRule>,
}

impl Default for CapitalGainsConfig {
    fn default() -> Self {
        use AssetClass::*;
        use GainType::*;

        let threshold = |asset_class, months| HoldingThreshold { asset_class, months };
        let rate = |asset_class, gain_type, indexation, rate| RateEntry {
            asset_class,
            gain_type,
            indexation,
            rate,
        };

        Self {
            holding_thresholds: vec![
                threshold(ListedEquity, 12),
                threshold(EquityMutualFund, 12),
                threshold(RealEstate, 24),
                threshold(Gold, 24),
                threshold(UnlistedShares, 24),
                threshold(DebtMutualFund, 24),
            ],
            default_threshold_months: 24,
            rates: vec![
                rate(ListedEquity, ShortTerm, false, 0.20),
                rate(ListedEquity, LongTerm, false, 0.125),
                rate(EquityMutualFund, ShortTerm, false, 0.20),
                rate(EquityMutualFund, LongTerm, false, 0.125),
                rate(RealEstate, LongTerm, false, 0.125),
                rate(RealEstate, LongTerm, true, 0.20),
                rate(Gold, LongTerm, false, 0.125),
                rate(Gold, LongTerm, true, 0.20),
                rate(UnlistedShares, LongTerm, false, 0.125),
                rate(UnlistedShares, LongTerm, true, 0.20),
                rate(DebtMutualFund, LongTerm, true, 0.20),
            ],
            slab_proxy_rate: 0.30,
            cost_inflation_index: CostInflationIndex::default(),
            asset_exemptions: vec![
                AssetExemption {
                    asset_class: ListedEquity,
                    amount: 125_000.0,
                },
                AssetExemption {
                    asset_class: EquityMutualFund,
                    amount: 125_000.0,
                },
            ],
            dual_rules: vec![DualComputationRule {
                asset_class: RealEstate,
                cutover_date: NaiveDate::from_ymd_opt(2024, 7, 23).unwrap_or_default(),
                indexed_rate: 0.20,
                non_indexed_rate: 0.125,
            }],
        }
    }
}

impl CapitalGainsConfig {
    pub fn validate(&self) -> Result<()> {
        ensure_fraction("slab_proxy_rate", self.slab_proxy_rate)?;
        for entry in &self.rates {
            ensure_fraction("rates.rate", entry.rate)?;
        }
        for exemption in &self.asset_exemptions {
            ensure_non_negative("asset_exemptions.amount", exemption.amount)?;
        }
        for rule in &self.dual_rules {
            ensure_fraction("dual_rules.indexed_rate", rule.indexed_rate)?;
            ensure_fraction("dual_rules.non_indexed_rate", rule.non_indexed_rate)?;
        }
        Ok(())
    }

    pub fn threshold_months(&self, asset_class: AssetClass) -> u32 {
        self.holding_thresholds
            .iter()
            .find(|t| t.asset_class == asset_class)
            .map_or(self.default_threshold_months, |t| t.months)
    }

    fn rate_for(&self, asset_class: AssetClass, gain_type: GainType, indexation: bool) -> (f64, RateSource) {
        match self.rates.iter().find(|e| {
            e.asset_class == asset_class && e.gain_type == gain_type && e.indexation == indexation
        }) {
            Some(entry) => (entry.rate, RateSource::Table),
            None => {
                debug!(
                    "no capital gains rate for {asset_class:?}/{gain_type:?}/indexation={indexation}; using slab proxy"
                );
                (self.slab_proxy_rate, RateSource::SlabProxy)
            }
        }
    }

    fn class_exemption(&self, asset_class: AssetClass) -> Money {
        self.asset_exemptions
            .iter()
            .find(|e| e.asset_class == asset_class)
            .map_or(0.0, |e| e.amount)
    }

    fn dual_rule_for(&self, lot: &CapitalGainLot) -> Option<&DualComputationRule> {
        self.dual_rules
            .iter()
            .find(|r| r.asset_class == lot.asset_class && lot.acquisition_date < r.cutover_date)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RateSource {
    Table,
    SlabProxy,
    DualRule,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CostMethod {
    Indexed,
    NonIndexed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MethodOutcome {
    pub method: CostMethod,
    pub cost_basis: Money,
    pub gross_gain: Money,
    pub taxable_gain: Money,
    pub rate: f64,
    pub tax: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DualComputation {
    pub indexed: MethodOutcome,
    pub non_indexed: MethodOutcome,
    pub recommended: CostMethod,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapitalGainAssessment {
    pub lot_id: String,
    pub holding_months: u32,
    pub gain_type: GainType,
    pub indexation_used: bool,
    pub cost_basis: Money,
    /// Negative for a loss.
    pub gross_gain: Money,
    pub class_exemption_applied: Money,
    pub lot_exemption_applied: Money,
    pub taxable_gain: Money,
    pub rate: f64,
    pub rate_source: RateSource,
    pub tax: Money,
    pub dual: Option<DualComputation>,
}

struct GainLine {
    gross_gain: Money,
    class_exemption_applied: Money,
    lot_exemption_applied: Money,
    taxable_gain: Money,
}

fn gain_line(lot: &CapitalGainLot, cost_basis: Money, class_exemption: Money) -> GainLine {
    let gross_gain = lot.disposal_price - cost_basis - lot.expenses;
    let mut remaining = gross_gain.max(0.0);
    let class_exemption_applied = remaining.min(class_exemption);
    remaining -= class_exemption_applied;
    let lot_exemption_applied = remaining.min(lot.exemption);
    remaining -= lot_exemption_applied;
    GainLine {
        gross_gain,
        class_exemption_applied,
        lot_exemption_applied,
        taxable_gain: remaining.max(0.0),
    }
}

/// Holding period, classification, taxable gain and tax for one lot.
pub fn classify_and_tax(lot: &CapitalGainLot, config: &CapitalGainsConfig) -> Result<CapitalGainAssessment> {
    lot.validate()?;
    config.validate()?;

    let holding_months = lot.holding_months();
    let gain_type = if holding_months >= config.threshold_months(lot.asset_class) {
        GainType::LongTerm
    } else {
        GainType::ShortTerm
    };
    let class_exemption = match gain_type {
        GainType::LongTerm => config.class_exemption(lot.asset_class),
        GainType::ShortTerm => 0.0,
    };

    if gain_type == GainType::LongTerm {
        if let Some(rule) = config.dual_rule_for(lot) {
            return dual_assessment(lot, config, rule, holding_months, class_exemption);
        }
    }

    let indexation_used = lot.use_indexation && gain_type == GainType::LongTerm;
    let cost_basis = if indexation_used {
        config
            .cost_inflation_index
            .indexed_cost(lot.purchase_price, lot.acquisition_date, lot.disposal_date)?
    } else {
        lot.purchase_price
    };

    let line = gain_line(lot, cost_basis, class_exemption);
    let (rate, rate_source) = config.rate_for(lot.asset_class, gain_type, indexation_used);

    Ok(CapitalGainAssessment {
        lot_id: lot.id.clone(),
        holding_months,
        gain_type,
        indexation_used,
        cost_basis,
        gross_gain: line.gross_gain,
        class_exemption_applied: line.class_exemption_applied,
        lot_exemption_applied: line.lot_exemption_applied,
        taxable_gain: line.taxable_gain,
        rate,
        rate_source,
        tax: round_money(line.taxable_gain * rate),
        dual: None,
    })
}

fn dual_assessment(
    lot: &CapitalGainLot,
    config: &CapitalGainsConfig,
    rule: &DualComputationRule,
    holding_months: u32,
    class_exemption: Money,
) -> Result<CapitalGainAssessment> {
    let indexed_cost = config
        .cost_inflation_index
        .indexed_cost(lot.purchase_price, lot.acquisition_date, lot.disposal_date)?;

    let outcome = |method, cost_basis, rate| {
        let line = gain_line(lot, cost_basis, class_exemption);
        (
            MethodOutcome {
                method,
                cost_basis,
                gross_gain: line.gross_gain,
                taxable_gain: line.taxable_gain,
                rate,
                tax: round_money(line.taxable_gain * rate),
            },
            line,
        )
    };

    let (indexed, indexed_line) = outcome(CostMethod::Indexed, indexed_cost, rule.indexed_rate);
    let (non_indexed, flat_line) =
        outcome(CostMethod::NonIndexed, lot.purchase_price, rule.non_indexed_rate);

    let (recommended, chosen, line) = if indexed.tax < non_indexed.tax {
        (CostMethod::Indexed, &indexed, indexed_line)
    } else {
        (CostMethod::NonIndexed, &non_indexed, flat_line)
    };
    debug!(
        "lot {:?}: indexed tax {} vs non-indexed tax {}, recommending {recommended:?}",
        lot.id, indexed.tax, non_indexed.tax
    );

    Ok(CapitalGainAssessment {
        lot_id: lot.id.clone(),
        holding_months,
        gain_type: GainType::LongTerm,
        indexation_used: recommended == CostMethod::Indexed,
        cost_basis: chosen.cost_basis,
        gross_gain: line.gross_gain,
        class_exemption_applied: line.class_exemption_applied,
        lot_exemption_applied: line.lot_exemption_applied,
        taxable_gain: line.taxable_gain,
        rate: chosen.rate,
        rate_source: RateSource::DualRule,
        tax: chosen.tax,
        dual: Some(DualComputation {
            indexed: indexed.clone(),
            non_indexed: non_indexed.clone(),
            recommended,
        }),
    })
}

/// Assesses every lot independently; one bad lot never affects the others.
pub fn assess_lots(lots: &[CapitalGainLot], config: &CapitalGainsConfig) -> Vec<Result<CapitalGainAssessment>> {
    lots.iter()
        .map(|lot| {
            let result = classify_and_tax(lot, config);
            if let Err(e) = &result {
                warn!("skipping capital gains lot {:?}: {e}", lot.id);
            }
            result
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapitalGainsSummary {
    pub short_term_gain: Money,
    pub long_term_gain: Money,
    pub short_term_tax: Money,
    pub long_term_tax: Money,
    pub total_tax: Money,
    pub assessed_lots: usize,
    pub failed_lots: usize,
}

pub fn summarize(results: &[Result<CapitalGainAssessment>]) -> CapitalGainsSummary {
    let mut summary = CapitalGainsSummary::default();
    for result in results {
        let Ok(assessment) = result else {
            summary.failed_lots += 1;
            continue;
        };
        summary.assessed_lots += 1;
        match assessment.gain_type {
            GainType::ShortTerm => {
                summary.short_term_gain += assessment.taxable_gain;
                summary.short_term_tax += assessment.tax;
            }
            GainType::LongTerm => {
                summary.long_term_gain += assessment.taxable_gain;
                summary.long_term_tax += assessment.tax;
            }
        }
    }
    summary.total_tax = summary.short_term_tax + summary.long_term_tax;
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn equity_lot(acquired: NaiveDate, disposed: NaiveDate, buy: f64, sell: f64) -> CapitalGainLot {
        CapitalGainLot {
            id: "eq".to_string(),
            asset_class: AssetClass::ListedEquity,
            acquisition_date: acquired,
            purchase_price: buy,
            disposal_date: disposed,
            disposal_price: sell,
            expenses: 0.0,
            use_indexation: false,
            exemption: 0.0,
        }
    }

    #[test]
    fn thirteen_months_with_twelve_month_threshold_is_long_term() {
        // 395 days -> 13 whole 30-day months.
        let lot = equity_lot(date(2024, 1, 1), date(2025, 1, 30), 100_000.0, 400_000.0);
        let a = classify_and_tax(&lot, &CapitalGainsConfig::default()).expect("valid");
        assert_eq!(a.holding_months, 13);
        assert_eq!(a.gain_type, GainType::LongTerm);
    }

    #[test]
    fn short_holding_is_short_term_and_uses_table_rate() {
        let lot = equity_lot(date(2025, 1, 1), date(2025, 6, 1), 100_000.0, 150_000.0);
        let a = classify_and_tax(&lot, &CapitalGainsConfig::default()).expect("valid");
        assert_eq!(a.gain_type, GainType::ShortTerm);
        assert_approx(a.class_exemption_applied, 0.0);
        assert_approx(a.taxable_gain, 50_000.0);
        assert_approx(a.tax, 10_000.0);
        assert_eq!(a.rate_source, RateSource::Table);
    }

    #[test]
    fn equity_ltcg_exemption_applies_before_lot_exemption() {
        let mut lot = equity_lot(date(2022, 1, 1), date(2025, 1, 1), 100_000.0, 400_000.0);
        lot.expenses = 5_000.0;
        lot.exemption = 20_000.0;
        let a = classify_and_tax(&lot, &CapitalGainsConfig::default()).expect("valid");
        assert_approx(a.gross_gain, 295_000.0);
        assert_approx(a.class_exemption_applied, 125_000.0);
        assert_approx(a.lot_exemption_applied, 20_000.0);
        assert_approx(a.taxable_gain, 150_000.0);
        assert_approx(a.tax, 18_750.0);
    }

    #[test]
    fn loss_yields_zero_taxable_gain() {
        let lot = equity_lot(date(2022, 1, 1), date(2025, 1, 1), 400_000.0, 300_000.0);
        let a = classify_and_tax(&lot, &CapitalGainsConfig::default()).expect("valid");
        assert_approx(a.gross_gain, -100_000.0);
        assert_approx(a.taxable_gain, 0.0);
        assert_approx(a.tax, 0.0);
    }

    #[test]
    fn unmatched_combination_falls_back_to_slab_proxy() {
        let mut lot = equity_lot(date(2025, 1, 1), date(2025, 6, 1), 100_000.0, 150_000.0);
        lot.asset_class = AssetClass::Gold;
        let a = classify_and_tax(&lot, &CapitalGainsConfig::default()).expect("valid");
        assert_eq!(a.rate_source, RateSource::SlabProxy);
        assert_approx(a.tax, 15_000.0);
    }

    #[test]
    fn indexation_only_applies_to_long_term() {
        let mut config = CapitalGainsConfig::default();
        config.dual_rules.clear();
        let lot = CapitalGainLot {
            id: "gold".to_string(),
            asset_class: AssetClass::Gold,
            acquisition_date: date(2020, 5, 1),
            purchase_price: 301_000.0,
            disposal_date: date(2024, 5, 1),
            disposal_price: 500_000.0,
            expenses: 0.0,
            use_indexation: true,
            exemption: 0.0,
        };
        let a = classify_and_tax(&lot, &config).expect("valid");
        assert!(a.indexation_used);
        // 301000 * 363 / 301
        assert_approx(a.cost_basis, 363_000.0);
        assert_approx(a.gross_gain, 137_000.0);
        assert_eq!(a.rate_source, RateSource::Table);
        assert_approx(a.rate, 0.20);
        assert_approx(a.tax, 27_400.0);

        let mut short = lot.clone();
        short.acquisition_date = date(2024, 1, 1);
        let a = classify_and_tax(&short, &config).expect("valid");
        assert!(!a.indexation_used);
        assert_approx(a.cost_basis, 301_000.0);
    }

    #[test]
    fn pre_cutover_real_estate_reports_both_methods_and_cheaper_choice() {
        let lot = CapitalGainLot {
            id: "flat".to_string(),
            asset_class: AssetClass::RealEstate,
            acquisition_date: date(2010, 6, 1),
            purchase_price: 2_000_000.0,
            disposal_date: date(2025, 6, 1),
            disposal_price: 6_000_000.0,
            expenses: 0.0,
            use_indexation: false,
            exemption: 0.0,
        };
        let a = classify_and_tax(&lot, &CapitalGainsConfig::default()).expect("valid");
        let dual = a.dual.as_ref().expect("dual computation required");

        // Indexed cost 2,000,000 * 376 / 167.
        let indexed_cost = 2_000_000.0 * 376.0 / 167.0;
        assert_approx(dual.indexed.cost_basis, indexed_cost);
        assert_approx(dual.non_indexed.taxable_gain, 4_000_000.0);
        assert_approx(dual.non_indexed.tax, 500_000.0);
        assert!(dual.indexed.tax < dual.non_indexed.tax);
        assert_eq!(dual.recommended, CostMethod::Indexed);
        assert_approx(a.tax, dual.indexed.tax);
        assert_eq!(a.rate_source, RateSource::DualRule);
    }

    #[test]
    fn post_cutover_real_estate_skips_dual_computation() {
        let lot = CapitalGainLot {
            id: "plot".to_string(),
            asset_class: AssetClass::RealEstate,
            acquisition_date: date(2024, 8, 1),
            purchase_price: 1_000_000.0,
            disposal_date: date(2026, 9, 1),
            disposal_price: 1_500_000.0,
            expenses: 0.0,
            use_indexation: false,
            exemption: 0.0,
        };
        let a = classify_and_tax(&lot, &CapitalGainsConfig::default()).expect("valid");
        assert!(a.dual.is_none());
        assert_approx(a.tax, 62_500.0);
    }

    #[test]
    fn indexed_long_term_classes_use_table_rates() {
        let config = CapitalGainsConfig::default();
        for asset_class in [
            AssetClass::Gold,
            AssetClass::UnlistedShares,
            AssetClass::DebtMutualFund,
        ] {
            let mut lot = equity_lot(date(2018, 5, 1), date(2024, 5, 1), 280_000.0, 500_000.0);
            lot.asset_class = asset_class;
            lot.use_indexation = true;
            let a = classify_and_tax(&lot, &config).expect("valid");
            assert!(a.indexation_used);
            assert_eq!(a.rate_source, RateSource::Table, "{asset_class:?}");
            // 280000 * 363 / 280 = 363000; gain 137000 at 20%.
            assert_approx(a.tax, 27_400.0);
        }
    }

    #[test]
    fn disposal_after_last_published_index_uses_latest_entry() {
        let lot = CapitalGainLot {
            id: "flat".to_string(),
            asset_class: AssetClass::RealEstate,
            acquisition_date: date(2015, 6, 1),
            purchase_price: 2_540_000.0,
            disposal_date: date(2026, 6, 1),
            disposal_price: 6_000_000.0,
            expenses: 0.0,
            use_indexation: false,
            exemption: 0.0,
        };
        let a = classify_and_tax(&lot, &CapitalGainsConfig::default()).expect("latest index");
        let dual = a.dual.as_ref().expect("dual computation required");
        // 2,540,000 * 376 / 254
        assert_approx(dual.indexed.cost_basis, 3_760_000.0);
        assert_approx(dual.indexed.tax, 448_000.0);
        assert_approx(dual.non_indexed.tax, 432_500.0);
        assert_eq!(dual.recommended, CostMethod::NonIndexed);
    }

    #[test]
    fn missing_index_year_is_invalid_input() {
        let mut lot = equity_lot(date(1995, 1, 1), date(2025, 1, 1), 1.0, 2.0);
        lot.asset_class = AssetClass::Gold;
        lot.use_indexation = true;
        let err = classify_and_tax(&lot, &CapitalGainsConfig::default()).expect_err("no index");
        assert!(matches!(err, EngineError::InvalidInput { .. }));
    }

    #[test]
    fn assess_lots_isolates_bad_lot() {
        let good = equity_lot(date(2025, 1, 1), date(2025, 6, 1), 100.0, 200.0);
        let bad = equity_lot(date(2025, 6, 1), date(2025, 1, 1), 100.0, 200.0);
        let results = assess_lots(&[good.clone(), bad, good], &CapitalGainsConfig::default());
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert!(results[2].is_ok());

        let summary = summarize(&results);
        assert_eq!(summary.assessed_lots, 2);
        assert_eq!(summary.failed_lots, 1);
        assert_approx(summary.short_term_tax, 40.0);
        assert_approx(summary.total_tax, 40.0);
    }

    #[test]
    fn lot_accepts_camel_and_snake_case_fields() {
        let camel = r#"{"assetClass": "gold", "acquisitionDate": "2020-05-01",
            "purchasePrice": 100, "disposalDate": "2024-05-01", "disposalPrice": 150,
            "useIndexation": true}"#;
        let snake = r#"{"asset_class": "gold", "acquisition_date": "2020-05-01",
            "purchase_price": 100, "disposal_date": "2024-05-01", "disposal_price": 150,
            "use_indexation": true}"#;
        let a: CapitalGainLot = serde_json::from_str(camel).expect("camelCase lot");
        let b: CapitalGainLot = serde_json::from_str(snake).expect("snake_case lot");
        assert_eq!(a, b);
        assert!(b.use_indexation);
    }

    #[test]
    fn classification_is_idempotent() {
        let lot = equity_lot(date(2022, 1, 1), date(2025, 1, 1), 100_000.0, 400_000.0);
        let config = CapitalGainsConfig::default();
        let a = classify_and_tax(&lot, &config).expect("valid");
        let b = classify_and_tax(&lot, &config).expect("valid");
        assert_eq!(a, b);
    }
}
