use chrono::NaiveDate;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use super::error::{EngineError, Result};
use super::primitives::{
    Money, add_months, annuity_payment, annuity_term, ensure_non_negative, ensure_positive,
    monthly_rate,
};
use super::types::Debt;

/// Hard cap on payoff simulation length.
pub const PAYOFF_HORIZON_MONTHS: u32 = 360;

const ROUNDING_SLACK_PER_MONTH: Money = 0.01;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRow {
    pub month: u32,
    pub installment: Money,
    /// Negative when the installment does not cover the interest.
    pub principal_component: Money,
    pub interest_component: Money,
    pub balance: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum ScheduleOutcome {
    Repaid,
    OutstandingAtTermEnd { balance: Money },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AmortizationSchedule {
    pub rows: Vec<ScheduleRow>,
    pub total_principal: Money,
    pub total_interest: Money,
    pub total_paid: Money,
    pub outcome: ScheduleOutcome,
}

/// Level monthly installment, rounded up to the paisa so the loan always
/// clears within its term.
pub fn emi(principal: Money, annual_rate: f64, term_months: u32) -> Result<Money> {
    let exact = annuity_payment(principal, annual_rate, term_months)?;
    Ok((exact * 100.0 - 1e-7).ceil().max(0.0) / 100.0)
}

pub fn generate_schedule(
    principal: Money,
    annual_rate: f64,
    term_months: u32,
    installment: Money,
) -> Result<AmortizationSchedule> {
    ensure_non_negative("principal", principal)?;
    ensure_non_negative("annual_rate", annual_rate)?;
    ensure_positive("installment", installment)?;
    if term_months == 0 {
        return Err(EngineError::invalid("term_months", "must be > 0"));
    }

    let r = monthly_rate(annual_rate);
    let slack = ROUNDING_SLACK_PER_MONTH * term_months as f64;
    let mut rows = Vec::with_capacity(term_months as usize);
    let mut balance = principal;

    for month in 1..=term_months {
        if balance <= 0.0 {
            break;
        }

        let interest = balance * r;
        let mut principal_component = (installment - interest).min(balance);
        let remaining = balance - principal_component;
        if month == term_months && remaining > 0.0 && remaining <= slack {
            principal_component += remaining;
        }
        balance = (balance - principal_component).max(0.0);

        rows.push(ScheduleRow {
            month,
            installment: interest + principal_component,
            principal_component,
            interest_component: interest,
            balance,
        });
    }

    if rows.iter().any(|row| row.principal_component < 0.0) {
        warn!("installment {installment} does not cover interest; balance grows");
    }

    let total_principal = rows.iter().map(|row| row.principal_component).sum();
    let total_interest = rows.iter().map(|row| row.interest_component).sum();
    let total_paid = rows.iter().map(|row| row.installment).sum();
    let outcome = if balance <= 0.0 {
        ScheduleOutcome::Repaid
    } else {
        ScheduleOutcome::OutstandingAtTermEnd { balance }
    };

    Ok(AmortizationSchedule {
        rows,
        total_principal,
        total_interest,
        total_paid,
        outcome,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoanTerms {
    pub principal: Money,
    pub annual_rate: f64,
    pub term_months: u32,
    /// Defaults to the level EMI for the term.
    #[serde(default)]
    pub installment: Option<Money>,
}

/// One schedule per loan; a bad loan does not stop the rest.
pub fn generate_schedules(loans: &[LoanTerms]) -> Vec<Result<AmortizationSchedule>> {
    loans
        .iter()
        .map(|loan| {
            let installment = match loan.installment {
                Some(installment) => installment,
                None => emi(loan.principal, loan.annual_rate, loan.term_months)?,
            };
            generate_schedule(loan.principal, loan.annual_rate, loan.term_months, installment)
        })
        .collect()
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PrepaymentMode {
    ReduceInstallment,
    ReduceTerm,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepaymentImpact {
    pub new_balance: Money,
    pub new_installment: Money,
    pub new_term: u32,
    pub interest_saved: Money,
    /// Set when the installment cannot cover a month's interest on the new
    /// balance; the term then stays at the original remaining months.
    pub interest_not_covered: bool,
}

pub fn prepayment_impact(
    balance: Money,
    annual_rate: f64,
    remaining_months: u32,
    installment: Money,
    prepay_amount: Money,
    mode: PrepaymentMode,
) -> Result<PrepaymentImpact> {
    ensure_non_negative("balance", balance)?;
    ensure_non_negative("annual_rate", annual_rate)?;
    ensure_positive("installment", installment)?;
    ensure_non_negative("prepay_amount", prepay_amount)?;
    if remaining_months == 0 {
        return Err(EngineError::invalid("remaining_months", "must be > 0"));
    }
    if prepay_amount > balance {
        return Err(EngineError::invalid(
            "prepay_amount",
            format!("{prepay_amount} exceeds outstanding balance {balance}"),
        ));
    }

    let new_balance = balance - prepay_amount;
    let mut interest_not_covered = false;

    let (new_installment, new_term) = if new_balance <= 0.0 {
        (0.0, 0)
    } else {
        match mode {
            PrepaymentMode::ReduceInstallment => (
                annuity_payment(new_balance, annual_rate, remaining_months)?,
                remaining_months,
            ),
            PrepaymentMode::ReduceTerm => match annuity_term(new_balance, annual_rate, installment) {
                Some(term) => (installment, term),
                None => {
                    warn!(
                        "installment {installment} cannot cover interest on {new_balance}; keeping term {remaining_months}"
                    );
                    interest_not_covered = true;
                    (installment, remaining_months)
                }
            },
        }
    };

    let original_interest = installment * remaining_months as f64 - balance;
    let new_interest = new_installment * new_term as f64 - new_balance;

    Ok(PrepaymentImpact {
        new_balance,
        new_installment,
        new_term,
        interest_saved: (original_interest - new_interest).max(0.0),
        interest_not_covered,
    })
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PayoffStrategy {
    /// Highest rate first.
    Avalanche,
    /// Smallest balance first.
    Snowball,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum PayoffStatus {
    PaidOff,
    HorizonReached { remaining_balance: Money },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebtPayoff {
    pub name: String,
    pub starting_balance: Money,
    pub payoff_month: Option<u32>,
    pub interest_paid: Money,
    pub total_paid: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoffOutcome {
    pub strategy: PayoffStrategy,
    pub months: u32,
    pub total_interest: Money,
    pub total_paid: Money,
    /// `None` when the horizon was reached with balances outstanding.
    pub payoff_date: Option<NaiveDate>,
    pub status: PayoffStatus,
    /// Debts in the order they were targeted.
    pub debts: Vec<DebtPayoff>,
}

impl PayoffOutcome {
    pub fn paid_off(&self) -> bool {
        matches!(self.status, PayoffStatus::PaidOff)
    }
}

fn payoff_order(debts: &[Debt], strategy: PayoffStrategy) -> Vec<usize> {
    let mut order: Vec<usize> = (0..debts.len()).collect();
    match strategy {
        PayoffStrategy::Avalanche => order.sort_by(|&a, &b| {
            debts[b]
                .annual_rate
                .total_cmp(&debts[a].annual_rate)
                .then(debts[a].balance.total_cmp(&debts[b].balance))
        }),
        PayoffStrategy::Snowball => order.sort_by(|&a, &b| {
            debts[a]
                .balance
                .total_cmp(&debts[b].balance)
                .then(debts[b].annual_rate.total_cmp(&debts[a].annual_rate))
        }),
    }
    order
}

/// Month-by-month payoff of several debts. Every debt receives its minimum;
/// the shared extra goes to the first debt in strategy order that still has
/// a balance, and whatever that debt cannot absorb moves down the order.
pub fn simulate_payoff(
    debts: &[Debt],
    strategy: PayoffStrategy,
    extra_monthly_payment: Money,
    start: NaiveDate,
) -> Result<PayoffOutcome> {
    ensure_non_negative("extra_monthly_payment", extra_monthly_payment)?;
    for debt in debts {
        debt.validate()?;
    }

    let order = payoff_order(debts, strategy);
    let mut balances: Vec<Money> = order.iter().map(|&i| debts[i].balance.max(0.0)).collect();
    let mut ledger: Vec<DebtPayoff> = order
        .iter()
        .map(|&i| DebtPayoff {
            name: debts[i].name.clone(),
            starting_balance: debts[i].balance.max(0.0),
            payoff_month: (debts[i].balance <= 0.0).then_some(0),
            interest_paid: 0.0,
            total_paid: 0.0,
        })
        .collect();

    let mut month = 0;
    while balances.iter().any(|b| *b > 0.0) && month < PAYOFF_HORIZON_MONTHS {
        month += 1;
        let mut extra = extra_monthly_payment;

        for (slot, &debt_idx) in order.iter().enumerate() {
            if balances[slot] <= 0.0 {
                continue;
            }
            let debt = &debts[debt_idx];
            let interest = balances[slot] * monthly_rate(debt.annual_rate);
            let owed = balances[slot] + interest;

            let minimum = debt.minimum_payment.min(owed);
            let boost = extra.min(owed - minimum);
            extra -= boost;
            let payment = minimum + boost;

            balances[slot] = (owed - payment).max(0.0);
            let entry = &mut ledger[slot];
            entry.interest_paid += interest;
            entry.total_paid += payment;
            if balances[slot] <= 0.0 {
                entry.payoff_month = Some(month);
            }
        }
    }

    let total_interest = ledger.iter().map(|d| d.interest_paid).sum();
    let total_paid = ledger.iter().map(|d| d.total_paid).sum();
    let remaining_balance: Money = balances.iter().sum();

    let (status, payoff_date) = if remaining_balance > 0.0 {
        warn!("{strategy:?} payoff did not finish within {PAYOFF_HORIZON_MONTHS} months");
        (PayoffStatus::HorizonReached { remaining_balance }, None)
    } else {
        debug!("{strategy:?} payoff finished in {month} months");
        (PayoffStatus::PaidOff, add_months(start, month))
    };

    Ok(PayoffOutcome {
        strategy,
        months: month,
        total_interest,
        total_paid,
        payoff_date,
        status,
        debts: ledger,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyComparison {
    pub avalanche: PayoffOutcome,
    pub snowball: PayoffOutcome,
    /// Snowball interest minus avalanche interest.
    pub interest_difference: Money,
    pub recommended: PayoffStrategy,
}

pub fn compare_strategies(
    debts: &[Debt],
    extra_monthly_payment: Money,
    start: NaiveDate,
) -> Result<StrategyComparison> {
    let avalanche = simulate_payoff(debts, PayoffStrategy::Avalanche, extra_monthly_payment, start)?;
    let snowball = simulate_payoff(debts, PayoffStrategy::Snowball, extra_monthly_payment, start)?;
    let interest_difference = snowball.total_interest - avalanche.total_interest;
    let recommended = if interest_difference >= 0.0 {
        PayoffStrategy::Avalanche
    } else {
        PayoffStrategy::Snowball
    };
    Ok(StrategyComparison {
        avalanche,
        snowball,
        interest_difference,
        recommended,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::{prop_assert, proptest};

    const EPS: f64 = 1e-6;

    fn assert_approx_tol(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual}, tolerance {tol}"
        );
    }

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, 1).expect("valid date")
    }

    fn debt(name: &str, balance: f64, rate: f64, minimum: f64) -> Debt {
        Debt {
            name: name.to_string(),
            principal: balance,
            balance,
            annual_rate: rate,
            minimum_payment: minimum,
            remaining_term_months: None,
        }
    }

    #[test]
    fn ten_lakh_over_ten_years_recovers_full_principal() {
        let installment = annuity_payment(1_000_000.0, 0.10, 120).expect("valid");
        let schedule = generate_schedule(1_000_000.0, 0.10, 120, installment).expect("valid");
        assert_eq!(schedule.rows.len(), 120);
        assert_eq!(schedule.outcome, ScheduleOutcome::Repaid);
        assert_approx_tol(schedule.total_principal, 1_000_000.0, 0.01);
        assert_approx_tol(schedule.rows[0].interest_component, 8_333.333_333, 1e-3);
    }

    #[test]
    fn rounded_up_emi_clears_in_term_with_smaller_last_payment() {
        let installment = emi(1_000_000.0, 0.10, 120).expect("valid");
        assert_approx_tol(installment, 13_215.08, EPS);
        let schedule = generate_schedule(1_000_000.0, 0.10, 120, installment).expect("valid");
        assert_eq!(schedule.outcome, ScheduleOutcome::Repaid);
        let last = schedule.rows.last().expect("rows");
        assert!(last.installment <= installment);
        assert_approx_tol(schedule.total_principal, 1_000_000.0, 0.01);
    }

    #[test]
    fn final_period_absorbs_rounding_remainder() {
        // Truncated EMI leaves a few paise at the end of the term.
        let installment = (annuity_payment(1_000_000.0, 0.10, 120).expect("valid") * 100.0).floor() / 100.0;
        let schedule = generate_schedule(1_000_000.0, 0.10, 120, installment).expect("valid");
        assert_eq!(schedule.outcome, ScheduleOutcome::Repaid);
        assert_approx_tol(schedule.rows.last().expect("rows").balance, 0.0, EPS);
        assert_approx_tol(schedule.total_principal, 1_000_000.0, 0.01);
    }

    #[test]
    fn short_installment_leaves_outstanding_balance() {
        let schedule = generate_schedule(100_000.0, 0.12, 12, 5_000.0).expect("valid");
        assert_eq!(schedule.rows.len(), 12);
        assert!(matches!(
            schedule.outcome,
            ScheduleOutcome::OutstandingAtTermEnd { balance } if balance > 0.0
        ));
    }

    #[test]
    fn generous_installment_stops_early() {
        let schedule = generate_schedule(10_000.0, 0.0, 12, 5_000.0).expect("valid");
        assert_eq!(schedule.rows.len(), 2);
        assert_eq!(schedule.outcome, ScheduleOutcome::Repaid);
    }

    #[test]
    fn schedule_rejects_negative_principal() {
        assert!(generate_schedule(-1.0, 0.1, 12, 100.0).is_err());
        assert!(generate_schedule(1_000.0, 0.1, 0, 100.0).is_err());
    }

    #[test]
    fn generate_schedules_isolates_invalid_loans() {
        let loans = vec![
            LoanTerms {
                principal: 100_000.0,
                annual_rate: 0.09,
                term_months: 24,
                installment: None,
            },
            LoanTerms {
                principal: -5.0,
                annual_rate: 0.09,
                term_months: 24,
                installment: None,
            },
        ];
        let results = generate_schedules(&loans);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
    }

    #[test]
    fn prepayment_reduce_installment_keeps_term() {
        let installment = annuity_payment(1_000_000.0, 0.10, 120).expect("valid");
        let impact = prepayment_impact(
            1_000_000.0,
            0.10,
            120,
            installment,
            200_000.0,
            PrepaymentMode::ReduceInstallment,
        )
        .expect("valid");
        assert_eq!(impact.new_term, 120);
        assert_approx_tol(impact.new_installment, installment * 0.8, 1e-6);
        let original_interest = installment * 120.0 - 1_000_000.0;
        assert_approx_tol(impact.interest_saved, original_interest * 0.2, 1e-3);
        assert!(!impact.interest_not_covered);
    }

    #[test]
    fn prepayment_reduce_term_saves_more_interest() {
        let installment = annuity_payment(1_000_000.0, 0.10, 120).expect("valid");
        let term = prepayment_impact(
            1_000_000.0,
            0.10,
            120,
            installment,
            200_000.0,
            PrepaymentMode::ReduceTerm,
        )
        .expect("valid");
        let emi_cut = prepayment_impact(
            1_000_000.0,
            0.10,
            120,
            installment,
            200_000.0,
            PrepaymentMode::ReduceInstallment,
        )
        .expect("valid");
        assert_eq!(term.new_term, 85);
        assert_approx_tol(term.new_installment, installment, EPS);
        assert!(term.interest_saved > emi_cut.interest_saved);
    }

    #[test]
    fn prepayment_flags_installment_below_interest() {
        let impact = prepayment_impact(
            1_000_000.0,
            0.12,
            60,
            5_000.0,
            100_000.0,
            PrepaymentMode::ReduceTerm,
        )
        .expect("valid");
        assert!(impact.interest_not_covered);
        assert_eq!(impact.new_term, 60);
        assert!(impact.interest_saved.is_finite());
        assert!(impact.interest_saved >= 0.0);
    }

    #[test]
    fn prepayment_of_full_balance_closes_loan() {
        let impact = prepayment_impact(50_000.0, 0.1, 12, 5_000.0, 50_000.0, PrepaymentMode::ReduceTerm)
            .expect("valid");
        assert_eq!(impact.new_term, 0);
        assert_approx_tol(impact.new_installment, 0.0, EPS);
        assert_approx_tol(impact.interest_saved, 10_000.0, EPS);
    }

    #[test]
    fn prepayment_rejects_amount_above_balance() {
        assert!(
            prepayment_impact(1_000.0, 0.1, 12, 100.0, 2_000.0, PrepaymentMode::ReduceTerm).is_err()
        );
    }

    #[test]
    fn avalanche_interest_not_above_snowball_for_reference_debts() {
        let debts = vec![
            debt("card", 50_000.0, 0.24, 2_000.0),
            debt("loan", 200_000.0, 0.10, 4_000.0),
        ];
        let comparison = compare_strategies(&debts, 5_000.0, start()).expect("valid");
        assert!(comparison.avalanche.paid_off());
        assert!(comparison.snowball.paid_off());
        assert!(comparison.avalanche.total_interest <= comparison.snowball.total_interest + EPS);
        assert_eq!(comparison.recommended, PayoffStrategy::Avalanche);
    }

    #[test]
    fn avalanche_beats_snowball_when_orders_differ() {
        let debts = vec![
            debt("small low-rate", 30_000.0, 0.08, 1_000.0),
            debt("large high-rate", 150_000.0, 0.22, 3_000.0),
        ];
        let comparison = compare_strategies(&debts, 5_000.0, start()).expect("valid");
        assert_eq!(comparison.avalanche.debts[0].name, "large high-rate");
        assert_eq!(comparison.snowball.debts[0].name, "small low-rate");
        assert!(comparison.interest_difference > 0.0);
    }

    #[test]
    fn payoff_reports_horizon_when_minimums_never_clear_debt() {
        let debts = vec![debt("stuck", 100_000.0, 0.24, 1_000.0)];
        let outcome =
            simulate_payoff(&debts, PayoffStrategy::Avalanche, 0.0, start()).expect("valid");
        assert_eq!(outcome.months, PAYOFF_HORIZON_MONTHS);
        assert!(outcome.payoff_date.is_none());
        assert!(matches!(
            outcome.status,
            PayoffStatus::HorizonReached { remaining_balance } if remaining_balance > 0.0
        ));
    }

    #[test]
    fn payoff_never_overpays_and_dates_completion() {
        let debts = vec![debt("tiny", 1_000.0, 0.12, 600.0)];
        let outcome =
            simulate_payoff(&debts, PayoffStrategy::Snowball, 10_000.0, start()).expect("valid");
        assert_eq!(outcome.months, 1);
        assert_approx_tol(outcome.total_paid, 1_010.0, EPS);
        assert_eq!(outcome.payoff_date, NaiveDate::from_ymd_opt(2026, 2, 1));
        assert_eq!(outcome.debts[0].payoff_month, Some(1));
    }

    #[test]
    fn payoff_with_no_debts_finishes_immediately() {
        let outcome =
            simulate_payoff(&[], PayoffStrategy::Avalanche, 1_000.0, start()).expect("valid");
        assert_eq!(outcome.months, 0);
        assert!(outcome.paid_off());
        assert_eq!(outcome.payoff_date, Some(start()));
    }

    #[test]
    fn payoff_is_idempotent() {
        let debts = vec![
            debt("a", 80_000.0, 0.18, 3_000.0),
            debt("b", 40_000.0, 0.11, 1_500.0),
        ];
        let first = simulate_payoff(&debts, PayoffStrategy::Avalanche, 2_000.0, start()).expect("valid");
        let second = simulate_payoff(&debts, PayoffStrategy::Avalanche, 2_000.0, start()).expect("valid");
        assert_eq!(first, second);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(64))]

        #[test]
        fn prop_schedule_principal_sums_to_original(
            principal in 1_000u32..10_000_000,
            rate_bp in 0u32..3_000,
            term in 1u32..361
        ) {
            let principal = principal as f64;
            let rate = rate_bp as f64 / 10_000.0;
            let installment = annuity_payment(principal, rate, term).expect("valid");
            let schedule = generate_schedule(principal, rate, term, installment).expect("valid");
            prop_assert!(schedule.outcome == ScheduleOutcome::Repaid);
            prop_assert!((schedule.total_principal - principal).abs() <= 0.01);
            prop_assert!(schedule.rows.iter().all(|row| row.balance >= 0.0));
        }
    }
}
