use serde::{Deserialize, Serialize};

use super::error::{EngineError, Result};
use super::primitives::{Money, annuity_term, ensure_fraction, ensure_non_negative};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IncomeKind {
    Salary,
    Business,
    Rental,
    Interest,
    Dividend,
    Pension,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomeStream {
    pub kind: IncomeKind,
    #[serde(alias = "annual_amount")]
    pub annual_amount: Money,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeductionKind {
    #[serde(rename = "80c")]
    Section80C,
    #[serde(rename = "80d")]
    Section80D,
    #[serde(rename = "80ccd-1b")]
    Section80Ccd1b,
    #[serde(rename = "80ccd-2")]
    Section80Ccd2,
    HomeLoanInterest,
    Hra,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimedDeduction {
    pub kind: DeductionKind,
    pub amount: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpenseCategory {
    pub name: String,
    #[serde(alias = "monthly_amount")]
    pub monthly_amount: Money,
    #[serde(default = "default_true")]
    pub essential: bool,
}

fn default_true() -> bool {
    true
}

/// A loan or credit line. `balance` is clamped at zero while simulating and a
/// debt with no balance is paid off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Debt {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub principal: Money,
    pub balance: Money,
    #[serde(alias = "annual_rate")]
    pub annual_rate: f64,
    #[serde(alias = "minimum_payment")]
    pub minimum_payment: Money,
    #[serde(default, alias = "remaining_term_months")]
    pub remaining_term_months: Option<u32>,
}

impl Debt {
    pub fn validate(&self) -> Result<()> {
        ensure_non_negative("debt.principal", self.principal)?;
        ensure_non_negative("debt.balance", self.balance)?;
        ensure_non_negative("debt.annual_rate", self.annual_rate)?;
        ensure_non_negative("debt.minimum_payment", self.minimum_payment)?;
        if self.annual_rate > 1.0 {
            return Err(EngineError::invalid(
                "debt.annual_rate",
                format!("must be a fraction, got {}", self.annual_rate),
            ));
        }
        Ok(())
    }

    pub fn is_paid_off(&self) -> bool {
        self.balance <= 0.0
    }

    /// Remaining term as recorded, otherwise solved from the minimum payment.
    pub fn months_remaining(&self) -> Option<u32> {
        self.remaining_term_months
            .or_else(|| annuity_term(self.balance, self.annual_rate, self.minimum_payment))
    }
}

/// Immutable picture of a user's finances handed over by the record-keeping
/// layer. The engine never mutates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinancialSnapshot {
    #[serde(alias = "current_age")]
    pub current_age: u32,
    #[serde(alias = "target_retirement_age")]
    pub target_retirement_age: u32,
    #[serde(alias = "monthly_income")]
    pub monthly_income: Money,
    #[serde(alias = "monthly_expenses")]
    pub monthly_expenses: Money,
    /// When present, the categories replace `monthly_expenses` as the total.
    #[serde(default, alias = "expense_categories")]
    pub expense_categories: Vec<ExpenseCategory>,
    #[serde(alias = "current_corpus")]
    pub current_corpus: Money,
    #[serde(default, alias = "emergency_fund")]
    pub emergency_fund: Money,
    /// Equity share of the corpus, 0–1. The rest is debt/fixed income.
    #[serde(alias = "equity_allocation")]
    pub equity_allocation: f64,
    #[serde(default)]
    pub debts: Vec<Debt>,
    #[serde(default, alias = "income_streams")]
    pub income_streams: Vec<IncomeStream>,
    #[serde(default)]
    pub deductions: Vec<ClaimedDeduction>,
}

impl FinancialSnapshot {
    pub fn validate(&self) -> Result<()> {
        if self.target_retirement_age < self.current_age {
            return Err(EngineError::invalid(
                "target_retirement_age",
                "must be >= current_age",
            ));
        }
        ensure_non_negative("monthly_income", self.monthly_income)?;
        ensure_non_negative("monthly_expenses", self.monthly_expenses)?;
        ensure_non_negative("current_corpus", self.current_corpus)?;
        ensure_non_negative("emergency_fund", self.emergency_fund)?;
        ensure_fraction("equity_allocation", self.equity_allocation)?;
        for category in &self.expense_categories {
            ensure_non_negative("expense_categories.monthly_amount", category.monthly_amount)?;
        }
        for stream in &self.income_streams {
            ensure_non_negative("income_streams.annual_amount", stream.annual_amount)?;
        }
        for deduction in &self.deductions {
            ensure_non_negative("deductions.amount", deduction.amount)?;
        }
        for debt in &self.debts {
            debt.validate()?;
        }
        Ok(())
    }

    pub fn total_monthly_expenses(&self) -> Money {
        if self.expense_categories.is_empty() {
            self.monthly_expenses
        } else {
            self.expense_categories.iter().map(|c| c.monthly_amount).sum()
        }
    }

    pub fn essential_monthly_expenses(&self) -> Money {
        if self.expense_categories.is_empty() {
            self.monthly_expenses
        } else {
            self.expense_categories
                .iter()
                .filter(|c| c.essential)
                .map(|c| c.monthly_amount)
                .sum()
        }
    }

    pub fn annual_expenses(&self) -> Money {
        self.total_monthly_expenses() * 12.0
    }

    /// Monthly income minus expenses and minimum debt payments. May be negative.
    pub fn monthly_surplus(&self) -> Money {
        self.monthly_income - self.total_monthly_expenses() - self.total_minimum_payments()
    }

    pub fn gross_annual_income(&self) -> Money {
        if self.income_streams.is_empty() {
            self.monthly_income * 12.0
        } else {
            self.income_streams.iter().map(|s| s.annual_amount).sum()
        }
    }

    pub fn years_to_retirement(&self) -> u32 {
        self.target_retirement_age.saturating_sub(self.current_age)
    }

    pub fn total_debt_balance(&self) -> Money {
        self.debts.iter().map(|d| d.balance.max(0.0)).sum()
    }

    /// Months until every open debt is cleared at its minimum payment, or
    /// `None` when some minimum never covers the interest.
    pub fn debt_free_months(&self) -> Option<u32> {
        self.debts
            .iter()
            .filter(|d| !d.is_paid_off())
            .map(Debt::months_remaining)
            .try_fold(0, |longest, months| months.map(|m| longest.max(m)))
    }

    pub fn total_minimum_payments(&self) -> Money {
        self.debts
            .iter()
            .filter(|d| !d.is_paid_off())
            .map(|d| d.minimum_payment)
            .sum()
    }
}
