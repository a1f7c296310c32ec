use chrono::{Datelike, Months, NaiveDate};

use super::error::{EngineError, Result};

/// Plain currency amount. Non-negative unless a field is documented as a delta.
pub type Money = f64;

const DIVISION_EPS: f64 = 1e-12;

pub fn round_money(value: Money) -> Money {
    (value * 100.0).round() / 100.0
}

pub fn round_rupee(value: Money) -> Money {
    value.round()
}

/// Division that refuses near-zero denominators instead of yielding inf/NaN.
pub fn safe_div(numerator: f64, denominator: f64) -> Option<f64> {
    if denominator.abs() <= DIVISION_EPS || !denominator.is_finite() {
        None
    } else {
        Some(numerator / denominator)
    }
}

pub fn percent_to_fraction(percent: f64) -> f64 {
    percent / 100.0
}

pub fn monthly_rate(annual_rate: f64) -> f64 {
    annual_rate / 12.0
}

/// Level installment that repays `principal` over `months` periods.
///
/// `installment = P·r·(1+r)^n / ((1+r)^n − 1)` with `r = annual_rate / 12`;
/// a zero rate degrades to straight-line repayment.
pub fn annuity_payment(principal: Money, annual_rate: f64, months: u32) -> Result<Money> {
    ensure_non_negative("principal", principal)?;
    ensure_non_negative("annual_rate", annual_rate)?;
    if months == 0 {
        return Err(EngineError::invalid("term_months", "must be > 0"));
    }
    if principal == 0.0 {
        return Ok(0.0);
    }

    let r = monthly_rate(annual_rate);
    let n = months as f64;
    if r.abs() < DIVISION_EPS {
        return Ok(principal / n);
    }

    let growth = (1.0 + r).powf(n);
    safe_div(principal * r * growth, growth - 1.0)
        .ok_or_else(|| EngineError::numerical("annuity_payment", "degenerate growth factor"))
}

/// Number of whole periods needed to clear `balance` at a fixed installment.
///
/// Returns `None` when the installment does not cover the first month's
/// interest, since the balance would never fall.
pub fn annuity_term(balance: Money, annual_rate: f64, installment: Money) -> Option<u32> {
    if balance <= 0.0 {
        return Some(0);
    }
    if installment <= 0.0 {
        return None;
    }

    let r = monthly_rate(annual_rate);
    if r.abs() < DIVISION_EPS {
        return Some((balance / installment).ceil() as u32);
    }

    let interest = balance * r;
    if installment <= interest {
        return None;
    }

    let n = (installment / (installment - interest)).ln() / (1.0 + r).ln();
    if !n.is_finite() {
        return None;
    }
    // Guard against ceil(59.9999999) style float noise pushing a term up by one.
    Some((n - 1e-9).ceil().max(1.0) as u32)
}

/// Value after `months` of monthly compounding with a contribution added
/// at the end of every month.
pub fn future_value(present: Money, monthly_contribution: Money, annual_rate: f64, months: u32) -> Money {
    let r = monthly_rate(annual_rate);
    let growth = (1.0 + r).powi(months as i32);
    let stream = if r.abs() < DIVISION_EPS {
        monthly_contribution * months as f64
    } else {
        monthly_contribution * (growth - 1.0) / r
    };
    present * growth + stream
}

/// Starting year of the April–March financial year containing `date`.
pub fn financial_year(date: NaiveDate) -> i32 {
    if date.month() >= 4 {
        date.year()
    } else {
        date.year() - 1
    }
}

pub fn add_months(date: NaiveDate, months: u32) -> Option<NaiveDate> {
    date.checked_add_months(Months::new(months))
}

pub fn ensure_finite(field: &'static str, value: f64) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(EngineError::invalid(field, "must be finite"))
    }
}

pub fn ensure_non_negative(field: &'static str, value: f64) -> Result<()> {
    ensure_finite(field, value)?;
    if value < 0.0 {
        return Err(EngineError::invalid(field, format!("must be >= 0, got {value}")));
    }
    Ok(())
}

pub fn ensure_positive(field: &'static str, value: f64) -> Result<()> {
    ensure_finite(field, value)?;
    if value <= 0.0 {
        return Err(EngineError::invalid(field, format!("must be > 0, got {value}")));
    }
    Ok(())
}

pub fn ensure_fraction(field: &'static str, value: f64) -> Result<()> {
    ensure_finite(field, value)?;
    if !(0.0..=1.0).contains(&value) {
        return Err(EngineError::invalid(
            field,
            format!("must be between 0 and 1, got {value}"),
        ));
    }
    Ok(())
}
