use crate::annuity;
use crate::config::EngineConfig;
use crate::error::{LedgerError, Result};
use crate::schema::{LoanConfig, LoanPayment, PaymentTiming};
use crate::utils::{add_months, elapsed_years, year_end};
use chrono::{Datelike, NaiveDate};
use log::{debug, warn};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Longest loan accepted, in years of amortization.
pub const MAX_LOAN_YEARS: u32 = 100;
/// Longest interest-only deferral accepted.
pub const MAX_DEFERRAL_MONTHS: u32 = 1_200;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LoanTerm {
    /// Interest-only months preceding the annuity.
    pub deferral_periods: u32,
    pub amortizing_periods: u32,
    pub monthly_rate: f64,
}

impl LoanTerm {
    pub fn total_periods(&self) -> u32 {
        self.deferral_periods.saturating_add(self.amortizing_periods)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum YearBasis {
    /// Periods are dated from the loan start date and grouped by calendar year.
    Calendar,
    /// No start date: year 1 is the first twelve periods of the loan.
    LoanYear,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SchedulePeriod {
    /// 1-based month of the loan, deferral included.
    pub period: u32,
    /// Position within the annuity, `None` during the deferral.
    pub annuity_period: Option<u32>,
    pub date: Option<NaiveDate>,
    pub year: i32,
    pub balance_start: f64,
    pub interest: f64,
    pub principal: f64,
    /// Level payment due for the period (interest only while deferred).
    pub payment: f64,
    pub insurance: f64,
    /// Cash actually paid: interest + principal + insurance.
    pub total: f64,
    pub balance_end: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct YearlyLoanSummary {
    pub capital: f64,
    pub interest: f64,
    pub insurance: f64,
    pub total: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleWarningKind {
    InterestExceedsPayment,
    PortionMismatch,
    DurationMismatch,
    SampleOutOfRange,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ScheduleWarning {
    pub kind: ScheduleWarningKind,
    pub period: Option<u32>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AmortizationSchedule {
    pub loan_config_id: u64,
    pub term: LoanTerm,
    /// Signed level payment of the annuity (negative: money paid out).
    pub payment: f64,
    pub year_basis: YearBasis,
    pub periods: Vec<SchedulePeriod>,
    pub yearly: BTreeMap<i32, YearlyLoanSummary>,
    pub sampled_interest: BTreeMap<u32, f64>,
    pub warnings: Vec<ScheduleWarning>,
}

impl AmortizationSchedule {
    pub fn total_interest(&self) -> f64 {
        self.periods.iter().map(|p| p.interest).sum()
    }

    pub fn total_capital(&self) -> f64 {
        self.periods.iter().map(|p| p.principal).sum()
    }

    pub fn total_paid(&self) -> f64 {
        self.periods.iter().map(|p| p.total).sum()
    }

    /// One payment row per calendar year, dated Dec 31, ready to be stored as
    /// the loan's payments. Needs a dated schedule.
    pub fn yearly_payments(&self, loan: &LoanConfig) -> Result<Vec<LoanPayment>> {
        if self.year_basis != YearBasis::Calendar {
            return Err(LedgerError::InvalidLoanConfig {
                loan: loan.name.clone(),
                details: "a start_date is required to turn a simulation into payments"
                    .to_string(),
            });
        }

        let mut payments = Vec::with_capacity(self.yearly.len());
        for (&year, summary) in &self.yearly {
            let date = year_end(year).ok_or_else(|| LedgerError::InvalidLoanConfig {
                loan: loan.name.clone(),
                details: format!("year {} is out of range", year),
            })?;
            payments.push(LoanPayment {
                id: 0,
                property_id: loan.property_id,
                loan_config_id: loan.id,
                date,
                capital: summary.capital,
                interest: summary.interest,
                insurance: summary.insurance,
                total: summary.total,
            });
        }
        Ok(payments)
    }
}

pub struct AmortizationScheduler {
    consistency_tolerance: f64,
    days_per_year: f64,
    duration_mismatch_tolerance_years: f64,
}

impl AmortizationScheduler {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            consistency_tolerance: config.consistency_tolerance,
            days_per_year: config.days_per_year,
            duration_mismatch_tolerance_years: config.duration_mismatch_tolerance_years,
        }
    }

    /// Checks the inputs, then the term they yield. Nothing is computed for a
    /// loan this rejects.
    pub fn validate(&self, loan: &LoanConfig) -> Result<()> {
        let invalid = |details: String| LedgerError::InvalidLoanConfig {
            loan: loan.name.clone(),
            details,
        };

        if !loan.credit_amount.is_finite() || loan.credit_amount <= 0.0 {
            return Err(invalid(format!(
                "credit_amount must be a positive amount, got {}",
                loan.credit_amount
            )));
        }
        if !loan.interest_rate.is_finite() || loan.interest_rate < 0.0 {
            return Err(invalid(format!(
                "interest_rate must be a non-negative percentage, got {}",
                loan.interest_rate
            )));
        }
        if !loan.monthly_insurance.is_finite() || loan.monthly_insurance < 0.0 {
            return Err(invalid(format!(
                "monthly_insurance must be non-negative, got {}",
                loan.monthly_insurance
            )));
        }
        if loan.duration_years > MAX_LOAN_YEARS {
            return Err(invalid(format!(
                "duration_years must be at most {}, got {}",
                MAX_LOAN_YEARS, loan.duration_years
            )));
        }
        if loan.initial_deferral_months > MAX_DEFERRAL_MONTHS {
            return Err(invalid(format!(
                "initial_deferral_months must be at most {}, got {}",
                MAX_DEFERRAL_MONTHS, loan.initial_deferral_months
            )));
        }
        match (loan.start_date, loan.end_date) {
            (Some(start), Some(end)) if end <= start => {
                return Err(invalid(format!(
                    "end_date {} is not after start_date {}",
                    end, start
                )))
            }
            (None, Some(_)) => {
                return Err(invalid("end_date given without start_date".to_string()))
            }
            _ => {}
        }

        self.loan_term(loan).map(|_| ())
    }

    pub fn loan_term(&self, loan: &LoanConfig) -> Result<LoanTerm> {
        let deferral_years = loan.initial_deferral_months as f64 / 12.0;

        let amortizing = match (loan.start_date, loan.end_date) {
            (Some(start), Some(end)) => {
                let elapsed = elapsed_years(start, end, self.days_per_year);
                let nper = (elapsed - deferral_years) * 12.0;
                let max_periods = (MAX_LOAN_YEARS * 12) as f64;
                if nper <= 0.0 || nper.round() < 1.0 || nper.round() > max_periods {
                    return Err(LedgerError::InvalidLoanDuration {
                        periods: nper,
                        details: format!(
                            "{:.2} years between {} and {} minus {} deferral months",
                            elapsed, start, end, loan.initial_deferral_months
                        ),
                    });
                }
                nper.round() as u32
            }
            _ => {
                let nper = loan
                    .duration_years
                    .checked_mul(12)
                    .filter(|&n| n > 0 && loan.duration_years <= MAX_LOAN_YEARS);
                match nper {
                    Some(nper) => nper,
                    None => {
                        return Err(LedgerError::InvalidLoanDuration {
                            periods: loan.duration_years as f64 * 12.0,
                            details: format!("duration of {} years", loan.duration_years),
                        })
                    }
                }
            }
        };

        Ok(LoanTerm {
            deferral_periods: loan.initial_deferral_months,
            amortizing_periods: amortizing,
            monthly_rate: loan.interest_rate / 100.0 / 12.0,
        })
    }

    pub fn compute(&self, loan: &LoanConfig) -> Result<AmortizationSchedule> {
        self.validate(loan)?;
        let term = self.loan_term(loan)?;
        let mut warnings = Vec::new();

        if let (Some(start), Some(end)) = (loan.start_date, loan.end_date) {
            let span = elapsed_years(start, end, self.days_per_year)
                - loan.initial_deferral_months as f64 / 12.0;
            if (span - loan.duration_years as f64).abs() > self.duration_mismatch_tolerance_years {
                warnings.push(ScheduleWarning {
                    kind: ScheduleWarningKind::DurationMismatch,
                    period: None,
                    message: format!(
                        "dates cover {:.2} amortization years but duration_years is {}",
                        span, loan.duration_years
                    ),
                });
            }
        }

        let year_basis = if loan.start_date.is_some() {
            YearBasis::Calendar
        } else {
            YearBasis::LoanYear
        };

        let rate = term.monthly_rate;
        let pv = -loan.credit_amount;
        let level_payment =
            annuity::payment(rate, term.amortizing_periods, pv, 0.0, PaymentTiming::End);

        let mut periods = Vec::with_capacity(term.total_periods() as usize);

        for month in 1..=term.deferral_periods {
            let interest = loan.credit_amount * rate;
            let (date, year) = self.period_date(loan, month)?;
            periods.push(SchedulePeriod {
                period: month,
                annuity_period: None,
                date,
                year,
                balance_start: loan.credit_amount,
                interest,
                principal: 0.0,
                payment: interest,
                insurance: loan.monthly_insurance,
                total: interest + loan.monthly_insurance,
                balance_end: loan.credit_amount,
            });
        }

        for step in annuity::periods(rate, term.amortizing_periods, pv, 0.0, PaymentTiming::End) {
            let month = term.deferral_periods + step.per;
            let (date, year) = self.period_date(loan, month)?;

            // The last period settles whatever rounding left on the balance.
            let (principal, balance_end) = if step.per == term.amortizing_periods {
                (step.balance_start, 0.0)
            } else {
                (step.principal, step.balance_end)
            };

            self.check_consistency(month, step.interest, principal, step.payment, &mut warnings);

            periods.push(SchedulePeriod {
                period: month,
                annuity_period: Some(step.per),
                date,
                year,
                balance_start: step.balance_start,
                interest: step.interest,
                principal,
                payment: step.payment,
                insurance: loan.monthly_insurance,
                total: step.interest + principal + loan.monthly_insurance,
                balance_end,
            });
        }

        let mut yearly: BTreeMap<i32, YearlyLoanSummary> = BTreeMap::new();
        for period in &periods {
            let summary = yearly.entry(period.year).or_default();
            summary.capital += period.principal;
            summary.interest += period.interest;
            summary.insurance += period.insurance;
            summary.total += period.total;
        }

        let mut sampled_interest = BTreeMap::new();
        for &month in &loan.interest_sample_months {
            match periods.get((month as usize).wrapping_sub(1)) {
                Some(period) if month >= 1 => {
                    sampled_interest.insert(month, period.interest);
                }
                _ => warnings.push(ScheduleWarning {
                    kind: ScheduleWarningKind::SampleOutOfRange,
                    period: Some(month),
                    message: LedgerError::InvalidPeriod {
                        per: month,
                        nper: term.total_periods(),
                    }
                    .to_string(),
                }),
            }
        }

        for warning in &warnings {
            warn!("Loan '{}' ({}): {}", loan.name, loan.id, warning.message);
        }
        debug!(
            "Loan '{}' scheduled over {} periods ({} deferred), payment {:.2}",
            loan.name,
            term.total_periods(),
            term.deferral_periods,
            level_payment
        );

        Ok(AmortizationSchedule {
            loan_config_id: loan.id,
            term,
            payment: level_payment,
            year_basis,
            periods,
            yearly,
            sampled_interest,
            warnings,
        })
    }

    fn period_date(&self, loan: &LoanConfig, month: u32) -> Result<(Option<NaiveDate>, i32)> {
        match loan.start_date {
            Some(start) => {
                let date = add_months(start, month).ok_or_else(|| {
                    LedgerError::InvalidLoanConfig {
                        loan: loan.name.clone(),
                        details: format!("period {} falls outside the supported date range", month),
                    }
                })?;
                Ok((Some(date), date.year()))
            }
            None => Ok((None, ((month - 1) / 12 + 1) as i32)),
        }
    }

    fn check_consistency(
        &self,
        month: u32,
        interest: f64,
        principal: f64,
        payment: f64,
        warnings: &mut Vec<ScheduleWarning>,
    ) {
        if interest > payment {
            warnings.push(ScheduleWarning {
                kind: ScheduleWarningKind::InterestExceedsPayment,
                period: Some(month),
                message: format!(
                    "period {}: interest {:.2} exceeds payment {:.2}",
                    month, interest, payment
                ),
            });
        }

        let gap = (interest + principal - payment).abs();
        if gap > self.consistency_tolerance * payment.abs() {
            warnings.push(ScheduleWarning {
                kind: ScheduleWarningKind::PortionMismatch,
                period: Some(month),
                message: format!(
                    "period {}: interest {:.2} + principal {:.2} is {:.2} away from payment {:.2}",
                    month, interest, principal, gap, payment
                ),
            });
        }
    }
}

pub fn compute_amortization_schedule(
    loan: &LoanConfig,
    config: &EngineConfig,
) -> Result<AmortizationSchedule> {
    AmortizationScheduler::new(config).compute(loan)
}
