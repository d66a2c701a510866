//! Annuity math for fixed-rate amortizing loans.
//!
//! `payment` follows the sign of `pv`: a debt expressed as a negative present value
//! yields a negative payment. `interest_portion` and `principal_portion` are
//! magnitudes, computed from a balance that is rolled forward period by period and
//! never allowed to go below zero.

use crate::error::{LedgerError, Result};
use crate::schema::PaymentTiming;
use serde::{Deserialize, Serialize};

/// Periodic payment (PMT) of a loan of `pv` over `nper` periods at `rate` per period.
///
/// `nper` must be strictly positive; callers validate the loan term first.
///
/// A debt given as a negative `pv` yields a negative payment, at zero rate too:
/// `payment(0.0, 120, -60_000.0, ..)` is `-500.0`.
pub fn payment(rate: f64, nper: u32, pv: f64, fv: f64, timing: PaymentTiming) -> f64 {
    let n = nper as f64;

    if rate == 0.0 {
        return (pv + fv) / n;
    }

    let factor = (1.0 + rate).powf(n);
    let pmt = (pv * rate * factor + fv * rate) / (factor - 1.0);

    match timing {
        PaymentTiming::End => pmt,
        PaymentTiming::Begin => pmt / (1.0 + rate),
    }
}

/// Interest part (IPMT) of the payment due for period `per`.
pub fn interest_portion(
    rate: f64,
    per: u32,
    nper: u32,
    pv: f64,
    fv: f64,
    timing: PaymentTiming,
) -> Result<f64> {
    Ok(period(rate, per, nper, pv, fv, timing)?.interest)
}

/// Principal part (PPMT) of the payment due for period `per`.
pub fn principal_portion(
    rate: f64,
    per: u32,
    nper: u32,
    pv: f64,
    fv: f64,
    timing: PaymentTiming,
) -> Result<f64> {
    Ok(period(rate, per, nper, pv, fv, timing)?.principal)
}

fn period(
    rate: f64,
    per: u32,
    nper: u32,
    pv: f64,
    fv: f64,
    timing: PaymentTiming,
) -> Result<AnnuityPeriod> {
    if per < 1 || per > nper {
        return Err(LedgerError::InvalidPeriod { per, nper });
    }

    periods(rate, nper, pv, fv, timing)
        .nth((per - 1) as usize)
        .ok_or(LedgerError::InvalidPeriod { per, nper })
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnnuityPeriod {
    pub per: u32,
    /// Outstanding balance on which the period's interest accrues.
    pub balance_start: f64,
    pub interest: f64,
    pub principal: f64,
    /// Magnitude of the level payment.
    pub payment: f64,
    /// Outstanding balance once the payment is applied, clamped at zero.
    pub balance_end: f64,
}

/// Walks the loan period by period. This is the single recurrence behind
/// `interest_portion`, `principal_portion` and the scheduler.
pub fn periods(rate: f64, nper: u32, pv: f64, fv: f64, timing: PaymentTiming) -> AnnuityPeriods {
    AnnuityPeriods {
        rate,
        nper,
        payment: payment(rate, nper, pv, fv, timing).abs(),
        timing,
        per: 0,
        balance: pv.abs(),
    }
}

#[derive(Debug, Clone)]
pub struct AnnuityPeriods {
    rate: f64,
    nper: u32,
    payment: f64,
    timing: PaymentTiming,
    per: u32,
    balance: f64,
}

impl Iterator for AnnuityPeriods {
    type Item = AnnuityPeriod;

    fn next(&mut self) -> Option<AnnuityPeriod> {
        if self.per >= self.nper {
            return None;
        }
        self.per += 1;

        let balance_start = self.balance;
        // An annuity due settles its first payment before any interest accrues.
        let interest = match self.timing {
            PaymentTiming::Begin if self.per == 1 => 0.0,
            _ => balance_start * self.rate,
        };
        let principal = self.payment - interest;
        self.balance = (balance_start + interest - self.payment).max(0.0);

        Some(AnnuityPeriod {
            per: self.per,
            balance_start,
            interest,
            principal,
            payment: self.payment,
            balance_end: self.balance,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.nper - self.per) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for AnnuityPeriods {}
