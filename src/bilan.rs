//! Year-end bilan (balance sheet) of a property.
//!
//! Transaction-based categories are cumulative: every matching transaction booked
//! up to Dec 31 of the year counts. An ACTIF category reports the negated sum
//! (money spent on an asset), a PASSIF category the sum as booked. The totals are
//! not forced to balance; the difference is reported.

use crate::compte_resultat;
use crate::schema::{
    AmortizationResult, BilanConfig, BilanData, BilanMapping, BilanSource, BilanType, PropertyId,
};
use crate::store::{CacheStore, SourceData};
use chrono::Datelike;
use log::{debug, warn};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Absolute gap, in currency units, under which a bilan is reported as balanced.
pub const BALANCE_TOLERANCE: f64 = 0.01;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BilanLine {
    pub sub_category: String,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BilanYear {
    pub year: i32,
    pub actif: BTreeMap<String, BilanLine>,
    pub passif: BTreeMap<String, BilanLine>,
    pub actif_total: f64,
    pub passif_total: f64,
    /// `actif_total - passif_total`; zero for a balanced bilan.
    pub difference: f64,
    pub rows: Vec<BilanData>,
}

impl BilanYear {
    pub fn assemble(year: i32, rows: Vec<BilanData>) -> Self {
        let mut actif: BTreeMap<String, BilanLine> = BTreeMap::new();
        let mut passif: BTreeMap<String, BilanLine> = BTreeMap::new();

        for row in &rows {
            let side = match row.bilan_type {
                BilanType::Actif => &mut actif,
                BilanType::Passif => &mut passif,
            };
            side.entry(row.category_name.clone())
                .or_insert_with(|| BilanLine {
                    sub_category: row.sub_category.clone(),
                    amount: 0.0,
                })
                .amount += row.amount;
        }

        let actif_total: f64 = actif.values().map(|l| l.amount).sum();
        let passif_total: f64 = passif.values().map(|l| l.amount).sum();

        Self {
            year,
            actif,
            passif,
            actif_total,
            passif_total,
            difference: actif_total - passif_total,
            rows,
        }
    }

    pub fn is_balanced(&self, tolerance: f64) -> bool {
        self.difference.abs() <= tolerance
    }
}

/// Computes the rows of one year from source data, using cached compte de
/// résultat rows where fresh. `depreciation` holds the property's depreciation
/// results (any years).
pub fn compute_rows<T: SourceData + CacheStore>(
    tables: &T,
    property_id: PropertyId,
    year: i32,
    depreciation: &[AmortizationResult],
) -> Vec<BilanData> {
    let config = tables.get_bilan_config(property_id).unwrap_or(BilanConfig {
        property_id,
        level_3_values: Vec::new(),
    });

    tables
        .list_bilan_mappings(property_id)
        .into_iter()
        .map(|mapping| {
            let amount = match mapping.special_source {
                Some(source) => special_amount(tables, property_id, year, source, depreciation),
                None => transaction_amount(tables, property_id, year, &mapping, &config),
            };
            debug!(
                "Property {} bilan {}: '{}' = {:.2}",
                property_id, year, mapping.category_name, amount
            );
            BilanData {
                property_id,
                year,
                category_name: mapping.category_name,
                bilan_type: mapping.bilan_type,
                sub_category: mapping.sub_category,
                amount,
            }
        })
        .collect()
}

fn transaction_amount<T: SourceData>(
    tables: &T,
    property_id: PropertyId,
    year: i32,
    mapping: &BilanMapping,
    config: &BilanConfig,
) -> f64 {
    let sum: f64 = tables
        .list_transactions(property_id, None, Some(mapping.level_1_values.as_slice()))
        .iter()
        .filter(|t| t.year() <= year)
        .filter(|t| config.allows(t.level_3.as_deref()))
        .map(|t| t.amount)
        .sum();

    match mapping.bilan_type {
        BilanType::Actif => -sum,
        BilanType::Passif => sum,
    }
}

fn special_amount<T: SourceData + CacheStore>(
    tables: &T,
    property_id: PropertyId,
    year: i32,
    source: BilanSource,
    depreciation: &[AmortizationResult],
) -> f64 {
    match source {
        BilanSource::AccumulatedDepreciation => -depreciation
            .iter()
            .filter(|r| r.property_id == property_id && r.year <= year)
            .map(|r| r.amount)
            .sum::<f64>(),
        BilanSource::CashBalance => tables
            .list_transactions(property_id, None, None)
            .iter()
            .filter(|t| t.year() <= year)
            .map(|t| t.amount)
            .sum(),
        BilanSource::YearResult => {
            compte_resultat::effective_result(tables, property_id, year, depreciation)
        }
        BilanSource::RetainedEarnings => match first_activity_year(tables, property_id, depreciation) {
            Some(first) => (first..year)
                .map(|y| compte_resultat::effective_result(tables, property_id, y, depreciation))
                .sum(),
            None => 0.0,
        },
        BilanSource::OutstandingLoanCapital => outstanding_capital(tables, property_id, year),
    }
}

/// Earliest year with a transaction, a loan payment or a depreciation charge.
pub fn first_activity_year<T: SourceData>(
    tables: &T,
    property_id: PropertyId,
    depreciation: &[AmortizationResult],
) -> Option<i32> {
    let transactions = tables
        .list_transactions(property_id, None, None)
        .iter()
        .map(|t| t.year())
        .min();
    let payments = tables
        .list_loan_payments(property_id, None)
        .iter()
        .map(|p| p.date.year())
        .min();
    let charges = depreciation
        .iter()
        .filter(|r| r.property_id == property_id)
        .map(|r| r.year)
        .min();

    [transactions, payments, charges].into_iter().flatten().min()
}

/// Borrowed capital still due at the end of `year`, over the loans started by then.
fn outstanding_capital<T: SourceData>(tables: &T, property_id: PropertyId, year: i32) -> f64 {
    let payments = tables.list_loan_payments(property_id, None);

    tables
        .list_loan_configs(property_id)
        .iter()
        .filter(|loan| loan.start_date.map_or(true, |d| d.year() <= year))
        .map(|loan| {
            let repaid: f64 = payments
                .iter()
                .filter(|p| p.loan_config_id == loan.id && p.date.year() <= year)
                .map(|p| p.capital)
                .sum();
            if repaid > loan.credit_amount {
                warn!(
                    "Loan '{}' of property {}: {:.2} repaid exceeds the credit of {:.2}",
                    loan.name, property_id, repaid, loan.credit_amount
                );
            }
            (loan.credit_amount - repaid).max(0.0)
        })
        .sum()
}
