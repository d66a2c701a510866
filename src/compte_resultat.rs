//! Yearly compte de résultat (income statement) of a property.
//!
//! Amounts are reported as positive figures on their own side: produits are the
//! sum of the mapped transactions, charges the negated sum (outflows are negative
//! on the bank statement). Special categories come from depreciation results and
//! loan payments.

use crate::schema::{
    AmortizationResult, CompteResultatData, CompteResultatMapping, CompteResultatOverride,
    CompteResultatType, PropertyId, ResultSource,
};
use crate::store::{CacheStore, SourceData};
use chrono::Datelike;
use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CompteResultatYear {
    pub year: i32,
    pub produits: BTreeMap<String, f64>,
    pub charges: BTreeMap<String, f64>,
    pub total_produits: f64,
    pub total_charges: f64,
    pub resultat_exploitation: f64,
    /// Result computed from the data, whether or not an override is set.
    pub resultat_exercice_calcule: f64,
    pub resultat_override: Option<f64>,
    /// Effective result: the override when present, the computed result otherwise.
    pub resultat_exercice: f64,
    pub rows: Vec<CompteResultatData>,
}

impl CompteResultatYear {
    pub fn assemble(
        year: i32,
        rows: Vec<CompteResultatData>,
        override_value: Option<&CompteResultatOverride>,
    ) -> Self {
        let mut produits = BTreeMap::new();
        let mut charges = BTreeMap::new();
        for row in &rows {
            let side = match row.category_type {
                CompteResultatType::Produits => &mut produits,
                CompteResultatType::Charges => &mut charges,
            };
            *side.entry(row.category_name.clone()).or_insert(0.0) += row.amount;
        }

        let total_produits: f64 = produits.values().sum();
        let total_charges: f64 = charges.values().sum();
        let resultat_exploitation = total_produits - total_charges;
        let resultat_override = override_value.map(|o| o.resultat_exercice);

        Self {
            year,
            produits,
            charges,
            total_produits,
            total_charges,
            resultat_exploitation,
            resultat_exercice_calcule: resultat_exploitation,
            resultat_override,
            resultat_exercice: resultat_override.unwrap_or(resultat_exploitation),
            rows,
        }
    }
}

/// Computes the rows of one year from source data. `depreciation` holds the
/// property's depreciation results (any years).
pub fn compute_rows<T: SourceData>(
    tables: &T,
    property_id: PropertyId,
    year: i32,
    depreciation: &[AmortizationResult],
) -> Vec<CompteResultatData> {
    tables
        .list_compte_resultat_mappings(property_id)
        .into_iter()
        .map(|mapping| {
            let amount = mapping_amount(tables, property_id, year, &mapping, depreciation);
            debug!(
                "Property {} {}: '{}' = {:.2}",
                property_id, year, mapping.category_name, amount
            );
            CompteResultatData {
                property_id,
                year,
                category_name: mapping.category_name,
                category_type: mapping.category_type,
                amount,
            }
        })
        .collect()
}

fn mapping_amount<T: SourceData>(
    tables: &T,
    property_id: PropertyId,
    year: i32,
    mapping: &CompteResultatMapping,
    depreciation: &[AmortizationResult],
) -> f64 {
    match mapping.special_source {
        Some(ResultSource::DepreciationCharges) => depreciation
            .iter()
            .filter(|r| r.property_id == property_id && r.year == year)
            .map(|r| r.amount)
            .sum(),
        Some(ResultSource::FinancingCost) => tables
            .list_loan_payments(property_id, None)
            .iter()
            .filter(|p| p.date.year() == year)
            .map(|p| p.interest + p.insurance)
            .sum(),
        None => {
            let sum: f64 = tables
                .list_transactions(property_id, Some(year), Some(mapping.level_1_values.as_slice()))
                .iter()
                .map(|t| t.amount)
                .sum();
            match mapping.category_type {
                CompteResultatType::Produits => sum,
                CompteResultatType::Charges => -sum,
            }
        }
    }
}

/// The year's statement from the cache when fresh, computed otherwise. Nothing is stored.
pub fn current_year<T: SourceData + CacheStore>(
    tables: &T,
    property_id: PropertyId,
    year: i32,
    depreciation: &[AmortizationResult],
) -> CompteResultatYear {
    let rows = tables
        .load_compte_resultat(property_id, year)
        .unwrap_or_else(|| compute_rows(tables, property_id, year, depreciation));
    CompteResultatYear::assemble(year, rows, tables.get_override(property_id, year).as_ref())
}

/// Effective result of the year, override included.
pub fn effective_result<T: SourceData + CacheStore>(
    tables: &T,
    property_id: PropertyId,
    year: i32,
    depreciation: &[AmortizationResult],
) -> f64 {
    current_year(tables, property_id, year, depreciation).resultat_exercice
}
