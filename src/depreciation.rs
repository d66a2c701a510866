use crate::config::{EngineConfig, ProrationPolicy};
use crate::error::{LedgerError, Result};
use crate::schema::{AmortizationResult, AmortizationType, PropertyId, Transaction};
use crate::store::{CacheStore, SourceData};
use crate::utils::remaining_year_fraction;
use chrono::{Datelike, NaiveDate};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Longest depreciation period accepted for an amortization type.
pub const MAX_DEPRECIATION_YEARS: u32 = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepreciationPlan {
    pub amortization_type_id: u64,
    /// Value being depreciated over the whole lifetime.
    pub total_cost: f64,
    pub annual_amount: f64,
    pub start_date: Option<NaiveDate>,
    pub yearly: BTreeMap<i32, f64>,
}

impl DepreciationPlan {
    pub fn to_results(&self, amortization_type: &AmortizationType) -> Vec<AmortizationResult> {
        self.yearly
            .iter()
            .map(|(&year, &amount)| AmortizationResult {
                property_id: amortization_type.property_id,
                amortization_type_id: amortization_type.id,
                year,
                amount,
            })
            .collect()
    }
}

pub struct DepreciationEngine {
    proration: ProrationPolicy,
}

impl DepreciationEngine {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            proration: config.depreciation_proration,
        }
    }

    fn funding<'a>(
        amortization_type: &'a AmortizationType,
        transactions: &'a [Transaction],
    ) -> impl Iterator<Item = &'a Transaction> + 'a {
        transactions.iter().filter(move |t| {
            t.property_id == amortization_type.property_id
                && amortization_type.level_1_values.contains(&t.level_1)
        })
    }

    /// Cost of the asset: the purchases booked under the type's level-1 values.
    /// Purchases are outflows, so the magnitude of their sum is used.
    pub fn total_cost(&self, amortization_type: &AmortizationType, transactions: &[Transaction]) -> f64 {
        Self::funding(amortization_type, transactions)
            .map(|t| t.amount)
            .sum::<f64>()
            .abs()
    }

    /// Duration must be within `1..=MAX_DEPRECIATION_YEARS`.
    pub fn validate(amortization_type: &AmortizationType) -> Result<()> {
        let duration = amortization_type.duration_years;
        if duration == 0 || duration > MAX_DEPRECIATION_YEARS {
            return Err(LedgerError::InvalidDepreciationDuration {
                name: amortization_type.name.clone(),
                duration,
            });
        }
        Ok(())
    }

    pub fn plan(
        &self,
        amortization_type: &AmortizationType,
        transactions: &[Transaction],
    ) -> Result<DepreciationPlan> {
        Self::validate(amortization_type)?;
        let duration = amortization_type.duration_years;

        let (annual_amount, total_cost) = match amortization_type.annual_amount {
            Some(annual) => (annual, annual * duration as f64),
            None => {
                let cost = self.total_cost(amortization_type, transactions);
                (cost / duration as f64, cost)
            }
        };

        let start_date = amortization_type.start_date.or_else(|| {
            Self::funding(amortization_type, transactions)
                .map(|t| t.date)
                .min()
        });

        let mut yearly = BTreeMap::new();
        if let Some(start) = start_date {
            if annual_amount != 0.0 {
                self.allocate(start, duration, annual_amount, &mut yearly)
                    .ok_or_else(|| LedgerError::InvalidDepreciationDuration {
                        name: amortization_type.name.clone(),
                        duration,
                    })?;
            }
        }

        debug!(
            "Amortization type '{}': cost {:.2}, {:.2}/year over {} years from {:?}",
            amortization_type.name, total_cost, annual_amount, duration, start_date
        );

        Ok(DepreciationPlan {
            amortization_type_id: amortization_type.id,
            total_cost,
            annual_amount,
            start_date,
            yearly,
        })
    }

    /// `None` when the last year of the plan is not representable.
    fn allocate(
        &self,
        start: NaiveDate,
        duration: u32,
        annual_amount: f64,
        yearly: &mut BTreeMap<i32, f64>,
    ) -> Option<()> {
        let first_year = start.year();
        let duration = i32::try_from(duration).ok()?;
        first_year.checked_add(duration)?;

        match self.proration {
            ProrationPolicy::FullYear => {
                for offset in 0..duration {
                    yearly.insert(first_year + offset, annual_amount);
                }
            }
            ProrationPolicy::DayProrated => {
                let fraction = remaining_year_fraction(start);
                let first = annual_amount * fraction;
                yearly.insert(first_year, first);
                for offset in 1..duration {
                    yearly.insert(first_year + offset, annual_amount);
                }
                if fraction < 1.0 {
                    yearly.insert(first_year + duration, annual_amount - first);
                }
            }
        }
        Some(())
    }

    /// Plans every type of a property. Types are processed in id order so the
    /// output does not depend on storage order.
    pub fn compute_all(
        &self,
        types: &[AmortizationType],
        transactions: &[Transaction],
    ) -> Result<BTreeMap<u64, Vec<AmortizationResult>>> {
        let mut results = BTreeMap::new();
        for amortization_type in types {
            let plan = self.plan(amortization_type, transactions)?;
            results.insert(amortization_type.id, plan.to_results(amortization_type));
        }
        Ok(results)
    }

    /// Results of the types that have no cached rows, keyed by type id.
    pub fn missing_results<T: SourceData + CacheStore>(
        &self,
        tables: &T,
        property_id: PropertyId,
    ) -> Result<BTreeMap<u64, Vec<AmortizationResult>>> {
        let stale: Vec<AmortizationType> = tables
            .list_amortization_types(property_id)
            .into_iter()
            .filter(|a| tables.load_amortization_results(property_id, a.id).is_none())
            .collect();
        if stale.is_empty() {
            return Ok(BTreeMap::new());
        }
        let transactions = tables.list_transactions(property_id, None, None);
        self.compute_all(&stale, &transactions)
    }

    /// Depreciation rows of every type of the property: cached rows where
    /// present, computed (and not stored) for the types that are stale.
    pub fn current_results<T: SourceData + CacheStore>(
        &self,
        tables: &T,
        property_id: PropertyId,
    ) -> Result<Vec<AmortizationResult>> {
        let mut computed = self.missing_results(tables, property_id)?;
        let mut rows = Vec::new();

        for amortization_type in tables.list_amortization_types(property_id) {
            match tables.load_amortization_results(property_id, amortization_type.id) {
                Some(cached) => rows.extend(cached),
                None => rows.extend(computed.remove(&amortization_type.id).unwrap_or_default()),
            }
        }
        Ok(rows)
    }
}
