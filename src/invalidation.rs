//! Freshness contract of the cached tables.
//!
//! A cached row is either present (fresh) or absent (stale, recomputed on the next
//! read). Invalidation is deletion, performed in the same store transaction as the
//! source write that caused it. Reads go through [`InvalidationController::read_through`],
//! which recomputes missing rows and only stores them if no invalidation happened
//! in between.

use crate::error::{LedgerError, Result};
use crate::schema::PropertyId;
use crate::store::{CacheStore, CachedTable, LedgerStore, SourceData};
use log::{debug, info, warn};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum InvalidationScope {
    /// Transactions created, updated or deleted. `level_1_values` are the
    /// classifications touched (old and new); empty means unknown.
    Transaction {
        #[serde(default)]
        level_1_values: Vec<String>,
    },
    /// Any mapping table: category semantics changed, every year is stale.
    Mapping,
    /// Loan configuration or loan payments.
    Loan,
    /// Amortization types.
    Depreciation,
    /// Compte de résultat override of a year.
    Override,
    /// Bilan level-3 filter.
    BilanConfig,
    /// The property itself.
    Property,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Years {
    None,
    Only(BTreeSet<i32>),
    From(i32),
    All,
}

impl Years {
    fn only(years: Option<&[i32]>) -> Self {
        match years {
            Some(years) => Years::Only(years.iter().copied().collect()),
            None => Years::All,
        }
    }

    fn from_earliest(years: Option<&[i32]>) -> Self {
        match years.and_then(|years| years.iter().min().copied()) {
            Some(first) => Years::From(first),
            None if years.is_some() => Years::None,
            None => Years::All,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct InvalidationReport {
    pub property_id: PropertyId,
    pub amortization_entries_deleted: usize,
    pub compte_resultat_entries_deleted: usize,
    pub bilan_entries_deleted: usize,
}

impl InvalidationReport {
    pub fn total(&self) -> usize {
        self.amortization_entries_deleted
            + self.compte_resultat_entries_deleted
            + self.bilan_entries_deleted
    }
}

pub struct InvalidationController<'a, S: LedgerStore> {
    store: &'a S,
    retries: u32,
}

impl<'a, S: LedgerStore> InvalidationController<'a, S> {
    pub fn new(store: &'a S, retries: u32) -> Self {
        Self { store, retries }
    }

    /// Invalidates in a transaction of its own.
    pub fn invalidate(
        &self,
        property_id: PropertyId,
        affected_years: Option<&[i32]>,
        scope: &InvalidationScope,
    ) -> Result<InvalidationReport> {
        self.store.write(|tables| {
            if !tables.property_exists(property_id) {
                return Err(LedgerError::MissingProperty(property_id));
            }
            Ok(invalidate_in(tables, property_id, affected_years, scope))
        })
    }

    /// Returns the cached value, or computes it, stores it and returns it.
    ///
    /// `compute` runs under a read snapshot. The result is stored only if the
    /// property's generation is unchanged; otherwise the recompute is retried,
    /// and `StaleReadRace` is returned once the retries are exhausted.
    pub fn read_through<T>(
        &self,
        property_id: PropertyId,
        load: impl Fn(&S::Tables) -> Option<T>,
        compute: impl Fn(&S::Tables) -> Result<T>,
        save: impl Fn(&mut S::Tables, &T),
    ) -> Result<T> {
        for attempt in 0..=self.retries {
            let (generation, value) = match self.store.read(|tables| {
                if let Some(cached) = load(tables) {
                    return Ok(Err(cached));
                }
                Ok(Ok((tables.generation(property_id), compute(tables)?)))
            })? {
                Err(cached) => return Ok(cached),
                Ok(computed) => computed,
            };

            let stored = self.store.write(|tables| {
                if tables.generation(property_id) != generation {
                    return Ok(false);
                }
                save(tables, &value);
                Ok(true)
            })?;

            if stored {
                return Ok(value);
            }
            warn!(
                "Property {}: cache invalidated during recompute (attempt {}), retrying",
                property_id,
                attempt + 1
            );
        }

        Err(LedgerError::StaleReadRace(property_id))
    }
}

/// Deletes every cached row made stale by a change of `scope` touching
/// `affected_years` (all years when `None`). Meant to run inside the write
/// transaction of the source change.
pub fn invalidate_in<T: SourceData + CacheStore>(
    tables: &mut T,
    property_id: PropertyId,
    affected_years: Option<&[i32]>,
    scope: &InvalidationScope,
) -> InvalidationReport {
    let mut report = InvalidationReport {
        property_id,
        amortization_entries_deleted: 0,
        compte_resultat_entries_deleted: 0,
        bilan_entries_deleted: 0,
    };

    let (compte_resultat, bilan) = match scope {
        InvalidationScope::Transaction { level_1_values } => {
            let funded: Vec<u64> = tables
                .list_amortization_types(property_id)
                .into_iter()
                .filter(|t| {
                    level_1_values.is_empty()
                        || t.level_1_values.iter().any(|l| level_1_values.contains(l))
                })
                .map(|t| t.id)
                .collect();

            if funded.is_empty() {
                (Years::only(affected_years), Years::from_earliest(affected_years))
            } else {
                // The asset cost moved: its depreciation changes every year.
                report.amortization_entries_deleted =
                    tables.delete_amortization_results(property_id, &funded);
                (Years::All, Years::All)
            }
        }
        InvalidationScope::Loan => (
            Years::only(affected_years),
            Years::from_earliest(affected_years),
        ),
        InvalidationScope::Mapping
        | InvalidationScope::Depreciation
        | InvalidationScope::Property => {
            report.amortization_entries_deleted =
                tables.delete_cached_rows(property_id, CachedTable::AmortizationResults, None);
            (Years::All, Years::All)
        }
        // Overrides are applied when reading; only later bilans carry the result.
        InvalidationScope::Override => (Years::None, Years::from_earliest(affected_years)),
        InvalidationScope::BilanConfig => (Years::None, Years::All),
    };

    report.compte_resultat_entries_deleted =
        delete_years(tables, property_id, CachedTable::CompteResultatData, &compte_resultat);
    report.bilan_entries_deleted =
        delete_years(tables, property_id, CachedTable::BilanData, &bilan);

    info!(
        "Invalidated {} cached entries for property {} ({:?}, years {:?})",
        report.total(),
        property_id,
        scope,
        affected_years
    );
    report
}

fn delete_years<T: CacheStore>(
    tables: &mut T,
    property_id: PropertyId,
    table: CachedTable,
    years: &Years,
) -> usize {
    match years {
        Years::None => 0,
        Years::All => tables.delete_cached_rows(property_id, table, None),
        Years::Only(years) => {
            let years: Vec<i32> = years.iter().copied().collect();
            tables.delete_cached_rows(property_id, table, Some(years.as_slice()))
        }
        Years::From(first) => {
            let years: Vec<i32> = tables
                .cached_years(property_id, table)
                .into_iter()
                .filter(|y| y >= first)
                .collect();
            debug!("{:?}: dropping years {:?} for property {}", table, years, property_id);
            tables.delete_cached_rows(property_id, table, Some(years.as_slice()))
        }
    }
}
