use crate::bilan::{self, BilanYear};
use crate::compte_resultat::{self, CompteResultatYear};
use crate::config::EngineConfig;
use crate::depreciation::DepreciationEngine;
use crate::error::{LedgerError, Result};
use crate::invalidation::{invalidate_in, InvalidationController, InvalidationReport, InvalidationScope};
use crate::scheduler::{AmortizationSchedule, AmortizationScheduler};
use crate::schema::*;
use crate::store::{CacheStore, CachedTable, LedgerStore, SourceData, SourceWrite};
use chrono::Datelike;
use log::{debug, info};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DepreciationSummary {
    pub property_id: PropertyId,
    pub types_processed: usize,
    pub rows_written: usize,
    /// Whether any stored result differed from the recomputed one.
    pub changed: bool,
}

/// Entry point of the engine for one store: computations, cached statements
/// and every source mutation together with the invalidation it triggers.
pub struct PropertyLedger<S: LedgerStore> {
    store: S,
    config: EngineConfig,
}

impl<S: LedgerStore> PropertyLedger<S> {
    pub fn new(store: S, config: EngineConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn controller(&self) -> InvalidationController<'_, S> {
        InvalidationController::new(&self.store, self.config.stale_read_retries)
    }

    fn read_for<R>(
        &self,
        property_id: PropertyId,
        f: impl FnOnce(&S::Tables) -> Result<R>,
    ) -> Result<R> {
        self.store.read(|tables| {
            ensure_property(tables, property_id)?;
            f(tables)
        })
    }

    fn write_for<R>(
        &self,
        property_id: PropertyId,
        f: impl FnOnce(&mut S::Tables) -> Result<R>,
    ) -> Result<R> {
        self.store.write(|tables| {
            ensure_property(tables, property_id)?;
            f(tables)
        })
    }

    // Computations

    pub fn compute_amortization_schedule(&self, loan: &LoanConfig) -> Result<AmortizationSchedule> {
        AmortizationScheduler::new(&self.config).compute(loan)
    }

    /// Schedule of a stored loan.
    pub fn simulate_loan(&self, property_id: PropertyId, loan_id: u64) -> Result<AmortizationSchedule> {
        let loan = self.read_for(property_id, |t| t.get_loan_config(property_id, loan_id))?;
        self.compute_amortization_schedule(&loan)
    }

    /// Replaces the loan's payments with the yearly totals of its simulated
    /// schedule.
    pub fn save_simulated_payments(
        &self,
        property_id: PropertyId,
        loan_id: u64,
    ) -> Result<Vec<LoanPayment>> {
        let scheduler = AmortizationScheduler::new(&self.config);

        let saved = self.write_for(property_id, |tables| {
            let loan = tables.get_loan_config(property_id, loan_id)?;
            let payments = scheduler.compute(&loan)?.yearly_payments(&loan)?;

            let mut years = BTreeSet::new();
            for previous in tables.list_loan_payments(property_id, Some(loan_id)) {
                years.insert(previous.date.year());
                tables.delete_loan_payment(property_id, previous.id)?;
            }

            let mut saved = Vec::with_capacity(payments.len());
            for payment in payments {
                years.insert(payment.date.year());
                saved.push(tables.upsert_loan_payment(payment)?.0);
            }

            let years: Vec<i32> = years.into_iter().collect();
            invalidate_in(tables, property_id, Some(years.as_slice()), &InvalidationScope::Loan);
            Ok(saved)
        })?;

        info!(
            "Saved {} simulated payments for loan {} of property {}",
            saved.len(),
            loan_id,
            property_id
        );
        Ok(saved)
    }

    /// Recomputes and stores the depreciation results of every amortization
    /// type of the property. Statements are invalidated only when a result changed.
    pub fn recompute_depreciation(&self, property_id: PropertyId) -> Result<DepreciationSummary> {
        let engine = DepreciationEngine::new(&self.config);

        let summary = self.write_for(property_id, |tables| {
            let types = tables.list_amortization_types(property_id);
            let transactions = tables.list_transactions(property_id, None, None);
            let results = engine.compute_all(&types, &transactions)?;

            let changed = results.iter().any(|(&type_id, rows)| {
                tables.load_amortization_results(property_id, type_id).as_ref() != Some(rows)
            });
            if changed {
                tables.delete_cached_rows(property_id, CachedTable::CompteResultatData, None);
                tables.delete_cached_rows(property_id, CachedTable::BilanData, None);
            }

            let mut rows_written = 0;
            for (type_id, rows) in results {
                rows_written += rows.len();
                tables.replace_amortization_results(property_id, type_id, rows);
            }

            Ok(DepreciationSummary {
                property_id,
                types_processed: types.len(),
                rows_written,
                changed,
            })
        })?;

        info!(
            "Recomputed depreciation for property {}: {} types, {} rows{}",
            property_id,
            summary.types_processed,
            summary.rows_written,
            if summary.changed { "" } else { " (unchanged)" }
        );
        Ok(summary)
    }

    /// Computes and caches the results of every amortization type that has no
    /// cached rows. Returns how many types were filled.
    fn refresh_depreciation(&self, property_id: PropertyId) -> Result<usize> {
        let engine = DepreciationEngine::new(&self.config);
        let filled = self.controller().read_through(
            property_id,
            |t| {
                let types = t.list_amortization_types(property_id);
                types
                    .iter()
                    .all(|a| t.load_amortization_results(property_id, a.id).is_some())
                    .then(BTreeMap::new)
            },
            |t| {
                ensure_property(t, property_id)?;
                engine.missing_results(t, property_id)
            },
            |t, results| {
                for (&type_id, rows) in results {
                    t.replace_amortization_results(property_id, type_id, rows.clone());
                }
            },
        )?;

        if !filled.is_empty() {
            debug!(
                "Cached depreciation of {} amortization types for property {}",
                filled.len(),
                property_id
            );
        }
        Ok(filled.len())
    }

    pub fn calculate_compte_resultat(
        &self,
        property_id: PropertyId,
        years: &[i32],
    ) -> Result<BTreeMap<i32, CompteResultatYear>> {
        self.read_for(property_id, |_| Ok(()))?;
        self.refresh_depreciation(property_id)?;
        let engine = DepreciationEngine::new(&self.config);
        let controller = self.controller();

        let mut statements = BTreeMap::new();
        for year in years.iter().copied().collect::<BTreeSet<_>>() {
            let statement = controller.read_through(
                property_id,
                |t| {
                    t.load_compte_resultat(property_id, year).map(|rows| {
                        CompteResultatYear::assemble(
                            year,
                            rows,
                            t.get_override(property_id, year).as_ref(),
                        )
                    })
                },
                |t| {
                    ensure_property(t, property_id)?;
                    let depreciation = engine.current_results(t, property_id)?;
                    let rows = compte_resultat::compute_rows(t, property_id, year, &depreciation);
                    Ok(CompteResultatYear::assemble(
                        year,
                        rows,
                        t.get_override(property_id, year).as_ref(),
                    ))
                },
                |t, statement| {
                    t.store_compte_resultat(property_id, year, statement.rows.clone())
                },
            )?;
            statements.insert(year, statement);
        }

        debug!(
            "Compte de résultat of property {} for years {:?}",
            property_id,
            statements.keys().collect::<Vec<_>>()
        );
        Ok(statements)
    }

    pub fn calculate_bilan(
        &self,
        property_id: PropertyId,
        years: &[i32],
    ) -> Result<BTreeMap<i32, BilanYear>> {
        self.read_for(property_id, |_| Ok(()))?;
        self.refresh_depreciation(property_id)?;
        let engine = DepreciationEngine::new(&self.config);
        let controller = self.controller();

        let mut statements = BTreeMap::new();
        for year in years.iter().copied().collect::<BTreeSet<_>>() {
            let statement = controller.read_through(
                property_id,
                |t| {
                    t.load_bilan(property_id, year)
                        .map(|rows| BilanYear::assemble(year, rows))
                },
                |t| {
                    ensure_property(t, property_id)?;
                    let depreciation = engine.current_results(t, property_id)?;
                    let rows = bilan::compute_rows(t, property_id, year, &depreciation);
                    Ok(BilanYear::assemble(year, rows))
                },
                |t, statement| t.store_bilan(property_id, year, statement.rows.clone()),
            )?;

            if !statement.is_balanced(bilan::BALANCE_TOLERANCE) {
                info!(
                    "Bilan {} of property {} is off by {:.2} (actif {:.2}, passif {:.2})",
                    year,
                    property_id,
                    statement.difference,
                    statement.actif_total,
                    statement.passif_total
                );
            }
            statements.insert(year, statement);
        }
        Ok(statements)
    }

    pub fn invalidate(
        &self,
        property_id: PropertyId,
        affected_years: Option<&[i32]>,
        scope: &InvalidationScope,
    ) -> Result<InvalidationReport> {
        self.controller().invalidate(property_id, affected_years, scope)
    }

    // Mutations

    pub fn create_property(&self, name: &str) -> Result<Property> {
        let property = self.store.write(|tables| Ok(tables.insert_property(name)))?;
        info!("Created property {} '{}'", property.id, property.name);
        Ok(property)
    }

    pub fn delete_property(&self, property_id: PropertyId) -> Result<Property> {
        self.write_for(property_id, |tables| {
            invalidate_in(tables, property_id, None, &InvalidationScope::Property);
            tables.delete_property(property_id)
        })
    }

    /// Inserts (`id == 0`) or updates a transaction. The years and level-1
    /// values of both the previous and the new version are invalidated.
    pub fn upsert_transaction(&self, transaction: Transaction) -> Result<Transaction> {
        let property_id = transaction.property_id;
        self.write_for(property_id, |tables| {
            let (saved, previous) = tables.upsert_transaction(transaction)?;
            let touched: Vec<&Transaction> = std::iter::once(&saved).chain(previous.as_ref()).collect();
            invalidate_transactions(tables, property_id, &touched);
            Ok(saved)
        })
    }

    pub fn delete_transaction(&self, property_id: PropertyId, id: u64) -> Result<Transaction> {
        self.write_for(property_id, |tables| {
            let removed = tables.delete_transaction(property_id, id)?;
            invalidate_transactions(tables, property_id, &[&removed]);
            Ok(removed)
        })
    }

    /// Validated before anything is written, loan term included.
    pub fn upsert_loan_config(&self, loan: LoanConfig) -> Result<LoanConfig> {
        AmortizationScheduler::new(&self.config).validate(&loan)?;
        let property_id = loan.property_id;
        self.write_for(property_id, |tables| {
            let (saved, _) = tables.upsert_loan_config(loan)?;
            invalidate_in(tables, property_id, None, &InvalidationScope::Loan);
            Ok(saved)
        })
    }

    /// Deletes the loan together with its payments.
    pub fn delete_loan_config(&self, property_id: PropertyId, id: u64) -> Result<LoanConfig> {
        self.write_for(property_id, |tables| {
            let (loan, payments) = tables.delete_loan_config(property_id, id)?;
            debug!("Loan {} removed with {} payments", id, payments.len());
            invalidate_in(tables, property_id, None, &InvalidationScope::Loan);
            Ok(loan)
        })
    }

    pub fn upsert_loan_payment(&self, payment: LoanPayment) -> Result<LoanPayment> {
        let property_id = payment.property_id;
        self.write_for(property_id, |tables| {
            let (saved, previous) = tables.upsert_loan_payment(payment)?;
            let years: Vec<i32> = std::iter::once(saved.date.year())
                .chain(previous.map(|p| p.date.year()))
                .collect();
            invalidate_in(tables, property_id, Some(years.as_slice()), &InvalidationScope::Loan);
            Ok(saved)
        })
    }

    pub fn delete_loan_payment(&self, property_id: PropertyId, id: u64) -> Result<LoanPayment> {
        self.write_for(property_id, |tables| {
            let removed = tables.delete_loan_payment(property_id, id)?;
            invalidate_in(
                tables,
                property_id,
                Some(&[removed.date.year()][..]),
                &InvalidationScope::Loan,
            );
            Ok(removed)
        })
    }

    pub fn upsert_amortization_type(
        &self,
        amortization_type: AmortizationType,
    ) -> Result<AmortizationType> {
        DepreciationEngine::validate(&amortization_type)?;
        let property_id = amortization_type.property_id;
        self.write_for(property_id, |tables| {
            let (saved, _) = tables.upsert_amortization_type(amortization_type)?;
            invalidate_in(tables, property_id, None, &InvalidationScope::Depreciation);
            Ok(saved)
        })
    }

    pub fn delete_amortization_type(
        &self,
        property_id: PropertyId,
        id: u64,
    ) -> Result<AmortizationType> {
        self.write_for(property_id, |tables| {
            let removed = tables.delete_amortization_type(property_id, id)?;
            invalidate_in(tables, property_id, None, &InvalidationScope::Depreciation);
            Ok(removed)
        })
    }

    pub fn upsert_compte_resultat_mapping(
        &self,
        mapping: CompteResultatMapping,
    ) -> Result<CompteResultatMapping> {
        let property_id = mapping.property_id;
        self.write_for(property_id, |tables| {
            let (saved, _) = tables.upsert_compte_resultat_mapping(mapping)?;
            invalidate_in(tables, property_id, None, &InvalidationScope::Mapping);
            Ok(saved)
        })
    }

    pub fn delete_compte_resultat_mapping(
        &self,
        property_id: PropertyId,
        id: u64,
    ) -> Result<CompteResultatMapping> {
        self.write_for(property_id, |tables| {
            let removed = tables.delete_compte_resultat_mapping(property_id, id)?;
            invalidate_in(tables, property_id, None, &InvalidationScope::Mapping);
            Ok(removed)
        })
    }

    pub fn upsert_bilan_mapping(&self, mapping: BilanMapping) -> Result<BilanMapping> {
        let property_id = mapping.property_id;
        self.write_for(property_id, |tables| {
            let (saved, _) = tables.upsert_bilan_mapping(mapping)?;
            invalidate_in(tables, property_id, None, &InvalidationScope::Mapping);
            Ok(saved)
        })
    }

    pub fn delete_bilan_mapping(&self, property_id: PropertyId, id: u64) -> Result<BilanMapping> {
        self.write_for(property_id, |tables| {
            let removed = tables.delete_bilan_mapping(property_id, id)?;
            invalidate_in(tables, property_id, None, &InvalidationScope::Mapping);
            Ok(removed)
        })
    }

    pub fn set_bilan_config(&self, config: BilanConfig) -> Result<Option<BilanConfig>> {
        let property_id = config.property_id;
        self.write_for(property_id, |tables| {
            let previous = tables.set_bilan_config(config)?;
            invalidate_in(tables, property_id, None, &InvalidationScope::BilanConfig);
            Ok(previous)
        })
    }

    pub fn set_override(
        &self,
        value: CompteResultatOverride,
    ) -> Result<Option<CompteResultatOverride>> {
        let (property_id, year) = (value.property_id, value.year);
        self.write_for(property_id, |tables| {
            let previous = tables.set_override(value)?;
            invalidate_in(tables, property_id, Some(&[year][..]), &InvalidationScope::Override);
            Ok(previous)
        })
    }

    pub fn clear_override(
        &self,
        property_id: PropertyId,
        year: i32,
    ) -> Result<Option<CompteResultatOverride>> {
        self.write_for(property_id, |tables| {
            let previous = tables.clear_override(property_id, year)?;
            if previous.is_some() {
                invalidate_in(tables, property_id, Some(&[year][..]), &InvalidationScope::Override);
            }
            Ok(previous)
        })
    }
}

fn ensure_property<T: SourceData>(tables: &T, property_id: PropertyId) -> Result<()> {
    if tables.property_exists(property_id) {
        Ok(())
    } else {
        Err(LedgerError::MissingProperty(property_id))
    }
}

fn invalidate_transactions<T: SourceData + CacheStore>(
    tables: &mut T,
    property_id: PropertyId,
    touched: &[&Transaction],
) {
    let years: Vec<i32> = touched
        .iter()
        .map(|t| t.year())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let level_1_values: Vec<String> = touched
        .iter()
        .map(|t| t.level_1.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    invalidate_in(
        tables,
        property_id,
        Some(years.as_slice()),
        &InvalidationScope::Transaction { level_1_values },
    );
}
