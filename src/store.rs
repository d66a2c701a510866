//! Data-access interface of the engine and its in-memory implementation.
//!
//! `SourceData` and `SourceWrite` cover the persisted source tables, `CacheStore`
//! the derived tables. `LedgerStore` hands out read access and transactional write
//! access: everything done inside one `write` closure commits together or not at all.

use crate::error::{LedgerError, Result};
use crate::schema::*;
use chrono::Datelike;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachedTable {
    AmortizationResults,
    CompteResultatData,
    BilanData,
}

pub trait SourceData {
    fn property_exists(&self, property_id: PropertyId) -> bool;

    fn list_transactions(
        &self,
        property_id: PropertyId,
        year: Option<i32>,
        level_1_filter: Option<&[String]>,
    ) -> Vec<Transaction>;

    fn get_transaction(&self, property_id: PropertyId, id: u64) -> Result<Transaction>;

    fn get_loan_config(&self, property_id: PropertyId, id: u64) -> Result<LoanConfig>;

    fn list_loan_configs(&self, property_id: PropertyId) -> Vec<LoanConfig>;

    /// Payments of one loan, or of every loan of the property when `loan_config_id` is `None`.
    fn list_loan_payments(
        &self,
        property_id: PropertyId,
        loan_config_id: Option<u64>,
    ) -> Vec<LoanPayment>;

    fn list_amortization_types(&self, property_id: PropertyId) -> Vec<AmortizationType>;

    fn list_compte_resultat_mappings(&self, property_id: PropertyId) -> Vec<CompteResultatMapping>;

    fn list_bilan_mappings(&self, property_id: PropertyId) -> Vec<BilanMapping>;

    fn get_bilan_config(&self, property_id: PropertyId) -> Option<BilanConfig>;

    fn get_override(&self, property_id: PropertyId, year: i32) -> Option<CompteResultatOverride>;
}

/// Source mutations. Entities with `id == 0` are inserted under a fresh id;
/// otherwise the existing row of the same property is replaced and returned.
pub trait SourceWrite {
    fn insert_property(&mut self, name: &str) -> Property;

    fn delete_property(&mut self, property_id: PropertyId) -> Result<Property>;

    fn upsert_transaction(
        &mut self,
        transaction: Transaction,
    ) -> Result<(Transaction, Option<Transaction>)>;

    fn delete_transaction(&mut self, property_id: PropertyId, id: u64) -> Result<Transaction>;

    fn upsert_loan_config(&mut self, loan: LoanConfig)
        -> Result<(LoanConfig, Option<LoanConfig>)>;

    /// Removes the loan and, by cascade, its payments.
    fn delete_loan_config(
        &mut self,
        property_id: PropertyId,
        id: u64,
    ) -> Result<(LoanConfig, Vec<LoanPayment>)>;

    fn upsert_loan_payment(
        &mut self,
        payment: LoanPayment,
    ) -> Result<(LoanPayment, Option<LoanPayment>)>;

    fn delete_loan_payment(&mut self, property_id: PropertyId, id: u64) -> Result<LoanPayment>;

    fn upsert_amortization_type(
        &mut self,
        amortization_type: AmortizationType,
    ) -> Result<(AmortizationType, Option<AmortizationType>)>;

    fn delete_amortization_type(
        &mut self,
        property_id: PropertyId,
        id: u64,
    ) -> Result<AmortizationType>;

    fn upsert_compte_resultat_mapping(
        &mut self,
        mapping: CompteResultatMapping,
    ) -> Result<(CompteResultatMapping, Option<CompteResultatMapping>)>;

    fn delete_compte_resultat_mapping(
        &mut self,
        property_id: PropertyId,
        id: u64,
    ) -> Result<CompteResultatMapping>;

    fn upsert_bilan_mapping(
        &mut self,
        mapping: BilanMapping,
    ) -> Result<(BilanMapping, Option<BilanMapping>)>;

    fn delete_bilan_mapping(&mut self, property_id: PropertyId, id: u64) -> Result<BilanMapping>;

    fn set_bilan_config(&mut self, config: BilanConfig) -> Result<Option<BilanConfig>>;

    fn set_override(
        &mut self,
        value: CompteResultatOverride,
    ) -> Result<Option<CompteResultatOverride>>;

    fn clear_override(
        &mut self,
        property_id: PropertyId,
        year: i32,
    ) -> Result<Option<CompteResultatOverride>>;
}

/// Derived tables. A missing entry means "not computed yet"; an empty `Vec`
/// is a computed result with no rows.
pub trait CacheStore {
    /// Bumped by every deletion, so a recompute can tell that its inputs
    /// were invalidated while it ran.
    fn generation(&self, property_id: PropertyId) -> u64;

    fn load_amortization_results(
        &self,
        property_id: PropertyId,
        amortization_type_id: u64,
    ) -> Option<Vec<AmortizationResult>>;

    fn replace_amortization_results(
        &mut self,
        property_id: PropertyId,
        amortization_type_id: u64,
        rows: Vec<AmortizationResult>,
    );

    fn load_compte_resultat(
        &self,
        property_id: PropertyId,
        year: i32,
    ) -> Option<Vec<CompteResultatData>>;

    fn store_compte_resultat(
        &mut self,
        property_id: PropertyId,
        year: i32,
        rows: Vec<CompteResultatData>,
    );

    fn load_bilan(&self, property_id: PropertyId, year: i32) -> Option<Vec<BilanData>>;

    fn store_bilan(&mut self, property_id: PropertyId, year: i32, rows: Vec<BilanData>);

    /// Deletes cached rows of one table for the property, restricted to `years`
    /// when given. Amortization results are stored per type, so for that table
    /// `years` is ignored and every type of the property is dropped.
    fn delete_cached_rows(
        &mut self,
        property_id: PropertyId,
        table: CachedTable,
        years: Option<&[i32]>,
    ) -> usize;

    fn delete_amortization_results(
        &mut self,
        property_id: PropertyId,
        amortization_type_ids: &[u64],
    ) -> usize;

    /// Years currently cached for the property in a per-year table.
    fn cached_years(&self, property_id: PropertyId, table: CachedTable) -> Vec<i32>;
}

pub trait LedgerStore: Send + Sync {
    type Tables: SourceData + SourceWrite + CacheStore;

    fn read<R>(&self, f: impl FnOnce(&Self::Tables) -> Result<R>) -> Result<R>;

    /// Runs `f` as one transaction: its changes are visible only if it returns `Ok`.
    fn write<R>(&self, f: impl FnOnce(&mut Self::Tables) -> Result<R>) -> Result<R>;
}

trait Scoped: Clone {
    const ENTITY: &'static str;
    fn id(&self) -> u64;
    fn set_id(&mut self, id: u64);
    fn property_id(&self) -> PropertyId;
}

macro_rules! scoped {
    ($ty:ty, $name:literal) => {
        impl Scoped for $ty {
            const ENTITY: &'static str = $name;
            fn id(&self) -> u64 {
                self.id
            }
            fn set_id(&mut self, id: u64) {
                self.id = id;
            }
            fn property_id(&self) -> PropertyId {
                self.property_id
            }
        }
    };
}

scoped!(Transaction, "Transaction");
scoped!(LoanConfig, "LoanConfig");
scoped!(LoanPayment, "LoanPayment");
scoped!(AmortizationType, "AmortizationType");
scoped!(CompteResultatMapping, "CompteResultatMapping");
scoped!(BilanMapping, "BilanMapping");

#[derive(Debug, Clone, Default)]
pub struct Tables {
    next_id: u64,
    properties: BTreeMap<PropertyId, Property>,
    transactions: BTreeMap<u64, Transaction>,
    loan_configs: BTreeMap<u64, LoanConfig>,
    loan_payments: BTreeMap<u64, LoanPayment>,
    amortization_types: BTreeMap<u64, AmortizationType>,
    compte_resultat_mappings: BTreeMap<u64, CompteResultatMapping>,
    bilan_mappings: BTreeMap<u64, BilanMapping>,
    bilan_configs: BTreeMap<PropertyId, BilanConfig>,
    overrides: BTreeMap<(PropertyId, i32), CompteResultatOverride>,

    generations: BTreeMap<PropertyId, u64>,
    amortization_results: BTreeMap<(PropertyId, u64), Vec<AmortizationResult>>,
    compte_resultat_data: BTreeMap<(PropertyId, i32), Vec<CompteResultatData>>,
    bilan_data: BTreeMap<(PropertyId, i32), Vec<BilanData>>,
}

impl Tables {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn ensure_property(&self, property_id: PropertyId) -> Result<()> {
        if self.properties.contains_key(&property_id) {
            Ok(())
        } else {
            Err(LedgerError::MissingProperty(property_id))
        }
    }

    fn bump_generation(&mut self, property_id: PropertyId) {
        *self.generations.entry(property_id).or_default() += 1;
    }

    /// Number of cached entries of the property, all tables together.
    pub fn cached_entries(&self, property_id: PropertyId) -> usize {
        self.amortization_results
            .keys()
            .filter(|(p, _)| *p == property_id)
            .count()
            + self
                .compte_resultat_data
                .keys()
                .filter(|(p, _)| *p == property_id)
                .count()
            + self.bilan_data.keys().filter(|(p, _)| *p == property_id).count()
    }
}

fn list_scoped<T: Scoped>(map: &BTreeMap<u64, T>, property_id: PropertyId) -> Vec<T> {
    map.values()
        .filter(|item| item.property_id() == property_id)
        .cloned()
        .collect()
}

fn get_scoped<T: Scoped>(map: &BTreeMap<u64, T>, property_id: PropertyId, id: u64) -> Result<T> {
    map.get(&id)
        .filter(|item| item.property_id() == property_id)
        .cloned()
        .ok_or(LedgerError::NotFound {
            entity: T::ENTITY,
            id,
            property_id,
        })
}

fn remove_scoped<T: Scoped>(
    map: &mut BTreeMap<u64, T>,
    property_id: PropertyId,
    id: u64,
) -> Result<T> {
    get_scoped(map, property_id, id)?;
    map.remove(&id).ok_or(LedgerError::NotFound {
        entity: T::ENTITY,
        id,
        property_id,
    })
}

impl Tables {
    fn upsert_scoped<T: Scoped>(
        &mut self,
        select: fn(&mut Tables) -> &mut BTreeMap<u64, T>,
        mut item: T,
    ) -> Result<(T, Option<T>)> {
        self.ensure_property(item.property_id())?;

        if item.id() == 0 {
            let id = self.allocate_id();
            item.set_id(id);
            select(self).insert(id, item.clone());
            return Ok((item, None));
        }

        let map = select(self);
        let previous = get_scoped(map, item.property_id(), item.id())?;
        map.insert(item.id(), item.clone());
        Ok((item, Some(previous)))
    }
}

impl SourceData for Tables {
    fn property_exists(&self, property_id: PropertyId) -> bool {
        self.properties.contains_key(&property_id)
    }

    fn list_transactions(
        &self,
        property_id: PropertyId,
        year: Option<i32>,
        level_1_filter: Option<&[String]>,
    ) -> Vec<Transaction> {
        self.transactions
            .values()
            .filter(|t| t.property_id == property_id)
            .filter(|t| year.map_or(true, |y| t.date.year() == y))
            .filter(|t| level_1_filter.map_or(true, |levels| levels.contains(&t.level_1)))
            .cloned()
            .collect()
    }

    fn get_transaction(&self, property_id: PropertyId, id: u64) -> Result<Transaction> {
        get_scoped(&self.transactions, property_id, id)
    }

    fn get_loan_config(&self, property_id: PropertyId, id: u64) -> Result<LoanConfig> {
        get_scoped(&self.loan_configs, property_id, id)
    }

    fn list_loan_configs(&self, property_id: PropertyId) -> Vec<LoanConfig> {
        list_scoped(&self.loan_configs, property_id)
    }

    fn list_loan_payments(
        &self,
        property_id: PropertyId,
        loan_config_id: Option<u64>,
    ) -> Vec<LoanPayment> {
        list_scoped(&self.loan_payments, property_id)
            .into_iter()
            .filter(|p| loan_config_id.map_or(true, |id| p.loan_config_id == id))
            .collect()
    }

    fn list_amortization_types(&self, property_id: PropertyId) -> Vec<AmortizationType> {
        list_scoped(&self.amortization_types, property_id)
    }

    fn list_compte_resultat_mappings(&self, property_id: PropertyId) -> Vec<CompteResultatMapping> {
        list_scoped(&self.compte_resultat_mappings, property_id)
    }

    fn list_bilan_mappings(&self, property_id: PropertyId) -> Vec<BilanMapping> {
        list_scoped(&self.bilan_mappings, property_id)
    }

    fn get_bilan_config(&self, property_id: PropertyId) -> Option<BilanConfig> {
        self.bilan_configs.get(&property_id).cloned()
    }

    fn get_override(&self, property_id: PropertyId, year: i32) -> Option<CompteResultatOverride> {
        self.overrides.get(&(property_id, year)).cloned()
    }
}

impl SourceWrite for Tables {
    fn insert_property(&mut self, name: &str) -> Property {
        let property = Property {
            id: PropertyId(self.allocate_id()),
            name: name.to_string(),
        };
        self.properties.insert(property.id, property.clone());
        property
    }

    fn delete_property(&mut self, property_id: PropertyId) -> Result<Property> {
        let property = self
            .properties
            .remove(&property_id)
            .ok_or(LedgerError::MissingProperty(property_id))?;

        self.transactions.retain(|_, t| t.property_id != property_id);
        self.loan_configs.retain(|_, l| l.property_id != property_id);
        self.loan_payments.retain(|_, p| p.property_id != property_id);
        self.amortization_types.retain(|_, a| a.property_id != property_id);
        self.compte_resultat_mappings
            .retain(|_, m| m.property_id != property_id);
        self.bilan_mappings.retain(|_, m| m.property_id != property_id);
        self.bilan_configs.remove(&property_id);
        self.overrides.retain(|(p, _), _| *p != property_id);

        Ok(property)
    }

    fn upsert_transaction(
        &mut self,
        transaction: Transaction,
    ) -> Result<(Transaction, Option<Transaction>)> {
        self.upsert_scoped(|t| &mut t.transactions, transaction)
    }

    fn delete_transaction(&mut self, property_id: PropertyId, id: u64) -> Result<Transaction> {
        remove_scoped(&mut self.transactions, property_id, id)
    }

    fn upsert_loan_config(
        &mut self,
        loan: LoanConfig,
    ) -> Result<(LoanConfig, Option<LoanConfig>)> {
        self.upsert_scoped(|t| &mut t.loan_configs, loan)
    }

    fn delete_loan_config(
        &mut self,
        property_id: PropertyId,
        id: u64,
    ) -> Result<(LoanConfig, Vec<LoanPayment>)> {
        let loan = remove_scoped(&mut self.loan_configs, property_id, id)?;
        let payments = self.list_loan_payments(property_id, Some(id));
        self.loan_payments
            .retain(|_, p| !(p.property_id == property_id && p.loan_config_id == id));
        Ok((loan, payments))
    }

    fn upsert_loan_payment(
        &mut self,
        payment: LoanPayment,
    ) -> Result<(LoanPayment, Option<LoanPayment>)> {
        // The loan must belong to the same property as the payment.
        self.get_loan_config(payment.property_id, payment.loan_config_id)?;
        self.upsert_scoped(|t| &mut t.loan_payments, payment)
    }

    fn delete_loan_payment(&mut self, property_id: PropertyId, id: u64) -> Result<LoanPayment> {
        remove_scoped(&mut self.loan_payments, property_id, id)
    }

    fn upsert_amortization_type(
        &mut self,
        amortization_type: AmortizationType,
    ) -> Result<(AmortizationType, Option<AmortizationType>)> {
        self.upsert_scoped(|t| &mut t.amortization_types, amortization_type)
    }

    fn delete_amortization_type(
        &mut self,
        property_id: PropertyId,
        id: u64,
    ) -> Result<AmortizationType> {
        remove_scoped(&mut self.amortization_types, property_id, id)
    }

    fn upsert_compte_resultat_mapping(
        &mut self,
        mapping: CompteResultatMapping,
    ) -> Result<(CompteResultatMapping, Option<CompteResultatMapping>)> {
        self.upsert_scoped(|t| &mut t.compte_resultat_mappings, mapping)
    }

    fn delete_compte_resultat_mapping(
        &mut self,
        property_id: PropertyId,
        id: u64,
    ) -> Result<CompteResultatMapping> {
        remove_scoped(&mut self.compte_resultat_mappings, property_id, id)
    }

    fn upsert_bilan_mapping(
        &mut self,
        mapping: BilanMapping,
    ) -> Result<(BilanMapping, Option<BilanMapping>)> {
        self.upsert_scoped(|t| &mut t.bilan_mappings, mapping)
    }

    fn delete_bilan_mapping(&mut self, property_id: PropertyId, id: u64) -> Result<BilanMapping> {
        remove_scoped(&mut self.bilan_mappings, property_id, id)
    }

    fn set_bilan_config(&mut self, config: BilanConfig) -> Result<Option<BilanConfig>> {
        self.ensure_property(config.property_id)?;
        Ok(self.bilan_configs.insert(config.property_id, config))
    }

    fn set_override(
        &mut self,
        value: CompteResultatOverride,
    ) -> Result<Option<CompteResultatOverride>> {
        self.ensure_property(value.property_id)?;
        Ok(self.overrides.insert((value.property_id, value.year), value))
    }

    fn clear_override(
        &mut self,
        property_id: PropertyId,
        year: i32,
    ) -> Result<Option<CompteResultatOverride>> {
        self.ensure_property(property_id)?;
        Ok(self.overrides.remove(&(property_id, year)))
    }
}

impl CacheStore for Tables {
    fn generation(&self, property_id: PropertyId) -> u64 {
        self.generations.get(&property_id).copied().unwrap_or(0)
    }

    fn load_amortization_results(
        &self,
        property_id: PropertyId,
        amortization_type_id: u64,
    ) -> Option<Vec<AmortizationResult>> {
        self.amortization_results
            .get(&(property_id, amortization_type_id))
            .cloned()
    }

    fn replace_amortization_results(
        &mut self,
        property_id: PropertyId,
        amortization_type_id: u64,
        rows: Vec<AmortizationResult>,
    ) {
        self.amortization_results
            .insert((property_id, amortization_type_id), rows);
    }

    fn load_compte_resultat(
        &self,
        property_id: PropertyId,
        year: i32,
    ) -> Option<Vec<CompteResultatData>> {
        self.compte_resultat_data.get(&(property_id, year)).cloned()
    }

    fn store_compte_resultat(
        &mut self,
        property_id: PropertyId,
        year: i32,
        rows: Vec<CompteResultatData>,
    ) {
        self.compte_resultat_data.insert((property_id, year), rows);
    }

    fn load_bilan(&self, property_id: PropertyId, year: i32) -> Option<Vec<BilanData>> {
        self.bilan_data.get(&(property_id, year)).cloned()
    }

    fn store_bilan(&mut self, property_id: PropertyId, year: i32, rows: Vec<BilanData>) {
        self.bilan_data.insert((property_id, year), rows);
    }

    fn delete_cached_rows(
        &mut self,
        property_id: PropertyId,
        table: CachedTable,
        years: Option<&[i32]>,
    ) -> usize {
        self.bump_generation(property_id);

        let in_scope = |p: &PropertyId, y: &i32| {
            *p == property_id && years.map_or(true, |years| years.contains(y))
        };

        match table {
            CachedTable::AmortizationResults => {
                let before = self.amortization_results.len();
                self.amortization_results
                    .retain(|(p, _), _| *p != property_id);
                before - self.amortization_results.len()
            }
            CachedTable::CompteResultatData => {
                let before = self.compte_resultat_data.len();
                self.compte_resultat_data.retain(|(p, y), _| !in_scope(p, y));
                before - self.compte_resultat_data.len()
            }
            CachedTable::BilanData => {
                let before = self.bilan_data.len();
                self.bilan_data.retain(|(p, y), _| !in_scope(p, y));
                before - self.bilan_data.len()
            }
        }
    }

    fn delete_amortization_results(
        &mut self,
        property_id: PropertyId,
        amortization_type_ids: &[u64],
    ) -> usize {
        self.bump_generation(property_id);
        let before = self.amortization_results.len();
        self.amortization_results
            .retain(|(p, id), _| !(*p == property_id && amortization_type_ids.contains(id)));
        before - self.amortization_results.len()
    }

    fn cached_years(&self, property_id: PropertyId, table: CachedTable) -> Vec<i32> {
        match table {
            CachedTable::AmortizationResults => self
                .amortization_results
                .iter()
                .filter(|((p, _), _)| *p == property_id)
                .flat_map(|(_, rows)| rows.iter().map(|r| r.year))
                .collect::<std::collections::BTreeSet<_>>()
                .into_iter()
                .collect(),
            CachedTable::CompteResultatData => self
                .compte_resultat_data
                .keys()
                .filter(|(p, _)| *p == property_id)
                .map(|(_, y)| *y)
                .collect(),
            CachedTable::BilanData => self
                .bilan_data
                .keys()
                .filter(|(p, _)| *p == property_id)
                .map(|(_, y)| *y)
                .collect(),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current state, for inspection.
    pub fn snapshot(&self) -> Result<Tables> {
        self.read(|tables| Ok(tables.clone()))
    }
}

impl LedgerStore for MemoryStore {
    type Tables = Tables;

    fn read<R>(&self, f: impl FnOnce(&Tables) -> Result<R>) -> Result<R> {
        let guard = self
            .tables
            .read()
            .map_err(|e| LedgerError::StorePoisoned(e.to_string()))?;
        f(&guard)
    }

    fn write<R>(&self, f: impl FnOnce(&mut Tables) -> Result<R>) -> Result<R> {
        let mut guard = self
            .tables
            .write()
            .map_err(|e| LedgerError::StorePoisoned(e.to_string()))?;

        let mut staged = guard.clone();
        let output = f(&mut staged)?;
        *guard = staged;
        Ok(output)
    }
}
