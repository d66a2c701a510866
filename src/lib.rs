//! # Rental Ledger
//!
//! Loan amortization, depreciation and cached yearly financial statements for
//! rental-property accounting.
//!
//! ## Core Concepts
//!
//! - **Annuity math**: PMT / IPMT / PPMT over a balance rolled forward period by period
//! - **Amortization schedules**: monthly loan schedules with deferral, insurance and yearly totals
//! - **Depreciation**: straight-line plans of fixed assets funded by transactions
//! - **Statements**: yearly Compte de Résultat and Bilan per property
//! - **Invalidation**: cached rows are deleted in the same transaction as the source
//!   change that makes them stale, and recomputed on the next read
//!
//! ## Example
//!
//! ```rust,ignore
//! use rental_ledger::*;
//! use chrono::NaiveDate;
//!
//! let ledger = PropertyLedger::new(MemoryStore::new(), EngineConfig::default());
//! let property = ledger.create_property("T2 Lyon")?;
//!
//! let loan = ledger.upsert_loan_config(LoanConfig {
//!     id: 0,
//!     property_id: property.id,
//!     name: "Crédit immobilier".to_string(),
//!     credit_amount: 200_000.0,
//!     interest_rate: 2.5,
//!     duration_years: 20,
//!     initial_deferral_months: 0,
//!     start_date: NaiveDate::from_ymd_opt(2023, 1, 1),
//!     end_date: None,
//!     monthly_insurance: 25.0,
//!     interest_sample_months: vec![1, 12],
//! })?;
//!
//! let schedule = ledger.simulate_loan(property.id, loan.id)?;
//! ledger.save_simulated_payments(property.id, loan.id)?;
//!
//! let statements = ledger.calculate_compte_resultat(property.id, &[2023, 2024])?;
//! let bilans = ledger.calculate_bilan(property.id, &[2023, 2024])?;
//! ```

pub mod annuity;
pub mod bilan;
pub mod compte_resultat;
pub mod config;
pub mod depreciation;
pub mod error;
pub mod invalidation;
pub mod ledger;
pub mod scheduler;
pub mod schema;
pub mod store;
pub mod utils;

pub use annuity::{interest_portion, payment, periods, principal_portion, AnnuityPeriod};
pub use bilan::{BilanLine, BilanYear};
pub use compte_resultat::CompteResultatYear;
pub use config::{EngineConfig, ProrationPolicy};
pub use depreciation::{DepreciationEngine, DepreciationPlan};
pub use error::{LedgerError, Result};
pub use invalidation::{InvalidationController, InvalidationReport, InvalidationScope};
pub use ledger::{DepreciationSummary, PropertyLedger};
pub use scheduler::{
    compute_amortization_schedule, AmortizationSchedule, AmortizationScheduler, LoanTerm,
    ScheduleWarning, ScheduleWarningKind, SchedulePeriod, YearBasis, YearlyLoanSummary,
};
pub use schema::*;
pub use store::{CacheStore, CachedTable, LedgerStore, MemoryStore, SourceData, SourceWrite};

use log::info;

/// Straight-line plan of one amortization type from the given transactions.
pub fn depreciation_plan(
    amortization_type: &AmortizationType,
    transactions: &[Transaction],
    config: &EngineConfig,
) -> Result<DepreciationPlan> {
    DepreciationEngine::new(config).plan(amortization_type, transactions)
}

/// Builds a ledger over an empty in-memory store.
pub fn in_memory_ledger(config: EngineConfig) -> PropertyLedger<MemoryStore> {
    info!(
        "Starting in-memory ledger ({:?} depreciation, {} stale-read retries)",
        config.depreciation_proration, config.stale_read_retries
    );
    PropertyLedger::new(MemoryStore::new(), config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_reexported_annuity() {
        let pmt = payment(0.025 / 12.0, 240, -200_000.0, 0.0, PaymentTiming::End);
        assert!((pmt + 1059.81).abs() < 0.01, "got {}", pmt);
    }

    #[test]
    fn test_depreciation_plan_wrapper() {
        let amortization_type = AmortizationType {
            id: 1,
            property_id: PropertyId(1),
            name: "Travaux".to_string(),
            level_1_values: vec!["TRAVAUX".to_string()],
            duration_years: 10,
            annual_amount: None,
            start_date: None,
        };
        let transactions = vec![Transaction {
            id: 1,
            property_id: PropertyId(1),
            date: NaiveDate::from_ymd_opt(2022, 4, 1).unwrap(),
            amount: -12_000.0,
            label: "Salle de bain".to_string(),
            level_1: "TRAVAUX".to_string(),
            level_2: None,
            level_3: None,
        }];

        let plan =
            depreciation_plan(&amortization_type, &transactions, &EngineConfig::default()).unwrap();
        assert_eq!(plan.annual_amount, 1_200.0);
        assert_eq!(plan.yearly.len(), 10);
    }

    #[test]
    fn test_in_memory_ledger() {
        let ledger = in_memory_ledger(EngineConfig::default());
        let property = ledger.create_property("Parking").unwrap();
        let statements = ledger.calculate_compte_resultat(property.id, &[2024]).unwrap();
        assert_eq!(statements[&2024].resultat_exercice, 0.0);
    }
}
